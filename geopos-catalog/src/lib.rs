pub mod catalogs;
pub mod rules;
pub mod store;
pub mod symbol;

pub use catalogs::{DynamicCatalog, ProjectCatalog, StaticCatalog, SymbolGroup};
pub use rules::{RuleTable, SymbolRule};
pub use store::{CatalogDefinitions, CatalogRefresher, CatalogSnapshot, CatalogStore, DefinitionSource};
pub use symbol::SymbolDefinition;

pub mod errors {
    use std::path::PathBuf;

    use thiserror::Error;

    #[derive(Debug, Error)]
    pub enum CatalogError {
        #[error("failed to read symbol source {path:?}: {source}")]
        Io {
            path: PathBuf,
            #[source]
            source: std::io::Error,
        },
        #[error("invalid symbol {id}: {message}")]
        InvalidSymbol { id: String, message: String },
        #[error("invalid rule table: {0}")]
        Rules(#[from] toml::de::Error),
        #[error("invalid symbol.cf: {0}")]
        SymbolTable(#[from] csv::Error),
    }
}
