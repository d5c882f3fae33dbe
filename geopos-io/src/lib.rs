//! 节点目录的薄 I/O 层：CSV 属性记录、JSON 持久化文档和磁盘上的符号库。

use std::fs;
use std::path::{Path, PathBuf};

use geopos_core::document::PlanDocument;
use thiserror::Error;
use tracing::debug;

pub mod records;
pub mod symbols;

pub use records::CsvRecords;
pub use symbols::{LibraryLayout, SymbolLibrary};

#[derive(Debug, Error)]
pub enum IoError {
    #[error("failed to read file {path:?}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write file {path:?}: {source}")]
    WriteError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid document structure in {path:?}: {source}")]
    InvalidDocument {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode document: {0}")]
    Encode(#[source] serde_json::Error),
}

pub trait DocumentLoader {
    fn load(&self, path: &Path) -> Result<PlanDocument, IoError>;
}

pub trait DocumentSaver {
    fn save(&self, document: &PlanDocument, path: &Path) -> Result<(), IoError>;
}

/// 以 JSON 读写平面图文档。
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFacade;

impl JsonFacade {
    pub fn new() -> Self {
        Self
    }

    /// 文档不存在时返回 `None`，由调用方按记录新建。
    pub fn load_if_exists(&self, path: &Path) -> Result<Option<PlanDocument>, IoError> {
        if !path.exists() {
            debug!(path = %path.display(), "文档不存在");
            return Ok(None);
        }
        self.load(path).map(Some)
    }
}

impl DocumentLoader for JsonFacade {
    fn load(&self, path: &Path) -> Result<PlanDocument, IoError> {
        let data = fs::read_to_string(path).map_err(|source| IoError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&data).map_err(|source| IoError::InvalidDocument {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl DocumentSaver for JsonFacade {
    /// 先写临时文件再改名，中途失败不会留下半个文档。
    fn save(&self, document: &PlanDocument, path: &Path) -> Result<(), IoError> {
        let data = serde_json::to_string_pretty(document).map_err(IoError::Encode)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| IoError::WriteError {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, data).map_err(|source| IoError::WriteError {
            path: staging.clone(),
            source,
        })?;
        fs::rename(&staging, path).map_err(|source| IoError::WriteError {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), version = %document.version(), "文档已保存");
        Ok(())
    }
}
