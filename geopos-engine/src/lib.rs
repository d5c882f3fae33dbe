pub mod command;
pub mod dynamic_layer;
pub mod layout;
pub mod migration;
pub mod node;
pub mod session;
pub mod static_layer;
pub mod title_block;

#[cfg(test)]
mod test_support;

pub use layout::{LayoutAttribute, PlanLayoutController};
pub use migration::{MigrationError, MigrationPipeline, MigrationReport};
pub use node::{DisplayMode, NodeInfo};
pub use session::{OpenReport, PlanSession};

use geopos_core::document::{PlanDocument, PlanId};
use geopos_core::projection::{Datum, Projection};

use crate::errors::EngineError;

/// 平面图在文档中的当前投影。
pub(crate) fn plan_projection(
    document: &PlanDocument,
    plan: PlanId,
    datum: Datum,
) -> Result<Projection, EngineError> {
    document
        .plan(plan)
        .map(|node| node.projection(datum))
        .ok_or(EngineError::PlanNotFound(plan))
}

/// 导出用的测量坐标：最多三位小数，去掉末尾的零。
pub(crate) fn format_coordinate(value: f64) -> String {
    let text = format!("{value:.3}");
    let trimmed = text.trim_end_matches('0').trim_end_matches('.');
    if trimmed == "-0" {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

pub mod errors {
    use geopos_core::document::PlanId;
    use geopos_core::projection::{GeodeticTransformError, ProjectionError};
    use geopos_core::records::{MalformedRecordError, RecordSourceError};
    use thiserror::Error;

    use crate::migration::MigrationError;
    use crate::node::DisplayMode;

    #[derive(Debug, Error)]
    pub enum EngineError {
        #[error("plan {0} not found in document")]
        PlanNotFound(PlanId),
        #[error("object {category}/{id} not found")]
        ObjectNotFound { category: String, id: String },
        #[error("plan {0} has no title block")]
        TitleBlockNotFound(PlanId),
        #[error("dynamic object {0} not found")]
        DynamicObjectNotFound(String),
        #[error("record file {0} is missing")]
        MissingRecords(String),
        #[error("node is opened read-only in mode {0}")]
        ReadOnly(DisplayMode),
        #[error("invalid value {value:?} for {attribute}")]
        InvalidLayoutValue { attribute: String, value: String },
        #[error(transparent)]
        Projection(#[from] ProjectionError),
        #[error(transparent)]
        Malformed(#[from] MalformedRecordError),
        #[error(transparent)]
        Records(#[from] RecordSourceError),
        #[error(transparent)]
        GeodeticTransform(#[from] GeodeticTransformError),
        #[error(transparent)]
        Migration(#[from] MigrationError),
        #[error("deployment config is not well-formed XML: {0}")]
        Xml(#[from] quick_xml::Error),
        #[error("cascade aborted after updating {updated:?}: {source}")]
        CascadeAborted {
            updated: Vec<PlanId>,
            #[source]
            source: Box<EngineError>,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinates_keep_at_most_three_decimals() {
        assert_eq!(format_coordinate(683_200.0), "683200");
        assert_eq!(format_coordinate(683_200.125_4), "683200.125");
        assert_eq!(format_coordinate(246_390.5), "246390.5");
        assert_eq!(format_coordinate(-0.0001), "0");
    }

    #[test]
    fn missing_plan_is_reported() {
        let document = PlanDocument::new();
        assert!(matches!(
            plan_projection(&document, PlanId::Vvaplan, Datum::Lv03),
            Err(EngineError::PlanNotFound(PlanId::Vvaplan))
        ));
    }
}
