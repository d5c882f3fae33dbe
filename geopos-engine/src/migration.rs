//! 文档格式迁移。
//!
//! 每一步是纯函数 `&PlanDocument -> PlanDocument`，以源版本为键，按版本顺序串联到当前版本。
//! 步骤在改动前先检查标记，已迁移过的结构不会再被改动。任何一步失败时整个迁移失败，
//! 调用方手里的原文档保持不变。

use geopos_core::document::{
    DocumentVersion, LAYER_DYNAMIC, LAYER_PROJECT0, LAYER_PROJECT1, LAYER_STATIC,
    LEGACY_LAYER_INFO, LEGACY_LAYER_PROJECT, Layer, PlanDocument, PlanId,
};
use thiserror::Error;
use tracing::{debug, info};

use crate::static_layer::{CATEGORY_KNOTEN, CATEGORY_META, KNOTENMITTE};

/// 平面图归属标记，写在图形的 class 中。
pub const CLASS_LAGEPLAN: &str = "LAGEPLAN";
pub const CLASS_LOCKED: &str = "locked";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MigrationError {
    #[error("migration chain is broken at version {from}")]
    BrokenChain { from: DocumentVersion },
    #[error("migration {from} -> {to} failed: {message}")]
    StepFailed {
        from: DocumentVersion,
        to: DocumentVersion,
        message: String,
    },
}

pub type MigrateFn = fn(&PlanDocument) -> Result<PlanDocument, String>;

#[derive(Clone)]
pub struct MigrationStep {
    pub from: DocumentVersion,
    pub description: &'static str,
    pub migrate: MigrateFn,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub original_version: DocumentVersion,
    pub final_version: DocumentVersion,
    pub steps_applied: usize,
    pub step_descriptions: Vec<String>,
}

impl MigrationReport {
    pub fn is_noop(&self) -> bool {
        self.steps_applied == 0
    }
}

pub struct MigrationPipeline {
    steps: Vec<MigrationStep>,
}

impl MigrationPipeline {
    /// 校验步骤从最早版本起连续覆盖到当前版本。
    pub fn new(mut steps: Vec<MigrationStep>) -> Result<Self, MigrationError> {
        steps.sort_by_key(|step| step.from);
        let mut expected = DocumentVersion::V1;
        for step in &steps {
            if step.from != expected {
                return Err(MigrationError::BrokenChain { from: expected });
            }
            expected = step
                .from
                .next()
                .ok_or(MigrationError::BrokenChain { from: step.from })?;
        }
        if expected != DocumentVersion::CURRENT {
            return Err(MigrationError::BrokenChain { from: expected });
        }
        Ok(Self { steps })
    }

    pub fn standard() -> Self {
        Self {
            steps: vec![
                MigrationStep {
                    from: DocumentVersion::V1,
                    description: "Zeichenebenen PROJECT0/PROJECT1, Knotenmitte als eigene Kategorie",
                    migrate: migrate_v1_to_v1_2,
                },
                MigrationStep {
                    from: DocumentVersion::V1_2,
                    description: "SPUR nicht mehr auf dem Ampelplan",
                    migrate: migrate_v1_2_to_v1_3,
                },
                MigrationStep {
                    from: DocumentVersion::V1_3,
                    description: "DYNAMIC-Ebene unter STATIC",
                    migrate: migrate_v1_3_to_v1_4,
                },
            ],
        }
    }

    pub fn steps(&self) -> &[MigrationStep] {
        &self.steps
    }

    /// 从文档声明的版本迁移到当前版本，返回新文档。
    pub fn migrate(
        &self,
        document: &PlanDocument,
    ) -> Result<(PlanDocument, MigrationReport), MigrationError> {
        let original_version = document.version();
        let mut current = document.clone();
        let mut report = MigrationReport {
            original_version,
            final_version: original_version,
            ..MigrationReport::default()
        };
        for step in self.steps.iter().filter(|step| step.from >= original_version) {
            let to = step
                .from
                .next()
                .ok_or(MigrationError::BrokenChain { from: step.from })?;
            let mut migrated = (step.migrate)(&current).map_err(|message| {
                MigrationError::StepFailed {
                    from: step.from,
                    to,
                    message,
                }
            })?;
            migrated.set_version(to);
            info!(from = %step.from, to = %to, step = step.description, "文档格式已迁移");
            current = migrated;
            report.final_version = to;
            report.steps_applied += 1;
            report.step_descriptions.push(step.description.to_string());
        }
        Ok((current, report))
    }
}

impl Default for MigrationPipeline {
    fn default() -> Self {
        Self::standard()
    }
}

fn retag_layer(document: &mut PlanDocument, from: &str, to: &str) -> Result<bool, String> {
    if document.layer(to).is_some() {
        return Ok(false);
    }
    let Some(layer) = document.layer_mut(from) else {
        return Ok(false);
    };
    if layer.as_shapes().is_none() {
        return Err(format!("layer {from} is not a drawing layer"));
    }
    layer.id = to.to_string();
    Ok(true)
}

/// 1 → 1.2：旧绘图层改名，INFO 层图形并入 PROJECT0 并锁定，节点中心独立成类别。
pub fn migrate_v1_to_v1_2(document: &PlanDocument) -> Result<PlanDocument, String> {
    let mut document = document.clone();

    if retag_layer(&mut document, LEGACY_LAYER_PROJECT, LAYER_PROJECT0)? {
        if let Some(content) = document
            .layer_mut(LAYER_PROJECT0)
            .and_then(Layer::as_shapes_mut)
        {
            for shape in content.shapes.iter_mut() {
                shape.add_class(CLASS_LAGEPLAN);
            }
        }
    }
    if document.layer(LAYER_PROJECT0).is_none() {
        document.push_layer(Layer::shapes(LAYER_PROJECT0));
        document.move_layer_before(LAYER_PROJECT0, LAYER_STATIC);
        debug!("新建 PROJECT0 层");
    }
    if document
        .layer_index(LAYER_PROJECT0)
        .zip(document.layer_index(LAYER_STATIC))
        .is_some_and(|(project, statics)| project > statics)
    {
        document.move_layer_before(LAYER_PROJECT0, LAYER_STATIC);
    }

    if retag_layer(&mut document, LEGACY_LAYER_INFO, LAYER_PROJECT1)? {
        let mut moved = document
            .layer_mut(LAYER_PROJECT1)
            .and_then(Layer::as_shapes_mut)
            .map(|content| std::mem::take(&mut content.shapes))
            .unwrap_or_default();
        for shape in moved.iter_mut() {
            shape.add_class(CLASS_LAGEPLAN);
            shape.add_class(CLASS_LOCKED);
        }
        if let Some(content) = document
            .layer_mut(LAYER_PROJECT0)
            .and_then(Layer::as_shapes_mut)
        {
            content.shapes.extend(moved);
        }
    }
    if document.layer(LAYER_PROJECT1).is_none() {
        document.push_layer(Layer::shapes(LAYER_PROJECT1));
    }

    if let Some(plan) = document.plan_mut(PlanId::Lageplan) {
        if !plan.has_category(CATEGORY_KNOTEN) {
            plan.categories.insert(0, CATEGORY_KNOTEN.to_string());
        }
    }

    if document.object(CATEGORY_KNOTEN, KNOTENMITTE).is_none() {
        if !document.relocate_object(CATEGORY_META, "KNOTEN", CATEGORY_KNOTEN, KNOTENMITTE) {
            if let Some(meta) = document.meta_by_id_mut("KNOTEN") {
                meta.id = KNOTENMITTE.to_string();
                meta.category = CATEGORY_KNOTEN.to_string();
            }
        }
    }

    for id in ["NORDPFEIL", "MASSSTAB"] {
        if let Some(meta) = document.meta_by_id_mut(id) {
            if meta.category != CATEGORY_META {
                meta.category = CATEGORY_META.to_string();
            }
        }
    }
    Ok(document)
}

/// 1.2 → 1.3：信号灯平面图不再显示车道。
pub fn migrate_v1_2_to_v1_3(document: &PlanDocument) -> Result<PlanDocument, String> {
    let mut document = document.clone();
    if let Some(plan) = document.plan_mut(PlanId::Ampelplan) {
        plan.categories.retain(|category| category != "SPUR");
    }
    Ok(document)
}

/// 1.3 → 1.4：动态层叠放在静态层之下。
pub fn migrate_v1_3_to_v1_4(document: &PlanDocument) -> Result<PlanDocument, String> {
    let mut document = document.clone();
    let dynamic = document.layer_index(LAYER_DYNAMIC);
    let statics = document.layer_index(LAYER_STATIC);
    if let (Some(dynamic), Some(statics)) = (dynamic, statics) {
        if dynamic > statics {
            document.move_layer_before(LAYER_DYNAMIC, LAYER_STATIC);
        }
    }
    Ok(document)
}
