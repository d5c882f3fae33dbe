//! 编辑会话：一个节点的文档、节点信息和当时的符号目录快照。
//!
//! 所有操作都通过显式的会话句柄进行，会话之间不共享可变状态。

use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use geopos_catalog::CatalogSnapshot;
use geopos_core::document::{
    DocumentVersion, PlanDocument, PlanId, PlanNode, TitleBlockPosition, TitleBlockSettings,
};
use geopos_core::geometry::{Point2, Transform};
use geopos_core::projection::{Datum, GeodeticTransform, Orientation, Projection, plan_columns};
use geopos_core::records::{AttributeRecord, RecordSink, RecordSource};
use tracing::{info, warn};

use crate::dynamic_layer::DynamicLayer;
use crate::errors::EngineError;
use crate::layout::{
    FeasibleValues, LayoutAttribute, PlanLayoutController, PlanUpdate, PositionChange,
};
use crate::migration::{MigrationPipeline, MigrationReport};
use crate::node::NodeInfo;
use crate::static_layer::{ReconcileReport, StaticLayer, SymbolChoice};
use crate::title_block::TitleBlockLayer;
use crate::{format_coordinate, plan_projection};

/// 打开文档的结果。
#[derive(Debug, Clone, PartialEq)]
pub struct OpenReport {
    /// 文档由计划记录新建。
    pub created: bool,
    pub migration: MigrationReport,
    /// 旧文档中缺失、按记录补上的平面图。
    pub added_plans: Vec<PlanId>,
    /// 文档结构有变化，需要保存。
    pub file_updated: bool,
    pub statics: ReconcileReport,
    pub dynamics: ReconcileReport,
    pub title_blocks: Vec<PlanId>,
}

#[derive(Debug, Clone)]
pub struct PlanSession {
    document: PlanDocument,
    node: NodeInfo,
    catalog: Arc<CatalogSnapshot>,
}

/// 计划记录中的投影和图框配置。记录缺失的从属平面图沿用基准图。
struct PlanSeed {
    projection: Projection,
    title_block: TitleBlockSettings,
}

fn title_settings(record: &AttributeRecord) -> TitleBlockSettings {
    let mut settings = TitleBlockSettings::default();
    let column = |index| {
        record
            .column(index)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };
    if let Some(raw) = column(plan_columns::TITLE_POSITION) {
        match raw.parse::<TitleBlockPosition>() {
            Ok(position) => settings.position = position,
            Err(err) => warn!(plan = record.category(), error = %err, "图框位置无效，使用默认值"),
        }
    }
    if let Some(raw) = column(plan_columns::TITLE_ORIENTATION) {
        match raw.parse::<Orientation>() {
            Ok(auslegung) => settings.auslegung = auslegung,
            Err(err) => warn!(plan = record.category(), error = %err, "图框方向无效，使用默认值"),
        }
    }
    settings
}

/// 返回基准图投影和全部平面图的初始配置。
fn plan_seeds(
    records: &dyn RecordSource,
    datum: Datum,
) -> Result<(Projection, Vec<(PlanId, PlanSeed)>), EngineError> {
    let ground_table = records
        .load(PlanId::Lageplan.as_str())?
        .ok_or_else(|| EngineError::MissingRecords(PlanId::Lageplan.as_str().to_string()))?;
    let ground = Projection::from_attribute_record(ground_table.first()?, datum)?;

    let mut seeds = Vec::with_capacity(PlanId::ALL.len());
    for plan in PlanId::ALL {
        let seed = match records.load(plan.as_str())? {
            Some(table) => {
                let record = table.first()?;
                PlanSeed {
                    projection: Projection::from_attribute_record(record, datum)?,
                    title_block: title_settings(record),
                }
            }
            None => {
                warn!(plan = %plan, "计划记录缺失，沿用基准图");
                PlanSeed {
                    projection: ground,
                    title_block: TitleBlockSettings::default(),
                }
            }
        };
        seeds.push((plan, seed));
    }
    Ok((ground, seeds))
}

fn plan_node(plan: PlanId, seed: &PlanSeed, ground: &Projection) -> PlanNode {
    let mut node = PlanNode::new(plan, &seed.projection, ground);
    node.title_block = seed.title_block;
    node
}

impl PlanSession {
    /// 打开节点：没有文档时按记录新建，否则先迁移再补齐平面图；随后对齐静态层、
    /// 图框和动态层。
    pub fn open(
        existing: Option<PlanDocument>,
        records: &dyn RecordSource,
        catalog: Arc<CatalogSnapshot>,
        opened_at: NaiveDateTime,
    ) -> Result<(Self, OpenReport), EngineError> {
        let node = NodeInfo::from_records(records, opened_at)?;
        let (ground_seed, seeds) = plan_seeds(records, node.datum)?;

        let created = existing.is_none();
        let (mut document, migration) = match existing {
            Some(document) => MigrationPipeline::standard().migrate(&document)?,
            None => (
                PlanDocument::new(),
                MigrationReport {
                    original_version: DocumentVersion::CURRENT,
                    final_version: DocumentVersion::CURRENT,
                    ..MigrationReport::default()
                },
            ),
        };
        if created {
            for (plan, seed) in &seeds {
                document.upsert_plan(plan_node(*plan, seed, &ground_seed));
            }
        }

        let mut added_plans = Vec::new();
        if !created {
            let ground = document
                .plan(PlanId::Lageplan)
                .map(|plan| plan.projection(node.datum))
                .unwrap_or(ground_seed);
            for (plan, seed) in &seeds {
                if document.plan(*plan).is_none() {
                    document.upsert_plan(plan_node(*plan, seed, &ground));
                    added_plans.push(*plan);
                }
            }
            if !added_plans.is_empty() {
                info!(plans = ?added_plans, "文档缺少平面图，已按记录补上");
            }
        }

        let mut session = Self {
            document,
            node,
            catalog,
        };
        let ground = session.ground()?;
        let statics = StaticLayer::new(&session.catalog.statics, ground)
            .reconcile(&mut session.document, records);
        let title_blocks = TitleBlockLayer::new(&session.catalog.statics, &session.node)
            .ensure(&mut session.document)?;
        let dynamics = DynamicLayer::new(&session.catalog.dynamics, &session.node, ground)
            .reconcile(&mut session.document, records);

        let file_updated = !migration.is_noop() || !added_plans.is_empty();
        info!(
            node = %session.node.number,
            created,
            file_updated,
            mode = %session.node.mode,
            "节点已打开"
        );
        Ok((
            session,
            OpenReport {
                created,
                migration,
                added_plans,
                file_updated,
                statics,
                dynamics,
                title_blocks,
            },
        ))
    }

    pub fn document(&self) -> &PlanDocument {
        &self.document
    }

    pub fn into_document(self) -> PlanDocument {
        self.document
    }

    pub fn node(&self) -> &NodeInfo {
        &self.node
    }

    pub fn catalog(&self) -> &Arc<CatalogSnapshot> {
        &self.catalog
    }

    /// 换用新的目录快照，之后的操作使用新目录。
    pub fn set_catalog(&mut self, catalog: Arc<CatalogSnapshot>) {
        self.catalog = catalog;
    }

    pub fn ground(&self) -> Result<Projection, EngineError> {
        plan_projection(&self.document, PlanId::Lageplan, self.node.datum)
    }

    fn ensure_editable(&self) -> Result<(), EngineError> {
        if self.node.mode.is_read_only() {
            return Err(EngineError::ReadOnly(self.node.mode));
        }
        Ok(())
    }

    pub fn change_layout(
        &mut self,
        plan: PlanId,
        attribute: LayoutAttribute,
        value: &str,
    ) -> Result<Vec<PlanUpdate>, EngineError> {
        self.ensure_editable()?;
        PlanLayoutController::new(&self.catalog.statics, &self.node).change_layout(
            &mut self.document,
            plan,
            attribute,
            value,
        )
    }

    /// 按文档坐标移动平面图原点。
    pub fn change_position(
        &mut self,
        plan: PlanId,
        origin: Point2,
    ) -> Result<PositionChange, EngineError> {
        self.ensure_editable()?;
        PlanLayoutController::new(&self.catalog.statics, &self.node).change_position(
            &mut self.document,
            plan,
            origin,
        )
    }

    /// 按测量坐标移动平面图原点。
    pub fn change_position_survey(
        &mut self,
        plan: PlanId,
        survey: Point2,
    ) -> Result<PositionChange, EngineError> {
        let mut projection = plan_projection(&self.document, plan, self.node.datum)?;
        projection.set_origin_survey(survey);
        self.change_position(plan, projection.origin())
    }

    pub fn plan_limits(&self) -> Result<Vec<(PlanId, FeasibleValues)>, EngineError> {
        PlanLayoutController::new(&self.catalog.statics, &self.node).plan_limits(&self.document)
    }

    pub fn change_title_block(
        &mut self,
        plan: PlanId,
        position: TitleBlockPosition,
        auslegung: Orientation,
    ) -> Result<Transform, EngineError> {
        self.ensure_editable()?;
        PlanLayoutController::new(&self.catalog.statics, &self.node).change_title_block(
            &mut self.document,
            plan,
            position,
            auslegung,
        )
    }

    pub fn invert_title_block(&mut self, plan: PlanId) -> Result<Transform, EngineError> {
        self.ensure_editable()?;
        PlanLayoutController::new(&self.catalog.statics, &self.node)
            .invert_title_block(&mut self.document, plan)
    }

    pub fn change_symbol(
        &mut self,
        category: &str,
        id: &str,
        symbol_id: &str,
    ) -> Result<(), EngineError> {
        self.ensure_editable()?;
        let ground = self.ground()?;
        StaticLayer::new(&self.catalog.statics, ground).change_symbol(
            &mut self.document,
            category,
            id,
            symbol_id,
        )
    }

    pub fn symbol_selection(
        &self,
        records: &dyn RecordSource,
        category: &str,
        id: &str,
    ) -> Result<Vec<SymbolChoice>, EngineError> {
        StaticLayer::new(&self.catalog.statics, self.ground()?).symbol_selection(
            &self.document,
            records,
            category,
            id,
        )
    }

    pub fn change_dynamic_symbol(
        &mut self,
        datapoint: &str,
        symbol_id: &str,
    ) -> Result<(), EngineError> {
        self.ensure_editable()?;
        let ground = self.ground()?;
        DynamicLayer::new(&self.catalog.dynamics, &self.node, ground).change_symbol(
            &mut self.document,
            datapoint,
            symbol_id,
        )
    }

    pub fn reset_dynamic_symbol(
        &mut self,
        records: &dyn RecordSource,
        datapoint: &str,
    ) -> Result<String, EngineError> {
        self.ensure_editable()?;
        let ground = self.ground()?;
        DynamicLayer::new(&self.catalog.dynamics, &self.node, ground).reset_symbol(
            &mut self.document,
            records,
            datapoint,
        )
    }

    /// 重新生成静态层，图框文字随之刷新。
    pub fn refresh_static(
        &mut self,
        records: &dyn RecordSource,
    ) -> Result<ReconcileReport, EngineError> {
        let ground = self.ground()?;
        let report = StaticLayer::new(&self.catalog.statics, ground)
            .refresh(&mut self.document, records);
        TitleBlockLayer::new(&self.catalog.statics, &self.node).ensure(&mut self.document)?;
        Ok(report)
    }

    pub fn refresh_dynamic(
        &mut self,
        records: &dyn RecordSource,
    ) -> Result<ReconcileReport, EngineError> {
        let ground = self.ground()?;
        Ok(DynamicLayer::new(&self.catalog.dynamics, &self.node, ground)
            .reconcile(&mut self.document, records))
    }

    pub fn reset_positions(&mut self) -> Result<usize, EngineError> {
        self.ensure_editable()?;
        let ground = self.ground()?;
        Ok(DynamicLayer::new(&self.catalog.dynamics, &self.node, ground)
            .reset_positions(&mut self.document))
    }

    pub fn deployment_config(&self, records: &dyn RecordSource) -> Result<String, EngineError> {
        DynamicLayer::new(&self.catalog.dynamics, &self.node, self.ground()?)
            .deployment_config(&self.document, records)
    }

    /// 把平面图和静态对象写回记录文件。
    pub fn export_records(
        &self,
        records: &dyn RecordSource,
        sink: &mut dyn RecordSink,
        today: NaiveDate,
    ) -> Result<(), EngineError> {
        self.ensure_editable()?;
        let edited_on = today.format("%d.%m.%y").to_string();
        for node in self.document.plans() {
            let Some(mut table) = records.load(node.id.as_str())? else {
                continue;
            };
            let record = table.first_mut()?;
            let survey = node.projection(self.node.datum).origin_survey();
            let values = [
                (plan_columns::X, format_coordinate(survey.x())),
                (plan_columns::Y, format_coordinate(survey.y())),
                (plan_columns::MASSSTAB, node.layout.massstab.to_string()),
                (plan_columns::AUSLEGUNG, node.layout.auslegung.to_string()),
                (plan_columns::FORMAT, node.layout.format.to_string()),
                (plan_columns::EDITOR, self.node.user.clone()),
                (plan_columns::EDITED_ON, edited_on.clone()),
                (plan_columns::TITLE_POSITION, node.title_block.position.to_string()),
                (plan_columns::TITLE_ORIENTATION, node.title_block.auslegung.to_string()),
            ];
            // 旧记录文件可能没有图框列
            for (column, value) in values {
                if column < record.len() {
                    record.set_column(column, value)?;
                }
            }
            sink.store(&table)?;
        }
        StaticLayer::new(&self.catalog.statics, self.ground()?).export(
            &self.document,
            records,
            sink,
        )?;
        info!(node = %self.node.number, "记录已导出");
        Ok(())
    }

    /// 整个文档换算到另一数据基准。失败时文档和节点基准都不变。
    pub fn convert_datum(
        &mut self,
        transform: &dyn GeodeticTransform,
        target: Datum,
    ) -> Result<(), EngineError> {
        self.ensure_editable()?;
        PlanLayoutController::new(&self.catalog.statics, &self.node).convert_datum(
            &mut self.document,
            transform,
            target,
        )?;
        self.node.datum = target;
        Ok(())
    }
}
