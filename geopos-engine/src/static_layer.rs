//! 静态层：把各类别的属性记录与文档中的符号实例对齐。
//!
//! 每个类别独立处理：先读入并校验全部记录，再一次性写入文档。某个类别
//! 失败时只记录警告，其余类别照常处理。

use std::collections::HashSet;

use geopos_catalog::StaticCatalog;
use geopos_catalog::symbol::{normalize_label, well_known};
use geopos_core::document::{PlanDocument, SymbolInstance};
use geopos_core::geometry::{Point2, Transform};
use geopos_core::projection::Projection;
use geopos_core::records::{
    AttributeRecord, MalformedRecordError, RecordSink, RecordSource, RecordTable, columns,
};
use tracing::{debug, info, warn};

use crate::errors::EngineError;
use crate::format_coordinate;

/// 对齐顺序。
pub const STATIC_CATEGORIES: [&str; 6] = [
    "SPUR",
    "DETEKTOR",
    "VVA",
    "AMPELMAST",
    "AMPEL",
    "STEUERGERAET",
];

/// 写回记录文件的顺序。
pub const EXPORT_ORDER: [&str; 6] = [
    "AMPEL",
    "AMPELMAST",
    "STEUERGERAET",
    "DETEKTOR",
    "VVA",
    "SPUR",
];

pub const CATEGORY_KNOTEN: &str = "KNOTEN";
pub const CATEGORY_META: &str = "META";
pub const KNOTENMITTE: &str = "KNOTENMITTE";

/// 探测距离超过此值（米）时写进标签。
const DETECTOR_DISTANCE_LABEL: i64 = 10;

/// 每个节点只有一个的对象：节点中心、比例尺和指北针。
struct FixedObject {
    category: &'static str,
    id: &'static str,
    symbol: &'static str,
    records: &'static str,
    name: &'static str,
}

const FIXED_OBJECTS: [FixedObject; 3] = [
    FixedObject {
        category: CATEGORY_KNOTEN,
        id: KNOTENMITTE,
        symbol: well_known::KNOTENMITTE,
        records: "KNOTEN",
        name: "Knotenmitte",
    },
    FixedObject {
        category: CATEGORY_META,
        id: "MASSSTAB",
        symbol: well_known::MASSSTAB,
        records: "MASSSTAB",
        name: "Massstab",
    },
    FixedObject {
        category: CATEGORY_META,
        id: "NORDPFEIL",
        symbol: well_known::NORDPFEIL,
        records: "NORDPFEIL",
        name: "Nordpfeil",
    },
];

/// 是否按编号列（第 5 列）排序后再处理。
fn sorted_by_number(category: &str) -> bool {
    category != "STEUERGERAET"
}

/// 符号上显示的标签。
pub fn display_label(
    category: &str,
    record: &AttributeRecord,
) -> Result<Option<String>, MalformedRecordError> {
    let label = match category {
        "SPUR" | "VVA" => record.require(columns::NUMBER)?.to_string(),
        "DETEKTOR" => {
            let number = record.require(columns::NUMBER)?;
            match record.column(columns::DETAIL) {
                Some(raw) => match raw.parse::<i64>() {
                    Ok(distance) if distance > DETECTOR_DISTANCE_LABEL => {
                        format!("{number} ({distance} m)")
                    }
                    Ok(_) => number.to_string(),
                    Err(_) => format!("{number} (.. m)"),
                },
                None => number.to_string(),
            }
        }
        "AMPELMAST" => {
            if record.require(columns::DETAIL)? == "ja" {
                "BK".to_string()
            } else {
                record.require(columns::NUMBER)?.to_string()
            }
        }
        "AMPEL" => format!(
            "{}{}",
            record.require(columns::NUMBER)?,
            record.require(columns::DETAIL)?
        ),
        _ => return Ok(None),
    };
    Ok(Some(normalize_label(&label)))
}

/// 元数据中的显示名称。
pub fn display_name(
    category: &str,
    record: &AttributeRecord,
) -> Result<String, MalformedRecordError> {
    let name = match category {
        "SPUR" => format!("Spur {}", record.require(columns::NUMBER)?),
        "DETEKTOR" => format!("Detektor {}", record.require(columns::NUMBER)?),
        "VVA" => format!("VVa {}", record.require(columns::NUMBER)?),
        "AMPELMAST" => {
            let number = record.require(columns::NUMBER)?;
            if record.require(columns::DETAIL)? == "ja" {
                format!("Mast {number} - BK")
            } else {
                format!("Mast {number}")
            }
        }
        "AMPEL" => format!(
            "Ampel {}{}",
            record.require(columns::NUMBER)?,
            record.require(columns::DETAIL)?
        ),
        "STEUERGERAET" => "Steuergeraet".to_string(),
        other => other.to_string(),
    };
    Ok(name)
}

/// 记录的放置矩阵。坐标缺失时按测量坐标 (0, 0) 投影放置并标记为未定位，角度按 0 处理。
pub fn record_placement(
    record: &AttributeRecord,
    ground: &Projection,
) -> Result<(Transform, bool), MalformedRecordError> {
    let x = record.number(columns::X)?;
    let y = record.number(columns::Y)?;
    match (x, y) {
        (Some(x), Some(y)) => {
            let angle = record.number(columns::ANGLE)?.unwrap_or(0.0);
            let position = ground.to_local_viewport(Point2::new(x, y));
            Ok((Transform::placement(angle, position), false))
        }
        _ => {
            let position = ground.to_local_viewport(Point2::new(0.0, 0.0));
            Ok((Transform::placement(0.0, position), true))
        }
    }
}

fn explicit_symbol(record: &AttributeRecord) -> Option<String> {
    record
        .column(columns::SYMBOL_ID)
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategorySummary {
    pub created: usize,
    pub updated: usize,
    pub removed: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CategoryOutcome {
    Reconciled(CategorySummary),
    /// 记录文件不存在，类别保持原样。
    Missing,
    Failed(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub categories: Vec<(String, CategoryOutcome)>,
    /// 本次新建的固定对象。
    pub fixed: Vec<String>,
}

impl ReconcileReport {
    pub fn outcome(&self, category: &str) -> Option<&CategoryOutcome> {
        self.categories
            .iter()
            .find(|(name, _)| name == category)
            .map(|(_, outcome)| outcome)
    }

    pub fn succeeded(&self, category: &str) -> bool {
        matches!(self.outcome(category), Some(CategoryOutcome::Reconciled(_)))
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.categories.iter().filter_map(|(name, outcome)| match outcome {
            CategoryOutcome::Failed(message) => Some((name.as_str(), message.as_str())),
            _ => None,
        })
    }
}

/// 已校验、待写入的一行记录。
struct PreparedRow {
    id: String,
    explicit_symbol: Option<String>,
    label: Option<String>,
    name: String,
    transform: Transform,
    unpositioned: bool,
    record: AttributeRecord,
}

/// 选择界面中的一个候选符号。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolChoice {
    pub id: String,
    pub active: bool,
}

pub struct StaticLayer<'a> {
    catalog: &'a StaticCatalog,
    ground: Projection,
}

impl<'a> StaticLayer<'a> {
    pub fn new(catalog: &'a StaticCatalog, ground: Projection) -> Self {
        Self { catalog, ground }
    }

    /// 对齐全部类别和固定对象，节点中心移回基准图范围内。
    pub fn reconcile(
        &self,
        document: &mut PlanDocument,
        records: &dyn RecordSource,
    ) -> ReconcileReport {
        let mut report = ReconcileReport {
            fixed: self.ensure_fixed(document, records),
            ..ReconcileReport::default()
        };
        for category in STATIC_CATEGORIES {
            let outcome = match self.reconcile_category(document, records, category) {
                Ok(Some(summary)) => {
                    debug!(
                        category,
                        created = summary.created,
                        updated = summary.updated,
                        removed = summary.removed.len(),
                        "类别已对齐"
                    );
                    CategoryOutcome::Reconciled(summary)
                }
                Ok(None) => CategoryOutcome::Missing,
                Err(err) => {
                    warn!(category, error = %err, "类别对齐失败，保持原状");
                    CategoryOutcome::Failed(err.to_string())
                }
            };
            report.categories.push((category.to_string(), outcome));
        }
        if let Some(center) = document.object_mut(CATEGORY_KNOTEN, KNOTENMITTE) {
            center.center_within(&self.ground);
        }
        report
    }

    /// 清空静态层后重新对齐。
    pub fn refresh(
        &self,
        document: &mut PlanDocument,
        records: &dyn RecordSource,
    ) -> ReconcileReport {
        document.clear_static();
        info!("静态层已清空，重新生成");
        self.reconcile(document, records)
    }

    fn reconcile_category(
        &self,
        document: &mut PlanDocument,
        records: &dyn RecordSource,
        category: &str,
    ) -> Result<Option<CategorySummary>, EngineError> {
        let Some(mut table) = records.load(category)? else {
            return Ok(None);
        };
        if sorted_by_number(category) {
            table.sort_by_integer(columns::NUMBER)?;
        }
        let rows = self.prepare(category, &table)?;

        let mut summary = CategorySummary::default();
        let mut seen = HashSet::with_capacity(rows.len());
        for row in rows {
            seen.insert(row.id.clone());
            if self.update(document, category, &row) {
                summary.updated += 1;
            } else {
                self.create(document, category, row);
                summary.created += 1;
            }
        }
        summary.removed = document.retain_objects(category, |object| seen.contains(&object.id));
        Ok(Some(summary))
    }

    fn prepare(
        &self,
        category: &str,
        table: &RecordTable,
    ) -> Result<Vec<PreparedRow>, MalformedRecordError> {
        table
            .rows()
            .iter()
            .map(|record| {
                let (transform, unpositioned) = record_placement(record, &self.ground)?;
                Ok(PreparedRow {
                    id: record.id().to_string(),
                    explicit_symbol: explicit_symbol(record),
                    label: display_label(category, record)?,
                    name: display_name(category, record)?,
                    transform,
                    unpositioned,
                    record: record.clone(),
                })
            })
            .collect()
    }

    /// 已有对象且符号未被记录改动时，只更新标签和名称并移到类别末尾。
    fn update(&self, document: &mut PlanDocument, category: &str, row: &PreparedRow) -> bool {
        let Some(current) = document
            .object(category, &row.id)
            .map(|object| object.symbol_id.clone())
        else {
            return false;
        };
        if row
            .explicit_symbol
            .as_deref()
            .is_some_and(|explicit| explicit != current)
        {
            return false;
        }
        let symbol = self.catalog.lookup(&current);
        if let Some(object) = document.object_mut(category, &row.id) {
            object.label = row.label.clone();
            if let Some(symbol) = symbol {
                object.body = symbol.render(row.label.as_deref());
            }
        }
        document.rename_object(category, &row.id, row.name.clone());
        document.move_object_to_end(category, &row.id);
        true
    }

    fn create(&self, document: &mut PlanDocument, category: &str, row: PreparedRow) {
        let symbol = match row.explicit_symbol.as_deref() {
            Some(id) => self.catalog.get(id),
            None => self.catalog.get_default(category, &row.record),
        };
        let instance = SymbolInstance {
            id: row.id,
            symbol_id: row.explicit_symbol.unwrap_or_else(|| symbol.id.clone()),
            transform: row.transform,
            unpositioned: row.unpositioned,
            body: symbol.render(row.label.as_deref()),
            label: row.label,
        };
        document.upsert_object(category, instance, row.name);
    }

    /// 缺失的固定对象从各自的记录文件创建。记录缺失或有误时跳过并记录警告。
    fn ensure_fixed(
        &self,
        document: &mut PlanDocument,
        records: &dyn RecordSource,
    ) -> Vec<String> {
        let mut created = Vec::new();
        for fixed in &FIXED_OBJECTS {
            if document.object(fixed.category, fixed.id).is_some() {
                continue;
            }
            let placement = records
                .load(fixed.records)
                .map_err(EngineError::from)
                .and_then(|table| match table {
                    Some(table) => Ok(Some(record_placement(table.first()?, &self.ground)?)),
                    None => Ok(None),
                });
            let (transform, unpositioned) = match placement {
                Ok(Some(placement)) => placement,
                Ok(None) => {
                    warn!(records = fixed.records, "固定对象记录缺失，跳过");
                    continue;
                }
                Err(err) => {
                    warn!(records = fixed.records, error = %err, "固定对象记录有误，跳过");
                    continue;
                }
            };
            let symbol = self.catalog.get(fixed.symbol);
            let instance = SymbolInstance {
                id: fixed.id.to_string(),
                symbol_id: fixed.symbol.to_string(),
                transform,
                unpositioned,
                label: None,
                body: symbol.render(None),
            };
            document.upsert_object(fixed.category, instance, fixed.name);
            created.push(fixed.id.to_string());
        }
        created
    }

    /// 更换单个对象的符号，标签保持不变。
    pub fn change_symbol(
        &self,
        document: &mut PlanDocument,
        category: &str,
        id: &str,
        symbol_id: &str,
    ) -> Result<(), EngineError> {
        let label = document
            .object(category, id)
            .map(|object| object.label.clone())
            .ok_or_else(|| EngineError::ObjectNotFound {
                category: category.to_string(),
                id: id.to_string(),
            })?;
        let body = self.catalog.get(symbol_id).render(label.as_deref());
        document.set_object_symbol(category, id, symbol_id, body);
        Ok(())
    }

    /// 对象可选的符号，当前使用的符号带标记。
    pub fn symbol_selection(
        &self,
        document: &PlanDocument,
        records: &dyn RecordSource,
        category: &str,
        id: &str,
    ) -> Result<Vec<SymbolChoice>, EngineError> {
        let not_found = || EngineError::ObjectNotFound {
            category: category.to_string(),
            id: id.to_string(),
        };
        let table = records
            .load(category)?
            .ok_or_else(|| EngineError::MissingRecords(category.to_string()))?;
        let record = table.find(id).ok_or_else(not_found)?;
        let active = document
            .object(category, id)
            .map(|object| object.symbol_id.as_str())
            .ok_or_else(not_found)?;
        Ok(self
            .catalog
            .select_candidates(category, record)
            .iter()
            .map(|symbol| SymbolChoice {
                id: symbol.id.clone(),
                active: symbol.id == active,
            })
            .collect())
    }

    /// 把文档中的位置、角度和符号写回记录文件。
    pub fn export(
        &self,
        document: &PlanDocument,
        records: &dyn RecordSource,
        sink: &mut dyn RecordSink,
    ) -> Result<(), EngineError> {
        for category in EXPORT_ORDER {
            let Some(mut table) = records.load(category)? else {
                continue;
            };
            for record in table.rows_mut() {
                let Some(object) = document.object(category, record.id()) else {
                    continue;
                };
                self.write_object(record, object)?;
            }
            sink.store(&table)?;
        }

        for fixed in &FIXED_OBJECTS {
            let Some(mut table) = records.load(fixed.records)? else {
                continue;
            };
            if let Some(object) = document.object(fixed.category, fixed.id) {
                let record = table.first_mut()?;
                self.write_object(record, object)?;
                if fixed.records == "KNOTEN" && record.len() > 6 {
                    let last = record.len() - 1;
                    record.set_column(last, self.ground.datum().as_str())?;
                }
            }
            sink.store(&table)?;
        }
        Ok(())
    }

    fn write_object(
        &self,
        record: &mut AttributeRecord,
        object: &SymbolInstance,
    ) -> Result<(), MalformedRecordError> {
        if object.unpositioned {
            record.set_column(columns::X, "")?;
            record.set_column(columns::Y, "")?;
        } else {
            let survey = self.ground.from_local_viewport(object.transform.position());
            record.set_column(columns::X, format_coordinate(survey.x()))?;
            record.set_column(columns::Y, format_coordinate(survey.y()))?;
        }
        record.set_column(columns::SYMBOL_ID, object.symbol_id.clone())?;
        record.set_column(columns::ANGLE, object.transform.rotation_degrees().to_string())?;
        Ok(())
    }
}
