//! 动态层：为信号组、检测器和 VVA 生成绑定遥测数据点的实例。
//!
//! 动态实例的 id 是数据点名，由节点号和对象编号推出；位置从静态孪生对象复制。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use geopos_catalog::DynamicCatalog;
use geopos_catalog::symbol::{SymbolDefinition, tokens};
use geopos_core::document::{DynamicInstance, PlanDocument};
use geopos_core::projection::Projection;
use geopos_core::records::{AttributeRecord, RecordSource, RecordTable, columns};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use tracing::{debug, error, warn};

use crate::errors::EngineError;
use crate::node::NodeInfo;
use crate::static_layer::{CategoryOutcome, CategorySummary, ReconcileReport, display_label};

pub const DYNAMIC_CATEGORIES: [&str; 3] = ["SPUR", "DETEKTOR", "VVA"];

/// 信号组编号超过此值时是数字输出。
const SIGNAL_GROUP_LIMIT: i64 = 40;
/// 检测器编号超过此值时是数字输入。
const DETECTOR_LIMIT: i64 = 50;

const CONFIG_ROOT: &str = "Konfig";

/// 对象编号对应的遥测数据点；不支持的类别返回 `None`。
pub fn datapoint_id(category: &str, node: &str, number: i64) -> Option<String> {
    match category {
        "SPUR" if number <= SIGNAL_GROUP_LIMIT => Some(format!("K{node}.R.B.sg{number}")),
        "SPUR" => Some(format!("K{node}.R.B.do{}", number - SIGNAL_GROUP_LIMIT)),
        "DETEKTOR" if number <= DETECTOR_LIMIT => Some(format!("K{node}.R.B.d{number}")),
        "DETEKTOR" => Some(format!("K{node}.R.B.di{}", number - DETECTOR_LIMIT)),
        "VVA" => Some(format!("VRSZ.VVA.K{node}.VVA{number}.REQ")),
        _ => None,
    }
}

fn instantiate(symbol: &SymbolDefinition, datapoint: &str, label: Option<&str>) -> String {
    symbol
        .bind(&[(tokens::DATAPOINT, datapoint)])
        .render(label)
}

fn newline(writer: &mut Writer<Vec<u8>>) -> Result<(), EngineError> {
    writer
        .write_event(Event::Text(BytesText::new("\n")))
        .map_err(quick_xml::Error::from)?;
    Ok(())
}

/// `<Konfig>` 文档：逐个写入已绑定的模板（去掉声明），最后是节点的遥测事件。
fn write_config(node: &str, templates: &[String]) -> Result<String, EngineError> {
    let mut writer = Writer::new(Vec::new());
    writer
        .write_event(Event::Start(BytesStart::new(CONFIG_ROOT)))
        .map_err(quick_xml::Error::from)?;
    newline(&mut writer)?;
    for template in templates {
        let mut reader = Reader::from_str(template);
        reader.config_mut().trim_text(true);
        loop {
            match reader.read_event()? {
                Event::Eof => break,
                Event::Decl(_) => {}
                event => writer.write_event(event).map_err(quick_xml::Error::from)?,
            }
        }
        newline(&mut writer)?;
    }
    let object = format!("K{node}.R.B.rt");
    let events = [
        Event::Start(BytesStart::new("Element").with_attributes([("elementid", "lageplan.png")])),
        Event::Start(
            BytesStart::new("Telegrammereignis")
                .with_attributes([("com_type", "idc"), ("objectid", object.as_str())]),
        ),
        Event::Empty(BytesStart::new("Default")),
        Event::End(BytesEnd::new("Telegrammereignis")),
        Event::End(BytesEnd::new("Element")),
    ];
    for event in events {
        writer.write_event(event).map_err(quick_xml::Error::from)?;
    }
    newline(&mut writer)?;
    writer
        .write_event(Event::End(BytesEnd::new(CONFIG_ROOT)))
        .map_err(quick_xml::Error::from)?;
    newline(&mut writer)?;
    Ok(String::from_utf8_lossy(&writer.into_inner()).into_owned())
}

struct PreparedInstance {
    datapoint: String,
    static_id: String,
    label: Option<String>,
    record: AttributeRecord,
}

pub struct DynamicLayer<'a> {
    catalog: &'a DynamicCatalog,
    node: &'a NodeInfo,
    ground: Projection,
}

impl<'a> DynamicLayer<'a> {
    pub fn new(catalog: &'a DynamicCatalog, node: &'a NodeInfo, ground: Projection) -> Self {
        Self {
            catalog,
            node,
            ground,
        }
    }

    fn symbol(&self, id: &str) -> Arc<SymbolDefinition> {
        self.catalog.get(id).unwrap_or_else(|| {
            error!(symbol = %id, "未知动态符号，使用占位符号");
            Arc::new(SymbolDefinition::unknown_sentinel())
        })
    }

    pub fn reconcile(
        &self,
        document: &mut PlanDocument,
        records: &dyn RecordSource,
    ) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        for category in DYNAMIC_CATEGORIES {
            let outcome = match self.reconcile_category(document, records, category) {
                Ok(Some(summary)) => CategoryOutcome::Reconciled(summary),
                Ok(None) => CategoryOutcome::Missing,
                Err(err) => {
                    warn!(category, error = %err, "动态类别对齐失败，保持原状");
                    CategoryOutcome::Failed(err.to_string())
                }
            };
            report.categories.push((category.to_string(), outcome));
        }
        let content = document.dynamic_mut();
        if content.viewbox.is_none() {
            content.viewbox = Some(self.ground.viewbox(&self.ground));
        }
        report
    }

    fn prepare(
        &self,
        category: &str,
        table: &RecordTable,
    ) -> Result<Vec<PreparedInstance>, EngineError> {
        let mut prepared = Vec::with_capacity(table.len());
        for record in table.rows() {
            let number = record.integer(columns::NUMBER)?;
            let datapoint = datapoint_id(category, &self.node.number, number)
                .ok_or_else(|| EngineError::MissingRecords(category.to_string()))?;
            prepared.push(PreparedInstance {
                datapoint,
                static_id: record.id().to_string(),
                label: display_label(category, record)?,
                record: record.clone(),
            });
        }
        Ok(prepared)
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
        table.sort_by_integer(columns::NUMBER)?;
        let rows = self.prepare(category, &table)?;

        let mut summary = CategorySummary::default();
        let mut seen = HashSet::with_capacity(rows.len());
        for row in rows {
            let bound = document
                .dynamic()
                .and_then(|content| content.objects.iter().find(|o| o.id == row.datapoint))
                .map(|instance| (instance.static_id == row.static_id, instance.symbol_id.clone()));
            if let Some((true, symbol_id)) = bound {
                let symbol = self.catalog.get(&symbol_id);
                let content = document.dynamic_mut();
                // 已有实例按记录顺序移到末尾
                if let Some(index) = content.objects.iter().position(|o| o.id == row.datapoint) {
                    let mut instance = content.objects.remove(index);
                    if let Some(symbol) = symbol {
                        instance.body =
                            instantiate(&symbol, &row.datapoint, row.label.as_deref());
                    }
                    instance.label = row.label;
                    content.objects.push(instance);
                }
                seen.insert(row.datapoint);
                summary.updated += 1;
                continue;
            }

            let Some(transform) = document
                .object(category, &row.static_id)
                .map(|object| object.transform)
            else {
                warn!(category, id = %row.static_id, "静态对象缺失，跳过动态实例");
                continue;
            };
            let symbol = self.catalog.get_default(category, &row.record);
            let instance = DynamicInstance {
                id: row.datapoint.clone(),
                category: category.to_string(),
                static_id: row.static_id,
                symbol_id: symbol.id.clone(),
                transform,
                body: instantiate(&symbol, &row.datapoint, row.label.as_deref()),
                label: row.label,
            };
            let content = document.dynamic_mut();
            content.objects.retain(|o| o.id != instance.id);
            content.objects.push(instance);
            seen.insert(row.datapoint);
            summary.created += 1;
        }

        let content = document.dynamic_mut();
        content.objects.retain(|instance| {
            let keep = instance.category != category || seen.contains(&instance.id);
            if !keep {
                summary.removed.push(instance.id.clone());
            }
            keep
        });
        debug!(
            category,
            created = summary.created,
            removed = summary.removed.len(),
            "动态类别已对齐"
        );
        Ok(Some(summary))
    }

    fn instance_mut<'d>(
        document: &'d mut PlanDocument,
        datapoint: &str,
    ) -> Result<&'d mut DynamicInstance, EngineError> {
        document
            .dynamic_mut()
            .objects
            .iter_mut()
            .find(|instance| instance.id == datapoint)
            .ok_or_else(|| EngineError::DynamicObjectNotFound(datapoint.to_string()))
    }

    /// 更换动态符号，沿用原标签。
    pub fn change_symbol(
        &self,
        document: &mut PlanDocument,
        datapoint: &str,
        symbol_id: &str,
    ) -> Result<(), EngineError> {
        let symbol = self.symbol(symbol_id);
        let instance = Self::instance_mut(document, datapoint)?;
        instance.symbol_id = symbol.id.clone();
        instance.body = instantiate(&symbol, datapoint, instance.label.as_deref());
        Ok(())
    }

    /// 恢复默认符号：信号组按规则重新选择，其余类别取与静态符号同号的动态符号。
    pub fn reset_symbol(
        &self,
        document: &mut PlanDocument,
        records: &dyn RecordSource,
        datapoint: &str,
    ) -> Result<String, EngineError> {
        let (category, static_id) = {
            let instance = Self::instance_mut(document, datapoint)?;
            (instance.category.clone(), instance.static_id.clone())
        };
        let by_static = if category == "SPUR" {
            None
        } else {
            document
                .meta(&category, &static_id)
                .and_then(|meta| self.catalog.by_static_symbol(&meta.symbol_id))
        };
        let symbol = match by_static {
            Some(symbol) => symbol,
            None => {
                let table = records
                    .load(&category)?
                    .ok_or_else(|| EngineError::MissingRecords(category.clone()))?;
                let record = table.find(&static_id).ok_or_else(|| EngineError::ObjectNotFound {
                    category: category.clone(),
                    id: static_id.clone(),
                })?;
                self.catalog.get_default(&category, record)
            }
        };
        let instance = Self::instance_mut(document, datapoint)?;
        instance.symbol_id = symbol.id.clone();
        instance.body = instantiate(&symbol, datapoint, instance.label.as_deref());
        Ok(symbol.id.clone())
    }

    /// 把所有动态实例放回静态孪生对象的位置，返回移动的数量。
    pub fn reset_positions(&self, document: &mut PlanDocument) -> usize {
        let Some(content) = document.dynamic() else {
            return 0;
        };
        let targets: HashMap<String, _> = content
            .objects
            .iter()
            .filter_map(|instance| {
                document
                    .object(&instance.category, &instance.static_id)
                    .map(|object| (instance.id.clone(), object.transform))
            })
            .collect();
        let mut moved = 0;
        for instance in document.dynamic_mut().objects.iter_mut() {
            if let Some(transform) = targets.get(&instance.id) {
                if instance.transform != *transform {
                    instance.transform = *transform;
                    moved += 1;
                }
            }
        }
        moved
    }

    /// 部署配置：每个动态实例的遥测模板绑定数据点、节点号和对象编号。
    pub fn deployment_config(
        &self,
        document: &PlanDocument,
        records: &dyn RecordSource,
    ) -> Result<String, EngineError> {
        let mut tables: HashMap<String, Option<RecordTable>> = HashMap::new();
        let mut templates = Vec::new();
        let instances = document
            .dynamic()
            .map(|content| content.objects.as_slice())
            .unwrap_or(&[]);
        for instance in instances {
            let Some(symbol) = self.catalog.get(&instance.symbol_id) else {
                warn!(symbol = %instance.symbol_id, datapoint = %instance.id, "动态符号缺失，跳过配置");
                continue;
            };
            if !tables.contains_key(&instance.category) {
                tables.insert(instance.category.clone(), records.load(&instance.category)?);
            }
            let object_number = tables
                .get(&instance.category)
                .and_then(Option::as_ref)
                .and_then(|table| table.find(&instance.static_id))
                .and_then(|record| record.column(columns::NUMBER))
                .unwrap_or_default();
            let bound = symbol.bind(&[
                (tokens::DATAPOINT, instance.id.as_str()),
                (tokens::NODE_NUMBER, self.node.number.as_str()),
                (tokens::OBJECT_NUMBER, object_number),
            ]);
            templates.extend(bound.telemetry);
        }
        write_config(&self.node.number, &templates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::static_layer::StaticLayer;
    use crate::test_support::*;
    use geopos_core::geometry::Vector2;
    use geopos_core::records::InMemoryRecords;

    fn datapoints(document: &PlanDocument) -> Vec<String> {
        document
            .dynamic()
            .map(|content| content.objects.iter().map(|o| o.id.clone()).collect())
            .unwrap_or_default()
    }

    fn prepared(records: &InMemoryRecords) -> PlanDocument {
        let statics = static_catalog();
        let mut document = plan_document();
        StaticLayer::new(&statics, ground()).reconcile(&mut document, records);
        document
    }

    fn instance<'d>(document: &'d PlanDocument, datapoint: &str) -> &'d DynamicInstance {
        document
            .dynamic()
            .and_then(|content| content.objects.iter().find(|o| o.id == datapoint))
            .expect("动态实例")
    }

    #[test]
    fn datapoint_ids_follow_numbering() {
        assert_eq!(datapoint_id("SPUR", "12", 40).as_deref(), Some("K12.R.B.sg40"));
        assert_eq!(datapoint_id("SPUR", "12", 41).as_deref(), Some("K12.R.B.do1"));
        assert_eq!(datapoint_id("DETEKTOR", "12", 50).as_deref(), Some("K12.R.B.d50"));
        assert_eq!(datapoint_id("DETEKTOR", "12", 53).as_deref(), Some("K12.R.B.di3"));
        assert_eq!(datapoint_id("VVA", "12", 7).as_deref(), Some("VRSZ.VVA.K12.VVA7.REQ"));
        assert_eq!(datapoint_id("AMPEL", "12", 1), None);
    }

    #[test]
    fn reconcile_binds_instances_to_static_twins() {
        let records = full_records();
        let mut document = prepared(&records);
        let catalog = dynamic_catalog();
        let node = node_info();
        let layer = DynamicLayer::new(&catalog, &node, ground());
        let report = layer.reconcile(&mut document, &records);
        assert!(report.succeeded("SPUR"));

        assert_eq!(
            datapoints(&document),
            vec![
                "K211.R.B.sg1",
                "K211.R.B.sg2",
                "K211.R.B.di5",
                "VRSZ.VVA.K211.VVA4.REQ",
            ]
        );
        let sg1 = instance(&document, "K211.R.B.sg1");
        assert_eq!(sg1.symbol_id, "210_21_SPUR");
        assert_eq!(sg1.static_id, "s1");
        assert_eq!(Some(sg1.transform), document.object("SPUR", "s1").map(|o| o.transform));
        assert_eq!(instance(&document, "K211.R.B.sg2").symbol_id, "3_fussgaenger");
        let detector = instance(&document, "K211.R.B.di5");
        assert_eq!(detector.label.as_deref(), Some("55 (25 m)"));
        assert_eq!(detector.symbol_id, "kntvis_detektor_t_links");

        let viewbox = document.dynamic().and_then(|content| content.viewbox).expect("视框");
        assert_eq!(viewbox.left, 0.0);
        assert!((viewbox.width - ground().extent().width).abs() < 1e-9);
    }

    #[test]
    fn second_pass_changes_nothing() {
        let records = full_records();
        let mut document = prepared(&records);
        let catalog = dynamic_catalog();
        let node = node_info();
        let layer = DynamicLayer::new(&catalog, &node, ground());
        layer.reconcile(&mut document, &records);
        let first = document.clone();
        layer.reconcile(&mut document, &records);
        assert_eq!(document, first);
    }

    #[test]
    fn rebinding_and_pruning() {
        let records = full_records();
        let mut document = prepared(&records);
        let catalog = dynamic_catalog();
        let node = node_info();
        let layer = DynamicLayer::new(&catalog, &node, ground());
        layer.reconcile(&mut document, &records);

        // s2 删除，s1 改为 2 号
        let changed = full_records().with(objects(
            "SPUR",
            &[&["s1", "683220", "246380", "", "90", "2", "99"]],
        ));
        StaticLayer::new(&static_catalog(), ground()).reconcile(&mut document, &changed);
        let report = layer.reconcile(&mut document, &changed);
        assert_eq!(instance(&document, "K211.R.B.sg2").static_id, "s1");
        assert!(!datapoints(&document).contains(&"K211.R.B.sg1".to_string()));
        assert!(matches!(
            report.outcome("SPUR"),
            Some(CategoryOutcome::Reconciled(summary)) if summary.removed == vec!["K211.R.B.sg1".to_string()]
        ));
    }

    #[test]
    fn updated_instances_follow_record_order() {
        let records = full_records();
        let mut document = prepared(&records);
        let catalog = dynamic_catalog();
        let node = node_info();
        let layer = DynamicLayer::new(&catalog, &node, ground());
        layer.reconcile(&mut document, &records);
        let ordered = datapoints(&document);

        document.dynamic_mut().objects.reverse();
        let report = layer.reconcile(&mut document, &records);
        assert!(matches!(
            report.outcome("SPUR"),
            Some(CategoryOutcome::Reconciled(summary)) if summary.updated == 2 && summary.created == 0
        ));
        assert_eq!(datapoints(&document), ordered);
    }

    #[test]
    fn failed_category_is_not_pruned() {
        let records = full_records();
        let mut document = prepared(&records);
        let catalog = dynamic_catalog();
        let node = node_info();
        let layer = DynamicLayer::new(&catalog, &node, ground());
        layer.reconcile(&mut document, &records);

        let broken = full_records().with(objects("VVA", &[&["v1", "", "", "", "", "vier", ""]]));
        let report = layer.reconcile(&mut document, &broken);
        assert!(matches!(report.outcome("VVA"), Some(CategoryOutcome::Failed(_))));
        assert!(datapoints(&document).contains(&"VRSZ.VVA.K211.VVA4.REQ".to_string()));
    }

    #[test]
    fn symbol_change_and_reset() {
        let records = full_records();
        let mut document = prepared(&records);
        let catalog = dynamic_catalog();
        let node = node_info();
        let layer = DynamicLayer::new(&catalog, &node, ground());
        layer.reconcile(&mut document, &records);

        layer
            .change_symbol(&mut document, "K211.R.B.sg1", "3_fussgaenger")
            .expect("更换符号");
        assert_eq!(instance(&document, "K211.R.B.sg1").symbol_id, "3_fussgaenger");
        assert!(instance(&document, "K211.R.B.sg1").body.contains(">1</text>"));

        let reset = layer
            .reset_symbol(&mut document, &records, "K211.R.B.sg1")
            .expect("恢复默认");
        assert_eq!(reset, "210_21_SPUR");

        let detector = layer
            .reset_symbol(&mut document, &records, "K211.R.B.di5")
            .expect("恢复默认");
        assert_eq!(detector, "400_schleife");

        assert!(matches!(
            layer.change_symbol(&mut document, "K211.R.B.sg9", "3_fussgaenger"),
            Err(EngineError::DynamicObjectNotFound(_))
        ));
    }

    #[test]
    fn positions_follow_static_twins_on_reset() {
        let records = full_records();
        let mut document = prepared(&records);
        let catalog = dynamic_catalog();
        let node = node_info();
        let layer = DynamicLayer::new(&catalog, &node, ground());
        layer.reconcile(&mut document, &records);
        if let Some(object) = document.object_mut("DETEKTOR", "d1") {
            object.transform.translate(Vector2::new(2.0, 2.0));
        }
        assert_eq!(layer.reset_positions(&mut document), 1);
        assert_eq!(
            Some(instance(&document, "K211.R.B.di5").transform),
            document.object("DETEKTOR", "d1").map(|o| o.transform)
        );
        assert_eq!(layer.reset_positions(&mut document), 0);
    }

    #[test]
    fn deployment_config_binds_templates() {
        let records = full_records();
        let mut document = prepared(&records);
        let catalog = dynamic_catalog();
        let node = node_info();
        let layer = DynamicLayer::new(&catalog, &node, ground());
        layer.reconcile(&mut document, &records);

        let config = layer.deployment_config(&document, &records).expect("配置");
        assert!(config.starts_with("<Konfig>\n"));
        assert!(config.ends_with("</Konfig>\n"));
        assert!(!config.contains("<?xml"));
        assert!(config.contains("<Item dp=\"K211.R.B.sg1\" knoten=\"211\" objekt=\"1\"/>"));
        assert!(config.contains("<Item dp=\"K211.R.B.di5\" knoten=\"211\" objekt=\"55\"/>"));
        assert!(config.contains("objectid=\"K211.R.B.rt\""));
    }

    #[test]
    fn deployment_config_escapes_node_number() {
        let records = full_records();
        let mut document = prepared(&records);
        let catalog = dynamic_catalog();
        let mut node = node_info();
        DynamicLayer::new(&catalog, &node, ground()).reconcile(&mut document, &records);

        node.number = "2&1".to_string();
        let config = DynamicLayer::new(&catalog, &node, ground())
            .deployment_config(&document, &records)
            .expect("配置");
        assert!(config.contains("knoten=\"2&amp;1\""));
        assert!(config.contains("objectid=\"K2&amp;1.R.B.rt\""));

        let mut reader = Reader::from_str(&config);
        let mut elements = 0;
        loop {
            match reader.read_event().expect("配置是合法 XML") {
                Event::Eof => break,
                Event::Start(_) | Event::Empty(_) => elements += 1,
                _ => {}
            }
        }
        // Konfig、四个 Item、Element、Telegrammereignis、Default
        assert_eq!(elements, 8);
    }
}
