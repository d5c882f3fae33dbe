//! 单元测试共用的记录、目录和文档。

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use geopos_catalog::{
    CatalogSnapshot, DynamicCatalog, ProjectCatalog, RuleTable, StaticCatalog, SymbolDefinition,
    SymbolGroup, SymbolRule,
};
use geopos_core::document::{PlanDocument, PlanId, PlanNode};
use geopos_core::projection::{Datum, PaperFormat, Projection, Scale};
use geopos_core::records::{InMemoryRecords, RecordTable};

use crate::node::{INFO_RECORDS, NODE_RECORDS, NodeInfo};

pub const PLAN_HEADERS: &[&str] = &[
    "PLAN",
    "XKOORD",
    "YKOORD",
    "ID",
    "MASSSTAB",
    "AUSLEGUNG",
    "FORMAT",
    "MITARBEITER",
    "BEARBEITUNGSDATUM",
    "PLANKOPFPOSITION",
    "PLANKOPFAUSLEGUNG",
];

pub const OBJECT_HEADERS: &[&str] = &[
    "INFOS",
    "XKOORD",
    "YKOORD",
    "SYMBOLID",
    "SYMBOLDREHWINKEL",
    "NR",
    "DETAIL",
];

const FIXED_HEADERS: &[&str] = &["INFOS", "XKOORD", "YKOORD", "SYMBOLID", "SYMBOLDREHWINKEL"];

pub const TELEMETRY: &str =
    "<?xml version=\"1.0\"?>\n<Item dp=\"DPID\" knoten=\"KNOTENNR\" objekt=\"OBJEKTNR\"/>";

pub fn opened_at() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, 5)
        .and_then(|date| date.and_hms_opt(14, 7, 9))
        .expect("固定时间")
}

pub fn plan_table(plan: PlanId, x: &str, y: &str, massstab: &str) -> RecordTable {
    RecordTable::from_rows(
        plan.as_str(),
        PLAN_HEADERS,
        &[&[
            plan.as_str(),
            x,
            y,
            "1",
            massstab,
            "",
            "",
            "mmuster",
            "01.02.24",
            "",
            "",
        ]],
    )
    .expect("计划记录")
}

pub fn info_table(mode: &str) -> RecordTable {
    RecordTable::from_rows(
        INFO_RECORDS,
        &[
            "KNOTENNR",
            "KNOTENBEZ",
            "KNVERS",
            "MODESTATUS",
            "KNMAPDATUM",
            "MODE",
            "ZEITPUNKT",
            "logname",
        ],
        &[&[
            "211",
            "Bahnhofplatz",
            "7",
            "Entwurf",
            "12.01.2024",
            mode,
            "04.03.2024 10:00:00",
            "jdoe",
        ]],
    )
    .expect("INFO 记录")
}

pub fn node_table(datum: &str) -> RecordTable {
    RecordTable::from_rows(
        NODE_RECORDS,
        &["INFOS", "XKOORD", "YKOORD", "SYMBOLID", "SYMBOLDREHWINKEL", "KNOTENNR", "SRS"],
        &[&["211", "683300", "246350", "", "0", "211", datum]],
    )
    .expect("KNOTEN 记录")
}

pub fn objects(category: &str, rows: &[&[&str]]) -> RecordTable {
    RecordTable::from_rows(category, OBJECT_HEADERS, rows).expect("对象记录")
}

fn fixed(category: &str, x: &str, y: &str, symbol: &str) -> RecordTable {
    RecordTable::from_rows(category, FIXED_HEADERS, &[&[category, x, y, symbol, "0"]])
        .expect("固定对象记录")
}

/// 只含节点和计划记录的数据源。
pub fn base_records() -> InMemoryRecords {
    let mut records = InMemoryRecords::new()
        .with(info_table("Bearbeiten"))
        .with(node_table("LV03"));
    for plan in PlanId::ALL {
        records.insert(plan_table(plan, "683200", "246400", ""));
    }
    records
}

/// 完整的节点数据：六个对象类别加固定对象。
pub fn full_records() -> InMemoryRecords {
    base_records()
        .with(objects(
            "SPUR",
            &[
                &["s2", "683210", "246390", "", "0", "2", "3"],
                &["s1", "683220", "246380", "", "90", "1", "99"],
            ],
        ))
        .with(objects(
            "DETEKTOR",
            &[&["d1", "683230", "246370", "", "0", "55", "25"]],
        ))
        .with(objects("VVA", &[&["v1", "", "", "", "", "4", ""]]))
        .with(objects(
            "AMPELMAST",
            &[&["m1", "683240", "246360", "", "0", "1", "ja"]],
        ))
        .with(objects(
            "AMPEL",
            &[&["a1", "683240", "246360", "", "45", "1", "a"]],
        ))
        .with(objects(
            "STEUERGERAET",
            &[&["sg", "683250", "246350", "", "0", "", ""]],
        ))
        .with(fixed("MASSSTAB", "683205", "246395", "102"))
        .with(fixed("NORDPFEIL", "683206", "246394", "101"))
}

pub fn node_info() -> NodeInfo {
    NodeInfo::from_records(&base_records(), opened_at()).expect("节点信息")
}

pub fn labelled(id: &str) -> SymbolDefinition {
    SymbolDefinition::new(
        id,
        20.0,
        10.0,
        format!("<path id=\"{id}\" d=\"M0 0\"/><text id=\"textfeld\">?</text>"),
    )
}

fn rule(symbol: &str, category: &str) -> SymbolRule {
    SymbolRule {
        symbol: symbol.to_string(),
        category: category.to_string(),
        description: None,
        when: BTreeMap::new(),
    }
}

pub fn static_catalog() -> StaticCatalog {
    let mut symbols: Vec<SymbolDefinition> = [
        "101", "102", "110", "210", "211", "301", "358", "400", "500", "600",
    ]
    .into_iter()
    .map(labelled)
    .collect();
    for format in PaperFormat::ALL {
        for massstab in Scale::ALL {
            symbols.push(SymbolDefinition::new(
                geopos_catalog::symbol::title_block_key(format, massstab),
                60.0,
                20.0,
                "<rect width=\"60\" height=\"20\"/>",
            ));
        }
    }
    let rules = RuleTable::new(
        vec![
            rule("210", "SPUR"),
            rule("211", "SPUR"),
            rule("400", "DETEKTOR"),
            rule("500", "VVA"),
            rule("301", "AMPELMAST"),
            rule("358", "AMPEL"),
            rule("600", "STEUERGERAET"),
        ],
        RuleTable::standard_pins(),
    );
    StaticCatalog::new(symbols, rules)
}

pub fn dynamic_catalog() -> DynamicCatalog {
    let telemetry = |id: &str| labelled(id).with_telemetry(TELEMETRY);
    DynamicCatalog::new(vec![
        SymbolGroup::new(
            "Signalgruppen",
            vec![telemetry("210_21_SPUR"), telemetry("3_fussgaenger")],
        ),
        SymbolGroup::new(
            "Detektoren",
            vec![telemetry("kntvis_detektor_t_links"), telemetry("400_schleife")],
        ),
        SymbolGroup::new("VVa", vec![telemetry("500_19_SRZG")]),
    ])
}

pub fn catalog() -> Arc<CatalogSnapshot> {
    Arc::new(CatalogSnapshot {
        statics: static_catalog(),
        dynamics: dynamic_catalog(),
        project: ProjectCatalog::empty(),
        stamp: None,
    })
}

/// 原点 (683200, 246400)，默认布局 500 / hoch / A3。
pub fn ground() -> Projection {
    let table = plan_table(PlanId::Lageplan, "683200", "246400", "");
    Projection::from_attribute_record(table.first().expect("数据行"), Datum::Lv03)
        .expect("基准投影")
}

/// 五个平面图都与基准图重合的文档。
pub fn plan_document() -> PlanDocument {
    let ground = ground();
    let mut document = PlanDocument::new();
    for plan in PlanId::ALL {
        document.upsert_plan(PlanNode::new(plan, &ground, &ground));
    }
    document
}
