//! 节点信息：INFO 与 KNOTEN 记录中的节点编号、名称、版本和显示模式。

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use geopos_core::document::PlanId;
use geopos_core::projection::{Datum, plan_columns};
use geopos_core::records::{AttributeRecord, RecordSource};
use tracing::warn;

use crate::errors::EngineError;

pub const INFO_RECORDS: &str = "INFO";
pub const NODE_RECORDS: &str = "KNOTEN";

/// KNOTEN 记录超过此列数时，最后一列是数据基准。
const NODE_DATUM_MIN_COLUMNS: usize = 6;

/// 图框文字的显示模式，来自 INFO 的 `MODE` 字段。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DisplayMode {
    Knotenmappe,
    Anzeigen,
    #[default]
    Bearbeiten,
    Drucken,
}

impl DisplayMode {
    pub fn as_str(self) -> &'static str {
        match self {
            DisplayMode::Knotenmappe => "Knotenmappe",
            DisplayMode::Anzeigen => "Anzeigen",
            DisplayMode::Bearbeiten => "Bearbeiten",
            DisplayMode::Drucken => "Drucken",
        }
    }

    #[inline]
    pub fn is_read_only(self) -> bool {
        self == DisplayMode::Anzeigen
    }
}

impl fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DisplayMode {
    type Err = EngineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "Knotenmappe" => Ok(DisplayMode::Knotenmappe),
            "Anzeigen" => Ok(DisplayMode::Anzeigen),
            "Bearbeiten" => Ok(DisplayMode::Bearbeiten),
            "Drucken" => Ok(DisplayMode::Drucken),
            other => Err(EngineError::InvalidLayoutValue {
                attribute: "MODE".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

/// 计划记录中的最后编辑人与日期。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanStamp {
    pub editor: String,
    pub edited_on: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeInfo {
    pub number: String,
    pub name: String,
    pub version: String,
    pub status: String,
    pub folder_date: String,
    pub print_time: String,
    pub user: String,
    pub mode: DisplayMode,
    pub datum: Datum,
    /// 会话打开时间，图框打印日期使用。
    pub opened_at: NaiveDateTime,
    pub stamps: BTreeMap<PlanId, PlanStamp>,
}

impl NodeInfo {
    /// 读取 INFO（必需）、KNOTEN 和各计划记录。KNOTEN 缺失时基准取默认值。
    pub fn from_records(
        records: &dyn RecordSource,
        opened_at: NaiveDateTime,
    ) -> Result<Self, EngineError> {
        let info = records
            .load(INFO_RECORDS)?
            .ok_or_else(|| EngineError::MissingRecords(INFO_RECORDS.to_string()))?;
        let row = info.first()?;
        let text = |name: &str| row.field(name).unwrap_or_default().trim().to_string();
        let mode = match row.field("MODE").map(str::trim) {
            None | Some("") => DisplayMode::default(),
            Some(value) => value.parse()?,
        };

        let datum = match records.load(NODE_RECORDS)? {
            Some(table) => node_datum(table.first()?)?,
            None => {
                warn!("KNOTEN 记录缺失，使用默认数据基准");
                Datum::default()
            }
        };

        let mut stamps = BTreeMap::new();
        for plan in PlanId::ALL {
            if let Some(table) = records.load(plan.as_str())? {
                let row = table.first()?;
                stamps.insert(
                    plan,
                    PlanStamp {
                        editor: row.column(plan_columns::EDITOR).unwrap_or_default().to_string(),
                        edited_on: row
                            .column(plan_columns::EDITED_ON)
                            .unwrap_or_default()
                            .to_string(),
                    },
                );
            }
        }

        Ok(Self {
            number: text("KNOTENNR"),
            name: text("KNOTENBEZ"),
            version: text("KNVERS"),
            status: text("MODESTATUS"),
            folder_date: text("KNMAPDATUM"),
            print_time: text("ZEITPUNKT"),
            user: text("logname"),
            mode,
            datum,
            opened_at,
            stamps,
        })
    }

    pub fn stamp(&self, plan: PlanId) -> PlanStamp {
        self.stamps.get(&plan).cloned().unwrap_or_default()
    }
}

/// 节点记录的数据基准：列数多于 6 时取最后一列，否则为 LV03。
pub fn node_datum(record: &AttributeRecord) -> Result<Datum, EngineError> {
    if record.len() > NODE_DATUM_MIN_COLUMNS {
        let raw = record.values().last().map(String::as_str).unwrap_or_default();
        if raw.trim().is_empty() {
            return Ok(Datum::default());
        }
        return Ok(raw.parse()?);
    }
    Ok(Datum::Lv03)
}
