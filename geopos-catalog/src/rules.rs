//! 声明式符号选择规则。
//!
//! 每条规则把一个符号绑定到一个类别，并列出若干字段约束；约束为空表示通配。
//! 记录满足某条规则的全部约束时，该符号进入候选列表。

use std::collections::BTreeMap;

use geopos_core::records::AttributeRecord;
use serde::Deserialize;
use tracing::warn;

use crate::errors::CatalogError;

/// `symbol.cf` 的列顺序。
pub const SYMBOL_CF_COLUMNS: [&str; 15] = [
    "ID",
    "BEZ",
    "KLASSE",
    "AMPELTYP",
    "AMPELGEHAEUSETYP",
    "BESCHREIBUNG",
    "STDSTATUS",
    "DETEKTORFUNKTION",
    "DETEKTORAUFB",
    "BEDIENUNGSKASTEN",
    "DETEKTORERFART",
    "MONTAGE",
    "AMPELFUNKTION",
    "VVATYP",
    "ABBIEGEBEZIEHUNG",
];

const SYMBOL_CF_PREAMBLE: usize = 4;

/// 各类别参与匹配的记录字段，其余类别只按类别匹配。
pub fn selection_fields(category: &str) -> &'static [&'static str] {
    match category {
        "AMPEL" => &["AMPELFUNKTION", "AMPELGEHAEUSETYP", "AMPELTYP", "MONTAGE"],
        "DETEKTOR" => &["DETEKTORFUNKTION", "DETEKTORAUFB", "DETEKTORERFART"],
        "VVA" => &["VVATYP", "ABBIEGEBEZIEHUNG"],
        "AMPELMAST" => &["BEDIENUNGSKASTEN"],
        _ => &[],
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SymbolRule {
    pub symbol: String,
    pub category: String,
    #[serde(default)]
    pub description: Option<String>,
    /// 字段名 → 期望值。
    #[serde(default)]
    pub when: BTreeMap<String, String>,
}

impl SymbolRule {
    pub fn matches(&self, category: &str, record: &AttributeRecord) -> bool {
        self.category == category
            && self
                .when
                .iter()
                .all(|(field, expected)| record.field(field) == Some(expected.as_str()))
    }
}

#[derive(Debug, Deserialize)]
struct RuleFile {
    #[serde(default)]
    pinned: BTreeMap<String, String>,
    #[serde(default, rename = "rule")]
    rules: Vec<SymbolRule>,
}

/// 规则表：有序规则列表，加上每个类别可选的置顶默认符号。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleTable {
    rules: Vec<SymbolRule>,
    pinned: BTreeMap<String, String>,
}

impl RuleTable {
    pub fn new(rules: Vec<SymbolRule>, pinned: BTreeMap<String, String>) -> Self {
        Self { rules, pinned }
    }

    /// 默认置顶：信号灯优先使用 358。
    pub fn standard_pins() -> BTreeMap<String, String> {
        BTreeMap::from([("AMPEL".to_string(), "358".to_string())])
    }

    /// 解析制表符分隔的 `symbol.cf`。列数不符的行被跳过并记录警告。
    pub fn parse_symbol_cf(text: &str) -> Result<Self, CatalogError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(b'\t')
            .from_reader(text.as_bytes());
        let mut rules = Vec::new();
        for result in reader.records().skip(SYMBOL_CF_PREAMBLE) {
            let fields = result?;
            if fields.iter().all(|field| field.trim().is_empty()) {
                continue;
            }
            if fields.len() != SYMBOL_CF_COLUMNS.len() {
                warn!(
                    line = fields.position().map(|p| p.line()),
                    columns = fields.len(),
                    "symbol.cf 行列数不正确，已跳过"
                );
                continue;
            }
            let column = |index: usize| fields.get(index).map(str::trim).unwrap_or_default();
            let category = column(2).to_string();
            let when = selection_fields(&category)
                .iter()
                .filter_map(|field| {
                    let index = SYMBOL_CF_COLUMNS.iter().position(|c| c == field)?;
                    let value = column(index);
                    (!value.is_empty()).then(|| (field.to_string(), value.to_string()))
                })
                .collect();
            let description = Some(column(1).to_string()).filter(|d| !d.is_empty());
            rules.push(SymbolRule {
                symbol: column(0).to_string(),
                category,
                description,
                when,
            });
        }
        Ok(Self::new(rules, Self::standard_pins()))
    }

    /// 解析 TOML 形式的规则表：
    ///
    /// ```toml
    /// [pinned]
    /// AMPEL = "358"
    ///
    /// [[rule]]
    /// symbol = "301"
    /// category = "AMPEL"
    /// when = { AMPELTYP = "3" }
    /// ```
    pub fn from_toml_str(text: &str) -> Result<Self, CatalogError> {
        let file: RuleFile = toml::from_str(text)?;
        Ok(Self::new(file.rules, file.pinned))
    }

    pub fn rules(&self) -> &[SymbolRule] {
        &self.rules
    }

    pub fn pinned(&self, category: &str) -> Option<&str> {
        self.pinned.get(category).map(String::as_str)
    }

    /// 匹配的符号 id，保持规则顺序；置顶符号若匹配则移到最前。
    pub fn candidates(&self, category: &str, record: &AttributeRecord) -> Vec<&str> {
        let mut result: Vec<&str> = Vec::new();
        for rule in &self.rules {
            if rule.matches(category, record) && !result.contains(&rule.symbol.as_str()) {
                result.push(rule.symbol.as_str());
            }
        }
        if let Some(pinned) = self.pinned(category) {
            if let Some(index) = result.iter().position(|id| *id == pinned) {
                let id = result.remove(index);
                result.insert(0, id);
            }
        }
        result
    }
}
