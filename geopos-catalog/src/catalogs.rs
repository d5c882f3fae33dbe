//! 三类符号目录：静态（规则选择）、动态（遥测绑定）和项目绘图板。
//!
//! 目录构建后不可变，由 `CatalogStore` 整体替换。

use std::collections::HashMap;
use std::sync::Arc;

use geopos_core::projection::{PaperFormat, Scale};
use geopos_core::records::{AttributeRecord, columns};
use tracing::{error, warn};

use crate::rules::RuleTable;
use crate::symbol::{SymbolDefinition, title_block_key, well_known};

/// 一组符号，保持加载顺序。
#[derive(Debug, Clone)]
pub struct SymbolGroup {
    pub name: String,
    pub symbols: Vec<Arc<SymbolDefinition>>,
}

impl SymbolGroup {
    pub fn new(name: impl Into<String>, symbols: Vec<SymbolDefinition>) -> Self {
        Self {
            name: name.into(),
            symbols: symbols.into_iter().map(Arc::new).collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StaticCatalog {
    symbols: HashMap<String, Arc<SymbolDefinition>>,
    rules: RuleTable,
    unknown: Arc<SymbolDefinition>,
}

impl StaticCatalog {
    pub fn new(definitions: Vec<SymbolDefinition>, rules: RuleTable) -> Self {
        let symbols: HashMap<String, Arc<SymbolDefinition>> = definitions
            .into_iter()
            .map(|definition| (definition.id.clone(), Arc::new(definition)))
            .collect();
        for rule in rules.rules() {
            if !symbols.contains_key(&rule.symbol) {
                warn!(symbol = %rule.symbol, category = %rule.category, "规则引用的符号不在目录中");
            }
        }
        let unknown = symbols
            .get(well_known::UNKNOWN)
            .cloned()
            .unwrap_or_else(|| Arc::new(SymbolDefinition::unknown_sentinel()));
        Self {
            symbols,
            rules,
            unknown,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), RuleTable::default())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn rules(&self) -> &RuleTable {
        &self.rules
    }

    pub fn lookup(&self, id: &str) -> Option<Arc<SymbolDefinition>> {
        self.symbols.get(id).cloned()
    }

    /// 按 id 取符号；未知 id 返回占位符号并记录错误，不会失败。
    pub fn get(&self, id: &str) -> Arc<SymbolDefinition> {
        match self.symbols.get(id) {
            Some(symbol) => Arc::clone(symbol),
            None => {
                error!(symbol = %id, "未知符号，使用占位符号");
                Arc::clone(&self.unknown)
            }
        }
    }

    #[inline]
    pub fn unknown(&self) -> Arc<SymbolDefinition> {
        Arc::clone(&self.unknown)
    }

    /// 按规则表列出候选符号，目录中不存在的符号被略去。
    pub fn select_candidates(
        &self,
        category: &str,
        record: &AttributeRecord,
    ) -> Vec<Arc<SymbolDefinition>> {
        self.rules
            .candidates(category, record)
            .into_iter()
            .filter_map(|id| self.symbols.get(id).cloned())
            .collect()
    }

    /// 第一个候选符号；没有候选时返回占位符号。
    pub fn get_default(&self, category: &str, record: &AttributeRecord) -> Arc<SymbolDefinition> {
        match self.select_candidates(category, record).into_iter().next() {
            Some(symbol) => symbol,
            None => {
                error!(category = %category, record = %record.id(), "没有匹配的符号规则，使用占位符号");
                Arc::clone(&self.unknown)
            }
        }
    }

    pub fn title_block(&self, format: PaperFormat, massstab: Scale) -> Option<Arc<SymbolDefinition>> {
        self.lookup(&title_block_key(format, massstab))
    }
}

/// 动态符号的默认选择：在指定组中找 id 以 `<列值>_` 开头的符号，否则使用后备 id。
struct DynamicDefault {
    category: &'static str,
    group: &'static str,
    column: usize,
    fallback: &'static str,
}

const DYNAMIC_DEFAULTS: [DynamicDefault; 3] = [
    DynamicDefault {
        category: "SPUR",
        group: "Signalgruppen",
        column: columns::DETAIL,
        fallback: "210_21_SPUR",
    },
    DynamicDefault {
        category: "DETEKTOR",
        group: "Detektoren",
        column: columns::SYMBOL_ID,
        fallback: "kntvis_detektor_t_links",
    },
    DynamicDefault {
        category: "VVA",
        group: "VVa",
        column: columns::SYMBOL_ID,
        fallback: "500_19_SRZG",
    },
];

#[derive(Debug, Clone)]
pub struct DynamicCatalog {
    groups: Vec<SymbolGroup>,
    by_id: HashMap<String, Arc<SymbolDefinition>>,
    by_static_id: HashMap<u32, Arc<SymbolDefinition>>,
    unknown: Arc<SymbolDefinition>,
}

impl DynamicCatalog {
    pub fn new(groups: Vec<SymbolGroup>) -> Self {
        let mut by_id = HashMap::new();
        let mut by_static_id = HashMap::new();
        for symbol in groups.iter().flat_map(|group| group.symbols.iter()) {
            by_id.insert(symbol.id.clone(), Arc::clone(symbol));
            if let Some(number) = symbol.numeric_prefix() {
                by_static_id.insert(number, Arc::clone(symbol));
            }
        }
        Self {
            groups,
            by_id,
            by_static_id,
            unknown: Arc::new(SymbolDefinition::unknown_sentinel()),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn groups(&self) -> &[SymbolGroup] {
        &self.groups
    }

    pub fn group(&self, name: &str) -> Option<&SymbolGroup> {
        self.groups.iter().find(|group| group.name == name)
    }

    pub fn get(&self, id: &str) -> Option<Arc<SymbolDefinition>> {
        self.by_id.get(id).cloned()
    }

    /// 以静态符号 id 为键的动态符号。
    pub fn by_static_symbol(&self, static_symbol_id: &str) -> Option<Arc<SymbolDefinition>> {
        let number: u32 = static_symbol_id.trim().parse().ok()?;
        self.by_static_id.get(&number).cloned()
    }

    pub fn get_default(&self, category: &str, record: &AttributeRecord) -> Arc<SymbolDefinition> {
        let Some(rule) = DYNAMIC_DEFAULTS.iter().find(|rule| rule.category == category) else {
            error!(category = %category, "类别没有动态符号");
            return Arc::clone(&self.unknown);
        };
        let key = record.column(rule.column).unwrap_or_default();
        let prefix = format!("{key}_");
        let matched = self.group(rule.group).and_then(|group| {
            group
                .symbols
                .iter()
                .find(|symbol| symbol.id.starts_with(&prefix))
                .cloned()
        });
        if let Some(symbol) = matched {
            return symbol;
        }
        match self.get(rule.fallback) {
            Some(symbol) => symbol,
            None => {
                error!(category = %category, fallback = rule.fallback, "动态后备符号缺失，使用占位符号");
                Arc::clone(&self.unknown)
            }
        }
    }
}

/// 绘图板条目：组名和组内符号 id。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaletteEntry {
    pub group: String,
    pub symbols: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ProjectCatalog {
    groups: Vec<SymbolGroup>,
}

impl ProjectCatalog {
    pub fn new(groups: Vec<SymbolGroup>) -> Self {
        Self { groups }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn get(&self, id: &str) -> Option<Arc<SymbolDefinition>> {
        self.groups
            .iter()
            .flat_map(|group| group.symbols.iter())
            .find(|symbol| symbol.id == id)
            .cloned()
    }

    pub fn palette(&self) -> Vec<PaletteEntry> {
        self.groups
            .iter()
            .map(|group| PaletteEntry {
                group: group.name.clone(),
                symbols: group.symbols.iter().map(|s| s.id.clone()).collect(),
            })
            .collect()
    }
}
