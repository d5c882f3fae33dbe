//! 节点平面图文档：平面图配置、分层符号树和对象元数据索引。
//!
//! 静态层中的符号实例与元数据索引必须一一对应。所有增删都经由
//! `PlanDocument` 的同一组方法完成，两侧同时更新。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geometry::{Transform, Vector2};
use crate::projection::{Datum, Orientation, PageLayout, Projection, ProjectionError, Region};

pub const LAYER_STATIC: &str = "STATIC";
pub const LAYER_DYNAMIC: &str = "DYNAMIC";
pub const LAYER_TITLE_BLOCKS: &str = "PLANKOPF";
pub const LAYER_PROJECT0: &str = "PROJECT0";
pub const LAYER_PROJECT1: &str = "PROJECT1";

/// 1.2 之前的绘图层名称。
pub const LEGACY_LAYER_PROJECT: &str = "PROJECT";
pub const LEGACY_LAYER_INFO: &str = "INFO";

/// 文档格式版本，存档中的 `data-version` 属性。缺失表示最早的版本。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DocumentVersion {
    #[default]
    V1,
    V1_2,
    V1_3,
    V1_4,
}

impl DocumentVersion {
    pub const CURRENT: DocumentVersion = DocumentVersion::V1_4;

    pub fn as_str(self) -> &'static str {
        match self {
            DocumentVersion::V1 => "1",
            DocumentVersion::V1_2 => "1.2",
            DocumentVersion::V1_3 => "1.3",
            DocumentVersion::V1_4 => "1.4",
        }
    }

    pub fn next(self) -> Option<DocumentVersion> {
        match self {
            DocumentVersion::V1 => Some(DocumentVersion::V1_2),
            DocumentVersion::V1_2 => Some(DocumentVersion::V1_3),
            DocumentVersion::V1_3 => Some(DocumentVersion::V1_4),
            DocumentVersion::V1_4 => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported document version {0:?}")]
pub struct UnknownVersionError(pub String);

impl FromStr for DocumentVersion {
    type Err = UnknownVersionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "" | "1" | "1.0" | "1.1" => Ok(DocumentVersion::V1),
            "1.2" => Ok(DocumentVersion::V1_2),
            "1.3" => Ok(DocumentVersion::V1_3),
            "1.4" => Ok(DocumentVersion::V1_4),
            other => Err(UnknownVersionError(other.to_string())),
        }
    }
}

impl TryFrom<String> for DocumentVersion {
    type Error = UnknownVersionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DocumentVersion> for String {
    fn from(value: DocumentVersion) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for DocumentVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 五个平面图。`Lageplan` 是基准图，其余平面图依附于它。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PlanId {
    #[serde(rename = "LAGEPLAN")]
    Lageplan,
    #[serde(rename = "AMPELPLAN")]
    Ampelplan,
    #[serde(rename = "DETEKTORPLAN")]
    Detektorplan,
    #[serde(rename = "VVAPLAN")]
    Vvaplan,
    #[serde(rename = "SPURENPLAN")]
    Spurenplan,
}

impl PlanId {
    pub const ALL: [PlanId; 5] = [
        PlanId::Lageplan,
        PlanId::Ampelplan,
        PlanId::Detektorplan,
        PlanId::Vvaplan,
        PlanId::Spurenplan,
    ];

    pub const DEPENDENT: [PlanId; 4] = [
        PlanId::Ampelplan,
        PlanId::Detektorplan,
        PlanId::Vvaplan,
        PlanId::Spurenplan,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PlanId::Lageplan => "LAGEPLAN",
            PlanId::Ampelplan => "AMPELPLAN",
            PlanId::Detektorplan => "DETEKTORPLAN",
            PlanId::Vvaplan => "VVAPLAN",
            PlanId::Spurenplan => "SPURENPLAN",
        }
    }

    /// 计划节点上的简称。
    pub fn short_name(self) -> &'static str {
        match self {
            PlanId::Lageplan => "Lage",
            PlanId::Ampelplan => "Ampel",
            PlanId::Detektorplan => "Detektor",
            PlanId::Vvaplan => "VVA",
            PlanId::Spurenplan => "Spur",
        }
    }

    /// 图框标题中的平面图名称。
    pub fn title(self) -> &'static str {
        match self {
            PlanId::Lageplan => "Lageplan",
            PlanId::Ampelplan => "Ampelplan",
            PlanId::Detektorplan => "Detektorplan",
            PlanId::Vvaplan => "VVaPlan",
            PlanId::Spurenplan => "Spurenplan",
        }
    }

    pub fn default_categories(self) -> &'static [&'static str] {
        match self {
            PlanId::Lageplan => &["META", "KNOTEN"],
            PlanId::Ampelplan => &["AMPELMAST", "AMPEL", "STEUERGERAET", "META"],
            PlanId::Detektorplan => &["DETEKTOR", "META"],
            PlanId::Vvaplan => &["VVA", "META"],
            PlanId::Spurenplan => &["SPUR", "META"],
        }
    }

    #[inline]
    pub fn is_ground(self) -> bool {
        self == PlanId::Lageplan
    }
}

impl fmt::Display for PlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown plan {0:?}")]
pub struct UnknownPlanError(pub String);

impl FromStr for PlanId {
    type Err = UnknownPlanError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        PlanId::ALL
            .into_iter()
            .find(|plan| plan.as_str().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| UnknownPlanError(value.to_string()))
    }
}

/// 图框所在的角。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TitleBlockPosition {
    #[default]
    ObenLinks,
    ObenRechts,
    UntenLinks,
    UntenRechts,
}

impl TitleBlockPosition {
    pub fn as_str(self) -> &'static str {
        match self {
            TitleBlockPosition::ObenLinks => "oben-links",
            TitleBlockPosition::ObenRechts => "oben-rechts",
            TitleBlockPosition::UntenLinks => "unten-links",
            TitleBlockPosition::UntenRechts => "unten-rechts",
        }
    }

    #[inline]
    pub fn is_right(self) -> bool {
        matches!(self, TitleBlockPosition::ObenRechts | TitleBlockPosition::UntenRechts)
    }

    #[inline]
    pub fn is_bottom(self) -> bool {
        matches!(self, TitleBlockPosition::UntenLinks | TitleBlockPosition::UntenRechts)
    }
}

impl fmt::Display for TitleBlockPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TitleBlockPosition {
    type Err = ProjectionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "oben-links" => Ok(TitleBlockPosition::ObenLinks),
            "oben-rechts" => Ok(TitleBlockPosition::ObenRechts),
            "unten-links" => Ok(TitleBlockPosition::UntenLinks),
            "unten-rechts" => Ok(TitleBlockPosition::UntenRechts),
            other => Err(ProjectionError::UnknownValue {
                kind: "position",
                value: other.to_string(),
            }),
        }
    }
}

/// 图框位置配置。方向默认横排（`quer`）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleBlockSettings {
    pub position: TitleBlockPosition,
    pub auslegung: Orientation,
}

impl Default for TitleBlockSettings {
    fn default() -> Self {
        Self {
            position: TitleBlockPosition::ObenLinks,
            auslegung: Orientation::Quer,
        }
    }
}

/// 平面图配置节点。`viewbox` 恒等于 `region` 减去基准图原点。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanNode {
    pub id: PlanId,
    pub name: String,
    pub region: Region,
    pub viewbox: Region,
    #[serde(flatten)]
    pub layout: PageLayout,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub title_block: TitleBlockSettings,
}

impl PlanNode {
    pub fn new(id: PlanId, projection: &Projection, ground: &Projection) -> Self {
        Self {
            id,
            name: id.short_name().to_string(),
            region: projection.region(),
            viewbox: projection.viewbox(ground),
            layout: projection.layout(),
            categories: id
                .default_categories()
                .iter()
                .map(|category| category.to_string())
                .collect(),
            title_block: TitleBlockSettings::default(),
        }
    }

    /// 由存档的区域和布局重建投影，宽高按布局重新计算。
    pub fn projection(&self, datum: Datum) -> Projection {
        Projection::new(self.region.origin(), self.layout, datum)
    }

    /// 写回投影结果，并按基准图重新计算视口区域。
    pub fn apply(&mut self, projection: &Projection, ground: &Projection) {
        self.region = projection.region();
        self.viewbox = projection.viewbox(ground);
        self.layout = projection.layout();
    }

    pub fn has_category(&self, category: &str) -> bool {
        self.categories.iter().any(|c| c == category)
    }
}

/// 静态层中的一个符号实例。位置保存在变换矩阵中（视口坐标）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolInstance {
    pub id: String,
    pub symbol_id: String,
    pub transform: Transform,
    /// 记录中缺少坐标的对象以默认位置显示，并带此标记。
    #[serde(default)]
    pub unpositioned: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub body: String,
}

impl SymbolInstance {
    /// 把位置移入投影范围，同时清除未定位标记。
    pub fn center_within(&mut self, projection: &Projection) {
        let centered = projection.center_object(self.transform.position());
        self.transform.set_position(centered);
        self.unpositioned = false;
    }

    /// 视口坐标相对基准原点，基准原点移动 `delta` 时对象反向平移。
    #[inline]
    pub fn shift_against(&mut self, delta: Vector2) {
        self.transform.translate(delta.negate());
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryGroup {
    pub id: String,
    #[serde(default)]
    pub objects: Vec<SymbolInstance>,
}

impl CategoryGroup {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            objects: Vec::new(),
        }
    }

    pub fn object(&self, id: &str) -> Option<&SymbolInstance> {
        self.objects.iter().find(|object| object.id == id)
    }

    pub fn object_mut(&mut self, id: &str) -> Option<&mut SymbolInstance> {
        self.objects.iter_mut().find(|object| object.id == id)
    }
}

/// 元数据索引条目，与静态符号实例一一对应。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub id: String,
    pub symbol_id: String,
    pub category: String,
    pub name: String,
}

/// 动态层实例：对应一个静态对象，并绑定遥测数据点。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicInstance {
    /// 数据点 id。
    pub id: String,
    pub category: String,
    pub static_id: String,
    pub symbol_id: String,
    pub transform: Transform,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub body: String,
}

/// 图框文字。`None` 表示该字段在当前显示模式下隐藏。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleBlockText {
    pub plan: String,
    pub knoten: String,
    #[serde(default)]
    pub druckdatum: Option<String>,
    #[serde(default)]
    pub bearbeitung: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TitleBlock {
    pub plan: PlanId,
    #[serde(default)]
    pub hidden: bool,
    pub transform: Transform,
    pub symbol_id: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub text: TitleBlockText,
    /// 图框内容格式，低于当前值时需要整体重建。
    #[serde(default = "TitleBlock::legacy_revision")]
    pub revision: u32,
}

impl TitleBlock {
    pub const REVISION: u32 = 2;

    fn legacy_revision() -> u32 {
        1
    }
}

/// 绘图层中的自由图形。`classes` 携带所属平面图和锁定等标记。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shape {
    pub id: String,
    #[serde(default)]
    pub classes: Vec<String>,
    pub transform: Transform,
    #[serde(default)]
    pub markup: String,
}

impl Shape {
    pub fn has_class(&self, class: &str) -> bool {
        self.classes.iter().any(|c| c == class)
    }

    pub fn add_class(&mut self, class: &str) {
        if !self.has_class(class) {
            self.classes.push(class.to_string());
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StaticContent {
    #[serde(default)]
    pub categories: Vec<CategoryGroup>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DynamicContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewbox: Option<Region>,
    #[serde(default)]
    pub objects: Vec<DynamicInstance>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TitleBlockContent {
    #[serde(default)]
    pub blocks: Vec<TitleBlock>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShapeContent {
    #[serde(default)]
    pub shapes: Vec<Shape>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LayerContent {
    Static(StaticContent),
    Dynamic(DynamicContent),
    TitleBlocks(TitleBlockContent),
    Shapes(ShapeContent),
}

/// 文档中的一层，按存储顺序叠放。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub id: String,
    #[serde(default = "Layer::default_visible")]
    pub visible: bool,
    pub content: LayerContent,
}

impl Layer {
    fn default_visible() -> bool {
        true
    }

    pub fn new(id: impl Into<String>, content: LayerContent) -> Self {
        Self {
            id: id.into(),
            visible: true,
            content,
        }
    }

    pub fn shapes(id: impl Into<String>) -> Self {
        Self::new(id, LayerContent::Shapes(ShapeContent::default()))
    }

    pub fn as_static(&self) -> Option<&StaticContent> {
        match &self.content {
            LayerContent::Static(content) => Some(content),
            _ => None,
        }
    }

    pub fn as_static_mut(&mut self) -> Option<&mut StaticContent> {
        match &mut self.content {
            LayerContent::Static(content) => Some(content),
            _ => None,
        }
    }

    pub fn as_dynamic(&self) -> Option<&DynamicContent> {
        match &self.content {
            LayerContent::Dynamic(content) => Some(content),
            _ => None,
        }
    }

    pub fn as_dynamic_mut(&mut self) -> Option<&mut DynamicContent> {
        match &mut self.content {
            LayerContent::Dynamic(content) => Some(content),
            _ => None,
        }
    }

    pub fn as_title_blocks_mut(&mut self) -> Option<&mut TitleBlockContent> {
        match &mut self.content {
            LayerContent::TitleBlocks(content) => Some(content),
            _ => None,
        }
    }

    pub fn as_shapes(&self) -> Option<&ShapeContent> {
        match &self.content {
            LayerContent::Shapes(content) => Some(content),
            _ => None,
        }
    }

    pub fn as_shapes_mut(&mut self) -> Option<&mut ShapeContent> {
        match &mut self.content {
            LayerContent::Shapes(content) => Some(content),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntegrityError {
    #[error("object {category}/{id} has no metadata entry")]
    MissingMetadata { category: String, id: String },
    #[error("metadata {category}/{id} has no object")]
    OrphanMetadata { category: String, id: String },
    #[error("metadata {category}/{id} names symbol {meta} but object uses {object}")]
    SymbolMismatch {
        category: String,
        id: String,
        meta: String,
        object: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanDocument {
    #[serde(rename = "data-version", default)]
    version: DocumentVersion,
    #[serde(default)]
    plans: Vec<PlanNode>,
    #[serde(default)]
    layers: Vec<Layer>,
    #[serde(default)]
    metadata: Vec<ObjectMeta>,
}

impl Default for PlanDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl PlanDocument {
    /// 新建当前版本的空文档，层顺序：PROJECT0、DYNAMIC、STATIC、PROJECT1、PLANKOPF。
    pub fn new() -> Self {
        Self {
            version: DocumentVersion::CURRENT,
            plans: Vec::new(),
            layers: vec![
                Layer::shapes(LAYER_PROJECT0),
                Layer::new(LAYER_DYNAMIC, LayerContent::Dynamic(DynamicContent::default())),
                Layer::new(LAYER_STATIC, LayerContent::Static(StaticContent::default())),
                Layer::shapes(LAYER_PROJECT1),
                Layer::new(
                    LAYER_TITLE_BLOCKS,
                    LayerContent::TitleBlocks(TitleBlockContent::default()),
                ),
            ],
            metadata: Vec::new(),
        }
    }

    /// 指定版本、无任何层的文档，供迁移与测试构造旧格式。
    pub fn empty(version: DocumentVersion) -> Self {
        Self {
            version,
            plans: Vec::new(),
            layers: Vec::new(),
            metadata: Vec::new(),
        }
    }

    #[inline]
    pub fn version(&self) -> DocumentVersion {
        self.version
    }

    #[inline]
    pub fn set_version(&mut self, version: DocumentVersion) {
        self.version = version;
    }

    // ---- 平面图 ----

    pub fn plans(&self) -> &[PlanNode] {
        &self.plans
    }

    pub fn plan(&self, id: PlanId) -> Option<&PlanNode> {
        self.plans.iter().find(|plan| plan.id == id)
    }

    pub fn plan_mut(&mut self, id: PlanId) -> Option<&mut PlanNode> {
        self.plans.iter_mut().find(|plan| plan.id == id)
    }

    /// 替换同 id 的平面图，不存在则追加。
    pub fn upsert_plan(&mut self, node: PlanNode) {
        match self.plan_mut(node.id) {
            Some(existing) => *existing = node,
            None => self.plans.push(node),
        }
    }

    // ---- 层 ----

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn layer(&self, id: &str) -> Option<&Layer> {
        self.layers.iter().find(|layer| layer.id == id)
    }

    pub fn layer_mut(&mut self, id: &str) -> Option<&mut Layer> {
        self.layers.iter_mut().find(|layer| layer.id == id)
    }

    pub fn layer_index(&self, id: &str) -> Option<usize> {
        self.layers.iter().position(|layer| layer.id == id)
    }

    pub fn push_layer(&mut self, layer: Layer) {
        self.layers.push(layer);
    }

    pub fn remove_layer(&mut self, id: &str) -> Option<Layer> {
        let index = self.layer_index(id)?;
        Some(self.layers.remove(index))
    }

    /// 把 `id` 层移到 `before` 层之前。任一层缺失时返回 `false`。
    pub fn move_layer_before(&mut self, id: &str, before: &str) -> bool {
        if id == before || self.layer_index(before).is_none() {
            return false;
        }
        let Some(layer) = self.remove_layer(id) else {
            return false;
        };
        let target = self.layer_index(before).unwrap_or(self.layers.len());
        self.layers.insert(target, layer);
        true
    }

    /// 所有绘图层中的图形。
    pub fn shapes_mut(&mut self) -> impl Iterator<Item = &mut Shape> + '_ {
        self.layers
            .iter_mut()
            .filter_map(Layer::as_shapes_mut)
            .flat_map(|content| content.shapes.iter_mut())
    }

    pub fn dynamic(&self) -> Option<&DynamicContent> {
        self.layer(LAYER_DYNAMIC).and_then(Layer::as_dynamic)
    }

    /// 动态层，缺失时在静态层之前创建。
    pub fn dynamic_mut(&mut self) -> &mut DynamicContent {
        if self.layer(LAYER_DYNAMIC).and_then(Layer::as_dynamic).is_none() {
            self.remove_layer(LAYER_DYNAMIC);
            let at = self.layer_index(LAYER_STATIC).unwrap_or(self.layers.len());
            self.layers.insert(
                at,
                Layer::new(LAYER_DYNAMIC, LayerContent::Dynamic(DynamicContent::default())),
            );
        }
        let layer = self
            .layers
            .iter_mut()
            .find(|layer| layer.id == LAYER_DYNAMIC);
        match layer.and_then(Layer::as_dynamic_mut) {
            Some(content) => content,
            None => unreachable!("dynamic layer was just inserted"),
        }
    }

    pub fn title_blocks(&self) -> impl Iterator<Item = &TitleBlock> + '_ {
        self.layers
            .iter()
            .filter_map(|layer| match &layer.content {
                LayerContent::TitleBlocks(content) => Some(content.blocks.iter()),
                _ => None,
            })
            .flatten()
    }

    pub fn title_block(&self, plan: PlanId) -> Option<&TitleBlock> {
        self.title_blocks().find(|block| block.plan == plan)
    }

    pub fn title_block_mut(&mut self, plan: PlanId) -> Option<&mut TitleBlock> {
        self.layers
            .iter_mut()
            .filter_map(Layer::as_title_blocks_mut)
            .flat_map(|content| content.blocks.iter_mut())
            .find(|block| block.plan == plan)
    }

    /// 替换或追加图框；图框层缺失时新建于末尾。
    pub fn upsert_title_block(&mut self, block: TitleBlock) {
        if let Some(existing) = self.title_block_mut(block.plan) {
            *existing = block;
            return;
        }
        if self.layer(LAYER_TITLE_BLOCKS).is_none() {
            self.layers.push(Layer::new(
                LAYER_TITLE_BLOCKS,
                LayerContent::TitleBlocks(TitleBlockContent::default()),
            ));
        }
        if let Some(content) = self
            .layer_mut(LAYER_TITLE_BLOCKS)
            .and_then(Layer::as_title_blocks_mut)
        {
            content.blocks.push(block);
        }
    }

    // ---- 静态层与元数据 ----

    pub fn static_content(&self) -> Option<&StaticContent> {
        self.layer(LAYER_STATIC).and_then(Layer::as_static)
    }

    fn static_content_mut(&mut self) -> &mut StaticContent {
        if self.layer(LAYER_STATIC).and_then(Layer::as_static).is_none() {
            self.remove_layer(LAYER_STATIC);
            let at = self
                .layer_index(LAYER_PROJECT1)
                .unwrap_or(self.layers.len());
            self.layers.insert(
                at,
                Layer::new(LAYER_STATIC, LayerContent::Static(StaticContent::default())),
            );
        }
        let layer = self.layers.iter_mut().find(|layer| layer.id == LAYER_STATIC);
        match layer.and_then(Layer::as_static_mut) {
            Some(content) => content,
            None => unreachable!("static layer was just inserted"),
        }
    }

    pub fn categories(&self) -> &[CategoryGroup] {
        self.static_content()
            .map(|content| content.categories.as_slice())
            .unwrap_or(&[])
    }

    pub fn category(&self, id: &str) -> Option<&CategoryGroup> {
        self.categories().iter().find(|group| group.id == id)
    }

    pub fn has_category(&self, id: &str) -> bool {
        self.category(id).is_some()
    }

    /// 类别组，缺失时追加到静态层末尾。
    pub fn ensure_category(&mut self, id: &str) -> &mut CategoryGroup {
        let content = self.static_content_mut();
        let index = match content.categories.iter().position(|group| group.id == id) {
            Some(index) => index,
            None => {
                content.categories.push(CategoryGroup::new(id));
                content.categories.len() - 1
            }
        };
        &mut content.categories[index]
    }

    /// 直接访问类别组。只用于改动位置、标签等不涉及元数据的字段。
    pub fn category_mut(&mut self, id: &str) -> Option<&mut CategoryGroup> {
        self.layer_mut(LAYER_STATIC)
            .and_then(Layer::as_static_mut)
            .and_then(|content| content.categories.iter_mut().find(|group| group.id == id))
    }

    pub fn object(&self, category: &str, id: &str) -> Option<&SymbolInstance> {
        self.category(category).and_then(|group| group.object(id))
    }

    pub fn object_mut(&mut self, category: &str, id: &str) -> Option<&mut SymbolInstance> {
        self.category_mut(category).and_then(|group| group.object_mut(id))
    }

    /// 所有静态对象（跨类别）。
    pub fn objects_mut(&mut self) -> impl Iterator<Item = &mut SymbolInstance> + '_ {
        self.layers
            .iter_mut()
            .filter_map(Layer::as_static_mut)
            .flat_map(|content| content.categories.iter_mut())
            .flat_map(|group| group.objects.iter_mut())
    }

    pub fn metadata(&self) -> &[ObjectMeta] {
        &self.metadata
    }

    pub fn meta(&self, category: &str, id: &str) -> Option<&ObjectMeta> {
        self.metadata
            .iter()
            .find(|meta| meta.category == category && meta.id == id)
    }

    /// 按 id 查找元数据，不区分类别。用于迁移中的重新归类。
    pub fn meta_by_id_mut(&mut self, id: &str) -> Option<&mut ObjectMeta> {
        self.metadata.iter_mut().find(|meta| meta.id == id)
    }

    /// 写入对象并同步元数据。已有同 id 对象会被替换，新对象总在类别末尾。
    pub fn upsert_object(&mut self, category: &str, instance: SymbolInstance, name: impl Into<String>) {
        self.remove_object(category, &instance.id);
        let meta = ObjectMeta {
            id: instance.id.clone(),
            symbol_id: instance.symbol_id.clone(),
            category: category.to_string(),
            name: name.into(),
        };
        self.ensure_category(category).objects.push(instance);
        self.metadata.push(meta);
    }

    /// 删除对象及其元数据。
    pub fn remove_object(&mut self, category: &str, id: &str) -> Option<SymbolInstance> {
        self.metadata
            .retain(|meta| !(meta.category == category && meta.id == id));
        let group = self.category_mut(category)?;
        let index = group.objects.iter().position(|object| object.id == id)?;
        Some(group.objects.remove(index))
    }

    /// 只保留满足条件的对象，返回被删除的 id。
    pub fn retain_objects<F>(&mut self, category: &str, mut keep: F) -> Vec<String>
    where
        F: FnMut(&SymbolInstance) -> bool,
    {
        let Some(group) = self.category_mut(category) else {
            return Vec::new();
        };
        let mut removed = Vec::new();
        group.objects.retain(|object| {
            let retain = keep(object);
            if !retain {
                removed.push(object.id.clone());
            }
            retain
        });
        self.metadata
            .retain(|meta| !(meta.category == category && removed.contains(&meta.id)));
        removed
    }

    /// 把对象移到类别末尾（绘制顺序随记录顺序）。
    pub fn move_object_to_end(&mut self, category: &str, id: &str) -> bool {
        let Some(group) = self.category_mut(category) else {
            return false;
        };
        let Some(index) = group.objects.iter().position(|object| object.id == id) else {
            return false;
        };
        let object = group.objects.remove(index);
        group.objects.push(object);
        true
    }

    /// 更新对象的显示名称（元数据中的 `name`）。
    pub fn rename_object(&mut self, category: &str, id: &str, name: impl Into<String>) -> bool {
        match self
            .metadata
            .iter_mut()
            .find(|meta| meta.category == category && meta.id == id)
        {
            Some(meta) => {
                meta.name = name.into();
                true
            }
            None => false,
        }
    }

    /// 更换对象的符号，元数据同步更新。
    pub fn set_object_symbol(
        &mut self,
        category: &str,
        id: &str,
        symbol_id: &str,
        body: String,
    ) -> bool {
        let Some(object) = self.object_mut(category, id) else {
            return false;
        };
        object.symbol_id = symbol_id.to_string();
        object.body = body;
        if let Some(meta) = self
            .metadata
            .iter_mut()
            .find(|meta| meta.category == category && meta.id == id)
        {
            meta.symbol_id = symbol_id.to_string();
        }
        true
    }

    /// 清空所有静态对象和元数据，类别组本身保留。
    pub fn clear_static(&mut self) {
        for layer in self.layers.iter_mut() {
            if let Some(content) = layer.as_static_mut() {
                content.categories.clear();
            }
        }
        self.metadata.clear();
    }

    /// 在迁移中把对象从一个类别移到另一个类别并改名，元数据同步。
    pub fn relocate_object(&mut self, from: &str, id: &str, to: &str, new_id: &str) -> bool {
        let Some(group) = self.category_mut(from) else {
            return false;
        };
        let Some(index) = group.objects.iter().position(|object| object.id == id) else {
            return false;
        };
        let mut object = group.objects.remove(index);
        object.id = new_id.to_string();
        if let Some(meta) = self
            .metadata
            .iter_mut()
            .find(|meta| meta.id == id && (meta.category == from || meta.category == to))
        {
            meta.id = new_id.to_string();
            meta.category = to.to_string();
        }
        self.ensure_category(to).objects.push(object);
        true
    }

    /// 直接追加元数据条目，只供迁移处理旧格式时使用。
    pub fn push_meta(&mut self, meta: ObjectMeta) {
        self.metadata.push(meta);
    }

    /// 校验静态对象与元数据一一对应。
    pub fn check_integrity(&self) -> Result<(), IntegrityError> {
        for group in self.categories() {
            for object in &group.objects {
                let meta = self.meta(&group.id, &object.id).ok_or_else(|| {
                    IntegrityError::MissingMetadata {
                        category: group.id.clone(),
                        id: object.id.clone(),
                    }
                })?;
                if meta.symbol_id != object.symbol_id {
                    return Err(IntegrityError::SymbolMismatch {
                        category: group.id.clone(),
                        id: object.id.clone(),
                        meta: meta.symbol_id.clone(),
                        object: object.symbol_id.clone(),
                    });
                }
            }
        }
        for meta in &self.metadata {
            if self.object(&meta.category, &meta.id).is_none() {
                return Err(IntegrityError::OrphanMetadata {
                    category: meta.category.clone(),
                    id: meta.id.clone(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Point2;

    fn instance(id: &str, symbol: &str) -> SymbolInstance {
        SymbolInstance {
            id: id.to_string(),
            symbol_id: symbol.to_string(),
            transform: Transform::translation(Point2::new(1.0, 1.0)),
            unpositioned: false,
            label: None,
            body: String::new(),
        }
    }

    #[test]
    fn new_document_has_standard_layer_order() {
        let doc = PlanDocument::new();
        let ids: Vec<_> = doc.layers().iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, vec!["PROJECT0", "DYNAMIC", "STATIC", "PROJECT1", "PLANKOPF"]);
        assert_eq!(doc.version(), DocumentVersion::CURRENT);
    }

    #[test]
    fn upsert_and_remove_keep_metadata_in_lock_step() {
        let mut doc = PlanDocument::new();
        doc.upsert_object("SPUR", instance("1", "210"), "Spur 1");
        doc.upsert_object("SPUR", instance("2", "210"), "Spur 2");
        doc.upsert_object("SPUR", instance("1", "211"), "Spur 1");
        doc.check_integrity().expect("一致");
        assert_eq!(doc.metadata().len(), 2);
        assert_eq!(doc.meta("SPUR", "1").map(|m| m.symbol_id.as_str()), Some("211"));
        let order: Vec<_> = doc.category("SPUR").expect("类别").objects.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(order, vec!["2", "1"]);

        doc.remove_object("SPUR", "2").expect("删除");
        doc.check_integrity().expect("一致");
        assert!(doc.meta("SPUR", "2").is_none());
    }

    #[test]
    fn retain_objects_removes_matching_metadata() {
        let mut doc = PlanDocument::new();
        for id in ["a", "b", "c", "d", "e"] {
            doc.upsert_object("AMPEL", instance(id, "358"), id);
        }
        let removed = doc.retain_objects("AMPEL", |object| object.id != "b" && object.id != "d");
        assert_eq!(removed, vec!["b".to_string(), "d".to_string()]);
        assert_eq!(doc.category("AMPEL").expect("类别").objects.len(), 3);
        assert_eq!(doc.metadata().len(), 3);
        doc.check_integrity().expect("一致");
    }

    #[test]
    fn integrity_check_detects_orphans() {
        let mut doc = PlanDocument::new();
        doc.push_meta(ObjectMeta {
            id: "x".to_string(),
            symbol_id: "1".to_string(),
            category: "VVA".to_string(),
            name: "VVa x".to_string(),
        });
        assert!(matches!(
            doc.check_integrity(),
            Err(IntegrityError::OrphanMetadata { .. })
        ));
    }

    #[test]
    fn set_object_symbol_updates_both_sides() {
        let mut doc = PlanDocument::new();
        doc.upsert_object("DETEKTOR", instance("5", "400"), "Detektor 5");
        assert!(doc.set_object_symbol("DETEKTOR", "5", "401", "<g/>".to_string()));
        doc.check_integrity().expect("一致");
        assert_eq!(doc.object("DETEKTOR", "5").expect("对象").body, "<g/>");
    }

    #[test]
    fn relocate_object_moves_and_renames() {
        let mut doc = PlanDocument::new();
        doc.upsert_object("META", instance("KNOTEN", "110"), "Knoten");
        assert!(doc.relocate_object("META", "KNOTEN", "KNOTEN", "KNOTENMITTE"));
        assert!(doc.object("KNOTEN", "KNOTENMITTE").is_some());
        assert!(doc.object("META", "KNOTEN").is_none());
        doc.check_integrity().expect("一致");
    }

    #[test]
    fn move_layer_before_reorders() {
        let mut doc = PlanDocument::new();
        assert!(doc.move_layer_before(LAYER_STATIC, LAYER_DYNAMIC));
        assert!(doc.layer_index(LAYER_STATIC) < doc.layer_index(LAYER_DYNAMIC));
        assert!(!doc.move_layer_before("MISSING", LAYER_DYNAMIC));
    }

    #[test]
    fn document_serializes_version_attribute() {
        let doc = PlanDocument::new();
        let json = serde_json::to_value(&doc).expect("序列化");
        assert_eq!(json["data-version"], "1.4");
        let legacy: PlanDocument = serde_json::from_str(r#"{"layers": []}"#).expect("反序列化");
        assert_eq!(legacy.version(), DocumentVersion::V1);
        assert!(serde_json::from_str::<PlanDocument>(r#"{"data-version": "2.0"}"#).is_err());
    }

    #[test]
    fn plan_ids_parse_case_insensitively() {
        assert_eq!("vvaplan".parse::<PlanId>().expect("平面图"), PlanId::Vvaplan);
        assert!("HAUPTPLAN".parse::<PlanId>().is_err());
    }
}
