//! 坐标投影：测量坐标（瑞士 LV03/LV95）、文档坐标与平面视口之间的换算。
//!
//! 文档坐标的 x 与测量坐标相同，y 轴相对数据基准的上边界翻转：
//! `doc_y = upper_y - survey_y`。每个平面图都有一个文档坐标原点（左上角）
//! 和由纸张、方向、比例尺决定的范围。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geometry::{Point2, Vector2};
use crate::records::{AttributeRecord, MalformedRecordError};

/// 打印边距（毫米），从纸张两边各自扣除后再换算范围。
pub const PRINT_MARGIN_MM: f64 = 30.0;

/// 计划记录文件的列位置。
pub mod plan_columns {
    pub const X: usize = 1;
    pub const Y: usize = 2;
    pub const MASSSTAB: usize = 4;
    pub const AUSLEGUNG: usize = 5;
    pub const FORMAT: usize = 6;
    pub const EDITOR: usize = 7;
    pub const EDITED_ON: usize = 8;
    pub const TITLE_POSITION: usize = 9;
    pub const TITLE_ORIENTATION: usize = 10;
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProjectionError {
    #[error(transparent)]
    Malformed(#[from] MalformedRecordError),
    #[error("invalid region {0:?}")]
    InvalidRegion(String),
    #[error("unknown {kind} value {value:?}")]
    UnknownValue { kind: &'static str, value: String },
}

/// 外部大地测量换算失败，原样向上传递。
#[derive(Debug, Clone, PartialEq, Error)]
#[error("geodetic transform {source_datum} -> {target_datum} failed: {message}")]
pub struct GeodeticTransformError {
    pub source_datum: Datum,
    pub target_datum: Datum,
    pub message: String,
}

/// 基准换算协作者，由宿主提供具体实现。
pub trait GeodeticTransform {
    fn transform(
        &self,
        point: Point2,
        source: Datum,
        target: Datum,
    ) -> Result<Point2, GeodeticTransformError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Datum {
    #[serde(rename = "LV03")]
    Lv03,
    #[serde(rename = "LV95")]
    Lv95,
}

impl Datum {
    /// 翻转 y 轴使用的上边界。
    #[inline]
    pub fn upper_y(self) -> f64 {
        match self {
            Datum::Lv03 => 256_070.0,
            Datum::Lv95 => 1_256_069.0,
        }
    }

    /// 记录缺少坐标时使用的默认原点（测量坐标）。
    #[inline]
    pub fn fallback_origin(self) -> Point2 {
        match self {
            Datum::Lv03 => Point2::new(683_253.0, 246_390.0),
            Datum::Lv95 => Point2::new(2_683_253.0, 1_246_389.0),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Datum::Lv03 => "LV03",
            Datum::Lv95 => "LV95",
        }
    }
}

impl Default for Datum {
    fn default() -> Self {
        Datum::Lv03
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Datum {
    type Err = ProjectionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "LV03" => Ok(Datum::Lv03),
            "LV95" => Ok(Datum::Lv95),
            other => Err(ProjectionError::UnknownValue {
                kind: "datum",
                value: other.to_string(),
            }),
        }
    }
}

/// 比例尺分母。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Scale {
    S200,
    S500,
    S1000,
}

impl Scale {
    pub const ALL: [Scale; 3] = [Scale::S200, Scale::S500, Scale::S1000];

    #[inline]
    pub fn denominator(self) -> u32 {
        match self {
            Scale::S200 => 200,
            Scale::S500 => 500,
            Scale::S1000 => 1000,
        }
    }
}

impl Default for Scale {
    fn default() -> Self {
        Scale::S500
    }
}

impl fmt::Display for Scale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.denominator())
    }
}

impl FromStr for Scale {
    type Err = ProjectionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "200" => Ok(Scale::S200),
            "500" => Ok(Scale::S500),
            "1000" => Ok(Scale::S1000),
            other => Err(ProjectionError::UnknownValue {
                kind: "massstab",
                value: other.to_string(),
            }),
        }
    }
}

/// 纸张方向：`hoch` 为竖向，`quer` 为横向。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Orientation {
    Hoch,
    Quer,
}

impl Orientation {
    pub const ALL: [Orientation; 2] = [Orientation::Hoch, Orientation::Quer];

    pub fn as_str(self) -> &'static str {
        match self {
            Orientation::Hoch => "hoch",
            Orientation::Quer => "quer",
        }
    }
}

impl Default for Orientation {
    fn default() -> Self {
        Orientation::Hoch
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Orientation {
    type Err = ProjectionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "hoch" => Ok(Orientation::Hoch),
            "quer" => Ok(Orientation::Quer),
            other => Err(ProjectionError::UnknownValue {
                kind: "auslegung",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PaperFormat {
    A4,
    A3,
}

impl PaperFormat {
    pub const ALL: [PaperFormat; 2] = [PaperFormat::A4, PaperFormat::A3];

    /// 纸张尺寸（毫米，宽 × 高），随方向交换。
    pub fn size_mm(self, orientation: Orientation) -> (f64, f64) {
        let (short, long) = match self {
            PaperFormat::A4 => (210.0, 297.0),
            PaperFormat::A3 => (297.0, 420.0),
        };
        match orientation {
            Orientation::Hoch => (short, long),
            Orientation::Quer => (long, short),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PaperFormat::A4 => "A4",
            PaperFormat::A3 => "A3",
        }
    }
}

impl Default for PaperFormat {
    fn default() -> Self {
        PaperFormat::A3
    }
}

impl fmt::Display for PaperFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaperFormat {
    type Err = ProjectionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "A4" => Ok(PaperFormat::A4),
            "A3" => Ok(PaperFormat::A3),
            other => Err(ProjectionError::UnknownValue {
                kind: "format",
                value: other.to_string(),
            }),
        }
    }
}

macro_rules! string_conversions {
    ($($ty:ty),*) => {
        $(
            impl TryFrom<String> for $ty {
                type Error = ProjectionError;

                fn try_from(value: String) -> Result<Self, Self::Error> {
                    value.parse()
                }
            }

            impl From<$ty> for String {
                fn from(value: $ty) -> Self {
                    value.to_string()
                }
            }
        )*
    };
}

string_conversions!(Scale, Orientation, PaperFormat);

/// 页面布局三元组（比例尺、方向、纸张）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PageLayout {
    pub massstab: Scale,
    pub auslegung: Orientation,
    pub format: PaperFormat,
}

impl PageLayout {
    pub fn new(massstab: Scale, auslegung: Orientation, format: PaperFormat) -> Self {
        Self {
            massstab,
            auslegung,
            format,
        }
    }

    /// 按布局换算地面范围（米）。
    pub fn extent(&self) -> Extent {
        compute_extent(self.format, self.auslegung, self.massstab)
    }
}

/// 平面图在文档坐标中的宽高（米）。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extent {
    pub width: f64,
    pub height: f64,
}

/// `(纸张尺寸 - 边距) × 比例尺 / 1000`。
pub fn compute_extent(format: PaperFormat, orientation: Orientation, scale: Scale) -> Extent {
    let (paper_width, paper_height) = format.size_mm(orientation);
    let factor = f64::from(scale.denominator()) / 1000.0;
    Extent {
        width: (paper_width - PRINT_MARGIN_MM) * factor,
        height: (paper_height - PRINT_MARGIN_MM) * factor,
    }
}

/// 文本形式为 `"left top width height"` 的矩形。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Region {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl Region {
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    #[inline]
    pub fn origin(&self) -> Point2 {
        Point2::new(self.left, self.top)
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {} {}", self.left, self.top, self.width, self.height)
    }
}

impl FromStr for Region {
    type Err = ProjectionError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let values = text
            .split_whitespace()
            .map(str::parse::<f64>)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| ProjectionError::InvalidRegion(text.to_string()))?;
        let [left, top, width, height] = values[..] else {
            return Err(ProjectionError::InvalidRegion(text.to_string()));
        };
        Ok(Self::new(left, top, width, height))
    }
}

impl TryFrom<String> for Region {
    type Error = ProjectionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Region> for String {
    fn from(value: Region) -> Self {
        value.to_string()
    }
}

/// 单个平面图的投影：文档坐标原点、布局和数据基准。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    left: f64,
    top: f64,
    extent: Extent,
    layout: PageLayout,
    datum: Datum,
}

impl Projection {
    pub fn new(origin: Point2, layout: PageLayout, datum: Datum) -> Self {
        Self {
            left: origin.x(),
            top: origin.y(),
            extent: layout.extent(),
            layout,
            datum,
        }
    }

    /// 由计划记录构造。坐标缺失时使用基准的默认原点，布局字段为空时取默认值。
    pub fn from_attribute_record(
        record: &AttributeRecord,
        datum: Datum,
    ) -> Result<Self, ProjectionError> {
        let layout = PageLayout {
            massstab: layout_field(record, plan_columns::MASSSTAB)?,
            auslegung: layout_field(record, plan_columns::AUSLEGUNG)?,
            format: layout_field(record, plan_columns::FORMAT)?,
        };
        let survey = match (
            record.number(plan_columns::X)?,
            record.number(plan_columns::Y)?,
        ) {
            (Some(x), Some(y)) => Point2::new(x, y),
            _ => datum.fallback_origin(),
        };
        let mut projection = Self::new(Point2::new(0.0, 0.0), layout, datum);
        projection.set_origin_survey(survey);
        Ok(projection)
    }

    /// 由持久化的区域串构造。宽高总是按布局重新计算，存档中的宽高被忽略。
    pub fn from_persisted_region(
        region: &str,
        layout: PageLayout,
        datum: Datum,
    ) -> Result<Self, ProjectionError> {
        let region: Region = region.parse()?;
        Ok(Self::new(region.origin(), layout, datum))
    }

    #[inline]
    pub fn origin(&self) -> Point2 {
        Point2::new(self.left, self.top)
    }

    #[inline]
    pub fn extent(&self) -> Extent {
        self.extent
    }

    #[inline]
    pub fn layout(&self) -> PageLayout {
        self.layout
    }

    #[inline]
    pub fn datum(&self) -> Datum {
        self.datum
    }

    /// 更换布局，原点不变，范围重新计算。
    pub fn set_layout(&mut self, layout: PageLayout) {
        self.layout = layout;
        self.extent = layout.extent();
    }

    #[inline]
    pub fn set_origin(&mut self, origin: Point2) {
        self.left = origin.x();
        self.top = origin.y();
    }

    pub fn set_origin_survey(&mut self, survey: Point2) {
        self.left = survey.x();
        self.top = self.survey_to_doc_y(survey.y());
    }

    #[inline]
    pub fn translate(&mut self, offset: Vector2) {
        self.left += offset.x();
        self.top += offset.y();
    }

    #[inline]
    pub fn survey_to_doc_y(&self, y: f64) -> f64 {
        self.datum.upper_y() - y
    }

    #[inline]
    pub fn doc_y_to_survey(&self, y: f64) -> f64 {
        self.datum.upper_y() - y
    }

    /// 原点的测量坐标。
    pub fn origin_survey(&self) -> Point2 {
        Point2::new(self.left, self.doc_y_to_survey(self.top))
    }

    /// 测量坐标 → 以本投影原点为零点的视口坐标。
    pub fn to_local_viewport(&self, survey: Point2) -> Point2 {
        Point2::new(survey.x() - self.left, self.survey_to_doc_y(survey.y()) - self.top)
    }

    pub fn from_local_viewport(&self, local: Point2) -> Point2 {
        Point2::new(local.x() + self.left, self.doc_y_to_survey(local.y() + self.top))
    }

    pub fn region(&self) -> Region {
        Region::new(self.left, self.top, self.extent.width, self.extent.height)
    }

    /// 相对基准平面图原点的视口区域，宽高不变。
    pub fn viewbox(&self, ground: &Projection) -> Region {
        Region::new(
            self.left - ground.left,
            self.top - ground.top,
            self.extent.width,
            self.extent.height,
        )
    }

    /// 本投影的范围能否容纳 `other`（只比较尺寸）。
    pub fn can_fit(&self, other: &Projection) -> bool {
        other.extent.width <= self.extent.width && other.extent.height <= self.extent.height
    }

    /// 把原点夹回 `container` 内部。若本投影比容器大，原点落在容器上界减去自身尺寸处。
    pub fn fit(&mut self, container: &Projection) {
        self.left = self
            .left
            .max(container.left)
            .min(container.left + container.extent.width - self.extent.width);
        self.top = self
            .top
            .max(container.top)
            .min(container.top + container.extent.height - self.extent.height);
    }

    /// 越界（含边界）的视口坐标分量被替换为范围中点，另一分量保持不变。
    pub fn center_object(&self, position: Point2) -> Point2 {
        let x = if position.x() <= 0.0 || position.x() >= self.extent.width {
            self.extent.width / 2.0
        } else {
            position.x()
        };
        let y = if position.y() <= 0.0 || position.y() >= self.extent.height {
            self.extent.height / 2.0
        } else {
            position.y()
        };
        Point2::new(x, y)
    }

    /// 通过协作者把原点换算到另一基准，之后所有换算都使用新基准。
    pub fn convert_datum(
        &mut self,
        transform: &dyn GeodeticTransform,
        target: Datum,
    ) -> Result<(), GeodeticTransformError> {
        if self.datum == target {
            return Ok(());
        }
        let converted = transform.transform(self.origin_survey(), self.datum, target)?;
        self.datum = target;
        self.set_origin_survey(converted);
        Ok(())
    }
}

fn layout_field<T>(record: &AttributeRecord, column: usize) -> Result<T, ProjectionError>
where
    T: FromStr<Err = ProjectionError> + Default,
{
    let raw = record.require(column)?.trim();
    if raw.is_empty() {
        return Ok(T::default());
    }
    raw.parse::<T>()
        .map_err(|_| ProjectionError::Malformed(record.invalid_value(column, raw)))
}
