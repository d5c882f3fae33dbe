//! 跨平面图的布局操作：比例尺/方向/纸张更改、平移、可选值计算和坐标基准换算。
//!
//! 基准图（LAGEPLAN）的更改级联到所有从属平面图；从属平面图的更改只影响自身，
//! 并被夹回基准图范围内。

use std::fmt;
use std::str::FromStr;

use geopos_catalog::StaticCatalog;
use geopos_core::document::{
    LAYER_DYNAMIC, Layer, PlanDocument, PlanId, TitleBlock, TitleBlockPosition,
};
use geopos_core::geometry::{Point2, Transform, Vector2};
use geopos_core::projection::{
    Datum, GeodeticTransform, Orientation, PageLayout, PaperFormat, Projection, Region, Scale,
};
use tracing::{debug, info};

use crate::errors::EngineError;
use crate::node::NodeInfo;
use crate::plan_projection;
use crate::static_layer::{CATEGORY_KNOTEN, KNOTENMITTE};
use crate::title_block::TitleBlockLayer;

/// 可单独更改的布局属性。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayoutAttribute {
    Massstab,
    Auslegung,
    Format,
}

impl LayoutAttribute {
    pub const ALL: [LayoutAttribute; 3] = [
        LayoutAttribute::Massstab,
        LayoutAttribute::Auslegung,
        LayoutAttribute::Format,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LayoutAttribute::Massstab => "massstab",
            LayoutAttribute::Auslegung => "auslegung",
            LayoutAttribute::Format => "format",
        }
    }

    /// 把字符串值写入布局。值非法时返回 `InvalidLayoutValue`。
    pub fn apply(self, layout: PageLayout, value: &str) -> Result<PageLayout, EngineError> {
        let invalid = |_| EngineError::InvalidLayoutValue {
            attribute: self.as_str().to_string(),
            value: value.to_string(),
        };
        let mut layout = layout;
        match self {
            LayoutAttribute::Massstab => layout.massstab = value.parse().map_err(invalid)?,
            LayoutAttribute::Auslegung => layout.auslegung = value.parse().map_err(invalid)?,
            LayoutAttribute::Format => layout.format = value.parse().map_err(invalid)?,
        }
        Ok(layout)
    }
}

impl fmt::Display for LayoutAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LayoutAttribute {
    type Err = EngineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let lowered = value.trim().to_ascii_lowercase();
        LayoutAttribute::ALL
            .into_iter()
            .find(|attribute| attribute.as_str() == lowered)
            .ok_or_else(|| EngineError::InvalidLayoutValue {
                attribute: "attribute".to_string(),
                value: value.to_string(),
            })
    }
}

/// 一个平面图在布局更改后的状态。
#[derive(Debug, Clone, PartialEq)]
pub struct PlanUpdate {
    pub plan: PlanId,
    pub region: Region,
    pub viewbox: Region,
    pub layout: PageLayout,
    pub title_block: Option<TitleBlock>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PositionChange {
    /// 实际位移（文档坐标），从属平面图被夹回后可能小于请求值。
    pub delta: Vector2,
    pub plans: Vec<PlanId>,
    /// 基准图移动后节点中心的视口位置。
    pub node_center: Option<Point2>,
    /// 从属平面图移动后其图框的矩阵；图框按请求位移移动。
    pub title_block: Option<Transform>,
}

/// 每个候选值是否能放进基准图。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeasibleValues {
    pub massstab: Vec<(Scale, bool)>,
    pub auslegung: Vec<(Orientation, bool)>,
    pub format: Vec<(PaperFormat, bool)>,
}

impl FeasibleValues {
    fn unrestricted() -> Self {
        Self {
            massstab: Scale::ALL.iter().map(|value| (*value, true)).collect(),
            auslegung: Orientation::ALL.iter().map(|value| (*value, true)).collect(),
            format: PaperFormat::ALL.iter().map(|value| (*value, true)).collect(),
        }
    }

    pub fn allows(&self, attribute: LayoutAttribute, value: &str) -> bool {
        let value = value.trim();
        match attribute {
            LayoutAttribute::Massstab => allowed(&self.massstab, value),
            LayoutAttribute::Auslegung => allowed(&self.auslegung, value),
            LayoutAttribute::Format => allowed(&self.format, value),
        }
    }
}

fn allowed<T: fmt::Display>(values: &[(T, bool)], value: &str) -> bool {
    values
        .iter()
        .any(|(candidate, fits)| *fits && candidate.to_string() == value)
}

/// 对每个候选比例尺、方向和纸张，判断换上后的平面图能否放进基准图。不修改任何状态。
pub fn find_feasible_values(plan: &Projection, ground: &Projection) -> FeasibleValues {
    let fits = |layout: PageLayout| {
        let mut candidate = *plan;
        candidate.set_layout(layout);
        ground.can_fit(&candidate)
    };
    let current = plan.layout();
    FeasibleValues {
        massstab: Scale::ALL
            .iter()
            .map(|&massstab| (massstab, fits(PageLayout { massstab, ..current })))
            .collect(),
        auslegung: Orientation::ALL
            .iter()
            .map(|&auslegung| (auslegung, fits(PageLayout { auslegung, ..current })))
            .collect(),
        format: PaperFormat::ALL
            .iter()
            .map(|&format| (format, fits(PageLayout { format, ..current })))
            .collect(),
    }
}

pub struct PlanLayoutController<'a> {
    titles: TitleBlockLayer<'a>,
    datum: Datum,
}

impl<'a> PlanLayoutController<'a> {
    pub fn new(catalog: &'a StaticCatalog, node: &'a NodeInfo) -> Self {
        Self {
            titles: TitleBlockLayer::new(catalog, node),
            datum: node.datum,
        }
    }

    fn update(
        &self,
        document: &PlanDocument,
        plan: PlanId,
        block: Option<TitleBlock>,
    ) -> Option<PlanUpdate> {
        document.plan(plan).map(|node| PlanUpdate {
            plan,
            region: node.region,
            viewbox: node.viewbox,
            layout: node.layout,
            title_block: block,
        })
    }

    /// 更改平面图的一个布局属性，返回所有受影响平面图的新状态。
    pub fn change_layout(
        &self,
        document: &mut PlanDocument,
        plan: PlanId,
        attribute: LayoutAttribute,
        value: &str,
    ) -> Result<Vec<PlanUpdate>, EngineError> {
        let ground = plan_projection(document, PlanId::Lageplan, self.datum)?;
        if plan.is_ground() {
            let layout = attribute.apply(ground.layout(), value)?;
            return self.cascade_layout(document, ground, layout);
        }

        let mut projection = plan_projection(document, plan, self.datum)?;
        projection.set_layout(attribute.apply(projection.layout(), value)?);
        projection.fit(&ground);
        document
            .plan_mut(plan)
            .ok_or(EngineError::PlanNotFound(plan))?
            .apply(&projection, &ground);
        let block = self.titles.rebuild(document, plan)?;
        info!(plan = %plan, %attribute, value, "平面图布局已更改");
        Ok(self.update(document, plan, Some(block)).into_iter().collect())
    }

    fn cascade_layout(
        &self,
        document: &mut PlanDocument,
        mut ground: Projection,
        layout: PageLayout,
    ) -> Result<Vec<PlanUpdate>, EngineError> {
        ground.set_layout(layout);
        let mut updated = Vec::new();
        let abort = |updated: &Vec<PlanId>, source: EngineError| EngineError::CascadeAborted {
            updated: updated.clone(),
            source: Box::new(source),
        };

        for plan in PlanId::ALL {
            let Some(node) = document.plan_mut(plan) else {
                return Err(abort(&updated, EngineError::PlanNotFound(plan)));
            };
            node.apply(&ground, &ground);
            updated.push(plan);
            debug!(plan = %plan, "级联布局");
        }
        if let Some(content) = document
            .layer_mut(LAYER_DYNAMIC)
            .and_then(Layer::as_dynamic_mut)
        {
            content.viewbox = Some(ground.viewbox(&ground));
        }

        let mut updates = Vec::with_capacity(PlanId::ALL.len());
        let mut rebuilt = Vec::new();
        for plan in PlanId::DEPENDENT.into_iter().chain([PlanId::Lageplan]) {
            let block = self
                .titles
                .rebuild(document, plan)
                .map_err(|err| abort(&rebuilt, err))?;
            rebuilt.push(plan);
            updates.extend(self.update(document, plan, Some(block)));
        }
        info!(
            massstab = %layout.massstab,
            auslegung = %layout.auslegung,
            format = %layout.format,
            "基准图布局已级联到所有平面图"
        );
        Ok(updates)
    }

    /// 把平面图原点移到 `origin`（文档坐标）。
    pub fn change_position(
        &self,
        document: &mut PlanDocument,
        plan: PlanId,
        origin: Point2,
    ) -> Result<PositionChange, EngineError> {
        if plan.is_ground() {
            return self.move_ground(document, origin);
        }
        let ground = plan_projection(document, PlanId::Lageplan, self.datum)?;
        let mut projection = plan_projection(document, plan, self.datum)?;
        let before = projection.origin();
        let requested = before.vector_to(origin);
        projection.set_origin(origin);
        projection.fit(&ground);
        let delta = before.vector_to(projection.origin());
        document
            .plan_mut(plan)
            .ok_or(EngineError::PlanNotFound(plan))?
            .apply(&projection, &ground);

        // 图框按请求位移移动，不受夹回影响
        let title_block = document.title_block_mut(plan).map(|block| {
            block.transform.translate(requested);
            block.transform
        });
        debug!(plan = %plan, dx = delta.x(), dy = delta.y(), "平面图已移动");
        Ok(PositionChange {
            delta,
            plans: vec![plan],
            node_center: None,
            title_block,
        })
    }

    fn move_ground(
        &self,
        document: &mut PlanDocument,
        origin: Point2,
    ) -> Result<PositionChange, EngineError> {
        let mut ground = plan_projection(document, PlanId::Lageplan, self.datum)?;
        let delta = ground.origin().vector_to(origin);
        ground.set_origin(origin);

        let mut plans = Vec::with_capacity(PlanId::ALL.len());
        for plan in PlanId::ALL {
            let Some(node) = document.plan_mut(plan) else {
                continue;
            };
            let projection = if plan.is_ground() {
                ground
            } else {
                let mut projection = node.projection(self.datum);
                projection.translate(delta);
                projection
            };
            node.apply(&projection, &ground);
            plans.push(plan);
        }

        if !delta.is_zero() {
            for object in document.objects_mut() {
                object.shift_against(delta);
            }
            for shape in document.shapes_mut() {
                shape.transform.translate(delta.negate());
            }
            if let Some(content) = document
                .layer_mut(LAYER_DYNAMIC)
                .and_then(Layer::as_dynamic_mut)
            {
                for instance in content.objects.iter_mut() {
                    instance.transform.translate(delta.negate());
                }
            }
        }

        let node_center = document
            .object_mut(CATEGORY_KNOTEN, KNOTENMITTE)
            .map(|center| {
                center.center_within(&ground);
                center.transform.position()
            });
        info!(dx = delta.x(), dy = delta.y(), "基准图已移动");
        Ok(PositionChange {
            delta,
            plans,
            node_center,
            title_block: None,
        })
    }

    /// 平面图的可选布局值。基准图不受限制。
    pub fn plan_limits(
        &self,
        document: &PlanDocument,
    ) -> Result<Vec<(PlanId, FeasibleValues)>, EngineError> {
        let ground = plan_projection(document, PlanId::Lageplan, self.datum)?;
        Ok(document
            .plans()
            .iter()
            .map(|node| {
                let values = if node.id.is_ground() {
                    FeasibleValues::unrestricted()
                } else {
                    find_feasible_values(&node.projection(self.datum), &ground)
                };
                (node.id, values)
            })
            .collect())
    }

    /// 更改图框位置和方向。
    pub fn change_title_block(
        &self,
        document: &mut PlanDocument,
        plan: PlanId,
        position: TitleBlockPosition,
        auslegung: Orientation,
    ) -> Result<Transform, EngineError> {
        self.titles
            .change_position(document, plan, position, auslegung)
    }

    pub fn invert_title_block(
        &self,
        document: &mut PlanDocument,
        plan: PlanId,
    ) -> Result<Transform, EngineError> {
        self.titles.invert(document, plan)
    }

    /// 所有平面图原点换算到 `target` 基准。先完成全部换算再写回，任一失败时文档不变。
    pub fn convert_datum(
        &self,
        document: &mut PlanDocument,
        transform: &dyn GeodeticTransform,
        target: Datum,
    ) -> Result<(), EngineError> {
        let mut converted = Vec::with_capacity(document.plans().len());
        for node in document.plans() {
            let mut projection = node.projection(self.datum);
            projection.convert_datum(transform, target)?;
            converted.push((node.id, projection));
        }
        let ground = converted
            .iter()
            .find(|(plan, _)| plan.is_ground())
            .map(|(_, projection)| *projection)
            .ok_or(EngineError::PlanNotFound(PlanId::Lageplan))?;
        for (plan, projection) in &converted {
            if let Some(node) = document.plan_mut(*plan) {
                node.apply(projection, &ground);
            }
        }
        info!(from = %self.datum, to = %target, plans = converted.len(), "坐标基准已换算");
        Ok(())
    }
}
