//! 图框（Plankopf）层：每个平面图一个图框，位置相对基准图原点。

use std::sync::Arc;

use geopos_catalog::StaticCatalog;
use geopos_catalog::symbol::{SymbolDefinition, title_block_key};
use geopos_core::document::{
    PlanDocument, PlanId, TitleBlock, TitleBlockPosition, TitleBlockSettings, TitleBlockText,
};
use geopos_core::geometry::{Point2, Transform};
use geopos_core::projection::{Orientation, PageLayout, Projection};
use tracing::{debug, warn};

use crate::errors::EngineError;
use crate::node::{DisplayMode, NodeInfo};
use crate::plan_projection;

const NODE_TEXT_LIMIT: usize = 45;

/// 按显示模式生成图框文字。`Knotenmappe` 隐藏打印日期和编辑信息。
pub fn title_text(plan: PlanId, layout: PageLayout, node: &NodeInfo) -> TitleBlockText {
    let stamp = node.stamp(plan);
    let druckdatum = match node.mode {
        DisplayMode::Knotenmappe => None,
        DisplayMode::Drucken => Some(format!("Druckdatum: {} ({})", node.print_time, node.user)),
        DisplayMode::Anzeigen | DisplayMode::Bearbeiten => Some(format!(
            "Druckdatum: {} ({})",
            node.opened_at.format("%d.%m.%Y %H:%M:%S"),
            node.user
        )),
    };
    let bearbeitung = (node.mode != DisplayMode::Knotenmappe).then(|| {
        format!(
            "Version: {} / {} ({})",
            node.version, stamp.edited_on, stamp.editor
        )
    });
    let status = match node.mode {
        DisplayMode::Knotenmappe => {
            format!("Knotenmappe: {} - {}", node.version, node.folder_date)
        }
        _ => format!("Status: {}", node.status),
    };
    TitleBlockText {
        plan: format!("{} 1 : {} / {}", plan.title(), layout.massstab, layout.format),
        knoten: node_text(node),
        druckdatum,
        bearbeitung,
        status,
    }
}

fn node_text(node: &NodeInfo) -> String {
    let text = format!("K{} {}", node.number, node.name);
    if text.chars().count() > NODE_TEXT_LIMIT {
        let cut: String = text.chars().take(NODE_TEXT_LIMIT).collect();
        format!("{cut} ...")
    } else {
        text
    }
}

/// 图框矩阵。位置是符号中心，横排时偏移半宽半高，竖排时宽高互换。
pub fn placement(
    settings: TitleBlockSettings,
    symbol: &SymbolDefinition,
    plan: &Projection,
    ground: &Projection,
) -> Transform {
    let region = plan.viewbox(ground);
    let (half_x, half_y) = match settings.auslegung {
        Orientation::Quer => (symbol.width / 2.0, symbol.height / 2.0),
        Orientation::Hoch => (symbol.height / 2.0, symbol.width / 2.0),
    };
    let x = if settings.position.is_right() {
        region.left + region.width - half_x
    } else {
        region.left + half_x
    };
    let y = if settings.position.is_bottom() {
        region.top + region.height - half_y
    } else {
        region.top + half_y
    };
    let center = Point2::new(x, y);
    match settings.auslegung {
        Orientation::Quer => Transform::translation(center),
        Orientation::Hoch => Transform::upright(center),
    }
}

pub struct TitleBlockLayer<'a> {
    catalog: &'a StaticCatalog,
    node: &'a NodeInfo,
}

impl<'a> TitleBlockLayer<'a> {
    pub fn new(catalog: &'a StaticCatalog, node: &'a NodeInfo) -> Self {
        Self { catalog, node }
    }

    fn symbol(&self, layout: PageLayout) -> Arc<SymbolDefinition> {
        match self.catalog.title_block(layout.format, layout.massstab) {
            Some(symbol) => symbol,
            None => {
                warn!(
                    symbol = %title_block_key(layout.format, layout.massstab),
                    "图框符号缺失，使用占位符号"
                );
                self.catalog.unknown()
            }
        }
    }

    fn build(&self, document: &PlanDocument, plan: PlanId) -> Result<TitleBlock, EngineError> {
        let datum = self.node.datum;
        let node = document.plan(plan).ok_or(EngineError::PlanNotFound(plan))?;
        let projection = node.projection(datum);
        let ground = plan_projection(document, PlanId::Lageplan, datum)?;
        let symbol = self.symbol(node.layout);
        Ok(TitleBlock {
            plan,
            hidden: true,
            transform: placement(node.title_block, &symbol, &projection, &ground),
            symbol_id: symbol.id.clone(),
            body: symbol.render(None),
            text: title_text(plan, node.layout, self.node),
            revision: TitleBlock::REVISION,
        })
    }

    /// 打开文档时调用：缺失的图框以隐藏状态创建，旧格式的图框重新生成，文字总是刷新。
    /// 返回新建图框的平面图。
    pub fn ensure(&self, document: &mut PlanDocument) -> Result<Vec<PlanId>, EngineError> {
        let plans: Vec<PlanId> = document.plans().iter().map(|node| node.id).collect();
        let mut created = Vec::new();
        for plan in plans {
            match document.title_block(plan).map(|block| (block.revision, block.hidden)) {
                None => {
                    let block = self.build(document, plan)?;
                    document.upsert_title_block(block);
                    created.push(plan);
                }
                Some((revision, hidden)) if revision < TitleBlock::REVISION => {
                    debug!(plan = %plan, revision, "图框格式过旧，重新生成");
                    let mut block = self.build(document, plan)?;
                    block.hidden = hidden;
                    document.upsert_title_block(block);
                }
                Some(_) => {
                    let layout = document
                        .plan(plan)
                        .map(|node| node.layout)
                        .ok_or(EngineError::PlanNotFound(plan))?;
                    let text = title_text(plan, layout, self.node);
                    if let Some(block) = document.title_block_mut(plan) {
                        block.text = text;
                    }
                }
            }
        }
        Ok(created)
    }

    /// 按当前布局重新生成图框，保留显示状态。
    pub fn rebuild(
        &self,
        document: &mut PlanDocument,
        plan: PlanId,
    ) -> Result<TitleBlock, EngineError> {
        let mut block = self.build(document, plan)?;
        if let Some(existing) = document.title_block(plan) {
            block.hidden = existing.hidden;
        }
        document.upsert_title_block(block.clone());
        Ok(block)
    }

    /// 更改图框所在角和方向，配置写回平面图节点。
    pub fn change_position(
        &self,
        document: &mut PlanDocument,
        plan: PlanId,
        position: TitleBlockPosition,
        auslegung: Orientation,
    ) -> Result<Transform, EngineError> {
        let node = document
            .plan_mut(plan)
            .ok_or(EngineError::PlanNotFound(plan))?;
        node.title_block = TitleBlockSettings {
            position,
            auslegung,
        };
        let settings = node.title_block;
        let datum = self.node.datum;
        let projection = node.projection(datum);
        let ground = plan_projection(document, PlanId::Lageplan, datum)?;
        let Some(block) = document.title_block_mut(plan) else {
            return Ok(self.rebuild(document, plan)?.transform);
        };
        let symbol = self
            .catalog
            .lookup(&block.symbol_id)
            .unwrap_or_else(|| self.catalog.unknown());
        block.transform = placement(settings, &symbol, &projection, &ground);
        Ok(block.transform)
    }

    /// 图框旋转 180°。
    pub fn invert(&self, document: &mut PlanDocument, plan: PlanId) -> Result<Transform, EngineError> {
        let block = document
            .title_block_mut(plan)
            .ok_or(EngineError::TitleBlockNotFound(plan))?;
        block.transform = block.transform.inverted();
        Ok(block.transform)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use geopos_core::projection::{PaperFormat, Scale};

    fn symbol() -> SymbolDefinition {
        SymbolDefinition::new("103A3500", 60.0, 20.0, "")
    }

    #[test]
    fn text_follows_display_mode() {
        let mut node = node_info();
        let layout = PageLayout::new(Scale::S500, Orientation::Quer, PaperFormat::A3);
        let text = title_text(PlanId::Ampelplan, layout, &node);
        assert_eq!(text.plan, "Ampelplan 1 : 500 / A3");
        assert_eq!(text.knoten, "K211 Bahnhofplatz");
        assert_eq!(text.druckdatum.as_deref(), Some("Druckdatum: 05.03.2024 14:07:09 (jdoe)"));
        assert_eq!(text.bearbeitung.as_deref(), Some("Version: 7 / 01.02.24 (mmuster)"));
        assert_eq!(text.status, "Status: Entwurf");

        node.mode = DisplayMode::Knotenmappe;
        let text = title_text(PlanId::Ampelplan, layout, &node);
        assert!(text.druckdatum.is_none());
        assert!(text.bearbeitung.is_none());
        assert_eq!(text.status, "Knotenmappe: 7 - 12.01.2024");

        node.mode = DisplayMode::Drucken;
        let text = title_text(PlanId::Ampelplan, layout, &node);
        assert_eq!(text.druckdatum.as_deref(), Some("Druckdatum: 04.03.2024 10:00:00 (jdoe)"));
    }

    #[test]
    fn long_node_names_are_cut() {
        let mut node = node_info();
        node.name = "Kreuzung Hauptstrasse / Bahnhofstrasse / Seestrasse Nord".to_string();
        let text = title_text(PlanId::Lageplan, PageLayout::default(), &node);
        assert!(text.knoten.ends_with(" ..."));
        assert_eq!(text.knoten.chars().count(), NODE_TEXT_LIMIT + 4);
    }

    #[test]
    fn corners_offset_by_half_symbol() {
        let ground = ground();
        let extent = ground.extent();
        let top_left = placement(TitleBlockSettings::default(), &symbol(), &ground, &ground);
        assert!((top_left.e - 30.0).abs() < 1e-9);
        assert!((top_left.f - 10.0).abs() < 1e-9);
        assert_eq!(top_left.a, 1.0);

        let settings = TitleBlockSettings {
            position: TitleBlockPosition::UntenRechts,
            auslegung: Orientation::Hoch,
        };
        let bottom_right = placement(settings, &symbol(), &ground, &ground);
        assert!((bottom_right.e - (extent.width - 10.0)).abs() < 1e-9);
        assert!((bottom_right.f - (extent.height - 30.0)).abs() < 1e-9);
        assert_eq!(bottom_right.b, -1.0);
    }

    #[test]
    fn placement_is_relative_to_ground_origin() {
        let ground = ground();
        let mut plan = ground;
        plan.translate(geopos_core::geometry::Vector2::new(5.0, 7.0));
        let transform = placement(TitleBlockSettings::default(), &symbol(), &plan, &ground);
        assert!((transform.e - 35.0).abs() < 1e-9);
        assert!((transform.f - 17.0).abs() < 1e-9);
    }

    #[test]
    fn ensure_creates_hidden_blocks_and_upgrades_old_ones() {
        let catalog = static_catalog();
        let node = node_info();
        let layer = TitleBlockLayer::new(&catalog, &node);
        let mut document = plan_document();

        let created = layer.ensure(&mut document).expect("生成图框");
        assert_eq!(created.len(), 5);
        let block = document.title_block(PlanId::Spurenplan).expect("图框");
        assert!(block.hidden);
        assert_eq!(block.symbol_id, "103A3500");

        if let Some(block) = document.title_block_mut(PlanId::Spurenplan) {
            block.revision = 1;
            block.hidden = false;
            block.symbol_id = "alt".to_string();
        }
        assert!(layer.ensure(&mut document).expect("再次检查").is_empty());
        let block = document.title_block(PlanId::Spurenplan).expect("图框");
        assert_eq!(block.revision, TitleBlock::REVISION);
        assert_eq!(block.symbol_id, "103A3500");
        assert!(!block.hidden);
    }

    #[test]
    fn position_change_is_persisted_and_invert_round_trips() {
        let catalog = static_catalog();
        let node = node_info();
        let layer = TitleBlockLayer::new(&catalog, &node);
        let mut document = plan_document();
        layer.ensure(&mut document).expect("生成图框");

        let transform = layer
            .change_position(
                &mut document,
                PlanId::Vvaplan,
                TitleBlockPosition::ObenRechts,
                Orientation::Quer,
            )
            .expect("移动图框");
        let width = ground().extent().width;
        assert!((transform.e - (width - 30.0)).abs() < 1e-9);
        let settings = document.plan(PlanId::Vvaplan).expect("平面图").title_block;
        assert_eq!(settings.position, TitleBlockPosition::ObenRechts);

        let inverted = layer.invert(&mut document, PlanId::Vvaplan).expect("翻转");
        assert_eq!(inverted.a, -1.0);
        let restored = layer.invert(&mut document, PlanId::Vvaplan).expect("翻转");
        assert_eq!(restored, transform);
    }

    #[test]
    fn missing_title_symbol_uses_sentinel() {
        let catalog = StaticCatalog::empty();
        let node = node_info();
        let layer = TitleBlockLayer::new(&catalog, &node);
        let mut document = plan_document();
        let block = layer.rebuild(&mut document, PlanId::Lageplan).expect("生成图框");
        assert_eq!(block.symbol_id, geopos_catalog::symbol::well_known::UNKNOWN);
    }
}
