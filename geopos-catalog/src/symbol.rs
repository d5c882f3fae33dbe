use geopos_core::geometry::Point2;
use geopos_core::projection::{PaperFormat, Scale};
use quick_xml::escape::escape;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use tracing::warn;

/// 固定符号 id。
pub mod well_known {
    pub const UNKNOWN: &str = "0";
    pub const NORDPFEIL: &str = "101";
    pub const MASSSTAB: &str = "102";
    pub const PLANKOPF: &str = "103";
    pub const KNOTENMITTE: &str = "110";
}

/// 动态符号模板中的占位符。
pub mod tokens {
    pub const DATAPOINT: &str = "DPID";
    pub const NODE_NUMBER: &str = "KNOTENNR";
    pub const OBJECT_NUMBER: &str = "OBJEKTNR";
}

const LABEL_FIELD: &str = "textfeld";
const GROUP: &str = "g";

/// 一个符号定义：几何正文、视框尺寸和放置中心。
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolDefinition {
    pub id: String,
    pub width: f64,
    pub height: f64,
    /// 放置点在符号自身坐标中的位置。
    pub center: Point2,
    pub body: String,
    /// 动态符号的遥测配置模板。
    pub telemetry: Option<String>,
}

impl SymbolDefinition {
    pub fn new(id: impl Into<String>, width: f64, height: f64, body: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            width,
            height,
            center: Point2::new(width / 2.0, height / 2.0),
            body: body.into(),
            telemetry: None,
        }
    }

    pub fn with_center(mut self, center: Point2) -> Self {
        self.center = center;
        self
    }

    pub fn with_telemetry(mut self, template: impl Into<String>) -> Self {
        self.telemetry = Some(template.into());
        self
    }

    /// 目录中找不到符号时使用的占位符号。
    pub fn unknown_sentinel() -> Self {
        Self::new(
            well_known::UNKNOWN,
            10.0,
            10.0,
            "<rect width=\"10\" height=\"10\" class=\"unknown\"/>",
        )
    }

    /// 文件名前缀中的数字（`358_ampel` → 358）。
    pub fn numeric_prefix(&self) -> Option<u32> {
        self.id.split('_').next().and_then(|head| head.parse().ok())
    }

    /// 实例化正文：以中心为原点平移，并写入标签文字。
    pub fn render(&self, label: Option<&str>) -> String {
        match self.wrap(|writer| write_labelled(writer, &self.body, label)) {
            Ok(rendered) => rendered,
            Err(err) => {
                warn!(symbol = %self.id, error = %err, "符号正文不是合法 XML，标签未写入");
                self.wrap(|writer| {
                    writer.get_mut().extend_from_slice(self.body.as_bytes());
                    Ok(())
                })
                .unwrap_or_else(|_| self.body.clone())
            }
        }
    }

    fn wrap<F>(&self, body: F) -> Result<String, quick_xml::Error>
    where
        F: FnOnce(&mut Writer<Vec<u8>>) -> Result<(), quick_xml::Error>,
    {
        let offset = format!("translate({} {})", -self.center.x(), -self.center.y());
        let mut writer = Writer::new(Vec::new());
        writer
            .write_event(Event::Start(
                BytesStart::new(GROUP).with_attributes([("transform", offset.as_str())]),
            ))
            .map_err(quick_xml::Error::from)?;
        body(&mut writer)?;
        writer
            .write_event(Event::End(BytesEnd::new(GROUP)))
            .map_err(quick_xml::Error::from)?;
        Ok(String::from_utf8_lossy(&writer.into_inner()).into_owned())
    }

    /// 对正文和遥测模板做占位符替换，替换值按 XML 转义。
    pub fn bind(&self, values: &[(&str, &str)]) -> Self {
        let mut bound = self.clone();
        bound.body = substitute(&self.body, values);
        bound.telemetry = self
            .telemetry
            .as_deref()
            .map(|template| substitute(template, values));
        bound
    }
}

fn substitute(text: &str, values: &[(&str, &str)]) -> String {
    values.iter().fold(text.to_string(), |acc, (token, value)| {
        acc.replace(token, &escape(*value))
    })
}

fn is_label_field(element: &BytesStart) -> bool {
    element.local_name().as_ref() == b"text"
        && element
            .attributes()
            .filter_map(|attribute| attribute.ok())
            .any(|attribute| {
                attribute.key.as_ref() == b"id" && attribute.value.as_ref() == LABEL_FIELD.as_bytes()
            })
}

/// 逐事件复制正文；`textfeld` 元素的内容换成标签。
fn write_labelled(
    writer: &mut Writer<Vec<u8>>,
    body: &str,
    label: Option<&str>,
) -> Result<(), quick_xml::Error> {
    let mut reader = Reader::from_str(body);
    // 正在替换的文字元素内部嵌套层数
    let mut inside: Option<usize> = None;
    loop {
        let event = reader.read_event()?;
        if let Some(level) = inside.as_mut() {
            match event {
                Event::Start(_) => *level += 1,
                Event::End(end) if *level == 0 => {
                    inside = None;
                    writer.write_event(Event::End(end)).map_err(quick_xml::Error::from)?;
                }
                Event::End(_) => *level -= 1,
                Event::Eof => break,
                _ => {}
            }
            continue;
        }
        match (event, label) {
            (Event::Eof, _) => break,
            (Event::Start(start), Some(text)) if is_label_field(&start) => {
                writer.write_event(Event::Start(start)).map_err(quick_xml::Error::from)?;
                writer
                    .write_event(Event::Text(BytesText::from_escaped(escape(text))))
                    .map_err(quick_xml::Error::from)?;
                inside = Some(0);
            }
            (event, _) => writer.write_event(event).map_err(quick_xml::Error::from)?,
        }
    }
    Ok(())
}

/// 单字符的 6 或 9 旋转后难以区分，补一个点。
pub fn normalize_label(text: &str) -> String {
    if text.chars().count() == 1 && (text.ends_with('6') || text.ends_with('9')) {
        format!("{text}.")
    } else {
        text.to_string()
    }
}

/// 图框符号 id：`103` + 纸张 + 比例尺，例如 `103A3500`。
pub fn title_block_key(format: PaperFormat, massstab: Scale) -> String {
    format!("{}{}{}", well_known::PLANKOPF, format, massstab)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_is_written_into_text_field() {
        let symbol = SymbolDefinition::new(
            "210",
            20.0,
            10.0,
            "<path d=\"M0 0\"/><text id=\"textfeld\" x=\"1\">?</text>",
        );
        let rendered = symbol.render(Some("12"));
        assert!(rendered.contains("<text id=\"textfeld\" x=\"1\">12</text>"));
        assert!(rendered.starts_with("<g transform=\"translate(-10 -5)\">"));
    }

    #[test]
    fn body_without_text_field_is_unchanged() {
        let symbol = SymbolDefinition::new("1", 4.0, 4.0, "<circle r=\"2\"/>");
        assert!(symbol.render(Some("x")).contains("<circle r=\"2\"/>"));
    }

    #[test]
    fn label_markup_is_escaped_and_nested_content_replaced() {
        let symbol = SymbolDefinition::new(
            "210",
            2.0,
            2.0,
            "<text id=\"textfeld\"><tspan>alt</tspan></text><text id=\"andere\">b</text>",
        );
        let rendered = symbol.render(Some("<1&2>"));
        assert!(rendered.contains("<text id=\"textfeld\">&lt;1&amp;2&gt;</text>"));
        assert!(!rendered.contains("tspan"));
        assert!(rendered.contains("<text id=\"andere\">b</text>"));
        assert!(rendered.ends_with("</g>"));
    }

    #[test]
    fn malformed_body_is_kept_verbatim() {
        let symbol = SymbolDefinition::new("1", 2.0, 2.0, "<g><text id=\"textfeld\">1</g>");
        let rendered = symbol.render(Some("2"));
        assert_eq!(
            rendered,
            "<g transform=\"translate(-1 -1)\"><g><text id=\"textfeld\">1</g></g>"
        );
    }

    #[test]
    fn bound_values_are_escaped() {
        let symbol = SymbolDefinition::new("sg", 1.0, 1.0, "<g/>")
            .with_telemetry("<Item dp=\"DPID\"/>");
        let bound = symbol.bind(&[(tokens::DATAPOINT, "K1&2\"x")]);
        assert_eq!(
            bound.telemetry.as_deref(),
            Some("<Item dp=\"K1&amp;2&quot;x\"/>")
        );
    }

    #[test]
    fn label_normalization_marks_six_and_nine() {
        assert_eq!(normalize_label("6"), "6.");
        assert_eq!(normalize_label("9"), "9.");
        assert_eq!(normalize_label("16"), "16");
        assert_eq!(normalize_label("7"), "7");
    }

    #[test]
    fn bind_replaces_tokens_in_body_and_template() {
        let symbol = SymbolDefinition::new("sg", 1.0, 1.0, "<g data-dp=\"DPID\"/>")
            .with_telemetry("<Item dp=\"DPID\" node=\"KNOTENNR\" obj=\"OBJEKTNR\"/>");
        let bound = symbol.bind(&[
            (tokens::DATAPOINT, "K12.R.B.sg3"),
            (tokens::NODE_NUMBER, "12"),
            (tokens::OBJECT_NUMBER, "3"),
        ]);
        assert_eq!(bound.body, "<g data-dp=\"K12.R.B.sg3\"/>");
        assert_eq!(
            bound.telemetry.as_deref(),
            Some("<Item dp=\"K12.R.B.sg3\" node=\"12\" obj=\"3\"/>")
        );
    }

    #[test]
    fn title_block_key_combines_format_and_scale() {
        assert_eq!(title_block_key(PaperFormat::A3, Scale::S500), "103A3500");
    }

    #[test]
    fn numeric_prefix_reads_leading_digits() {
        let symbol = SymbolDefinition::new("500_19_SRZG", 1.0, 1.0, "");
        assert_eq!(symbol.numeric_prefix(), Some(500));
        let named = SymbolDefinition::new("kntvis_detektor", 1.0, 1.0, "");
        assert_eq!(named.numeric_prefix(), None);
    }
}
