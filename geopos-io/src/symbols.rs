//! 磁盘上的符号库：静态符号、按组的动态符号和项目绘图板，加上 `symbol.cf` 规则表。

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use geopos_catalog::errors::CatalogError;
use geopos_catalog::symbol::well_known;
use geopos_catalog::{CatalogDefinitions, DefinitionSource, RuleTable, SymbolDefinition};
use geopos_core::geometry::Point2;
use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesStart, Event};
use tracing::{error, info, warn};
use walkdir::WalkDir;

const SVG: &str = "svg";
const TELEMETRY: &str = "xml";
const CENTER_MARKER: &str = "symbolcenter";

/// 符号库各部分的位置。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryLayout {
    pub static_dir: PathBuf,
    pub dynamic_dir: PathBuf,
    pub project_dir: PathBuf,
    /// `symbol.cf`，或扩展名为 `.toml` 的规则表。
    pub rules: PathBuf,
}

impl LibraryLayout {
    /// 相对路径以 `root` 为基准。
    pub fn resolve(&self, root: &Path) -> Self {
        Self {
            static_dir: root.join(&self.static_dir),
            dynamic_dir: root.join(&self.dynamic_dir),
            project_dir: root.join(&self.project_dir),
            rules: root.join(&self.rules),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SymbolLibrary {
    layout: LibraryLayout,
}

impl SymbolLibrary {
    pub fn new(layout: LibraryLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &LibraryLayout {
        &self.layout
    }

    fn load_rules(&self) -> Result<RuleTable, CatalogError> {
        let path = &self.layout.rules;
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "规则文件不存在，只使用默认置顶");
                return Ok(RuleTable::new(Vec::new(), RuleTable::standard_pins()));
            }
            Err(source) => {
                return Err(CatalogError::Io {
                    path: path.clone(),
                    source,
                });
            }
        };
        let text = String::from_utf8_lossy(&bytes);
        if path.extension().is_some_and(|ext| ext == "toml") {
            RuleTable::from_toml_str(&text)
        } else {
            RuleTable::parse_symbol_cf(&text)
        }
    }

    fn load_statics(&self) -> Vec<SymbolDefinition> {
        let mut symbols = Vec::new();
        for path in files_with_extension(&self.layout.static_dir, SVG) {
            let Some(id) = file_stem(&path).and_then(static_symbol_id) else {
                warn!(path = %path.display(), "无法从文件名得到符号 id，已跳过");
                continue;
            };
            match read_symbol(&id, &path, true) {
                Ok(symbol) => symbols.push(symbol),
                Err(err) => error!(path = %path.display(), error = %err, "静态符号解析失败"),
            }
        }
        symbols
    }

    fn load_dynamic_groups(&self) -> Vec<(String, Vec<SymbolDefinition>)> {
        let mut groups = Vec::new();
        for dir in group_dirs(&self.layout.dynamic_dir) {
            let Some(name) = group_name(&dir) else {
                warn!(path = %dir.display(), "目录名不是 <n>_<组名>，已跳过");
                continue;
            };
            let mut symbols = Vec::new();
            for path in files_with_extension(&dir, SVG) {
                let Some(id) = file_stem(&path) else {
                    continue;
                };
                match read_dynamic_symbol(id, &path) {
                    Ok(symbol) => symbols.push(symbol),
                    Err(err) => error!(path = %path.display(), error = %err, "动态符号解析失败"),
                }
            }
            groups.push((name, symbols));
        }
        groups
    }

    fn load_project_groups(&self) -> Vec<(String, Vec<SymbolDefinition>)> {
        let mut groups = Vec::new();
        for dir in group_dirs(&self.layout.project_dir) {
            let Some(name) = group_name(&dir) else {
                warn!(path = %dir.display(), "目录名不是 <n>_<组名>，已跳过");
                continue;
            };
            let mut symbols = Vec::new();
            for path in files_with_extension(&dir, SVG) {
                let Some(id) = file_stem(&path).and_then(|stem| stem.split('_').next()) else {
                    continue;
                };
                match read_symbol(id, &path, false) {
                    Ok(symbol) => symbols.push(symbol),
                    Err(err) => error!(path = %path.display(), error = %err, "项目符号解析失败"),
                }
            }
            groups.push((name, symbols));
        }
        groups
    }
}

impl DefinitionSource for SymbolLibrary {
    fn stamp(&self) -> Result<Option<SystemTime>, CatalogError> {
        let path = &self.layout.rules;
        match fs::metadata(path) {
            Ok(metadata) => Ok(metadata.modified().ok()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(CatalogError::Io {
                path: path.clone(),
                source,
            }),
        }
    }

    fn load(&self) -> Result<CatalogDefinitions, CatalogError> {
        let stamp = self.stamp()?;
        let rules = self.load_rules()?;
        let definitions = CatalogDefinitions {
            static_symbols: self.load_statics(),
            rules,
            dynamic_groups: self.load_dynamic_groups(),
            project_groups: self.load_project_groups(),
            stamp,
        };
        info!(
            statics = definitions.static_symbols.len(),
            rules = definitions.rules.rules().len(),
            dynamic_groups = definitions.dynamic_groups.len(),
            project_groups = definitions.project_groups.len(),
            "符号库已加载"
        );
        Ok(definitions)
    }
}

/// 静态符号 id 取文件名第一段；图框符号追加最后两段（格式、比例）。
fn static_symbol_id(stem: &str) -> Option<String> {
    let parts: Vec<&str> = stem.split('_').collect();
    let head = parts.first().copied().filter(|head| !head.is_empty())?;
    if head != well_known::PLANKOPF {
        return Some(head.to_string());
    }
    match parts.as_slice() {
        [_, .., format, massstab] => Some(format!("{head}{format}{massstab}")),
        _ => None,
    }
}

fn file_stem(path: &Path) -> Option<&str> {
    path.file_stem().and_then(|stem| stem.to_str())
}

/// `12_Signalgruppen` → `Signalgruppen`。
fn group_name(dir: &Path) -> Option<String> {
    let name = dir.file_name()?.to_str()?;
    name.split('_')
        .nth(1)
        .filter(|group| !group.is_empty())
        .map(str::to_string)
}

fn group_dirs(root: &Path) -> Vec<PathBuf> {
    entries(root)
        .into_iter()
        .filter(|path| path.is_dir())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| !name.starts_with('.'))
        })
        .collect()
}

fn files_with_extension(dir: &Path, extension: &str) -> Vec<PathBuf> {
    entries(dir)
        .into_iter()
        .filter(|path| path.is_file())
        .filter(|path| path.extension().is_some_and(|ext| ext == extension))
        .collect()
}

/// 目录的直接子项，按文件名排序。
fn entries(dir: &Path) -> Vec<PathBuf> {
    if !dir.is_dir() {
        warn!(path = %dir.display(), "符号目录不存在");
        return Vec::new();
    }
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry.into_path()),
            Err(err) => {
                warn!(path = %dir.display(), error = %err, "读取符号目录项失败");
                None
            }
        })
        .collect()
}

fn read_text(path: &Path) -> Result<String, CatalogError> {
    fs::read_to_string(path).map_err(|source| CatalogError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn read_symbol(id: &str, path: &Path, use_marker: bool) -> Result<SymbolDefinition, CatalogError> {
    let svg = parse_svg(&read_text(path)?).map_err(|message| CatalogError::InvalidSymbol {
        id: id.to_string(),
        message,
    })?;
    let symbol = SymbolDefinition::new(id, svg.width, svg.height, svg.body);
    Ok(match svg.center {
        Some(center) if use_marker => symbol.with_center(center),
        _ => symbol,
    })
}

fn read_dynamic_symbol(id: &str, path: &Path) -> Result<SymbolDefinition, CatalogError> {
    let telemetry = read_text(&path.with_extension(TELEMETRY))?;
    Ok(read_symbol(id, path, true)?.with_telemetry(telemetry))
}

#[derive(Debug, Clone, PartialEq)]
struct ParsedSvg {
    width: f64,
    height: f64,
    center: Option<Point2>,
    body: String,
}

fn attribute(element: &BytesStart, name: &[u8]) -> Option<String> {
    element
        .attributes()
        .filter_map(|a| a.ok())
        .find(|a| a.key.as_ref() == name)
        .map(|a| String::from_utf8_lossy(&a.value).to_string())
}

fn number(element: &BytesStart, name: &str) -> Result<f64, String> {
    let text = attribute(element, name.as_bytes()).ok_or_else(|| format!("缺少属性 {name}"))?;
    text.trim()
        .parse()
        .map_err(|_| format!("属性 {name} 不是数值: {text:?}"))
}

/// viewBox 的宽和高。
fn view_box_size(text: &str) -> Result<(f64, f64), String> {
    let values: Vec<f64> = text
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|part| !part.is_empty())
        .map(|part| part.parse::<f64>())
        .collect::<Result<_, _>>()
        .map_err(|_| format!("viewBox 无法解析: {text:?}"))?;
    match values.as_slice() {
        [_, _, width, height] => Ok((*width, *height)),
        _ => Err(format!("viewBox 应有四个数值: {text:?}")),
    }
}

fn center_marker(element: &BytesStart) -> Result<Option<Point2>, String> {
    if element.local_name().as_ref() != b"circle"
        || attribute(element, b"id").as_deref() != Some(CENTER_MARKER)
    {
        return Ok(None);
    }
    Ok(Some(Point2::new(number(element, "cx")?, number(element, "cy")?)))
}

/// 取出根 `<svg>` 的尺寸和子节点正文，去掉 `<style>`。
fn parse_svg(content: &str) -> Result<ParsedSvg, String> {
    let mut reader = Reader::from_str(content);
    let mut writer = Writer::new(Vec::new());
    let mut buf = Vec::new();
    let mut depth = 0usize;
    let mut skipped_from: Option<usize> = None;
    let mut size = None;
    let mut center = None;

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|err| format!("XML 错误（位置 {}）: {err}", reader.buffer_position()))?;
        let keep = match &event {
            Event::Start(e) | Event::Empty(e) => {
                let is_empty = matches!(event, Event::Empty(_));
                if depth == 0 {
                    if e.local_name().as_ref() != SVG.as_bytes() {
                        return Err("根元素不是 svg".to_string());
                    }
                    let view_box =
                        attribute(e, b"viewBox").ok_or_else(|| "缺少 viewBox".to_string())?;
                    size = Some(view_box_size(&view_box)?);
                    if !is_empty {
                        depth = 1;
                    }
                    false
                } else {
                    if center.is_none() {
                        center = center_marker(e)?;
                    }
                    let style = e.local_name().as_ref() == b"style";
                    let keep = skipped_from.is_none() && !style;
                    if !is_empty {
                        depth += 1;
                        if style && skipped_from.is_none() {
                            skipped_from = Some(depth);
                        }
                    }
                    keep
                }
            }
            Event::End(_) => {
                let keep = depth > 1 && skipped_from.is_none();
                if skipped_from == Some(depth) {
                    skipped_from = None;
                }
                depth = depth.saturating_sub(1);
                keep
            }
            Event::Eof => break,
            _ => depth >= 1 && skipped_from.is_none(),
        };
        if keep {
            writer
                .write_event(event)
                .map_err(|err| format!("正文写出失败: {err}"))?;
        }
        buf.clear();
    }

    let (width, height) = size.ok_or_else(|| "没有 svg 元素".to_string())?;
    let body = String::from_utf8(writer.into_inner()).map_err(|err| err.to_string())?;
    Ok(ParsedSvg {
        width,
        height,
        center,
        body: body.trim().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARROW: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 40 20">
  <style>@import url(geopos_symb.css);</style>
  <g><path d="M0 10 L40 10"/><text id="textfeld">1</text></g>
  <circle id="symbolcenter" cx="5" cy="10" r="1"/>
</svg>"#;

    #[test]
    fn marker_defines_center_and_style_is_dropped() {
        let svg = parse_svg(ARROW).expect("解析符号");
        assert_eq!((svg.width, svg.height), (40.0, 20.0));
        let center = svg.center.expect("中心标记");
        assert!((center.x() - 5.0).abs() < 1e-9);
        assert!((center.y() - 10.0).abs() < 1e-9);
        assert!(!svg.body.contains("style"));
        assert!(svg.body.contains(r#"<text id="textfeld">1</text>"#));
        assert!(svg.body.starts_with("<g>"));
    }

    #[test]
    fn missing_marker_leaves_center_to_definition() {
        let svg = parse_svg(r#"<svg viewBox="0,0,30,12"><rect width="30" height="12"/></svg>"#)
            .expect("解析符号");
        assert_eq!(svg.center, None);
        assert_eq!(svg.body, r#"<rect width="30" height="12"/>"#);
        let symbol = SymbolDefinition::new("5", svg.width, svg.height, svg.body);
        assert!((symbol.center.x() - 15.0).abs() < 1e-9);
        assert!((symbol.center.y() - 6.0).abs() < 1e-9);
    }

    #[test]
    fn nested_style_content_is_skipped() {
        let svg = parse_svg(
            r#"<svg viewBox="0 0 1 1"><defs><style type="text/css"><![CDATA[.a{}]]></style></defs><g/></svg>"#,
        )
        .expect("解析符号");
        assert_eq!(svg.body, "<defs></defs><g/>");
    }

    #[test]
    fn broken_symbols_are_rejected() {
        assert!(parse_svg(r#"<svg><g/></svg>"#).is_err());
        assert!(parse_svg(r#"<svg viewBox="0 0 ten 5"/>"#).is_err());
        assert!(parse_svg(r#"<html viewBox="0 0 1 1"/>"#).is_err());
        assert!(
            parse_svg(r#"<svg viewBox="0 0 4 4"><circle id="symbolcenter" cx="x" cy="1"/></svg>"#)
                .is_err()
        );
    }

    #[test]
    fn title_block_ids_carry_format_and_scale() {
        assert_eq!(static_symbol_id("358_ampel_3k"), Some("358".to_string()));
        assert_eq!(static_symbol_id("103_plankopf_A3_500"), Some("103A3500".to_string()));
        assert_eq!(static_symbol_id("103_A4"), None);
        assert_eq!(static_symbol_id("_leer"), None);
    }

    #[test]
    fn group_names_come_from_directory_suffix() {
        assert_eq!(group_name(Path::new("/lib/02_Detektoren")), Some("Detektoren".to_string()));
        assert_eq!(group_name(Path::new("/lib/Detektoren")), None);
    }
}
