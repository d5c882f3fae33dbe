use std::fs;
use std::path::Path;

use geopos_catalog::{CatalogSnapshot, CatalogStore, DefinitionSource};
use geopos_core::projection::{PaperFormat, Scale};
use geopos_io::{LibraryLayout, SymbolLibrary};
use tempfile::{TempDir, tempdir};

fn svg(width: u32, height: u32, inner: &str) -> String {
    format!(
        "<?xml version=\"1.0\"?>\n<svg xmlns=\"http://www.w3.org/2000/svg\" viewBox=\"0 0 {width} {height}\">\
         <style>@import url(geopos_symb.css);</style>{inner}</svg>"
    )
}

fn write(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("创建目录");
    }
    fs::write(path, content).expect("写入文件");
}

fn symbol_cf() -> String {
    let mut text = String::from("# symbol.cf\n#\n#\nID\tBEZ\tKLASSE\n");
    let mut row = [""; 15];
    row[0] = "358";
    row[1] = "Vibra";
    row[2] = "AMPEL";
    text.push_str(&row.join("\t"));
    text.push('\n');
    text
}

fn layout() -> LibraryLayout {
    LibraryLayout {
        static_dir: "static".into(),
        dynamic_dir: "dynamic".into(),
        project_dir: "project".into(),
        rules: "symbol.cf".into(),
    }
}

fn library_tree() -> TempDir {
    let dir = tempdir().expect("临时目录");
    let root = dir.path();
    write(root, "static/0_unbekannt.svg", &svg(10, 10, "<rect/>"));
    write(
        root,
        "static/358_ampel_vibra.svg",
        &svg(
            40,
            20,
            "<g><text id=\"textfeld\">x</text></g><circle id=\"symbolcenter\" cx=\"5\" cy=\"10\" r=\"1\"/>",
        ),
    );
    write(root, "static/103_plankopf_A3_500.svg", &svg(180, 60, "<g/>"));
    write(root, "static/liesmich.txt", "kein Symbol");
    write(root, "static/999_kaputt.svg", "<svg><g/></svg>");
    write(
        root,
        "dynamic/01_Signalgruppen/210_21_SPUR.svg",
        &svg(20, 20, "<g id=\"DPID\"/>"),
    );
    write(
        root,
        "dynamic/01_Signalgruppen/210_21_SPUR.xml",
        "<Item dp=\"DPID\" knoten=\"KNOTENNR\"/>",
    );
    write(
        root,
        "dynamic/01_Signalgruppen/211_ohne_xml.svg",
        &svg(20, 20, "<g/>"),
    );
    write(root, "dynamic/ohnegruppe/5_x.svg", &svg(1, 1, "<g/>"));
    write(
        root,
        "project/02_Pfeile/5_pfeil.svg",
        &svg(
            30,
            10,
            "<path/><circle id=\"symbolcenter\" cx=\"0\" cy=\"0\" r=\"1\"/>",
        ),
    );
    write(root, "symbol.cf", &symbol_cf());
    dir
}

#[test]
fn library_tree_builds_all_three_catalogs() {
    let dir = library_tree();
    let library = SymbolLibrary::new(layout().resolve(dir.path()));
    let snapshot = CatalogSnapshot::build(library.load().expect("加载符号库"));

    let ampel = snapshot.statics.lookup("358").expect("静态符号 358");
    assert!((ampel.width - 40.0).abs() < 1e-9);
    assert!((ampel.center.x() - 5.0).abs() < 1e-9);
    assert!((ampel.center.y() - 10.0).abs() < 1e-9);
    assert!(!ampel.body.contains("geopos_symb.css"));
    assert!(snapshot.statics.lookup("999").is_none());
    assert!(
        snapshot
            .statics
            .title_block(PaperFormat::A3, Scale::S500)
            .is_some()
    );
    assert_eq!(snapshot.statics.rules().rules().len(), 1);

    let group = snapshot.dynamics.group("Signalgruppen").expect("信号组");
    assert_eq!(group.symbols.len(), 1);
    let spur = snapshot.dynamics.by_static_symbol("210").expect("按静态 id 查找");
    assert_eq!(spur.id, "210_21_SPUR");
    assert!(spur.telemetry.as_deref().is_some_and(|t| t.contains("KNOTENNR")));
    assert_eq!(snapshot.dynamics.groups().len(), 1);

    let arrow = snapshot.project.get("5").expect("项目符号");
    assert!((arrow.center.x() - 15.0).abs() < 1e-9);
    assert!((arrow.center.y() - 5.0).abs() < 1e-9);
    assert!(snapshot.stamp.is_some());
}

#[test]
fn missing_library_yields_empty_catalogs() {
    let dir = tempdir().expect("临时目录");
    let library = SymbolLibrary::new(layout().resolve(dir.path()));
    assert_eq!(library.stamp().expect("读取时间戳"), None);

    let definitions = library.load().expect("空符号库");
    assert!(definitions.static_symbols.is_empty());
    assert!(definitions.dynamic_groups.is_empty());
    assert!(definitions.project_groups.is_empty());
    assert_eq!(definitions.rules.pinned("AMPEL"), Some("358"));
}

#[test]
fn toml_rules_are_parsed_by_extension() {
    let dir = library_tree();
    write(
        dir.path(),
        "rules.toml",
        "[pinned]\nAMPEL = \"301\"\n\n[[rule]]\nsymbol = \"301\"\ncategory = \"AMPEL\"\nwhen = { MONTAGE = \"Mast\" }\n",
    );
    let mut layout = layout();
    layout.rules = "rules.toml".into();
    let definitions = SymbolLibrary::new(layout.resolve(dir.path()))
        .load()
        .expect("加载符号库");
    assert_eq!(definitions.rules.pinned("AMPEL"), Some("301"));
    assert_eq!(definitions.rules.rules().len(), 1);
}

#[test]
fn unchanged_library_is_not_reloaded() {
    let dir = library_tree();
    let library = SymbolLibrary::new(layout().resolve(dir.path()));
    let store = CatalogStore::load_from(&library).expect("首次加载");
    assert!(!store.refresh_if_stale(&library).expect("检查时间戳"));
    assert!(store.snapshot().statics.lookup("358").is_some());
}
