use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::{TempDir, tempdir};

const PLAN_HEADER: &str = "PLAN,XKOORD,YKOORD,ID,MASSSTAB,AUSLEGUNG,FORMAT,MITARBEITER,BEARBEITUNGSDATUM,PLANKOPFPOSITION,PLANKOPFAUSLEGUNG";
const OBJECT_HEADER: &str = "INFOS,XKOORD,YKOORD,SYMBOLID,SYMBOLDREHWINKEL,NR,DETAIL";

struct Fixture {
    dir: TempDir,
}

impl Fixture {
    fn new(mode: &str) -> Self {
        let dir = tempdir().expect("临时目录");
        let node = dir.path().join("K211");
        fs::create_dir_all(&node).expect("节点目录");
        let write = |name: &str, content: String| {
            fs::write(node.join(name), content).expect("写入记录");
        };
        write(
            "INFO.csv",
            format!(
                "KNOTENNR,KNOTENBEZ,KNVERS,MODESTATUS,KNMAPDATUM,MODE,ZEITPUNKT,logname\n\
                 211,Bahnhofplatz,7,Entwurf,12.01.2024,{mode},04.03.2024 10:00:00,jdoe\n"
            ),
        );
        write(
            "KNOTEN.csv",
            "INFOS,XKOORD,YKOORD,SYMBOLID,SYMBOLDREHWINKEL,KNOTENNR,SRS\n\
             211,683300,246350,,0,211,LV03\n"
                .to_string(),
        );
        write(
            "LAGEPLAN.csv",
            format!("{PLAN_HEADER}\nLAGEPLAN,683200,246400,1,500,hoch,A3,mmuster,01.02.24,,\n"),
        );
        write(
            "SPUR.csv",
            format!("{OBJECT_HEADER}\ns1,683220,246380,,90,1,99\ns2,683210,246390,,0,2,3\n"),
        );
        fs::write(
            dir.path().join("geopos.toml"),
            format!(
                "[logging]\nlevel = \"warn\"\n\n[catalog]\nroot = {:?}\n",
                dir.path().join("library")
            ),
        )
        .expect("写入配置");
        Self { dir }
    }

    fn node(&self) -> PathBuf {
        self.dir.path().join("K211")
    }

    fn document(&self) -> PathBuf {
        self.node().join("knotenplan.json")
    }

    fn geopos(&self) -> Command {
        let mut cmd = Command::cargo_bin("geopos").expect("找到 geopos 二进制");
        cmd.current_dir(self.dir.path())
            .arg("--config")
            .arg(self.dir.path().join("geopos.toml"));
        cmd
    }

    fn open(&self) {
        self.geopos()
            .arg("open")
            .arg(self.node())
            .assert()
            .success();
    }
}

fn read(path: &Path) -> String {
    fs::read_to_string(path).expect("读取文件")
}

#[test]
fn open_creates_document_once() {
    let fixture = Fixture::new("Bearbeiten");
    fixture
        .geopos()
        .arg("open")
        .arg(fixture.node())
        .assert()
        .success()
        .stdout(predicate::str::contains("文档已按记录新建"));
    assert!(fixture.document().exists());
    assert!(read(&fixture.document()).contains("\"data-version\": \"1.4\""));

    fixture
        .geopos()
        .arg("open")
        .arg(fixture.node())
        .assert()
        .success()
        .stdout(predicate::str::contains("文档版本 1.4"));
}

#[test]
fn read_only_node_is_not_written() {
    let fixture = Fixture::new("Anzeigen");
    fixture.open();
    assert!(!fixture.document().exists());

    fixture
        .geopos()
        .args(["run"])
        .arg(fixture.node())
        .args(["invert_title_block", "LAGEPLAN"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("read-only"));
}

#[test]
fn limits_lists_every_plan() {
    let fixture = Fixture::new("Bearbeiten");
    fixture
        .geopos()
        .arg("limits")
        .arg(fixture.node())
        .assert()
        .success()
        .stdout(predicate::str::contains("LAGEPLAN: massstab"))
        .stdout(predicate::str::contains("VVAPLAN: massstab"));
}

#[test]
fn invalid_layout_attribute_fails_with_reason() {
    let fixture = Fixture::new("Bearbeiten");
    fixture
        .geopos()
        .arg("layout")
        .arg(fixture.node())
        .args(["LAGEPLAN", "FARBE", "rot"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("参数 ATTR 无效"));
}

#[test]
fn unknown_command_is_reported() {
    let fixture = Fixture::new("Bearbeiten");
    fixture
        .geopos()
        .arg("run")
        .arg(fixture.node())
        .arg("zeichnen")
        .assert()
        .failure()
        .stderr(predicate::str::contains("未知命令: zeichnen"));
}

#[test]
fn export_writes_records_and_deployment_config() {
    let fixture = Fixture::new("Bearbeiten");
    fixture.open();
    fixture
        .geopos()
        .arg("export")
        .arg(fixture.node())
        .assert()
        .success()
        .stdout(predicate::str::contains("已导出到"));

    let export = fixture.node().join("export");
    let plan = read(&export.join("LAGEPLAN.csv"));
    assert!(plan.starts_with(PLAN_HEADER));
    assert!(plan.contains("LAGEPLAN,683200,246400,1,500,hoch,A3,jdoe,"));
    assert!(read(&export.join("SPUR.csv")).contains("s1,683220,246380,"));
    assert!(read(&export.join("konfig.xml")).contains("K211.R.B.rt"));
    assert!(read(&fixture.node().join("SPUR.csv")).contains("s2,683210,246390,,0,2,3"));
}

#[test]
fn datum_conversion_defaults_to_configured_target() {
    let fixture = Fixture::new("Bearbeiten");
    fixture.open();
    fixture
        .geopos()
        .arg("convert-datum")
        .arg(fixture.node())
        .assert()
        .success()
        .stdout(predicate::str::contains("LV03 -> LV95"));
    let knoten = read(&fixture.node().join("export").join("KNOTEN.csv"));
    assert!(knoten.trim_end().ends_with(",LV95"));
    assert!(read(&fixture.node().join("KNOTEN.csv")).trim_end().ends_with(",LV03"));

    fixture
        .geopos()
        .arg("convert-datum")
        .arg(fixture.node())
        .arg("WGS84")
        .assert()
        .failure()
        .stderr(predicate::str::contains("无效的数据基准"));
}
