//! 节点目录：记录文件、持久化文档和导出目录。

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Local;
use geopos_catalog::{CatalogSnapshot, CatalogStore};
use geopos_config::{CatalogConfig, WorkspaceConfig};
use geopos_engine::{OpenReport, PlanSession};
use geopos_io::{CsvRecords, DocumentSaver, JsonFacade, LibraryLayout, SymbolLibrary};
use tracing::{debug, info};

pub const EXPORT_DIR: &str = "export";
pub const DEPLOYMENT_FILE: &str = "konfig.xml";

pub fn library_layout(config: &CatalogConfig) -> LibraryLayout {
    LibraryLayout {
        static_dir: config.static_dir.clone(),
        dynamic_dir: config.dynamic_dir.clone(),
        project_dir: config.project_dir.clone(),
        rules: config.symbol_rules.clone(),
    }
    .resolve(&config.root)
}

pub fn load_catalog(config: &CatalogConfig) -> Result<Arc<CatalogSnapshot>> {
    let layout = library_layout(config);
    debug!(rules = %layout.rules.display(), "加载符号库");
    let library = SymbolLibrary::new(layout);
    let store = CatalogStore::load_from(&library).context("符号库加载失败")?;
    Ok(store.snapshot())
}

pub struct NodeWorkspace {
    dir: PathBuf,
    document_path: PathBuf,
    records: CsvRecords,
}

impl NodeWorkspace {
    pub fn new(dir: impl Into<PathBuf>, config: &WorkspaceConfig) -> Self {
        let dir = dir.into();
        Self {
            document_path: dir.join(&config.document_name),
            records: CsvRecords::new(&dir).with_target(dir.join(EXPORT_DIR)),
            dir,
        }
    }

    pub fn records(&self) -> &CsvRecords {
        &self.records
    }

    pub fn document_path(&self) -> &Path {
        &self.document_path
    }

    pub fn open(&self, catalog: Arc<CatalogSnapshot>) -> Result<(PlanSession, OpenReport)> {
        let existing = JsonFacade::new()
            .load_if_exists(&self.document_path)
            .context("读取文档失败")?;
        PlanSession::open(existing, &self.records, catalog, Local::now().naive_local())
            .with_context(|| format!("打开节点 {} 失败", self.dir.display()))
    }

    pub fn save(&self, session: &PlanSession) -> Result<()> {
        JsonFacade::new()
            .save(session.document(), &self.document_path)
            .context("保存文档失败")?;
        info!(path = %self.document_path.display(), "文档已保存");
        Ok(())
    }

    /// 写回记录和部署配置，返回导出目录。
    pub fn export(&self, session: &PlanSession, out: Option<&Path>) -> Result<PathBuf> {
        let target = out
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.records.target_dir().to_path_buf());
        let mut sink = self.records.clone().with_target(&target);
        session
            .export_records(&self.records, &mut sink, Local::now().date_naive())
            .context("导出记录失败")?;
        let deployment = session
            .deployment_config(&self.records)
            .context("生成部署配置失败")?;
        let path = target.join(DEPLOYMENT_FILE);
        fs::create_dir_all(&target)
            .and_then(|()| fs::write(&path, deployment))
            .with_context(|| format!("写入 {} 失败", path.display()))?;
        Ok(target)
    }
}
