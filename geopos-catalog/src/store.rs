//! 目录快照存储。读取方拿到的是不可变快照；刷新时先完整构建新快照，再原子替换。

use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use arc_swap::ArcSwap;
use tracing::{debug, info, warn};

use crate::catalogs::{DynamicCatalog, ProjectCatalog, StaticCatalog, SymbolGroup};
use crate::errors::CatalogError;
use crate::rules::RuleTable;
use crate::symbol::SymbolDefinition;

/// 从数据源读出的原始定义。
#[derive(Debug, Clone, Default)]
pub struct CatalogDefinitions {
    pub static_symbols: Vec<SymbolDefinition>,
    pub rules: RuleTable,
    pub dynamic_groups: Vec<(String, Vec<SymbolDefinition>)>,
    pub project_groups: Vec<(String, Vec<SymbolDefinition>)>,
    /// 数据源的修改时间，用于判断快照是否过期。
    pub stamp: Option<SystemTime>,
}

/// 符号定义的来源，例如磁盘上的符号库目录。
pub trait DefinitionSource: Send + Sync {
    /// 当前修改时间；无法确定时返回 `None`。
    fn stamp(&self) -> Result<Option<SystemTime>, CatalogError>;
    fn load(&self) -> Result<CatalogDefinitions, CatalogError>;
}

#[derive(Debug, Clone)]
pub struct CatalogSnapshot {
    pub statics: StaticCatalog,
    pub dynamics: DynamicCatalog,
    pub project: ProjectCatalog,
    pub stamp: Option<SystemTime>,
}

impl CatalogSnapshot {
    pub fn build(definitions: CatalogDefinitions) -> Self {
        let groups = |groups: Vec<(String, Vec<SymbolDefinition>)>| {
            groups
                .into_iter()
                .map(|(name, symbols)| SymbolGroup::new(name, symbols))
                .collect::<Vec<_>>()
        };
        Self {
            statics: StaticCatalog::new(definitions.static_symbols, definitions.rules),
            dynamics: DynamicCatalog::new(groups(definitions.dynamic_groups)),
            project: ProjectCatalog::new(groups(definitions.project_groups)),
            stamp: definitions.stamp,
        }
    }

    pub fn empty() -> Self {
        Self {
            statics: StaticCatalog::empty(),
            dynamics: DynamicCatalog::empty(),
            project: ProjectCatalog::empty(),
            stamp: None,
        }
    }
}

/// 进程级目录存储，读取无锁。
pub struct CatalogStore {
    current: ArcSwap<CatalogSnapshot>,
}

impl CatalogStore {
    pub fn new(snapshot: CatalogSnapshot) -> Self {
        Self {
            current: ArcSwap::from_pointee(snapshot),
        }
    }

    pub fn load_from(source: &dyn DefinitionSource) -> Result<Self, CatalogError> {
        let definitions = source.load()?;
        Ok(Self::new(CatalogSnapshot::build(definitions)))
    }

    /// 当前快照。持有者在整个操作期间看到的目录保持不变。
    pub fn snapshot(&self) -> Arc<CatalogSnapshot> {
        self.current.load_full()
    }

    pub fn publish(&self, snapshot: CatalogSnapshot) {
        self.current.store(Arc::new(snapshot));
    }

    /// 数据源比当前快照新时重建并替换，返回是否替换。构建失败时旧快照保持不变。
    pub fn refresh_if_stale(&self, source: &dyn DefinitionSource) -> Result<bool, CatalogError> {
        let Some(stamp) = source.stamp()? else {
            return Ok(false);
        };
        let current = self.current.load();
        if current.stamp.is_some_and(|published| stamp <= published) {
            return Ok(false);
        }
        drop(current);
        let mut definitions = source.load()?;
        definitions.stamp.get_or_insert(stamp);
        let snapshot = CatalogSnapshot::build(definitions);
        info!(
            statics = snapshot.statics.len(),
            dynamics = snapshot.dynamics.len(),
            "符号目录已重新加载"
        );
        self.publish(snapshot);
        Ok(true)
    }
}

/// 后台刷新线程：按固定间隔检查数据源，停止时立即唤醒并退出。
pub struct CatalogRefresher {
    signal: Arc<(Mutex<bool>, Condvar)>,
    handle: Option<JoinHandle<()>>,
}

impl CatalogRefresher {
    pub fn spawn(
        store: Arc<CatalogStore>,
        source: Arc<dyn DefinitionSource>,
        interval: Duration,
    ) -> Self {
        let signal = Arc::new((Mutex::new(false), Condvar::new()));
        let thread_signal = Arc::clone(&signal);
        let handle = thread::spawn(move || {
            let (lock, condvar) = &*thread_signal;
            loop {
                let Ok(stopped) = lock.lock() else {
                    return;
                };
                let Ok((stopped, _)) =
                    condvar.wait_timeout_while(stopped, interval, |stopped| !*stopped)
                else {
                    return;
                };
                if *stopped {
                    debug!("符号目录刷新线程退出");
                    return;
                }
                drop(stopped);
                if let Err(err) = store.refresh_if_stale(source.as_ref()) {
                    warn!(error = %err, "符号目录刷新失败，继续使用旧快照");
                }
            }
        });
        Self {
            signal,
            handle: Some(handle),
        }
    }

    pub fn stop(&mut self) {
        let (lock, condvar) = &*self.signal;
        if let Ok(mut stopped) = lock.lock() {
            *stopped = true;
        }
        condvar.notify_all();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("符号目录刷新线程异常退出");
            }
        }
    }
}

impl Drop for CatalogRefresher {
    fn drop(&mut self) {
        self.stop();
    }
}
