use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// 配置文件路径的环境变量。
pub const CONFIG_ENV: &str = "GEOPOS_CONFIG";

/// 未设置环境变量时在工作目录下查找的相对路径。
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// `geopos` 的全部配置，各节都可省略。
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub catalog: CatalogConfig,
    pub workspace: WorkspaceConfig,
}

impl AppConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// 依次尝试 `GEOPOS_CONFIG` 和工作目录下的 `config/default.toml`，都没有时用默认值。
    pub fn discover() -> Result<Self, ConfigError> {
        if let Some(path) = env::var_os(CONFIG_ENV) {
            return Self::from_file(PathBuf::from(path));
        }
        let cwd = env::current_dir().map_err(|source| ConfigError::Context {
            message: "无法确定工作目录".to_string(),
            source,
        })?;
        let candidate = cwd.join(DEFAULT_CONFIG_PATH);
        if candidate.is_file() {
            Self::from_file(candidate)
        } else {
            Ok(Self::default())
        }
    }
}

/// 日志输出。`level` 是 `EnvFilter` 指令，例如 `geopos_engine=debug,info`。
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// 输出到终端以外（重定向到文件）时可关闭颜色。
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            ansi: true,
        }
    }
}

/// 符号库位置。相对路径以 `root` 为基准。
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub root: PathBuf,
    pub static_dir: PathBuf,
    pub dynamic_dir: PathBuf,
    pub project_dir: PathBuf,
    /// 扩展名为 `.toml` 时按 TOML 规则表读取，否则按 `symbol.cf`。
    pub symbol_rules: PathBuf,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            static_dir: PathBuf::from("symbols/static"),
            dynamic_dir: PathBuf::from("symbols/dynamic"),
            project_dir: PathBuf::from("symbols/project"),
            symbol_rules: PathBuf::from("symbols/symbol.cf"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// 节点目录中持久化文档的文件名。
    pub document_name: String,
    /// `convert-datum` 未指定目标时使用。
    pub target_datum: String,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            document_name: "knotenplan.json".to_string(),
            target_datum: "LV95".to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("无法读取配置 {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("配置 {} 格式有误: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("{message}")]
    Context {
        message: String,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_cover_every_section() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.logging.level, "info");
        assert!(cfg.logging.ansi);
        assert_eq!(cfg.catalog.symbol_rules, PathBuf::from("symbols/symbol.cf"));
        assert_eq!(cfg.workspace.document_name, "knotenplan.json");
        assert_eq!(cfg.workspace.target_datum, "LV95");
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let mut file = tempfile::NamedTempFile::new().expect("临时配置");
        writeln!(
            file,
            r#"
            [logging]
            level = "geopos_engine=debug,warn"
            ansi = false

            [catalog]
            root = "/srv/geopos"
            static_dir = "lib/static"

            [workspace]
            target_datum = "LV03"
            "#
        )
        .expect("写入配置");

        let cfg = AppConfig::from_file(file.path()).expect("读取配置");
        assert_eq!(cfg.logging.level, "geopos_engine=debug,warn");
        assert!(!cfg.logging.ansi);
        assert_eq!(cfg.catalog.root, PathBuf::from("/srv/geopos"));
        assert_eq!(cfg.catalog.static_dir, PathBuf::from("lib/static"));
        assert_eq!(cfg.catalog.dynamic_dir, PathBuf::from("symbols/dynamic"));
        assert_eq!(cfg.workspace.target_datum, "LV03");
        assert_eq!(cfg.workspace.document_name, "knotenplan.json");
    }

    #[test]
    fn malformed_file_reports_parse_error() {
        let mut file = tempfile::NamedTempFile::new().expect("临时配置");
        writeln!(file, "[catalog]\nstatic_dir = 3").expect("写入配置");

        let err = AppConfig::from_file(file.path()).expect_err("类型错误");
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn missing_file_reports_io_error() {
        let err = AppConfig::from_file("/nonexistent/geopos/config.toml").expect_err("文件不存在");
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
