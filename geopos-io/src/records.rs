//! 逗号分隔的属性记录文件，每个类别一个 `<CATEGORY>.csv`，首行为表头。

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use geopos_core::records::{RecordSink, RecordSource, RecordSourceError, RecordTable};
use tracing::{debug, warn};

const EXTENSION: &str = "csv";

/// 节点目录中的记录文件。读取和写回可以是不同目录。
#[derive(Debug, Clone)]
pub struct CsvRecords {
    source: PathBuf,
    target: PathBuf,
}

impl CsvRecords {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            source: dir.clone(),
            target: dir,
        }
    }

    /// 写回到另一个目录，原始记录保持不变。
    pub fn with_target(mut self, dir: impl Into<PathBuf>) -> Self {
        self.target = dir.into();
        self
    }

    pub fn source_dir(&self) -> &Path {
        &self.source
    }

    pub fn target_dir(&self) -> &Path {
        &self.target
    }

    pub fn source_path(&self, category: &str) -> PathBuf {
        self.source.join(format!("{category}.{EXTENSION}"))
    }

    pub fn target_path(&self, category: &str) -> PathBuf {
        self.target.join(format!("{category}.{EXTENSION}"))
    }
}

fn unavailable(category: &str, message: impl ToString) -> RecordSourceError {
    RecordSourceError::Unavailable {
        category: category.to_string(),
        message: message.to_string(),
    }
}

fn read_table(category: &str, file: File) -> Result<RecordTable, RecordSourceError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(file);
    let headers: Vec<String> = reader
        .headers()
        .map_err(|err| unavailable(category, err))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result.map_err(|err| unavailable(category, err))?;
        rows.push(record.iter().map(str::to_string).collect());
    }
    // 列数不符的行由记录表拒绝，整个类别作废
    Ok(RecordTable::new(category, headers, rows)?)
}

impl RecordSource for CsvRecords {
    fn load(&self, category: &str) -> Result<Option<RecordTable>, RecordSourceError> {
        let path = self.source_path(category);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(category, path = %path.display(), "记录文件不存在");
                return Ok(None);
            }
            Err(err) => return Err(unavailable(category, err)),
        };
        let table = read_table(category, file)?;
        debug!(category, rows = table.len(), "记录已读取");
        Ok(Some(table))
    }
}

impl RecordSink for CsvRecords {
    fn store(&mut self, table: &RecordTable) -> Result<(), RecordSourceError> {
        let category = table.category();
        fs::create_dir_all(&self.target).map_err(|err| unavailable(category, err))?;
        let path = self.target_path(category);
        let mut writer = csv::WriterBuilder::new()
            .flexible(false)
            .from_path(&path)
            .map_err(|err| unavailable(category, err))?;
        writer
            .write_record(table.headers())
            .map_err(|err| unavailable(category, err))?;
        for record in table.rows() {
            writer
                .write_record(record.values())
                .map_err(|err| unavailable(category, err))?;
        }
        writer.flush().map_err(|err| {
            warn!(category, path = %path.display(), error = %err, "记录写回失败");
            unavailable(category, err)
        })?;
        debug!(category, rows = table.len(), path = %path.display(), "记录已写回");
        Ok(())
    }
}
