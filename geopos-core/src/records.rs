//! 属性记录：每个类别一张表，首行为列名，后续每行描述一个对象。

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

/// 通用列位置，所有类别文件共享。
pub mod columns {
    pub const ID: usize = 0;
    pub const X: usize = 1;
    pub const Y: usize = 2;
    pub const SYMBOL_ID: usize = 3;
    pub const ANGLE: usize = 4;
    pub const NUMBER: usize = 5;
    pub const DETAIL: usize = 6;
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MalformedRecordError {
    #[error("{category} row {row}: expected {expected} columns, found {found}")]
    ColumnCount {
        category: String,
        row: usize,
        expected: usize,
        found: usize,
    },
    #[error("{category} row {row}: column {column} is missing")]
    MissingColumn {
        category: String,
        row: usize,
        column: usize,
    },
    #[error("{category} row {row}: column {column} is not a number ({value:?})")]
    NotANumber {
        category: String,
        row: usize,
        column: usize,
        value: String,
    },
    #[error("{category} row {row}: invalid value {value:?} in column {column}")]
    InvalidValue {
        category: String,
        row: usize,
        column: usize,
        value: String,
    },
    #[error("{category} has no data row")]
    Empty { category: String },
}

/// 一行业务数据。列名与类别名在同一张表的所有行之间共享。
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeRecord {
    category: Arc<str>,
    headers: Arc<[String]>,
    row: usize,
    values: Vec<String>,
}

impl AttributeRecord {
    #[inline]
    pub fn category(&self) -> &str {
        &self.category
    }

    /// 行号，从 1 开始（不含表头）。
    #[inline]
    pub fn row(&self) -> usize {
        self.row
    }

    #[inline]
    pub fn id(&self) -> &str {
        self.column(columns::ID).unwrap_or_default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[inline]
    pub fn values(&self) -> &[String] {
        &self.values
    }

    #[inline]
    pub fn column(&self, index: usize) -> Option<&str> {
        self.values.get(index).map(String::as_str)
    }

    /// 取一列，缺失时返回 `MissingColumn`。
    pub fn require(&self, index: usize) -> Result<&str, MalformedRecordError> {
        self.column(index)
            .ok_or_else(|| MalformedRecordError::MissingColumn {
                category: self.category.to_string(),
                row: self.row,
                column: index,
            })
    }

    /// 按列名取值，列名不存在时返回 `None`。
    pub fn field(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .position(|header| header == name)
            .and_then(|index| self.column(index))
    }

    /// 解析数值列；空串视为缺失，返回 `Ok(None)`。
    pub fn number(&self, index: usize) -> Result<Option<f64>, MalformedRecordError> {
        let raw = self.require(index)?.trim();
        if raw.is_empty() {
            return Ok(None);
        }
        raw.parse::<f64>()
            .map(Some)
            .map_err(|_| self.not_a_number(index, raw))
    }

    /// 解析整数列，空串同样视为错误。
    pub fn integer(&self, index: usize) -> Result<i64, MalformedRecordError> {
        let raw = self.require(index)?.trim();
        raw.parse::<i64>()
            .map_err(|_| self.not_a_number(index, raw))
    }

    pub fn set_column(
        &mut self,
        index: usize,
        value: impl Into<String>,
    ) -> Result<(), MalformedRecordError> {
        let row = self.row;
        let category = self.category.to_string();
        let slot = self
            .values
            .get_mut(index)
            .ok_or(MalformedRecordError::MissingColumn {
                category,
                row,
                column: index,
            })?;
        *slot = value.into();
        Ok(())
    }

    pub fn invalid_value(&self, index: usize, value: &str) -> MalformedRecordError {
        MalformedRecordError::InvalidValue {
            category: self.category.to_string(),
            row: self.row,
            column: index,
            value: value.to_string(),
        }
    }

    fn not_a_number(&self, index: usize, value: &str) -> MalformedRecordError {
        MalformedRecordError::NotANumber {
            category: self.category.to_string(),
            row: self.row,
            column: index,
            value: value.to_string(),
        }
    }
}

/// 单个类别的记录表，每行列数必须与表头一致。
#[derive(Debug, Clone, PartialEq)]
pub struct RecordTable {
    category: Arc<str>,
    headers: Arc<[String]>,
    rows: Vec<AttributeRecord>,
}

impl RecordTable {
    pub fn new(
        category: impl Into<String>,
        headers: Vec<String>,
        rows: Vec<Vec<String>>,
    ) -> Result<Self, MalformedRecordError> {
        let category: Arc<str> = Arc::from(category.into());
        let headers: Arc<[String]> = Arc::from(headers);
        let mut records = Vec::with_capacity(rows.len());
        for (index, values) in rows.into_iter().enumerate() {
            if values.len() != headers.len() {
                return Err(MalformedRecordError::ColumnCount {
                    category: category.to_string(),
                    row: index + 1,
                    expected: headers.len(),
                    found: values.len(),
                });
            }
            records.push(AttributeRecord {
                category: Arc::clone(&category),
                headers: Arc::clone(&headers),
                row: index + 1,
                values,
            });
        }
        Ok(Self {
            category,
            headers,
            rows: records,
        })
    }

    /// 以字符串切片构造，多用于测试和内存数据源。
    pub fn from_rows(
        category: &str,
        headers: &[&str],
        rows: &[&[&str]],
    ) -> Result<Self, MalformedRecordError> {
        Self::new(
            category,
            headers.iter().map(|h| h.to_string()).collect(),
            rows.iter()
                .map(|row| row.iter().map(|v| v.to_string()).collect())
                .collect(),
        )
    }

    #[inline]
    pub fn category(&self) -> &str {
        &self.category
    }

    #[inline]
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    #[inline]
    pub fn rows(&self) -> &[AttributeRecord] {
        &self.rows
    }

    #[inline]
    pub fn rows_mut(&mut self) -> &mut [AttributeRecord] {
        &mut self.rows
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// 单行表（计划、节点、信息文件）的数据行。
    pub fn first(&self) -> Result<&AttributeRecord, MalformedRecordError> {
        self.rows.first().ok_or_else(|| MalformedRecordError::Empty {
            category: self.category.to_string(),
        })
    }

    pub fn first_mut(&mut self) -> Result<&mut AttributeRecord, MalformedRecordError> {
        let category = self.category.to_string();
        self.rows
            .first_mut()
            .ok_or(MalformedRecordError::Empty { category })
    }

    pub fn find(&self, id: &str) -> Option<&AttributeRecord> {
        self.rows.iter().find(|record| record.id() == id)
    }

    pub fn find_mut(&mut self, id: &str) -> Option<&mut AttributeRecord> {
        self.rows.iter_mut().find(|record| record.id() == id)
    }

    /// 按整数列稳定排序；任一行无法解析即整体失败，原顺序保持不变。
    pub fn sort_by_integer(&mut self, column: usize) -> Result<(), MalformedRecordError> {
        let mut keyed = Vec::with_capacity(self.rows.len());
        for record in &self.rows {
            keyed.push(record.integer(column)?);
        }
        let mut indices: Vec<usize> = (0..self.rows.len()).collect();
        indices.sort_by_key(|&index| keyed[index]);
        let mut slots: Vec<Option<AttributeRecord>> = self.rows.drain(..).map(Some).collect();
        self.rows = indices
            .into_iter()
            .filter_map(|index| slots[index].take())
            .collect();
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum RecordSourceError {
    #[error(transparent)]
    Malformed(#[from] MalformedRecordError),
    #[error("record source for {category} unavailable: {message}")]
    Unavailable { category: String, message: String },
}

/// 记录数据源。类别文件不存在时返回 `Ok(None)`。
pub trait RecordSource {
    fn load(&self, category: &str) -> Result<Option<RecordTable>, RecordSourceError>;
}

/// 记录写回目标。
pub trait RecordSink {
    fn store(&mut self, table: &RecordTable) -> Result<(), RecordSourceError>;
}

/// 内存数据源，读写同一份表集合。
#[derive(Debug, Default, Clone)]
pub struct InMemoryRecords {
    tables: HashMap<String, RecordTable>,
}

impl InMemoryRecords {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, table: RecordTable) {
        self.tables.insert(table.category().to_string(), table);
    }

    pub fn with(mut self, table: RecordTable) -> Self {
        self.insert(table);
        self
    }

    pub fn remove(&mut self, category: &str) -> Option<RecordTable> {
        self.tables.remove(category)
    }

    pub fn get(&self, category: &str) -> Option<&RecordTable> {
        self.tables.get(category)
    }
}

impl RecordSource for InMemoryRecords {
    fn load(&self, category: &str) -> Result<Option<RecordTable>, RecordSourceError> {
        Ok(self.tables.get(category).cloned())
    }
}

impl RecordSink for InMemoryRecords {
    fn store(&mut self, table: &RecordTable) -> Result<(), RecordSourceError> {
        self.insert(table.clone());
        Ok(())
    }
}
