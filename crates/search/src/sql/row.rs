//! Decoded result rows.

use chrono::{DateTime, NaiveDate, Utc};

use crate::error::{BackendError, BackendResult};
use crate::value::{SearchValue, SearchValueKind};

use super::fragment::SqlParam;

/// The expected type of a result column, used by backends to decode values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Integer,
    Float,
    Bool,
    Date,
    Timestamp,
}

impl ColumnType {
    /// The column type holding values of a search kind.
    pub fn for_kind(kind: SearchValueKind) -> Self {
        match kind {
            SearchValueKind::String => ColumnType::Text,
            SearchValueKind::Number => ColumnType::Float,
            SearchValueKind::Boolean => ColumnType::Bool,
            SearchValueKind::Date => ColumnType::Date,
            SearchValueKind::Instant => ColumnType::Timestamp,
        }
    }
}

/// One result row. Cells reuse [`SqlParam`], with `Null` for SQL NULL.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlRow {
    values: Vec<SqlParam>,
}

impl SqlRow {
    pub fn new(values: Vec<SqlParam>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn cell(&self, index: usize) -> BackendResult<&SqlParam> {
        self.values.get(index).ok_or_else(|| BackendError::Decode {
            column: index,
            message: format!("row has only {} columns", self.values.len()),
        })
    }

    fn mismatch(index: usize, expected: &str, actual: &SqlParam) -> BackendError {
        BackendError::Decode {
            column: index,
            message: format!("expected {}, got {:?}", expected, actual),
        }
    }

    fn required<T>(index: usize, value: Option<T>) -> BackendResult<T> {
        value.ok_or_else(|| BackendError::Decode {
            column: index,
            message: "unexpected NULL".to_string(),
        })
    }

    pub fn opt_text(&self, index: usize) -> BackendResult<Option<String>> {
        match self.cell(index)? {
            SqlParam::Null => Ok(None),
            SqlParam::Text(s) => Ok(Some(s.clone())),
            other => Err(Self::mismatch(index, "text", other)),
        }
    }

    pub fn text(&self, index: usize) -> BackendResult<String> {
        Self::required(index, self.opt_text(index)?)
    }

    pub fn opt_bool(&self, index: usize) -> BackendResult<Option<bool>> {
        match self.cell(index)? {
            SqlParam::Null => Ok(None),
            SqlParam::Bool(b) => Ok(Some(*b)),
            SqlParam::Integer(i) => Ok(Some(*i != 0)),
            other => Err(Self::mismatch(index, "bool", other)),
        }
    }

    pub fn bool(&self, index: usize) -> BackendResult<bool> {
        Self::required(index, self.opt_bool(index)?)
    }

    pub fn opt_float(&self, index: usize) -> BackendResult<Option<f64>> {
        match self.cell(index)? {
            SqlParam::Null => Ok(None),
            SqlParam::Float(f) => Ok(Some(*f)),
            SqlParam::Integer(i) => Ok(Some(*i as f64)),
            other => Err(Self::mismatch(index, "float", other)),
        }
    }

    pub fn opt_date(&self, index: usize) -> BackendResult<Option<NaiveDate>> {
        match self.cell(index)? {
            SqlParam::Null => Ok(None),
            SqlParam::Date(d) => Ok(Some(*d)),
            other => Err(Self::mismatch(index, "date", other)),
        }
    }

    pub fn opt_timestamp(&self, index: usize) -> BackendResult<Option<DateTime<Utc>>> {
        match self.cell(index)? {
            SqlParam::Null => Ok(None),
            SqlParam::Timestamp(t) => Ok(Some(*t)),
            other => Err(Self::mismatch(index, "timestamp", other)),
        }
    }

    pub fn timestamp(&self, index: usize) -> BackendResult<DateTime<Utc>> {
        Self::required(index, self.opt_timestamp(index)?)
    }

    /// Decodes a cell as a search value of the given kind.
    pub fn search_value(
        &self,
        index: usize,
        kind: SearchValueKind,
    ) -> BackendResult<Option<SearchValue>> {
        Ok(match kind {
            SearchValueKind::String => self.opt_text(index)?.map(SearchValue::String),
            SearchValueKind::Number => self.opt_float(index)?.map(SearchValue::Number),
            SearchValueKind::Boolean => self.opt_bool(index)?.map(SearchValue::Boolean),
            SearchValueKind::Date => self.opt_date(index)?.map(SearchValue::Date),
            SearchValueKind::Instant => self.opt_timestamp(index)?.map(SearchValue::Instant),
        })
    }
}
