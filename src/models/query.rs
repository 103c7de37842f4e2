//! Query result model.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Default number of example values sampled per column.
pub const DEFAULT_VALUE_NUM: usize = 3;

/// Default maximum length of a sampled example value.
pub const DEFAULT_MAX_EXAMPLE_LEN: usize = 40;

/// Column names plus positional rows of JSON cells.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryOutput {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<JsonValue>>,
}

impl QueryOutput {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<JsonValue>>) -> Self {
        Self { columns, rows }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First cell of the first row, if any.
    pub fn scalar(&self) -> Option<&JsonValue> {
        self.rows.first().and_then(|row| row.first())
    }
}
