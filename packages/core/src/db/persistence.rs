//! PersistenceService Trait - Storage Abstraction Layer
//!
//! The hosted backend is reached only through this capability set: filtered
//! select, insert, update, delete and keyed upsert over a handful of logical
//! tables. Rows travel as JSON objects keyed by column name, which is how the
//! hosted REST backend speaks; typed models convert at the edge with
//! [`to_row`] and [`from_rows`].
//!
//! # Design Decisions
//!
//! 1. **Injected, not global**: services hold an `Arc<dyn PersistenceService>`,
//!    so tests substitute [`InMemoryStore`](super::InMemoryStore)
//! 2. **Async-first**: every call is a suspension point
//! 3. **Caller-side batching**: implementations may reject large payloads;
//!    callers split writes into batches of at most 1000 rows
//!
//! # Examples
//!
//! ```rust
//! use keythoughts_core::db::{InMemoryStore, PersistenceService, Query, Table};
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let store = InMemoryStore::new();
//! let row = json!({ "id": "p1", "user_id": "u1", "name": "Main", "position": 0 });
//! store
//!     .insert(Table::Pages, vec![row.as_object().unwrap().clone()])
//!     .await
//!     .unwrap();
//!
//! let rows = store
//!     .select(Table::Pages, &Query::new().eq("user_id", "u1").order_by("position", true))
//!     .await
//!     .unwrap();
//! assert_eq!(rows.len(), 1);
//! # });
//! ```

use super::StoreError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One row: column name → value
pub type Row = serde_json::Map<String, Value>;

/// Logical tables the core reads and writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Blocks,
    Pages,
    Projects,
    BlockHistory,
    UserSettings,
}

impl Table {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Blocks => "blocks",
            Self::Pages => "pages",
            Self::Projects => "projects",
            Self::BlockHistory => "block_history",
            Self::UserSettings => "user_settings",
        }
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Row predicate. All filters of a call must hold (AND).
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Column equals value. `Value::Null` matches null or missing columns.
    Eq(String, Value),
    /// Column is one of the values
    In(String, Vec<Value>),
    /// Column is strictly less than value (numbers, or strings compared lexically)
    Lt(String, Value),
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq(column.into(), value.into())
    }

    /// `Eq` against an optional value; `None` means "is null"
    pub fn eq_opt(column: impl Into<String>, value: Option<&str>) -> Self {
        Self::Eq(
            column.into(),
            value.map(|v| Value::String(v.to_string())).unwrap_or(Value::Null),
        )
    }

    pub fn any_of<I, V>(column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::In(column.into(), values.into_iter().map(Into::into).collect())
    }

    pub fn lt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Lt(column.into(), value.into())
    }

    /// Whether `row` satisfies this predicate
    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Self::Eq(column, Value::Null) => row.get(column).map_or(true, Value::is_null),
            Self::Eq(column, value) => row.get(column) == Some(value),
            Self::In(column, values) => row.get(column).is_some_and(|v| values.contains(v)),
            Self::Lt(column, bound) => match (row.get(column), bound) {
                (Some(Value::Number(a)), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
                    (Some(a), Some(b)) => a < b,
                    _ => false,
                },
                (Some(Value::String(a)), Value::String(b)) => a < b,
                _ => false,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub ascending: bool,
}

/// Select parameters: filters, ordering and an optional row limit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub order: Vec<OrderBy>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn eq(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Filter::eq(column, value))
    }

    pub fn order_by(mut self, column: impl Into<String>, ascending: bool) -> Self {
        self.order.push(OrderBy {
            column: column.into(),
            ascending,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Record CRUD capability of the hosted backend
#[async_trait]
pub trait PersistenceService: Send + Sync {
    /// Rows of `table` matching every filter, ordered and limited as requested
    async fn select(&self, table: Table, query: &Query) -> Result<Vec<Row>, StoreError>;

    /// Insert new rows; fails if any row's `id` already exists
    async fn insert(&self, table: Table, rows: Vec<Row>) -> Result<(), StoreError>;

    /// Merge `patch` into every matching row; returns the number of rows touched
    async fn update(&self, table: Table, patch: Row, filters: &[Filter])
        -> Result<usize, StoreError>;

    /// Delete every matching row (cascading to owned rows); returns rows removed from `table`
    async fn delete(&self, table: Table, filters: &[Filter]) -> Result<usize, StoreError>;

    /// Insert rows, or merge them into existing rows with equal `conflict_columns`
    async fn upsert(
        &self,
        table: Table,
        rows: Vec<Row>,
        conflict_columns: &[&str],
    ) -> Result<(), StoreError>;
}

/// Serialize a typed model into a row
pub fn to_row<T: Serialize>(value: &T) -> Result<Row, StoreError> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::serialization(format!(
            "expected an object, got {}",
            other
        ))),
    }
}

/// Deserialize rows into typed models
pub fn from_rows<T: DeserializeOwned>(rows: Vec<Row>) -> Result<Vec<T>, StoreError> {
    rows.into_iter()
        .map(|row| serde_json::from_value(Value::Object(row)).map_err(StoreError::from))
        .collect()
}
