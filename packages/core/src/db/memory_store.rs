//! In-memory PersistenceService
//!
//! A faithful stand-in for the hosted backend, used by tests and local tooling:
//!
//! - Unique `id` per table on insert
//! - Cascading deletes: project → pages → blocks and history, block → child blocks
//! - Keyed upsert with merge semantics
//! - A call log, so tests can assert on batching
//! - Failure injection and optional per-call latency, so tests can exercise
//!   partial batch application and overlapping syncs

use super::persistence::{Filter, PersistenceService, Query, Row, Table};
use super::StoreError;
use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering as CmpOrdering;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    Select,
    Insert,
    Update,
    Delete,
    Upsert,
}

/// One recorded call: operation, table and payload size (rows sent or affected)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreCall {
    pub operation: StoreOperation,
    pub table: Table,
    pub rows: usize,
}

#[derive(Debug)]
struct InjectedFailure {
    operation: StoreOperation,
    table: Table,
    remaining: usize,
}

#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<HashMap<Table, Vec<Row>>>,
    calls: Mutex<Vec<StoreCall>>,
    failures: Mutex<Vec<InjectedFailure>>,
    offline: AtomicBool,
    latency: Option<Duration>,
    active_writes: AtomicUsize,
    peak_writes: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose every call sleeps for `latency` before answering
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// Make the `nth` upcoming `operation` on `table` fail (1 = the very next one)
    pub async fn fail_on(&self, operation: StoreOperation, table: Table, nth: usize) {
        self.failures.lock().await.push(InjectedFailure {
            operation,
            table,
            remaining: nth.max(1),
        });
    }

    /// While offline, every call fails with a timeout
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub async fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().await.clone()
    }

    pub async fn clear_calls(&self) {
        self.calls.lock().await.clear();
    }

    /// Sizes of the upsert calls made against `table`, in order
    pub async fn upsert_batches(&self, table: Table) -> Vec<usize> {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|c| c.operation == StoreOperation::Upsert && c.table == table)
            .map(|c| c.rows)
            .collect()
    }

    /// Highest number of write calls that were ever in progress at once
    pub fn peak_concurrent_writes(&self) -> usize {
        self.peak_writes.load(Ordering::SeqCst)
    }

    /// Snapshot of every row in `table`
    pub async fn rows(&self, table: Table) -> Vec<Row> {
        self.tables
            .read()
            .await
            .get(&table)
            .cloned()
            .unwrap_or_default()
    }

    /// Insert rows directly, bypassing logging and failure injection
    pub async fn seed(&self, table: Table, rows: Vec<Row>) {
        self.tables
            .write()
            .await
            .entry(table)
            .or_default()
            .extend(rows);
    }

    async fn begin(
        &self,
        operation: StoreOperation,
        table: Table,
        rows: usize,
    ) -> Result<WriteGuard<'_>, StoreError> {
        self.calls.lock().await.push(StoreCall {
            operation,
            table,
            rows,
        });

        let guard = if operation == StoreOperation::Select {
            WriteGuard { store: None }
        } else {
            let active = self.active_writes.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_writes.fetch_max(active, Ordering::SeqCst);
            WriteGuard { store: Some(self) }
        };

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::timeout(table));
        }

        let mut failures = self.failures.lock().await;
        let mut triggered = None;
        for (index, failure) in failures.iter_mut().enumerate() {
            if failure.operation == operation && failure.table == table {
                failure.remaining -= 1;
                if failure.remaining == 0 {
                    triggered = Some(index);
                    break;
                }
            }
        }
        if let Some(index) = triggered {
            failures.remove(index);
            return Err(StoreError::rejected(table, "injected failure"));
        }

        Ok(guard)
    }
}

struct WriteGuard<'a> {
    store: Option<&'a InMemoryStore>,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        if let Some(store) = self.store {
            store.active_writes.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

fn matches_all(row: &Row, filters: &[Filter]) -> bool {
    filters.iter().all(|f| f.matches(row))
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> CmpOrdering {
    match (a, b) {
        (Some(Value::Number(a)), Some(Value::Number(b))) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(CmpOrdering::Equal),
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        (Some(Value::Bool(a)), Some(Value::Bool(b))) => a.cmp(b),
        (None | Some(Value::Null), None | Some(Value::Null)) => CmpOrdering::Equal,
        (None | Some(Value::Null), _) => CmpOrdering::Less,
        (_, None | Some(Value::Null)) => CmpOrdering::Greater,
        _ => CmpOrdering::Equal,
    }
}

fn ids_of(rows: &[Row]) -> Vec<Value> {
    rows.iter().filter_map(|r| r.get("id").cloned()).collect()
}

/// Remove matching rows from `table` and everything they own.
/// Returns the number of rows removed from `table` itself.
fn delete_cascading(
    tables: &mut HashMap<Table, Vec<Row>>,
    table: Table,
    filters: &[Filter],
) -> usize {
    let rows = tables.entry(table).or_default();
    let (removed, kept): (Vec<Row>, Vec<Row>) =
        rows.drain(..).partition(|row| matches_all(row, filters));
    *rows = kept;

    let ids = ids_of(&removed);
    if !ids.is_empty() {
        match table {
            Table::Projects => {
                delete_cascading(tables, Table::Pages, &[Filter::In("project_id".into(), ids)]);
            }
            Table::Pages => {
                let by_page = [Filter::In("page_id".into(), ids)];
                delete_cascading(tables, Table::Blocks, &by_page);
                delete_cascading(tables, Table::BlockHistory, &by_page);
            }
            Table::Blocks => {
                delete_cascading(tables, Table::Blocks, &[Filter::In("parent_id".into(), ids)]);
            }
            Table::BlockHistory | Table::UserSettings => {}
        }
    }

    removed.len()
}

#[async_trait]
impl PersistenceService for InMemoryStore {
    async fn select(&self, table: Table, query: &Query) -> Result<Vec<Row>, StoreError> {
        let _guard = self.begin(StoreOperation::Select, table, 0).await?;

        let tables = self.tables.read().await;
        let mut rows: Vec<Row> = tables
            .get(&table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| matches_all(row, &query.filters))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        rows.sort_by(|a, b| {
            query
                .order
                .iter()
                .map(|order| {
                    let ordering = compare_values(a.get(&order.column), b.get(&order.column));
                    if order.ascending {
                        ordering
                    } else {
                        ordering.reverse()
                    }
                })
                .find(|ordering| *ordering != CmpOrdering::Equal)
                .unwrap_or(CmpOrdering::Equal)
        });

        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn insert(&self, table: Table, rows: Vec<Row>) -> Result<(), StoreError> {
        let _guard = self.begin(StoreOperation::Insert, table, rows.len()).await?;

        let mut tables = self.tables.write().await;
        let existing = tables.entry(table).or_default();

        let mut seen: HashSet<String> = existing
            .iter()
            .filter_map(|r| r.get("id").map(Value::to_string))
            .collect();
        for row in &rows {
            if let Some(id) = row.get("id") {
                if !seen.insert(id.to_string()) {
                    return Err(StoreError::rejected(
                        table,
                        format!("duplicate key value for id {}", id),
                    ));
                }
            }
        }

        existing.extend(rows);
        Ok(())
    }

    async fn update(
        &self,
        table: Table,
        patch: Row,
        filters: &[Filter],
    ) -> Result<usize, StoreError> {
        let _guard = self.begin(StoreOperation::Update, table, 1).await?;

        let mut tables = self.tables.write().await;
        let mut touched = 0;
        for row in tables.entry(table).or_default().iter_mut() {
            if matches_all(row, filters) {
                for (column, value) in &patch {
                    row.insert(column.clone(), value.clone());
                }
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn delete(&self, table: Table, filters: &[Filter]) -> Result<usize, StoreError> {
        let _guard = self.begin(StoreOperation::Delete, table, 0).await?;

        let mut tables = self.tables.write().await;
        Ok(delete_cascading(&mut tables, table, filters))
    }

    async fn upsert(
        &self,
        table: Table,
        rows: Vec<Row>,
        conflict_columns: &[&str],
    ) -> Result<(), StoreError> {
        let _guard = self.begin(StoreOperation::Upsert, table, rows.len()).await?;

        let mut tables = self.tables.write().await;
        let existing = tables.entry(table).or_default();
        for row in rows {
            let position = existing.iter().position(|current| {
                conflict_columns
                    .iter()
                    .all(|column| current.get(*column) == row.get(*column))
            });
            match position {
                Some(index) => {
                    for (column, value) in row {
                        existing[index].insert(column, value);
                    }
                }
                None => existing.push(row),
            }
        }
        Ok(())
    }
}
