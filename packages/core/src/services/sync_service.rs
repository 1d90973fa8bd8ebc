//! Block Tree Synchronization
//!
//! Loads a page's rows into a forest and writes a forest back as rows.
//!
//! # Save order
//!
//! 1. Recompute depths, remap ephemeral ids, flatten (see [`crate::tree::flattener`])
//! 2. Fetch the ids currently stored for the scope
//! 3. Delete stored ids the forest no longer contains
//! 4. Upsert every emitted row, keyed by `id`, in batches of at most
//!    [`KeyThoughtsConfig::upsert_batch_size`]
//! 5. Write the durable ids back into the caller's forest
//!
//! Step 5 only happens when every batch succeeded. A failed batch leaves the
//! earlier batches applied and the forest untouched, so the next save retries
//! with the same ephemeral ids and converges.

use crate::config::KeyThoughtsConfig;
use crate::db::{from_rows, to_row, Filter, PersistenceService, Query, Row, Table};
use crate::models::{BlockRecord, BlockScope, TreeBlock};
use crate::services::error::{KeyThoughtsError, Result};
use crate::tree::{build_tree, enrich_with_placeholder, flatten_forest, IdRemap};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

/// What one save did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Rows sent through upsert
    pub upserted: usize,
    /// Stored rows removed because the forest no longer has them
    pub deleted: usize,
    /// Upsert calls issued
    pub batches: usize,
    /// Nodes that received a new durable id
    pub minted: usize,
}

/// Filters selecting every block row of `scope`
pub(crate) fn scope_filters(scope: &BlockScope) -> Vec<Filter> {
    vec![
        Filter::eq("user_id", scope.user_id.as_str()),
        Filter::eq_opt("page_id", scope.page_id.as_deref()),
    ]
}

/// Upsert `rows` keyed by `id` in chunks of `batch_size`. Stops at the first
/// failing chunk; returns the number of calls made.
pub(crate) async fn upsert_in_batches(
    store: &dyn PersistenceService,
    table: Table,
    rows: Vec<Row>,
    batch_size: usize,
) -> Result<usize> {
    let batch_size = batch_size.max(1);
    let total = rows.len().div_ceil(batch_size);
    let mut rows = rows.into_iter().peekable();
    let mut applied = 0;

    while rows.peek().is_some() {
        let batch: Vec<Row> = rows.by_ref().take(batch_size).collect();
        let size = batch.len();
        if let Err(source) = store.upsert(table, batch, &["id"]).await {
            tracing::warn!(
                "Upsert batch {}/{} into {} failed: {}",
                applied + 1,
                total,
                table,
                source
            );
            return Err(KeyThoughtsError::batch_failed(applied, total, source));
        }
        applied += 1;
        tracing::debug!("Upserted batch {}/{} ({} rows) into {}", applied, total, size, table);
    }

    Ok(applied)
}

/// Reads and writes whole block forests for a scope
#[derive(Clone)]
pub struct SyncService {
    store: Arc<dyn PersistenceService>,
    config: KeyThoughtsConfig,
}

impl SyncService {
    pub fn new(store: Arc<dyn PersistenceService>, config: KeyThoughtsConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &KeyThoughtsConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn PersistenceService> {
        &self.store
    }

    /// Stored rows of `scope`, ordered by position
    pub async fn load_records(&self, scope: &BlockScope) -> Result<Vec<BlockRecord>> {
        let query = Query {
            filters: scope_filters(scope),
            ..Query::new()
        }
        .order_by("position", true);

        let rows = self.store.select(Table::Blocks, &query).await?;
        Ok(from_rows(rows)?)
    }

    /// Build the scope's forest with references resolved.
    ///
    /// An empty scope yields one unsaved empty root block; nothing is written.
    pub async fn load_tree(&self, scope: &BlockScope) -> Result<Vec<TreeBlock>> {
        let records = self.load_records(scope).await?;
        tracing::debug!("Loaded {} block rows for {}", records.len(), scope);
        let enriched = enrich_with_placeholder(records, &self.config.reference_not_found_placeholder);
        Ok(build_tree(enriched))
    }

    /// Save `forest` to `scope` and write durable ids back into it.
    ///
    /// An empty forest is a no-op; the stored scope is left untouched.
    pub async fn sync_tree(&self, scope: &BlockScope, forest: &mut [TreeBlock]) -> Result<SyncReport> {
        let (report, remap) = self.sync_snapshot(scope, forest).await?;
        remap.apply(forest);
        Ok(report)
    }

    /// Save `forest` without rewriting its ids; the returned table holds the
    /// ids the caller should adopt.
    pub async fn sync_snapshot(
        &self,
        scope: &BlockScope,
        forest: &mut [TreeBlock],
    ) -> Result<(SyncReport, IdRemap)> {
        if forest.is_empty() {
            tracing::debug!("Empty forest for {}; nothing to sync", scope);
            return Ok((SyncReport::default(), IdRemap::default()));
        }

        let (records, remap) = flatten_forest(forest, scope);
        tracing::info!(
            "Syncing {} blocks for {} ({} new ids)",
            records.len(),
            scope,
            remap.minted()
        );

        let mut report = self.write_records(scope, records).await?;
        report.minted = remap.minted();

        tracing::info!(
            "Sync finished for {}: {} upserted in {} batches, {} deleted",
            scope,
            report.upserted,
            report.batches,
            report.deleted
        );
        Ok((report, remap))
    }

    /// Make the stored scope equal `records`: delete what is gone, upsert the rest
    pub async fn write_records(&self, scope: &BlockScope, records: Vec<BlockRecord>) -> Result<SyncReport> {
        let stored = self
            .store
            .select(
                Table::Blocks,
                &Query {
                    filters: scope_filters(scope),
                    ..Query::new()
                },
            )
            .await?;

        let emitted: HashSet<&str> = records.iter().map(|r| r.id.as_str()).collect();
        let stale: Vec<String> = stored
            .iter()
            .filter_map(|row| row.get("id").and_then(Value::as_str))
            .filter(|id| !emitted.contains(id))
            .map(str::to_string)
            .collect();

        let mut deleted = 0;
        if !stale.is_empty() {
            tracing::debug!("Deleting {} stale blocks from {}", stale.len(), scope);
            let mut filters = scope_filters(scope);
            filters.push(Filter::any_of("id", stale));
            deleted = self.store.delete(Table::Blocks, &filters).await?;
        }

        let upserted = records.len();
        let rows = records.iter().map(to_row).collect::<std::result::Result<Vec<_>, _>>()?;
        let batches = upsert_in_batches(self.store.as_ref(), Table::Blocks, rows, self.config.batch_size()).await?;

        Ok(SyncReport {
            upserted,
            deleted,
            batches,
            minted: 0,
        })
    }
}
