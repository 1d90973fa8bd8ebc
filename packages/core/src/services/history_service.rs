//! Block History
//!
//! Append-only log of content edits and manual whole-page snapshots in the
//! `block_history` table. Recording is best-effort: a failed history write is
//! logged at debug level and never fails the edit that caused it.

use crate::config::KeyThoughtsConfig;
use crate::db::{from_rows, to_row, Filter, PersistenceService, Query, Table};
use crate::models::{BlockScope, HistoryAction, HistoryEntry, TreeBlock};
use crate::services::error::{KeyThoughtsError, Result};
use crate::services::sync_service::{SyncReport, SyncService};
use crate::utils::identity::new_id;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;

const CONTENT_EDIT_DESCRIPTION: &str = "Content edited";
const MANUAL_SNAPSHOT_DESCRIPTION: &str = "Manual snapshot";

/// What a restore changed
#[derive(Debug, Clone, PartialEq)]
pub enum RestoreOutcome {
    /// The page was replaced by the snapshot tree, now holding durable ids
    Tree {
        tree: Vec<TreeBlock>,
        report: SyncReport,
    },
    /// One block's content was put back
    Block { block_id: String, content: String },
}

pub struct HistoryService {
    store: Arc<dyn PersistenceService>,
    config: KeyThoughtsConfig,
    sync: SyncService,
    last_cleanup: Mutex<Option<NaiveDate>>,
}

impl HistoryService {
    pub fn new(store: Arc<dyn PersistenceService>, config: KeyThoughtsConfig) -> Self {
        let sync = SyncService::new(store.clone(), config.clone());
        Self {
            store,
            config,
            sync,
            last_cleanup: Mutex::new(None),
        }
    }

    async fn append(&self, entry: &HistoryEntry) -> Result<()> {
        self.store
            .insert(Table::BlockHistory, vec![to_row(entry)?])
            .await?;
        Ok(())
    }

    fn entry(
        scope: &BlockScope,
        block_id: Option<String>,
        action: HistoryAction,
        content_before: Option<String>,
        content_after: Option<String>,
        description: String,
    ) -> HistoryEntry {
        HistoryEntry {
            id: new_id(),
            block_id,
            user_id: scope.user_id.clone(),
            page_id: scope.page_id.clone(),
            content_before,
            content_after,
            action,
            description,
            created_at: Utc::now(),
        }
    }

    /// Log an edit of `block_id`. Unchanged content is not logged.
    ///
    /// Returns whether an entry was written; failures are swallowed.
    pub async fn record_change(&self, scope: &BlockScope, block_id: &str, before: &str, after: &str) -> bool {
        if before == after {
            return false;
        }
        let entry = Self::entry(
            scope,
            Some(block_id.to_string()),
            HistoryAction::Update,
            Some(before.to_string()),
            Some(after.to_string()),
            CONTENT_EDIT_DESCRIPTION.to_string(),
        );
        match self.append(&entry).await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!("Ignoring history write failure for block {}: {}", block_id, e);
                false
            }
        }
    }

    /// Store the whole tree as one entry. Returns whether it was saved.
    pub async fn manual_snapshot(&self, scope: &BlockScope, tree: &[TreeBlock], description: Option<&str>) -> bool {
        let serialized = match serde_json::to_string(tree) {
            Ok(serialized) => serialized,
            Err(e) => {
                tracing::error!("Could not serialize snapshot for {}: {}", scope, e);
                return false;
            }
        };
        let entry = Self::entry(
            scope,
            None,
            HistoryAction::ManualSnapshot,
            None,
            Some(serialized),
            description.unwrap_or(MANUAL_SNAPSHOT_DESCRIPTION).to_string(),
        );
        match self.append(&entry).await {
            Ok(()) => {
                tracing::info!("Saved manual snapshot {} for {}", entry.id, scope);
                true
            }
            Err(e) => {
                tracing::error!("Manual snapshot for {} failed: {}", scope, e);
                false
            }
        }
    }

    /// Entries of the scope's page, newest first, at most `history_fetch_limit`
    pub async fn list(&self, scope: &BlockScope) -> Result<Vec<HistoryEntry>> {
        let query = Query::new()
            .eq("user_id", scope.user_id.as_str())
            .filter(Filter::eq_opt("page_id", scope.page_id.as_deref()))
            .order_by("created_at", false)
            .limit(self.config.history_fetch_limit);
        let rows = self.store.select(Table::BlockHistory, &query).await?;
        Ok(from_rows(rows)?)
    }

    /// Delete the user's entries older than the retention window.
    ///
    /// Runs at most once per calendar day (UTC) per service; later calls that
    /// day return `Ok(None)`.
    pub async fn cleanup_older_than_retention(&self, scope: &BlockScope, now: DateTime<Utc>) -> Result<Option<usize>> {
        let today = now.date_naive();
        let mut last_cleanup = self.last_cleanup.lock().await;
        if *last_cleanup == Some(today) {
            return Ok(None);
        }

        let cutoff = now - Duration::days(self.config.history_retention_days);
        let cutoff = serde_json::to_value(cutoff)?;
        let removed = self
            .store
            .delete(
                Table::BlockHistory,
                &[
                    Filter::eq("user_id", scope.user_id.as_str()),
                    Filter::lt("created_at", cutoff),
                ],
            )
            .await?;

        *last_cleanup = Some(today);
        tracing::info!("Removed {} history entries older than {} days", removed, self.config.history_retention_days);
        Ok(Some(removed))
    }

    async fn find(&self, scope: &BlockScope, entry_id: &str) -> Result<HistoryEntry> {
        let rows = self
            .store
            .select(
                Table::BlockHistory,
                &Query::new()
                    .eq("id", entry_id)
                    .eq("user_id", scope.user_id.as_str())
                    .limit(1),
            )
            .await?;
        from_rows::<HistoryEntry>(rows)?
            .into_iter()
            .next()
            .ok_or_else(|| KeyThoughtsError::invalid_input(format!("history entry {} not found", entry_id)))
    }

    /// Roll back to entry `entry_id`.
    ///
    /// A snapshot entry first snapshots `current` (so the restore itself can be
    /// undone), then saves the snapshot tree as the page. A content entry puts
    /// its `content_after` back on its block.
    pub async fn restore(&self, scope: &BlockScope, entry_id: &str, current: &[TreeBlock]) -> Result<RestoreOutcome> {
        let entry = self.find(scope, entry_id).await?;

        if entry.action == HistoryAction::ManualSnapshot {
            let raw = entry
                .content_after
                .as_deref()
                .ok_or_else(|| KeyThoughtsError::invalid_snapshot(&entry.id, "snapshot has no content"))?;
            let value: Value =
                serde_json::from_str(raw).map_err(|e| KeyThoughtsError::invalid_snapshot(&entry.id, e))?;
            if !value.is_array() {
                return Err(KeyThoughtsError::invalid_snapshot(&entry.id, "snapshot is not a block list"));
            }
            let mut tree: Vec<TreeBlock> =
                serde_json::from_value(value).map_err(|e| KeyThoughtsError::invalid_snapshot(&entry.id, e))?;

            let description = format!("Saved before restore ({})", Utc::now().format("%Y-%m-%d %H:%M:%S UTC"));
            if !self.manual_snapshot(scope, current, Some(&description)).await {
                tracing::warn!("Could not save current tree before restoring {}", entry.id);
            }

            let report = self.sync.sync_tree(scope, &mut tree).await?;
            tracing::info!("Restored snapshot {} for {}", entry.id, scope);
            return Ok(RestoreOutcome::Tree { tree, report });
        }

        let block_id = entry
            .block_id
            .ok_or_else(|| KeyThoughtsError::invalid_input(format!("history entry {} has no block", entry.id)))?;
        let content = entry
            .content_after
            .ok_or_else(|| KeyThoughtsError::invalid_input(format!("history entry {} has no content", entry.id)))?;

        let mut patch = serde_json::Map::new();
        patch.insert("content".into(), Value::String(content.clone()));
        patch.insert("updated_at".into(), Value::String(Utc::now().to_rfc3339()));
        let touched = self
            .store
            .update(
                Table::Blocks,
                patch,
                &[
                    Filter::eq("id", block_id.as_str()),
                    Filter::eq("user_id", scope.user_id.as_str()),
                ],
            )
            .await?;
        if touched == 0 {
            return Err(KeyThoughtsError::block_not_found(block_id));
        }

        tracing::info!("Restored content of block {} from history", block_id);
        Ok(RestoreOutcome::Block { block_id, content })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{InMemoryStore, StoreOperation};

    fn setup() -> (Arc<InMemoryStore>, HistoryService, BlockScope) {
        let store = Arc::new(InMemoryStore::new());
        let service = HistoryService::new(store.clone(), KeyThoughtsConfig::default());
        (store, service, BlockScope::page("user-1", "page-1"))
    }

    #[tokio::test]
    async fn unchanged_content_is_not_recorded() {
        let (store, history, scope) = setup();
        assert!(!history.record_change(&scope, "b", "same", "same").await);
        assert!(store.rows(Table::BlockHistory).await.is_empty());
    }

    #[tokio::test]
    async fn failed_history_write_is_swallowed() {
        let (store, history, scope) = setup();
        store.fail_on(StoreOperation::Insert, Table::BlockHistory, 1).await;
        assert!(!history.record_change(&scope, "b", "old", "new").await);
        assert!(history.record_change(&scope, "b", "old", "new").await);
    }

    #[tokio::test]
    async fn snapshot_stores_serialized_tree_without_block() {
        let (_, history, scope) = setup();
        let tree = vec![TreeBlock::new("a", "hello")];
        assert!(history.manual_snapshot(&scope, &tree, None).await);

        let entries = history.list(&scope).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].is_snapshot());
        assert_eq!(entries[0].description, MANUAL_SNAPSHOT_DESCRIPTION);
        let stored: Vec<TreeBlock> = serde_json::from_str(entries[0].content_after.as_deref().unwrap()).unwrap();
        assert_eq!(stored, tree);
    }

    #[tokio::test]
    async fn cleanup_runs_once_per_day() {
        let (_, history, scope) = setup();
        let now = Utc::now();
        assert_eq!(history.cleanup_older_than_retention(&scope, now).await.unwrap(), Some(0));
        assert_eq!(history.cleanup_older_than_retention(&scope, now).await.unwrap(), None);
        let tomorrow = now + Duration::days(1);
        assert!(history.cleanup_older_than_retention(&scope, tomorrow).await.unwrap().is_some());
    }
}
