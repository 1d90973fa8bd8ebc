//! Legacy Blob Migration
//!
//! Before per-row storage, a user's whole outline lived as one JSON document
//! in `user_settings` under [`LEGACY_BLOCKS_KEY`]. Migration moves it into
//! the `blocks` table in three separately callable steps:
//!
//! - [`MigrationService::migrate`] archives the blob verbatim, flattens it
//!   with fresh durable ids, inserts the rows in batches, sets the completion
//!   marker, then validates
//! - [`MigrationService::validate`] checks row count, parent links and the
//!   absence of references against the archive
//! - [`MigrationService::rollback`] deletes the migrated rows, restores the
//!   archived blob byte-for-byte and clears the marker
//!
//! Validation failures are reported, never rolled back automatically.
//! Migrated rows carry the user but no page.

use crate::config::KeyThoughtsConfig;
use crate::db::{from_rows, Filter, PersistenceService, Query, Row, Table};
use crate::models::{BlockRecord, BlockScope, LegacyBlock};
use crate::services::error::{KeyThoughtsError, Result};
use crate::services::sync_service::scope_filters;
use crate::tree::{count_legacy, flatten_legacy};
use chrono::Utc;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

/// Setting holding the legacy outline document
pub const LEGACY_BLOCKS_KEY: &str = "key_thoughts_blocks";

/// Setting holding the verbatim archive taken before migration
pub const BACKUP_KEY: &str = "key_thoughts_blocks_backup";

/// Setting marking a finished migration (value `"true"`)
pub const MIGRATION_COMPLETED_KEY: &str = "blocks_migration_completed";

const SETTINGS_CONFLICT: [&str; 2] = ["user_id", "setting_key"];

/// Result of [`MigrationService::migrate`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationOutcome {
    /// Rows written to `blocks`
    pub inserted: usize,
    /// Whether the post-migration validation passed
    pub valid: bool,
}

/// One failed validation check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationFailure {
    /// No archive to compare against
    BackupMissing,
    /// The archive is not a legacy block document
    UnreadableBackup(String),
    /// Legacy node count and stored row count differ
    CountMismatch { expected: usize, actual: usize },
    /// A row names a parent that is not among the migrated rows
    DanglingParent { block_id: String, parent_id: String },
    /// A migrated row is flagged as a reference
    UnexpectedReference { block_id: String },
}

/// Outcome of [`MigrationService::validate`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub legacy_count: usize,
    pub migrated_count: usize,
    pub failures: Vec<ValidationFailure>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct MigrationService {
    store: Arc<dyn PersistenceService>,
    config: KeyThoughtsConfig,
}

impl MigrationService {
    pub fn new(store: Arc<dyn PersistenceService>, config: KeyThoughtsConfig) -> Self {
        Self { store, config }
    }

    async fn read_setting(&self, user_id: &str, key: &str) -> Result<Option<String>> {
        let rows = self
            .store
            .select(
                Table::UserSettings,
                &Query::new()
                    .eq("user_id", user_id)
                    .eq("setting_key", key)
                    .limit(1),
            )
            .await?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|row| match row.get("setting_value") {
                Some(Value::String(value)) => Some(value.clone()),
                Some(Value::Null) | None => None,
                Some(other) => Some(other.to_string()),
            }))
    }

    async fn write_setting(&self, user_id: &str, key: &str, value: &str) -> Result<()> {
        let mut row = Row::new();
        row.insert("user_id".into(), Value::String(user_id.to_string()));
        row.insert("setting_key".into(), Value::String(key.to_string()));
        row.insert("setting_value".into(), Value::String(value.to_string()));
        row.insert("updated_at".into(), Value::String(Utc::now().to_rfc3339()));
        self.store
            .upsert(Table::UserSettings, vec![row], &SETTINGS_CONFLICT)
            .await?;
        Ok(())
    }

    /// Whether the completion marker is set for `user_id`
    pub async fn is_migrated(&self, user_id: &str) -> Result<bool> {
        Ok(self
            .read_setting(user_id, MIGRATION_COMPLETED_KEY)
            .await?
            .is_some_and(|value| value == "true"))
    }

    /// Move the legacy document of `user_id` into block rows.
    ///
    /// A missing or empty document migrates as an empty one. Fails without writing
    /// blocks when the marker is already set.
    pub async fn migrate(&self, user_id: &str) -> Result<MigrationOutcome> {
        if user_id.is_empty() {
            return Err(KeyThoughtsError::NotAuthenticated);
        }
        if self.is_migrated(user_id).await? {
            return Err(KeyThoughtsError::invalid_input(format!(
                "blocks for user {} are already migrated",
                user_id
            )));
        }

        tracing::info!("Starting block migration for user {}", user_id);
        let legacy = self
            .read_setting(user_id, LEGACY_BLOCKS_KEY)
            .await?
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| "[]".to_string());
        tracing::debug!("Legacy document is {} bytes", legacy.len());

        self.write_setting(user_id, BACKUP_KEY, &legacy).await?;
        tracing::info!("Archived legacy document for user {}", user_id);

        let document: Vec<LegacyBlock> =
            serde_json::from_str(&legacy).map_err(KeyThoughtsError::malformed_document)?;
        let scope = BlockScope::user(user_id);
        let records = flatten_legacy(&document, &scope);
        tracing::info!(
            "Flattened {} top-level legacy blocks into {} rows",
            document.len(),
            records.len()
        );

        let inserted = self.insert_batched(records).await?;
        self.write_setting(user_id, MIGRATION_COMPLETED_KEY, "true").await?;

        let report = self.validate(user_id).await?;
        if report.is_valid() {
            tracing::info!("Migration for user {} finished: {} blocks", user_id, inserted);
        } else {
            tracing::error!("Migration for user {} failed validation: {:?}", user_id, report.failures);
        }

        Ok(MigrationOutcome {
            inserted,
            valid: report.is_valid(),
        })
    }

    async fn insert_batched(&self, records: Vec<BlockRecord>) -> Result<usize> {
        let batch_size = self.config.batch_size();
        let total_batches = records.len().div_ceil(batch_size);
        let mut inserted = 0;

        for (index, batch) in records.chunks(batch_size).enumerate() {
            let rows = batch
                .iter()
                .map(crate::db::to_row)
                .collect::<std::result::Result<Vec<_>, _>>()?;
            self.store
                .insert(Table::Blocks, rows)
                .await
                .map_err(|source| KeyThoughtsError::batch_failed(index, total_batches, source))?;
            inserted += batch.len();
            tracing::debug!("Inserted {}/{} migrated blocks", inserted, records.len());
        }
        Ok(inserted)
    }

    /// Compare the migrated rows of `user_id` with the archived document
    pub async fn validate(&self, user_id: &str) -> Result<ValidationReport> {
        let mut report = ValidationReport::default();

        let Some(backup) = self.read_setting(user_id, BACKUP_KEY).await? else {
            report.failures.push(ValidationFailure::BackupMissing);
            return Ok(report);
        };
        match serde_json::from_str::<Vec<LegacyBlock>>(&backup) {
            Ok(document) => report.legacy_count = count_legacy(&document),
            Err(e) => {
                report.failures.push(ValidationFailure::UnreadableBackup(e.to_string()));
                return Ok(report);
            }
        }

        let scope = BlockScope::user(user_id);
        let rows = self
            .store
            .select(
                Table::Blocks,
                &Query {
                    filters: scope_filters(&scope),
                    ..Query::new()
                }
                .order_by("position", true),
            )
            .await?;
        let records: Vec<BlockRecord> = from_rows(rows)?;
        report.migrated_count = records.len();

        if report.legacy_count != report.migrated_count {
            report.failures.push(ValidationFailure::CountMismatch {
                expected: report.legacy_count,
                actual: report.migrated_count,
            });
        }

        let ids: HashSet<&str> = records.iter().map(|r| r.id.as_str()).collect();
        for record in &records {
            if let Some(parent_id) = record.parent_id.as_deref() {
                if !ids.contains(parent_id) {
                    report.failures.push(ValidationFailure::DanglingParent {
                        block_id: record.id.clone(),
                        parent_id: parent_id.to_string(),
                    });
                }
            }
            if record.is_reference || record.original_block_id.is_some() {
                report.failures.push(ValidationFailure::UnexpectedReference {
                    block_id: record.id.clone(),
                });
            }
        }

        tracing::info!(
            "Migration check for user {}: legacy={}, migrated={}, failures={}",
            user_id,
            report.legacy_count,
            report.migrated_count,
            report.failures.len()
        );
        Ok(report)
    }

    /// Undo a migration: drop the rows, restore the archived document, clear the marker
    pub async fn rollback(&self, user_id: &str) -> Result<usize> {
        tracing::info!("Rolling back block migration for user {}", user_id);
        let backup = self
            .read_setting(user_id, BACKUP_KEY)
            .await?
            .ok_or_else(|| KeyThoughtsError::backup_missing(user_id))?;

        let scope = BlockScope::user(user_id);
        let deleted = self.store.delete(Table::Blocks, &scope_filters(&scope)).await?;
        tracing::info!("Deleted {} migrated blocks", deleted);

        self.write_setting(user_id, LEGACY_BLOCKS_KEY, &backup).await?;
        self.store
            .delete(
                Table::UserSettings,
                &[
                    Filter::eq("user_id", user_id),
                    Filter::eq("setting_key", MIGRATION_COMPLETED_KEY),
                ],
            )
            .await?;

        tracing::info!("Rollback for user {} complete", user_id);
        Ok(deleted)
    }
}
