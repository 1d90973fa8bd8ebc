//! Integration tests for MigrationService
//!
//! Tests cover:
//! - Migrating a nested legacy document into block rows
//! - Byte-for-byte rollback of the archived document
//! - Validation failures (count, dangling parent, references)
//! - Refusing to migrate twice

use anyhow::Result;
use keythoughts_core::{
    db::{Filter, InMemoryStore, PersistenceService, Row, StoreOperation, Table},
    services::{BACKUP_KEY, LEGACY_BLOCKS_KEY, MIGRATION_COMPLETED_KEY},
    BlockScope, KeyThoughtsConfig, KeyThoughtsError, MigrationService, SyncService, ValidationFailure,
};
use serde_json::{json, Value};
use std::sync::Arc;

const USER: &str = "user-1";

// Odd spacing on purpose: rollback must restore these exact bytes
const LEGACY_DOCUMENT: &str = r#"[{"content":"A","isOpen":false,"children":[{"content":"B"}]},  {"content":"C","type":"toggle"}]"#;

fn setting_row(user_id: &str, key: &str, value: &str) -> Row {
    json!({ "user_id": user_id, "setting_key": key, "setting_value": value })
        .as_object()
        .unwrap()
        .clone()
}

async fn create_test_env(document: Option<&str>) -> (Arc<InMemoryStore>, MigrationService) {
    let store = Arc::new(InMemoryStore::new());
    if let Some(document) = document {
        store
            .seed(Table::UserSettings, vec![setting_row(USER, LEGACY_BLOCKS_KEY, document)])
            .await;
    }
    let migration = MigrationService::new(store.clone(), KeyThoughtsConfig::default());
    (store, migration)
}

async fn setting(store: &InMemoryStore, key: &str) -> Option<Value> {
    store
        .rows(Table::UserSettings)
        .await
        .into_iter()
        .find(|row| row["user_id"] == USER && row["setting_key"] == key)
        .map(|row| row["setting_value"].clone())
}

#[tokio::test]
async fn test_migrate_nested_document() -> Result<()> {
    let (store, migration) = create_test_env(Some(LEGACY_DOCUMENT)).await;

    let outcome = migration.migrate(USER).await?;

    assert_eq!(outcome.inserted, 3);
    assert!(outcome.valid);
    assert_eq!(setting(&store, BACKUP_KEY).await, Some(json!(LEGACY_DOCUMENT)));
    assert_eq!(setting(&store, MIGRATION_COMPLETED_KEY).await, Some(json!("true")));

    let rows = store.rows(Table::Blocks).await;
    assert_eq!(rows.len(), 3);
    let by_content = |content: &str| rows.iter().find(|r| r["content"] == content).cloned().unwrap();
    let (a, b, c) = (by_content("A"), by_content("B"), by_content("C"));

    assert_eq!(a["parent_id"], Value::Null);
    assert_eq!(a["is_open"], false);
    assert_eq!(a["position"], 0);
    assert_eq!(b["parent_id"], a["id"]);
    assert_eq!(b["depth"], 1);
    assert_eq!(b["position"], 0);
    assert_eq!(c["parent_id"], Value::Null);
    assert_eq!(c["position"], 1);
    assert!(rows.iter().all(|r| r["user_id"] == USER && r["page_id"].is_null()));

    // The migrated rows load as the legacy shape
    let sync = SyncService::new(store.clone(), KeyThoughtsConfig::default());
    let tree = sync.load_tree(&BlockScope::user(USER)).await?;
    assert_eq!(tree.len(), 2);
    assert_eq!(tree[0].content(), "A");
    assert!(!tree[0].is_open);
    assert_eq!(tree[0].children[0].content(), "B");
    assert_eq!(tree[1].content(), "C");
    Ok(())
}

#[tokio::test]
async fn test_migration_respects_batch_size() -> Result<()> {
    let store = Arc::new(InMemoryStore::new());
    let document: Vec<Value> = (0..5).map(|i| json!({ "content": format!("n{i}") })).collect();
    let document = serde_json::to_string(&document)?;
    store
        .seed(Table::UserSettings, vec![setting_row(USER, LEGACY_BLOCKS_KEY, &document)])
        .await;
    let config = KeyThoughtsConfig {
        upsert_batch_size: 2,
        ..KeyThoughtsConfig::default()
    };

    let outcome = MigrationService::new(store.clone(), config).migrate(USER).await?;

    assert_eq!(outcome.inserted, 5);
    let inserts: Vec<usize> = store
        .calls()
        .await
        .iter()
        .filter(|c| c.table == Table::Blocks && c.operation == StoreOperation::Insert)
        .map(|c| c.rows)
        .collect();
    assert_eq!(inserts, vec![2, 2, 1]);
    Ok(())
}

#[tokio::test]
async fn test_rollback_restores_document_byte_for_byte() -> Result<()> {
    let (store, migration) = create_test_env(Some(LEGACY_DOCUMENT)).await;
    migration.migrate(USER).await?;

    let deleted = migration.rollback(USER).await?;

    assert_eq!(deleted, 3);
    assert!(store.rows(Table::Blocks).await.is_empty());
    assert_eq!(setting(&store, LEGACY_BLOCKS_KEY).await, Some(json!(LEGACY_DOCUMENT)));
    assert_eq!(setting(&store, MIGRATION_COMPLETED_KEY).await, None);
    assert!(!migration.is_migrated(USER).await?);

    // After a rollback the migration can run again
    let again = migration.migrate(USER).await?;
    assert_eq!(again.inserted, 3);
    assert!(again.valid);
    Ok(())
}

#[tokio::test]
async fn test_rollback_leaves_other_users_alone() -> Result<()> {
    let (store, migration) = create_test_env(Some(LEGACY_DOCUMENT)).await;
    store
        .seed(Table::UserSettings, vec![setting_row("user-2", LEGACY_BLOCKS_KEY, "[]")])
        .await;
    migration.migrate(USER).await?;
    migration.migrate("user-2").await?;

    let mut foreign = Row::new();
    foreign.insert("id".into(), json!("foreign"));
    foreign.insert("user_id".into(), json!("user-2"));
    foreign.insert("page_id".into(), Value::Null);
    store.seed(Table::Blocks, vec![foreign]).await;

    migration.rollback(USER).await?;

    let rows = store.rows(Table::Blocks).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["id"], "foreign");
    assert!(migration.is_migrated("user-2").await?);
    Ok(())
}

#[tokio::test]
async fn test_rollback_without_backup() -> Result<()> {
    let (_store, migration) = create_test_env(Some(LEGACY_DOCUMENT)).await;

    let err = migration.rollback(USER).await.unwrap_err();

    assert!(matches!(err, KeyThoughtsError::BackupMissing { ref user_id } if user_id == USER));
    Ok(())
}

#[tokio::test]
async fn test_migrate_twice_is_rejected() -> Result<()> {
    let (store, migration) = create_test_env(Some(LEGACY_DOCUMENT)).await;
    migration.migrate(USER).await?;

    let err = migration.migrate(USER).await.unwrap_err();

    assert!(matches!(err, KeyThoughtsError::InvalidInput(_)));
    assert_eq!(store.rows(Table::Blocks).await.len(), 3);
    Ok(())
}

#[tokio::test]
async fn test_migrate_requires_user() -> Result<()> {
    let (_store, migration) = create_test_env(None).await;
    assert!(matches!(migration.migrate("").await, Err(KeyThoughtsError::NotAuthenticated)));
    Ok(())
}

#[tokio::test]
async fn test_empty_legacy_value_migrates_as_empty_document() -> Result<()> {
    let (store, migration) = create_test_env(Some("")).await;

    let outcome = migration.migrate(USER).await?;

    assert_eq!(outcome.inserted, 0);
    assert!(outcome.valid);
    assert_eq!(setting(&store, BACKUP_KEY).await, Some(json!("[]")));
    assert!(store.rows(Table::Blocks).await.is_empty());
    assert!(migration.is_migrated(USER).await?);
    assert!(migration.validate(USER).await?.is_valid());
    Ok(())
}

#[tokio::test]
async fn test_malformed_document_fails_after_archiving() -> Result<()> {
    let (store, migration) = create_test_env(Some("{not json")).await;

    let err = migration.migrate(USER).await.unwrap_err();

    assert!(matches!(err, KeyThoughtsError::MalformedDocument(_)));
    assert!(!err.is_transient(), "a bad document does not heal on retry");
    assert_eq!(setting(&store, BACKUP_KEY).await, Some(json!("{not json")));
    assert!(store.rows(Table::Blocks).await.is_empty());
    assert!(!migration.is_migrated(USER).await?);
    Ok(())
}

// =========================================================================
// Validation
// =========================================================================

#[tokio::test]
async fn test_validate_reports_count_mismatch_and_reference() -> Result<()> {
    let (store, migration) = create_test_env(Some(LEGACY_DOCUMENT)).await;
    migration.migrate(USER).await?;

    let mut stray = Row::new();
    stray.insert("id".into(), json!("stray"));
    stray.insert("user_id".into(), json!(USER));
    stray.insert("page_id".into(), Value::Null);
    stray.insert("is_reference".into(), json!(true));
    stray.insert("original_block_id".into(), json!("elsewhere"));
    store.seed(Table::Blocks, vec![stray]).await;

    let report = migration.validate(USER).await?;

    assert!(!report.is_valid());
    assert_eq!(report.legacy_count, 3);
    assert_eq!(report.migrated_count, 4);
    assert!(report
        .failures
        .contains(&ValidationFailure::CountMismatch { expected: 3, actual: 4 }));
    assert!(report.failures.contains(&ValidationFailure::UnexpectedReference {
        block_id: "stray".into()
    }));
    Ok(())
}

#[tokio::test]
async fn test_validate_reports_dangling_parent() -> Result<()> {
    let (store, migration) = create_test_env(Some(r#"[{"content":"only"}]"#)).await;
    migration.migrate(USER).await?;

    let rows = store.rows(Table::Blocks).await;
    let id = rows[0]["id"].as_str().unwrap().to_string();
    // Re-parent the only row onto a block that does not exist
    let mut patch = Row::new();
    patch.insert("parent_id".into(), json!("ghost"));
    store
        .update(Table::Blocks, patch, &[Filter::eq("id", id.as_str())])
        .await?;

    let report = migration.validate(USER).await?;

    assert_eq!(
        report.failures,
        vec![ValidationFailure::DanglingParent {
            block_id: id,
            parent_id: "ghost".into(),
        }]
    );
    Ok(())
}
