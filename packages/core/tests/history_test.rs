//! Integration tests for HistoryService
//!
//! Tests cover:
//! - Listing order and fetch limit
//! - Snapshot restore (with the automatic pre-restore snapshot)
//! - Single-block content restore
//! - Malformed snapshots
//! - Retention cleanup

use anyhow::Result;
use chrono::{Duration, Utc};
use keythoughts_core::{
    db::{to_row, InMemoryStore, Table},
    utils::new_id,
    BlockScope, HistoryAction, HistoryEntry, HistoryService, KeyThoughtsConfig, KeyThoughtsError,
    RestoreOutcome, SyncService, TreeBlock,
};
use std::sync::Arc;

struct TestEnv {
    store: Arc<InMemoryStore>,
    history: HistoryService,
    sync: SyncService,
    scope: BlockScope,
}

fn create_test_env(config: KeyThoughtsConfig) -> TestEnv {
    let store = Arc::new(InMemoryStore::new());
    TestEnv {
        history: HistoryService::new(store.clone(), config.clone()),
        sync: SyncService::new(store.clone(), config),
        store,
        scope: BlockScope::page("user-1", "page-1"),
    }
}

fn entry(scope: &BlockScope, action: HistoryAction, content_after: &str, age: Duration) -> HistoryEntry {
    HistoryEntry {
        id: new_id(),
        block_id: None,
        user_id: scope.user_id.clone(),
        page_id: scope.page_id.clone(),
        content_before: None,
        content_after: Some(content_after.to_string()),
        action,
        description: String::new(),
        created_at: Utc::now() - age,
    }
}

#[tokio::test]
async fn test_list_is_newest_first_and_limited() -> Result<()> {
    let env = create_test_env(KeyThoughtsConfig {
        history_fetch_limit: 3,
        ..KeyThoughtsConfig::default()
    });
    let rows = (0..5)
        .map(|i| to_row(&entry(&env.scope, HistoryAction::Update, &format!("v{i}"), Duration::minutes(10 - i))))
        .collect::<Result<Vec<_>, _>>()?;
    env.store.seed(Table::BlockHistory, rows).await;

    let entries = env.history.list(&env.scope).await?;

    let contents: Vec<&str> = entries.iter().filter_map(|e| e.content_after.as_deref()).collect();
    assert_eq!(contents, vec!["v4", "v3", "v2"]);
    Ok(())
}

#[tokio::test]
async fn test_list_is_scoped_to_page() -> Result<()> {
    let env = create_test_env(KeyThoughtsConfig::default());
    let other = BlockScope::page("user-1", "page-2");

    assert!(env.history.record_change(&env.scope, "block", "a", "b").await);
    assert!(env.history.record_change(&other, "block", "c", "d").await);

    let entries = env.history.list(&env.scope).await?;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].content_before.as_deref(), Some("a"));
    assert_eq!(entries[0].description, "Content edited");
    Ok(())
}

#[tokio::test]
async fn test_restore_snapshot_replaces_page_and_saves_current() -> Result<()> {
    let env = create_test_env(KeyThoughtsConfig::default());
    let mut original = vec![
        TreeBlock::new("local-a", "Plan").with_children(vec![TreeBlock::new("local-b", "Step one")]),
    ];
    env.sync.sync_tree(&env.scope, &mut original).await?;
    assert!(env.history.manual_snapshot(&env.scope, &original, Some("Before rewrite")).await);

    let mut rewritten = vec![TreeBlock::new("local-c", "Something else")];
    env.sync.sync_tree(&env.scope, &mut rewritten).await?;

    let snapshot_id = env
        .history
        .list(&env.scope)
        .await?
        .into_iter()
        .find(|e| e.description == "Before rewrite")
        .map(|e| e.id)
        .unwrap();

    let outcome = env.history.restore(&env.scope, &snapshot_id, &rewritten).await?;

    let RestoreOutcome::Tree { tree, report } = outcome else {
        panic!("expected a tree restore");
    };
    assert_eq!(tree, original);
    assert_eq!(report.minted, 0);
    assert_eq!(report.deleted, 1);
    assert_eq!(env.sync.load_tree(&env.scope).await?, original);

    let entries = env.history.list(&env.scope).await?;
    assert_eq!(entries.len(), 2);
    let safety = &entries[0];
    assert!(safety.description.starts_with("Saved before restore ("));
    let saved: Vec<TreeBlock> = serde_json::from_str(safety.content_after.as_deref().unwrap())?;
    assert_eq!(saved, rewritten);
    Ok(())
}

#[tokio::test]
async fn test_restore_content_entry_rewrites_block() -> Result<()> {
    let env = create_test_env(KeyThoughtsConfig::default());
    let mut forest = vec![TreeBlock::new("local-a", "third draft")];
    env.sync.sync_tree(&env.scope, &mut forest).await?;
    let block_id = forest[0].id.clone();

    assert!(env.history.record_change(&env.scope, &block_id, "first draft", "second draft").await);
    let entry_id = env.history.list(&env.scope).await?[0].id.clone();

    let outcome = env.history.restore(&env.scope, &entry_id, &forest).await?;

    assert_eq!(
        outcome,
        RestoreOutcome::Block {
            block_id: block_id.clone(),
            content: "second draft".into(),
        }
    );
    assert_eq!(env.sync.load_tree(&env.scope).await?[0].content(), "second draft");
    Ok(())
}

#[tokio::test]
async fn test_restore_of_deleted_block_fails() -> Result<()> {
    let env = create_test_env(KeyThoughtsConfig::default());
    assert!(env.history.record_change(&env.scope, "gone", "a", "b").await);
    let entry_id = env.history.list(&env.scope).await?[0].id.clone();

    let err = env.history.restore(&env.scope, &entry_id, &[]).await.unwrap_err();
    assert!(matches!(err, KeyThoughtsError::BlockNotFound { ref id } if id == "gone"));
    Ok(())
}

#[tokio::test]
async fn test_malformed_snapshot_is_rejected() -> Result<()> {
    let env = create_test_env(KeyThoughtsConfig::default());
    let bad = entry(&env.scope, HistoryAction::ManualSnapshot, r#"{"not":"a list"}"#, Duration::zero());
    let bad_id = bad.id.clone();
    env.store.seed(Table::BlockHistory, vec![to_row(&bad)?]).await;

    let err = env.history.restore(&env.scope, &bad_id, &[]).await.unwrap_err();

    assert!(matches!(err, KeyThoughtsError::InvalidSnapshot { ref id, .. } if *id == bad_id));
    assert!(env.store.rows(Table::Blocks).await.is_empty(), "nothing is written");
    Ok(())
}

#[tokio::test]
async fn test_cleanup_removes_only_expired_entries() -> Result<()> {
    let env = create_test_env(KeyThoughtsConfig::default());
    let other_user = BlockScope::page("user-2", "page-9");
    let rows = vec![
        to_row(&entry(&env.scope, HistoryAction::Update, "ancient", Duration::days(45)))?,
        to_row(&entry(&env.scope, HistoryAction::Update, "recent", Duration::days(2)))?,
        to_row(&entry(&other_user, HistoryAction::Update, "not mine", Duration::days(45)))?,
    ];
    env.store.seed(Table::BlockHistory, rows).await;

    let removed = env.history.cleanup_older_than_retention(&env.scope, Utc::now()).await?;

    assert_eq!(removed, Some(1));
    let remaining: Vec<String> = env
        .store
        .rows(Table::BlockHistory)
        .await
        .iter()
        .filter_map(|r| r["content_after"].as_str().map(str::to_string))
        .collect();
    assert_eq!(remaining, vec!["recent".to_string(), "not mine".to_string()]);
    Ok(())
}
