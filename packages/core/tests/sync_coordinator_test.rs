//! Integration tests for SyncCoordinator
//!
//! Time is paused in every test, so debounce windows and store latency are
//! simulated instead of waited for.

use anyhow::Result;
use keythoughts_core::{
    db::{InMemoryStore, Table},
    tree::Forest,
    utils::is_durable,
    BlockScope, KeyThoughtsConfig, SharedForest, SyncCoordinator, SyncOutcome, SyncService, TreeBlock,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

fn shared(tree: Vec<TreeBlock>) -> SharedForest {
    Arc::new(Mutex::new(Forest::from_tree(tree)))
}

fn coordinator(store: Arc<InMemoryStore>) -> SyncCoordinator {
    SyncCoordinator::new(SyncService::new(store, KeyThoughtsConfig::default()))
}

async fn root_ids(forest: &SharedForest) -> Vec<String> {
    forest.lock().await.roots().to_vec()
}

#[tokio::test(start_paused = true)]
async fn test_burst_of_requests_saves_once() -> Result<()> {
    let store = Arc::new(InMemoryStore::new());
    let coordinator = coordinator(store.clone());
    let scope = BlockScope::page("user-1", "page-1");
    let forest = shared(vec![TreeBlock::new("local-a", "typing")]);

    for _ in 0..3 {
        coordinator.request_sync(scope.clone(), forest.clone()).await;
        tokio::time::sleep(Duration::from_millis(300)).await;
    }
    assert!(coordinator.has_pending(&scope).await);
    assert!(store.calls().await.is_empty(), "nothing is written inside the debounce window");

    tokio::time::sleep(Duration::from_millis(1100)).await;

    assert_eq!(store.upsert_batches(Table::Blocks).await, vec![1]);
    assert!(!coordinator.has_pending(&scope).await);
    let ids = root_ids(&forest).await;
    assert_eq!(ids.len(), 1);
    assert!(is_durable(&ids[0]), "the forest adopts the durable id");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_sync_now_cancels_pending_debounce() -> Result<()> {
    let store = Arc::new(InMemoryStore::new());
    let coordinator = coordinator(store.clone());
    let scope = BlockScope::page("user-1", "page-1");
    let forest = shared(vec![TreeBlock::new("local-a", "saved explicitly")]);

    coordinator.request_sync(scope.clone(), forest.clone()).await;
    let outcome = coordinator.sync_now(scope.clone(), forest.clone()).await?;
    assert!(matches!(outcome, SyncOutcome::Completed(report) if report.minted == 1));

    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(store.upsert_batches(Table::Blocks).await, vec![1]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_saves_run_one_at_a_time() -> Result<()> {
    let store = Arc::new(InMemoryStore::with_latency(Duration::from_millis(100)));
    let coordinator = coordinator(store.clone());
    let scope = BlockScope::page("user-1", "page-1");

    let first = shared(vec![TreeBlock::new("local-first", "first")]);
    let superseded = shared(vec![TreeBlock::new("local-second", "second")]);
    let latest = shared(vec![TreeBlock::new("local-third", "third")]);

    let running = tokio::spawn({
        let coordinator = coordinator.clone();
        let scope = scope.clone();
        let first = first.clone();
        async move { coordinator.sync_now(scope, first).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(coordinator.is_in_flight(&scope).await);

    let second = coordinator.sync_now(scope.clone(), superseded.clone()).await?;
    let third = coordinator.sync_now(scope.clone(), latest.clone()).await?;
    assert_eq!(second, SyncOutcome::Queued);
    assert_eq!(third, SyncOutcome::Queued);

    assert!(matches!(running.await??, SyncOutcome::Completed(_)));
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(store.peak_concurrent_writes(), 1);
    assert_eq!(store.upsert_batches(Table::Blocks).await, vec![1, 1], "the superseded request never runs");
    assert!(!coordinator.is_in_flight(&scope).await);

    assert!(is_durable(&root_ids(&first).await[0]));
    assert_eq!(root_ids(&superseded).await, vec!["local-second".to_string()]);
    assert!(is_durable(&root_ids(&latest).await[0]));

    let rows = store.rows(Table::Blocks).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["content"], "third");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_edits_during_save_are_kept() -> Result<()> {
    let store = Arc::new(InMemoryStore::with_latency(Duration::from_millis(100)));
    let coordinator = coordinator(store.clone());
    let scope = BlockScope::page("user-1", "page-1");
    let forest = shared(vec![TreeBlock::new("local-a", "before")]);

    let running = tokio::spawn({
        let coordinator = coordinator.clone();
        let scope = scope.clone();
        let forest = forest.clone();
        async move { coordinator.sync_now(scope, forest).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    // The forest is not locked while the store is busy
    forest.lock().await.set_content("local-a", "after")?;

    running.await??;
    let editor = forest.lock().await;
    let id = editor.roots()[0].clone();
    assert!(is_durable(&id));
    assert_eq!(editor.body(&id).map(|body| body.display()), Some("after"));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_scopes_do_not_block_each_other() -> Result<()> {
    let store = Arc::new(InMemoryStore::with_latency(Duration::from_millis(100)));
    let coordinator = coordinator(store.clone());
    let page_one = BlockScope::page("user-1", "page-1");
    let page_two = BlockScope::page("user-1", "page-2");

    let running = tokio::spawn({
        let coordinator = coordinator.clone();
        let scope = page_one.clone();
        async move { coordinator.sync_now(scope, shared(vec![TreeBlock::new("a", "one")])).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    let other = coordinator
        .sync_now(page_two, shared(vec![TreeBlock::new("b", "two")]))
        .await?;

    assert!(matches!(other, SyncOutcome::Completed(_)));
    running.await??;
    assert_eq!(store.rows(Table::Blocks).await.len(), 2);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_drops_pending_requests() -> Result<()> {
    let store = Arc::new(InMemoryStore::new());
    let coordinator = coordinator(store.clone());
    let scope = BlockScope::page("user-1", "page-1");
    let forest = shared(vec![TreeBlock::new("local-a", "unsaved")]);

    coordinator.request_sync(scope.clone(), forest.clone()).await;
    coordinator.shutdown().await;
    coordinator.request_sync(scope.clone(), forest).await;
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert!(store.calls().await.is_empty());
    assert!(!coordinator.has_pending(&scope).await);
    Ok(())
}
