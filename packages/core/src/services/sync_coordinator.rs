//! Per-scope Sync Coordination
//!
//! Editors call [`SyncCoordinator::request_sync`] after every mutation and
//! [`SyncCoordinator::sync_now`] for an explicit save. The coordinator
//! guarantees that at most one save runs per scope:
//!
//! - `request_sync` (re)starts a debounce timer; only the last request in a
//!   burst of edits reaches the store
//! - a save requested while another is in flight for the same scope is parked
//!   in a single slot (newest request wins) and runs right after the current
//!   one finishes
//! - the forest lock is held only while snapshotting and while adopting the
//!   durable ids, so the editor keeps working during a save
//!
//! Different scopes never block each other.

use crate::models::BlockScope;
use crate::services::error::Result;
use crate::services::sync_service::{SyncReport, SyncService};
use crate::tree::Forest;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// The editor's live forest, shared with the coordinator
pub type SharedForest = Arc<Mutex<Forest>>;

/// Result of asking for a save
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The save ran to completion
    Completed(SyncReport),
    /// Another save was in flight; this one will run after it
    Queued,
}

#[derive(Default)]
struct ScopeState {
    in_flight: bool,
    queued: Option<SharedForest>,
    /// Bumped by every request; a debounce timer only fires if it is still current
    generation: u64,
    debounce_pending: bool,
}

struct Inner {
    sync: SyncService,
    scopes: Mutex<HashMap<BlockScope, ScopeState>>,
    closed: AtomicBool,
}

#[derive(Clone)]
pub struct SyncCoordinator {
    inner: Arc<Inner>,
}

impl SyncCoordinator {
    pub fn new(sync: SyncService) -> Self {
        Self {
            inner: Arc::new(Inner {
                sync,
                scopes: Mutex::new(HashMap::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Schedule a save of `forest` once edits to `scope` have been quiet for
    /// the configured debounce period. A newer request restarts the timer.
    pub async fn request_sync(&self, scope: BlockScope, forest: SharedForest) {
        if self.inner.closed.load(Ordering::SeqCst) {
            tracing::debug!("SyncCoordinator closed; ignoring request for {}", scope);
            return;
        }

        let generation = {
            let mut scopes = self.inner.scopes.lock().await;
            let state = scopes.entry(scope.clone()).or_default();
            state.generation += 1;
            state.debounce_pending = true;
            state.generation
        };

        let delay = self.inner.sync.config().debounce();
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !inner.claim_debounce(&scope, generation).await {
                return;
            }
            if let Err(e) = inner.run(scope.clone(), forest).await {
                tracing::warn!("Debounced sync for {} failed: {}", scope, e);
            }
        });
    }

    /// Save now, cancelling any pending debounce for `scope`
    pub async fn sync_now(&self, scope: BlockScope, forest: SharedForest) -> Result<SyncOutcome> {
        {
            let mut scopes = self.inner.scopes.lock().await;
            let state = scopes.entry(scope.clone()).or_default();
            state.generation += 1;
            state.debounce_pending = false;
        }
        self.inner.run(scope, forest).await
    }

    /// Whether a save is running for `scope`
    pub async fn is_in_flight(&self, scope: &BlockScope) -> bool {
        self.inner
            .scopes
            .lock()
            .await
            .get(scope)
            .is_some_and(|state| state.in_flight)
    }

    /// Whether a debounced save is waiting for `scope`
    pub async fn has_pending(&self, scope: &BlockScope) -> bool {
        self.inner
            .scopes
            .lock()
            .await
            .get(scope)
            .is_some_and(|state| state.debounce_pending || state.queued.is_some())
    }

    /// Cancel pending debounced saves and refuse new requests. A save already
    /// running finishes; queued saves are dropped.
    pub async fn shutdown(&self) {
        tracing::info!("SyncCoordinator shutting down");
        self.inner.closed.store(true, Ordering::SeqCst);
        let mut scopes = self.inner.scopes.lock().await;
        for state in scopes.values_mut() {
            state.generation += 1;
            state.debounce_pending = false;
            state.queued = None;
        }
    }
}

impl Inner {
    /// True when the timer for `generation` is still the latest for `scope`
    async fn claim_debounce(&self, scope: &BlockScope, generation: u64) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        let mut scopes = self.scopes.lock().await;
        match scopes.get_mut(scope) {
            Some(state) if state.generation == generation => {
                state.debounce_pending = false;
                true
            }
            _ => false,
        }
    }

    async fn run(self: &Arc<Self>, scope: BlockScope, forest: SharedForest) -> Result<SyncOutcome> {
        {
            let mut scopes = self.scopes.lock().await;
            let state = scopes.entry(scope.clone()).or_default();
            if state.in_flight {
                tracing::debug!("Sync in flight for {}; queueing latest request", scope);
                state.queued = Some(forest);
                return Ok(SyncOutcome::Queued);
            }
            state.in_flight = true;
        }

        let result = self.sync_once(&scope, &forest).await;
        if let Some(next) = self.next_queued(&scope).await {
            let inner = Arc::clone(self);
            tokio::spawn(async move { inner.drain(scope, next).await });
        }
        result.map(SyncOutcome::Completed)
    }

    /// Run queued saves until the slot stays empty
    async fn drain(self: Arc<Self>, scope: BlockScope, mut forest: SharedForest) {
        loop {
            if let Err(e) = self.sync_once(&scope, &forest).await {
                tracing::warn!("Queued sync for {} failed: {}", scope, e);
            }
            match self.next_queued(&scope).await {
                Some(next) => forest = next,
                None => break,
            }
        }
    }

    /// Take the parked request, or release the scope when there is none
    async fn next_queued(&self, scope: &BlockScope) -> Option<SharedForest> {
        let mut scopes = self.scopes.lock().await;
        let state = scopes.entry(scope.clone()).or_default();
        let next = if self.closed.load(Ordering::SeqCst) {
            None
        } else {
            state.queued.take()
        };
        if next.is_none() {
            state.in_flight = false;
        }
        next
    }

    async fn sync_once(&self, scope: &BlockScope, forest: &SharedForest) -> Result<SyncReport> {
        let mut snapshot = forest.lock().await.to_tree();
        let (report, remap) = self.sync.sync_snapshot(scope, &mut snapshot).await?;
        forest.lock().await.rename_ids(remap.renamed());
        Ok(report)
    }
}
