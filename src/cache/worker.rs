//! Background invalidation and eviction workers.

use super::backend::CacheStore;
use super::eviction::{EvictionManager, EvictionStrategy};
use super::stats::CacheStatistics;
use crate::Result;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// The eviction worker acts once the advisory size passes this share of `max_size`.
pub const CAPACITY_HEADROOM: f64 = 0.95;

/// Unbounded queue of keys waiting to be deleted.
pub(crate) struct InvalidationQueue {
    tx: mpsc::UnboundedSender<String>,
    rx: Mutex<mpsc::UnboundedReceiver<String>>,
    pending: AtomicUsize,
}

impl InvalidationQueue {
    pub(crate) fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
            pending: AtomicUsize::new(0),
        }
    }

    pub(crate) fn push(&self, key: String) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = self.tx.send(key) {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            warn!(key = %e.0, "Invalidation queue closed, key dropped");
        }
    }

    pub(crate) fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    fn done(&self) {
        let _ = self
            .pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)));
    }
}

/// State shared between the manager and its workers.
pub(crate) struct WorkerContext {
    pub(crate) store: Arc<dyn CacheStore>,
    pub(crate) stats: Arc<CacheStatistics>,
    pub(crate) eviction: EvictionManager,
    pub(crate) queue: InvalidationQueue,
    pub(crate) strategy: EvictionStrategy,
    pub(crate) max_size: u64,
    pub(crate) eviction_interval: Duration,
}

impl WorkerContext {
    /// One eviction pass; evicted entries are counted and leave the advisory size.
    pub(crate) async fn run_eviction(&self, strategy: EvictionStrategy) -> Result<usize> {
        let evicted = self.eviction.trigger_eviction(strategy).await?;
        self.stats.record_evictions(evicted as u64);
        self.stats.decrement_size(evicted as u64);
        Ok(evicted)
    }

    async fn invalidate(&self, key: &str) {
        match self.store.delete(key).await {
            Ok(existed) => {
                self.stats.decrement_size(1);
                self.stats.record_invalidation();
                debug!(key = %key, existed, "Invalidated cache entry");
            }
            Err(e) => warn!(key = %key, error = %e, "Failed to invalidate cache entry"),
        }
    }

    fn over_capacity(&self) -> bool {
        self.stats.cache_size() as f64 > self.max_size as f64 * CAPACITY_HEADROOM
    }
}

/// Handles to the two running worker tasks.
pub(crate) struct Workers {
    cancel: CancellationToken,
    invalidation: JoinHandle<()>,
    eviction: JoinHandle<()>,
}

impl Workers {
    pub(crate) fn spawn(ctx: Arc<WorkerContext>) -> Self {
        let cancel = CancellationToken::new();
        let invalidation = tokio::spawn(invalidation_loop(ctx.clone(), cancel.clone()));
        let eviction = tokio::spawn(eviction_loop(ctx, cancel.clone()));
        Self {
            cancel,
            invalidation,
            eviction,
        }
    }

    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Cancel both workers and wait for them to exit.
    pub(crate) async fn shutdown(self) {
        self.cancel.cancel();
        for (name, handle) in [("invalidation", self.invalidation), ("eviction", self.eviction)] {
            match handle.await {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => {}
                Err(e) => error!(worker = name, error = %e, "Cache worker terminated abnormally"),
            }
        }
    }
}

async fn invalidation_loop(ctx: Arc<WorkerContext>, cancel: CancellationToken) {
    debug!("Invalidation worker started");
    let mut rx = ctx.queue.rx.lock().await;
    loop {
        let key = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = rx.recv() => match next {
                Some(key) => key,
                None => break,
            },
        };
        ctx.invalidate(&key).await;
        ctx.queue.done();
    }
    debug!("Invalidation worker stopped");
}

async fn eviction_loop(ctx: Arc<WorkerContext>, cancel: CancellationToken) {
    debug!(
        interval_secs = ctx.eviction_interval.as_secs_f64(),
        "Eviction worker started"
    );
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(ctx.eviction_interval) => {}
        }
        if !ctx.over_capacity() {
            continue;
        }
        // A started pass runs to completion so its deletions are counted.
        match ctx.run_eviction(ctx.strategy).await {
            Ok(evicted) => debug!(evicted, "Periodic eviction finished"),
            Err(e) => error!(error = %e, "Periodic eviction failed"),
        }
    }
    debug!("Eviction worker stopped");
}
