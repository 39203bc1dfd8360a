//! Attention queue orchestration.
//!
//! Any live cached row short-circuits the whole computation: the queue is
//! served entirely from cache, never mixed with freshly computed entity
//! types. Without a cache, every client, coach and cohort is scored from one
//! batch load, zero scores are dropped, and the result is written back on a
//! detached task. Concurrent callers may both recompute; that is accepted.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cache;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::loader::load_batch;
use crate::models::{
    AttentionItem, AttentionQueue, AttentionScore, CacheWindow, EntityKey, QueueSource,
};
use crate::scoring::score_entity;
use crate::store::StoreGateway;

pub struct AttentionEngine<S: ?Sized> {
    store: Arc<S>,
    config: EngineConfig,
    pending: Mutex<Vec<JoinHandle<()>>>,
}

struct Recomputed {
    queue: AttentionQueue,
    keys: Vec<EntityKey>,
    rows: Vec<AttentionScore>,
}

impl<S> AttentionEngine<S>
where
    S: StoreGateway + ?Sized + 'static,
{
    pub fn new(store: Arc<S>, config: EngineConfig) -> Self {
        Self {
            store,
            config,
            pending: Mutex::new(Vec::new()),
        }
    }

    pub async fn compute_queue(&self) -> Result<AttentionQueue> {
        self.compute_queue_at(Utc::now()).await
    }

    pub async fn compute_queue_at(&self, now: DateTime<Utc>) -> Result<AttentionQueue> {
        let cached = cache::read_live_scores(&*self.store, now).await;
        if !cached.is_empty() {
            let window = CacheWindow::of(&cached);
            info!(
                rows = cached.len(),
                computed_at = ?window.map(|w| w.oldest_computed_at),
                "serving attention queue from cache"
            );
            let items = cache::resolve_cached(&*self.store, cached).await;
            let mut queue = AttentionQueue::from_items(items, QueueSource::Cache);
            queue.cache_window = window;
            return Ok(queue);
        }

        let recomputed = self.recompute(now).await?;
        let handle = cache::spawn_write_back(
            Arc::clone(&self.store),
            recomputed.keys,
            recomputed.rows,
            now + self.config.cache_ttl,
            now,
        );
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.retain(|h| !h.is_finished());
        pending.push(handle);

        Ok(recomputed.queue)
    }

    /// Recompute regardless of cache state and wait for the write-back.
    /// Unlike `compute_queue`, persistence errors are returned.
    pub async fn refresh_queue(&self) -> Result<AttentionQueue> {
        self.refresh_queue_at(Utc::now()).await
    }

    pub async fn refresh_queue_at(&self, now: DateTime<Utc>) -> Result<AttentionQueue> {
        let recomputed = self.recompute(now).await?;
        cache::write_back(
            &*self.store,
            &recomputed.keys,
            &recomputed.rows,
            now + self.config.cache_ttl,
            now,
        )
        .await?;
        Ok(recomputed.queue)
    }

    /// Wait for detached write-backs started so far.
    pub async fn flush_write_backs(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending.drain(..).collect()
        };
        for handle in handles {
            if let Err(err) = handle.await {
                warn!(error = %err, "cache write-back task aborted");
            }
        }
    }

    async fn recompute(&self, now: DateTime<Utc>) -> Result<Recomputed> {
        let batch = load_batch(&*self.store, now.date_naive()).await?;
        let ctx = batch.scoring_context();
        let snapshots = batch.snapshots();

        let mut keys = Vec::with_capacity(snapshots.len());
        let mut items = Vec::new();
        for snapshot in &snapshots {
            let score = score_entity(snapshot, &ctx);
            keys.push(snapshot.key());
            if score.score == 0 {
                continue;
            }
            let display = snapshot.display_name();
            items.push(AttentionItem {
                score,
                name: display.name,
                email: display.email,
            });
        }

        let queue = AttentionQueue::from_items(items, QueueSource::Computed);
        let rows = cache::rows_for_items(queue.iter());
        info!(
            scored = snapshots.len(),
            flagged = rows.len(),
            red = queue.red.len(),
            amber = queue.amber.len(),
            green = queue.green.len(),
            "attention queue recomputed"
        );

        Ok(Recomputed { queue, keys, rows })
    }
}
