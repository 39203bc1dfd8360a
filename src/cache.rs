//! Score cache on top of the store gateway.
//!
//! Last writer wins: concurrent write-backs are not coordinated, and each one
//! replaces the rows for the keys it computed. Reads never fail the caller.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::Result;
use crate::models::{AttentionItem, AttentionScore, EntityKey, StoredScore};
use crate::store::StoreGateway;

/// Metadata key holding the display name captured at write time.
pub const DISPLAY_NAME_KEY: &str = "display_name";

/// Live cached rows. A failed read counts as an empty cache.
pub async fn read_live_scores<S>(store: &S, now: DateTime<Utc>) -> Vec<StoredScore>
where
    S: StoreGateway + ?Sized,
{
    match store.read_cached_scores(now).await {
        Ok(rows) => rows,
        Err(err) => {
            warn!(error = %err, "cache read failed, recomputing");
            Vec::new()
        }
    }
}

/// Attach display names to cached rows with one bulk lookup. Falls back to the
/// name captured at write time when the lookup fails or the entity is gone.
pub async fn resolve_cached<S>(store: &S, rows: Vec<StoredScore>) -> Vec<AttentionItem>
where
    S: StoreGateway + ?Sized,
{
    let keys: Vec<EntityKey> = rows.iter().map(|row| row.score.key()).collect();
    let names = match store.lookup_display_names(&keys).await {
        Ok(names) => names,
        Err(err) => {
            warn!(error = %err, "display name lookup failed");
            Default::default()
        }
    };

    rows.into_iter()
        .map(|row| {
            let key = row.score.key();
            let (name, email) = match names.get(&key) {
                Some(found) => (found.name.clone(), found.email.clone()),
                None => {
                    let fallback = row
                        .score
                        .metadata
                        .get(DISPLAY_NAME_KEY)
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("Unknown {}", key.entity_type));
                    (fallback, None)
                }
            };
            AttentionItem {
                score: row.score,
                name,
                email,
            }
        })
        .collect()
}

/// Rows to persist for a freshly computed queue, carrying the display name.
pub fn rows_for_items<'a>(items: impl IntoIterator<Item = &'a AttentionItem>) -> Vec<AttentionScore> {
    items
        .into_iter()
        .map(|item| {
            let mut score = item.score.clone();
            score
                .metadata
                .insert(DISPLAY_NAME_KEY.to_string(), Value::String(item.name.clone()));
            score
        })
        .collect()
}

/// Replace the rows for `keys` with `rows`, then drop anything already expired.
pub async fn write_back<S>(
    store: &S,
    keys: &[EntityKey],
    rows: &[AttentionScore],
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<()>
where
    S: StoreGateway + ?Sized,
{
    store.replace_scores(keys, rows, Some(expires_at)).await?;
    let purged = store.delete_expired_scores(now).await?;
    debug!(written = rows.len(), purged, "cache write-back complete");
    Ok(())
}

/// Detached write-back. Failures are logged, never returned.
pub fn spawn_write_back<S>(
    store: Arc<S>,
    keys: Vec<EntityKey>,
    rows: Vec<AttentionScore>,
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> JoinHandle<()>
where
    S: StoreGateway + ?Sized + 'static,
{
    tokio::spawn(async move {
        if let Err(err) = write_back(&*store, &keys, &rows, expires_at, now).await {
            warn!(error = %err, rows = rows.len(), "cache write-back failed");
        }
    })
}
