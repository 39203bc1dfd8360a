//! Store gateway: the only path between the engine and persistent data.
//!
//! Reads are bulk operations over the whole population. Writes follow a
//! delete-then-recreate discipline: `replace_*` removes every row for the
//! given keys and inserts the new rows in one transaction. Concurrent
//! replacements are not coordinated; the last writer wins.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    AttentionScore, ClientRecord, CoachRecord, CoachWithCohorts, CohortRecord, DisplayName,
    EntityKey, Insight, InsightKey, StoredScore,
};

#[async_trait]
pub trait StoreGateway: Send + Sync {
    async fn list_clients(&self) -> Result<Vec<ClientRecord>>;

    /// Clients with at least one entry on or after `since`.
    async fn list_client_ids_with_recent_entries(&self, since: NaiveDate) -> Result<HashSet<Uuid>>;

    async fn list_coaches(&self) -> Result<Vec<CoachRecord>>;

    /// Coaches owning at least one cohort.
    async fn list_coach_ids_with_cohorts(&self) -> Result<HashSet<Uuid>>;

    async fn list_coaches_with_cohorts(&self) -> Result<Vec<CoachWithCohorts>>;

    async fn list_cohorts_with_memberships(&self) -> Result<Vec<CohortRecord>>;

    async fn count_recent_entries_by_client(&self, since: NaiveDate) -> Result<HashMap<Uuid, u32>>;

    /// Most recent entry date per client. Clients without entries are absent.
    async fn latest_entry_date_by_client(
        &self,
        client_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, NaiveDate>>;

    /// Names for entities referenced by cached rows. Unknown keys are absent.
    async fn lookup_display_names(
        &self,
        keys: &[EntityKey],
    ) -> Result<HashMap<EntityKey, DisplayName>>;

    /// Rows with `expires_at` null or after `now`.
    async fn read_cached_scores(&self, now: DateTime<Utc>) -> Result<Vec<StoredScore>>;

    async fn replace_scores(
        &self,
        keys: &[EntityKey],
        rows: &[AttentionScore],
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()>;

    async fn delete_expired_scores(&self, now: DateTime<Utc>) -> Result<u64>;

    async fn read_active_insights(&self, now: DateTime<Utc>) -> Result<Vec<Insight>>;

    /// Rows carry their own `expires_at`.
    async fn replace_insights(&self, keys: &[InsightKey], rows: &[Insight]) -> Result<()>;

    async fn delete_expired_insights(&self, now: DateTime<Utc>) -> Result<u64>;
}
