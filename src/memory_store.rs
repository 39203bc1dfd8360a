//! In-memory gateway for tests. Counts batch loads and can inject failures.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::models::{
    AttentionScore, ClientRecord, CoachRecord, CoachWithCohorts, CohortMembers, CohortRecord,
    DisplayName, EntityKey, EntityType, Insight, InsightKey, StoredScore,
};
use crate::store::StoreGateway;

#[derive(Default)]
struct MemoryState {
    clients: Vec<ClientRecord>,
    coaches: Vec<CoachRecord>,
    cohorts: Vec<CohortRecord>,
    entries: Vec<(Uuid, NaiveDate)>,
    scores: BTreeMap<EntityKey, StoredScore>,
    insights: BTreeMap<InsightKey, Insight>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    batch_loads: AtomicUsize,
    pub fail_reads: AtomicBool,
    pub fail_cache_reads: AtomicBool,
    pub fail_cache_writes: AtomicBool,
}

fn injected(what: &str) -> EngineError {
    EngineError::Database(sqlx::Error::Protocol(format!("injected {what} failure")))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times the loader's population read ran.
    pub fn batch_loads(&self) -> usize {
        self.batch_loads.load(Ordering::SeqCst)
    }

    pub fn add_client(&self, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        let email = format!("{}@example.com", name.to_lowercase().replace(' ', "."));
        self.state.lock().unwrap().clients.push(ClientRecord {
            id,
            name: name.to_string(),
            email,
        });
        id
    }

    pub fn add_coach(&self, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        let email = format!("{}@coaches.example.com", name.to_lowercase().replace(' ', "."));
        self.state.lock().unwrap().coaches.push(CoachRecord {
            id,
            name: name.to_string(),
            email,
        });
        id
    }

    pub fn add_cohort(&self, name: &str, coach_id: Option<Uuid>, members: &[Uuid]) -> Uuid {
        let id = Uuid::new_v4();
        self.state.lock().unwrap().cohorts.push(CohortRecord {
            id,
            name: name.to_string(),
            coach_id,
            member_ids: members.to_vec(),
        });
        id
    }

    pub fn add_member(&self, cohort_id: Uuid, client_id: Uuid) {
        let mut state = self.state.lock().unwrap();
        if let Some(cohort) = state.cohorts.iter_mut().find(|c| c.id == cohort_id) {
            cohort.member_ids.push(client_id);
        }
    }

    pub fn log_entries(&self, client_id: Uuid, dates: impl IntoIterator<Item = NaiveDate>) {
        let mut state = self.state.lock().unwrap();
        state.entries.extend(dates.into_iter().map(|d| (client_id, d)));
    }

    pub fn score_rows(&self) -> Vec<StoredScore> {
        self.state.lock().unwrap().scores.values().cloned().collect()
    }

    pub fn insight_rows(&self) -> Vec<Insight> {
        self.state.lock().unwrap().insights.values().cloned().collect()
    }

    pub fn put_cached_score(
        &self,
        score: AttentionScore,
        computed_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) {
        self.state.lock().unwrap().scores.insert(
            score.key(),
            StoredScore {
                score,
                computed_at,
                expires_at,
            },
        );
    }

    fn check_reads(&self) -> Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(injected("read"));
        }
        Ok(())
    }

    fn check_writes(&self) -> Result<()> {
        if self.fail_cache_writes.load(Ordering::SeqCst) {
            return Err(injected("write"));
        }
        Ok(())
    }
}

fn is_live(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    expires_at.map_or(true, |at| at > now)
}

#[async_trait]
impl StoreGateway for MemoryStore {
    async fn list_clients(&self) -> Result<Vec<ClientRecord>> {
        self.batch_loads.fetch_add(1, Ordering::SeqCst);
        self.check_reads()?;
        Ok(self.state.lock().unwrap().clients.clone())
    }

    async fn list_client_ids_with_recent_entries(&self, since: NaiveDate) -> Result<HashSet<Uuid>> {
        self.check_reads()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .entries
            .iter()
            .filter(|(_, date)| *date >= since)
            .map(|(id, _)| *id)
            .collect())
    }

    async fn list_coaches(&self) -> Result<Vec<CoachRecord>> {
        self.check_reads()?;
        Ok(self.state.lock().unwrap().coaches.clone())
    }

    async fn list_coach_ids_with_cohorts(&self) -> Result<HashSet<Uuid>> {
        self.check_reads()?;
        let state = self.state.lock().unwrap();
        Ok(state.cohorts.iter().filter_map(|c| c.coach_id).collect())
    }

    async fn list_coaches_with_cohorts(&self) -> Result<Vec<CoachWithCohorts>> {
        self.check_reads()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .coaches
            .iter()
            .map(|coach| CoachWithCohorts {
                id: coach.id,
                name: coach.name.clone(),
                email: coach.email.clone(),
                cohorts: state
                    .cohorts
                    .iter()
                    .filter(|c| c.coach_id == Some(coach.id))
                    .map(|c| CohortMembers {
                        id: c.id,
                        member_ids: c.member_ids.clone(),
                    })
                    .collect(),
            })
            .collect())
    }

    async fn list_cohorts_with_memberships(&self) -> Result<Vec<CohortRecord>> {
        self.check_reads()?;
        Ok(self.state.lock().unwrap().cohorts.clone())
    }

    async fn count_recent_entries_by_client(&self, since: NaiveDate) -> Result<HashMap<Uuid, u32>> {
        self.check_reads()?;
        let state = self.state.lock().unwrap();
        let mut counts = HashMap::new();
        for (id, date) in &state.entries {
            if *date >= since {
                *counts.entry(*id).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    async fn latest_entry_date_by_client(
        &self,
        client_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, NaiveDate>> {
        self.check_reads()?;
        let wanted: HashSet<&Uuid> = client_ids.iter().collect();
        let state = self.state.lock().unwrap();
        let mut latest: HashMap<Uuid, NaiveDate> = HashMap::new();
        for (id, date) in state.entries.iter().filter(|(id, _)| wanted.contains(id)) {
            let slot = latest.entry(*id).or_insert(*date);
            if *date > *slot {
                *slot = *date;
            }
        }
        Ok(latest)
    }

    async fn lookup_display_names(
        &self,
        keys: &[EntityKey],
    ) -> Result<HashMap<EntityKey, DisplayName>> {
        self.check_reads()?;
        let state = self.state.lock().unwrap();
        let mut names = HashMap::new();
        for key in keys {
            let found = match key.entity_type {
                EntityType::Client => state
                    .clients
                    .iter()
                    .find(|c| c.id == key.entity_id)
                    .map(|c| DisplayName {
                        name: c.name.clone(),
                        email: Some(c.email.clone()),
                    }),
                EntityType::Coach => state
                    .coaches
                    .iter()
                    .find(|c| c.id == key.entity_id)
                    .map(|c| DisplayName {
                        name: c.name.clone(),
                        email: Some(c.email.clone()),
                    }),
                EntityType::Cohort => state
                    .cohorts
                    .iter()
                    .find(|c| c.id == key.entity_id)
                    .map(|c| DisplayName {
                        name: c.name.clone(),
                        email: None,
                    }),
            };
            if let Some(name) = found {
                names.insert(*key, name);
            }
        }
        Ok(names)
    }

    async fn read_cached_scores(&self, now: DateTime<Utc>) -> Result<Vec<StoredScore>> {
        if self.fail_cache_reads.load(Ordering::SeqCst) {
            return Err(injected("cache read"));
        }
        let state = self.state.lock().unwrap();
        Ok(state
            .scores
            .values()
            .filter(|row| is_live(row.expires_at, now))
            .cloned()
            .collect())
    }

    async fn replace_scores(
        &self,
        keys: &[EntityKey],
        rows: &[AttentionScore],
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.check_writes()?;
        let computed_at = Utc::now();
        let mut state = self.state.lock().unwrap();
        for key in keys {
            state.scores.remove(key);
        }
        for row in rows {
            state.scores.insert(
                row.key(),
                StoredScore {
                    score: row.clone(),
                    computed_at,
                    expires_at,
                },
            );
        }
        Ok(())
    }

    async fn delete_expired_scores(&self, now: DateTime<Utc>) -> Result<u64> {
        self.check_writes()?;
        let mut state = self.state.lock().unwrap();
        let before = state.scores.len();
        state.scores.retain(|_, row| is_live(row.expires_at, now));
        Ok((before - state.scores.len()) as u64)
    }

    async fn read_active_insights(&self, now: DateTime<Utc>) -> Result<Vec<Insight>> {
        self.check_reads()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .insights
            .values()
            .filter(|i| is_live(i.expires_at, now))
            .cloned()
            .collect())
    }

    async fn replace_insights(&self, keys: &[InsightKey], rows: &[Insight]) -> Result<()> {
        self.check_writes()?;
        let mut state = self.state.lock().unwrap();
        for key in keys {
            state.insights.remove(key);
        }
        for row in rows {
            state.insights.insert(row.key(), row.clone());
        }
        Ok(())
    }

    async fn delete_expired_insights(&self, now: DateTime<Utc>) -> Result<u64> {
        self.check_writes()?;
        let mut state = self.state.lock().unwrap();
        let before = state.insights.len();
        state.insights.retain(|_, i| is_live(i.expires_at, now));
        Ok((before - state.insights.len()) as u64)
    }
}
