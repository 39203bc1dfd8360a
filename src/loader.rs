//! Batch loading: a fixed number of bulk reads assembled into lookup maps so
//! that scoring never goes back to the store.

use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use tracing::debug;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    ClientRecord, ClientSnapshot, CoachRecord, CoachSnapshot, CoachWithCohorts, CohortRecord,
    CohortSnapshot, EntitySnapshot,
};
use crate::scoring::{cutoff_date, ScoringContext};
use crate::store::StoreGateway;

#[derive(Debug, Clone)]
pub struct BatchData {
    pub today: NaiveDate,
    pub cutoff: NaiveDate,
    pub clients: Vec<ClientRecord>,
    pub active_client_ids: HashSet<Uuid>,
    pub coaches: Vec<CoachRecord>,
    pub coach_ids_with_cohorts: HashSet<Uuid>,
    pub cohorts: Vec<CohortRecord>,
    pub coach_cohorts: HashMap<Uuid, CoachWithCohorts>,
    pub recent_counts: HashMap<Uuid, u32>,
    pub latest_entries: HashMap<Uuid, NaiveDate>,
    pub cohorts_by_client: HashMap<Uuid, Vec<Uuid>>,
}

pub async fn load_batch<S>(store: &S, today: NaiveDate) -> Result<BatchData>
where
    S: StoreGateway + ?Sized,
{
    let cutoff = cutoff_date(today);

    let (
        clients,
        active_client_ids,
        coaches,
        coach_ids_with_cohorts,
        cohorts,
        coaches_with_cohorts,
        recent_counts,
    ) = tokio::try_join!(
        async { store.list_clients().await.map_err(|e| e.in_batch("list_clients")) },
        async {
            store
                .list_client_ids_with_recent_entries(cutoff)
                .await
                .map_err(|e| e.in_batch("list_client_ids_with_recent_entries"))
        },
        async { store.list_coaches().await.map_err(|e| e.in_batch("list_coaches")) },
        async {
            store
                .list_coach_ids_with_cohorts()
                .await
                .map_err(|e| e.in_batch("list_coach_ids_with_cohorts"))
        },
        async {
            store
                .list_cohorts_with_memberships()
                .await
                .map_err(|e| e.in_batch("list_cohorts_with_memberships"))
        },
        async {
            store
                .list_coaches_with_cohorts()
                .await
                .map_err(|e| e.in_batch("list_coaches_with_cohorts"))
        },
        async {
            store
                .count_recent_entries_by_client(cutoff)
                .await
                .map_err(|e| e.in_batch("count_recent_entries_by_client"))
        },
    )?;

    let client_ids: Vec<Uuid> = clients.iter().map(|c| c.id).collect();
    let latest_entries = store
        .latest_entry_date_by_client(&client_ids)
        .await
        .map_err(|e| e.in_batch("latest_entry_date_by_client"))?;

    let mut cohorts_by_client: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for cohort in &cohorts {
        for member in &cohort.member_ids {
            cohorts_by_client.entry(*member).or_default().push(cohort.id);
        }
    }

    let coach_cohorts: HashMap<Uuid, CoachWithCohorts> = coaches_with_cohorts
        .into_iter()
        .map(|coach| (coach.id, coach))
        .collect();

    debug!(
        clients = clients.len(),
        active_clients = active_client_ids.len(),
        coaches = coaches.len(),
        cohorts = cohorts.len(),
        "batch load complete"
    );

    Ok(BatchData {
        today,
        cutoff,
        clients,
        active_client_ids,
        coaches,
        coach_ids_with_cohorts,
        cohorts,
        coach_cohorts,
        recent_counts,
        latest_entries,
        cohorts_by_client,
    })
}

impl BatchData {
    pub fn scoring_context(&self) -> ScoringContext<'_> {
        ScoringContext {
            today: self.today,
            cutoff: self.cutoff,
            recent_counts: &self.recent_counts,
        }
    }

    /// One snapshot per client, coach and cohort. Coaches missing from the
    /// nested load get no cohorts rather than being dropped.
    pub fn snapshots(&self) -> Vec<EntitySnapshot> {
        let mut snapshots =
            Vec::with_capacity(self.clients.len() + self.coaches.len() + self.cohorts.len());

        for client in &self.clients {
            snapshots.push(EntitySnapshot::Client(ClientSnapshot {
                id: client.id,
                name: client.name.clone(),
                email: client.email.clone(),
                last_entry: self.latest_entries.get(&client.id).copied(),
                recent_entry_count: self.recent_counts.get(&client.id).copied().unwrap_or(0),
                cohort_ids: self
                    .cohorts_by_client
                    .get(&client.id)
                    .cloned()
                    .unwrap_or_default(),
            }));
        }

        for coach in &self.coaches {
            snapshots.push(EntitySnapshot::Coach(CoachSnapshot {
                id: coach.id,
                name: coach.name.clone(),
                email: coach.email.clone(),
                cohorts: self
                    .coach_cohorts
                    .get(&coach.id)
                    .map(|nested| nested.cohorts.clone())
                    .unwrap_or_default(),
            }));
        }

        for cohort in &self.cohorts {
            snapshots.push(EntitySnapshot::Cohort(CohortSnapshot {
                id: cohort.id,
                name: cohort.name.clone(),
                coach_id: cohort.coach_id,
                member_ids: cohort.member_ids.clone(),
            }));
        }

        snapshots
    }
}
