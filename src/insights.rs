//! Discrete findings over the same batch data the scorer uses.
//!
//! Each pass replaces the insights of every entity it evaluated, so findings
//! that no longer hold disappear instead of lingering until expiry.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::Result;
use crate::loader::{load_batch, BatchData};
use crate::models::{EntityType, Insight, InsightCategory, InsightKey, InsightType, Priority};
use crate::scoring::{COACH_OVERLOAD_THRESHOLD, TRAILING_WINDOW_DAYS};
use crate::store::StoreGateway;

const INACTIVE_CLIENT_PRIORITY: i32 = 70;
const COACH_WITHOUT_COHORT_PRIORITY: i32 = 60;
const EMPTY_COHORT_PRIORITY: i32 = 40;
const COACH_OVERLOAD_PRIORITY: i32 = 90;

#[derive(Debug, Clone, PartialEq)]
pub struct InsightRun {
    pub insights: Vec<Insight>,
    pub persisted: bool,
}

pub struct InsightDetector<S: ?Sized> {
    store: Arc<S>,
    config: EngineConfig,
}

impl<S> InsightDetector<S>
where
    S: StoreGateway + ?Sized,
{
    pub fn new(store: Arc<S>, config: EngineConfig) -> Self {
        Self { store, config }
    }

    pub async fn detect_anomalies(&self) -> Result<InsightRun> {
        self.detect_anomalies_at(Utc::now()).await
    }

    /// Load, detect and persist. Load failures are errors; persistence
    /// failures are logged and reported through `persisted`.
    pub async fn detect_anomalies_at(&self, now: DateTime<Utc>) -> Result<InsightRun> {
        let batch = load_batch(&*self.store, now.date_naive()).await?;
        let insights = detect(&batch, now + self.config.insight_ttl);
        let keys = evaluated_keys(&batch);

        let persisted = match self.persist(&keys, &insights, now).await {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, insights = insights.len(), "insight persistence failed");
                false
            }
        };

        info!(
            insights = insights.len(),
            red = insights.iter().filter(|i| i.severity == Priority::Red).count(),
            persisted,
            "insight detection complete"
        );
        Ok(InsightRun {
            insights,
            persisted,
        })
    }

    pub async fn active_insights_at(&self, now: DateTime<Utc>) -> Result<Vec<Insight>> {
        let mut insights = self.store.read_active_insights(now).await?;
        sort_insights(&mut insights);
        Ok(insights)
    }

    async fn persist(&self, keys: &[InsightKey], insights: &[Insight], now: DateTime<Utc>) -> Result<()> {
        self.store.replace_insights(keys, insights).await?;
        self.store.delete_expired_insights(now).await?;
        Ok(())
    }
}

/// Every key a pass over `batch` could produce.
fn evaluated_keys(batch: &BatchData) -> Vec<InsightKey> {
    let key = |entity_type, entity_id, insight_type, category| InsightKey {
        entity_type,
        entity_id,
        insight_type,
        category,
    };
    let mut keys = Vec::new();
    for client in &batch.clients {
        keys.push(key(
            EntityType::Client,
            client.id,
            InsightType::Anomaly,
            InsightCategory::InactiveClient,
        ));
    }
    for coach in &batch.coaches {
        keys.push(key(
            EntityType::Coach,
            coach.id,
            InsightType::Opportunity,
            InsightCategory::CoachWithoutCohort,
        ));
        keys.push(key(
            EntityType::Coach,
            coach.id,
            InsightType::Anomaly,
            InsightCategory::CoachOverload,
        ));
    }
    for cohort in &batch.cohorts {
        keys.push(key(
            EntityType::Cohort,
            cohort.id,
            InsightType::Anomaly,
            InsightCategory::EmptyCohort,
        ));
    }
    keys
}

struct Finding {
    entity_type: EntityType,
    entity_id: Uuid,
    insight_type: InsightType,
    category: InsightCategory,
    severity: Priority,
    priority: i32,
    title: &'static str,
    description: String,
    metadata: Map<String, Value>,
}

impl Finding {
    fn into_insight(self, expires_at: DateTime<Utc>) -> Insight {
        Insight {
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            insight_type: self.insight_type,
            category: self.category,
            title: self.title.to_string(),
            description: self.description,
            severity: self.severity,
            priority: self.priority,
            actionable: true,
            metadata: self.metadata,
            expires_at: Some(expires_at),
        }
    }
}

fn metadata(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// Pure detection over a loaded batch, highest priority first.
pub fn detect(batch: &BatchData, expires_at: DateTime<Utc>) -> Vec<Insight> {
    let mut findings = Vec::new();

    for client in batch
        .clients
        .iter()
        .filter(|c| !batch.active_client_ids.contains(&c.id))
    {
        let last_entry = batch.latest_entries.get(&client.id);
        let description = match last_entry {
            Some(date) => format!(
                "{} has not logged an entry in the last {TRAILING_WINDOW_DAYS} days (last entry {date})",
                client.name
            ),
            None => format!("{} has never logged an entry", client.name),
        };
        findings.push(Finding {
            entity_type: EntityType::Client,
            entity_id: client.id,
            insight_type: InsightType::Anomaly,
            category: InsightCategory::InactiveClient,
            severity: Priority::Amber,
            priority: INACTIVE_CLIENT_PRIORITY,
            title: "Inactive client",
            description,
            metadata: metadata(&[
                ("email", json!(client.email)),
                ("last_entry_date", json!(last_entry.map(|d| d.to_string()))),
            ]),
        });
    }

    for coach in batch
        .coaches
        .iter()
        .filter(|c| !batch.coach_ids_with_cohorts.contains(&c.id))
    {
        findings.push(Finding {
            entity_type: EntityType::Coach,
            entity_id: coach.id,
            insight_type: InsightType::Opportunity,
            category: InsightCategory::CoachWithoutCohort,
            severity: Priority::Amber,
            priority: COACH_WITHOUT_COHORT_PRIORITY,
            title: "Coach without cohorts",
            description: format!("{} is not leading any cohort and can take on clients", coach.name),
            metadata: metadata(&[("email", json!(coach.email))]),
        });
    }

    for cohort in batch.cohorts.iter().filter(|c| c.member_ids.is_empty()) {
        findings.push(Finding {
            entity_type: EntityType::Cohort,
            entity_id: cohort.id,
            insight_type: InsightType::Anomaly,
            category: InsightCategory::EmptyCohort,
            severity: Priority::Green,
            priority: EMPTY_COHORT_PRIORITY,
            title: "Empty cohort",
            description: format!("{} has no members", cohort.name),
            metadata: metadata(&[("coach_id", json!(cohort.coach_id))]),
        });
    }

    for coach in &batch.coaches {
        let total_clients: usize = batch
            .coach_cohorts
            .get(&coach.id)
            .map(|nested| nested.cohorts.iter().map(|c| c.member_ids.len()).sum())
            .unwrap_or(0);
        if total_clients <= COACH_OVERLOAD_THRESHOLD {
            continue;
        }
        findings.push(Finding {
            entity_type: EntityType::Coach,
            entity_id: coach.id,
            insight_type: InsightType::Anomaly,
            category: InsightCategory::CoachOverload,
            severity: Priority::Red,
            priority: COACH_OVERLOAD_PRIORITY,
            title: "Overloaded coach",
            description: format!(
                "{} is coaching {total_clients} clients, above the limit of {COACH_OVERLOAD_THRESHOLD}",
                coach.name
            ),
            metadata: metadata(&[
                ("email", json!(coach.email)),
                ("total_clients", json!(total_clients)),
            ]),
        });
    }

    let mut insights: Vec<Insight> = findings
        .into_iter()
        .map(|f| f.into_insight(expires_at))
        .collect();
    sort_insights(&mut insights);
    insights
}

fn sort_insights(insights: &mut [Insight]) {
    insights.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.key().cmp(&b.key())));
}
