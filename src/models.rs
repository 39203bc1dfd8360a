use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Client,
    Coach,
    Cohort,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Client => "client",
            EntityType::Coach => "coach",
            EntityType::Cohort => "cohort",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "client" => Ok(EntityType::Client),
            "coach" => Ok(EntityType::Coach),
            "cohort" => Ok(EntityType::Cohort),
            other => Err(EngineError::InvalidValue {
                field: "entity_type",
                value: other.to_string(),
            }),
        }
    }
}

/// Priority tier. Always derived from a score, never set independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Red,
    Amber,
    Green,
}

impl Priority {
    pub const RED_THRESHOLD: i32 = 60;
    pub const AMBER_THRESHOLD: i32 = 30;

    pub fn from_score(score: i32) -> Self {
        if score >= Self::RED_THRESHOLD {
            Priority::Red
        } else if score >= Self::AMBER_THRESHOLD {
            Priority::Amber
        } else {
            Priority::Green
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Red => "red",
            Priority::Amber => "amber",
            Priority::Green => "green",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "red" => Ok(Priority::Red),
            "amber" => Ok(Priority::Amber),
            "green" => Ok(Priority::Green),
            other => Err(EngineError::InvalidValue {
                field: "priority",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    pub entity_type: EntityType,
    pub entity_id: Uuid,
}

impl EntityKey {
    pub fn new(entity_type: EntityType, entity_id: Uuid) -> Self {
        Self {
            entity_type,
            entity_id,
        }
    }
}

// --- Store records ---

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRecord {
    pub id: Uuid,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoachRecord {
    pub id: Uuid,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CohortMembers {
    pub id: Uuid,
    pub member_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoachWithCohorts {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub cohorts: Vec<CohortMembers>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CohortRecord {
    pub id: Uuid,
    pub name: String,
    pub coach_id: Option<Uuid>,
    pub member_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplayName {
    pub name: String,
    pub email: Option<String>,
}

// --- Scoring snapshots ---

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSnapshot {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub last_entry: Option<NaiveDate>,
    pub recent_entry_count: u32,
    pub cohort_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoachSnapshot {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub cohorts: Vec<CohortMembers>,
}

impl CoachSnapshot {
    pub fn total_clients(&self) -> usize {
        self.cohorts.iter().map(|c| c.member_ids.len()).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CohortSnapshot {
    pub id: Uuid,
    pub name: String,
    pub coach_id: Option<Uuid>,
    pub member_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntitySnapshot {
    Client(ClientSnapshot),
    Coach(CoachSnapshot),
    Cohort(CohortSnapshot),
}

impl EntitySnapshot {
    pub fn key(&self) -> EntityKey {
        match self {
            EntitySnapshot::Client(c) => EntityKey::new(EntityType::Client, c.id),
            EntitySnapshot::Coach(c) => EntityKey::new(EntityType::Coach, c.id),
            EntitySnapshot::Cohort(c) => EntityKey::new(EntityType::Cohort, c.id),
        }
    }

    pub fn display_name(&self) -> DisplayName {
        match self {
            EntitySnapshot::Client(c) => DisplayName {
                name: c.name.clone(),
                email: Some(c.email.clone()),
            },
            EntitySnapshot::Coach(c) => DisplayName {
                name: c.name.clone(),
                email: Some(c.email.clone()),
            },
            EntitySnapshot::Cohort(c) => DisplayName {
                name: c.name.clone(),
                email: None,
            },
        }
    }
}

// --- Scores ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttentionScore {
    pub entity_type: EntityType,
    pub entity_id: Uuid,
    pub score: i32,
    pub priority: Priority,
    pub reasons: Vec<String>,
    pub suggested_actions: Vec<String>,
    pub metadata: Map<String, Value>,
}

impl AttentionScore {
    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.entity_type, self.entity_id)
    }
}

/// A cache row as read back from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredScore {
    pub score: AttentionScore,
    pub computed_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttentionItem {
    #[serde(flatten)]
    pub score: AttentionScore,
    pub name: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueSource {
    Cache,
    Computed,
}

/// When the cached rows behind a queue were computed and when they lapse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheWindow {
    pub oldest_computed_at: DateTime<Utc>,
    pub next_expiry: Option<DateTime<Utc>>,
}

impl CacheWindow {
    pub fn of(rows: &[StoredScore]) -> Option<Self> {
        let oldest_computed_at = rows.iter().map(|row| row.computed_at).min()?;
        Some(Self {
            oldest_computed_at,
            next_expiry: rows.iter().filter_map(|row| row.expires_at).min(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttentionQueue {
    pub red: Vec<AttentionItem>,
    pub amber: Vec<AttentionItem>,
    pub green: Vec<AttentionItem>,
    pub source: QueueSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_window: Option<CacheWindow>,
}

impl AttentionQueue {
    /// Sort by score descending and partition by priority. Ties are broken by
    /// entity key so repeated runs produce identical output.
    pub fn from_items(mut items: Vec<AttentionItem>, source: QueueSource) -> Self {
        items.sort_by(|a, b| {
            b.score
                .score
                .cmp(&a.score.score)
                .then_with(|| a.score.key().cmp(&b.score.key()))
        });

        let mut queue = AttentionQueue {
            red: Vec::new(),
            amber: Vec::new(),
            green: Vec::new(),
            source,
            cache_window: None,
        };
        for item in items {
            match item.score.priority {
                Priority::Red => queue.red.push(item),
                Priority::Amber => queue.amber.push(item),
                Priority::Green => queue.green.push(item),
            }
        }
        queue
    }

    pub fn len(&self) -> usize {
        self.red.len() + self.amber.len() + self.green.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All items, red first, each group already in score order.
    pub fn iter(&self) -> impl Iterator<Item = &AttentionItem> {
        self.red.iter().chain(self.amber.iter()).chain(self.green.iter())
    }
}

// --- Insights ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightType {
    Anomaly,
    Opportunity,
}

impl InsightType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InsightType::Anomaly => "anomaly",
            InsightType::Opportunity => "opportunity",
        }
    }
}

impl FromStr for InsightType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "anomaly" => Ok(InsightType::Anomaly),
            "opportunity" => Ok(InsightType::Opportunity),
            other => Err(EngineError::InvalidValue {
                field: "insight_type",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightCategory {
    InactiveClient,
    CoachWithoutCohort,
    EmptyCohort,
    CoachOverload,
}

impl InsightCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            InsightCategory::InactiveClient => "inactive_client",
            InsightCategory::CoachWithoutCohort => "coach_without_cohort",
            InsightCategory::EmptyCohort => "empty_cohort",
            InsightCategory::CoachOverload => "coach_overload",
        }
    }
}

impl FromStr for InsightCategory {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inactive_client" => Ok(InsightCategory::InactiveClient),
            "coach_without_cohort" => Ok(InsightCategory::CoachWithoutCohort),
            "empty_cohort" => Ok(InsightCategory::EmptyCohort),
            "coach_overload" => Ok(InsightCategory::CoachOverload),
            other => Err(EngineError::InvalidValue {
                field: "category",
                value: other.to_string(),
            }),
        }
    }
}

/// Dedup key for insights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct InsightKey {
    pub entity_type: EntityType,
    pub entity_id: Uuid,
    pub insight_type: InsightType,
    pub category: InsightCategory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub entity_type: EntityType,
    pub entity_id: Uuid,
    pub insight_type: InsightType,
    pub category: InsightCategory,
    pub title: String,
    pub description: String,
    pub severity: Priority,
    pub priority: i32,
    pub actionable: bool,
    pub metadata: Map<String, Value>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Insight {
    pub fn key(&self) -> InsightKey {
        InsightKey {
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            insight_type: self.insight_type,
            category: self.category,
        }
    }
}
