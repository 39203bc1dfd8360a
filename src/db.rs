use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Duration as Days, NaiveDate, Utc};
use serde_json::{Map, Value};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::models::{
    AttentionScore, ClientRecord, CoachRecord, CoachWithCohorts, CohortMembers, CohortRecord,
    DisplayName, EntityKey, EntityType, Insight, InsightKey, StoredScore,
};
use crate::store::StoreGateway;

/// Metadata key that carries suggested actions inside the stored JSON.
const SUGGESTED_ACTIONS_KEY: &str = "suggested_actions";

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
    query_timeout: Duration,
}

impl PgStore {
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        query_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(query_timeout)
            .connect(database_url)
            .await
            .context("failed to connect to Postgres")?;
        info!(max_connections, "Postgres pool ready");
        Ok(Self {
            pool,
            query_timeout,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn timed<T, F>(&self, query: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, sqlx::Error>>,
    {
        match tokio::time::timeout(self.query_timeout, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(EngineError::Timeout {
                query,
                millis: self.query_timeout.as_millis(),
            }),
        }
    }
}

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn encode_metadata(score: &AttentionScore) -> Value {
    let mut metadata = score.metadata.clone();
    metadata.insert(
        SUGGESTED_ACTIONS_KEY.to_string(),
        Value::from(score.suggested_actions.clone()),
    );
    Value::Object(metadata)
}

/// Split stored metadata back into the bag and its suggested actions.
fn decode_metadata(value: Value) -> Result<(Map<String, Value>, Vec<String>)> {
    let mut metadata = match value {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            return Err(EngineError::InvalidValue {
                field: "metadata",
                value: other.to_string(),
            })
        }
    };
    let actions = match metadata.remove(SUGGESTED_ACTIONS_KEY) {
        Some(raw) => serde_json::from_value(raw)?,
        None => Vec::new(),
    };
    Ok((metadata, actions))
}

fn row_to_stored_score(row: &PgRow) -> Result<StoredScore> {
    let entity_type: String = row.try_get("entity_type")?;
    let priority: String = row.try_get("priority")?;
    let reasons: Value = row.try_get("reasons")?;
    let (metadata, suggested_actions) = decode_metadata(row.try_get("metadata")?)?;

    Ok(StoredScore {
        score: AttentionScore {
            entity_type: entity_type.parse()?,
            entity_id: row.try_get("entity_id")?,
            score: row.try_get("score")?,
            priority: priority.parse()?,
            reasons: serde_json::from_value(reasons)?,
            suggested_actions,
            metadata,
        },
        computed_at: row.try_get("computed_at")?,
        expires_at: row.try_get("expires_at")?,
    })
}

fn row_to_insight(row: &PgRow) -> Result<Insight> {
    let entity_type: String = row.try_get("entity_type")?;
    let insight_type: String = row.try_get("insight_type")?;
    let category: String = row.try_get("category")?;
    let severity: String = row.try_get("severity")?;
    let metadata: Value = row.try_get("metadata")?;

    Ok(Insight {
        entity_type: entity_type.parse()?,
        entity_id: row.try_get("entity_id")?,
        insight_type: insight_type.parse()?,
        category: category.parse()?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        severity: severity.parse()?,
        priority: row.try_get("priority")?,
        actionable: row.try_get("actionable")?,
        metadata: decode_metadata(metadata)?.0,
        expires_at: row.try_get("expires_at")?,
    })
}

/// One flattened row of coach ⟕ cohort ⟕ membership.
type CoachCohortRow = (Uuid, String, String, Option<Uuid>, Option<Uuid>);

/// Fold rows ordered by coach then cohort into nested coaches. Coaches
/// without cohorts and cohorts without members come back as empty lists.
fn fold_coach_rows(rows: Vec<CoachCohortRow>) -> Vec<CoachWithCohorts> {
    let mut coaches: Vec<CoachWithCohorts> = Vec::new();
    for (coach_id, name, email, cohort_id, user_id) in rows {
        if coaches.last().map(|c| c.id) != Some(coach_id) {
            coaches.push(CoachWithCohorts {
                id: coach_id,
                name,
                email,
                cohorts: Vec::new(),
            });
        }
        let Some(coach) = coaches.last_mut() else {
            continue;
        };
        let Some(cohort_id) = cohort_id else {
            continue;
        };
        if coach.cohorts.last().map(|c| c.id) != Some(cohort_id) {
            coach.cohorts.push(CohortMembers {
                id: cohort_id,
                member_ids: Vec::new(),
            });
        }
        if let (Some(cohort), Some(user_id)) = (coach.cohorts.last_mut(), user_id) {
            cohort.member_ids.push(user_id);
        }
    }
    coaches
}

#[async_trait]
impl StoreGateway for PgStore {
    async fn list_clients(&self) -> Result<Vec<ClientRecord>> {
        let rows = self
            .timed(
                "list_clients",
                sqlx::query("SELECT id, full_name, email FROM coaching.clients ORDER BY full_name, id")
                    .fetch_all(&self.pool),
            )
            .await?;

        rows.iter()
            .map(|row| {
                Ok(ClientRecord {
                    id: row.try_get("id")?,
                    name: row.try_get("full_name")?,
                    email: row.try_get("email")?,
                })
            })
            .collect()
    }

    async fn list_client_ids_with_recent_entries(&self, since: NaiveDate) -> Result<HashSet<Uuid>> {
        let ids: Vec<Uuid> = self
            .timed(
                "list_client_ids_with_recent_entries",
                sqlx::query_scalar(
                    "SELECT DISTINCT user_id FROM coaching.daily_entries WHERE entry_date >= $1",
                )
                .bind(since)
                .fetch_all(&self.pool),
            )
            .await?;
        Ok(ids.into_iter().collect())
    }

    async fn list_coaches(&self) -> Result<Vec<CoachRecord>> {
        let rows = self
            .timed(
                "list_coaches",
                sqlx::query("SELECT id, full_name, email FROM coaching.coaches ORDER BY full_name, id")
                    .fetch_all(&self.pool),
            )
            .await?;

        rows.iter()
            .map(|row| {
                Ok(CoachRecord {
                    id: row.try_get("id")?,
                    name: row.try_get("full_name")?,
                    email: row.try_get("email")?,
                })
            })
            .collect()
    }

    async fn list_coach_ids_with_cohorts(&self) -> Result<HashSet<Uuid>> {
        let ids: Vec<Uuid> = self
            .timed(
                "list_coach_ids_with_cohorts",
                sqlx::query_scalar(
                    "SELECT DISTINCT coach_id FROM coaching.cohorts WHERE coach_id IS NOT NULL",
                )
                .fetch_all(&self.pool),
            )
            .await?;
        Ok(ids.into_iter().collect())
    }

    async fn list_coaches_with_cohorts(&self) -> Result<Vec<CoachWithCohorts>> {
        let rows = self
            .timed(
                "list_coaches_with_cohorts",
                sqlx::query(
                    r#"
                    SELECT co.id, co.full_name, co.email, c.id AS cohort_id, m.user_id
                    FROM coaching.coaches co
                    LEFT JOIN coaching.cohorts c ON c.coach_id = co.id
                    LEFT JOIN coaching.cohort_memberships m ON m.cohort_id = c.id
                    ORDER BY co.full_name, co.id, c.id, m.user_id
                    "#,
                )
                .fetch_all(&self.pool),
            )
            .await?;

        let flat = rows
            .iter()
            .map(|row| {
                Ok((
                    row.try_get("id")?,
                    row.try_get("full_name")?,
                    row.try_get("email")?,
                    row.try_get("cohort_id")?,
                    row.try_get("user_id")?,
                ))
            })
            .collect::<Result<Vec<CoachCohortRow>>>()?;
        Ok(fold_coach_rows(flat))
    }

    async fn list_cohorts_with_memberships(&self) -> Result<Vec<CohortRecord>> {
        let rows = self
            .timed(
                "list_cohorts_with_memberships",
                sqlx::query(
                    r#"
                    SELECT c.id, c.name, c.coach_id,
                           COALESCE(
                               array_agg(m.user_id ORDER BY m.user_id)
                                   FILTER (WHERE m.user_id IS NOT NULL),
                               '{}'
                           ) AS member_ids
                    FROM coaching.cohorts c
                    LEFT JOIN coaching.cohort_memberships m ON m.cohort_id = c.id
                    GROUP BY c.id, c.name, c.coach_id
                    ORDER BY c.name, c.id
                    "#,
                )
                .fetch_all(&self.pool),
            )
            .await?;

        rows.iter()
            .map(|row| {
                Ok(CohortRecord {
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                    coach_id: row.try_get("coach_id")?,
                    member_ids: row.try_get("member_ids")?,
                })
            })
            .collect()
    }

    async fn count_recent_entries_by_client(&self, since: NaiveDate) -> Result<HashMap<Uuid, u32>> {
        let rows: Vec<(Uuid, i64)> = self
            .timed(
                "count_recent_entries_by_client",
                sqlx::query_as(
                    r#"
                    SELECT user_id, COUNT(*) AS entries
                    FROM coaching.daily_entries
                    WHERE entry_date >= $1
                    GROUP BY user_id
                    "#,
                )
                .bind(since)
                .fetch_all(&self.pool),
            )
            .await?;

        Ok(rows
            .into_iter()
            .map(|(id, count)| (id, u32::try_from(count).unwrap_or(u32::MAX)))
            .collect())
    }

    async fn latest_entry_date_by_client(
        &self,
        client_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, NaiveDate>> {
        let rows: Vec<(Uuid, NaiveDate)> = self
            .timed(
                "latest_entry_date_by_client",
                sqlx::query_as(
                    r#"
                    SELECT user_id, entry_date
                    FROM coaching.daily_entries
                    WHERE user_id = ANY($1)
                    ORDER BY entry_date DESC
                    "#,
                )
                .bind(client_ids)
                .fetch_all(&self.pool),
            )
            .await?;

        let mut latest = HashMap::new();
        for (id, date) in rows {
            latest.entry(id).or_insert(date);
        }
        Ok(latest)
    }

    async fn lookup_display_names(
        &self,
        keys: &[EntityKey],
    ) -> Result<HashMap<EntityKey, DisplayName>> {
        let ids_of = |entity_type: EntityType| -> Vec<Uuid> {
            keys.iter()
                .filter(|k| k.entity_type == entity_type)
                .map(|k| k.entity_id)
                .collect()
        };
        let mut names = HashMap::new();

        for (entity_type, sql) in [
            (
                EntityType::Client,
                "SELECT id, full_name AS name, email FROM coaching.clients WHERE id = ANY($1)",
            ),
            (
                EntityType::Coach,
                "SELECT id, full_name AS name, email FROM coaching.coaches WHERE id = ANY($1)",
            ),
            (
                EntityType::Cohort,
                "SELECT id, name, NULL::text AS email FROM coaching.cohorts WHERE id = ANY($1)",
            ),
        ] {
            let ids = ids_of(entity_type);
            if ids.is_empty() {
                continue;
            }
            let rows = self
                .timed(
                    "lookup_display_names",
                    sqlx::query(sql).bind(&ids).fetch_all(&self.pool),
                )
                .await?;
            for row in rows {
                names.insert(
                    EntityKey::new(entity_type, row.try_get("id")?),
                    DisplayName {
                        name: row.try_get("name")?,
                        email: row.try_get("email")?,
                    },
                );
            }
        }
        Ok(names)
    }

    async fn read_cached_scores(&self, now: DateTime<Utc>) -> Result<Vec<StoredScore>> {
        let rows = self
            .timed(
                "read_cached_scores",
                sqlx::query(
                    r#"
                    SELECT entity_type, entity_id, score, priority, reasons, metadata,
                           computed_at, expires_at
                    FROM coaching.attention_scores
                    WHERE expires_at IS NULL OR expires_at > $1
                    "#,
                )
                .bind(now)
                .fetch_all(&self.pool),
            )
            .await?;

        rows.iter().map(row_to_stored_score).collect()
    }

    async fn replace_scores(
        &self,
        keys: &[EntityKey],
        rows: &[AttentionScore],
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let key_types: Vec<String> = keys.iter().map(|k| k.entity_type.to_string()).collect();
        let key_ids: Vec<Uuid> = keys.iter().map(|k| k.entity_id).collect();
        let mut encoded = Vec::with_capacity(rows.len());
        for row in rows {
            encoded.push((row, serde_json::to_value(&row.reasons)?, encode_metadata(row)));
        }

        self.timed("replace_scores", async {
            let mut tx = self.pool.begin().await?;
            sqlx::query(
                r#"
                DELETE FROM coaching.attention_scores
                WHERE (entity_type, entity_id) IN (
                    SELECT * FROM UNNEST($1::text[], $2::uuid[])
                )
                "#,
            )
            .bind(&key_types)
            .bind(&key_ids)
            .execute(&mut *tx)
            .await?;

            for (row, reasons, metadata) in &encoded {
                sqlx::query(
                    r#"
                    INSERT INTO coaching.attention_scores
                    (entity_type, entity_id, score, priority, reasons, metadata, computed_at, expires_at)
                    VALUES ($1, $2, $3, $4, $5, $6, now(), $7)
                    ON CONFLICT (entity_type, entity_id) DO UPDATE
                    SET score = EXCLUDED.score,
                        priority = EXCLUDED.priority,
                        reasons = EXCLUDED.reasons,
                        metadata = EXCLUDED.metadata,
                        computed_at = EXCLUDED.computed_at,
                        expires_at = EXCLUDED.expires_at
                    "#,
                )
                .bind(row.entity_type.as_str())
                .bind(row.entity_id)
                .bind(row.score)
                .bind(row.priority.as_str())
                .bind(reasons)
                .bind(metadata)
                .bind(expires_at)
                .execute(&mut *tx)
                .await?;
            }

            tx.commit().await
        })
        .await?;

        debug!(deleted_keys = keys.len(), inserted = rows.len(), "scores replaced");
        Ok(())
    }

    async fn delete_expired_scores(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = self
            .timed(
                "delete_expired_scores",
                sqlx::query(
                    "DELETE FROM coaching.attention_scores WHERE expires_at IS NOT NULL AND expires_at <= $1",
                )
                .bind(now)
                .execute(&self.pool),
            )
            .await?;
        Ok(result.rows_affected())
    }

    async fn read_active_insights(&self, now: DateTime<Utc>) -> Result<Vec<Insight>> {
        let rows = self
            .timed(
                "read_active_insights",
                sqlx::query(
                    r#"
                    SELECT entity_type, entity_id, insight_type, category, title, description,
                           severity, priority, actionable, metadata, expires_at
                    FROM coaching.admin_insights
                    WHERE expires_at IS NULL OR expires_at > $1
                    "#,
                )
                .bind(now)
                .fetch_all(&self.pool),
            )
            .await?;

        rows.iter().map(row_to_insight).collect()
    }

    async fn replace_insights(&self, keys: &[InsightKey], rows: &[Insight]) -> Result<()> {
        let key_types: Vec<&str> = keys.iter().map(|k| k.entity_type.as_str()).collect();
        let key_ids: Vec<Uuid> = keys.iter().map(|k| k.entity_id).collect();
        let key_kinds: Vec<&str> = keys.iter().map(|k| k.insight_type.as_str()).collect();
        let key_categories: Vec<&str> = keys.iter().map(|k| k.category.as_str()).collect();

        self.timed("replace_insights", async {
            let mut tx = self.pool.begin().await?;
            sqlx::query(
                r#"
                DELETE FROM coaching.admin_insights
                WHERE (entity_type, entity_id, insight_type, category) IN (
                    SELECT * FROM UNNEST($1::text[], $2::uuid[], $3::text[], $4::text[])
                )
                "#,
            )
            .bind(&key_types)
            .bind(&key_ids)
            .bind(&key_kinds)
            .bind(&key_categories)
            .execute(&mut *tx)
            .await?;

            for insight in rows {
                sqlx::query(
                    r#"
                    INSERT INTO coaching.admin_insights
                    (entity_type, entity_id, insight_type, category, title, description,
                     severity, priority, actionable, metadata, expires_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                    ON CONFLICT (entity_type, entity_id, insight_type, category) DO UPDATE
                    SET title = EXCLUDED.title,
                        description = EXCLUDED.description,
                        severity = EXCLUDED.severity,
                        priority = EXCLUDED.priority,
                        actionable = EXCLUDED.actionable,
                        metadata = EXCLUDED.metadata,
                        created_at = now(),
                        expires_at = EXCLUDED.expires_at
                    "#,
                )
                .bind(insight.entity_type.as_str())
                .bind(insight.entity_id)
                .bind(insight.insight_type.as_str())
                .bind(insight.category.as_str())
                .bind(&insight.title)
                .bind(&insight.description)
                .bind(insight.severity.as_str())
                .bind(insight.priority)
                .bind(insight.actionable)
                .bind(Value::Object(insight.metadata.clone()))
                .bind(insight.expires_at)
                .execute(&mut *tx)
                .await?;
            }

            tx.commit().await
        })
        .await?;

        debug!(deleted_keys = keys.len(), inserted = rows.len(), "insights replaced");
        Ok(())
    }

    async fn delete_expired_insights(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = self
            .timed(
                "delete_expired_insights",
                sqlx::query(
                    "DELETE FROM coaching.admin_insights WHERE expires_at IS NOT NULL AND expires_at <= $1",
                )
                .bind(now)
                .execute(&self.pool),
            )
            .await?;
        Ok(result.rows_affected())
    }
}

struct SeedClient {
    name: &'static str,
    email: &'static str,
    cohort: Option<&'static str>,
    entry_days_ago: Vec<i64>,
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let coaches = [
        ("Maya Okafor", "maya.okafor@coachops.io"),
        ("Theo Lindqvist", "theo.lindqvist@coachops.io"),
        ("Priya Raman", "priya.raman@coachops.io"),
    ];
    let cohorts = [
        ("Spring Reset", Some("maya.okafor@coachops.io")),
        ("Strength Foundations", Some("maya.okafor@coachops.io")),
        ("Mindful Eating", Some("theo.lindqvist@coachops.io")),
        ("Summer Kickoff", None),
    ];
    let clients = vec![
        SeedClient {
            name: "Avery Lee",
            email: "avery.lee@example.com",
            cohort: Some("Spring Reset"),
            entry_days_ago: (0..14).collect(),
        },
        SeedClient {
            name: "Jules Moreno",
            email: "jules.moreno@example.com",
            cohort: Some("Spring Reset"),
            entry_days_ago: vec![2, 4, 6, 9],
        },
        SeedClient {
            name: "Kiara Patel",
            email: "kiara.patel@example.com",
            cohort: Some("Strength Foundations"),
            entry_days_ago: vec![20, 25],
        },
        SeedClient {
            name: "Rosa Delgado",
            email: "rosa.delgado@example.com",
            cohort: Some("Strength Foundations"),
            entry_days_ago: (0..10).collect(),
        },
        SeedClient {
            name: "Noor Haddad",
            email: "noor.haddad@example.com",
            cohort: Some("Mindful Eating"),
            entry_days_ago: (1..13).collect(),
        },
        SeedClient {
            name: "Luca Bianchi",
            email: "luca.bianchi@example.com",
            cohort: Some("Mindful Eating"),
            entry_days_ago: vec![40],
        },
        SeedClient {
            name: "Sam Whitfield",
            email: "sam.whitfield@example.com",
            cohort: None,
            entry_days_ago: Vec::new(),
        },
        SeedClient {
            name: "Ezra Cohen",
            email: "ezra.cohen@example.com",
            cohort: None,
            entry_days_ago: vec![3],
        },
    ];

    let mut coach_ids: HashMap<&str, Uuid> = HashMap::new();
    for (name, email) in coaches {
        let id: Uuid = sqlx::query(
            r#"
            INSERT INTO coaching.coaches (id, full_name, email)
            VALUES ($1, $2, $3)
            ON CONFLICT (email) DO UPDATE SET full_name = EXCLUDED.full_name
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(email)
        .fetch_one(pool)
        .await?
        .try_get("id")?;
        coach_ids.insert(email, id);
    }

    let mut cohort_ids: HashMap<&str, Uuid> = HashMap::new();
    for (name, coach_email) in cohorts {
        let coach_id = coach_email.and_then(|email| coach_ids.get(email).copied());
        let id: Uuid = sqlx::query(
            r#"
            INSERT INTO coaching.cohorts (id, name, coach_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (name) DO UPDATE SET coach_id = EXCLUDED.coach_id
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(coach_id)
        .fetch_one(pool)
        .await?
        .try_get("id")?;
        cohort_ids.insert(name, id);
    }

    let today = Utc::now().date_naive();
    for client in &clients {
        let client_id: Uuid = sqlx::query(
            r#"
            INSERT INTO coaching.clients (id, full_name, email)
            VALUES ($1, $2, $3)
            ON CONFLICT (email) DO UPDATE SET full_name = EXCLUDED.full_name
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(client.name)
        .bind(client.email)
        .fetch_one(pool)
        .await?
        .try_get("id")?;

        if let Some(cohort_id) = client.cohort.and_then(|name| cohort_ids.get(name)) {
            sqlx::query(
                r#"
                INSERT INTO coaching.cohort_memberships (cohort_id, user_id)
                VALUES ($1, $2)
                ON CONFLICT (cohort_id, user_id) DO NOTHING
                "#,
            )
            .bind(cohort_id)
            .bind(client_id)
            .execute(pool)
            .await?;
        }

        for days_ago in &client.entry_days_ago {
            sqlx::query(
                r#"
                INSERT INTO coaching.daily_entries (id, user_id, entry_date)
                VALUES ($1, $2, $3)
                ON CONFLICT (user_id, entry_date) DO NOTHING
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(client_id)
            .bind(today - Days::days(*days_ago))
            .execute(pool)
            .await?;
        }
    }

    info!(
        coaches = coach_ids.len(),
        cohorts = cohort_ids.len(),
        clients = clients.len(),
        "seed data inserted"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Priority;

    #[tokio::test]
    async fn slow_queries_hit_the_timeout() {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/attention_engine")
            .unwrap();
        let store = PgStore {
            pool,
            query_timeout: Duration::from_millis(50),
        };

        let err = store
            .timed("list_clients", async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, sqlx::Error>(())
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            EngineError::Timeout {
                query: "list_clients",
                millis: 50
            }
        ));
        assert_eq!(err.to_string(), "Query `list_clients` timed out after 50ms");
    }

    #[tokio::test]
    async fn fast_queries_pass_through() {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/attention_engine")
            .unwrap();
        let store = PgStore {
            pool,
            query_timeout: Duration::from_millis(500),
        };

        let value = store
            .timed("list_coaches", async { Ok::<_, sqlx::Error>(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn folds_nested_coach_rows() {
        let (dana, riley) = (Uuid::from_u128(1), Uuid::from_u128(2));
        let (spring, autumn) = (Uuid::from_u128(10), Uuid::from_u128(11));
        let (a, b) = (Uuid::from_u128(100), Uuid::from_u128(101));
        let row = |coach: Uuid, name: &str, cohort: Option<Uuid>, user: Option<Uuid>| {
            (coach, name.to_string(), format!("{name}@example.com"), cohort, user)
        };

        let coaches = fold_coach_rows(vec![
            row(dana, "dana", Some(spring), Some(a)),
            row(dana, "dana", Some(spring), Some(b)),
            row(dana, "dana", Some(autumn), None),
            row(riley, "riley", None, None),
        ]);

        assert_eq!(coaches.len(), 2);
        assert_eq!(
            coaches[0].cohorts,
            vec![
                CohortMembers {
                    id: spring,
                    member_ids: vec![a, b],
                },
                CohortMembers {
                    id: autumn,
                    member_ids: Vec::new(),
                },
            ]
        );
        assert!(coaches[1].cohorts.is_empty());
    }

    #[test]
    fn suggested_actions_ride_inside_metadata() {
        let mut metadata = Map::new();
        metadata.insert("recent_entries".to_string(), Value::from(3));
        let score = AttentionScore {
            entity_type: EntityType::Client,
            entity_id: Uuid::from_u128(7),
            score: 45,
            priority: Priority::Amber,
            reasons: vec!["Only 3 entries in the last 14 days".to_string()],
            suggested_actions: vec!["Encourage daily logging".to_string()],
            metadata: metadata.clone(),
        };

        let (decoded, actions) = decode_metadata(encode_metadata(&score)).unwrap();
        assert_eq!(decoded, metadata);
        assert_eq!(actions, score.suggested_actions);
    }

    #[test]
    fn rejects_non_object_metadata() {
        assert!(decode_metadata(Value::from("oops")).is_err());
        assert_eq!(decode_metadata(Value::Null).unwrap(), (Map::new(), Vec::new()));
    }
}
