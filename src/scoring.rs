use std::collections::HashMap;

use chrono::{Duration, NaiveDate};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::models::{
    AttentionScore, ClientSnapshot, CoachSnapshot, CohortSnapshot, EntitySnapshot, EntityType,
    Priority,
};

/// Trailing window for activity and engagement, in days.
pub const TRAILING_WINDOW_DAYS: i64 = 14;
/// Stand-in for "days since last entry" when a client never logged one.
pub const NEVER_LOGGED_DAYS: i64 = 999;
/// A coach with more clients than this is overloaded.
pub const COACH_OVERLOAD_THRESHOLD: usize = 50;

const MAX_SCORE: i32 = 100;

pub fn cutoff_date(today: NaiveDate) -> NaiveDate {
    today - Duration::days(TRAILING_WINDOW_DAYS)
}

/// Shared lookups for one scoring pass.
pub struct ScoringContext<'a> {
    pub today: NaiveDate,
    pub cutoff: NaiveDate,
    pub recent_counts: &'a HashMap<Uuid, u32>,
}

pub fn score_entity(snapshot: &EntitySnapshot, ctx: &ScoringContext<'_>) -> AttentionScore {
    match snapshot {
        EntitySnapshot::Client(client) => score_client(client, ctx.today, ctx.cutoff),
        EntitySnapshot::Coach(coach) => score_coach(coach, ctx.recent_counts),
        EntitySnapshot::Cohort(cohort) => score_cohort(cohort, ctx.recent_counts),
    }
}

/// Logged entries over expected entries (`members × 14`) across the window.
/// A member listed in several cohorts counts once per membership.
pub fn engagement_rate<'a>(
    member_ids: impl IntoIterator<Item = &'a Uuid>,
    recent_counts: &HashMap<Uuid, u32>,
) -> f64 {
    let mut members = 0u64;
    let mut entries = 0u64;
    for id in member_ids {
        members += 1;
        entries += u64::from(recent_counts.get(id).copied().unwrap_or(0));
    }
    if members == 0 {
        return 0.0;
    }
    entries as f64 / (members * TRAILING_WINDOW_DAYS as u64) as f64
}

struct ScoreBuilder {
    score: i32,
    reasons: Vec<String>,
    suggested_actions: Vec<String>,
    metadata: Map<String, Value>,
}

impl ScoreBuilder {
    fn new() -> Self {
        Self {
            score: 0,
            reasons: Vec::new(),
            suggested_actions: Vec::new(),
            metadata: Map::new(),
        }
    }

    fn add(&mut self, points: i32, reason: String, action: &str) {
        self.score += points;
        self.reasons.push(reason);
        self.push_action(action);
    }

    fn floor(&mut self, minimum: i32, reason: String, action: &str) {
        self.score = self.score.max(minimum);
        self.reasons.push(reason);
        self.push_action(action);
    }

    fn push_action(&mut self, action: &str) {
        if !self.suggested_actions.iter().any(|a| a == action) {
            self.suggested_actions.push(action.to_string());
        }
    }

    fn meta(&mut self, key: &str, value: Value) {
        self.metadata.insert(key.to_string(), value);
    }

    fn finish(self, entity_type: EntityType, entity_id: Uuid) -> AttentionScore {
        let score = self.score.clamp(0, MAX_SCORE);
        AttentionScore {
            entity_type,
            entity_id,
            score,
            priority: Priority::from_score(score),
            reasons: self.reasons,
            suggested_actions: self.suggested_actions,
            metadata: self.metadata,
        }
    }
}

fn rounded(rate: f64) -> Value {
    json!((rate * 1000.0).round() / 1000.0)
}

pub fn score_client(client: &ClientSnapshot, today: NaiveDate, cutoff: NaiveDate) -> AttentionScore {
    let mut builder = ScoreBuilder::new();
    let days_since_last = client
        .last_entry
        .map(|date| (today - date).num_days())
        .unwrap_or(NEVER_LOGGED_DAYS);
    let stale = client.last_entry.map_or(true, |date| date < cutoff);

    if stale {
        let reason = match client.last_entry {
            Some(_) => format!("No entries in {days_since_last} days"),
            None => "Has never logged an entry".to_string(),
        };
        if days_since_last >= 30 {
            builder.add(40, reason, "Contact client to check engagement");
        } else if days_since_last >= TRAILING_WINDOW_DAYS {
            builder.add(25, reason, "Send a check-in message");
        }
    }

    if (1..TRAILING_WINDOW_DAYS).contains(&days_since_last) {
        let plural = if days_since_last == 1 { "" } else { "s" };
        builder.floor(
            30,
            format!("Last entry was {days_since_last} day{plural} ago"),
            "Send a logging reminder",
        );
    }

    match client.recent_entry_count {
        0 => builder.add(
            30,
            format!("No entries in the last {TRAILING_WINDOW_DAYS} days"),
            "Contact client to check engagement",
        ),
        n if n < 7 => builder.add(
            15,
            format!("Only {n} entries in the last {TRAILING_WINDOW_DAYS} days"),
            "Encourage daily logging",
        ),
        _ => {}
    }

    if client.cohort_ids.is_empty() {
        builder.add(20, "Not assigned to any cohort".to_string(), "Assign client to a cohort");
    }

    builder.meta(
        "days_since_last_entry",
        client
            .last_entry
            .map_or(Value::Null, |_| json!(days_since_last)),
    );
    builder.meta("recent_entries", json!(client.recent_entry_count));
    builder.meta("cohort_count", json!(client.cohort_ids.len()));
    builder.finish(EntityType::Client, client.id)
}

pub fn score_coach(coach: &CoachSnapshot, recent_counts: &HashMap<Uuid, u32>) -> AttentionScore {
    let mut builder = ScoreBuilder::new();
    let total_clients = coach.total_clients();
    let has_cohorts = !coach.cohorts.is_empty();

    if total_clients > COACH_OVERLOAD_THRESHOLD {
        builder.add(
            50,
            format!("Overloaded with {total_clients} clients"),
            "Reassign some clients to another coach",
        );
        builder.push_action("Consider bringing on an additional coach");
    } else if !has_cohorts {
        builder.add(30, "Has no cohorts".to_string(), "Assign a cohort to this coach");
    } else if total_clients == 0 {
        builder.add(
            20,
            "Cohorts have no members".to_string(),
            "Add clients to this coach's cohorts",
        );
    }

    if total_clients > 0 && total_clients < 10 && has_cohorts {
        builder.add(
            10,
            format!("Underutilized with only {total_clients} clients"),
            "Assign more clients to this coach",
        );
    }

    if total_clients > 0 {
        let rate = engagement_rate(
            coach.cohorts.iter().flat_map(|c| c.member_ids.iter()),
            recent_counts,
        );
        let percent = (rate * 100.0).round();
        if rate < 0.3 {
            builder.add(
                25,
                format!("Low client engagement ({percent}%)"),
                "Review client engagement with the coach",
            );
        } else if rate < 0.5 {
            builder.add(
                15,
                format!("Below-target client engagement ({percent}%)"),
                "Review client engagement with the coach",
            );
        }
        builder.meta("engagement_rate", rounded(rate));
    }

    builder.meta("total_clients", json!(total_clients));
    builder.meta("cohort_count", json!(coach.cohorts.len()));
    builder.finish(EntityType::Coach, coach.id)
}

pub fn score_cohort(cohort: &CohortSnapshot, recent_counts: &HashMap<Uuid, u32>) -> AttentionScore {
    let mut builder = ScoreBuilder::new();

    if cohort.member_ids.is_empty() {
        builder.add(40, "Cohort has no members".to_string(), "Add clients or archive the cohort");
    } else {
        let rate = engagement_rate(&cohort.member_ids, recent_counts);
        let percent = (rate * 100.0).round();
        if rate < 0.3 {
            builder.add(
                35,
                format!("Low cohort engagement ({percent}%)"),
                "Run a cohort re-engagement campaign",
            );
        } else if rate < 0.5 {
            builder.add(
                20,
                format!("Below-target cohort engagement ({percent}%)"),
                "Check in with cohort members",
            );
        } else if rate > 0.8 {
            builder.score -= 10;
            builder.reasons.push(format!("Strong cohort engagement ({percent}%)"));
        }
        builder.meta("engagement_rate", rounded(rate));
    }

    if cohort.coach_id.is_none() {
        builder.add(30, "Cohort has no coach".to_string(), "Assign a coach to this cohort");
    }

    builder.meta("member_count", json!(cohort.member_ids.len()));
    builder.finish(EntityType::Cohort, cohort.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CohortMembers;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 15).unwrap()
    }

    fn client(last_entry_days_ago: Option<i64>, recent: u32, cohorts: usize) -> ClientSnapshot {
        ClientSnapshot {
            id: Uuid::new_v4(),
            name: "Avery Lee".to_string(),
            email: "avery@example.com".to_string(),
            last_entry: last_entry_days_ago.map(|d| today() - Duration::days(d)),
            recent_entry_count: recent,
            cohort_ids: (0..cohorts).map(|_| Uuid::new_v4()).collect(),
        }
    }

    fn score(c: &ClientSnapshot) -> AttentionScore {
        score_client(c, today(), cutoff_date(today()))
    }

    /// Members each logging `per_member` entries in the window.
    fn members(count: usize, per_member: u32, counts: &mut HashMap<Uuid, u32>) -> Vec<Uuid> {
        (0..count)
            .map(|_| {
                let id = Uuid::new_v4();
                counts.insert(id, per_member);
                id
            })
            .collect()
    }

    /// One member per entry in `per_member`, logging that many entries.
    fn members_logging(per_member: &[u32], counts: &mut HashMap<Uuid, u32>) -> Vec<Uuid> {
        per_member
            .iter()
            .map(|&logged| {
                let id = Uuid::new_v4();
                counts.insert(id, logged);
                id
            })
            .collect()
    }

    fn coach(cohorts: Vec<Vec<Uuid>>) -> CoachSnapshot {
        CoachSnapshot {
            id: Uuid::new_v4(),
            name: "Jordan Reyes".to_string(),
            email: "jordan@example.com".to_string(),
            cohorts: cohorts
                .into_iter()
                .map(|member_ids| CohortMembers {
                    id: Uuid::new_v4(),
                    member_ids,
                })
                .collect(),
        }
    }

    fn cohort(member_ids: Vec<Uuid>, has_coach: bool) -> CohortSnapshot {
        CohortSnapshot {
            id: Uuid::new_v4(),
            name: "Spring Reset".to_string(),
            coach_id: has_coach.then(Uuid::new_v4),
            member_ids,
        }
    }

    #[test]
    fn never_logged_client_without_cohort_is_red() {
        let result = score(&client(None, 0, 0));
        assert_eq!(result.score, 90);
        assert_eq!(result.priority, Priority::Red);
        assert_eq!(result.reasons.len(), 3);
        assert_eq!(result.metadata["days_since_last_entry"], Value::Null);
    }

    #[test]
    fn recent_gap_is_floored_to_amber() {
        let result = score(&client(Some(2), 10, 1));
        assert_eq!(result.score, 30);
        assert_eq!(result.priority, Priority::Amber);
        assert_eq!(result.reasons, vec!["Last entry was 2 days ago".to_string()]);
    }

    #[test]
    fn client_logged_today_with_full_activity_scores_zero() {
        let result = score(&client(Some(0), 14, 2));
        assert_eq!(result.score, 0);
        assert_eq!(result.priority, Priority::Green);
        assert!(result.reasons.is_empty());
    }

    #[test]
    fn staleness_bands_are_exclusive() {
        // 20 days: stale band only, plus zero recent entries
        assert_eq!(score(&client(Some(20), 0, 1)).score, 25 + 30);
        // 45 days: high band only
        assert_eq!(score(&client(Some(45), 0, 1)).score, 40 + 30);
        // exactly at the cutoff is neither stale nor inside the gap floor
        assert_eq!(score(&client(Some(14), 8, 1)).score, 0);
    }

    #[test]
    fn floor_applies_before_volume_rules() {
        let result = score(&client(Some(3), 4, 1));
        assert_eq!(result.score, 30 + 15);
        assert_eq!(result.priority, Priority::Amber);
    }

    #[test]
    fn client_score_is_capped() {
        for days in [None, Some(0), Some(1), Some(13), Some(14), Some(29), Some(30), Some(400)] {
            for recent in [0, 3, 7, 14] {
                for cohorts in [0, 1] {
                    let result = score(&client(days, recent, cohorts));
                    assert!((0..=100).contains(&result.score));
                    assert_eq!(result.priority, Priority::from_score(result.score));
                }
            }
        }
    }

    #[test]
    fn overloaded_coach_scores_at_least_fifty() {
        for per_member in [0, 7, 14] {
            let mut counts = HashMap::new();
            let result = score_coach(
                &coach(vec![members(30, per_member, &mut counts), members(21, per_member, &mut counts)]),
                &counts,
            );
            assert!(result.score >= 50);
            assert_eq!(result.priority, Priority::from_score(result.score));
            assert_eq!(result.metadata["total_clients"], json!(51));
        }
    }

    #[test]
    fn engaged_overloaded_coach_stays_amber() {
        let mut counts = HashMap::new();
        let result = score_coach(&coach(vec![members(51, 14, &mut counts)]), &counts);
        assert_eq!(result.score, 50);
        assert_eq!(result.priority, Priority::Amber);
        assert_eq!(
            result.suggested_actions,
            vec![
                "Reassign some clients to another coach".to_string(),
                "Consider bringing on an additional coach".to_string(),
            ]
        );
    }

    #[test]
    fn disengaged_overloaded_coach_is_red() {
        let mut counts = HashMap::new();
        let result = score_coach(&coach(vec![members(51, 2, &mut counts)]), &counts);
        assert_eq!(result.score, 75);
        assert_eq!(result.priority, Priority::Red);
        assert_eq!(result.suggested_actions.len(), 3);
    }

    #[test]
    fn coach_with_fifty_clients_is_not_overloaded() {
        let mut counts = HashMap::new();
        let result = score_coach(&coach(vec![members(50, 14, &mut counts)]), &counts);
        assert_eq!(result.score, 0);
        assert!(result.reasons.is_empty());
    }

    #[test]
    fn coach_without_cohorts_scores_thirty() {
        let result = score_coach(&coach(Vec::new()), &HashMap::new());
        assert_eq!(result.score, 30);
        assert_eq!(result.priority, Priority::Amber);
    }

    #[test]
    fn coach_with_empty_cohorts_scores_twenty() {
        let result = score_coach(&coach(vec![Vec::new(), Vec::new()]), &HashMap::new());
        assert_eq!(result.score, 20);
        assert_eq!(result.priority, Priority::Green);
    }

    #[test]
    fn small_disengaged_coach_accumulates() {
        let mut counts = HashMap::new();
        let result = score_coach(&coach(vec![members(5, 2, &mut counts)]), &counts);
        // underutilized (10) + engagement 2/14 < 0.3 (25)
        assert_eq!(result.score, 35);
    }

    #[test]
    fn coach_engagement_bands() {
        let mut counts = HashMap::new();
        let moderate = score_coach(&coach(vec![members(20, 6, &mut counts)]), &counts);
        assert_eq!(moderate.score, 15);

        let healthy = score_coach(&coach(vec![members(20, 12, &mut counts)]), &counts);
        assert_eq!(healthy.score, 0);
    }

    #[test]
    fn empty_cohort_without_coach() {
        let result = score_cohort(&cohort(Vec::new(), false), &HashMap::new());
        assert_eq!(result.score, 70);
        assert_eq!(result.priority, Priority::Red);
    }

    #[test]
    fn highly_engaged_cohort_clamps_to_zero() {
        // 50 members × 14 = 700 expected; 567 logged = 0.81
        let mut counts = HashMap::new();
        let ids = members(50, 11, &mut counts);
        for id in ids.iter().take(17) {
            counts.insert(*id, 12);
        }
        let rate = engagement_rate(&ids, &counts);
        assert!((rate - 0.81).abs() < 1e-9, "rate was {rate}");

        let result = score_cohort(&cohort(ids, true), &counts);
        assert_eq!(result.score, 0);
        assert_eq!(result.priority, Priority::Green);
    }

    #[test]
    fn engaged_cohort_offsets_missing_coach() {
        let mut counts = HashMap::new();
        let result = score_cohort(&cohort(members(10, 13, &mut counts), false), &counts);
        assert_eq!(result.score, 20);
    }

    #[test]
    fn low_engagement_cohort_bands() {
        let mut counts = HashMap::new();
        let low = score_cohort(&cohort(members(10, 2, &mut counts), true), &counts);
        assert_eq!(low.score, 35);
        let middling = score_cohort(&cohort(members(10, 6, &mut counts), true), &counts);
        assert_eq!(middling.score, 20);
    }

    #[test]
    fn cohort_at_eighty_percent_gets_no_credit() {
        // 5 members × 14 = 70 expected; 56 logged = 0.8
        let mut counts = HashMap::new();
        let ids = members_logging(&[11, 11, 11, 11, 12], &mut counts);
        assert_eq!(engagement_rate(&ids, &counts), 0.8);

        let result = score_cohort(&cohort(ids, false), &counts);
        assert_eq!(result.score, 30);
        assert_eq!(result.reasons, vec!["Cohort has no coach".to_string()]);
    }

    #[test]
    fn engagement_thresholds_are_exclusive() {
        // 10 members × 14 = 140 expected; 42 logged = 0.3, 70 logged = 0.5
        let at_thirty: &[u32] = &[4, 4, 4, 4, 4, 4, 4, 4, 5, 5];
        let at_fifty: &[u32] = &[7; 10];

        let mut counts = HashMap::new();
        let ids = members_logging(at_thirty, &mut counts);
        assert_eq!(engagement_rate(&ids, &counts), 0.3);
        assert_eq!(score_coach(&coach(vec![ids.clone()]), &counts).score, 15);
        assert_eq!(score_cohort(&cohort(ids, true), &counts).score, 20);

        let ids = members_logging(at_fifty, &mut counts);
        assert_eq!(engagement_rate(&ids, &counts), 0.5);
        assert_eq!(score_coach(&coach(vec![ids.clone()]), &counts).score, 0);
        assert_eq!(score_cohort(&cohort(ids, true), &counts).score, 0);
    }

    #[test]
    fn scoring_is_deterministic() {
        let mut counts = HashMap::new();
        let snapshot = EntitySnapshot::Coach(coach(vec![members(4, 3, &mut counts)]));
        let ctx = ScoringContext {
            today: today(),
            cutoff: cutoff_date(today()),
            recent_counts: &counts,
        };
        assert_eq!(score_entity(&snapshot, &ctx), score_entity(&snapshot, &ctx));
    }

    #[test]
    fn cutoff_is_fourteen_days_back() {
        assert_eq!(cutoff_date(today()), NaiveDate::from_ymd_opt(2026, 3, 1).unwrap());
    }
}
