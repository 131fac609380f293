//! Smart-suggestion generation.
//!
//! Two passes over each medication's adherence pattern:
//!
//! 1. **Rule pass** — five independent deterministic rules with fixed
//!    thresholds. Always runs; a single pattern can emit zero to five
//!    suggestions.
//! 2. **AI pass** — only when adherence is below 80% and a completion
//!    client is configured. Builds a prompt embedding the pattern's
//!    statistics, extracts the first JSON array from the response, and maps
//!    strictly-validated elements to `dose_scheduling` suggestions. Every
//!    failure mode (timeout, non-2xx, no array, malformed JSON, missing
//!    fields) yields zero AI suggestions and a warning, never an error —
//!    the rule pass already guarantees output when warranted.
//!
//! Per-medication failures never abort the batch: they are collected into
//! [`SuggestionBatch::failures`] (or [`SuggestionBatch::insufficient_data`]
//! for empty histories) so the caller can tell "no data" from "generation
//! failed".

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::analytics::analyze_medication_patterns;
use crate::completion::{CompletionClient, extract_json_array};
use crate::error::AdherenceError;
use crate::model::{
    AdherencePattern, DEFAULT_WINDOW_DAYS, SmartSuggestion, SuggestionPriority, SuggestionType,
};
use crate::storage::Storage;

/// Below this adherence rate the corrective encouragement rule fires.
const LOW_ADHERENCE_THRESHOLD: f64 = 60.0;

/// Below this compliance the worst time-slot / day-of-week rules fire.
const BUCKET_COMPLIANCE_THRESHOLD: f64 = 70.0;

/// Below this adherence rate the AI-augmented pass is attempted.
const AI_AUGMENTATION_THRESHOLD: f64 = 80.0;

/// At or above this streak length the positive-reinforcement rule fires.
const STREAK_MILESTONE_DAYS: u32 = 7;

/// Above this average delay the move-reminder-earlier rule fires.
const LATE_DOSE_THRESHOLD_MINUTES: f64 = 60.0;

/// One medication's generation failure, reported instead of aborting the
/// batch.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationFailure {
    /// The medication whose pattern or suggestions could not be computed.
    pub medication_id: String,

    /// Human-readable cause.
    pub message: String,
}

/// The result of one generation run across all of a user's medications.
#[derive(Debug, Clone, Serialize)]
pub struct SuggestionBatch {
    /// All suggestions, priority descending, ties broken by estimated
    /// improvement descending.
    pub suggestions: Vec<SmartSuggestion>,

    /// Medications skipped for lack of dose history ("no data", not an
    /// error).
    pub insufficient_data: Vec<String>,

    /// Medications whose generation failed outright.
    pub failures: Vec<GenerationFailure>,
}

/// Suggestion generator: deterministic rules plus an optional AI pass.
#[derive(Clone)]
pub struct SuggestionEngine {
    completion: Option<CompletionClient>,
}

impl SuggestionEngine {
    /// Create an engine. Without a completion client the AI pass is skipped
    /// entirely and generation is rule-based only.
    pub fn new(completion: Option<CompletionClient>) -> Self {
        Self { completion }
    }

    /// Generate suggestions for every medication of a user.
    ///
    /// Never fails on empty input (a user with no medications gets an empty
    /// batch). Individual per-medication failures are contained; only a
    /// failure to list the user's medications propagates.
    pub async fn generate(
        &self,
        storage: &Storage,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<SuggestionBatch, AdherenceError> {
        let medication_ids = storage.fetch_user_medication_ids(user_id).await?;

        let mut suggestions = Vec::new();
        let mut insufficient_data = Vec::new();
        let mut failures = Vec::new();

        for medication_id in medication_ids {
            let pattern =
                match analyze_medication_patterns(storage, &medication_id, DEFAULT_WINDOW_DAYS, now)
                    .await
                {
                    Ok(pattern) => pattern,
                    Err(e) if e.is_insufficient_data() => {
                        insufficient_data.push(medication_id);
                        continue;
                    }
                    Err(e) => {
                        warn!(
                            medication_id = %medication_id,
                            error = %e,
                            "Skipping medication in suggestion batch"
                        );
                        failures.push(GenerationFailure {
                            medication_id,
                            message: e.to_string(),
                        });
                        continue;
                    }
                };

            suggestions.extend(rule_based_suggestions(user_id, &pattern, now));

            if pattern.adherence_rate < AI_AUGMENTATION_THRESHOLD {
                match self.ai_suggestions(user_id, &pattern, now).await {
                    Ok(mut ai) => suggestions.append(&mut ai),
                    // Contained: the rule pass already produced output
                    Err(e) => {
                        warn!(
                            medication_id = %pattern.medication_id,
                            error = %e,
                            "AI suggestion pass degraded to rule-based only"
                        );
                    }
                }
            }
        }

        sort_suggestions(&mut suggestions);

        Ok(SuggestionBatch {
            suggestions,
            insufficient_data,
            failures,
        })
    }

    /// The AI-augmented pass for one pattern.
    async fn ai_suggestions(
        &self,
        user_id: &str,
        pattern: &AdherencePattern,
        now: DateTime<Utc>,
    ) -> Result<Vec<SmartSuggestion>, AdherenceError> {
        let Some(client) = &self.completion else {
            return Ok(Vec::new());
        };

        let prompt = build_prompt(pattern);
        let response = client
            .complete(&prompt)
            .await
            .map_err(|e| AdherenceError::ExternalService(e.to_string()))?;

        Ok(parse_ai_suggestions(
            &response,
            user_id,
            &pattern.medication_id,
            now,
        ))
    }
}

/// The deterministic rule pass. Each rule is independent; one pattern can
/// emit zero to five suggestions.
pub fn rule_based_suggestions(
    user_id: &str,
    pattern: &AdherencePattern,
    now: DateTime<Utc>,
) -> Vec<SmartSuggestion> {
    let mut suggestions = Vec::new();
    let name = &pattern.medication_name;

    if pattern.adherence_rate < LOW_ADHERENCE_THRESHOLD {
        suggestions.push(
            SmartSuggestion::new(
                user_id,
                &pattern.medication_id,
                SuggestionType::Encouragement,
                SuggestionPriority::High,
                &format!("Let's get back on track with {name}"),
                &format!(
                    "Only {:.0}% of scheduled {name} doses were taken over the last {} days.",
                    pattern.adherence_rate, DEFAULT_WINDOW_DAYS
                ),
                now,
            )
            .with_reasoning(&format!(
                "Adherence is {:.1}%, below the {:.0}% support threshold.",
                pattern.adherence_rate, LOW_ADHERENCE_THRESHOLD
            ))
            .with_action("Pick one dose and anchor it to a daily routine you never skip.")
            .with_estimated_improvement(25),
        );
    }

    let worst_slot = pattern.most_missed_time_slot;
    let worst_slot_compliance = pattern.patterns.time_slot_compliance[&worst_slot];
    if worst_slot_compliance < BUCKET_COMPLIANCE_THRESHOLD {
        suggestions.push(
            SmartSuggestion::new(
                user_id,
                &pattern.medication_id,
                SuggestionType::TimeOptimization,
                SuggestionPriority::Medium,
                &format!("Rework your {} doses of {name}", worst_slot.label()),
                &format!(
                    "The {} slot is your weakest: {:.0}% of its doses were taken.",
                    worst_slot.label(),
                    worst_slot_compliance
                ),
                now,
            )
            .with_reasoning(&format!(
                "{} compliance is {:.1}%, below {:.0}%.",
                worst_slot.label(),
                worst_slot_compliance,
                BUCKET_COMPLIANCE_THRESHOLD
            ))
            .with_action(&format!(
                "Try moving the {} dose into a time slot you rarely miss.",
                worst_slot.label()
            ))
            .with_estimated_improvement(15),
        );
    }

    let worst_day = pattern.most_missed_day_of_week;
    let worst_day_compliance = pattern.patterns.day_of_week_compliance[&worst_day];
    if worst_day_compliance < BUCKET_COMPLIANCE_THRESHOLD {
        suggestions.push(
            SmartSuggestion::new(
                user_id,
                &pattern.medication_id,
                SuggestionType::ReminderTiming,
                SuggestionPriority::Medium,
                &format!("Extra reminders on {}s", worst_day.label()),
                &format!(
                    "{name} is missed most on {}s: {:.0}% of those doses were taken.",
                    worst_day.label(),
                    worst_day_compliance
                ),
                now,
            )
            .with_reasoning(&format!(
                "{} compliance is {:.1}%, below {:.0}%.",
                worst_day.label(),
                worst_day_compliance,
                BUCKET_COMPLIANCE_THRESHOLD
            ))
            .with_action(&format!(
                "Schedule an extra reminder on {}s, or tie the dose to a fixed plan that day.",
                worst_day.label()
            ))
            .with_estimated_improvement(10),
        );
    }

    if pattern.streak_days >= STREAK_MILESTONE_DAYS {
        suggestions.push(
            SmartSuggestion::new(
                user_id,
                &pattern.medication_id,
                SuggestionType::Encouragement,
                SuggestionPriority::Low,
                &format!("{} days and counting", pattern.streak_days),
                &format!(
                    "You've taken {name} every day for {} days straight. Keep the chain going.",
                    pattern.streak_days
                ),
                now,
            )
            .with_reasoning(&format!(
                "Current streak is {} days, at or past the {}-day milestone.",
                pattern.streak_days, STREAK_MILESTONE_DAYS
            ))
            .with_action("Nothing to change. Check in again tomorrow."),
        );
    }

    if pattern.average_delay_minutes > LATE_DOSE_THRESHOLD_MINUTES {
        suggestions.push(
            SmartSuggestion::new(
                user_id,
                &pattern.medication_id,
                SuggestionType::ReminderTiming,
                SuggestionPriority::Medium,
                &format!("Move your {name} reminder earlier"),
                &format!(
                    "Doses are logged on average {:.0} minutes after their scheduled time.",
                    pattern.average_delay_minutes
                ),
                now,
            )
            .with_reasoning(&format!(
                "Average delay is {:.1} minutes, above the {:.0}-minute threshold.",
                pattern.average_delay_minutes, LATE_DOSE_THRESHOLD_MINUTES
            ))
            .with_action(&format!(
                "Shift the reminder roughly {:.0} minutes earlier so the logged time lands on schedule.",
                pattern.average_delay_minutes
            ))
            .with_estimated_improvement(12),
        );
    }

    suggestions
}

/// Sort priority descending, ties broken by estimated improvement
/// descending.
fn sort_suggestions(suggestions: &mut [SmartSuggestion]) {
    suggestions.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| b.estimated_improvement.cmp(&a.estimated_improvement))
    });
}

/// Build the statistics-embedding prompt for one pattern.
fn build_prompt(pattern: &AdherencePattern) -> String {
    format!(
        "You are helping a pregnant user take '{}' more consistently.\n\
         Statistics over the last {} days:\n\
         - adherence rate: {:.1}% ({} of {} scheduled doses taken)\n\
         - average delay after scheduled time: {:.0} minutes\n\
         - weakest time slot: {} ({:.0}% compliance)\n\
         - weakest day of week: {} ({:.0}% compliance)\n\
         - current streak: {} days\n\
         Suggest up to three schedule changes. Respond with only a JSON array \
         of objects, each with string fields \"title\", \"description\", \
         \"reasoning\", and \"action\", and optionally \"priority\" \
         (low|medium|high) and integer \"estimated_improvement\".",
        pattern.medication_name,
        DEFAULT_WINDOW_DAYS,
        pattern.adherence_rate,
        pattern.taken_doses,
        pattern.total_doses,
        pattern.average_delay_minutes,
        pattern.most_missed_time_slot.label(),
        pattern.patterns.time_slot_compliance[&pattern.most_missed_time_slot],
        pattern.most_missed_day_of_week.label(),
        pattern.patterns.day_of_week_compliance[&pattern.most_missed_day_of_week],
        pattern.streak_days,
    )
}

/// Map a completion response to `dose_scheduling` suggestions.
///
/// Strictly validated: an element survives only with non-empty string
/// `title`, `description`, `reasoning`, and `action` fields. Anything else
/// — no array, malformed JSON, wrong shapes — yields an empty list, never
/// an error.
pub fn parse_ai_suggestions(
    response: &str,
    user_id: &str,
    medication_id: &str,
    now: DateTime<Utc>,
) -> Vec<SmartSuggestion> {
    let Some(raw) = extract_json_array(response) else {
        return Vec::new();
    };
    let Ok(values) = serde_json::from_str::<Vec<Value>>(raw) else {
        return Vec::new();
    };

    values
        .iter()
        .filter_map(|value| {
            let title = non_empty_str(value, "title")?;
            let description = non_empty_str(value, "description")?;
            let reasoning = non_empty_str(value, "reasoning")?;
            let action = non_empty_str(value, "action")?;

            let priority = value
                .get("priority")
                .and_then(Value::as_str)
                .and_then(SuggestionPriority::parse)
                .unwrap_or(SuggestionPriority::Medium);

            let estimated_improvement = value
                .get("estimated_improvement")
                .and_then(Value::as_u64)
                .map(|v| v.min(100) as u32)
                .unwrap_or(10);

            Some(
                SmartSuggestion::new(
                    user_id,
                    medication_id,
                    SuggestionType::DoseScheduling,
                    priority,
                    title,
                    description,
                    now,
                )
                .with_reasoning(reasoning)
                .with_action(action)
                .with_estimated_improvement(estimated_improvement),
            )
        })
        .collect()
}

fn non_empty_str<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    let s = value.get(key)?.as_str()?.trim();
    if s.is_empty() { None } else { Some(s) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::DEFAULT_TIMEOUT_SECS;
    use crate::model::{
        CompliancePatterns, ContextBucket, DayOfWeek, DoseLog, Medication, TimeSlot,
    };
    use chrono::{Duration, TimeZone};
    use std::collections::BTreeMap;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap()
    }

    fn uniform_patterns(slot_value: f64, day_value: f64) -> CompliancePatterns {
        let time_slot_compliance: BTreeMap<TimeSlot, f64> =
            TimeSlot::ALL.iter().map(|&s| (s, slot_value)).collect();
        let day_of_week_compliance: BTreeMap<DayOfWeek, f64> =
            DayOfWeek::ALL.iter().map(|&d| (d, day_value)).collect();
        let context_compliance: BTreeMap<ContextBucket, f64> =
            ContextBucket::ALL.iter().map(|&c| (c, slot_value)).collect();
        CompliancePatterns {
            time_slot_compliance,
            day_of_week_compliance,
            context_compliance,
        }
    }

    fn pattern(
        adherence_rate: f64,
        slot_compliance: f64,
        day_compliance: f64,
        streak_days: u32,
        average_delay_minutes: f64,
    ) -> AdherencePattern {
        AdherencePattern {
            medication_id: "med-1".to_string(),
            medication_name: "Iron supplement".to_string(),
            total_doses: 30,
            taken_doses: 20,
            adherence_rate,
            average_delay_minutes,
            most_missed_time_slot: TimeSlot::Morning,
            most_missed_day_of_week: DayOfWeek::Sunday,
            streak_days,
            last_taken_at: None,
            patterns: uniform_patterns(slot_compliance, day_compliance),
        }
    }

    fn count_type(suggestions: &[SmartSuggestion], ty: SuggestionType) -> usize {
        suggestions
            .iter()
            .filter(|s| s.suggestion_type == ty)
            .count()
    }

    #[test]
    fn test_low_adherence_rule_is_strict() {
        // Exactly 60 does not fire
        let at_threshold = rule_based_suggestions("user-1", &pattern(60.0, 100.0, 100.0, 0, 0.0), fixed_now());
        assert_eq!(count_type(&at_threshold, SuggestionType::Encouragement), 0);

        // Just below fires the high-priority corrective encouragement
        let below = rule_based_suggestions("user-1", &pattern(59.999, 100.0, 100.0, 0, 0.0), fixed_now());
        assert_eq!(count_type(&below, SuggestionType::Encouragement), 1);
        let s = &below[0];
        assert_eq!(s.priority, SuggestionPriority::High);
        assert_eq!(s.estimated_improvement, 25);
    }

    #[test]
    fn test_time_slot_rule_threshold() {
        let below = rule_based_suggestions("user-1", &pattern(90.0, 69.9, 100.0, 0, 0.0), fixed_now());
        assert_eq!(count_type(&below, SuggestionType::TimeOptimization), 1);
        assert_eq!(below[0].estimated_improvement, 15);

        let at = rule_based_suggestions("user-1", &pattern(90.0, 70.0, 100.0, 0, 0.0), fixed_now());
        assert_eq!(count_type(&at, SuggestionType::TimeOptimization), 0);
    }

    #[test]
    fn test_day_of_week_rule_threshold() {
        let below = rule_based_suggestions("user-1", &pattern(90.0, 100.0, 69.9, 0, 0.0), fixed_now());
        assert_eq!(count_type(&below, SuggestionType::ReminderTiming), 1);
        assert_eq!(below[0].estimated_improvement, 10);

        let at = rule_based_suggestions("user-1", &pattern(90.0, 100.0, 70.0, 0, 0.0), fixed_now());
        assert_eq!(count_type(&at, SuggestionType::ReminderTiming), 0);
    }

    #[test]
    fn test_streak_rule() {
        let milestone = rule_based_suggestions("user-1", &pattern(90.0, 100.0, 100.0, 7, 0.0), fixed_now());
        assert_eq!(count_type(&milestone, SuggestionType::Encouragement), 1);
        assert_eq!(milestone[0].priority, SuggestionPriority::Low);
        assert_eq!(milestone[0].estimated_improvement, 0);

        let short = rule_based_suggestions("user-1", &pattern(90.0, 100.0, 100.0, 6, 0.0), fixed_now());
        assert_eq!(count_type(&short, SuggestionType::Encouragement), 0);
    }

    #[test]
    fn test_late_dose_rule_is_strict() {
        let at = rule_based_suggestions("user-1", &pattern(90.0, 100.0, 100.0, 0, 60.0), fixed_now());
        assert_eq!(count_type(&at, SuggestionType::ReminderTiming), 0);

        let above = rule_based_suggestions("user-1", &pattern(90.0, 100.0, 100.0, 0, 60.1), fixed_now());
        assert_eq!(count_type(&above, SuggestionType::ReminderTiming), 1);
        assert_eq!(above[0].estimated_improvement, 12);
    }

    #[test]
    fn test_all_five_rules_fire_independently() {
        let all = rule_based_suggestions("user-1", &pattern(50.0, 50.0, 50.0, 10, 90.0), fixed_now());
        assert_eq!(all.len(), 5);
        assert_eq!(count_type(&all, SuggestionType::Encouragement), 2);
        assert_eq!(count_type(&all, SuggestionType::TimeOptimization), 1);
        assert_eq!(count_type(&all, SuggestionType::ReminderTiming), 2);
    }

    #[test]
    fn test_sort_priority_then_improvement() {
        let now = fixed_now();
        let mut suggestions = vec![
            SmartSuggestion::new(
                "u",
                "m",
                SuggestionType::Encouragement,
                SuggestionPriority::Low,
                "low",
                "",
                now,
            ),
            SmartSuggestion::new(
                "u",
                "m",
                SuggestionType::ReminderTiming,
                SuggestionPriority::Medium,
                "medium-10",
                "",
                now,
            )
            .with_estimated_improvement(10),
            SmartSuggestion::new(
                "u",
                "m",
                SuggestionType::Encouragement,
                SuggestionPriority::High,
                "high",
                "",
                now,
            )
            .with_estimated_improvement(25),
            SmartSuggestion::new(
                "u",
                "m",
                SuggestionType::TimeOptimization,
                SuggestionPriority::Medium,
                "medium-15",
                "",
                now,
            )
            .with_estimated_improvement(15),
        ];

        sort_suggestions(&mut suggestions);

        let titles: Vec<&str> = suggestions.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["high", "medium-15", "medium-10", "low"]);

        // No low-priority entry precedes a high-priority one
        let first_low = titles.iter().position(|t| *t == "low").unwrap();
        let last_high = titles.iter().rposition(|t| *t == "high").unwrap();
        assert!(last_high < first_low);
    }

    #[test]
    fn test_parse_ai_suggestions_valid_payload() {
        let response = r#"Sure! Here you go:
[
  {"title": "Pair with breakfast", "description": "Take it with your first meal",
   "reasoning": "Morning compliance is strong", "action": "Move the dose to 08:00",
   "priority": "high", "estimated_improvement": 20},
  {"title": "Split the evening dose", "description": "Half at dinner, half at bedtime",
   "reasoning": "Evening doses run late", "action": "Ask your provider about splitting"}
]
Let me know if you need more."#;

        let suggestions = parse_ai_suggestions(response, "user-1", "med-1", fixed_now());
        assert_eq!(suggestions.len(), 2);
        assert!(
            suggestions
                .iter()
                .all(|s| s.suggestion_type == SuggestionType::DoseScheduling)
        );
        assert_eq!(suggestions[0].priority, SuggestionPriority::High);
        assert_eq!(suggestions[0].estimated_improvement, 20);
        // Defaults when the optional fields are absent
        assert_eq!(suggestions[1].priority, SuggestionPriority::Medium);
        assert_eq!(suggestions[1].estimated_improvement, 10);
    }

    #[test]
    fn test_parse_ai_suggestions_drops_invalid_elements() {
        let response = r#"[
  {"title": "Valid", "description": "d", "reasoning": "r", "action": "a"},
  {"title": "Missing action", "description": "d", "reasoning": "r"},
  {"title": "", "description": "d", "reasoning": "r", "action": "a"},
  {"title": 42, "description": "d", "reasoning": "r", "action": "a"},
  "not an object"
]"#;

        let suggestions = parse_ai_suggestions(response, "user-1", "med-1", fixed_now());
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].title, "Valid");
    }

    #[test]
    fn test_parse_ai_suggestions_defensive_on_garbage() {
        for response in [
            "no json at all",
            "[ this is not json ]",
            "{\"title\": \"an object, not an array\"}",
            "",
            "]",
        ] {
            assert!(
                parse_ai_suggestions(response, "user-1", "med-1", fixed_now()).is_empty(),
                "expected no suggestions for {response:?}"
            );
        }
    }

    #[test]
    fn test_build_prompt_embeds_statistics() {
        let prompt = build_prompt(&pattern(55.5, 40.0, 45.0, 3, 75.0));
        assert!(prompt.contains("Iron supplement"));
        assert!(prompt.contains("55.5%"));
        assert!(prompt.contains("morning"));
        assert!(prompt.contains("sunday"));
        assert!(prompt.contains("JSON array"));
    }

    // ── Engine tests against real storage ───────────────────────────────────

    async fn seed_low_adherence_medication(storage: &Storage, user_id: &str) -> Medication {
        let medication = Medication::new(user_id, "Iron supplement", fixed_now());
        storage.insert_medication(&medication).await.unwrap();

        // 10 morning doses, 4 taken: adherence 40%, slot compliance 40%
        for d in 1..=10i64 {
            let scheduled_at = fixed_now() - Duration::days(d);
            let taken_at = (d <= 4).then(|| scheduled_at + Duration::minutes(5));
            let log = DoseLog::new(&medication.id, scheduled_at, taken_at);
            storage.insert_dose_log(&log).await.unwrap();
        }

        medication
    }

    #[tokio::test]
    async fn test_generate_empty_user_is_empty_batch() {
        let storage = Storage::new("sqlite::memory:").await.unwrap();
        let engine = SuggestionEngine::new(None);

        let batch = engine
            .generate(&storage, "nobody", fixed_now())
            .await
            .unwrap();
        assert!(batch.suggestions.is_empty());
        assert!(batch.insufficient_data.is_empty());
        assert!(batch.failures.is_empty());
    }

    #[tokio::test]
    async fn test_generate_skips_empty_history_medications() {
        let storage = Storage::new("sqlite::memory:").await.unwrap();
        let engine = SuggestionEngine::new(None);

        let bare = Medication::new("user-1", "Folic acid", fixed_now());
        storage.insert_medication(&bare).await.unwrap();
        let seeded = seed_low_adherence_medication(&storage, "user-1").await;

        let batch = engine
            .generate(&storage, "user-1", fixed_now())
            .await
            .unwrap();

        assert_eq!(batch.insufficient_data, vec![bare.id.clone()]);
        assert!(batch.failures.is_empty());
        assert!(!batch.suggestions.is_empty());
        assert!(
            batch
                .suggestions
                .iter()
                .all(|s| s.medication_id == seeded.id)
        );
    }

    #[tokio::test]
    async fn test_generate_rule_based_without_completion_client() {
        let storage = Storage::new("sqlite::memory:").await.unwrap();
        let engine = SuggestionEngine::new(None);
        seed_low_adherence_medication(&storage, "user-1").await;

        let batch = engine
            .generate(&storage, "user-1", fixed_now())
            .await
            .unwrap();

        // Low adherence fires the rule pass, and with no client there are
        // no AI dose_scheduling entries
        assert!(!batch.suggestions.is_empty());
        assert_eq!(
            count_type(&batch.suggestions, SuggestionType::DoseScheduling),
            0
        );
    }

    #[tokio::test]
    async fn test_generate_survives_unreachable_completion_service() {
        let storage = Storage::new("sqlite::memory:").await.unwrap();
        // Nothing listens on port 9; the AI pass fails and is contained
        let client = CompletionClient::new("http://127.0.0.1:9", "med-assist", DEFAULT_TIMEOUT_SECS);
        let engine = SuggestionEngine::new(Some(client));
        seed_low_adherence_medication(&storage, "user-1").await;

        let batch = engine
            .generate(&storage, "user-1", fixed_now())
            .await
            .unwrap();

        assert!(!batch.suggestions.is_empty());
        assert_eq!(
            count_type(&batch.suggestions, SuggestionType::DoseScheduling),
            0
        );
        // A degraded AI pass is not a per-medication failure
        assert!(batch.failures.is_empty());
    }

    #[tokio::test]
    async fn test_generate_output_is_priority_ordered() {
        let storage = Storage::new("sqlite::memory:").await.unwrap();
        let engine = SuggestionEngine::new(None);
        seed_low_adherence_medication(&storage, "user-1").await;

        let batch = engine
            .generate(&storage, "user-1", fixed_now())
            .await
            .unwrap();

        let priorities: Vec<SuggestionPriority> =
            batch.suggestions.iter().map(|s| s.priority).collect();
        assert!(priorities.windows(2).all(|w| w[0] >= w[1]));
    }
}
