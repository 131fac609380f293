//! Pattern analysis over dose logs.
//!
//! [`analyze_medication_patterns`] fetches a medication's dose logs over a
//! trailing window and reduces them to an [`AdherencePattern`]: adherence
//! rate, average delay, per-bucket compliance, most-missed buckets, and the
//! current streak. The reduction itself, [`compute_pattern`], is a pure
//! function of the ascending log slice, so repeated analysis over an
//! unchanged log set is bit-identical.
//!
//! Numeric contract: compliance of an empty bucket is 0, never NaN. The
//! analyzer refuses to build a pattern from zero logs (that is
//! "insufficient data", not 0% adherence).

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::error::AdherenceError;
use crate::model::{
    AdherencePattern, CompliancePatterns, ContextBucket, DayOfWeek, DoseLog, TimeSlot,
};
use crate::storage::Storage;

/// Compute the adherence pattern for one medication.
///
/// # Arguments
///
/// * `storage` - Database connection
/// * `medication_id` - The medication to analyze
/// * `window_days` - Trailing window size in days
/// * `now` - Reference timestamp (typically current time)
///
/// # Errors
///
/// * [`AdherenceError::NotFound`] when the medication does not exist
/// * [`AdherenceError::EmptyHistory`] when zero dose logs fall inside the
///   window; callers must treat this as "no data", never as 0% adherence
pub async fn analyze_medication_patterns(
    storage: &Storage,
    medication_id: &str,
    window_days: u32,
    now: DateTime<Utc>,
) -> Result<AdherencePattern, AdherenceError> {
    let medication = storage
        .fetch_medication(medication_id)
        .await?
        .ok_or_else(|| AdherenceError::NotFound {
            medication_id: medication_id.to_string(),
        })?;

    let since = now - Duration::days(i64::from(window_days));
    let logs = storage.fetch_dose_logs_since(medication_id, since).await?;

    if logs.is_empty() {
        return Err(AdherenceError::EmptyHistory {
            medication_id: medication_id.to_string(),
            window_days,
        });
    }

    Ok(compute_pattern(&medication.id, &medication.name, &logs, now))
}

/// Reduce an ascending dose-log slice to an adherence pattern.
///
/// Pure: no clock, no I/O. `now` only anchors the streak walk (which day
/// counts as "today").
pub fn compute_pattern(
    medication_id: &str,
    medication_name: &str,
    logs: &[DoseLog],
    now: DateTime<Utc>,
) -> AdherencePattern {
    let total_doses = logs.len() as u32;
    let taken_doses = logs.iter().filter(|l| l.taken()).count() as u32;

    let time_slot_compliance = bucket_compliance(logs, &TimeSlot::ALL, DoseLog::time_slot);
    let day_of_week_compliance = bucket_compliance(logs, &DayOfWeek::ALL, DoseLog::day_of_week);

    let most_missed_time_slot = most_missed(&time_slot_compliance, &TimeSlot::ALL);
    let most_missed_day_of_week = most_missed(&day_of_week_compliance, &DayOfWeek::ALL);

    AdherencePattern {
        medication_id: medication_id.to_string(),
        medication_name: medication_name.to_string(),
        total_doses,
        taken_doses,
        adherence_rate: compliance(taken_doses, total_doses),
        average_delay_minutes: average_delay_minutes(logs),
        most_missed_time_slot,
        most_missed_day_of_week,
        streak_days: compute_streak(logs, now.date_naive()),
        last_taken_at: logs.iter().filter_map(|l| l.taken_at).max(),
        patterns: CompliancePatterns {
            time_slot_compliance,
            day_of_week_compliance,
            context_compliance: context_compliance(logs),
        },
    }
}

/// `taken / total * 100`, with the empty bucket pinned to 0 instead of NaN.
pub fn compliance(taken: u32, total: u32) -> f64 {
    if total == 0 {
        0.0
    } else {
        f64::from(taken) / f64::from(total) * 100.0
    }
}

/// Per-bucket compliance over a fixed bucket set.
///
/// Every bucket appears in the result, including ones no log falls into
/// (compliance 0), so consumers always see the full key set.
fn bucket_compliance<B: Ord + Copy>(
    logs: &[DoseLog],
    buckets: &[B],
    classify: impl Fn(&DoseLog) -> B,
) -> BTreeMap<B, f64> {
    let mut scheduled: BTreeMap<B, u32> = buckets.iter().map(|&b| (b, 0)).collect();
    let mut taken: BTreeMap<B, u32> = buckets.iter().map(|&b| (b, 0)).collect();

    for log in logs {
        let bucket = classify(log);
        if let Some(count) = scheduled.get_mut(&bucket) {
            *count += 1;
        }
        if log.taken() {
            if let Some(count) = taken.get_mut(&bucket) {
                *count += 1;
            }
        }
    }

    buckets
        .iter()
        .map(|&b| (b, compliance(taken[&b], scheduled[&b])))
        .collect()
}

/// Context compliance: weekday vs weekend from the day of week, plus the
/// home/away stub. Without a location signal every log lands in `home`,
/// leaving `away` empty (and therefore 0).
fn context_compliance(logs: &[DoseLog]) -> BTreeMap<ContextBucket, f64> {
    let mut scheduled: BTreeMap<ContextBucket, u32> =
        ContextBucket::ALL.iter().map(|&b| (b, 0)).collect();
    let mut taken: BTreeMap<ContextBucket, u32> =
        ContextBucket::ALL.iter().map(|&b| (b, 0)).collect();

    for log in logs {
        let day_bucket = if log.day_of_week().is_weekend() {
            ContextBucket::Weekend
        } else {
            ContextBucket::Weekday
        };

        for bucket in [day_bucket, ContextBucket::Home] {
            scheduled.entry(bucket).and_modify(|c| *c += 1);
            if log.taken() {
                taken.entry(bucket).and_modify(|c| *c += 1);
            }
        }
    }

    ContextBucket::ALL
        .iter()
        .map(|&b| (b, compliance(taken[&b], scheduled[&b])))
        .collect()
}

/// The bucket with the lowest compliance.
///
/// Tie-break is the canonical bucket order (`buckets` slice order): the
/// first bucket holding the minimum wins. Deterministic by construction,
/// replacing any reliance on incidental map iteration order.
fn most_missed<B: Ord + Copy>(map: &BTreeMap<B, f64>, buckets: &[B]) -> B {
    let mut worst = buckets[0];
    for &bucket in &buckets[1..] {
        if map[&bucket] < map[&worst] {
            worst = bucket;
        }
    }
    worst
}

/// Mean |taken_at - scheduled_at| in minutes over taken doses; 0 when no
/// dose carries both timestamps.
fn average_delay_minutes(logs: &[DoseLog]) -> f64 {
    let mut total_minutes = 0.0;
    let mut count = 0u32;

    for log in logs {
        if let Some(taken_at) = log.taken_at {
            let delta = taken_at - log.scheduled_at;
            total_minutes += delta.num_seconds().abs() as f64 / 60.0;
            count += 1;
        }
    }

    if count == 0 {
        0.0
    } else {
        total_minutes / f64::from(count)
    }
}

/// Consecutive calendar days with at least one taken dose, walking the
/// distinct logged dates backward from the most recent.
///
/// A date with zero taken doses ends the walk, unless that date is `today`:
/// the current day gets grace while its doses are still unlogged.
fn compute_streak(logs: &[DoseLog], today: NaiveDate) -> u32 {
    let mut any_taken_by_date: BTreeMap<NaiveDate, bool> = BTreeMap::new();
    for log in logs {
        let entry = any_taken_by_date
            .entry(log.scheduled_at.date_naive())
            .or_insert(false);
        *entry = *entry || log.taken();
    }

    let mut streak = 0;
    for (&date, &any_taken) in any_taken_by_date.iter().rev() {
        if any_taken {
            streak += 1;
        } else if date == today {
            continue;
        } else {
            break;
        }
    }

    streak
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Medication;
    use chrono::TimeZone;

    /// Tuesday 2026-03-10, 09:00 UTC.
    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap()
    }

    /// A dose scheduled `days_ago` days before `fixed_now` at `hour` UTC,
    /// taken `delay_minutes` after schedule when `delay_minutes` is Some.
    fn dose(days_ago: i64, hour: u32, delay_minutes: Option<i64>) -> DoseLog {
        let scheduled_at = (fixed_now() - Duration::days(days_ago))
            .date_naive()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
            .and_utc();
        DoseLog::new(
            "med-1",
            scheduled_at,
            delay_minutes.map(|m| scheduled_at + Duration::minutes(m)),
        )
    }

    #[test]
    fn test_morning_scenario_rates_and_tie_break() {
        // 10 morning doses across 10 days, 8 taken
        let mut logs: Vec<DoseLog> = (1..=8).map(|d| dose(d, 8, Some(0))).collect();
        logs.push(dose(9, 8, None));
        logs.push(dose(10, 8, None));
        logs.sort_by_key(|l| l.scheduled_at);

        let pattern = compute_pattern("med-1", "Iron supplement", &logs, fixed_now());

        assert_eq!(pattern.total_doses, 10);
        assert_eq!(pattern.taken_doses, 8);
        assert!((pattern.adherence_rate - 80.0).abs() < 1e-9);

        let slots = &pattern.patterns.time_slot_compliance;
        assert!((slots[&TimeSlot::Morning] - 80.0).abs() < 1e-9);
        // Empty buckets are present and exactly 0, never NaN or missing
        assert_eq!(slots[&TimeSlot::Afternoon], 0.0);
        assert_eq!(slots[&TimeSlot::Evening], 0.0);
        assert!(!slots[&TimeSlot::Afternoon].is_nan());

        // Afternoon and evening tie at 0; canonical order picks afternoon
        assert_eq!(pattern.most_missed_time_slot, TimeSlot::Afternoon);
    }

    #[test]
    fn test_adherence_rate_bounds() {
        let all_taken: Vec<DoseLog> = (1..=5).map(|d| dose(d, 8, Some(5))).collect();
        let pattern = compute_pattern("med-1", "x", &all_taken, fixed_now());
        assert!((pattern.adherence_rate - 100.0).abs() < 1e-9);

        let none_taken: Vec<DoseLog> = (1..=5).map(|d| dose(d, 8, None)).collect();
        let pattern = compute_pattern("med-1", "x", &none_taken, fixed_now());
        assert_eq!(pattern.adherence_rate, 0.0);
        assert!(!pattern.adherence_rate.is_nan());
    }

    #[test]
    fn test_compliance_guards_divide_by_zero() {
        assert_eq!(compliance(0, 0), 0.0);
        assert!((compliance(8, 10) - 80.0).abs() < 1e-9);
        assert!((compliance(1, 3) - 100.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_idempotence_bit_identical() {
        let logs: Vec<DoseLog> = (1..=12)
            .map(|d| dose(d, (d as u32 * 5) % 24, if d % 3 == 0 { None } else { Some(d * 7) }))
            .collect();

        let first = compute_pattern("med-1", "Iron supplement", &logs, fixed_now());
        let second = compute_pattern("med-1", "Iron supplement", &logs, fixed_now());
        assert_eq!(first, second);
    }

    #[test]
    fn test_average_delay() {
        let logs = vec![dose(1, 8, Some(10)), dose(2, 8, Some(30)), dose(3, 8, None)];
        let pattern = compute_pattern("med-1", "x", &logs, fixed_now());
        assert!((pattern.average_delay_minutes - 20.0).abs() < 1e-9);

        // Delay is an absolute difference; taking early still counts
        let logs = vec![dose(1, 8, Some(-20))];
        let pattern = compute_pattern("med-1", "x", &logs, fixed_now());
        assert!((pattern.average_delay_minutes - 20.0).abs() < 1e-9);

        let none_taken = vec![dose(1, 8, None)];
        let pattern = compute_pattern("med-1", "x", &none_taken, fixed_now());
        assert_eq!(pattern.average_delay_minutes, 0.0);
    }

    #[test]
    fn test_streak_seven_days_with_unlogged_today() {
        // Days 1..=7 before today each have one taken dose; today has no log
        let logs: Vec<DoseLog> = (1..=7).map(|d| dose(d, 8, Some(0))).collect();
        let pattern = compute_pattern("med-1", "x", &logs, fixed_now());
        assert_eq!(pattern.streak_days, 7);
    }

    #[test]
    fn test_streak_today_scheduled_but_untaken_gets_grace() {
        let mut logs: Vec<DoseLog> = (1..=7).map(|d| dose(d, 8, Some(0))).collect();
        logs.push(dose(0, 8, None)); // today, not yet taken
        logs.sort_by_key(|l| l.scheduled_at);

        let pattern = compute_pattern("med-1", "x", &logs, fixed_now());
        assert_eq!(pattern.streak_days, 7);
    }

    #[test]
    fn test_streak_grows_by_one_per_prepended_day() {
        let logs: Vec<DoseLog> = (1..=7).map(|d| dose(d, 8, Some(0))).collect();
        let base = compute_pattern("med-1", "x", &logs, fixed_now()).streak_days;

        let mut extended = logs.clone();
        extended.push(dose(0, 8, Some(0))); // take today's dose
        extended.sort_by_key(|l| l.scheduled_at);
        let grown = compute_pattern("med-1", "x", &extended, fixed_now()).streak_days;

        assert_eq!(grown, base + 1);
    }

    #[test]
    fn test_streak_truncated_by_missed_day_in_middle() {
        // Taken on days 1, 2, 4, 5; day 3 scheduled but never taken
        let logs = vec![
            dose(1, 8, Some(0)),
            dose(2, 8, Some(0)),
            dose(3, 8, None),
            dose(4, 8, Some(0)),
            dose(5, 8, Some(0)),
        ];
        let pattern = compute_pattern("med-1", "x", &logs, fixed_now());
        assert_eq!(pattern.streak_days, 2);
    }

    #[test]
    fn test_most_missed_all_tied_picks_first_canonical() {
        // One taken dose in each slot: all buckets at 100, tie
        let logs = vec![dose(1, 8, Some(0)), dose(1, 13, Some(0)), dose(1, 20, Some(0))];
        let pattern = compute_pattern("med-1", "x", &logs, fixed_now());
        assert_eq!(pattern.most_missed_time_slot, TimeSlot::Morning);
        // Day map: six empty days tie at 0; sunday is first in canonical order
        assert_eq!(pattern.most_missed_day_of_week, DayOfWeek::Sunday);
    }

    #[test]
    fn test_most_missed_day_of_week() {
        // fixed_now is Tuesday 2026-03-10. One taken dose Monday (day 1 ago),
        // one missed dose Sunday (day 2 ago): every empty day ties at 0 with
        // Sunday, and Sunday comes first in canonical order.
        let logs = vec![dose(1, 8, Some(0)), dose(2, 8, None)];
        let pattern = compute_pattern("med-1", "x", &logs, fixed_now());
        assert_eq!(pattern.most_missed_day_of_week, DayOfWeek::Sunday);

        let days = &pattern.patterns.day_of_week_compliance;
        assert!((days[&DayOfWeek::Monday] - 100.0).abs() < 1e-9);
        assert_eq!(days[&DayOfWeek::Sunday], 0.0);
    }

    #[test]
    fn test_context_compliance_weekday_weekend_and_home_stub() {
        // fixed_now is Tuesday 2026-03-10: day 1 ago = Monday (weekday),
        // day 2 ago = Sunday (weekend)
        let logs = vec![
            dose(1, 8, Some(0)), // Monday, taken
            dose(2, 8, None),    // Sunday, missed
        ];
        let pattern = compute_pattern("med-1", "x", &logs, fixed_now());
        let context = &pattern.patterns.context_compliance;

        assert!((context[&ContextBucket::Weekday] - 100.0).abs() < 1e-9);
        assert_eq!(context[&ContextBucket::Weekend], 0.0);
        // home receives every log; away has none and stays at 0
        assert!((context[&ContextBucket::Home] - 50.0).abs() < 1e-9);
        assert_eq!(context[&ContextBucket::Away], 0.0);
    }

    #[test]
    fn test_last_taken_at_is_most_recent() {
        let logs = vec![dose(3, 8, Some(0)), dose(1, 8, Some(15)), dose(2, 8, None)];
        let pattern = compute_pattern("med-1", "x", &logs, fixed_now());
        let expected = logs
            .iter()
            .filter_map(|l| l.taken_at)
            .max()
            .unwrap();
        assert_eq!(pattern.last_taken_at, Some(expected));
    }

    #[tokio::test]
    async fn test_analyze_unknown_medication_is_not_found() {
        let storage = Storage::new("sqlite::memory:").await.unwrap();

        let err = analyze_medication_patterns(&storage, "no-such-med", 30, fixed_now())
            .await
            .unwrap_err();
        assert!(matches!(err, AdherenceError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_analyze_empty_window_is_empty_history() {
        let storage = Storage::new("sqlite::memory:").await.unwrap();
        let medication = Medication::new("user-1", "Iron supplement", fixed_now());
        storage.insert_medication(&medication).await.unwrap();

        // No logs at all
        let err = analyze_medication_patterns(&storage, &medication.id, 30, fixed_now())
            .await
            .unwrap_err();
        assert!(matches!(err, AdherenceError::EmptyHistory { .. }));
        assert!(err.is_insufficient_data());

        // A log outside the window changes nothing
        let stale = DoseLog::new(&medication.id, fixed_now() - Duration::days(45), None);
        storage.insert_dose_log(&stale).await.unwrap();

        let err = analyze_medication_patterns(&storage, &medication.id, 30, fixed_now())
            .await
            .unwrap_err();
        assert!(matches!(err, AdherenceError::EmptyHistory { .. }));
    }

    #[tokio::test]
    async fn test_analyze_end_to_end() {
        let storage = Storage::new("sqlite::memory:").await.unwrap();
        let medication = Medication::new("user-1", "Prenatal vitamin", fixed_now());
        storage.insert_medication(&medication).await.unwrap();

        for log in (1..=4).map(|d| dose(d, 8, if d == 4 { None } else { Some(10) })) {
            let log = DoseLog {
                medication_id: medication.id.clone(),
                ..log
            };
            storage.insert_dose_log(&log).await.unwrap();
        }

        let pattern = analyze_medication_patterns(&storage, &medication.id, 30, fixed_now())
            .await
            .unwrap();

        assert_eq!(pattern.medication_name, "Prenatal vitamin");
        assert_eq!(pattern.total_doses, 4);
        assert_eq!(pattern.taken_doses, 3);
        assert!((pattern.adherence_rate - 75.0).abs() < 1e-9);
        assert!((pattern.average_delay_minutes - 10.0).abs() < 1e-9);
    }
}
