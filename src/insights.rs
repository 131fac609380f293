//! Deterministic adherence insights.
//!
//! No AI call anywhere in this path: insights must stay fast and available
//! even when the completion service is degraded. One overall insight from
//! the mean adherence across all analyzable medications, plus one
//! high-priority insight per medication below 70%.

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::analytics::analyze_medication_patterns;
use crate::error::AdherenceError;
use crate::model::{
    AdherenceInsight, AdherencePattern, DEFAULT_WINDOW_DAYS, SuggestionPriority,
};
use crate::storage::Storage;

/// Mean adherence at or above this is "excellent".
const EXCELLENT_THRESHOLD: f64 = 90.0;

/// Mean adherence at or above this (but below excellent) is "good".
const GOOD_THRESHOLD: f64 = 80.0;

/// Below this per-medication rate an individual insight is emitted.
const ATTENTION_THRESHOLD: f64 = 70.0;

/// Generate insights for every medication of a user.
///
/// Medications without history are skipped; other per-medication failures
/// are logged and skipped so one broken medication cannot blank the whole
/// summary. Only a failure to list the user's medications propagates.
pub async fn generate_adherence_insights(
    storage: &Storage,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<Vec<AdherenceInsight>, AdherenceError> {
    let medication_ids = storage.fetch_user_medication_ids(user_id).await?;

    let mut patterns = Vec::new();
    for medication_id in medication_ids {
        match analyze_medication_patterns(storage, &medication_id, DEFAULT_WINDOW_DAYS, now).await {
            Ok(pattern) => patterns.push(pattern),
            Err(e) if e.is_insufficient_data() => continue,
            Err(e) => {
                warn!(
                    medication_id = %medication_id,
                    error = %e,
                    "Skipping medication in insight summary"
                );
            }
        }
    }

    Ok(insights_from_patterns(&patterns))
}

/// Reduce a set of patterns to display insights. Pure and deterministic.
pub fn insights_from_patterns(patterns: &[AdherencePattern]) -> Vec<AdherenceInsight> {
    let mut insights = Vec::new();

    if patterns.is_empty() {
        return insights;
    }

    let mean_rate =
        patterns.iter().map(|p| p.adherence_rate).sum::<f64>() / patterns.len() as f64;

    insights.push(overall_insight(mean_rate));

    for pattern in patterns {
        if pattern.adherence_rate < ATTENTION_THRESHOLD {
            insights.push(AdherenceInsight {
                medication_id: Some(pattern.medication_id.clone()),
                medication_name: Some(pattern.medication_name.clone()),
                title: format!("Needs attention: {}", pattern.medication_name),
                message: format!(
                    "{} was taken {:.0}% of the time over the last {} days.",
                    pattern.medication_name, pattern.adherence_rate, DEFAULT_WINDOW_DAYS
                ),
                recommendation: format!(
                    "Review the suggested schedule changes for {} and enable reminders for its doses.",
                    pattern.medication_name
                ),
                priority: SuggestionPriority::High,
            });
        }
    }

    insights
}

fn overall_insight(mean_rate: f64) -> AdherenceInsight {
    let (title, message, recommendation, priority) = if mean_rate >= EXCELLENT_THRESHOLD {
        (
            "Excellent adherence",
            format!(
                "You're taking {:.0}% of your scheduled doses. That's outstanding.",
                mean_rate
            ),
            "Keep your current routine going; it clearly works.".to_string(),
            SuggestionPriority::Low,
        )
    } else if mean_rate >= GOOD_THRESHOLD {
        (
            "Good adherence",
            format!(
                "You're taking {:.0}% of your scheduled doses. Solid, with room to grow.",
                mean_rate
            ),
            "A small nudge, like pairing doses with an existing daily habit, can close the gap."
                .to_string(),
            SuggestionPriority::Low,
        )
    } else {
        (
            "Adherence needs improvement",
            format!(
                "You're taking {:.0}% of your scheduled doses overall.",
                mean_rate
            ),
            "Enable reminders for every scheduled dose and review the times that fit your day."
                .to_string(),
            SuggestionPriority::Medium,
        )
    };

    AdherenceInsight {
        medication_id: None,
        medication_name: None,
        title: title.to_string(),
        message,
        recommendation,
        priority,
    }
}
