//! Data models for Adhera.
//!
//! Everything the analytics core consumes or produces lives here: dose logs
//! and their bucketing enums, the derived [`AdherencePattern`] aggregate,
//! [`SmartSuggestion`] records with their lifecycle enums, and the request /
//! query types used by the HTTP API.
//!
//! The bucket enums ([`TimeSlot`], [`DayOfWeek`], [`ContextBucket`]) derive
//! `Ord` in declaration order. That order is the **canonical bucket order**:
//! compliance maps iterate in it, and "most missed" selection uses it as the
//! deterministic tie-break when several buckets share the minimum compliance.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A medication registered by a user.
///
/// Owns dose logs and suggestions; deleting a medication cascades to both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Medication {
    /// Opaque identifier (UUID v4).
    pub id: String,

    /// The user this medication belongs to.
    pub user_id: String,

    /// Display name (e.g., "Prenatal vitamin").
    pub name: String,

    /// When the medication was registered (UTC).
    pub created_at: DateTime<Utc>,
}

impl Medication {
    /// Create a new medication with a fresh identifier.
    pub fn new(user_id: &str, name: &str, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            name: name.to_string(),
            created_at,
        }
    }
}

/// Lifecycle state of a single dose log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DoseStatus {
    /// Created for a calendar day, not yet taken or overdue.
    Scheduled,
    /// The user logged the dose (sets `taken_at`).
    Taken,
    /// The background sweep marked the dose as missed after it went
    /// sufficiently overdue.
    Missed,
}

impl DoseStatus {
    /// Stable string form used in the database and JSON.
    pub fn as_str(&self) -> &'static str {
        match self {
            DoseStatus::Scheduled => "scheduled",
            DoseStatus::Taken => "taken",
            DoseStatus::Missed => "missed",
        }
    }

    /// Parse the stable string form back.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(DoseStatus::Scheduled),
            "taken" => Some(DoseStatus::Taken),
            "missed" => Some(DoseStatus::Missed),
            _ => None,
        }
    }
}

/// One scheduled dose of one medication.
///
/// `scheduled_at` is always present and is the partition key for every
/// bucketing dimension. `taken_at` is present exactly when `status` is
/// [`DoseStatus::Taken`]; the constructor derives the status so the
/// invariant holds by construction, and [`crate::storage`] only moves a
/// `scheduled` log to `taken` or `missed`, never backward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoseLog {
    /// Opaque identifier (UUID v4).
    pub id: String,

    /// Owning medication.
    pub medication_id: String,

    /// When the dose was due (UTC).
    pub scheduled_at: DateTime<Utc>,

    /// When the dose was actually taken, if it was.
    pub taken_at: Option<DateTime<Utc>>,

    /// Lifecycle state.
    pub status: DoseStatus,
}

impl DoseLog {
    /// Create a dose log. Status is derived from `taken_at`: present means
    /// `taken`, absent means `scheduled`.
    pub fn new(
        medication_id: &str,
        scheduled_at: DateTime<Utc>,
        taken_at: Option<DateTime<Utc>>,
    ) -> Self {
        let status = if taken_at.is_some() {
            DoseStatus::Taken
        } else {
            DoseStatus::Scheduled
        };

        Self {
            id: Uuid::new_v4().to_string(),
            medication_id: medication_id.to_string(),
            scheduled_at,
            taken_at,
            status,
        }
    }

    /// Was this dose taken?
    pub fn taken(&self) -> bool {
        self.status == DoseStatus::Taken
    }

    /// The time slot this dose falls into, by hour of `scheduled_at`.
    pub fn time_slot(&self) -> TimeSlot {
        TimeSlot::of_hour(self.scheduled_at.hour())
    }

    /// The day of week this dose falls on.
    pub fn day_of_week(&self) -> DayOfWeek {
        DayOfWeek::from(self.scheduled_at.weekday())
    }
}

/// Coarse time-of-day bucket for a scheduled dose.
///
/// Declaration order is canonical: morning, afternoon, evening.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeSlot {
    Morning,
    Afternoon,
    Evening,
}

impl TimeSlot {
    /// All slots in canonical order.
    pub const ALL: [TimeSlot; 3] = [TimeSlot::Morning, TimeSlot::Afternoon, TimeSlot::Evening];

    /// Classify an hour of day: [6, 12) morning, [12, 18) afternoon,
    /// everything else evening.
    pub fn of_hour(hour: u32) -> Self {
        match hour {
            6..=11 => TimeSlot::Morning,
            12..=17 => TimeSlot::Afternoon,
            _ => TimeSlot::Evening,
        }
    }

    /// Human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            TimeSlot::Morning => "morning",
            TimeSlot::Afternoon => "afternoon",
            TimeSlot::Evening => "evening",
        }
    }
}

/// Day of week, named the way the compliance maps expose them.
///
/// Declaration order is canonical: sunday through saturday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayOfWeek {
    Sunday,
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
}

impl DayOfWeek {
    /// All days in canonical order.
    pub const ALL: [DayOfWeek; 7] = [
        DayOfWeek::Sunday,
        DayOfWeek::Monday,
        DayOfWeek::Tuesday,
        DayOfWeek::Wednesday,
        DayOfWeek::Thursday,
        DayOfWeek::Friday,
        DayOfWeek::Saturday,
    ];

    /// Saturday or Sunday?
    pub fn is_weekend(&self) -> bool {
        matches!(self, DayOfWeek::Saturday | DayOfWeek::Sunday)
    }

    /// Human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            DayOfWeek::Sunday => "sunday",
            DayOfWeek::Monday => "monday",
            DayOfWeek::Tuesday => "tuesday",
            DayOfWeek::Wednesday => "wednesday",
            DayOfWeek::Thursday => "thursday",
            DayOfWeek::Friday => "friday",
            DayOfWeek::Saturday => "saturday",
        }
    }
}

impl From<Weekday> for DayOfWeek {
    fn from(weekday: Weekday) -> Self {
        match weekday {
            Weekday::Sun => DayOfWeek::Sunday,
            Weekday::Mon => DayOfWeek::Monday,
            Weekday::Tue => DayOfWeek::Tuesday,
            Weekday::Wed => DayOfWeek::Wednesday,
            Weekday::Thu => DayOfWeek::Thursday,
            Weekday::Fri => DayOfWeek::Friday,
            Weekday::Sat => DayOfWeek::Saturday,
        }
    }
}

/// Context bucket for compliance breakdowns.
///
/// `weekday`/`weekend` derive from the day of week. `home`/`away` is an
/// explicit stub: with no location signal available every log is attributed
/// to `home`, leaving `away` permanently at 0. Kept in the contract rather
/// than silently removed; a real location source would slot in at
/// classification time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextBucket {
    Weekday,
    Weekend,
    Home,
    Away,
}

impl ContextBucket {
    /// All context buckets in canonical order.
    pub const ALL: [ContextBucket; 4] = [
        ContextBucket::Weekday,
        ContextBucket::Weekend,
        ContextBucket::Home,
        ContextBucket::Away,
    ];
}

/// Per-bucket compliance percentages for one medication.
///
/// Every bucket is always present, including empty ones (compliance 0), so
/// consumers can rely on the full key set. `BTreeMap` keyed by the `Ord`
/// bucket enums keeps iteration and serialization in canonical order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompliancePatterns {
    /// Compliance percentage per time slot.
    pub time_slot_compliance: BTreeMap<TimeSlot, f64>,

    /// Compliance percentage per day of week.
    pub day_of_week_compliance: BTreeMap<DayOfWeek, f64>,

    /// Compliance percentage per context bucket.
    pub context_compliance: BTreeMap<ContextBucket, f64>,
}

/// Derived, read-only adherence aggregate for one medication over a
/// trailing window.
///
/// Computed fresh on each request from the ascending dose-log slice; a pure
/// function of its inputs, so repeated computation over an unchanged log set
/// is bit-identical.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdherencePattern {
    /// The medication analyzed.
    pub medication_id: String,

    /// Display name, denormalized for rendering.
    pub medication_name: String,

    /// Scheduled doses in the window.
    pub total_doses: u32,

    /// Taken doses in the window.
    pub taken_doses: u32,

    /// `taken_doses / total_doses * 100`. The analyzer refuses to build a
    /// pattern from zero logs, so this is never NaN.
    pub adherence_rate: f64,

    /// Mean |taken_at - scheduled_at| in minutes over taken doses; 0 when
    /// no dose has both timestamps.
    pub average_delay_minutes: f64,

    /// Slot with the lowest compliance (canonical-order tie-break).
    pub most_missed_time_slot: TimeSlot,

    /// Day with the lowest compliance (canonical-order tie-break).
    pub most_missed_day_of_week: DayOfWeek,

    /// Consecutive calendar days, walking backward from the most recent
    /// logged date, with at least one taken dose. Today is exempt from
    /// breaking the streak while it has no taken dose yet.
    pub streak_days: u32,

    /// Most recent `taken_at` in the window.
    pub last_taken_at: Option<DateTime<Utc>>,

    /// Per-bucket compliance breakdowns.
    pub patterns: CompliancePatterns,
}

/// What kind of change a suggestion proposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionType {
    /// Move a dose to a slot the user complies with.
    TimeOptimization,
    /// Adjust when the reminder fires.
    ReminderTiming,
    /// Restructure the dose schedule (AI-augmented pass).
    DoseScheduling,
    /// Motivation, positive or corrective.
    Encouragement,
}

impl SuggestionType {
    /// Stable string form used in the database and JSON.
    pub fn as_str(&self) -> &'static str {
        match self {
            SuggestionType::TimeOptimization => "time_optimization",
            SuggestionType::ReminderTiming => "reminder_timing",
            SuggestionType::DoseScheduling => "dose_scheduling",
            SuggestionType::Encouragement => "encouragement",
        }
    }

    /// Parse the stable string form back.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "time_optimization" => Some(SuggestionType::TimeOptimization),
            "reminder_timing" => Some(SuggestionType::ReminderTiming),
            "dose_scheduling" => Some(SuggestionType::DoseScheduling),
            "encouragement" => Some(SuggestionType::Encouragement),
            _ => None,
        }
    }
}

/// Suggestion priority. `Ord` follows declaration order, so
/// `High > Medium > Low` for sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionPriority {
    Low,
    Medium,
    High,
}

impl SuggestionPriority {
    /// Stable string form used in the database and JSON.
    pub fn as_str(&self) -> &'static str {
        match self {
            SuggestionPriority::Low => "low",
            SuggestionPriority::Medium => "medium",
            SuggestionPriority::High => "high",
        }
    }

    /// Parse the stable string form back.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(SuggestionPriority::Low),
            "medium" => Some(SuggestionPriority::Medium),
            "high" => Some(SuggestionPriority::High),
            _ => None,
        }
    }
}

/// Lifecycle state of a persisted suggestion.
///
/// `pending` moves to `accepted` or `dismissed` exactly once; both are
/// terminal and the storage layer refuses any other transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionStatus {
    Pending,
    Accepted,
    Dismissed,
}

impl SuggestionStatus {
    /// Stable string form used in the database and JSON.
    pub fn as_str(&self) -> &'static str {
        match self {
            SuggestionStatus::Pending => "pending",
            SuggestionStatus::Accepted => "accepted",
            SuggestionStatus::Dismissed => "dismissed",
        }
    }

    /// Parse the stable string form back.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SuggestionStatus::Pending),
            "accepted" => Some(SuggestionStatus::Accepted),
            "dismissed" => Some(SuggestionStatus::Dismissed),
            _ => None,
        }
    }
}

/// A recommendation derived from one medication's adherence pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmartSuggestion {
    /// Opaque identifier (UUID v4); fresh on every generation, so repeated
    /// generation over unchanged logs legitimately produces duplicates.
    pub id: String,

    /// The user the suggestion belongs to.
    pub user_id: String,

    /// The medication the pattern came from.
    pub medication_id: String,

    /// What kind of change is proposed.
    pub suggestion_type: SuggestionType,

    /// Short headline.
    pub title: String,

    /// What the user should do, spelled out.
    pub description: String,

    /// Why the pattern supports this suggestion.
    pub reasoning: String,

    /// Concrete next step, free text.
    pub action: String,

    /// Display and sort priority.
    pub priority: SuggestionPriority,

    /// Heuristic adherence improvement, integer percent.
    pub estimated_improvement: u32,

    /// When the suggestion was generated (UTC).
    pub created_at: DateTime<Utc>,

    /// Lifecycle state.
    pub status: SuggestionStatus,
}

impl SmartSuggestion {
    /// Create a pending suggestion with a fresh identifier.
    pub fn new(
        user_id: &str,
        medication_id: &str,
        suggestion_type: SuggestionType,
        priority: SuggestionPriority,
        title: &str,
        description: &str,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            medication_id: medication_id.to_string(),
            suggestion_type,
            title: title.to_string(),
            description: description.to_string(),
            reasoning: String::new(),
            action: String::new(),
            priority,
            estimated_improvement: 0,
            created_at,
            status: SuggestionStatus::Pending,
        }
    }

    /// Set the reasoning text.
    pub fn with_reasoning(mut self, reasoning: &str) -> Self {
        self.reasoning = reasoning.to_string();
        self
    }

    /// Set the concrete action text.
    pub fn with_action(mut self, action: &str) -> Self {
        self.action = action.to_string();
        self
    }

    /// Set the heuristic improvement estimate.
    pub fn with_estimated_improvement(mut self, percent: u32) -> Self {
        self.estimated_improvement = percent;
        self
    }
}

/// A summarized natural-language observation; regenerated per request,
/// never persisted. `medication_id` is absent for the overall insight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdherenceInsight {
    /// The medication this insight is about, if not the overall one.
    pub medication_id: Option<String>,

    /// Display name matching `medication_id`.
    pub medication_name: Option<String>,

    /// Short headline.
    pub title: String,

    /// The observation itself.
    pub message: String,

    /// Fixed recommendation string for the observation.
    pub recommendation: String,

    /// Display priority.
    pub priority: SuggestionPriority,
}

// ============================================================================
// Request and query types
// ============================================================================

/// Request body for POST /medications.
#[derive(Debug, Clone, Deserialize)]
pub struct MedicationRequest {
    /// The owning user.
    pub user_id: String,

    /// Display name.
    pub name: String,
}

/// Request body for POST /dose-logs.
#[derive(Debug, Clone, Deserialize)]
pub struct DoseLogRequest {
    /// The owning medication.
    pub medication_id: String,

    /// When the dose is or was due (UTC, RFC 3339).
    pub scheduled_at: DateTime<Utc>,

    /// When the dose was taken, for retroactive logging. Absent creates a
    /// `scheduled` log.
    #[serde(default)]
    pub taken_at: Option<DateTime<Utc>>,
}

/// Request body for POST /dose-logs/:id/taken.
#[derive(Debug, Clone, Deserialize)]
pub struct MarkTakenRequest {
    /// When the dose was taken; defaults to the server clock when absent.
    #[serde(default)]
    pub taken_at: Option<DateTime<Utc>>,
}

/// Query parameters for GET /patterns/:medication_id.
#[derive(Debug, Deserialize)]
pub struct PatternQuery {
    /// Trailing window in days (default: 30).
    #[serde(default = "default_window_days")]
    pub window_days: u32,
}

fn default_window_days() -> u32 {
    DEFAULT_WINDOW_DAYS
}

/// Default trailing window for pattern analysis, in days.
pub const DEFAULT_WINDOW_DAYS: u32 = 30;

/// Query parameters for the per-user endpoints (suggestions, insights).
#[derive(Debug, Deserialize)]
pub struct UserQuery {
    /// The user to operate on.
    pub user_id: String,
}
