//! SQLite storage layer for Adhera.
//!
//! Three tables: `medications`, `dose_logs`, and `suggestions`. All
//! timestamps are stored as Unix seconds (UTC). The schema is created
//! idempotently on startup.
//!
//! Write-path invariants enforced here:
//!
//! - A dose log only moves forward: `scheduled` to `taken` (via
//!   [`Storage::mark_dose_taken`]) or `scheduled` to `missed` (via
//!   [`Storage::sweep_missed`]); both updates are guarded on the current
//!   status so a log never mutates twice.
//! - A suggestion status only moves `pending` to a terminal state; the
//!   guarded UPDATE in [`Storage::update_suggestion_status`] refuses
//!   everything else.
//! - Suggestion inserts are append-only; duplicate content across repeated
//!   generation calls is the documented behavior, not an upsert bug.

use chrono::{DateTime, TimeZone, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};

use crate::model::{
    DoseLog, DoseStatus, Medication, SmartSuggestion, SuggestionPriority, SuggestionStatus,
    SuggestionType,
};

/// Outcome of a suggestion status-transition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusTransition {
    /// The pending suggestion moved to the requested terminal status.
    Applied,
    /// The suggestion exists but the transition is not allowed: it is
    /// already terminal, or the requested status was not terminal.
    Refused,
    /// No suggestion with that id.
    NotFound,
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    /// Create a new storage instance and initialize the schema.
    ///
    /// # Arguments
    ///
    /// * `database_url` - SQLite connection string (e.g., "sqlite:adhera.db"
    ///   or "sqlite::memory:")
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        let storage = Self { pool };
        storage.initialize_schema().await?;

        Ok(storage)
    }

    /// Create the database schema if it doesn't exist.
    async fn initialize_schema(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS medications (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                name TEXT NOT NULL,
                created_ts INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_medications_user
            ON medications(user_id)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS dose_logs (
                id TEXT PRIMARY KEY,
                medication_id TEXT NOT NULL,
                scheduled_ts INTEGER NOT NULL,
                taken_ts INTEGER,
                status TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Index for efficient trailing-window queries by medication
        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_dose_logs_med_ts
            ON dose_logs(medication_id, scheduled_ts)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS suggestions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                medication_id TEXT NOT NULL,
                suggestion_type TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                reasoning TEXT NOT NULL,
                action TEXT NOT NULL,
                priority TEXT NOT NULL,
                estimated_improvement INTEGER NOT NULL,
                created_ts INTEGER NOT NULL,
                status TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_suggestions_user_status
            ON suggestions(user_id, status)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ========================================================================
    // Medications
    // ========================================================================

    /// Insert a new medication.
    pub async fn insert_medication(&self, medication: &Medication) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO medications (id, user_id, name, created_ts)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&medication.id)
        .bind(&medication.user_id)
        .bind(&medication.name)
        .bind(medication.created_at.timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Fetch one medication by id, or None if it doesn't exist.
    pub async fn fetch_medication(&self, id: &str) -> Result<Option<Medication>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, name, created_ts
            FROM medications
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| medication_from_row(&r)).transpose()
    }

    /// Fetch all medications for a user, oldest first.
    pub async fn fetch_user_medications(
        &self,
        user_id: &str,
    ) -> Result<Vec<Medication>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, name, created_ts
            FROM medications
            WHERE user_id = ?
            ORDER BY created_ts, id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(medication_from_row).collect()
    }

    /// Fetch the ids of all medications for a user, oldest first.
    pub async fn fetch_user_medication_ids(
        &self,
        user_id: &str,
    ) -> Result<Vec<String>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id FROM medications
            WHERE user_id = ?
            ORDER BY created_ts, id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|r| r.get("id")).collect())
    }

    /// Delete a medication and cascade to its dose logs and suggestions.
    ///
    /// Returns whether a medication row was actually deleted.
    pub async fn delete_medication(&self, id: &str) -> Result<bool, sqlx::Error> {
        sqlx::query("DELETE FROM suggestions WHERE medication_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        sqlx::query("DELETE FROM dose_logs WHERE medication_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        let result = sqlx::query("DELETE FROM medications WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // ========================================================================
    // Dose logs
    // ========================================================================

    /// Insert a new dose log.
    pub async fn insert_dose_log(&self, log: &DoseLog) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO dose_logs (id, medication_id, scheduled_ts, taken_ts, status)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&log.id)
        .bind(&log.medication_id)
        .bind(log.scheduled_at.timestamp())
        .bind(log.taken_at.map(|t| t.timestamp()))
        .bind(log.status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Mark a scheduled dose as taken.
    ///
    /// Guarded on the current status: a dose that is already `taken` or
    /// `missed` is left untouched. Returns whether the update applied.
    pub async fn mark_dose_taken(
        &self,
        id: &str,
        taken_at: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE dose_logs
            SET taken_ts = ?, status = 'taken'
            WHERE id = ? AND status = 'scheduled'
            "#,
        )
        .bind(taken_at.timestamp())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Mark every still-`scheduled` dose due before `cutoff` as `missed`.
    ///
    /// Returns the number of doses swept.
    pub async fn sweep_missed(&self, cutoff: DateTime<Utc>) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE dose_logs
            SET status = 'missed'
            WHERE status = 'scheduled' AND scheduled_ts < ?
            "#,
        )
        .bind(cutoff.timestamp())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Fetch one dose log by id, or None if it doesn't exist.
    pub async fn fetch_dose_log(&self, id: &str) -> Result<Option<DoseLog>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT id, medication_id, scheduled_ts, taken_ts, status
            FROM dose_logs
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| dose_log_from_row(&r)).transpose()
    }

    /// Fetch all dose logs for a medication scheduled at or after `since`,
    /// ascending by `scheduled_at`.
    pub async fn fetch_dose_logs_since(
        &self,
        medication_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<DoseLog>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, medication_id, scheduled_ts, taken_ts, status
            FROM dose_logs
            WHERE medication_id = ? AND scheduled_ts >= ?
            ORDER BY scheduled_ts ASC
            "#,
        )
        .bind(medication_id)
        .bind(since.timestamp())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(dose_log_from_row).collect()
    }

    // ========================================================================
    // Suggestions
    // ========================================================================

    /// Insert a generated suggestion. Append-only: callers never upsert.
    pub async fn insert_suggestion(
        &self,
        suggestion: &SmartSuggestion,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO suggestions
                (id, user_id, medication_id, suggestion_type, title, description,
                 reasoning, action, priority, estimated_improvement, created_ts, status)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&suggestion.id)
        .bind(&suggestion.user_id)
        .bind(&suggestion.medication_id)
        .bind(suggestion.suggestion_type.as_str())
        .bind(&suggestion.title)
        .bind(&suggestion.description)
        .bind(&suggestion.reasoning)
        .bind(&suggestion.action)
        .bind(suggestion.priority.as_str())
        .bind(i64::from(suggestion.estimated_improvement))
        .bind(suggestion.created_at.timestamp())
        .bind(suggestion.status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Attempt the `pending` to terminal status transition.
    ///
    /// The UPDATE is guarded on `status = 'pending'`, so accepted and
    /// dismissed suggestions can never be reverted or re-resolved. Asking
    /// for a transition back to `pending` is refused outright.
    pub async fn update_suggestion_status(
        &self,
        id: &str,
        status: SuggestionStatus,
    ) -> Result<StatusTransition, sqlx::Error> {
        if status == SuggestionStatus::Pending {
            return Ok(StatusTransition::Refused);
        }

        let result = sqlx::query(
            r#"
            UPDATE suggestions
            SET status = ?
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(status.as_str())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(StatusTransition::Applied);
        }

        let exists = sqlx::query("SELECT id FROM suggestions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(match exists {
            Some(_) => StatusTransition::Refused,
            None => StatusTransition::NotFound,
        })
    }

    /// Fetch all pending suggestions for a user, newest first.
    pub async fn fetch_pending_suggestions(
        &self,
        user_id: &str,
    ) -> Result<Vec<SmartSuggestion>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, medication_id, suggestion_type, title, description,
                   reasoning, action, priority, estimated_improvement, created_ts, status
            FROM suggestions
            WHERE user_id = ? AND status = 'pending'
            ORDER BY created_ts DESC, id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(suggestion_from_row).collect()
    }
}

// ============================================================================
// Row conversions
// ============================================================================

fn medication_from_row(row: &SqliteRow) -> Result<Medication, sqlx::Error> {
    let created_ts: i64 = row.get("created_ts");

    Ok(Medication {
        id: row.get("id"),
        user_id: row.get("user_id"),
        name: row.get("name"),
        created_at: Utc.timestamp_opt(created_ts, 0).unwrap(),
    })
}

fn dose_log_from_row(row: &SqliteRow) -> Result<DoseLog, sqlx::Error> {
    let scheduled_ts: i64 = row.get("scheduled_ts");
    let taken_ts: Option<i64> = row.get("taken_ts");
    let status: String = row.get("status");

    Ok(DoseLog {
        id: row.get("id"),
        medication_id: row.get("medication_id"),
        scheduled_at: Utc.timestamp_opt(scheduled_ts, 0).unwrap(),
        taken_at: taken_ts.map(|ts| Utc.timestamp_opt(ts, 0).unwrap()),
        status: parse_column(&status, DoseStatus::parse, "dose status")?,
    })
}

fn suggestion_from_row(row: &SqliteRow) -> Result<SmartSuggestion, sqlx::Error> {
    let suggestion_type: String = row.get("suggestion_type");
    let priority: String = row.get("priority");
    let status: String = row.get("status");
    let estimated_improvement: i64 = row.get("estimated_improvement");
    let created_ts: i64 = row.get("created_ts");

    Ok(SmartSuggestion {
        id: row.get("id"),
        user_id: row.get("user_id"),
        medication_id: row.get("medication_id"),
        suggestion_type: parse_column(&suggestion_type, SuggestionType::parse, "suggestion type")?,
        title: row.get("title"),
        description: row.get("description"),
        reasoning: row.get("reasoning"),
        action: row.get("action"),
        priority: parse_column(&priority, SuggestionPriority::parse, "priority")?,
        estimated_improvement: estimated_improvement.max(0) as u32,
        created_at: Utc.timestamp_opt(created_ts, 0).unwrap(),
        status: parse_column(&status, SuggestionStatus::parse, "suggestion status")?,
    })
}

fn parse_column<T>(
    raw: &str,
    parse: impl Fn(&str) -> Option<T>,
    what: &str,
) -> Result<T, sqlx::Error> {
    parse(raw).ok_or_else(|| sqlx::Error::Decode(format!("unknown {what} '{raw}'").into()))
}
