//! HTTP API handlers for Adhera.
//!
//! Error bodies are machine-readable: every non-2xx response carries a
//! `reason` the UI can switch on, so "insufficient data" renders as an
//! empty state instead of an error screen. The suggestion endpoint goes one
//! further and reports per-medication problems inside a 200 body — a user
//! with one broken medication still gets suggestions for the others.
//!
//! Suggestion persistence is best-effort: when the store is degraded the
//! computed batch is still returned, with `persisted: false`.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::analytics::analyze_medication_patterns;
use crate::error::AdherenceError;
use crate::insights::generate_adherence_insights;
use crate::model::{
    AdherenceInsight, AdherencePattern, DoseLog, DoseLogRequest, MarkTakenRequest, Medication,
    MedicationRequest, PatternQuery, SmartSuggestion, SuggestionStatus, UserQuery,
};
use crate::storage::{StatusTransition, Storage};
use crate::suggestions::{GenerationFailure, SuggestionEngine};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub storage: Storage,
    pub engine: SuggestionEngine,
}

/// Machine-readable error body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Stable reason the UI switches on: "not_found", "insufficient_data",
    /// "not_scheduled", "not_pending", "persistence".
    pub reason: &'static str,

    /// Human-readable detail.
    pub message: String,
}

type ApiError = (StatusCode, Json<ErrorBody>);

fn api_error(status: StatusCode, reason: &'static str, message: String) -> ApiError {
    (status, Json(ErrorBody { reason, message }))
}

fn persistence_error(e: sqlx::Error) -> ApiError {
    api_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "persistence",
        e.to_string(),
    )
}

fn adherence_error(e: AdherenceError) -> ApiError {
    match &e {
        AdherenceError::NotFound { .. } => {
            api_error(StatusCode::NOT_FOUND, "not_found", e.to_string())
        }
        AdherenceError::EmptyHistory { .. } => api_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "insufficient_data",
            e.to_string(),
        ),
        // Contained upstream; reaching here still shouldn't 404
        AdherenceError::ExternalService(_) | AdherenceError::Persistence(_) => api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "persistence",
            e.to_string(),
        ),
    }
}

// ============================================================================
// Medications
// ============================================================================

/// POST /medications - Register a medication for a user.
#[instrument(skip(state, request))]
pub async fn post_medication(
    State(state): State<AppState>,
    Json(request): Json<MedicationRequest>,
) -> Result<(StatusCode, Json<Medication>), ApiError> {
    let medication = Medication::new(&request.user_id, &request.name, Utc::now());

    match state.storage.insert_medication(&medication).await {
        Ok(()) => {
            info!(
                medication_id = %medication.id,
                user_id = %medication.user_id,
                "Medication registered"
            );
            Ok((StatusCode::CREATED, Json(medication)))
        }
        Err(e) => {
            warn!(user_id = %request.user_id, error = %e, "Failed to register medication");
            Err(persistence_error(e))
        }
    }
}

/// GET /medications?user_id= - List a user's medications, oldest first.
#[instrument(skip(state))]
pub async fn get_medications(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> Result<Json<Vec<Medication>>, ApiError> {
    match state.storage.fetch_user_medications(&query.user_id).await {
        Ok(medications) => Ok(Json(medications)),
        Err(e) => {
            warn!(user_id = %query.user_id, error = %e, "Failed to list medications");
            Err(persistence_error(e))
        }
    }
}

/// DELETE /medications/:id - Delete a medication and cascade to its dose
/// logs and suggestions.
#[instrument(skip(state))]
pub async fn delete_medication(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    match state.storage.delete_medication(&id).await {
        Ok(true) => {
            info!(medication_id = %id, "Medication deleted");
            Ok(StatusCode::NO_CONTENT)
        }
        Ok(false) => Err(api_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("medication '{id}' not found"),
        )),
        Err(e) => {
            warn!(medication_id = %id, error = %e, "Failed to delete medication");
            Err(persistence_error(e))
        }
    }
}

// ============================================================================
// Dose logs
// ============================================================================

/// POST /dose-logs - Create a dose log.
///
/// With `taken_at` absent the log is `scheduled`; with it present the dose
/// is logged retroactively as `taken`.
#[instrument(skip(state, request))]
pub async fn post_dose_log(
    State(state): State<AppState>,
    Json(request): Json<DoseLogRequest>,
) -> Result<(StatusCode, Json<DoseLog>), ApiError> {
    // The medication must exist; dose logs are never orphaned
    match state.storage.fetch_medication(&request.medication_id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return Err(api_error(
                StatusCode::NOT_FOUND,
                "not_found",
                format!("medication '{}' not found", request.medication_id),
            ));
        }
        Err(e) => return Err(persistence_error(e)),
    }

    let log = DoseLog::new(&request.medication_id, request.scheduled_at, request.taken_at);

    match state.storage.insert_dose_log(&log).await {
        Ok(()) => {
            info!(
                dose_log_id = %log.id,
                medication_id = %log.medication_id,
                status = log.status.as_str(),
                "Dose log created"
            );
            Ok((StatusCode::CREATED, Json(log)))
        }
        Err(e) => {
            warn!(medication_id = %request.medication_id, error = %e, "Failed to create dose log");
            Err(persistence_error(e))
        }
    }
}

/// POST /dose-logs/:id/taken - Mark a scheduled dose as taken.
///
/// 409 when the dose already left `scheduled`; the log mutates once.
#[instrument(skip(state, request))]
pub async fn post_dose_taken(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<MarkTakenRequest>,
) -> Result<StatusCode, ApiError> {
    let taken_at = request.taken_at.unwrap_or_else(Utc::now);

    match state.storage.mark_dose_taken(&id, taken_at).await {
        Ok(true) => {
            info!(dose_log_id = %id, "Dose marked taken");
            Ok(StatusCode::OK)
        }
        Ok(false) => match state.storage.fetch_dose_log(&id).await {
            Ok(Some(log)) => Err(api_error(
                StatusCode::CONFLICT,
                "not_scheduled",
                format!("dose log '{id}' is already {}", log.status.as_str()),
            )),
            Ok(None) => Err(api_error(
                StatusCode::NOT_FOUND,
                "not_found",
                format!("dose log '{id}' not found"),
            )),
            Err(e) => Err(persistence_error(e)),
        },
        Err(e) => {
            warn!(dose_log_id = %id, error = %e, "Failed to mark dose taken");
            Err(persistence_error(e))
        }
    }
}

// ============================================================================
// Patterns
// ============================================================================

/// GET /patterns/:medication_id - Compute the adherence pattern.
///
/// # Query Parameters
///
/// - `window_days` (optional): Trailing window in days (default: 30)
///
/// # Errors
///
/// - 404 `not_found` when the medication doesn't exist
/// - 422 `insufficient_data` when the window holds zero dose logs; the UI
///   renders an empty state, never 0% adherence
#[instrument(skip(state))]
pub async fn get_pattern(
    State(state): State<AppState>,
    Path(medication_id): Path<String>,
    Query(query): Query<PatternQuery>,
) -> Result<Json<AdherencePattern>, ApiError> {
    let now = Utc::now();

    match analyze_medication_patterns(&state.storage, &medication_id, query.window_days, now).await
    {
        Ok(pattern) => {
            info!(
                medication_id = %pattern.medication_id,
                adherence_rate = pattern.adherence_rate,
                streak_days = pattern.streak_days,
                "Pattern computed"
            );
            Ok(Json(pattern))
        }
        Err(e) => {
            if !e.is_insufficient_data() {
                warn!(medication_id = %medication_id, error = %e, "Failed to compute pattern");
            }
            Err(adherence_error(e))
        }
    }
}

// ============================================================================
// Suggestions
// ============================================================================

/// Response for GET /suggestions.
#[derive(Debug, Serialize)]
pub struct SuggestionsResponse {
    /// When this batch was generated.
    pub timestamp: DateTime<Utc>,

    /// All suggestions, priority descending.
    pub suggestions: Vec<SmartSuggestion>,

    /// Medications skipped for lack of dose history.
    pub insufficient_data: Vec<String>,

    /// Medications whose generation failed.
    pub failures: Vec<GenerationFailure>,

    /// Whether every suggestion reached the store. The batch is returned
    /// either way; persistence is best-effort.
    pub persisted: bool,
}

/// GET /suggestions?user_id= - Generate and persist suggestions.
///
/// Generation failures for individual medications land in `failures`;
/// medications without history land in `insufficient_data`. A completion
/// service outage silently degrades the batch to rule-based suggestions.
#[instrument(skip(state))]
pub async fn get_suggestions(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> Result<Json<SuggestionsResponse>, ApiError> {
    let now = Utc::now();

    let batch = match state.engine.generate(&state.storage, &query.user_id, now).await {
        Ok(batch) => batch,
        Err(e) => {
            warn!(user_id = %query.user_id, error = %e, "Failed to generate suggestions");
            return Err(adherence_error(e));
        }
    };

    // Best-effort persistence: a degraded store must not cost the user the
    // suggestions that were already computed
    let mut persisted = true;
    for suggestion in &batch.suggestions {
        if let Err(e) = state.storage.insert_suggestion(suggestion).await {
            warn!(
                suggestion_id = %suggestion.id,
                error = %e,
                "Failed to persist suggestion"
            );
            persisted = false;
        }
    }

    info!(
        user_id = %query.user_id,
        suggestion_count = batch.suggestions.len(),
        skipped = batch.insufficient_data.len(),
        failed = batch.failures.len(),
        persisted,
        "Suggestions generated"
    );

    Ok(Json(SuggestionsResponse {
        timestamp: now,
        suggestions: batch.suggestions,
        insufficient_data: batch.insufficient_data,
        failures: batch.failures,
        persisted,
    }))
}

/// GET /suggestions/pending?user_id= - Pending suggestions, newest first.
#[instrument(skip(state))]
pub async fn get_pending_suggestions(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> Result<Json<Vec<SmartSuggestion>>, ApiError> {
    match state.storage.fetch_pending_suggestions(&query.user_id).await {
        Ok(suggestions) => Ok(Json(suggestions)),
        Err(e) => {
            warn!(user_id = %query.user_id, error = %e, "Failed to fetch pending suggestions");
            Err(persistence_error(e))
        }
    }
}

/// POST /suggestions/:id/accept - Accept a pending suggestion.
#[instrument(skip(state))]
pub async fn accept_suggestion(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    transition_suggestion(&state, &id, SuggestionStatus::Accepted).await
}

/// POST /suggestions/:id/dismiss - Dismiss a pending suggestion.
#[instrument(skip(state))]
pub async fn dismiss_suggestion(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    transition_suggestion(&state, &id, SuggestionStatus::Dismissed).await
}

async fn transition_suggestion(
    state: &AppState,
    id: &str,
    status: SuggestionStatus,
) -> Result<StatusCode, ApiError> {
    match state.storage.update_suggestion_status(id, status).await {
        Ok(StatusTransition::Applied) => {
            info!(suggestion_id = %id, status = status.as_str(), "Suggestion resolved");
            Ok(StatusCode::NO_CONTENT)
        }
        Ok(StatusTransition::Refused) => Err(api_error(
            StatusCode::CONFLICT,
            "not_pending",
            format!("suggestion '{id}' is no longer pending; resolutions are terminal"),
        )),
        Ok(StatusTransition::NotFound) => Err(api_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("suggestion '{id}' not found"),
        )),
        Err(e) => {
            warn!(suggestion_id = %id, error = %e, "Failed to update suggestion status");
            Err(persistence_error(e))
        }
    }
}

// ============================================================================
// Insights
// ============================================================================

/// GET /insights?user_id= - Deterministic adherence insights.
///
/// No AI involved: this endpoint stays available when the completion
/// service is degraded.
#[instrument(skip(state))]
pub async fn get_insights(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> Result<Json<Vec<AdherenceInsight>>, ApiError> {
    let now = Utc::now();

    match generate_adherence_insights(&state.storage, &query.user_id, now).await {
        Ok(insights) => {
            info!(
                user_id = %query.user_id,
                insight_count = insights.len(),
                "Insights generated"
            );
            Ok(Json(insights))
        }
        Err(e) => {
            warn!(user_id = %query.user_id, error = %e, "Failed to generate insights");
            Err(adherence_error(e))
        }
    }
}

/// GET /health - Simple health check endpoint.
pub async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}
