//! Adhera - medication-adherence analytics and smart suggestions.
//!
//! # API Endpoints
//!
//! - `POST /medications` - Register a medication
//! - `GET /medications` - List a user's medications
//! - `DELETE /medications/:id` - Delete a medication (cascades)
//! - `POST /dose-logs` - Create a dose log
//! - `POST /dose-logs/:id/taken` - Mark a scheduled dose taken
//! - `GET /patterns/:medication_id` - Adherence pattern over a window
//! - `GET /suggestions` - Generate and persist smart suggestions
//! - `GET /suggestions/pending` - Pending suggestions
//! - `POST /suggestions/:id/accept` - Accept a suggestion (terminal)
//! - `POST /suggestions/:id/dismiss` - Dismiss a suggestion (terminal)
//! - `GET /insights` - Deterministic adherence insights
//! - `GET /health` - Health check
//!
//! # Configuration
//!
//! - `ADHERA_PORT` - Listen port (default: 3000)
//! - `ADHERA_DATABASE_URL` - SQLite URL (default: sqlite:adhera.db?mode=rwc)
//! - `ADHERA_COMPLETION_URL` - Text-completion service base URL; absent
//!   means suggestions are rule-based only
//! - `ADHERA_COMPLETION_MODEL` - Model name for the completion service
//! - `ADHERA_COMPLETION_TIMEOUT_SECS` - Completion request timeout

use std::env;
use std::net::SocketAddr;

use axum::{
    Router,
    routing::{delete, get, post},
};
use chrono::Utc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use adhera::api::{
    AppState, accept_suggestion, delete_medication, dismiss_suggestion, get_insights,
    get_medications, get_pattern, get_pending_suggestions, get_suggestions, health_check,
    post_dose_log, post_dose_taken, post_medication,
};
use adhera::completion::{CompletionClient, DEFAULT_TIMEOUT_SECS};
use adhera::storage::Storage;
use adhera::suggestions::SuggestionEngine;

/// Default port if not specified via environment variable.
const DEFAULT_PORT: u16 = 3000;

/// Default database path if not specified via environment variable.
const DEFAULT_DB_PATH: &str = "sqlite:adhera.db?mode=rwc";

/// Default model name for the completion service.
const DEFAULT_COMPLETION_MODEL: &str = "med-assist";

/// How often the missed-dose sweep runs.
const SWEEP_INTERVAL_SECS: u64 = 30 * 60;

/// How long a scheduled dose may stay unlogged before the sweep marks it
/// missed.
const MISSED_GRACE_HOURS: i64 = 12;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("adhera=info".parse()?))
        .init();

    // Load configuration from environment
    let port: u16 = env::var("ADHERA_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_PORT);

    let db_url = env::var("ADHERA_DATABASE_URL").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string());

    let completion_model = env::var("ADHERA_COMPLETION_MODEL")
        .unwrap_or_else(|_| DEFAULT_COMPLETION_MODEL.to_string());

    let completion_timeout: u64 = env::var("ADHERA_COMPLETION_TIMEOUT_SECS")
        .ok()
        .and_then(|t| t.parse().ok())
        .unwrap_or(DEFAULT_TIMEOUT_SECS);

    info!(port, db_url = %db_url, "Starting Adhera server");

    // Initialize storage
    let storage = Storage::new(&db_url).await?;
    info!("Database initialized");

    // The completion service is optional; without it the suggestion engine
    // runs its deterministic rule pass only
    let completion = match env::var("ADHERA_COMPLETION_URL") {
        Ok(url) => {
            info!(url = %url, model = %completion_model, "Completion service configured");
            Some(CompletionClient::new(
                &url,
                &completion_model,
                completion_timeout,
            ))
        }
        Err(_) => {
            info!("No completion service configured; suggestions are rule-based only");
            None
        }
    };

    let engine = SuggestionEngine::new(completion);

    // Create application state
    let state = AppState {
        storage: storage.clone(),
        engine,
    };

    // Background sweep: scheduled doses left unlogged past the grace period
    // become missed
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(SWEEP_INTERVAL_SECS));
        loop {
            interval.tick().await;
            let cutoff = Utc::now() - chrono::Duration::hours(MISSED_GRACE_HOURS);
            match storage.sweep_missed(cutoff).await {
                Ok(0) => {}
                Ok(swept) => info!(swept, "Marked overdue doses as missed"),
                Err(e) => warn!(error = %e, "Missed-dose sweep failed"),
            }
        }
    });

    // Build router
    let app = Router::new()
        .route("/medications", post(post_medication).get(get_medications))
        .route("/medications/:id", delete(delete_medication))
        .route("/dose-logs", post(post_dose_log))
        .route("/dose-logs/:id/taken", post(post_dose_taken))
        .route("/patterns/:medication_id", get(get_pattern))
        .route("/suggestions", get(get_suggestions))
        .route("/suggestions/pending", get(get_pending_suggestions))
        .route("/suggestions/:id/accept", post(accept_suggestion))
        .route("/suggestions/:id/dismiss", post(dismiss_suggestion))
        .route("/insights", get(get_insights))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    info!(%addr, "Adhera is listening");

    axum::serve(listener, app).await?;

    Ok(())
}
