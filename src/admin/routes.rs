//! Admin API route handlers.
//!
//! All endpoints return JSON. State is shared via `Arc<AdminState>`.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::engine::bulk_fetch::{spawn_bulk_fetch, BulkFetchRequest, COMBINATION_DELAY};
use crate::engine::ProviderManager;
use crate::types::{IngestError, RunOptions};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Shared state accessible by all route handlers.
pub struct AdminState {
    pub manager: Arc<ProviderManager>,
    /// Process shutdown token, passed to synchronous runs.
    pub cancel: CancellationToken,
    /// Pause between bulk fetch combinations.
    pub bulk_delay: Duration,
}

impl AdminState {
    pub fn new(manager: Arc<ProviderManager>, cancel: CancellationToken) -> Self {
        Self {
            manager,
            cancel,
            bulk_delay: COMBINATION_DELAY,
        }
    }
}

pub type AppState = Arc<AdminState>;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ProviderSummary {
    pub name: String,
    pub enabled: bool,
    pub schedule: String,
    pub zones: Vec<String>,
    pub currencies: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunResponse {
    pub status: &'static str,
    pub provider: String,
    pub date: String,
    pub zone: String,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AcceptedResponse {
    pub status: &'static str,
    pub provider: String,
    pub combinations: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct ApiError(pub IngestError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            IngestError::ProviderNotFound(_) => StatusCode::NOT_FOUND,
            IngestError::ProviderDisabled(_) => StatusCode::CONFLICT,
            IngestError::UnsupportedZone { .. }
            | IngestError::UnsupportedCurrency { .. }
            | IngestError::InvalidDateRange(_) => StatusCode::BAD_REQUEST,
            IngestError::Http(_) | IngestError::Upstream { .. } | IngestError::Decode(_) => {
                StatusCode::BAD_GATEWAY
            }
            IngestError::MissingZonePrice(_) => StatusCode::UNPROCESSABLE_ENTITY,
            IngestError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(error = %self.0, "Admin request failed");
        }
        (
            status,
            Json(ErrorBody {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /api/providers
pub async fn list_providers(State(state): State<AppState>) -> Json<Vec<ProviderSummary>> {
    let providers = state
        .manager
        .providers()
        .map(|p| {
            let cfg = p.config();
            ProviderSummary {
                name: p.name().to_string(),
                enabled: cfg.enabled,
                schedule: cfg.schedule.clone(),
                zones: cfg.supported_zones.iter().cloned().collect(),
                currencies: cfg.supported_currencies.iter().cloned().collect(),
            }
        })
        .collect();
    Json(providers)
}

/// POST /api/providers/:name/run
///
/// Runs one (date, zone, currency) tuple and waits for the result.
pub async fn run_provider(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(opts): Json<RunOptions>,
) -> Result<Json<RunResponse>, ApiError> {
    info!(provider = %name, run = %opts, "Targeted run requested");
    state
        .manager
        .run_provider(&state.cancel, &name, Some(&opts))
        .await?;

    Ok(Json(RunResponse {
        status: "completed",
        provider: name,
        date: opts.date.to_string(),
        zone: opts.zone,
        currency: opts.currency,
    }))
}

/// POST /api/providers/:name/fetch
///
/// Validates the request, then starts a detached bulk fetch and answers 202.
pub async fn trigger_bulk_fetch(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<BulkFetchRequest>,
) -> Result<(StatusCode, Json<AcceptedResponse>), ApiError> {
    let provider = state
        .manager
        .get_provider(&name)
        .ok_or_else(|| IngestError::ProviderNotFound(name.clone()))?;
    if !provider.config().enabled {
        return Err(IngestError::ProviderDisabled(name).into());
    }

    let plan = request.validate(provider.as_ref())?;
    let combinations = plan.len();
    info!(
        provider = %name,
        start = %plan.start,
        end = %plan.end,
        combinations,
        "Bulk fetch accepted"
    );
    spawn_bulk_fetch(state.manager.clone(), &name, plan, state.bulk_delay);

    Ok((
        StatusCode::ACCEPTED,
        Json(AcceptedResponse {
            status: "accepted",
            provider: name,
            combinations,
        }),
    ))
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
