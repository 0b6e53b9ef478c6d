//! # API Endpoint Handlers
//!
//! Store reads and pipeline runs are synchronous, so every handler that
//! touches them moves the work onto a blocking thread.

use super::{
    AppState,
    types::{
        ComplianceResponse, ErrorResponse, HealthResponse, RecordsQuery, RecordsResponse,
        RunRequest, RunResponse,
    },
};
use archgov_core::{
    GovernanceError, PipelineState, RuleEngine, RunSummary, export_run, run_checksum,
};
use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};

type HandlerError = (StatusCode, Json<ErrorResponse>);

/// Run `f` on the blocking pool, mapping both failure layers to a response.
async fn blocking<T, F>(f: F) -> Result<T, HandlerError>
where
    F: FnOnce() -> Result<T, GovernanceError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::from_error(&e)),
        )),
        Err(e) => {
            tracing::error!(error = %e, "blocking task failed");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("internal task failure")),
            ))
        }
    }
}

// =============================================================================
// HEALTH HANDLER
// =============================================================================

/// Health check endpoint.
pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse::default())
}

// =============================================================================
// RECORDS HANDLER
// =============================================================================

/// List catalog records, optionally filtered by name.
///
/// 400 when the filter is longer than `MAX_FILTER_LENGTH`.
pub async fn records_handler(
    State(state): State<AppState>,
    Query(query): Query<RecordsQuery>,
) -> Result<Json<RecordsResponse>, HandlerError> {
    let filter = query
        .validated_filter()
        .map_err(|e| (StatusCode::BAD_REQUEST, Json(ErrorResponse::from_error(&e))))?;

    let orchestrator = state.orchestrator.clone();
    let records = blocking(move || orchestrator.store().find(filter.as_deref())).await?;
    Ok(Json(RecordsResponse::new(records)))
}

// =============================================================================
// COMPLIANCE HANDLER
// =============================================================================

/// Evaluate the rule table against every record in the catalog.
pub async fn compliance_handler(
    State(state): State<AppState>,
) -> Result<Json<ComplianceResponse>, HandlerError> {
    let orchestrator = state.orchestrator.clone();
    let check = blocking(move || {
        let records = orchestrator.store().get_all()?;
        RuleEngine::check_catalog(&records)
    })
    .await?;
    Ok(Json(ComplianceResponse::new(check)))
}

// =============================================================================
// RUN HANDLER
// =============================================================================

/// Execute one governance run.
///
/// 200 with the run summary on completion, 422 with the failure descriptor
/// when a stage fails, 400 when the request names no application.
pub async fn run_handler(
    State(state): State<AppState>,
    Json(request): Json<RunRequest>,
) -> Response {
    let lookup = match request.to_lookup() {
        Ok(lookup) => lookup,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, Json(ErrorResponse::from_error(&e))).into_response();
        }
    };

    let orchestrator = state.orchestrator.clone();
    let with_archive = request.archive;
    let result = blocking(move || {
        Ok(match orchestrator.run(&lookup) {
            Ok(outcome) => (
                StatusCode::OK,
                respond(&outcome.state, RunSummary::from_outcome(&outcome), with_archive),
            ),
            Err(failure) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                respond(&failure.state, RunSummary::from_failure(&failure), with_archive),
            ),
        })
    })
    .await;

    match result {
        Ok((status, body)) => (status, Json(body)).into_response(),
        Err(e) => e.into_response(),
    }
}

fn respond(state: &PipelineState, summary: RunSummary, with_archive: bool) -> RunResponse {
    let checksum = match run_checksum(state) {
        Ok(checksum) => Some(checksum),
        Err(e) => {
            tracing::warn!(error = %e, "run checksum failed");
            None
        }
    };
    let archive = if with_archive {
        match export_run(state) {
            Ok(data) => Some(data),
            Err(e) => {
                tracing::warn!(error = %e, "run archive export failed");
                None
            }
        }
    } else {
        None
    };
    RunResponse::new(summary, checksum, archive.as_deref())
}
