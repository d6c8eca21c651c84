use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

use crate::geocode::{CancelFlag, GeocodeError, ResolutionResult};

use super::state::AppState;

/// Longest address either endpoint accepts.
const MAX_ADDRESS_CHARS: usize = 200;

// ─── Error response ──────────────────────────────────────────────

#[derive(Serialize)]
struct ApiErrorBody {
    error: String,
    code: u16,
}

pub struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            error: self.1,
            code: self.0.as_u16(),
        };
        (self.0, Json(body)).into_response()
    }
}

fn api_error(status: StatusCode, msg: impl Into<String>) -> ApiError {
    ApiError(status, msg.into())
}

impl From<GeocodeError> for ApiError {
    fn from(e: GeocodeError) -> Self {
        match e {
            GeocodeError::InvalidInput(msg) => api_error(StatusCode::BAD_REQUEST, msg),
        }
    }
}

// ─── Shared resolution path ──────────────────────────────────────

/// Sets the cancel flag when the request future is dropped before the
/// blocking resolution finished.
struct CancelOnDrop {
    flag: CancelFlag,
    armed: bool,
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if self.armed {
            self.flag.cancel();
        }
    }
}

async fn run_resolution(state: &Arc<AppState>, address: &str) -> Result<ResolutionResult, ApiError> {
    let chars = address.trim().chars().count();
    if chars > MAX_ADDRESS_CHARS {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            format!("address is too long ({} > {} characters)", chars, MAX_ADDRESS_CHARS),
        ));
    }

    if let Some(ref cache) = state.cache {
        let cache = cache.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(hit) = cache.get(address) {
            info!(method = %hit.method, "cache hit");
            return Ok(hit);
        }
    }

    let flag = CancelFlag::new();
    let mut guard = CancelOnDrop {
        flag: flag.clone(),
        armed: true,
    };

    // Resolution and the cache write both block; keep them off the async workers.
    let shared = Arc::clone(state);
    let owned = address.to_string();
    let joined = tokio::task::spawn_blocking(move || {
        let result = shared.resolver.resolve_with_cancel(&owned, &flag)?;
        if let Some(ref cache) = shared.cache {
            let mut cache = cache.lock().unwrap_or_else(|p| p.into_inner());
            cache.put(&owned, &result);
        }
        Ok::<_, GeocodeError>(result)
    })
    .await;
    guard.armed = false;

    let result = joined
        .map_err(|e| {
            error!(error = %e, "resolver task failed");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "resolver task failed")
        })??;

    Ok(result)
}

// ─── GET /health ─────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ─── GET /api/v1/geocode ─────────────────────────────────────────

#[derive(Deserialize)]
pub struct GeocodeQuery {
    pub address: Option<String>,
}

pub async fn geocode(
    State(state): State<Arc<AppState>>,
    Query(params): Query<GeocodeQuery>,
) -> Result<Json<ResolutionResult>, ApiError> {
    let start = Instant::now();
    let address = params.address.unwrap_or_default();

    let result = run_resolution(&state, &address).await?;

    info!(
        address = %address.trim(),
        method = %result.method,
        succeeded = result.succeeded,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "GET /api/v1/geocode"
    );
    Ok(Json(result))
}

// ─── POST /api/v1/analysis/address ───────────────────────────────

#[derive(Deserialize)]
pub struct AnalysisRequest {
    pub address: String,
}

#[derive(Serialize)]
pub struct AnalysisResponse {
    pub success: bool,
    pub message: String,
    pub data: ResolutionResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

pub async fn analyze_address(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AnalysisRequest>,
) -> Result<Json<AnalysisResponse>, ApiError> {
    let start = Instant::now();
    let result = run_resolution(&state, &req.address).await?;

    let (message, warning) = if result.succeeded {
        (format!("address resolved via {}", result.method), None)
    } else {
        (
            "no geocoding provider answered; approximate coordinates used".to_string(),
            Some(match result.fallback_keyword {
                Some(ref kw) => format!(
                    "coordinates approximated from '{}'; please confirm the location manually",
                    kw
                ),
                None => "coordinates are a default point; please confirm the location manually".to_string(),
            }),
        )
    };

    info!(
        address = %req.address.trim(),
        method = %result.method,
        succeeded = result.succeeded,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "POST /api/v1/analysis/address"
    );

    Ok(Json(AnalysisResponse {
        success: true,
        message,
        data: result,
        warning,
    }))
}
