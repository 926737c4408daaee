use std::sync::Arc;

use axum::extract::{Query, Request, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config::ServiceConfig;
use crate::error::ServiceError;
use crate::observability::ObservabilitySnapshot;
use crate::reconcile::{CompletionReport, ReconcileOutcome, ReportedStatus};
use crate::service::{LaunchReceipt, Service, SweepSummary};
use crate::store::QuotaSnapshot;

#[derive(Clone)]
pub struct HttpState {
    service: Arc<Mutex<Service>>,
    config: Arc<ServiceConfig>,
}

impl HttpState {
    pub fn new(service: Service, config: ServiceConfig) -> Self {
        Self {
            service: Arc::new(Mutex::new(service)),
            config: Arc::new(config),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Deserialize)]
struct LaunchRequest {
    #[serde(default)]
    brief_id: Option<String>,
    #[serde(default)]
    solution_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct LaunchResponse {
    success: bool,
    solution_id: String,
    quota: QuotaSnapshot,
}

#[derive(Debug, Deserialize)]
struct CallbackRequest {
    #[serde(default)]
    solution_id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    suppliers_count: Option<i64>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Serialize)]
struct CallbackResponse {
    success: bool,
    #[serde(flatten)]
    outcome: ReconcileOutcome,
}

#[derive(Debug, Deserialize)]
struct MonitorQuery {
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    delay: Option<u64>,
    #[serde(default)]
    solution_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct MonitorResponse {
    success: bool,
    checked: usize,
    results: Vec<ReconcileOutcome>,
}

#[derive(Debug, Deserialize)]
struct IngestRequest {
    #[serde(default)]
    solution_id: Option<String>,
    #[serde(default)]
    suppliers: Vec<SupplierPayload>,
}

#[derive(Debug, Deserialize)]
struct SupplierPayload {
    name: String,
}

#[derive(Debug, Serialize)]
struct IngestResponse {
    success: bool,
    inserted: usize,
}

#[derive(Debug, Serialize)]
struct QuotaResponse {
    success: bool,
    used: i64,
    limit: i64,
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/fast-search", post(handle_launch))
        .route("/quota", get(handle_quota))
        .route("/fast-search-callback", post(handle_callback))
        .route("/fast-search-monitor", get(handle_monitor))
        .route("/supplier-matches", post(handle_ingest))
        .layer(middleware::from_fn_with_state(state.clone(), cors))
        .with_state(state)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn metrics(State(state): State<HttpState>) -> Json<ObservabilitySnapshot> {
    let snapshot = state.service.lock().await.observability();
    Json(snapshot)
}

async fn handle_launch(
    State(state): State<HttpState>,
    headers: HeaderMap,
    Json(payload): Json<LaunchRequest>,
) -> Result<Json<LaunchResponse>, (StatusCode, Json<ErrorBody>)> {
    let user_id = authenticate(&state, &headers)?;
    let brief_id = payload
        .brief_id
        .filter(|brief_id| !brief_id.trim().is_empty())
        .ok_or_else(|| error_response(StatusCode::BAD_REQUEST, "brief_id is required"))?;
    let request_id = extract_header(&headers, "x-request-id");

    let receipt: LaunchReceipt = state
        .service
        .lock()
        .await
        .launch(&user_id, &brief_id, payload.solution_id, request_id.as_deref())
        .await
        .map_err(map_error)?;

    Ok(Json(LaunchResponse {
        success: true,
        solution_id: receipt.solution_id,
        quota: receipt.quota,
    }))
}

async fn handle_quota(
    State(state): State<HttpState>,
    headers: HeaderMap,
) -> Result<Json<QuotaResponse>, (StatusCode, Json<ErrorBody>)> {
    let user_id = authenticate(&state, &headers)?;
    let snapshot = state
        .service
        .lock()
        .await
        .quota_snapshot(&user_id)
        .await
        .map_err(map_error)?;
    Ok(Json(QuotaResponse {
        success: true,
        used: snapshot.used,
        limit: snapshot.limit,
    }))
}

/// Push path: completion report from the workflow engine. Server-to-server,
/// guarded by the shared callback secret when one is configured.
async fn handle_callback(
    State(state): State<HttpState>,
    headers: HeaderMap,
    Json(payload): Json<CallbackRequest>,
) -> Result<Json<CallbackResponse>, (StatusCode, Json<ErrorBody>)> {
    require_callback_secret(&state, &headers)?;

    let solution_id = payload
        .solution_id
        .filter(|solution_id| !solution_id.trim().is_empty())
        .ok_or_else(|| error_response(StatusCode::BAD_REQUEST, "solution_id is required"))?;
    let status = match payload.status.as_deref() {
        Some("finished") => ReportedStatus::Finished,
        Some("error") => ReportedStatus::Error,
        _ => {
            return Err(error_response(
                StatusCode::BAD_REQUEST,
                "status must be 'finished' or 'error'",
            ));
        }
    };

    if let Some(reported) = payload.suppliers_count {
        // Advisory only; the policy always recounts the stored matches.
        tracing::debug!(solution_id, reported, "callback reported supplier count");
    }

    let outcome = state
        .service
        .lock()
        .await
        .callback(
            &solution_id,
            CompletionReport {
                status,
                error_message: payload.error_message,
            },
        )
        .await
        .map_err(map_error)?;

    Ok(Json(CallbackResponse {
        success: true,
        outcome,
    }))
}

/// Pull path: scheduler-invoked staleness sweep, or a forced check of one
/// named search.
async fn handle_monitor(
    State(state): State<HttpState>,
    headers: HeaderMap,
    Query(query): Query<MonitorQuery>,
) -> Result<Json<MonitorResponse>, (StatusCode, Json<ErrorBody>)> {
    authenticate(&state, &headers)?;

    match query.action.as_deref() {
        Some("check_all") => {
            let summary: SweepSummary = state
                .service
                .lock()
                .await
                .sweep(query.delay)
                .await
                .map_err(map_error)?;
            Ok(Json(MonitorResponse {
                success: true,
                checked: summary.checked,
                results: summary.results,
            }))
        }
        Some("check_one") => {
            let solution_id = query
                .solution_id
                .filter(|solution_id| !solution_id.trim().is_empty())
                .ok_or_else(|| {
                    error_response(StatusCode::BAD_REQUEST, "solution_id is required")
                })?;
            let outcome = state
                .service
                .lock()
                .await
                .check_one(&solution_id)
                .await
                .map_err(map_error)?;
            Ok(Json(MonitorResponse {
                success: true,
                checked: 1,
                results: vec![outcome],
            }))
        }
        _ => Err(error_response(
            StatusCode::BAD_REQUEST,
            "action must be 'check_all' or 'check_one'",
        )),
    }
}

/// External worker's write path for supplier matches, guarded like the
/// callback.
async fn handle_ingest(
    State(state): State<HttpState>,
    headers: HeaderMap,
    Json(payload): Json<IngestRequest>,
) -> Result<Json<IngestResponse>, (StatusCode, Json<ErrorBody>)> {
    require_callback_secret(&state, &headers)?;

    let solution_id = payload
        .solution_id
        .filter(|solution_id| !solution_id.trim().is_empty())
        .ok_or_else(|| error_response(StatusCode::BAD_REQUEST, "solution_id is required"))?;
    let names: Vec<String> = payload
        .suppliers
        .into_iter()
        .map(|supplier| supplier.name)
        .collect();

    let inserted = state
        .service
        .lock()
        .await
        .ingest_matches(&solution_id, &names)
        .await
        .map_err(map_error)?;

    Ok(Json(IngestResponse {
        success: true,
        inserted,
    }))
}

/// Echoes back an allow-listed origin and answers preflights. A wildcard is
/// never sent because responses allow credentials.
async fn cors(State(state): State<HttpState>, request: Request, next: Next) -> Response {
    let origin = request
        .headers()
        .get("origin")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let allowed = origin.filter(|origin| {
        state
            .config
            .allowed_origins
            .iter()
            .any(|candidate| candidate == origin)
    });

    if request.method() == Method::OPTIONS {
        let mut response = StatusCode::NO_CONTENT.into_response();
        apply_cors_headers(&mut response, allowed.as_deref());
        return response;
    }

    let mut response = next.run(request).await;
    apply_cors_headers(&mut response, allowed.as_deref());
    response
}

fn apply_cors_headers(response: &mut Response, origin: Option<&str>) {
    let Some(origin) = origin else {
        return;
    };
    let Ok(origin_value) = HeaderValue::from_str(origin) else {
        return;
    };
    let headers = response.headers_mut();
    headers.insert("access-control-allow-origin", origin_value);
    headers.insert(
        "access-control-allow-methods",
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(
        "access-control-allow-headers",
        HeaderValue::from_static("authorization, content-type, x-request-id, x-callback-secret"),
    );
    headers.insert(
        "access-control-allow-credentials",
        HeaderValue::from_static("true"),
    );
    headers.insert("vary", HeaderValue::from_static("origin"));
}

fn authenticate(
    state: &HttpState,
    headers: &HeaderMap,
) -> Result<String, (StatusCode, Json<ErrorBody>)> {
    let token =
        extract_bearer(headers).ok_or_else(|| map_error(ServiceError::Authentication))?;
    state
        .config
        .user_for_token(&token)
        .map(str::to_string)
        .ok_or_else(|| map_error(ServiceError::Authentication))
}

fn require_callback_secret(
    state: &HttpState,
    headers: &HeaderMap,
) -> Result<(), (StatusCode, Json<ErrorBody>)> {
    let Some(expected) = state.config.callback_secret.as_deref() else {
        return Ok(());
    };
    let supplied = extract_header(headers, "x-callback-secret");
    if supplied.as_deref() == Some(expected) {
        Ok(())
    } else {
        Err(error_response(
            StatusCode::UNAUTHORIZED,
            "invalid callback secret",
        ))
    }
}

fn extract_bearer(headers: &HeaderMap) -> Option<String> {
    let auth = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())?
        .trim()
        .to_string();
    let rest = auth
        .strip_prefix("Bearer ")
        .or_else(|| auth.strip_prefix("bearer "))?;
    let token = rest.trim();
    (!token.is_empty()).then(|| token.to_string())
}

fn extract_header(headers: &HeaderMap, name: &str) -> Option<String> {
    let value = headers.get(name).and_then(|value| value.to_str().ok())?;
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn map_error(err: ServiceError) -> (StatusCode, Json<ErrorBody>) {
    let status = match &err {
        ServiceError::Authentication => StatusCode::UNAUTHORIZED,
        ServiceError::Validation { .. } => StatusCode::BAD_REQUEST,
        ServiceError::NotFound { .. } => StatusCode::NOT_FOUND,
        ServiceError::QuotaExceeded { .. } => StatusCode::FORBIDDEN,
        ServiceError::DuplicateRequest { .. } => StatusCode::CONFLICT,
        ServiceError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, err.to_string())
}

fn error_response(
    status: StatusCode,
    message: impl Into<String>,
) -> (StatusCode, Json<ErrorBody>) {
    (
        status,
        Json(ErrorBody {
            success: false,
            error: message.into(),
        }),
    )
}
