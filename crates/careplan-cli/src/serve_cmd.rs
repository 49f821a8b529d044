use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{FromRequest, FromRequestParts, Path, Request, State};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use careplan_core::{CreatedSuggestion, PlanLedger, SuggestionWorkflow, WorkflowError};
use careplan_db::PlanContent;
use careplan_db::models::{PlanSuggestion, PlanVersion};

/// Header carrying the authenticated clinician's identity. Authentication
/// itself happens upstream of this service.
pub const USER_HEADER: &str = "x-careplan-user";

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

pub struct AppError {
    status: StatusCode,
    message: String,
    kind: &'static str,
    extra: Option<serde_json::Value>,
}

impl AppError {
    fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            kind,
            extra: None,
        }
    }

    pub fn unauthorized() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            format!("missing {USER_HEADER} header"),
        )
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", msg)
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "validation", msg)
    }
}

impl From<WorkflowError> for AppError {
    fn from(err: WorkflowError) -> Self {
        let kind = err.kind();
        let message = err.to_string();
        match err {
            WorkflowError::Validation(_) => Self::new(StatusCode::BAD_REQUEST, kind, message),
            WorkflowError::NotFound { .. } => Self::new(StatusCode::NOT_FOUND, kind, message),
            WorkflowError::AlreadyExists { .. } => Self::new(StatusCode::CONFLICT, kind, message),
            WorkflowError::SafetyBlocked(verdict) => Self {
                extra: Some(serde_json::json!({
                    "status": "blocked",
                    "safetyResult": verdict,
                })),
                ..Self::new(StatusCode::UNPROCESSABLE_ENTITY, kind, message)
            },
            WorkflowError::AlreadyReviewed { status, .. } => Self {
                extra: Some(serde_json::json!({ "currentStatus": status })),
                ..Self::new(StatusCode::CONFLICT, kind, message)
            },
            WorkflowError::VersionConflict { found, .. } => Self {
                extra: Some(serde_json::json!({ "currentVersion": found })),
                ..Self::new(StatusCode::CONFLICT, kind, message)
            },
            WorkflowError::UpstreamGeneration(_) => Self::new(StatusCode::BAD_GATEWAY, kind, message),
            WorkflowError::Cancelled => Self::new(StatusCode::SERVICE_UNAVAILABLE, kind, message),
            WorkflowError::Persistence(e) => {
                tracing::error!(error = %e, "persistence failure");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    kind,
                    "internal persistence error",
                )
            }
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::validation(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        Self::validation(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let mut body = serde_json::json!({ "error": self.message, "kind": self.kind });
        if let (Some(serde_json::Value::Object(extra)), Some(map)) =
            (self.extra, body.as_object_mut())
        {
            map.extend(extra);
        }
        (self.status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// The clinician making the request, from [`USER_HEADER`].
pub struct Clinician(pub String);

impl<S> FromRequestParts<S> for Clinician
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| Clinician(v.to_string()))
            .ok_or_else(AppError::unauthorized)
    }
}

// ---------------------------------------------------------------------------
// Extractors
// ---------------------------------------------------------------------------

/// [`Path`] whose rejection is reported as an [`AppError`].
pub struct ApiPath<T>(pub T);

impl<S, T> FromRequestParts<S> for ApiPath<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(value) = Path::<T>::from_request_parts(parts, state).await?;
        Ok(ApiPath(value))
    }
}

/// [`Json`] body whose rejection is reported as an [`AppError`].
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(ApiJson(value))
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    workflow: Arc<SuggestionWorkflow>,
    ledger: Arc<PlanLedger>,
    /// Fires on shutdown; in-flight analyses are abandoned.
    shutdown: CancellationToken,
}

impl AppState {
    pub fn new(workflow: SuggestionWorkflow, ledger: PlanLedger) -> Self {
        Self {
            workflow: Arc::new(workflow),
            ledger: Arc::new(ledger),
            shutdown: CancellationToken::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeResponse {
    #[serde(flatten)]
    pub created: CreatedSuggestion,
    pub requires_review: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingResponse {
    pub suggestion: Option<PlanSuggestion>,
    pub current_plan: Option<PlanVersion>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalResponse {
    pub suggestion: PlanSuggestion,
    pub plan_version: PlanVersion,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanVersionResponse {
    pub plan_version: PlanVersion,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectRequest {
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePlanRequest {
    #[serde(default)]
    pub content: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualEditRequest {
    pub content: serde_json::Value,
    pub base_version: i32,
    #[serde(default)]
    pub reason: Option<String>,
}

fn parse_content(value: serde_json::Value) -> Result<PlanContent, AppError> {
    PlanContent::from_json(value).map_err(|e| AppError::validation(e.to_string()))
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/sessions/{id}/analyze",
            post(analyze_session).get(pending_for_session),
        )
        .route("/api/suggestions/{id}", get(get_suggestion))
        .route("/api/suggestions/{id}/approve", post(approve_suggestion))
        .route("/api/suggestions/{id}/reject", post(reject_suggestion))
        .route("/api/patients/{id}/plan", post(create_plan))
        .route(
            "/api/plans/{id}/versions",
            get(list_versions).post(commit_manual_edit),
        )
        .route("/api/plans/{id}/current", get(current_version))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub async fn run_serve(state: AppState, bind: &str, port: u16) -> Result<()> {
    let shutdown = state.shutdown.clone();
    let app = build_router(state);
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    tracing::info!("careplan serve listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;
    tracing::info!("careplan serve shut down");
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl+C; shutting down");
    }
    shutdown.cancel();
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn analyze_session(
    State(state): State<AppState>,
    Clinician(user): Clinician,
    ApiPath(session_id): ApiPath<Uuid>,
) -> Result<axum::response::Response, AppError> {
    let created = state
        .workflow
        .create_suggestion_cancellable(session_id, &user, state.shutdown.child_token())
        .await?;
    let status = if created.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    let body = AnalyzeResponse {
        created,
        requires_review: true,
    };
    Ok((status, Json(body)).into_response())
}

async fn pending_for_session(
    State(state): State<AppState>,
    _user: Clinician,
    ApiPath(session_id): ApiPath<Uuid>,
) -> Result<Json<PendingResponse>, AppError> {
    let suggestion = state.workflow.get_pending_suggestion(session_id).await?;
    let current_plan = match &suggestion {
        Some(s) => state.ledger.current_version(s.treatment_plan_id).await?,
        None => None,
    };
    Ok(Json(PendingResponse {
        suggestion,
        current_plan,
    }))
}

async fn get_suggestion(
    State(state): State<AppState>,
    _user: Clinician,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<PlanSuggestion>, AppError> {
    Ok(Json(state.workflow.get_suggestion(id).await?))
}

async fn approve_suggestion(
    State(state): State<AppState>,
    Clinician(user): Clinician,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<ApprovalResponse>, AppError> {
    let approval = state.workflow.approve(id, &user).await?;
    Ok(Json(ApprovalResponse {
        suggestion: approval.suggestion,
        plan_version: approval.version,
    }))
}

async fn reject_suggestion(
    State(state): State<AppState>,
    Clinician(user): Clinician,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(req): ApiJson<RejectRequest>,
) -> Result<Json<PlanSuggestion>, AppError> {
    Ok(Json(state.workflow.reject(id, &user, &req.reason).await?))
}

async fn create_plan(
    State(state): State<AppState>,
    Clinician(user): Clinician,
    ApiPath(patient_id): ApiPath<Uuid>,
    ApiJson(req): ApiJson<CreatePlanRequest>,
) -> Result<axum::response::Response, AppError> {
    let content = match req.content {
        Some(value) => parse_content(value)?,
        None => PlanContent::default(),
    };
    let version = state
        .ledger
        .create_initial(patient_id, &content, Some(&user))
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(PlanVersionResponse {
            plan_version: version,
        }),
    )
        .into_response())
}

async fn list_versions(
    State(state): State<AppState>,
    _user: Clinician,
    ApiPath(plan_id): ApiPath<Uuid>,
) -> Result<Json<Vec<PlanVersion>>, AppError> {
    Ok(Json(state.ledger.history(plan_id).await?))
}

async fn current_version(
    State(state): State<AppState>,
    _user: Clinician,
    ApiPath(plan_id): ApiPath<Uuid>,
) -> Result<Json<PlanVersion>, AppError> {
    state
        .ledger
        .current_version(plan_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("treatment plan {plan_id} has no versions")))
}

async fn commit_manual_edit(
    State(state): State<AppState>,
    Clinician(user): Clinician,
    ApiPath(plan_id): ApiPath<Uuid>,
    ApiJson(req): ApiJson<ManualEditRequest>,
) -> Result<axum::response::Response, AppError> {
    let content = parse_content(req.content)?;
    let version = state
        .ledger
        .commit_manual_edit(plan_id, &content, req.base_version, &user, req.reason.as_deref())
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(PlanVersionResponse {
            plan_version: version,
        }),
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
