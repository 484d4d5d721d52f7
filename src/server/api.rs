use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use forge_common::{Artifact, ForgeError, JobId, JobState, ProgressEvent, ProjectId};

use crate::runtime::{self, SharedOrchestrator};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub orchestrator: SharedOrchestrator,
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
}

#[derive(Deserialize)]
pub struct StartJobRequest {
    pub provider: String,
}

/// Progress pushed by an external backend.
#[derive(Deserialize)]
pub struct ProgressRequest {
    pub sequence: u64,
    pub stage: String,
    pub fraction: f64,
    #[serde(default)]
    pub message: Option<String>,
}

/// Final outcome pushed by an external backend: exactly one of the fields.
#[derive(Deserialize)]
pub struct ResultRequest {
    #[serde(default)]
    pub artifact: Option<Artifact>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub job_id: JobId,
    pub state: JobState,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    Conflict(String),
    Unprocessable(String),
    BadRequest(String),
    BadGateway(String),
    Internal(String),
}

impl From<ForgeError> for ApiError {
    fn from(err: ForgeError) -> Self {
        let message = err.to_string();
        match err {
            ForgeError::NotFound { .. } | ForgeError::UnknownProvider(_) => {
                ApiError::NotFound(message)
            }
            ForgeError::Conflict { .. }
            | ForgeError::InvalidState { .. }
            | ForgeError::NotReady { .. } => ApiError::Conflict(message),
            ForgeError::OutOfOrderProgress { .. }
            | ForgeError::InvalidProgress { .. }
            | ForgeError::InvalidArtifact(_) => ApiError::Unprocessable(message),
            ForgeError::Provider(_) => ApiError::BadGateway(message),
            ForgeError::DuplicateProvider(_) | ForgeError::Config(_) => ApiError::Internal(message),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Unprocessable(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/projects", get(list_projects).post(create_project))
        .route(
            "/api/projects/{id}",
            get(get_project).delete(delete_project),
        )
        .route("/api/projects/{id}/jobs", get(list_jobs).post(start_job))
        .route("/api/jobs/{id}", get(get_job))
        .route(
            "/api/jobs/{id}/progress",
            get(get_progress).post(report_progress),
        )
        .route("/api/jobs/{id}/result", post(report_result))
        .route("/api/jobs/{id}/cancel", post(cancel_job))
        .route("/api/jobs/{id}/retry", post(retry_job))
        .route("/api/jobs/{id}/export", get(export_job))
        .route("/api/providers", get(list_providers))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn list_projects(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let orch = state.orchestrator.lock().await;
    let projects: Vec<_> = orch.list_projects().cloned().collect();
    Ok(Json(projects))
}

async fn create_project(
    State(state): State<SharedState>,
    Json(req): Json<CreateProjectRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(ApiError::BadRequest("Project name must not be empty".into()));
    }
    let project = state.orchestrator.lock().await.create_project(name);
    Ok((StatusCode::CREATED, Json(project)))
}

async fn get_project(
    State(state): State<SharedState>,
    Path(id): Path<ProjectId>,
) -> Result<impl IntoResponse, ApiError> {
    let orch = state.orchestrator.lock().await;
    let project = orch.get_project(id)?.clone();
    Ok(Json(project))
}

async fn delete_project(
    State(state): State<SharedState>,
    Path(id): Path<ProjectId>,
) -> Result<impl IntoResponse, ApiError> {
    state.orchestrator.lock().await.delete_project(id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_jobs(
    State(state): State<SharedState>,
    Path(id): Path<ProjectId>,
) -> Result<impl IntoResponse, ApiError> {
    let orch = state.orchestrator.lock().await;
    orch.get_project(id)?;
    let jobs: Vec<_> = orch.store().jobs_for_project(id).cloned().collect();
    Ok(Json(jobs))
}

async fn start_job(
    State(state): State<SharedState>,
    Path(id): Path<ProjectId>,
    Json(req): Json<StartJobRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let job_id = runtime::start_job(&state.orchestrator, id, &req.provider).await?;
    let job_state = state.orchestrator.lock().await.get_job(job_id)?.state;
    Ok((
        StatusCode::CREATED,
        Json(JobStatusResponse {
            job_id,
            state: job_state,
        }),
    ))
}

async fn get_job(
    State(state): State<SharedState>,
    Path(id): Path<JobId>,
) -> Result<impl IntoResponse, ApiError> {
    let orch = state.orchestrator.lock().await;
    let job = orch.get_job(id)?.clone();
    Ok(Json(job))
}

async fn get_progress(
    State(state): State<SharedState>,
    Path(id): Path<JobId>,
) -> Result<impl IntoResponse, ApiError> {
    let snapshot = state.orchestrator.lock().await.current_progress(id)?;
    Ok(Json(snapshot))
}

async fn report_progress(
    State(state): State<SharedState>,
    Path(id): Path<JobId>,
    Json(req): Json<ProgressRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut event = ProgressEvent::new(id, req.sequence, req.stage, req.fraction);
    event.message = req.message;

    let mut orch = state.orchestrator.lock().await;
    orch.report_progress(id, event)?;
    Ok(Json(orch.current_progress(id)?))
}

async fn report_result(
    State(state): State<SharedState>,
    Path(id): Path<JobId>,
    Json(req): Json<ResultRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = match (req.artifact, req.error) {
        (Some(artifact), None) => Ok(artifact),
        (None, Some(error)) => Err(error),
        _ => {
            return Err(ApiError::BadRequest(
                "Provide exactly one of 'artifact' or 'error'".into(),
            ));
        }
    };
    let job_state = state
        .orchestrator
        .lock()
        .await
        .report_provider_result(id, outcome)?;
    Ok(Json(JobStatusResponse {
        job_id: id,
        state: job_state,
    }))
}

async fn cancel_job(
    State(state): State<SharedState>,
    Path(id): Path<JobId>,
) -> Result<impl IntoResponse, ApiError> {
    let job_state = state.orchestrator.lock().await.cancel(id)?;
    Ok(Json(JobStatusResponse {
        job_id: id,
        state: job_state,
    }))
}

async fn retry_job(
    State(state): State<SharedState>,
    Path(id): Path<JobId>,
) -> Result<impl IntoResponse, ApiError> {
    let job_id = runtime::retry_job(&state.orchestrator, id).await?;
    let job_state = state.orchestrator.lock().await.get_job(job_id)?.state;
    Ok((
        StatusCode::CREATED,
        Json(JobStatusResponse {
            job_id,
            state: job_state,
        }),
    ))
}

async fn export_job(
    State(state): State<SharedState>,
    Path(id): Path<JobId>,
) -> Result<impl IntoResponse, ApiError> {
    let orch = state.orchestrator.lock().await;
    let artifact = orch.export(id)?.clone();
    Ok(Json(artifact))
}

async fn list_providers(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let orch = state.orchestrator.lock().await;
    let providers: Vec<_> = orch.registry().list().cloned().collect();
    Ok(Json(providers))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gates::{QualityGate, RuleConfig, RuleKind};
    use crate::orchestrator::JobOrchestrator;
    use crate::provider::Provider;
    use crate::registry::ProviderRegistry;
    use axum::body::Body;
    use axum::http::Request;
    use forge_common::ProviderDescriptor;
    use http_body_util::BodyExt;
    use std::collections::BTreeMap;
    use tokio::sync::Mutex;
    use tower::ServiceExt;

    fn test_app(gate: QualityGate) -> Router {
        let mut registry = ProviderRegistry::new();
        registry
            .register(
                ProviderDescriptor::new("inbox", "Inbox").with_cancel(true),
                Provider::External,
            )
            .unwrap();
        let (orchestrator, _events) = JobOrchestrator::new(Arc::new(registry), gate);
        let state = Arc::new(AppState {
            orchestrator: Arc::new(Mutex::new(orchestrator)),
        });
        api_router().with_state(state)
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    async fn started_job(app: &Router) -> (i64, i64) {
        let (_, project) = send(
            app,
            "POST",
            "/api/projects",
            Some(serde_json::json!({"name": "demo"})),
        )
        .await;
        let pid = project["id"].as_i64().unwrap();
        let (status, job) = send(
            app,
            "POST",
            &format!("/api/projects/{}/jobs", pid),
            Some(serde_json::json!({"provider": "inbox"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        (pid, job["job_id"].as_i64().unwrap())
    }

    fn artifact_body() -> serde_json::Value {
        serde_json::json!({
            "artifact": {"name": "out.md", "media_type": "text/markdown", "content": "# Out"}
        })
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = test_app(QualityGate::permissive());
        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn test_project_crud() {
        let app = test_app(QualityGate::permissive());

        let (status, projects) = send(&app, "GET", "/api/projects", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(projects.as_array().unwrap().is_empty());

        let (status, project) = send(
            &app,
            "POST",
            "/api/projects",
            Some(serde_json::json!({"name": "launch"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = project["id"].as_i64().unwrap();

        let (status, fetched) = send(&app, "GET", &format!("/api/projects/{}", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched["name"], "launch");

        let (status, _) = send(&app, "DELETE", &format!("/api/projects/{}", id), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, body) = send(&app, "GET", &format!("/api/projects/{}", id), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn test_empty_project_name_rejected() {
        let app = test_app(QualityGate::permissive());
        let (status, _) = send(
            &app,
            "POST",
            "/api/projects",
            Some(serde_json::json!({"name": "   "})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_external_job_lifecycle_over_http() {
        let app = test_app(QualityGate::permissive());
        let (pid, job) = started_job(&app).await;

        let (status, snapshot) = send(
            &app,
            "POST",
            &format!("/api/jobs/{}/progress", job),
            Some(serde_json::json!({"sequence": 1, "stage": "draft", "fraction": 0.5})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(snapshot["status"], "reported");
        assert_eq!(snapshot["fraction"], 0.5);

        let (status, result) = send(
            &app,
            "POST",
            &format!("/api/jobs/{}/result", job),
            Some(artifact_body()),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(result["state"], "completed");

        let (status, artifact) = send(&app, "GET", &format!("/api/jobs/{}/export", job), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(artifact["name"], "out.md");

        let (_, jobs) = send(&app, "GET", &format!("/api/projects/{}/jobs", pid), None).await;
        assert_eq!(jobs.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_conflict_and_out_of_order_statuses() {
        let app = test_app(QualityGate::permissive());
        let (pid, job) = started_job(&app).await;

        let (status, _) = send(
            &app,
            "POST",
            &format!("/api/projects/{}/jobs", pid),
            Some(serde_json::json!({"provider": "inbox"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let progress = serde_json::json!({"sequence": 2, "stage": "draft", "fraction": 0.5});
        let (status, body) = send(
            &app,
            "POST",
            &format!("/api/jobs/{}/progress", job),
            Some(progress),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["error"].as_str().unwrap().contains("expected sequence 1"));
    }

    #[tokio::test]
    async fn test_unknown_provider_is_not_found() {
        let app = test_app(QualityGate::permissive());
        let (_, project) = send(
            &app,
            "POST",
            "/api/projects",
            Some(serde_json::json!({"name": "demo"})),
        )
        .await;
        let (status, _) = send(
            &app,
            "POST",
            &format!("/api/projects/{}/jobs", project["id"]),
            Some(serde_json::json!({"provider": "missing"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_rejected_job_export_conflicts_and_retry_creates_new_job() {
        let mut rules = BTreeMap::new();
        rules.insert(
            "length".to_string(),
            RuleConfig::new(RuleKind::MinLength { min: 1000 }),
        );
        let app = test_app(QualityGate::from_config(&rules).unwrap());
        let (_, job) = started_job(&app).await;

        let (_, result) = send(
            &app,
            "POST",
            &format!("/api/jobs/{}/result", job),
            Some(artifact_body()),
        )
        .await;
        assert_eq!(result["state"], "failed");

        let (status, _) = send(&app, "GET", &format!("/api/jobs/{}/export", job), None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (_, stored) = send(&app, "GET", &format!("/api/jobs/{}", job), None).await;
        assert_eq!(stored["verdict"]["passed"], false);

        let (status, retried) = send(&app, "POST", &format!("/api/jobs/{}/retry", job), None).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_ne!(retried["job_id"].as_i64().unwrap(), job);
        assert_eq!(retried["state"], "running");
    }

    #[tokio::test]
    async fn test_cancel_then_late_result_is_ignored() {
        let app = test_app(QualityGate::permissive());
        let (_, job) = started_job(&app).await;

        let (status, cancelled) = send(&app, "POST", &format!("/api/jobs/{}/cancel", job), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(cancelled["state"], "cancelled");

        let (status, late) = send(
            &app,
            "POST",
            &format!("/api/jobs/{}/result", job),
            Some(artifact_body()),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(late["state"], "cancelled");
    }

    #[tokio::test]
    async fn test_result_requires_exactly_one_field() {
        let app = test_app(QualityGate::permissive());
        let (_, job) = started_job(&app).await;
        let (status, _) = send(
            &app,
            "POST",
            &format!("/api/jobs/{}/result", job),
            Some(serde_json::json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_list_providers() {
        let app = test_app(QualityGate::permissive());
        let (status, providers) = send(&app, "GET", "/api/providers", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(providers[0]["id"], "inbox");
        assert_eq!(providers[0]["capabilities"]["supports_cancel"], true);
    }

    #[tokio::test]
    async fn test_progress_for_missing_job() {
        let app = test_app(QualityGate::permissive());
        let (status, _) = send(&app, "GET", "/api/jobs/99/progress", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_forge_error_status_mapping() {
        let status = |err: ForgeError| ApiError::from(err).into_response().status();
        assert_eq!(status(ForgeError::project_not_found(1)), StatusCode::NOT_FOUND);
        assert_eq!(
            status(ForgeError::Conflict {
                project_id: 1,
                job_id: 2
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status(ForgeError::InvalidArtifact("x".into())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status(ForgeError::Provider("down".into())),
            StatusCode::BAD_GATEWAY
        );
    }
}
