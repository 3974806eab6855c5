//! API Handlers
use crate::error::ApiError;
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tgen_core::{Run, RunFilter, RunId, RunMode, Stage, StepHistoryEntry, TGEN_VERSION};

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRunRequest {
    pub project_id: String,
    pub branch: String,
    #[serde(default = "default_mode")]
    pub mode: RunMode,
}

fn default_mode() -> RunMode {
    RunMode::Manual
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRunResponse {
    pub run_id: RunId,
    pub state: Stage,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveTestCasesRequest {
    pub approved_ids: Vec<String>,
}

/// Run projection with the display fields derived from its stage, so
/// clients never keep their own stage-to-step tables.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunView {
    #[serde(flatten)]
    pub run: Run,
    /// Position in the pipeline; for a failed run, the stage it failed in
    pub step_index: Option<usize>,
    pub awaiting_input: bool,
}

impl From<Run> for RunView {
    fn from(run: Run) -> Self {
        Self {
            step_index: run
                .state
                .index()
                .or_else(|| run.failed_stage.and_then(Stage::index)),
            awaiting_input: run.state.is_gate(),
            run,
        }
    }
}

pub async fn submit_run(
    State(state): State<AppState>,
    Json(req): Json<SubmitRunRequest>,
) -> ApiResult<(StatusCode, Json<SubmitRunResponse>)> {
    let run = state
        .service
        .submit(&req.project_id, &req.branch, req.mode)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(SubmitRunResponse {
            run_id: run.id,
            state: run.state,
        }),
    ))
}

pub async fn list_runs(
    State(state): State<AppState>,
    Query(filter): Query<RunFilter>,
) -> ApiResult<Json<Vec<RunView>>> {
    let runs = state.service.list(&filter).await?;
    Ok(Json(runs.into_iter().map(RunView::from).collect()))
}

pub async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<RunId>,
) -> ApiResult<Json<RunView>> {
    Ok(Json(state.service.get(id).await?.into()))
}

pub async fn get_steps(
    State(state): State<AppState>,
    Path(id): Path<RunId>,
) -> ApiResult<Json<Vec<StepHistoryEntry>>> {
    Ok(Json(state.service.steps(id).await?))
}

pub async fn approve_test_cases(
    State(state): State<AppState>,
    Path(id): Path<RunId>,
    Json(req): Json<ApproveTestCasesRequest>,
) -> ApiResult<Json<RunView>> {
    let run = state
        .service
        .approve_test_cases(id, &req.approved_ids)
        .await?;
    Ok(Json(run.into()))
}

pub async fn reject_test_cases(
    State(state): State<AppState>,
    Path(id): Path<RunId>,
) -> ApiResult<Json<RunView>> {
    Ok(Json(state.service.reject_test_cases(id).await?.into()))
}

pub async fn approve_report(
    State(state): State<AppState>,
    Path(id): Path<RunId>,
) -> ApiResult<Json<RunView>> {
    Ok(Json(state.service.approve_report(id).await?.into()))
}

pub async fn reject_report(
    State(state): State<AppState>,
    Path(id): Path<RunId>,
) -> ApiResult<Json<RunView>> {
    Ok(Json(state.service.reject_report(id).await?.into()))
}

pub async fn cancel_run(
    State(state): State<AppState>,
    Path(id): Path<RunId>,
) -> ApiResult<Json<RunView>> {
    Ok(Json(state.service.cancel(id).await?.into()))
}

pub async fn retry_run(
    State(state): State<AppState>,
    Path(id): Path<RunId>,
) -> ApiResult<Json<RunView>> {
    Ok(Json(state.service.retry(id).await?.into()))
}

pub async fn resubmit_run(
    State(state): State<AppState>,
    Path(id): Path<RunId>,
) -> ApiResult<(StatusCode, Json<SubmitRunResponse>)> {
    let run = state.service.resubmit(id).await?;
    Ok((
        StatusCode::CREATED,
        Json(SubmitRunResponse {
            run_id: run.id,
            state: run.state,
        }),
    ))
}

pub async fn dispatch_run(
    State(state): State<AppState>,
    Path(id): Path<RunId>,
) -> ApiResult<(StatusCode, Json<RunView>)> {
    let run = state.service.dispatch(id).await?;
    Ok((StatusCode::ACCEPTED, Json(run.into())))
}

pub async fn health() -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(json!({ "status": "ok", "version": TGEN_VERSION })),
    )
}

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, "text/plain")],
            e.to_string(),
        ),
    }
}
