use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;

use super::{Actor, ApiError, Json, Path, Query, SharedState, found};
use crate::errors::AdminError;
use crate::models::{NewProject, ProjectDispatch, ProjectFilter, ProjectUpdate};
use crate::permissions::ensure_same_hospital;

#[derive(Deserialize)]
pub struct Redispatch {
    pub performer_id: i64,
    pub assistant_id: Option<i64>,
}

#[derive(Deserialize)]
pub struct ChangeMilestone {
    pub milestone_id: i64,
    #[serde(default)]
    pub summary: String,
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct Finish {
    pub summary: String,
}

#[derive(Deserialize)]
pub struct Overrule {
    pub reason: String,
}

pub async fn list_projects(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(hospital_id): Path<i64>,
    Query(filter): Query<ProjectFilter>,
) -> Result<impl IntoResponse, ApiError> {
    ensure_same_hospital(&actor, hospital_id)?;
    let projects = state
        .db
        .call(move |db| db.list_projects(hospital_id, &filter))
        .await?;
    Ok(Json(projects))
}

pub async fn create_project(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(hospital_id): Path<i64>,
    Json(req): Json<NewProject>,
) -> Result<impl IntoResponse, ApiError> {
    let project = state
        .db
        .call(move |db| db.create_project(&actor, hospital_id, &req))
        .await?;
    Ok((StatusCode::CREATED, Json(project)))
}

pub async fn get_project(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let detail = state.db.call(move |db| db.get_project_detail(id)).await?;
    let detail = found(detail, "Project", id)?;
    ensure_same_hospital(&actor, detail.project.hospital_id)?;
    Ok(Json(detail))
}

pub async fn update_project(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(id): Path<i64>,
    Json(req): Json<ProjectUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    let project = state
        .db
        .call(move |db| db.update_project(&actor, id, &req))
        .await?;
    Ok(Json(project))
}

pub async fn dispatch_project(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(id): Path<i64>,
    Json(req): Json<ProjectDispatch>,
) -> Result<impl IntoResponse, ApiError> {
    let project = state
        .db
        .call(move |db| db.dispatch_project(&actor, id, &req))
        .await?;
    Ok(Json(project))
}

pub async fn redispatch_project(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(id): Path<i64>,
    Json(req): Json<Redispatch>,
) -> Result<impl IntoResponse, ApiError> {
    let project = state
        .db
        .call(move |db| db.redispatch_project(&actor, id, req.performer_id, req.assistant_id))
        .await?;
    Ok(Json(project))
}

pub async fn change_milestone(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(id): Path<i64>,
    Json(req): Json<ChangeMilestone>,
) -> Result<impl IntoResponse, ApiError> {
    let project = state
        .db
        .call(move |db| db.change_milestone(&actor, id, req.milestone_id, &req.summary))
        .await?;
    Ok(Json(project))
}

pub async fn finish_project(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(id): Path<i64>,
    Json(req): Json<Finish>,
) -> Result<impl IntoResponse, ApiError> {
    let project = state
        .db
        .call(move |db| db.finish_project(&actor, id, &req.summary))
        .await?;
    Ok(Json(project))
}

pub async fn pause_project(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let project = state.db.call(move |db| db.pause_project(&actor, id)).await?;
    Ok(Json(project))
}

pub async fn resume_project(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let project = state.db.call(move |db| db.resume_project(&actor, id)).await?;
    Ok(Json(project))
}

pub async fn overrule_project(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(id): Path<i64>,
    Json(req): Json<Overrule>,
) -> Result<impl IntoResponse, ApiError> {
    let project = state
        .db
        .call(move |db| db.overrule_project(&actor, id, &req.reason))
        .await?;
    Ok(Json(project))
}

pub async fn project_records(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let records = state
        .db
        .call(move |db| {
            let project = db
                .get_project(id)?
                .ok_or_else(|| AdminError::not_found("Project", id))?;
            ensure_same_hospital(&actor, project.hospital_id)?;
            db.project_timeline(id)
        })
        .await?;
    Ok(Json(records))
}
