use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;

use super::{Actor, ApiError, Json, MaybeActor, Path, Query, SharedState, found};
use crate::models::{DepartmentInput, NewHospital, NewStaff, StaffUpdate};
use crate::permissions::ensure_same_hospital;

#[derive(Deserialize)]
pub struct StaffQuery {
    pub department_id: Option<i64>,
}

#[derive(Deserialize)]
pub struct SetActive {
    pub active: bool,
}

pub async fn list_hospitals(
    State(state): State<SharedState>,
) -> Result<impl IntoResponse, ApiError> {
    let hospitals = state.db.call(|db| db.list_hospitals()).await?;
    Ok(Json(hospitals))
}

pub async fn create_hospital(
    State(state): State<SharedState>,
    Json(req): Json<NewHospital>,
) -> Result<impl IntoResponse, ApiError> {
    let hospital = state.db.call(move |db| db.create_hospital(&req)).await?;
    Ok((StatusCode::CREATED, Json(hospital)))
}

pub async fn get_hospital(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let hospital = state.db.call(move |db| db.get_hospital(id)).await?;
    Ok(Json(found(hospital, "Hospital", id)?))
}

pub async fn list_departments(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(hospital_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    ensure_same_hospital(&actor, hospital_id)?;
    let departments = state
        .db
        .call(move |db| db.list_departments(hospital_id))
        .await?;
    Ok(Json(departments))
}

pub async fn create_department(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(hospital_id): Path<i64>,
    Json(req): Json<DepartmentInput>,
) -> Result<impl IntoResponse, ApiError> {
    let department = state
        .db
        .call(move |db| db.create_department(&actor, hospital_id, &req))
        .await?;
    Ok((StatusCode::CREATED, Json(department)))
}

pub async fn update_department(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(id): Path<i64>,
    Json(req): Json<DepartmentInput>,
) -> Result<impl IntoResponse, ApiError> {
    let department = state
        .db
        .call(move |db| db.update_department(&actor, id, &req))
        .await?;
    Ok(Json(department))
}

pub async fn list_staff(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(hospital_id): Path<i64>,
    Query(query): Query<StaffQuery>,
) -> Result<impl IntoResponse, ApiError> {
    ensure_same_hospital(&actor, hospital_id)?;
    let staff = state
        .db
        .call(move |db| db.list_staff(hospital_id, query.department_id))
        .await?;
    Ok(Json(staff))
}

/// The first staff member of a hospital may be created without an identity;
/// they become its admin.
pub async fn create_staff(
    State(state): State<SharedState>,
    MaybeActor(actor): MaybeActor,
    Path(hospital_id): Path<i64>,
    Json(req): Json<NewStaff>,
) -> Result<impl IntoResponse, ApiError> {
    let staff = state
        .db
        .call(move |db| db.create_staff(actor.as_ref(), hospital_id, &req))
        .await?;
    Ok((StatusCode::CREATED, Json(staff)))
}

pub async fn get_staff(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let staff = found(state.db.call(move |db| db.get_staff(id)).await?, "Staff", id)?;
    ensure_same_hospital(&actor, staff.hospital_id)?;
    Ok(Json(staff))
}

pub async fn update_staff(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(id): Path<i64>,
    Json(req): Json<StaffUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    let staff = state
        .db
        .call(move |db| db.update_staff(&actor, id, &req))
        .await?;
    Ok(Json(staff))
}

pub async fn set_staff_active(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(id): Path<i64>,
    Json(req): Json<SetActive>,
) -> Result<impl IntoResponse, ApiError> {
    let staff = state
        .db
        .call(move |db| db.set_staff_active(&actor, id, req.active))
        .await?;
    Ok(Json(staff))
}
