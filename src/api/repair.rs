use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;

use super::{Actor, ApiError, Json, Path, Query, SharedState, found};
use crate::models::{NewFaultType, NewRepairOrder, RepairCompletion, RepairOrderFilter};
use crate::permissions::ensure_same_hospital;

#[derive(Deserialize)]
pub struct DispatchOrder {
    pub maintainer_id: i64,
    pub message: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct CloseOrder {
    pub rating: Option<i32>,
    pub comment: Option<String>,
}

#[derive(Deserialize)]
pub struct CancelOrder {
    pub reason: String,
}

pub async fn list_fault_types(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(hospital_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    ensure_same_hospital(&actor, hospital_id)?;
    let types = state
        .db
        .call(move |db| db.list_fault_types(hospital_id))
        .await?;
    Ok(Json(types))
}

pub async fn create_fault_type(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(hospital_id): Path<i64>,
    Json(req): Json<NewFaultType>,
) -> Result<impl IntoResponse, ApiError> {
    let fault_type = state
        .db
        .call(move |db| db.create_fault_type(&actor, hospital_id, &req))
        .await?;
    Ok((StatusCode::CREATED, Json(fault_type)))
}

pub async fn list_orders(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(hospital_id): Path<i64>,
    Query(filter): Query<RepairOrderFilter>,
) -> Result<impl IntoResponse, ApiError> {
    ensure_same_hospital(&actor, hospital_id)?;
    let orders = state
        .db
        .call(move |db| db.list_orders(hospital_id, &filter))
        .await?;
    Ok(Json(orders))
}

pub async fn create_order(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(hospital_id): Path<i64>,
    Json(req): Json<NewRepairOrder>,
) -> Result<impl IntoResponse, ApiError> {
    ensure_same_hospital(&actor, hospital_id)?;
    let prefix = state.config.numbering.repair_order_prefix.clone();
    let today = chrono::Local::now().date_naive();
    let order = state
        .db
        .call(move |db| db.create_order(&actor, &req, &prefix, today))
        .await?;
    Ok((StatusCode::CREATED, Json(order)))
}

pub async fn order_stats(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(hospital_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    ensure_same_hospital(&actor, hospital_id)?;
    let stats = state.db.call(move |db| db.order_stats(hospital_id)).await?;
    Ok(Json(stats))
}

pub async fn get_order(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let detail = state.db.call(move |db| db.get_order_detail(id)).await?;
    let detail = found(detail, "Repair order", id)?;
    ensure_same_hospital(&actor, detail.order.hospital_id)?;
    Ok(Json(detail))
}

pub async fn dispatch_order(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(id): Path<i64>,
    Json(req): Json<DispatchOrder>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state
        .db
        .call(move |db| {
            db.dispatch_order(&actor, id, req.maintainer_id, req.message.as_deref())
        })
        .await?;
    Ok(Json(order))
}

pub async fn complete_order(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(id): Path<i64>,
    Json(req): Json<RepairCompletion>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state
        .db
        .call(move |db| db.complete_order(&actor, id, &req))
        .await?;
    Ok(Json(order))
}

pub async fn close_order(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(id): Path<i64>,
    Json(req): Json<CloseOrder>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state
        .db
        .call(move |db| db.close_order(&actor, id, req.rating, req.comment.as_deref()))
        .await?;
    Ok(Json(order))
}

pub async fn cancel_order(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(id): Path<i64>,
    Json(req): Json<CancelOrder>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state
        .db
        .call(move |db| db.cancel_order(&actor, id, &req.reason))
        .await?;
    Ok(Json(order))
}
