use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};

use super::{Actor, ApiError, Json, Path, SharedState, found};
use crate::models::{FlowDetail, MilestoneInput, NewFlow};
use crate::permissions::ensure_same_hospital;

/// Flow detail through the look-aside cache.
async fn load_flow(state: &SharedState, id: i64) -> Result<FlowDetail, ApiError> {
    if let Some(detail) = state.flow_cache.get(&id) {
        tracing::trace!(flow_id = id, "flow cache hit");
        return Ok(detail);
    }
    let seen = state.flow_cache.epoch();
    let detail = state.db.call(move |db| db.get_flow_detail(id)).await?;
    let detail = found(detail, "Flow", id)?;
    if !state.flow_cache.insert_if_fresh(id, detail.clone(), seen) {
        tracing::debug!(flow_id = id, "flow changed during load, not cached");
    }
    Ok(detail)
}

pub async fn list_flows(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(hospital_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    ensure_same_hospital(&actor, hospital_id)?;
    let flows = state.db.call(move |db| db.list_flows(hospital_id)).await?;
    Ok(Json(flows))
}

pub async fn create_flow(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(hospital_id): Path<i64>,
    Json(req): Json<NewFlow>,
) -> Result<impl IntoResponse, ApiError> {
    let detail = state
        .db
        .call(move |db| db.create_flow(&actor, hospital_id, &req))
        .await?;
    if detail.flow.default_flow {
        // The previous default lost its flag.
        state.flow_cache.clear();
    }
    Ok((StatusCode::CREATED, Json(detail)))
}

pub async fn get_flow(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let detail = load_flow(&state, id).await?;
    ensure_same_hospital(&actor, detail.flow.hospital_id)?;
    Ok(Json(detail))
}

pub async fn add_milestone(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(id): Path<i64>,
    Json(req): Json<MilestoneInput>,
) -> Result<impl IntoResponse, ApiError> {
    let milestone = state
        .db
        .call(move |db| db.add_milestone(&actor, id, &req))
        .await?;
    state.flow_cache.invalidate(&id);
    Ok((StatusCode::CREATED, Json(milestone)))
}

pub async fn set_default_flow(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let flow = state
        .db
        .call(move |db| db.set_default_flow(&actor, id))
        .await?;
    state.flow_cache.clear();
    Ok(Json(flow))
}

pub async fn delete_flow(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state.db.call(move |db| db.delete_flow(&actor, id)).await?;
    state.flow_cache.invalidate(&id);
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::super::tests::{bootstrap, hire, send, test_app};
    use axum::http::StatusCode;
    use serde_json::{Value, json};

    fn procurement() -> Value {
        json!({
            "title": "Procurement",
            "default_flow": true,
            "milestones": [
                {"title": "Requirement"},
                {"title": "Purchase", "children": [{"title": "Tender"}, {"title": "Contract"}]},
                {"title": "Acceptance"}
            ]
        })
    }

    #[tokio::test]
    async fn test_create_flow_returns_tree() {
        let app = test_app();
        let (hid, admin) = bootstrap(&app).await;

        let (status, detail) = send(
            &app,
            "POST",
            &format!("/api/hospitals/{}/flows", hid),
            Some(admin),
            Some(procurement()),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(detail["default_flow"], true);
        let roots = detail["milestones"].as_array().unwrap();
        assert_eq!(roots.len(), 3);
        assert_eq!(roots[1]["title"], "Purchase");
        assert_eq!(roots[1]["children"][1]["title"], "Contract");

        let (status, _) = send(
            &app,
            "POST",
            &format!("/api/hospitals/{}/flows", hid),
            Some(admin),
            Some(json!({"title": "Empty", "milestones": []})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_added_milestone_is_visible_after_cached_read() {
        let app = test_app();
        let (hid, admin) = bootstrap(&app).await;
        let (_, detail) = send(
            &app,
            "POST",
            &format!("/api/hospitals/{}/flows", hid),
            Some(admin),
            Some(procurement()),
        )
        .await;
        let id = detail["id"].as_i64().unwrap();

        // Warm the cache.
        let (status, _) = send(&app, "GET", &format!("/api/flows/{}", id), Some(admin), None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, milestone) = send(
            &app,
            "POST",
            &format!("/api/flows/{}/milestones", id),
            Some(admin),
            Some(json!({"title": "Archive"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(milestone["index"], 3);

        let (_, detail) = send(&app, "GET", &format!("/api/flows/{}", id), Some(admin), None).await;
        let roots = detail["milestones"].as_array().unwrap();
        assert_eq!(roots.len(), 4);
        assert_eq!(roots[3]["title"], "Archive");
    }

    #[tokio::test]
    async fn test_default_flag_moves_and_cache_follows() {
        let app = test_app();
        let (hid, admin) = bootstrap(&app).await;
        let (_, first) = send(
            &app,
            "POST",
            &format!("/api/hospitals/{}/flows", hid),
            Some(admin),
            Some(procurement()),
        )
        .await;
        let first_id = first["id"].as_i64().unwrap();
        let (_, second) = send(
            &app,
            "POST",
            &format!("/api/hospitals/{}/flows", hid),
            Some(admin),
            Some(json!({"title": "Software", "milestones": [{"title": "Build"}]})),
        )
        .await;
        let second_id = second["id"].as_i64().unwrap();
        assert_eq!(second["default_flow"], false);

        let (status, flow) = send(&app, "POST", &format!("/api/flows/{}/default", second_id), Some(admin), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(flow["default_flow"], true);

        let (_, first) = send(&app, "GET", &format!("/api/flows/{}", first_id), Some(admin), None).await;
        assert_eq!(first["default_flow"], false);

        let (_, list) = send(&app, "GET", &format!("/api/hospitals/{}/flows", hid), Some(admin), None).await;
        assert_eq!(list[0]["id"], second_id);
    }

    #[tokio::test]
    async fn test_delete_flow_and_permissions() {
        let app = test_app();
        let (hid, admin) = bootstrap(&app).await;
        let nurse = hire(&app, hid, admin, "nurse", json!([])).await;
        let (status, _) = send(
            &app,
            "POST",
            &format!("/api/hospitals/{}/flows", hid),
            Some(nurse),
            Some(procurement()),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (_, detail) = send(
            &app,
            "POST",
            &format!("/api/hospitals/{}/flows", hid),
            Some(admin),
            Some(procurement()),
        )
        .await;
        let id = detail["id"].as_i64().unwrap();
        let (status, _) = send(&app, "DELETE", &format!("/api/flows/{}", id), Some(admin), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&app, "GET", &format!("/api/flows/{}", id), Some(admin), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
