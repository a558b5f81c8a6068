use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};

use super::{Actor, ApiError, Json, Path, Query, SharedState, found};
use crate::models::{AssetFilter, AssetUpdate, NewAsset};
use crate::permissions::ensure_same_hospital;

pub async fn list_assets(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(hospital_id): Path<i64>,
    Query(filter): Query<AssetFilter>,
) -> Result<impl IntoResponse, ApiError> {
    ensure_same_hospital(&actor, hospital_id)?;
    let assets = state
        .db
        .call(move |db| db.list_assets(hospital_id, &filter))
        .await?;
    Ok(Json(assets))
}

pub async fn create_asset(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(hospital_id): Path<i64>,
    Json(req): Json<NewAsset>,
) -> Result<impl IntoResponse, ApiError> {
    let prefix = state.config.numbering.asset_prefix.clone();
    let today = chrono::Local::now().date_naive();
    let asset = state
        .db
        .call(move |db| db.create_asset(&actor, hospital_id, &req, &prefix, today))
        .await?;
    Ok((StatusCode::CREATED, Json(asset)))
}

pub async fn get_asset(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let asset = found(state.db.call(move |db| db.get_asset(id)).await?, "Asset", id)?;
    ensure_same_hospital(&actor, asset.hospital_id)?;
    Ok(Json(asset))
}

pub async fn update_asset(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(id): Path<i64>,
    Json(req): Json<AssetUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    let asset = state
        .db
        .call(move |db| db.update_asset(&actor, id, &req))
        .await?;
    Ok(Json(asset))
}

pub async fn scrap_asset(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let asset = state.db.call(move |db| db.scrap_asset(&actor, id)).await?;
    Ok(Json(asset))
}

pub async fn delete_asset(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state.db.call(move |db| db.delete_asset(&actor, id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::super::tests::{bootstrap, hire, send, test_app};
    use axum::http::StatusCode;
    use chrono::Datelike;
    use serde_json::json;

    #[tokio::test]
    async fn test_asset_number_is_minted() {
        let app = test_app();
        let (hid, admin) = bootstrap(&app).await;

        let (status, first) = send(
            &app,
            "POST",
            &format!("/api/hospitals/{}/assets", hid),
            Some(admin),
            Some(json!({"title": "CT Scanner"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let year = chrono::Local::now().year();
        assert_eq!(first["asset_no"], format!("ZC{}000001", year));
        assert_eq!(first["status"], "using");

        let (_, second) = send(
            &app,
            "POST",
            &format!("/api/hospitals/{}/assets", hid),
            Some(admin),
            Some(json!({"title": "Ventilator"})),
        )
        .await;
        assert_eq!(second["asset_no"], format!("ZC{}000002", year));
    }

    #[tokio::test]
    async fn test_only_managers_register_assets() {
        let app = test_app();
        let (hid, admin) = bootstrap(&app).await;
        let nurse = hire(&app, hid, admin, "nurse", json!([])).await;
        let keeper = hire(&app, hid, admin, "keeper", json!(["asset_manager"])).await;

        let (status, _) = send(
            &app,
            "POST",
            &format!("/api/hospitals/{}/assets", hid),
            Some(nurse),
            Some(json!({"title": "Monitor"})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = send(
            &app,
            "POST",
            &format!("/api/hospitals/{}/assets", hid),
            Some(keeper),
            Some(json!({"title": "Monitor", "asset_no": "LEGACY-1"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, _) = send(
            &app,
            "POST",
            &format!("/api/hospitals/{}/assets", hid),
            Some(keeper),
            Some(json!({"title": "Monitor 2", "asset_no": "LEGACY-1"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_status_filter_update_scrap_and_delete() {
        let app = test_app();
        let (hid, admin) = bootstrap(&app).await;
        let (_, asset) = send(
            &app,
            "POST",
            &format!("/api/hospitals/{}/assets", hid),
            Some(admin),
            Some(json!({"title": "Infusion Pump"})),
        )
        .await;
        let id = asset["id"].as_i64().unwrap();

        let (status, idle) = send(
            &app,
            "PATCH",
            &format!("/api/assets/{}", id),
            Some(admin),
            Some(json!({"status": "idle"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(idle["status"], "idle");

        let (status, _) = send(
            &app,
            "PATCH",
            &format!("/api/assets/{}", id),
            Some(admin),
            Some(json!({"status": "repairing"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (_, listed) = send(
            &app,
            "GET",
            &format!("/api/hospitals/{}/assets?status=idle", hid),
            Some(admin),
            None,
        )
        .await;
        assert_eq!(listed.as_array().unwrap().len(), 1);
        let (_, listed) = send(
            &app,
            "GET",
            &format!("/api/hospitals/{}/assets?status=using", hid),
            Some(admin),
            None,
        )
        .await;
        assert!(listed.as_array().unwrap().is_empty());

        let (status, scrapped) = send(&app, "POST", &format!("/api/assets/{}/scrap", id), Some(admin), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(scrapped["status"], "scrapped");
        let (status, _) = send(&app, "POST", &format!("/api/assets/{}/scrap", id), Some(admin), None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = send(&app, "DELETE", &format!("/api/assets/{}", id), Some(admin), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(body.is_null());
        let (status, _) = send(&app, "GET", &format!("/api/assets/{}", id), Some(admin), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
