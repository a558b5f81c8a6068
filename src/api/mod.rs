//! REST surface.
//!
//! Handlers stay thin: pull the actor and payload out of the request, run
//! one `Db` operation on the blocking pool and serialize the result.

mod actor;
mod assets;
mod extract;
mod flows;
mod organization;
mod projects;
mod repair;

use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
};
use serde::Serialize;

pub use actor::{Actor, MaybeActor, STAFF_HEADER};
pub use extract::{Json, Path, Query};

use crate::cache::TtlCache;
use crate::config::AppConfig;
use crate::db::DbHandle;
use crate::errors::AdminError;
use crate::models::FlowDetail;
use crate::permissions::{self, ensure};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
    pub config: Arc<AppConfig>,
    pub flow_cache: TtlCache<i64, FlowDetail>,
}

impl AppState {
    pub fn new(db: DbHandle, config: Arc<AppConfig>) -> Self {
        let flow_cache = TtlCache::new(config.cache.ttl(), config.cache.max_entries);
        Self {
            db,
            config,
            flow_cache,
        }
    }
}

pub type SharedState = Arc<AppState>;

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Forbidden(String),
    Unauthorized(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<&AdminError> for ApiError {
    fn from(err: &AdminError) -> Self {
        let message = err.to_string();
        match err {
            AdminError::NotFound { .. } => ApiError::NotFound(message),
            AdminError::Validation(_) => ApiError::BadRequest(message),
            AdminError::Conflict(_) | AdminError::InvalidTransition { .. } => {
                ApiError::Conflict(message)
            }
            AdminError::Forbidden(_) => ApiError::Forbidden(message),
            AdminError::Unauthorized => ApiError::Unauthorized(message),
            AdminError::Other(inner) => {
                tracing::error!(error = ?inner, "request failed");
                ApiError::Internal(message)
            }
        }
    }
}

impl From<AdminError> for ApiError {
    fn from(err: AdminError) -> Self {
        ApiError::from(&err)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast_ref::<AdminError>() {
            Some(domain) => domain.into(),
            None => {
                tracing::error!(error = ?err, "request failed");
                ApiError::Internal(err.to_string())
            }
        }
    }
}

/// Lift a lookup result into a 404.
pub(crate) fn found<T>(value: Option<T>, entity: &'static str, id: i64) -> Result<T, ApiError> {
    value.ok_or_else(|| AdminError::not_found(entity, id).into())
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        // Organization
        .route(
            "/api/hospitals",
            get(organization::list_hospitals).post(organization::create_hospital),
        )
        .route("/api/hospitals/{id}", get(organization::get_hospital))
        .route(
            "/api/hospitals/{id}/departments",
            get(organization::list_departments).post(organization::create_department),
        )
        .route(
            "/api/departments/{id}",
            patch(organization::update_department),
        )
        .route(
            "/api/hospitals/{id}/staff",
            get(organization::list_staff).post(organization::create_staff),
        )
        .route(
            "/api/staff/{id}",
            get(organization::get_staff).patch(organization::update_staff),
        )
        .route("/api/staff/{id}/active", post(organization::set_staff_active))
        // Assets
        .route(
            "/api/hospitals/{id}/assets",
            get(assets::list_assets).post(assets::create_asset),
        )
        .route(
            "/api/assets/{id}",
            get(assets::get_asset)
                .patch(assets::update_asset)
                .delete(assets::delete_asset),
        )
        .route("/api/assets/{id}/scrap", post(assets::scrap_asset))
        // Repair
        .route(
            "/api/hospitals/{id}/fault-types",
            get(repair::list_fault_types).post(repair::create_fault_type),
        )
        .route(
            "/api/hospitals/{id}/repair-orders",
            get(repair::list_orders).post(repair::create_order),
        )
        .route(
            "/api/hospitals/{id}/repair-orders/stats",
            get(repair::order_stats),
        )
        .route("/api/repair-orders/{id}", get(repair::get_order))
        .route("/api/repair-orders/{id}/dispatch", post(repair::dispatch_order))
        .route("/api/repair-orders/{id}/complete", post(repair::complete_order))
        .route("/api/repair-orders/{id}/close", post(repair::close_order))
        .route("/api/repair-orders/{id}/cancel", post(repair::cancel_order))
        // Flows
        .route(
            "/api/hospitals/{id}/flows",
            get(flows::list_flows).post(flows::create_flow),
        )
        .route(
            "/api/flows/{id}",
            get(flows::get_flow).delete(flows::delete_flow),
        )
        .route("/api/flows/{id}/milestones", post(flows::add_milestone))
        .route("/api/flows/{id}/default", post(flows::set_default_flow))
        // Projects
        .route(
            "/api/hospitals/{id}/projects",
            get(projects::list_projects).post(projects::create_project),
        )
        .route(
            "/api/projects/{id}",
            get(projects::get_project).patch(projects::update_project),
        )
        .route("/api/projects/{id}/dispatch", post(projects::dispatch_project))
        .route(
            "/api/projects/{id}/redispatch",
            post(projects::redispatch_project),
        )
        .route("/api/projects/{id}/milestone", post(projects::change_milestone))
        .route("/api/projects/{id}/finish", post(projects::finish_project))
        .route("/api/projects/{id}/pause", post(projects::pause_project))
        .route("/api/projects/{id}/resume", post(projects::resume_project))
        .route("/api/projects/{id}/overrule", post(projects::overrule_project))
        .route("/api/projects/{id}/records", get(projects::project_records))
        // Sequences
        .route("/api/sequences/{key}", get(sequence_value))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

#[derive(Serialize)]
pub struct SequenceValue {
    pub key: String,
    pub value: i64,
}

async fn sequence_value(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    ensure(permissions::is_admin(&actor), "admin role required")?;
    let lookup = key.clone();
    let value = state.db.call(move |db| db.current_value(&lookup)).await?;
    Ok(Json(SequenceValue { key, value }))
}

// ── Tests ─────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::Db;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    pub(crate) fn test_app() -> Router {
        let db = Db::new_in_memory().unwrap();
        let state = Arc::new(AppState::new(
            DbHandle::new(db),
            Arc::new(AppConfig::default()),
        ));
        api_router().with_state(state)
    }

    pub(crate) async fn body_json<T: serde::de::DeserializeOwned>(body: Body) -> T {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    /// Send a request and decode the JSON answer (`Value::Null` for an empty
    /// body).
    pub(crate) async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        actor: Option<i64>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(id) = actor {
            builder = builder.header(STAFF_HEADER, id.to_string());
        }
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
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    /// Hospital plus bootstrap admin. Returns (hospital id, admin id).
    pub(crate) async fn bootstrap(app: &Router) -> (i64, i64) {
        let (status, hospital) = send(
            app,
            "POST",
            "/api/hospitals",
            None,
            Some(json!({"name": "Union Hospital", "grade": "3A"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let hid = hospital["id"].as_i64().unwrap();

        let (status, admin) = send(
            app,
            "POST",
            &format!("/api/hospitals/{}/staff", hid),
            None,
            Some(json!({"username": "admin", "name": "Admin"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        (hid, admin["id"].as_i64().unwrap())
    }

    pub(crate) async fn hire(app: &Router, hid: i64, admin: i64, username: &str, roles: Value) -> i64 {
        let (status, staff) = send(
            app,
            "POST",
            &format!("/api/hospitals/{}/staff", hid),
            Some(admin),
            Some(json!({"username": username, "name": username, "roles": roles})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{}", staff);
        staff["id"].as_i64().unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = test_app();

        let request = Request::builder()
            .method("GET")
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let app = test_app();
        let (status, _) = send(&app, "GET", "/api/nowhere", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_error_body_shape() {
        let app = test_app();
        let (status, body) = send(&app, "GET", "/api/hospitals/42", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Hospital 42 not found");
    }

    #[tokio::test]
    async fn test_malformed_requests_answer_json_400() {
        let app = test_app();

        let req = Request::builder()
            .method("POST")
            .uri("/api/hospitals")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = body_json(resp.into_body()).await;
        assert!(body["error"].as_str().unwrap().contains("JSON"));

        // Missing field: serde would otherwise answer 422 in plain text.
        let (status, body) = send(&app, "POST", "/api/hospitals", None, Some(json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("name"));

        let (status, body) = send(&app, "GET", "/api/hospitals/abc", None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());

        let (hid, admin) = bootstrap(&app).await;
        let (status, body) = send(
            &app,
            "GET",
            &format!("/api/hospitals/{}/assets?status=melted", hid),
            Some(admin),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_sequence_value_is_admin_only() {
        let app = test_app();
        let (hid, admin) = bootstrap(&app).await;
        let nurse = hire(&app, hid, admin, "nurse", json!([])).await;

        let (status, body) = send(&app, "GET", "/api/sequences/WX20260101", Some(admin), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"key": "WX20260101", "value": 0}));

        let (status, _) = send(&app, "GET", "/api/sequences/WX20260101", Some(nurse), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_admin_error_mapping() {
        let cases = [
            (AdminError::not_found("Asset", 1), StatusCode::NOT_FOUND),
            (AdminError::validation("bad"), StatusCode::BAD_REQUEST),
            (AdminError::conflict("dup"), StatusCode::CONFLICT),
            (
                AdminError::transition("project", "pending", "done"),
                StatusCode::CONFLICT,
            ),
            (AdminError::forbidden("no"), StatusCode::FORBIDDEN),
            (AdminError::Unauthorized, StatusCode::UNAUTHORIZED),
        ];
        for (err, expected) in cases {
            let wrapped: anyhow::Error = err.into();
            let response = ApiError::from(wrapped.context("while testing")).into_response();
            assert_eq!(response.status(), expected);
        }

        let response = ApiError::from(anyhow::anyhow!("disk on fire")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
