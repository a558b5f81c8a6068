use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{Json, Router, http::StatusCode, response::IntoResponse};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::{self, AppState};
use crate::config::AppConfig;
use crate::db::{Db, DbHandle};

/// Build the full application router: API routes plus request tracing.
pub fn build_router(state: Arc<AppState>) -> Router {
    let dev_mode = state.config.server.dev_mode;
    let mut app = api::api_router()
        .fallback(not_found)
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if dev_mode {
        app = app.layer(CorsLayer::permissive());
    }
    app
}

async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({"error": "no such route"})),
    )
}

/// Open (and migrate) the database named by the configuration.
pub fn open_database(config: &AppConfig) -> Result<Db> {
    let path = &config.database.path;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }
    }
    Db::new(path, config.database.busy_timeout())
        .with_context(|| format!("Failed to open database at {}", path.display()))
}

/// Start the HTTP server and run until Ctrl+C.
pub async fn start_server(config: AppConfig) -> Result<()> {
    let db = open_database(&config)?;
    let addr = config.bind_addr();
    let state = Arc::new(AppState::new(DbHandle::new(db), Arc::new(config)));
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    tracing::info!(%local_addr, "hospital admin listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_router(dev_mode: bool) -> Router {
        let db = Db::new_in_memory().unwrap();
        let mut config = AppConfig::default();
        config.server.dev_mode = dev_mode;
        let state = Arc::new(AppState::new(DbHandle::new(db), Arc::new(config)));
        build_router(state)
    }

    #[tokio::test]
    async fn test_health_via_full_router() {
        let app = test_router(false);
        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_fallback_is_json_404() {
        let app = test_router(false);
        let req = Request::builder()
            .uri("/does/not/exist")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "no such route");
    }

    #[tokio::test]
    async fn test_dev_mode_answers_cors_preflight() {
        let app = test_router(true);
        let req = Request::builder()
            .method("OPTIONS")
            .uri("/api/hospitals")
            .header("origin", "http://localhost:5173")
            .header("access-control-request-method", "POST")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert!(resp.headers().contains_key("access-control-allow-origin"));
    }

    #[test]
    fn test_open_database_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.database.path = dir.path().join("nested/dir/admin.db");
        open_database(&config).unwrap();
        assert!(config.database.path.exists());
    }
}
