//! Caller identity extracted from the `X-Staff-Id` header.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use super::{ApiError, SharedState};
use crate::errors::AdminError;
use crate::models::Staff;

pub const STAFF_HEADER: &str = "x-staff-id";

/// The active staff member making the request. Rejects with 401 when the
/// header is missing, malformed or names an unknown or disabled account.
pub struct Actor(pub Staff);

/// Like [`Actor`] but tolerates a missing header. A header that is present
/// still has to resolve.
pub struct MaybeActor(pub Option<Staff>);

fn header_id(parts: &Parts) -> Result<Option<i64>, ApiError> {
    let Some(raw) = parts.headers.get(STAFF_HEADER) else {
        return Ok(None);
    };
    raw.to_str()
        .ok()
        .and_then(|s| s.trim().parse::<i64>().ok())
        .map(Some)
        .ok_or_else(|| AdminError::Unauthorized.into())
}

async fn resolve(state: &SharedState, id: i64) -> Result<Staff, ApiError> {
    let staff = state.db.call(move |db| db.find_actor(id)).await?;
    Ok(staff)
}

impl FromRequestParts<SharedState> for Actor {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let id = header_id(parts)?.ok_or(ApiError::from(AdminError::Unauthorized))?;
        Ok(Actor(resolve(state, id).await?))
    }
}

impl FromRequestParts<SharedState> for MaybeActor {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        match header_id(parts)? {
            Some(id) => Ok(MaybeActor(Some(resolve(state, id).await?))),
            None => Ok(MaybeActor(None)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{bootstrap, send, test_app};
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn test_missing_header_is_unauthorized() {
        let app = test_app();
        let (hid, _) = bootstrap(&app).await;
        let (status, body) = send(&app, "GET", &format!("/api/hospitals/{}/staff", hid), None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["error"].as_str().unwrap().contains("staff identity"));
    }

    #[tokio::test]
    async fn test_unknown_or_disabled_staff_is_unauthorized() {
        let app = test_app();
        let (hid, admin) = bootstrap(&app).await;
        let (status, _) = send(&app, "GET", &format!("/api/hospitals/{}/staff", hid), Some(999), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let nurse = super::super::tests::hire(&app, hid, admin, "nurse", json!([])).await;
        let (status, _) = send(
            &app,
            "POST",
            &format!("/api/staff/{}/active", nurse),
            Some(admin),
            Some(json!({"active": false})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&app, "GET", &format!("/api/staff/{}", nurse), Some(nurse), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_malformed_header_is_unauthorized() {
        let app = test_app();
        let (hid, _) = bootstrap(&app).await;
        let request = axum::http::Request::builder()
            .uri(format!("/api/hospitals/{}/staff", hid))
            .method("GET")
            .header(super::STAFF_HEADER, "not-a-number")
            .body(axum::body::Body::empty())
            .unwrap();
        let response = tower::ServiceExt::oneshot(app, request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
