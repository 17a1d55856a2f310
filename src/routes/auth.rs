//! Session endpoints and the reverse proxy's auth subrequest target.
//!
//! The proxy forwards the original request path in `X-Request-Uri` and acts
//! on the bare status code of the response; the body is ignored.

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::auth;
use crate::db::users::UserRepository;
use crate::error::{AppError, Result};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/base/auth", any(auth_request))
        .route("/rest-auth/login", post(login))
        .route("/rest-auth/logout", post(logout))
}

async fn auth_request(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(uri) = headers
        .get("x-request-uri")
        .and_then(|value| value.to_str().ok())
    else {
        return StatusCode::FORBIDDEN.into_response();
    };
    let user = match auth::resolve_identity(state.db(), &headers, None).await {
        Ok(user) => user,
        Err(e) => {
            tracing::error!(error = %e, "identity resolution failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    auth::authorize_uri(state.db(), user.as_ref(), uri)
        .await
        .into_response()
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Response> {
    let repo = UserRepository::new(state.db());
    let user = repo.get_by_username(&payload.username).await?;
    let user = match user {
        Some(user)
            if user.is_active && auth::verify_password(&user.password_hash, &payload.password) =>
        {
            user
        }
        _ => {
            return Err(AppError::BadRequest(
                "Unable to log in with provided credentials.".to_string(),
            ))
        }
    };

    let key =
        auth::create_session(state.db(), user.id, state.config().auth.session_ttl_hours).await?;
    repo.touch_last_login(user.id).await?;

    let cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax",
        auth::SESSION_COOKIE,
        key
    );
    Ok(([(header::SET_COOKIE, cookie)], Json(json!({ "key": key }))).into_response())
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Result<Response> {
    if let Some(key) = auth::session_key(&headers) {
        auth::delete_session(state.db(), &key).await?;
    }
    let cookie = format!("{}=; Path=/; Max-Age=0", auth::SESSION_COOKIE);
    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(json!({ "detail": "Successfully logged out." })),
    )
        .into_response())
}
