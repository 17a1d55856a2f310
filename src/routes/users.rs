//! Account management endpoints.
//!
//! Visibility follows the account listing rules: superusers see everyone,
//! authenticated users see themselves and members of shared groups, anonymous
//! callers see nothing. Lookups for mutation go through the same visible set,
//! so an invisible target reads as missing rather than forbidden.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::auth;
use crate::db::users::{CreateUser, UpdateUser, User, UserListQuery, UserRepository};
use crate::error::{AppError, Result};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/user", get(list_users).post(create_user))
        .route("/api/user/:id", patch(update_user))
        .route("/api/user/:id/change_password", post(change_password))
}

async fn list_users(
    State(state): State<AppState>,
    Query(query): Query<UserListQuery>,
    headers: HeaderMap,
) -> Result<Json<Vec<User>>> {
    let viewer = auth::resolve_identity(state.db(), &headers, None).await?;
    if query.current_only() {
        return Ok(Json(viewer.into_iter().collect()));
    }
    let users = UserRepository::new(state.db())
        .list_visible(viewer.as_ref(), &query)
        .await?;
    Ok(Json(users))
}

async fn create_user(
    State(state): State<AppState>,
    Json(payload): Json<CreateUser>,
) -> Result<impl IntoResponse> {
    if payload.username.is_empty() || payload.password.is_empty() {
        return Err(AppError::BadRequest(
            "This field may not be blank.".to_string(),
        ));
    }
    let repo = UserRepository::new(state.db());
    if repo.get_by_username(&payload.username).await?.is_some() {
        return Err(AppError::BadRequest(
            "A user with that username already exists.".to_string(),
        ));
    }
    let hash = auth::hash_password(&payload.password)?;
    let user = repo.create(&payload, &hash).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// Target lookup for mutations, scoped to what the requester may see.
async fn visible_target(
    repo: &UserRepository<'_>,
    requester: Option<&User>,
    id: i64,
) -> Result<User> {
    let query = UserListQuery {
        id: Some(id),
        ..Default::default()
    };
    repo.list_visible(requester, &query)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| AppError::NotFound("user not found".to_string()))
}

async fn update_user(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(update): Json<UpdateUser>,
) -> Result<Json<User>> {
    let requester = auth::resolve_identity(state.db(), &headers, None).await?;
    let repo = UserRepository::new(state.db());
    let target = visible_target(&repo, requester.as_ref(), id).await?;
    let requester = match requester {
        Some(requester) => requester,
        None => return Err(AppError::NotFound("user not found".to_string())),
    };
    if !requester.is_staff && requester.id != target.id {
        return Err(AppError::Forbidden);
    }

    let updated = repo
        .update_profile(target.id, &update)
        .await?
        .ok_or_else(|| AppError::NotFound("user not found".to_string()))?;
    Ok(Json(updated))
}

#[derive(Debug, Deserialize)]
struct ChangePasswordRequest {
    existing_password: Option<String>,
    new_password: Option<String>,
}

async fn change_password(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<Json<serde_json::Value>> {
    let requester = auth::resolve_identity(state.db(), &headers, None).await?;
    let repo = UserRepository::new(state.db());
    let target = visible_target(&repo, requester.as_ref(), id).await?;
    let requester = match requester {
        Some(requester) => requester,
        None => return Err(AppError::NotFound("user not found".to_string())),
    };
    if !requester.is_staff && requester.id != target.id {
        return Err(AppError::Forbidden);
    }

    let (existing, new) = match (&payload.existing_password, &payload.new_password) {
        (Some(existing), Some(new)) if !existing.is_empty() && !new.is_empty() => (existing, new),
        _ => return Err(AppError::BadRequest("Malformed password.".to_string())),
    };
    if !auth::verify_password(&target.password_hash, existing) {
        return Err(AppError::BadRequest("Incorrect password.".to_string()));
    }
    let hash = auth::hash_password(new)?;
    repo.set_password(target.id, &hash).await?;
    Ok(Json(json!({})))
}
