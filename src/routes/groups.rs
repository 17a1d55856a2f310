//! Group endpoints. Reads are scoped to the viewer, writes are superuser only.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::auth;
use crate::db::groups::{GroupListQuery, GroupRepository, GroupWithUsers};
use crate::db::users::User;
use crate::error::{AppError, Result};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/group", get(list_groups).post(create_group))
        .route("/api/group/:id", patch(update_group))
        .route("/api/group/:id/add_users", post(add_users))
        .route("/api/group/:id/remove_users", post(remove_users))
}

async fn require_superuser(state: &AppState, headers: &HeaderMap) -> Result<User> {
    let user = auth::resolve_identity(state.db(), headers, None).await?;
    match user {
        Some(user) if user.is_superuser => Ok(user),
        _ => Err(AppError::Forbidden),
    }
}

async fn list_groups(
    State(state): State<AppState>,
    Query(query): Query<GroupListQuery>,
    headers: HeaderMap,
) -> Result<Json<Vec<GroupWithUsers>>> {
    let viewer = auth::resolve_identity(state.db(), &headers, None).await?;
    let groups = GroupRepository::new(state.db())
        .list_visible(viewer.as_ref(), &query)
        .await?;
    Ok(Json(groups))
}

#[derive(Debug, Deserialize)]
struct GroupPayload {
    name: String,
}

async fn create_group(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<GroupPayload>,
) -> Result<impl IntoResponse> {
    require_superuser(&state, &headers).await?;
    let group = GroupRepository::new(state.db()).create(&payload.name).await?;
    Ok((
        StatusCode::CREATED,
        Json(GroupWithUsers {
            id: group.id,
            name: group.name,
            users: Vec::new(),
        }),
    ))
}

async fn update_group(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(payload): Json<GroupPayload>,
) -> Result<Json<GroupWithUsers>> {
    require_superuser(&state, &headers).await?;
    let repo = GroupRepository::new(state.db());
    let group = repo
        .rename(id, &payload.name)
        .await?
        .ok_or_else(|| AppError::NotFound("group not found".to_string()))?;
    let users = repo.member_ids(group.id).await?;
    Ok(Json(GroupWithUsers {
        id: group.id,
        name: group.name,
        users,
    }))
}

/// `user_ids` arrives either as a bare id or as a list of ids.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(i64),
    Many(Vec<i64>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<i64> {
        match self {
            OneOrMany::One(id) => vec![id],
            OneOrMany::Many(ids) => ids,
        }
    }
}

#[derive(Debug, Deserialize)]
struct MembershipPayload {
    user_ids: OneOrMany,
}

async fn add_users(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(payload): Json<MembershipPayload>,
) -> Result<StatusCode> {
    require_superuser(&state, &headers).await?;
    let repo = GroupRepository::new(state.db());
    if repo.get(id).await?.is_none() {
        return Err(AppError::NotFound("group not found".to_string()));
    }
    repo.add_users(id, &payload.user_ids.into_vec()).await?;
    Ok(StatusCode::OK)
}

async fn remove_users(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(payload): Json<MembershipPayload>,
) -> Result<StatusCode> {
    require_superuser(&state, &headers).await?;
    let repo = GroupRepository::new(state.db());
    if repo.get(id).await?.is_none() {
        return Err(AppError::NotFound("group not found".to_string()));
    }
    repo.remove_users(id, &payload.user_ids.into_vec()).await?;
    Ok(StatusCode::OK)
}
