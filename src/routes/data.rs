//! Read-only data object endpoints. Writes come from the flow engine itself,
//! not through this gateway.

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::routing::get;
use axum::{Json, Router};

use crate::auth;
use crate::db::data::{DataListQuery, DataObjectResponse, DataRepository};
use crate::error::{AppError, Result};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/data", get(list_data))
        .route("/api/data/:id", get(get_data))
}

async fn list_data(
    State(state): State<AppState>,
    Query(query): Query<DataListQuery>,
    headers: HeaderMap,
) -> Result<Json<Vec<DataObjectResponse>>> {
    let viewer = auth::resolve_identity(state.db(), &headers, None).await?;
    let objects = DataRepository::new(state.db())
        .list_visible(viewer.as_ref(), &query)
        .await?;
    Ok(Json(objects.into_iter().map(Into::into).collect()))
}

async fn get_data(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<DataObjectResponse>> {
    let viewer = auth::resolve_identity(state.db(), &headers, None).await?;
    let repo = DataRepository::new(state.db());
    if !repo.can_view(id, viewer.as_ref()).await? {
        return Err(AppError::NotFound("data object not found".to_string()));
    }
    let data = repo
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound("data object not found".to_string()))?;
    Ok(Json(data.into()))
}
