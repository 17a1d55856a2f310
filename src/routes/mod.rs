//! HTTP surface, one module per area of the API.

pub mod auth;
pub mod data;
pub mod download;
pub mod groups;
pub mod health;
pub mod upload;
pub mod users;

use axum::Router;

use crate::state::AppState;

/// Assembles the full application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(auth::router())
        .merge(users::router())
        .merge(groups::router())
        .merge(data::router())
        .merge(upload::router())
        .merge(download::router())
        .with_state(state)
}
