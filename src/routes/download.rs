//! Download endpoints for data object files.
//!
//! Three route families resolve to the same responder: plain paths, paths
//! with gzip verification, and tokenized paths where the credential rides
//! in the URL. Authorization is decided first and its denials are relayed
//! as bare status codes; only allowed requests ever touch the filesystem.

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use tokio::fs;

use crate::auth::{self, AuthOutcome};
use crate::download::{file_response, listing, FileResponseOptions};
use crate::error::{AppError, Result};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/data/:data_id/", get(plain_root))
        .route("/data/:data_id/*uri", get(plain))
        .route("/datagzip/:data_id/", get(gzip_root))
        .route("/datagzip/:data_id/*uri", get(gzip))
        .route("/token/:token/data/:data_id/", get(token_root))
        .route("/token/:token/data/:data_id/*uri", get(token))
}

#[derive(Debug, Default, Deserialize)]
struct DownloadQuery {
    force_download: Option<String>,
}

impl DownloadQuery {
    fn forced(&self) -> bool {
        self.force_download.as_deref() == Some("1")
    }
}

async fn plain_root(
    State(state): State<AppState>,
    Path(data_id): Path<String>,
    Query(query): Query<DownloadQuery>,
    headers: HeaderMap,
) -> Result<Response> {
    DownloadRequest {
        state,
        headers,
        token: None,
        data_id,
        uri: String::new(),
        verify_gzip: false,
        force_download: query.forced(),
    }
    .respond()
    .await
}

async fn plain(
    State(state): State<AppState>,
    Path((data_id, uri)): Path<(String, String)>,
    Query(query): Query<DownloadQuery>,
    headers: HeaderMap,
) -> Result<Response> {
    DownloadRequest {
        state,
        headers,
        token: None,
        data_id,
        uri,
        verify_gzip: false,
        force_download: query.forced(),
    }
    .respond()
    .await
}

async fn gzip_root(
    State(state): State<AppState>,
    Path(data_id): Path<String>,
    Query(query): Query<DownloadQuery>,
    headers: HeaderMap,
) -> Result<Response> {
    DownloadRequest {
        state,
        headers,
        token: None,
        data_id,
        uri: String::new(),
        verify_gzip: true,
        force_download: query.forced(),
    }
    .respond()
    .await
}

async fn gzip(
    State(state): State<AppState>,
    Path((data_id, uri)): Path<(String, String)>,
    Query(query): Query<DownloadQuery>,
    headers: HeaderMap,
) -> Result<Response> {
    DownloadRequest {
        state,
        headers,
        token: None,
        data_id,
        uri,
        verify_gzip: true,
        force_download: query.forced(),
    }
    .respond()
    .await
}

async fn token_root(
    State(state): State<AppState>,
    Path((token, data_id)): Path<(String, String)>,
    Query(query): Query<DownloadQuery>,
    headers: HeaderMap,
) -> Result<Response> {
    DownloadRequest {
        state,
        headers,
        token: Some(token),
        data_id,
        uri: String::new(),
        verify_gzip: false,
        force_download: query.forced(),
    }
    .respond()
    .await
}

async fn token(
    State(state): State<AppState>,
    Path((token, data_id, uri)): Path<(String, String, String)>,
    Query(query): Query<DownloadQuery>,
    headers: HeaderMap,
) -> Result<Response> {
    DownloadRequest {
        state,
        headers,
        token: Some(token),
        data_id,
        uri,
        verify_gzip: false,
        force_download: query.forced(),
    }
    .respond()
    .await
}

struct DownloadRequest {
    state: AppState,
    headers: HeaderMap,
    token: Option<String>,
    data_id: String,
    uri: String,
    verify_gzip: bool,
    force_download: bool,
}

impl DownloadRequest {
    /// The path the client actually requested, used for redirects.
    fn original_path(&self) -> String {
        let Self { data_id, uri, .. } = self;
        match &self.token {
            Some(token) => format!("/token/{token}/data/{data_id}/{uri}"),
            None if self.verify_gzip => format!("/datagzip/{data_id}/{uri}"),
            None => format!("/data/{data_id}/{uri}"),
        }
    }

    async fn respond(self) -> Result<Response> {
        // The id segment is numeric by contract; anything else has no route.
        if self.data_id.is_empty() || !self.data_id.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AppError::NotFound("data object not found".to_string()));
        }

        // A URL token stands in for the credential header and the check runs
        // against the plain download path.
        let auth_uri = if self.token.is_some() {
            format!("/data/{}/{}", self.data_id, self.uri)
        } else {
            self.original_path()
        };

        let user =
            auth::resolve_identity(self.state.db(), &self.headers, self.token.as_deref()).await?;
        let status = auth::authorize_uri(self.state.db(), user.as_ref(), &auth_uri).await;
        match auth::classify_status(status) {
            AuthOutcome::Allow => {}
            AuthOutcome::Deny(code) => return Ok(code.into_response()),
            AuthOutcome::Error(code) => return Err(AppError::AuthSubsystem(code)),
        }

        let rel = self.uri.trim_start_matches('/');
        if rel.split('/').any(|segment| segment == "..") {
            return Err(AppError::NotFound("Requested file does not exist".to_string()));
        }
        let path = self
            .state
            .config()
            .storage
            .data_dir
            .join(&self.data_id)
            .join(rel);

        let meta = fs::metadata(&path).await?;
        if meta.is_dir() {
            // Listings link relative to the request, so a directory needs
            // its trailing slash before it can be listed.
            if !rel.is_empty() && !rel.ends_with('/') {
                let location = format!("{}/", self.original_path());
                return Ok(Redirect::to(&location).into_response());
            }
            let entries = listing::list_directory(&path).await?;
            return Ok(Json(entries).into_response());
        }

        let opts = FileResponseOptions {
            range_header: self
                .headers
                .get(header::RANGE)
                .and_then(|v| v.to_str().ok()),
            verify_gzip: self.verify_gzip,
            force_download: self.force_download,
        };
        file_response(&path, opts).await
    }
}
