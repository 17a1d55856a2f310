//! Shared application state handed to every route.

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::config::Config;
use crate::upload::ChunkUploader;

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    db: SqlitePool,
    uploader: ChunkUploader,
}

impl AppState {
    pub fn new(config: Config, db: SqlitePool) -> Self {
        let uploader = ChunkUploader::new(config.storage.upload_dir.clone());
        Self {
            inner: Arc::new(AppStateInner {
                config,
                db,
                uploader,
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn db(&self) -> &SqlitePool {
        &self.inner.db
    }

    pub fn uploader(&self) -> &ChunkUploader {
        &self.inner.uploader
    }
}
