//! Chunk intake and reassembly for resumable uploads.
//!
//! Each chunk lands in its own part file next to the staged result, named
//! `<key>.part<n>` with zero-based indexes. Once every part implied by the
//! declared sizes is on disk, the parts are concatenated in index order
//! into `<upload_dir>/<key>` and removed. The flow engine picks finished
//! files up from there by key.

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Hard ceiling on the declared file size.
pub const MAX_TOTAL_SIZE: u64 = 16 * 1024 * 1024 * 1024;
/// Hard ceiling on a single chunk. The HTTP body limit is derived from it.
pub const MAX_CHUNK_SIZE: u64 = 64 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum UploadError {
    /// Metadata fields are missing, inconsistent, or out of bounds.
    #[error("Malformed chunk metadata")]
    MalformedMetadata,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct ChunkMeta {
    pub total_size: u64,
    pub chunk_size: u64,
    /// Zero-based index of this chunk.
    pub chunk_number: u64,
    pub current_chunk_size: u64,
    pub filename: String,
}

impl ChunkMeta {
    /// Number of chunks the declared sizes imply. An empty file still
    /// takes one (empty) chunk.
    pub fn total_chunks(&self) -> u64 {
        if self.chunk_size == 0 {
            return 0;
        }
        self.total_size.div_ceil(self.chunk_size).max(1)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkResponse {
    pub chunk_number: u64,
    pub chunks_received: u64,
    pub total_chunks: u64,
    pub assembled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// Status probe payload: which chunk indexes are on disk and whether the
/// final file has been assembled.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadStatus {
    pub received_chunks: Vec<u64>,
    pub assembled: bool,
}

#[derive(Debug, Clone)]
pub struct ChunkUploader {
    upload_dir: PathBuf,
}

impl ChunkUploader {
    pub fn new(upload_dir: PathBuf) -> Self {
        Self { upload_dir }
    }

    fn staged_path(&self, key: &str) -> PathBuf {
        self.upload_dir.join(key)
    }

    fn part_path(&self, key: &str, chunk_number: u64) -> PathBuf {
        self.upload_dir.join(format!("{key}.part{chunk_number}"))
    }

    pub async fn accept_chunk(
        &self,
        key: &str,
        meta: &ChunkMeta,
        data: &[u8],
    ) -> Result<ChunkResponse, UploadError> {
        if meta.chunk_size == 0
            || meta.total_size > MAX_TOTAL_SIZE
            || meta.current_chunk_size > MAX_CHUNK_SIZE
            || data.len() as u64 != meta.current_chunk_size
        {
            return Err(UploadError::MalformedMetadata);
        }
        let total_chunks = meta.total_chunks();
        if meta.chunk_number >= total_chunks {
            return Err(UploadError::MalformedMetadata);
        }

        // A chunk re-sent after assembly is answered as already complete.
        let staged = self.staged_path(key);
        if fs::try_exists(&staged).await? {
            let size = fs::metadata(&staged).await?.len();
            return Ok(ChunkResponse {
                chunk_number: meta.chunk_number,
                chunks_received: total_chunks,
                total_chunks,
                assembled: true,
                file_name: Some(meta.filename.clone()),
                size: Some(size),
            });
        }

        fs::write(self.part_path(key, meta.chunk_number), data).await?;

        let mut received = 0u64;
        let mut complete = true;
        for index in 0..total_chunks {
            if fs::try_exists(self.part_path(key, index)).await? {
                received += 1;
            } else {
                complete = false;
            }
        }

        if !complete {
            return Ok(ChunkResponse {
                chunk_number: meta.chunk_number,
                chunks_received: received,
                total_chunks,
                assembled: false,
                file_name: None,
                size: None,
            });
        }

        let size = self.assemble(key, total_chunks).await?;
        Ok(ChunkResponse {
            chunk_number: meta.chunk_number,
            chunks_received: received,
            total_chunks,
            assembled: true,
            file_name: Some(meta.filename.clone()),
            size: Some(size),
        })
    }

    /// Concatenates the part files in index order into the staged file,
    /// then removes them.
    async fn assemble(&self, key: &str, total_chunks: u64) -> Result<u64, UploadError> {
        let staged = self.staged_path(key);
        let mut out = fs::File::create(&staged).await?;
        for index in 0..total_chunks {
            let mut part = fs::File::open(self.part_path(key, index)).await?;
            tokio::io::copy(&mut part, &mut out).await?;
        }
        out.flush().await?;
        let size = fs::metadata(&staged).await?.len();
        for index in 0..total_chunks {
            fs::remove_file(self.part_path(key, index)).await?;
        }
        Ok(size)
    }

    /// Status probe. Answers from the filesystem alone, so it works before
    /// the first chunk and after a server restart.
    pub async fn status(&self, key: &str) -> Result<UploadStatus, UploadError> {
        let assembled = fs::try_exists(self.staged_path(key)).await?;
        let prefix = format!("{key}.part");
        let mut received_chunks = Vec::new();
        let mut entries = fs::read_dir(&self.upload_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(index) = name.strip_prefix(&prefix) {
                if let Ok(index) = index.parse::<u64>() {
                    received_chunks.push(index);
                }
            }
        }
        received_chunks.sort_unstable();
        Ok(UploadStatus {
            received_chunks,
            assembled,
        })
    }
}
