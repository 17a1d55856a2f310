//! Chunked uploads: the exclusivity lock and the chunk delegate.

pub mod chunks;
pub mod lock;

pub use chunks::{ChunkMeta, ChunkResponse, ChunkUploader, UploadError, UploadStatus};
pub use lock::{upload_key, LockError, UploadLock};
