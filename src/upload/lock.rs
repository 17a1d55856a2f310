//! Per-upload exclusivity via lock marker files.
//!
//! A marker named `<key>.lock` is created with create-new semantics before
//! any chunk handling and removed when the guard drops, including on error
//! and cancellation paths. Markers carry no expiry: one orphaned by a
//! crashed process must be removed by hand before that upload can resume.

use std::io;
use std::path::{Path, PathBuf};

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Derives the opaque key identifying one upload. The session id and
/// per-file uid are MACed with the server secret, so the key is stable
/// across requests and always a single safe path component.
pub fn upload_key(session_id: &str, file_uid: &str, secret: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(session_id.as_bytes());
    mac.update(b":");
    mac.update(file_uid.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

#[derive(Debug, Error)]
pub enum LockError {
    /// Another request holds the marker for this upload.
    #[error("upload already in progress")]
    AlreadyLocked,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Guard over the lock marker. Dropping it releases the lock.
#[derive(Debug)]
pub struct UploadLock {
    path: PathBuf,
}

impl UploadLock {
    /// Creates `<upload_dir>/<key>.lock`, failing if it already exists.
    pub async fn acquire(upload_dir: &Path, key: &str) -> Result<Self, LockError> {
        let path = upload_dir.join(format!("{key}.lock"));
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(_) => Ok(Self { path }),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(LockError::AlreadyLocked),
            Err(e) => Err(LockError::Io(e)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for UploadLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "failed to remove upload lock marker"
            );
        }
    }
}
