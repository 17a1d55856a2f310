//! File responses for data objects: byte ranges, gzip advertisement,
//! attachment disposition, and directory listings.
//!
//! Production deployments put the reverse proxy in front of the data
//! directory; this responder backs development setups and supplies the
//! listing and header behavior the proxy offloads to us.

pub mod listing;
pub mod range;

use std::io::SeekFrom;
use std::path::Path;

use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::Response;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::error::Result;

/// First bytes of a gzip member with deflate compression.
const GZIP_MAGIC: [u8; 3] = [0x1f, 0x8b, 0x08];

#[derive(Debug, Default, Clone, Copy)]
pub struct FileResponseOptions<'a> {
    /// Raw `Range` header value, if the client sent one.
    pub range_header: Option<&'a str>,
    /// Check the file's magic bytes and advertise `Content-Encoding: gzip`
    /// when they match.
    pub verify_gzip: bool,
    /// Mark the response as an attachment.
    pub force_download: bool,
}

/// Serves `path` honoring the single-range subset of the Range protocol.
/// A satisfiable range yields 206 with `Content-Range`; anything else
/// degrades to the complete file with a 200. The read is single-shot, the
/// whole response body is assembled before headers are sent.
pub async fn file_response(path: &Path, opts: FileResponseOptions<'_>) -> Result<Response> {
    let total_len = fs::metadata(path).await?.len();
    let range = opts
        .range_header
        .and_then(|header| range::parse_range(header, total_len));

    let mut file = fs::File::open(path).await?;
    let body = match range {
        Some(r) => {
            file.seek(SeekFrom::Start(r.start)).await?;
            let mut buf = vec![0u8; r.byte_len() as usize];
            file.read_exact(&mut buf).await?;
            buf
        }
        None => {
            let mut buf = Vec::with_capacity(total_len as usize);
            file.read_to_end(&mut buf).await?;
            buf
        }
    };

    let content_type = mime_guess::from_path(path).first_or_octet_stream();
    let mut builder = Response::builder()
        .status(if range.is_some() {
            StatusCode::PARTIAL_CONTENT
        } else {
            StatusCode::OK
        })
        .header(header::CONTENT_TYPE, content_type.as_ref())
        .header("Content-Description", "File Transfer")
        .header(header::CONTENT_LENGTH, body.len());

    if let Some(r) = range {
        builder = builder
            .header(
                header::CONTENT_RANGE,
                format!("bytes {}-{}/{}", r.start, r.end, total_len),
            )
            .header(header::ACCEPT_RANGES, "bytes");
    }
    if opts.verify_gzip && is_gzip(path).await? {
        builder = builder.header(header::CONTENT_ENCODING, "gzip");
    }
    if opts.force_download {
        builder = builder.header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", file_name(path)),
        );
    }

    Ok(builder.body(Body::from(body))?)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Trusts the on-disk magic bytes, not the route or the file extension.
async fn is_gzip(path: &Path) -> std::io::Result<bool> {
    let mut file = fs::File::open(path).await?;
    let mut magic = [0u8; 3];
    match file.read_exact(&mut magic).await {
        Ok(_) => Ok(magic == GZIP_MAGIC),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use tempfile::TempDir;

    async fn sample_file(dir: &TempDir, name: &str, contents: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, contents).await.unwrap();
        path
    }

    fn header_str<'a>(response: &'a Response, name: &str) -> Option<&'a str> {
        response.headers().get(name).map(|v| v.to_str().unwrap())
    }

    #[tokio::test]
    async fn whole_file_without_range() {
        let dir = TempDir::new().unwrap();
        let path = sample_file(&dir, "notes.txt", b"hello world").await;

        let response = file_response(&path, FileResponseOptions::default())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header_str(&response, "content-length"), Some("11"));
        assert_eq!(
            header_str(&response, "content-description"),
            Some("File Transfer")
        );
        assert_eq!(header_str(&response, "content-type"), Some("text/plain"));
        assert_eq!(header_str(&response, "content-range"), None);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"hello world");
    }

    #[tokio::test]
    async fn bounded_range_yields_partial_content() {
        let dir = TempDir::new().unwrap();
        let path = sample_file(&dir, "notes.txt", b"hello world").await;

        let opts = FileResponseOptions {
            range_header: Some("bytes=0-4"),
            ..Default::default()
        };
        let response = file_response(&path, opts).await.unwrap();
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(header_str(&response, "content-range"), Some("bytes 0-4/11"));
        assert_eq!(header_str(&response, "accept-ranges"), Some("bytes"));
        assert_eq!(header_str(&response, "content-length"), Some("5"));

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"hello");
    }

    #[tokio::test]
    async fn open_range_reads_to_end() {
        let dir = TempDir::new().unwrap();
        let path = sample_file(&dir, "notes.txt", b"hello world").await;

        let opts = FileResponseOptions {
            range_header: Some("bytes=6-"),
            ..Default::default()
        };
        let response = file_response(&path, opts).await.unwrap();
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(
            header_str(&response, "content-range"),
            Some("bytes 6-10/11")
        );

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"world");
    }

    #[tokio::test]
    async fn unusable_range_degrades_to_full_response() {
        let dir = TempDir::new().unwrap();
        let path = sample_file(&dir, "notes.txt", b"hello world").await;

        for bad in ["bytes=-4", "bytes=abc", "bytes=20-10", "bytes=11-"] {
            let opts = FileResponseOptions {
                range_header: Some(bad),
                ..Default::default()
            };
            let response = file_response(&path, opts).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK, "range: {bad}");
            assert_eq!(header_str(&response, "content-range"), None);
            let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            assert_eq!(&body[..], b"hello world");
        }
    }

    #[tokio::test]
    async fn range_end_is_clamped() {
        let dir = TempDir::new().unwrap();
        let path = sample_file(&dir, "notes.txt", b"hello world").await;

        let opts = FileResponseOptions {
            range_header: Some("bytes=6-999"),
            ..Default::default()
        };
        let response = file_response(&path, opts).await.unwrap();
        assert_eq!(
            header_str(&response, "content-range"),
            Some("bytes 6-10/11")
        );
    }

    #[tokio::test]
    async fn gzip_magic_is_checked_on_disk() {
        let dir = TempDir::new().unwrap();
        let gzip = sample_file(&dir, "real.gz", &[0x1f, 0x8b, 0x08, 0x00, 0x42]).await;
        let fake = sample_file(&dir, "fake.gz", b"plain text").await;
        let tiny = sample_file(&dir, "tiny.gz", &[0x1f]).await;

        let opts = FileResponseOptions {
            verify_gzip: true,
            ..Default::default()
        };
        let response = file_response(&gzip, opts).await.unwrap();
        assert_eq!(header_str(&response, "content-encoding"), Some("gzip"));

        let response = file_response(&fake, opts).await.unwrap();
        assert_eq!(header_str(&response, "content-encoding"), None);

        let response = file_response(&tiny, opts).await.unwrap();
        assert_eq!(header_str(&response, "content-encoding"), None);

        // Without verification the header is never set.
        let response = file_response(&gzip, FileResponseOptions::default())
            .await
            .unwrap();
        assert_eq!(header_str(&response, "content-encoding"), None);
    }

    #[tokio::test]
    async fn forced_download_sets_disposition() {
        let dir = TempDir::new().unwrap();
        let path = sample_file(&dir, "reads.fastq", b"@read1").await;

        let opts = FileResponseOptions {
            force_download: true,
            ..Default::default()
        };
        let response = file_response(&path, opts).await.unwrap();
        assert_eq!(
            header_str(&response, "content-disposition"),
            Some("attachment; filename=\"reads.fastq\"")
        );
    }
}
