//! JSON directory listings served for data object directories.

use std::path::Path;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// One listing entry. Directories come before files; within each group the
/// entries keep the order the filesystem yields them, which is part of the
/// interface consumed by existing clients.
#[derive(Debug, Serialize)]
pub struct ListingEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub entry_type: &'static str,
    pub mtime: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

pub async fn list_directory(path: &Path) -> std::io::Result<Vec<ListingEntry>> {
    let mut dirs = Vec::new();
    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(path).await?;
    while let Some(entry) = entries.next_entry().await? {
        // Follows symlinks, so a link to a file lists as a file.
        let meta = tokio::fs::metadata(entry.path()).await?;
        let mtime = http_date(meta.modified()?);
        let name = entry.file_name().to_string_lossy().into_owned();
        if meta.is_file() {
            files.push(ListingEntry {
                name,
                entry_type: "file",
                mtime,
                size: Some(meta.len()),
            });
        } else {
            dirs.push(ListingEntry {
                name,
                entry_type: "directory",
                mtime,
                size: None,
            });
        }
    }
    dirs.append(&mut files);
    Ok(dirs)
}

/// RFC 1123 timestamp, e.g. `Wed, 21 Oct 2015 07:28:00 GMT`.
fn http_date(time: SystemTime) -> String {
    let time: DateTime<Utc> = time.into();
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn directories_come_before_files() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(dir.path().join("a.txt"), b"aaa").await.unwrap();
        tokio::fs::create_dir(dir.path().join("nested")).await.unwrap();
        tokio::fs::write(dir.path().join("b.txt"), b"bb").await.unwrap();

        let entries = list_directory(dir.path()).await.unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].entry_type, "directory");
        assert_eq!(entries[0].name, "nested");
        assert!(entries[1..].iter().all(|e| e.entry_type == "file"));
    }

    #[tokio::test]
    async fn files_carry_sizes_directories_do_not() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(dir.path().join("a.txt"), b"aaa").await.unwrap();
        tokio::fs::create_dir(dir.path().join("nested")).await.unwrap();

        let entries = list_directory(dir.path()).await.unwrap();
        let nested = entries.iter().find(|e| e.name == "nested").unwrap();
        let file = entries.iter().find(|e| e.name == "a.txt").unwrap();
        assert_eq!(nested.size, None);
        assert_eq!(file.size, Some(3));
    }

    #[tokio::test]
    async fn mtime_is_rfc_1123() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(dir.path().join("a.txt"), b"aaa").await.unwrap();

        let entries = list_directory(dir.path()).await.unwrap();
        let mtime = &entries[0].mtime;
        assert!(mtime.ends_with(" GMT"), "unexpected mtime: {mtime}");
        assert_eq!(mtime.as_bytes()[3], b',');
        assert_eq!(mtime.len(), "Wed, 21 Oct 2015 07:28:00 GMT".len());
    }

    #[tokio::test]
    async fn size_is_omitted_from_directory_json() {
        let dir = TempDir::new().unwrap();
        tokio::fs::create_dir(dir.path().join("nested")).await.unwrap();

        let entries = list_directory(dir.path()).await.unwrap();
        let value = serde_json::to_value(&entries).unwrap();
        let obj = value[0].as_object().unwrap();
        assert_eq!(obj["type"], "directory");
        assert!(!obj.contains_key("size"));
        assert!(obj.contains_key("mtime"));
    }

    #[tokio::test]
    async fn missing_directory_is_an_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        assert!(list_directory(&missing).await.is_err());
    }
}
