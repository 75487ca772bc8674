use crate::error::ProxyError;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// File-backed sink for one exchange's request and response bodies.
///
/// A cache owns two paths under its directory, `req-<uuid>` and
/// `resp-<uuid>`, sharing one generated base name. Each file is created
/// lazily on the first append for its side, so a side that never saw body
/// bytes leaves no file behind and `has_*_data` stays false. Appends hand
/// bytes to the OS buffer (flushed, not fsynced).
///
/// Files are never deleted here; once a record pointing at them is
/// published, their lifetime belongs to the consumer.
pub struct BodyCache {
    request_path: PathBuf,
    response_path: PathBuf,
    request_file: Option<File>,
    response_file: Option<File>,
}

impl BodyCache {
    /// Set up paths for a new exchange under `dir`, creating the directory
    /// if needed. Fails with `CacheOpen` when the directory cannot be made.
    pub async fn create(dir: &Path) -> Result<Self, ProxyError> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(ProxyError::CacheOpen)?;

        let base = Uuid::new_v4();
        Ok(Self {
            request_path: dir.join(format!("req-{}", base)),
            response_path: dir.join(format!("resp-{}", base)),
            request_file: None,
            response_file: None,
        })
    }

    pub async fn append_request_body(&mut self, chunk: &[u8]) -> std::io::Result<()> {
        Self::append(&mut self.request_file, &self.request_path, chunk).await
    }

    pub async fn append_response_body(&mut self, chunk: &[u8]) -> std::io::Result<()> {
        Self::append(&mut self.response_file, &self.response_path, chunk).await
    }

    async fn append(slot: &mut Option<File>, path: &Path, chunk: &[u8]) -> std::io::Result<()> {
        if chunk.is_empty() {
            return Ok(());
        }
        if slot.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await?;
            *slot = Some(file);
        }
        let file = slot.as_mut().expect("file opened above");
        file.write_all(chunk).await?;
        file.flush().await
    }

    /// True iff request body bytes were appended (the file exists on disk).
    pub fn has_request_data(&self) -> bool {
        self.request_path.exists()
    }

    pub fn has_response_data(&self) -> bool {
        self.response_path.exists()
    }

    pub fn request_body_path(&self) -> &Path {
        &self.request_path
    }

    pub fn response_body_path(&self) -> &Path {
        &self.response_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_cache_dir(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("wiretap-cache-{}-{}", tag, Uuid::new_v4()))
    }

    #[tokio::test]
    async fn append_creates_file_and_sets_flag() {
        let dir = temp_cache_dir("append");
        let mut cache = BodyCache::create(&dir).await.unwrap();

        assert!(!cache.has_request_data());
        assert!(!cache.has_response_data());

        cache.append_request_body(b"hello").await.unwrap();
        cache.append_request_body(b" world").await.unwrap();

        assert!(cache.has_request_data());
        assert!(!cache.has_response_data());

        let contents = std::fs::read(cache.request_body_path()).unwrap();
        assert_eq!(contents, b"hello world");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn empty_append_leaves_no_file() {
        let dir = temp_cache_dir("empty");
        let mut cache = BodyCache::create(&dir).await.unwrap();

        cache.append_response_body(b"").await.unwrap();
        assert!(!cache.has_response_data());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn request_and_response_files_share_base_name() {
        let dir = temp_cache_dir("base");
        let cache = BodyCache::create(&dir).await.unwrap();

        let req = cache
            .request_body_path()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .into_owned();
        let resp = cache
            .response_body_path()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .into_owned();

        assert_eq!(
            req.strip_prefix("req-").unwrap(),
            resp.strip_prefix("resp-").unwrap()
        );

        std::fs::remove_dir_all(&dir).ok();
    }
}
