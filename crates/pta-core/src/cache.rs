//! Content-addressed artifact cache (spec §4.A).
//!
//! A file with hash `H` and name `N` lives at `root/H/N`. Caching is
//! atomic with respect to that final path: a partial download never
//! becomes visible there, and integrity is re-checked on every read, not
//! just at write time, so corruption or tampering between downloads is
//! caught rather than silently trusted.

use std::{path::PathBuf, time::Duration};

use pta_transport::{HttpTransport, TaskServerClient};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};

use crate::model::FileEntry;

const RETRY_ATTEMPTS: u32 = 2;
const RETRY_PAUSE: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("io error caching {filename}: {source}")]
    Io {
        filename: String,
        #[source]
        source: std::io::Error,
    },
    #[error("server returned an error fetching {filename}: {source}")]
    Transport {
        filename: String,
        #[source]
        source: pta_transport::TransportError,
    },
}

pub struct ArtifactCache<T: HttpTransport> {
    root: PathBuf,
    client: TaskServerClient<T>,
}

impl<T: HttpTransport> ArtifactCache<T> {
    /// `client` is the same `TaskServerClient` the resolver uses for
    /// metadata; the cache only ever calls its `fetch_file`, which builds
    /// its request straight from `uri.resolve()` and ignores the client's
    /// base URL, so the cache does not need a base URL of its own.
    pub fn new(root: impl Into<PathBuf>, client: TaskServerClient<T>) -> Self {
        Self {
            root: root.into(),
            client,
        }
    }

    /// The cache root as a string, for handing to the command planner
    /// (which builds paths for a target platform rather than the host's).
    pub fn root_for_planner(&self) -> String {
        self.root.to_string_lossy().into_owned()
    }

    fn hash_dir(&self, hash: &str) -> PathBuf {
        self.root.join(hash)
    }

    fn final_path(&self, file: &FileEntry) -> PathBuf {
        self.hash_dir(&file.sha256).join(&file.filename)
    }

    /// True iff `root/H` is a directory, `root/H/N` exists, its size
    /// matches, and its SHA-256 matches `H`. Re-hashes on every call: this
    /// is a read-time integrity check, not merely a write-time one.
    pub async fn is_cached(&self, file: &FileEntry) -> bool {
        let path = self.final_path(file);
        let Ok(metadata) = tokio::fs::metadata(&path).await else {
            return false;
        };
        if !metadata.is_file() || metadata.len() != file.size_bytes {
            return false;
        }
        match Self::hash_file(&path).await {
            Ok(digest) => digest == file.sha256,
            Err(_) => false,
        }
    }

    async fn hash_file(path: &PathBuf) -> std::io::Result<String> {
        let bytes = tokio::fs::read(path).await?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(hex::encode(hasher.finalize()))
    }

    /// Ensure every file in `files` is cached, downloading any that are
    /// missing or fail validation. The whole batch fails if any single
    /// file ultimately fails after its retries.
    pub async fn ensure_cached(&self, files: &[FileEntry]) -> Result<(), CacheError> {
        for file in files {
            if self.is_cached(file).await {
                continue;
            }
            self.download_with_retry(file).await?;
        }
        Ok(())
    }

    async fn download_with_retry(&self, file: &FileEntry) -> Result<(), CacheError> {
        let mut last_error = None;
        for attempt in 0..RETRY_ATTEMPTS {
            match self.download(file).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    warn!(
                        filename = %file.filename,
                        attempt = attempt + 1,
                        error = %err,
                        "download attempt failed"
                    );
                    last_error = Some(err);
                    if attempt + 1 < RETRY_ATTEMPTS {
                        tokio::time::sleep(RETRY_PAUSE).await;
                    }
                }
            }
        }
        Err(last_error.expect("loop runs at least once"))
    }

    /// A single download attempt: fetch, stream into a temp file staged
    /// inside `root/H` (so the final rename is same-directory and
    /// atomic), `chmod 0o750`, then atomically rename into place.
    async fn download(&self, file: &FileEntry) -> Result<(), CacheError> {
        debug!(filename = %file.filename, hash = %file.sha256, "downloading task file");
        let body = self
            .client
            .fetch_file(&file.uri)
            .await
            .map_err(|source| CacheError::Transport {
                filename: file.filename.clone(),
                source,
            })?;

        let hash_dir = self.hash_dir(&file.sha256);
        self.install(&hash_dir, &file.filename, &body)
            .await
            .map_err(|source| CacheError::Io {
                filename: file.filename.clone(),
                source,
            })
    }

    #[cfg(unix)]
    async fn install(
        &self,
        hash_dir: &PathBuf,
        filename: &str,
        body: &[u8],
    ) -> std::io::Result<()> {
        use std::os::unix::fs::PermissionsExt;

        tokio::fs::create_dir_all(hash_dir).await?;
        tokio::fs::set_permissions(hash_dir, std::fs::Permissions::from_mode(0o750)).await?;

        let hash_dir = hash_dir.clone();
        let filename = filename.to_string();
        let body = body.to_vec();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut temp = tempfile::NamedTempFile::new_in(&hash_dir)?;
            std::io::Write::write_all(&mut temp, &body)?;
            temp.as_file().sync_all()?;
            temp.as_file()
                .set_permissions(std::fs::Permissions::from_mode(0o750))?;
            temp.persist(hash_dir.join(&filename))
                .map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .expect("blocking install task panicked")
    }

    #[cfg(not(unix))]
    async fn install(
        &self,
        hash_dir: &PathBuf,
        filename: &str,
        body: &[u8],
    ) -> std::io::Result<()> {
        tokio::fs::create_dir_all(hash_dir).await?;

        let hash_dir = hash_dir.clone();
        let filename = filename.to_string();
        let body = body.to_vec();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut temp = tempfile::NamedTempFile::new_in(&hash_dir)?;
            std::io::Write::write_all(&mut temp, &body)?;
            temp.as_file().sync_all()?;
            temp.persist(hash_dir.join(&filename))
                .map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .expect("blocking install task panicked")
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use pta_transport::{fake::FakeTransport, FileUri, TaskServerClient};

    use super::*;

    fn client(transport: FakeTransport) -> TaskServerClient<FakeTransport> {
        TaskServerClient::new(transport, "https://server")
    }

    fn entry(name: &str, contents: &[u8]) -> FileEntry {
        let mut hasher = Sha256::new();
        hasher.update(contents);
        let hash = hex::encode(hasher.finalize());
        FileEntry {
            filename: name.to_string(),
            sha256: hash,
            size_bytes: contents.len() as u64,
            uri: FileUri {
                path: format!("https://server/files/{name}"),
                params: BTreeMap::new(),
            },
        }
    }

    #[tokio::test]
    async fn downloads_and_reports_cached() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FakeTransport::new();
        let file = entry("hello.sh", b"#!/bin/sh\necho hi\n");
        transport.queue(
            format!("https://server/files/hello.sh"),
            200,
            b"#!/bin/sh\necho hi\n".to_vec(),
        );

        let cache = ArtifactCache::new(dir.path(), client(transport));
        assert!(!cache.is_cached(&file).await);
        cache.ensure_cached(&[file.clone()]).await.unwrap();
        assert!(cache.is_cached(&file).await);
    }

    #[tokio::test]
    async fn detects_size_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FakeTransport::new();
        let file = entry("a.sh", b"short");
        transport.queue("https://server/files/a.sh", 200, b"short".to_vec());
        let cache = ArtifactCache::new(dir.path(), client(transport));
        cache.ensure_cached(&[file.clone()]).await.unwrap();

        // Corrupt by appending a byte directly to the cached file.
        let path = cache.final_path(&file);
        let mut contents = tokio::fs::read(&path).await.unwrap();
        contents.push(b'!');
        tokio::fs::write(&path, contents).await.unwrap();

        assert!(!cache.is_cached(&file).await);
    }

    #[tokio::test]
    async fn detects_single_byte_corruption_without_size_change() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FakeTransport::new();
        let file = entry("a.sh", b"0123456789");
        transport.queue("https://server/files/a.sh", 200, b"0123456789".to_vec());
        let cache = ArtifactCache::new(dir.path(), client(transport));
        cache.ensure_cached(&[file.clone()]).await.unwrap();

        let path = cache.final_path(&file);
        let mut contents = tokio::fs::read(&path).await.unwrap();
        contents[0] = b'X';
        tokio::fs::write(&path, contents).await.unwrap();

        assert!(!cache.is_cached(&file).await);
    }

    #[tokio::test]
    async fn missing_directory_and_file_are_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FakeTransport::new();
        let file = entry("never-downloaded.sh", b"data");
        let cache = ArtifactCache::new(dir.path(), client(transport));
        assert!(!cache.is_cached(&file).await);
    }

    #[tokio::test]
    async fn retries_once_on_server_error_then_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FakeTransport::new();
        let file = entry("flaky.sh", b"payload");
        transport.queue("https://server/files/flaky.sh", 500, b"".to_vec());
        transport.queue("https://server/files/flaky.sh", 200, b"payload".to_vec());

        let cache = ArtifactCache::new(dir.path(), client(transport.clone()));
        cache.ensure_cached(&[file.clone()]).await.unwrap();
        assert!(cache.is_cached(&file).await);
        assert_eq!(transport.call_count("https://server/files/flaky.sh"), 2);
    }

    #[tokio::test]
    async fn surfaces_error_after_exhausting_retries() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FakeTransport::new();
        let file = entry("always-fails.sh", b"payload");
        transport.queue("https://server/files/always-fails.sh", 500, b"".to_vec());
        transport.queue("https://server/files/always-fails.sh", 500, b"".to_vec());

        let cache = ArtifactCache::new(dir.path(), client(transport.clone()));
        let result = cache.ensure_cached(&[file]).await;
        assert!(result.is_err());
        assert_eq!(
            transport.call_count("https://server/files/always-fails.sh"),
            2
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_fetches_of_the_same_hash_never_expose_a_short_file() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FakeTransport::new();
        let payload = vec![7u8; 4096];
        let file = entry("race.sh", &payload);
        transport.queue("https://server/files/race.sh", 200, payload.clone());
        transport.queue("https://server/files/race.sh", 200, payload.clone());

        let cache_a = ArtifactCache::new(dir.path(), client(transport.clone()));
        let cache_b = ArtifactCache::new(dir.path(), client(transport));

        let files_a = [file.clone()];
        let files_b = [file.clone()];
        let (r1, r2) = tokio::join!(
            cache_a.ensure_cached(&files_a),
            cache_b.ensure_cached(&files_b),
        );
        r1.unwrap();
        r2.unwrap();

        assert!(cache_a.is_cached(&file).await);
    }
}
