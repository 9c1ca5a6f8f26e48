use chrono::{Duration, Utc};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

use crate::models::ContentEntry;
use crate::{Error, Result};

/// Read buffer for hashing and linking. Output segments are a few megabytes;
/// whole-file reads would still fit in memory but would spike under GC.
const HASH_BUF_SIZE: usize = 64 * 1024;

/// Files excluded from the canonical hash stream: encoder logs are mutable
/// diagnostics, not content.
const LOG_FILES: &[&str] = &["stdout.log", "stderr.log", "ffmpeg.log"];

/// Result of finalizing a session directory.
#[derive(Debug, Clone)]
pub struct FinalizedContent {
    pub content_hash: String,
    pub path: PathBuf,
    pub size_bytes: i64,
}

/// Content-addressed store under `<root>/content/`.
///
/// Finalized output lives at `content/<hash[0..2]>/<hash[2..4]>/<hash>/`,
/// hard-linked from the session directory when both are on one filesystem,
/// copied otherwise.
#[derive(Debug, Clone)]
pub struct ContentStore {
    root: PathBuf,
}

impl ContentStore {
    #[must_use]
    pub const fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Directory a hash lives at, whether or not it exists yet.
    #[must_use]
    pub fn content_path(&self, content_hash: &str) -> PathBuf {
        let (a, b) = (
            content_hash.get(0..2).unwrap_or("00"),
            content_hash.get(2..4).unwrap_or("00"),
        );
        self.root.join("content").join(a).join(b).join(content_hash)
    }

    /// Resolve a file inside a content directory, refusing traversal.
    pub fn resolve_file(&self, content_hash: &str, file: &str) -> Result<PathBuf> {
        if file.contains("..") || file.starts_with('/') {
            return Err(Error::BadRequest("invalid content file path".to_string()));
        }
        Ok(self.content_path(content_hash).join(file))
    }

    /// Compute the content hash of a finalized session directory and graft
    /// its files into the store.
    ///
    /// The hash is SHA-256 over the manifest bytes followed by every segment
    /// file in lexicographic name order, so it is independent of directory
    /// iteration order and stable across re-finalization.
    pub async fn finalize(
        &self,
        session_dir: &Path,
        manifest_file: &str,
        media_id: Option<&str>,
        retention: Duration,
    ) -> Result<(FinalizedContent, ContentEntry)> {
        let manifest_path = session_dir.join(manifest_file);
        if !manifest_path.is_file() {
            return Err(Error::Internal(format!(
                "finalize: manifest {} missing in {}",
                manifest_file,
                session_dir.display()
            )));
        }

        let mut files = collect_content_files(session_dir, manifest_file).await?;
        files.sort();

        let mut hasher = Sha256::new();
        let mut total_size = hash_file(&mut hasher, &manifest_path).await?;
        for name in &files {
            total_size += hash_file(&mut hasher, &session_dir.join(name)).await?;
        }
        let content_hash = hex::encode(hasher.finalize());

        let target = self.content_path(&content_hash);
        tokio::fs::create_dir_all(&target).await?;

        link_or_copy(&manifest_path, &target.join(manifest_file)).await?;
        for name in &files {
            link_or_copy(&session_dir.join(name), &target.join(name)).await?;
        }

        debug!(
            hash = %content_hash,
            files = files.len() + 1,
            bytes = total_size,
            "finalized session output"
        );

        let now = Utc::now();
        #[allow(clippy::cast_possible_wrap)]
        let entry = ContentEntry {
            content_hash: content_hash.clone(),
            path: target.to_string_lossy().into_owned(),
            size_bytes: total_size as i64,
            media_id: media_id.map(str::to_string),
            created_at: now,
            last_accessed: now,
            access_count: 0,
            expires_at: now + retention,
        };

        #[allow(clippy::cast_possible_wrap)]
        Ok((
            FinalizedContent {
                content_hash,
                path: target,
                size_bytes: total_size as i64,
            },
            entry,
        ))
    }

    /// Remove a content directory from disk.
    pub async fn remove(&self, content_hash: &str) {
        let dir = self.content_path(content_hash);
        if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(hash = %content_hash, error = %e, "failed to remove content directory");
            }
        }
    }
}

/// Segment and init files that participate in the canonical hash: every
/// regular file except the manifest and encoder logs.
async fn collect_content_files(session_dir: &Path, manifest_file: &str) -> Result<Vec<String>> {
    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(session_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == manifest_file || LOG_FILES.contains(&name.as_str()) {
            continue;
        }
        files.push(name);
    }
    Ok(files)
}

async fn hash_file(hasher: &mut Sha256, path: &Path) -> Result<u64> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut buf = vec![0u8; HASH_BUF_SIZE];
    let mut total = 0u64;
    loop {
        let read = file.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
        total += read as u64;
    }
    Ok(total)
}

/// Hard-link when source and target share a filesystem, copy otherwise.
async fn link_or_copy(src: &Path, dst: &Path) -> Result<()> {
    match tokio::fs::hard_link(src, dst).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(_) => {
            tokio::fs::copy(src, dst).await?;
            Ok(())
        }
    }
}
