use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::warn;
use uuid::Uuid;

use crate::models::OutputContainer;
use crate::Result;

/// Allocates and reclaims per-session output directories.
///
/// Directories are named `<container>_<providerId>_<sessionId>` so a
/// directory listing alone identifies its owner. The `content/` subtree is
/// owned by [`super::ContentStore`] and never treated as a session directory.
#[derive(Debug, Clone)]
pub struct OutputDirectoryManager {
    root: PathBuf,
}

impl OutputDirectoryManager {
    #[must_use]
    pub const fn new(root: PathBuf) -> Self {
        Self { root }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn ensure_root(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    /// Create the exclusive working directory for a session.
    pub async fn allocate(
        &self,
        container: OutputContainer,
        provider_id: &str,
        session_id: Uuid,
    ) -> Result<PathBuf> {
        let dir = self
            .root
            .join(format!("{}_{provider_id}_{session_id}", container.as_str()));
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// Recover the owning session id from a directory name.
    #[must_use]
    pub fn session_id_from_dir_name(name: &str) -> Option<Uuid> {
        // The session id is always the last underscore-separated field; the
        // provider id may itself contain underscores.
        let candidate = name.rsplit('_').next()?;
        Uuid::parse_str(candidate).ok()
    }

    /// Session directories under the root with their modification times.
    /// Unparseable names are surfaced too so the sweeper can reclaim junk.
    pub async fn list_session_dirs(&self) -> Result<Vec<SessionDir>> {
        let mut dirs = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(dirs),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            if !file_type.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == "content" {
                continue;
            }
            let modified = entry
                .metadata()
                .await
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            dirs.push(SessionDir {
                session_id: Self::session_id_from_dir_name(&name),
                path: entry.path(),
                modified,
            });
        }

        Ok(dirs)
    }

    /// Remove a session directory. Missing directories are fine; the sweeper
    /// and an explicit stop can race here.
    pub async fn remove(&self, dir: &Path) {
        if let Err(e) = tokio::fs::remove_dir_all(dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(dir = %dir.display(), error = %e, "failed to remove session directory");
            }
        }
    }
}

/// One directory under the session root.
#[derive(Debug)]
pub struct SessionDir {
    pub session_id: Option<Uuid>,
    pub path: PathBuf,
    pub modified: SystemTime,
}
