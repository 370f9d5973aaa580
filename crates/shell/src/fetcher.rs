//! Fetcher that reads snapshots from JSON files on disk.

use std::path::PathBuf;

use async_trait::async_trait;
use forumcache_core::{Error, ResourceKind, Snapshot};
use forumcache_sync::Fetcher;

/// Reads `<dir>/<kind slug>.json`, e.g. `forum_list.json`.
#[derive(Debug, Clone)]
pub struct DirectoryFetcher {
    dir: PathBuf,
}

impl DirectoryFetcher {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, kind: ResourceKind) -> PathBuf {
        self.dir.join(format!("{}.json", kind.slug()))
    }
}

#[async_trait]
impl Fetcher for DirectoryFetcher {
    async fn fetch(&self, kind: ResourceKind) -> Result<Snapshot, Error> {
        let path = self.path_for(kind);
        let raw = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| Error::FetchFailed(format!("{}: {e}", path.display())))?;
        let snapshot: Snapshot = serde_json::from_str(&raw)
            .map_err(|e| Error::FetchFailed(format!("{}: malformed snapshot: {e}", path.display())))?;
        tracing::debug!(kind = %kind, path = %path.display(), "read snapshot");
        Ok(snapshot)
    }
}
