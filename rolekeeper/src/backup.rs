//! Dropbox mirror of the SQLite database.
//!
//! The database file is pulled once at startup, before the store opens, and
//! pushed after every mutation. Both directions are best-effort: callers log
//! failures and carry on with whatever is on local disk.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::store::Store;

const CONTENT_API: &str = "https://content.dropboxapi.com/2/files";

pub struct Backup {
    token: String,
    remote_path: String,
    base: String,
    http: reqwest::Client,
    /// Serializes uploads so a later push always carries a later snapshot.
    push_lock: tokio::sync::Mutex<()>,
}

impl Backup {
    pub fn new(token: impl Into<String>, remote_path: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            remote_path: remote_path.into(),
            base: CONTENT_API.to_string(),
            http: reqwest::Client::new(),
            push_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Point at a different content API root (local fakes).
    pub fn with_base_url(mut self, base: &str) -> Self {
        self.base = base.trim_end_matches('/').to_string();
        self
    }

    fn api_arg(&self, extra: serde_json::Value) -> String {
        let mut arg = serde_json::json!({ "path": self.remote_path });
        if let (Some(obj), Some(more)) = (arg.as_object_mut(), extra.as_object()) {
            obj.extend(more.clone());
        }
        arg.to_string()
    }

    /// Download the remote copy over `local`. Returns `false` when there is
    /// no remote copy yet.
    pub async fn pull(&self, local: &Path) -> Result<bool> {
        let resp = self
            .http
            .post(format!("{}/download", self.base))
            .bearer_auth(&self.token)
            .header("Dropbox-API-Arg", self.api_arg(serde_json::json!({})))
            .send()
            .await
            .context("Failed to reach Dropbox")?;

        let status = resp.status();
        if status == reqwest::StatusCode::CONFLICT {
            let body = resp.text().await.unwrap_or_default();
            if body.contains("not_found") {
                return Ok(false);
            }
            anyhow::bail!("Dropbox download error {status}: {body}");
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Dropbox download error {status}: {body}");
        }
        let bytes = resp.bytes().await.context("Failed to read Dropbox download")?;

        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let partial = sibling(local, "download");
        tokio::fs::write(&partial, &bytes)
            .await
            .with_context(|| format!("Failed to write {}", partial.display()))?;
        // A journal left over from the previous database would be replayed
        // onto the downloaded file.
        for suffix in ["wal", "shm"] {
            let _ = tokio::fs::remove_file(sibling(local, suffix)).await;
        }
        tokio::fs::rename(&partial, local)
            .await
            .with_context(|| format!("Failed to replace {}", local.display()))?;
        Ok(true)
    }

    /// Upload a fresh snapshot of `store`, overwriting the remote copy.
    pub async fn push(&self, store: &Store) -> Result<()> {
        let _serial = self.push_lock.lock().await;
        let snapshot = store.snapshot().context("Failed to snapshot database")?;
        let resp = self
            .http
            .post(format!("{}/upload", self.base))
            .bearer_auth(&self.token)
            .header(
                "Dropbox-API-Arg",
                self.api_arg(serde_json::json!({ "mode": "overwrite", "mute": true })),
            )
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(snapshot)
            .send()
            .await
            .context("Failed to reach Dropbox")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Dropbox upload error {status}: {body}");
        }
        Ok(())
    }

    /// Startup restore: pull and log the result, never fail.
    pub async fn restore(&self, local: &Path) {
        match self.pull(local).await {
            Ok(true) => tracing::info!(path = %local.display(), "Restored database from Dropbox"),
            Ok(false) => tracing::info!("No database in Dropbox yet, starting fresh"),
            Err(e) => tracing::warn!(error = %e, "Could not restore database from Dropbox"),
        }
    }
}

/// Restore the database from the backup (when configured) and open it.
///
/// Anything that later pushes a snapshot must open the store this way, or a
/// fresh host would overwrite the remote copy with an empty database.
pub async fn open_restored(backup: Option<&Backup>, path: &Path) -> Result<Store> {
    if let Some(backup) = backup {
        backup.restore(path).await;
    }
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    Store::open(path).with_context(|| format!("Failed to open database {}", path.display()))
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!("-{suffix}"));
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_arg_merges_options() {
        let backup = Backup::new("t", "/roles.db");
        let arg: serde_json::Value =
            serde_json::from_str(&backup.api_arg(serde_json::json!({ "mode": "overwrite" }))).unwrap();
        assert_eq!(arg["path"], "/roles.db");
        assert_eq!(arg["mode"], "overwrite");
    }

    #[test]
    fn sibling_appends_suffix() {
        assert_eq!(
            sibling(Path::new("data/roles.db"), "wal"),
            PathBuf::from("data/roles.db-wal")
        );
    }
}
