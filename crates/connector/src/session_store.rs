use std::{fs, path::PathBuf, time::Duration};

use {anyhow::Result, tracing::{debug, warn}};

use courier_common::SessionKey;

/// Delay after an artifact purge before the directory may be read again.
/// Guards against filesystem write-after-delete visibility lag; not a lock.
pub const PURGE_SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Durable session artifacts: one directory per session key, written by the
/// protocol client, read on the next initialization to skip re-pairing.
#[derive(Clone)]
pub struct DurableSessionStore {
    base_dir: PathBuf,
}

impl DurableSessionStore {
    #[must_use]
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Artifact directory for one session key.
    #[must_use]
    pub fn dir_for(&self, key: &SessionKey) -> PathBuf {
        self.base_dir.join(key.fs_name())
    }

    pub async fn exists(&self, key: &SessionKey) -> bool {
        let dir = self.dir_for(key);
        tokio::task::spawn_blocking(move || dir.exists())
            .await
            .unwrap_or(false)
    }

    /// Delete every artifact belonging to `key`: the directory itself,
    /// name-case variants of it, and stray lock files left by a crashed
    /// client. Waits out the settle delay before returning so the next
    /// client never reads a half-deleted credential set.
    pub async fn purge(&self, key: &SessionKey) -> Result<()> {
        let base = self.base_dir.clone();
        let target = key.fs_name();

        tokio::task::spawn_blocking(move || -> Result<()> {
            let entries = match fs::read_dir(&base) {
                Ok(entries) => entries,
                // Nothing to purge if the base directory was never created.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
                Err(e) => return Err(e.into()),
            };

            let target_lower = target.to_lowercase();
            // "t1_a1.lock", "t1_a1.session.lock" — but never "t1_a10.lock".
            let lock_prefix = format!("{target_lower}.");
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().to_string();
                let name_lower = name.to_lowercase();

                let is_artifact = name_lower == target_lower;
                let is_lock =
                    name_lower.starts_with(&lock_prefix) && name_lower.ends_with(".lock");
                if !is_artifact && !is_lock {
                    continue;
                }

                let path = entry.path();
                let removed = if path.is_dir() {
                    fs::remove_dir_all(&path)
                } else {
                    fs::remove_file(&path)
                };
                match removed {
                    Ok(()) => debug!(path = %path.display(), "purged session artifact"),
                    Err(e) => warn!(path = %path.display(), error = %e, "failed to purge artifact"),
                }
            }
            Ok(())
        })
        .await??;

        tokio::time::sleep(PURGE_SETTLE_DELAY).await;
        Ok(())
    }
}
