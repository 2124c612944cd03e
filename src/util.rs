//! Small shared helpers: atomic file replacement and per-key async locks.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
#[cfg(unix)]
use tokio::fs::File;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::OwnedMutexGuard;

/// Replace `path` with `contents` atomically.
///
/// Writes a uniquely named sibling temp file, fsyncs it, keeps a `.bak` copy of
/// the previous file while renaming over it, and restores the backup if the
/// rename fails.
pub(crate) async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent_dir = path
        .parent()
        .context("Target path must have a parent directory")?;

    fs::create_dir_all(parent_dir)
        .await
        .with_context(|| format!("Failed to create directory: {}", parent_dir.display()))?;

    let file_name = path
        .file_name()
        .and_then(|v| v.to_str())
        .context("Target path must have a UTF-8 file name")?;
    let temp_path = parent_dir.join(format!(".{file_name}.tmp-{}", uuid::Uuid::new_v4()));
    let backup_path = parent_dir.join(format!("{file_name}.bak"));

    let mut temp_file = OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_path)
        .await
        .with_context(|| format!("Failed to create temporary file: {}", temp_path.display()))?;
    temp_file
        .write_all(contents)
        .await
        .context("Failed to write temporary file contents")?;
    temp_file
        .sync_all()
        .await
        .context("Failed to fsync temporary file")?;
    drop(temp_file);

    let had_existing = fs::try_exists(path).await.unwrap_or(false);
    if had_existing {
        fs::copy(path, &backup_path).await.with_context(|| {
            format!(
                "Failed to create backup before atomic replace: {}",
                backup_path.display()
            )
        })?;
    }

    if let Err(e) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        if had_existing && fs::try_exists(&backup_path).await.unwrap_or(false) {
            fs::copy(&backup_path, path)
                .await
                .context("Failed to restore backup")?;
        }
        anyhow::bail!("Failed to atomically replace {}: {e}", path.display());
    }

    sync_directory(parent_dir).await?;

    if had_existing {
        let _ = fs::remove_file(&backup_path).await;
    }

    Ok(())
}

async fn sync_directory(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        let dir = File::open(path)
            .await
            .with_context(|| format!("Failed to open directory for fsync: {}", path.display()))?;
        dir.sync_all()
            .await
            .with_context(|| format!("Failed to fsync directory metadata: {}", path.display()))?;
        Ok(())
    }

    #[cfg(not(unix))]
    {
        let _ = path;
        Ok(())
    }
}

/// Table of async mutexes addressed by string key.
///
/// Holding the guard for one key never blocks callers of another key. Entries
/// are dropped again once no guard or waiter references them.
#[derive(Default)]
pub(crate) struct KeyedLocks {
    slots: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

/// Guard returned by [`KeyedLocks::lock`]; releases the key on drop.
pub(crate) struct KeyedGuard<'a> {
    owner: &'a KeyedLocks,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyedLocks {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) async fn lock(&self, key: &str) -> KeyedGuard<'_> {
        let slot = {
            let mut slots = self.slots.lock();
            slots
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        let guard = slot.lock_owned().await;
        KeyedGuard {
            owner: self,
            key: key.to_string(),
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.slots.lock().len()
    }
}

impl Drop for KeyedGuard<'_> {
    fn drop(&mut self) {
        // Release first so the strong count below only sees the table and waiters.
        drop(self.guard.take());
        let mut slots = self.owner.slots.lock();
        if let Some(slot) = slots.get(&self.key) {
            if Arc::strong_count(slot) == 1 {
                slots.remove(&self.key);
            }
        }
    }
}
