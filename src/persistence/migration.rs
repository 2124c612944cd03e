//! One-shot copy of a flat-file data directory into another store.
//!
//! Running it again is harmless: sessions the destination already has are
//! reported as skipped and left untouched.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;

use super::file::{
    list_session_files, parse_session_document, read_optional, CLIENT_CONFIG_FILE, SESSIONS_DIR,
};
use super::traits::{MessageWrite, SessionStore};
use crate::agent::ClientConfig;

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub client_config_migrated: bool,
    pub sessions_migrated: usize,
    pub total_messages_migrated: usize,
    pub skipped: Vec<String>,
    pub errors: Vec<String>,
}

impl MigrationReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

pub async fn migrate(source_dir: &Path, destination: &dyn SessionStore) -> Result<MigrationReport> {
    let mut report = MigrationReport::default();

    migrate_client_config(source_dir, destination, &mut report).await?;

    let files = list_session_files(&source_dir.join(SESSIONS_DIR))
        .await
        .context("Failed to list source session files")?;

    for path in files {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());

        let record = match read_optional(&path)
            .await
            .and_then(|bytes| parse_session_document(&bytes.unwrap_or_default()))
        {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(file = %file_name, error = %e, "Skipping unparsable session file");
                report.errors.push(format!("{file_name}: {e:#}"));
                continue;
            }
        };

        let session_id = record.session_id().to_string();
        match destination.session_exists(&session_id).await {
            Ok(true) => {
                tracing::debug!(session_id = %session_id, "Session already present, skipping");
                report.skipped.push(session_id);
                continue;
            }
            Ok(false) => {}
            Err(e) => {
                report.errors.push(format!("{file_name}: {e:#}"));
                continue;
            }
        }

        match destination.save_session(&record, MessageWrite::Replace).await {
            Ok(()) => {
                report.sessions_migrated += 1;
                report.total_messages_migrated += record.messages.len();
            }
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Failed to migrate session");
                report.errors.push(format!("{file_name}: {e:#}"));
            }
        }
    }

    tracing::info!(
        destination = destination.name(),
        sessions = report.sessions_migrated,
        messages = report.total_messages_migrated,
        skipped = report.skipped.len(),
        errors = report.errors.len(),
        "Migration finished"
    );
    Ok(report)
}

async fn migrate_client_config(
    source_dir: &Path,
    destination: &dyn SessionStore,
    report: &mut MigrationReport,
) -> Result<()> {
    let Some(bytes) = read_optional(&source_dir.join(CLIENT_CONFIG_FILE)).await? else {
        return Ok(());
    };

    if destination.load_client_config().await?.is_some() {
        report.skipped.push("client-config: already exists".into());
        return Ok(());
    }

    match serde_json::from_slice::<ClientConfig>(&bytes) {
        Ok(config) => match destination.save_client_config(&config).await {
            Ok(()) => report.client_config_migrated = true,
            Err(e) => report.errors.push(format!("{CLIENT_CONFIG_FILE}: {e:#}")),
        },
        Err(e) => report.errors.push(format!("{CLIENT_CONFIG_FILE}: {e}")),
    }
    Ok(())
}
