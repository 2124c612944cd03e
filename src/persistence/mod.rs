//! Durable storage for client configuration and sessions.

#[cfg(test)]
pub(crate) mod contract;
pub mod file;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use file::FileSessionStore;
pub use migration::{migrate, MigrationReport};
pub use sqlite::SqliteSessionStore;
pub use traits::{MessageWrite, SessionRecord, SessionStore};

use crate::config::{Config, StorageBackend};
use anyhow::Result;
use std::sync::Arc;

/// Factory: create the configured storage backend rooted at the data directory.
pub fn create_store(config: &Config) -> Result<Arc<dyn SessionStore>> {
    let store: Arc<dyn SessionStore> = match config.storage.backend {
        StorageBackend::File => Arc::new(FileSessionStore::new(&config.data_dir)),
        StorageBackend::Sqlite => Arc::new(SqliteSessionStore::open(&config.database_path())?),
    };
    tracing::info!(
        backend = store.name(),
        data_dir = %config.data_dir.display(),
        "Session store ready"
    );
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn factory_honors_backend_selection() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = tmp.path().to_path_buf();

        config.storage.backend = StorageBackend::File;
        assert_eq!(create_store(&config).unwrap().name(), "file");

        config.storage.backend = StorageBackend::Sqlite;
        assert_eq!(create_store(&config).unwrap().name(), "sqlite");
        assert!(config.database_path().exists());
    }
}
