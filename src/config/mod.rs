pub mod schema;

pub use schema::{Config, EventsConfig, GatewayConfig, StorageBackend, StorageConfig};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reexported_config_default_is_constructible() {
        let config = Config::default();

        assert_eq!(config.storage.backend, StorageBackend::File);
        assert!(config.gateway.max_body_bytes > 0);
        assert!(config.database_path().ends_with("sessions.db"));
    }
}
