//! Configuration validation.

use super::Config;
use crate::error::{IngestError, Result};
use crate::identifier::validate_identifier;

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    // Server validation
    if config.server.api_key.is_empty() {
        return Err(IngestError::Config(
            "server.api_key is required (or set API_KEY)".into(),
        ));
    }
    if config.server.bind.is_empty() {
        return Err(IngestError::Config("server.bind cannot be empty".into()));
    }

    // Database validation
    match &config.database.url {
        Some(url) => {
            url.parse::<tokio_postgres::Config>().map_err(|e| {
                IngestError::Config(format!("database.url is invalid: {}", e))
            })?;
        }
        None => {
            if config.database.host.is_empty() {
                return Err(IngestError::Config(
                    "database.host is required (or set DATABASE_URL)".into(),
                ));
            }
            if config.database.database.is_empty() {
                return Err(IngestError::Config("database.database is required".into()));
            }
            if config.database.user.is_empty() {
                return Err(IngestError::Config("database.user is required".into()));
            }
        }
    }
    validate_identifier(&config.database.schema)
        .map_err(|e| IngestError::Config(format!("database.schema: {}", e)))?;
    if config.database.max_connections == 0 {
        return Err(IngestError::Config(
            "database.max_connections must be at least 1".into(),
        ));
    }

    // Ingest validation
    if config.ingest.max_upload_bytes == 0 {
        return Err(IngestError::Config(
            "ingest.max_upload_bytes must be at least 1".into(),
        ));
    }
    if config.ingest.timeout_secs == 0 {
        return Err(IngestError::Config(
            "ingest.timeout_secs must be at least 1".into(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DatabaseConfig, IngestConfig, ServerConfig};

    fn valid_config() -> Config {
        Config {
            server: ServerConfig {
                bind: "127.0.0.1".to_string(),
                port: 8080,
                api_key: "key".to_string(),
            },
            database: DatabaseConfig {
                url: None,
                host: "localhost".to_string(),
                port: 5432,
                database: "trading".to_string(),
                user: "postgres".to_string(),
                password: "password".to_string(),
                schema: "public".to_string(),
                max_connections: 4,
            },
            ingest: IngestConfig::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        let config = valid_config();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_missing_api_key() {
        let mut config = valid_config();
        config.server.api_key = "".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_missing_database_host() {
        let mut config = valid_config();
        config.database.host = "".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_url_replaces_discrete_fields() {
        let mut config = valid_config();
        config.database.host = "".to_string();
        config.database.user = "".to_string();
        config.database.url = Some("postgres://ingest@db/trading".to_string());
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_invalid_url() {
        let mut config = valid_config();
        config.database.url = Some("postgres://host:notaport/db".to_string());
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_limits_rejected() {
        let mut config = valid_config();
        config.ingest.max_upload_bytes = 0;
        assert!(validate(&config).is_err());

        let mut config = valid_config();
        config.ingest.timeout_secs = 0;
        assert!(validate(&config).is_err());

        let mut config = valid_config();
        config.database.max_connections = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_schema_with_null_byte_rejected() {
        let mut config = valid_config();
        config.database.schema = "pub\0lic".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_database_config_debug_redacts_password() {
        let mut config = valid_config();
        config.database.password = "super_secret_password_123".to_string();
        let debug_output = format!("{:?}", config.database);
        assert!(
            debug_output.contains("[REDACTED]"),
            "Debug output should contain [REDACTED]"
        );
        assert!(
            !debug_output.contains("super_secret_password_123"),
            "Debug output should not contain actual password value"
        );
    }

    #[test]
    fn test_server_config_debug_redacts_api_key() {
        let mut config = valid_config();
        config.server.api_key = "super_secret_key_456".to_string();
        let debug_output = format!("{:?}", config.server);
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("super_secret_key_456"));
    }
}
