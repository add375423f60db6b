//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::error::Result;
use std::path::{Path, PathBuf};
use std::time::Duration;

impl Config {
    /// Load configuration from a YAML file, then apply environment overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = serde_yaml::from_str(&content)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Apply `API_KEY`, `PORT`, `DATABASE_URL` and `UPLOAD_DIR` overrides.
    ///
    /// Unparseable `PORT` values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("API_KEY").filter(|v| !v.is_empty()) {
            self.server.api_key = key;
        }
        if let Some(port) = lookup("PORT").and_then(|v| v.trim().parse().ok()) {
            self.server.port = port;
        }
        if let Some(url) = lookup("DATABASE_URL").filter(|v| !v.is_empty()) {
            self.database.url = Some(url);
        }
        if let Some(dir) = lookup("UPLOAD_DIR").filter(|v| !v.is_empty()) {
            self.ingest.upload_dir = PathBuf::from(dir);
        }
    }
}

impl ServerConfig {
    /// Socket address string for the listener.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

impl DatabaseConfig {
    /// Build a tokio-postgres configuration.
    pub fn pg_config(&self) -> Result<tokio_postgres::Config> {
        if let Some(url) = &self.url {
            return url.parse().map_err(|e| {
                crate::error::IngestError::Config(format!("database.url is invalid: {}", e))
            });
        }

        let mut pg_config = tokio_postgres::Config::new();
        pg_config.host(&self.host);
        pg_config.port(self.port);
        pg_config.dbname(&self.database);
        pg_config.user(&self.user);
        pg_config.password(&self.password);
        Ok(pg_config)
    }

    /// Human-readable target for log lines; never includes credentials.
    pub fn describe(&self) -> String {
        if self.url.is_some() {
            "database.url".to_string()
        } else {
            format!("{}:{}/{}", self.host, self.port, self.database)
        }
    }
}

impl IngestConfig {
    /// Transactional deadline as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const YAML: &str = r#"
server:
  port: 9000
  api_key: secret
database:
  host: localhost
  database: trading
  user: ingest
  password: pw
"#;

    #[test]
    fn test_from_yaml_applies_defaults() {
        let config = Config::from_yaml(YAML).unwrap();
        assert_eq!(config.server.bind, "0.0.0.0");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.database.port, 5432);
        assert_eq!(config.database.schema, "public");
        assert_eq!(config.ingest.upload_dir, PathBuf::from("uploads"));
        assert_eq!(config.ingest.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::from_yaml(YAML).unwrap();
        let env: HashMap<&str, &str> = [
            ("API_KEY", "from-env"),
            ("PORT", "7070"),
            ("DATABASE_URL", "postgres://u:p@db:5432/trading"),
            ("UPLOAD_DIR", "/srv/uploads"),
        ]
        .into_iter()
        .collect();

        config.apply_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.server.api_key, "from-env");
        assert_eq!(config.server.port, 7070);
        assert_eq!(
            config.database.url.as_deref(),
            Some("postgres://u:p@db:5432/trading")
        );
        assert_eq!(config.ingest.upload_dir, PathBuf::from("/srv/uploads"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bad_port_override_is_ignored() {
        let mut config = Config::from_yaml(YAML).unwrap();
        config.apply_overrides(|k| (k == "PORT").then(|| "not-a-port".to_string()));
        assert_eq!(config.server.port, 9000);
    }

    #[test]
    fn test_pg_config_from_url() {
        let mut config = Config::from_yaml(YAML).unwrap();
        config.database.url = Some("postgres://u:p@db:6543/trading".into());
        let pg = config.database.pg_config().unwrap();
        assert_eq!(pg.get_ports(), &[6543]);
        assert_eq!(pg.get_dbname(), Some("trading"));
        assert_eq!(config.database.describe(), "database.url");
    }

    #[test]
    fn test_database_section_may_come_from_environment() {
        let mut config: Config = serde_yaml::from_str("server:\n  api_key: k\n").unwrap();
        assert!(config.validate().is_err());

        config.apply_overrides(|k| {
            (k == "DATABASE_URL").then(|| "postgres://u:p@db/trading".to_string())
        });
        assert!(config.validate().is_ok());
        assert_eq!(config.database.schema, "public");
    }
}
