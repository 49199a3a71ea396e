//! Configuration
//!
//! Read once at process start and passed down by value; nothing here is
//! mutated afterwards.

use std::time::Duration;

/// Default upper bound on items in one sync batch
pub const DEFAULT_MAX_SYNC_BATCH: usize = 500;

/// Default upper bound on a single document's size (10 MiB)
pub const DEFAULT_MAX_DOCUMENT_BYTES: u64 = 10 * 1024 * 1024;

/// Limits applied by the case service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseConfig {
    pub max_sync_batch: usize,
    pub max_document_bytes: u64,
}

impl Default for CaseConfig {
    fn default() -> Self {
        Self {
            max_sync_batch: DEFAULT_MAX_SYNC_BATCH,
            max_document_bytes: DEFAULT_MAX_DOCUMENT_BYTES,
        }
    }
}

impl CaseConfig {
    /// `CASE_SYNC_MAX_BATCH` and `CASE_MAX_DOCUMENT_BYTES`; unset or
    /// unparsable values fall back to the defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            max_sync_batch: lookup("CASE_SYNC_MAX_BATCH")
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_sync_batch),
            max_document_bytes: lookup("CASE_MAX_DOCUMENT_BYTES")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_document_bytes),
        }
    }
}

/// Fallback when `DATABASE_URL` is unset
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost:5432/cases";

/// Default pool size when `DATABASE_POOL_SIZE` is unset
pub const DEFAULT_POOL_SIZE: u32 = 10;

/// Connection pool settings for the Postgres store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub database_url: String,
    pub max_connections: u32,
    /// How long a caller waits for a pooled connection
    pub acquire_timeout: Duration,
    pub idle_timeout: Option<Duration>,
    pub max_lifetime: Option<Duration>,
}

impl Default for DatabaseConfig {
    /// Reads `DATABASE_URL` and `DATABASE_POOL_SIZE` from the environment
    fn default() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

impl DatabaseConfig {
    /// Only when `DATABASE_URL` is set
    pub fn from_env() -> Option<Self> {
        std::env::var("DATABASE_URL").ok()?;
        Some(Self::default())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            database_url: lookup("DATABASE_URL")
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            max_connections: lookup("DATABASE_POOL_SIZE")
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_POOL_SIZE),
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Some(Duration::from_secs(10 * 60)),
            max_lifetime: Some(Duration::from_secs(30 * 60)),
        }
    }

    /// URL with the password replaced, for logging
    pub fn masked_url(&self) -> String {
        mask_database_url(&self.database_url)
    }
}

fn mask_database_url(url: &str) -> String {
    let Ok(mut parsed) = url::Url::parse(url) else {
        return "***".to_string();
    };
    if parsed.password().is_some() && parsed.set_password(Some("***")).is_err() {
        return "***".to_string();
    }
    parsed.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_case_config_defaults() {
        let config = CaseConfig::from_lookup(|_| None);
        assert_eq!(config, CaseConfig::default());
        assert_eq!(config.max_document_bytes, 10_485_760);
    }

    #[test]
    fn test_case_config_overrides() {
        let vars: HashMap<&str, &str> = [
            ("CASE_SYNC_MAX_BATCH", "25"),
            ("CASE_MAX_DOCUMENT_BYTES", "oops"),
        ]
        .into_iter()
        .collect();
        let config = CaseConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.max_sync_batch, 25);
        assert_eq!(config.max_document_bytes, DEFAULT_MAX_DOCUMENT_BYTES);
    }

    #[test]
    fn test_zero_batch_size_ignored() {
        let config = CaseConfig::from_lookup(|k| {
            (k == "CASE_SYNC_MAX_BATCH").then(|| "0".to_string())
        });
        assert_eq!(config.max_sync_batch, DEFAULT_MAX_SYNC_BATCH);
    }

    #[test]
    fn test_masks_password() {
        assert_eq!(
            mask_database_url("postgresql://cases:secret@db:5432/cases"),
            "postgresql://cases:***@db:5432/cases"
        );
        assert_eq!(mask_database_url("not a url"), "***");
        assert_eq!(
            mask_database_url("postgresql://localhost:5432/cases"),
            "postgresql://localhost:5432/cases"
        );
    }

    #[test]
    fn test_database_config_from_lookup() {
        let config = DatabaseConfig::from_lookup(|k| match k {
            "DATABASE_URL" => Some("postgresql://db/cases".to_string()),
            "DATABASE_POOL_SIZE" => Some("0".to_string()),
            _ => None,
        });
        assert_eq!(config.database_url, "postgresql://db/cases");
        assert_eq!(config.max_connections, DEFAULT_POOL_SIZE);

        let config = DatabaseConfig::from_lookup(|k| {
            (k == "DATABASE_POOL_SIZE").then(|| "4".to_string())
        });
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.max_connections, 4);
    }
}
