use std::path::PathBuf;
use std::time::Duration;

use otiflow_core::{SchedulerConfig, TextGenConfig};

const DEFAULT_PORT: u16 = 8000;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub db_path: PathBuf,
    pub port: u16,
    /// Empty means permissive CORS
    pub cors_origins: Vec<String>,
    /// Directory watched by the maildrop source; `None` disables ingestion input
    pub maildrop: Option<PathBuf>,
    pub scheduler: SchedulerConfig,
    /// Present only when an API key is configured
    pub textgen: Option<TextGenConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            port: DEFAULT_PORT,
            cors_origins: Vec::new(),
            maildrop: None,
            scheduler: SchedulerConfig::default(),
            textgen: None,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let secs = |key: &str, fallback: Duration| {
            var(key)
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|&n| n > 0)
                .map_or(fallback, Duration::from_secs)
        };

        let textgen = var("OTIFLOW_TEXTGEN_API_KEY").map(|key| {
            let mut config = TextGenConfig::new(key);
            if let Some(url) = var("OTIFLOW_TEXTGEN_URL") {
                config = config.with_base_url(url);
            }
            if let Some(model) = var("OTIFLOW_TEXTGEN_MODEL") {
                config = config.with_model(model);
            }
            config
        });

        Self {
            db_path: var("OTIFLOW_DB").map_or(defaults.db_path, PathBuf::from),
            port: var("OTIFLOW_PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.port),
            cors_origins: var("OTIFLOW_CORS_ORIGINS")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|o| !o.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            maildrop: var("OTIFLOW_MAILDROP").map(PathBuf::from),
            scheduler: SchedulerConfig {
                reconcile_every: secs("OTIFLOW_RECONCILE_SECS", defaults.scheduler.reconcile_every),
                fetch_timeout: secs("OTIFLOW_FETCH_TIMEOUT_SECS", defaults.scheduler.fetch_timeout),
            },
            textgen,
        }
    }
}

fn default_db_path() -> PathBuf {
    dirs::data_dir().map_or_else(
        || PathBuf::from("otiflow.db"),
        |dir| dir.join("otiflow").join("otiflow.db"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> ServerConfig {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ServerConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]);
        assert_eq!(config.port, 8000);
        assert!(config.cors_origins.is_empty());
        assert!(config.maildrop.is_none());
        assert!(config.textgen.is_none());
        assert_eq!(config.scheduler, SchedulerConfig::default());
        assert!(config.db_path.ends_with("otiflow.db"));
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("OTIFLOW_DB", "/tmp/x.db"),
            ("OTIFLOW_PORT", "9100"),
            ("OTIFLOW_CORS_ORIGINS", "http://a.test, http://b.test,"),
            ("OTIFLOW_MAILDROP", "/var/drop"),
            ("OTIFLOW_RECONCILE_SECS", "60"),
            ("OTIFLOW_FETCH_TIMEOUT_SECS", "5"),
            ("OTIFLOW_TEXTGEN_API_KEY", "secret"),
            ("OTIFLOW_TEXTGEN_MODEL", "small-model"),
        ]);
        assert_eq!(config.db_path, PathBuf::from("/tmp/x.db"));
        assert_eq!(config.port, 9100);
        assert_eq!(config.cors_origins, vec!["http://a.test", "http://b.test"]);
        assert_eq!(config.maildrop, Some(PathBuf::from("/var/drop")));
        assert_eq!(config.scheduler.reconcile_every, Duration::from_secs(60));
        assert_eq!(config.scheduler.fetch_timeout, Duration::from_secs(5));
        let textgen = config.textgen.unwrap();
        assert_eq!(textgen.api_key, "secret");
        assert_eq!(textgen.model, "small-model");
    }

    #[test]
    fn test_bad_numbers_fall_back() {
        let config = config_from(&[("OTIFLOW_PORT", "http"), ("OTIFLOW_RECONCILE_SECS", "0")]);
        assert_eq!(config.port, 8000);
        assert_eq!(config.scheduler.reconcile_every, Duration::from_secs(300));
    }
}
