use facegate_core::config::{ConfigError, SelfHostedConfig};
use facegate_core::ProviderConfig;
use std::net::SocketAddr;

const DEFAULT_BIND: &str = "0.0.0.0:8080";
const DEFAULT_COORDINATOR_TPS: f64 = 50.0;
const DEFAULT_MAX_ACCOUNTS: usize = 64;

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address (default: 0.0.0.0:8080).
    pub bind: SocketAddr,
    /// Extractor, vector store and quality floor of the face engine.
    pub engine: SelfHostedConfig,
    /// Throughput each coordinated account is paced to.
    pub coordinator_tps: f64,
    /// Most accounts the coordinator routes will track.
    pub max_accounts: usize,
}

impl Config {
    /// Load configuration from `FACEGATE_*` environment variables with defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| get(key).filter(|v| !v.trim().is_empty());

        let bind_raw = get("FACEGATE_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind = bind_raw.trim().parse::<SocketAddr>().map_err(|e| ConfigError::Env {
            var: "FACEGATE_BIND",
            reason: format!("{bind_raw:?}: {e}"),
        })?;

        let coordinator_tps = env_f64(&get, "FACEGATE_COORDINATOR_TPS", DEFAULT_COORDINATOR_TPS)?;
        if !(coordinator_tps.is_finite() && coordinator_tps > 0.0) {
            return Err(ConfigError::Env {
                var: "FACEGATE_COORDINATOR_TPS",
                reason: format!("{coordinator_tps} must be a positive number"),
            });
        }

        let max_accounts = match get("FACEGATE_MAX_ACCOUNTS") {
            Some(raw) => raw
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| ConfigError::Env {
                    var: "FACEGATE_MAX_ACCOUNTS",
                    reason: format!("{raw:?} must be a positive integer"),
                })?,
            None => DEFAULT_MAX_ACCOUNTS,
        };

        // The daemon always runs the local engine, whatever the gateway side selects.
        let engine = match ProviderConfig::from_lookup(|key| match key {
            "FACEGATE_PROVIDER" => Some("self-hosted".to_string()),
            _ => get(key),
        })? {
            ProviderConfig::SelfHosted(engine) => engine,
            ProviderConfig::Remote(_) => {
                return Err(ConfigError::Env {
                    var: "FACEGATE_PROVIDER",
                    reason: "facegated only runs the self-hosted engine".into(),
                })
            }
        };

        Ok(Self {
            bind,
            engine,
            coordinator_tps,
            max_accounts,
        })
    }
}

fn env_f64(get: &impl Fn(&str) -> Option<String>, key: &'static str, default: f64) -> Result<f64, ConfigError> {
    match get(key) {
        Some(raw) => raw.trim().parse::<f64>().map_err(|e| ConfigError::Env {
            var: key,
            reason: format!("{raw:?}: {e}"),
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facegate_core::config::{ExtractorConfig, StoreConfig};
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.bind, "0.0.0.0:8080".parse::<SocketAddr>().unwrap());
        assert_eq!(config.coordinator_tps, 50.0);
        assert_eq!(config.max_accounts, 64);
        assert!(matches!(config.engine.extractor, ExtractorConfig::Onnx { .. }));
        assert!(matches!(config.engine.store, StoreConfig::Sqlite { .. }));
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("FACEGATE_BIND", "127.0.0.1:9000"),
            ("FACEGATE_COORDINATOR_TPS", "30"),
            ("FACEGATE_MAX_ACCOUNTS", "4"),
            ("FACEGATE_EXTRACTOR_URL", "http://gpu:8000"),
            ("FACEGATE_DB_PATH", ":memory:"),
            ("FACEGATE_MIN_CONFIDENCE", "0.8"),
            ("FACEGATE_PROVIDER", "remote"),
        ]))
        .unwrap();
        assert_eq!(config.bind.port(), 9000);
        assert_eq!(config.coordinator_tps, 30.0);
        assert_eq!(config.max_accounts, 4);
        assert!(matches!(config.engine.extractor, ExtractorConfig::Http { ref url, .. } if url == "http://gpu:8000"));
        assert_eq!(config.engine.store, StoreConfig::Memory);
        assert_eq!(config.engine.min_confidence, 0.8);
    }

    #[test]
    fn test_invalid_values() {
        assert!(Config::from_lookup(lookup(&[("FACEGATE_BIND", "nowhere")])).is_err());
        assert!(Config::from_lookup(lookup(&[("FACEGATE_COORDINATOR_TPS", "0")])).is_err());
        assert!(Config::from_lookup(lookup(&[("FACEGATE_MAX_ACCOUNTS", "0")])).is_err());
        assert!(Config::from_lookup(lookup(&[("FACEGATE_MAX_ACCOUNTS", "many")])).is_err());
        assert!(Config::from_lookup(lookup(&[("FACEGATE_MIN_CONFIDENCE", "2")])).is_err());
    }
}
