//! Provider selection and settings, from TOML or `FACEGATE_*` variables.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid {var}: {reason}")]
    Env { var: &'static str, reason: String },
}

/// Which adapter to build, tagged by `provider = "remote" | "self-hosted"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "kebab-case")]
pub enum ProviderConfig {
    Remote(RemoteConfig),
    SelfHosted(SelfHostedConfig),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Base URL of the wire-compatible face service.
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Provider account whose throughput quota the limiter protects.
    #[serde(default = "default_account")]
    pub account: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub rate_limiter: RateLimiterConfig,
}

/// Where reservations are made: an in-process coordinator or a shared one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum RateLimiterConfig {
    Local {
        #[serde(default = "default_tps")]
        tps: f64,
    },
    Coordinator { url: String },
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        RateLimiterConfig::Local { tps: default_tps() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelfHostedConfig {
    #[serde(default)]
    pub extractor: ExtractorConfig,
    #[serde(default)]
    pub store: StoreConfig,
    /// Confidence floor for the `AUTO` quality filter.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ExtractorConfig {
    Http {
        url: String,
        #[serde(default = "default_extractor_model")]
        model: String,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
        #[serde(default)]
        api_key: Option<String>,
    },
    Onnx {
        #[serde(default = "default_model_dir")]
        model_dir: PathBuf,
    },
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        ExtractorConfig::Onnx {
            model_dir: default_model_dir(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum StoreConfig {
    Memory,
    Sqlite {
        #[serde(default = "default_db_path")]
        path: PathBuf,
    },
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Sqlite { path: default_db_path() }
    }
}

impl Default for SelfHostedConfig {
    fn default() -> Self {
        Self {
            extractor: ExtractorConfig::default(),
            store: StoreConfig::default(),
            min_confidence: default_min_confidence(),
        }
    }
}

fn default_account() -> String {
    "default".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

fn default_tps() -> f64 {
    50.0
}

fn default_min_confidence() -> f32 {
    0.5
}

fn default_extractor_model() -> String {
    "buffalo_l".to_string()
}

/// `$XDG_DATA_HOME/facegate`, falling back to `~/.local/share/facegate`.
pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facegate")
}

pub fn default_model_dir() -> PathBuf {
    data_dir().join("models")
}

pub fn default_db_path() -> PathBuf {
    data_dir().join("faces.db")
}

impl ProviderConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Build from `FACEGATE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup.
    ///
    /// `FACEGATE_PROVIDER` picks the adapter (default `self-hosted`).
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| get(key).filter(|v| !v.trim().is_empty());

        let provider = get("FACEGATE_PROVIDER").unwrap_or_else(|| "self-hosted".to_string());
        match provider.as_str() {
            "remote" => {
                let endpoint = get("FACEGATE_REMOTE_URL").ok_or(ConfigError::Env {
                    var: "FACEGATE_REMOTE_URL",
                    reason: "required for the remote provider".into(),
                })?;
                let rate_limiter = match get("FACEGATE_COORDINATOR_URL") {
                    Some(url) => RateLimiterConfig::Coordinator { url },
                    None => RateLimiterConfig::Local {
                        tps: parse_var(&get, "FACEGATE_COORDINATOR_TPS", default_tps())?,
                    },
                };
                Ok(ProviderConfig::Remote(RemoteConfig {
                    endpoint,
                    api_key: get("FACEGATE_API_KEY"),
                    account: get("FACEGATE_ACCOUNT").unwrap_or_else(default_account),
                    timeout_secs: parse_var(&get, "FACEGATE_TIMEOUT_SECS", default_timeout_secs())?,
                    max_attempts: parse_var(&get, "FACEGATE_MAX_ATTEMPTS", default_max_attempts())?,
                    rate_limiter,
                }))
            }
            "self-hosted" => {
                let extractor = match get("FACEGATE_EXTRACTOR_URL") {
                    Some(url) => ExtractorConfig::Http {
                        url,
                        model: get("FACEGATE_EXTRACTOR_MODEL").unwrap_or_else(default_extractor_model),
                        timeout_secs: parse_var(&get, "FACEGATE_TIMEOUT_SECS", default_timeout_secs())?,
                        api_key: get("FACEGATE_API_KEY"),
                    },
                    None => ExtractorConfig::Onnx {
                        model_dir: get("FACEGATE_MODEL_DIR")
                            .map(PathBuf::from)
                            .unwrap_or_else(default_model_dir),
                    },
                };
                let store = match get("FACEGATE_DB_PATH").as_deref() {
                    Some(":memory:") => StoreConfig::Memory,
                    Some(path) => StoreConfig::Sqlite { path: PathBuf::from(path) },
                    None => StoreConfig::default(),
                };
                let min_confidence = parse_var(&get, "FACEGATE_MIN_CONFIDENCE", default_min_confidence())?;
                if !(0.0..=1.0).contains(&min_confidence) {
                    return Err(ConfigError::Env {
                        var: "FACEGATE_MIN_CONFIDENCE",
                        reason: format!("{min_confidence} is outside [0, 1]"),
                    });
                }
                Ok(ProviderConfig::SelfHosted(SelfHostedConfig {
                    extractor,
                    store,
                    min_confidence,
                }))
            }
            other => Err(ConfigError::Env {
                var: "FACEGATE_PROVIDER",
                reason: format!("unknown provider {other:?}, expected remote or self-hosted"),
            }),
        }
    }
}

fn parse_var<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match get(var) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Env {
            var,
            reason: format!("{raw:?}: {e}"),
        }),
        None => Ok(default),
    }
}
