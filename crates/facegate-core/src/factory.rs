//! Builds providers from [`ProviderConfig`].

use crate::backoff::BackoffPolicy;
use crate::config::{ExtractorConfig, ProviderConfig, RateLimiterConfig, RemoteConfig, SelfHostedConfig, StoreConfig};
use crate::error::FaceResult;
use crate::extractor::{FaceExtractor, HttpExtractor, OnnxExtractor};
use crate::provider::{FaceRecognitionProvider, QualityThresholds, RemoteProvider, RetryPolicy, SelfHostedProvider};
use crate::rate_limiter::{spawn_coordinator, HttpRateLimiter, RateLimiter};
use crate::store::{MemoryVectorStore, SqliteVectorStore, VectorStore};
use std::sync::Arc;
use std::time::Duration;

/// The configured provider behind the common contract.
pub async fn create_provider(config: &ProviderConfig) -> FaceResult<Arc<dyn FaceRecognitionProvider>> {
    match config {
        ProviderConfig::Remote(remote) => Ok(Arc::new(create_remote(remote)?)),
        ProviderConfig::SelfHosted(cfg) => Ok(Arc::new(create_self_hosted(cfg).await?)),
    }
}

pub fn create_rate_limiter(remote: &RemoteConfig) -> FaceResult<Arc<dyn RateLimiter>> {
    Ok(match &remote.rate_limiter {
        RateLimiterConfig::Local { tps } => Arc::new(spawn_coordinator(&remote.account, *tps)),
        RateLimiterConfig::Coordinator { url } => Arc::new(HttpRateLimiter::new(url, &remote.account)?),
    })
}

pub fn create_remote(remote: &RemoteConfig) -> FaceResult<RemoteProvider> {
    let limiter = create_rate_limiter(remote)?;
    tracing::info!(
        endpoint = %remote.endpoint,
        account = %remote.account,
        limiter = ?remote.rate_limiter,
        "remote provider configured"
    );
    let provider = RemoteProvider::new(
        &remote.endpoint,
        remote.api_key.as_deref(),
        Duration::from_secs(remote.timeout_secs),
        limiter,
    )?;
    Ok(provider.with_retry(RetryPolicy {
        max_attempts: remote.max_attempts.max(1),
        backoff: BackoffPolicy::fast(),
    }))
}

pub async fn create_self_hosted(cfg: &SelfHostedConfig) -> FaceResult<SelfHostedProvider> {
    let extractor: Arc<dyn FaceExtractor> = match &cfg.extractor {
        ExtractorConfig::Http {
            url,
            model,
            timeout_secs,
            api_key,
        } => Arc::new(HttpExtractor::new(
            url,
            model,
            Duration::from_secs(*timeout_secs),
            api_key.as_deref(),
        )?),
        ExtractorConfig::Onnx { model_dir } => Arc::new(OnnxExtractor::spawn(model_dir)?),
    };

    let store: Arc<dyn VectorStore> = match &cfg.store {
        StoreConfig::Memory => Arc::new(MemoryVectorStore::new()),
        StoreConfig::Sqlite { path } => Arc::new(SqliteVectorStore::open(path).await?),
    };

    tracing::info!(
        model = extractor.model_name(),
        store = ?cfg.store,
        min_confidence = cfg.min_confidence,
        "self-hosted provider configured"
    );

    Ok(SelfHostedProvider::new(extractor, store).with_thresholds(QualityThresholds::with_auto(cfg.min_confidence)))
}
