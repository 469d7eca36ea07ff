//! facegate core: provider-agnostic face indexing and search.
//!
//! A [`FaceRecognitionProvider`] indexes the faces of event photos into
//! isolated collections and finds the photos that contain a given face. Two
//! adapters implement it: [`RemoteProvider`] paces a managed service through a
//! per-account [`rate_limiter`], and [`SelfHostedProvider`] runs a local
//! [`extractor`] against a [`store::VectorStore`].

pub mod backoff;
pub mod config;
pub mod error;
pub mod extractor;
pub mod factory;
mod http;
pub mod provider;
pub mod rate_limiter;
pub mod similarity;
pub mod store;
pub mod types;
pub mod vision;
pub mod wire;

pub use config::{ConfigError, ProviderConfig};
pub use error::{FaceResult, FaceServiceError};
pub use factory::create_provider;
pub use provider::{FaceRecognitionProvider, RemoteProvider, SelfHostedProvider};
pub use types::*;
