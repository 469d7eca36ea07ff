use super::{
    validate_collection_id, validate_image, validate_index_options, validate_search, FaceRecognitionProvider,
};
use crate::backoff::BackoffPolicy;
use crate::error::{FaceResult, FaceServiceError, ProviderFailure};
use crate::http::{failure_from_reqwest, failure_from_response};
use crate::rate_limiter::RateLimiter;
use crate::types::{
    aggregate_by_photo, BoundingBox, Face, FaceMatch, FoundImages, IndexOptions, IndexedFace, PhotoIndexed,
    ProviderKind, UnindexedFace,
};
use crate::wire::{
    CreateCollectionRequest, CreateCollectionResponse, DeleteFacesRequest, DeleteFacesResponse, ImageBlob,
    IndexFacesRequest, IndexFacesResponse, SearchFacesByImageRequest, SearchFacesByImageResponse,
};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

pub const REMOTE_MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

/// Candidate faces requested per wanted photo, since several faces of one
/// photo may match.
const SEARCH_FANOUT: usize = 4;
const MAX_SEARCH_FACES: usize = 4096;
const UNKNOWN_MODEL_VERSION: &str = "unknown";

/// Bounded in-call retries for retryable failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts including the first.
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffPolicy::fast(),
        }
    }
}

/// Adapter for a managed face service speaking the PascalCase REST surface.
///
/// Every request first reserves a slot from the shared [`RateLimiter`], so all
/// gateway instances pace one account together.
pub struct RemoteProvider {
    client: reqwest::Client,
    base_url: String,
    limiter: Arc<dyn RateLimiter>,
    retry: RetryPolicy,
}

impl RemoteProvider {
    pub fn new(
        base_url: &str,
        api_key: Option<&str>,
        timeout: Duration,
        limiter: Arc<dyn RateLimiter>,
    ) -> FaceResult<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(key) = api_key.map(str::trim).filter(|k| !k.is_empty()) {
            let value = HeaderValue::from_str(&format!("Bearer {key}"))
                .map_err(|_| FaceServiceError::invalid("api_key", "not a valid header value"))?;
            headers.insert(AUTHORIZATION, value);
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| FaceServiceError::Custom(format!("failed to build provider HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            limiter,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client.request(method, format!("{}{path}", self.base_url))
    }

    fn fail(operation: &'static str, failure: ProviderFailure) -> FaceServiceError {
        FaceServiceError::provider(ProviderKind::Remote, operation, failure)
    }

    /// Send with rate limiting and bounded retries; only 2xx responses come back.
    async fn send(&self, operation: &'static str, build: impl Fn() -> RequestBuilder) -> FaceResult<Response> {
        let mut attempt = 1u32;
        loop {
            let reservation = self.limiter.reserve_batch(1).await?;
            if !reservation.delay.is_zero() {
                tracing::debug!(
                    operation,
                    delay_ms = reservation.delay.as_millis() as u64,
                    "waiting for rate limit slot"
                );
                tokio::time::sleep(reservation.delay).await;
            }

            let failure = match build().send().await {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) => failure_from_response(resp).await,
                Err(e) => failure_from_reqwest(&e),
            };
            let err = Self::fail(operation, failure);

            if err.is_throttle() {
                let extra = err.retry_after().unwrap_or_else(|| self.retry.backoff.delay(attempt));
                tracing::warn!(operation, attempt, delay_ms = extra.as_millis() as u64, "provider throttled");
                if let Err(e) = self.limiter.report_throttle(extra).await {
                    tracing::warn!(operation, error = %e, "failed to report throttle to coordinator");
                }
            }

            if !err.is_retryable() || attempt >= self.retry.max_attempts {
                return Err(err);
            }

            // After a throttle the limiter already holds everyone back.
            if !err.is_throttle() {
                let delay = self.retry.backoff.delay(attempt);
                tracing::warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying provider call"
                );
                tokio::time::sleep(delay).await;
            }
            attempt += 1;
        }
    }

    async fn decode<T: DeserializeOwned>(operation: &'static str, resp: Response) -> FaceResult<T> {
        resp.json::<T>()
            .await
            .map_err(|e| Self::fail(operation, failure_from_reqwest(&e)))
    }
}

fn has_code(err: &FaceServiceError, code: &str) -> bool {
    matches!(err, FaceServiceError::ProviderFailed { failure, .. } if failure.code.as_deref() == Some(code))
}

fn is_not_found(err: &FaceServiceError) -> bool {
    has_code(err, "ResourceNotFoundException")
        || matches!(err, FaceServiceError::ProviderFailed { failure, .. }
            if failure.code.is_none() && failure.status == Some(StatusCode::NOT_FOUND.as_u16()))
}

/// The provider rejects searches whose query image contains no face.
fn is_no_face_in_query(err: &FaceServiceError) -> bool {
    matches!(err, FaceServiceError::ProviderFailed { failure, .. }
        if failure.code.as_deref() == Some("InvalidParameterException")
            && failure.message.to_ascii_lowercase().contains("no face"))
}

fn into_not_found(err: FaceServiceError, collection_id: &str) -> FaceServiceError {
    if is_not_found(&err) {
        FaceServiceError::collection_not_found(collection_id)
    } else {
        err
    }
}

fn fraction(pct: Option<f32>) -> f32 {
    (pct.unwrap_or(0.0) / 100.0).clamp(0.0, 1.0)
}

#[async_trait]
impl FaceRecognitionProvider for RemoteProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Remote
    }

    async fn create_collection(&self, collection_id: &str) -> FaceResult<String> {
        validate_collection_id(collection_id)?;
        let body = CreateCollectionRequest {
            collection_id: collection_id.to_string(),
        };
        match self
            .send("create_collection", || self.request(Method::POST, "/collections").json(&body))
            .await
        {
            Ok(resp) => {
                let created: CreateCollectionResponse = Self::decode("create_collection", resp).await?;
                tracing::info!(
                    collection_id,
                    model = %created.face_model_version,
                    "collection created"
                );
                Ok(collection_id.to_string())
            }
            Err(e) if has_code(&e, "ResourceAlreadyExistsException") => {
                tracing::debug!(collection_id, "collection already exists");
                Ok(collection_id.to_string())
            }
            Err(e) => Err(e),
        }
    }

    async fn delete_collection(&self, collection_id: &str) -> FaceResult<()> {
        validate_collection_id(collection_id)?;
        let path = format!("/collections/{collection_id}");
        match self.send("delete_collection", || self.request(Method::DELETE, &path)).await {
            Ok(_) => {
                tracing::info!(collection_id, "collection deleted");
                Ok(())
            }
            Err(e) if is_not_found(&e) => {
                tracing::debug!(collection_id, "collection already absent");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn index_photo(
        &self,
        collection_id: &str,
        photo_id: &str,
        image: &[u8],
        options: &IndexOptions,
    ) -> FaceResult<PhotoIndexed> {
        validate_collection_id(collection_id)?;
        validate_image(image, REMOTE_MAX_IMAGE_BYTES)?;
        validate_index_options(options)?;

        let body = IndexFacesRequest {
            image: ImageBlob {
                bytes: BASE64.encode(image),
            },
            external_image_id: photo_id.to_string(),
            detection_attributes: vec![if options.detect_attributes { "ALL" } else { "DEFAULT" }.to_string()],
            max_faces: Some(u32::try_from(options.max_faces).unwrap_or(u32::MAX)),
            quality_filter: options.quality_filter,
        };
        let path = format!("/collections/{collection_id}/index-faces");
        let resp = self
            .send("index_photo", || self.request(Method::POST, &path).json(&body))
            .await
            .map_err(|e| into_not_found(e, collection_id))?;
        let indexed: IndexFacesResponse = Self::decode("index_photo", resp).await?;

        let faces: Vec<IndexedFace> = indexed
            .face_records
            .into_iter()
            .filter_map(|record| {
                let face_id = record.face.face_id?;
                Some(IndexedFace {
                    face: Face {
                        face_id,
                        bounding_box: record.face.bounding_box.map(BoundingBox::from).unwrap_or_default(),
                        confidence: fraction(record.face.confidence),
                        attributes: record.face_detail.as_ref().and_then(|d| d.attributes()),
                        provider: ProviderKind::Remote,
                    },
                    external_image_id: record.face.external_image_id.unwrap_or_else(|| photo_id.to_string()),
                })
            })
            .collect();

        let unindexed_faces = indexed
            .unindexed_faces
            .into_iter()
            .map(|u| UnindexedFace {
                reasons: u.reasons,
                bounding_box: u.face_detail.as_ref().and_then(|d| d.bounding_box).map(BoundingBox::from),
                confidence: u.face_detail.as_ref().and_then(|d| d.confidence).map(|c| fraction(Some(c))),
            })
            .collect::<Vec<_>>();

        tracing::info!(
            collection_id,
            photo_id,
            indexed = faces.len(),
            unindexed = unindexed_faces.len(),
            "photo indexed"
        );

        Ok(PhotoIndexed {
            faces,
            unindexed_faces,
            model_version: indexed
                .face_model_version
                .unwrap_or_else(|| UNKNOWN_MODEL_VERSION.to_string()),
            provider: ProviderKind::Remote,
        })
    }

    async fn find_images_by_face(
        &self,
        collection_id: &str,
        image: &[u8],
        min_similarity: f32,
        max_results: usize,
    ) -> FaceResult<FoundImages> {
        validate_collection_id(collection_id)?;
        validate_image(image, REMOTE_MAX_IMAGE_BYTES)?;
        validate_search(min_similarity, max_results)?;

        let body = SearchFacesByImageRequest {
            image: ImageBlob {
                bytes: BASE64.encode(image),
            },
            max_faces: Some(max_results.saturating_mul(SEARCH_FANOUT).min(MAX_SEARCH_FACES) as u32),
            face_match_threshold: Some(min_similarity * 100.0),
        };
        let path = format!("/collections/{collection_id}/search-faces-by-image");
        let resp = match self
            .send("find_images_by_face", || self.request(Method::POST, &path).json(&body))
            .await
        {
            Ok(resp) => resp,
            Err(e) if is_no_face_in_query(&e) => {
                tracing::debug!(collection_id, "query image has no face");
                return Ok(FoundImages::default());
            }
            Err(e) => return Err(into_not_found(e, collection_id)),
        };
        let found: SearchFacesByImageResponse = Self::decode("find_images_by_face", resp).await?;

        let matches: Vec<FaceMatch> = found
            .face_matches
            .into_iter()
            .filter_map(|m| {
                Some(FaceMatch {
                    face_id: m.face.face_id?,
                    external_image_id: m.face.external_image_id?,
                    similarity: fraction(Some(m.similarity)),
                    confidence: fraction(m.face.confidence),
                })
            })
            .collect();

        let result = aggregate_by_photo(&matches, max_results);
        tracing::debug!(
            collection_id,
            matched_faces = result.total_matched_faces,
            photos = result.photos.len(),
            "face search complete"
        );
        Ok(result)
    }

    async fn delete_faces(&self, collection_id: &str, face_ids: &[String]) -> FaceResult<Vec<String>> {
        validate_collection_id(collection_id)?;
        if face_ids.is_empty() {
            return Ok(Vec::new());
        }
        let body = DeleteFacesRequest {
            face_ids: face_ids.to_vec(),
        };
        let path = format!("/collections/{collection_id}/delete-faces");
        match self
            .send("delete_faces", || self.request(Method::POST, &path).json(&body))
            .await
        {
            Ok(resp) => {
                let deleted: DeleteFacesResponse = Self::decode("delete_faces", resp).await?;
                Ok(deleted.deleted_faces)
            }
            Err(e) if is_not_found(&e) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }
}
