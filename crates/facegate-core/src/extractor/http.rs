use super::{rank_faces, DetectedFace, FaceExtractor};
use crate::error::{FaceResult, FaceServiceError};
use crate::http::{failure_from_reqwest, failure_from_response};
use crate::types::{BoundingBox, ProviderKind};
use crate::vision::recognizer::l2_normalize;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Server-side cap on faces per image.
const MAX_FACES_PER_IMAGE: usize = 100;

/// Client for a stateless recognition service exposing `POST /extract`.
pub struct HttpExtractor {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

#[derive(Serialize)]
struct ExtractRequest<'a> {
    image: &'a str,
    max_faces: usize,
    min_confidence: f32,
}

#[derive(Deserialize)]
struct ExtractResponse {
    #[serde(default)]
    faces: Vec<ExtractedFace>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    inference_ms: Option<f64>,
}

#[derive(Deserialize)]
struct ExtractedFace {
    embedding: Vec<f32>,
    bounding_box: RatioBox,
    confidence: f32,
}

/// Box already expressed as fractions of the image size.
#[derive(Deserialize)]
struct RatioBox {
    x: f32,
    y: f32,
    width: f32,
    height: f32,
}

impl From<RatioBox> for BoundingBox {
    fn from(b: RatioBox) -> Self {
        let left = b.x.clamp(0.0, 1.0);
        let top = b.y.clamp(0.0, 1.0);
        BoundingBox {
            left,
            top,
            width: b.width.clamp(0.0, 1.0 - left),
            height: b.height.clamp(0.0, 1.0 - top),
        }
    }
}

impl HttpExtractor {
    pub fn new(base_url: &str, model: &str, timeout: Duration, api_key: Option<&str>) -> FaceResult<Self> {
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
            .map_err(|e| FaceServiceError::Custom(format!("failed to build extractor HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/extract", base_url.trim_end_matches('/')),
            model: model.to_string(),
        })
    }

    fn fail(&self, failure: crate::error::ProviderFailure) -> FaceServiceError {
        FaceServiceError::provider(ProviderKind::SelfHosted, "extract", failure)
    }
}

#[async_trait]
impl FaceExtractor for HttpExtractor {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn extract(&self, image: &[u8], max_faces: usize) -> FaceResult<Vec<DetectedFace>> {
        let encoded = BASE64.encode(image);
        let request = ExtractRequest {
            image: &encoded,
            max_faces: max_faces.clamp(1, MAX_FACES_PER_IMAGE),
            // Quality filtering happens in the adapter, so ask for every detection.
            min_confidence: 0.0,
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.fail(failure_from_reqwest(&e)))?;
        if !resp.status().is_success() {
            return Err(self.fail(failure_from_response(resp).await));
        }

        let body: ExtractResponse = resp.json().await.map_err(|e| self.fail(failure_from_reqwest(&e)))?;
        tracing::debug!(
            faces = body.faces.len(),
            model = body.model.as_deref().unwrap_or(&self.model),
            inference_ms = body.inference_ms.unwrap_or_default(),
            "extraction complete"
        );

        // Services may return raw ArcFace vectors; the store's similarity scale assumes unit length.
        let faces = body
            .faces
            .into_iter()
            .map(|f| DetectedFace {
                bounding_box: f.bounding_box.into(),
                confidence: f.confidence,
                embedding: l2_normalize(&f.embedding),
            })
            .collect();
        Ok(rank_faces(faces, max_faces))
    }
}
