//! HTTP surface of the daemon.
//!
//! Collection routes speak the same PascalCase JSON as the managed face
//! service, so the gateway's remote adapter can target this daemon unchanged.
//! The `/rate-limiter` routes expose the per-account coordinators shared by
//! every gateway instance.

use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use facegate_core::provider::SELF_HOSTED_MAX_IMAGE_BYTES;
use facegate_core::rate_limiter::{CoordinatorRegistry, RateLimiter};
use facegate_core::wire::{
    CoordinatorStatsResponse, CreateCollectionRequest, CreateCollectionResponse, DeleteCollectionResponse,
    DeleteFacesRequest, DeleteFacesResponse, ErrorBody, FaceDetail, FaceMatchRecord, FaceRecord, ImageBlob,
    IndexFacesRequest, IndexFacesResponse, ListCollectionsResponse, ReserveRequest, ReserveResponse,
    SearchFacesByImageRequest, SearchFacesByImageResponse, ThrottleRequest, UnindexedFaceRecord, WireBoundingBox,
    WireFace,
};
use facegate_core::{FaceRecognitionProvider, FaceServiceError, IndexOptions, SelfHostedProvider};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const SERVICE_NAME: &str = "facegated";
const DEFAULT_INDEX_MAX_FACES: u32 = 100;
const DEFAULT_SEARCH_MAX_FACES: u32 = 20;
/// Default `FaceMatchThreshold`, 0–100.
const DEFAULT_MATCH_THRESHOLD: f32 = 80.0;
/// Base64 inflates by 4/3; leave room for the JSON envelope.
const MAX_BODY_BYTES: usize = SELF_HOSTED_MAX_IMAGE_BYTES / 3 * 4 + 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub provider: Arc<SelfHostedProvider>,
    pub registry: Arc<CoordinatorRegistry>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/collections", get(list_collections).post(create_collection))
        .route("/collections/:collection_id", delete(delete_collection))
        .route("/collections/:collection_id/index-faces", post(index_faces))
        .route("/collections/:collection_id/search-faces-by-image", post(search_faces_by_image))
        .route("/collections/:collection_id/delete-faces", post(delete_faces))
        .route("/rate-limiter/:account", get(limiter_stats))
        .route("/rate-limiter/:account/reserve", post(reserve))
        .route("/rate-limiter/:account/throttle", post(throttle))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

/// Error response in the managed service's `{"__type", "message"}` shape.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    error_type: &'static str,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, error_type: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            error_type,
            message: message.into(),
        }
    }

    fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "InvalidParameterException", message)
    }
}

impl From<FaceServiceError> for ApiError {
    fn from(err: FaceServiceError) -> Self {
        let (status, error_type) = match &err {
            FaceServiceError::NotFound { .. } => (StatusCode::NOT_FOUND, "ResourceNotFoundException"),
            FaceServiceError::InvalidInput { .. } => (StatusCode::BAD_REQUEST, "InvalidParameterException"),
            FaceServiceError::ProviderFailed { throttle: true, .. } => {
                (StatusCode::TOO_MANY_REQUESTS, "ThrottlingException")
            }
            FaceServiceError::ProviderFailed { retryable: true, .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, "ServiceUnavailableException")
            }
            // The extractor refused the image itself.
            FaceServiceError::ProviderFailed { failure, .. }
                if failure.status.is_some_and(|s| (400..500).contains(&s)) =>
            {
                (StatusCode::BAD_REQUEST, "InvalidParameterException")
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "InternalServerError"),
        };
        if status.is_server_error() {
            tracing::error!(error = %err, "request failed");
        } else {
            tracing::debug!(error = %err, status = status.as_u16(), "request rejected");
        }
        Self::new(status, error_type, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error_type: self.error_type.to_string(),
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

fn decode_image(blob: &ImageBlob) -> Result<Vec<u8>, ApiError> {
    let image = BASE64
        .decode(blob.bytes.trim())
        .map_err(|e| ApiError::invalid_parameter(format!("Image.Bytes is not valid base64: {e}")))?;
    if image.len() > SELF_HOSTED_MAX_IMAGE_BYTES {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "ImageTooLargeException",
            format!(
                "image is {} bytes, the limit is {SELF_HOSTED_MAX_IMAGE_BYTES}",
                image.len()
            ),
        ));
    }
    Ok(image)
}

fn percent(fraction: f32) -> f32 {
    fraction * 100.0
}

fn millis(d: Duration) -> u64 {
    d.as_millis().try_into().unwrap_or(u64::MAX)
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": SERVICE_NAME,
        "model": state.provider.model_version(),
        "provider": state.provider.kind(),
    }))
}

async fn list_collections(State(state): State<AppState>) -> ApiResult<ListCollectionsResponse> {
    let collection_ids = state.provider.list_collections().await?;
    Ok(Json(ListCollectionsResponse { collection_ids }))
}

async fn create_collection(
    State(state): State<AppState>,
    Json(req): Json<CreateCollectionRequest>,
) -> ApiResult<CreateCollectionResponse> {
    let collection_id = state.provider.create_collection(&req.collection_id).await?;
    Ok(Json(CreateCollectionResponse {
        status_code: StatusCode::OK.as_u16(),
        collection_arn: format!("facegate:collection/{collection_id}"),
        face_model_version: state.provider.model_version().to_string(),
    }))
}

async fn delete_collection(
    State(state): State<AppState>,
    Path(collection_id): Path<String>,
) -> ApiResult<DeleteCollectionResponse> {
    state.provider.delete_collection(&collection_id).await?;
    tracing::info!(collection_id, "collection deleted");
    Ok(Json(DeleteCollectionResponse {
        status_code: StatusCode::OK.as_u16(),
    }))
}

async fn index_faces(
    State(state): State<AppState>,
    Path(collection_id): Path<String>,
    Json(req): Json<IndexFacesRequest>,
) -> ApiResult<IndexFacesResponse> {
    let image = decode_image(&req.image)?;
    let options = IndexOptions {
        max_faces: req.max_faces.unwrap_or(DEFAULT_INDEX_MAX_FACES) as usize,
        quality_filter: req.quality_filter,
        detect_attributes: req.detection_attributes.iter().any(|a| a == "ALL"),
    };
    let indexed = state
        .provider
        .index_photo(&collection_id, &req.external_image_id, &image, &options)
        .await?;

    let face_records = indexed
        .faces
        .into_iter()
        .map(|indexed_face| {
            let bounding_box = WireBoundingBox::from(indexed_face.face.bounding_box);
            let confidence = percent(indexed_face.face.confidence);
            FaceRecord {
                face: WireFace {
                    face_id: Some(indexed_face.face.face_id),
                    bounding_box: Some(bounding_box),
                    external_image_id: Some(indexed_face.external_image_id),
                    confidence: Some(confidence),
                },
                face_detail: Some(FaceDetail {
                    bounding_box: Some(bounding_box),
                    confidence: Some(confidence),
                    ..Default::default()
                }),
            }
        })
        .collect();

    let unindexed_faces = indexed
        .unindexed_faces
        .into_iter()
        .map(|face| UnindexedFaceRecord {
            reasons: face.reasons,
            face_detail: Some(FaceDetail {
                bounding_box: face.bounding_box.map(WireBoundingBox::from),
                confidence: face.confidence.map(percent),
                ..Default::default()
            }),
        })
        .collect();

    Ok(Json(IndexFacesResponse {
        face_records,
        unindexed_faces,
        face_model_version: Some(indexed.model_version),
    }))
}

async fn search_faces_by_image(
    State(state): State<AppState>,
    Path(collection_id): Path<String>,
    Json(req): Json<SearchFacesByImageRequest>,
) -> ApiResult<SearchFacesByImageResponse> {
    let image = decode_image(&req.image)?;
    let threshold = req.face_match_threshold.unwrap_or(DEFAULT_MATCH_THRESHOLD);
    if !(0.0..=100.0).contains(&threshold) {
        return Err(ApiError::invalid_parameter(format!(
            "FaceMatchThreshold {threshold} is outside [0, 100]"
        )));
    }
    let max_faces = req.max_faces.unwrap_or(DEFAULT_SEARCH_MAX_FACES) as usize;

    let search = state
        .provider
        .search_faces_by_image(&collection_id, &image, threshold / 100.0, max_faces)
        .await?;

    // No face in the query: an empty box and zero confidence, not an error.
    let (searched_box, searched_confidence) = match search.searched_face {
        Some((bounding_box, confidence)) => (WireBoundingBox::from(bounding_box), percent(confidence)),
        None => (WireBoundingBox::default(), 0.0),
    };

    let face_matches = search
        .matches
        .into_iter()
        .map(|m| FaceMatchRecord {
            face: WireFace {
                face_id: Some(m.face_id),
                bounding_box: None,
                external_image_id: Some(m.external_image_id),
                confidence: Some(percent(m.confidence)),
            },
            similarity: percent(m.similarity),
        })
        .collect();

    Ok(Json(SearchFacesByImageResponse {
        searched_face_bounding_box: Some(searched_box),
        searched_face_confidence: Some(searched_confidence),
        face_matches,
        face_model_version: Some(state.provider.model_version().to_string()),
    }))
}

async fn delete_faces(
    State(state): State<AppState>,
    Path(collection_id): Path<String>,
    Json(req): Json<DeleteFacesRequest>,
) -> ApiResult<DeleteFacesResponse> {
    let deleted_faces = state.provider.delete_faces(&collection_id, &req.face_ids).await?;
    Ok(Json(DeleteFacesResponse { deleted_faces }))
}

async fn reserve(
    State(state): State<AppState>,
    Path(account): Path<String>,
    Json(req): Json<ReserveRequest>,
) -> ApiResult<ReserveResponse> {
    let reservation = state.registry.get(&account)?.reserve_batch(req.count).await?;
    tracing::trace!(account, count = req.count, delay_ms = millis(reservation.delay), "slots reserved");
    Ok(Json(ReserveResponse {
        delay_ms: millis(reservation.delay),
        interval_ms: millis(reservation.interval),
    }))
}

async fn throttle(
    State(state): State<AppState>,
    Path(account): Path<String>,
    Json(req): Json<ThrottleRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .registry
        .get(&account)?
        .report_throttle(Duration::from_millis(req.delay_ms))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn limiter_stats(
    State(state): State<AppState>,
    Path(account): Path<String>,
) -> ApiResult<CoordinatorStatsResponse> {
    let stats = state.registry.lookup(&account)?.stats().await?;
    Ok(Json(CoordinatorStatsResponse {
        interval_ms: stats.interval_ms,
        pending_ms: stats.pending_ms,
        throttle_events: stats.throttle_events,
        throttle_penalty_ms: stats.throttle_penalty_ms,
    }))
}
