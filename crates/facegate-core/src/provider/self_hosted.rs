use super::{
    validate_collection_id, validate_image, validate_index_options, validate_search, FaceRecognitionProvider,
};
use crate::error::{FaceResult, FaceServiceError};
use crate::extractor::{DetectedFace, FaceExtractor};
use crate::similarity::{distance_to_similarity, similarity_to_distance};
use crate::store::{NewFace, VectorStore};
use crate::types::{
    aggregate_by_photo, BoundingBox, Face, FaceMatch, FaceMetadata, FoundImages, IndexOptions, IndexedFace,
    PhotoIndexed, ProviderKind, QualityFilter, UnindexedFace,
};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

pub const SELF_HOSTED_MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

/// Faces requested from the extractor per photo; the rest are never seen.
const EXTRACT_LIMIT: usize = 100;
const SEARCH_FANOUT: usize = 4;
const MAX_SEARCH_FACES: usize = 4096;

pub const REASON_LOW_CONFIDENCE: &str = "LOW_CONFIDENCE";
pub const REASON_SMALL_BOUNDING_BOX: &str = "SMALL_BOUNDING_BOX";
pub const REASON_EXCEEDS_MAX_FACES: &str = "EXCEEDS_MAX_FACES";

/// Minimum detection confidence per [`QualityFilter`], plus the smallest
/// accepted box side as a fraction of the image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityThresholds {
    pub low: f32,
    pub auto: f32,
    pub medium: f32,
    pub high: f32,
    pub min_box_side: f32,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            low: 0.5,
            auto: 0.5,
            medium: 0.7,
            high: 0.9,
            min_box_side: 0.01,
        }
    }
}

impl QualityThresholds {
    /// Thresholds with `AUTO` pinned to a configured minimum confidence.
    pub fn with_auto(min_confidence: f32) -> Self {
        Self {
            auto: min_confidence.clamp(0.0, 1.0),
            ..Self::default()
        }
    }

    fn min_confidence(&self, filter: QualityFilter) -> Option<f32> {
        match filter {
            QualityFilter::None => None,
            QualityFilter::Low => Some(self.low),
            QualityFilter::Auto => Some(self.auto),
            QualityFilter::Medium => Some(self.medium),
            QualityFilter::High => Some(self.high),
        }
    }

    /// Reasons a face fails `filter`; empty means it passes.
    fn rejection_reasons(&self, filter: QualityFilter, face: &DetectedFace) -> Vec<String> {
        let Some(min_confidence) = self.min_confidence(filter) else {
            return Vec::new();
        };
        let mut reasons = Vec::new();
        if face.confidence < min_confidence {
            reasons.push(REASON_LOW_CONFIDENCE.to_string());
        }
        if face.bounding_box.min_side() < self.min_box_side {
            reasons.push(REASON_SMALL_BOUNDING_BOX.to_string());
        }
        reasons
    }
}

/// Face-level search result, before per-photo aggregation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FaceSearch {
    /// The query face that was searched, if the image had one.
    pub searched_face: Option<(BoundingBox, f32)>,
    pub matches: Vec<FaceMatch>,
}

/// Adapter over a local extractor and a vector store. No rate limiting.
pub struct SelfHostedProvider {
    extractor: Arc<dyn FaceExtractor>,
    store: Arc<dyn VectorStore>,
    thresholds: QualityThresholds,
}

impl SelfHostedProvider {
    pub fn new(extractor: Arc<dyn FaceExtractor>, store: Arc<dyn VectorStore>) -> Self {
        Self {
            extractor,
            store,
            thresholds: QualityThresholds::default(),
        }
    }

    pub fn with_thresholds(mut self, thresholds: QualityThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn model_version(&self) -> &str {
        self.extractor.model_name()
    }

    pub async fn list_collections(&self) -> FaceResult<Vec<String>> {
        self.store.list_collections().await
    }

    async fn require_collection(&self, collection_id: &str) -> FaceResult<()> {
        if self.store.collection_exists(collection_id).await? {
            Ok(())
        } else {
            Err(FaceServiceError::collection_not_found(collection_id))
        }
    }

    /// Search with the most confident face of `image`, returning face-level matches.
    ///
    /// `min_similarity` is a fraction in [0, 1]; an image without a face is an
    /// empty result.
    pub async fn search_faces_by_image(
        &self,
        collection_id: &str,
        image: &[u8],
        min_similarity: f32,
        max_faces: usize,
    ) -> FaceResult<FaceSearch> {
        validate_collection_id(collection_id)?;
        validate_image(image, SELF_HOSTED_MAX_IMAGE_BYTES)?;
        validate_search(min_similarity, max_faces)?;
        self.require_collection(collection_id).await?;

        let Some(query) = self.extractor.extract(image, 1).await?.into_iter().next() else {
            tracing::debug!(collection_id, "query image has no face");
            return Ok(FaceSearch::default());
        };

        let threshold = similarity_to_distance(min_similarity * 100.0);
        let hits = self
            .store
            .search_faces(collection_id, &query.embedding, max_faces, threshold)
            .await?;

        let matches = hits
            .into_iter()
            .map(|hit| FaceMatch {
                face_id: hit.face_id,
                external_image_id: hit.metadata.external_image_id,
                similarity: distance_to_similarity(hit.distance) / 100.0,
                confidence: hit.metadata.confidence,
            })
            .collect();

        Ok(FaceSearch {
            searched_face: Some((query.bounding_box, query.confidence)),
            matches,
        })
    }
}

#[async_trait]
impl FaceRecognitionProvider for SelfHostedProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::SelfHosted
    }

    async fn create_collection(&self, collection_id: &str) -> FaceResult<String> {
        validate_collection_id(collection_id)?;
        let created = self.store.create_collection(collection_id).await?;
        tracing::info!(collection_id, created, "create collection");
        Ok(collection_id.to_string())
    }

    async fn delete_collection(&self, collection_id: &str) -> FaceResult<()> {
        validate_collection_id(collection_id)?;
        self.store.delete_collection(collection_id).await
    }

    async fn index_photo(
        &self,
        collection_id: &str,
        photo_id: &str,
        image: &[u8],
        options: &IndexOptions,
    ) -> FaceResult<PhotoIndexed> {
        validate_collection_id(collection_id)?;
        validate_image(image, SELF_HOSTED_MAX_IMAGE_BYTES)?;
        validate_index_options(options)?;
        self.require_collection(collection_id).await?;

        let detected = self.extractor.extract(image, EXTRACT_LIMIT).await?;
        let indexed_at = Utc::now();

        let mut accepted: Vec<(String, DetectedFace)> = Vec::new();
        let mut unindexed_faces = Vec::new();
        for face in detected {
            let mut reasons = self.thresholds.rejection_reasons(options.quality_filter, &face);
            if reasons.is_empty() && accepted.len() >= options.max_faces {
                reasons.push(REASON_EXCEEDS_MAX_FACES.to_string());
            }
            if reasons.is_empty() {
                accepted.push((Uuid::new_v4().to_string(), face));
            } else {
                unindexed_faces.push(UnindexedFace {
                    reasons,
                    bounding_box: Some(face.bounding_box),
                    confidence: Some(face.confidence),
                });
            }
        }

        let new_faces: Vec<NewFace> = accepted
            .iter()
            .map(|(face_id, face)| NewFace {
                face_id: face_id.clone(),
                embedding: face.embedding.clone(),
                metadata: FaceMetadata {
                    external_image_id: photo_id.to_string(),
                    bounding_box: face.bounding_box,
                    confidence: face.confidence,
                    indexed_at,
                },
            })
            .collect();
        if !new_faces.is_empty() {
            self.store.add_faces(collection_id, new_faces).await?;
        }

        let faces: Vec<IndexedFace> = accepted
            .into_iter()
            .map(|(face_id, face)| IndexedFace {
                face: Face {
                    face_id,
                    bounding_box: face.bounding_box,
                    confidence: face.confidence,
                    attributes: None,
                    provider: ProviderKind::SelfHosted,
                },
                external_image_id: photo_id.to_string(),
            })
            .collect();

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
            model_version: self.model_version().to_string(),
            provider: ProviderKind::SelfHosted,
        })
    }

    async fn find_images_by_face(
        &self,
        collection_id: &str,
        image: &[u8],
        min_similarity: f32,
        max_results: usize,
    ) -> FaceResult<FoundImages> {
        validate_search(min_similarity, max_results)?;
        let fanout = max_results.saturating_mul(SEARCH_FANOUT).min(MAX_SEARCH_FACES);
        let search = self
            .search_faces_by_image(collection_id, image, min_similarity, fanout)
            .await?;

        let result = aggregate_by_photo(&search.matches, max_results);
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
        let deleted = self.store.delete_faces(collection_id, face_ids).await?;
        tracing::info!(collection_id, requested = face_ids.len(), deleted = deleted.len(), "faces deleted");
        Ok(deleted)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::collections::HashMap;

    /// Extractor returning canned faces per exact image bytes.
    #[derive(Default)]
    pub struct StubExtractor {
        faces: HashMap<Vec<u8>, Vec<DetectedFace>>,
    }

    impl StubExtractor {
        pub fn with(mut self, image: &[u8], faces: Vec<DetectedFace>) -> Self {
            self.faces.insert(image.to_vec(), faces);
            self
        }
    }

    pub fn face(confidence: f32, side: f32, embedding: Vec<f32>) -> DetectedFace {
        DetectedFace {
            bounding_box: BoundingBox {
                left: 0.1,
                top: 0.1,
                width: side,
                height: side,
            },
            confidence,
            embedding,
        }
    }

    #[async_trait]
    impl FaceExtractor for StubExtractor {
        fn model_name(&self) -> &str {
            "stub-v1"
        }

        async fn extract(&self, image: &[u8], max_faces: usize) -> FaceResult<Vec<DetectedFace>> {
            let mut faces = self.faces.get(image).cloned().unwrap_or_default();
            faces.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
            faces.truncate(max_faces);
            Ok(faces)
        }
    }
}
