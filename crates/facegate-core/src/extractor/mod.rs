//! Image bytes → detected faces with embeddings.

mod http;
mod onnx;

pub use http::HttpExtractor;
pub use onnx::OnnxExtractor;

use crate::error::FaceResult;
use crate::types::BoundingBox;
use async_trait::async_trait;

/// One face found by an extractor.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedFace {
    pub bounding_box: BoundingBox,
    /// Detection confidence in [0, 1].
    pub confidence: f32,
    pub embedding: Vec<f32>,
}

#[async_trait]
pub trait FaceExtractor: Send + Sync {
    /// Model identifier reported as the collection's face model version.
    fn model_name(&self) -> &str;

    /// Faces in `image`, highest confidence first, at most `max_faces`.
    ///
    /// An image with no faces yields an empty vector, not an error.
    async fn extract(&self, image: &[u8], max_faces: usize) -> FaceResult<Vec<DetectedFace>>;
}

/// Sort by confidence descending and cap at `max_faces`.
pub(crate) fn rank_faces(mut faces: Vec<DetectedFace>, max_faces: usize) -> Vec<DetectedFace> {
    faces.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    faces.truncate(max_faces);
    faces
}
