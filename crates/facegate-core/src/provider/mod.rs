//! The provider-agnostic face recognition contract and its two adapters.

mod remote;
mod self_hosted;

pub use remote::{RemoteProvider, RetryPolicy, REMOTE_MAX_IMAGE_BYTES};
pub use self_hosted::{FaceSearch, QualityThresholds, SelfHostedProvider, SELF_HOSTED_MAX_IMAGE_BYTES};

use crate::error::{FaceResult, FaceServiceError};
use crate::types::{FoundImages, IndexOptions, PhotoIndexed, ProviderKind};
use async_trait::async_trait;

const MAX_COLLECTION_ID_LEN: usize = 255;

/// Face indexing and search, independent of which backend runs it.
///
/// Both adapters return identical shapes; callers pick one through
/// [`crate::factory::create_provider`] and never branch on the backend.
#[async_trait]
pub trait FaceRecognitionProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Create an isolated face collection. Returns the collection id.
    async fn create_collection(&self, collection_id: &str) -> FaceResult<String>;

    /// Delete a collection and all of its faces. A missing collection is success.
    async fn delete_collection(&self, collection_id: &str) -> FaceResult<()>;

    /// Detect and store the faces of one photo. A photo with no faces is success.
    async fn index_photo(
        &self,
        collection_id: &str,
        photo_id: &str,
        image: &[u8],
        options: &IndexOptions,
    ) -> FaceResult<PhotoIndexed>;

    /// Photos containing the most confident face of `image`, best match first.
    ///
    /// `min_similarity` is a fraction in [0, 1].
    async fn find_images_by_face(
        &self,
        collection_id: &str,
        image: &[u8],
        min_similarity: f32,
        max_results: usize,
    ) -> FaceResult<FoundImages>;

    /// Remove individual faces. Returns the ids that were actually deleted.
    async fn delete_faces(&self, collection_id: &str, face_ids: &[String]) -> FaceResult<Vec<String>>;
}

/// 1–255 characters of `[A-Za-z0-9_.-]`.
pub fn validate_collection_id(collection_id: &str) -> FaceResult<()> {
    if collection_id.is_empty() || collection_id.len() > MAX_COLLECTION_ID_LEN {
        return Err(FaceServiceError::invalid(
            "collection_id",
            format!("must be 1-{MAX_COLLECTION_ID_LEN} characters"),
        ));
    }
    if let Some(c) = collection_id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')))
    {
        return Err(FaceServiceError::invalid(
            "collection_id",
            format!("unsupported character {c:?}"),
        ));
    }
    Ok(())
}

pub fn validate_image(image: &[u8], max_bytes: usize) -> FaceResult<()> {
    if image.is_empty() {
        return Err(FaceServiceError::invalid("image", "empty image"));
    }
    if image.len() > max_bytes {
        return Err(FaceServiceError::invalid(
            "image",
            format!("{} bytes exceeds the {max_bytes} byte limit", image.len()),
        ));
    }
    Ok(())
}

pub fn validate_index_options(options: &IndexOptions) -> FaceResult<()> {
    if options.max_faces == 0 {
        return Err(FaceServiceError::invalid("max_faces", "must be at least 1"));
    }
    Ok(())
}

pub fn validate_search(min_similarity: f32, max_results: usize) -> FaceResult<()> {
    if !(0.0..=1.0).contains(&min_similarity) {
        return Err(FaceServiceError::invalid(
            "min_similarity",
            format!("{min_similarity} is outside [0, 1]"),
        ));
    }
    if max_results == 0 {
        return Err(FaceServiceError::invalid("max_results", "must be at least 1"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_id_rules() {
        assert!(validate_collection_id("event-2024_06.main").is_ok());
        assert!(validate_collection_id("").is_err());
        assert!(validate_collection_id(&"a".repeat(256)).is_err());
        assert!(validate_collection_id(&"a".repeat(255)).is_ok());
        assert!(validate_collection_id("has space").is_err());
        assert!(validate_collection_id("slash/id").is_err());
    }

    #[test]
    fn test_image_rules() {
        assert!(validate_image(b"", 10).is_err());
        assert!(validate_image(&[0u8; 11], 10).is_err());
        assert!(validate_image(&[0u8; 10], 10).is_ok());
    }

    #[test]
    fn test_index_option_rules() {
        assert!(validate_index_options(&IndexOptions::default()).is_ok());
        let none = IndexOptions {
            max_faces: 0,
            ..IndexOptions::default()
        };
        assert!(matches!(
            validate_index_options(&none),
            Err(FaceServiceError::InvalidInput { field: "max_faces", .. })
        ));
    }

    #[test]
    fn test_search_rules() {
        assert!(validate_search(0.8, 10).is_ok());
        assert!(validate_search(0.0, 1).is_ok());
        assert!(validate_search(80.0, 10).is_err());
        assert!(validate_search(-0.1, 10).is_err());
        assert!(validate_search(f32::NAN, 10).is_err());
        assert!(validate_search(0.8, 0).is_err());
    }
}
