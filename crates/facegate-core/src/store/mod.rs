//! Collection-scoped embedding storage with Euclidean nearest-neighbour search.
//!
//! Embeddings go in through [`VectorStore::add_faces`] and never come back out:
//! searches and lookups only return distances and [`FaceMetadata`].

mod memory;
mod sqlite;

pub use memory::MemoryVectorStore;
pub use sqlite::SqliteVectorStore;

use crate::error::{FaceResult, FaceServiceError};
use crate::types::FaceMetadata;
use async_trait::async_trait;

/// A face to insert: id, embedding and its metadata.
#[derive(Debug, Clone)]
pub struct NewFace {
    pub face_id: String,
    pub embedding: Vec<f32>,
    pub metadata: FaceMetadata,
}

/// Metadata view of a stored face.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredFace {
    pub face_id: String,
    pub metadata: FaceMetadata,
}

/// One search hit, ranked by ascending distance.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorMatch {
    pub face_id: String,
    pub distance: f32,
    pub metadata: FaceMetadata,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create a collection. Returns `false` if it already existed.
    async fn create_collection(&self, collection_id: &str) -> FaceResult<bool>;

    /// Delete a collection and every face in it. Missing collections are not an error.
    async fn delete_collection(&self, collection_id: &str) -> FaceResult<()>;

    async fn list_collections(&self) -> FaceResult<Vec<String>>;

    async fn collection_exists(&self, collection_id: &str) -> FaceResult<bool>;

    async fn add_faces(&self, collection_id: &str, faces: Vec<NewFace>) -> FaceResult<()>;

    /// Faces within `distance_threshold` of the query, nearest first, at most `max_results`.
    async fn search_faces(
        &self,
        collection_id: &str,
        query: &[f32],
        max_results: usize,
        distance_threshold: f32,
    ) -> FaceResult<Vec<VectorMatch>>;

    /// Delete faces by id, returning the ids that existed.
    async fn delete_faces(&self, collection_id: &str, face_ids: &[String]) -> FaceResult<Vec<String>>;

    async fn get_face(&self, collection_id: &str, face_id: &str) -> FaceResult<Option<StoredFace>>;
}

/// Reject embeddings whose dimension differs from the collection's.
pub(crate) fn check_dimension(expected: Option<usize>, actual: usize) -> FaceResult<()> {
    if actual == 0 {
        return Err(FaceServiceError::invalid("embedding", "embedding is empty"));
    }
    match expected {
        Some(dim) if dim != actual => Err(FaceServiceError::invalid(
            "embedding",
            format!("expected {dim}-dim embedding, got {actual}"),
        )),
        _ => Ok(()),
    }
}

/// Sort ascending by distance and keep the first `max_results`.
pub(crate) fn rank(mut matches: Vec<VectorMatch>, max_results: usize) -> Vec<VectorMatch> {
    matches.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    matches.truncate(max_results);
    matches
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::types::BoundingBox;
    use chrono::Utc;

    pub fn new_face(face_id: &str, photo: &str, embedding: Vec<f32>) -> NewFace {
        NewFace {
            face_id: face_id.into(),
            embedding,
            metadata: FaceMetadata {
                external_image_id: photo.into(),
                bounding_box: BoundingBox {
                    left: 0.1,
                    top: 0.2,
                    width: 0.3,
                    height: 0.4,
                },
                confidence: 0.98,
                indexed_at: Utc::now(),
            },
        }
    }

    /// Behaviour every store implementation must share.
    pub async fn exercise_store(store: &dyn VectorStore) {
        assert!(store.create_collection("event-1").await.unwrap());
        assert!(!store.create_collection("event-1").await.unwrap());
        store.create_collection("event-2").await.unwrap();

        let mut ids = store.list_collections().await.unwrap();
        ids.sort();
        assert_eq!(ids, ["event-1", "event-2"]);
        assert!(store.collection_exists("event-1").await.unwrap());
        assert!(!store.collection_exists("nope").await.unwrap());

        store
            .add_faces(
                "event-1",
                vec![
                    new_face("a", "photo-1", vec![0.0, 0.0]),
                    new_face("b", "photo-1", vec![0.3, 0.4]),
                    new_face("c", "photo-2", vec![3.0, 4.0]),
                ],
            )
            .await
            .unwrap();

        // nearest first, far face filtered by threshold
        let hits = store.search_faces("event-1", &[0.0, 0.0], 10, 1.0).await.unwrap();
        let hit_ids: Vec<&str> = hits.iter().map(|h| h.face_id.as_str()).collect();
        assert_eq!(hit_ids, ["a", "b"]);
        assert!((hits[1].distance - 0.5).abs() < 1e-6);
        assert_eq!(hits[1].metadata.external_image_id, "photo-1");

        let limited = store.search_faces("event-1", &[0.0, 0.0], 1, 10.0).await.unwrap();
        assert_eq!(limited.len(), 1);

        // collections are isolated
        assert!(store.search_faces("event-2", &[0.0, 0.0], 10, 10.0).await.unwrap().is_empty());

        // dimension mismatch
        let err = store.search_faces("event-1", &[0.0, 0.0, 0.0], 10, 1.0).await.unwrap_err();
        assert!(matches!(err, FaceServiceError::InvalidInput { .. }));
        let err = store
            .add_faces("event-1", vec![new_face("d", "photo-3", vec![1.0])])
            .await
            .unwrap_err();
        assert!(matches!(err, FaceServiceError::InvalidInput { .. }));

        let face = store.get_face("event-1", "c").await.unwrap().unwrap();
        assert_eq!(face.metadata.external_image_id, "photo-2");
        assert!((face.metadata.confidence - 0.98).abs() < 1e-6);
        assert!(store.get_face("event-1", "zzz").await.unwrap().is_none());

        let deleted = store
            .delete_faces("event-1", &["c".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(deleted, ["c"]);
        assert!(store.get_face("event-1", "c").await.unwrap().is_none());

        // missing collection
        let err = store
            .add_faces("nope", vec![new_face("x", "p", vec![0.0, 0.0])])
            .await
            .unwrap_err();
        assert!(matches!(err, FaceServiceError::NotFound { .. }));
        let err = store.search_faces("nope", &[0.0, 0.0], 1, 1.0).await.unwrap_err();
        assert!(matches!(err, FaceServiceError::NotFound { .. }));

        // cascade delete, idempotent
        store.delete_collection("event-1").await.unwrap();
        store.delete_collection("event-1").await.unwrap();
        assert!(store.get_face("event-1", "a").await.unwrap().is_none());
        assert_eq!(store.list_collections().await.unwrap(), ["event-2"]);

        // recreated collection starts empty and accepts a new dimension
        store.create_collection("event-1").await.unwrap();
        store
            .add_faces("event-1", vec![new_face("e", "photo-9", vec![1.0, 2.0, 3.0])])
            .await
            .unwrap();
        assert_eq!(
            store.search_faces("event-1", &[1.0, 2.0, 3.0], 5, 0.1).await.unwrap().len(),
            1
        );
    }
}
