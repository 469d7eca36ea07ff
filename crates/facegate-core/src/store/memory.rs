use super::{check_dimension, rank, NewFace, StoredFace, VectorMatch, VectorStore};
use crate::error::{FaceResult, FaceServiceError};
use crate::similarity::euclidean_distance;
use crate::types::FaceMetadata;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
struct Collection {
    dimension: Option<usize>,
    /// Insertion order is kept so equal distances rank deterministically.
    faces: Vec<(String, Vec<f32>, FaceMetadata)>,
}

/// In-process vector store for tests and single-node development.
#[derive(Default)]
pub struct MemoryVectorStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn create_collection(&self, collection_id: &str) -> FaceResult<bool> {
        let mut collections = self.collections.write().await;
        if collections.contains_key(collection_id) {
            return Ok(false);
        }
        collections.insert(collection_id.to_string(), Collection::default());
        Ok(true)
    }

    async fn delete_collection(&self, collection_id: &str) -> FaceResult<()> {
        self.collections.write().await.remove(collection_id);
        Ok(())
    }

    async fn list_collections(&self) -> FaceResult<Vec<String>> {
        let mut ids: Vec<String> = self.collections.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn collection_exists(&self, collection_id: &str) -> FaceResult<bool> {
        Ok(self.collections.read().await.contains_key(collection_id))
    }

    async fn add_faces(&self, collection_id: &str, faces: Vec<NewFace>) -> FaceResult<()> {
        let mut collections = self.collections.write().await;
        let collection = collections
            .get_mut(collection_id)
            .ok_or_else(|| FaceServiceError::collection_not_found(collection_id))?;

        // Validate the whole batch before mutating.
        let mut dimension = collection.dimension;
        for face in &faces {
            check_dimension(dimension, face.embedding.len())?;
            dimension = Some(face.embedding.len());
        }

        collection.dimension = dimension;
        collection
            .faces
            .extend(faces.into_iter().map(|f| (f.face_id, f.embedding, f.metadata)));
        Ok(())
    }

    async fn search_faces(
        &self,
        collection_id: &str,
        query: &[f32],
        max_results: usize,
        distance_threshold: f32,
    ) -> FaceResult<Vec<VectorMatch>> {
        let collections = self.collections.read().await;
        let collection = collections
            .get(collection_id)
            .ok_or_else(|| FaceServiceError::collection_not_found(collection_id))?;
        check_dimension(collection.dimension, query.len())?;

        let matches = collection
            .faces
            .iter()
            .filter_map(|(face_id, embedding, metadata)| {
                let distance = euclidean_distance(query, embedding);
                (distance <= distance_threshold).then(|| VectorMatch {
                    face_id: face_id.clone(),
                    distance,
                    metadata: metadata.clone(),
                })
            })
            .collect();

        Ok(rank(matches, max_results))
    }

    async fn delete_faces(&self, collection_id: &str, face_ids: &[String]) -> FaceResult<Vec<String>> {
        let mut collections = self.collections.write().await;
        let Some(collection) = collections.get_mut(collection_id) else {
            return Ok(Vec::new());
        };

        let mut deleted = Vec::new();
        collection.faces.retain(|(face_id, _, _)| {
            if face_ids.contains(face_id) {
                deleted.push(face_id.clone());
                false
            } else {
                true
            }
        });
        Ok(deleted)
    }

    async fn get_face(&self, collection_id: &str, face_id: &str) -> FaceResult<Option<StoredFace>> {
        let collections = self.collections.read().await;
        Ok(collections.get(collection_id).and_then(|c| {
            c.faces
                .iter()
                .find(|(id, _, _)| id == face_id)
                .map(|(id, _, metadata)| StoredFace {
                    face_id: id.clone(),
                    metadata: metadata.clone(),
                })
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::exercise_store;

    #[tokio::test]
    async fn test_memory_store_contract() {
        exercise_store(&MemoryVectorStore::new()).await;
    }
}
