//! SQLite-backed vector store.
//!
//! Embeddings are stored as little-endian `f32` BLOBs and searched with a
//! brute-force Euclidean scan of one collection. All access goes through the
//! single `tokio-rusqlite` connection thread.

use super::{check_dimension, rank, NewFace, StoredFace, VectorMatch, VectorStore};
use crate::error::{FaceResult, FaceServiceError};
use crate::similarity::euclidean_distance;
use crate::types::{BoundingBox, FaceMetadata};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use std::path::Path;
use tokio_rusqlite::Connection;

const SCHEMA: &str = "
PRAGMA foreign_keys = ON;
CREATE TABLE IF NOT EXISTS collections (
    id          TEXT PRIMARY KEY,
    dimension   INTEGER,
    created_at  TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS faces (
    collection_id     TEXT NOT NULL REFERENCES collections(id) ON DELETE CASCADE,
    face_id           TEXT NOT NULL,
    external_image_id TEXT NOT NULL,
    bbox_left         REAL NOT NULL,
    bbox_top          REAL NOT NULL,
    bbox_width        REAL NOT NULL,
    bbox_height       REAL NOT NULL,
    confidence        REAL NOT NULL,
    indexed_at        TEXT NOT NULL,
    embedding         BLOB NOT NULL,
    PRIMARY KEY (collection_id, face_id)
);
CREATE INDEX IF NOT EXISTS faces_by_image ON faces (collection_id, external_image_id);
";

const METADATA_COLUMNS: &str =
    "face_id, external_image_id, bbox_left, bbox_top, bbox_width, bbox_height, confidence, indexed_at";

pub struct SqliteVectorStore {
    conn: Connection,
}

impl SqliteVectorStore {
    /// Open (or create) the database file and apply the schema.
    pub async fn open(path: impl AsRef<Path>) -> FaceResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| FaceServiceError::StorageFailed {
                operation: "open",
                reason: format!("{}: {e}", parent.display()),
            })?;
        }
        let conn = Connection::open(&path).await.map_err(db_error("open"))?;
        tracing::info!(path = %path.display(), "opened sqlite vector store");
        Self::init(conn).await
    }

    pub async fn open_in_memory() -> FaceResult<Self> {
        let conn = Connection::open_in_memory().await.map_err(db_error("open"))?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> FaceResult<Self> {
        conn.call(|c| {
            c.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await
        .map_err(db_error("migrate"))?;
        Ok(Self { conn })
    }
}

fn db_error(operation: &'static str) -> impl FnOnce(tokio_rusqlite::Error) -> FaceServiceError {
    move |source| FaceServiceError::Database { operation, source }
}

fn encode_embedding(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Map the leading `METADATA_COLUMNS` of a row.
fn metadata_from_row(row: &Row<'_>) -> rusqlite::Result<(String, FaceMetadata)> {
    let indexed_at: String = row.get(7)?;
    let indexed_at = DateTime::parse_from_rfc3339(&indexed_at)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e)))?;

    Ok((
        row.get(0)?,
        FaceMetadata {
            external_image_id: row.get(1)?,
            bounding_box: BoundingBox {
                left: row.get::<_, f64>(2)? as f32,
                top: row.get::<_, f64>(3)? as f32,
                width: row.get::<_, f64>(4)? as f32,
                height: row.get::<_, f64>(5)? as f32,
            },
            confidence: row.get::<_, f64>(6)? as f32,
            indexed_at,
        },
    ))
}

/// `None` if the collection does not exist, else its embedding dimension (if fixed yet).
fn collection_dimension(c: &rusqlite::Connection, collection_id: &str) -> rusqlite::Result<Option<Option<usize>>> {
    c.query_row(
        "SELECT dimension FROM collections WHERE id = ?1",
        params![collection_id],
        |row| row.get::<_, Option<i64>>(0),
    )
    .optional()
    .map(|found| found.map(|dim| dim.map(|d| d as usize)))
}

fn insert_faces(
    c: &mut rusqlite::Connection,
    collection_id: &str,
    faces: &[NewFace],
) -> rusqlite::Result<FaceResult<()>> {
    let Some(mut dimension) = collection_dimension(c, collection_id)? else {
        return Ok(Err(FaceServiceError::collection_not_found(collection_id)));
    };
    for face in faces {
        if let Err(e) = check_dimension(dimension, face.embedding.len()) {
            return Ok(Err(e));
        }
        dimension = Some(face.embedding.len());
    }

    let tx = c.transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT OR REPLACE INTO faces (collection_id, face_id, external_image_id, bbox_left, bbox_top, \
             bbox_width, bbox_height, confidence, indexed_at, embedding) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )?;
        for face in faces {
            let m = &face.metadata;
            stmt.execute(params![
                collection_id,
                face.face_id,
                m.external_image_id,
                m.bounding_box.left as f64,
                m.bounding_box.top as f64,
                m.bounding_box.width as f64,
                m.bounding_box.height as f64,
                m.confidence as f64,
                m.indexed_at.to_rfc3339(),
                encode_embedding(&face.embedding),
            ])?;
        }
    }
    if let Some(dim) = dimension {
        tx.execute(
            "UPDATE collections SET dimension = ?2 WHERE id = ?1",
            params![collection_id, dim as i64],
        )?;
    }
    tx.commit()?;
    Ok(Ok(()))
}

fn scan_faces(
    c: &rusqlite::Connection,
    collection_id: &str,
    query: &[f32],
    max_results: usize,
    distance_threshold: f32,
) -> rusqlite::Result<FaceResult<Vec<VectorMatch>>> {
    let Some(dimension) = collection_dimension(c, collection_id)? else {
        return Ok(Err(FaceServiceError::collection_not_found(collection_id)));
    };
    if let Err(e) = check_dimension(dimension, query.len()) {
        return Ok(Err(e));
    }

    let mut stmt = c.prepare(&format!(
        "SELECT {METADATA_COLUMNS}, embedding FROM faces WHERE collection_id = ?1"
    ))?;
    let rows = stmt.query_map(params![collection_id], |row| {
        let (face_id, metadata) = metadata_from_row(row)?;
        let blob: Vec<u8> = row.get(8)?;
        Ok((face_id, metadata, blob))
    })?;

    let mut matches = Vec::new();
    for row in rows {
        let (face_id, metadata, blob) = row?;
        let distance = euclidean_distance(query, &decode_embedding(&blob));
        if distance <= distance_threshold {
            matches.push(VectorMatch {
                face_id,
                distance,
                metadata,
            });
        }
    }
    Ok(Ok(rank(matches, max_results)))
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn create_collection(&self, collection_id: &str) -> FaceResult<bool> {
        let id = collection_id.to_string();
        let created = self
            .conn
            .call(move |c| {
                let n = c.execute(
                    "INSERT OR IGNORE INTO collections (id, created_at) VALUES (?1, ?2)",
                    params![id, Utc::now().to_rfc3339()],
                )?;
                Ok(n > 0)
            })
            .await
            .map_err(db_error("create_collection"))?;
        if created {
            tracing::info!(collection_id, "collection created");
        }
        Ok(created)
    }

    async fn delete_collection(&self, collection_id: &str) -> FaceResult<()> {
        let id = collection_id.to_string();
        let removed = self
            .conn
            .call(move |c| Ok(c.execute("DELETE FROM collections WHERE id = ?1", params![id])?))
            .await
            .map_err(db_error("delete_collection"))?;
        tracing::info!(collection_id, existed = removed > 0, "collection deleted");
        Ok(())
    }

    async fn list_collections(&self) -> FaceResult<Vec<String>> {
        self.conn
            .call(|c| {
                let mut stmt = c.prepare("SELECT id FROM collections ORDER BY id")?;
                let ids = stmt
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(ids)
            })
            .await
            .map_err(db_error("list_collections"))
    }

    async fn collection_exists(&self, collection_id: &str) -> FaceResult<bool> {
        let id = collection_id.to_string();
        self.conn
            .call(move |c| Ok(collection_dimension(c, &id)?.is_some()))
            .await
            .map_err(db_error("collection_exists"))
    }

    async fn add_faces(&self, collection_id: &str, faces: Vec<NewFace>) -> FaceResult<()> {
        if faces.is_empty() {
            return Ok(());
        }
        let id = collection_id.to_string();
        let count = faces.len();
        self.conn
            .call(move |c| Ok(insert_faces(c, &id, &faces)?))
            .await
            .map_err(db_error("add_faces"))??;
        tracing::debug!(collection_id, count, "faces added");
        Ok(())
    }

    async fn search_faces(
        &self,
        collection_id: &str,
        query: &[f32],
        max_results: usize,
        distance_threshold: f32,
    ) -> FaceResult<Vec<VectorMatch>> {
        let id = collection_id.to_string();
        let query = query.to_vec();
        self.conn
            .call(move |c| Ok(scan_faces(c, &id, &query, max_results, distance_threshold)?))
            .await
            .map_err(db_error("search_faces"))?
    }

    async fn delete_faces(&self, collection_id: &str, face_ids: &[String]) -> FaceResult<Vec<String>> {
        let id = collection_id.to_string();
        let face_ids = face_ids.to_vec();
        self.conn
            .call(move |c| {
                let tx = c.transaction()?;
                let mut deleted = Vec::new();
                {
                    let mut stmt = tx.prepare("DELETE FROM faces WHERE collection_id = ?1 AND face_id = ?2")?;
                    for face_id in face_ids {
                        if stmt.execute(params![id, face_id])? > 0 {
                            deleted.push(face_id);
                        }
                    }
                }
                tx.commit()?;
                Ok(deleted)
            })
            .await
            .map_err(db_error("delete_faces"))
    }

    async fn get_face(&self, collection_id: &str, face_id: &str) -> FaceResult<Option<StoredFace>> {
        let id = collection_id.to_string();
        let face_id = face_id.to_string();
        let found = self
            .conn
            .call(move |c| {
                Ok(c.query_row(
                    &format!("SELECT {METADATA_COLUMNS} FROM faces WHERE collection_id = ?1 AND face_id = ?2"),
                    params![id, face_id],
                    metadata_from_row,
                )
                .optional()?)
            })
            .await
            .map_err(db_error("get_face"))?;
        Ok(found.map(|(face_id, metadata)| StoredFace { face_id, metadata }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::{exercise_store, new_face};

    #[tokio::test]
    async fn test_sqlite_store_contract() {
        let store = SqliteVectorStore::open_in_memory().await.unwrap();
        exercise_store(&store).await;
    }

    #[test]
    fn test_embedding_blob_roundtrip() {
        let values = vec![0.25f32, -1.5, 3.0e-7, f32::MAX];
        assert_eq!(decode_embedding(&encode_embedding(&values)), values);
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = std::env::temp_dir().join(format!("facegate-store-{}", uuid::Uuid::new_v4()));
        let path = dir.join("faces.db");

        {
            let store = SqliteVectorStore::open(&path).await.unwrap();
            store.create_collection("event-1").await.unwrap();
            store
                .add_faces("event-1", vec![new_face("a", "photo-1", vec![0.1, 0.2])])
                .await
                .unwrap();
        }

        let store = SqliteVectorStore::open(&path).await.unwrap();
        let hits = store.search_faces("event-1", &[0.1, 0.2], 5, 0.01).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata.external_image_id, "photo-1");

        let _ = std::fs::remove_dir_all(dir);
    }
}
