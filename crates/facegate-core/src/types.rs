use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Face location, normalized to the image dimensions (all fields in [0, 1]).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    /// Build a normalized box from pixel coordinates, clamping into the image.
    pub fn from_pixels(x: f32, y: f32, width: f32, height: f32, image_w: u32, image_h: u32) -> Self {
        if image_w == 0 || image_h == 0 {
            return Self::default();
        }
        let (iw, ih) = (image_w as f32, image_h as f32);
        let left = (x / iw).clamp(0.0, 1.0);
        let top = (y / ih).clamp(0.0, 1.0);
        Self {
            left,
            top,
            width: (width / iw).clamp(0.0, 1.0 - left),
            height: (height / ih).clamp(0.0, 1.0 - top),
        }
    }

    /// Smaller of the two normalized sides.
    pub fn min_side(&self) -> f32 {
        self.width.min(self.height)
    }
}

/// Which backend produced a face or result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    Remote,
    SelfHosted,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Remote => write!(f, "remote"),
            ProviderKind::SelfHosted => write!(f, "self-hosted"),
        }
    }
}

/// Inclusive estimated age range in years.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgeRange {
    pub low: u32,
    pub high: u32,
}

/// A boolean or categorical attribute with the provider's confidence in [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scored<T> {
    pub value: T,
    pub confidence: f32,
}

/// Soft biometrics, only populated by providers that detect attributes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FaceAttributes {
    pub age_range: Option<AgeRange>,
    pub gender: Option<Scored<String>>,
    pub smile: Option<Scored<bool>>,
    pub eyeglasses: Option<Scored<bool>>,
    pub emotions: Vec<Scored<String>>,
}

/// One detected face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Face {
    pub face_id: String,
    pub bounding_box: BoundingBox,
    /// Detection confidence in [0, 1].
    pub confidence: f32,
    pub attributes: Option<FaceAttributes>,
    pub provider: ProviderKind,
}

/// A face stored during indexing, tagged with the photo it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedFace {
    pub face: Face,
    pub external_image_id: String,
}

/// A detected face that quality filtering kept out of the collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnindexedFace {
    pub reasons: Vec<String>,
    pub bounding_box: Option<BoundingBox>,
    pub confidence: Option<f32>,
}

/// Result of indexing one photo. The caller persists what it needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoIndexed {
    pub faces: Vec<IndexedFace>,
    pub unindexed_faces: Vec<UnindexedFace>,
    pub model_version: String,
    pub provider: ProviderKind,
}

/// Provider-side filter for low-quality detections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QualityFilter {
    None,
    #[default]
    Auto,
    Low,
    Medium,
    High,
}

impl QualityFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityFilter::None => "NONE",
            QualityFilter::Auto => "AUTO",
            QualityFilter::Low => "LOW",
            QualityFilter::Medium => "MEDIUM",
            QualityFilter::High => "HIGH",
        }
    }
}

impl std::str::FromStr for QualityFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "NONE" => Ok(QualityFilter::None),
            "AUTO" => Ok(QualityFilter::Auto),
            "LOW" => Ok(QualityFilter::Low),
            "MEDIUM" => Ok(QualityFilter::Medium),
            "HIGH" => Ok(QualityFilter::High),
            other => Err(format!("unknown quality filter: {other}")),
        }
    }
}

/// Knobs for a single `index_photo` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexOptions {
    /// Upper bound on faces stored from this photo (largest-confidence first).
    pub max_faces: usize,
    pub quality_filter: QualityFilter,
    /// Ask the provider for soft biometrics when it supports them.
    pub detect_attributes: bool,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            max_faces: 100,
            quality_filter: QualityFilter::Auto,
            detect_attributes: false,
        }
    }
}

/// One photo matched by a face search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarPhoto {
    pub photo_id: String,
    /// Best similarity among the photo's matching faces, in [0, 1].
    pub similarity: f32,
    /// Number of the photo's faces that matched.
    pub face_count: usize,
}

/// Result of `find_images_by_face`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FoundImages {
    pub photos: Vec<SimilarPhoto>,
    pub total_matched_faces: usize,
}

/// One face-level match from a search, before per-photo aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceMatch {
    pub face_id: String,
    pub external_image_id: String,
    /// Similarity in [0, 1].
    pub similarity: f32,
    /// Confidence of the stored face detection, in [0, 1].
    pub confidence: f32,
}

/// Non-vector data stored alongside an embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceMetadata {
    pub external_image_id: String,
    pub bounding_box: BoundingBox,
    pub confidence: f32,
    pub indexed_at: DateTime<Utc>,
}

/// Collapse face-level matches into one entry per photo.
///
/// Keeps the maximum similarity and the number of contributing faces, sorts
/// by similarity descending and truncates to `max_results`.
pub fn aggregate_by_photo(matches: &[FaceMatch], max_results: usize) -> FoundImages {
    let mut photos: Vec<SimilarPhoto> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for m in matches {
        match index.get(m.external_image_id.as_str()) {
            Some(&i) => {
                let photo = &mut photos[i];
                photo.face_count += 1;
                if m.similarity > photo.similarity {
                    photo.similarity = m.similarity;
                }
            }
            None => {
                index.insert(&m.external_image_id, photos.len());
                photos.push(SimilarPhoto {
                    photo_id: m.external_image_id.clone(),
                    similarity: m.similarity,
                    face_count: 1,
                });
            }
        }
    }

    photos.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    photos.truncate(max_results);

    FoundImages {
        photos,
        total_matched_faces: matches.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face_match(face_id: &str, photo: &str, similarity: f32) -> FaceMatch {
        FaceMatch {
            face_id: face_id.into(),
            external_image_id: photo.into(),
            similarity,
            confidence: 0.99,
        }
    }

    #[test]
    fn test_aggregate_keeps_max_similarity_and_counts_faces() {
        let matches = vec![
            face_match("f1", "photo-a", 0.82),
            face_match("f2", "photo-a", 0.91),
            face_match("f3", "photo-b", 0.85),
        ];

        let found = aggregate_by_photo(&matches, 10);

        assert_eq!(found.total_matched_faces, 3);
        assert_eq!(found.photos.len(), 2);
        assert_eq!(found.photos[0].photo_id, "photo-a");
        assert_eq!(found.photos[0].face_count, 2);
        assert!((found.photos[0].similarity - 0.91).abs() < 1e-6);
        assert_eq!(found.photos[1].photo_id, "photo-b");
        assert_eq!(found.photos[1].face_count, 1);
    }

    #[test]
    fn test_aggregate_truncates_after_sorting() {
        let matches = vec![
            face_match("f1", "low", 0.60),
            face_match("f2", "high", 0.95),
            face_match("f3", "mid", 0.75),
        ];

        let found = aggregate_by_photo(&matches, 2);

        let ids: Vec<&str> = found.photos.iter().map(|p| p.photo_id.as_str()).collect();
        assert_eq!(ids, ["high", "mid"]);
        assert_eq!(found.total_matched_faces, 3);
    }

    #[test]
    fn test_aggregate_many_faces_across_many_photos() {
        // Interleaved so every photo's faces are far apart in the match list.
        let matches: Vec<FaceMatch> = (0..20_000)
            .map(|i| {
                let photo = format!("photo-{}", i % 5_000);
                face_match(&format!("f{i}"), &photo, 0.5 + (i % 5_000) as f32 / 10_000.0)
            })
            .collect();

        let found = aggregate_by_photo(&matches, 10_000);

        assert_eq!(found.total_matched_faces, 20_000);
        assert_eq!(found.photos.len(), 5_000);
        assert!(found.photos.iter().all(|p| p.face_count == 4));
        assert_eq!(found.photos[0].photo_id, "photo-4999");
        assert!(found.photos.windows(2).all(|w| w[0].similarity >= w[1].similarity));
    }

    #[test]
    fn test_aggregate_empty() {
        let found = aggregate_by_photo(&[], 5);
        assert!(found.photos.is_empty());
        assert_eq!(found.total_matched_faces, 0);
    }

    #[test]
    fn test_bounding_box_from_pixels_normalizes_and_clamps() {
        let bbox = BoundingBox::from_pixels(100.0, 50.0, 200.0, 400.0, 400, 200);
        assert!((bbox.left - 0.25).abs() < 1e-6);
        assert!((bbox.top - 0.25).abs() < 1e-6);
        assert!((bbox.width - 0.5).abs() < 1e-6);
        // 400px tall box in a 200px image starting at 25% is clamped to the bottom edge.
        assert!((bbox.height - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_bounding_box_zero_sized_image() {
        assert_eq!(BoundingBox::from_pixels(1.0, 1.0, 1.0, 1.0, 0, 10), BoundingBox::default());
    }

    #[test]
    fn test_quality_filter_parse() {
        assert_eq!("medium".parse::<QualityFilter>(), Ok(QualityFilter::Medium));
        assert_eq!(QualityFilter::High.as_str(), "HIGH");
        assert!("extreme".parse::<QualityFilter>().is_err());
    }

    #[test]
    fn test_provider_kind_serde() {
        let json = serde_json::to_string(&ProviderKind::SelfHosted).unwrap();
        assert_eq!(json, "\"self-hosted\"");
    }
}
