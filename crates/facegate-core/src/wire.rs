//! Request/response shapes of the wire-compatible face service.
//!
//! Field names follow the remote provider's PascalCase JSON. Confidence and
//! similarity are percentages (0–100) on the wire and fractions in the domain.

use crate::types::{AgeRange, BoundingBox, FaceAttributes, QualityFilter, Scored};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ImageBlob {
    /// Base64-encoded image bytes.
    pub bytes: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateCollectionRequest {
    pub collection_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateCollectionResponse {
    pub status_code: u16,
    pub collection_arn: String,
    pub face_model_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeleteCollectionResponse {
    pub status_code: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListCollectionsResponse {
    pub collection_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IndexFacesRequest {
    pub image: ImageBlob,
    pub external_image_id: String,
    #[serde(default)]
    pub detection_attributes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_faces: Option<u32>,
    #[serde(default)]
    pub quality_filter: QualityFilter,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct WireBoundingBox {
    pub width: f32,
    pub height: f32,
    pub left: f32,
    pub top: f32,
}

impl From<BoundingBox> for WireBoundingBox {
    fn from(b: BoundingBox) -> Self {
        Self {
            width: b.width,
            height: b.height,
            left: b.left,
            top: b.top,
        }
    }
}

impl From<WireBoundingBox> for BoundingBox {
    fn from(b: WireBoundingBox) -> Self {
        Self {
            left: b.left,
            top: b.top,
            width: b.width,
            height: b.height,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WireFace {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub face_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<WireBoundingBox>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_image_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ValueConfidence<T> {
    pub value: T,
    pub confidence: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WireAgeRange {
    pub low: u32,
    pub high: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WireEmotion {
    #[serde(rename = "Type")]
    pub kind: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FaceDetail {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<WireBoundingBox>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age_range: Option<WireAgeRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<ValueConfidence<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smile: Option<ValueConfidence<bool>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eyeglasses: Option<ValueConfidence<bool>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emotions: Option<Vec<WireEmotion>>,
}

impl FaceDetail {
    /// Domain attributes, or `None` when the provider reported no soft biometrics.
    pub fn attributes(&self) -> Option<FaceAttributes> {
        let scored = |v: &ValueConfidence<bool>| Scored {
            value: v.value,
            confidence: v.confidence / 100.0,
        };
        let attrs = FaceAttributes {
            age_range: self.age_range.as_ref().map(|a| AgeRange {
                low: a.low,
                high: a.high,
            }),
            gender: self.gender.as_ref().map(|g| Scored {
                value: g.value.clone(),
                confidence: g.confidence / 100.0,
            }),
            smile: self.smile.as_ref().map(scored),
            eyeglasses: self.eyeglasses.as_ref().map(scored),
            emotions: self
                .emotions
                .iter()
                .flatten()
                .map(|e| Scored {
                    value: e.kind.clone(),
                    confidence: e.confidence / 100.0,
                })
                .collect(),
        };
        (attrs != FaceAttributes::default()).then_some(attrs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FaceRecord {
    pub face: WireFace,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub face_detail: Option<FaceDetail>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UnindexedFaceRecord {
    #[serde(default)]
    pub reasons: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub face_detail: Option<FaceDetail>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IndexFacesResponse {
    #[serde(default)]
    pub face_records: Vec<FaceRecord>,
    #[serde(default)]
    pub unindexed_faces: Vec<UnindexedFaceRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub face_model_version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SearchFacesByImageRequest {
    pub image: ImageBlob,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_faces: Option<u32>,
    /// Minimum similarity, 0–100.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub face_match_threshold: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FaceMatchRecord {
    pub face: WireFace,
    /// 0–100.
    pub similarity: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SearchFacesByImageResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub searched_face_bounding_box: Option<WireBoundingBox>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub searched_face_confidence: Option<f32>,
    #[serde(default)]
    pub face_matches: Vec<FaceMatchRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub face_model_version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeleteFacesRequest {
    pub face_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeleteFacesResponse {
    #[serde(default)]
    pub deleted_faces: Vec<String>,
}

/// Error body: `{"__type": "...", "message": "..."}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(rename = "__type")]
    pub error_type: String,
    #[serde(default, alias = "Message")]
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReserveRequest {
    pub count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReserveResponse {
    pub delay_ms: u64,
    pub interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ThrottleRequest {
    pub delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CoordinatorStatsResponse {
    pub interval_ms: u64,
    pub pending_ms: u64,
    pub throttle_events: u64,
    pub throttle_penalty_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_request_field_names() {
        let req = IndexFacesRequest {
            image: ImageBlob { bytes: "aGk=".into() },
            external_image_id: "photo-1".into(),
            detection_attributes: vec!["DEFAULT".into()],
            max_faces: Some(10),
            quality_filter: QualityFilter::High,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["Image"]["Bytes"], "aGk=");
        assert_eq!(json["ExternalImageId"], "photo-1");
        assert_eq!(json["MaxFaces"], 10);
        assert_eq!(json["QualityFilter"], "HIGH");
    }

    #[test]
    fn test_search_response_tolerates_empty_bounding_box() {
        let body = r#"{"SearchedFaceBoundingBox": {}, "SearchedFaceConfidence": 0, "FaceMatches": []}"#;
        let resp: SearchFacesByImageResponse = serde_json::from_str(body).unwrap();
        assert_eq!(resp.searched_face_bounding_box, Some(WireBoundingBox::default()));
        assert!(resp.face_matches.is_empty());
    }

    #[test]
    fn test_face_detail_attributes_scaled_to_fraction() {
        let body = r#"{
            "Confidence": 99.5,
            "AgeRange": {"Low": 25, "High": 32},
            "Gender": {"Value": "Female", "Confidence": 98.0},
            "Smile": {"Value": true, "Confidence": 80.0},
            "Emotions": [{"Type": "HAPPY", "Confidence": 90.0}]
        }"#;
        let detail: FaceDetail = serde_json::from_str(body).unwrap();
        let attrs = detail.attributes().unwrap();
        assert_eq!(attrs.age_range, Some(AgeRange { low: 25, high: 32 }));
        assert!((attrs.gender.unwrap().confidence - 0.98).abs() < 1e-6);
        assert!(attrs.smile.unwrap().value);
        assert!(attrs.eyeglasses.is_none());
        assert_eq!(attrs.emotions[0].value, "HAPPY");
    }

    #[test]
    fn test_face_detail_without_attributes() {
        let detail: FaceDetail = serde_json::from_str(r#"{"Confidence": 99.0}"#).unwrap();
        assert!(detail.attributes().is_none());
    }

    #[test]
    fn test_error_body_accepts_capitalized_message() {
        let body: ErrorBody =
            serde_json::from_str(r#"{"__type": "ThrottlingException", "Message": "Rate exceeded"}"#).unwrap();
        assert_eq!(body.error_type, "ThrottlingException");
        assert_eq!(body.message, "Rate exceeded");
    }
}
