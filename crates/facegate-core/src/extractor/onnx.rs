use super::{rank_faces, DetectedFace, FaceExtractor};
use crate::error::{FaceResult, FaceServiceError, ProviderFailure};
use crate::types::{BoundingBox, ProviderKind};
use crate::vision::{DetectorError, FaceDetector, FaceRecognizer, RecognizerError};
use async_trait::async_trait;
use image::RgbImage;
use std::path::Path;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
pub const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";
const MODEL_NAME: &str = "buffalo_l/w600k_r50";

/// Detections below this never reach the adapter's quality filter.
const DETECTION_FLOOR: f32 = 0.3;

#[derive(Error, Debug)]
enum InferenceError {
    #[error("undecodable image: {0}")]
    Decode(#[from] image::ImageError),
    #[error(transparent)]
    Detector(#[from] DetectorError),
    #[error(transparent)]
    Recognizer(#[from] RecognizerError),
}

struct ExtractRequest {
    image: Vec<u8>,
    max_faces: usize,
    reply: oneshot::Sender<Result<Vec<DetectedFace>, InferenceError>>,
}

/// SCRFD + ArcFace running in-process on a dedicated inference thread.
///
/// The thread owns both ONNX sessions; callers enqueue a request and await
/// the reply, so no session is shared across tasks.
pub struct OnnxExtractor {
    tx: mpsc::Sender<ExtractRequest>,
}

impl OnnxExtractor {
    /// Load both models from `model_dir` and start the inference thread.
    ///
    /// Fails fast when a model is missing or the thread cannot be spawned.
    pub fn spawn(model_dir: &Path) -> FaceResult<Self> {
        let startup = |e: String| FaceServiceError::Custom(format!("ONNX extractor startup failed: {e}"));

        let mut detector = FaceDetector::load(&model_dir.join(DETECTOR_MODEL_FILE)).map_err(|e| startup(e.to_string()))?;
        let mut recognizer =
            FaceRecognizer::load(&model_dir.join(RECOGNIZER_MODEL_FILE)).map_err(|e| startup(e.to_string()))?;

        let (tx, mut rx) = mpsc::channel::<ExtractRequest>(16);

        std::thread::Builder::new()
            .name("facegate-inference".into())
            .spawn(move || {
                tracing::info!("inference thread started");
                while let Some(req) = rx.blocking_recv() {
                    let result = run_extract(&mut detector, &mut recognizer, &req.image, req.max_faces);
                    let _ = req.reply.send(result);
                }
                tracing::info!("inference thread exiting");
            })
            .map_err(|e| startup(e.to_string()))?;

        Ok(Self { tx })
    }
}

fn run_extract(
    detector: &mut FaceDetector,
    recognizer: &mut FaceRecognizer,
    image: &[u8],
    max_faces: usize,
) -> Result<Vec<DetectedFace>, InferenceError> {
    let photo: RgbImage = image::load_from_memory(image)?.to_rgb8();
    let (w, h) = photo.dimensions();

    let detections = detector.detect(&photo, DETECTION_FLOOR)?;
    tracing::debug!(width = w, height = h, detected = detections.len(), "detection complete");

    let mut faces = Vec::with_capacity(detections.len().min(max_faces));
    for det in detections.iter().take(max_faces) {
        let embedding = match recognizer.embed(&photo, det) {
            Ok(e) => e,
            Err(RecognizerError::NoLandmarks) => {
                tracing::debug!(confidence = det.confidence, "skipping detection without landmarks");
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        faces.push(DetectedFace {
            bounding_box: BoundingBox::from_pixels(det.x, det.y, det.width, det.height, w, h),
            confidence: det.confidence,
            embedding,
        });
    }
    Ok(faces)
}

#[async_trait]
impl FaceExtractor for OnnxExtractor {
    fn model_name(&self) -> &str {
        MODEL_NAME
    }

    async fn extract(&self, image: &[u8], max_faces: usize) -> FaceResult<Vec<DetectedFace>> {
        let stopped = || FaceServiceError::Custom("inference thread exited".into());
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(ExtractRequest {
                image: image.to_vec(),
                max_faces,
                reply: reply_tx,
            })
            .await
            .map_err(|_| stopped())?;

        match reply_rx.await.map_err(|_| stopped())? {
            Ok(faces) => Ok(rank_faces(faces, max_faces)),
            Err(InferenceError::Decode(e)) => Err(FaceServiceError::invalid("image", e.to_string())),
            Err(e) => Err(FaceServiceError::provider(
                ProviderKind::SelfHosted,
                "extract",
                ProviderFailure::with_code("InternalServerError", e.to_string()),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_without_models_fails_fast() {
        let dir = std::env::temp_dir().join(format!("facegate-no-models-{}", uuid::Uuid::new_v4()));
        let err = OnnxExtractor::spawn(&dir).err().expect("missing models must fail");
        assert!(err.to_string().contains(DETECTOR_MODEL_FILE), "{err}");
    }
}
