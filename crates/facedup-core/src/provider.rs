//! Embedding provider seam: photo in, located face descriptors out.

use crate::detector::{DetectorError, FaceDetection, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{BoundingBox, Descriptor};
use image::RgbImage;
use std::path::Path;
use thiserror::Error;

pub const SCRFD_MODEL_FILE: &str = "det_10g.onnx";
pub const ARCFACE_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("{0}")]
    Other(String),
}

/// One face found in a photo.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedFace {
    pub bounding_box: BoundingBox,
    pub descriptor: Descriptor,
}

/// Face detection plus descriptor extraction.
///
/// Implementations return faces in detection order; an empty list means the
/// photo has no faces and is not an error.
pub trait EmbeddingProvider {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, ProviderError>;
}

impl<P: EmbeddingProvider + ?Sized> EmbeddingProvider for Box<P> {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, ProviderError> {
        (**self).detect(image)
    }
}

/// SCRFD detection followed by ArcFace recognition.
pub struct OnnxEmbeddingProvider {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxEmbeddingProvider {
    /// Load `det_10g.onnx` and `w600k_r50.onnx` from `model_dir`.
    pub fn load(model_dir: &Path) -> Result<Self, ProviderError> {
        let detector = FaceDetector::load(&model_dir.join(SCRFD_MODEL_FILE))?;
        let recognizer = FaceRecognizer::load(&model_dir.join(ARCFACE_MODEL_FILE))?;
        Ok(Self { detector, recognizer })
    }
}

impl EmbeddingProvider for OnnxEmbeddingProvider {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, ProviderError> {
        let (width, height) = image.dimensions();
        let detections = self.detector.detect(image)?;

        let mut faces = Vec::with_capacity(detections.len());
        for detection in &detections {
            let Some(bounding_box) = pixel_box(detection, width, height) else {
                tracing::debug!(confidence = detection.confidence, "dropping detection outside the photo");
                continue;
            };
            let descriptor = self.recognizer.extract(image, detection)?;
            faces.push(DetectedFace { bounding_box, descriptor });
        }

        Ok(faces)
    }
}

/// Round a float detection to a pixel box clipped to the photo.
fn pixel_box(detection: &FaceDetection, width: u32, height: u32) -> Option<BoundingBox> {
    let to_px = |v: f32| v.round().max(0.0) as u32;
    BoundingBox::new(
        to_px(detection.y1),
        to_px(detection.x2),
        to_px(detection.y2),
        to_px(detection.x1),
    )?
    .clamp_to(width, height)
}
