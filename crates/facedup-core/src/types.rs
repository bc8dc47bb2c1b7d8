use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Dense, monotonically assigned identity number. The first identity is 0.
pub type FaceId = u64;

const F64_WIDTH: usize = std::mem::size_of::<f64>();

/// Face location in source-image pixels, in `(top, right, bottom, left)` order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    pub left: u32,
}

impl BoundingBox {
    /// Build a box, rejecting degenerate ones (`top >= bottom` or `left >= right`).
    pub fn new(top: u32, right: u32, bottom: u32, left: u32) -> Option<Self> {
        let bbox = Self { top, right, bottom, left };
        bbox.is_valid().then_some(bbox)
    }

    pub fn is_valid(&self) -> bool {
        self.top < self.bottom && self.left < self.right
    }

    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }

    /// Clip the box to an image of the given size. Returns `None` if nothing is left.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Self> {
        Self::new(
            self.top.min(height),
            self.right.min(width),
            self.bottom.min(height),
            self.left.min(width),
        )
    }

    /// `[top, right, bottom, left]`, the persisted tuple layout.
    pub fn to_array(self) -> [u32; 4] {
        [self.top, self.right, self.bottom, self.left]
    }

    pub fn from_array([top, right, bottom, left]: [u32; 4]) -> Option<Self> {
        Self::new(top, right, bottom, left)
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("descriptor is not valid base64: {0}")]
    Base64(String),
    #[error("descriptor byte length {0} is not a multiple of 8")]
    Misaligned(usize),
    #[error("descriptor is empty")]
    Empty,
}

/// Fixed-length face descriptor compared by Euclidean distance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    pub values: Vec<f64>,
}

impl Descriptor {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Euclidean distance. Callers must compare descriptors of equal length;
    /// extra trailing components of the longer one are ignored.
    pub fn euclidean_distance(&self, other: &Descriptor) -> f64 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f64>()
            .sqrt()
    }

    /// Little-endian f64 bytes, one value after another.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DescriptorError> {
        if bytes.is_empty() {
            return Err(DescriptorError::Empty);
        }
        if bytes.len() % F64_WIDTH != 0 {
            return Err(DescriptorError::Misaligned(bytes.len()));
        }
        let values = bytes
            .chunks_exact(F64_WIDTH)
            .map(|chunk| {
                let mut raw = [0u8; F64_WIDTH];
                raw.copy_from_slice(chunk);
                f64::from_le_bytes(raw)
            })
            .collect();
        Ok(Self { values })
    }

    /// Standard padded base64 of [`to_bytes`](Self::to_bytes).
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.to_bytes())
    }

    pub fn from_base64(encoded: &str) -> Result<Self, DescriptorError> {
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| DescriptorError::Base64(e.to_string()))?;
        Self::from_bytes(&bytes)
    }
}

impl From<Vec<f64>> for Descriptor {
    fn from(values: Vec<f64>) -> Self {
        Self { values }
    }
}

/// One sighting of an identity in one source image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occurrence {
    pub source_filename: String,
    /// Stable hash of `source_filename`, used to skip already ingested photos.
    pub source_fingerprint: String,
    pub bounding_box: BoundingBox,
}

/// A deduplicated face and every place it has been seen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceIdentity {
    pub face_id: FaceId,
    pub reference_descriptor: Descriptor,
    /// Crop of the first occurrence.
    pub reference_image_path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub occurrences: Vec<Occurrence>,
}

impl FaceIdentity {
    pub fn has_fingerprint(&self, fingerprint: &str) -> bool {
        self.occurrences
            .iter()
            .any(|o| o.source_fingerprint == fingerprint)
    }
}

/// Reference descriptor of an identity as seen by the matcher.
#[derive(Debug, Clone, PartialEq)]
pub struct KnownFace {
    pub face_id: FaceId,
    pub descriptor: Descriptor,
}

impl From<&FaceIdentity> for KnownFace {
    fn from(identity: &FaceIdentity) -> Self {
        Self {
            face_id: identity.face_id,
            descriptor: identity.reference_descriptor.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euclidean_distance() {
        let a = Descriptor::new(vec![0.0, 0.0]);
        let b = Descriptor::new(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-12);
        assert_eq!(a.euclidean_distance(&a), 0.0);
    }

    #[test]
    fn test_descriptor_bytes_are_little_endian_f64() {
        let d = Descriptor::new(vec![1.0]);
        assert_eq!(d.to_bytes(), vec![0, 0, 0, 0, 0, 0, 0xf0, 0x3f]);
        // 1.0f64 little-endian, base64
        assert_eq!(d.to_base64(), "AAAAAAAA8D8=");
    }

    #[test]
    fn test_descriptor_base64_decode() {
        let d = Descriptor::from_base64("AAAAAAAA8D8AAAAAAAAAwA==").unwrap();
        assert_eq!(d.values, vec![1.0, -2.0]);
    }

    #[test]
    fn test_descriptor_decode_rejects_bad_input() {
        assert!(matches!(
            Descriptor::from_base64("not base64!"),
            Err(DescriptorError::Base64(_))
        ));
        assert_eq!(Descriptor::from_bytes(&[0u8; 7]), Err(DescriptorError::Misaligned(7)));
        assert_eq!(Descriptor::from_bytes(&[]), Err(DescriptorError::Empty));
    }

    #[test]
    fn test_bounding_box_validation() {
        assert!(BoundingBox::new(10, 50, 60, 5).is_some());
        assert!(BoundingBox::new(60, 50, 60, 5).is_none());
        assert!(BoundingBox::new(10, 5, 60, 5).is_none());

        let b = BoundingBox::new(10, 50, 60, 5).unwrap();
        assert_eq!(b.width(), 45);
        assert_eq!(b.height(), 50);
        assert_eq!(BoundingBox::from_array(b.to_array()), Some(b));
    }

    #[test]
    fn test_bounding_box_clamp() {
        let b = BoundingBox::new(10, 500, 300, 5).unwrap();
        let clamped = b.clamp_to(100, 200).unwrap();
        assert_eq!(clamped.to_array(), [10, 100, 200, 5]);

        let outside = BoundingBox::new(10, 500, 300, 400).unwrap();
        assert!(outside.clamp_to(100, 200).is_none());
    }
}
