//! Persisted document layout for one identity, and validation at the store boundary.

use chrono::{DateTime, Utc};
use facedup_core::{BoundingBox, Descriptor, FaceId, FaceIdentity, Occurrence};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::fingerprint;
use crate::store::StoreError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceDocument {
    pub face_id: FaceId,
    pub image_filename: String,
    /// Base64 of the reference descriptor as little-endian f64 values.
    pub face_encoding: String,
    #[serde(default = "unknown_creation_time")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub occurrences: Vec<OccurrenceDocument>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OccurrenceDocument {
    pub filename: String,
    /// Older documents carry no fingerprint; it is derived from `filename` on read.
    #[serde(default)]
    pub fingerprint: String,
    /// `[top, right, bottom, left]`
    pub bounding_box: [u32; 4],
}

fn unknown_creation_time() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

fn invalid(face_id: FaceId, reason: impl Into<String>) -> StoreError {
    StoreError::InvalidDocument { face_id, reason: reason.into() }
}

impl OccurrenceDocument {
    pub fn from_occurrence(face_id: FaceId, occurrence: &Occurrence) -> Result<Self, StoreError> {
        if !occurrence.bounding_box.is_valid() {
            return Err(invalid(
                face_id,
                format!("degenerate bounding box {:?}", occurrence.bounding_box.to_array()),
            ));
        }
        let fingerprint = if occurrence.source_fingerprint.is_empty() {
            fingerprint::of(&occurrence.source_filename)
        } else {
            occurrence.source_fingerprint.clone()
        };
        Ok(Self {
            filename: occurrence.source_filename.clone(),
            fingerprint,
            bounding_box: occurrence.bounding_box.to_array(),
        })
    }

    pub(crate) fn into_occurrence(self, face_id: FaceId) -> Result<Occurrence, StoreError> {
        let bounding_box = BoundingBox::from_array(self.bounding_box).ok_or_else(|| {
            invalid(face_id, format!("degenerate bounding box {:?} in {}", self.bounding_box, self.filename))
        })?;
        let source_fingerprint = if self.fingerprint.is_empty() {
            fingerprint::of(&self.filename)
        } else {
            self.fingerprint
        };
        Ok(Occurrence {
            source_filename: self.filename,
            source_fingerprint,
            bounding_box,
        })
    }
}

impl FaceDocument {
    pub fn from_identity(identity: &FaceIdentity) -> Result<Self, StoreError> {
        if identity.reference_descriptor.is_empty() {
            return Err(invalid(identity.face_id, "empty reference descriptor"));
        }
        let occurrences = identity
            .occurrences
            .iter()
            .map(|o| OccurrenceDocument::from_occurrence(identity.face_id, o))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            face_id: identity.face_id,
            image_filename: identity.reference_image_path.to_string_lossy().into_owned(),
            face_encoding: identity.reference_descriptor.to_base64(),
            created_at: identity.created_at,
            occurrences,
        })
    }

    pub fn into_identity(self) -> Result<FaceIdentity, StoreError> {
        let face_id = self.face_id;
        let reference_descriptor = Descriptor::from_base64(&self.face_encoding)
            .map_err(|e| invalid(face_id, e.to_string()))?;
        let occurrences = self
            .occurrences
            .into_iter()
            .map(|o| o.into_occurrence(face_id))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(FaceIdentity {
            face_id,
            reference_descriptor,
            reference_image_path: PathBuf::from(self.image_filename),
            created_at: self.created_at,
            occurrences,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> FaceIdentity {
        FaceIdentity {
            face_id: 3,
            reference_descriptor: Descriptor::new(vec![1.0, -2.0]),
            reference_image_path: PathBuf::from("unique_faces/3.jpg"),
            created_at: DateTime::<Utc>::UNIX_EPOCH,
            occurrences: vec![Occurrence {
                source_filename: "a.jpg".into(),
                source_fingerprint: fingerprint::of("a.jpg"),
                bounding_box: BoundingBox::new(1, 9, 8, 2).unwrap(),
            }],
        }
    }

    #[test]
    fn test_document_json_layout() {
        let doc = FaceDocument::from_identity(&identity()).unwrap();
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["face_id"], 3);
        assert_eq!(json["image_filename"], "unique_faces/3.jpg");
        assert_eq!(json["face_encoding"], "AAAAAAAA8D8AAAAAAAAAwA==");
        assert_eq!(json["occurrences"][0]["filename"], "a.jpg");
        assert_eq!(json["occurrences"][0]["bounding_box"], serde_json::json!([1, 9, 8, 2]));
    }

    #[test]
    fn test_legacy_document_without_fingerprint_or_timestamp() {
        let json = r#"{
            "face_id": 0,
            "image_filename": "unique_faces/0.jpg",
            "face_encoding": "AAAAAAAA8D8=",
            "occurrences": [{ "filename": "b.png", "bounding_box": [10, 40, 50, 5] }]
        }"#;
        let doc: FaceDocument = serde_json::from_str(json).unwrap();
        let identity = doc.into_identity().unwrap();
        assert_eq!(identity.reference_descriptor.values, vec![1.0]);
        assert_eq!(identity.created_at, DateTime::<Utc>::UNIX_EPOCH);
        assert_eq!(identity.occurrences[0].source_fingerprint, fingerprint::of("b.png"));
    }

    #[test]
    fn test_missing_fingerprint_is_filled_on_write() {
        let mut bare = identity();
        bare.occurrences[0].source_fingerprint.clear();
        let doc = FaceDocument::from_identity(&bare).unwrap();
        assert_eq!(doc.occurrences[0].fingerprint, fingerprint::of("a.jpg"));
    }

    #[test]
    fn test_invalid_documents_are_rejected() {
        let mut doc = FaceDocument::from_identity(&identity()).unwrap();
        doc.face_encoding = "AAAA".into();
        assert!(matches!(
            doc.into_identity(),
            Err(StoreError::InvalidDocument { face_id: 3, .. })
        ));

        let mut doc = FaceDocument::from_identity(&identity()).unwrap();
        doc.occurrences[0].bounding_box = [8, 9, 1, 2];
        assert!(matches!(
            doc.into_identity(),
            Err(StoreError::InvalidDocument { face_id: 3, .. })
        ));

        let mut empty = identity();
        empty.reference_descriptor = Descriptor::new(vec![]);
        assert!(FaceDocument::from_identity(&empty).is_err());
    }
}
