//! Descriptor matching against the known identities.

use crate::types::{Descriptor, FaceId, KnownFace};

/// Distance at or below which two descriptors are the same person.
pub const DEFAULT_TOLERANCE: f64 = 0.55;

/// A known identity the candidate matched.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceMatch {
    pub face_id: FaceId,
    pub distance: f64,
}

/// Strategy for deciding whether a new descriptor belongs to a known identity.
pub trait Matcher {
    /// Returns `None` when no known identity matches; the caller then creates one.
    fn find_match(&self, candidate: &Descriptor, known: &[KnownFace]) -> Option<FaceMatch>;
}

/// Euclidean first-match matcher.
///
/// Scans `known` in the order given (ascending `face_id`) and stops at the
/// first identity within `tolerance`, inclusive. When several identities are
/// within tolerance the earliest created wins, not the closest.
#[derive(Debug, Clone, Copy)]
pub struct EuclideanMatcher {
    pub tolerance: f64,
}

impl EuclideanMatcher {
    pub fn new(tolerance: f64) -> Self {
        Self { tolerance }
    }
}

impl Default for EuclideanMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_TOLERANCE)
    }
}

impl Matcher for EuclideanMatcher {
    fn find_match(&self, candidate: &Descriptor, known: &[KnownFace]) -> Option<FaceMatch> {
        for face in known {
            if face.descriptor.len() != candidate.len() {
                tracing::warn!(
                    face_id = face.face_id,
                    known_len = face.descriptor.len(),
                    candidate_len = candidate.len(),
                    "descriptor length mismatch; skipping identity"
                );
                continue;
            }

            let distance = candidate.euclidean_distance(&face.descriptor);
            if distance <= self.tolerance {
                tracing::debug!(face_id = face.face_id, distance, "matched known face");
                return Some(FaceMatch {
                    face_id: face.face_id,
                    distance,
                });
            }
        }

        tracing::debug!(known = known.len(), "no similar face found");
        None
    }
}
