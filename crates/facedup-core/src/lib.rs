//! facedup-core — Face records, descriptor matching, and embedding providers.
//!
//! Detection uses SCRFD and descriptors come from ArcFace, both running via
//! ONNX Runtime on the CPU. Matching is Euclidean with a fixed tolerance.

pub mod alignment;
pub mod detector;
pub mod matcher;
pub mod provider;
pub mod recognizer;
pub mod types;

pub use matcher::{EuclideanMatcher, FaceMatch, Matcher, DEFAULT_TOLERANCE};
pub use provider::{DetectedFace, EmbeddingProvider, OnnxEmbeddingProvider, ProviderError};
pub use types::{BoundingBox, Descriptor, DescriptorError, FaceId, FaceIdentity, KnownFace, Occurrence};

use std::path::PathBuf;

/// `$XDG_DATA_HOME/facedup/models`, falling back to `~/.local/share`.
pub fn default_model_dir() -> PathBuf {
    data_dir().join("models")
}

/// `$XDG_DATA_HOME/facedup`, falling back to `~/.local/share/facedup`.
pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facedup")
}
