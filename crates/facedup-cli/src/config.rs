use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("invalid config {path}: {source}")]
    Parse { path: PathBuf, source: toml::de::Error },
}

/// CLI configuration: defaults, then an optional TOML file, then `FACEDUP_*`
/// environment variables. Command-line flags are applied last by `main`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Folder of photos to ingest.
    pub image_dir: PathBuf,
    /// Folder receiving one reference crop per identity (`{face_id}.jpg`).
    pub faces_dir: PathBuf,
    /// SQLite face index.
    pub db_path: PathBuf,
    /// Directory containing `det_10g.onnx` and `w600k_r50.onnx`.
    pub model_dir: PathBuf,
    /// Euclidean distance at or below which two faces are the same person.
    pub tolerance: f64,
    /// Where `show` writes annotated occurrence images.
    pub render_dir: PathBuf,
    /// Longest side of rendered images, in pixels.
    pub thumbnail_size: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            image_dir: PathBuf::from("images"),
            faces_dir: PathBuf::from("unique_faces"),
            db_path: facedup_core::data_dir().join("faces.db"),
            model_dir: facedup_core::default_model_dir(),
            tolerance: facedup_core::DEFAULT_TOLERANCE,
            render_dir: PathBuf::from("rendered"),
            thumbnail_size: 400,
        }
    }
}

impl Config {
    /// Load from `file` (or `$FACEDUP_CONFIG`), then apply the environment.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let file = file
            .map(Path::to_path_buf)
            .or_else(|| std::env::var("FACEDUP_CONFIG").ok().map(PathBuf::from));

        let mut config = match file {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let path = |key: &str, current: &mut PathBuf| {
            if let Some(v) = lookup(key) {
                *current = PathBuf::from(v);
            }
        };
        path("FACEDUP_IMAGE_DIR", &mut self.image_dir);
        path("FACEDUP_FACES_DIR", &mut self.faces_dir);
        path("FACEDUP_DB_PATH", &mut self.db_path);
        path("FACEDUP_MODEL_DIR", &mut self.model_dir);
        path("FACEDUP_RENDER_DIR", &mut self.render_dir);

        self.tolerance = parsed(&lookup, "FACEDUP_TOLERANCE", self.tolerance);
        self.thumbnail_size = parsed(&lookup, "FACEDUP_THUMBNAIL_SIZE", self.thumbnail_size);
    }
}

/// Parse `key` if present and well-formed, otherwise keep `default`.
fn parsed<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "ignoring unparsable environment value");
            default
        }),
        None => default,
    }
}
