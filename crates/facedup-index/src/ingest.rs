//! Incremental ingestion: photos in, deduplicated identities out.
//!
//! One run walks a folder in filename order. Photos whose fingerprint is
//! already in the index are skipped; every other face is matched against all
//! identities known so far (including ones created earlier in the same run)
//! and either appended to the matching identity or stored as a new one.
//!
//! Runs must not overlap: two engines over the same store race on id
//! allocation and occurrence appends. Nothing here prevents that.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use facedup_core::{
    BoundingBox, DetectedFace, EmbeddingProvider, FaceId, FaceIdentity, KnownFace, Matcher,
    Occurrence, ProviderError,
};
use image::{imageops, ImageReader, RgbImage};
use thiserror::Error;

use crate::fingerprint;
use crate::store::{FaceIndexStore, StoreError, StoreWrite};

/// Accepted photo extensions, compared case-insensitively.
pub const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("cannot read image folder {path}: {source}")]
    ReadFolder { path: PathBuf, source: std::io::Error },
    #[error("cannot create face folder {path}: {source}")]
    CreateFolder { path: PathBuf, source: std::io::Error },
    #[error("cannot save reference crop for face {face_id} to {path}: {source}")]
    SaveCrop {
        face_id: FaceId,
        path: PathBuf,
        source: image::ImageError,
    },
}

/// Why a single photo was skipped. Never aborts the run.
#[derive(Error, Debug)]
pub enum PhotoError {
    #[error("cannot read: {0}")]
    Read(#[from] std::io::Error),
    #[error("cannot decode: {0}")]
    Decode(#[from] image::ImageError),
    #[error("embedding provider: {0}")]
    Provider(#[from] ProviderError),
}

/// Progress notifications for callers that want more than log lines.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestEvent {
    /// Fingerprint already indexed; nothing was read.
    AlreadyIngested { filename: String },
    Failed { filename: String, error: String },
    Processed { filename: String, faces: usize },
    IdentityCreated { face_id: FaceId, filename: String },
    OccurrenceAdded { face_id: FaceId, filename: String, distance: f64 },
}

pub trait IngestObserver {
    fn on_event(&mut self, event: &IngestEvent);
}

impl<F: FnMut(&IngestEvent)> IngestObserver for F {
    fn on_event(&mut self, event: &IngestEvent) {
        self(event)
    }
}

/// What one run did. `occurrences_by_id` only covers this run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestSummary {
    /// Identities created during this run.
    pub unique_count: usize,
    pub occurrences_by_id: BTreeMap<FaceId, Vec<Occurrence>>,
    pub images_processed: usize,
    pub images_skipped: usize,
    pub images_failed: usize,
}

pub struct IngestEngine<'a> {
    store: &'a mut dyn FaceIndexStore,
    provider: &'a mut dyn EmbeddingProvider,
    matcher: &'a dyn Matcher,
    observer: Option<&'a mut dyn IngestObserver>,
}

impl<'a> IngestEngine<'a> {
    pub fn new(
        store: &'a mut dyn FaceIndexStore,
        provider: &'a mut dyn EmbeddingProvider,
        matcher: &'a dyn Matcher,
    ) -> Self {
        Self { store, provider, matcher, observer: None }
    }

    pub fn with_observer(mut self, observer: &'a mut dyn IngestObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    fn emit(&mut self, event: IngestEvent) {
        if let Some(observer) = self.observer.as_deref_mut() {
            observer.on_event(&event);
        }
    }

    /// Ingest every photo in `image_folder`, writing reference crops to `faces_folder`.
    pub fn process_folder(
        &mut self,
        image_folder: &Path,
        faces_folder: &Path,
    ) -> Result<IngestSummary, IngestError> {
        std::fs::create_dir_all(faces_folder).map_err(|source| IngestError::CreateFolder {
            path: faces_folder.to_path_buf(),
            source,
        })?;

        let photos = list_photos(image_folder)?;
        let mut known = self.store.known_faces()?;
        let mut next_id = next_face_id(&known);
        let mut summary = IngestSummary::default();

        tracing::info!(
            folder = %image_folder.display(),
            photos = photos.len(),
            known = known.len(),
            next_id,
            "ingest started"
        );

        for (filename, path) in photos {
            let fingerprint = fingerprint::of(&filename);
            if self.store.contains_fingerprint(&fingerprint)? {
                tracing::debug!(filename = %filename, "already ingested; skipping");
                summary.images_skipped += 1;
                self.emit(IngestEvent::AlreadyIngested { filename });
                continue;
            }

            let (image, faces) = match self.detect(&path) {
                Ok(found) => found,
                Err(error) => {
                    tracing::warn!(filename = %filename, error = %error, "skipping image");
                    summary.images_failed += 1;
                    self.emit(IngestEvent::Failed { filename, error: error.to_string() });
                    continue;
                }
            };

            tracing::info!(filename = %filename, faces = faces.len(), "processing image");
            if faces.is_empty() {
                // Nothing to key a fingerprint on, so the photo is revisited next run.
                tracing::debug!(filename = %filename, "no faces detected");
            }

            let mut staged = StagedPhoto::default();
            let committed = self
                .stage_faces(&filename, &fingerprint, &image, &faces, faces_folder, &mut known, &mut next_id, &mut staged)
                .and_then(|()| self.store.apply(&staged.writes).map_err(IngestError::from));
            if let Err(error) = committed {
                tracing::error!(filename = %filename, error = %error, "cannot record photo; aborting run");
                staged.discard_crops();
                return Err(error);
            }

            summary.unique_count += staged.created;
            for (face_id, occurrence) in staged.recorded {
                summary.occurrences_by_id.entry(face_id).or_default().push(occurrence);
            }
            for event in staged.events {
                self.emit(event);
            }

            summary.images_processed += 1;
            self.emit(IngestEvent::Processed { filename, faces: faces.len() });
        }

        tracing::info!(
            unique = summary.unique_count,
            processed = summary.images_processed,
            skipped = summary.images_skipped,
            failed = summary.images_failed,
            "ingest finished"
        );

        Ok(summary)
    }

    /// Match every face of one photo and queue the resulting store writes.
    /// `known` and `next_id` advance as new identities are staged, so a later
    /// face in the same photo can match an earlier one.
    #[allow(clippy::too_many_arguments)]
    fn stage_faces(
        &self,
        filename: &str,
        fingerprint: &str,
        image: &RgbImage,
        faces: &[DetectedFace],
        faces_folder: &Path,
        known: &mut Vec<KnownFace>,
        next_id: &mut FaceId,
        staged: &mut StagedPhoto,
    ) -> Result<(), IngestError> {
        for face in faces {
            let Some(bounding_box) = face.bounding_box.clamp_to(image.width(), image.height()) else {
                tracing::warn!(
                    filename = %filename,
                    bbox = ?face.bounding_box.to_array(),
                    "face box lies outside the photo; ignoring"
                );
                continue;
            };
            let occurrence = Occurrence {
                source_filename: filename.to_owned(),
                source_fingerprint: fingerprint.to_owned(),
                bounding_box,
            };

            let face_id = match self.matcher.find_match(&face.descriptor, known) {
                Some(found) => {
                    tracing::info!(
                        face_id = found.face_id,
                        filename = %filename,
                        distance = found.distance,
                        "found existing face"
                    );
                    staged.writes.push(StoreWrite::Push {
                        face_id: found.face_id,
                        occurrence: occurrence.clone(),
                    });
                    staged.events.push(IngestEvent::OccurrenceAdded {
                        face_id: found.face_id,
                        filename: filename.to_owned(),
                        distance: found.distance,
                    });
                    found.face_id
                }
                None => {
                    let face_id = *next_id;
                    let reference_image_path = save_crop(image, bounding_box, faces_folder, face_id)?;
                    staged.crops.push(reference_image_path.clone());
                    let identity = FaceIdentity {
                        face_id,
                        reference_descriptor: face.descriptor.clone(),
                        reference_image_path,
                        created_at: Utc::now(),
                        occurrences: vec![occurrence.clone()],
                    };
                    tracing::info!(
                        face_id,
                        filename = %filename,
                        path = %identity.reference_image_path.display(),
                        "saved unique face"
                    );
                    known.push(KnownFace::from(&identity));
                    staged.writes.push(StoreWrite::Insert(identity));
                    staged.events.push(IngestEvent::IdentityCreated {
                        face_id,
                        filename: filename.to_owned(),
                    });
                    staged.created += 1;
                    *next_id += 1;
                    face_id
                }
            };
            staged.recorded.push((face_id, occurrence));
        }
        Ok(())
    }

    fn detect(&mut self, path: &Path) -> Result<(RgbImage, Vec<DetectedFace>), PhotoError> {
        let image = ImageReader::open(path)?.with_guessed_format()?.decode()?.to_rgb8();
        let faces = self.provider.detect(&image)?;
        Ok((image, faces))
    }
}

/// Everything one photo contributes, held back until the store accepts it.
#[derive(Default)]
struct StagedPhoto {
    writes: Vec<StoreWrite>,
    crops: Vec<PathBuf>,
    recorded: Vec<(FaceId, Occurrence)>,
    events: Vec<IngestEvent>,
    created: usize,
}

impl StagedPhoto {
    fn discard_crops(&self) {
        for path in &self.crops {
            if let Err(e) = std::fs::remove_file(path) {
                tracing::warn!(path = %path.display(), error = %e, "cannot remove reference crop");
            }
        }
    }
}

fn is_photo(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
}

/// Photos directly inside `folder` as `(filename, path)`, sorted by filename.
fn list_photos(folder: &Path) -> Result<Vec<(String, PathBuf)>, IngestError> {
    let read_err = |source| IngestError::ReadFolder { path: folder.to_path_buf(), source };

    let mut photos = Vec::new();
    for entry in std::fs::read_dir(folder).map_err(read_err)? {
        let path = entry.map_err(read_err)?.path();
        if !path.is_file() || !is_photo(&path) {
            continue;
        }
        let Some(filename) = path.file_name().and_then(|n| n.to_str()).map(str::to_owned) else {
            tracing::warn!(path = %path.display(), "skipping photo with non UTF-8 name");
            continue;
        };
        photos.push((filename, path));
    }
    photos.sort();
    Ok(photos)
}

/// One past the highest known id, so ids are never reused.
fn next_face_id(known: &[KnownFace]) -> FaceId {
    let next = known.iter().map(|k| k.face_id + 1).max().unwrap_or(0);
    if next != known.len() as FaceId {
        tracing::warn!(
            known = known.len(),
            next_id = next,
            "stored face ids are not contiguous"
        );
    }
    next
}

fn save_crop(
    image: &RgbImage,
    bbox: BoundingBox,
    faces_folder: &Path,
    face_id: FaceId,
) -> Result<PathBuf, IngestError> {
    let path = faces_folder.join(format!("{face_id}.jpg"));
    imageops::crop_imm(image, bbox.left, bbox.top, bbox.width(), bbox.height())
        .to_image()
        .save(&path)
        .map_err(|source| IngestError::SaveCrop { face_id, path: path.clone(), source })?;
    Ok(path)
}
