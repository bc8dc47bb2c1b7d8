//! Background rendering of one identity's occurrences.
//!
//! A dedicated thread loads each source photo, outlines the face, shrinks it
//! to a thumbnail and writes it out. Results stream back over a bounded
//! channel in occurrence order and always end with [`RenderEvent::Done`].

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use facedup_core::{BoundingBox, FaceId, Occurrence};
use image::{ImageReader, Rgb, RgbImage};
use thiserror::Error;
use tokio::sync::mpsc;

const RENDER_QUEUE_DEPTH: usize = 4;
const OUTLINE_COLOR: Rgb<u8> = Rgb([255, 255, 0]);

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("cannot create output folder {path}: {source}")]
    CreateFolder { path: PathBuf, source: std::io::Error },
    #[error("cannot spawn render thread: {0}")]
    Spawn(std::io::Error),
}

pub struct RenderJob {
    pub face_id: FaceId,
    pub occurrences: Vec<Occurrence>,
    /// Folder the occurrence filenames are relative to.
    pub image_dir: PathBuf,
    pub out_dir: PathBuf,
    pub thumbnail_size: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RenderEvent {
    Rendered { index: usize, filename: String, path: PathBuf },
    /// Source photo is gone from the image folder.
    Missing { index: usize, filename: String },
    Failed { index: usize, filename: String, error: String },
    Done { rendered: usize, cancelled: bool },
}

/// Driver side of a running render.
pub struct RenderHandle {
    rx: mpsc::Receiver<RenderEvent>,
    cancel: Arc<AtomicBool>,
}

impl RenderHandle {
    pub async fn next(&mut self) -> Option<RenderEvent> {
        self.rx.recv().await
    }

    /// Blocking variant for callers outside a runtime.
    pub fn blocking_next(&mut self) -> Option<RenderEvent> {
        self.rx.blocking_recv()
    }

    /// Stop before the next occurrence. The stream still ends with `Done`.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }
}

pub fn spawn_render(job: RenderJob) -> Result<RenderHandle, RenderError> {
    std::fs::create_dir_all(&job.out_dir).map_err(|source| RenderError::CreateFolder {
        path: job.out_dir.clone(),
        source,
    })?;

    let (tx, rx) = mpsc::channel(RENDER_QUEUE_DEPTH);
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancel);

    std::thread::Builder::new()
        .name("facedup-render".into())
        .spawn(move || run(job, tx, flag))
        .map_err(RenderError::Spawn)?;

    Ok(RenderHandle { rx, cancel })
}

fn run(job: RenderJob, tx: mpsc::Sender<RenderEvent>, cancel: Arc<AtomicBool>) {
    tracing::info!(face_id = job.face_id, occurrences = job.occurrences.len(), "render started");

    let mut rendered = 0;
    let mut cancelled = false;

    for (index, occurrence) in job.occurrences.iter().enumerate() {
        if cancel.load(Ordering::Relaxed) {
            cancelled = true;
            break;
        }

        let filename = occurrence.source_filename.clone();
        // Stored names are bare file names. Keep only the last component.
        let Some(name) = Path::new(&filename).file_name().map(|n| n.to_string_lossy().into_owned()) else {
            tracing::warn!(filename = %filename, "occurrence has no usable file name");
            let event = RenderEvent::Failed { index, filename, error: "no usable file name".into() };
            if tx.blocking_send(event).is_err() {
                return;
            }
            continue;
        };
        let source = job.image_dir.join(&name);
        let event = if !source.is_file() {
            tracing::warn!(path = %source.display(), "image file not found");
            RenderEvent::Missing { index, filename }
        } else {
            let target = job.out_dir.join(format!("{index:03}_{name}"));
            match annotate(&source, &target, occurrence.bounding_box, job.thumbnail_size) {
                Ok(()) => {
                    rendered += 1;
                    tracing::debug!(face_id = job.face_id, filename = %filename, "rendered occurrence");
                    RenderEvent::Rendered { index, filename, path: target }
                }
                Err(e) => {
                    tracing::error!(path = %source.display(), error = %e, "error rendering image");
                    RenderEvent::Failed { index, filename, error: e.to_string() }
                }
            }
        };

        if tx.blocking_send(event).is_err() {
            tracing::debug!("render receiver dropped");
            return;
        }
    }

    let _ = tx.blocking_send(RenderEvent::Done { rendered, cancelled });
    tracing::info!(face_id = job.face_id, rendered, cancelled, "render complete");
}

fn annotate(source: &Path, target: &Path, bbox: BoundingBox, max_side: u32) -> Result<(), image::ImageError> {
    let mut photo = ImageReader::open(source)
        .and_then(ImageReader::with_guessed_format)
        .map_err(image::ImageError::IoError)?
        .decode()?
        .to_rgb8();
    let thickness = (photo.width().min(photo.height()) / 100).max(2);
    draw_outline(&mut photo, bbox, thickness, OUTLINE_COLOR);

    let photo = image::DynamicImage::ImageRgb8(photo).thumbnail(max_side, max_side);
    photo.to_rgb8().save(target)
}

/// Draw a rectangle outline `thickness` pixels wide inside `bbox`, clipped to the photo.
fn draw_outline(photo: &mut RgbImage, bbox: BoundingBox, thickness: u32, color: Rgb<u8>) {
    let Some(bbox) = bbox.clamp_to(photo.width(), photo.height()) else {
        return;
    };
    let t = thickness.min(bbox.width()).min(bbox.height());

    for y in bbox.top..bbox.bottom {
        for x in bbox.left..bbox.right {
            let edge = y < bbox.top + t
                || y >= bbox.bottom - t
                || x < bbox.left + t
                || x >= bbox.right - t;
            if edge {
                photo.put_pixel(x, y, color);
            }
        }
    }
}
