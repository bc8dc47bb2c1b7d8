use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use facedup_core::{EuclideanMatcher, FaceId, OnnxEmbeddingProvider};
use facedup_index::{IngestEngine, IngestEvent, QueryService, SqliteFaceStore};

mod config;
mod render;

use config::Config;
use render::{RenderEvent, RenderJob};

#[derive(Parser)]
#[command(name = "facedup", about = "Find the unique faces in a photo folder and where each appears")]
struct Cli {
    /// TOML config file (default: $FACEDUP_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Face index database
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect faces in new photos and add them to the index
    Ingest {
        /// Folder of photos
        #[arg(long)]
        images: Option<PathBuf>,
        /// Folder for reference crops
        #[arg(long)]
        faces: Option<PathBuf>,
        /// Directory holding the ONNX models
        #[arg(long)]
        models: Option<PathBuf>,
        /// Match tolerance (Euclidean distance)
        #[arg(long)]
        tolerance: Option<f64>,
    },
    /// List unique faces with their occurrence counts
    Faces,
    /// Show every photo a face appears in
    Show {
        /// Face ID
        id: FaceId,
        /// Output folder for annotated images
        #[arg(long)]
        out: Option<PathBuf>,
        /// Print occurrences without rendering images
        #[arg(long)]
        no_render: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        config.db_path = db;
    }

    let mut store = SqliteFaceStore::open(&config.db_path)
        .with_context(|| format!("opening face index {}", config.db_path.display()))?;

    match cli.command {
        Commands::Ingest { images, faces, models, tolerance } => {
            config.image_dir = images.unwrap_or(config.image_dir);
            config.faces_dir = faces.unwrap_or(config.faces_dir);
            config.model_dir = models.unwrap_or(config.model_dir);
            config.tolerance = tolerance.unwrap_or(config.tolerance);

            let mut provider = OnnxEmbeddingProvider::load(&config.model_dir)
                .with_context(|| format!("loading models from {}", config.model_dir.display()))?;
            let matcher = EuclideanMatcher::new(config.tolerance);

            let mut progress = |event: &IngestEvent| {
                if let IngestEvent::Processed { filename, faces } = event {
                    println!("{filename}: {faces} face(s)");
                }
            };
            let summary = IngestEngine::new(&mut store, &mut provider, &matcher)
                .with_observer(&mut progress)
                .process_folder(&config.image_dir, &config.faces_dir)?;

            println!(
                "Unique faces extracted and saved: {} ({} processed, {} already ingested, {} failed)",
                summary.unique_count,
                summary.images_processed,
                summary.images_skipped,
                summary.images_failed
            );
            println!("{}", serde_json::to_string_pretty(&summary.occurrences_by_id)?);
        }
        Commands::Faces => {
            let faces = QueryService::new(&store).list_all()?;
            if faces.is_empty() {
                println!("No faces indexed");
            }
            for face in faces {
                println!(
                    "{}\t{} occurrence(s)\t{}",
                    face.face_id,
                    face.occurrences.len(),
                    face.reference_image_path.display()
                );
            }
        }
        Commands::Show { id, out, no_render } => {
            let Some(face) = QueryService::new(&store).get_by_id(id)? else {
                println!("No images found for face ID {id}");
                return Ok(());
            };

            for occurrence in &face.occurrences {
                let [top, right, bottom, left] = occurrence.bounding_box.to_array();
                println!("{}\ttop={top} right={right} bottom={bottom} left={left}", occurrence.source_filename);
            }
            if no_render {
                return Ok(());
            }

            let out_dir = out.unwrap_or_else(|| config.render_dir.join(format!("face_{id}")));
            let total = face.occurrences.len();
            let mut handle = render::spawn_render(RenderJob {
                face_id: id,
                occurrences: face.occurrences,
                image_dir: config.image_dir.clone(),
                out_dir,
                thumbnail_size: config.thumbnail_size,
            })?;

            loop {
                let next = tokio::select! {
                    event = handle.next() => Some(event),
                    _ = tokio::signal::ctrl_c() => None,
                };
                let Some(event) = next else {
                    handle.cancel();
                    continue;
                };
                match event {
                    Some(RenderEvent::Rendered { index, path, .. }) => {
                        println!("[{}/{total}] {}", index + 1, path.display());
                    }
                    Some(RenderEvent::Missing { index, filename }) => {
                        println!("[{}/{total}] {filename}: image file not found", index + 1);
                    }
                    Some(RenderEvent::Failed { index, filename, error }) => {
                        println!("[{}/{total}] {filename}: {error}", index + 1);
                    }
                    Some(RenderEvent::Done { rendered, cancelled }) => {
                        let note = if cancelled { " (cancelled)" } else { "" };
                        println!("Rendered {rendered} of {total} image(s){note}");
                    }
                    None => break,
                }
            }
        }
    }

    Ok(())
}
