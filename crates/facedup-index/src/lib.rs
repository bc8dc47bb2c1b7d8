//! facedup-index — Persistent identity index and incremental ingestion.
//!
//! Holds one document per unique face, grows it one photo folder at a time,
//! and answers the viewer's lookups.

pub mod document;
pub mod fingerprint;
pub mod ingest;
pub mod memory;
pub mod query;
pub mod sqlite;
pub mod store;

pub use ingest::{IngestEngine, IngestError, IngestEvent, IngestObserver, IngestSummary};
pub use memory::MemoryFaceStore;
pub use query::QueryService;
pub use sqlite::SqliteFaceStore;
pub use store::{FaceIndexStore, StoreError, StoreWrite};
