//! SQLite-backed document store: one JSON document per identity.

use std::path::Path;

use facedup_core::{FaceId, FaceIdentity, Occurrence};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};

use crate::document::{FaceDocument, OccurrenceDocument};
use crate::store::{FaceIndexStore, StoreError, StoreWrite};

pub struct SqliteFaceStore {
    conn: Connection,
}

impl SqliteFaceStore {
    /// Open (or create) a file-backed store in WAL mode.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        conn.pragma_update(None, "synchronous", "FULL")?;
        let mut store = Self { conn };
        store.init()?;
        tracing::info!(path = %path.display(), "opened face index");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let mut store = Self { conn: Connection::open_in_memory()? };
        store.init()?;
        Ok(store)
    }

    fn init(&mut self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS faces (
                face_id INTEGER PRIMARY KEY,
                document TEXT NOT NULL
            );
            "#,
        )?;
        self.backfill_fingerprints()
    }

    /// Rewrite documents holding occurrences without a fingerprint, so the
    /// fingerprint lookup can stay in SQL.
    fn backfill_fingerprints(&mut self) -> Result<(), StoreError> {
        let stale: Vec<(i64, String)> = {
            let mut stmt = self.conn.prepare(
                "SELECT face_id, document FROM faces
                 WHERE json_valid(document) AND EXISTS (
                     SELECT 1 FROM json_each(faces.document, '$.occurrences') AS occ
                     WHERE coalesce(json_extract(occ.value, '$.fingerprint'), '') = ''
                 )",
            )?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            let stale = rows.collect::<Result<_, _>>()?;
            stale
        };
        if stale.is_empty() {
            return Ok(());
        }

        let tx = self.conn.transaction()?;
        let mut rewritten = 0;
        for (row_id, json) in stale {
            let document = match Self::decode(&json).and_then(|face| FaceDocument::from_identity(&face)) {
                Ok(document) => document,
                Err(e) => {
                    tracing::warn!(row_id, error = %e, "cannot backfill fingerprints; leaving document as is");
                    continue;
                }
            };
            tx.execute(
                "UPDATE faces SET document = ?2 WHERE face_id = ?1",
                params![row_id, serde_json::to_string(&document)?],
            )?;
            rewritten += 1;
        }
        tx.commit()?;
        tracing::info!(documents = rewritten, "backfilled occurrence fingerprints");
        Ok(())
    }

    fn decode(json: &str) -> Result<FaceIdentity, StoreError> {
        serde_json::from_str::<FaceDocument>(json)?.into_identity()
    }
}

/// SQLite integers are signed; ids past `i64::MAX` cannot be stored.
fn sql_id(face_id: FaceId) -> Option<i64> {
    i64::try_from(face_id).ok()
}

fn insert_row(conn: &Connection, identity: &FaceIdentity) -> Result<(), StoreError> {
    let face_id = identity.face_id;
    let row_id = sql_id(face_id).ok_or_else(|| StoreError::InvalidDocument {
        face_id,
        reason: "face id exceeds the SQLite integer range".into(),
    })?;
    let json = serde_json::to_string(&FaceDocument::from_identity(identity)?)?;
    match conn.execute(
        "INSERT INTO faces (face_id, document) VALUES (?1, ?2)",
        params![row_id, json],
    ) {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
            Err(StoreError::DuplicateId(face_id))
        }
        Err(e) => Err(e.into()),
    }
}

fn push_row(conn: &Connection, face_id: FaceId, occurrence: &Occurrence) -> Result<(), StoreError> {
    let row_id = sql_id(face_id).ok_or(StoreError::NotFound(face_id))?;
    let json = serde_json::to_string(&OccurrenceDocument::from_occurrence(face_id, occurrence)?)?;
    let updated = conn.execute(
        "UPDATE faces SET document = json_insert(document, '$.occurrences[#]', json(?2))
         WHERE face_id = ?1",
        params![row_id, json],
    )?;
    if updated == 0 {
        return Err(StoreError::NotFound(face_id));
    }
    Ok(())
}

impl FaceIndexStore for SqliteFaceStore {
    fn insert(&mut self, identity: &FaceIdentity) -> Result<(), StoreError> {
        insert_row(&self.conn, identity)
    }

    fn find_all(&self) -> Result<Vec<FaceIdentity>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT document FROM faces ORDER BY face_id")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(Self::decode(&row?)?);
        }
        Ok(out)
    }

    fn find_one(&self, face_id: FaceId) -> Result<Option<FaceIdentity>, StoreError> {
        let Some(row_id) = sql_id(face_id) else {
            return Ok(None);
        };
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT document FROM faces WHERE face_id = ?1",
                params![row_id],
                |row| row.get(0),
            )
            .optional()?;
        json.as_deref().map(Self::decode).transpose()
    }

    fn push_occurrence(&mut self, face_id: FaceId, occurrence: &Occurrence) -> Result<(), StoreError> {
        push_row(&self.conn, face_id, occurrence)
    }

    fn apply(&mut self, writes: &[StoreWrite]) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        for write in writes {
            match write {
                StoreWrite::Insert(identity) => insert_row(&tx, identity)?,
                StoreWrite::Push { face_id, occurrence } => push_row(&tx, *face_id, occurrence)?,
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn contains_fingerprint(&self, fingerprint: &str) -> Result<bool, StoreError> {
        let found: bool = self.conn.query_row(
            "SELECT EXISTS (
                SELECT 1 FROM faces, json_each(faces.document, '$.occurrences') AS occ
                WHERE json_extract(occ.value, '$.fingerprint') = ?1
            )",
            params![fingerprint],
            |row| row.get(0),
        )?;
        Ok(found)
    }

    fn list_ids(&self) -> Result<Vec<FaceId>, StoreError> {
        let mut stmt = self.conn.prepare("SELECT face_id FROM faces ORDER BY face_id")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|id| FaceId::try_from(id).map_err(|_| StoreError::InvalidRowId(id)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facedup_core::{BoundingBox, Descriptor};

    fn identity(face_id: FaceId) -> FaceIdentity {
        FaceIdentity {
            face_id,
            reference_descriptor: Descriptor::new(vec![0.25, 0.5]),
            reference_image_path: format!("unique_faces/{face_id}.jpg").into(),
            created_at: chrono::Utc::now(),
            occurrences: vec![],
        }
    }

    #[test]
    fn test_reopen_file_store_keeps_documents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/faces.db");

        {
            let mut store = SqliteFaceStore::open(&path).unwrap();
            store.insert(&identity(0)).unwrap();
            store
                .push_occurrence(
                    0,
                    &Occurrence {
                        source_filename: "a.jpg".into(),
                        source_fingerprint: "fp-a".into(),
                        bounding_box: BoundingBox::new(1, 5, 6, 2).unwrap(),
                    },
                )
                .unwrap();
        }

        let store = SqliteFaceStore::open(&path).unwrap();
        let face = store.find_one(0).unwrap().unwrap();
        assert_eq!(face.reference_descriptor.values, vec![0.25, 0.5]);
        assert_eq!(face.occurrences.len(), 1);
        assert!(store.contains_fingerprint("fp-a").unwrap());
    }

    #[test]
    fn test_stored_document_is_json() {
        let mut store = SqliteFaceStore::open_in_memory().unwrap();
        store.insert(&identity(4)).unwrap();
        let doc: String = store
            .conn
            .query_row("SELECT document FROM faces WHERE face_id = 4", [], |row| row.get(0))
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&doc).unwrap();
        assert_eq!(value["face_id"], 4);
        assert_eq!(value["occurrences"], serde_json::json!([]));
    }

    #[test]
    fn test_documents_without_fingerprints_are_backfilled_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("faces.db");
        drop(SqliteFaceStore::open(&path).unwrap());

        let legacy = r#"{"face_id":0,"image_filename":"unique_faces/0.jpg","face_encoding":"AAAAAAAA8D8=",
            "occurrences":[{"filename":"b.png","bounding_box":[1,8,8,1]}]}"#;
        Connection::open(&path)
            .unwrap()
            .execute("INSERT INTO faces (face_id, document) VALUES (0, ?1)", params![legacy])
            .unwrap();

        let store = SqliteFaceStore::open(&path).unwrap();
        assert!(store.contains_fingerprint(&crate::fingerprint::of("b.png")).unwrap());
        let doc: String = store
            .conn
            .query_row("SELECT document FROM faces WHERE face_id = 0", [], |row| row.get(0))
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&doc).unwrap();
        assert_eq!(value["occurrences"][0]["fingerprint"], crate::fingerprint::of("b.png"));
        assert_eq!(value["face_encoding"], "AAAAAAAA8D8=");
    }

    #[test]
    fn test_ids_outside_sqlite_range() {
        let mut store = SqliteFaceStore::open_in_memory().unwrap();
        assert!(matches!(
            store.insert(&identity(u64::MAX)),
            Err(StoreError::InvalidDocument { face_id: u64::MAX, .. })
        ));
        assert_eq!(store.find_one(u64::MAX).unwrap(), None);

        store
            .conn
            .execute(
                "INSERT INTO faces (face_id, document) VALUES (-1, ?1)",
                params![r#"{"face_id":0,"image_filename":"x","face_encoding":"AAAAAAAA8D8=","occurrences":[]}"#],
            )
            .unwrap();
        assert!(matches!(store.list_ids(), Err(StoreError::InvalidRowId(-1))));
    }

    #[test]
    fn test_corrupt_document_surfaces_as_error() {
        let store = SqliteFaceStore::open_in_memory().unwrap();
        store
            .conn
            .execute(
                "INSERT INTO faces (face_id, document) VALUES (7, ?1)",
                params![r#"{"face_id":7,"image_filename":"x","face_encoding":"AAAA","occurrences":[]}"#],
            )
            .unwrap();
        assert!(matches!(
            store.find_one(7),
            Err(StoreError::InvalidDocument { face_id: 7, .. })
        ));
    }
}
