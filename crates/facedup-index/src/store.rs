use facedup_core::{FaceId, FaceIdentity, KnownFace, Occurrence};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("document encoding: {0}")]
    Json(#[from] serde_json::Error),
    #[error("face {0} already exists")]
    DuplicateId(FaceId),
    #[error("face {0} not found")]
    NotFound(FaceId),
    #[error("face {face_id}: invalid document: {reason}")]
    InvalidDocument { face_id: FaceId, reason: String },
    #[error("row id {0} is not a valid face id")]
    InvalidRowId(i64),
}

/// One change in a batch handed to [`FaceIndexStore::apply`].
#[derive(Debug, Clone, PartialEq)]
pub enum StoreWrite {
    Insert(FaceIdentity),
    Push { face_id: FaceId, occurrence: Occurrence },
}

/// Document collection holding one record per identity.
///
/// `find_all` returns identities in ascending `face_id` order. Records are
/// validated on the way in and on the way out.
pub trait FaceIndexStore {
    /// Add a new identity. Fails with [`StoreError::DuplicateId`] if the id is taken.
    fn insert(&mut self, identity: &FaceIdentity) -> Result<(), StoreError>;

    fn find_all(&self) -> Result<Vec<FaceIdentity>, StoreError>;

    fn find_one(&self, face_id: FaceId) -> Result<Option<FaceIdentity>, StoreError>;

    /// Append to an identity's occurrence list. Fails with [`StoreError::NotFound`]
    /// for an unknown id.
    fn push_occurrence(&mut self, face_id: FaceId, occurrence: &Occurrence) -> Result<(), StoreError>;

    /// Apply `writes` in order, all or nothing. On error the store is unchanged.
    fn apply(&mut self, writes: &[StoreWrite]) -> Result<(), StoreError>;

    /// Whether any stored occurrence carries `fingerprint`.
    fn contains_fingerprint(&self, fingerprint: &str) -> Result<bool, StoreError> {
        Ok(self
            .find_all()?
            .iter()
            .any(|identity| identity.has_fingerprint(fingerprint)))
    }

    /// All identity ids, ascending.
    fn list_ids(&self) -> Result<Vec<FaceId>, StoreError> {
        Ok(self.find_all()?.iter().map(|identity| identity.face_id).collect())
    }

    /// Reference descriptors for the matcher, ascending by id.
    fn known_faces(&self) -> Result<Vec<KnownFace>, StoreError> {
        Ok(self.find_all()?.iter().map(KnownFace::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryFaceStore;
    use crate::sqlite::SqliteFaceStore;
    use facedup_core::{BoundingBox, Descriptor};

    fn identity(face_id: FaceId, filename: &str) -> FaceIdentity {
        FaceIdentity {
            face_id,
            reference_descriptor: Descriptor::new(vec![face_id as f64, 1.0]),
            reference_image_path: format!("unique_faces/{face_id}.jpg").into(),
            created_at: chrono::Utc::now(),
            occurrences: vec![occurrence(filename)],
        }
    }

    fn occurrence(filename: &str) -> Occurrence {
        Occurrence {
            source_filename: filename.to_string(),
            source_fingerprint: crate::fingerprint::of(filename),
            bounding_box: BoundingBox::new(10, 60, 70, 5).unwrap(),
        }
    }

    /// Behaviour every store implementation shares.
    fn exercise(store: &mut dyn FaceIndexStore) {
        assert!(store.find_all().unwrap().is_empty());
        assert_eq!(store.find_one(0).unwrap(), None);

        store.insert(&identity(1, "b.jpg")).unwrap();
        store.insert(&identity(0, "a.jpg")).unwrap();
        assert!(matches!(
            store.insert(&identity(0, "c.jpg")),
            Err(StoreError::DuplicateId(0))
        ));

        assert_eq!(store.list_ids().unwrap(), vec![0, 1]);
        let known = store.known_faces().unwrap();
        assert_eq!(known.iter().map(|k| k.face_id).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(known[1].descriptor.values, vec![1.0, 1.0]);

        store.push_occurrence(0, &occurrence("d.jpg")).unwrap();
        store.push_occurrence(0, &occurrence("e.jpg")).unwrap();
        assert!(matches!(
            store.push_occurrence(9, &occurrence("f.jpg")),
            Err(StoreError::NotFound(9))
        ));

        let face = store.find_one(0).unwrap().unwrap();
        let names: Vec<_> = face.occurrences.iter().map(|o| o.source_filename.as_str()).collect();
        assert_eq!(names, vec!["a.jpg", "d.jpg", "e.jpg"]);
        assert_eq!(store.find_one(1).unwrap().unwrap().occurrences.len(), 1);

        assert!(store.contains_fingerprint(&crate::fingerprint::of("e.jpg")).unwrap());
        assert!(store.contains_fingerprint(&crate::fingerprint::of("b.jpg")).unwrap());
        assert!(!store.contains_fingerprint(&crate::fingerprint::of("f.jpg")).unwrap());

        // An occurrence recorded without a fingerprint is keyed by its filename.
        let mut bare = identity(2, "g.jpg");
        bare.occurrences[0].source_fingerprint.clear();
        store.insert(&bare).unwrap();
        let mut bare_push = occurrence("h.jpg");
        bare_push.source_fingerprint.clear();
        store.push_occurrence(2, &bare_push).unwrap();
        assert!(store.contains_fingerprint(&crate::fingerprint::of("g.jpg")).unwrap());
        assert!(store.contains_fingerprint(&crate::fingerprint::of("h.jpg")).unwrap());
        assert_eq!(
            store.find_one(2).unwrap().unwrap().occurrences[1].source_fingerprint,
            crate::fingerprint::of("h.jpg")
        );

        // A batch whose second write fails leaves nothing behind.
        let failed = store.apply(&[
            StoreWrite::Insert(identity(3, "i.jpg")),
            StoreWrite::Push { face_id: 9, occurrence: occurrence("i.jpg") },
        ]);
        assert!(matches!(failed, Err(StoreError::NotFound(9))));
        assert_eq!(store.find_one(3).unwrap(), None);
        assert!(!store.contains_fingerprint(&crate::fingerprint::of("i.jpg")).unwrap());

        store
            .apply(&[
                StoreWrite::Insert(identity(3, "j.jpg")),
                StoreWrite::Push { face_id: 3, occurrence: occurrence("j.jpg") },
                StoreWrite::Push { face_id: 1, occurrence: occurrence("j.jpg") },
            ])
            .unwrap();
        assert_eq!(store.list_ids().unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(store.find_one(3).unwrap().unwrap().occurrences.len(), 2);
        assert_eq!(store.find_one(1).unwrap().unwrap().occurrences.len(), 2);
    }

    #[test]
    fn test_memory_store_behaviour() {
        exercise(&mut MemoryFaceStore::new());
    }

    #[test]
    fn test_sqlite_store_behaviour() {
        exercise(&mut SqliteFaceStore::open_in_memory().unwrap());
    }

    #[test]
    fn test_stores_reject_degenerate_boxes() {
        let mut bad = occurrence("x.jpg");
        bad.bounding_box = BoundingBox { top: 5, right: 5, bottom: 5, left: 5 };

        let mut memory = MemoryFaceStore::new();
        let mut sqlite = SqliteFaceStore::open_in_memory().unwrap();
        let stores: [&mut dyn FaceIndexStore; 2] = [&mut memory, &mut sqlite];
        for store in stores {
            store.insert(&identity(0, "a.jpg")).unwrap();
            assert!(matches!(
                store.push_occurrence(0, &bad),
                Err(StoreError::InvalidDocument { face_id: 0, .. })
            ));
        }
    }
}
