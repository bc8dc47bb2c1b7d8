//! In-process store, used by tests and for dry runs.

use std::collections::BTreeMap;

use facedup_core::{FaceId, FaceIdentity, Occurrence};

use crate::document::{FaceDocument, OccurrenceDocument};
use crate::store::{FaceIndexStore, StoreError, StoreWrite};

#[derive(Debug, Default)]
pub struct MemoryFaceStore {
    faces: BTreeMap<FaceId, FaceIdentity>,
}

impl MemoryFaceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }
}

impl FaceIndexStore for MemoryFaceStore {
    fn insert(&mut self, identity: &FaceIdentity) -> Result<(), StoreError> {
        // Round-trip through the document layout so reads match the SQLite store.
        let stored = FaceDocument::from_identity(identity)?.into_identity()?;
        if self.faces.contains_key(&identity.face_id) {
            return Err(StoreError::DuplicateId(identity.face_id));
        }
        self.faces.insert(identity.face_id, stored);
        Ok(())
    }

    fn find_all(&self) -> Result<Vec<FaceIdentity>, StoreError> {
        Ok(self.faces.values().cloned().collect())
    }

    fn find_one(&self, face_id: FaceId) -> Result<Option<FaceIdentity>, StoreError> {
        Ok(self.faces.get(&face_id).cloned())
    }

    fn push_occurrence(&mut self, face_id: FaceId, occurrence: &Occurrence) -> Result<(), StoreError> {
        let stored = OccurrenceDocument::from_occurrence(face_id, occurrence)?.into_occurrence(face_id)?;
        let identity = self
            .faces
            .get_mut(&face_id)
            .ok_or(StoreError::NotFound(face_id))?;
        identity.occurrences.push(stored);
        Ok(())
    }

    fn apply(&mut self, writes: &[StoreWrite]) -> Result<(), StoreError> {
        let before = self.faces.clone();
        for write in writes {
            let applied = match write {
                StoreWrite::Insert(identity) => self.insert(identity),
                StoreWrite::Push { face_id, occurrence } => self.push_occurrence(*face_id, occurrence),
            };
            if let Err(e) = applied {
                self.faces = before;
                return Err(e);
            }
        }
        Ok(())
    }
}
