//! Read-only lookups for viewers.

use facedup_core::{FaceId, FaceIdentity};

use crate::store::{FaceIndexStore, StoreError};

pub struct QueryService<'a> {
    store: &'a dyn FaceIndexStore,
}

impl<'a> QueryService<'a> {
    pub fn new(store: &'a dyn FaceIndexStore) -> Self {
        Self { store }
    }

    /// Full record, including every occurrence. Unknown ids give `Ok(None)`.
    pub fn get_by_id(&self, face_id: FaceId) -> Result<Option<FaceIdentity>, StoreError> {
        let found = self.store.find_one(face_id)?;
        match &found {
            Some(face) => tracing::debug!(face_id, occurrences = face.occurrences.len(), "found face"),
            None => tracing::debug!(face_id, "no entry for face"),
        }
        Ok(found)
    }

    /// Every identity id, ascending.
    pub fn list_all_ids(&self) -> Result<Vec<FaceId>, StoreError> {
        let mut ids = self.store.list_ids()?;
        ids.sort_unstable();
        Ok(ids)
    }

    /// Every identity with its occurrences, ascending by id, in one read.
    pub fn list_all(&self) -> Result<Vec<FaceIdentity>, StoreError> {
        self.store.find_all()
    }

    pub fn occurrence_count(&self, face_id: FaceId) -> Result<Option<usize>, StoreError> {
        Ok(self.get_by_id(face_id)?.map(|face| face.occurrences.len()))
    }
}
