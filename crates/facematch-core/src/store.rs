//! Record storage contract.

use crate::types::{Person, Photo, RecordId};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage backend: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("stored {kind} {id} is not a valid document: {source}")]
    Corrupt {
        kind: &'static str,
        id: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Read records by id, write records by id.
pub trait FaceStore {
    fn photo(&self, id: &RecordId) -> Result<Option<Photo>, StoreError>;

    fn person(&self, id: &RecordId) -> Result<Option<Person>, StoreError>;

    /// People that have a stored descriptor, in a stable order.
    fn people_with_descriptors(&self) -> Result<Vec<Person>, StoreError>;

    /// Write `photo`, and `person` when given, as one atomic update.
    fn commit(&self, photo: &Photo, person: Option<&Person>) -> Result<(), StoreError>;
}

/// In-process store. People keep insertion order.
#[derive(Default)]
pub struct MemoryStore {
    photos: Mutex<HashMap<RecordId, Photo>>,
    people: Mutex<Vec<Person>>,
    commits: Mutex<usize>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_photo(&self, photo: Photo) {
        lock(&self.photos).insert(photo.id, photo);
    }

    pub fn insert_person(&self, person: Person) {
        upsert_person(&mut lock(&self.people), person);
    }

    /// Number of successful commits so far.
    pub fn commit_count(&self) -> usize {
        *lock(&self.commits)
    }
}

fn upsert_person(people: &mut Vec<Person>, person: Person) {
    match people.iter_mut().find(|p| p.id == person.id) {
        Some(slot) => *slot = person,
        None => people.push(person),
    }
}

impl FaceStore for MemoryStore {
    fn photo(&self, id: &RecordId) -> Result<Option<Photo>, StoreError> {
        Ok(lock(&self.photos).get(id).cloned())
    }

    fn person(&self, id: &RecordId) -> Result<Option<Person>, StoreError> {
        Ok(lock(&self.people).iter().find(|p| p.id == *id).cloned())
    }

    fn people_with_descriptors(&self) -> Result<Vec<Person>, StoreError> {
        Ok(lock(&self.people)
            .iter()
            .filter(|p| p.has_descriptor())
            .cloned()
            .collect())
    }

    fn commit(&self, photo: &Photo, person: Option<&Person>) -> Result<(), StoreError> {
        let mut photos = lock(&self.photos);
        let mut people = lock(&self.people);
        photos.insert(photo.id, photo.clone());
        if let Some(person) = person {
            upsert_person(&mut people, person.clone());
        }
        *lock(&self.commits) += 1;
        Ok(())
    }
}
