use crate::schema::{self, VersionedSchema};
use facematch_core::{FaceStore, Person, Photo, RecordId, StoreError};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Error as JsonError;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("unknown database version {0}")]
    UnknownVersion(u32),
    #[error("schema validation failed for table {table}: found columns {found:?}")]
    ColumnMismatch {
        table: &'static str,
        found: Vec<String>,
    },
}

fn backend<E: std::error::Error + Send + Sync + 'static>(e: E) -> StoreError {
    StoreError::Backend(Box::new(e))
}

/// Photo and person documents in one SQLite database.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `db_path`.
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self, StoreError> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(backend)?;
        }
        let conn = Connection::open(db_path).map_err(backend)?;
        tracing::info!(path = %db_path.display(), "opened face database");
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory().map_err(backend)?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        let version: u32 = conn
            .query_row("PRAGMA user_version;", [], |row| row.get(0))
            .map_err(backend)?;

        let current = schema::current();
        match version {
            0 => Self::create_schema(&conn, current)?,
            v if v == current.version => Self::validate_schema(&conn, current)?,
            v => return Err(backend(SchemaError::UnknownVersion(v))),
        }

        Ok(Self { conn })
    }

    fn create_schema(conn: &Connection, schema: &VersionedSchema) -> Result<(), StoreError> {
        let tx = conn.unchecked_transaction().map_err(backend)?;
        for table in schema.tables {
            tx.execute(table.schema, []).map_err(backend)?;
            for index in table.indices {
                tx.execute(index, []).map_err(backend)?;
            }
        }
        tx.execute(&format!("PRAGMA user_version = {}", schema.version), [])
            .map_err(backend)?;
        tx.commit().map_err(backend)?;
        tracing::info!(version = schema.version, "created face database schema");
        Ok(())
    }

    fn validate_schema(conn: &Connection, schema: &VersionedSchema) -> Result<(), StoreError> {
        for table in schema.tables {
            let mut stmt = conn
                .prepare(&format!("PRAGMA table_info({});", table.name))
                .map_err(backend)?;
            let found: Vec<String> = stmt
                .query_map([], |row| row.get(1))
                .map_err(backend)?
                .collect::<Result<_, _>>()
                .map_err(backend)?;
            if found != table.columns {
                return Err(backend(SchemaError::ColumnMismatch {
                    table: table.name,
                    found,
                }));
            }
        }
        Ok(())
    }

    /// Insert or replace a photo document.
    pub fn put_photo(&self, photo: &Photo) -> Result<(), StoreError> {
        write_photo(&self.conn, photo)
    }

    /// Insert or replace a person document.
    pub fn put_person(&self, person: &Person) -> Result<(), StoreError> {
        write_person(&self.conn, person)
    }

    fn read_doc(&self, table: &str, id: &RecordId) -> Result<Option<String>, StoreError> {
        self.conn
            .query_row(
                &format!("SELECT doc FROM {table} WHERE id = ?1"),
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(backend)
    }
}

fn corrupt(kind: &'static str, id: impl ToString) -> impl FnOnce(JsonError) -> StoreError {
    let id = id.to_string();
    move |source| StoreError::Corrupt { kind, id, source }
}

fn write_photo(conn: &Connection, photo: &Photo) -> Result<(), StoreError> {
    let doc = serde_json::to_string(photo).map_err(corrupt("photo", photo.id))?;
    conn.execute(
        "INSERT INTO photo (id, doc) VALUES (?1, ?2) \
         ON CONFLICT(id) DO UPDATE SET doc = excluded.doc, updated = cast(strftime('%s','now') as int)",
        params![photo.id.to_string(), doc],
    )
    .map_err(backend)?;
    Ok(())
}

fn write_person(conn: &Connection, person: &Person) -> Result<(), StoreError> {
    let doc = serde_json::to_string(person).map_err(corrupt("person", person.id))?;
    conn.execute(
        "INSERT INTO person (id, has_descriptor, doc) VALUES (?1, ?2, ?3) \
         ON CONFLICT(id) DO UPDATE SET has_descriptor = excluded.has_descriptor, doc = excluded.doc, \
         updated = cast(strftime('%s','now') as int)",
        params![person.id.to_string(), person.has_descriptor(), doc],
    )
    .map_err(backend)?;
    Ok(())
}

impl FaceStore for SqliteStore {
    fn photo(&self, id: &RecordId) -> Result<Option<Photo>, StoreError> {
        self.read_doc("photo", id)?
            .map(|doc| serde_json::from_str(&doc).map_err(corrupt("photo", id)))
            .transpose()
    }

    fn person(&self, id: &RecordId) -> Result<Option<Person>, StoreError> {
        self.read_doc("person", id)?
            .map(|doc| serde_json::from_str(&doc).map_err(corrupt("person", id)))
            .transpose()
    }

    fn people_with_descriptors(&self) -> Result<Vec<Person>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, doc FROM person WHERE has_descriptor = 1 ORDER BY rowid")
            .map_err(backend)?;
        let rows: Vec<(String, String)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(backend)?
            .collect::<Result<_, _>>()
            .map_err(backend)?;

        let mut people = Vec::with_capacity(rows.len());
        for (id, doc) in rows {
            match serde_json::from_str::<Person>(&doc) {
                Ok(person) => people.push(person),
                // One bad document must not take matching down for every photo.
                Err(e) => tracing::warn!(person_id = %id, error = %e, "skipping undecodable person"),
            }
        }
        Ok(people)
    }

    fn commit(&self, photo: &Photo, person: Option<&Person>) -> Result<(), StoreError> {
        let tx = self.conn.unchecked_transaction().map_err(backend)?;
        write_photo(&tx, photo)?;
        if let Some(person) = person {
            write_person(&tx, person)?;
        }
        tx.commit().map_err(backend)?;
        tracing::debug!(
            photo_id = %photo.id,
            person_id = ?person.map(|p| p.id.to_string()),
            "committed face records"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facematch_core::{
        DetectRequest, FaceBox, FaceInput, FaceService, ServiceSettings, DESCRIPTOR_LEN,
    };
    use serde_json::json;
    use tempfile::TempDir;

    fn create_tmp_store() -> (SqliteStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = SqliteStore::open(temp_dir.path().join("faces.db")).unwrap();
        (store, temp_dir)
    }

    fn person_with_descriptor(value: f64) -> Person {
        serde_json::from_value(json!({
            "id": RecordId::new().to_string(),
            "name": "someone",
            "faceRecognition": {"descriptor": vec![value; DESCRIPTOR_LEN]},
        }))
        .unwrap()
    }

    #[test]
    fn test_photo_roundtrip_keeps_document() {
        let (store, _dir) = create_tmp_store();
        let mut photo = Photo::new(RecordId::new());
        photo.extra.insert("album".into(), json!("holidays"));
        store.put_photo(&photo).unwrap();

        let loaded = store.photo(&photo.id).unwrap().unwrap();
        assert_eq!(loaded, photo);
        assert!(store.photo(&RecordId::new()).unwrap().is_none());
    }

    #[test]
    fn test_reopen_validates_schema() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("faces.db");
        let photo = Photo::new(RecordId::new());
        {
            let store = SqliteStore::open(&path).unwrap();
            store.put_photo(&photo).unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert!(store.photo(&photo.id).unwrap().is_some());
    }

    #[test]
    fn test_unknown_version_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("faces.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute("PRAGMA user_version = 42", []).unwrap();
        }
        assert!(matches!(SqliteStore::open(&path), Err(StoreError::Backend(_))));
    }

    #[test]
    fn test_people_with_descriptors_in_insertion_order() {
        let store = SqliteStore::open_in_memory().unwrap();
        let first = person_with_descriptor(0.1);
        let without = Person::new(RecordId::new());
        let second = person_with_descriptor(0.2);
        store.put_person(&first).unwrap();
        store.put_person(&without).unwrap();
        store.put_person(&second).unwrap();
        // Updating keeps the original position.
        store.put_person(&first).unwrap();

        let ids: Vec<_> = store
            .people_with_descriptors()
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec![first.id, second.id]);
        assert_eq!(store.person(&first.id).unwrap().unwrap().extra["name"], "someone");
    }

    #[test]
    fn test_corrupt_document() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = RecordId::new();
        store
            .conn
            .execute(
                "INSERT INTO photo (id, doc) VALUES (?1, ?2)",
                params![id.to_string(), "{not json"],
            )
            .unwrap();
        assert!(matches!(store.photo(&id), Err(StoreError::Corrupt { .. })));
    }

    #[test]
    fn test_non_finite_descriptor_strings_survive_storage() {
        let (store, _dir) = create_tmp_store();
        let photo = Photo::new(RecordId::new());
        store.put_photo(&photo).unwrap();
        let svc = FaceService::new(store, ServiceSettings::default());

        let mut descriptor = vec![json!(0.1); DESCRIPTOR_LEN];
        descriptor[0] = json!("NaN");
        descriptor[1] = json!("inf");
        let faces = json!([{
            "descriptor": descriptor,
            "box": {"x": 0, "y": 0, "width": 8, "height": 8},
        }]);
        let request = DetectRequest::from_json(&faces.to_string(), false).unwrap();
        svc.detect(&photo.id.to_string(), request).unwrap();

        let view = svc.faces(&photo.id.to_string()).unwrap();
        assert!(view.faces[0].has_descriptor);
        let stored = svc.store().photo(&photo.id).unwrap().unwrap();
        let values = stored.faces()[0].descriptor.clone().unwrap();
        assert_eq!(&values[..3], &[0.0, 0.0, 0.1]);
        let response = svc.match_photo(&photo.id.to_string(), None).unwrap();
        assert_eq!(response.matches.len(), 1);
    }

    #[test]
    fn test_loosely_typed_face_descriptor_is_matched() {
        let store = SqliteStore::open_in_memory().unwrap();
        let person = person_with_descriptor(0.1);
        store.put_person(&person).unwrap();

        let photo_id = RecordId::new();
        let doc = json!({
            "id": photo_id.to_string(),
            "faceRecognition": {"faces": [
                {
                    "descriptor": vec!["0.1"; DESCRIPTOR_LEN],
                    "box": {"x": 0, "y": 0, "width": 8, "height": 8},
                    "detectedAt": "2024-05-01T10:00:00Z",
                },
                {
                    "descriptor": [null, "x", 3],
                    "box": {"x": 8, "y": 0, "width": 8, "height": 8},
                    "detectedAt": "2024-05-01T10:00:00Z",
                },
            ]},
        });
        store
            .conn
            .execute(
                "INSERT INTO photo (id, doc) VALUES (?1, ?2)",
                params![photo_id.to_string(), doc.to_string()],
            )
            .unwrap();

        let svc = FaceService::new(store, ServiceSettings::default());
        let response = svc.match_photo(&photo_id.to_string(), None).unwrap();
        assert_eq!(response.matches[0].person_id, Some(person.id));
        assert_eq!(response.matches[1].person_id, None);
    }

    #[test]
    fn test_assign_backfill_commits_photo_and_person() {
        let store = SqliteStore::open_in_memory().unwrap();
        let photo = Photo::new(RecordId::new());
        let person = Person::new(RecordId::new());
        store.put_photo(&photo).unwrap();
        store.put_person(&person).unwrap();

        let svc = FaceService::new(store, ServiceSettings::default());
        let face = FaceInput {
            descriptor: Some(vec![0.3; DESCRIPTOR_LEN]),
            bounds: FaceBox {
                x: 0.0,
                y: 0.0,
                width: 8.0,
                height: 8.0,
            },
            landmarks: None,
            matched_person_id: None,
            confidence: None,
        };
        let request = DetectRequest {
            faces: vec![face],
            ..Default::default()
        };
        svc.detect(&photo.id.to_string(), request).unwrap();
        svc.assign(&photo.id.to_string(), 0, Some(&person.id.to_string()))
            .unwrap();

        let stored_person = svc.store().person(&person.id).unwrap().unwrap();
        assert!(stored_person.has_descriptor());
        assert_eq!(svc.store().people_with_descriptors().unwrap().len(), 1);

        let stored_photo = svc.store().photo(&photo.id).unwrap().unwrap();
        assert_eq!(stored_photo.people, vec![person.id]);

        let matches = svc.match_photo(&photo.id.to_string(), None).unwrap();
        assert_eq!(matches.matches[0].person_id, Some(person.id));
    }
}
