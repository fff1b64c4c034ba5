use crate::engine::{EngineError, EngineHandle};
use facematch_core::{DetectRequest, ErrorKind};
use serde::Serialize;
use zbus::interface;

pub const BUS_NAME: &str = "org.facematch.FaceMatch1";
pub const OBJECT_PATH: &str = "/org/facematch/FaceMatch1";

/// D-Bus interface for the facematch daemon.
///
/// Bus name: org.facematch.FaceMatch1
/// Object path: /org/facematch/FaceMatch1
pub struct FaceMatchService {
    engine: EngineHandle,
    db_path: String,
    default_threshold: f64,
}

impl FaceMatchService {
    pub fn new(engine: EngineHandle, db_path: String, default_threshold: f64) -> Self {
        Self {
            engine,
            db_path,
            default_threshold,
        }
    }
}

fn to_fdo(err: EngineError) -> zbus::fdo::Error {
    match err {
        EngineError::Lifecycle(e) => match e.kind() {
            ErrorKind::Validation => zbus::fdo::Error::InvalidArgs(e.to_string()),
            ErrorKind::NotFound => zbus::fdo::Error::UnknownObject(e.to_string()),
            ErrorKind::Precondition | ErrorKind::Upstream | ErrorKind::Storage => {
                zbus::fdo::Error::Failed(e.to_string())
            }
        },
        other => zbus::fdo::Error::Failed(other.to_string()),
    }
}

/// D-Bus has no optional double: exactly zero selects the configured default.
/// Anything else, negatives included, goes to validation.
fn requested_threshold(threshold: f64) -> Option<f64> {
    (threshold != 0.0).then_some(threshold)
}

fn to_json<T: Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

#[interface(name = "org.facematch.FaceMatch1")]
impl FaceMatchService {
    /// Store detected faces for a photo. `faces_json` is a JSON array of faces.
    async fn detect(
        &self,
        photo_id: &str,
        faces_json: &str,
        only_matched: bool,
    ) -> zbus::fdo::Result<String> {
        tracing::info!(photo_id, only_matched, "detect requested");
        let request = DetectRequest::from_json(faces_json, only_matched)
            .map_err(|e| to_fdo(e.into()))?;
        let response = self
            .engine
            .detect(photo_id.to_string(), request)
            .await
            .map_err(to_fdo)?;
        to_json(&response)
    }

    /// Match a photo's faces against known people.
    /// A threshold of zero selects the configured default.
    async fn match_photo(&self, photo_id: &str, threshold: f64) -> zbus::fdo::Result<String> {
        tracing::info!(photo_id, threshold, "match requested");
        let threshold = requested_threshold(threshold);
        let response = self
            .engine
            .match_photo(photo_id.to_string(), threshold)
            .await
            .map_err(to_fdo)?;
        to_json(&response)
    }

    /// Assign a face to a person. An empty person id clears the assignment.
    async fn assign(
        &self,
        photo_id: &str,
        face_index: i32,
        person_id: &str,
    ) -> zbus::fdo::Result<String> {
        tracing::info!(photo_id, face_index, person_id, "assign requested");
        let person_id = (!person_id.is_empty()).then(|| person_id.to_string());
        let response = self
            .engine
            .assign(photo_id.to_string(), i64::from(face_index), person_id)
            .await
            .map_err(to_fdo)?;
        to_json(&response)
    }

    /// Stored face records for a photo, without descriptors.
    async fn faces(&self, photo_id: &str) -> zbus::fdo::Result<String> {
        let response = self
            .engine
            .faces(photo_id.to_string())
            .await
            .map_err(to_fdo)?;
        to_json(&response)
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "database": self.db_path,
            "default_threshold": self.default_threshold,
        })
        .to_string())
    }
}
