use crate::descriptor::{deserialize_lenient, Descriptor, RawDescriptor};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identifier of a photo or person record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(Uuid);

impl RecordId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for RecordId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// Axis-aligned face rectangle in image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// Four-point facial landmarks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Landmarks {
    pub left_eye: Point,
    pub right_eye: Point,
    pub nose: Point,
    pub mouth: Point,
}

/// How a face reached its current match state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    /// Set by a match pass.
    Automatic,
    /// Assigned to a person by hand.
    Manual,
    /// Match cleared, by hand or by a match pass that no longer finds one.
    Unassigned,
}

/// Lifecycle state of a face observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FaceState {
    Detected,
    Matched,
    Assigned,
    Unassigned,
}

/// One detected face within one photo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceObservation {
    /// Descriptor values as stored; not length-checked until matched.
    #[serde(
        default,
        deserialize_with = "deserialize_lenient",
        skip_serializing_if = "Option::is_none"
    )]
    pub descriptor: Option<Vec<f64>>,
    #[serde(rename = "box")]
    pub bounds: FaceBox,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub landmarks: Option<Landmarks>,
    #[serde(default)]
    pub matched_person_id: Option<RecordId>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
    pub detected_at: DateTime<Utc>,
}

impl FaceObservation {
    pub fn state(&self) -> FaceState {
        match (self.matched_person_id, self.resolution) {
            (Some(_), Some(Resolution::Manual)) => FaceState::Assigned,
            (Some(_), _) => FaceState::Matched,
            (None, Some(Resolution::Unassigned)) => FaceState::Unassigned,
            (None, _) => FaceState::Detected,
        }
    }

    /// The stored descriptor, if it normalizes.
    pub fn canonical_descriptor(&self) -> Option<Descriptor> {
        self.descriptor
            .as_deref()
            .and_then(|values| Descriptor::normalize(RawDescriptor::Floats(values)))
    }
}

/// Face recognition state owned by a photo.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceRecognition {
    #[serde(default)]
    pub faces: Vec<FaceObservation>,
    #[serde(default)]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub matched_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub model_version: Option<String>,
}

/// Photo document. Fields owned by other parts of the library are kept in
/// `extra` and written back untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Photo {
    pub id: RecordId,
    #[serde(default)]
    pub people: Vec<RecordId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub face_recognition: Option<FaceRecognition>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Photo {
    pub fn new(id: RecordId) -> Self {
        Self {
            id,
            people: Vec::new(),
            face_recognition: None,
            extra: Map::new(),
        }
    }

    pub fn faces(&self) -> &[FaceObservation] {
        self.face_recognition
            .as_ref()
            .map(|fr| fr.faces.as_slice())
            .unwrap_or(&[])
    }

    /// Union `ids` into `people`. Existing references are never removed.
    pub fn add_people(&mut self, ids: impl IntoIterator<Item = RecordId>) {
        for id in ids {
            if !self.people.contains(&id) {
                self.people.push(id);
            }
        }
    }
}

/// Face recognition data stored on a person.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonFaceRecognition {
    /// Canonical descriptor, in whatever shape the writer stored it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descriptor: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Person document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Person {
    pub id: RecordId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub face_recognition: Option<PersonFaceRecognition>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Person {
    pub fn new(id: RecordId) -> Self {
        Self {
            id,
            face_recognition: None,
            extra: Map::new(),
        }
    }

    /// Whether any descriptor is stored, usable or not.
    pub fn has_descriptor(&self) -> bool {
        self.face_recognition
            .as_ref()
            .and_then(|fr| fr.descriptor.as_ref())
            .is_some_and(|d| !d.is_null())
    }

    /// The stored descriptor, if it normalizes.
    pub fn descriptor(&self) -> Option<Descriptor> {
        let stored = self.face_recognition.as_ref()?.descriptor.as_ref()?;
        Descriptor::normalize(RawDescriptor::Json(stored))
    }

    /// Store `descriptor` as this person's canonical descriptor.
    pub fn set_descriptor(&mut self, descriptor: &Descriptor, now: DateTime<Utc>) {
        let fr = self.face_recognition.get_or_insert_with(Default::default);
        fr.descriptor = Some(Value::from(descriptor.to_vec()));
        fr.updated_at = Some(now);
    }
}
