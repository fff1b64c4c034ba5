//! Photo face-record lifecycle: detect, match and manual assignment.
//!
//! Each operation reads one photo, computes the new state in memory and
//! issues a single store commit. Nothing is written when an operation fails.

use crate::descriptor::deserialize_lenient;
use crate::matcher::{match_faces, EuclideanMatcher, FaceMatchResult, Matcher};
use crate::source::{DescriptorSource, SourceError};
use crate::store::{FaceStore, StoreError};
use crate::types::{FaceBox, FaceObservation, FaceState, Landmarks, Photo, RecordId, Resolution};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default Euclidean distance threshold for this descriptor family.
pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.6;
const MAX_MATCH_THRESHOLD: f64 = 2.0;

#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("missing {0}")]
    Missing(&'static str),
    #[error("malformed {field}: {value:?}")]
    MalformedId {
        field: &'static str,
        value: String,
    },
    #[error("invalid request: {0}")]
    Invalid(String),
    #[error("face index {index} out of range ({len} faces)")]
    InvalidFaceIndex { index: i64, len: usize },
    #[error("photo not found: {0}")]
    PhotoNotFound(RecordId),
    #[error("person not found: {0}")]
    PersonNotFound(RecordId),
    #[error("photo {0} has no detected faces with descriptors")]
    NoFacesDetected(RecordId),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Coarse classification callers use to pick a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Precondition,
    Upstream,
    Storage,
}

impl LifecycleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LifecycleError::Missing(_)
            | LifecycleError::MalformedId { .. }
            | LifecycleError::Invalid(_)
            | LifecycleError::InvalidFaceIndex { .. } => ErrorKind::Validation,
            LifecycleError::PhotoNotFound(_) | LifecycleError::PersonNotFound(_) => {
                ErrorKind::NotFound
            }
            LifecycleError::NoFacesDetected(_) => ErrorKind::Precondition,
            LifecycleError::Source(_) => ErrorKind::Upstream,
            LifecycleError::Store(_) => ErrorKind::Storage,
        }
    }
}

/// One face as reported by the descriptor source.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceInput {
    #[serde(default, deserialize_with = "deserialize_lenient")]
    pub descriptor: Option<Vec<f64>>,
    #[serde(rename = "box")]
    pub bounds: FaceBox,
    #[serde(default)]
    pub landmarks: Option<Landmarks>,
    #[serde(default)]
    pub matched_person_id: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct DetectRequest {
    pub faces: Vec<FaceInput>,
    /// Keep only faces that end up matched to a person.
    pub only_matched: bool,
    /// Overrides the configured model version tag.
    pub model_version: Option<String>,
}

impl DetectRequest {
    /// Parse a JSON array of faces.
    pub fn from_json(faces_json: &str, only_matched: bool) -> Result<Self, LifecycleError> {
        let value: serde_json::Value = serde_json::from_str(faces_json)
            .map_err(|e| LifecycleError::Invalid(format!("faces is not valid JSON: {e}")))?;
        if !value.is_array() {
            return Err(LifecycleError::Invalid("faces must be an array".into()));
        }
        let faces = serde_json::from_value(value)
            .map_err(|e| LifecycleError::Invalid(format!("malformed face: {e}")))?;
        Ok(Self {
            faces,
            only_matched,
            model_version: None,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FaceSummary {
    #[serde(rename = "box")]
    pub bounds: FaceBox,
    pub landmarks: Option<Landmarks>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectResponse {
    pub photo_id: RecordId,
    pub faces_detected: usize,
    pub faces: Vec<FaceSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchResponse {
    pub matches: Vec<FaceMatchResult>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignResponse {
    pub face_index: usize,
    pub person_id: Option<RecordId>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceView {
    pub face_index: usize,
    #[serde(rename = "box")]
    pub bounds: FaceBox,
    pub landmarks: Option<Landmarks>,
    pub matched_person_id: Option<RecordId>,
    pub confidence: Option<f64>,
    pub state: FaceState,
    pub has_descriptor: bool,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FacesResponse {
    pub photo_id: RecordId,
    pub people: Vec<RecordId>,
    pub processed_at: Option<DateTime<Utc>>,
    pub matched_at: Option<DateTime<Utc>>,
    pub model_version: Option<String>,
    pub faces: Vec<FaceView>,
}

#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub default_threshold: f64,
    pub model_version: String,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            default_threshold: DEFAULT_MATCH_THRESHOLD,
            model_version: "unknown".to_string(),
        }
    }
}

/// A validated incoming face.
struct ValidFace {
    descriptor: Option<Vec<f64>>,
    bounds: FaceBox,
    landmarks: Option<Landmarks>,
    matched: Option<(RecordId, f64)>,
}

fn parse_id(field: &'static str, value: &str) -> Result<RecordId, LifecycleError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(LifecycleError::Missing(field));
    }
    value.parse().map_err(|_| LifecycleError::MalformedId {
        field,
        value: value.to_string(),
    })
}

fn validate_threshold(threshold: f64) -> Result<f64, LifecycleError> {
    if threshold.is_finite() && threshold > 0.0 && threshold <= MAX_MATCH_THRESHOLD {
        Ok(threshold)
    } else {
        Err(LifecycleError::Invalid(format!(
            "threshold must be in (0, {MAX_MATCH_THRESHOLD}], got {threshold}"
        )))
    }
}

fn validate_face(index: usize, face: FaceInput) -> Result<ValidFace, LifecycleError> {
    let b = face.bounds;
    let finite = [b.x, b.y, b.width, b.height].iter().all(|v| v.is_finite());
    if !finite || b.width < 0.0 || b.height < 0.0 {
        return Err(LifecycleError::Invalid(format!(
            "face {index}: box needs finite coordinates and a non-negative size"
        )));
    }

    let matched = match (face.matched_person_id.as_deref(), face.confidence) {
        (None, None) => None,
        (Some(person), Some(confidence)) => {
            if !(0.0..=1.0).contains(&confidence) {
                return Err(LifecycleError::Invalid(format!(
                    "face {index}: confidence must be in [0, 1], got {confidence}"
                )));
            }
            Some((parse_id("matchedPersonId", person)?, confidence))
        }
        _ => {
            return Err(LifecycleError::Invalid(format!(
                "face {index}: matchedPersonId and confidence must be given together"
            )))
        }
    };

    Ok(ValidFace {
        descriptor: face.descriptor,
        bounds: face.bounds,
        landmarks: face.landmarks,
        matched,
    })
}

/// Face-record lifecycle over a [`FaceStore`].
pub struct FaceService<S, M = EuclideanMatcher> {
    store: S,
    matcher: M,
    settings: ServiceSettings,
}

impl<S: FaceStore> FaceService<S> {
    pub fn new(store: S, settings: ServiceSettings) -> Self {
        Self::with_matcher(store, EuclideanMatcher, settings)
    }
}

impl<S: FaceStore, M: Matcher> FaceService<S, M> {
    pub fn with_matcher(store: S, matcher: M, settings: ServiceSettings) -> Self {
        Self {
            store,
            matcher,
            settings,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    fn load_photo(&self, id: RecordId) -> Result<Photo, LifecycleError> {
        self.store
            .photo(&id)?
            .ok_or(LifecycleError::PhotoNotFound(id))
    }

    /// Replace the photo's faces with a fresh detection result.
    ///
    /// A face keeps the match held by the previous face at the same position.
    /// Otherwise it takes the match supplied with the input, if any.
    pub fn detect(
        &self,
        photo_id: &str,
        request: DetectRequest,
    ) -> Result<DetectResponse, LifecycleError> {
        let id = parse_id("photo id", photo_id)?;
        let photo = self.load_photo(id)?;
        self.apply_detect(photo, request)
    }

    /// Run `source` on `image`, then store the result as [`detect`](Self::detect) does.
    /// A source failure aborts before anything is written.
    pub fn detect_image(
        &self,
        photo_id: &str,
        image: &[u8],
        source: &mut dyn DescriptorSource,
        only_matched: bool,
    ) -> Result<DetectResponse, LifecycleError> {
        let id = parse_id("photo id", photo_id)?;
        let photo = self.load_photo(id)?;

        let faces = source.observe(image).map_err(|e| {
            tracing::error!(photo_id = %id, error = %e, "descriptor source failed");
            e
        })?;

        let request = DetectRequest {
            faces,
            only_matched,
            model_version: Some(source.model_version().to_string()),
        };
        self.apply_detect(photo, request)
    }

    fn apply_detect(
        &self,
        mut photo: Photo,
        request: DetectRequest,
    ) -> Result<DetectResponse, LifecycleError> {
        let faces = request
            .faces
            .into_iter()
            .enumerate()
            .map(|(i, face)| validate_face(i, face))
            .collect::<Result<Vec<_>, _>>()?;

        let now = Utc::now();
        let mut recognition = photo.face_recognition.take().unwrap_or_default();
        let previous = std::mem::take(&mut recognition.faces);
        let mut carried = 0usize;

        let mut observations: Vec<FaceObservation> = faces
            .into_iter()
            .enumerate()
            .map(|(i, face)| {
                let prior = previous.get(i).filter(|p| p.matched_person_id.is_some());
                let (matched_person_id, confidence, resolution) = match prior {
                    Some(p) => {
                        carried += 1;
                        (p.matched_person_id, p.confidence, p.resolution)
                    }
                    None => match face.matched {
                        Some((person, confidence)) => {
                            (Some(person), Some(confidence), Some(Resolution::Automatic))
                        }
                        None => (None, None, None),
                    },
                };
                FaceObservation {
                    descriptor: face.descriptor,
                    bounds: face.bounds,
                    landmarks: face.landmarks,
                    matched_person_id,
                    confidence,
                    resolution,
                    detected_at: now,
                }
            })
            .collect();

        if request.only_matched {
            observations.retain(|f| f.matched_person_id.is_some());
        }

        photo.add_people(observations.iter().filter_map(|f| f.matched_person_id));

        let summaries: Vec<FaceSummary> = observations
            .iter()
            .map(|f| FaceSummary {
                bounds: f.bounds,
                landmarks: f.landmarks,
            })
            .collect();

        recognition.faces = observations;
        recognition.processed_at = Some(now);
        recognition.model_version = Some(
            request
                .model_version
                .unwrap_or_else(|| self.settings.model_version.clone()),
        );
        photo.face_recognition = Some(recognition);

        self.store.commit(&photo, None)?;

        tracing::info!(
            photo_id = %photo.id,
            faces = summaries.len(),
            carried,
            only_matched = request.only_matched,
            "detect: faces stored"
        );

        Ok(DetectResponse {
            photo_id: photo.id,
            faces_detected: summaries.len(),
            faces: summaries,
        })
    }

    /// Match every face on the photo against all people with a descriptor.
    ///
    /// The result is authoritative: faces without a match are cleared.
    pub fn match_photo(
        &self,
        photo_id: &str,
        threshold: Option<f64>,
    ) -> Result<MatchResponse, LifecycleError> {
        let id = parse_id("photo id", photo_id)?;
        let threshold = validate_threshold(threshold.unwrap_or(self.settings.default_threshold))?;
        let mut photo = self.load_photo(id)?;

        if !photo.faces().iter().any(|f| f.descriptor.is_some()) {
            return Err(LifecycleError::NoFacesDetected(id));
        }

        let people = self.store.people_with_descriptors()?;
        let results = match_faces(&self.matcher, photo.faces(), &people, threshold);

        let now = Utc::now();
        if let Some(recognition) = photo.face_recognition.as_mut() {
            for (face, result) in recognition.faces.iter_mut().zip(&results) {
                let had_match = face.matched_person_id.is_some();
                face.matched_person_id = result.person_id;
                face.confidence = result.confidence;
                face.resolution = match (result.person_id, had_match) {
                    (Some(_), _) => Some(Resolution::Automatic),
                    (None, true) => Some(Resolution::Unassigned),
                    (None, false) => face.resolution,
                };
            }
            recognition.matched_at = Some(now);
        }

        photo.add_people(results.iter().filter_map(|r| r.person_id));
        self.store.commit(&photo, None)?;

        tracing::info!(
            photo_id = %id,
            faces = results.len(),
            matched = results.iter().filter(|r| r.person_id.is_some()).count(),
            candidates = people.len(),
            threshold,
            "match: faces matched"
        );

        Ok(MatchResponse { matches: results })
    }

    /// Manually assign face `face_index` to a person, or clear it with `None`.
    ///
    /// Assigning to a person without a stored descriptor copies the face's
    /// descriptor onto that person, in the same commit.
    pub fn assign(
        &self,
        photo_id: &str,
        face_index: i64,
        person_id: Option<&str>,
    ) -> Result<AssignResponse, LifecycleError> {
        let id = parse_id("photo id", photo_id)?;
        let person_id = person_id
            .map(|p| parse_id("person id", p))
            .transpose()?;
        let mut photo = self.load_photo(id)?;

        let len = photo.faces().len();
        let out_of_range = LifecycleError::InvalidFaceIndex {
            index: face_index,
            len,
        };
        let Some(index) = usize::try_from(face_index).ok().filter(|&i| i < len) else {
            return Err(out_of_range);
        };

        let person = match person_id {
            Some(pid) => Some(
                self.store
                    .person(&pid)?
                    .ok_or(LifecycleError::PersonNotFound(pid))?,
            ),
            None => None,
        };

        let Some(face) = photo
            .face_recognition
            .as_mut()
            .and_then(|fr| fr.faces.get_mut(index))
        else {
            return Err(out_of_range);
        };

        let face_descriptor = match &person {
            Some(p) => {
                face.matched_person_id = Some(p.id);
                face.confidence = Some(1.0);
                face.resolution = Some(Resolution::Manual);
                face.canonical_descriptor()
            }
            None => {
                face.matched_person_id = None;
                face.confidence = None;
                face.resolution = Some(Resolution::Unassigned);
                None
            }
        };

        let backfilled = match (person, face_descriptor) {
            (Some(mut p), Some(descriptor)) if !p.has_descriptor() => {
                p.set_descriptor(&descriptor, Utc::now());
                Some(p)
            }
            _ => None,
        };

        if let Some(pid) = person_id {
            photo.add_people([pid]);
        }

        self.store.commit(&photo, backfilled.as_ref())?;

        tracing::info!(
            photo_id = %id,
            face_index = index,
            person_id = ?person_id.map(|p| p.to_string()),
            backfilled = backfilled.is_some(),
            "assign: face updated"
        );

        Ok(AssignResponse {
            face_index: index,
            person_id,
        })
    }

    /// Stored face records for a photo, without descriptors.
    pub fn faces(&self, photo_id: &str) -> Result<FacesResponse, LifecycleError> {
        let id = parse_id("photo id", photo_id)?;
        let photo = self.load_photo(id)?;
        let recognition = photo.face_recognition.clone().unwrap_or_default();

        let faces = recognition
            .faces
            .iter()
            .enumerate()
            .map(|(face_index, f)| FaceView {
                face_index,
                bounds: f.bounds,
                landmarks: f.landmarks,
                matched_person_id: f.matched_person_id,
                confidence: f.confidence,
                state: f.state(),
                has_descriptor: f.descriptor.is_some(),
                detected_at: f.detected_at,
            })
            .collect();

        Ok(FacesResponse {
            photo_id: id,
            people: photo.people,
            processed_at: recognition.processed_at,
            matched_at: recognition.matched_at,
            model_version: recognition.model_version,
            faces,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::DESCRIPTOR_LEN;
    use crate::store::MemoryStore;
    use crate::types::{Person, PersonFaceRecognition};
    use serde_json::json;

    fn service() -> FaceService<MemoryStore> {
        FaceService::new(MemoryStore::new(), ServiceSettings::default())
    }

    fn add_photo(svc: &FaceService<MemoryStore>) -> RecordId {
        let photo = Photo::new(RecordId::new());
        let id = photo.id;
        svc.store().insert_photo(photo);
        id
    }

    fn add_person(svc: &FaceService<MemoryStore>, descriptor: Option<f64>) -> RecordId {
        let mut person = Person::new(RecordId::new());
        if let Some(v) = descriptor {
            person.face_recognition = Some(PersonFaceRecognition {
                descriptor: Some(json!(vec![v; DESCRIPTOR_LEN])),
                ..Default::default()
            });
        }
        let id = person.id;
        svc.store().insert_person(person);
        id
    }

    fn input(value: f64) -> FaceInput {
        FaceInput {
            descriptor: Some(vec![value; DESCRIPTOR_LEN]),
            bounds: FaceBox {
                x: 10.0,
                y: 20.0,
                width: 30.0,
                height: 40.0,
            },
            landmarks: None,
            matched_person_id: None,
            confidence: None,
        }
    }

    fn detect(svc: &FaceService<MemoryStore>, photo: RecordId, faces: Vec<FaceInput>) {
        let request = DetectRequest {
            faces,
            ..Default::default()
        };
        svc.detect(&photo.to_string(), request).unwrap();
    }

    fn stored(svc: &FaceService<MemoryStore>, photo: RecordId) -> Photo {
        svc.store().photo(&photo).unwrap().unwrap()
    }

    #[test]
    fn test_detect_stores_faces_and_omits_descriptors() {
        let svc = service();
        let photo = add_photo(&svc);

        let request = DetectRequest {
            faces: vec![input(0.1), input(0.2)],
            ..Default::default()
        };
        let response = svc.detect(&photo.to_string(), request).unwrap();

        assert_eq!(response.faces_detected, 2);
        let wire = serde_json::to_value(&response).unwrap();
        assert_eq!(wire["facesDetected"], 2);
        assert_eq!(wire["faces"][0]["box"]["height"], 40.0);
        assert!(wire["faces"][0].get("descriptor").is_none());

        let p = stored(&svc, photo);
        let fr = p.face_recognition.unwrap();
        assert_eq!(fr.faces.len(), 2);
        assert_eq!(fr.model_version.as_deref(), Some("unknown"));
        assert!(fr.processed_at.is_some());
        assert!(fr.faces.iter().all(|f| f.state() == FaceState::Detected));
    }

    #[test]
    fn test_id_errors_are_distinct() {
        let svc = service();
        let missing = svc.detect("", DetectRequest::default()).unwrap_err();
        let malformed = svc.detect("abc123", DetectRequest::default()).unwrap_err();
        let unknown = svc
            .detect(&RecordId::new().to_string(), DetectRequest::default())
            .unwrap_err();

        assert!(matches!(missing, LifecycleError::Missing(_)));
        assert!(matches!(malformed, LifecycleError::MalformedId { .. }));
        assert_eq!(malformed.kind(), ErrorKind::Validation);
        assert!(matches!(unknown, LifecycleError::PhotoNotFound(_)));
        assert_eq!(unknown.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_redetect_carries_match_forward() {
        let svc = service();
        let photo = add_photo(&svc);
        let p1 = add_person(&svc, Some(0.1));

        detect(&svc, photo, vec![input(0.1)]);
        svc.match_photo(&photo.to_string(), None).unwrap();
        assert_eq!(stored(&svc, photo).faces()[0].matched_person_id, Some(p1));

        detect(&svc, photo, vec![input(0.9)]);
        let p = stored(&svc, photo);
        let face = &p.faces()[0];
        assert_eq!(face.matched_person_id, Some(p1));
        assert_eq!(face.confidence, Some(1.0));
        assert_eq!(face.descriptor, Some(vec![0.9; DESCRIPTOR_LEN]));
    }

    #[test]
    fn test_redetect_uses_input_match_when_no_prior() {
        let svc = service();
        let photo = add_photo(&svc);
        let p1 = RecordId::new();

        let mut face = input(0.1);
        face.matched_person_id = Some(p1.to_string());
        face.confidence = Some(0.8);
        detect(&svc, photo, vec![input(0.3), face]);

        let p = stored(&svc, photo);
        assert_eq!(p.faces()[0].matched_person_id, None);
        assert_eq!(p.faces()[1].matched_person_id, Some(p1));
        assert_eq!(p.faces()[1].confidence, Some(0.8));
        assert_eq!(p.people, vec![p1]);
    }

    #[test]
    fn test_detect_only_matched() {
        let svc = service();
        let photo = add_photo(&svc);
        let p1 = RecordId::new();

        let mut matched = input(0.2);
        matched.matched_person_id = Some(p1.to_string());
        matched.confidence = Some(0.7);
        let request = DetectRequest {
            faces: vec![input(0.1), matched, input(0.3)],
            only_matched: true,
            model_version: Some("v2".into()),
        };
        let response = svc.detect(&photo.to_string(), request).unwrap();

        assert_eq!(response.faces_detected, 1);
        let p = stored(&svc, photo);
        assert_eq!(p.faces().len(), 1);
        assert_eq!(p.faces()[0].matched_person_id, Some(p1));
        assert_eq!(
            p.face_recognition.unwrap().model_version.as_deref(),
            Some("v2")
        );
    }

    #[test]
    fn test_detect_never_removes_people() {
        let svc = service();
        let mut photo = Photo::new(RecordId::new());
        let tagged = RecordId::new();
        photo.people.push(tagged);
        let id = photo.id;
        svc.store().insert_photo(photo);

        detect(&svc, id, vec![]);
        assert_eq!(stored(&svc, id).people, vec![tagged]);
    }

    #[test]
    fn test_detect_rejects_half_match_and_bad_box() {
        let svc = service();
        let photo = add_photo(&svc);

        let mut half = input(0.1);
        half.matched_person_id = Some(RecordId::new().to_string());
        let request = DetectRequest {
            faces: vec![half],
            ..Default::default()
        };
        let err = svc.detect(&photo.to_string(), request).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let mut bad = input(0.1);
        bad.bounds.width = -1.0;
        let request = DetectRequest {
            faces: vec![bad],
            ..Default::default()
        };
        let err = svc.detect(&photo.to_string(), request).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        assert_eq!(svc.store().commit_count(), 0);
    }

    #[test]
    fn test_detect_request_from_json() {
        let err = DetectRequest::from_json(r#"{"box": {}}"#, false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let mut descriptor: Vec<serde_json::Value> = vec![json!(0.5); DESCRIPTOR_LEN];
        descriptor[0] = json!("0.25");
        let faces = json!([
            {"descriptor": descriptor, "box": {"x": 1, "y": 2, "width": 3, "height": 4}},
            {"box": {"x": 1, "y": 2, "width": 3, "height": 4},
             "landmarks": {
                "leftEye": {"x": 1, "y": 1}, "rightEye": {"x": 2, "y": 1},
                "nose": {"x": 1.5, "y": 2}, "mouth": {"x": 1.5, "y": 3}
             }}
        ]);
        let request = DetectRequest::from_json(&faces.to_string(), true).unwrap();
        assert!(request.only_matched);
        assert_eq!(request.faces.len(), 2);
        let first = request.faces[0].descriptor.as_ref().unwrap();
        assert_eq!(first.len(), DESCRIPTOR_LEN);
        assert_eq!(first[0], 0.25);
        assert!(request.faces[1].descriptor.is_none());
        assert!(request.faces[1].landmarks.is_some());
    }

    #[test]
    fn test_match_requires_faces_with_descriptors() {
        let svc = service();
        let photo = add_photo(&svc);
        let err = svc.match_photo(&photo.to_string(), None).unwrap_err();
        assert!(matches!(err, LifecycleError::NoFacesDetected(_)));
        assert_eq!(err.kind(), ErrorKind::Precondition);

        let mut no_descriptor = input(0.1);
        no_descriptor.descriptor = None;
        detect(&svc, photo, vec![no_descriptor]);
        let err = svc.match_photo(&photo.to_string(), None).unwrap_err();
        assert!(matches!(err, LifecycleError::NoFacesDetected(_)));
    }

    #[test]
    fn test_match_assigns_and_unions_people() {
        let svc = service();
        let photo = add_photo(&svc);
        let alice = add_person(&svc, Some(0.1));
        let _nobody = add_person(&svc, None);
        let bob = add_person(&svc, Some(0.5));

        let mut short = input(0.5);
        short.descriptor = Some(vec![0.5; 64]);
        detect(&svc, photo, vec![input(0.5), short, input(0.1)]);

        let response = svc.match_photo(&photo.to_string(), Some(0.6)).unwrap();
        let persons: Vec<_> = response.matches.iter().map(|m| m.person_id).collect();
        assert_eq!(persons, vec![Some(bob), None, Some(alice)]);

        let p = stored(&svc, photo);
        assert_eq!(p.people, vec![bob, alice]);
        assert_eq!(p.faces()[0].state(), FaceState::Matched);
        assert_eq!(p.faces()[1].state(), FaceState::Detected);
        assert!(p.face_recognition.unwrap().matched_at.is_some());
    }

    #[test]
    fn test_match_overwrites_to_null_but_keeps_people() {
        let svc = service();
        let photo = add_photo(&svc);
        let manual = add_person(&svc, Some(0.9));

        detect(&svc, photo, vec![input(0.1)]);
        svc.assign(&photo.to_string(), 0, Some(&manual.to_string())).unwrap();

        let response = svc.match_photo(&photo.to_string(), None).unwrap();
        assert_eq!(response.matches[0].person_id, None);

        let p = stored(&svc, photo);
        assert_eq!(p.faces()[0].matched_person_id, None);
        assert_eq!(p.faces()[0].confidence, None);
        assert_eq!(p.faces()[0].state(), FaceState::Unassigned);
        assert_eq!(p.people, vec![manual]);
    }

    #[test]
    fn test_match_rejects_bad_threshold() {
        let svc = service();
        let photo = add_photo(&svc);
        detect(&svc, photo, vec![input(0.1)]);
        for t in [0.0, -0.5, f64::NAN, f64::INFINITY, 2.5] {
            let err = svc.match_photo(&photo.to_string(), Some(t)).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation, "threshold {t}");
        }
    }

    #[test]
    fn test_assign_clear_keeps_person_reference() {
        let svc = service();
        let photo = add_photo(&svc);
        let p1 = add_person(&svc, None);
        detect(&svc, photo, vec![input(0.1)]);

        svc.assign(&photo.to_string(), 0, Some(&p1.to_string())).unwrap();
        let p = stored(&svc, photo);
        let face = &p.faces()[0];
        assert_eq!(face.confidence, Some(1.0));
        assert_eq!(face.state(), FaceState::Assigned);

        let response = svc.assign(&photo.to_string(), 0, None).unwrap();
        assert_eq!(response.face_index, 0);
        assert_eq!(response.person_id, None);

        let p = stored(&svc, photo);
        assert_eq!(p.faces()[0].matched_person_id, None);
        assert_eq!(p.faces()[0].confidence, None);
        assert_eq!(p.faces()[0].state(), FaceState::Unassigned);
        assert_eq!(p.people, vec![p1]);
    }

    #[test]
    fn test_assign_backfills_descriptor_once() {
        let svc = service();
        let photo = add_photo(&svc);
        let p1 = add_person(&svc, None);
        detect(&svc, photo, vec![input(0.1), input(0.7)]);

        svc.assign(&photo.to_string(), 0, Some(&p1.to_string())).unwrap();
        let person = svc.store().person(&p1).unwrap().unwrap();
        assert_eq!(person.descriptor().unwrap().as_slice(), &[0.1; DESCRIPTOR_LEN][..]);

        svc.assign(&photo.to_string(), 1, Some(&p1.to_string())).unwrap();
        let person = svc.store().person(&p1).unwrap().unwrap();
        assert_eq!(person.descriptor().unwrap().as_slice(), &[0.1; DESCRIPTOR_LEN][..]);
    }

    #[test]
    fn test_assign_does_not_backfill_from_malformed_face() {
        let svc = service();
        let photo = add_photo(&svc);
        let p1 = add_person(&svc, None);
        let mut short = input(0.1);
        short.descriptor = Some(vec![0.1; 3]);
        detect(&svc, photo, vec![short]);

        svc.assign(&photo.to_string(), 0, Some(&p1.to_string())).unwrap();
        let person = svc.store().person(&p1).unwrap().unwrap();
        assert!(!person.has_descriptor());
    }

    #[test]
    fn test_assign_out_of_range_writes_nothing() {
        let svc = service();
        let photo = add_photo(&svc);
        let p1 = add_person(&svc, None);
        detect(&svc, photo, vec![input(0.1), input(0.2), input(0.3)]);
        let commits = svc.store().commit_count();
        let before = stored(&svc, photo);

        for index in [5, 3, -1] {
            let err = svc
                .assign(&photo.to_string(), index, Some(&p1.to_string()))
                .unwrap_err();
            assert!(matches!(err, LifecycleError::InvalidFaceIndex { len: 3, .. }));
        }
        assert_eq!(svc.store().commit_count(), commits);
        assert_eq!(stored(&svc, photo), before);
    }

    #[test]
    fn test_assign_unknown_person() {
        let svc = service();
        let photo = add_photo(&svc);
        detect(&svc, photo, vec![input(0.1)]);
        let commits = svc.store().commit_count();

        let err = svc
            .assign(&photo.to_string(), 0, Some(&RecordId::new().to_string()))
            .unwrap_err();
        assert!(matches!(err, LifecycleError::PersonNotFound(_)));

        let err = svc.assign(&photo.to_string(), 0, Some("nope")).unwrap_err();
        assert!(matches!(err, LifecycleError::MalformedId { .. }));
        assert_eq!(svc.store().commit_count(), commits);
    }

    struct FixedSource(Result<Vec<FaceInput>, &'static str>);

    impl DescriptorSource for FixedSource {
        fn model_version(&self) -> &str {
            "fixed-1"
        }

        fn observe(&mut self, _image: &[u8]) -> Result<Vec<FaceInput>, SourceError> {
            self.0
                .clone()
                .map_err(|e| SourceError::Unavailable(e.to_string()))
        }
    }

    #[test]
    fn test_detect_image_uses_source() {
        let svc = service();
        let photo = add_photo(&svc);
        let mut source = FixedSource(Ok(vec![input(0.4)]));

        let response = svc
            .detect_image(&photo.to_string(), b"jpeg", &mut source, false)
            .unwrap();
        assert_eq!(response.faces_detected, 1);
        let fr = stored(&svc, photo).face_recognition.unwrap();
        assert_eq!(fr.model_version.as_deref(), Some("fixed-1"));
    }

    #[test]
    fn test_detect_image_source_failure_writes_nothing() {
        let svc = service();
        let photo = add_photo(&svc);
        let mut source = FixedSource(Err("models missing"));

        let err = svc
            .detect_image(&photo.to_string(), b"jpeg", &mut source, false)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Upstream);
        assert_eq!(svc.store().commit_count(), 0);
    }

    #[test]
    fn test_faces_view() {
        let svc = service();
        let photo = add_photo(&svc);
        let p1 = add_person(&svc, None);
        let mut blank = input(0.0);
        blank.descriptor = None;
        detect(&svc, photo, vec![input(0.1), blank]);
        svc.assign(&photo.to_string(), 0, Some(&p1.to_string())).unwrap();

        let view = svc.faces(&photo.to_string()).unwrap();
        assert_eq!(view.faces.len(), 2);
        assert_eq!(view.faces[0].state, FaceState::Assigned);
        assert!(view.faces[0].has_descriptor);
        assert!(!view.faces[1].has_descriptor);
        assert_eq!(view.people, vec![p1]);

        let wire = serde_json::to_value(&view).unwrap();
        assert_eq!(wire["faces"][0]["state"], "assigned");
        assert!(wire["faces"][0].get("descriptor").is_none());
    }

    #[test]
    fn test_foreign_fields_survive_detect() {
        let svc = service();
        let mut photo = Photo::new(RecordId::new());
        photo.extra.insert("title".into(), json!({"en": "Lake"}));
        let id = photo.id;
        svc.store().insert_photo(photo);

        detect(&svc, id, vec![input(0.1)]);
        assert_eq!(stored(&svc, id).extra["title"], json!({"en": "Lake"}));
    }
}
