//! facematch-core — Face recognition matching for a photo library.
//!
//! Normalizes face descriptors, matches them against people by Euclidean
//! distance, and maintains the per-photo face records across detect, match
//! and manual assignment passes.

pub mod descriptor;
pub mod lifecycle;
pub mod matcher;
pub mod source;
pub mod store;
pub mod types;

pub use descriptor::{Descriptor, RawDescriptor, DESCRIPTOR_LEN};
pub use lifecycle::{
    AssignResponse, DetectRequest, DetectResponse, ErrorKind, FaceInput, FaceService,
    FaceSummary, FaceView, FacesResponse, LifecycleError, MatchResponse, ServiceSettings,
    DEFAULT_MATCH_THRESHOLD,
};
pub use matcher::{Candidate, EuclideanMatcher, FaceMatch, FaceMatchResult, Matcher};
pub use source::{DescriptorSource, SourceError};
pub use store::{FaceStore, MemoryStore, StoreError};
pub use types::{
    FaceBox, FaceObservation, FaceRecognition, FaceState, Landmarks, Person,
    PersonFaceRecognition, Photo, Point, RecordId, Resolution,
};
