//! Euclidean nearest-person matching.

use crate::descriptor::Descriptor;
use crate::types::{FaceObservation, Person, RecordId};
use serde::Serialize;

/// A person's canonical descriptor, as a comparison target.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub person_id: RecordId,
    pub descriptor: Descriptor,
}

impl Candidate {
    /// Build the candidate pool from `people`, skipping anyone without a
    /// usable descriptor. Each person contributes at most once.
    pub fn pool(people: &[Person]) -> Vec<Candidate> {
        let mut pool: Vec<Candidate> = Vec::with_capacity(people.len());
        for person in people {
            if pool.iter().any(|c| c.person_id == person.id) {
                continue;
            }
            match person.descriptor() {
                Some(descriptor) => pool.push(Candidate {
                    person_id: person.id,
                    descriptor,
                }),
                None => {
                    tracing::debug!(person_id = %person.id, "person has no usable descriptor; skipped")
                }
            }
        }
        pool
    }
}

/// Best qualifying candidate for one descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceMatch {
    pub person_id: RecordId,
    pub distance: f64,
    /// `1 - distance`. A similarity proxy; negative for far-apart descriptors.
    pub confidence: f64,
}

/// Per-face outcome of a batch match.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceMatchResult {
    pub face_index: usize,
    pub person_id: Option<RecordId>,
    pub confidence: Option<f64>,
}

/// Strategy for picking the person a face descriptor belongs to.
pub trait Matcher {
    fn best_match(
        &self,
        probe: &Descriptor,
        candidates: &[Candidate],
        threshold: f64,
    ) -> Option<FaceMatch>;
}

/// Nearest candidate by Euclidean distance.
///
/// A candidate qualifies when `distance < threshold`. Among qualifying
/// candidates the smallest distance wins; on ties the earliest candidate
/// in the pool is kept.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn best_match(
        &self,
        probe: &Descriptor,
        candidates: &[Candidate],
        threshold: f64,
    ) -> Option<FaceMatch> {
        let mut best: Option<(usize, f64)> = None;

        for (i, candidate) in candidates.iter().enumerate() {
            let distance = probe.distance(&candidate.descriptor);
            if distance.is_nan() || distance >= threshold {
                continue;
            }
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((i, distance));
            }
        }

        best.map(|(i, distance)| FaceMatch {
            person_id: candidates[i].person_id,
            distance,
            confidence: 1.0 - distance,
        })
    }
}

/// Match every face against `people`, one result per face in input order.
///
/// Faces whose descriptor is missing or does not normalize get a null
/// result; they never abort the batch.
pub fn match_faces<M: Matcher + ?Sized>(
    matcher: &M,
    faces: &[FaceObservation],
    people: &[Person],
    threshold: f64,
) -> Vec<FaceMatchResult> {
    let pool = Candidate::pool(people);

    faces
        .iter()
        .enumerate()
        .map(|(face_index, face)| {
            let found = match face.canonical_descriptor() {
                Some(probe) => matcher.best_match(&probe, &pool, threshold),
                None => {
                    if face.descriptor.is_some() {
                        tracing::warn!(face_index, "face descriptor is malformed; not matched");
                    }
                    None
                }
            };
            FaceMatchResult {
                face_index,
                person_id: found.as_ref().map(|m| m.person_id),
                confidence: found.as_ref().map(|m| m.confidence),
            }
        })
        .collect()
}
