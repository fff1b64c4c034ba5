//! Face descriptor normalization.
//!
//! Descriptors arrive as plain float arrays, packed `f32` blobs, or loosely
//! typed JSON written by other parts of the library. Every shape is coerced
//! into one canonical, fixed-length [`Descriptor`] before it is compared.

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::BTreeMap;

/// Length of a canonical face descriptor.
pub const DESCRIPTOR_LEN: usize = 128;

/// A descriptor in one of the representations found in stored records or
/// detector output.
#[derive(Debug, Clone, Copy)]
pub enum RawDescriptor<'a> {
    /// Ordered `f64` values.
    Floats(&'a [f64]),
    /// Typed `f32` buffer, as produced by the detector.
    Buffer(&'a [f32]),
    /// Little-endian packed `f32` values.
    Bytes(&'a [u8]),
    /// Arbitrary JSON: an array, or an object keyed `"0"`, `"1"`, ...
    Json(&'a Value),
}

impl RawDescriptor<'_> {
    /// Coerce into a flat `f64` vector without checking its length.
    ///
    /// Elements that are not numbers (or numeric strings) become `0.0`.
    /// Returns `None` only when the shape itself is not a sequence.
    pub fn coerce(&self) -> Option<Vec<f64>> {
        match *self {
            RawDescriptor::Floats(values) => Some(values.to_vec()),
            RawDescriptor::Buffer(values) => Some(values.iter().map(|&v| f64::from(v)).collect()),
            RawDescriptor::Bytes(bytes) => {
                if bytes.len() % 4 != 0 {
                    return None;
                }
                Some(
                    bytes
                        .chunks_exact(4)
                        .map(|c| f64::from(f32::from_le_bytes([c[0], c[1], c[2], c[3]])))
                        .collect(),
                )
            }
            RawDescriptor::Json(value) => coerce_json(value),
        }
    }
}

fn coerce_json(value: &Value) -> Option<Vec<f64>> {
    match value {
        Value::Array(items) => Some(items.iter().map(coerce_element).collect()),
        // A typed array that went through JSON.stringify: {"0": .., "1": .., ...}
        Value::Object(map) => {
            let mut indexed = BTreeMap::new();
            for (key, item) in map {
                let index: usize = key.parse().ok()?;
                indexed.insert(index, item);
            }
            let contiguous = indexed.keys().enumerate().all(|(pos, &index)| pos == index);
            if !contiguous {
                return None;
            }
            Some(indexed.values().map(|v| coerce_element(v)).collect())
        }
        _ => None,
    }
}

fn coerce_element(value: &Value) -> f64 {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    // "NaN" and "inf" parse, but cannot be written back as JSON numbers.
    parsed.filter(|v| v.is_finite()).unwrap_or(0.0)
}

/// Canonical face descriptor: exactly [`DESCRIPTOR_LEN`] `f64` values.
///
/// The fixed-size array makes a length mismatch between two descriptors
/// unrepresentable.
#[derive(Debug, Clone, PartialEq)]
pub struct Descriptor(Box<[f64; DESCRIPTOR_LEN]>);

impl Descriptor {
    /// Coerce `raw` and accept it only if it has the canonical length.
    pub fn normalize(raw: RawDescriptor<'_>) -> Option<Self> {
        let values = raw.coerce()?;
        let values: Box<[f64; DESCRIPTOR_LEN]> = values.try_into().ok()?;
        Some(Self(values))
    }

    pub fn as_slice(&self) -> &[f64] {
        self.0.as_slice()
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.0.to_vec()
    }

    /// Euclidean distance between two descriptors.
    pub fn distance(&self, other: &Descriptor) -> f64 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f64>()
            .sqrt()
    }

    /// Pack as little-endian `f32` values.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.0
            .iter()
            .flat_map(|&v| (v as f32).to_le_bytes())
            .collect()
    }
}

/// Serde helper for face descriptors, incoming or stored: accepts any JSON
/// shape and keeps whatever coerces, leaving the length check to match time.
pub(crate) fn deserialize_lenient<'de, D>(deserializer: D) -> Result<Option<Vec<f64>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| RawDescriptor::Json(&v).coerce()))
}
