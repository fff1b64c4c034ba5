//! Descriptor source contract.
//!
//! The neural detector lives outside this crate. Whoever wires the service
//! constructs the source (models loaded, sessions open) and passes it in per
//! call, so its lifetime is owned by that layer.

use crate::lifecycle::FaceInput;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("descriptor source unavailable: {0}")]
    Unavailable(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
}

/// Turns an encoded image into face observations.
pub trait DescriptorSource {
    /// Version tag recorded on photos processed by this source.
    fn model_version(&self) -> &str;

    /// Detect faces in `image`. Faces are returned in a stable visual order
    /// so that positions line up across repeated runs.
    fn observe(&mut self, image: &[u8]) -> Result<Vec<FaceInput>, SourceError>;
}
