//! Messages, batches and transactions.
//!
//! The core never inspects payloads. It only needs a batch to be an ordered
//! collection of parts, each of which may carry an error marker left by an
//! earlier processing step.

mod batch_error;
mod transaction;

pub use batch_error::BatchError;
pub use transaction::{AckReceiver, AckResult, AckSender, Transaction};

use std::collections::BTreeMap;
use std::sync::Arc;

/// A message-level error marker.
///
/// Shared so that parts stay cheap to clone.
pub type MessageError = Arc<anyhow::Error>;

/// A single message.
#[derive(Debug, Clone, Default)]
pub struct Part {
    raw: Vec<u8>,
    metadata: BTreeMap<String, String>,
    error: Option<MessageError>,
}

impl Part {
    /// Creates a new part from raw bytes.
    #[must_use]
    pub fn new(raw: impl Into<Vec<u8>>) -> Self {
        Self {
            raw: raw.into(),
            metadata: BTreeMap::new(),
            error: None,
        }
    }

    /// Returns the raw payload.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// Replaces the raw payload.
    pub fn set_bytes(&mut self, raw: impl Into<Vec<u8>>) {
        self.raw = raw.into();
    }

    /// Returns a metadata value.
    #[must_use]
    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    /// Sets a metadata value.
    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }

    /// Returns the error marker, if any.
    #[must_use]
    pub fn error(&self) -> Option<&MessageError> {
        self.error.as_ref()
    }

    /// Marks the part as failed.
    pub fn set_error(&mut self, err: impl Into<anyhow::Error>) {
        self.error = Some(Arc::new(err.into()));
    }

    /// Removes and returns the error marker.
    pub fn take_error(&mut self) -> Option<MessageError> {
        self.error.take()
    }

    /// Clears the error marker.
    pub fn clear_error(&mut self) {
        self.error = None;
    }

    /// Returns a copy of this part carrying the given error marker.
    #[must_use]
    pub fn with_error(mut self, err: impl Into<anyhow::Error>) -> Self {
        self.set_error(err);
        self
    }
}

/// An ordered collection of parts processed as a unit.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    parts: Vec<Part>,
}

impl Batch {
    /// Creates a batch from parts.
    #[must_use]
    pub fn new(parts: Vec<Part>) -> Self {
        Self { parts }
    }

    /// Creates a batch with one part per payload.
    #[must_use]
    pub fn quick<I, B>(payloads: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Vec<u8>>,
    {
        Self {
            parts: payloads.into_iter().map(Part::new).collect(),
        }
    }

    /// Returns the number of parts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    /// Returns true if the batch has no parts.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Returns the part at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Part> {
        self.parts.get(index)
    }

    /// Returns a mutable reference to the part at `index`.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut Part> {
        self.parts.get_mut(index)
    }

    /// Iterates over the parts.
    pub fn iter(&self) -> std::slice::Iter<'_, Part> {
        self.parts.iter()
    }

    /// Iterates mutably over the parts.
    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Part> {
        self.parts.iter_mut()
    }

    /// Appends a part.
    pub fn push(&mut self, part: Part) {
        self.parts.push(part);
    }

    /// Returns true if any part carries an error marker.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.parts.iter().any(|p| p.error().is_some())
    }

    /// Returns the parts as a slice.
    #[must_use]
    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    /// Consumes the batch and returns its parts.
    #[must_use]
    pub fn into_parts(self) -> Vec<Part> {
        self.parts
    }

    /// Concatenates batches in order.
    #[must_use]
    pub fn concat(batches: Vec<Batch>) -> Self {
        Self {
            parts: batches.into_iter().flat_map(|b| b.parts).collect(),
        }
    }
}

impl From<Vec<Part>> for Batch {
    fn from(parts: Vec<Part>) -> Self {
        Self::new(parts)
    }
}

impl<'a> IntoIterator for &'a Batch {
    type Item = &'a Part;
    type IntoIter = std::slice::Iter<'a, Part>;

    fn into_iter(self) -> Self::IntoIter {
        self.parts.iter()
    }
}
