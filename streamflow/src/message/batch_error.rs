//! Aggregated per-message failures for a single batch.

use super::{Batch, MessageError};
use std::collections::BTreeMap;
use std::fmt;

/// Maps failed message indexes within a batch to the error each one hit.
///
/// Reported as a single failure for the whole batch. The headline error is
/// the first failure that was recorded.
#[derive(Debug, Clone)]
pub struct BatchError {
    headline: MessageError,
    batch_size: usize,
    indexed: BTreeMap<usize, MessageError>,
}

impl BatchError {
    /// Creates an aggregate for `batch` headed by `headline`.
    ///
    /// No index is marked failed until [`BatchError::failed`] is called.
    #[must_use]
    pub fn new(batch: &Batch, headline: MessageError) -> Self {
        Self {
            headline,
            batch_size: batch.len(),
            indexed: BTreeMap::new(),
        }
    }

    /// Records the failure of the message at `index`.
    pub fn failed(&mut self, index: usize, err: MessageError) -> &mut Self {
        self.indexed.insert(index, err);
        self
    }

    /// Returns the number of messages marked failed.
    #[must_use]
    pub fn indexed_errors(&self) -> usize {
        self.indexed.len()
    }

    /// Returns the size of the batch this error describes.
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Returns the error recorded for `index`.
    #[must_use]
    pub fn error_at(&self, index: usize) -> Option<&MessageError> {
        self.indexed.get(&index)
    }

    /// Returns the failed indexes in ascending order.
    #[must_use]
    pub fn failed_indexes(&self) -> Vec<usize> {
        self.indexed.keys().copied().collect()
    }

    /// Calls `f` for every failed index in ascending order.
    pub fn walk(&self, mut f: impl FnMut(usize, &MessageError)) {
        for (index, err) in &self.indexed {
            f(*index, err);
        }
    }

    /// Returns the headline error.
    #[must_use]
    pub fn headline(&self) -> &MessageError {
        &self.headline
    }
}

impl fmt::Display for BatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} messages failed: {}",
            self.indexed.len(),
            self.batch_size,
            self.headline
        )
    }
}

impl std::error::Error for BatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        let inner: &(dyn std::error::Error + Send + Sync + 'static) = self.headline.as_ref().as_ref();
        Some(inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn err(msg: &str) -> MessageError {
        Arc::new(anyhow::anyhow!(msg.to_string()))
    }

    #[test]
    fn test_batch_error_display() {
        let batch = Batch::quick(["a", "b", "c", "d"]);
        let first = err("first failure");
        let mut batch_err = BatchError::new(&batch, first.clone());
        batch_err.failed(1, first).failed(3, err("second failure"));

        assert_eq!(batch_err.indexed_errors(), 2);
        assert_eq!(batch_err.to_string(), "2 of 4 messages failed: first failure");
    }

    #[test]
    fn test_batch_error_walk_in_index_order() {
        let batch = Batch::quick(["a", "b", "c"]);
        let mut batch_err = BatchError::new(&batch, err("x"));
        batch_err.failed(2, err("two")).failed(0, err("zero"));

        let mut seen = Vec::new();
        batch_err.walk(|i, e| seen.push((i, e.to_string())));
        assert_eq!(seen, vec![(0, "zero".to_string()), (2, "two".to_string())]);
        assert_eq!(batch_err.failed_indexes(), vec![0, 2]);
        assert!(batch_err.error_at(1).is_none());
    }

    #[test]
    fn test_batch_error_source() {
        let batch = Batch::quick(["a"]);
        let batch_err = BatchError::new(&batch, err("root cause"));
        let source = std::error::Error::source(&batch_err).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("root cause"));
    }
}
