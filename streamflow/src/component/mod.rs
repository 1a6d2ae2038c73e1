//! Component kinds and the capability traits every kind implements.
//!
//! Decorators implement the same traits as the components they wrap, so a
//! pipeline runner never needs to know whether a component was wrapped.

mod config;
mod spec;

pub use config::ComponentConfig;
pub use spec::{parse_fields, ComponentSpec, FieldKind, FieldSpec, ParsedConfig, Status};

use crate::errors::StreamflowError;
use crate::message::{Batch, Part, Transaction};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;

/// The pluggable component kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    /// Produces transactions.
    Input,
    /// Consumes batches.
    Output,
    /// Transforms batches.
    Processor,
    /// Keyed byte store.
    Cache,
    /// Throughput limiter.
    RateLimit,
    /// Shared backoff state machine.
    Retry,
}

impl ComponentKind {
    /// Returns the snake case name of the kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
            Self::Processor => "processor",
            Self::Cache => "cache",
            Self::RateLimit => "rate_limit",
            Self::Retry => "retry",
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A source of transactions.
#[async_trait]
pub trait Input: Send + Sync {
    /// Establishes the connection to the source.
    async fn connect(&self) -> Result<(), StreamflowError> {
        Ok(())
    }

    /// Takes the receiving end of the transaction channel.
    ///
    /// Returns `None` once the channel has been taken. The channel closes
    /// when the input has nothing more to deliver.
    fn take_transactions(&self) -> Option<mpsc::Receiver<Transaction>>;

    /// Signals the input to stop delivering. Safe to call repeatedly.
    fn trigger_close(&self);

    /// Stops the input and waits for it to wind down.
    async fn close(&self) -> Result<(), StreamflowError>;
}

/// A sink for batches.
#[async_trait]
pub trait Output: Send + Sync {
    /// Establishes the connection to the sink.
    async fn connect(&self) -> Result<(), StreamflowError> {
        Ok(())
    }

    /// Writes a batch.
    async fn write_batch(&self, batch: &Batch) -> Result<(), StreamflowError>;

    /// Releases the sink.
    async fn close(&self) -> Result<(), StreamflowError>;
}

/// Transforms a batch into zero or more batches.
///
/// Individual messages may fail without failing the call: such messages
/// carry an error marker (see [`Part::error`]).
#[async_trait]
pub trait Processor: Send + Sync {
    /// Processes a batch.
    async fn process_batch(&self, batch: Batch) -> Result<Vec<Batch>, StreamflowError>;

    /// Releases the processor.
    async fn close(&self) -> Result<(), StreamflowError>;
}

/// A shared backoff state machine.
#[async_trait]
pub trait Retry: Send + Sync {
    /// Returns how long the caller should wait before proceeding.
    ///
    /// A zero duration means no backoff is due. An error means the resource
    /// could not be consulted, which is not the same thing.
    async fn access(&self) -> Result<Duration, StreamflowError>;

    /// Starts a fresh escalation sequence.
    async fn trigger_backoff(&self) -> Result<(), StreamflowError>;

    /// Returns the resource to its idle state.
    async fn reset(&self) -> Result<(), StreamflowError>;

    /// Releases the resource.
    async fn close(&self) -> Result<(), StreamflowError>;

    /// Returns true if an escalation never ends on its own.
    fn is_unbounded(&self) -> bool {
        false
    }
}

/// A keyed byte store.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Returns the value stored under `key`.
    async fn get(&self, key: &str) -> Result<Vec<u8>, StreamflowError>;

    /// Stores `value` under `key`, overwriting any existing value.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>)
        -> Result<(), StreamflowError>;

    /// Stores `value` under `key`, failing if the key already exists.
    async fn add(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>)
        -> Result<(), StreamflowError>;

    /// Removes `key`.
    async fn delete(&self, key: &str) -> Result<(), StreamflowError>;

    /// Releases the cache.
    async fn close(&self) -> Result<(), StreamflowError> {
        Ok(())
    }
}

/// Limits throughput across one or more components.
#[async_trait]
pub trait RateLimit: Send + Sync {
    /// Returns how long the caller should wait before proceeding.
    async fn access(&self) -> Result<Duration, StreamflowError>;

    /// Accounts for the size of `parts`. Returns true if the limit is now exceeded.
    async fn add(&self, parts: &[Part]) -> bool;

    /// Releases the rate limit.
    async fn close(&self) -> Result<(), StreamflowError> {
        Ok(())
    }
}
