//! Cooperative shutdown signalling for long-running component loops.

mod token;

pub use token::CancellationToken;
