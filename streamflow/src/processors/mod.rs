//! Built-in processors and the helpers that attach processors to inputs
//! and outputs.

mod noop;
mod pipeline;
mod retry;

pub use noop::NoopProcessor;
pub use pipeline::{attach_input, attach_output, execute_all, ProcessedInput, ProcessedOutput};
pub use retry::RetryProcessor;
