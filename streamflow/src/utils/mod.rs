//! Small parsing helpers shared by component settings.

mod duration;

pub use duration::{parse_duration, DurationError};
