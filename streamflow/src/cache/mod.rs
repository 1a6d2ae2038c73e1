//! Cache resources and the functions that reach them by label.

mod functions;
mod memory;

pub use functions::{CacheCall, CacheFunction};
pub use memory::MemoryCache;
