//! Built-in inputs and outputs.

mod drop;
mod generate;

pub use drop::DropOutput;
pub use generate::GenerateInput;
