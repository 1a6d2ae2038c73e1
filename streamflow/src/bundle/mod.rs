//! Component registries and the environments that group them.

mod builtins;
mod environment;

pub use environment::{
    constructor, validate_name, ComponentSet, Constructor, Environment, NAME_PATTERN,
};
