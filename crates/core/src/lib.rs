//! Spacekit core utilities shared by the relay service

#[cfg(feature = "tracing")]
pub mod tracing;
pub mod validation;

pub use validation::{ValidateConfig, validators};
