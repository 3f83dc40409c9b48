//! Shared types for the multi-tenant inference gateway: configuration,
//! the error taxonomy, model descriptors, and generate request/response
//! wire shapes. Every other gateway crate depends on this one.

pub mod config;
pub mod error;
pub mod generate;
pub mod model;

pub use config::Config;
pub use error::{Error, Result};
