#![forbid(unsafe_code)]

//! Shared foundations for the Stromsborg streaming XML security engine.
//!
//! Everything the other crates agree on lives here: the error taxonomy,
//! algorithm and namespace URIs, and the `SecurityProperties` configuration.

pub mod algorithm;
pub mod config;
pub mod error;
pub mod ns;

pub use config::{ConfigError, SecurityProperties};
pub use error::{Error, Result};
