//! Shared utilities.

pub mod serde;
pub mod telemetry;

pub use serde::*;
pub use telemetry::*;
