//! Credential rotation protocol.
//!
//! # Module Structure
//! - `connection_string`: DB2 keyword string building, parsing and redaction
//! - `request`: The validated [`RotationRequest`]
//! - `engine`: [`RotationEngine`], the change-then-verify protocol

pub mod connection_string;
pub mod engine;
pub mod request;

pub use engine::{DEFAULT_PROBE_STATEMENT, RotationEngine, RotationOptions};
pub use request::RotationRequest;
