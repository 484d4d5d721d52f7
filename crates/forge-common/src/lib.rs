//! Shared domain types for the Forge job orchestrator.
//!
//! Everything that crosses a boundary (orchestrator ↔ store, orchestrator ↔
//! provider, server ↔ client, store ↔ persistence) lives here so that each of
//! those sides agrees on one serialized shape.

pub mod errors;
pub mod findings;
pub mod models;

pub use errors::{ForgeError, ForgeResult};
pub use findings::{Finding, QualityVerdict, Severity};
pub use models::*;
