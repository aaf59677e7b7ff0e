//! Shared building blocks for the signalflow workspace.
//!
//! - environment/profile driven [`Config`]
//! - the domain model shared by storage, rules and workflow crates
//! - [`JsonPath`] dot-path lookup over `serde_json::Value`
//! - canonical JSON rendering and SHA-256 content hashing

pub mod canonical;
pub mod config;
pub mod error;
pub mod model;
pub mod path;

pub use canonical::{hash_value, sha256_hex, to_canonical_json};
pub use config::Config;
pub use error::*;
pub use path::{JsonPath, PathError, PathSegment};
