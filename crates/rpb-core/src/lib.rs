//! Remote Protocol Bridge Core
//!
//! Data model shared by the bridge crates.
//!
//! This crate provides:
//! - Remote object identifiers and addressing ([`RemoteObjectIdentifier`], [`RemoteObjectAddressing`])
//! - Generic message payloads ([`RemoteObjectMessageData`])
//! - The engine configuration snapshot ([`EngineConfig`])
//! - Process-wide unique id allocation ([`next_unique_id`])

pub mod config;
pub mod error;
pub mod id;
pub mod types;

pub use config::{EngineConfig, NodeData, ObjectHandlingData, ProtocolData};
pub use error::{Error, Result};
pub use id::{current_unique_id, next_unique_id, validate_unique_id};
pub use types::*;

/// Default interval between two polls of the active objects
pub const DEFAULT_POLLING_INTERVAL_MS: u64 = 100;

/// Default precision used by the value-change filtering modes
pub const DEFAULT_PRECISION: f32 = 0.001;
