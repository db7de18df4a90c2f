//! Error types for the bridge data model

use thiserror::Error;

use crate::{NodeId, ProtocolId};

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types
#[derive(Error, Debug)]
pub enum Error {
    /// Reading or writing a configuration file failed
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration text is not valid TOML for the snapshot layout
    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Snapshot could not be rendered as TOML
    #[error("config serialize error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    /// Snapshot violates a structural rule
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("unknown node: {0}")]
    UnknownNode(NodeId),

    #[error("unknown protocol: {0}")]
    UnknownProtocol(ProtocolId),

    /// A node must keep at least one protocol per role
    #[error("node {node} must keep at least one role {role} protocol")]
    LastProtocolInRole { node: NodeId, role: char },

    #[error("unknown protocol type: {0}")]
    UnknownProtocolType(String),

    #[error("unknown object handling mode: {0}")]
    UnknownHandlingMode(String),
}
