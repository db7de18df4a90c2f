//! Bridge error types

use rpb_core::{NodeId, ProtocolId};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BridgeError>;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("send error: {0}")]
    Send(String),

    #[error("processor {0} is not running")]
    NotRunning(ProtocolId),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("unknown protocol: {0}")]
    UnknownProtocol(ProtocolId),

    #[error("nodes failed to start: {0:?}")]
    StartFailed(Vec<NodeId>),

    #[error("configuration error: {0}")]
    Config(#[from] rpb_core::Error),

    #[error("transport error: {0}")]
    Transport(#[from] rpb_transport::TransportError),
}
