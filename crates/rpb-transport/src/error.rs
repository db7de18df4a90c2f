//! Transport error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TransportError>;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("bind failed on port {port}: {source}")]
    BindFailed {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("encode failed: {0}")]
    Encode(String),

    #[error("timeout")]
    Timeout,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rosc::OscError> for TransportError {
    fn from(e: rosc::OscError) -> Self {
        TransportError::Encode(format!("{:?}", e))
    }
}
