//! Remote Protocol Bridge Transport
//!
//! OSC over UDP plumbing used by the protocol processors:
//! - strict OSC 1.0 decoding ([`codec`])
//! - shared, sender-aware receive ports ([`SenderAwareReceiver`])
//! - non-blocking outbound sending ([`OscSender`])

pub mod codec;
pub mod error;
pub mod receiver;
pub mod sender;

pub use codec::FormatError;
pub use error::{Result, TransportError};
pub use receiver::{
    FormatErrorHandler, ListenerId, PacketListener, ReceivedPacket, ReceiverConfig,
    SenderAwareReceiver,
};
pub use sender::OscSender;
