//! Remote Protocol Bridge
//!
//! Forwards remote object updates between protocol endpoints:
//! - Protocol processors turn wire traffic into [`ProcessorEvent`]s and back
//!   (OSC over UDP; OCA and MIDI endpoints are placeholders)
//! - Object data handling strategies decide where a received update goes
//! - A [`ProcessingEngineNode`] ties role A and role B processors to one
//!   strategy
//! - The [`ProcessingEngine`] runs one node per configured node and reports
//!   traffic to an optional [`LoggingTarget`]

pub mod engine;
pub mod error;
pub mod handling;
pub mod midi;
pub mod node;
pub mod oca;
pub mod osc;
pub mod traits;

pub use engine::{LoggingTarget, ProcessingEngine, TracingLogTarget};
pub use error::{BridgeError, Result};
pub use handling::{MessageSender, ObjectDataHandling, Role};
pub use midi::MidiProtocolProcessor;
pub use node::{create_processor, NodeListener, ProcessingEngineNode};
pub use oca::OcaProtocolProcessor;
pub use osc::OscProtocolProcessor;
pub use traits::{ProcessorEvent, ProtocolProcessor};
