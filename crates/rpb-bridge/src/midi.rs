//! MIDI protocol processor
//!
//! Placeholder endpoint without a device binding; sending always fails.

use async_trait::async_trait;
use parking_lot::Mutex;
use rpb_core::{
    NodeId, ProtocolData, ProtocolId, ProtocolType, RemoteObject, RemoteObjectIdentifier,
    RemoteObjectMessageData,
};
use tokio::sync::mpsc;

use crate::{BridgeError, ProcessorEvent, ProtocolProcessor, Result};

pub struct MidiProtocolProcessor {
    node_id: NodeId,
    protocol_id: ProtocolId,
    running: Mutex<bool>,
}

impl MidiProtocolProcessor {
    pub fn new(node_id: NodeId, protocol_id: ProtocolId) -> Self {
        Self {
            node_id,
            protocol_id,
            running: Mutex::new(false),
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }
}

#[async_trait]
impl ProtocolProcessor for MidiProtocolProcessor {
    fn protocol_type(&self) -> ProtocolType {
        ProtocolType::Midi
    }

    fn protocol_id(&self) -> ProtocolId {
        self.protocol_id
    }

    fn configure(
        &mut self,
        _data: &ProtocolData,
        _active_objects: &[RemoteObject],
        node_id: NodeId,
        protocol_id: ProtocolId,
    ) {
        self.node_id = node_id;
        self.protocol_id = protocol_id;
    }

    fn add_listener(&self, _listener: mpsc::UnboundedSender<ProcessorEvent>) {}

    async fn start(&self) -> Result<()> {
        *self.running.lock() = true;
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        *self.running.lock() = false;
        Ok(())
    }

    fn is_running(&self) -> bool {
        *self.running.lock()
    }

    fn set_active_objects(&self, _objects: &[RemoteObject]) {}

    fn send_message(&self, roi: RemoteObjectIdentifier, _data: &RemoteObjectMessageData) -> Result<()> {
        Err(BridgeError::Unsupported(format!("MIDI send of {:?}", roi)))
    }
}
