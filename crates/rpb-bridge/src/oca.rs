//! OCA protocol processor
//!
//! Placeholder endpoint: it starts and stops cleanly so OCA protocols can
//! be part of a node, but it has no wire implementation yet and refuses to
//! send.

use async_trait::async_trait;
use parking_lot::Mutex;
use rpb_core::{
    NodeId, ProtocolData, ProtocolId, ProtocolType, RemoteObject, RemoteObjectIdentifier,
    RemoteObjectMessageData,
};
use tokio::sync::mpsc;
use tracing::debug;

use crate::{BridgeError, ProcessorEvent, ProtocolProcessor, Result};

/// OCA object name of a remote object
pub fn object_name(roi: RemoteObjectIdentifier) -> Option<&'static str> {
    match roi {
        RemoteObjectIdentifier::SoundObjectPositionX => Some("Positioning_Source_Position_X"),
        RemoteObjectIdentifier::SoundObjectPositionY => Some("Positioning_Source_Position_Y"),
        RemoteObjectIdentifier::SoundObjectSpread => Some("Positioning_Source_Spread"),
        RemoteObjectIdentifier::SoundObjectDelayMode => Some("Positioning_Source_DelayMode"),
        RemoteObjectIdentifier::ReverbSendGain => Some("MatrixInput_ReverbSendGain"),
        _ => None,
    }
}

pub struct OcaProtocolProcessor {
    node_id: NodeId,
    protocol_id: ProtocolId,
    ip_address: String,
    port: u16,
    running: Mutex<bool>,
}

impl OcaProtocolProcessor {
    pub fn new(node_id: NodeId, protocol_id: ProtocolId) -> Self {
        Self {
            node_id,
            protocol_id,
            ip_address: String::new(),
            port: 0,
            running: Mutex::new(false),
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }
}

#[async_trait]
impl ProtocolProcessor for OcaProtocolProcessor {
    fn protocol_type(&self) -> ProtocolType {
        ProtocolType::Oca
    }

    fn protocol_id(&self) -> ProtocolId {
        self.protocol_id
    }

    fn configure(
        &mut self,
        data: &ProtocolData,
        _active_objects: &[RemoteObject],
        node_id: NodeId,
        protocol_id: ProtocolId,
    ) {
        self.node_id = node_id;
        self.protocol_id = protocol_id;
        self.ip_address = data.ip_address.clone();
        self.port = data.client_port;
    }

    fn add_listener(&self, _listener: mpsc::UnboundedSender<ProcessorEvent>) {}

    async fn start(&self) -> Result<()> {
        *self.running.lock() = true;
        debug!("OCA processor {} started for {}:{}", self.protocol_id, self.ip_address, self.port);
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
        Err(BridgeError::Unsupported(format!(
            "OCA send of {}",
            object_name(roi).unwrap_or("unmapped object")
        )))
    }
}
