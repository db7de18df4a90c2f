//! Protocol processor trait definitions

use async_trait::async_trait;
use rpb_core::{
    NodeId, ProtocolData, ProtocolId, ProtocolType, RemoteObject, RemoteObjectIdentifier,
    RemoteObjectMessageData,
};
use tokio::sync::mpsc;

use crate::Result;

/// A message decoded by a protocol processor
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessorEvent {
    /// Protocol the message arrived on
    pub protocol_id: ProtocolId,
    pub protocol_type: ProtocolType,
    pub roi: RemoteObjectIdentifier,
    pub data: RemoteObjectMessageData,
}

/// One wire protocol endpoint owned by a processing node
///
/// Processors are configured before being shared; everything afterwards
/// works through `&self` so the node can start, stop and send concurrently.
#[async_trait]
pub trait ProtocolProcessor: Send + Sync {
    fn protocol_type(&self) -> ProtocolType;

    fn protocol_id(&self) -> ProtocolId;

    /// Store endpoint settings; activates `active_objects` when the protocol
    /// uses active handling
    fn configure(
        &mut self,
        data: &ProtocolData,
        active_objects: &[RemoteObject],
        node_id: NodeId,
        protocol_id: ProtocolId,
    );

    /// Register a receiver for decoded inbound messages
    fn add_listener(&self, listener: mpsc::UnboundedSender<ProcessorEvent>);

    /// Open the transport; calling it on a started processor is a no-op
    async fn start(&self) -> Result<()>;

    /// Close the transport; calling it on a stopped processor is a no-op
    async fn stop(&self) -> Result<()>;

    fn is_running(&self) -> bool;

    /// Replace the polled objects; an empty list disables polling
    fn set_active_objects(&self, objects: &[RemoteObject]);

    /// Encode and transmit one message
    fn send_message(&self, roi: RemoteObjectIdentifier, data: &RemoteObjectMessageData) -> Result<()>;
}
