//! Processing engine node
//!
//! A node owns the protocol processors of both roles and one data handling
//! strategy. Every processor reports into a single event channel, and one
//! dispatch task per node drains it, so strategy state is only ever touched
//! from that task (or from a direct [`ProcessingEngineNode::handle_message`]
//! call).

use parking_lot::{Mutex, RwLock};
use rpb_core::{
    EngineConfig, NodeData, NodeId, ObjectHandlingData, ProtocolData, ProtocolId, ProtocolType,
    RemoteObjectIdentifier, RemoteObjectMessageData,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::handling::{MessageSender, ObjectDataHandling};
use crate::{
    BridgeError, MidiProtocolProcessor, OcaProtocolProcessor, OscProtocolProcessor, ProcessorEvent,
    ProtocolProcessor, Result,
};

type Roi = RemoteObjectIdentifier;

/// Observer of every message a node receives, before it is handled
pub trait NodeListener: Send + Sync {
    fn on_node_message(
        &self,
        node_id: NodeId,
        protocol_id: ProtocolId,
        protocol_type: ProtocolType,
        roi: Roi,
        data: &RemoteObjectMessageData,
    );
}

/// Create and configure the processor matching `data.protocol_type`
pub fn create_processor(data: &ProtocolData, node_id: NodeId) -> Result<Box<dyn ProtocolProcessor>> {
    let mut processor: Box<dyn ProtocolProcessor> = match data.protocol_type {
        ProtocolType::Osc => Box::new(OscProtocolProcessor::new(node_id, data.id)),
        ProtocolType::Oca => Box::new(OcaProtocolProcessor::new(node_id, data.id)),
        ProtocolType::Midi => Box::new(MidiProtocolProcessor::new(node_id, data.id)),
        ProtocolType::Invalid => {
            return Err(BridgeError::Protocol(format!(
                "protocol {} has no valid type",
                data.id
            )))
        }
    };
    processor.configure(data, &data.active_objects, node_id, data.id);
    Ok(processor)
}

/// Shared routing state: the dispatch task and the node both hold it
struct NodeRouter {
    node_id: NodeId,
    processors: HashMap<ProtocolId, Arc<dyn ProtocolProcessor>>,
    handling: Mutex<Option<ObjectDataHandling>>,
    listeners: RwLock<Vec<Arc<dyn NodeListener>>>,
}

impl NodeRouter {
    fn handle(&self, event: &ProcessorEvent) -> bool {
        for listener in self.listeners.read().iter() {
            listener.on_node_message(
                self.node_id,
                event.protocol_id,
                event.protocol_type,
                event.roi,
                &event.data,
            );
        }

        let mut handling = self.handling.lock();
        match handling.as_mut() {
            Some(handling) => handling.on_received_message(self, event.protocol_id, event.roi, &event.data),
            None => false,
        }
    }
}

impl MessageSender for NodeRouter {
    fn send_to(&self, protocol_id: ProtocolId, roi: Roi, data: &RemoteObjectMessageData) -> Result<()> {
        self.processors
            .get(&protocol_id)
            .ok_or(BridgeError::UnknownProtocol(protocol_id))?
            .send_message(roi, data)
    }
}

/// One configured bridge instance
pub struct ProcessingEngineNode {
    router: Arc<NodeRouter>,
    protocol_a_ids: Vec<ProtocolId>,
    protocol_b_ids: Vec<ProtocolId>,
    events: Mutex<Option<mpsc::UnboundedReceiver<ProcessorEvent>>>,
    dispatch: Mutex<Option<JoinHandle<()>>>,
}

impl ProcessingEngineNode {
    /// Build a node and its processors from the configuration
    pub fn new(node: &NodeData, config: &EngineConfig) -> Result<Self> {
        let build = |ids: &[ProtocolId]| -> Result<Vec<Box<dyn ProtocolProcessor>>> {
            ids.iter()
                .map(|id| {
                    let data = config
                        .protocol(*id)
                        .ok_or(rpb_core::Error::UnknownProtocol(*id))?;
                    create_processor(data, node.id)
                })
                .collect()
        };

        let role_a = build(&node.protocol_a)?;
        let role_b = build(&node.protocol_b)?;
        Ok(Self::with_processors(node.id, &node.object_handling, role_a, role_b))
    }

    /// Build a node around already configured processors
    pub fn with_processors(
        node_id: NodeId,
        object_handling: &ObjectHandlingData,
        role_a: Vec<Box<dyn ProtocolProcessor>>,
        role_b: Vec<Box<dyn ProtocolProcessor>>,
    ) -> Self {
        let mut handling = ObjectDataHandling::new(object_handling);
        if handling.is_none() {
            warn!("Node {} has no valid object handling mode, received data is dropped", node_id);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let mut processors: HashMap<ProtocolId, Arc<dyn ProtocolProcessor>> = HashMap::new();
        let mut protocol_a_ids = Vec::with_capacity(role_a.len());
        let mut protocol_b_ids = Vec::with_capacity(role_b.len());

        for processor in role_a {
            let id = processor.protocol_id();
            processor.add_listener(tx.clone());
            if let Some(handling) = handling.as_mut() {
                handling.add_protocol_a_id(id);
            }
            protocol_a_ids.push(id);
            processors.insert(id, Arc::from(processor));
        }
        for processor in role_b {
            let id = processor.protocol_id();
            processor.add_listener(tx.clone());
            if let Some(handling) = handling.as_mut() {
                handling.add_protocol_b_id(id);
            }
            protocol_b_ids.push(id);
            processors.insert(id, Arc::from(processor));
        }

        Self {
            router: Arc::new(NodeRouter {
                node_id,
                processors,
                handling: Mutex::new(handling),
                listeners: RwLock::new(Vec::new()),
            }),
            protocol_a_ids,
            protocol_b_ids,
            events: Mutex::new(Some(rx)),
            dispatch: Mutex::new(None),
        }
    }

    pub fn id(&self) -> NodeId {
        self.router.node_id
    }

    pub fn protocol_a_ids(&self) -> &[ProtocolId] {
        &self.protocol_a_ids
    }

    pub fn protocol_b_ids(&self) -> &[ProtocolId] {
        &self.protocol_b_ids
    }

    pub fn processor(&self, protocol_id: ProtocolId) -> Option<Arc<dyn ProtocolProcessor>> {
        self.router.processors.get(&protocol_id).cloned()
    }

    pub fn add_listener(&self, listener: Arc<dyn NodeListener>) {
        self.router.listeners.write().push(listener);
    }

    /// True while any processor of the node is running
    pub fn is_running(&self) -> bool {
        self.router.processors.values().any(|p| p.is_running())
    }

    /// Start role A, then role B processors
    ///
    /// On the first failure every processor started so far is stopped again
    /// and the error is returned.
    pub async fn start(&self) -> Result<()> {
        self.spawn_dispatch();

        let mut started: Vec<Arc<dyn ProtocolProcessor>> = Vec::new();
        for id in self.protocol_a_ids.iter().chain(self.protocol_b_ids.iter()) {
            let Some(processor) = self.processor(*id) else {
                continue;
            };

            if let Err(e) = processor.start().await {
                warn!("Node {}: protocol {} failed to start: {}", self.id(), id, e);
                for processor in started.iter().rev() {
                    if let Err(e) = processor.stop().await {
                        debug!("Rollback stop of protocol {} failed: {}", processor.protocol_id(), e);
                    }
                }
                return Err(e);
            }
            started.push(processor);
        }

        info!("Node {} started with {} protocols", self.id(), started.len());
        Ok(())
    }

    /// Stop every processor and discard strategy caches; returns the first
    /// error after trying all
    pub async fn stop(&self) -> Result<()> {
        if let Some(handling) = self.router.handling.lock().as_mut() {
            handling.reset();
        }

        let mut result = Ok(());
        for id in self.protocol_a_ids.iter().chain(self.protocol_b_ids.iter()) {
            let Some(processor) = self.processor(*id) else {
                continue;
            };
            if let Err(e) = processor.stop().await {
                warn!("Node {}: protocol {} failed to stop: {}", self.id(), id, e);
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }

    /// Route one received message synchronously
    pub fn handle_message(&self, event: &ProcessorEvent) -> bool {
        self.router.handle(event)
    }

    /// Send through the processor with `protocol_id`, in either role
    pub fn send_to(&self, protocol_id: ProtocolId, roi: Roi, data: &RemoteObjectMessageData) -> Result<()> {
        self.router.send_to(protocol_id, roi, data)
    }

    fn spawn_dispatch(&self) {
        let mut dispatch = self.dispatch.lock();
        if dispatch.is_some() {
            return;
        }
        if let Some(rx) = self.events.lock().take() {
            *dispatch = Some(tokio::spawn(dispatch_events(rx, self.router.clone())));
        }
    }
}

impl Drop for ProcessingEngineNode {
    fn drop(&mut self) {
        if let Some(task) = self.dispatch.lock().take() {
            task.abort();
        }
    }
}

async fn dispatch_events(mut rx: mpsc::UnboundedReceiver<ProcessorEvent>, router: Arc<NodeRouter>) {
    while let Some(event) = rx.recv().await {
        if !router.handle(&event) {
            debug!(
                "Node {}: {:?} from protocol {} was not forwarded",
                router.node_id, event.roi, event.protocol_id
            );
        }
    }
}
