//! Processing engine: owns the configuration snapshot and one node per
//! configured node id

use parking_lot::RwLock;
use rpb_core::{
    EngineConfig, NodeId, ProtocolId, ProtocolType, RemoteObjectIdentifier, RemoteObjectMessageData,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};

use crate::node::{NodeListener, ProcessingEngineNode};
use crate::{BridgeError, Result};

/// Sink for traffic records
pub trait LoggingTarget: Send + Sync {
    fn add_log_data(
        &self,
        node_id: NodeId,
        sender_protocol_id: ProtocolId,
        sender_type: ProtocolType,
        roi: RemoteObjectIdentifier,
        data: &RemoteObjectMessageData,
    );
}

/// Writes every traffic record as an `info` event
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogTarget;

impl LoggingTarget for TracingLogTarget {
    fn add_log_data(
        &self,
        node_id: NodeId,
        sender_protocol_id: ProtocolId,
        sender_type: ProtocolType,
        roi: RemoteObjectIdentifier,
        data: &RemoteObjectMessageData,
    ) {
        let values = match data.value_type {
            rpb_core::RemoteObjectValueType::Int => data.ints().map(|v| format!("{:?}", v)),
            rpb_core::RemoteObjectValueType::Float => data.floats().map(|v| format!("{:?}", v)),
            _ => None,
        };
        info!(
            node = node_id,
            protocol = sender_protocol_id,
            "{} {} ch {} rec {} {}",
            sender_type,
            roi,
            data.addressing.primary,
            data.addressing.secondary,
            values.as_deref().unwrap_or("-")
        );
    }
}

#[derive(Default)]
struct TrafficLogger {
    enabled: AtomicBool,
    target: RwLock<Option<Arc<dyn LoggingTarget>>>,
}

impl NodeListener for TrafficLogger {
    fn on_node_message(
        &self,
        node_id: NodeId,
        protocol_id: ProtocolId,
        protocol_type: ProtocolType,
        roi: RemoteObjectIdentifier,
        data: &RemoteObjectMessageData,
    ) {
        if !self.enabled.load(Ordering::Relaxed) {
            return;
        }
        if let Some(target) = self.target.read().as_ref() {
            target.add_log_data(node_id, protocol_id, protocol_type, roi, data);
        }
    }
}

pub struct ProcessingEngine {
    config: EngineConfig,
    nodes: BTreeMap<NodeId, ProcessingEngineNode>,
    logger: Arc<TrafficLogger>,
}

impl ProcessingEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            nodes: BTreeMap::new(),
            logger: Arc::new(TrafficLogger::default()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Replace the snapshot; running nodes keep their settings until restart
    pub fn set_config(&mut self, config: EngineConfig) {
        self.config = config;
    }

    /// Build and start one node per configured node
    ///
    /// Any running nodes are stopped first. Nodes that start keep running
    /// when others fail; the ids of the failed ones are reported.
    pub async fn start(&mut self) -> Result<()> {
        self.stop().await;
        self.config.validate()?;

        let mut failed = Vec::new();
        for data in self.config.nodes() {
            let node = match ProcessingEngineNode::new(data, &self.config) {
                Ok(node) => node,
                Err(e) => {
                    error!("Node {} could not be created: {}", data.id, e);
                    failed.push(data.id);
                    continue;
                }
            };
            node.add_listener(self.logger.clone());

            if let Err(e) = node.start().await {
                error!("Node {} failed to start: {}", data.id, e);
                failed.push(data.id);
            }
            self.nodes.insert(data.id, node);
        }

        if failed.is_empty() {
            info!("Processing engine started with {} nodes", self.nodes.len());
            Ok(())
        } else {
            Err(BridgeError::StartFailed(failed))
        }
    }

    /// Stop and drop every node
    pub async fn stop(&mut self) {
        if self.nodes.is_empty() {
            return;
        }
        for (id, node) in std::mem::take(&mut self.nodes) {
            if let Err(e) = node.stop().await {
                error!("Node {} failed to stop: {}", id, e);
            }
        }
        info!("Processing engine stopped");
    }

    pub fn is_running(&self) -> bool {
        !self.nodes.is_empty()
    }

    pub fn node(&self, node_id: NodeId) -> Option<&ProcessingEngineNode> {
        self.nodes.get(&node_id)
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().copied().collect()
    }

    pub fn set_logging_enabled(&self, enabled: bool) {
        self.logger.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_logging_enabled(&self) -> bool {
        self.logger.enabled.load(Ordering::Relaxed)
    }

    pub fn set_logging_target(&self, target: Option<Arc<dyn LoggingTarget>>) {
        *self.logger.target.write() = target;
    }
}
