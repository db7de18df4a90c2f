//! Engine configuration snapshot
//!
//! The snapshot is what the processing engine is built from. On disk it is a
//! TOML document with `[[node]]` and `[[protocol]]` tables:
//!
//! ```toml
//! traffic_logging_allowed = true
//!
//! [[node]]
//! id = 1
//! protocol_a = [2]
//! protocol_b = [3]
//!
//! [node.object_handling]
//! mode = "bypass"
//!
//! [[protocol]]
//! id = 2
//! type = "OSC"
//! ip_address = "10.255.0.100"
//! client_port = 50010
//! host_port = 50011
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::debug;

use crate::{
    next_unique_id, validate_unique_id, Error, NodeId, ObjectHandlingMode, ProtocolId,
    ProtocolType, RemoteObject, RemoteObjectAddressing, RemoteObjectIdentifier, Result,
    DEFAULT_POLLING_INTERVAL_MS, DEFAULT_PRECISION,
};

fn default_polling_interval() -> u64 {
    DEFAULT_POLLING_INTERVAL_MS
}

fn default_precision() -> f32 {
    DEFAULT_PRECISION
}

/// Settings of one protocol endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolData {
    pub id: ProtocolId,
    #[serde(rename = "type")]
    pub protocol_type: ProtocolType,
    /// Remote device address; inbound traffic from other hosts is ignored
    pub ip_address: String,
    /// Remote port messages are sent to
    pub client_port: u16,
    /// Local port messages are received on
    pub host_port: u16,
    #[serde(default)]
    pub uses_active_objects: bool,
    #[serde(default = "default_polling_interval")]
    pub polling_interval_ms: u64,
    #[serde(default)]
    pub active_objects: Vec<RemoteObject>,
}

impl ProtocolData {
    pub fn new(
        id: ProtocolId,
        protocol_type: ProtocolType,
        ip_address: impl Into<String>,
        client_port: u16,
        host_port: u16,
    ) -> Self {
        Self {
            id,
            protocol_type,
            ip_address: ip_address.into(),
            client_port,
            host_port,
            uses_active_objects: false,
            active_objects: Vec::new(),
            polling_interval_ms: DEFAULT_POLLING_INTERVAL_MS,
        }
    }

    /// Default role A endpoint
    pub fn default_role_a(id: ProtocolId) -> Self {
        Self {
            active_objects: default_active_objects(),
            ..Self::new(id, ProtocolType::Osc, "10.255.0.100", 50010, 50011)
        }
    }

    /// Default role B endpoint
    pub fn default_role_b(id: ProtocolId) -> Self {
        Self {
            active_objects: default_active_objects(),
            ..Self::new(id, ProtocolType::Osc, "127.0.0.1", 50012, 50013)
        }
    }
}

/// X and Y position of sources 1..=16 on mapping 1
fn default_active_objects() -> Vec<RemoteObject> {
    let mut objects = Vec::with_capacity(32);
    for channel in 1..=16 {
        let addressing = RemoteObjectAddressing::new(channel, 1);
        objects.push(RemoteObject::new(RemoteObjectIdentifier::SoundObjectPositionX, addressing));
        objects.push(RemoteObject::new(RemoteObjectIdentifier::SoundObjectPositionY, addressing));
    }
    objects
}

/// Data handling settings of a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectHandlingData {
    pub mode: ObjectHandlingMode,
    /// Channels per role A protocol (multiplexing modes)
    #[serde(default)]
    pub a_channel_count: u16,
    /// Channels per role B protocol (multiplexing modes)
    #[serde(default)]
    pub b_channel_count: u16,
    /// Value quantization step (value filtering modes)
    #[serde(default = "default_precision")]
    pub precision: f32,
}

impl ObjectHandlingData {
    pub fn new(mode: ObjectHandlingMode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    pub fn multiplexed(mode: ObjectHandlingMode, a_channel_count: u16, b_channel_count: u16) -> Self {
        Self {
            mode,
            a_channel_count,
            b_channel_count,
            ..Default::default()
        }
    }
}

impl Default for ObjectHandlingData {
    fn default() -> Self {
        Self {
            mode: ObjectHandlingMode::Bypass,
            a_channel_count: 0,
            b_channel_count: 0,
            precision: DEFAULT_PRECISION,
        }
    }
}

/// One bridging node: a strategy plus the protocol ids of both roles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeData {
    pub id: NodeId,
    #[serde(default)]
    pub protocol_a: Vec<ProtocolId>,
    #[serde(default)]
    pub protocol_b: Vec<ProtocolId>,
    #[serde(default)]
    pub object_handling: ObjectHandlingData,
}

impl NodeData {
    pub fn new(id: NodeId, object_handling: ObjectHandlingData) -> Self {
        Self {
            id,
            object_handling,
            protocol_a: Vec::new(),
            protocol_b: Vec::new(),
        }
    }

    pub fn protocol_ids(&self) -> impl Iterator<Item = ProtocolId> + '_ {
        self.protocol_a.iter().chain(self.protocol_b.iter()).copied()
    }
}

/// TOML layout of the snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    traffic_logging_allowed: bool,
    #[serde(default)]
    engine_start_on_app_start: bool,
    #[serde(default, rename = "node")]
    nodes: Vec<NodeData>,
    #[serde(default, rename = "protocol")]
    protocols: Vec<ProtocolData>,
}

/// Complete configuration snapshot consumed by the processing engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ConfigFile", into = "ConfigFile")]
pub struct EngineConfig {
    pub traffic_logging_allowed: bool,
    pub engine_start_on_app_start: bool,
    nodes: BTreeMap<NodeId, NodeData>,
    protocols: BTreeMap<ProtocolId, ProtocolData>,
}

impl TryFrom<ConfigFile> for EngineConfig {
    type Error = Error;

    fn try_from(file: ConfigFile) -> Result<Self> {
        let mut config = EngineConfig {
            traffic_logging_allowed: file.traffic_logging_allowed,
            engine_start_on_app_start: file.engine_start_on_app_start,
            ..Default::default()
        };
        for node in file.nodes {
            let id = node.id;
            if config.nodes.insert(id, node).is_some() {
                return Err(Error::InvalidConfig(format!("duplicate node id {}", id)));
            }
        }
        for protocol in file.protocols {
            let id = protocol.id;
            if config.protocols.insert(id, protocol).is_some() {
                return Err(Error::InvalidConfig(format!("duplicate protocol id {}", id)));
            }
        }
        Ok(config)
    }
}

impl From<EngineConfig> for ConfigFile {
    fn from(config: EngineConfig) -> Self {
        ConfigFile {
            traffic_logging_allowed: config.traffic_logging_allowed,
            engine_start_on_app_start: config.engine_start_on_app_start,
            nodes: config.nodes.into_values().collect(),
            protocols: config.protocols.into_values().collect(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot holding a single default node
    pub fn with_default_node() -> Self {
        let mut config = Self::default();
        config.add_default_node();
        config
    }

    /// Parse and validate a TOML snapshot, then seed the id allocator past its ids
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(text)?;
        config.validate()?;
        config.seed_unique_ids();
        Ok(config)
    }

    /// Load a snapshot from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        debug!("Loaded configuration from {}", path.as_ref().display());
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn write_file(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    fn seed_unique_ids(&self) {
        for id in self.nodes.keys().chain(self.protocols.keys()) {
            validate_unique_id(*id);
        }
    }

    /// Check the structural rules the engine relies on
    pub fn validate(&self) -> Result<()> {
        let mut owners: HashMap<ProtocolId, NodeId> = HashMap::new();

        for node in self.nodes.values() {
            if self.protocols.contains_key(&node.id) {
                return Err(Error::InvalidConfig(format!(
                    "node id {} is also used as protocol id",
                    node.id
                )));
            }

            for protocol_id in node.protocol_ids() {
                let protocol = self.protocols.get(&protocol_id).ok_or_else(|| {
                    Error::InvalidConfig(format!(
                        "node {} references unknown protocol {}",
                        node.id, protocol_id
                    ))
                })?;
                if protocol.protocol_type == ProtocolType::Invalid {
                    return Err(Error::InvalidConfig(format!(
                        "protocol {} has no valid type",
                        protocol_id
                    )));
                }
                if let Some(owner) = owners.insert(protocol_id, node.id) {
                    return Err(Error::InvalidConfig(format!(
                        "protocol {} is assigned to node {} and node {}",
                        protocol_id, owner, node.id
                    )));
                }
            }

            let handling = &node.object_handling;
            if handling.mode.is_multiplexing()
                && (handling.a_channel_count == 0 || handling.b_channel_count == 0)
            {
                return Err(Error::InvalidConfig(format!(
                    "node {} multiplexes with a zero channel count",
                    node.id
                )));
            }
            if !handling.precision.is_finite() || handling.precision < 0.0 {
                return Err(Error::InvalidConfig(format!(
                    "node {} has invalid precision {}",
                    node.id, handling.precision
                )));
            }
        }

        Ok(())
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.protocols.clear();
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().copied().collect()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeData> {
        self.nodes.values()
    }

    pub fn node(&self, node_id: NodeId) -> Option<&NodeData> {
        self.nodes.get(&node_id)
    }

    pub fn protocol_ids(&self) -> Vec<ProtocolId> {
        self.protocols.keys().copied().collect()
    }

    pub fn protocol(&self, protocol_id: ProtocolId) -> Option<&ProtocolData> {
        self.protocols.get(&protocol_id)
    }

    pub fn protocol_a_ids(&self, node_id: NodeId) -> Vec<ProtocolId> {
        self.nodes
            .get(&node_id)
            .map(|node| node.protocol_a.clone())
            .unwrap_or_default()
    }

    pub fn protocol_b_ids(&self, node_id: NodeId) -> Vec<ProtocolId> {
        self.nodes
            .get(&node_id)
            .map(|node| node.protocol_b.clone())
            .unwrap_or_default()
    }

    /// Node owning a protocol id
    pub fn node_of_protocol(&self, protocol_id: ProtocolId) -> Option<NodeId> {
        self.nodes
            .values()
            .find(|node| node.protocol_ids().any(|id| id == protocol_id))
            .map(|node| node.id)
    }

    pub fn object_handling(&self, node_id: NodeId) -> Option<&ObjectHandlingData> {
        self.nodes.get(&node_id).map(|node| &node.object_handling)
    }

    pub fn set_object_handling(&mut self, node_id: NodeId, data: ObjectHandlingData) -> Result<()> {
        let node = self.nodes.get_mut(&node_id).ok_or(Error::UnknownNode(node_id))?;
        node.object_handling = data;
        Ok(())
    }

    pub fn remote_objects_to_activate(&self, protocol_id: ProtocolId) -> Vec<RemoteObject> {
        self.protocols
            .get(&protocol_id)
            .map(|protocol| protocol.active_objects.clone())
            .unwrap_or_default()
    }

    pub fn set_remote_objects_to_activate(
        &mut self,
        protocol_id: ProtocolId,
        objects: Vec<RemoteObject>,
    ) -> Result<()> {
        self.protocol_mut(protocol_id)?.active_objects = objects;
        Ok(())
    }

    pub fn uses_active_handling(&self, protocol_id: ProtocolId) -> bool {
        self.protocols
            .get(&protocol_id)
            .map(|protocol| protocol.uses_active_objects)
            .unwrap_or(false)
    }

    pub fn set_use_active_handling(&mut self, protocol_id: ProtocolId, enabled: bool) -> Result<()> {
        self.protocol_mut(protocol_id)?.uses_active_objects = enabled;
        Ok(())
    }

    pub fn polling_interval(&self, protocol_id: ProtocolId) -> Option<u64> {
        self.protocols
            .get(&protocol_id)
            .map(|protocol| protocol.polling_interval_ms)
    }

    pub fn set_polling_interval(&mut self, protocol_id: ProtocolId, interval_ms: u64) -> Result<()> {
        self.protocol_mut(protocol_id)?.polling_interval_ms = interval_ms;
        Ok(())
    }

    pub fn set_protocol_ports(
        &mut self,
        protocol_id: ProtocolId,
        client_port: u16,
        host_port: u16,
    ) -> Result<()> {
        let protocol = self.protocol_mut(protocol_id)?;
        protocol.client_port = client_port;
        protocol.host_port = host_port;
        Ok(())
    }

    /// Replace the settings of an existing protocol
    pub fn set_protocol_data(&mut self, data: ProtocolData) -> Result<()> {
        let protocol = self.protocol_mut(data.id)?;
        *protocol = data;
        Ok(())
    }

    fn protocol_mut(&mut self, protocol_id: ProtocolId) -> Result<&mut ProtocolData> {
        self.protocols
            .get_mut(&protocol_id)
            .ok_or(Error::UnknownProtocol(protocol_id))
    }

    /// Insert a protocol definition, replacing one with the same id
    pub fn insert_protocol(&mut self, data: ProtocolData) {
        validate_unique_id(data.id);
        self.protocols.insert(data.id, data);
    }

    /// Insert a node definition, replacing one with the same id
    pub fn insert_node(&mut self, data: NodeData) {
        validate_unique_id(data.id);
        self.nodes.insert(data.id, data);
    }

    /// Add a bypass node with one default OSC protocol per role
    pub fn add_default_node(&mut self) -> NodeId {
        let node_id = next_unique_id();
        let protocol_a = ProtocolData::default_role_a(next_unique_id());
        let protocol_b = ProtocolData::default_role_b(next_unique_id());

        let mut node = NodeData::new(node_id, ObjectHandlingData::default());
        node.protocol_a.push(protocol_a.id);
        node.protocol_b.push(protocol_b.id);

        self.protocols.insert(protocol_a.id, protocol_a);
        self.protocols.insert(protocol_b.id, protocol_b);
        self.nodes.insert(node_id, node);
        node_id
    }

    pub fn add_default_protocol_a(&mut self, node_id: NodeId) -> Result<ProtocolId> {
        let node = self.nodes.get_mut(&node_id).ok_or(Error::UnknownNode(node_id))?;
        let protocol = ProtocolData::default_role_a(next_unique_id());
        let protocol_id = protocol.id;
        node.protocol_a.push(protocol_id);
        self.protocols.insert(protocol_id, protocol);
        Ok(protocol_id)
    }

    pub fn add_default_protocol_b(&mut self, node_id: NodeId) -> Result<ProtocolId> {
        let node = self.nodes.get_mut(&node_id).ok_or(Error::UnknownNode(node_id))?;
        let protocol = ProtocolData::default_role_b(next_unique_id());
        let protocol_id = protocol.id;
        node.protocol_b.push(protocol_id);
        self.protocols.insert(protocol_id, protocol);
        Ok(protocol_id)
    }

    /// Remove a node together with all of its protocols
    pub fn remove_node(&mut self, node_id: NodeId) -> Result<()> {
        let node = self.nodes.remove(&node_id).ok_or(Error::UnknownNode(node_id))?;
        for protocol_id in node.protocol_ids() {
            self.protocols.remove(&protocol_id);
        }
        Ok(())
    }

    /// Remove a protocol from a node; the last protocol of a role stays
    pub fn remove_protocol(&mut self, node_id: NodeId, protocol_id: ProtocolId) -> Result<()> {
        let node = self.nodes.get_mut(&node_id).ok_or(Error::UnknownNode(node_id))?;

        let (role, ids) = if node.protocol_a.contains(&protocol_id) {
            ('A', &mut node.protocol_a)
        } else if node.protocol_b.contains(&protocol_id) {
            ('B', &mut node.protocol_b)
        } else {
            return Err(Error::UnknownProtocol(protocol_id));
        };

        if ids.len() <= 1 {
            return Err(Error::LastProtocolInRole {
                node: node_id,
                role,
            });
        }

        ids.retain(|id| *id != protocol_id);
        self.protocols.remove(&protocol_id);
        Ok(())
    }
}
