//! OSC protocol processor
//!
//! Remote objects map to d&b-style OSC address patterns. The object instance
//! follows the pattern as trailing path segments, record/mapping first and
//! channel last:
//!
//! ```text
//! /dbaudio1/coordinatemapping/source_position_xy/<mapping>/<channel>  ff
//! /dbaudio1/positioning/source_spread/<channel>                       f
//! /dbaudio1/positioning/source_delaymode/<channel>                    i
//! ```

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rosc::{OscMessage, OscType};
use rpb_core::{
    NodeId, ProtocolData, ProtocolId, ProtocolType, RemoteObject, RemoteObjectAddressing,
    RemoteObjectIdentifier, RemoteObjectMessageData, RemoteObjectValueType,
    DEFAULT_POLLING_INTERVAL_MS, INVALID_ADDRESS_VALUE,
};
use rpb_transport::{codec, OscSender, ReceivedPacket, SenderAwareReceiver};
use std::fmt::Write;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::{BridgeError, ProcessorEvent, ProtocolProcessor, Result};

type Roi = RemoteObjectIdentifier;

/// Address pattern of every object the processor understands
const OBJECT_ADDRESSES: [(Roi, &str); 8] = [
    (Roi::HeartbeatPong, "/pong"),
    (Roi::HeartbeatPing, "/ping"),
    (Roi::SoundObjectPositionX, "/dbaudio1/coordinatemapping/source_position_x"),
    (Roi::SoundObjectPositionY, "/dbaudio1/coordinatemapping/source_position_y"),
    (Roi::SoundObjectPositionXY, "/dbaudio1/coordinatemapping/source_position_xy"),
    (Roi::SoundObjectSpread, "/dbaudio1/positioning/source_spread"),
    (Roi::SoundObjectDelayMode, "/dbaudio1/positioning/source_delaymode"),
    (Roi::ReverbSendGain, "/dbaudio1/matrixinput/reverbsendgain"),
];

/// OSC address pattern of an object, without instance segments
pub fn object_address(roi: Roi) -> Option<&'static str> {
    OBJECT_ADDRESSES
        .iter()
        .find(|(r, _)| *r == roi)
        .map(|(_, addr)| *addr)
}

/// Full address of an object instance
pub fn object_instance_address(roi: Roi, addressing: RemoteObjectAddressing) -> Option<String> {
    let mut addr = object_address(roi)?.to_string();
    if addressing.has_secondary() {
        let _ = write!(addr, "/{}", addressing.secondary);
    }
    if addressing.has_primary() {
        let _ = write!(addr, "/{}", addressing.primary);
    }
    Some(addr)
}

/// Build the OSC message for an outbound object update
///
/// One to three values become positional arguments; any other count yields
/// an address-only message, which remote devices treat as a value query.
pub fn encode_message(roi: Roi, data: &RemoteObjectMessageData) -> Result<OscMessage> {
    let addr = object_instance_address(roi, data.addressing)
        .ok_or_else(|| BridgeError::Protocol(format!("no OSC address for {:?}", roi)))?;

    let args = if (1..=3).contains(&data.value_count) {
        match data.value_type {
            RemoteObjectValueType::Int => data
                .ints()
                .ok_or_else(|| inconsistent_payload(roi))?
                .into_iter()
                .map(OscType::Int)
                .collect(),
            RemoteObjectValueType::Float => data
                .floats()
                .ok_or_else(|| inconsistent_payload(roi))?
                .into_iter()
                .map(OscType::Float)
                .collect(),
            RemoteObjectValueType::String => {
                return Err(BridgeError::Unsupported(
                    "string values over OSC".to_string(),
                ))
            }
            RemoteObjectValueType::None => Vec::new(),
        }
    } else {
        Vec::new()
    };

    Ok(OscMessage { addr, args })
}

fn inconsistent_payload(roi: Roi) -> BridgeError {
    BridgeError::Protocol(format!("inconsistent payload for {:?}", roi))
}

/// Translate an inbound OSC message into an object update
///
/// Returns `None` for unknown address patterns and for messages whose
/// arguments do not fit the object.
pub fn decode_message(msg: &OscMessage) -> Option<(Roi, RemoteObjectMessageData)> {
    let (roi, rest) = match_object_address(&msg.addr)?;
    let addressing = parse_addressing(rest)?;

    if roi.is_keepalive() || msg.args.is_empty() {
        return Some((roi, RemoteObjectMessageData::empty(addressing)));
    }

    let expected = roi.value_count() as usize;
    if msg.args.len() < expected {
        return None;
    }
    let args = &msg.args[..expected];

    let data = match roi.value_type() {
        RemoteObjectValueType::Int => {
            let values: Option<Vec<i32>> = args.iter().map(arg_to_int).collect();
            RemoteObjectMessageData::from_ints(addressing, &values?)
        }
        RemoteObjectValueType::Float => {
            let values: Option<Vec<f32>> = args.iter().map(arg_to_float).collect();
            RemoteObjectMessageData::from_floats(addressing, &values?)
        }
        _ => RemoteObjectMessageData::empty(addressing),
    };
    Some((roi, data))
}

fn match_object_address(addr: &str) -> Option<(Roi, &str)> {
    OBJECT_ADDRESSES.iter().find_map(|(roi, prefix)| {
        let rest = addr.strip_prefix(prefix)?;
        (rest.is_empty() || rest.starts_with('/')).then_some((*roi, rest))
    })
}

/// Trailing segments, read from the right: channel, then record
fn parse_addressing(rest: &str) -> Option<RemoteObjectAddressing> {
    let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();
    if segments.len() > 2 {
        return None;
    }

    let mut values = segments.iter().rev().map(|s| s.parse::<i16>().ok());
    let primary = match values.next() {
        Some(value) => value?,
        None => INVALID_ADDRESS_VALUE,
    };
    let secondary = match values.next() {
        Some(value) => value?,
        None => INVALID_ADDRESS_VALUE,
    };
    Some(RemoteObjectAddressing::new(primary, secondary))
}

fn arg_to_float(arg: &OscType) -> Option<f32> {
    match arg {
        OscType::Float(f) => Some(*f),
        OscType::Int(i) => Some(*i as f32),
        _ => None,
    }
}

fn arg_to_int(arg: &OscType) -> Option<i32> {
    match arg {
        OscType::Int(i) => Some(*i),
        OscType::Float(f) => Some(f.round() as i32),
        _ => None,
    }
}

/// Transport state that only exists while started
struct Connection {
    sender: Arc<OscSender>,
    receiver: SenderAwareReceiver,
    pump: JoinHandle<()>,
    runtime: Handle,
}

/// OSC processor: sends to `ip_address:client_port`, receives on `host_port`
pub struct OscProtocolProcessor {
    node_id: NodeId,
    protocol_id: ProtocolId,
    ip_address: String,
    client_port: u16,
    host_port: u16,
    polling_interval: Duration,
    listeners: Arc<RwLock<Vec<mpsc::UnboundedSender<ProcessorEvent>>>>,
    active_objects: Mutex<Vec<RemoteObject>>,
    connection: Mutex<Option<Connection>>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl OscProtocolProcessor {
    pub fn new(node_id: NodeId, protocol_id: ProtocolId) -> Self {
        Self {
            node_id,
            protocol_id,
            ip_address: "127.0.0.1".to_string(),
            client_port: 0,
            host_port: 0,
            polling_interval: Duration::from_millis(DEFAULT_POLLING_INTERVAL_MS),
            listeners: Arc::new(RwLock::new(Vec::new())),
            active_objects: Mutex::new(Vec::new()),
            connection: Mutex::new(None),
            poller: Mutex::new(None),
        }
    }

    /// Build and configure a processor from its protocol settings
    pub fn from_protocol_data(data: &ProtocolData, node_id: NodeId) -> Self {
        let mut processor = Self::new(node_id, data.id);
        processor.configure(data, &data.active_objects, node_id, data.id);
        processor
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Local address inbound traffic is received on, while started
    pub fn receive_addr(&self) -> Option<SocketAddr> {
        self.connection
            .lock()
            .as_ref()
            .map(|connection| connection.receiver.local_addr())
    }

    pub fn active_objects(&self) -> Vec<RemoteObject> {
        self.active_objects.lock().clone()
    }

    fn restart_polling(&self) {
        let mut poller = self.poller.lock();
        if let Some(task) = poller.take() {
            task.abort();
        }

        let objects = self.active_objects.lock().clone();
        if objects.is_empty() {
            return;
        }

        let connection = self.connection.lock();
        if let Some(connection) = connection.as_ref() {
            *poller = Some(connection.runtime.spawn(poll_objects(
                connection.sender.clone(),
                objects,
                self.polling_interval,
            )));
        }
    }
}

#[async_trait]
impl ProtocolProcessor for OscProtocolProcessor {
    fn protocol_type(&self) -> ProtocolType {
        ProtocolType::Osc
    }

    fn protocol_id(&self) -> ProtocolId {
        self.protocol_id
    }

    fn configure(
        &mut self,
        data: &ProtocolData,
        active_objects: &[RemoteObject],
        node_id: NodeId,
        protocol_id: ProtocolId,
    ) {
        self.node_id = node_id;
        self.protocol_id = protocol_id;
        self.ip_address = data.ip_address.clone();
        self.client_port = data.client_port;
        self.host_port = data.host_port;
        // a zero period would make the timer spin
        self.polling_interval = Duration::from_millis(data.polling_interval_ms.max(1));

        if data.uses_active_objects {
            self.set_active_objects(active_objects);
        }
    }

    fn add_listener(&self, listener: mpsc::UnboundedSender<ProcessorEvent>) {
        self.listeners.write().push(listener);
    }

    async fn start(&self) -> Result<()> {
        if self.connection.lock().is_some() {
            return Ok(());
        }

        let sender = OscSender::connect(&self.ip_address, self.client_port)
            .await
            .map_err(|e| BridgeError::ConnectionFailed(e.to_string()))?;
        let receiver = SenderAwareReceiver::connect(self.host_port)
            .await
            .map_err(|e| BridgeError::ConnectionFailed(e.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        receiver.add_message_listener(tx);

        let pump = tokio::spawn(pump_messages(
            rx,
            sender.resolved_ips().to_vec(),
            self.protocol_id,
            self.listeners.clone(),
        ));

        info!(
            "OSC processor {} sending to {}, receiving on port {}",
            self.protocol_id,
            sender.target(),
            receiver.port()
        );

        {
            let mut connection = self.connection.lock();
            if connection.is_some() {
                // lost a race against a concurrent start; dropping releases the port
                pump.abort();
                return Ok(());
            }
            *connection = Some(Connection {
                sender: Arc::new(sender),
                receiver,
                pump,
                runtime: Handle::current(),
            });
        }

        self.restart_polling();
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if let Some(task) = self.poller.lock().take() {
            task.abort();
        }

        let connection = self.connection.lock().take();
        let Some(connection) = connection else {
            return Ok(());
        };

        connection.pump.abort();
        connection.receiver.disconnect().await?;
        info!("OSC processor {} stopped", self.protocol_id);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.connection.lock().is_some()
    }

    fn set_active_objects(&self, objects: &[RemoteObject]) {
        *self.active_objects.lock() = objects.to_vec();
        self.restart_polling();
    }

    fn send_message(&self, roi: Roi, data: &RemoteObjectMessageData) -> Result<()> {
        let sender = self
            .connection
            .lock()
            .as_ref()
            .map(|connection| connection.sender.clone())
            .ok_or(BridgeError::NotRunning(self.protocol_id))?;

        let message = encode_message(roi, data)?;
        sender.send_message(message)?;
        Ok(())
    }
}

impl Drop for OscProtocolProcessor {
    fn drop(&mut self) {
        if let Some(task) = self.poller.get_mut().take() {
            task.abort();
        }
        // dropping the receiver releases its port reference
        if let Some(connection) = self.connection.get_mut().take() {
            connection.pump.abort();
        }
    }
}

/// Turns received packets into processor events, dropping foreign senders
async fn pump_messages(
    mut rx: mpsc::UnboundedReceiver<ReceivedPacket>,
    expected_ips: Vec<IpAddr>,
    protocol_id: ProtocolId,
    listeners: Arc<RwLock<Vec<mpsc::UnboundedSender<ProcessorEvent>>>>,
) {
    while let Some(received) = rx.recv().await {
        if !expected_ips.contains(&received.sender_ip()) {
            debug!(
                "OSC processor {} ignoring packet from {} (expecting {:?})",
                protocol_id, received.sender, expected_ips
            );
            continue;
        }

        for msg in codec::flatten(&received.packet) {
            let Some((roi, data)) = decode_message(msg) else {
                debug!("OSC processor {} ignoring address {}", protocol_id, msg.addr);
                continue;
            };

            let event = ProcessorEvent {
                protocol_id,
                protocol_type: ProtocolType::Osc,
                roi,
                data,
            };
            for listener in listeners.read().iter() {
                let _ = listener.send(event.clone());
            }
        }
    }
}

/// Periodically queries every active object with an address-only message
async fn poll_objects(sender: Arc<OscSender>, objects: Vec<RemoteObject>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        for object in &objects {
            let query = RemoteObjectMessageData::empty(object.addressing);
            let result = encode_message(object.roi, &query)
                .and_then(|msg| sender.send_message(msg).map_err(BridgeError::from));
            if let Err(e) = result {
                warn!("Polling {:?} failed: {}", object.roi, e);
            }
        }
    }
}
