//! Common test helpers for the bridge crates
//!
//! This crate provides:
//! - UDP port allocation
//! - Condition-based waiting (no hardcoded sleeps)
//! - A recording mock protocol processor
//! - Protocol settings builders for loopback tests

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rpb_bridge::{BridgeError, ProcessorEvent, ProtocolProcessor, Result};
use rpb_core::{
    NodeId, ProtocolData, ProtocolId, ProtocolType, RemoteObject, RemoteObjectIdentifier,
    RemoteObjectMessageData,
};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Default test timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default condition check interval
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// Port Allocation
// ============================================================================

/// Find an available UDP port for testing
pub fn find_available_udp_port() -> u16 {
    let socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    socket.local_addr().unwrap().port()
}

// ============================================================================
// Condition-Based Waiting
// ============================================================================

/// Wait for a condition with timeout - condition-based, not time-based
pub async fn wait_for<F>(check: F, interval: Duration, max_wait: Duration) -> bool
where
    F: Fn() -> bool,
{
    let start = Instant::now();
    while start.elapsed() < max_wait {
        if check() {
            return true;
        }
        tokio::time::sleep(interval).await;
    }
    check()
}

/// Wait for an atomic counter to reach a target value
pub async fn wait_for_count(counter: &AtomicU32, target: u32, max_wait: Duration) -> bool {
    wait_for(
        || counter.load(Ordering::SeqCst) >= target,
        DEFAULT_CHECK_INTERVAL,
        max_wait,
    )
    .await
}

// ============================================================================
// Protocol Settings
// ============================================================================

/// OSC protocol talking to a loopback peer
pub fn osc_protocol(id: ProtocolId, client_port: u16, host_port: u16) -> ProtocolData {
    ProtocolData::new(id, ProtocolType::Osc, "127.0.0.1", client_port, host_port)
}

// ============================================================================
// Mock Processor
// ============================================================================

type Sent = (RemoteObjectIdentifier, RemoteObjectMessageData);

#[derive(Default)]
struct MockState {
    node_id: Mutex<NodeId>,
    running: AtomicBool,
    fail_start: AtomicBool,
    fail_send: AtomicBool,
    start_count: AtomicU32,
    stop_count: AtomicU32,
    active_objects: Mutex<Vec<RemoteObject>>,
    listeners: RwLock<Vec<mpsc::UnboundedSender<ProcessorEvent>>>,
    sent: Mutex<Vec<Sent>>,
}

/// Protocol processor that records sends and injects received messages
///
/// Clones share state, so a test can keep one clone after handing the other
/// to a node.
#[derive(Clone)]
pub struct MockProcessor {
    protocol_id: ProtocolId,
    protocol_type: ProtocolType,
    state: Arc<MockState>,
}

impl MockProcessor {
    pub fn new(protocol_id: ProtocolId) -> Self {
        Self {
            protocol_id,
            protocol_type: ProtocolType::Osc,
            state: Arc::new(MockState::default()),
        }
    }

    /// A processor whose `start` fails
    pub fn failing_start(protocol_id: ProtocolId) -> Self {
        let mock = Self::new(protocol_id);
        mock.set_fail_start(true);
        mock
    }

    pub fn boxed(&self) -> Box<dyn ProtocolProcessor> {
        Box::new(self.clone())
    }

    pub fn set_fail_start(&self, fail: bool) {
        self.state.fail_start.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_send(&self, fail: bool) {
        self.state.fail_send.store(fail, Ordering::SeqCst);
    }

    pub fn start_count(&self) -> u32 {
        self.state.start_count.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> u32 {
        self.state.stop_count.load(Ordering::SeqCst)
    }

    pub fn node_id(&self) -> NodeId {
        *self.state.node_id.lock()
    }

    pub fn active_objects(&self) -> Vec<RemoteObject> {
        self.state.active_objects.lock().clone()
    }

    /// Everything sent so far
    pub fn sent(&self) -> Vec<Sent> {
        self.state.sent.lock().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.state.sent.lock().len()
    }

    pub fn clear_sent(&self) {
        self.state.sent.lock().clear();
    }

    /// Report a received message to every listener
    pub fn emit(&self, roi: RemoteObjectIdentifier, data: RemoteObjectMessageData) {
        let event = self.event(roi, data);
        for listener in self.state.listeners.read().iter() {
            let _ = listener.send(event.clone());
        }
    }

    /// The event `emit` would report, for synchronous routing
    pub fn event(&self, roi: RemoteObjectIdentifier, data: RemoteObjectMessageData) -> ProcessorEvent {
        ProcessorEvent {
            protocol_id: self.protocol_id,
            protocol_type: self.protocol_type,
            roi,
            data,
        }
    }
}

#[async_trait]
impl ProtocolProcessor for MockProcessor {
    fn protocol_type(&self) -> ProtocolType {
        self.protocol_type
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
        self.protocol_id = protocol_id;
        self.protocol_type = data.protocol_type;
        *self.state.node_id.lock() = node_id;
        if data.uses_active_objects {
            self.set_active_objects(active_objects);
        }
    }

    fn add_listener(&self, listener: mpsc::UnboundedSender<ProcessorEvent>) {
        self.state.listeners.write().push(listener);
    }

    async fn start(&self) -> Result<()> {
        self.state.start_count.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_start.load(Ordering::SeqCst) {
            return Err(BridgeError::ConnectionFailed(format!(
                "mock {} refused to start",
                self.protocol_id
            )));
        }
        self.state.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.state.stop_count.fetch_add(1, Ordering::SeqCst);
        self.state.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.state.running.load(Ordering::SeqCst)
    }

    fn set_active_objects(&self, objects: &[RemoteObject]) {
        *self.state.active_objects.lock() = objects.to_vec();
    }

    fn send_message(&self, roi: RemoteObjectIdentifier, data: &RemoteObjectMessageData) -> Result<()> {
        self.state.sent.lock().push((roi, data.clone()));
        if self.state.fail_send.load(Ordering::SeqCst) {
            return Err(BridgeError::Send(format!("mock {} refused to send", self.protocol_id)));
        }
        Ok(())
    }
}
