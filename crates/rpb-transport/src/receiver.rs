//! Sender-aware UDP receiver
//!
//! One socket and one receive task exist per bound port, shared by every
//! handle connected to that port through a process-wide registry. Each
//! decoded packet is delivered together with the address it came from.
//!
//! Listeners come in two flavours:
//! - realtime listeners run inline on the receive task and must not block
//! - message-loop listeners get packets through an unbounded channel and
//!   consume them serialized on their own task

use parking_lot::{Mutex, RwLock};
use rosc::OscPacket;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::codec::{self, FormatError, MIN_PACKET_SIZE};
use crate::error::{Result, TransportError};

/// Receiver configuration
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// Local interface to bind
    pub bind_ip: IpAddr,
    /// Upper bound for one wait on the socket, so shutdown is noticed
    pub read_timeout: Duration,
    /// Upper bound for waiting on the receive task when the port is released
    pub join_timeout: Duration,
    /// Receive buffer size
    pub max_packet_size: usize,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            read_timeout: Duration::from_millis(100),
            join_timeout: Duration::from_secs(10),
            max_packet_size: 65507, // Max UDP payload
        }
    }
}

/// A decoded packet with its origin
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedPacket {
    pub packet: OscPacket,
    pub sender: SocketAddr,
}

impl ReceivedPacket {
    pub fn sender_ip(&self) -> IpAddr {
        self.sender.ip()
    }

    pub fn sender_port(&self) -> u16 {
        self.sender.port()
    }
}

/// Listener invoked directly on the receive task
pub trait PacketListener: Send + Sync {
    fn on_packet(&self, packet: &OscPacket, sender: SocketAddr);
}

impl<F> PacketListener for F
where
    F: Fn(&OscPacket, SocketAddr) + Send + Sync,
{
    fn on_packet(&self, packet: &OscPacket, sender: SocketAddr) {
        self(packet, sender)
    }
}

/// Handler receiving the raw bytes of every buffer that fails to decode
pub type FormatErrorHandler = Arc<dyn Fn(&[u8], &FormatError) + Send + Sync>;

/// Handle to a registered listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

enum Listener {
    Realtime(Arc<dyn PacketListener>),
    MessageLoop(mpsc::UnboundedSender<ReceivedPacket>),
}

/// State shared between the handles of one port and its receive task
struct PortShared {
    running: Mutex<bool>,
    listeners: RwLock<Vec<(ListenerId, Listener)>>,
    format_error_handler: RwLock<Option<FormatErrorHandler>>,
    local_addr: SocketAddr,
}

impl PortShared {
    fn dispatch(&self, data: &[u8], sender: SocketAddr) {
        let packet = match codec::decode(data) {
            Ok(packet) => packet,
            Err(e) => {
                match self.format_error_handler.read().as_ref() {
                    Some(handler) => handler(data, &e),
                    None => debug!("Discarding malformed packet from {}: {}", sender, e),
                }
                return;
            }
        };

        for (_, listener) in self.listeners.read().iter() {
            match listener {
                Listener::Realtime(listener) => listener.on_packet(&packet, sender),
                Listener::MessageLoop(tx) => {
                    let _ = tx.send(ReceivedPacket {
                        packet: packet.clone(),
                        sender,
                    });
                }
            }
        }
    }
}

struct PortEntry {
    refs: usize,
    shared: Arc<PortShared>,
    task: Option<JoinHandle<()>>,
    join_timeout: Duration,
}

fn registry() -> &'static Mutex<HashMap<u16, PortEntry>> {
    static REGISTRY: OnceLock<Mutex<HashMap<u16, PortEntry>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

fn next_listener_id() -> ListenerId {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    ListenerId(NEXT.fetch_add(1, Ordering::Relaxed))
}

/// Whether a receive socket is currently bound on `port`
pub fn is_port_bound(port: u16) -> bool {
    registry().lock().contains_key(&port)
}

/// Number of handles currently sharing `port`
pub fn port_ref_count(port: u16) -> usize {
    registry().lock().get(&port).map(|entry| entry.refs).unwrap_or(0)
}

/// Handle on a shared, reference-counted receive port
pub struct SenderAwareReceiver {
    port: u16,
    shared: Arc<PortShared>,
    own_listeners: Mutex<Vec<ListenerId>>,
    released: bool,
}

impl SenderAwareReceiver {
    /// Connect to `port` with default settings; port 0 binds an ephemeral port
    pub async fn connect(port: u16) -> Result<Self> {
        Self::connect_with_config(port, ReceiverConfig::default()).await
    }

    /// Connect to `port`, binding it if no other handle holds it yet
    ///
    /// The config only applies when this call performs the bind.
    pub async fn connect_with_config(port: u16, config: ReceiverConfig) -> Result<Self> {
        let mut ports = registry().lock();

        if port != 0 {
            if let Some(entry) = ports.get_mut(&port) {
                entry.refs += 1;
                debug!("Sharing receive port {} ({} handles)", port, entry.refs);
                return Ok(Self::attach(port, entry.shared.clone()));
            }
        }

        let std_socket = std::net::UdpSocket::bind(SocketAddr::new(config.bind_ip, port))
            .map_err(|source| TransportError::BindFailed { port, source })?;
        std_socket.set_nonblocking(true)?;
        let socket = UdpSocket::from_std(std_socket)?;
        let local_addr = socket.local_addr()?;
        let bound_port = local_addr.port();

        let shared = Arc::new(PortShared {
            running: Mutex::new(true),
            listeners: RwLock::new(Vec::new()),
            format_error_handler: RwLock::new(None),
            local_addr,
        });

        let task = tokio::spawn(receive_loop(
            socket,
            shared.clone(),
            config.read_timeout,
            config.max_packet_size,
        ));

        info!("Receiver bound to {}", local_addr);

        ports.insert(
            bound_port,
            PortEntry {
                refs: 1,
                shared: shared.clone(),
                task: Some(task),
                join_timeout: config.join_timeout,
            },
        );

        Ok(Self::attach(bound_port, shared))
    }

    fn attach(port: u16, shared: Arc<PortShared>) -> Self {
        Self {
            port,
            shared,
            own_listeners: Mutex::new(Vec::new()),
            released: false,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.shared.local_addr
    }

    /// Register a listener called inline on the receive task
    pub fn add_realtime_listener(&self, listener: Arc<dyn PacketListener>) -> ListenerId {
        self.add_listener(Listener::Realtime(listener))
    }

    /// Register a channel that receives every packet for serialized processing
    pub fn add_message_listener(&self, tx: mpsc::UnboundedSender<ReceivedPacket>) -> ListenerId {
        self.add_listener(Listener::MessageLoop(tx))
    }

    fn add_listener(&self, listener: Listener) -> ListenerId {
        let id = next_listener_id();
        self.shared.listeners.write().push((id, listener));
        self.own_listeners.lock().push(id);
        id
    }

    pub fn remove_listener(&self, id: ListenerId) {
        self.shared.listeners.write().retain(|(lid, _)| *lid != id);
        self.own_listeners.lock().retain(|lid| *lid != id);
    }

    /// Replace the format error handler of the port; `None` restores discarding
    pub fn set_format_error_handler(&self, handler: Option<FormatErrorHandler>) {
        *self.shared.format_error_handler.write() = handler;
    }

    /// Release this handle; the last handle of a port closes the socket and
    /// waits for its receive task to finish
    pub async fn disconnect(mut self) -> Result<()> {
        let finished = self.release();
        if let Some((task, join_timeout)) = finished {
            match tokio::time::timeout(join_timeout, task).await {
                Ok(_) => info!("Receiver on port {} closed", self.port),
                Err(_) => {
                    warn!("Receive task on port {} did not stop in time", self.port);
                    return Err(TransportError::Timeout);
                }
            }
        }
        Ok(())
    }

    /// Drop this handle's listeners and reference; returns the receive task
    /// to join when this was the last reference
    fn release(&mut self) -> Option<(JoinHandle<()>, Duration)> {
        if self.released {
            return None;
        }
        self.released = true;

        let own: Vec<ListenerId> = std::mem::take(&mut *self.own_listeners.lock());
        self.shared
            .listeners
            .write()
            .retain(|(id, _)| !own.contains(id));

        let mut ports = registry().lock();
        let last = match ports.get_mut(&self.port) {
            Some(entry) => {
                entry.refs -= 1;
                entry.refs == 0
            }
            None => false,
        };
        if !last {
            return None;
        }

        let mut entry = ports.remove(&self.port)?;
        *entry.shared.running.lock() = false;
        entry.task.take().map(|task| (task, entry.join_timeout))
    }
}

impl Drop for SenderAwareReceiver {
    fn drop(&mut self) {
        // No way to join here; aborting closes the socket without waiting
        // for the next read timeout
        if let Some((task, _)) = self.release() {
            task.abort();
        }
    }
}

async fn receive_loop(
    socket: UdpSocket,
    shared: Arc<PortShared>,
    read_timeout: Duration,
    max_packet_size: usize,
) {
    let mut buf = vec![0u8; max_packet_size];

    while *shared.running.lock() {
        match tokio::time::timeout(read_timeout, socket.recv_from(&mut buf)).await {
            Err(_) => continue,
            Ok(Ok((len, from))) => {
                if len >= MIN_PACKET_SIZE {
                    shared.dispatch(&buf[..len], from);
                }
            }
            Ok(Err(e)) => {
                // ICMP errors from earlier sends surface here on some platforms
                error!("UDP receive error on {}: {}", shared.local_addr, e);
            }
        }
    }

    debug!("Receive loop on {} stopped", shared.local_addr);
}
