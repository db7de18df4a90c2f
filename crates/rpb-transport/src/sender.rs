//! Outbound OSC over UDP

use rosc::{OscMessage, OscPacket};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::net::UdpSocket;
use tracing::{debug, info};

use crate::codec;
use crate::error::{Result, TransportError};

/// UDP sender bound to an ephemeral local port, targeting one remote endpoint
///
/// Sends are non-blocking and may be issued from synchronous code.
pub struct OscSender {
    socket: UdpSocket,
    target: SocketAddr,
    resolved: Vec<IpAddr>,
}

impl OscSender {
    /// Resolve `host:port` and open a socket for sending to it
    ///
    /// IPv4 addresses are preferred, since receive ports bind IPv4.
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("{}:{}: {}", host, port, e)))?
            .collect();
        let target = addrs
            .iter()
            .find(|addr| addr.is_ipv4())
            .or_else(|| addrs.first())
            .copied()
            .ok_or_else(|| {
                TransportError::ConnectionFailed(format!("{}:{} did not resolve", host, port))
            })?;

        let local = match target.ip() {
            IpAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            IpAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
        };
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        info!("OSC sender targeting {}", target);

        let mut resolved: Vec<IpAddr> = addrs.iter().map(|addr| addr.ip()).collect();
        resolved.dedup();
        Ok(Self {
            socket,
            target,
            resolved,
        })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    /// Every address the host resolved to
    pub fn resolved_ips(&self) -> &[IpAddr] {
        &self.resolved
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr().map_err(TransportError::Io)
    }

    /// Encode and send a packet without waiting
    pub fn send_packet(&self, packet: &OscPacket) -> Result<()> {
        let bytes = codec::encode(packet)?;
        self.socket
            .try_send_to(&bytes, self.target)
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        debug!("Sent {} bytes to {}", bytes.len(), self.target);
        Ok(())
    }

    pub fn send_message(&self, message: OscMessage) -> Result<()> {
        self.send_packet(&OscPacket::Message(message))
    }
}
