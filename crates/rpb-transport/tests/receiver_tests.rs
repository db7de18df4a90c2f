//! Sender-aware receiver tests (rpb-transport)
//!
//! Tests for the shared receive ports:
//! - Realtime and message-loop delivery with sender address
//! - Format error handling
//! - Port sharing and release

use rosc::{OscMessage, OscPacket, OscType};
use rpb_transport::receiver::{is_port_bound, port_ref_count};
use rpb_transport::{FormatError, SenderAwareReceiver};
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

fn ping_bytes() -> Vec<u8> {
    rosc::encoder::encode(&OscPacket::Message(OscMessage {
        addr: "/ping".to_string(),
        args: vec![OscType::Int(1)],
    }))
    .unwrap()
}

async fn wait_until(check: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn test_message_listener_gets_sender_address() {
    let receiver = SenderAwareReceiver::connect(0).await.expect("bind");
    let port = receiver.port();
    let (tx, mut rx) = mpsc::unbounded_channel();
    receiver.add_message_listener(tx);

    let client = UdpSocket::bind("127.0.0.1:0").unwrap();
    client.send_to(&ping_bytes(), ("127.0.0.1", port)).unwrap();

    let received = timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out")
        .expect("channel closed");

    assert_eq!(received.sender, client.local_addr().unwrap());
    assert_eq!(received.sender_port(), client.local_addr().unwrap().port());
    match received.packet {
        OscPacket::Message(msg) => {
            assert_eq!(msg.addr, "/ping");
            assert_eq!(msg.args, vec![OscType::Int(1)]);
        }
        _ => panic!("Expected message"),
    }

    receiver.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_realtime_listener_called_inline() {
    let receiver = SenderAwareReceiver::connect(0).await.unwrap();
    let port = receiver.port();
    let hits = Arc::new(AtomicUsize::new(0));
    let seen_from = Arc::new(parking_lot::Mutex::new(None::<SocketAddr>));

    let hits_clone = hits.clone();
    let seen_clone = seen_from.clone();
    receiver.add_realtime_listener(Arc::new(move |_packet: &OscPacket, from: SocketAddr| {
        hits_clone.fetch_add(1, Ordering::SeqCst);
        *seen_clone.lock() = Some(from);
    }));

    let client = UdpSocket::bind("127.0.0.1:0").unwrap();
    client.send_to(&ping_bytes(), ("127.0.0.1", port)).unwrap();

    assert!(wait_until(|| hits.load(Ordering::SeqCst) == 1).await);
    assert_eq!(*seen_from.lock(), Some(client.local_addr().unwrap()));

    receiver.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_malformed_packet_goes_to_format_handler_only() {
    let receiver = SenderAwareReceiver::connect(0).await.unwrap();
    let port = receiver.port();

    let delivered = Arc::new(AtomicUsize::new(0));
    let errors = Arc::new(AtomicUsize::new(0));
    let delivered_clone = delivered.clone();
    receiver.add_realtime_listener(Arc::new(move |_: &OscPacket, _: SocketAddr| {
        delivered_clone.fetch_add(1, Ordering::SeqCst);
    }));
    let errors_clone = errors.clone();
    receiver.set_format_error_handler(Some(Arc::new(move |data: &[u8], err: &FormatError| {
        assert_eq!(data, b"/abc\0\0\0\0");
        assert_eq!(*err, FormatError::MissingTypeTags);
        errors_clone.fetch_add(1, Ordering::SeqCst);
    })));

    let client = UdpSocket::bind("127.0.0.1:0").unwrap();
    client.send_to(b"/abc\0\0\0\0", ("127.0.0.1", port)).unwrap();
    // a valid packet afterwards proves the first one was processed
    client.send_to(&ping_bytes(), ("127.0.0.1", port)).unwrap();

    assert!(wait_until(|| delivered.load(Ordering::SeqCst) == 1).await);
    assert_eq!(errors.load(Ordering::SeqCst), 1);

    receiver.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_short_datagrams_are_ignored() {
    let receiver = SenderAwareReceiver::connect(0).await.unwrap();
    let port = receiver.port();
    let errors = Arc::new(AtomicUsize::new(0));
    let delivered = Arc::new(AtomicUsize::new(0));

    let errors_clone = errors.clone();
    receiver.set_format_error_handler(Some(Arc::new(move |_: &[u8], _: &FormatError| {
        errors_clone.fetch_add(1, Ordering::SeqCst);
    })));
    let delivered_clone = delivered.clone();
    receiver.add_realtime_listener(Arc::new(move |_: &OscPacket, _: SocketAddr| {
        delivered_clone.fetch_add(1, Ordering::SeqCst);
    }));

    let client = UdpSocket::bind("127.0.0.1:0").unwrap();
    client.send_to(b"/a", ("127.0.0.1", port)).unwrap();
    client.send_to(&ping_bytes(), ("127.0.0.1", port)).unwrap();

    assert!(wait_until(|| delivered.load(Ordering::SeqCst) == 1).await);
    assert_eq!(errors.load(Ordering::SeqCst), 0);

    receiver.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_port_is_shared_and_released() {
    let first = SenderAwareReceiver::connect(0).await.unwrap();
    let port = first.port();
    let second = SenderAwareReceiver::connect(port).await.unwrap();

    assert_eq!(port_ref_count(port), 2);
    assert_eq!(second.local_addr(), first.local_addr());

    let (tx_a, mut rx_a) = mpsc::unbounded_channel();
    let (tx_b, mut rx_b) = mpsc::unbounded_channel();
    first.add_message_listener(tx_a);
    second.add_message_listener(tx_b);

    let client = UdpSocket::bind("127.0.0.1:0").unwrap();
    client.send_to(&ping_bytes(), ("127.0.0.1", port)).unwrap();

    assert!(timeout(Duration::from_secs(2), rx_a.recv()).await.unwrap().is_some());
    assert!(timeout(Duration::from_secs(2), rx_b.recv()).await.unwrap().is_some());

    first.disconnect().await.unwrap();
    assert!(is_port_bound(port));
    assert_eq!(port_ref_count(port), 1);

    // the released handle's listener is gone, the remaining one still receives
    client.send_to(&ping_bytes(), ("127.0.0.1", port)).unwrap();
    assert!(timeout(Duration::from_secs(2), rx_b.recv()).await.unwrap().is_some());
    assert!(rx_a.recv().await.is_none());

    second.disconnect().await.unwrap();
    assert!(!is_port_bound(port));

    // the socket is closed, so the port can be bound again
    let rebound = UdpSocket::bind(("0.0.0.0", port));
    assert!(rebound.is_ok());
}

#[tokio::test]
async fn test_dropped_handle_releases_port() {
    let receiver = SenderAwareReceiver::connect(0).await.unwrap();
    let port = receiver.port();
    drop(receiver);
    assert!(!is_port_bound(port));
}

#[tokio::test]
async fn test_bind_conflict_reports_error() {
    let blocker = UdpSocket::bind("0.0.0.0:0").unwrap();
    let port = blocker.local_addr().unwrap().port();

    let result = SenderAwareReceiver::connect(port).await;
    assert!(result.is_err());
    assert!(!is_port_bound(port));
}

#[tokio::test]
async fn test_removed_listener_stops_receiving() {
    let receiver = SenderAwareReceiver::connect(0).await.unwrap();
    let port = receiver.port();
    let hits = Arc::new(AtomicUsize::new(0));
    let (tx, mut rx) = mpsc::unbounded_channel();

    let hits_clone = hits.clone();
    let id = receiver.add_realtime_listener(Arc::new(move |_: &OscPacket, _: SocketAddr| {
        hits_clone.fetch_add(1, Ordering::SeqCst);
    }));
    receiver.add_message_listener(tx);
    receiver.remove_listener(id);

    let client = UdpSocket::bind("127.0.0.1:0").unwrap();
    client.send_to(&ping_bytes(), ("127.0.0.1", port)).unwrap();

    // the remaining listener proves the packet was dispatched
    assert!(timeout(Duration::from_secs(2), rx.recv()).await.unwrap().is_some());
    assert_eq!(hits.load(Ordering::SeqCst), 0);

    receiver.disconnect().await.unwrap();
}
