//! Integration tests for the network transports.
//!
//! Every test talks to a listener on 127.0.0.1; nothing leaves the host.

use relay_core::{
    signal_channel, BackendStatus, Dispatcher, EventSink, RelayConfig, Signal, SignalReceiver,
    Transport, TransportEvent, TransportOptions,
};
use relay_transports::{default_registry, CLOUD_QUEUE, MQTT, TCP, UDP};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, UdpSocket};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

fn transport(protocol: &str, options: Value) -> (Box<dyn Transport>, SignalReceiver) {
    let registry = default_registry();
    let factory = registry.get(protocol).unwrap();
    let options = TransportOptions {
        destination: "test".to_string(),
        options: options.as_object().cloned().unwrap(),
        reconnect_interval: Duration::from_secs(1),
    };
    factory.validate(&options).unwrap();

    let (tx, rx) = signal_channel();
    let transport = factory.create(&options, EventSink::new(1, tx)).unwrap();
    (transport, rx)
}

async fn next_event(signals: &mut SignalReceiver) -> TransportEvent {
    match timeout(WAIT, signals.recv()).await {
        Ok(Some(Signal::Transport { generation, event })) => {
            assert_eq!(generation, 1);
            event
        }
        other => panic!("expected a transport event, got {other:?}"),
    }
}

/// Port that nothing is listening on.
async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

// =============================================================================
// TCP
// =============================================================================

#[tokio::test]
async fn test_tcp_sends_newline_delimited_messages() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let (mut tcp, mut signals) = transport(TCP, json!({ "host": "127.0.0.1", "port": port }));
    tcp.connect().await;
    let (mut peer, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    assert_eq!(next_event(&mut signals).await, TransportEvent::Connected);

    tcp.send(b"first").await.unwrap();
    tcp.send(b"second").await.unwrap();
    tcp.close().await;

    let mut received = String::new();
    timeout(WAIT, peer.read_to_string(&mut received))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, "first\nsecond\n");
}

#[tokio::test]
async fn test_tcp_without_newline() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let (mut tcp, mut signals) = transport(
        TCP,
        json!({ "host": "127.0.0.1", "port": port, "appendNewline": false }),
    );
    tcp.connect().await;
    let (mut peer, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    assert_eq!(next_event(&mut signals).await, TransportEvent::Connected);

    tcp.send(b"ab").await.unwrap();
    tcp.send(b"cd").await.unwrap();
    tcp.close().await;

    let mut received = String::new();
    timeout(WAIT, peer.read_to_string(&mut received))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, "abcd");
}

#[tokio::test]
async fn test_tcp_refused_reports_failed() {
    let port = closed_port().await;
    let (mut tcp, mut signals) = transport(TCP, json!({ "host": "127.0.0.1", "port": port }));

    tcp.connect().await;
    assert!(matches!(
        next_event(&mut signals).await,
        TransportEvent::Failed { .. }
    ));
    assert!(tcp.send(b"nobody home").await.is_err());
}

#[tokio::test]
async fn test_tcp_peer_close_reports_disconnected() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let (mut tcp, mut signals) = transport(TCP, json!({ "host": "127.0.0.1", "port": port }));
    tcp.connect().await;
    let (peer, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    assert_eq!(next_event(&mut signals).await, TransportEvent::Connected);

    drop(peer);
    assert!(matches!(
        next_event(&mut signals).await,
        TransportEvent::Disconnected { .. }
    ));
    assert!(tcp.send(b"too late").await.is_err());
}

#[tokio::test]
async fn test_tcp_write_to_stalled_peer_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let (mut tcp, mut signals) = transport(
        TCP,
        json!({ "host": "127.0.0.1", "port": port, "writeTimeoutMs": 200 }),
    );
    tcp.connect().await;
    // Accepted but never read from, so the socket buffers fill up.
    let (_peer, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    assert_eq!(next_event(&mut signals).await, TransportEvent::Connected);

    let large = vec![b'x'; 64 * 1024 * 1024];
    let result = timeout(WAIT, tcp.send(&large))
        .await
        .expect("send should give up at the write timeout");
    assert!(result.unwrap_err().to_string().contains("timed out"));

    assert!(matches!(
        next_event(&mut signals).await,
        TransportEvent::Disconnected { .. }
    ));
    assert!(tcp.send(b"after").await.is_err());
}

#[tokio::test]
async fn test_tcp_rejects_missing_port() {
    let registry = default_registry();
    let options = TransportOptions {
        destination: "test".to_string(),
        options: json!({ "host": "127.0.0.1" }).as_object().cloned().unwrap(),
        reconnect_interval: Duration::from_secs(1),
    };
    assert!(registry.get(TCP).unwrap().validate(&options).is_err());
}

#[tokio::test]
async fn test_dispatcher_delivers_queued_messages_over_tcp() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let config = RelayConfig::from_json_str(
        &json!({
            "destinations": {
                "collector": { "proto": "tcp", "host": "127.0.0.1", "port": port }
            }
        })
        .to_string(),
    )
    .unwrap();
    let dispatcher = Dispatcher::from_config(&config, &default_registry()).unwrap();

    // The first send queues and starts the connection.
    dispatcher.send("collector", b"one".to_vec()).unwrap();
    dispatcher.send("collector", b"two".to_vec()).unwrap();
    dispatcher.send("collector", b"three".to_vec()).unwrap();

    let (mut peer, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    let mut received = Vec::new();
    let mut chunk = [0u8; 64];
    while received != b"one\ntwo\nthree\n" {
        let n = timeout(WAIT, peer.read(&mut chunk)).await.unwrap().unwrap();
        assert!(n > 0, "connection closed early: {:?}", String::from_utf8_lossy(&received));
        received.extend_from_slice(&chunk[..n]);
    }

    let snapshot = &dispatcher.snapshots().await[0];
    assert_eq!(snapshot.status, BackendStatus::Connected);
    assert_eq!(snapshot.queued, 0);

    dispatcher.shutdown().await;
}

// =============================================================================
// UDP
// =============================================================================

#[tokio::test]
async fn test_udp_sends_one_datagram_per_message() {
    let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = receiver.local_addr().unwrap().port();

    let (mut udp, mut signals) = transport(
        UDP,
        json!({ "host": "127.0.0.1", "port": port, "bindAddr": "127.0.0.1:0" }),
    );
    udp.connect().await;
    assert_eq!(next_event(&mut signals).await, TransportEvent::Connected);

    udp.send(b"ping").await.unwrap();
    udp.send(b"pong").await.unwrap();

    let mut buf = [0u8; 64];
    let n = timeout(WAIT, receiver.recv(&mut buf)).await.unwrap().unwrap();
    assert_eq!(&buf[..n], b"ping");
    let n = timeout(WAIT, receiver.recv(&mut buf)).await.unwrap().unwrap();
    assert_eq!(&buf[..n], b"pong");
}

#[tokio::test]
async fn test_udp_send_before_connect_fails() {
    let (mut udp, _signals) = transport(UDP, json!({ "host": "127.0.0.1", "port": 9 }));
    assert!(udp.send(b"early").await.is_err());
}

// =============================================================================
// Cloud queue (HTTP)
// =============================================================================

/// Accept one HTTP request, answer with `status`, return (head, body).
async fn serve_once(listener: TcpListener, status: &'static str) -> (String, String) {
    let (mut stream, _) = listener.accept().await.unwrap();
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];

    let (head_end, content_length) = loop {
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "client closed before sending a request");
        buf.extend_from_slice(&chunk[..n]);

        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..pos]).to_string();
            let length = head
                .lines()
                .filter_map(|line| line.split_once(':'))
                .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            break (pos + 4, length);
        }
    };

    while buf.len() < head_end + content_length {
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "client closed mid-body");
        buf.extend_from_slice(&chunk[..n]);
    }

    let response = format!("HTTP/1.1 {status}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
    stream.write_all(response.as_bytes()).await.unwrap();

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let body = String::from_utf8_lossy(&buf[head_end..head_end + content_length]).to_string();
    (head, body)
}

#[tokio::test]
async fn test_cloud_queue_posts_message_body() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = tokio::spawn(serve_once(listener, "200 OK"));

    let (mut queue, mut signals) = transport(
        CLOUD_QUEUE,
        json!({
            "queueUrl": format!("http://127.0.0.1:{port}/queues/events"),
            "authToken": "secret",
            "timeoutSecs": 5
        }),
    );
    queue.connect().await;
    assert_eq!(next_event(&mut signals).await, TransportEvent::Connected);

    queue.send(b"hello queue").await.unwrap();

    let (head, body) = timeout(WAIT, server).await.unwrap().unwrap();
    assert!(head.starts_with("POST /queues/events HTTP/1.1"));
    assert!(head.to_lowercase().contains("authorization: bearer secret"));
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body, json!({ "messageBody": "hello queue" }));
}

#[tokio::test]
async fn test_cloud_queue_keeps_non_utf8_bytes() {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = tokio::spawn(serve_once(listener, "200 OK"));

    let (mut queue, mut signals) = transport(
        CLOUD_QUEUE,
        json!({ "queueUrl": format!("http://127.0.0.1:{port}/q"), "timeoutSecs": 5 }),
    );
    queue.connect().await;
    assert_eq!(next_event(&mut signals).await, TransportEvent::Connected);

    let message = [0xff, 0xfe, b'a'];
    queue.send(&message).await.unwrap();

    let (_, body) = timeout(WAIT, server).await.unwrap().unwrap();
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["messageEncoding"], "base64");
    let decoded = BASE64.decode(body["messageBody"].as_str().unwrap()).unwrap();
    assert_eq!(decoded, message);
}

#[tokio::test]
async fn test_cloud_queue_error_status_fails_send() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = tokio::spawn(serve_once(listener, "503 Service Unavailable"));

    let (mut queue, mut signals) = transport(
        "sqs",
        json!({ "queueUrl": format!("http://127.0.0.1:{port}/q"), "timeoutSecs": 5 }),
    );
    queue.connect().await;
    assert_eq!(next_event(&mut signals).await, TransportEvent::Connected);

    let err = queue.send(b"rejected").await.unwrap_err();
    assert!(err.to_string().contains("503"));
    timeout(WAIT, server).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_cloud_queue_unreachable_fails_send() {
    let port = closed_port().await;
    let (mut queue, mut signals) = transport(
        CLOUD_QUEUE,
        json!({ "queueUrl": format!("http://127.0.0.1:{port}/q"), "timeoutSecs": 5 }),
    );
    queue.connect().await;
    assert_eq!(next_event(&mut signals).await, TransportEvent::Connected);

    assert!(queue.send(b"lost").await.is_err());
}

// =============================================================================
// MQTT
// =============================================================================

#[tokio::test]
async fn test_mqtt_refused_reports_failed() {
    let port = closed_port().await;
    let (mut mqtt, mut signals) = transport(
        MQTT,
        json!({ "host": "127.0.0.1", "port": port, "topic": "relay/test" }),
    );

    mqtt.connect().await;
    assert!(matches!(
        next_event(&mut signals).await,
        TransportEvent::Failed { .. }
    ));
    mqtt.close().await;
}
