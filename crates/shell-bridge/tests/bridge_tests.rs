//! End-to-end bridge tests over mock transports and in-memory channels.

use std::sync::Arc;
use std::time::Duration;

use shell_bridge::mock::{MemoryChannelPeer, MockConnect, MockTransport, PeerFrame, memory_channel};
use shell_bridge::{
    BridgeConfig, CloseReason, ConnectError, CredentialDescriptor, Envelope, HostDescriptor,
    HostKind, MemoryCredentialStore, MemoryHostRegistry, SessionBridge, SessionEnd, SessionKey,
    SessionState,
};

const HOST_ID: u64 = 1;
const CREDENTIAL_ID: u64 = 7;

fn test_bridge(connector: Arc<MockConnect>) -> SessionBridge {
    let hosts = MemoryHostRegistry::new().with(
        HostDescriptor::baremetal(HOST_ID, "10.0.0.5").port(22),
    );
    let credentials = MemoryCredentialStore::new().with(CredentialDescriptor::ssh_key(
        CREDENTIAL_ID,
        "ops",
        "-----BEGIN TEST KEY-----",
    ));
    SessionBridge::new(Arc::new(hosts), Arc::new(credentials))
        .with_connector(connector)
        .with_config(BridgeConfig::new().poll_interval(Duration::from_millis(20)))
}

/// Poll until `condition` holds, failing after a bound.
async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

async fn next_frame(peer: &mut MemoryChannelPeer) -> PeerFrame {
    tokio::time::timeout(Duration::from_secs(5), peer.recv())
        .await
        .expect("no frame in time")
        .expect("channel ended unexpectedly")
}

#[tokio::test]
async fn streams_input_to_the_transport_verbatim() {
    let connector = Arc::new(MockConnect::new());
    let transport = MockTransport::new();
    connector.push(transport.clone());
    let bridge = Arc::new(test_bridge(Arc::clone(&connector)));

    let (channel, mut peer) = memory_channel(32);
    let session = bridge
        .open(SessionKey::new(HOST_ID, CREDENTIAL_ID, 0), channel)
        .await
        .unwrap();
    assert_eq!(session.state(), SessionState::Connecting);

    let run_bridge = Arc::clone(&bridge);
    let handle = tokio::spawn(async move { run_bridge.run(session).await });

    peer.send(r#"{"data":"ls\n"}"#).await.unwrap();
    wait_for(|| !transport.written().is_empty()).await;
    assert_eq!(transport.written(), b"ls\n");

    transport.push_output(b"total 0\n");
    let frame = next_frame(&mut peer).await;
    assert_eq!(frame.envelope(), Some(Envelope::data("total 0\n")));

    peer.disconnect();
    let end = handle.await.unwrap().unwrap();
    assert_eq!(end, SessionEnd::ClientDisconnect);
    assert_eq!(transport.shutdown_count(), 1);
}

#[tokio::test]
async fn forwards_output_in_read_order() {
    let connector = Arc::new(MockConnect::new());
    let transport = MockTransport::new();
    connector.push(transport.clone());
    let bridge = test_bridge(Arc::clone(&connector));

    let (channel, mut peer) = memory_channel(32);
    let handle =
        tokio::spawn(
            async move { bridge.serve(SessionKey::new(HOST_ID, CREDENTIAL_ID, 0), channel).await },
        );

    for chunk in [b"one ".as_slice(), b"two ", b"three"] {
        transport.push_output(chunk);
    }
    transport.signal_eof();

    let mut collected = String::new();
    loop {
        match next_frame(&mut peer).await {
            PeerFrame::Frame(text) => {
                let Some(Envelope::Data { data }) = serde_json::from_str(&text).ok() else {
                    panic!("unexpected frame: {text}");
                };
                collected.push_str(&data);
            }
            PeerFrame::Closed(reason) => {
                assert_eq!(reason, CloseReason::Done);
                break;
            }
        }
    }
    assert_eq!(collected, "one two three");

    let end = handle.await.unwrap().unwrap();
    assert_eq!(end, SessionEnd::TransportEof);
}

#[tokio::test]
async fn unknown_host_sends_one_error_envelope_and_no_dial() {
    let connector = Arc::new(MockConnect::new());
    let bridge = test_bridge(Arc::clone(&connector));

    let (channel, mut peer) = memory_channel(32);
    let err = bridge
        .serve(SessionKey::new(9999, CREDENTIAL_ID, 0), channel)
        .await
        .unwrap_err();
    assert!(err.is_lookup());

    let frame = next_frame(&mut peer).await;
    let Some(Envelope::Error { error }) = frame.envelope() else {
        panic!("expected error envelope, got {frame:?}");
    };
    assert!(error.contains("9999"));

    assert_eq!(
        peer.recv().await,
        Some(PeerFrame::Closed(CloseReason::Failed))
    );
    assert_eq!(peer.recv().await, None);
    assert_eq!(connector.connect_count(), 0);
}

#[tokio::test]
async fn unknown_credential_is_a_lookup_error() {
    let connector = Arc::new(MockConnect::new());
    let bridge = test_bridge(Arc::clone(&connector));

    let (channel, mut peer) = memory_channel(32);
    let err = bridge
        .serve(SessionKey::new(HOST_ID, 4242, 0), channel)
        .await
        .unwrap_err();
    assert!(err.is_lookup());

    let frame = next_frame(&mut peer).await;
    assert!(matches!(frame.envelope(), Some(Envelope::Error { .. })));
    assert_eq!(connector.connect_count(), 0);
}

#[tokio::test]
async fn unsupported_host_kind_is_rejected_before_dialing() {
    let connector = Arc::new(MockConnect::new());
    let mut host = HostDescriptor::baremetal(HOST_ID, "10.0.0.5");
    host.kind = HostKind::Unknown;
    let hosts = MemoryHostRegistry::new().with(host);
    let credentials = MemoryCredentialStore::new().with(CredentialDescriptor::ssh_key(
        CREDENTIAL_ID,
        "ops",
        "key",
    ));
    let bridge = SessionBridge::new(Arc::new(hosts), Arc::new(credentials))
        .with_connector(Arc::clone(&connector));

    let (channel, mut peer) = memory_channel(32);
    let err = bridge
        .serve(SessionKey::new(HOST_ID, CREDENTIAL_ID, 0), channel)
        .await
        .unwrap_err();
    assert!(err.is_unsupported_kind());

    let Some(Envelope::Error { error }) = next_frame(&mut peer).await.envelope() else {
        panic!("expected error envelope");
    };
    assert!(error.contains("unsupported host kind"));
    assert_eq!(
        peer.recv().await,
        Some(PeerFrame::Closed(CloseReason::Failed))
    );
    assert_eq!(connector.connect_count(), 0);
}

#[tokio::test]
async fn dial_failure_surfaces_the_cause() {
    let connector = Arc::new(MockConnect::new());
    connector.fail_next(ConnectError::timeout(Duration::from_secs(10)));
    let bridge = test_bridge(Arc::clone(&connector));

    let (channel, mut peer) = memory_channel(32);
    let err = bridge
        .serve(SessionKey::new(HOST_ID, CREDENTIAL_ID, 0), channel)
        .await
        .unwrap_err();
    assert!(err.is_connect());

    let Some(Envelope::Error { error }) = next_frame(&mut peer).await.envelope() else {
        panic!("expected error envelope");
    };
    assert!(error.contains("timed out"));
    assert_eq!(
        peer.recv().await,
        Some(PeerFrame::Closed(CloseReason::Failed))
    );
    assert_eq!(connector.connect_count(), 1);
}

#[tokio::test]
async fn malformed_frames_are_dropped_without_ending_the_session() {
    let connector = Arc::new(MockConnect::new());
    let transport = MockTransport::new();
    connector.push(transport.clone());
    let bridge = test_bridge(Arc::clone(&connector));

    let (channel, mut peer) = memory_channel(32);
    let handle =
        tokio::spawn(
            async move { bridge.serve(SessionKey::new(HOST_ID, CREDENTIAL_ID, 0), channel).await },
        );

    peer.send("this is not json").await.unwrap();
    peer.send(r#"{"data":"whoami\n"}"#).await.unwrap();

    wait_for(|| !transport.written().is_empty()).await;
    assert_eq!(transport.written(), b"whoami\n");

    // Still healthy: output continues to flow.
    transport.push_output(b"ops\n");
    let frame = next_frame(&mut peer).await;
    assert_eq!(frame.envelope(), Some(Envelope::data("ops\n")));

    peer.disconnect();
    assert_eq!(handle.await.unwrap().unwrap(), SessionEnd::ClientDisconnect);
}

#[tokio::test]
async fn transport_eof_closes_without_error_envelope() {
    let connector = Arc::new(MockConnect::new());
    let transport = MockTransport::new();
    connector.push(transport.clone());
    let bridge = test_bridge(Arc::clone(&connector));

    let (channel, mut peer) = memory_channel(32);
    let handle =
        tokio::spawn(
            async move { bridge.serve(SessionKey::new(HOST_ID, CREDENTIAL_ID, 0), channel).await },
        );

    transport.signal_eof();

    assert_eq!(
        next_frame(&mut peer).await,
        PeerFrame::Closed(CloseReason::Done)
    );
    assert_eq!(peer.recv().await, None);

    assert_eq!(handle.await.unwrap().unwrap(), SessionEnd::TransportEof);
    assert_eq!(transport.shutdown_count(), 1);
}

#[tokio::test]
async fn read_failure_sends_error_envelope_then_closes() {
    let connector = Arc::new(MockConnect::new());
    let transport = MockTransport::new();
    connector.push(transport.clone());
    let bridge = test_bridge(Arc::clone(&connector));

    let (channel, mut peer) = memory_channel(32);
    let handle =
        tokio::spawn(
            async move { bridge.serve(SessionKey::new(HOST_ID, CREDENTIAL_ID, 0), channel).await },
        );

    transport.fail_reads("connection reset by peer");

    let Some(Envelope::Error { error }) = next_frame(&mut peer).await.envelope() else {
        panic!("expected error envelope");
    };
    assert!(error.contains("connection reset by peer"));
    assert_eq!(
        peer.recv().await,
        Some(PeerFrame::Closed(CloseReason::Failed))
    );

    let err = handle.await.unwrap().unwrap_err();
    assert!(err.is_stream());
    assert_eq!(transport.shutdown_count(), 1);
}

#[tokio::test]
async fn client_disconnect_closes_the_transport_once() {
    let connector = Arc::new(MockConnect::new());
    let transport = MockTransport::new();
    connector.push(transport.clone());
    let bridge = test_bridge(Arc::clone(&connector));

    let (channel, mut peer) = memory_channel(32);
    let handle =
        tokio::spawn(
            async move { bridge.serve(SessionKey::new(HOST_ID, CREDENTIAL_ID, 0), channel).await },
        );

    // Let the session reach streaming before hanging up.
    transport.push_output(b"$ ");
    let _prompt = next_frame(&mut peer).await;

    peer.disconnect();
    assert_eq!(handle.await.unwrap().unwrap(), SessionEnd::ClientDisconnect);
    assert_eq!(connector.connect_count(), 1);
    assert_eq!(transport.shutdown_count(), 1);
}

#[tokio::test]
async fn invalid_utf8_output_is_replaced_not_rejected() {
    let connector = Arc::new(MockConnect::new());
    let transport = MockTransport::new();
    connector.push(transport.clone());
    let bridge = test_bridge(Arc::clone(&connector));

    let (channel, mut peer) = memory_channel(32);
    let handle =
        tokio::spawn(
            async move { bridge.serve(SessionKey::new(HOST_ID, CREDENTIAL_ID, 0), channel).await },
        );

    transport.push_output(&[b'o', b'k', 0xff, b'!']);
    let Some(Envelope::Data { data }) = next_frame(&mut peer).await.envelope() else {
        panic!("expected data envelope");
    };
    assert_eq!(data, "ok\u{fffd}!");

    peer.disconnect();
    handle.await.unwrap().unwrap();
}
