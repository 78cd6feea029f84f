//! Gateway flow integration tests
//!
//! Admits clients against a scripted remote-console daemon on a local TCP
//! port and bridges them through the room registry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::channel::mpsc as client_mpsc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;

use rg_core::config::GatewayConfig;
use rg_core::traits::{tags, SessionRepository, ShareGrant};
use rg_core::{Permissions, Role};
use rg_gateway::adapters::MemoryBackend;
use rg_gateway::bridge::{BridgeError, ClientHandle, Connection};
use rg_gateway::room::{route_key, NewRoom};
use rg_gateway::server::{admit, SetupError, TunnelParams};
use rg_gateway::tunnel::Tunnel;
use rg_gateway::{GatewayState, Services};
use rg_protocol::Instruction;

const WAIT: Duration = Duration::from_secs(5);

/// Scripted daemon: handshakes every connection, announces the session,
/// pushes one `sync`, then reports everything it receives.
async fn spawn_backend() -> (String, mpsc::UnboundedReceiver<mpsc::UnboundedReceiver<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
    let counter = Arc::new(AtomicUsize::new(0));

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let (tx, rx) = mpsc::unbounded_channel();
            if accepted_tx.send(rx).is_err() {
                break;
            }
            let id = counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(serve_backend(stream, id, tx));
        }
    });

    (address, accepted_rx)
}

async fn read_until(stream: &mut TcpStream, seen: &mut String, done: impl Fn(&str) -> bool) {
    let mut buf = [0u8; 4096];
    while !done(seen) {
        let n = stream.read(&mut buf).await.unwrap();
        assert!(n > 0, "gateway closed during handshake");
        seen.push_str(std::str::from_utf8(&buf[..n]).unwrap());
    }
}

async fn serve_backend(mut stream: TcpStream, id: usize, received: mpsc::UnboundedSender<String>) {
    let mut seen = String::new();
    read_until(&mut stream, &mut seen, |s| s.contains("6.select,") && s.ends_with(';')).await;

    // A join selects the connection it wants to share
    let select = Instruction::parse(seen.as_bytes()).unwrap();
    let connection_id = match select.arg(0) {
        Some(selector) if selector.starts_with('$') => selector.to_string(),
        _ => format!("$conn{}", id),
    };

    stream
        .write_all(b"4.args,13.VERSION_1_5_0,8.hostname;")
        .await
        .unwrap();
    read_until(&mut stream, &mut seen, |s| s.contains("7.connect,") && s.ends_with(';')).await;

    let greeting = [
        Instruction::new("ready", [connection_id]),
        Instruction::new("gw-session", ["server-01"]),
        Instruction::new("sync", ["1000"]),
    ]
    .iter()
    .map(Instruction::encode)
    .collect::<String>();
    stream.write_all(greeting.as_bytes()).await.unwrap();

    let mut buf = [0u8; 4096];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let text = String::from_utf8_lossy(&buf[..n]).into_owned();
                if received.send(text).is_err() {
                    break;
                }
            }
        }
    }
}

/// Accumulate backend input until it contains `needle`
async fn backend_saw(rx: &mut mpsc::UnboundedReceiver<String>, needle: &str) -> String {
    let mut seen = String::new();
    let waited = timeout(WAIT, async {
        while !seen.contains(needle) {
            let chunk = rx.recv().await.expect("backend connection closed");
            seen.push_str(&chunk);
        }
    })
    .await;
    assert!(waited.is_ok(), "backend never received {:?}, got {:?}", needle, seen);
    seen
}

/// Accumulate client output until it contains `needle`
async fn client_saw(rx: &mut mpsc::Receiver<String>, needle: &str) -> String {
    let mut seen = String::new();
    let waited = timeout(WAIT, async {
        while !seen.contains(needle) {
            let chunk = rx.recv().await.expect("client queue closed");
            seen.push_str(&chunk);
        }
    })
    .await;
    assert!(waited.is_ok(), "client never received {:?}, got {:?}", needle, seen);
    seen
}

fn test_state(backend_address: &str, backend: &Arc<MemoryBackend>) -> Arc<GatewayState> {
    let config = GatewayConfig {
        backend_address: backend_address.to_string(),
        socket_timeout: WAIT,
        ..GatewayConfig::default()
    };
    Arc::new(GatewayState::new(
        config,
        Services::with_backend(Arc::clone(backend)),
    ))
}

fn params(pairs: &[(&str, &str)]) -> TunnelParams {
    let query: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    TunnelParams::from_query(query).unwrap()
}

fn owner_params() -> TunnelParams {
    params(&[
        ("userId", "alice@example.com"),
        ("tenantId", "t1"),
        ("appId", "app-1"),
        ("appName", "Finance Desktop"),
        ("recording", "1"),
    ])
}

fn joiner_params(session_id: &str) -> TunnelParams {
    params(&[
        ("userId", "bob@example.com"),
        ("tenantId", "t1"),
        ("appId", "app-1"),
        ("shareSessionId", session_id),
    ])
}

async fn grant(backend: &MemoryBackend, session_id: &str, user_id: &str, permissions: &str) {
    backend
        .share_session(&ShareGrant {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            tenant_id: "t1".to_string(),
            permissions: permissions.to_string(),
        })
        .await
        .unwrap();
}

/// Persist the grant and give the user a seat in the room
async fn invite(
    state: &GatewayState,
    backend: &MemoryBackend,
    session_id: &str,
    user_id: &str,
    permissions: &str,
) {
    grant(backend, session_id, user_id, permissions).await;
    state
        .rooms
        .add_invitee(session_id, user_id, Permissions::parse(permissions))
        .unwrap();
}

type Incoming = client_mpsc::UnboundedSender<Result<String, BridgeError>>;

/// Run the bridge for an admitted connection in the background
fn bridge(
    state: &Arc<GatewayState>,
    connection: Connection,
    tunnel: Tunnel,
) -> (Incoming, tokio::task::JoinHandle<Result<(), BridgeError>>) {
    let (tx, incoming) = client_mpsc::unbounded();
    let bridge = state.bridge.clone();
    let task = tokio::spawn(async move { bridge.run(connection, tunnel, incoming).await });
    (tx, task)
}

fn audit_tags(backend: &MemoryBackend) -> Vec<String> {
    backend.audit_events().into_iter().map(|e| e.tag).collect()
}

#[tokio::test]
async fn test_owner_lifecycle() {
    let (address, mut accepted) = spawn_backend().await;
    let backend = Arc::new(MemoryBackend::new());
    let state = test_state(&address, &backend);

    let (client, mut client_rx) = ClientHandle::new();
    let (connection, tunnel) = admit(&state, &owner_params(), &client).await.unwrap();
    let session_id = connection.context.session_id().to_string();

    assert_eq!(session_id, tunnel.id().to_string());
    assert_eq!(tunnel.connection_id(), Some("$conn0"));
    assert!(state.rooms.get(&session_id).is_some());
    assert!(state.sessions.contains(&session_id));
    assert_eq!(
        backend.active_session(&session_id).map(|s| s.user_id),
        Some("alice@example.com".to_string())
    );
    assert_eq!(
        backend.route(&route_key(&session_id)),
        Some(state.config.advertised_address.clone())
    );

    let mut backend_rx = accepted.recv().await.unwrap();
    let (incoming, task) = bridge(&state, connection, tunnel);

    // The session notice is consumed, everything else reaches the client
    let output = client_saw(&mut client_rx, "4.sync,4.1000;").await;
    assert!(!output.contains("gw-session"));
    assert!(audit_tags(&backend).contains(&tags::OPEN.to_string()));

    incoming
        .unbounded_send(Ok("5.mouse,2.10,2.20,1.1;".to_string()))
        .unwrap();
    incoming
        .unbounded_send(Ok("3.key,5.65307,1.1;".to_string()))
        .unwrap();
    let seen = backend_saw(&mut backend_rx, "3.key,5.65307,1.1;").await;
    assert!(seen.starts_with("5.mouse,2.10,2.20,1.1;"));

    incoming.unbounded_send(Err(BridgeError::ClientClosed)).unwrap();
    timeout(WAIT, task).await.unwrap().unwrap().unwrap();

    // The host was the only privileged participant, so the room closed
    assert!(state.rooms.get(&session_id).is_none());
    assert!(!state.sessions.contains(&session_id));
    assert_eq!(backend.deleted_sessions(), vec![session_id.clone()]);
    assert_eq!(backend.route(&route_key(&session_id)), None);

    let recordings = backend.queued_recordings();
    assert_eq!(recordings.len(), 1);
    assert_eq!(recordings[0].session_id, session_id);
    assert_eq!(recordings[0].app_name, "Finance Desktop");

    let tags = audit_tags(&backend);
    assert!(tags.contains(&tags::EXIT.to_string()));
    assert!(!tags.contains(&tags::LEAVE.to_string()));
}

#[tokio::test]
async fn test_shared_viewer_input_is_gated() {
    let (address, mut accepted) = spawn_backend().await;
    let backend = Arc::new(MemoryBackend::new());
    let state = test_state(&address, &backend);

    let (alice, mut alice_rx) = ClientHandle::new();
    let (connection, tunnel) = admit(&state, &owner_params(), &alice).await.unwrap();
    let session_id = connection.context.session_id().to_string();
    let _alice_backend = accepted.recv().await.unwrap();
    let (alice_in, alice_task) = bridge(&state, connection, tunnel);

    invite(&state, &backend, &session_id, "bob@example.com", "mouse").await;
    let (bob, _bob_rx) = ClientHandle::new();
    let (connection, tunnel) = admit(&state, &joiner_params(&session_id), &bob)
        .await
        .unwrap();

    assert_eq!(tunnel.connection_id(), Some("$conn0"));
    assert_eq!(connection.room_creator, "alice@example.com");
    assert_eq!(connection.participant.role(), Role::Viewer);
    assert!(connection.recording.is_none());
    client_saw(&mut alice_rx, "bob@example.com").await;

    let mut bob_backend = accepted.recv().await.unwrap();
    let (bob_in, bob_task) = bridge(&state, connection, tunnel);

    bob_in
        .unbounded_send(Ok("3.key,5.65307,1.1;".to_string()))
        .unwrap();
    bob_in
        .unbounded_send(Ok("4.size,4.1920,4.1080;".to_string()))
        .unwrap();
    bob_in
        .unbounded_send(Ok("5.mouse,1.5,1.6,1.0;".to_string()))
        .unwrap();
    let seen = backend_saw(&mut bob_backend, "5.mouse,1.5,1.6,1.0;").await;
    assert_eq!(seen, "5.mouse,1.5,1.6,1.0;");

    // A second connection for the same user is refused
    let (again, _again_rx) = ClientHandle::new();
    let err = admit(&state, &joiner_params(&session_id), &again)
        .await
        .unwrap_err();
    assert_eq!(err.code(), 0x0205);

    bob_in.unbounded_send(Err(BridgeError::ClientClosed)).unwrap();
    timeout(WAIT, bob_task).await.unwrap().unwrap().unwrap();

    let leaves: Vec<_> = backend
        .audit_events()
        .into_iter()
        .filter(|e| e.tag == tags::LEAVE)
        .collect();
    assert_eq!(leaves.len(), 1);
    assert_eq!(leaves[0].user_id, "bob@example.com");
    assert!(state.rooms.get(&session_id).is_some());

    alice_in.unbounded_send(Err(BridgeError::ClientClosed)).unwrap();
    timeout(WAIT, alice_task).await.unwrap().unwrap().unwrap();
    assert!(state.rooms.get(&session_id).is_none());
}

#[tokio::test]
async fn test_host_reconnects_while_cohost_holds_room() {
    let (address, mut accepted) = spawn_backend().await;
    let backend = Arc::new(MemoryBackend::new());
    let state = test_state(&address, &backend);

    let (alice, _alice_rx) = ClientHandle::new();
    let (connection, tunnel) = admit(&state, &owner_params(), &alice).await.unwrap();
    let session_id = connection.context.session_id().to_string();
    let _alice_backend = accepted.recv().await.unwrap();
    let (alice_in, alice_task) = bridge(&state, connection, tunnel);

    invite(&state, &backend, &session_id, "bob@example.com", "admin").await;
    let (bob, _bob_rx) = ClientHandle::new();
    let (connection, tunnel) = admit(&state, &joiner_params(&session_id), &bob)
        .await
        .unwrap();
    assert_eq!(connection.participant.role(), Role::CoHost);
    let _bob_backend = accepted.recv().await.unwrap();
    let (bob_in, bob_task) = bridge(&state, connection, tunnel);

    alice_in.unbounded_send(Err(BridgeError::ClientClosed)).unwrap();
    timeout(WAIT, alice_task).await.unwrap().unwrap().unwrap();
    assert!(state.rooms.get(&session_id).is_some());

    let (alice, _alice_rx) = ClientHandle::new();
    let (connection, tunnel) = admit(&state, &owner_params(), &alice).await.unwrap();
    assert_eq!(connection.context.session_id(), session_id);
    assert_eq!(connection.participant.role(), Role::Host);
    assert_eq!(tunnel.connection_id(), Some("$conn0"));
    assert_eq!(state.rooms.len(), 1);

    bob_in.unbounded_send(Err(BridgeError::ClientClosed)).unwrap();
    timeout(WAIT, bob_task).await.unwrap().unwrap().unwrap();
    drop(connection);
    tunnel.close().await;
}

#[tokio::test]
async fn test_share_refusals() {
    let backend = Arc::new(MemoryBackend::new());
    let state = test_state("127.0.0.1:1", &backend);
    let (bob, _rx) = ClientHandle::new();

    let err = admit(&state, &joiner_params("s-unknown"), &bob)
        .await
        .unwrap_err();
    assert!(matches!(err, SetupError::NotInvited { .. }));
    assert_eq!(err.code(), 0x0303);

    grant(&backend, "s-gone", "bob@example.com", "mouse").await;
    let err = admit(&state, &joiner_params("s-gone"), &bob)
        .await
        .unwrap_err();
    assert_eq!(err.code(), 0x0204);
    assert_eq!(
        err.instruction().args.last().map(String::as_str),
        Some("516")
    );

    // A persisted grant without a seat in the room does not admit
    let (alice, _alice_rx) = ClientHandle::new();
    state
        .rooms
        .create_room(
            NewRoom {
                session_id: "s-full".to_string(),
                creator_id: "alice@example.com".to_string(),
                app_id: "app-1".to_string(),
                app_name: "app-1".to_string(),
                backend_connection_id: "$conn".to_string(),
                sharing_allowed: true,
                recording: None,
            },
            alice,
        )
        .unwrap();
    grant(&backend, "s-full", "bob@example.com", "admin").await;
    let err = admit(&state, &joiner_params("s-full"), &bob)
        .await
        .unwrap_err();
    assert!(matches!(err, SetupError::NotInvited { .. }));
    assert!(!state.rooms.get("s-full").unwrap().is_connected("bob@example.com"));
}

#[tokio::test]
async fn test_backend_unreachable() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);

    let backend = Arc::new(MemoryBackend::new());
    let state = test_state(&address, &backend);
    let (client, _rx) = ClientHandle::new();

    let err = admit(&state, &owner_params(), &client).await.unwrap_err();
    assert!(matches!(err, SetupError::Tunnel(_)));
    assert_eq!(err.code(), 0x0203);
    assert_eq!(state.rooms.len(), 0);
    assert!(state.sessions.is_empty());
}

#[tokio::test]
async fn test_side_channel_share_then_join() {
    let (address, mut accepted) = spawn_backend().await;
    let backend = Arc::new(MemoryBackend::new());
    let state = test_state(&address, &backend);

    let (alice, mut alice_rx) = ClientHandle::new();
    let (connection, tunnel) = admit(&state, &owner_params(), &alice).await.unwrap();
    let session_id = connection.context.session_id().to_string();
    let mut alice_backend = accepted.recv().await.unwrap();
    let (alice_in, alice_task) = bridge(&state, connection, tunnel);
    client_saw(&mut alice_rx, "4.sync,").await;

    // Pings are echoed without reaching the backend
    alice_in
        .unbounded_send(Ok("0.,4.ping,13.1700000000000;".to_string()))
        .unwrap();
    client_saw(&mut alice_rx, "0.,4.ping,13.1700000000000;").await;

    let command = Instruction::new(
        "gw-cmd",
        ["7", "share-session", "bob@example.com:keyboard,mouse"],
    );
    alice_in.unbounded_send(Ok(command.encode())).unwrap();
    let output = client_saw(&mut alice_rx, "7.gw-resp,1.7,").await;
    assert!(output.contains(r#""status":"200""#));
    assert_eq!(
        backend
            .grant(&session_id, "bob@example.com")
            .map(|g| g.permissions),
        Some("keyboard,mouse".to_string())
    );

    let (bob, _bob_rx) = ClientHandle::new();
    let (connection, tunnel) = admit(&state, &joiner_params(&session_id), &bob)
        .await
        .unwrap();
    assert!(connection.participant.grants().keyboard);
    assert!(connection.participant.grants().mouse);
    let _bob_backend = accepted.recv().await.unwrap();
    let (bob_in, bob_task) = bridge(&state, connection, tunnel);

    // Neither the command nor the ping was forwarded
    alice_in
        .unbounded_send(Ok("5.mouse,1.1,1.1,1.0;".to_string()))
        .unwrap();
    let seen = backend_saw(&mut alice_backend, "5.mouse,").await;
    assert_eq!(seen, "5.mouse,1.1,1.1,1.0;");

    bob_in.unbounded_send(Err(BridgeError::ClientClosed)).unwrap();
    alice_in.unbounded_send(Err(BridgeError::ClientClosed)).unwrap();
    timeout(WAIT, bob_task).await.unwrap().unwrap().unwrap();
    timeout(WAIT, alice_task).await.unwrap().unwrap().unwrap();
    assert_eq!(state.rooms.len(), 0);
}
