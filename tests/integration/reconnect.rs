// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::future_not_send
)]

//! Reconnect tests against the stub server over real sockets.
//!
//! ## Disconnect simulation
//!
//! Aborting the server's `JoinHandle` does not close already-upgraded
//! WebSockets, so a **TCP proxy** sits between the client and the stub.
//! `sever()` aborts every proxied connection (both directions drop at once)
//! while the proxy keeps accepting, so the client's next attempt succeeds.
//! Server-initiated closes use `StubState::close_all_connections`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use url::Url;

use taskwatch::connection::{HeartbeatPolicy, ReconnectPolicy};
use taskwatch::net::{self, SessionOptions, SyncCommand, SyncConfig};
use taskwatch::sink::SyncEvent;
use taskwatch_proto::task::{NewTask, TaskType};
use taskwatch_stub::server::{self, StubState};

// =============================================================================
// TCP Proxy helper
// =============================================================================

/// Forwards traffic from a local port to the stub. `sever()` kills every
/// live connection without stopping the acceptor.
struct TcpProxy {
    addr: SocketAddr,
    accept_handle: JoinHandle<()>,
    conn_handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl TcpProxy {
    async fn new(backend: SocketAddr) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("proxy: failed to bind");
        let addr = listener.local_addr().unwrap();
        let conn_handles: Arc<Mutex<Vec<JoinHandle<()>>>> = Arc::new(Mutex::new(Vec::new()));
        let conn_handles_clone = Arc::clone(&conn_handles);

        let accept_handle = tokio::spawn(async move {
            while let Ok((mut client_stream, _)) = listener.accept().await {
                let conn_handle = tokio::spawn(async move {
                    let Ok(mut backend_stream) = tokio::net::TcpStream::connect(backend).await
                    else {
                        return;
                    };
                    // No sub-tasks, so aborting this task drops both streams.
                    let _ = tokio::io::copy_bidirectional(&mut client_stream, &mut backend_stream)
                        .await;
                });
                conn_handles_clone.lock().push(conn_handle);
            }
        });

        Self {
            addr,
            accept_handle,
            conn_handles,
        }
    }

    /// Drop every proxied connection; new connections are still accepted.
    fn sever(&self) {
        for h in self.conn_handles.lock().drain(..) {
            h.abort();
        }
    }
}

impl Drop for TcpProxy {
    fn drop(&mut self) {
        self.accept_handle.abort();
        self.sever();
    }
}

// =============================================================================
// Helpers
// =============================================================================

async fn start_stub() -> (SocketAddr, Arc<StubState>) {
    let state = Arc::new(StubState::new());
    let (addr, _handle) = server::start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start stub server");
    (addr, state)
}

/// Find a free port by binding to 0 and recording the port.
async fn find_free_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind to port 0");
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    // Brief pause to let the OS release the port.
    tokio::time::sleep(Duration::from_millis(50)).await;
    port
}

fn sync_config(addr: SocketAddr, reconnect: ReconnectPolicy) -> SyncConfig {
    SyncConfig {
        server_url: Url::parse(&format!("http://{addr}")).unwrap(),
        ws_url: Url::parse(&format!("ws://{addr}/ws")).unwrap(),
        connect_timeout: Duration::from_secs(2),
        request_timeout: Duration::from_secs(2),
        session: SessionOptions {
            heartbeat: HeartbeatPolicy::new(Duration::from_secs(30)),
            reconnect,
            ..SessionOptions::default()
        },
    }
}

fn fast_fixed() -> ReconnectPolicy {
    ReconnectPolicy::Fixed {
        interval: Duration::from_millis(100),
    }
}

async fn wait_for_event<F>(
    rx: &mut mpsc::UnboundedReceiver<SyncEvent>,
    description: &str,
    pred: F,
) -> SyncEvent
where
    F: Fn(&SyncEvent) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
    while tokio::time::Instant::now() < deadline {
        let remaining = deadline - tokio::time::Instant::now();
        match tokio::time::timeout(remaining, rx.recv()).await {
            Ok(Some(evt)) if pred(&evt) => return evt,
            Ok(Some(_other)) => {}
            Ok(None) => panic!("channel closed while waiting for {description}"),
            Err(_) => break,
        }
    }
    panic!("timeout waiting for {description}");
}

async fn wait_for_status(rx: &mut mpsc::UnboundedReceiver<SyncEvent>, connected: bool) {
    wait_for_event(rx, &format!("ConnectionStatus {{ connected: {connected} }}"), |e| {
        *e == SyncEvent::ConnectionStatus { connected }
    })
    .await;
}

async fn wait_for_snapshot(rx: &mut mpsc::UnboundedReceiver<SyncEvent>) -> usize {
    match wait_for_event(rx, "snapshot", |e| matches!(e, SyncEvent::SnapshotApplied { .. })).await
    {
        SyncEvent::SnapshotApplied { tasks, .. } => tasks.len(),
        _ => unreachable!(),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn reconnects_after_connection_is_severed() {
    let (stub_addr, state) = start_stub().await;
    let proxy = TcpProxy::new(stub_addr).await;
    let (commands, mut events) = net::spawn_sync(sync_config(proxy.addr, fast_fixed())).unwrap();

    wait_for_status(&mut events, true).await;
    assert_eq!(wait_for_snapshot(&mut events).await, 0);

    proxy.sever();
    wait_for_status(&mut events, false).await;

    // Missed while down; the fresh initial_data brings it in.
    state
        .create_task(NewTask::new("while away", TaskType::Email))
        .unwrap();

    wait_for_event(&mut events, "reconnecting", |e| {
        matches!(e, SyncEvent::Reconnecting { attempt: 1 })
    })
    .await;
    wait_for_status(&mut events, true).await;
    assert_eq!(wait_for_snapshot(&mut events).await, 1);

    commands.send(SyncCommand::Shutdown).await.unwrap();
}

#[tokio::test]
async fn reconnects_after_server_closes_every_socket() {
    let (addr, state) = start_stub().await;
    let (commands, mut events) = net::spawn_sync(sync_config(addr, fast_fixed())).unwrap();

    wait_for_status(&mut events, true).await;
    wait_for_snapshot(&mut events).await;

    for _ in 0..3 {
        state.close_all_connections();
        wait_for_status(&mut events, false).await;
        wait_for_status(&mut events, true).await;
        wait_for_snapshot(&mut events).await;
    }

    // Still live after repeated cycles.
    state
        .create_task(NewTask::new("after cycles", TaskType::ApiCall))
        .unwrap();
    wait_for_event(&mut events, "task update", |e| {
        matches!(e, SyncEvent::TaskChanged { .. })
    })
    .await;

    commands.send(SyncCommand::Shutdown).await.unwrap();
}

#[tokio::test]
async fn keeps_retrying_until_server_appears() {
    let port = find_free_port().await;
    let addr: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
    let (commands, mut events) = net::spawn_sync(sync_config(addr, fast_fixed())).unwrap();

    // Startup attempt and at least two retries fail.
    wait_for_status(&mut events, false).await;
    wait_for_event(&mut events, "second retry", |e| {
        matches!(e, SyncEvent::Reconnecting { attempt } if *attempt >= 2)
    })
    .await;

    let (_bound, _handle) = server::start_server(&addr.to_string())
        .await
        .expect("failed to start stub on the reserved port");
    wait_for_status(&mut events, true).await;
    wait_for_snapshot(&mut events).await;

    commands.send(SyncCommand::Shutdown).await.unwrap();
}

#[tokio::test]
async fn exponential_backoff_still_recovers() {
    let (stub_addr, _state) = start_stub().await;
    let proxy = TcpProxy::new(stub_addr).await;
    let policy = ReconnectPolicy::Exponential {
        initial: Duration::from_millis(50),
        max: Duration::from_millis(400),
        jitter: 0.25,
    };
    let (commands, mut events) = net::spawn_sync(sync_config(proxy.addr, policy)).unwrap();

    wait_for_status(&mut events, true).await;
    proxy.sever();
    wait_for_status(&mut events, false).await;
    wait_for_status(&mut events, true).await;

    commands.send(SyncCommand::Shutdown).await.unwrap();
}
