use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use canvas_client_core::auth::SessionToken;
use canvas_client_core::client::CanvasSession;
use canvas_client_core::config::AppConfig;
use canvas_client_core::protocol::{
    GridBuffer, PixelUpdate, ServerMessage, TAG_PIXEL_UPDATE, WireConfig, encode_server_message,
};
use canvas_client_core::session::{ConnectionState, Phase};
use canvas_client_core::transport::WebSocketConnector;
use parking_lot::Mutex;

const GRID_SIZE: usize = 4;

#[derive(Clone, Default)]
struct ServerState {
    connections: Arc<AtomicUsize>,
    tokens: Arc<Mutex<Vec<String>>>,
    /// Close each socket right after the snapshot when set.
    drop_after_snapshot: bool,
}

fn wire() -> WireConfig {
    WireConfig::new(GRID_SIZE, 16)
}

fn frame(message: ServerMessage) -> WsMessage {
    WsMessage::Binary(encode_server_message(&message, &wire()))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<ServerState>,
) -> impl IntoResponse {
    state
        .tokens
        .lock()
        .push(params.get("token").cloned().unwrap_or_default());
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: ServerState) {
    let connection = state.connections.fetch_add(1, Ordering::SeqCst) + 1;
    let cells = (0..GRID_SIZE * GRID_SIZE).map(|i| (i % 16) as u8).collect();
    let snapshot = GridBuffer::from_cells(GRID_SIZE, cells).expect("snapshot");
    if socket.send(frame(ServerMessage::State(snapshot))).await.is_err() {
        return;
    }
    if state.drop_after_snapshot && connection == 1 {
        let _ = socket.close().await;
        return;
    }
    let _ = socket
        .send(frame(ServerMessage::ConnectedClients(connection as u32 + 2)))
        .await;
    let _ = socket.send(WsMessage::Binary(vec![0x63, 0x00])).await;
    let _ = socket
        .send(frame(ServerMessage::PixelUpdate(PixelUpdate {
            x: 3,
            y: 3,
            color: 9,
            timestamp_ms: 1_700_000_000_000,
        })))
        .await;

    // Echo draw requests back as stamped pixel updates.
    while let Some(Ok(message)) = socket.recv().await {
        if let WsMessage::Binary(data) = message {
            if let [TAG_PIXEL_UPDATE, x, y, color] = data[..] {
                let update = PixelUpdate {
                    x: x as u32,
                    y: y as u32,
                    color,
                    timestamp_ms: 1_700_000_000_001,
                };
                if socket
                    .send(frame(ServerMessage::PixelUpdate(update)))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        }
    }
}

async fn spawn_server(state: ServerState) -> SocketAddr {
    let router = Router::new()
        .route("/ws", get(ws_handler))
        .with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });
    addr
}

fn session_for(addr: SocketAddr) -> CanvasSession {
    let config = AppConfig {
        grid_size: GRID_SIZE,
        websocket_url: format!("ws://{addr}/ws"),
        ..AppConfig::default()
    };
    let connector = WebSocketConnector::new().with_connect_timeout(Duration::from_secs(2));
    CanvasSession::new(config, Arc::new(connector)).expect("session")
}

async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check().await {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[test_timeout::tokio_timeout_test]
async fn snapshot_updates_and_draw_round_trip() {
    let state = ServerState::default();
    let addr = spawn_server(state.clone()).await;
    let session = session_for(addr);
    session.connect(SessionToken::Public);

    let grid = session.grid().clone();
    eventually("snapshot and pixel update", || {
        let grid = grid.clone();
        async move { grid.cell(3, 3) == Some(9) && grid.cell(1, 0) == Some(1) }
    })
    .await;
    assert_eq!(session.presence().viewers(), 3);
    assert!(session.manager().state().is_open());
    assert_eq!(state.tokens.lock().as_slice(), ["public".to_string()]);

    assert_eq!(session.place_pixel(2, 1, 12), Ok(true));
    eventually("echoed draw", || {
        let grid = grid.clone();
        async move { grid.cell(2, 1) == Some(12) }
    })
    .await;

    session.disconnect();
    assert_eq!(session.manager().state().phase, Phase::Closed);
    assert_eq!(session.place_pixel(0, 0, 1), Ok(false));
}

#[test_timeout::tokio_timeout_test]
async fn reconnects_after_server_close() {
    let state = ServerState {
        drop_after_snapshot: true,
        ..ServerState::default()
    };
    let addr = spawn_server(state.clone()).await;
    let session = session_for(addr);
    let mut states = session.manager().watch_state();
    session.connect(SessionToken::bearer("viewer-token", None));

    let retry = states
        .wait_for(|state: &ConnectionState| state.next_retry.is_some())
        .await
        .expect("retry scheduled")
        .clone();
    assert_eq!(retry.reconnect_attempt, 1);
    assert_eq!(retry.next_retry, Some(Duration::from_secs(1)));

    let grid = session.grid().clone();
    eventually("second connection", || {
        let grid = grid.clone();
        async move { grid.cell(3, 3) == Some(9) }
    })
    .await;
    let open = session.manager().state();
    assert!(open.is_open());
    assert_eq!(open.reconnect_attempt, 0);
    assert_eq!(state.connections.load(Ordering::SeqCst), 2);
    assert_eq!(
        state.tokens.lock().as_slice(),
        ["viewer-token".to_string(), "viewer-token".to_string()]
    );
    session.disconnect();
}
