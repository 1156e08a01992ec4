use std::sync::Arc;
use std::time::Duration;

use canvas_client_core::auth::SessionToken;
use canvas_client_core::client::CanvasSession;
use canvas_client_core::config::AppConfig;
use canvas_client_core::protocol::{
    GridBuffer, PixelUpdate, ServerMessage, TAG_STATE, WireConfig, encode_server_message,
    pack_nibbles,
};
use canvas_client_core::session::{ConnectionError, ConnectionState};
use canvas_client_core::transport::mock::{MockConnector, MockServer};
use canvas_client_core::viewport::{Viewport, ZoomDirection};

fn config(grid_size: usize, colors: usize) -> AppConfig {
    AppConfig {
        grid_size,
        colors: (0..colors).map(|i| format!("#{i:06X}")).collect(),
        websocket_url: "ws://canvas.test/ws".into(),
        max_reconnect_attempts: 2,
        ..AppConfig::default()
    }
}

fn session(config: AppConfig) -> (CanvasSession, MockConnector, MockServer) {
    let (connector, server) = MockConnector::new();
    let session = CanvasSession::new(config, Arc::new(connector.clone())).expect("session");
    (session, connector, server)
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(5)).await;
}

#[test_timeout::tokio_timeout_test(paused)]
async fn pixel_updates_apply_in_arrival_order() {
    let (session, _connector, mut server) = session(config(4, 16));
    let wire = session.manager().wire_config();
    session.connect(SessionToken::Public);
    let peer = server.next_peer().await.expect("peer");

    peer.send_binary(encode_server_message(
        &ServerMessage::State(GridBuffer::blank(4)),
        &wire,
    ));
    for color in 1..=15u8 {
        peer.send_binary(encode_server_message(
            &ServerMessage::PixelUpdate(PixelUpdate {
                x: 2,
                y: 1,
                color,
                timestamp_ms: color as u64,
            }),
            &wire,
        ));
    }
    settle().await;

    let grid = session.grid();
    assert_eq!(grid.cell(2, 1), Some(15));
    assert_eq!(grid.version(), 16);
    assert_eq!(grid.buffer().cells().iter().filter(|&&c| c != 0).count(), 1);
}

#[test_timeout::tokio_timeout_test(paused)]
async fn packed_snapshot_feeds_grid_and_viewport_lookup() {
    let (session, _connector, mut server) = session(config(4, 16));
    session.connect(SessionToken::Public);
    let peer = server.next_peer().await.expect("peer");

    let cells: Vec<u8> = (0..16).rev().collect();
    let mut frame = vec![TAG_STATE];
    frame.extend(pack_nibbles(&cells));
    peer.send_binary(frame);
    settle().await;

    let mut viewport = Viewport::new(4, 400.0);
    assert_eq!(session.pixel_at(&viewport, 10.0, 10.0), Some(((0, 0), 15)));
    for _ in 0..20 {
        viewport.zoom_at(400.0, 400.0, ZoomDirection::In);
    }
    assert_eq!(session.pixel_at(&viewport, 399.0, 399.0), Some(((3, 3), 0)));
}

#[test_timeout::tokio_timeout_test(paused)]
async fn rejected_frames_leave_grid_and_connection_alone() {
    let (session, _connector, mut server) = session(config(4, 8));
    let wire = WireConfig::new(4, 16);
    session.connect(SessionToken::Public);
    let peer = server.next_peer().await.expect("peer");

    peer.send_binary(encode_server_message(
        &ServerMessage::PixelUpdate(PixelUpdate {
            x: 1,
            y: 1,
            color: 5,
            timestamp_ms: 0,
        }),
        &wire,
    ));
    // Palette has 8 entries: color 12 and the out-of-range cell are both dropped.
    peer.send_binary(encode_server_message(
        &ServerMessage::PixelUpdate(PixelUpdate {
            x: 1,
            y: 1,
            color: 12,
            timestamp_ms: 1,
        }),
        &wire,
    ));
    peer.send_binary(encode_server_message(
        &ServerMessage::PixelUpdate(PixelUpdate {
            x: 9,
            y: 0,
            color: 2,
            timestamp_ms: 2,
        }),
        &wire,
    ));
    peer.send_binary(vec![TAG_STATE, 0x12]);
    peer.send_binary(Vec::<u8>::new());
    settle().await;

    assert_eq!(session.grid().cell(1, 1), Some(5));
    assert_eq!(session.grid().version(), 1);
    assert!(session.manager().state().is_open());
}

#[test_timeout::tokio_timeout_test(paused)]
async fn exhausted_retries_need_explicit_reset() {
    let (session, connector, mut server) = session(config(4, 16));
    connector.refuse_by_default(true);
    let mut states = session.manager().watch_state();
    session.connect(SessionToken::Public);

    let terminal = states
        .wait_for(ConnectionState::is_terminal)
        .await
        .expect("state")
        .clone();
    assert_eq!(
        terminal.last_error,
        Some(ConnectionError::Terminal { attempts: 2 })
    );
    assert_eq!(server.attempt_count(), 3);

    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(server.attempt_count(), 3);

    connector.refuse_by_default(false);
    session.manager().reset_connection();
    let _peer = server.next_peer().await.expect("peer");
    states
        .wait_for(ConnectionState::is_open)
        .await
        .expect("state");
    assert_eq!(session.manager().state().reconnect_attempt, 0);
}
