use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use url::Url;

pub mod mock;
pub mod websocket;

pub use websocket::WebSocketConnector;

/// Something the socket reported after the connection opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Binary(Bytes),
    Text(String),
    Closed { reason: Option<String> },
    Error(String),
}

/// Frames travelling from the client to the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Binary(Bytes),
    Close,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("socket error: {0}")]
    Socket(String),
    #[error("connection closed: {}", .reason.as_deref().unwrap_or("no reason given"))]
    Closed { reason: Option<String> },
}

/// Both halves of an established connection.
///
/// Dropping `outbound` (or sending [`OutboundFrame::Close`]) closes the socket.
/// The socket side ends `inbound` after reporting `Closed` or `Error`.
#[derive(Debug)]
pub struct TransportLink {
    pub outbound: mpsc::UnboundedSender<OutboundFrame>,
    pub inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Opens sockets for the connection manager. Swapped for
/// [`mock::MockConnector`] in tests so the state machine runs without a network.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &Url) -> Result<TransportLink, TransportError>;
}
