use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, trace};
use url::Url;

use super::{Connector, OutboundFrame, TransportError, TransportEvent, TransportLink};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Opens canvas sockets with `tokio-tungstenite` and pumps frames between the
/// socket and a [`TransportLink`].
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    connect_timeout: Duration,
}

impl WebSocketConnector {
    pub fn new() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &Url) -> Result<TransportLink, TransportError> {
        let (ws_stream, _) = tokio::time::timeout(self.connect_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| TransportError::Connect("timed out".into()))?
            .map_err(|err| TransportError::Connect(err.to_string()))?;
        debug!(host = url.host_str().unwrap_or_default(), "websocket established");

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        tokio::spawn(pump(ws_stream, outbound_rx, inbound_tx));

        Ok(TransportLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

async fn pump(
    ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut outbound_rx: mpsc::UnboundedReceiver<OutboundFrame>,
    inbound_tx: mpsc::UnboundedSender<TransportEvent>,
) {
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    loop {
        tokio::select! {
            frame = outbound_rx.recv() => match frame {
                Some(OutboundFrame::Binary(bytes)) => {
                    if let Err(err) = ws_sender.send(Message::Binary(bytes.to_vec())).await {
                        let _ = inbound_tx.send(TransportEvent::Error(err.to_string()));
                        break;
                    }
                }
                Some(OutboundFrame::Close) | None => {
                    let _ = ws_sender.send(Message::Close(None)).await;
                    let _ = ws_sender.close().await;
                    let _ = inbound_tx.send(TransportEvent::Closed {
                        reason: Some("closed by client".into()),
                    });
                    break;
                }
            },
            message = ws_receiver.next() => match message {
                Some(Ok(Message::Binary(data))) => {
                    trace!(len = data.len(), "websocket frame");
                    let _ = inbound_tx.send(TransportEvent::Binary(Bytes::from(data)));
                }
                Some(Ok(Message::Text(text))) => {
                    let _ = inbound_tx.send(TransportEvent::Text(text));
                }
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|frame| frame.reason.to_string())
                        .filter(|reason| !reason.is_empty());
                    let _ = inbound_tx.send(TransportEvent::Closed { reason });
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    let _ = inbound_tx.send(TransportEvent::Error(err.to_string()));
                    break;
                }
                None => {
                    let _ = inbound_tx.send(TransportEvent::Closed { reason: None });
                    break;
                }
            },
        }
    }
}
