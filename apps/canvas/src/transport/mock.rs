//! In-memory connector for exercising the connection manager without sockets.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use url::Url;

use super::{Connector, OutboundFrame, TransportError, TransportEvent, TransportLink};

/// What the next connection attempt should do.
#[derive(Debug)]
pub enum MockOutcome {
    Accept,
    Refuse(String),
    /// Accept once the paired sender fires (or is dropped).
    AcceptAfter(oneshot::Receiver<()>),
}

#[derive(Debug, Clone)]
pub struct MockAttempt {
    pub url: Url,
    pub at: Instant,
}

#[derive(Debug)]
struct MockState {
    plan: VecDeque<MockOutcome>,
    refuse_by_default: bool,
    attempts: Vec<MockAttempt>,
    peers: mpsc::UnboundedSender<MockPeer>,
}

#[derive(Debug, Clone)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
}

/// Test-side handle: receives a [`MockPeer`] for every accepted connection.
#[derive(Debug)]
pub struct MockServer {
    state: Arc<Mutex<MockState>>,
    peers: mpsc::UnboundedReceiver<MockPeer>,
}

impl MockConnector {
    pub fn new() -> (Self, MockServer) {
        let (peers_tx, peers_rx) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(MockState {
            plan: VecDeque::new(),
            refuse_by_default: false,
            attempts: Vec::new(),
            peers: peers_tx,
        }));
        (
            Self {
                state: Arc::clone(&state),
            },
            MockServer {
                state,
                peers: peers_rx,
            },
        )
    }

    /// Queue the outcome of a future attempt. Unplanned attempts are accepted
    /// unless [`MockConnector::refuse_by_default`] was set.
    pub fn push_outcome(&self, outcome: MockOutcome) {
        self.state.lock().plan.push_back(outcome);
    }

    pub fn refuse_by_default(&self, refuse: bool) {
        self.state.lock().refuse_by_default = refuse;
    }
}

impl MockServer {
    pub async fn next_peer(&mut self) -> Option<MockPeer> {
        self.peers.recv().await
    }

    pub fn attempts(&self) -> Vec<MockAttempt> {
        self.state.lock().attempts.clone()
    }

    pub fn attempt_count(&self) -> usize {
        self.state.lock().attempts.len()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, url: &Url) -> Result<TransportLink, TransportError> {
        let outcome = {
            let mut state = self.state.lock();
            state.attempts.push(MockAttempt {
                url: url.clone(),
                at: Instant::now(),
            });
            match state.plan.pop_front() {
                Some(outcome) => outcome,
                None if state.refuse_by_default => MockOutcome::Refuse("connection refused".into()),
                None => MockOutcome::Accept,
            }
        };

        match outcome {
            MockOutcome::Accept => {}
            MockOutcome::Refuse(reason) => return Err(TransportError::Connect(reason)),
            MockOutcome::AcceptAfter(gate) => {
                let _ = gate.await;
            }
        }

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let peer = MockPeer {
            url: url.clone(),
            to_client: inbound_tx,
            from_client: outbound_rx,
        };
        let _ = self.state.lock().peers.send(peer);
        Ok(TransportLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

/// Server end of one accepted mock connection.
#[derive(Debug)]
pub struct MockPeer {
    pub url: Url,
    to_client: mpsc::UnboundedSender<TransportEvent>,
    from_client: mpsc::UnboundedReceiver<OutboundFrame>,
}

impl MockPeer {
    pub fn send_binary(&self, frame: impl Into<Bytes>) -> bool {
        self.to_client
            .send(TransportEvent::Binary(frame.into()))
            .is_ok()
    }

    pub fn send_text(&self, text: &str) -> bool {
        self.to_client
            .send(TransportEvent::Text(text.to_string()))
            .is_ok()
    }

    /// Server-initiated close.
    pub fn close(self, reason: Option<&str>) {
        let _ = self.to_client.send(TransportEvent::Closed {
            reason: reason.map(str::to_string),
        });
    }

    pub fn fail(self, error: &str) {
        let _ = self.to_client.send(TransportEvent::Error(error.to_string()));
    }

    /// Next frame written by the client; `None` once the client dropped its end.
    pub async fn recv(&mut self) -> Option<OutboundFrame> {
        self.from_client.recv().await
    }

    /// Whether the client has closed or dropped its end of the link.
    pub fn client_gone(&mut self) -> bool {
        loop {
            match self.from_client.try_recv() {
                Ok(OutboundFrame::Close) => return true,
                Ok(OutboundFrame::Binary(_)) => continue,
                Err(mpsc::error::TryRecvError::Empty) => return false,
                Err(mpsc::error::TryRecvError::Disconnected) => return true,
            }
        }
    }
}
