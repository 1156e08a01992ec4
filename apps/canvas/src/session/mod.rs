//! Socket lifecycle for one logical canvas session.
//!
//! [`ConnectionManager`] owns the reconnect state machine and fans decoded
//! server messages out to [`ConnectionObserver`]s in transport order.

use std::time::Duration;

use crate::protocol::ServerMessage;
use crate::transport::TransportError;

pub mod backoff;
pub mod manager;

pub use backoff::ReconnectPolicy;
pub use manager::{ConnectionManager, SubscriptionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("unable to connect after {attempts} attempts")]
    Terminal { attempts: u32 },
}

impl ConnectionError {
    /// Terminal errors stop automatic retries until the connection is reset.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionError::Terminal { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectionState {
    pub phase: Phase,
    pub reconnect_attempt: u32,
    pub last_error: Option<ConnectionError>,
    /// Delay of the currently scheduled retry, if any.
    pub next_retry: Option<Duration>,
}

impl ConnectionState {
    pub fn is_open(&self) -> bool {
        self.phase == Phase::Open
    }

    pub fn is_terminal(&self) -> bool {
        self.last_error
            .as_ref()
            .is_some_and(ConnectionError::is_terminal)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    StateChanged(ConnectionState),
    Message(ServerMessage),
}

/// Receives state changes and decoded messages from a [`ConnectionManager`].
///
/// Called on the connection task; implementations must not block.
pub trait ConnectionObserver: Send + Sync {
    fn on_event(&self, event: &ConnectionEvent);
}
