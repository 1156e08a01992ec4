use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::protocol::ServerMessage;
use crate::session::{ConnectionEvent, ConnectionObserver};

/// Viewer count and the most recent server-reported error.
#[derive(Debug, Default)]
pub struct Presence {
    viewers: AtomicU32,
    last_error: Mutex<Option<String>>,
}

impl Presence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn viewers(&self) -> u32 {
        self.viewers.load(Ordering::Acquire)
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    pub fn clear_error(&self) {
        self.last_error.lock().take();
    }
}

impl ConnectionObserver for Presence {
    fn on_event(&self, event: &ConnectionEvent) {
        match event {
            ConnectionEvent::Message(ServerMessage::ConnectedClients(count)) => {
                debug!(viewers = count, "viewer count");
                self.viewers.store(*count, Ordering::Release);
            }
            ConnectionEvent::Message(ServerMessage::Error(reason)) => {
                warn!(%reason, "server reported error");
                *self.last_error.lock() = Some(reason.clone());
            }
            ConnectionEvent::StateChanged(state) if state.is_open() => self.clear_error(),
            _ => {}
        }
    }
}
