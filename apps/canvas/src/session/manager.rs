use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use url::Url;

use super::{
    ConnectionError, ConnectionEvent, ConnectionObserver, ConnectionState, Phase, ReconnectPolicy,
};
use crate::auth::SessionToken;
use crate::protocol::{WireConfig, decode_server_message};
use crate::telemetry::logging::hexdump;
use crate::transport::{Connector, OutboundFrame, TransportError, TransportEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Reconnecting socket owner for one canvas session.
///
/// Cheap to clone; all clones drive the same state machine. Every operation
/// returns immediately and must be called from inside a Tokio runtime; results
/// arrive through observers and [`ConnectionManager::watch_state`].
///
/// Observers see events in the order the state machine produced them, on any
/// runtime flavor: once `disconnect` returns, no further frame from the old
/// socket is delivered.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

struct Shared {
    connector: Arc<dyn Connector>,
    endpoint: Url,
    wire: WireConfig,
    policy: ReconnectPolicy,
    /// Held from an epoch check until the resulting events are delivered.
    /// Reentrant so observers may call back into the manager.
    dispatch: ReentrantMutex<()>,
    inner: Mutex<Inner>,
    observers: RwLock<Vec<(SubscriptionId, Arc<dyn ConnectionObserver>)>>,
    next_subscription: AtomicU64,
    state_tx: watch::Sender<ConnectionState>,
}

struct Inner {
    state: ConnectionState,
    token: Option<SessionToken>,
    enabled: bool,
    /// Bumped whenever a connection attempt starts or the manager is told to
    /// disconnect. Tasks carrying an older epoch must not touch state.
    epoch: u64,
    deliberate_close: bool,
    outbound: Option<mpsc::UnboundedSender<OutboundFrame>>,
    task: Option<JoinHandle<()>>,
    retry: Option<JoinHandle<()>>,
}

impl ConnectionManager {
    pub fn new(
        connector: Arc<dyn Connector>,
        endpoint: Url,
        wire: WireConfig,
        policy: ReconnectPolicy,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::default());
        Self {
            shared: Arc::new(Shared {
                connector,
                endpoint,
                wire,
                policy,
                dispatch: ReentrantMutex::new(()),
                inner: Mutex::new(Inner {
                    state: ConnectionState::default(),
                    token: None,
                    enabled: true,
                    epoch: 0,
                    deliberate_close: false,
                    outbound: None,
                    task: None,
                    retry: None,
                }),
                observers: RwLock::new(Vec::new()),
                next_subscription: AtomicU64::new(1),
                state_tx,
            }),
        }
    }

    pub fn wire_config(&self) -> WireConfig {
        self.shared.wire
    }

    pub fn policy(&self) -> ReconnectPolicy {
        self.shared.policy
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.inner.lock().state.clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    pub fn token(&self) -> Option<SessionToken> {
        self.shared.inner.lock().token.clone()
    }

    pub fn subscribe(&self, observer: Arc<dyn ConnectionObserver>) -> SubscriptionId {
        let id = SubscriptionId(self.shared.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.shared.observers.write().push((id, observer));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut observers = self.shared.observers.write();
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    /// Starts a connection attempt unless one is already open or in flight.
    /// Requires a token and an enabled manager. Cancels a pending retry.
    pub fn connect(&self) {
        let _dispatch = self.shared.dispatch.lock();
        let published = {
            let mut inner = self.shared.inner.lock();
            if !inner.enabled {
                debug!("connect ignored: manager disabled");
                return;
            }
            if matches!(inner.state.phase, Phase::Open | Phase::Connecting) {
                return;
            }
            if let Some(retry) = inner.retry.take() {
                retry.abort();
            }
            self.begin_attempt(&mut inner)
        };
        self.publish_all(published);
    }

    /// Closes the socket, cancels any pending retry and settles in `Closed`.
    /// Safe to call repeatedly.
    pub fn disconnect(&self) {
        let _dispatch = self.shared.dispatch.lock();
        let published = {
            let mut inner = self.shared.inner.lock();
            inner.deliberate_close = true;
            inner.epoch += 1;
            if let Some(retry) = inner.retry.take() {
                retry.abort();
            }
            let mut published = Vec::new();
            if let Some(outbound) = inner.outbound.take() {
                let _ = outbound.send(OutboundFrame::Close);
                inner.state.phase = Phase::Closing;
                published.push(self.commit(&inner));
            }
            if let Some(task) = inner.task.take() {
                task.abort();
            }
            let closed = ConnectionState {
                phase: Phase::Closed,
                ..ConnectionState::default()
            };
            if inner.state != closed {
                inner.state = closed;
                published.push(self.commit(&inner));
                info!("disconnected");
            }
            published
        };
        self.publish_all(published);
    }

    /// `disconnect` followed by a fresh `connect` with counters reset.
    pub fn reset_connection(&self) {
        self.disconnect();
        self.connect();
    }

    /// Queues a binary frame. Returns `false` unless the socket is open.
    pub fn send_message(&self, frame: impl Into<Bytes>) -> bool {
        let inner = self.shared.inner.lock();
        if inner.state.phase != Phase::Open {
            return false;
        }
        inner
            .outbound
            .as_ref()
            .is_some_and(|outbound| outbound.send(OutboundFrame::Binary(frame.into())).is_ok())
    }

    /// Replaces the session token. A different token restarts the connection;
    /// clearing it disconnects.
    pub fn set_token(&self, token: Option<SessionToken>) {
        let has_token = {
            let mut inner = self.shared.inner.lock();
            if inner.token == token {
                return;
            }
            inner.token = token;
            inner.token.is_some()
        };
        if has_token {
            self.reset_connection();
        } else {
            self.disconnect();
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        {
            let mut inner = self.shared.inner.lock();
            if inner.enabled == enabled {
                return;
            }
            inner.enabled = enabled;
        }
        if enabled {
            self.connect();
        } else {
            self.disconnect();
        }
    }

    /// Socket URL for `token`: the configured endpoint plus `?token=`.
    pub fn connection_url(&self, token: &SessionToken) -> Url {
        let mut url = self.shared.endpoint.clone();
        url.query_pairs_mut().append_pair("token", token.as_str());
        url
    }

    fn begin_attempt(&self, inner: &mut Inner) -> Vec<ConnectionState> {
        let Some(token) = inner.token.as_ref().filter(|token| !token.is_empty()) else {
            debug!("connect ignored: no session token");
            return Vec::new();
        };
        let url = self.connection_url(token);
        inner.epoch += 1;
        inner.deliberate_close = false;
        inner.state.phase = Phase::Connecting;
        inner.state.last_error = None;
        inner.state.next_retry = None;
        debug!(attempt = inner.state.reconnect_attempt, "connecting");

        let task = tokio::spawn(self.clone().run_connection(inner.epoch, url));
        if let Some(stale) = inner.task.replace(task) {
            stale.abort();
        }
        vec![self.commit(inner)]
    }

    async fn run_connection(self, epoch: u64, url: Url) {
        let mut link = match self.shared.connector.connect(&url).await {
            Ok(link) => link,
            Err(err) => {
                self.handle_closed(epoch, err);
                return;
            }
        };

        let opened = {
            let _dispatch = self.shared.dispatch.lock();
            let opened = {
                let mut inner = self.shared.inner.lock();
                if inner.epoch != epoch || inner.deliberate_close {
                    None
                } else {
                    inner.outbound = Some(link.outbound.clone());
                    inner.state = ConnectionState {
                        phase: Phase::Open,
                        ..ConnectionState::default()
                    };
                    Some(self.commit(&inner))
                }
            };
            opened.map(|state| self.publish(state)).is_some()
        };
        if !opened {
            debug!("discarding connection opened after it was superseded");
            let _ = link.outbound.send(OutboundFrame::Close);
            return;
        }
        info!("connected");

        let error = loop {
            match link.inbound.recv().await {
                Some(TransportEvent::Binary(frame)) => {
                    if !self.dispatch_frame(epoch, &frame) {
                        return;
                    }
                }
                Some(TransportEvent::Text(text)) => {
                    warn!(len = text.len(), "ignoring non-binary frame");
                }
                Some(TransportEvent::Closed { reason }) => break TransportError::Closed { reason },
                Some(TransportEvent::Error(err)) => break TransportError::Socket(err),
                None => break TransportError::Closed { reason: None },
            }
        };
        self.handle_closed(epoch, error);
    }

    /// Decodes and fans out one frame. Returns `false` when the connection has
    /// been superseded and the read loop should stop.
    fn dispatch_frame(&self, epoch: u64, frame: &[u8]) -> bool {
        let _dispatch = self.shared.dispatch.lock();
        if self.shared.inner.lock().epoch != epoch {
            return false;
        }
        match decode_server_message(frame, &self.shared.wire) {
            Ok(message) => {
                trace!(tag = message.tag(), len = frame.len(), "frame decoded");
                self.notify(&ConnectionEvent::Message(message));
            }
            Err(err) => {
                warn!(error = %err, tag = frame.first().copied(), "dropping frame");
                if tracing::enabled!(tracing::Level::TRACE) {
                    trace!("rejected frame:\n{}", hexdump(frame));
                }
            }
        }
        true
    }

    fn handle_closed(&self, epoch: u64, error: TransportError) {
        let _dispatch = self.shared.dispatch.lock();
        let published = {
            let mut inner = self.shared.inner.lock();
            if inner.epoch != epoch {
                debug!(error = %error, "ignoring close from superseded connection");
                return;
            }
            inner.outbound = None;
            inner.task = None;
            if inner.deliberate_close || !inner.enabled {
                inner.state.phase = Phase::Closed;
                inner.state.next_retry = None;
                self.commit(&inner)
            } else {
                let attempt = inner.state.reconnect_attempt + 1;
                match self.shared.policy.delay_for(attempt) {
                    Some(delay) => {
                        warn!(
                            error = %error,
                            attempt,
                            max_attempts = self.shared.policy.max_attempts,
                            delay_ms = delay.as_millis() as u64,
                            "connection lost; retry scheduled"
                        );
                        inner.state = ConnectionState {
                            phase: Phase::Closed,
                            reconnect_attempt: attempt,
                            last_error: Some(ConnectionError::Transport(error)),
                            next_retry: Some(delay),
                        };
                        let manager = self.clone();
                        inner.retry = Some(tokio::spawn(async move {
                            tokio::time::sleep(delay).await;
                            manager.retry_fired(epoch);
                        }));
                    }
                    None => {
                        let attempts = inner.state.reconnect_attempt;
                        error!(error = %error, attempts, "giving up on connection");
                        inner.state.phase = Phase::Closed;
                        inner.state.next_retry = None;
                        inner.state.last_error = Some(ConnectionError::Terminal { attempts });
                    }
                }
                self.commit(&inner)
            }
        };
        self.publish(published);
    }

    fn retry_fired(&self, epoch: u64) {
        let _dispatch = self.shared.dispatch.lock();
        let published = {
            let mut inner = self.shared.inner.lock();
            if inner.epoch != epoch || inner.deliberate_close || !inner.enabled {
                return;
            }
            inner.retry = None;
            self.begin_attempt(&mut inner)
        };
        self.publish_all(published);
    }

    /// Stores the current state in the watch channel and hands back a copy for
    /// observers. Call with the lock held so watchers see transitions in order.
    fn commit(&self, inner: &Inner) -> ConnectionState {
        self.shared.state_tx.send_replace(inner.state.clone());
        inner.state.clone()
    }

    fn publish(&self, state: ConnectionState) {
        self.notify(&ConnectionEvent::StateChanged(state));
    }

    fn publish_all(&self, states: Vec<ConnectionState>) {
        for state in states {
            self.publish(state);
        }
    }

    fn notify(&self, event: &ConnectionEvent) {
        let observers: Vec<Arc<dyn ConnectionObserver>> = self
            .shared
            .observers
            .read()
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();
        for observer in observers {
            observer.on_event(event);
        }
    }
}
