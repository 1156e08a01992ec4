use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::{SessionToken, TokenStatus};
use crate::session::ConnectionManager;

/// How often the bridge re-checks the current token's expiry.
pub const EXPIRY_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Forwards auth-provider token changes into `manager`.
///
/// A new token restarts the connection, a cleared token closes it, and a token
/// found expired on the periodic check is dropped until the provider supplies
/// a fresh one. The task ends when the sender side is dropped.
pub fn spawn_token_bridge(
    manager: ConnectionManager,
    mut tokens: watch::Receiver<Option<SessionToken>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let initial = tokens.borrow_and_update().clone();
        apply(&manager, initial);

        let mut ticker = tokio::time::interval(EXPIRY_CHECK_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;

        loop {
            tokio::select! {
                changed = tokens.changed() => {
                    if changed.is_err() {
                        debug!("token source dropped; bridge exiting");
                        break;
                    }
                    let token = tokens.borrow_and_update().clone();
                    apply(&manager, token);
                }
                _ = ticker.tick() => check_expiry(&manager, OffsetDateTime::now_utc()),
            }
        }
    })
}

fn apply(manager: &ConnectionManager, token: Option<SessionToken>) {
    match &token {
        Some(token) if token.status(OffsetDateTime::now_utc()) == TokenStatus::Expired => {
            warn!("ignoring expired session token");
            manager.set_token(None);
            return;
        }
        Some(token) => info!(public = token.is_public(), "session token updated"),
        None => info!("session token cleared"),
    }
    manager.set_token(token);
}

fn check_expiry(manager: &ConnectionManager, now: OffsetDateTime) {
    let Some(token) = manager.token() else {
        return;
    };
    match token.status(now) {
        TokenStatus::Valid => {}
        TokenStatus::RefreshDue => debug!(expires_at = ?token.expires_at(), "session token due for refresh"),
        TokenStatus::Expired => {
            warn!("session token expired; closing connection");
            manager.set_token(None);
        }
    }
}
