//! One viewer's live view of the canvas: grid, presence and connection wired
//! together.

use std::sync::Arc;

use tracing::debug;

use crate::auth::SessionToken;
use crate::cache::GridStore;
use crate::config::{AppConfig, ConfigError};
use crate::protocol::{DrawRequest, ProtocolError, encode_draw_request};
use crate::session::ConnectionManager;
use crate::transport::Connector;
use crate::viewport::Viewport;

pub mod presence;

pub use presence::Presence;

pub struct CanvasSession {
    config: AppConfig,
    grid: Arc<GridStore>,
    presence: Arc<Presence>,
    manager: ConnectionManager,
}

impl CanvasSession {
    /// Builds the store, presence tracker and connection manager. Nothing
    /// connects until a token is supplied and [`CanvasSession::connect`] (or
    /// the token bridge) runs.
    pub fn new(config: AppConfig, connector: Arc<dyn Connector>) -> Result<Self, ConfigError> {
        let config = config.validated()?;
        let grid = Arc::new(GridStore::new(config.grid_size, config.palette_size()));
        let presence = Arc::new(Presence::new());
        let manager = ConnectionManager::new(
            connector,
            config.websocket_url()?,
            config.wire_config(),
            config.reconnect_policy(),
        );
        manager.subscribe(grid.clone());
        manager.subscribe(presence.clone());
        Ok(Self {
            config,
            grid,
            presence,
            manager,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn grid(&self) -> &Arc<GridStore> {
        &self.grid
    }

    pub fn presence(&self) -> &Arc<Presence> {
        &self.presence
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    pub fn viewport(&self, canvas_px: f64) -> Viewport {
        Viewport::new(self.config.grid_size, canvas_px)
    }

    pub fn connect(&self, token: SessionToken) {
        self.manager.set_token(Some(token));
        self.manager.connect();
    }

    pub fn disconnect(&self) {
        self.manager.disconnect();
    }

    /// Sends a draw request over the socket. `Ok(false)` means the socket was
    /// not open; invalid cells or colors are rejected before anything is sent.
    pub fn place_pixel(&self, x: u32, y: u32, color: u8) -> Result<bool, ProtocolError> {
        let frame = encode_draw_request(&DrawRequest { x, y, color }, &self.manager.wire_config())?;
        let sent = self.manager.send_message(frame);
        debug!(x, y, color, sent, "place pixel");
        Ok(sent)
    }

    /// Cell and current color under a device point.
    pub fn pixel_at(&self, viewport: &Viewport, dx: f64, dy: f64) -> Option<((u32, u32), u8)> {
        let (x, y) = viewport.screen_to_grid(dx, dy)?;
        let color = self.grid.cell(x as usize, y as usize)?;
        Some(((x, y), color))
    }
}
