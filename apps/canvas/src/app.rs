use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::auth::{SessionToken, spawn_token_bridge};
use crate::cli::{Cli, Command, ConfigArgs, DrawArgs, WatchArgs};
use crate::client::CanvasSession;
use crate::config::AppConfig;
use crate::draw::DrawClient;
use crate::protocol::{DrawRequest, GridBuffer, encode_draw_request};
use crate::session::Phase;
use crate::transport::WebSocketConnector;

pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Watch(args) => watch_canvas(args).await,
        Command::Draw(args) => draw_pixel(args).await,
    }
}

async fn load_config(args: &ConfigArgs) -> Result<AppConfig> {
    if let Some(path) = &args.config {
        return AppConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()));
    }
    if let Some(url) = &args.config_url {
        return Ok(AppConfig::fetch_or_default(&reqwest::Client::new(), url).await);
    }
    AppConfig::from_env().context("reading CANVAS_* environment")
}

fn resolve_token(args: &ConfigArgs, config: &AppConfig) -> Result<SessionToken> {
    match args.token.as_deref().and_then(SessionToken::parse) {
        Some(token) => Ok(token),
        None if config.auth_enabled => bail!("this canvas requires a session token (--token)"),
        None => Ok(SessionToken::Public),
    }
}

async fn watch_canvas(args: WatchArgs) -> Result<()> {
    let config = load_config(&args.config).await?;
    let token = resolve_token(&args.config, &config)?;
    let session = CanvasSession::new(config, Arc::new(WebSocketConnector::new()))?;
    info!(
        url = %session.config().websocket_url,
        grid_size = session.config().grid_size,
        "watching canvas"
    );

    let (_token_tx, token_rx) = watch::channel(Some(token));
    let bridge = spawn_token_bridge(session.manager().clone(), token_rx);

    let mut states = session.manager().watch_state();
    let mut report = tokio::time::interval(Duration::from_secs(args.report_interval.max(1)));
    report.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_version = u64::MAX;

    let outcome = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break Ok(()),
            changed = states.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let state = states.borrow_and_update().clone();
                match &state.last_error {
                    Some(err) if err.is_terminal() => {
                        error!(error = %err, "connection lost");
                        break Err(anyhow::anyhow!(err.clone()));
                    }
                    Some(err) => warn!(error = %err, retry_in = ?state.next_retry, "connection interrupted"),
                    None if state.phase == Phase::Open => info!("connected"),
                    None => {}
                }
            }
            _ = report.tick() => {
                let grid = session.grid();
                if grid.version() != last_version {
                    last_version = grid.version();
                    info!(
                        viewers = session.presence().viewers(),
                        version = last_version,
                        histogram = ?color_histogram(&grid.buffer(), grid.palette_size()),
                        "grid summary"
                    );
                }
                if let Some(reason) = session.presence().last_error() {
                    warn!(%reason, "server error");
                }
            }
        }
    };

    bridge.abort();
    session.disconnect();
    outcome
}

async fn draw_pixel(args: DrawArgs) -> Result<()> {
    let config = load_config(&args.config).await?;
    let token = resolve_token(&args.config, &config)?;
    let request = DrawRequest {
        x: args.x,
        y: args.y,
        color: args.color,
    };
    // Same bounds and palette checks the socket path applies.
    encode_draw_request(&request, &config.wire_config())?;

    DrawClient::new(&config.api_base_url)
        .place(&request, &token)
        .await?;
    info!(x = request.x, y = request.y, color = request.color, "pixel placed");
    Ok(())
}

/// Cells per palette index.
pub fn color_histogram(grid: &GridBuffer, palette_size: usize) -> Vec<usize> {
    let mut counts = vec![0; palette_size];
    for &cell in grid.cells() {
        if let Some(slot) = counts.get_mut(cell as usize) {
            *slot += 1;
        }
    }
    counts
}
