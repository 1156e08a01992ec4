pub mod app;
pub mod auth;
pub mod cache;
pub mod cli;
pub mod client;
pub mod config;
pub mod draw;
pub mod protocol;
pub mod session;
pub mod telemetry;
pub mod transport;
pub mod viewport;
