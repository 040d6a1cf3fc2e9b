pub mod appresult;
pub mod config;
pub mod error;
pub mod rooms;

use std::sync::Arc;

use axum::{extract::FromRef, http::HeaderValue, Router};
use anyhow::Context;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};

pub use appresult::{AppError, AppResult};
pub use config::Config;
pub use error::{RoomError, RoomResult};
use rooms::RoomRegistry;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub registry: Arc<RoomRegistry>,
    pub config: Arc<Config>,
    /// Flips to `true` once the server starts shutting down.
    pub shutdown: Arc<watch::Sender<bool>>,
}

impl AppState {
    pub fn new(config: Config) -> AppState {
        AppState {
            registry: Arc::new(RoomRegistry::new(&config)),
            config: Arc::new(config),
            shutdown: Arc::new(watch::channel(false).0),
        }
    }

    /// Tells every open socket to close.
    pub fn begin_shutdown(&self) {
        self.shutdown.send_replace(true);
    }
}

pub fn app(app_state: AppState) -> anyhow::Result<Router> {
    let cors = match &app_state.config.cors_origin {
        Some(origin) => CorsLayer::new().allow_origin(
            origin.parse::<HeaderValue>().with_context(|| format!("invalid CORS_ORIGIN {origin:?}"))?,
        ),
        None => CorsLayer::new().allow_origin(Any),
    }
    .allow_methods(Any)
    .allow_headers(Any);

    Ok(Router::new()
        .merge(rooms::router())
        .with_state(app_state)
        .layer(cors))
}
