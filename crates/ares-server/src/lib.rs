pub mod clock;
pub mod config;
pub mod error;
pub mod handlers;
pub mod lifecycle;
pub mod metrics;
pub mod server;
pub mod store;

use std::sync::Arc;

/// Shared application state threaded through axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<lifecycle::Lifecycle>,
    pub metrics: Arc<metrics::Metrics>,
    /// Prefix for share URLs, without a trailing slash.
    pub base_url: String,
}

pub use config::ServerConfig;
pub use error::Error;
pub use lifecycle::{CreatedSecret, Lifecycle, Lifetime, RevealedSecret};
pub use server::{router, run};
