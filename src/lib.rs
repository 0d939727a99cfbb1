pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod pagination;

// Domain data shapes shared across layers
pub mod domain;
pub mod storage;

pub mod auth;

// Use cases and their ports, plus the adapters that implement them
pub mod app;
pub mod infra;

// HTTP surface
pub mod handlers;
pub mod server;
pub mod state;

pub use config::Config;
pub use error::{ApiError, Result};
pub use state::AppState;
