//! MySQL backup service
//!
//! Scheduled `mysqldump` runs with gzip compression and retention, a JSON
//! dashboard API, and restore of any artifact onto a registered server.

pub mod config;
pub mod error;
pub mod events;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
pub mod utils;
pub mod ws;

pub use config::AppConfig;
pub use events::{Event, EventBus};
pub use state::AppState;
