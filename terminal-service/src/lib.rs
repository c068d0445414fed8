pub mod app;
pub mod checkout_handlers;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod poller;
pub mod square;
pub mod store;
pub mod store_pg;
pub mod tenant;

pub use app::{build_router, AppState};
