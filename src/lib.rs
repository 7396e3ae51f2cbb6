//! Username availability and registration service over an in-memory directory.

pub mod app;
pub mod config;
pub mod error;
pub mod middleware;
pub mod registration;
pub mod state;

pub use app::build_app;
pub use state::AppState;
