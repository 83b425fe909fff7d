//! Voxant server: carrier webhooks, persistence, and the broadcast gateway.

pub mod api;
pub mod db;
pub mod error;
pub mod gateway;
pub mod state;
pub mod turn;

pub use api::router;
pub use state::AppState;
