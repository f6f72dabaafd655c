//! HTTP API: lead intake, admin dashboard, deal memos, health and docs.

pub mod admin;
pub mod auth;
pub mod docs;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod leads;
pub mod properties;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::create_router;
pub use state::{ApiSettings, AppState};
