//! BlackKeyX backend API.
//!
//! Lead intake from the web chatbot, an admin dashboard over the lead
//! pipeline, and deal memo management with AI-assisted document extraction,
//! all backed by a relational schema that is brought up to date by the
//! built-in migrator.
//!
//! # Modules
//!
//! - [`config`]: Configuration loading from environment
//! - [`error`]: Unified error types
//! - [`domain`]: Investors, deal memos and their related records
//! - [`migrate`]: Versioned, linear schema migrations
//! - [`store`]: Repositories backed by PostgreSQL or memory
//! - [`services`]: Lead processing, document storage and extraction
//! - [`api`]: HTTP API (axum router, handlers, OpenAPI docs)
//! - [`metrics`]: Prometheus metric names and helpers
//! - [`utils`]: Utility functions

pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod migrate;
pub mod services;
pub mod store;
pub mod utils;

pub use config::Config;
pub use error::{AppError, Result};
