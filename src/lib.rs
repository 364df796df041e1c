//! Toy lending library server
//!
//! Reservation, waitlist and loan tracking for a toy lending library,
//! exposed as a REST JSON API. The reservation engine keeps each item's stock
//! counter consistent with the reservations holding it, a background monitor
//! sends due-date reminders and overdue notices, and family-facing emails are
//! delivered through an external mail service.

use std::sync::Arc;

pub mod api;
pub mod clock;
pub mod config;
pub mod error;
pub mod models;
pub mod repository;
pub mod services;

pub use config::AppConfig;
pub use error::{AppError, AppResult};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub services: Arc<services::Services>,
}
