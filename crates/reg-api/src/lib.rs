//! # reg-api
//!
//! HTTP API layer for regpack-rs.
//!
//! This crate provides:
//! - Axum-based HTTP server
//! - REST endpoints for events, batches, packages and checkout
//! - Mercado Pago webhook endpoint
//! - Mailer implementations for confirmation messages
//!
//! ## Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | GET | `/health` | Health check |
//! | GET | `/api/v1/events` | Events with active batch |
//! | POST | `/api/v1/packages` | Create package |
//! | POST | `/api/v1/packages/{id}/registrations` | Add registration |
//! | POST | `/api/v1/packages/{id}/payment` | Create payment intent |
//! | POST | `/webhook/mercadopago` | Mercado Pago webhook |
//!
//! See [`routes::create_router`] for the full table.

pub mod extract;
pub mod handlers;
pub mod mailer;
pub mod routes;
pub mod state;

pub use routes::create_router;
pub use state::{AppConfig, AppState};
