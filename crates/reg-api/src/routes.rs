//! # Routes
//!
//! Axum router configuration for the registration API.

use crate::handlers;
use crate::state::AppState;
use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Create the main application router
///
/// Routes:
/// - Events:
///   - GET    /api/v1/events - Events with active batch
///   - GET    /api/v1/events/{event_id}/batches - List batches
///   - POST   /api/v1/events/{event_id}/batches - Create batch (admin)
///   - PUT    /api/v1/events/{event_id}/batches/{batch_id} - Update batch (admin)
///   - DELETE /api/v1/events/{event_id}/batches/{batch_id} - Delete batch (admin)
///
/// - Packages:
///   - POST   /api/v1/packages - Create package with first registration
///   - GET    /api/v1/packages - Caller's packages
///   - GET    /api/v1/packages/{id} - Package with registrations
///   - GET    /api/v1/packages/{id}/total - Package total
///   - POST   /api/v1/packages/{id}/registrations - Add registration
///   - DELETE /api/v1/packages/{id}/registrations/{registration_id} - Remove registration
///   - POST   /api/v1/packages/{id}/payment - Create payment intent
///   - POST   /api/v1/admin/packages/revert-pending - Revert pending packages (admin)
///
/// - Webhooks:
///   - POST /webhook/mercadopago - Mercado Pago notifications
///
/// - Return pages:
///   - GET /payment/{outcome}/{id} - success, failure or pending
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let event_routes = Router::new()
        .route("/", get(handlers::list_events))
        .route(
            "/{event_id}/batches",
            get(handlers::list_batches).post(handlers::create_batch),
        )
        .route(
            "/{event_id}/batches/{batch_id}",
            put(handlers::update_batch).delete(handlers::delete_batch),
        );

    let package_routes = Router::new()
        .route(
            "/",
            get(handlers::list_packages).post(handlers::create_package),
        )
        .route("/{package_id}", get(handlers::get_package))
        .route("/{package_id}/total", get(handlers::get_total))
        .route(
            "/{package_id}/registrations",
            post(handlers::add_registration),
        )
        .route(
            "/{package_id}/registrations/{registration_id}",
            axum::routing::delete(handlers::remove_registration),
        )
        .route("/{package_id}/payment", post(handlers::create_payment));

    let admin_routes = Router::new()
        .route("/packages/revert-pending", post(handlers::revert_pending));

    let api_routes = Router::new()
        .nest("/events", event_routes)
        .nest("/packages", package_routes)
        .nest("/admin", admin_routes);

    // Webhook routes (no CORS, must accept raw body)
    let webhook_routes = Router::new()
        .route("/mercadopago", post(handlers::mercadopago_webhook));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/", get(handlers::health))
        .route("/payment/{outcome}/{package_id}", get(handlers::payment_return))
        .nest("/api/v1", api_routes)
        .nest("/webhook", webhook_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
