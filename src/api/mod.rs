//! API handlers for the toy lending REST endpoints

pub mod archives;
pub mod health;
pub mod items;
pub mod openapi;
pub mod reports;
pub mod reservations;
pub mod waitlist;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
    routing::{delete, get, post, put},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{error::AppError, models::admin::AdminClaims, AppState};

/// Extractor for an authenticated admin from the JWT bearer token
pub struct AdminUser(pub AdminClaims);

#[async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        // Get the Authorization header
        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| AppError::Authentication("Missing authorization header".to_string()))?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or_else(|| AppError::Authentication("Invalid authorization header format".to_string()))?;

        let claims = AdminClaims::from_token(token, &state.config.auth.jwt_secret)
            .map_err(|e| AppError::Authentication(e.to_string()))?;
        claims.require_admin()?;

        Ok(AdminUser(claims))
    }
}

/// Create the application router with all routes
pub fn router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // API v1 routes
    let api_v1 = Router::new()
        // Health check
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        // Items (catalog)
        .route("/items", get(items::list_items))
        .route("/items", post(items::create_item))
        .route("/items/categories", get(items::list_categories))
        .route("/items/:id", get(items::get_item))
        .route("/items/:id", put(items::update_item))
        .route("/items/:id", delete(items::delete_item))
        // Reservations
        .route("/reservations", post(reservations::create_reservation))
        .route("/reservations", get(reservations::list_reservations))
        .route("/reservations/events", get(reservations::reservation_events))
        .route("/reservations/:id", get(reservations::get_reservation))
        .route("/reservations/:id", delete(reservations::delete_reservation))
        .route("/reservations/:id/status", put(reservations::update_status))
        .route("/reservations/:id/extend", post(reservations::extend_loan))
        .route("/reservations/:id/waitlist", post(reservations::move_to_waitlist))
        .route("/reservations/:id/archive", post(reservations::archive_reservation))
        .route("/reservations/:id/bag", put(reservations::update_bag_number))
        // Waitlist
        .route("/waitlist", post(waitlist::join_waitlist))
        .route("/waitlist", get(waitlist::list_waitlist))
        .route("/waitlist/:id", delete(waitlist::discard_entry))
        .route("/waitlist/:id/convert", post(waitlist::convert_entry))
        // Archives
        .route("/archives", get(archives::list_archives))
        .route("/archives/:id/restore", post(archives::restore_entry))
        .route("/archives/:id/note", put(archives::update_note))
        // Reports
        .route("/reports/summary", get(reports::get_summary))
        .route("/reports/inventory-audit", get(reports::get_inventory_audit))
        .route("/reports/export/:dataset", get(reports::export_csv))
        .route("/monitor/sweep", post(reports::run_sweep))
        .with_state(state);

    // OpenAPI documentation
    let openapi = openapi::create_openapi_router();

    Router::new()
        .nest("/api/v1", api_v1)
        .merge(openapi)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
