//! OpenAPI documentation

use axum::Router;
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::api::{archives, health, items, reports, reservations, waitlist};

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Toy Lending Library API",
        version = "0.3.0",
        description = "Reservations, waitlist and loan tracking for a toy lending library",
        license(name = "AGPL-3.0", url = "https://www.gnu.org/licenses/agpl-3.0.html")
    ),
    servers(
        (url = "/api/v1", description = "API v1")
    ),
    paths(
        // Health
        health::health_check,
        health::readiness_check,
        // Items
        items::list_items,
        items::list_categories,
        items::get_item,
        items::create_item,
        items::update_item,
        items::delete_item,
        // Reservations
        reservations::create_reservation,
        reservations::list_reservations,
        reservations::get_reservation,
        reservations::update_status,
        reservations::extend_loan,
        reservations::move_to_waitlist,
        reservations::archive_reservation,
        reservations::delete_reservation,
        reservations::update_bag_number,
        reservations::reservation_events,
        // Waitlist
        waitlist::join_waitlist,
        waitlist::list_waitlist,
        waitlist::convert_entry,
        waitlist::discard_entry,
        // Archives
        archives::list_archives,
        archives::restore_entry,
        archives::update_note,
        // Reports
        reports::get_summary,
        reports::get_inventory_audit,
        reports::export_csv,
        reports::run_sweep,
    ),
    components(
        schemas(
            // Items
            crate::models::item::Item,
            crate::models::item::ItemStatus,
            crate::models::item::ItemSort,
            crate::models::item::CreateItem,
            crate::models::item::UpdateItem,
            // Reservations
            crate::models::reservation::Reservation,
            crate::models::reservation::ReservationStatus,
            crate::models::reservation::LoanPeriod,
            crate::models::reservation::FamilyContact,
            crate::models::reservation::CreateReservation,
            crate::models::reservation::UpdateReservationStatus,
            crate::models::reservation::UpdateBagNumber,
            reservations::ReserveResponse,
            reservations::StatusChangeResponse,
            reservations::ExtendResponse,
            crate::services::changes::ReservationChange,
            crate::services::changes::ChangeKind,
            // Waitlist
            crate::models::waitlist::WaitlistEntry,
            crate::models::waitlist::CreateWaitlistEntry,
            // Archives
            crate::models::archive::ArchiveEntry,
            crate::models::archive::ArchiveReason,
            crate::models::archive::UpdateArchiveNote,
            // Reports
            crate::services::reports::DashboardSummary,
            crate::services::inventory::LedgerLine,
            crate::services::monitor::SweepReport,
            reports::Dataset,
            // Health
            health::HealthResponse,
            // Errors
            crate::error::ErrorResponse,
        )
    ),
    modifiers(&BearerAuth),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "items", description = "Toy catalog"),
        (name = "reservations", description = "Reservation lifecycle"),
        (name = "waitlist", description = "Waitlist management"),
        (name = "archives", description = "Closed reservations"),
        (name = "reports", description = "Dashboard, exports and due-date monitor")
    )
)]
pub struct ApiDoc;

/// Create the OpenAPI documentation router
pub fn create_openapi_router() -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
}
