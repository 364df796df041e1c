//! Reservation endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use serde::Serialize;
use std::convert::Infallible;
use tokio_stream::{wrappers::BroadcastStream, Stream, StreamExt};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::{
        reservation::{
            CreateReservation, ReservationQuery, UpdateBagNumber, UpdateReservationStatus,
        },
        ArchiveEntry, Reservation, WaitlistEntry,
    },
    services::reservations::{ExtendOutcome, ReserveOutcome, StatusChange},
};

use super::AdminUser;

/// Reservation request response
#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReserveResponse {
    /// "reserved" or "waitlisted"
    pub outcome: String,
    pub reservation: Option<Reservation>,
    pub waitlist_entry: Option<WaitlistEntry>,
    pub message: String,
}

/// Make a reservation, or join the waitlist when no copy is left
#[utoipa::path(
    post,
    path = "/reservations",
    tag = "reservations",
    request_body = CreateReservation,
    responses(
        (status = 201, description = "Reservation created", body = ReserveResponse),
        (status = 202, description = "Out of stock, added to the waitlist", body = ReserveResponse),
        (status = 400, description = "Invalid input"),
        (status = 404, description = "Item not found"),
        (status = 409, description = "Item not available")
    )
)]
pub async fn create_reservation(
    State(state): State<crate::AppState>,
    Json(request): Json<CreateReservation>,
) -> AppResult<(StatusCode, Json<ReserveResponse>)> {
    let response = match state.services.reservations.reserve(&request).await? {
        ReserveOutcome::Reserved(reservation) => (
            StatusCode::CREATED,
            Json(ReserveResponse {
                outcome: "reserved".to_string(),
                message: format!("'{}' is reserved for {}", reservation.item_name, reservation.child_name),
                reservation: Some(reservation),
                waitlist_entry: None,
            }),
        ),
        ReserveOutcome::Waitlisted(entry) => (
            StatusCode::ACCEPTED,
            Json(ReserveResponse {
                outcome: "waitlisted".to_string(),
                message: format!("'{}' is out of stock, added to the waitlist", entry.item_name),
                reservation: None,
                waitlist_entry: Some(entry),
            }),
        ),
    };
    Ok(response)
}

/// List active reservations
#[utoipa::path(
    get,
    path = "/reservations",
    tag = "reservations",
    security(("bearer_auth" = [])),
    params(ReservationQuery),
    responses(
        (status = 200, description = "Active reservations", body = Vec<Reservation>),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn list_reservations(
    State(state): State<crate::AppState>,
    AdminUser(_claims): AdminUser,
    Query(query): Query<ReservationQuery>,
) -> AppResult<Json<Vec<Reservation>>> {
    let reservations = state.services.reservations.list_reservations(&query).await?;
    Ok(Json(reservations))
}

/// Get a reservation
#[utoipa::path(
    get,
    path = "/reservations/{id}",
    tag = "reservations",
    security(("bearer_auth" = [])),
    params(
        ("id" = Uuid, Path, description = "Reservation ID")
    ),
    responses(
        (status = 200, description = "Reservation", body = Reservation),
        (status = 404, description = "Reservation not found")
    )
)]
pub async fn get_reservation(
    State(state): State<crate::AppState>,
    AdminUser(_claims): AdminUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Reservation>> {
    let reservation = state.services.reservations.get_reservation(id).await?;
    Ok(Json(reservation))
}

/// Status change response
#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatusChangeResponse {
    /// Updated reservation; absent once returned
    pub reservation: Option<Reservation>,
    /// Archive record created by a return
    pub archive_entry: Option<ArchiveEntry>,
    pub message: String,
}

/// Change a reservation's status
#[utoipa::path(
    put,
    path = "/reservations/{id}/status",
    tag = "reservations",
    security(("bearer_auth" = [])),
    params(
        ("id" = Uuid, Path, description = "Reservation ID")
    ),
    request_body = UpdateReservationStatus,
    responses(
        (status = 200, description = "Status changed", body = StatusChangeResponse),
        (status = 404, description = "Reservation not found")
    )
)]
pub async fn update_status(
    State(state): State<crate::AppState>,
    AdminUser(_claims): AdminUser,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateReservationStatus>,
) -> AppResult<Json<StatusChangeResponse>> {
    let response = match state
        .services
        .reservations
        .set_status(id, request.status)
        .await?
    {
        StatusChange::Updated(reservation) => StatusChangeResponse {
            message: format!("Status set to {}", reservation.status),
            reservation: Some(reservation),
            archive_entry: None,
        },
        StatusChange::Returned(entry) => StatusChangeResponse {
            message: "Toy returned and reservation archived".to_string(),
            reservation: None,
            archive_entry: Some(entry),
        },
    };
    Ok(Json(response))
}

/// Loan extension response
#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExtendResponse {
    pub reservation: Reservation,
    /// False when the loan had already been extended
    pub extended: bool,
    pub message: String,
}

/// Extend an active loan once
#[utoipa::path(
    post,
    path = "/reservations/{id}/extend",
    tag = "reservations",
    security(("bearer_auth" = [])),
    params(
        ("id" = Uuid, Path, description = "Reservation ID")
    ),
    responses(
        (status = 200, description = "Loan extended or already extended", body = ExtendResponse),
        (status = 404, description = "Reservation not found"),
        (status = 422, description = "Reservation is not on loan")
    )
)]
pub async fn extend_loan(
    State(state): State<crate::AppState>,
    AdminUser(_claims): AdminUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ExtendResponse>> {
    let response = match state.services.reservations.extend_loan(id).await? {
        ExtendOutcome::Extended(reservation) => ExtendResponse {
            reservation,
            extended: true,
            message: "Loan extended".to_string(),
        },
        ExtendOutcome::AlreadyExtended(reservation) => ExtendResponse {
            reservation,
            extended: false,
            message: "Loan was already extended".to_string(),
        },
    };
    Ok(Json(response))
}

/// Move a reservation back to the waitlist
#[utoipa::path(
    post,
    path = "/reservations/{id}/waitlist",
    tag = "reservations",
    security(("bearer_auth" = [])),
    params(
        ("id" = Uuid, Path, description = "Reservation ID")
    ),
    responses(
        (status = 200, description = "Waitlist entry created", body = WaitlistEntry),
        (status = 404, description = "Reservation not found")
    )
)]
pub async fn move_to_waitlist(
    State(state): State<crate::AppState>,
    AdminUser(_claims): AdminUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<WaitlistEntry>> {
    let entry = state.services.reservations.move_to_waitlist(id).await?;
    Ok(Json(entry))
}

/// Archive a reservation without a return
#[utoipa::path(
    post,
    path = "/reservations/{id}/archive",
    tag = "reservations",
    security(("bearer_auth" = [])),
    params(
        ("id" = Uuid, Path, description = "Reservation ID")
    ),
    responses(
        (status = 200, description = "Reservation archived", body = ArchiveEntry),
        (status = 404, description = "Reservation not found")
    )
)]
pub async fn archive_reservation(
    State(state): State<crate::AppState>,
    AdminUser(_claims): AdminUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ArchiveEntry>> {
    let entry = state.services.reservations.archive_reservation(id).await?;
    Ok(Json(entry))
}

/// Delete a reservation (kept in the archives)
#[utoipa::path(
    delete,
    path = "/reservations/{id}",
    tag = "reservations",
    security(("bearer_auth" = [])),
    params(
        ("id" = Uuid, Path, description = "Reservation ID")
    ),
    responses(
        (status = 200, description = "Reservation deleted", body = ArchiveEntry),
        (status = 404, description = "Reservation not found")
    )
)]
pub async fn delete_reservation(
    State(state): State<crate::AppState>,
    AdminUser(_claims): AdminUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ArchiveEntry>> {
    let entry = state.services.reservations.delete_reservation(id).await?;
    Ok(Json(entry))
}

/// Set the bag label of a reservation
#[utoipa::path(
    put,
    path = "/reservations/{id}/bag",
    tag = "reservations",
    security(("bearer_auth" = [])),
    params(
        ("id" = Uuid, Path, description = "Reservation ID")
    ),
    request_body = UpdateBagNumber,
    responses(
        (status = 200, description = "Bag number updated", body = Reservation),
        (status = 400, description = "Change not confirmed"),
        (status = 404, description = "Reservation not found")
    )
)]
pub async fn update_bag_number(
    State(state): State<crate::AppState>,
    AdminUser(_claims): AdminUser,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateBagNumber>,
) -> AppResult<Json<Reservation>> {
    let reservation = state
        .services
        .reservations
        .update_bag_number(id, &request)
        .await?;
    Ok(Json(reservation))
}

/// Live feed of reservation changes (server-sent events)
#[utoipa::path(
    get,
    path = "/reservations/events",
    tag = "reservations",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Stream of ReservationChange events", content_type = "text/event-stream")
    )
)]
pub async fn reservation_events(
    State(state): State<crate::AppState>,
    AdminUser(_claims): AdminUser,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(state.services.changes.subscribe()).filter_map(|change| {
        match change {
            Ok(change) => match Event::default().event("reservation").json_data(&change) {
                Ok(event) => Some(Ok(event)),
                Err(e) => {
                    tracing::warn!(error = %e, "Could not encode change event");
                    None
                }
            },
            // Slow client; it refetches on the next event anyway
            Err(e) => {
                tracing::debug!(error = %e, "Change feed lagged");
                None
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
