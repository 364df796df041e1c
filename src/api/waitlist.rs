//! Waitlist endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::{
        waitlist::{CreateWaitlistEntry, WaitlistQuery},
        Reservation, WaitlistEntry,
    },
};

use super::AdminUser;

/// Join the waitlist for an item
#[utoipa::path(
    post,
    path = "/waitlist",
    tag = "waitlist",
    request_body = CreateWaitlistEntry,
    responses(
        (status = 201, description = "Waitlist entry created", body = WaitlistEntry),
        (status = 404, description = "Item not found"),
        (status = 409, description = "Item not available")
    )
)]
pub async fn join_waitlist(
    State(state): State<crate::AppState>,
    Json(request): Json<CreateWaitlistEntry>,
) -> AppResult<(StatusCode, Json<WaitlistEntry>)> {
    let entry = state.services.reservations.join_waitlist(&request).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

/// List the waitlist, oldest request first
#[utoipa::path(
    get,
    path = "/waitlist",
    tag = "waitlist",
    security(("bearer_auth" = [])),
    params(WaitlistQuery),
    responses(
        (status = 200, description = "Waitlist", body = Vec<WaitlistEntry>)
    )
)]
pub async fn list_waitlist(
    State(state): State<crate::AppState>,
    AdminUser(_claims): AdminUser,
    Query(query): Query<WaitlistQuery>,
) -> AppResult<Json<Vec<WaitlistEntry>>> {
    let entries = state.services.reservations.list_waitlist(&query).await?;
    Ok(Json(entries))
}

/// Turn a waitlist entry into a reservation
#[utoipa::path(
    post,
    path = "/waitlist/{id}/convert",
    tag = "waitlist",
    security(("bearer_auth" = [])),
    params(
        ("id" = Uuid, Path, description = "Waitlist entry ID")
    ),
    responses(
        (status = 201, description = "Reservation created", body = Reservation),
        (status = 404, description = "Entry or item not found"),
        (status = 409, description = "No copies available")
    )
)]
pub async fn convert_entry(
    State(state): State<crate::AppState>,
    AdminUser(_claims): AdminUser,
    Path(id): Path<Uuid>,
) -> AppResult<(StatusCode, Json<Reservation>)> {
    let reservation = state.services.reservations.convert_waitlist(id).await?;
    Ok((StatusCode::CREATED, Json(reservation)))
}

/// Remove a waitlist entry
#[utoipa::path(
    delete,
    path = "/waitlist/{id}",
    tag = "waitlist",
    security(("bearer_auth" = [])),
    params(
        ("id" = Uuid, Path, description = "Waitlist entry ID")
    ),
    responses(
        (status = 204, description = "Entry removed"),
        (status = 404, description = "Entry not found")
    )
)]
pub async fn discard_entry(
    State(state): State<crate::AppState>,
    AdminUser(_claims): AdminUser,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    state.services.reservations.discard_waitlist_entry(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
