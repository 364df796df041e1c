//! Archive endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::{
        archive::{ArchiveQuery, UpdateArchiveNote},
        ArchiveEntry, Reservation,
    },
};

use super::AdminUser;

/// List archived reservations, most recent first
#[utoipa::path(
    get,
    path = "/archives",
    tag = "archives",
    security(("bearer_auth" = [])),
    params(ArchiveQuery),
    responses(
        (status = 200, description = "Archive entries", body = Vec<ArchiveEntry>)
    )
)]
pub async fn list_archives(
    State(state): State<crate::AppState>,
    AdminUser(_claims): AdminUser,
    Query(query): Query<ArchiveQuery>,
) -> AppResult<Json<Vec<ArchiveEntry>>> {
    let entries = state.services.reservations.list_archives(&query).await?;
    Ok(Json(entries))
}

/// Restore an archive entry as a pending reservation
#[utoipa::path(
    post,
    path = "/archives/{id}/restore",
    tag = "archives",
    security(("bearer_auth" = [])),
    params(
        ("id" = Uuid, Path, description = "Archive entry ID")
    ),
    responses(
        (status = 201, description = "Reservation restored", body = Reservation),
        (status = 404, description = "Entry or item not found"),
        (status = 409, description = "No copies available")
    )
)]
pub async fn restore_entry(
    State(state): State<crate::AppState>,
    AdminUser(_claims): AdminUser,
    Path(id): Path<Uuid>,
) -> AppResult<(StatusCode, Json<Reservation>)> {
    let reservation = state.services.reservations.restore_archive(id).await?;
    Ok((StatusCode::CREATED, Json(reservation)))
}

/// Edit the note on an archive entry
#[utoipa::path(
    put,
    path = "/archives/{id}/note",
    tag = "archives",
    security(("bearer_auth" = [])),
    params(
        ("id" = Uuid, Path, description = "Archive entry ID")
    ),
    request_body = UpdateArchiveNote,
    responses(
        (status = 200, description = "Note updated", body = ArchiveEntry),
        (status = 404, description = "Entry not found")
    )
)]
pub async fn update_note(
    State(state): State<crate::AppState>,
    AdminUser(_claims): AdminUser,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateArchiveNote>,
) -> AppResult<Json<ArchiveEntry>> {
    let entry = state
        .services
        .reservations
        .update_archive_note(id, request.note)
        .await?;
    Ok(Json(entry))
}
