//! Reporting and monitor endpoints

use axum::{
    extract::{Path, State},
    http::header,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use utoipa::ToSchema;

use crate::{
    error::AppResult,
    services::{inventory::LedgerLine, monitor::SweepReport, reports::DashboardSummary},
};

use super::AdminUser;

/// Dashboard counters
#[utoipa::path(
    get,
    path = "/reports/summary",
    tag = "reports",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Dashboard summary", body = DashboardSummary)
    )
)]
pub async fn get_summary(
    State(state): State<crate::AppState>,
    AdminUser(_claims): AdminUser,
) -> AppResult<Json<DashboardSummary>> {
    let summary = state.services.reports.summary().await?;
    Ok(Json(summary))
}

/// Inventory ledger balance per item
#[utoipa::path(
    get,
    path = "/reports/inventory-audit",
    tag = "reports",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Ledger lines", body = Vec<LedgerLine>)
    )
)]
pub async fn get_inventory_audit(
    State(state): State<crate::AppState>,
    AdminUser(_claims): AdminUser,
) -> AppResult<Json<Vec<LedgerLine>>> {
    let lines = state.services.reports.inventory_audit().await?;
    Ok(Json(lines))
}

/// Exportable collections
#[derive(Debug, Clone, Copy, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Dataset {
    Inventory,
    Reservations,
    Waitlist,
    Archives,
}

impl Dataset {
    fn file_name(&self) -> &'static str {
        match self {
            Dataset::Inventory => "inventory.csv",
            Dataset::Reservations => "reservations.csv",
            Dataset::Waitlist => "waitlist.csv",
            Dataset::Archives => "archives.csv",
        }
    }
}

/// Download a collection as CSV
#[utoipa::path(
    get,
    path = "/reports/export/{dataset}",
    tag = "reports",
    security(("bearer_auth" = [])),
    params(
        ("dataset" = Dataset, Path, description = "inventory, reservations, waitlist or archives")
    ),
    responses(
        (status = 200, description = "CSV file", content_type = "text/csv")
    )
)]
pub async fn export_csv(
    State(state): State<crate::AppState>,
    AdminUser(_claims): AdminUser,
    Path(dataset): Path<Dataset>,
) -> AppResult<impl IntoResponse> {
    let reports = &state.services.reports;
    let body = match dataset {
        Dataset::Inventory => reports.inventory_csv().await?,
        Dataset::Reservations => reports.reservations_csv().await?,
        Dataset::Waitlist => reports.waitlist_csv().await?,
        Dataset::Archives => reports.archives_csv().await?,
    };

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", dataset.file_name()),
            ),
        ],
        body,
    ))
}

/// Run one due-date sweep now
#[utoipa::path(
    post,
    path = "/monitor/sweep",
    tag = "reports",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Sweep finished", body = SweepReport)
    )
)]
pub async fn run_sweep(
    State(state): State<crate::AppState>,
    AdminUser(claims): AdminUser,
) -> AppResult<Json<SweepReport>> {
    tracing::info!(requested_by = %claims.sub, "Manual due-date sweep");
    let report = state.services.monitor.sweep().await?;
    Ok(Json(report))
}
