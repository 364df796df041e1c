//! Dashboard counts, inventory audit and CSV exports

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use super::inventory::{self, LedgerLine};
use crate::{
    error::{AppError, AppResult},
    models::{ItemStatus, ReservationStatus},
    repository::Repository,
};

/// Admin dashboard counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSummary {
    pub toy_types: usize,
    pub total_copies: i64,
    pub available_copies: i64,
    pub copies_on_loan: i64,
    pub locked_items: usize,
    pub pending: usize,
    pub ready_for_pickup: usize,
    pub on_loan: usize,
    pub due: usize,
    pub review_return: usize,
    pub waitlist: usize,
    pub archived: usize,
    /// Reservations carrying an undelivered notification
    pub notification_errors: usize,
}

fn date(at: Option<DateTime<Utc>>) -> String {
    at.map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

fn finish(writer: csv::Writer<Vec<u8>>) -> AppResult<String> {
    let bytes = writer
        .into_inner()
        .map_err(|e| AppError::Internal(format!("CSV export failed: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| AppError::Internal(format!("CSV export failed: {}", e)))
}

fn csv_error(e: csv::Error) -> AppError {
    AppError::Internal(format!("CSV export failed: {}", e))
}

#[derive(Clone)]
pub struct ReportsService {
    store: Repository,
}

impl ReportsService {
    pub fn new(store: Repository) -> Self {
        Self { store }
    }

    pub async fn summary(&self) -> AppResult<DashboardSummary> {
        let items = self.store.list_items().await?;
        let reservations = self.store.list_reservations().await?;
        let waitlist = self.store.list_waitlist().await?;
        let archives = self.store.list_archives().await?;

        let mut summary = DashboardSummary {
            toy_types: items.len(),
            total_copies: items.iter().map(|i| i64::from(i.total_quantity)).sum(),
            available_copies: items.iter().map(|i| i64::from(i.quantity)).sum(),
            locked_items: items
                .iter()
                .filter(|i| i.status == ItemStatus::NotAvailable)
                .count(),
            waitlist: waitlist.len(),
            archived: archives.len(),
            ..DashboardSummary::default()
        };
        summary.copies_on_loan = summary.total_copies - summary.available_copies;
        for reservation in &reservations {
            match reservation.status {
                ReservationStatus::Pending => summary.pending += 1,
                ReservationStatus::ReadyForPickup => summary.ready_for_pickup += 1,
                ReservationStatus::OnLoan => summary.on_loan += 1,
                ReservationStatus::Due => summary.due += 1,
                ReservationStatus::ReviewReturn => summary.review_return += 1,
                ReservationStatus::Returned => {}
            }
            if reservation.notification_error.is_some() {
                summary.notification_errors += 1;
            }
        }
        Ok(summary)
    }

    /// Ledger balance per item
    pub async fn inventory_audit(&self) -> AppResult<Vec<LedgerLine>> {
        let items = self.store.list_items().await?;
        let reservations = self.store.list_reservations().await?;
        let lines = inventory::audit(&items, &reservations);

        let unbalanced = lines.iter().filter(|l| !l.is_balanced()).count();
        if unbalanced > 0 {
            tracing::warn!(unbalanced, "Inventory audit found unbalanced items");
        }
        Ok(lines)
    }

    pub async fn inventory_csv(&self) -> AppResult<String> {
        let items = self.store.list_items().await?;
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer
            .write_record([
                "Name",
                "Category",
                "Age Group",
                "Status",
                "Quantity",
                "Total Quantity",
            ])
            .map_err(csv_error)?;
        for item in &items {
            writer
                .write_record([
                    item.name.as_str(),
                    item.category.as_deref().unwrap_or_default(),
                    item.age_group.as_deref().unwrap_or_default(),
                    item.status.as_str(),
                    item.quantity.to_string().as_str(),
                    item.total_quantity.to_string().as_str(),
                ])
                .map_err(csv_error)?;
        }
        finish(writer)
    }

    pub async fn reservations_csv(&self) -> AppResult<String> {
        let reservations = self.store.list_reservations().await?;
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer
            .write_record([
                "Toy",
                "Parent",
                "Email",
                "Child",
                "Status",
                "Bag",
                "Preferred Day",
                "Loan Start",
                "Due Date",
                "Extended",
                "Created",
            ])
            .map_err(csv_error)?;
        for r in &reservations {
            let loan = r.loan.as_ref();
            writer
                .write_record([
                    r.item_name.as_str(),
                    r.parent_name.as_str(),
                    r.parent_email.as_str(),
                    r.child_name.as_str(),
                    r.status.as_str(),
                    r.bag_no.as_deref().unwrap_or_default(),
                    r.preferred_day.as_deref().unwrap_or_default(),
                    date(loan.map(|l| l.loan_start_date)).as_str(),
                    date(loan.map(|l| l.due_date)).as_str(),
                    if loan.is_some_and(|l| l.extended) { "yes" } else { "no" },
                    date(Some(r.created_at)).as_str(),
                ])
                .map_err(csv_error)?;
        }
        finish(writer)
    }

    pub async fn waitlist_csv(&self) -> AppResult<String> {
        let entries = self.store.list_waitlist().await?;
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer
            .write_record(["Toy", "Parent", "Email", "Child", "Note", "Requested"])
            .map_err(csv_error)?;
        for w in &entries {
            writer
                .write_record([
                    w.item_name.as_str(),
                    w.parent_name.as_str(),
                    w.parent_email.as_str(),
                    w.child_name.as_str(),
                    w.note.as_deref().unwrap_or_default(),
                    date(Some(w.created_at)).as_str(),
                ])
                .map_err(csv_error)?;
        }
        finish(writer)
    }

    pub async fn archives_csv(&self) -> AppResult<String> {
        let entries = self.store.list_archives().await?;
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer
            .write_record([
                "Toy", "Parent", "Email", "Child", "Reason", "Bag", "Loan Start", "Due Date",
                "Archived", "Note",
            ])
            .map_err(csv_error)?;
        for a in &entries {
            writer
                .write_record([
                    a.item_name.as_str(),
                    a.parent_name.as_str(),
                    a.parent_email.as_str(),
                    a.child_name.as_str(),
                    a.archive_reason.as_str(),
                    a.bag_no.as_deref().unwrap_or_default(),
                    date(a.loan_start_date).as_str(),
                    date(a.due_date).as_str(),
                    date(Some(a.archived_at)).as_str(),
                    a.note.as_deref().unwrap_or_default(),
                ])
                .map_err(csv_error)?;
        }
        finish(writer)
    }
}
