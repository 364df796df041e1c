//! Reservation (active request or loan) model and related types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::{fmt, str::FromStr};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::error::AppError;

/// Reservation lifecycle status.
///
/// `Returned` is accepted as a target by the status setter but never stored:
/// a returned reservation leaves the active store and becomes an archive entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum ReservationStatus {
    Pending,
    #[serde(rename = "Ready for Pickup")]
    ReadyForPickup,
    #[serde(rename = "On Loan")]
    OnLoan,
    Due,
    #[serde(rename = "Review Return")]
    ReviewReturn,
    Returned,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "Pending",
            ReservationStatus::ReadyForPickup => "Ready for Pickup",
            ReservationStatus::OnLoan => "On Loan",
            ReservationStatus::Due => "Due",
            ReservationStatus::ReviewReturn => "Review Return",
            ReservationStatus::Returned => "Returned",
        }
    }

    /// Statuses in which the toy is physically with the family
    pub fn is_loaned(&self) -> bool {
        matches!(
            self,
            ReservationStatus::OnLoan | ReservationStatus::Due | ReservationStatus::ReviewReturn
        )
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReservationStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(ReservationStatus::Pending),
            "Ready for Pickup" => Ok(ReservationStatus::ReadyForPickup),
            "On Loan" => Ok(ReservationStatus::OnLoan),
            "Due" => Ok(ReservationStatus::Due),
            "Review Return" => Ok(ReservationStatus::ReviewReturn),
            "Returned" => Ok(ReservationStatus::Returned),
            other => Err(AppError::Validation(format!(
                "Unknown reservation status '{}'",
                other
            ))),
        }
    }
}

/// Loan bookkeeping, present once a reservation has been handed out
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LoanPeriod {
    pub loan_start_date: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    /// Claim flag for the "due soon" reminder
    pub due_reminder_sent: bool,
    /// Claim flag for the 3-days-overdue notice
    #[serde(rename = "overdue3DaySent")]
    pub overdue_3day_sent: bool,
    /// A loan can be extended once
    pub extended: bool,
}

impl LoanPeriod {
    pub fn starting(at: DateTime<Utc>, due_date: DateTime<Utc>) -> Self {
        Self {
            loan_start_date: at,
            due_date,
            due_reminder_sent: false,
            overdue_3day_sent: false,
            extended: false,
        }
    }

    pub fn flag(&self, flag: ReminderFlag) -> bool {
        match flag {
            ReminderFlag::DueReminder => self.due_reminder_sent,
            ReminderFlag::OverdueNotice => self.overdue_3day_sent,
        }
    }

    pub fn set_flag(&mut self, flag: ReminderFlag, value: bool) {
        match flag {
            ReminderFlag::DueReminder => self.due_reminder_sent = value,
            ReminderFlag::OverdueNotice => self.overdue_3day_sent = value,
        }
    }
}

/// Per-reservation single-field locks used to send each reminder once
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderFlag {
    DueReminder,
    OverdueNotice,
}

impl fmt::Display for ReminderFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReminderFlag::DueReminder => f.write_str("dueReminderSent"),
            ReminderFlag::OverdueNotice => f.write_str("overdue3DaySent"),
        }
    }
}

/// Active reservation record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    pub id: Uuid,
    pub item_id: Uuid,
    pub item_name: String,
    pub parent_name: String,
    pub parent_email: String,
    pub child_name: String,
    pub preferred_day: Option<String>,
    pub note: Option<String>,
    pub status: ReservationStatus,
    /// Physical bag label
    pub bag_no: Option<String>,
    pub loan: Option<LoanPeriod>,
    /// One unit of the item's stock is held by this reservation
    pub inventory_committed: bool,
    pub review_return_at: Option<DateTime<Utc>>,
    /// Last notification failure, kept for admin review
    pub notification_error: Option<String>,
    pub notification_error_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Borrowed view of a reservation used to dispatch on its state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationPhase<'a> {
    OnLoan(&'a LoanPeriod),
    Due(&'a LoanPeriod),
    Other(ReservationStatus),
}

impl Reservation {
    pub fn phase(&self) -> ReservationPhase<'_> {
        match (self.status, self.loan.as_ref()) {
            (ReservationStatus::OnLoan, Some(loan)) => ReservationPhase::OnLoan(loan),
            (ReservationStatus::Due, Some(loan)) => ReservationPhase::Due(loan),
            (status, _) => ReservationPhase::Other(status),
        }
    }

    /// Whether the toy ever left the library under this reservation
    pub fn was_loaned(&self) -> bool {
        self.status.is_loaned() || self.loan.is_some()
    }

    pub fn contact(&self) -> FamilyContact {
        FamilyContact {
            parent_name: self.parent_name.clone(),
            parent_email: self.parent_email.clone(),
            child_name: self.child_name.clone(),
        }
    }
}

/// Who a request belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FamilyContact {
    #[validate(length(min = 1, message = "Parent name is required"))]
    pub parent_name: String,
    #[validate(email(message = "Invalid email format"))]
    pub parent_email: String,
    #[validate(length(min = 1, message = "Child name is required"))]
    pub child_name: String,
}

/// Flat database row for [`Reservation`]
#[derive(Debug, FromRow)]
pub struct ReservationRow {
    pub id: Uuid,
    pub item_id: Uuid,
    pub item_name: String,
    pub parent_name: String,
    pub parent_email: String,
    pub child_name: String,
    pub preferred_day: Option<String>,
    pub note: Option<String>,
    pub status: String,
    pub bag_no: Option<String>,
    pub loan_start_date: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,
    pub due_reminder_sent: bool,
    pub overdue_3day_sent: bool,
    pub extended: bool,
    pub inventory_committed: bool,
    pub review_return_at: Option<DateTime<Utc>>,
    pub notification_error: Option<String>,
    pub notification_error_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<ReservationRow> for Reservation {
    type Error = AppError;

    fn try_from(row: ReservationRow) -> Result<Self, Self::Error> {
        let loan = match (row.loan_start_date, row.due_date) {
            (Some(loan_start_date), Some(due_date)) => Some(LoanPeriod {
                loan_start_date,
                due_date,
                due_reminder_sent: row.due_reminder_sent,
                overdue_3day_sent: row.overdue_3day_sent,
                extended: row.extended,
            }),
            _ => None,
        };

        Ok(Reservation {
            id: row.id,
            item_id: row.item_id,
            item_name: row.item_name,
            parent_name: row.parent_name,
            parent_email: row.parent_email,
            child_name: row.child_name,
            preferred_day: row.preferred_day,
            note: row.note,
            status: row.status.parse()?,
            bag_no: row.bag_no,
            loan,
            inventory_committed: row.inventory_committed,
            review_return_at: row.review_return_at,
            notification_error: row.notification_error,
            notification_error_at: row.notification_error_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Parent-facing reservation request
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateReservation {
    pub item_id: Uuid,
    #[serde(flatten)]
    #[validate(nested)]
    pub contact: FamilyContact,
    pub preferred_day: Option<String>,
    #[validate(length(max = 2000, message = "Note is too long"))]
    pub note: Option<String>,
}

/// Admin status change request
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateReservationStatus {
    pub status: ReservationStatus,
}

/// Bag label change; only persisted when `confirmed` is set
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBagNumber {
    pub bag_no: Option<String>,
    #[serde(default)]
    pub confirmed: bool,
}

/// Reservation query parameters
#[derive(Debug, Default, Deserialize, IntoParams, ToSchema)]
pub struct ReservationQuery {
    pub status: Option<ReservationStatus>,
    /// Case-insensitive substring of item, parent or child name
    pub search: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn reservation(status: ReservationStatus, loan: Option<LoanPeriod>) -> Reservation {
        let now = Utc::now();
        Reservation {
            id: Uuid::new_v4(),
            item_id: Uuid::new_v4(),
            item_name: "Stacking rings".to_string(),
            parent_name: "Sam".to_string(),
            parent_email: "sam@example.org".to_string(),
            child_name: "Ada".to_string(),
            preferred_day: None,
            note: None,
            status,
            bag_no: None,
            loan,
            inventory_committed: true,
            review_return_at: None,
            notification_error: None,
            notification_error_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_phase_requires_loan_period() {
        let now = Utc::now();
        let loan = LoanPeriod::starting(now, now + Duration::days(14));

        let on_loan = reservation(ReservationStatus::OnLoan, Some(loan.clone()));
        assert_eq!(on_loan.phase(), ReservationPhase::OnLoan(&loan));

        // A manually flagged Due without loan dates is not tracked by the monitor
        let bare_due = reservation(ReservationStatus::Due, None);
        assert_eq!(bare_due.phase(), ReservationPhase::Other(ReservationStatus::Due));
    }

    #[test]
    fn test_was_loaned() {
        let now = Utc::now();
        assert!(!reservation(ReservationStatus::Pending, None).was_loaned());
        assert!(reservation(ReservationStatus::ReviewReturn, None).was_loaned());

        let loan = LoanPeriod::starting(now, now + Duration::days(14));
        assert!(reservation(ReservationStatus::Pending, Some(loan)).was_loaned());
    }

    #[test]
    fn test_status_parsing_uses_display_labels() {
        assert_eq!(
            "Ready for Pickup".parse::<ReservationStatus>().unwrap(),
            ReservationStatus::ReadyForPickup
        );
        assert!("Lost".parse::<ReservationStatus>().is_err());
    }

    #[test]
    fn test_reminder_flags() {
        let now = Utc::now();
        let mut loan = LoanPeriod::starting(now, now + Duration::days(14));
        loan.set_flag(ReminderFlag::OverdueNotice, true);
        assert!(loan.flag(ReminderFlag::OverdueNotice));
        assert!(!loan.flag(ReminderFlag::DueReminder));
    }
}
