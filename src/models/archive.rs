//! Archive entry model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::{fmt, str::FromStr};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::reservation::FamilyContact;
use crate::error::AppError;

/// Why a reservation left the active store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum ArchiveReason {
    Returned,
    Archived,
    Deleted,
}

impl ArchiveReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveReason::Returned => "Returned",
            ArchiveReason::Archived => "Archived",
            ArchiveReason::Deleted => "Deleted",
        }
    }
}

impl fmt::Display for ArchiveReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArchiveReason {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Returned" => Ok(ArchiveReason::Returned),
            "Archived" => Ok(ArchiveReason::Archived),
            "Deleted" => Ok(ArchiveReason::Deleted),
            other => Err(AppError::Validation(format!("Unknown archive reason '{}'", other))),
        }
    }
}

/// Terminal record of a reservation. Only `note` is editable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveEntry {
    pub id: Uuid,
    pub item_id: Uuid,
    pub item_name: String,
    pub parent_name: String,
    pub parent_email: String,
    pub child_name: String,
    pub preferred_day: Option<String>,
    pub note: Option<String>,
    /// Always "Returned" for display; see `archive_reason`
    pub status: String,
    pub archive_reason: ArchiveReason,
    pub bag_no: Option<String>,
    pub loan_start_date: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub archived_at: DateTime<Utc>,
}

impl ArchiveEntry {
    pub fn contact(&self) -> FamilyContact {
        FamilyContact {
            parent_name: self.parent_name.clone(),
            parent_email: self.parent_email.clone(),
            child_name: self.child_name.clone(),
        }
    }
}

/// Flat database row for [`ArchiveEntry`]
#[derive(Debug, FromRow)]
pub struct ArchiveRow {
    pub id: Uuid,
    pub item_id: Uuid,
    pub item_name: String,
    pub parent_name: String,
    pub parent_email: String,
    pub child_name: String,
    pub preferred_day: Option<String>,
    pub note: Option<String>,
    pub status: String,
    pub archive_reason: String,
    pub bag_no: Option<String>,
    pub loan_start_date: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub archived_at: DateTime<Utc>,
}

impl TryFrom<ArchiveRow> for ArchiveEntry {
    type Error = AppError;

    fn try_from(row: ArchiveRow) -> Result<Self, Self::Error> {
        Ok(ArchiveEntry {
            id: row.id,
            item_id: row.item_id,
            item_name: row.item_name,
            parent_name: row.parent_name,
            parent_email: row.parent_email,
            child_name: row.child_name,
            preferred_day: row.preferred_day,
            note: row.note,
            status: row.status,
            archive_reason: row.archive_reason.parse()?,
            bag_no: row.bag_no,
            loan_start_date: row.loan_start_date,
            due_date: row.due_date,
            created_at: row.created_at,
            archived_at: row.archived_at,
        })
    }
}

/// Archive note edit
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct UpdateArchiveNote {
    pub note: Option<String>,
}

/// Archive query parameters
#[derive(Debug, Default, Deserialize, IntoParams, ToSchema)]
pub struct ArchiveQuery {
    /// Case-insensitive substring of item, parent or child name
    pub search: Option<String>,
}
