//! Item (toy catalog entry) model and related types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::{fmt, str::FromStr};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::error::AppError;

/// Catalog availability of an item.
///
/// `Available` and `OnLoan` are derived from the stock counter; `NotAvailable`
/// is an admin override that automatic recomputation never clears.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum ItemStatus {
    Available,
    #[serde(rename = "On Loan")]
    OnLoan,
    #[serde(rename = "Not Available")]
    NotAvailable,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Available => "Available",
            ItemStatus::OnLoan => "On Loan",
            ItemStatus::NotAvailable => "Not Available",
        }
    }
}

impl Default for ItemStatus {
    fn default() -> Self {
        ItemStatus::Available
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Available" => Ok(ItemStatus::Available),
            "On Loan" => Ok(ItemStatus::OnLoan),
            "Not Available" => Ok(ItemStatus::NotAvailable),
            other => Err(AppError::Validation(format!("Unknown item status '{}'", other))),
        }
    }
}

/// Toy record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: Uuid,
    pub name: String,
    pub category: Option<String>,
    pub age_group: Option<String>,
    pub description: Option<String>,
    /// Copies currently on the shelf
    pub quantity: i32,
    /// Copies owned by the library
    pub total_quantity: i32,
    pub status: ItemStatus,
    /// Image URLs on the external image host
    pub images: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Item {
    pub fn is_locked(&self) -> bool {
        self.status == ItemStatus::NotAvailable
    }
}

/// Flat database row for [`Item`]
#[derive(Debug, FromRow)]
pub struct ItemRow {
    pub id: Uuid,
    pub name: String,
    pub category: Option<String>,
    pub age_group: Option<String>,
    pub description: Option<String>,
    pub quantity: i32,
    pub total_quantity: i32,
    pub status: String,
    pub images: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<ItemRow> for Item {
    type Error = AppError;

    fn try_from(row: ItemRow) -> Result<Self, Self::Error> {
        Ok(Item {
            id: row.id,
            name: row.name,
            category: row.category,
            age_group: row.age_group,
            description: row.description,
            quantity: row.quantity,
            total_quantity: row.total_quantity,
            status: row.status.parse()?,
            images: row.images,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Create item request
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateItem {
    #[validate(length(min = 1, message = "Toy name is required"))]
    pub name: String,
    pub category: Option<String>,
    pub age_group: Option<String>,
    pub description: Option<String>,
    #[validate(range(min = 0, message = "Quantity cannot be negative"))]
    pub quantity: i32,
    /// Defaults to `quantity` when omitted
    #[validate(range(min = 1, message = "Total quantity must be at least 1"))]
    pub total_quantity: Option<i32>,
    /// Only `Not Available` is honoured; other values are derived from stock
    pub status: Option<ItemStatus>,
    #[serde(default)]
    pub images: Vec<String>,
}

/// Update item request
#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateItem {
    #[validate(length(min = 1, message = "Toy name cannot be empty"))]
    pub name: Option<String>,
    pub category: Option<String>,
    pub age_group: Option<String>,
    pub description: Option<String>,
    #[validate(range(min = 0, message = "Quantity cannot be negative"))]
    pub quantity: Option<i32>,
    #[validate(range(min = 1, message = "Total quantity must be at least 1"))]
    pub total_quantity: Option<i32>,
    pub status: Option<ItemStatus>,
    pub images: Option<Vec<String>>,
}

/// Catalog ordering
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ItemSort {
    #[default]
    Newest,
    Az,
    Za,
}

/// Item query parameters
#[derive(Debug, Default, Deserialize, IntoParams, ToSchema)]
pub struct ItemQuery {
    /// Exact category match
    pub category: Option<String>,
    /// Case-insensitive substring of the toy name
    pub search: Option<String>,
    pub sort: Option<ItemSort>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_labels_round_trip_through_text() {
        for status in [ItemStatus::Available, ItemStatus::OnLoan, ItemStatus::NotAvailable] {
            assert_eq!(status.as_str().parse::<ItemStatus>().unwrap(), status);
        }
        assert!("Pending".parse::<ItemStatus>().is_err());
    }

    #[test]
    fn test_status_serializes_with_display_label() {
        let json = serde_json::to_string(&ItemStatus::NotAvailable).unwrap();
        assert_eq!(json, "\"Not Available\"");
    }
}
