//! Waitlist entry model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use super::reservation::FamilyContact;

/// Deferred request for an item with no stock; holds no inventory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WaitlistEntry {
    pub id: Uuid,
    pub item_id: Uuid,
    pub item_name: String,
    pub parent_name: String,
    pub parent_email: String,
    pub child_name: String,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl WaitlistEntry {
    pub fn contact(&self) -> FamilyContact {
        FamilyContact {
            parent_name: self.parent_name.clone(),
            parent_email: self.parent_email.clone(),
            child_name: self.child_name.clone(),
        }
    }
}

/// Parent-facing waitlist request
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateWaitlistEntry {
    pub item_id: Uuid,
    #[serde(flatten)]
    #[validate(nested)]
    pub contact: FamilyContact,
    #[validate(length(max = 2000, message = "Note is too long"))]
    pub note: Option<String>,
}

/// Waitlist query parameters
#[derive(Debug, Default, Deserialize, IntoParams, ToSchema)]
pub struct WaitlistQuery {
    /// Case-insensitive substring of item, parent or child name
    pub search: Option<String>,
}
