//! Inventory ledger.
//!
//! An item's `quantity` plus the number of active reservations holding a unit
//! of it must equal its `total_quantity`. The engine keeps that balance by
//! calling [`commit_unit`] exactly once when a reservation starts holding stock
//! and [`release_unit`] exactly once when it stops.

use serde::Serialize;
use std::collections::HashMap;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{Item, ItemStatus, Reservation},
};

/// Status implied by the stock counter; the admin lock always wins
pub fn derive_status(item: &Item) -> ItemStatus {
    if item.status == ItemStatus::NotAvailable {
        ItemStatus::NotAvailable
    } else if item.quantity == 0 {
        ItemStatus::OnLoan
    } else {
        ItemStatus::Available
    }
}

/// Clamp `quantity` into `[0, total_quantity]` and refresh the derived status
pub fn normalize(item: &mut Item) {
    item.total_quantity = item.total_quantity.max(1);
    item.quantity = item.quantity.clamp(0, item.total_quantity);
    item.status = derive_status(item);
}

/// Take one unit off the shelf for a new reservation
pub fn commit_unit(item: &mut Item) -> AppResult<()> {
    if item.quantity <= 0 {
        return Err(AppError::NoStock(format!(
            "No copies of '{}' are available",
            item.name
        )));
    }
    item.quantity -= 1;
    normalize(item);
    Ok(())
}

/// Put one unit back on the shelf
pub fn release_unit(item: &mut Item) {
    if item.quantity >= item.total_quantity {
        tracing::warn!(
            item_id = %item.id,
            quantity = item.quantity,
            total_quantity = item.total_quantity,
            "Release on a full shelf, capping at total quantity"
        );
    }
    item.quantity += 1;
    normalize(item);
}

/// Ledger balance of one item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LedgerLine {
    pub item_id: Uuid,
    pub item_name: String,
    pub quantity: i32,
    pub total_quantity: i32,
    /// Active reservations holding a unit
    pub committed: i64,
    /// `total_quantity - quantity - committed`; non-zero means units are unaccounted for
    pub discrepancy: i64,
}

impl LedgerLine {
    pub fn is_balanced(&self) -> bool {
        self.discrepancy == 0
    }
}

/// Reconcile every item against the active reservations
pub fn audit(items: &[Item], reservations: &[Reservation]) -> Vec<LedgerLine> {
    let mut committed: HashMap<Uuid, i64> = HashMap::new();
    for reservation in reservations.iter().filter(|r| r.inventory_committed) {
        *committed.entry(reservation.item_id).or_default() += 1;
    }

    items
        .iter()
        .map(|item| {
            let held = committed.get(&item.id).copied().unwrap_or(0);
            LedgerLine {
                item_id: item.id,
                item_name: item.name.clone(),
                quantity: item.quantity,
                total_quantity: item.total_quantity,
                committed: held,
                discrepancy: i64::from(item.total_quantity) - i64::from(item.quantity) - held,
            }
        })
        .collect()
}
