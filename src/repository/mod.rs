//! Document store layer.
//!
//! Four collections (items, reservations, waitlist, archives) behind the
//! [`Store`] trait. Every mutation that must keep the inventory ledger
//! balanced goes through a [`StoreTx`]: records read from a transaction are
//! locked until it commits or is dropped, and dropping a transaction without
//! calling [`StoreTx::commit`] discards all of its writes.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{ArchiveEntry, Item, Reservation, WaitlistEntry},
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Shared handle to the configured store
pub type Repository = Arc<dyn Store>;

#[async_trait]
pub trait Store: Send + Sync {
    /// Open an atomic unit of work
    async fn begin(&self) -> AppResult<Box<dyn StoreTx>>;

    /// Items ordered newest first
    async fn list_items(&self) -> AppResult<Vec<Item>>;

    async fn list_reservations(&self) -> AppResult<Vec<Reservation>>;

    /// Waitlist ordered oldest first
    async fn list_waitlist(&self) -> AppResult<Vec<WaitlistEntry>>;

    /// Archives ordered most recently archived first
    async fn list_archives(&self) -> AppResult<Vec<ArchiveEntry>>;

    /// Connectivity check for readiness
    async fn ping(&self) -> AppResult<()>;

    async fn get_item(&self, id: Uuid) -> AppResult<Item> {
        let mut tx = self.begin().await?;
        tx.item(id).await?.ok_or_else(|| item_not_found(id))
    }

    async fn get_reservation(&self, id: Uuid) -> AppResult<Reservation> {
        let mut tx = self.begin().await?;
        tx.reservation(id)
            .await?
            .ok_or_else(|| reservation_not_found(id))
    }
}

/// One open transaction. Reads lock the returned record.
#[async_trait]
pub trait StoreTx: Send {
    async fn item(&mut self, id: Uuid) -> AppResult<Option<Item>>;
    async fn insert_item(&mut self, item: &Item) -> AppResult<()>;
    async fn update_item(&mut self, item: &Item) -> AppResult<()>;
    async fn delete_item(&mut self, id: Uuid) -> AppResult<()>;

    async fn reservation(&mut self, id: Uuid) -> AppResult<Option<Reservation>>;
    async fn insert_reservation(&mut self, reservation: &Reservation) -> AppResult<()>;
    async fn update_reservation(&mut self, reservation: &Reservation) -> AppResult<()>;
    async fn delete_reservation(&mut self, id: Uuid) -> AppResult<()>;
    /// Number of active reservations holding a unit of the item
    async fn count_committed(&mut self, item_id: Uuid) -> AppResult<i64>;

    async fn waitlist_entry(&mut self, id: Uuid) -> AppResult<Option<WaitlistEntry>>;
    async fn insert_waitlist_entry(&mut self, entry: &WaitlistEntry) -> AppResult<()>;
    async fn delete_waitlist_entry(&mut self, id: Uuid) -> AppResult<()>;

    async fn archive_entry(&mut self, id: Uuid) -> AppResult<Option<ArchiveEntry>>;
    async fn insert_archive_entry(&mut self, entry: &ArchiveEntry) -> AppResult<()>;
    async fn update_archive_note(&mut self, id: Uuid, note: Option<&str>) -> AppResult<()>;
    async fn delete_archive_entry(&mut self, id: Uuid) -> AppResult<()>;

    async fn commit(self: Box<Self>) -> AppResult<()>;
}

pub(crate) fn item_not_found(id: Uuid) -> AppError {
    AppError::NotFound(format!("Item with id {} not found", id))
}

pub(crate) fn reservation_not_found(id: Uuid) -> AppError {
    AppError::NotFound(format!("Reservation with id {} not found", id))
}

pub(crate) fn waitlist_not_found(id: Uuid) -> AppError {
    AppError::NotFound(format!("Waitlist entry with id {} not found", id))
}

pub(crate) fn archive_not_found(id: Uuid) -> AppError {
    AppError::NotFound(format!("Archive entry with id {} not found", id))
}
