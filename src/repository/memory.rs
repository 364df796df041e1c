//! In-memory document store.
//!
//! Transactions hold the store-wide lock for their whole lifetime and work on a
//! private copy of the collections, so they are fully serialized. Committing
//! swaps the copy in; dropping the transaction discards it.

use async_trait::async_trait;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{
    archive_not_found, item_not_found, reservation_not_found, waitlist_not_found, Store, StoreTx,
};
use crate::{
    error::AppResult,
    models::{ArchiveEntry, Item, Reservation, WaitlistEntry},
};

#[derive(Debug, Clone, Default)]
struct Collections {
    items: HashMap<Uuid, Item>,
    reservations: HashMap<Uuid, Reservation>,
    waitlist: HashMap<Uuid, WaitlistEntry>,
    archives: HashMap<Uuid, ArchiveEntry>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<Collections>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> AppResult<Box<dyn StoreTx>> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTx { guard, working }))
    }

    async fn list_items(&self) -> AppResult<Vec<Item>> {
        let state = self.state.lock().await;
        let mut items: Vec<Item> = state.items.values().cloned().collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.name.cmp(&b.name)));
        Ok(items)
    }

    async fn list_reservations(&self) -> AppResult<Vec<Reservation>> {
        let state = self.state.lock().await;
        let mut reservations: Vec<Reservation> = state.reservations.values().cloned().collect();
        reservations.sort_by_key(|r| (r.created_at, r.id));
        Ok(reservations)
    }

    async fn list_waitlist(&self) -> AppResult<Vec<WaitlistEntry>> {
        let state = self.state.lock().await;
        let mut entries: Vec<WaitlistEntry> = state.waitlist.values().cloned().collect();
        entries.sort_by_key(|w| (w.created_at, w.id));
        Ok(entries)
    }

    async fn list_archives(&self) -> AppResult<Vec<ArchiveEntry>> {
        let state = self.state.lock().await;
        let mut entries: Vec<ArchiveEntry> = state.archives.values().cloned().collect();
        entries.sort_by(|a, b| b.archived_at.cmp(&a.archived_at).then_with(|| a.id.cmp(&b.id)));
        Ok(entries)
    }

    async fn ping(&self) -> AppResult<()> {
        Ok(())
    }
}

pub struct MemoryTx {
    guard: OwnedMutexGuard<Collections>,
    working: Collections,
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn item(&mut self, id: Uuid) -> AppResult<Option<Item>> {
        Ok(self.working.items.get(&id).cloned())
    }

    async fn insert_item(&mut self, item: &Item) -> AppResult<()> {
        self.working.items.insert(item.id, item.clone());
        Ok(())
    }

    async fn update_item(&mut self, item: &Item) -> AppResult<()> {
        match self.working.items.get_mut(&item.id) {
            Some(slot) => {
                *slot = item.clone();
                Ok(())
            }
            None => Err(item_not_found(item.id)),
        }
    }

    async fn delete_item(&mut self, id: Uuid) -> AppResult<()> {
        self.working
            .items
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| item_not_found(id))
    }

    async fn reservation(&mut self, id: Uuid) -> AppResult<Option<Reservation>> {
        Ok(self.working.reservations.get(&id).cloned())
    }

    async fn insert_reservation(&mut self, reservation: &Reservation) -> AppResult<()> {
        self.working
            .reservations
            .insert(reservation.id, reservation.clone());
        Ok(())
    }

    async fn update_reservation(&mut self, reservation: &Reservation) -> AppResult<()> {
        match self.working.reservations.get_mut(&reservation.id) {
            Some(slot) => {
                *slot = reservation.clone();
                Ok(())
            }
            None => Err(reservation_not_found(reservation.id)),
        }
    }

    async fn delete_reservation(&mut self, id: Uuid) -> AppResult<()> {
        self.working
            .reservations
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| reservation_not_found(id))
    }

    async fn count_committed(&mut self, item_id: Uuid) -> AppResult<i64> {
        Ok(self
            .working
            .reservations
            .values()
            .filter(|r| r.item_id == item_id && r.inventory_committed)
            .count() as i64)
    }

    async fn waitlist_entry(&mut self, id: Uuid) -> AppResult<Option<WaitlistEntry>> {
        Ok(self.working.waitlist.get(&id).cloned())
    }

    async fn insert_waitlist_entry(&mut self, entry: &WaitlistEntry) -> AppResult<()> {
        self.working.waitlist.insert(entry.id, entry.clone());
        Ok(())
    }

    async fn delete_waitlist_entry(&mut self, id: Uuid) -> AppResult<()> {
        self.working
            .waitlist
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| waitlist_not_found(id))
    }

    async fn archive_entry(&mut self, id: Uuid) -> AppResult<Option<ArchiveEntry>> {
        Ok(self.working.archives.get(&id).cloned())
    }

    async fn insert_archive_entry(&mut self, entry: &ArchiveEntry) -> AppResult<()> {
        self.working.archives.insert(entry.id, entry.clone());
        Ok(())
    }

    async fn update_archive_note(&mut self, id: Uuid, note: Option<&str>) -> AppResult<()> {
        match self.working.archives.get_mut(&id) {
            Some(entry) => {
                entry.note = note.map(str::to_string);
                Ok(())
            }
            None => Err(archive_not_found(id)),
        }
    }

    async fn delete_archive_entry(&mut self, id: Uuid) -> AppResult<()> {
        self.working
            .archives
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| archive_not_found(id))
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        let MemoryTx { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}
