//! Reservation lifecycle engine.
//!
//! Every transition reads the records it touches inside one store
//! transaction and writes all of its effects there: the reservation, the
//! item's stock counter and any record moved to the waitlist or archives.
//! Notifications and change events go out only after the commit.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use super::{
    changes::{ChangeFeed, ChangeKind},
    inventory,
    notifications::{Notification, NotificationQueue},
    with_retries,
};
use crate::{
    clock::Clock,
    config::LoanPolicy,
    error::{AppError, AppResult},
    models::{
        archive::ArchiveQuery,
        matches_search,
        reservation::{CreateReservation, ReservationQuery, UpdateBagNumber},
        waitlist::{CreateWaitlistEntry, WaitlistQuery},
        ArchiveEntry, ArchiveReason, Item, LoanPeriod, Reservation, ReservationStatus,
        WaitlistEntry,
    },
    repository::{
        archive_not_found, item_not_found, reservation_not_found, waitlist_not_found, Repository,
        StoreTx,
    },
};

/// Result of a parent's reservation request
#[derive(Debug, Clone, PartialEq)]
pub enum ReserveOutcome {
    Reserved(Reservation),
    /// The item had no copies left; the request was queued instead
    Waitlisted(WaitlistEntry),
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatusChange {
    Updated(Reservation),
    /// The reservation left the active set
    Returned(ArchiveEntry),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExtendOutcome {
    Extended(Reservation),
    /// Only one extension per loan; the record is unchanged
    AlreadyExtended(Reservation),
}

fn locked_item(item: &Item) -> AppError {
    AppError::NotAvailable(format!("'{}' is not available for reservation", item.name))
}

fn archive_entry(reservation: &Reservation, reason: ArchiveReason, now: DateTime<Utc>) -> ArchiveEntry {
    ArchiveEntry {
        id: Uuid::new_v4(),
        item_id: reservation.item_id,
        item_name: reservation.item_name.clone(),
        parent_name: reservation.parent_name.clone(),
        parent_email: reservation.parent_email.clone(),
        child_name: reservation.child_name.clone(),
        preferred_day: reservation.preferred_day.clone(),
        note: reservation.note.clone(),
        status: ReservationStatus::Returned.to_string(),
        archive_reason: reason,
        bag_no: reservation.bag_no.clone(),
        loan_start_date: reservation.loan.as_ref().map(|l| l.loan_start_date),
        due_date: reservation.loan.as_ref().map(|l| l.due_date),
        created_at: reservation.created_at,
        archived_at: now,
    }
}

/// Give back the unit a reservation holds. A deleted item has nothing to return to.
async fn release_hold(
    tx: &mut dyn StoreTx,
    reservation: &Reservation,
    now: DateTime<Utc>,
) -> AppResult<()> {
    if !reservation.inventory_committed {
        return Ok(());
    }
    match tx.item(reservation.item_id).await? {
        Some(mut item) => {
            inventory::release_unit(&mut item);
            item.updated_at = now;
            tx.update_item(&item).await
        }
        None => {
            tracing::warn!(
                reservation_id = %reservation.id,
                item_id = %reservation.item_id,
                "Item no longer exists, skipping stock release"
            );
            Ok(())
        }
    }
}

#[derive(Clone)]
pub struct ReservationService {
    store: Repository,
    queue: NotificationQueue,
    changes: ChangeFeed,
    clock: Arc<dyn Clock>,
    policy: LoanPolicy,
    max_retries: u32,
}

impl ReservationService {
    pub fn new(
        store: Repository,
        queue: NotificationQueue,
        changes: ChangeFeed,
        clock: Arc<dyn Clock>,
        policy: LoanPolicy,
        max_retries: u32,
    ) -> Self {
        Self {
            store,
            queue,
            changes,
            clock,
            policy,
            max_retries,
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub async fn list_reservations(&self, query: &ReservationQuery) -> AppResult<Vec<Reservation>> {
        let reservations = self.store.list_reservations().await?;
        Ok(reservations
            .into_iter()
            .filter(|r| query.status.map_or(true, |s| r.status == s))
            .filter(|r| {
                matches_search(
                    query.search.as_deref(),
                    &[&r.item_name, &r.parent_name, &r.child_name],
                )
            })
            .collect())
    }

    pub async fn get_reservation(&self, id: Uuid) -> AppResult<Reservation> {
        self.store.get_reservation(id).await
    }

    pub async fn list_waitlist(&self, query: &WaitlistQuery) -> AppResult<Vec<WaitlistEntry>> {
        let entries = self.store.list_waitlist().await?;
        Ok(entries
            .into_iter()
            .filter(|w| {
                matches_search(
                    query.search.as_deref(),
                    &[&w.item_name, &w.parent_name, &w.child_name],
                )
            })
            .collect())
    }

    pub async fn list_archives(&self, query: &ArchiveQuery) -> AppResult<Vec<ArchiveEntry>> {
        let entries = self.store.list_archives().await?;
        Ok(entries
            .into_iter()
            .filter(|a| {
                matches_search(
                    query.search.as_deref(),
                    &[&a.item_name, &a.parent_name, &a.child_name],
                )
            })
            .collect())
    }

    // ------------------------------------------------------------------
    // Parent-facing requests
    // ------------------------------------------------------------------

    /// Reserve one copy of an item, or join its waitlist when none is left
    pub async fn reserve(&self, request: &CreateReservation) -> AppResult<ReserveOutcome> {
        request.validate()?;
        let now = self.clock.now();
        let outcome = with_retries(self.max_retries, "reserve", move || {
            self.try_reserve(request, now)
        })
        .await?;

        match &outcome {
            ReserveOutcome::Reserved(reservation) => {
                tracing::info!(
                    reservation_id = %reservation.id,
                    item_id = %reservation.item_id,
                    "Reservation created"
                );
                self.changes.publish(
                    reservation.id,
                    ChangeKind::Created,
                    Some(reservation.status),
                    now,
                );
                self.queue
                    .enqueue(Notification::reservation_created(reservation));
            }
            ReserveOutcome::Waitlisted(entry) => {
                tracing::info!(
                    waitlist_id = %entry.id,
                    item_id = %entry.item_id,
                    "No stock left, request waitlisted"
                );
                self.queue.enqueue(Notification::waitlist_created(entry));
            }
        }
        Ok(outcome)
    }

    async fn try_reserve(
        &self,
        request: &CreateReservation,
        now: DateTime<Utc>,
    ) -> AppResult<ReserveOutcome> {
        let mut tx = self.store.begin().await?;
        let mut item = tx
            .item(request.item_id)
            .await?
            .ok_or_else(|| item_not_found(request.item_id))?;
        if item.is_locked() {
            return Err(locked_item(&item));
        }

        if item.quantity <= 0 {
            let entry = WaitlistEntry {
                id: Uuid::new_v4(),
                item_id: item.id,
                item_name: item.name.clone(),
                parent_name: request.contact.parent_name.clone(),
                parent_email: request.contact.parent_email.clone(),
                child_name: request.contact.child_name.clone(),
                note: request.note.clone(),
                created_at: now,
            };
            tx.insert_waitlist_entry(&entry).await?;
            tx.commit().await?;
            return Ok(ReserveOutcome::Waitlisted(entry));
        }

        inventory::commit_unit(&mut item)?;
        item.updated_at = now;
        tx.update_item(&item).await?;

        let reservation = Reservation {
            id: Uuid::new_v4(),
            item_id: item.id,
            item_name: item.name.clone(),
            parent_name: request.contact.parent_name.clone(),
            parent_email: request.contact.parent_email.clone(),
            child_name: request.contact.child_name.clone(),
            preferred_day: request.preferred_day.clone(),
            note: request.note.clone(),
            status: ReservationStatus::Pending,
            bag_no: None,
            loan: None,
            inventory_committed: true,
            review_return_at: None,
            notification_error: None,
            notification_error_at: None,
            created_at: now,
            updated_at: now,
        };
        tx.insert_reservation(&reservation).await?;
        tx.commit().await?;
        Ok(ReserveOutcome::Reserved(reservation))
    }

    /// Queue a request for an item without touching stock
    pub async fn join_waitlist(&self, request: &CreateWaitlistEntry) -> AppResult<WaitlistEntry> {
        request.validate()?;
        let now = self.clock.now();
        let entry = with_retries(self.max_retries, "join_waitlist", move || {
            self.try_join_waitlist(request, now)
        })
        .await?;

        tracing::info!(waitlist_id = %entry.id, item_id = %entry.item_id, "Waitlist entry created");
        self.queue.enqueue(Notification::waitlist_created(&entry));
        Ok(entry)
    }

    async fn try_join_waitlist(
        &self,
        request: &CreateWaitlistEntry,
        now: DateTime<Utc>,
    ) -> AppResult<WaitlistEntry> {
        let mut tx = self.store.begin().await?;
        let item = tx
            .item(request.item_id)
            .await?
            .ok_or_else(|| item_not_found(request.item_id))?;
        if item.is_locked() {
            return Err(locked_item(&item));
        }

        let entry = WaitlistEntry {
            id: Uuid::new_v4(),
            item_id: item.id,
            item_name: item.name,
            parent_name: request.contact.parent_name.clone(),
            parent_email: request.contact.parent_email.clone(),
            child_name: request.contact.child_name.clone(),
            note: request.note.clone(),
            created_at: now,
        };
        tx.insert_waitlist_entry(&entry).await?;
        tx.commit().await?;
        Ok(entry)
    }

    // ------------------------------------------------------------------
    // Admin transitions
    // ------------------------------------------------------------------

    /// Move a reservation to a new status.
    ///
    /// `On Loan` starts a fresh loan period, `Review Return` stamps the time
    /// the toy came back, and `Returned` releases the held unit and moves the
    /// record to the archives. Families hear about every change except the
    /// three loan states; a return is only announced if the toy was actually
    /// lent out.
    pub async fn set_status(&self, id: Uuid, status: ReservationStatus) -> AppResult<StatusChange> {
        let now = self.clock.now();
        let (change, reservation) = with_retries(self.max_retries, "set_status", move || {
            self.try_set_status(id, status, now)
        })
        .await?;

        tracing::info!(reservation_id = %id, status = %status, "Reservation status updated");
        match &change {
            StatusChange::Updated(updated) => {
                self.changes
                    .publish(id, ChangeKind::Updated, Some(updated.status), now);
                if !status.is_loaned() {
                    self.queue
                        .enqueue(Notification::status_updated(updated, status));
                }
            }
            StatusChange::Returned(_) => {
                self.changes.publish(id, ChangeKind::Removed, None, now);
                if reservation.was_loaned() {
                    self.queue
                        .enqueue(Notification::status_updated(&reservation, status));
                }
            }
        }
        Ok(change)
    }

    /// Returns the change plus the reservation as it was read
    async fn try_set_status(
        &self,
        id: Uuid,
        status: ReservationStatus,
        now: DateTime<Utc>,
    ) -> AppResult<(StatusChange, Reservation)> {
        let mut tx = self.store.begin().await?;
        let original = tx
            .reservation(id)
            .await?
            .ok_or_else(|| reservation_not_found(id))?;

        if status == ReservationStatus::Returned {
            release_hold(tx.as_mut(), &original, now).await?;
            let entry = archive_entry(&original, ArchiveReason::Returned, now);
            tx.insert_archive_entry(&entry).await?;
            tx.delete_reservation(id).await?;
            tx.commit().await?;
            return Ok((StatusChange::Returned(entry), original));
        }

        let mut reservation = original.clone();
        reservation.status = status;
        match status {
            ReservationStatus::OnLoan => {
                let due = now + Duration::days(self.policy.loan_days);
                reservation.loan = Some(LoanPeriod::starting(now, due));
            }
            ReservationStatus::ReviewReturn => {
                reservation.review_return_at = Some(now);
            }
            _ => {}
        }
        reservation.updated_at = now;
        tx.update_reservation(&reservation).await?;
        tx.commit().await?;
        Ok((StatusChange::Updated(reservation), original))
    }

    /// Push the due date of an active loan out by one extension period
    pub async fn extend_loan(&self, id: Uuid) -> AppResult<ExtendOutcome> {
        let now = self.clock.now();
        let outcome = with_retries(self.max_retries, "extend_loan", move || {
            self.try_extend_loan(id, now)
        })
        .await?;

        match &outcome {
            ExtendOutcome::Extended(reservation) => {
                tracing::info!(
                    reservation_id = %id,
                    due_date = ?reservation.loan.as_ref().map(|l| l.due_date),
                    "Loan extended"
                );
                self.changes
                    .publish(id, ChangeKind::Updated, Some(reservation.status), now);
            }
            ExtendOutcome::AlreadyExtended(_) => {
                tracing::info!(reservation_id = %id, "Loan already extended, nothing to do");
            }
        }
        Ok(outcome)
    }

    async fn try_extend_loan(&self, id: Uuid, now: DateTime<Utc>) -> AppResult<ExtendOutcome> {
        let mut tx = self.store.begin().await?;
        let mut reservation = tx
            .reservation(id)
            .await?
            .ok_or_else(|| reservation_not_found(id))?;

        if !matches!(
            reservation.status,
            ReservationStatus::OnLoan | ReservationStatus::Due
        ) {
            return Err(AppError::BusinessRule(format!(
                "Only loans that are On Loan or Due can be extended, this one is {}",
                reservation.status
            )));
        }
        if reservation.loan.as_ref().is_some_and(|l| l.extended) {
            return Ok(ExtendOutcome::AlreadyExtended(reservation));
        }

        let loan = reservation
            .loan
            .get_or_insert_with(|| LoanPeriod::starting(now, now));
        loan.due_date += Duration::days(self.policy.extension_days);
        loan.due_reminder_sent = false;
        loan.overdue_3day_sent = false;
        loan.extended = true;
        reservation.status = ReservationStatus::OnLoan;
        reservation.updated_at = now;

        tx.update_reservation(&reservation).await?;
        tx.commit().await?;
        Ok(ExtendOutcome::Extended(reservation))
    }

    /// Send an active reservation back to the waitlist, releasing its unit
    pub async fn move_to_waitlist(&self, id: Uuid) -> AppResult<WaitlistEntry> {
        let now = self.clock.now();
        let entry = with_retries(self.max_retries, "move_to_waitlist", move || {
            self.try_move_to_waitlist(id, now)
        })
        .await?;

        tracing::info!(reservation_id = %id, waitlist_id = %entry.id, "Reservation moved to waitlist");
        self.changes.publish(id, ChangeKind::Removed, None, now);
        Ok(entry)
    }

    async fn try_move_to_waitlist(&self, id: Uuid, now: DateTime<Utc>) -> AppResult<WaitlistEntry> {
        let mut tx = self.store.begin().await?;
        let reservation = tx
            .reservation(id)
            .await?
            .ok_or_else(|| reservation_not_found(id))?;

        release_hold(tx.as_mut(), &reservation, now).await?;
        let entry = WaitlistEntry {
            id: Uuid::new_v4(),
            item_id: reservation.item_id,
            item_name: reservation.item_name.clone(),
            parent_name: reservation.parent_name.clone(),
            parent_email: reservation.parent_email.clone(),
            child_name: reservation.child_name.clone(),
            note: reservation.note.clone(),
            created_at: reservation.created_at,
        };
        tx.insert_waitlist_entry(&entry).await?;
        tx.delete_reservation(id).await?;
        tx.commit().await?;
        Ok(entry)
    }

    /// Close a reservation without a return, keeping it in the archives
    pub async fn archive_reservation(&self, id: Uuid) -> AppResult<ArchiveEntry> {
        self.retire(id, ArchiveReason::Archived).await
    }

    /// Remove a reservation; the record is still kept in the archives
    pub async fn delete_reservation(&self, id: Uuid) -> AppResult<ArchiveEntry> {
        self.retire(id, ArchiveReason::Deleted).await
    }

    async fn retire(&self, id: Uuid, reason: ArchiveReason) -> AppResult<ArchiveEntry> {
        let now = self.clock.now();
        let entry = with_retries(self.max_retries, "retire_reservation", move || {
            self.try_retire(id, reason, now)
        })
        .await?;

        tracing::info!(reservation_id = %id, reason = %reason, "Reservation archived");
        self.changes.publish(id, ChangeKind::Removed, None, now);
        Ok(entry)
    }

    async fn try_retire(
        &self,
        id: Uuid,
        reason: ArchiveReason,
        now: DateTime<Utc>,
    ) -> AppResult<ArchiveEntry> {
        let mut tx = self.store.begin().await?;
        let reservation = tx
            .reservation(id)
            .await?
            .ok_or_else(|| reservation_not_found(id))?;

        release_hold(tx.as_mut(), &reservation, now).await?;
        let entry = archive_entry(&reservation, reason, now);
        tx.insert_archive_entry(&entry).await?;
        tx.delete_reservation(id).await?;
        tx.commit().await?;
        Ok(entry)
    }

    /// Turn a waitlist entry into a reservation once a copy is free
    pub async fn convert_waitlist(&self, id: Uuid) -> AppResult<Reservation> {
        let now = self.clock.now();
        let reservation = with_retries(self.max_retries, "convert_waitlist", move || {
            self.try_convert_waitlist(id, now)
        })
        .await?;

        tracing::info!(waitlist_id = %id, reservation_id = %reservation.id, "Waitlist entry converted");
        self.changes.publish(
            reservation.id,
            ChangeKind::Created,
            Some(reservation.status),
            now,
        );
        Ok(reservation)
    }

    async fn try_convert_waitlist(&self, id: Uuid, now: DateTime<Utc>) -> AppResult<Reservation> {
        let mut tx = self.store.begin().await?;
        let entry = tx
            .waitlist_entry(id)
            .await?
            .ok_or_else(|| waitlist_not_found(id))?;
        let mut item = tx
            .item(entry.item_id)
            .await?
            .ok_or_else(|| item_not_found(entry.item_id))?;
        if item.is_locked() {
            return Err(locked_item(&item));
        }

        inventory::commit_unit(&mut item)?;
        item.updated_at = now;
        tx.update_item(&item).await?;

        let reservation = Reservation {
            id: Uuid::new_v4(),
            item_id: entry.item_id,
            item_name: entry.item_name.clone(),
            parent_name: entry.parent_name.clone(),
            parent_email: entry.parent_email.clone(),
            child_name: entry.child_name.clone(),
            preferred_day: None,
            note: entry.note.clone(),
            status: ReservationStatus::Pending,
            bag_no: None,
            loan: None,
            inventory_committed: true,
            review_return_at: None,
            notification_error: None,
            notification_error_at: None,
            created_at: entry.created_at,
            updated_at: now,
        };
        tx.insert_reservation(&reservation).await?;
        tx.delete_waitlist_entry(id).await?;
        tx.commit().await?;
        Ok(reservation)
    }

    /// Bring an archived request back as a fresh pending reservation
    pub async fn restore_archive(&self, id: Uuid) -> AppResult<Reservation> {
        let now = self.clock.now();
        let reservation = with_retries(self.max_retries, "restore_archive", move || {
            self.try_restore_archive(id, now)
        })
        .await?;

        tracing::info!(archive_id = %id, reservation_id = %reservation.id, "Archive entry restored");
        self.changes.publish(
            reservation.id,
            ChangeKind::Created,
            Some(reservation.status),
            now,
        );
        Ok(reservation)
    }

    async fn try_restore_archive(&self, id: Uuid, now: DateTime<Utc>) -> AppResult<Reservation> {
        let mut tx = self.store.begin().await?;
        let entry = tx
            .archive_entry(id)
            .await?
            .ok_or_else(|| archive_not_found(id))?;
        let mut item = tx
            .item(entry.item_id)
            .await?
            .ok_or_else(|| item_not_found(entry.item_id))?;
        if item.is_locked() {
            return Err(locked_item(&item));
        }

        inventory::commit_unit(&mut item)?;
        item.updated_at = now;
        tx.update_item(&item).await?;

        let reservation = Reservation {
            id: Uuid::new_v4(),
            item_id: entry.item_id,
            item_name: entry.item_name.clone(),
            parent_name: entry.parent_name.clone(),
            parent_email: entry.parent_email.clone(),
            child_name: entry.child_name.clone(),
            preferred_day: entry.preferred_day.clone(),
            note: entry.note.clone(),
            status: ReservationStatus::Pending,
            bag_no: None,
            loan: None,
            inventory_committed: true,
            review_return_at: None,
            notification_error: None,
            notification_error_at: None,
            created_at: entry.created_at,
            updated_at: now,
        };
        tx.insert_reservation(&reservation).await?;
        tx.delete_archive_entry(id).await?;
        tx.commit().await?;
        Ok(reservation)
    }

    // ------------------------------------------------------------------
    // Record edits
    // ------------------------------------------------------------------

    pub async fn update_bag_number(&self, id: Uuid, update: &UpdateBagNumber) -> AppResult<Reservation> {
        if !update.confirmed {
            return Err(AppError::Validation(
                "Bag number change must be confirmed".to_string(),
            ));
        }
        let bag_no = update
            .bag_no
            .as_deref()
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .map(str::to_string);
        let now = self.clock.now();

        let reservation = with_retries(self.max_retries, "update_bag_number", move || {
            self.try_update_bag_number(id, bag_no.clone(), now)
        })
        .await?;

        tracing::info!(reservation_id = %id, bag_no = ?reservation.bag_no, "Bag number updated");
        self.changes
            .publish(id, ChangeKind::Updated, Some(reservation.status), now);
        Ok(reservation)
    }

    async fn try_update_bag_number(
        &self,
        id: Uuid,
        bag_no: Option<String>,
        now: DateTime<Utc>,
    ) -> AppResult<Reservation> {
        let mut tx = self.store.begin().await?;
        let mut reservation = tx
            .reservation(id)
            .await?
            .ok_or_else(|| reservation_not_found(id))?;
        reservation.bag_no = bag_no;
        reservation.updated_at = now;
        tx.update_reservation(&reservation).await?;
        tx.commit().await?;
        Ok(reservation)
    }

    /// Drop a waitlist entry for good
    pub async fn discard_waitlist_entry(&self, id: Uuid) -> AppResult<()> {
        with_retries(self.max_retries, "discard_waitlist_entry", move || {
            self.try_discard_waitlist_entry(id)
        })
        .await?;
        tracing::info!(waitlist_id = %id, "Waitlist entry discarded");
        Ok(())
    }

    async fn try_discard_waitlist_entry(&self, id: Uuid) -> AppResult<()> {
        let mut tx = self.store.begin().await?;
        tx.delete_waitlist_entry(id).await?;
        tx.commit().await
    }

    pub async fn update_archive_note(&self, id: Uuid, note: Option<String>) -> AppResult<ArchiveEntry> {
        let note = note.filter(|n| !n.trim().is_empty());
        with_retries(self.max_retries, "update_archive_note", move || {
            self.try_update_archive_note(id, note.clone())
        })
        .await
    }

    async fn try_update_archive_note(&self, id: Uuid, note: Option<String>) -> AppResult<ArchiveEntry> {
        let mut tx = self.store.begin().await?;
        tx.update_archive_note(id, note.as_deref()).await?;
        let entry = tx
            .archive_entry(id)
            .await?
            .ok_or_else(|| archive_not_found(id))?;
        tx.commit().await?;
        Ok(entry)
    }
}
