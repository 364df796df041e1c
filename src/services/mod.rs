//! Business logic services

pub mod catalog;
pub mod changes;
pub mod inventory;
pub mod monitor;
pub mod notifications;
pub mod reports;
pub mod reservations;

use std::{future::Future, sync::Arc};

use crate::{clock::Clock, config::LoanPolicy, error::AppResult, repository::Repository};

use changes::ChangeFeed;
use notifications::{Mailer, NotificationQueue};

/// Run a transactional operation, retrying it from scratch when the store
/// reports a conflict. Each attempt must open its own transaction.
pub(crate) async fn with_retries<T, F, Fut>(
    max_retries: u32,
    operation: &'static str,
    mut attempt: F,
) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let mut retries = 0;
    loop {
        match attempt().await {
            Err(e) if e.is_conflict() && retries < max_retries => {
                retries += 1;
                tracing::debug!(operation, retries, error = %e, "Transaction conflict, retrying");
            }
            result => return result,
        }
    }
}

/// Container for all services
#[derive(Clone)]
pub struct Services {
    pub catalog: catalog::CatalogService,
    pub reservations: reservations::ReservationService,
    pub monitor: monitor::DueDateMonitor,
    pub reports: reports::ReportsService,
    pub changes: ChangeFeed,
    pub store: Repository,
}

impl Services {
    /// Wire every service to the same store, clock and change feed
    pub fn new(
        store: Repository,
        queue: NotificationQueue,
        mailer: Arc<dyn Mailer>,
        clock: Arc<dyn Clock>,
        policy: LoanPolicy,
        max_retries: u32,
    ) -> Self {
        let changes = ChangeFeed::default();
        Self {
            catalog: catalog::CatalogService::new(store.clone(), clock.clone(), max_retries),
            reservations: reservations::ReservationService::new(
                store.clone(),
                queue,
                changes.clone(),
                clock.clone(),
                policy.clone(),
                max_retries,
            ),
            monitor: monitor::DueDateMonitor::new(
                store.clone(),
                mailer,
                changes.clone(),
                clock,
                policy,
                max_retries,
            ),
            reports: reports::ReportsService::new(store.clone()),
            changes,
            store,
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Fixtures shared by the service tests

    use chrono::{TimeZone, Utc};
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc;
    use uuid::Uuid;

    use super::{
        notifications::{MockMailer, Notification, NotificationKind, NotificationQueue},
        reservations::ReserveOutcome,
        Services,
    };
    use crate::{
        clock::ManualClock,
        config::LoanPolicy,
        models::{
            reservation::CreateReservation, waitlist::CreateWaitlistEntry, FamilyContact, Item,
            ItemStatus, Reservation, ReservationStatus,
        },
        repository::{MemoryStore, Store},
        services::inventory,
    };

    pub struct Harness {
        pub store: Arc<MemoryStore>,
        pub clock: Arc<ManualClock>,
        pub catalog: super::catalog::CatalogService,
        pub reservations: super::reservations::ReservationService,
        pub monitor: super::monitor::DueDateMonitor,
        pub reports: super::reports::ReportsService,
        notifications: Mutex<mpsc::Receiver<Notification>>,
    }

    impl Harness {
        pub fn new() -> Self {
            Self::with_mailer(MockMailer::new())
        }

        pub fn with_mailer(mailer: MockMailer) -> Self {
            let store = Arc::new(MemoryStore::new());
            let clock = Arc::new(ManualClock::new(
                Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap(),
            ));
            let (queue, rx) = NotificationQueue::channel(256);
            let services = Services::new(
                store.clone(),
                queue,
                Arc::new(mailer),
                clock.clone(),
                LoanPolicy::default(),
                3,
            );
            Self {
                store,
                clock,
                catalog: services.catalog.clone(),
                reservations: services.reservations.clone(),
                monitor: services.monitor.clone(),
                reports: services.reports.clone(),
                notifications: Mutex::new(rx),
            }
        }

        pub async fn add_item(&self, name: &str, quantity: i32, total_quantity: i32) -> Item {
            let now = Utc::now();
            let mut item = Item {
                id: Uuid::new_v4(),
                name: name.to_string(),
                category: Some("Test".to_string()),
                age_group: None,
                description: None,
                quantity,
                total_quantity,
                status: ItemStatus::Available,
                images: vec![],
                created_at: now,
                updated_at: now,
            };
            inventory::normalize(&mut item);
            let mut tx = self.store.begin().await.unwrap();
            tx.insert_item(&item).await.unwrap();
            tx.commit().await.unwrap();
            item
        }

        pub async fn add_locked_item(&self, name: &str) -> Item {
            let mut item = self.add_item(name, 1, 1).await;
            item.status = ItemStatus::NotAvailable;
            let mut tx = self.store.begin().await.unwrap();
            tx.update_item(&item).await.unwrap();
            tx.commit().await.unwrap();
            item
        }

        pub async fn remove_item(&self, id: Uuid) {
            let mut tx = self.store.begin().await.unwrap();
            tx.delete_item(id).await.unwrap();
            tx.commit().await.unwrap();
        }

        pub async fn item(&self, id: Uuid) -> Item {
            self.store.get_item(id).await.unwrap()
        }

        pub async fn reservation(&self, id: Uuid) -> Reservation {
            self.store.get_reservation(id).await.unwrap()
        }

        pub fn contact(&self) -> FamilyContact {
            FamilyContact {
                parent_name: "Sam Rivera".to_string(),
                parent_email: "sam@example.org".to_string(),
                child_name: "Noa".to_string(),
            }
        }

        pub fn request(&self, item_id: Uuid) -> CreateReservation {
            CreateReservation {
                item_id,
                contact: self.contact(),
                preferred_day: Some("Saturday".to_string()),
                note: None,
            }
        }

        pub fn waitlist_request(&self, item_id: Uuid) -> CreateWaitlistEntry {
            CreateWaitlistEntry {
                item_id,
                contact: self.contact(),
                note: Some("Any week is fine".to_string()),
            }
        }

        /// Reserve and expect a reservation, not a waitlist entry
        pub async fn reserve(&self, item_id: Uuid) -> Reservation {
            match self.reservations.reserve(&self.request(item_id)).await.unwrap() {
                ReserveOutcome::Reserved(reservation) => reservation,
                ReserveOutcome::Waitlisted(_) => panic!("item unexpectedly out of stock"),
            }
        }

        /// Reserve and hand the toy over now
        pub async fn lend(&self, item_id: Uuid) -> Reservation {
            let reservation = self.reserve(item_id).await;
            self.reservations
                .set_status(reservation.id, ReservationStatus::OnLoan)
                .await
                .unwrap();
            self.reservation(reservation.id).await
        }

        pub fn drain_notifications(&self) -> Vec<NotificationKind> {
            let mut rx = self.notifications.lock().unwrap();
            let mut kinds = Vec::new();
            while let Ok(notification) = rx.try_recv() {
                kinds.push(notification.kind);
            }
            kinds
        }

        pub async fn assert_ledger_balanced(&self) {
            let items = self.store.list_items().await.unwrap();
            let reservations = self.store.list_reservations().await.unwrap();
            for line in inventory::audit(&items, &reservations) {
                assert!(line.is_balanced(), "unbalanced ledger: {:?}", line);
            }
        }
    }
}
