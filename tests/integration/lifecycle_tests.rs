//! In-process lifecycle tests against the in-memory store

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use uuid::Uuid;

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use toylend_server::{
    api,
    clock::ManualClock,
    config::{
        AppConfig, AuthConfig, DatabaseConfig, LoanPolicy, LoggingConfig, MonitorConfig,
        NotificationConfig, ServerConfig, StoreBackend, StoreConfig,
    },
    error::AppError,
    models::{
        reservation::CreateReservation, waitlist::CreateWaitlistEntry, ArchiveReason,
        admin::AdminClaims, FamilyContact, Item, ItemStatus, ReservationStatus,
    },
    repository::{MemoryStore, Store},
    services::{
        inventory,
        notifications::{
            Mailer, Notification, NotificationError, NotificationKind, NotificationQueue,
            NotificationWorker,
        },
        reservations::{ReservationService, ReserveOutcome, StatusChange},
        Services,
    },
    AppState,
};

/// Keeps every delivered notification, optionally rejecting all of them
#[derive(Default)]
struct RecordingMailer {
    sent: Mutex<Vec<(NotificationKind, Option<Uuid>)>>,
    reject: bool,
    /// Loans an admin extends while the first overdue notice is being sent
    extend_during_overdue: Mutex<Option<(ReservationService, Vec<Uuid>)>>,
}

impl RecordingMailer {
    fn rejecting() -> Self {
        Self {
            reject: true,
            ..Default::default()
        }
    }

    fn extend_during_overdue(&self, reservations: ReservationService, loans: Vec<Uuid>) {
        *self.extend_during_overdue.lock().unwrap() = Some((reservations, loans));
    }

    fn sent(&self) -> Vec<(NotificationKind, Option<Uuid>)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn deliver(&self, notification: &Notification) -> Result<(), NotificationError> {
        if self.reject {
            return Err(NotificationError::Rejected {
                kind: notification.kind.path(),
                status: 503,
            });
        }
        self.sent
            .lock()
            .unwrap()
            .push((notification.kind, notification.reservation_id));

        if notification.kind == NotificationKind::OverdueNotice {
            let armed = self.extend_during_overdue.lock().unwrap().take();
            if let Some((reservations, loans)) = armed {
                for id in loans {
                    if Some(id) != notification.reservation_id {
                        reservations.extend_loan(id).await.unwrap();
                    }
                }
            }
        }
        Ok(())
    }
}

struct Library {
    store: Arc<MemoryStore>,
    clock: Arc<ManualClock>,
    mailer: Arc<RecordingMailer>,
    services: Services,
    queued: mpsc::Receiver<Notification>,
}

impl Library {
    fn open() -> Self {
        Self::with_mailer(RecordingMailer::default())
    }

    fn with_mailer(mailer: RecordingMailer) -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap(),
        ));
        let mailer = Arc::new(mailer);
        let (queue, queued) = NotificationQueue::channel(64);
        let services = Services::new(
            store.clone(),
            queue,
            mailer.clone(),
            clock.clone(),
            LoanPolicy::default(),
            5,
        );
        Self {
            store,
            clock,
            mailer,
            services,
            queued,
        }
    }

    async fn shelve(&self, name: &str, copies: i32) -> Item {
        let now = self.clock_now();
        let mut item = Item {
            id: Uuid::new_v4(),
            name: name.to_string(),
            category: Some("Puzzles".to_string()),
            age_group: Some("3-5".to_string()),
            description: None,
            quantity: copies,
            total_quantity: copies,
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

    fn clock_now(&self) -> chrono::DateTime<Utc> {
        use toylend_server::clock::Clock;
        self.clock.now()
    }

    fn family(&self, child: &str) -> FamilyContact {
        FamilyContact {
            parent_name: "Alex Moreau".to_string(),
            parent_email: "alex@example.org".to_string(),
            child_name: child.to_string(),
        }
    }

    fn request(&self, item_id: Uuid, child: &str) -> CreateReservation {
        CreateReservation {
            item_id,
            contact: self.family(child),
            preferred_day: Some("Wednesday".to_string()),
            note: None,
        }
    }

    fn queued_kinds(&mut self) -> Vec<NotificationKind> {
        let mut kinds = Vec::new();
        while let Ok(notification) = self.queued.try_recv() {
            kinds.push(notification.kind);
        }
        kinds
    }

    async fn assert_balanced(&self) {
        let items = self.store.list_items().await.unwrap();
        let reservations = self.store.list_reservations().await.unwrap();
        for line in inventory::audit(&items, &reservations) {
            assert!(line.is_balanced(), "ledger out of balance: {:?}", line);
        }
    }
}

#[tokio::test]
async fn test_last_copy_goes_to_first_family_and_second_is_waitlisted() {
    let mut library = Library::open();
    let item = library.shelve("Marble run", 1).await;
    let reservations = &library.services.reservations;

    let first = reservations.reserve(&library.request(item.id, "Lou")).await.unwrap();
    let second = reservations.reserve(&library.request(item.id, "Mia")).await.unwrap();

    let reservation = match first {
        ReserveOutcome::Reserved(r) => r,
        other => panic!("expected a reservation, got {:?}", other),
    };
    assert!(reservation.inventory_committed);
    assert_eq!(reservation.status, ReservationStatus::Pending);
    assert!(matches!(second, ReserveOutcome::Waitlisted(ref e) if e.child_name == "Mia"));

    let item = library.store.get_item(item.id).await.unwrap();
    assert_eq!(item.quantity, 0);
    assert_eq!(item.status, ItemStatus::OnLoan);
    assert_eq!(
        library.queued_kinds(),
        vec![NotificationKind::ReservationCreated, NotificationKind::WaitlistCreated]
    );
    library.assert_balanced().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_never_oversubscribe_stock() {
    let library = Library::open();
    let item = library.shelve("Wooden train", 2).await;

    let mut handles = Vec::new();
    for n in 0..10 {
        let reservations = library.services.reservations.clone();
        let request = library.request(item.id, &format!("child-{}", n));
        handles.push(tokio::spawn(async move { reservations.reserve(&request).await }));
    }

    let mut reserved = 0;
    let mut waitlisted = 0;
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            ReserveOutcome::Reserved(_) => reserved += 1,
            ReserveOutcome::Waitlisted(_) => waitlisted += 1,
        }
    }

    assert_eq!(reserved, 2);
    assert_eq!(waitlisted, 8);
    assert_eq!(library.store.get_item(item.id).await.unwrap().quantity, 0);
    library.assert_balanced().await;
}

#[tokio::test]
async fn test_overdue_loan_gets_one_notice_across_sweeps() {
    let library = Library::open();
    let item = library.shelve("Dollhouse", 1).await;
    let reservation = match library
        .services
        .reservations
        .reserve(&library.request(item.id, "Lou"))
        .await
        .unwrap()
    {
        ReserveOutcome::Reserved(r) => r,
        other => panic!("expected a reservation, got {:?}", other),
    };
    library
        .services
        .reservations
        .set_status(reservation.id, ReservationStatus::OnLoan)
        .await
        .unwrap();

    // 14 day loan, 4 days late
    library.clock.advance(Duration::days(18));

    let first = library.services.monitor.sweep().await.unwrap();
    assert_eq!(first.moved_to_due, 1);
    assert_eq!(first.overdue_notices_sent, 1);

    let second = library.services.monitor.sweep().await.unwrap();
    assert!(second.is_idle());

    let stored = library.store.get_reservation(reservation.id).await.unwrap();
    assert_eq!(stored.status, ReservationStatus::Due);
    let loan = stored.loan.unwrap();
    assert!(loan.due_reminder_sent);
    assert!(loan.overdue_3day_sent);

    assert_eq!(
        library.mailer.sent(),
        vec![(NotificationKind::OverdueNotice, Some(reservation.id))]
    );
}

#[tokio::test]
async fn test_loan_extended_mid_sweep_gets_no_overdue_notice() {
    let library = Library::open();
    let mut loans = Vec::new();
    for (toy, child) in [("Puppet theatre", "Lou"), ("Tea set", "Mia")] {
        let item = library.shelve(toy, 1).await;
        let reservation = match library
            .services
            .reservations
            .reserve(&library.request(item.id, child))
            .await
            .unwrap()
        {
            ReserveOutcome::Reserved(r) => r,
            other => panic!("expected a reservation, got {:?}", other),
        };
        library
            .services
            .reservations
            .set_status(reservation.id, ReservationStatus::OnLoan)
            .await
            .unwrap();
        loans.push(reservation.id);
    }

    library.clock.advance(Duration::days(15));
    let first = library.services.monitor.sweep().await.unwrap();
    assert_eq!(first.moved_to_due, 2);
    assert_eq!(first.overdue_notices_sent, 0);

    // Both loans are now four days late; whichever is mailed first, the
    // other one gets extended while that mail is in flight
    library.clock.advance(Duration::days(3));
    library
        .mailer
        .extend_during_overdue(library.services.reservations.clone(), loans.clone());
    let second = library.services.monitor.sweep().await.unwrap();
    assert_eq!(second.overdue_notices_sent, 1);

    let sent = library.mailer.sent();
    assert_eq!(sent.len(), 1);
    let (kind, notified) = sent[0];
    assert_eq!(kind, NotificationKind::OverdueNotice);

    let extended = loans.iter().find(|id| Some(**id) != notified).unwrap();
    let stored = library.store.get_reservation(*extended).await.unwrap();
    assert_eq!(stored.status, ReservationStatus::OnLoan);
    let loan = stored.loan.unwrap();
    assert!(loan.extended);
    assert!(!loan.overdue_3day_sent);
    assert!(loan.due_date > library.clock_now());
}

#[tokio::test]
async fn test_pending_return_restocks_and_stays_silent() {
    let mut library = Library::open();
    let item = library.shelve("Kite", 1).await;
    let reservation = match library
        .services
        .reservations
        .reserve(&library.request(item.id, "Lou"))
        .await
        .unwrap()
    {
        ReserveOutcome::Reserved(r) => r,
        other => panic!("expected a reservation, got {:?}", other),
    };
    library.queued_kinds();

    let change = library
        .services
        .reservations
        .set_status(reservation.id, ReservationStatus::Returned)
        .await
        .unwrap();

    let archived = match change {
        StatusChange::Returned(entry) => entry,
        other => panic!("expected an archive entry, got {:?}", other),
    };
    assert_eq!(archived.archive_reason, ArchiveReason::Returned);
    assert_eq!(archived.status, "Returned");

    let item = library.store.get_item(item.id).await.unwrap();
    assert_eq!(item.quantity, 1);
    assert_eq!(item.status, ItemStatus::Available);
    assert!(matches!(
        library.store.get_reservation(reservation.id).await,
        Err(AppError::NotFound(_))
    ));
    assert!(library.queued_kinds().is_empty());
    library.assert_balanced().await;
}

#[tokio::test]
async fn test_converting_without_stock_leaves_waitlist_untouched() {
    let library = Library::open();
    let item = library.shelve("Puppet theatre", 1).await;
    let reservations = &library.services.reservations;
    reservations.reserve(&library.request(item.id, "Lou")).await.unwrap();

    let entry = reservations
        .join_waitlist(&CreateWaitlistEntry {
            item_id: item.id,
            contact: library.family("Mia"),
            note: None,
        })
        .await
        .unwrap();

    let result = reservations.convert_waitlist(entry.id).await;

    assert!(matches!(result, Err(AppError::NoStock(_))));
    assert_eq!(library.store.list_waitlist().await.unwrap().len(), 1);
    assert_eq!(library.store.list_reservations().await.unwrap().len(), 1);
    library.assert_balanced().await;
}

#[tokio::test]
async fn test_worker_records_rejected_delivery_on_reservation() {
    let library = Library::with_mailer(RecordingMailer::rejecting());
    let item = library.shelve("Xylophone", 1).await;
    let reservation = match library
        .services
        .reservations
        .reserve(&library.request(item.id, "Lou"))
        .await
        .unwrap()
    {
        ReserveOutcome::Reserved(r) => r,
        other => panic!("expected a reservation, got {:?}", other),
    };

    let Library {
        store,
        clock,
        mailer,
        queued,
        ..
    } = library;
    let worker = NotificationWorker::new(queued, mailer, store.clone(), clock);
    let handle = tokio::spawn(worker.run());

    let stored = tokio::time::timeout(std::time::Duration::from_secs(5), async {
        loop {
            let stored = store.get_reservation(reservation.id).await.unwrap();
            if stored.notification_error.is_some() {
                return stored;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("delivery failure was never recorded");

    assert!(stored.notification_error.unwrap().contains("503"));
    assert!(stored.notification_error_at.is_some());
    handle.abort();
}

#[tokio::test]
async fn test_full_loan_cycle_keeps_ledger_balanced() {
    let mut library = Library::open();
    let item = library.shelve("Building blocks", 3).await;
    let reservations = &library.services.reservations;

    let kept = match reservations.reserve(&library.request(item.id, "Lou")).await.unwrap() {
        ReserveOutcome::Reserved(r) => r,
        other => panic!("expected a reservation, got {:?}", other),
    };
    let moved = match reservations.reserve(&library.request(item.id, "Mia")).await.unwrap() {
        ReserveOutcome::Reserved(r) => r,
        other => panic!("expected a reservation, got {:?}", other),
    };
    library.assert_balanced().await;

    reservations
        .set_status(kept.id, ReservationStatus::ReadyForPickup)
        .await
        .unwrap();
    reservations.set_status(kept.id, ReservationStatus::OnLoan).await.unwrap();
    let waiting = reservations.move_to_waitlist(moved.id).await.unwrap();
    library.assert_balanced().await;
    assert_eq!(library.store.get_item(item.id).await.unwrap().quantity, 2);

    let converted = reservations.convert_waitlist(waiting.id).await.unwrap();
    assert_eq!(converted.created_at, moved.created_at);
    library.assert_balanced().await;

    reservations.set_status(kept.id, ReservationStatus::Returned).await.unwrap();
    let archived = reservations.archive_reservation(converted.id).await.unwrap();
    assert_eq!(archived.archive_reason, ArchiveReason::Archived);
    library.assert_balanced().await;

    let item = library.store.get_item(item.id).await.unwrap();
    assert_eq!(item.quantity, 3);
    assert!(library.store.list_reservations().await.unwrap().is_empty());
    assert_eq!(library.store.list_archives().await.unwrap().len(), 2);

    let kinds = library.queued_kinds();
    assert_eq!(
        kinds
            .iter()
            .filter(|k| **k == NotificationKind::ReservationCreated)
            .count(),
        2
    );
    // Ready for Pickup and the final return of a loaned toy
    assert_eq!(
        kinds
            .iter()
            .filter(|k| **k == NotificationKind::StatusUpdated)
            .count(),
        2
    );
}

const JWT_SECRET: &str = "lifecycle-test-secret";

fn router(library: &Library) -> Router {
    let config = AppConfig {
        server: ServerConfig::default(),
        database: DatabaseConfig::default(),
        store: StoreConfig {
            backend: StoreBackend::Memory,
        },
        auth: AuthConfig {
            jwt_secret: JWT_SECRET.to_string(),
        },
        logging: LoggingConfig::default(),
        notifications: NotificationConfig {
            enabled: false,
            ..Default::default()
        },
        loans: LoanPolicy::default(),
        monitor: MonitorConfig::default(),
    };
    api::router(AppState {
        config: Arc::new(config),
        services: Arc::new(library.services.clone()),
    })
}

fn bearer(role: &str) -> String {
    let now = Utc::now();
    let token = AdminClaims {
        sub: "librarian@example.org".to_string(),
        role: role.to_string(),
        exp: (now + Duration::hours(1)).timestamp(),
        iat: now.timestamp(),
    }
    .create_token(JWT_SECRET)
    .unwrap();
    format!("Bearer {}", token)
}

async fn call(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

#[tokio::test]
async fn test_admin_endpoints_reject_missing_and_non_admin_tokens() {
    let library = Library::open();
    let app = router(&library);

    let (status, _) = call(
        &app,
        Request::get("/api/v1/reservations").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = call(
        &app,
        Request::get("/api/v1/reservations")
            .header(header::AUTHORIZATION, bearer("volunteer"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = call(
        &app,
        Request::get("/api/v1/reservations")
            .header(header::AUTHORIZATION, bearer("admin"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn test_http_reserve_waitlist_and_return() {
    let library = Library::open();
    let item = library.shelve("Stacking cups", 1).await;
    let app = router(&library);

    let request_body = |child: &str| {
        json!({
            "itemId": item.id,
            "parentName": "Alex Moreau",
            "parentEmail": "alex@example.org",
            "childName": child
        })
        .to_string()
    };

    let (status, reserved) = call(
        &app,
        Request::post("/api/v1/reservations")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(request_body("Lou")))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(reserved["outcome"], "reserved");
    assert_eq!(reserved["reservation"]["status"], "Pending");
    let reservation_id = reserved["reservation"]["id"].as_str().unwrap().to_string();

    let (status, waitlisted) = call(
        &app,
        Request::post("/api/v1/reservations")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(request_body("Mia")))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(waitlisted["outcome"], "waitlisted");

    let (status, _) = call(
        &app,
        Request::put(format!("/api/v1/reservations/{}/status", reservation_id))
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::AUTHORIZATION, bearer("admin"))
            .body(Body::from(json!({ "status": "Returned" }).to_string()))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, shelf) = call(
        &app,
        Request::get(format!("/api/v1/items/{}", item.id))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(shelf["quantity"], 1);
    assert_eq!(shelf["status"], "Available");

    let (status, audit) = call(
        &app,
        Request::get("/api/v1/reports/inventory-audit")
            .header(header::AUTHORIZATION, bearer("admin"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(audit
        .as_array()
        .unwrap()
        .iter()
        .all(|line| line["discrepancy"] == 0));
}
