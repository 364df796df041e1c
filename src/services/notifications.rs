//! Notification dispatch to the mail microservice.
//!
//! The mail service exposes one `POST /email/{kind}` endpoint per event and
//! takes a flat JSON object of string fields. Delivery is best effort: a
//! failure is logged and, when the notification belongs to a reservation,
//! written into that reservation for admin review. Nothing is retried.
//!
//! Transition notifications go through [`NotificationQueue`], which the
//! engine fills after its transaction has committed and never waits on;
//! [`NotificationWorker`] drains it in the background.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{
    clock::Clock,
    config::NotificationConfig,
    error::{AppError, AppResult},
    models::{Reservation, ReservationStatus, WaitlistEntry},
    repository::Store,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    ReservationCreated,
    WaitlistCreated,
    StatusUpdated,
    DueReminder,
    OverdueNotice,
}

impl NotificationKind {
    /// Endpoint segment on the mail service
    pub fn path(&self) -> &'static str {
        match self {
            NotificationKind::ReservationCreated => "reservation-created",
            NotificationKind::WaitlistCreated => "waitlist-created",
            NotificationKind::StatusUpdated => "status-updated",
            NotificationKind::DueReminder => "due-reminder",
            NotificationKind::OverdueNotice => "overdue-3days",
        }
    }
}

/// Body posted to the mail service
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub parent_email: String,
    pub parent_name: String,
    pub child_name: String,
    pub item_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_day: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bag_no: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days_past_due: Option<String>,
}

impl NotificationPayload {
    fn for_reservation(reservation: &Reservation) -> Self {
        Self {
            parent_email: reservation.parent_email.clone(),
            parent_name: reservation.parent_name.clone(),
            child_name: reservation.child_name.clone(),
            item_name: reservation.item_name.clone(),
            preferred_day: None,
            note: None,
            new_status: None,
            due_date: None,
            bag_no: None,
            days_past_due: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub kind: NotificationKind,
    /// Reservation a delivery failure gets recorded on
    pub reservation_id: Option<Uuid>,
    pub payload: NotificationPayload,
}

fn format_date(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d").to_string()
}

impl Notification {
    pub fn reservation_created(reservation: &Reservation) -> Self {
        let mut payload = NotificationPayload::for_reservation(reservation);
        payload.preferred_day = reservation.preferred_day.clone();
        payload.note = reservation.note.clone();
        Self {
            kind: NotificationKind::ReservationCreated,
            reservation_id: Some(reservation.id),
            payload,
        }
    }

    pub fn waitlist_created(entry: &WaitlistEntry) -> Self {
        Self {
            kind: NotificationKind::WaitlistCreated,
            reservation_id: None,
            payload: NotificationPayload {
                parent_email: entry.parent_email.clone(),
                parent_name: entry.parent_name.clone(),
                child_name: entry.child_name.clone(),
                item_name: entry.item_name.clone(),
                preferred_day: None,
                note: entry.note.clone(),
                new_status: None,
                due_date: None,
                bag_no: None,
                days_past_due: None,
            },
        }
    }

    pub fn status_updated(reservation: &Reservation, new_status: ReservationStatus) -> Self {
        let mut payload = NotificationPayload::for_reservation(reservation);
        payload.new_status = Some(new_status.to_string());
        payload.preferred_day = reservation.preferred_day.clone();
        Self {
            kind: NotificationKind::StatusUpdated,
            // A returned reservation no longer exists to record failures on
            reservation_id: (new_status != ReservationStatus::Returned).then_some(reservation.id),
            payload,
        }
    }

    pub fn due_reminder(reservation: &Reservation, due_date: DateTime<Utc>) -> Self {
        let mut payload = NotificationPayload::for_reservation(reservation);
        payload.due_date = Some(format_date(due_date));
        Self {
            kind: NotificationKind::DueReminder,
            reservation_id: Some(reservation.id),
            payload,
        }
    }

    pub fn overdue_notice(
        reservation: &Reservation,
        due_date: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut payload = NotificationPayload::for_reservation(reservation);
        payload.due_date = Some(format_date(due_date));
        payload.bag_no = reservation.bag_no.clone();
        payload.days_past_due = Some((now - due_date).num_days().to_string());
        Self {
            kind: NotificationKind::OverdueNotice,
            reservation_id: Some(reservation.id),
            payload,
        }
    }
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Mail service unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Mail service rejected {kind} with status {status}")]
    Rejected { kind: &'static str, status: u16 },
}

/// Outbound side of the mail service
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn deliver(&self, notification: &Notification) -> Result<(), NotificationError>;
}

/// HTTP client for the mail microservice
#[derive(Clone)]
pub struct HttpMailer {
    client: reqwest::Client,
    base_url: String,
}

impl HttpMailer {
    pub fn new(config: &NotificationConfig) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, kind: NotificationKind) -> String {
        format!("{}/email/{}", self.base_url, kind.path())
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn deliver(&self, notification: &Notification) -> Result<(), NotificationError> {
        let response = self
            .client
            .post(self.endpoint(notification.kind))
            .json(&notification.payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotificationError::Rejected {
                kind: notification.kind.path(),
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

/// Used when notifications are switched off in configuration
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledMailer;

#[async_trait]
impl Mailer for DisabledMailer {
    async fn deliver(&self, notification: &Notification) -> Result<(), NotificationError> {
        tracing::debug!(
            kind = notification.kind.path(),
            to = %notification.payload.parent_email,
            "Notifications disabled, dropping"
        );
        Ok(())
    }
}

/// Producer side of the notification queue
#[derive(Clone)]
pub struct NotificationQueue {
    tx: mpsc::Sender<Notification>,
    drops: Option<DropRecorder>,
}

/// Where dropped notifications are written when they name a reservation
#[derive(Clone)]
struct DropRecorder {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl NotificationQueue {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx, drops: None }, rx)
    }

    /// Record dropped notifications on their reservation, like failed deliveries
    pub fn record_drops(mut self, store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        self.drops = Some(DropRecorder { store, clock });
        self
    }

    /// Hand a notification to the worker without waiting
    pub fn enqueue(&self, notification: Notification) {
        if let Err(e) = self.tx.try_send(notification) {
            let (reason, dropped) = match e {
                mpsc::error::TrySendError::Full(n) => ("queue full", n),
                mpsc::error::TrySendError::Closed(n) => ("worker stopped", n),
            };
            tracing::warn!(
                kind = dropped.kind.path(),
                reservation_id = ?dropped.reservation_id,
                reason,
                "Notification dropped"
            );
            self.record_drop(&dropped, reason);
        }
    }

    fn record_drop(&self, dropped: &Notification, reason: &'static str) {
        let (Some(drops), Some(id)) = (self.drops.clone(), dropped.reservation_id) else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let message = format!("{} notification not sent: {}", dropped.kind.path(), reason);
        runtime.spawn(async move {
            let at = drops.clock.now();
            if let Err(e) = record_delivery_failure(drops.store.as_ref(), id, &message, at).await {
                tracing::error!(reservation_id = %id, error = %e, "Could not record dropped notification");
            }
        });
    }
}

/// Drains the queue and delivers each notification once
pub struct NotificationWorker {
    rx: mpsc::Receiver<Notification>,
    mailer: Arc<dyn Mailer>,
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl NotificationWorker {
    pub fn new(
        rx: mpsc::Receiver<Notification>,
        mailer: Arc<dyn Mailer>,
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            rx,
            mailer,
            store,
            clock,
        }
    }

    pub async fn run(mut self) {
        while let Some(notification) = self.rx.recv().await {
            self.dispatch(&notification).await;
        }
        tracing::info!("Notification queue closed, worker exiting");
    }

    async fn dispatch(&self, notification: &Notification) {
        match self.mailer.deliver(notification).await {
            Ok(()) => {
                tracing::debug!(
                    kind = notification.kind.path(),
                    reservation_id = ?notification.reservation_id,
                    "Notification delivered"
                );
            }
            Err(e) => {
                tracing::warn!(
                    kind = notification.kind.path(),
                    reservation_id = ?notification.reservation_id,
                    error = %e,
                    "Notification delivery failed"
                );
                if let Some(id) = notification.reservation_id {
                    let message = e.to_string();
                    if let Err(e) =
                        record_delivery_failure(self.store.as_ref(), id, &message, self.clock.now())
                            .await
                    {
                        tracing::error!(reservation_id = %id, error = %e, "Could not record delivery failure");
                    }
                }
            }
        }
    }
}

/// Write a delivery failure into the reservation; a vanished reservation is ignored
pub async fn record_delivery_failure(
    store: &dyn Store,
    reservation_id: Uuid,
    message: &str,
    at: DateTime<Utc>,
) -> AppResult<()> {
    let mut tx = store.begin().await?;
    let Some(mut reservation) = tx.reservation(reservation_id).await? else {
        return Ok(());
    };
    reservation.notification_error = Some(message.to_string());
    reservation.notification_error_at = Some(at);
    reservation.updated_at = at;
    tx.update_reservation(&reservation).await?;
    tx.commit().await
}
