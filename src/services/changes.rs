//! Live change feed for the reservations collection

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::ReservationStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub enum ChangeKind {
    Created,
    Updated,
    Removed,
}

/// One committed mutation of the reservations collection
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReservationChange {
    pub reservation_id: Uuid,
    pub kind: ChangeKind,
    /// Status after the change; absent when the record left the collection
    pub status: Option<ReservationStatus>,
    pub at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<ReservationChange>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(
        &self,
        reservation_id: Uuid,
        kind: ChangeKind,
        status: Option<ReservationStatus>,
        at: DateTime<Utc>,
    ) {
        // No subscribers is fine
        let _ = self.tx.send(ReservationChange {
            reservation_id,
            kind,
            status,
            at,
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReservationChange> {
        self.tx.subscribe()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(128)
    }
}
