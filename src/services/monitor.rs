//! Due-date monitor.
//!
//! A sweep walks the active reservations, moves overdue loans to `Due` and
//! sends the due-soon reminder and the overdue notice. Each send is guarded
//! by a per-reservation flag that is claimed in its own transaction before
//! the mail goes out, so concurrent sweeps (several server instances, or a
//! manual sweep racing the scheduler) send every message at most once.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::{
    sync::broadcast::error::RecvError,
    time::MissedTickBehavior,
};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{
    changes::{ChangeFeed, ChangeKind},
    notifications::{record_delivery_failure, Mailer, Notification},
    with_retries,
};
use crate::{
    clock::Clock,
    config::LoanPolicy,
    error::AppResult,
    models::{ReminderFlag, Reservation, ReservationPhase, ReservationStatus},
    repository::Repository,
};

/// Result of trying to take ownership of a reminder
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// The flag was set by this caller, which must now send the message
    Claimed(Reservation),
    AlreadyClaimed,
    /// The reservation is gone or not in the window for this reminder
    NotEligible,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub examined: usize,
    pub moved_to_due: usize,
    pub reminders_sent: usize,
    pub overdue_notices_sent: usize,
    /// Sends skipped because another sweep owned them
    pub already_claimed: usize,
    pub delivery_failures: usize,
}

impl SweepReport {
    pub fn is_idle(&self) -> bool {
        self.moved_to_due == 0
            && self.reminders_sent == 0
            && self.overdue_notices_sent == 0
            && self.delivery_failures == 0
    }
}

#[derive(Clone)]
pub struct DueDateMonitor {
    store: Repository,
    mailer: Arc<dyn Mailer>,
    changes: ChangeFeed,
    clock: Arc<dyn Clock>,
    policy: LoanPolicy,
    max_retries: u32,
}

impl DueDateMonitor {
    pub fn new(
        store: Repository,
        mailer: Arc<dyn Mailer>,
        changes: ChangeFeed,
        clock: Arc<dyn Clock>,
        policy: LoanPolicy,
        max_retries: u32,
    ) -> Self {
        Self {
            store,
            mailer,
            changes,
            clock,
            policy,
            max_retries,
        }
    }

    /// Evaluate every active reservation once
    pub async fn sweep(&self) -> AppResult<SweepReport> {
        let now = self.clock.now();
        let reservations = self.store.list_reservations().await?;
        let mut report = SweepReport {
            examined: reservations.len(),
            ..SweepReport::default()
        };

        for reservation in reservations {
            let id = reservation.id;
            if let Err(e) = self.evaluate(reservation, now, &mut report).await {
                tracing::error!(reservation_id = %id, error = %e, "Due-date evaluation failed");
            }
        }
        Ok(report)
    }

    async fn evaluate(
        &self,
        reservation: Reservation,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) -> AppResult<()> {
        let mut reservation = reservation;

        if matches!(reservation.phase(), ReservationPhase::OnLoan(loan) if loan.due_date < now) {
            match self.mark_due(reservation.id, now).await? {
                Some((current, moved)) => {
                    if moved {
                        report.moved_to_due += 1;
                    }
                    reservation = current;
                }
                None => return Ok(()),
            }
        }

        let due_soon = matches!(
            reservation.phase(),
            ReservationPhase::OnLoan(loan) | ReservationPhase::Due(loan) if !loan.due_reminder_sent
        ) && self.is_eligible(&reservation, ReminderFlag::DueReminder, now);
        if due_soon {
            self.claim_and_send(&reservation, ReminderFlag::DueReminder, now, report)
                .await?;
        }

        let overdue = matches!(
            reservation.phase(),
            ReservationPhase::Due(loan) if !loan.overdue_3day_sent
        ) && self.is_eligible(&reservation, ReminderFlag::OverdueNotice, now);
        if overdue {
            self.claim_and_send(&reservation, ReminderFlag::OverdueNotice, now, report)
                .await?;
        }
        Ok(())
    }

    /// Whether the reservation is in the window for `flag` at `now`, ignoring
    /// the flag itself
    fn is_eligible(&self, reservation: &Reservation, flag: ReminderFlag, now: DateTime<Utc>) -> bool {
        match (flag, reservation.phase()) {
            (
                ReminderFlag::DueReminder,
                ReservationPhase::OnLoan(loan) | ReservationPhase::Due(loan),
            ) => {
                let remaining = loan.due_date - now;
                remaining >= Duration::zero()
                    && remaining <= Duration::days(self.policy.reminder_window_days)
            }
            (ReminderFlag::OverdueNotice, ReservationPhase::Due(loan)) => {
                now - loan.due_date >= Duration::days(self.policy.overdue_notice_days)
            }
            _ => false,
        }
    }

    /// Flip an overdue `On Loan` reservation to `Due`.
    ///
    /// Returns the current record and whether this call changed it, or `None`
    /// when the reservation has left the active set.
    async fn mark_due(&self, id: Uuid, now: DateTime<Utc>) -> AppResult<Option<(Reservation, bool)>> {
        let result = with_retries(self.max_retries, "mark_due", move || {
            self.try_mark_due(id, now)
        })
        .await?;

        if let Some((reservation, true)) = &result {
            tracing::info!(reservation_id = %id, "Loan is overdue, status set to Due");
            self.changes
                .publish(id, ChangeKind::Updated, Some(reservation.status), now);
        }
        Ok(result)
    }

    async fn try_mark_due(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<Option<(Reservation, bool)>> {
        let mut tx = self.store.begin().await?;
        let Some(mut reservation) = tx.reservation(id).await? else {
            return Ok(None);
        };
        let overdue = matches!(
            reservation.phase(),
            ReservationPhase::OnLoan(loan) if loan.due_date < now
        );
        if !overdue {
            return Ok(Some((reservation, false)));
        }

        reservation.status = ReservationStatus::Due;
        if let Some(loan) = reservation.loan.as_mut() {
            // The toy is already late; a due-soon reminder would be stale
            loan.due_reminder_sent = true;
            loan.overdue_3day_sent = false;
        }
        reservation.updated_at = now;
        tx.update_reservation(&reservation).await?;
        tx.commit().await?;
        Ok(Some((reservation, true)))
    }

    /// Atomically set a reminder flag if it is still clear
    pub async fn claim(&self, id: Uuid, flag: ReminderFlag) -> AppResult<ClaimOutcome> {
        let now = self.clock.now();
        with_retries(self.max_retries, "claim_reminder", move || {
            self.try_claim(id, flag, now)
        })
        .await
    }

    async fn try_claim(
        &self,
        id: Uuid,
        flag: ReminderFlag,
        now: DateTime<Utc>,
    ) -> AppResult<ClaimOutcome> {
        let mut tx = self.store.begin().await?;
        let Some(mut reservation) = tx.reservation(id).await? else {
            return Ok(ClaimOutcome::NotEligible);
        };
        // The sweep read its list earlier; the loan may have been extended or
        // returned since
        if !self.is_eligible(&reservation, flag, now) {
            return Ok(ClaimOutcome::NotEligible);
        }
        let Some(loan) = reservation.loan.as_mut() else {
            return Ok(ClaimOutcome::NotEligible);
        };
        if loan.flag(flag) {
            return Ok(ClaimOutcome::AlreadyClaimed);
        }
        loan.set_flag(flag, true);
        reservation.updated_at = now;
        tx.update_reservation(&reservation).await?;
        tx.commit().await?;
        Ok(ClaimOutcome::Claimed(reservation))
    }

    async fn claim_and_send(
        &self,
        reservation: &Reservation,
        flag: ReminderFlag,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) -> AppResult<()> {
        let claimed = match self.claim(reservation.id, flag).await? {
            ClaimOutcome::Claimed(claimed) => claimed,
            ClaimOutcome::AlreadyClaimed => {
                tracing::debug!(reservation_id = %reservation.id, %flag, "Reminder already claimed");
                report.already_claimed += 1;
                return Ok(());
            }
            ClaimOutcome::NotEligible => return Ok(()),
        };
        let Some(due_date) = claimed.loan.as_ref().map(|l| l.due_date) else {
            return Ok(());
        };

        let notification = match flag {
            ReminderFlag::DueReminder => Notification::due_reminder(&claimed, due_date),
            ReminderFlag::OverdueNotice => Notification::overdue_notice(&claimed, due_date, now),
        };

        match self.mailer.deliver(&notification).await {
            Ok(()) => {
                tracing::info!(reservation_id = %claimed.id, %flag, "Reminder sent");
                match flag {
                    ReminderFlag::DueReminder => report.reminders_sent += 1,
                    ReminderFlag::OverdueNotice => report.overdue_notices_sent += 1,
                }
            }
            Err(e) => {
                // The flag stays set; an admin resends by hand if needed
                tracing::warn!(reservation_id = %claimed.id, %flag, error = %e, "Reminder delivery failed");
                report.delivery_failures += 1;
                record_delivery_failure(self.store.as_ref(), claimed.id, &e.to_string(), now)
                    .await?;
            }
        }
        Ok(())
    }

    /// Sweep on a fixed interval and whenever the reservations change
    pub async fn run(self, interval: std::time::Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut changes = self.changes.subscribe();
        let mut listening = true;

        tracing::info!(interval_secs = interval.as_secs(), "Due-date monitor started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                received = changes.recv(), if listening => match received {
                    Ok(_) | Err(RecvError::Lagged(_)) => {
                        // Coalesce a burst of changes into one sweep
                        while changes.try_recv().is_ok() {}
                    }
                    Err(RecvError::Closed) => {
                        tracing::warn!("Change feed closed, falling back to interval sweeps");
                        listening = false;
                        continue;
                    }
                },
            }

            match self.sweep().await {
                Ok(report) if report.is_idle() => {
                    tracing::debug!(examined = report.examined, "Sweep finished, nothing to do");
                }
                Ok(report) => tracing::info!(?report, "Sweep finished"),
                Err(e) => tracing::error!(error = %e, "Sweep failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{
        notifications::{MockMailer, NotificationError, NotificationKind},
        test_support::Harness,
    };

    fn accepting_mailer(expected: usize) -> MockMailer {
        let mut mailer = MockMailer::new();
        mailer.expect_deliver().times(expected).returning(|_| Ok(()));
        mailer
    }

    #[tokio::test]
    async fn test_overdue_loan_gets_one_notice() {
        let mut mailer = MockMailer::new();
        mailer
            .expect_deliver()
            .withf(|n| {
                n.kind == NotificationKind::OverdueNotice
                    && n.payload.days_past_due.as_deref() == Some("4")
            })
            .times(1)
            .returning(|_| Ok(()));
        let h = Harness::with_mailer(mailer);
        let toy = h.add_item("Marble run", 1, 1).await;
        let reservation = h.lend(toy.id).await;

        // Loan started 18 days ago: four days past a 14 day due date
        h.clock.advance(Duration::days(18));
        let report = h.monitor.sweep().await.unwrap();
        assert_eq!(report.moved_to_due, 1);
        assert_eq!(report.overdue_notices_sent, 1);
        assert_eq!(report.reminders_sent, 0);

        let stored = h.reservation(reservation.id).await;
        assert_eq!(stored.status, ReservationStatus::Due);
        let loan = stored.loan.unwrap();
        assert!(loan.due_reminder_sent);
        assert!(loan.overdue_3day_sent);

        let report = h.monitor.sweep().await.unwrap();
        assert!(report.is_idle());
    }

    #[tokio::test]
    async fn test_due_soon_reminder_sent_once() {
        let mut mailer = MockMailer::new();
        mailer
            .expect_deliver()
            .withf(|n| n.kind == NotificationKind::DueReminder)
            .times(1)
            .returning(|_| Ok(()));
        let h = Harness::with_mailer(mailer);
        let toy = h.add_item("Tool bench", 1, 1).await;
        let reservation = h.lend(toy.id).await;

        h.clock.advance(Duration::days(13));
        let report = h.monitor.sweep().await.unwrap();
        assert_eq!(report.reminders_sent, 1);
        assert_eq!(h.monitor.sweep().await.unwrap().reminders_sent, 0);

        let stored = h.reservation(reservation.id).await;
        assert_eq!(stored.status, ReservationStatus::OnLoan);
        assert!(stored.loan.unwrap().due_reminder_sent);
    }

    #[tokio::test]
    async fn test_nothing_to_do_before_window() {
        let h = Harness::with_mailer(accepting_mailer(0));
        let toy = h.add_item("Abacus", 1, 1).await;
        h.lend(toy.id).await;

        h.clock.advance(Duration::days(5));
        let report = h.monitor.sweep().await.unwrap();
        assert_eq!(report.examined, 1);
        assert!(report.is_idle());
    }

    #[tokio::test]
    async fn test_claim_is_granted_once() {
        let h = Harness::with_mailer(accepting_mailer(0));
        let toy = h.add_item("Stacking cups", 1, 1).await;
        let reservation = h.lend(toy.id).await;
        h.clock.advance(Duration::days(13));

        let claims = claim_concurrently(&h.monitor, reservation.id).await;
        let granted = claims
            .iter()
            .filter(|c| matches!(c, ClaimOutcome::Claimed(_)))
            .count();
        assert_eq!(granted, 1);
        assert_eq!(
            claims
                .iter()
                .filter(|c| **c == ClaimOutcome::AlreadyClaimed)
                .count(),
            claims.len() - 1
        );
    }

    async fn claim_concurrently(monitor: &DueDateMonitor, id: Uuid) -> Vec<ClaimOutcome> {
        let mut handles = Vec::new();
        for _ in 0..5 {
            let monitor = monitor.clone();
            handles.push(tokio::spawn(async move {
                monitor.claim(id, ReminderFlag::DueReminder).await
            }));
        }
        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.await.unwrap().unwrap());
        }
        outcomes
    }

    #[tokio::test]
    async fn test_claim_without_loan_is_not_eligible() {
        let h = Harness::with_mailer(accepting_mailer(0));
        let toy = h.add_item("Bead maze", 1, 1).await;
        let reservation = h.reserve(toy.id).await;
        let outcome = h
            .monitor
            .claim(reservation.id, ReminderFlag::DueReminder)
            .await
            .unwrap();
        assert_eq!(outcome, ClaimOutcome::NotEligible);
    }

    #[tokio::test]
    async fn test_claim_outside_window_is_not_eligible() {
        let h = Harness::with_mailer(accepting_mailer(0));
        let toy = h.add_item("Xylophone", 1, 1).await;
        let reservation = h.lend(toy.id).await;

        h.clock.advance(Duration::days(5));
        let outcome = h
            .monitor
            .claim(reservation.id, ReminderFlag::DueReminder)
            .await
            .unwrap();
        assert_eq!(outcome, ClaimOutcome::NotEligible);
        let outcome = h
            .monitor
            .claim(reservation.id, ReminderFlag::OverdueNotice)
            .await
            .unwrap();
        assert_eq!(outcome, ClaimOutcome::NotEligible);
        assert!(!h.reservation(reservation.id).await.loan.unwrap().due_reminder_sent);
    }

    #[tokio::test]
    async fn test_extended_loan_cannot_claim_overdue_notice() {
        let h = Harness::with_mailer(accepting_mailer(0));
        let toy = h.add_item("Rocking horse", 1, 1).await;
        let reservation = h.lend(toy.id).await;

        h.clock.advance(Duration::days(15));
        let report = h.monitor.sweep().await.unwrap();
        assert_eq!(report.moved_to_due, 1);
        assert_eq!(report.overdue_notices_sent, 0);

        // Four days late, then extended before the next sweep claims
        h.clock.advance(Duration::days(3));
        h.reservations.extend_loan(reservation.id).await.unwrap();
        let outcome = h
            .monitor
            .claim(reservation.id, ReminderFlag::OverdueNotice)
            .await
            .unwrap();
        assert_eq!(outcome, ClaimOutcome::NotEligible);

        let stored = h.reservation(reservation.id).await;
        assert_eq!(stored.status, ReservationStatus::OnLoan);
        assert!(!stored.loan.unwrap().overdue_3day_sent);
        assert!(h.monitor.sweep().await.unwrap().is_idle());
    }

    #[tokio::test]
    async fn test_failed_delivery_keeps_flag_and_records_error() {
        let mut mailer = MockMailer::new();
        mailer.expect_deliver().times(1).returning(|n| {
            Err(NotificationError::Rejected {
                kind: n.kind.path(),
                status: 500,
            })
        });
        let h = Harness::with_mailer(mailer);
        let toy = h.add_item("Play tent", 1, 1).await;
        let reservation = h.lend(toy.id).await;

        h.clock.advance(Duration::days(13));
        let report = h.monitor.sweep().await.unwrap();
        assert_eq!(report.delivery_failures, 1);

        let stored = h.reservation(reservation.id).await;
        assert!(stored.loan.unwrap().due_reminder_sent);
        assert!(stored.notification_error.is_some());

        // No retry on the next sweep
        assert_eq!(h.monitor.sweep().await.unwrap().delivery_failures, 0);
    }

    #[tokio::test]
    async fn test_extension_rearms_reminders() {
        let mut mailer = MockMailer::new();
        mailer
            .expect_deliver()
            .withf(|n| n.kind == NotificationKind::DueReminder)
            .times(2)
            .returning(|_| Ok(()));
        let h = Harness::with_mailer(mailer);
        let toy = h.add_item("Paint easel", 1, 1).await;
        let reservation = h.lend(toy.id).await;

        h.clock.advance(Duration::days(13));
        h.monitor.sweep().await.unwrap();
        h.reservations.extend_loan(reservation.id).await.unwrap();

        h.clock.advance(Duration::days(7));
        let report = h.monitor.sweep().await.unwrap();
        assert_eq!(report.reminders_sent, 1);
    }
}
