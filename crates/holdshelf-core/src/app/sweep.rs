//! ExpirationSweep - cancel expired reservations and refill ready slots.
//!
//! # Flow
//! 1. One read transaction collects every live reservation with
//!    `expires_at < now`, grouped by book in id order.
//! 2. Each book is settled in its own transaction (cancel, then promote).
//!    A failing book is rolled back, logged and reported; the rest carry on.
//! 3. Dry-run stops after step 1 and projects the outcome from the
//!    unmutated store.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::domain::{
    BookId, ErrorKind, MemberId, Reservation, ReservationError, ReservationId, ReservationStatus,
};
use crate::ports::{Clock, EntityStore, ReservationFilter, ReservationOrder, StoreTx};
use crate::service::ReservationService;
use crate::service::promotion::{has_active_in, next_queued_in, settle_expired_in};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SweepMode {
    #[default]
    Apply,
    DryRun,
}

/// One record-level effect of a sweep (or, in dry-run, a projected one).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SweepAction {
    Cancelled {
        reservation: ReservationId,
        book: BookId,
        member: MemberId,
        was: ReservationStatus,
        expired_at: DateTime<Utc>,
    },
    Promoted {
        reservation: ReservationId,
        book: BookId,
        member: MemberId,
        expires_at: DateTime<Utc>,
    },
}

impl SweepAction {
    fn cancelled(before: &Reservation) -> Self {
        SweepAction::Cancelled {
            reservation: before.id,
            book: before.book,
            member: before.member,
            was: before.status,
            expired_at: before.expires_at,
        }
    }

    fn promoted(r: &Reservation) -> Self {
        SweepAction::Promoted {
            reservation: r.id,
            book: r.book,
            member: r.member,
            expires_at: r.expires_at,
        }
    }
}

/// A book whose settlement was rolled back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepFailure {
    pub book: BookId,
    pub kind: ErrorKind,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub dry_run: bool,
    pub cancelled: usize,
    pub promoted: usize,
    pub details: Vec<SweepAction>,
    pub failures: Vec<SweepFailure>,
    /// Set by [`ExpirationSweep::run_verified`]: whether an immediate re-run
    /// changed nothing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified_noop: Option<bool>,
}

impl SweepReport {
    pub fn is_noop(&self) -> bool {
        self.cancelled == 0 && self.promoted == 0 && self.failures.is_empty()
    }
}

pub struct ExpirationSweep<S, C> {
    service: Arc<ReservationService<S, C>>,
}

impl<S, C> Clone for ExpirationSweep<S, C> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
        }
    }
}

impl<S, C> ExpirationSweep<S, C>
where
    S: EntityStore,
    C: Clock + Clone + 'static,
{
    pub fn new(service: Arc<ReservationService<S, C>>) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &Arc<ReservationService<S, C>> {
        &self.service
    }

    /// Only the initial read can fail the whole run; per-book failures end up
    /// in [`SweepReport::failures`].
    pub fn run(&self, mode: SweepMode) -> Result<SweepReport, ReservationError> {
        let now = self.service.now();
        let mut report = SweepReport {
            dry_run: mode == SweepMode::DryRun,
            ..SweepReport::default()
        };

        let by_book = match mode {
            SweepMode::DryRun => {
                self.service
                    .store()
                    .transaction(|tx| project(tx, now, &mut report))?;
                info!(
                    cancelled = report.cancelled,
                    promoted = report.promoted,
                    "dry-run sweep projected"
                );
                return Ok(report);
            }
            SweepMode::Apply => self
                .service
                .store()
                .transaction(|tx| expired_by_book(tx, now))?,
        };

        for (book, expired) in by_book {
            let candidates: Vec<ReservationId> = expired.iter().map(|r| r.id).collect();
            let policy = self.service.policy();
            let settled = self
                .service
                .store()
                .transaction(|tx| settle_expired_in(tx, book, &candidates, now, policy));
            match settled {
                Ok(settlement) => {
                    for before in expired
                        .iter()
                        .filter(|r| settlement.cancelled.iter().any(|c| c.id == r.id))
                    {
                        report.details.push(SweepAction::cancelled(before));
                    }
                    report.cancelled += settlement.cancelled.len();
                    if let Some(promoted) = &settlement.promoted {
                        report.details.push(SweepAction::promoted(promoted));
                        report.promoted += 1;
                    }
                    debug!(
                        book = %book,
                        cancelled = settlement.cancelled.len(),
                        promoted = settlement.promoted.is_some(),
                        "book settled"
                    );
                }
                Err(err) => {
                    warn!(book = %book, kind = ?err.kind(), error = %err, "book settlement rolled back");
                    report.failures.push(SweepFailure {
                        book,
                        kind: err.kind(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        info!(
            cancelled = report.cancelled,
            promoted = report.promoted,
            failed_books = report.failures.len(),
            "expiration sweep finished"
        );
        Ok(report)
    }

    /// Apply, then sweep again at once and record whether the second pass was
    /// a no-op.
    pub fn run_verified(&self) -> Result<SweepReport, ReservationError> {
        let mut report = self.run(SweepMode::Apply)?;
        let again = self.run(SweepMode::Apply)?;
        if !again.is_noop() {
            warn!(
                cancelled = again.cancelled,
                promoted = again.promoted,
                "re-run of the sweep was not a no-op"
            );
        }
        report.verified_noop = Some(again.is_noop());
        Ok(report)
    }
}

fn expired_by_book(
    tx: &mut dyn StoreTx,
    now: DateTime<Utc>,
) -> Result<BTreeMap<BookId, Vec<Reservation>>, ReservationError> {
    let expired = tx.find_reservations(
        &ReservationFilter::new().live().expires_before(now),
        ReservationOrder::ExpiresAt,
    )?;
    let mut by_book: BTreeMap<BookId, Vec<Reservation>> = BTreeMap::new();
    for r in expired {
        by_book.entry(r.book).or_default().push(r);
    }
    Ok(by_book)
}

/// Every expired record counts as a cancellation; a promotion is projected
/// where the book has no Ready reservation right now and someone queued.
fn project(
    tx: &mut dyn StoreTx,
    now: DateTime<Utc>,
    report: &mut SweepReport,
) -> Result<(), ReservationError> {
    for (book, expired) in expired_by_book(tx, now)? {
        report.cancelled += expired.len();
        report
            .details
            .extend(expired.iter().map(SweepAction::cancelled));
        if has_active_in(tx, book)? {
            continue;
        }
        if let Some(next) = next_queued_in(tx, book)? {
            report.promoted += 1;
            report.details.push(SweepAction::promoted(&next));
        }
    }
    Ok(())
}
