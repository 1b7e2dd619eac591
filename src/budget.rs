//! Session budget tracking
//!
//! Reserve-then-commit around every billed call: the reservation is
//! subtracted from remaining at reserve time, so two concurrent
//! escalations can never both pass a remaining-budget check and jointly
//! overspend. Commit reconciles the estimate with the actual cost;
//! release restores the hold if the call never completed.

use crate::error::TriageError;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

/// Provisional hold on budget, reconciled by commit or release
#[derive(Debug)]
pub struct ReservationToken {
    id: Uuid,
    amount: f64,
}

#[derive(Debug)]
struct Inner {
    ceiling: f64,
    spend: f64,
    reserved: f64,
    open: HashMap<Uuid, f64>,
    /// Set when an actual cost exceeded its estimate past the ceiling
    overrun: bool,
}

/// Thread-safe spend tracker for one analysis session
#[derive(Debug)]
pub struct BudgetTracker {
    inner: Mutex<Inner>,
}

impl BudgetTracker {
    pub fn new(ceiling: f64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                ceiling: ceiling.max(0.0),
                spend: 0.0,
                reserved: 0.0,
                open: HashMap::new(),
                overrun: false,
            }),
        }
    }

    /// Budget still available for new reservations, never negative
    pub fn remaining(&self) -> f64 {
        let inner = self.inner.lock().unwrap();
        (inner.ceiling - inner.spend - inner.reserved).max(0.0)
    }

    /// Total committed spend so far
    pub fn spend(&self) -> f64 {
        self.inner.lock().unwrap().spend
    }

    /// Hold `estimated_cost` against the budget. The check and the
    /// decrement happen under one lock, closing the TOCTOU window.
    pub fn reserve(&self, estimated_cost: f64) -> Result<ReservationToken, TriageError> {
        let mut inner = self.inner.lock().unwrap();
        let available = inner.ceiling - inner.spend - inner.reserved;

        if inner.overrun || estimated_cost > available {
            return Err(TriageError::BudgetExceeded {
                requested: estimated_cost,
                remaining: available.max(0.0),
            });
        }

        let token = ReservationToken {
            id: Uuid::new_v4(),
            amount: estimated_cost,
        };
        inner.reserved += estimated_cost;
        inner.open.insert(token.id, estimated_cost);
        Ok(token)
    }

    /// Settle a completed call at its actual cost. An actual above the
    /// estimate that pushes spend past the ceiling flags the tracker and
    /// blocks further reservations until the session ends.
    pub fn commit(&self, token: ReservationToken, actual_cost: f64) {
        let mut inner = self.inner.lock().unwrap();
        if inner.open.remove(&token.id).is_none() {
            warn!(token = %token.id, "commit for unknown reservation, ignoring");
            return;
        }
        inner.reserved -= token.amount;
        inner.spend += actual_cost.max(0.0);
        if inner.spend > inner.ceiling {
            inner.overrun = true;
            warn!(
                spend = inner.spend,
                ceiling = inner.ceiling,
                "budget overrun from underestimated call cost; blocking further reservations"
            );
        }
    }

    /// Restore a hold whose call failed or was cancelled, charging nothing
    pub fn release(&self, token: ReservationToken) {
        let mut inner = self.inner.lock().unwrap();
        if inner.open.remove(&token.id).is_some() {
            inner.reserved -= token.amount;
        }
    }
}
