//! Two-budget admission control.
//!
//! An [`AdmissionController`] admits a unit of work only when it can take one
//! execution slot *and* one logical connection. Both counters are lock-free
//! (`AtomicU32` with a CAS reservation loop), so [`AdmissionController::try_admit`]
//! and [`AdmissionController::release`] never block and never suspend.
//!
//! ```
//! use callgate::core::AdmissionController;
//!
//! let gate = AdmissionController::new(2, 2).unwrap();
//! let first = gate.try_admit().expect("capacity available");
//! let _second = gate.try_admit().expect("capacity available");
//! assert!(gate.try_admit().is_none());
//!
//! gate.release(first).unwrap();
//! assert!(gate.try_admit().is_some());
//! ```

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::GateError;

/// Lock-free counter bounded by a fixed capacity.
#[derive(Debug)]
struct BoundedCounter {
    in_use: AtomicU32,
    capacity: u32,
}

impl BoundedCounter {
    const fn new(capacity: u32) -> Self {
        Self {
            in_use: AtomicU32::new(0),
            capacity,
        }
    }

    /// Check-and-increment as a single CAS; never exceeds `capacity`.
    fn try_increment(&self) -> bool {
        let mut current = self.in_use.load(Ordering::Acquire);
        loop {
            if current >= self.capacity {
                return false;
            }
            match self.in_use.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Decrement, flooring at zero.
    fn decrement(&self) {
        let _ = self
            .in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    fn load(&self) -> u32 {
        self.in_use.load(Ordering::Acquire)
    }
}

/// Bounded pool of execution slots.
#[derive(Debug)]
pub(crate) struct SlotPool {
    counter: BoundedCounter,
}

impl SlotPool {
    pub(crate) const fn new(capacity: u32) -> Self {
        Self {
            counter: BoundedCounter::new(capacity),
        }
    }

    pub(crate) fn acquire(&self) -> bool {
        self.counter.try_increment()
    }

    pub(crate) fn release(&self) {
        self.counter.decrement();
    }

    pub(crate) fn occupied(&self) -> u32 {
        self.counter.load()
    }

    pub(crate) const fn capacity(&self) -> u32 {
        self.counter.capacity
    }
}

/// Bounded count of active logical connections.
#[derive(Debug)]
pub(crate) struct ConnectionBudget {
    counter: BoundedCounter,
}

impl ConnectionBudget {
    pub(crate) const fn new(capacity: u32) -> Self {
        Self {
            counter: BoundedCounter::new(capacity),
        }
    }

    pub(crate) fn reserve(&self) -> bool {
        self.counter.try_increment()
    }

    pub(crate) fn free(&self) {
        self.counter.decrement();
    }

    pub(crate) fn active(&self) -> u32 {
        self.counter.load()
    }

    pub(crate) const fn capacity(&self) -> u32 {
        self.counter.capacity
    }
}

/// Proof that one slot and one connection are held.
///
/// Tickets are neither `Clone` nor `Copy`, and [`AdmissionController::release`]
/// takes them by value, so a released ticket cannot be released again.
#[must_use = "dropping a ticket without releasing it leaks a slot and a connection"]
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct AdmissionTicket {
    controller: Uuid,
    seq: u64,
}

impl AdmissionTicket {
    /// Sequence number assigned at admission, unique per controller.
    pub const fn id(&self) -> u64 {
        self.seq
    }
}

/// Point-in-time view of both budgets.
///
/// Not transactionally consistent with concurrent admissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionStats {
    /// Slots currently held.
    pub slots_in_use: u32,
    /// Slot pool capacity.
    pub slots_capacity: u32,
    /// Connections currently held.
    pub connections_in_use: u32,
    /// Connection budget capacity.
    pub connections_capacity: u32,
}

/// Gate in front of protected work, combining a slot pool and a connection budget.
#[derive(Debug)]
pub struct AdmissionController {
    id: Uuid,
    slots: SlotPool,
    connections: ConnectionBudget,
    next_ticket: AtomicU64,
}

impl AdmissionController {
    /// Create a controller. Both capacities must be greater than zero.
    pub fn new(slot_capacity: u32, connection_capacity: u32) -> Result<Self, GateError> {
        if slot_capacity == 0 {
            return Err(GateError::Config(
                "slot_capacity must be greater than 0".into(),
            ));
        }
        if connection_capacity == 0 {
            return Err(GateError::Config(
                "connection_capacity must be greater than 0".into(),
            ));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            slots: SlotPool::new(slot_capacity),
            connections: ConnectionBudget::new(connection_capacity),
            next_ticket: AtomicU64::new(1),
        })
    }

    /// Try to take a slot and a connection without blocking.
    ///
    /// Returns `None` when either budget is exhausted. If the slot was taken but
    /// the connection budget was full, the slot is handed back before returning.
    pub fn try_admit(&self) -> Option<AdmissionTicket> {
        if !self.slots.acquire() {
            tracing::debug!(
                slots_in_use = self.slots.occupied(),
                "admission rejected: slot pool exhausted"
            );
            return None;
        }
        if !self.connections.reserve() {
            self.slots.release();
            tracing::debug!(
                connections_in_use = self.connections.active(),
                "admission rejected: connection budget exhausted"
            );
            return None;
        }

        let seq = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(ticket = seq, "admitted");
        Some(AdmissionTicket {
            controller: self.id,
            seq,
        })
    }

    /// Return the capacity held by `ticket`, connection first, then slot.
    ///
    /// A ticket issued by another controller is refused with
    /// [`GateError::DoubleRelease`] and no counter changes.
    pub fn release(&self, ticket: AdmissionTicket) -> Result<(), GateError> {
        if ticket.controller != self.id {
            tracing::error!(ticket = ticket.seq, "release of ticket not issued by this controller");
            return Err(GateError::DoubleRelease { ticket: ticket.seq });
        }
        self.connections.free();
        self.slots.release();
        tracing::debug!(ticket = ticket.seq, "released");
        Ok(())
    }

    /// Admit and wrap the ticket in a guard that releases on drop.
    pub fn try_admit_guard(self: &Arc<Self>) -> Option<AdmissionGuard> {
        self.try_admit().map(|ticket| AdmissionGuard {
            controller: Arc::clone(self),
            ticket: Some(ticket),
        })
    }

    /// Best-effort snapshot of both budgets.
    pub fn stats(&self) -> AdmissionStats {
        AdmissionStats {
            slots_in_use: self.slots.occupied(),
            slots_capacity: self.slots.capacity(),
            connections_in_use: self.connections.active(),
            connections_capacity: self.connections.capacity(),
        }
    }
}

/// RAII wrapper around an [`AdmissionTicket`].
///
/// Releases automatically when dropped, so capacity comes back even if the
/// owning future is cancelled or the work panics.
#[must_use = "dropping the guard releases admission immediately"]
#[derive(Debug)]
pub struct AdmissionGuard {
    controller: Arc<AdmissionController>,
    ticket: Option<AdmissionTicket>,
}

impl AdmissionGuard {
    /// Sequence number of the held ticket.
    pub fn ticket_id(&self) -> u64 {
        self.ticket.as_ref().map_or(0, AdmissionTicket::id)
    }

    /// Release explicitly, surfacing any release error.
    pub fn release(mut self) -> Result<(), GateError> {
        match self.ticket.take() {
            Some(ticket) => self.controller.release(ticket),
            None => Ok(()),
        }
    }
}

impl Drop for AdmissionGuard {
    fn drop(&mut self) {
        if let Some(ticket) = self.ticket.take() {
            if let Err(e) = self.controller.release(ticket) {
                tracing::error!("failed to release admission on drop: {}", e);
            }
        }
    }
}
