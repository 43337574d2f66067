//! A `Connection` is one routed path out of a bridge config: one source
//! endpoint, one or more destination endpoints, and the list of
//! [`TransferUnit`]s built from its `transferPdus` entries.
//!
//! It owns the `active` flag and `epoch` counter shared (via `Arc`) with
//! every unit it built, so toggling either here is immediately visible
//! to units on their next transfer attempt without any additional
//! synchronization — the same relaxed-atomics admin pattern the
//! coordinating-thread design elsewhere in this crate relies on.

use crate::unit::TransferUnit;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

pub struct Connection {
    pub id: String,
    epoch: Arc<AtomicU8>,
    active: Arc<AtomicBool>,
    units: Vec<TransferUnit>,
}

impl Connection {
    /// Construct an empty connection. Units are attached with
    /// [`Connection::add_unit`] once built, since unit construction
    /// needs this connection's `epoch`/`active` handles.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            epoch: Arc::new(AtomicU8::new(0)),
            active: Arc::new(AtomicBool::new(true)),
            units: Vec::new(),
        }
    }

    /// Handles to hand to a unit being built for this connection.
    pub fn shared_state(&self) -> (Arc<AtomicU8>, Arc<AtomicBool>) {
        (self.epoch.clone(), self.active.clone())
    }

    pub fn add_unit(&mut self, unit: TransferUnit) {
        self.units.push(unit);
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Relaxed);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub fn increment_epoch(&self) -> u8 {
        self.epoch.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    pub fn epoch(&self) -> u8 {
        self.epoch.load(Ordering::Relaxed)
    }

    /// Drive every cyclic unit this connection owns. Event-driven units
    /// are no-ops here; they already fired from their endpoint's
    /// `process_recv_events` callback.
    pub fn cyclic_trigger(&self) {
        if !self.is_active() {
            return;
        }
        for unit in &self.units {
            if unit.is_cyclic() {
                unit.cyclic_trigger();
            }
        }
    }
}
