//! Transfer units: the runtime object that actually copies a payload (or
//! an atomically-committed set of payloads) from a source endpoint to
//! one or more destination endpoints, gated by a [`TransferPolicy`].
//!
//! A unit never owns its connection's epoch or active flag outright; it
//! holds `Arc` handles shared with the owning [`crate::connection::Connection`]
//! so that `set_active`/`increment_epoch` calls from an admin thread are
//! visible to the unit's next transfer attempt without any locking
//! beyond the atomics themselves.
//!
//! Event-driven units (`Immediate`, `Throttle`, and any `AtomicGroup`
//! regardless of its members' policy) subscribe a callback on their
//! source endpoint(s) at construction time. That callback holds only a
//! `Weak` reference back into the unit so the endpoint's subscriber list
//! never keeps the unit alive past its connection — the only strong edge
//! runs from the unit to its endpoints, never the reverse.

use crate::endpoint::{Endpoint, RecvStatus};
use crate::error::TransferError;
use crate::pdu::ResolvedPduKey;
use crate::policy::TransferPolicy;
use crate::time_source::TimeSource;
use metrics::counter;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Weak};

/// A single source/destination(s) route gated by a non-atomic policy.
pub struct SingleTransfer {
    inner: Arc<SingleTransferInner>,
}

struct SingleTransferInner {
    label: String,
    source: Arc<dyn Endpoint>,
    source_key: ResolvedPduKey,
    destinations: Vec<(Arc<dyn Endpoint>, ResolvedPduKey)>,
    policy: Arc<TransferPolicy>,
    epoch: Arc<AtomicU8>,
    active: Arc<AtomicBool>,
    time_source: Arc<TimeSource>,
    epoch_validation: bool,
    buffer: Mutex<Vec<u8>>,
}

impl SingleTransfer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        label: impl Into<String>,
        source: Arc<dyn Endpoint>,
        source_key: ResolvedPduKey,
        destinations: Vec<(Arc<dyn Endpoint>, ResolvedPduKey)>,
        policy: Arc<TransferPolicy>,
        epoch: Arc<AtomicU8>,
        active: Arc<AtomicBool>,
        time_source: Arc<TimeSource>,
        epoch_validation: bool,
    ) -> Self {
        let inner = Arc::new(SingleTransferInner {
            label: label.into(),
            source,
            source_key: source_key.clone(),
            destinations,
            policy,
            epoch,
            active,
            time_source,
            epoch_validation,
            buffer: Mutex::new(Vec::new()),
        });

        if inner.policy.is_cyclic() {
            // Cyclic units are driven by `cyclic_trigger`, not recv events,
            // but still need exactly one subscription registered on their
            // source key (see module docs); the callback itself is inert.
            inner.source.subscribe(source_key, Box::new(|_key| {}));
        } else {
            let weak: Weak<SingleTransferInner> = Arc::downgrade(&inner);
            inner.source.subscribe(
                source_key,
                Box::new(move |_key| {
                    if let Some(inner) = weak.upgrade() {
                        if let Err(err) = inner.attempt_transfer() {
                            tracing::debug!(unit = %inner.label, error = %err, "transfer attempt discarded");
                        }
                    }
                }),
            );
        }

        Self { inner }
    }

    pub fn is_cyclic(&self) -> bool {
        self.inner.policy.is_cyclic()
    }

    /// Called once per driver iteration for cyclic units; a no-op for
    /// event-driven ones.
    pub fn cyclic_trigger(&self) {
        if self.inner.policy.is_cyclic() {
            if let Err(err) = self.inner.attempt_transfer() {
                tracing::debug!(unit = %self.inner.label, error = %err, "cyclic transfer attempt discarded");
            }
        }
    }
}

impl SingleTransferInner {
    fn attempt_transfer(&self) -> Result<(), TransferError> {
        if !self.active.load(Ordering::Relaxed) {
            return Ok(());
        }

        let now_us = self.time_source.now_us();
        if !self.policy.should_transfer(&self.source_key, now_us) {
            return Ok(());
        }

        let payload = recv_payload(&self.source, &self.source_key)?;

        if self.epoch_validation {
            let current = self.epoch.load(Ordering::Relaxed);
            let header = payload.first().copied().unwrap_or(0);
            if header != current {
                // Silent discard: no `on_transferred`, so a later arrival
                // carrying the current epoch is free to retry.
                counter!("bridge.transfers.discarded_epoch_mismatch").increment(1);
                return Err(TransferError::EpochMismatch {
                    captured: header,
                    current,
                });
            }
        }

        {
            let mut buf = self.buffer.lock();
            *buf = payload;
            for (dest, dest_key) in &self.destinations {
                if !dest.send(dest_key, &buf) {
                    counter!("bridge.transfers.send_failed").increment(1);
                    return Err(TransferError::SendFailed(dest_key.clone()));
                }
            }
        }

        self.policy.on_transferred(&self.source_key, now_us);
        counter!("bridge.transfers.committed").increment(1);
        Ok(())
    }
}

/// One member of an [`AtomicGroup`]: its own source and destination set,
/// committed in lockstep with its siblings.
pub struct AtomicMember {
    pub source: Arc<dyn Endpoint>,
    pub source_key: ResolvedPduKey,
    pub destinations: Vec<(Arc<dyn Endpoint>, ResolvedPduKey)>,
}

/// A set of PDUs that transfer-or-discard as a single unit: the policy
/// only reports `should_transfer` once every member has received data
/// since the last commit, and if any member's payload was captured
/// under an epoch that changed mid-assembly, the whole frame is
/// discarded rather than partially forwarded.
pub struct AtomicGroup {
    inner: Arc<AtomicGroupInner>,
}

struct AtomicGroupInner {
    label: String,
    members: Vec<AtomicMember>,
    policy: Arc<TransferPolicy>,
    epoch: Arc<AtomicU8>,
    active: Arc<AtomicBool>,
    time_source: Arc<TimeSource>,
    epoch_validation: bool,
    buffers: Vec<Mutex<Vec<u8>>>,
}

impl AtomicGroup {
    /// `policy` must be a `TransferPolicy::ImmediateAtomic`; the builder
    /// is responsible for enforcing that invariant before construction.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        label: impl Into<String>,
        members: Vec<AtomicMember>,
        policy: Arc<TransferPolicy>,
        epoch: Arc<AtomicU8>,
        active: Arc<AtomicBool>,
        time_source: Arc<TimeSource>,
        epoch_validation: bool,
    ) -> Self {
        debug_assert!(policy.is_atomic(), "AtomicGroup requires an atomic policy");

        for member in &members {
            policy.add_pdu_key(member.source_key.clone());
        }

        let buffers = members.iter().map(|_| Mutex::new(Vec::new())).collect();
        let inner = Arc::new(AtomicGroupInner {
            label: label.into(),
            members,
            policy,
            epoch,
            active,
            time_source,
            epoch_validation,
            buffers,
        });

        for member in inner.members.iter() {
            let weak: Weak<AtomicGroupInner> = Arc::downgrade(&inner);
            member.source.subscribe(
                member.source_key.clone(),
                Box::new(move |key| {
                    if let Some(inner) = weak.upgrade() {
                        if let Err(err) = inner.on_member_recv(key) {
                            tracing::debug!(unit = %inner.label, error = %err, "atomic commit discarded");
                        }
                    }
                }),
            );
        }

        Self { inner }
    }

    /// Atomic groups are always event-driven, never cyclic: a `Ticker`
    /// policy on an atomic group is rejected at build time.
    pub fn is_cyclic(&self) -> bool {
        false
    }

    pub fn cyclic_trigger(&self) {}
}

impl AtomicGroupInner {
    fn on_member_recv(&self, key: &ResolvedPduKey) -> Result<(), TransferError> {
        if !self.active.load(Ordering::Relaxed) {
            return Ok(());
        }

        self.policy.on_recv(key);

        let now_us = self.time_source.now_us();
        if !self.policy.should_transfer(key, now_us) {
            return Ok(());
        }

        let mut payloads: Vec<Vec<u8>> = Vec::with_capacity(self.members.len());
        for member in &self.members {
            payloads.push(recv_payload(&member.source, &member.source_key)?);
        }

        if self.epoch_validation {
            let current = self.epoch.load(Ordering::Relaxed);
            if let Some(mismatch) = payloads.iter().find_map(|p| {
                let header = p.first().copied().unwrap_or(0);
                (header != current).then_some(header)
            }) {
                // Any member captured under a stale epoch aborts the
                // whole commit; no partial sends (spec §4.3.2, open
                // question 1: abort-all rather than drop-one).
                self.policy.on_transferred(key, now_us);
                counter!("bridge.atomic_groups.discarded_epoch_mismatch").increment(1);
                return Err(TransferError::EpochMismatch {
                    captured: mismatch,
                    current,
                });
            }
        }

        // Membership order: every member's destinations are written in
        // the order members were declared in the group before any of
        // its siblings are touched, so a downstream atomic group built
        // over the same robots sees the frame assembled in the same
        // relative order it was produced.
        let mut touched: Vec<&Arc<dyn Endpoint>> = Vec::new();
        for (member, payload, buffer) in zip3(&self.members, &payloads, &self.buffers) {
            let mut buf = buffer.lock();
            *buf = payload.clone();
            for (dest, dest_key) in &member.destinations {
                if !dest.send(dest_key, &buf) {
                    counter!("bridge.atomic_groups.send_failed").increment(1);
                    return Err(TransferError::SendFailed(dest_key.clone()));
                }
                if !touched.iter().any(|d| Arc::ptr_eq(d, dest)) {
                    touched.push(dest);
                }
            }
        }

        // Pulse every destination once the whole frame has landed so
        // downstream listeners observe it as a unit rather than member
        // by member.
        for dest in touched {
            dest.process_recv_events();
        }

        self.policy.on_transferred(key, now_us);
        counter!("bridge.atomic_groups.committed").increment(1);
        Ok(())
    }
}

fn zip3<'a>(
    members: &'a [AtomicMember],
    payloads: &'a [Vec<u8>],
    buffers: &'a [Mutex<Vec<u8>>],
) -> impl Iterator<Item = (&'a AtomicMember, &'a Vec<u8>, &'a Mutex<Vec<u8>>)> {
    members.iter().zip(payloads.iter()).zip(buffers.iter()).map(|((m, p), b)| (m, p, b))
}

fn recv_payload(source: &Arc<dyn Endpoint>, key: &ResolvedPduKey) -> Result<Vec<u8>, TransferError> {
    let size = source.size_of(key);
    if size == 0 {
        counter!("bridge.transfers.size_zero").increment(1);
        return Err(TransferError::SizeZero(key.clone()));
    }
    let mut buf = vec![0u8; size];
    match source.recv(key, &mut buf) {
        RecvStatus::Ok { len } if len == size => Ok(buf),
        _ => {
            counter!("bridge.transfers.recv_failed").increment(1);
            Err(TransferError::RecvFailed(key.clone()))
        }
    }
}

/// Dispatches to whichever concrete unit kind a connection built for a
/// given route. Kept as a tagged enum for the same reason as
/// [`TransferPolicy`]: a small closed set of kinds, no downcasting.
pub enum TransferUnit {
    Single(SingleTransfer),
    Group(AtomicGroup),
}

impl TransferUnit {
    pub fn is_cyclic(&self) -> bool {
        match self {
            TransferUnit::Single(u) => u.is_cyclic(),
            TransferUnit::Group(u) => u.is_cyclic(),
        }
    }

    pub fn cyclic_trigger(&self) {
        match self {
            TransferUnit::Single(u) => u.cyclic_trigger(),
            TransferUnit::Group(u) => u.cyclic_trigger(),
        }
    }
}
