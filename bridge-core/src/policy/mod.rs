//! Transfer policies: the per-route gating logic deciding when a PDU (or
//! an atomic group of PDUs) actually gets forwarded.
//!
//! [`TransferPolicyDef`] is the config-level shape parsed out of
//! `transferPolicies` in a bridge config. [`TransferPolicy`] is the
//! runtime counterpart the builder instantiates one-per-connection-use
//! from a `TransferPolicyDef`; it carries whatever mutable state the
//! policy needs (gating interval, atomic-group recv bookkeeping) behind
//! interior mutability, since a single coordinating thread may touch it
//! from both the push (`process_recv_events`) and pull (`cyclic_trigger`)
//! paths depending on which policy kind it is.
//!
//! Modelled as one tagged enum rather than a `dyn Trait`, matching the
//! rest of this crate: there is a small, closed set of policy kinds and
//! no caller ever needs to downcast one back to a concrete type.

use crate::pdu::ResolvedPduKey;
use dashmap::DashMap;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Config-level policy definition, parsed straight out of a bridge
/// config's `transferPolicies` map.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransferPolicyDef {
    /// Transfers on every recv event. `atomic: true` additionally
    /// requires every member of the owning group to have received
    /// since the last commit before any member is forwarded.
    Immediate {
        #[serde(default)]
        atomic: bool,
    },
    /// Transfers on the first recv event, then at most once per
    /// `intervalMs` after that. Stored in the config as milliseconds,
    /// matching the upstream JSON schema; the runtime policy converts to
    /// microseconds once at build time.
    Throttle {
        #[serde(rename = "intervalMs")]
        interval_ms: u64,
    },
    /// Transfers on a fixed `intervalMs` cadence, driven by the cyclic
    /// loop rather than recv events. The first cyclic tick primes the
    /// schedule without transferring.
    Ticker {
        #[serde(rename = "intervalMs")]
        interval_ms: u64,
    },
}

impl TransferPolicyDef {
    pub fn is_atomic(&self) -> bool {
        matches!(self, TransferPolicyDef::Immediate { atomic: true })
    }

    pub fn is_cyclic(&self) -> bool {
        matches!(self, TransferPolicyDef::Ticker { .. })
    }

    /// `intervalMs`, converted to microseconds; `None` for `Immediate`.
    pub fn interval_us(&self) -> Option<u64> {
        match self {
            TransferPolicyDef::Throttle { interval_ms } | TransferPolicyDef::Ticker { interval_ms } => {
                Some(*interval_ms * 1_000)
            }
            TransferPolicyDef::Immediate { .. } => None,
        }
    }
}

/// Bookkeeping for an atomic immediate policy: which group members have
/// received data since the last commit.
pub struct AtomicGroupState {
    recv_states: DashMap<ResolvedPduKey, bool>,
}

impl AtomicGroupState {
    fn new() -> Self {
        Self {
            recv_states: DashMap::new(),
        }
    }
}

pub struct ThrottleState {
    interval_us: u64,
    has_transferred: AtomicBool,
    last_transfer_us: AtomicU64,
}

pub struct TickerState {
    interval_us: u64,
    initialized: AtomicBool,
    next_tick_us: AtomicU64,
}

/// A live, stateful policy instance. Every connection that references a
/// given `policy_id` gets its own instance (see the builder), so two
/// connections sharing a throttle/ticker policy id never corrupt each
/// other's timing.
pub enum TransferPolicy {
    ImmediateSingle,
    ImmediateAtomic(AtomicGroupState),
    Throttle(ThrottleState),
    Ticker(TickerState),
}

impl TransferPolicy {
    pub fn from_def(def: &TransferPolicyDef) -> Self {
        match def {
            TransferPolicyDef::Immediate { atomic: false } => TransferPolicy::ImmediateSingle,
            TransferPolicyDef::Immediate { atomic: true } => {
                TransferPolicy::ImmediateAtomic(AtomicGroupState::new())
            }
            TransferPolicyDef::Throttle { .. } => TransferPolicy::Throttle(ThrottleState {
                interval_us: def.interval_us().expect("throttle always carries an interval"),
                has_transferred: AtomicBool::new(false),
                last_transfer_us: AtomicU64::new(0),
            }),
            TransferPolicyDef::Ticker { .. } => TransferPolicy::Ticker(TickerState {
                interval_us: def.interval_us().expect("ticker always carries an interval"),
                initialized: AtomicBool::new(false),
                next_tick_us: AtomicU64::new(0),
            }),
        }
    }

    pub fn is_cyclic(&self) -> bool {
        matches!(self, TransferPolicy::Ticker(_))
    }

    pub fn is_atomic(&self) -> bool {
        matches!(self, TransferPolicy::ImmediateAtomic(_))
    }

    /// Register a group member key. Only meaningful for
    /// `ImmediateAtomic`; a no-op on every other variant.
    pub fn add_pdu_key(&self, key: ResolvedPduKey) {
        if let TransferPolicy::ImmediateAtomic(state) = self {
            state.recv_states.insert(key, false);
        }
    }

    /// Record that `key` received data. Only meaningful for
    /// `ImmediateAtomic`; a no-op on every other variant.
    pub fn on_recv(&self, key: &ResolvedPduKey) {
        if let TransferPolicy::ImmediateAtomic(state) = self {
            if let Some(mut entry) = state.recv_states.get_mut(key) {
                *entry = true;
            }
        }
    }

    /// Whether a transfer should happen now. For `ImmediateAtomic`,
    /// `key` is ignored: the decision is "have all group members
    /// received since the last commit". For `Ticker`, calling this
    /// advances the internal schedule as a side effect, matching the
    /// upstream priming behaviour (the first call never transfers).
    pub fn should_transfer(&self, _key: &ResolvedPduKey, now_us: u64) -> bool {
        match self {
            TransferPolicy::ImmediateSingle => true,
            TransferPolicy::ImmediateAtomic(state) => {
                !state.recv_states.is_empty() && state.recv_states.iter().all(|entry| *entry.value())
            }
            TransferPolicy::Throttle(state) => {
                if !state.has_transferred.load(Ordering::Relaxed) {
                    true
                } else {
                    let last = state.last_transfer_us.load(Ordering::Relaxed);
                    now_us.saturating_sub(last) >= state.interval_us
                }
            }
            TransferPolicy::Ticker(state) => {
                if !state.initialized.swap(true, Ordering::Relaxed) {
                    state.next_tick_us.store(now_us + state.interval_us, Ordering::Relaxed);
                    return false;
                }
                let next = state.next_tick_us.load(Ordering::Relaxed);
                if now_us >= next {
                    state.next_tick_us.store(now_us + state.interval_us, Ordering::Relaxed);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record that a transfer just committed at `now_us`.
    pub fn on_transferred(&self, _key: &ResolvedPduKey, now_us: u64) {
        match self {
            TransferPolicy::ImmediateSingle => {}
            TransferPolicy::ImmediateAtomic(state) => {
                for mut entry in state.recv_states.iter_mut() {
                    *entry.value_mut() = false;
                }
            }
            TransferPolicy::Throttle(state) => {
                state.has_transferred.store(true, Ordering::Relaxed);
                state.last_transfer_us.store(now_us, Ordering::Relaxed);
            }
            TransferPolicy::Ticker(_) => {}
        }
    }
}
