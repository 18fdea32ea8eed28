//! `WriteGate` — a single atomic boolean tracking local write eligibility.
//!
//! Deliberately just an `AtomicBool` rather than a richer state enum — the
//! gate only ever needs two states, and a boolean keeps the allow/deny path
//! lock-free on the HTTP hot path.
//!
//! The gate is an optimisation and a UX improvement, not a correctness gate:
//! `ConsensusNode::propose`'s not-leader error is the authoritative signal.

use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Default)]
pub struct WriteGate {
    allowed: AtomicBool,
}

impl WriteGate {
    pub fn new() -> Self {
        Self {
            allowed: AtomicBool::new(false),
        }
    }

    pub fn allow_writes(&self) {
        self.allowed.store(true, Ordering::SeqCst);
    }

    pub fn deny_writes(&self) {
        self.allowed.store(false, Ordering::SeqCst);
    }

    pub fn writes_allowed(&self) -> bool {
        self.allowed.load(Ordering::SeqCst)
    }
}
