//! Partial-update merging for the streaming path
//!
//! The controller's WebSocket stream interleaves frequent small diffs
//! (single-field power changes) with occasional full state dumps. Folding
//! every diff straight into the snapshot would cause excessive downstream
//! device writes; waiting for full dumps alone would starve consumers.
//!
//! This buffer accumulates sparse fragments and decides when the running
//! snapshot is worth (re-)emitting: complete-looking fragments replace the
//! base wholesale under a throttle, partials coalesce for a short dwell and
//! then fold additively. REST poll responses do not take this path: they
//! are authoritative full snapshots and go through [`accept_snapshot`],
//! which replaces the base outright with no throttle.
//!
//! [`accept_snapshot`]: PartialUpdateBuffer::accept_snapshot
//!
//! The base snapshot is replaced by copy-then-swap, never mutated in place,
//! so a failed merge can never corrupt the committed state.

use crate::state::CanonicalState;
use std::time::{Duration, Instant};

/// Per-connection accumulator for stream fragments.
///
/// Must be reset on reconnect: field semantics may have shifted between
/// connections (e.g. a vehicle was removed), so a stale base must never be
/// merged with fragments from a new connection.
#[derive(Debug)]
pub struct PartialUpdateBuffer {
    /// Last committed snapshot for this connection
    base: Option<CanonicalState>,
    /// Sparse accumulation window; later values for a key overwrite earlier
    /// ones until the window folds
    pending: Option<CanonicalState>,
    /// When the last complete fragment was accepted
    last_complete_accept: Option<Instant>,
    /// When the pending window was last folded into the base
    last_fold: Option<Instant>,
    /// Whether a complete-looking payload has been seen since connect
    received_complete: bool,
    /// Minimum interval between accepted complete snapshots
    complete_throttle: Duration,
    /// Minimum dwell before folding accumulated partials
    partial_fold_after: Duration,
}

impl Default for PartialUpdateBuffer {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(1))
    }
}

impl PartialUpdateBuffer {
    pub fn new(complete_throttle: Duration, partial_fold_after: Duration) -> Self {
        Self {
            base: None,
            pending: None,
            last_complete_accept: None,
            last_fold: None,
            received_complete: false,
            complete_throttle,
            partial_fold_after,
        }
    }

    /// Whether a complete payload has been accepted since the last connect
    pub fn received_complete(&self) -> bool {
        self.received_complete
    }

    /// Current committed snapshot, if any
    pub fn base(&self) -> Option<&CanonicalState> {
        self.base.as_ref()
    }

    /// Drop all per-connection state. Called on reconnect so nothing bleeds
    /// across into the new connection's first authoritative state.
    pub fn reset(&mut self) {
        self.base = None;
        self.pending = None;
        self.last_complete_accept = None;
        self.last_fold = None;
        self.received_complete = false;
    }

    /// Fold an incoming fragment and decide whether to emit a snapshot.
    ///
    /// Complete fragments (hallmark rule) replace the base wholesale, clear
    /// any pending accumulation and emit, subject to the complete-throttle
    /// interval. The throttle is bypassed until the first complete update of
    /// a connection has been accepted.
    ///
    /// Partial fragments accumulate; the accumulator folds into the base
    /// (and emits) once the fold dwell has elapsed and a base exists. A
    /// partial arriving before any base is retained as a tentative base so
    /// callers get partial visibility before the first full sync.
    pub fn merge(&mut self, fragment: CanonicalState, now: Instant) -> Option<CanonicalState> {
        if fragment.looks_complete() {
            let throttled = self.received_complete
                && self
                    .last_complete_accept
                    .is_some_and(|t| now.duration_since(t) < self.complete_throttle);
            if throttled {
                // Too soon after the last accepted dump; keep it as pending
                // data so nothing is lost.
                self.accumulate(fragment);
                return self.try_fold(now);
            }

            self.pending = None;
            self.base = Some(fragment);
            self.received_complete = true;
            self.last_complete_accept = Some(now);
            self.last_fold = Some(now);
            return self.base.clone();
        }

        if self.base.is_none() {
            // Tentative base: partial visibility before the first full sync.
            let mut tentative = self.pending.take().unwrap_or_default();
            tentative.merge_from(&fragment);
            self.base = Some(tentative);
            self.last_fold = Some(now);
            return self.base.clone();
        }

        self.accumulate(fragment);
        self.try_fold(now)
    }

    /// Accept an authoritative full snapshot, replacing the base outright.
    ///
    /// Poll responses are complete by construction, so they skip the stream
    /// throttle and any pending accumulation: a field the snapshot no
    /// longer carries must not survive from an earlier stream frame.
    pub fn accept_snapshot(&mut self, snapshot: CanonicalState, now: Instant) -> CanonicalState {
        self.pending = None;
        self.base = Some(snapshot.clone());
        self.received_complete = true;
        self.last_complete_accept = Some(now);
        self.last_fold = Some(now);
        snapshot
    }

    fn accumulate(&mut self, fragment: CanonicalState) {
        match &mut self.pending {
            Some(pending) => pending.merge_from(&fragment),
            None => self.pending = Some(fragment),
        }
    }

    fn try_fold(&mut self, now: Instant) -> Option<CanonicalState> {
        let due = self
            .last_fold
            .is_none_or(|t| now.duration_since(t) >= self.partial_fold_after);
        if !due || self.pending.is_none() || self.base.is_none() {
            return None;
        }

        // Copy-then-swap: build the merged snapshot aside, then replace.
        let pending = self.pending.take()?;
        let mut next = self.base.clone()?;
        next.merge_from(&pending);
        self.base = Some(next);
        self.last_fold = Some(now);
        self.base.clone()
    }
}
