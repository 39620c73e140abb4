//! Run-wide counters and flags.
//!
//! [`PipelineState`] is owned by one orchestrator run. The scaling loop is
//! the only writer of the counters; progress reporting reads snapshots.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;

use super::cancel::CancelFlag;

/// Orchestrator lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Scaling,
    DrainingOptimization,
    Cancelling,
    Done,
}

impl Phase {
    fn as_u8(self) -> u8 {
        match self {
            Phase::Idle => 0,
            Phase::Scaling => 1,
            Phase::DrainingOptimization => 2,
            Phase::Cancelling => 3,
            Phase::Done => 4,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => Phase::Scaling,
            2 => Phase::DrainingOptimization,
            3 => Phase::Cancelling,
            4 => Phase::Done,
            _ => Phase::Idle,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Idle => write!(f, "idle"),
            Phase::Scaling => write!(f, "scaling"),
            Phase::DrainingOptimization => write!(f, "draining_optimization"),
            Phase::Cancelling => write!(f, "cancelling"),
            Phase::Done => write!(f, "done"),
        }
    }
}

#[derive(Debug, Default)]
struct StateInner {
    total: AtomicUsize,
    scaled: AtomicUsize,
    skipped: AtomicUsize,
    scaling_finished: AtomicBool,
    phase: AtomicU8,
}

/// Counters and flags for one run. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct PipelineState {
    inner: Arc<StateInner>,
    cancel: CancelFlag,
}

/// Point-in-time copy of [`PipelineState`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateSnapshot {
    pub phase: Phase,
    pub total: usize,
    pub scaled: usize,
    pub skipped: usize,
    pub scaling_finished: bool,
    pub cancel_requested: bool,
}

impl StateSnapshot {
    /// Scaling completion as a percentage with one decimal place.
    pub fn scaling_percentage(&self) -> String {
        format_percentage(self.scaled, self.total)
    }
}

impl PipelineState {
    pub fn new() -> Self {
        Self::default()
    }

    /// State whose cancellation flag is `cancel`.
    pub fn with_cancel_flag(cancel: CancelFlag) -> Self {
        Self {
            inner: Arc::default(),
            cancel,
        }
    }

    /// Records the classified list size. Only the first call has an effect.
    pub fn set_total(&self, total: usize) -> bool {
        self.inner
            .total
            .compare_exchange(0, total, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Counts one processed image. Never exceeds the total.
    pub fn record_scaled(&self) -> bool {
        let total = self.total();
        self.inner
            .scaled
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < total).then_some(n + 1)
            })
            .is_ok()
    }

    /// Counts one image whose input vanished before processing.
    pub fn record_skipped(&self) {
        self.inner.skipped.fetch_add(1, Ordering::SeqCst);
    }

    pub fn mark_scaling_finished(&self) {
        self.inner.scaling_finished.store(true, Ordering::SeqCst);
    }

    pub fn set_phase(&self, phase: Phase) {
        self.inner.phase.store(phase.as_u8(), Ordering::SeqCst);
    }

    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.inner.phase.load(Ordering::SeqCst))
    }

    pub fn total(&self) -> usize {
        self.inner.total.load(Ordering::SeqCst)
    }

    pub fn scaled(&self) -> usize {
        self.inner.scaled.load(Ordering::SeqCst)
    }

    pub fn skipped(&self) -> usize {
        self.inner.skipped.load(Ordering::SeqCst)
    }

    pub fn is_scaling_finished(&self) -> bool {
        self.inner.scaling_finished.load(Ordering::SeqCst)
    }

    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.is_requested()
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            phase: self.phase(),
            total: self.total(),
            scaled: self.scaled(),
            skipped: self.skipped(),
            scaling_finished: self.is_scaling_finished(),
            cancel_requested: self.is_cancel_requested(),
        }
    }
}

/// `done / total` as a percentage with one decimal place; "0.0" when total is 0.
pub fn format_percentage(done: usize, total: usize) -> String {
    if total == 0 {
        return "0.0".to_string();
    }
    format!("{:.1}", done as f64 / total as f64 * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_is_set_once() {
        let state = PipelineState::new();
        assert!(state.set_total(3));
        assert!(!state.set_total(10));
        assert_eq!(state.total(), 3);
    }

    #[test]
    fn test_scaled_never_exceeds_total() {
        let state = PipelineState::new();
        state.set_total(2);

        assert!(state.record_scaled());
        assert!(state.record_scaled());
        assert!(!state.record_scaled());
        assert_eq!(state.scaled(), 2);
    }

    #[test]
    fn test_percentage_formatting() {
        assert_eq!(format_percentage(0, 0), "0.0");
        assert_eq!(format_percentage(1, 3), "33.3");
        assert_eq!(format_percentage(2, 3), "66.7");
        assert_eq!(format_percentage(3, 3), "100.0");
    }

    #[test]
    fn test_snapshot_reflects_clones() {
        let state = PipelineState::new();
        let reader = state.clone();

        state.set_total(4);
        state.set_phase(Phase::Scaling);
        state.record_scaled();
        state.record_skipped();
        state.cancel_flag().request();

        let snap = reader.snapshot();
        assert_eq!(snap.phase, Phase::Scaling);
        assert_eq!(snap.total, 4);
        assert_eq!(snap.scaled, 1);
        assert_eq!(snap.skipped, 1);
        assert!(snap.cancel_requested);
        assert!(!snap.scaling_finished);
        assert_eq!(snap.scaling_percentage(), "25.0");
    }

    #[test]
    fn test_phase_round_trip() {
        let state = PipelineState::new();
        assert_eq!(state.phase(), Phase::Idle);
        for phase in [
            Phase::Scaling,
            Phase::DrainingOptimization,
            Phase::Cancelling,
            Phase::Done,
        ] {
            state.set_phase(phase);
            assert_eq!(state.phase(), phase);
        }
    }

    #[test]
    fn test_shared_cancel_flag() {
        let flag = CancelFlag::new();
        let state = PipelineState::with_cancel_flag(flag.clone());
        assert!(!state.is_cancel_requested());
        flag.request();
        assert!(state.is_cancel_requested());
    }
}
