//! Per-run control shared between a running optimization and its caller.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tracing::debug;

/// Lifecycle of a single optimization run.
///
/// `Validating → Constructing → Improving → Done`, or `Validating → Failed`
/// when the feasibility gate rejects the input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum RunPhase {
    #[default]
    Validating,
    Constructing,
    Improving,
    Done,
    Failed,
}

impl RunPhase {
    pub const fn is_terminal(self) -> bool {
        matches!(self, RunPhase::Done | RunPhase::Failed)
    }

    const fn can_advance_to(self, next: RunPhase) -> bool {
        matches!(
            (self, next),
            (RunPhase::Validating, RunPhase::Constructing)
                | (RunPhase::Validating, RunPhase::Failed)
                | (RunPhase::Constructing, RunPhase::Improving)
                | (RunPhase::Constructing, RunPhase::Done)
                | (RunPhase::Improving, RunPhase::Done)
        )
    }
}

/// Cancellation flag and phase cell for one run. Cheap to clone; clones
/// observe the same run.
#[derive(Clone, Default)]
pub struct RunControl {
    cancelled: Arc<AtomicBool>,
    phase: Arc<Mutex<RunPhase>>,
}

impl fmt::Debug for RunControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunControl")
            .field("cancelled", &self.is_cancelled())
            .field("phase", &self.phase())
            .finish()
    }
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the run to stop at its next checkpoint.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn phase(&self) -> RunPhase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move to `next`. Illegal transitions are ignored.
    pub(crate) fn enter(&self, next: RunPhase) {
        let mut phase = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
        if phase.can_advance_to(next) {
            debug!(from = ?*phase, to = ?next, "run phase");
            *phase = next;
        }
    }
}
