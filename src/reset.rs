//! Timed freeze/resume cycle for one side.
//!
//! When every token of a side has been captured, that side must re-hide its tokens. Its
//! capture detection is suppressed for a grace window; when the window elapses the side's
//! status vectors are cleared and play resumes. Who decides a reset and how it is announced
//! lives in the session; this module only tracks the timer.

use web_time::{Duration, Instant};

/// Where a side is in its reset cycle.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ResetPhase {
    /// Normal play.
    Active,
    /// Capture detection for this side's tokens is suppressed until `until`.
    Frozen {
        /// The instant at which the side resumes.
        until: Instant,
    },
}

/// Tracks the [`ResetPhase`] of a single side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetCoordinator {
    phase: ResetPhase,
    cycles: u32,
}

impl Default for ResetCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ResetCoordinator {
    /// Creates a coordinator in [`ResetPhase::Active`].
    #[must_use]
    pub const fn new() -> Self {
        Self {
            phase: ResetPhase::Active,
            cycles: 0,
        }
    }

    /// Returns `true` if a capturer's new score calls for a reset of the owner side.
    ///
    /// The score must have changed this tick and be a positive multiple of the token count.
    /// A token count of zero never triggers.
    ///
    /// ```
    /// use flagline::ResetCoordinator;
    ///
    /// assert!(ResetCoordinator::should_trigger(true, 4, 2));
    /// assert!(!ResetCoordinator::should_trigger(false, 4, 2));
    /// assert!(!ResetCoordinator::should_trigger(true, 3, 2));
    /// assert!(!ResetCoordinator::should_trigger(true, 0, 0));
    /// ```
    #[must_use]
    pub fn should_trigger(score_changed: bool, score: u32, token_count: usize) -> bool {
        score_changed && token_count > 0 && score > 0 && score as usize % token_count == 0
    }

    /// Freezes the side until `now + grace`.
    ///
    /// Returns `false` and leaves the window untouched if the side is already frozen.
    pub fn freeze(&mut self, now: Instant, grace: Duration) -> bool {
        if self.is_frozen() {
            return false;
        }
        self.phase = ResetPhase::Frozen { until: now + grace };
        self.cycles += 1;
        true
    }

    /// Resumes the side if its window has elapsed at `now`. Returns `true` on the transition.
    pub fn poll_expired(&mut self, now: Instant) -> bool {
        match self.phase {
            ResetPhase::Frozen { until } if now >= until => {
                self.phase = ResetPhase::Active;
                true
            }
            _ => false,
        }
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> ResetPhase {
        self.phase
    }

    /// `true` while frozen.
    #[must_use]
    pub const fn is_frozen(&self) -> bool {
        matches!(self.phase, ResetPhase::Frozen { .. })
    }

    /// Number of freezes started so far.
    #[must_use]
    pub const fn cycles(&self) -> u32 {
        self.cycles
    }
}
