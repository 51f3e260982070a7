//! Cumulative, never-double-counting score bookkeeping.

use serde::{Deserialize, Serialize};

use crate::capture::{CaptureDirection, CaptureEvent};
use crate::telemetry::{InvariantChecker, InvariantViolation};

/// A side's score and the score it needs to win.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ScoreState {
    /// Points earned so far. Never exceeds `target_score`.
    pub own_score: u32,
    /// Points needed to win.
    pub target_score: u32,
}

/// Applies capture events to a [`ScoreState`].
///
/// Each [`CaptureDirection::Entered`] adds one point. [`CaptureDirection::Left`] is only
/// counted. Once the score reaches the target further entries are ignored, so the win
/// check `own_score == target_score` cannot be stepped over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreLedger {
    state: ScoreState,
    releases: u64,
    ignored: u64,
}

impl ScoreLedger {
    /// Creates a ledger at zero points.
    #[must_use]
    pub fn new(target_score: u32) -> Self {
        Self {
            state: ScoreState {
                own_score: 0,
                target_score,
            },
            releases: 0,
            ignored: 0,
        }
    }

    /// Applies `events` in order and returns the resulting state.
    pub fn apply(&mut self, events: &[CaptureEvent]) -> ScoreState {
        for event in events {
            match event.direction {
                CaptureDirection::Entered if self.state.own_score < self.state.target_score => {
                    self.state.own_score += 1;
                }
                CaptureDirection::Entered => self.ignored += 1,
                CaptureDirection::Left => self.releases += 1,
            }
        }
        self.state
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> ScoreState {
        self.state
    }

    /// Current score.
    #[must_use]
    pub const fn score(&self) -> u32 {
        self.state.own_score
    }

    /// `true` once the score equals the target.
    #[must_use]
    pub const fn is_won(&self) -> bool {
        self.state.own_score == self.state.target_score
    }

    /// Number of `Left` transitions seen.
    #[must_use]
    pub const fn releases(&self) -> u64 {
        self.releases
    }

    /// Number of `Entered` transitions that arrived after the target was reached.
    #[must_use]
    pub const fn ignored(&self) -> u64 {
        self.ignored
    }
}

impl InvariantChecker for ScoreLedger {
    fn check_invariants(&self) -> Result<(), InvariantViolation> {
        if self.state.own_score > self.state.target_score {
            return Err(
                InvariantViolation::new("ScoreLedger", "score exceeds target").with_details(
                    format!(
                        "own_score={}, target_score={}",
                        self.state.own_score, self.state.target_score
                    ),
                ),
            );
        }
        Ok(())
    }
}
