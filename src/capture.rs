//! Edge-triggered capture detection.
//!
//! A token is "captured" while it sits inside an opponent's base. Scoring only reacts to
//! the moment the token enters, so the detector compares the previous status vector with
//! the current one and emits one [`CaptureEvent`] per changed index.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::error::CtfError;
use crate::telemetry::{InvariantChecker, InvariantViolation};
use crate::MAX_TOKENS;

/// Per-token "inside the opponent's base" flags, in token order.
pub type CaptureStatusVector = SmallVec<[bool; MAX_TOKENS]>;

/// Direction of a status transition.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CaptureDirection {
    /// The token moved into the base (false → true).
    Entered,
    /// The token moved out of the base (true → false).
    Left,
}

/// A single status transition of one token.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CaptureEvent {
    /// Index of the token.
    pub token: usize,
    /// Which way the token moved.
    pub direction: CaptureDirection,
}

/// Emits one event per index whose value differs between `previous` and `current`.
///
/// Returns [`CtfError::TokenCountMismatch`] if the two vectors differ in length.
///
/// ```
/// use flagline::{detect, CaptureDirection, CaptureStatusVector};
///
/// let previous: CaptureStatusVector = [false, true].into_iter().collect();
/// let current: CaptureStatusVector = [true, true].into_iter().collect();
/// let events = detect(&previous, &current).unwrap();
/// assert_eq!(events.len(), 1);
/// assert_eq!(events[0].token, 0);
/// assert_eq!(events[0].direction, CaptureDirection::Entered);
/// ```
pub fn detect(previous: &[bool], current: &[bool]) -> Result<Vec<CaptureEvent>, CtfError> {
    if previous.len() != current.len() {
        return Err(CtfError::TokenCountMismatch {
            expected: previous.len(),
            actual: current.len(),
        });
    }
    Ok(previous
        .iter()
        .zip(current)
        .enumerate()
        .filter_map(|(token, (&before, &after))| match (before, after) {
            (false, true) => Some(CaptureEvent {
                token,
                direction: CaptureDirection::Entered,
            }),
            (true, false) => Some(CaptureEvent {
                token,
                direction: CaptureDirection::Left,
            }),
            _ => None,
        })
        .collect())
}

/// Owns the previous status vector for one (capturer, owner) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureTracker {
    previous: CaptureStatusVector,
}

impl CaptureTracker {
    /// Creates a tracker for `token_count` tokens, all outside the base.
    #[must_use]
    pub fn new(token_count: usize) -> Self {
        Self {
            previous: SmallVec::from_elem(false, token_count),
        }
    }

    /// Number of tokens tracked.
    #[must_use]
    pub fn token_count(&self) -> usize {
        self.previous.len()
    }

    /// The status vector adopted on the last successful [`observe`](Self::observe).
    #[must_use]
    pub fn previous(&self) -> &[bool] {
        &self.previous
    }

    /// Compares `current` with the stored vector, then adopts `current`.
    ///
    /// On a length mismatch nothing is adopted.
    pub fn observe(&mut self, current: &[bool]) -> Result<Vec<CaptureEvent>, CtfError> {
        let events = detect(&self.previous, current)?;
        self.previous.clear();
        self.previous.extend_from_slice(current);
        Ok(events)
    }

    /// Clears every flag to `false`. Used after a reset cycle.
    pub fn clear(&mut self) {
        self.previous.iter_mut().for_each(|flag| *flag = false);
    }
}

impl InvariantChecker for CaptureTracker {
    fn check_invariants(&self) -> Result<(), InvariantViolation> {
        if self.previous.len() > MAX_TOKENS {
            return Err(
                InvariantViolation::new("CaptureTracker", "tracks more than MAX_TOKENS tokens")
                    .with_details(format!("len={}", self.previous.len())),
            );
        }
        Ok(())
    }
}
