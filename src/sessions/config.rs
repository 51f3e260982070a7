//! Configuration types for game sessions.
//!
//! | Config Type | Purpose | Key Presets |
//! |-------------|---------|-------------|
//! | `GameConfig` | Token count, winning score, base geometry | `default()` |
//! | `TimerConfig` | Setup and reset grace windows | `tabletop()`, `immediate()` |
//!
//! # Example
//!
//! ```
//! use flagline::{GameConfig, SessionBuilder, TimerConfig};
//!
//! let builder = SessionBuilder::new()
//!     .with_game_config(GameConfig {
//!         token_count: 2,
//!         target_score: 4,
//!         ..GameConfig::default()
//!     })?
//!     .with_timer_config(TimerConfig::immediate());
//! # Ok::<(), flagline::CtfError>(())
//! ```

use serde::{Deserialize, Serialize};
use web_time::Duration;

use crate::error::CtfError;
use crate::geometry::Axes;
use crate::{DEFAULT_BOUNDARY_EXTENT, MAX_TOKENS};

/// Rules of one game.
///
/// The authority sends `token_count` to the participant, which adopts it. Both sides must be
/// configured with the same `target_score`, `boundary_extent` and `axes`.
///
/// # Forward Compatibility
///
/// New fields may be added to this struct in future versions. Always use the
/// `..GameConfig::default()` pattern when constructing instances.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[must_use = "GameConfig has no effect unless passed to SessionBuilder::with_game_config()"]
pub struct GameConfig {
    /// Tokens per side, `0..=MAX_TOKENS`.
    ///
    /// Default: 3
    pub token_count: usize,
    /// Score needed to win. Must be at least 1.
    ///
    /// Default: 3
    pub target_score: u32,
    /// Edge length of every base.
    ///
    /// Default: [`DEFAULT_BOUNDARY_EXTENT`]
    pub boundary_extent: f64,
    /// Axes used by the containment test.
    ///
    /// Default: [`Axes::XY`]
    pub axes: Axes,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            token_count: MAX_TOKENS,
            target_score: 3,
            boundary_extent: DEFAULT_BOUNDARY_EXTENT,
            axes: Axes::XY,
        }
    }
}

impl GameConfig {
    /// Creates a new `GameConfig` with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks every field.
    ///
    /// # Errors
    ///
    /// Returns [`CtfError::InvalidConfig`] naming the first offending field.
    pub fn validate(&self) -> Result<(), CtfError> {
        validate_token_count(self.token_count)?;
        validate_target_score(self.target_score)?;
        if !self.boundary_extent.is_finite() || self.boundary_extent <= 0.0 {
            return Err(CtfError::InvalidConfig {
                info: format!(
                    "boundary_extent must be finite and positive, got {}",
                    self.boundary_extent
                ),
            });
        }
        Ok(())
    }
}

pub(crate) fn validate_token_count(token_count: usize) -> Result<(), CtfError> {
    if token_count > MAX_TOKENS {
        return Err(CtfError::InvalidConfig {
            info: format!("token_count must be between 0 and {MAX_TOKENS}, got {token_count}"),
        });
    }
    Ok(())
}

pub(crate) fn validate_target_score(target_score: u32) -> Result<(), CtfError> {
    if target_score == 0 {
        return Err(CtfError::InvalidConfig {
            info: "target_score must be at least 1, since a target of 0 is reached before \
                   play starts and every game would end at once"
                .to_string(),
        });
    }
    Ok(())
}

/// Grace windows that replace the blocking sleeps of a tabletop game.
///
/// Both windows are measured against the `now` passed to
/// [`GameSession::tick`](crate::GameSession::tick).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[must_use = "TimerConfig has no effect unless passed to SessionBuilder::with_timer_config()"]
pub struct TimerConfig {
    /// Time after `Start` for players to place their tokens before play begins.
    ///
    /// Default: 10s
    pub setup_grace: Duration,
    /// Time a side stays frozen to re-hide its tokens after they were all captured.
    ///
    /// Default: 15s
    pub reset_grace: Duration,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self::tabletop()
    }
}

impl TimerConfig {
    /// Creates a new `TimerConfig` with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Human-paced windows for a physical table.
    pub const fn tabletop() -> Self {
        Self {
            setup_grace: Duration::from_secs(10),
            reset_grace: Duration::from_secs(15),
        }
    }

    /// No grace at all. Setup completes on the tick `Start` is sent or received and resets
    /// expire on the next tick. Useful for simulations.
    pub const fn immediate() -> Self {
        Self {
            setup_grace: Duration::ZERO,
            reset_grace: Duration::ZERO,
        }
    }
}
