//! Side registry for tracking every side's base, tokens, score and reset phase.
//!
//! Two-sided and three-sided games differ only in the number of entries in this registry.

use std::collections::BTreeMap;

use crate::error::CtfError;
use crate::geometry::{Boundary, TokenPositions};
use crate::reset::ResetCoordinator;
use crate::score::ScoreLedger;
use crate::telemetry::{InvariantChecker, InvariantViolation};
use crate::SideId;

/// Everything known about one side.
#[derive(Debug, Clone)]
pub struct SideState {
    /// The side's base. `None` until its `Origin` is known.
    pub boundary: Option<Boundary>,
    /// Latest token positions. `None` until the first `Coordinates` arrive.
    pub positions: Option<TokenPositions>,
    /// Score bookkeeping for captures made by this side.
    pub ledger: ScoreLedger,
    /// Freeze/resume cycle of this side's tokens.
    pub reset: ResetCoordinator,
    /// `true` for the side played by this session.
    pub is_local: bool,
}

impl SideState {
    fn new(target_score: u32, is_local: bool) -> Self {
        Self {
            boundary: None,
            positions: None,
            ledger: ScoreLedger::new(target_score),
            reset: ResetCoordinator::new(),
            is_local,
        }
    }
}

/// Registry of all sides taking part in a game.
#[derive(Debug, Clone)]
pub struct SideRegistry {
    /// Map from side identifiers to their state.
    pub sides: BTreeMap<SideId, SideState>,
}

impl SideRegistry {
    /// Creates a registry with one local side and the given peer sides.
    ///
    /// # Errors
    ///
    /// Returns [`CtfError::InvalidConfig`] if there is no peer or a side appears twice.
    pub fn new(local: SideId, peers: &[SideId], target_score: u32) -> Result<Self, CtfError> {
        if peers.is_empty() {
            return Err(CtfError::InvalidConfig {
                info: "a game needs at least one peer side".to_string(),
            });
        }
        let mut sides = BTreeMap::new();
        sides.insert(local, SideState::new(target_score, true));
        for &peer in peers {
            if sides.insert(peer, SideState::new(target_score, false)).is_some() {
                return Err(CtfError::InvalidConfig {
                    info: format!("side {peer} registered twice"),
                });
            }
        }
        Ok(Self { sides })
    }

    /// Returns the state of `side`, if registered.
    #[must_use]
    pub fn get(&self, side: SideId) -> Option<&SideState> {
        self.sides.get(&side)
    }

    /// Returns the mutable state of `side`, if registered.
    pub fn get_mut(&mut self, side: SideId) -> Option<&mut SideState> {
        self.sides.get_mut(&side)
    }

    /// Returns an iterator over all side identifiers, in ascending order.
    pub fn side_ids(&self) -> impl Iterator<Item = SideId> + '_ {
        self.sides.keys().copied()
    }

    /// Returns an iterator over the sides not played by this session.
    pub fn peer_side_ids(&self) -> impl Iterator<Item = SideId> + '_ {
        self.sides
            .iter()
            .filter_map(|(id, state)| (!state.is_local).then_some(*id))
    }

    /// Returns the current score of `side`.
    #[must_use]
    pub fn score(&self, side: SideId) -> Option<u32> {
        self.get(side).map(|state| state.ledger.score())
    }

    /// Returns `true` if `side` is registered and currently frozen.
    #[must_use]
    pub fn is_frozen(&self, side: SideId) -> bool {
        self.get(side).is_some_and(|state| state.reset.is_frozen())
    }

    /// The first side whose score equals its target, in ascending side order.
    #[must_use]
    pub fn winner(&self) -> Option<SideId> {
        self.sides
            .iter()
            .find_map(|(id, state)| state.ledger.is_won().then_some(*id))
    }
}

impl InvariantChecker for SideRegistry {
    fn check_invariants(&self) -> Result<(), InvariantViolation> {
        let locals = self.sides.values().filter(|state| state.is_local).count();
        if locals != 1 {
            return Err(
                InvariantViolation::new("SideRegistry", "exactly one side must be local")
                    .with_details(format!("local sides={locals}")),
            );
        }
        for (id, state) in &self.sides {
            state.ledger.check_invariants().map_err(|violation| {
                violation.with_details(format!("side={id}"))
            })?;
        }
        Ok(())
    }
}
