use serde::{Deserialize, Serialize};

use crate::geometry::{Position, TokenPositions};
use crate::SideId;

/// Everything the two sides say to each other.
///
/// Session-level messages (`Start`, `SetCount`, `Reset`, `Resetting`, `Exit`) only ever flow
/// from the authority to the participant. `Coordinates` and `Origin` flow both ways.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// Setup is over once the grace window elapses.
    Start,
    /// Number of tokens each side plays with.
    SetCount(u8),
    /// Current positions of one side's tokens, in token order.
    Coordinates {
        /// The side that owns the tokens.
        side: SideId,
        /// One entry per token.
        positions: TokenPositions,
    },
    /// Lower corner of a side's base, sent once when setup completes.
    Origin {
        /// The side whose base this is.
        side: SideId,
        /// The base origin.
        origin: Position,
    },
    /// The receiving participant must freeze its own tokens.
    Reset,
    /// The authority is freezing its own tokens.
    Resetting,
    /// The game is over.
    Exit {
        /// The side that reached the target score.
        winner: SideId,
    },
}

impl Message {
    /// Short name used in logs and decode errors.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Start => "Start",
            Self::SetCount(_) => "SetCount",
            Self::Coordinates { .. } => "Coordinates",
            Self::Origin { .. } => "Origin",
            Self::Reset => "Reset",
            Self::Resetting => "Resetting",
            Self::Exit { .. } => "Exit",
        }
    }

    /// `true` for messages only the authority may send.
    #[must_use]
    pub const fn is_authority_only(&self) -> bool {
        matches!(
            self,
            Self::Start | Self::SetCount(_) | Self::Reset | Self::Resetting | Self::Exit { .. }
        )
    }
}
