//! # Flagline
//!
//! Flagline is the synchronization core of a physical capture-the-flag game played by two
//! (extendable to three) independently controlled sides. Each side tracks up to three
//! positional tokens in its own coordinate frame; the two controllers exchange positions over
//! a plain text protocol and each derives the same scoring outcome on its own.
//!
//! The crate never blocks and never reads the clock: a [`GameSession`] is driven by calling
//! [`GameSession::tick`] with the current [`Instant`](web_time::Instant). Every tick reads local
//! positions, sends them, drains the peer's messages, runs edge-triggered capture detection and
//! updates scores. Notifications are drained with [`GameSession::events`].
//!
//! ```ignore
//! let (authority_link, participant_link) = MemoryTransport::pair();
//! let mut session = SessionBuilder::new()
//!     .with_token_count(2)?
//!     .with_target_score(3)?
//!     .start_authority_session(authority_link, my_position_source)?;
//!
//! loop {
//!     session.tick(Instant::now())?;
//!     for event in session.events() {
//!         // GameEvent::Captured, GameEvent::Frozen, GameEvent::Finished, ...
//!     }
//!     if session.state() == GameState::Finished {
//!         break;
//!     }
//! }
//! ```

#![forbid(unsafe_code)] // let us try
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

use serde::{Deserialize, Serialize};

pub use capture::{detect, CaptureDirection, CaptureEvent, CaptureStatusVector, CaptureTracker};
pub use error::{CtfError, DecodeError};
pub use geometry::{contains, Axes, Boundary, Position, TokenPositions};
pub use network::codec::{decode, encode, MessageDecoder, MAX_LINE_LEN};
pub use network::memory_transport::{LinkProbe, MemoryTransport};
pub use network::messages::Message;
pub use network::tcp_transport::TcpTransport;
pub use reset::{ResetCoordinator, ResetPhase};
pub use score::{ScoreLedger, ScoreState};
pub use sessions::builder::SessionBuilder;
pub use sessions::config::{GameConfig, TimerConfig};
pub use sessions::game_session::GameSession;
pub use sessions::side_registry::{SideRegistry, SideState};

pub mod capture;
#[doc(hidden)]
pub mod error;
pub mod geometry;
pub mod operator;
pub mod prelude;
pub mod reset;
pub mod score;
pub mod telemetry;
#[doc(hidden)]
pub mod sessions {
    #[doc(hidden)]
    pub mod builder;
    pub mod config;
    #[doc(hidden)]
    pub mod game_session;
    pub mod side_registry;
}
/// Wire messages, their text codec and the transports that carry them.
pub mod network {
    /// Line-oriented text codec for [`Message`](crate::Message).
    ///
    /// Encodes one message per `\n`-terminated line and decodes arbitrary byte chunks,
    /// buffering partial lines across reads.
    pub mod codec;
    pub mod memory_transport;
    #[doc(hidden)]
    pub mod messages;
    /// Non-blocking TCP [`Transport`](crate::Transport) for games across machines.
    pub mod tcp_transport;
}

// #############
// # CONSTANTS #
// #############

/// The largest number of tokens a single side can play with.
pub const MAX_TOKENS: usize = 3;

/// The offset added to each axis of a side's origin to form its base.
///
/// The original tabletop setup used a 300mm square in front of the robot.
pub const DEFAULT_BOUNDARY_EXTENT: f64 = 300.0;

/// Identifies one side (team) in a game.
///
/// Side identifiers appear on the wire in `Coordinates`, `Origin` and `Exit` messages.
/// By convention the [`Role::Authority`] plays as side `1` and the [`Role::Participant`]
/// as side `2`; a third side would be `3`.
///
/// # Examples
///
/// ```
/// use flagline::SideId;
///
/// let side = SideId::new(2);
/// assert_eq!(side.as_u8(), 2);
/// assert_eq!(side.to_string(), "2");
/// ```
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct SideId(u8);

impl SideId {
    /// The side conventionally played by the [`Role::Authority`].
    pub const AUTHORITY: SideId = SideId(1);
    /// The side conventionally played by the [`Role::Participant`].
    pub const PARTICIPANT: SideId = SideId(2);

    /// Creates a new `SideId` from a raw team number.
    #[inline]
    #[must_use]
    pub const fn new(id: u8) -> Self {
        SideId(id)
    }

    /// Returns the underlying team number.
    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self.0
    }
}

impl std::fmt::Display for SideId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u8> for SideId {
    #[inline]
    fn from(value: u8) -> Self {
        SideId(value)
    }
}

impl From<SideId> for u8 {
    #[inline]
    fn from(side: SideId) -> Self {
        side.0
    }
}

// #############
// #   ENUMS   #
// #############

/// The two mirrored roles a session can play.
///
/// Both roles run the identical per-tick loop. They only differ in who initiates
/// session-level messages.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Sends `SetCount` and `Start`, decides resets and is the sole source of `Exit`.
    Authority,
    /// Waits for `SetCount` then `Start`, and obeys `Reset`, `Resetting` and `Exit`.
    Participant,
}

/// Lifecycle of a game from the local side's point of view.
///
/// ```text
/// Setup ──► Playing ◄──► Resetting
///              │             │
///              └──► Finished ◄┘
/// ```
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GameState {
    /// Negotiating the token count and waiting for `Start` and the setup grace window.
    Setup,
    /// Normal play.
    Playing,
    /// The local side's tokens are frozen for the reset grace window.
    Resetting,
    /// Terminal. The loop has stopped and the transport is closed.
    Finished,
}

/// Result of a non-blocking [`Transport::try_receive`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// Bytes read from the connection. Message boundaries are not preserved.
    Data(Vec<u8>),
    /// Nothing is available right now.
    Empty,
}

/// Notifications that you can receive from the session. Handling them is up to the user.
///
/// # Forward Compatibility
///
/// This enum is marked `#[non_exhaustive]` because new event types may be
/// added in future versions. Always include a wildcard arm when matching.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum GameEvent {
    /// Setup completed and the local side is now playing.
    Started {
        /// Number of tokens per side negotiated during setup.
        token_count: usize,
        /// The side played by this session.
        local_side: SideId,
    },
    /// A token of `owner` entered the base of `capturer`.
    Captured {
        /// The side whose base the token entered.
        capturer: SideId,
        /// The side that owns the token.
        owner: SideId,
        /// Index of the token in the owner's token order.
        token: usize,
        /// The tick on which the transition was observed.
        tick: u64,
    },
    /// A token of `owner` left the base of `capturer`. Scores are not affected.
    Released {
        /// The side whose base the token left.
        capturer: SideId,
        /// The side that owns the token.
        owner: SideId,
        /// Index of the token in the owner's token order.
        token: usize,
        /// The tick on which the transition was observed.
        tick: u64,
    },
    /// The score of a side changed.
    ScoreChanged {
        /// The side that scored.
        side: SideId,
        /// The new score.
        score: u32,
    },
    /// The tokens of `side` are frozen for the reset grace window.
    Frozen {
        /// The side whose tokens must be re-hidden.
        side: SideId,
    },
    /// The reset grace window for `side` elapsed and play resumed.
    Resumed {
        /// The side that resumed.
        side: SideId,
    },
    /// A participant observed that `side` reached the target score and is waiting for `Exit`.
    WinObserved {
        /// The side that reached the target score.
        side: SideId,
    },
    /// The game is over.
    Finished {
        /// The winner, or `None` if the session was aborted by a transport error.
        winner: Option<SideId>,
    },
}

// #############
// #  TRAITS   #
// #############

/// A bidirectional, non-blocking byte-stream connection to the peer.
///
/// Implementations must never block: a read with no data available returns
/// [`Received::Empty`] immediately. Connection loss is reported as
/// [`CtfError::Transport`], never swallowed.
#[cfg(feature = "sync-send")]
pub trait Transport: Send + Sync {
    /// Writes `bytes` to the connection.
    fn send(&mut self, bytes: &[u8]) -> Result<(), CtfError>;

    /// Returns whatever bytes are available, or [`Received::Empty`].
    fn try_receive(&mut self) -> Result<Received, CtfError>;

    /// Closes the connection. Calling this more than once has no further effect.
    fn close(&mut self);
}

/// A bidirectional, non-blocking byte-stream connection to the peer.
///
/// Implementations must never block: a read with no data available returns
/// [`Received::Empty`] immediately. Connection loss is reported as
/// [`CtfError::Transport`], never swallowed.
#[cfg(not(feature = "sync-send"))]
pub trait Transport {
    /// Writes `bytes` to the connection.
    fn send(&mut self, bytes: &[u8]) -> Result<(), CtfError>;

    /// Returns whatever bytes are available, or [`Received::Empty`].
    fn try_receive(&mut self) -> Result<Received, CtfError>;

    /// Closes the connection. Calling this more than once has no further effect.
    fn close(&mut self);
}

/// Supplies the positions of the local side's tokens.
///
/// This is the seam to the external sensing subsystem. The session calls
/// [`origin`](PositionSource::origin) once at the end of setup and
/// [`positions`](PositionSource::positions) once per tick while the local side is not frozen.
#[cfg(feature = "sync-send")]
pub trait PositionSource: Send + Sync {
    /// Returns the origin of the local side's base in the local frame.
    fn origin(&mut self) -> Result<Position, CtfError>;

    /// Returns the current position of every local token, in fixed token order.
    fn positions(&mut self) -> Result<TokenPositions, CtfError>;

    /// Re-acquires token identities after the local side's reset grace window.
    fn reacquire(&mut self) {}
}

/// Supplies the positions of the local side's tokens.
///
/// This is the seam to the external sensing subsystem. The session calls
/// [`origin`](PositionSource::origin) once at the end of setup and
/// [`positions`](PositionSource::positions) once per tick while the local side is not frozen.
#[cfg(not(feature = "sync-send"))]
pub trait PositionSource {
    /// Returns the origin of the local side's base in the local frame.
    fn origin(&mut self) -> Result<Position, CtfError>;

    /// Returns the current position of every local token, in fixed token order.
    fn positions(&mut self) -> Result<TokenPositions, CtfError>;

    /// Re-acquires token identities after the local side's reset grace window.
    fn reacquire(&mut self) {}
}

/// Maps human input to agent motion while the game is running.
///
/// Which concrete controller backs this is a deployment-time choice. The session starts it
/// when play begins and stops it exactly once when the game finishes.
#[cfg(feature = "sync-send")]
pub trait InputController: Send + Sync {
    /// Starts forwarding human input to the agent.
    fn start(&mut self);

    /// Stops forwarding human input.
    fn stop(&mut self);
}

/// Maps human input to agent motion while the game is running.
///
/// Which concrete controller backs this is a deployment-time choice. The session starts it
/// when play begins and stops it exactly once when the game finishes.
#[cfg(not(feature = "sync-send"))]
pub trait InputController {
    /// Starts forwarding human input to the agent.
    fn start(&mut self);

    /// Stops forwarding human input.
    fn stop(&mut self);
}

/// An [`InputController`] that does nothing. Used when no controller is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopInputController;

impl InputController for NoopInputController {
    fn start(&mut self) {}

    fn stop(&mut self) {}
}

// ###################
// # UNIT TESTS      #
// ###################
