//! Convenient re-exports for common usage.
//!
//! ```rust
//! use flagline::prelude::*;
//! ```
//!
//! # What's Included
//!
//! - **Session types**: [`GameSession`], [`SessionBuilder`], [`GameConfig`], [`TimerConfig`]
//! - **Core traits**: [`Transport`], [`PositionSource`], [`InputController`]
//! - **Transports**: [`TcpTransport`], [`MemoryTransport`]
//! - **Fundamental types**: [`SideId`], [`Role`], [`Position`], [`TokenPositions`], [`Axes`]
//! - **Session state and events**: [`GameState`], [`GameEvent`]
//! - **Error handling**: [`CtfError`]

// Core session types
pub use crate::sessions::builder::SessionBuilder;
pub use crate::sessions::config::{GameConfig, TimerConfig};
pub use crate::sessions::game_session::GameSession;

// Core traits
pub use crate::{InputController, NoopInputController, PositionSource, Received, Transport};

// Transports
pub use crate::{MemoryTransport, TcpTransport};

// Fundamental types
pub use crate::{Axes, Position, Role, SideId, TokenPositions, MAX_TOKENS};

// Session state and events
pub use crate::{GameEvent, GameState};

// Error handling
pub use crate::CtfError;
