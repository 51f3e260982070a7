use std::sync::Arc;

use crate::error::CtfError;
use crate::sessions::config::{validate_target_score, validate_token_count, GameConfig, TimerConfig};
use crate::sessions::game_session::{GameSession, DEFAULT_MAX_EVENT_QUEUE_SIZE};
use crate::telemetry::ViolationObserver;
use crate::{
    Axes, InputController, NoopInputController, PositionSource, Role, SideId, Transport,
};

/// Smallest event queue accepted by [`SessionBuilder::with_event_queue_size`].
const MIN_EVENT_QUEUE_SIZE: usize = 10;

/// The [`SessionBuilder`] builds every [`GameSession`].
///
/// After setting all appropriate values, use [`start_authority_session`] or
/// [`start_participant_session`] to consume the builder.
///
/// ```
/// use flagline::{MemoryTransport, Position, PositionSource, SessionBuilder, TimerConfig};
/// use flagline::{CtfError, TokenPositions};
///
/// struct Table;
///
/// impl PositionSource for Table {
///     fn origin(&mut self) -> Result<Position, CtfError> {
///         Ok(Position::new(0.0, 0.0))
///     }
///     fn positions(&mut self) -> Result<TokenPositions, CtfError> {
///         Ok(TokenPositions::from_elem(Position::new(900.0, 900.0), 2))
///     }
/// }
///
/// let (to_participant, _to_authority) = MemoryTransport::pair();
/// let session = SessionBuilder::new()
///     .with_token_count(2)?
///     .with_target_score(4)?
///     .with_timer_config(TimerConfig::immediate())
///     .start_authority_session(to_participant, Table)?;
/// assert_eq!(session.token_count(), Some(2));
/// # Ok::<(), CtfError>(())
/// ```
///
/// [`start_authority_session`]: Self::start_authority_session
/// [`start_participant_session`]: Self::start_participant_session
#[must_use = "SessionBuilder must be consumed by calling a start_*_session method"]
pub struct SessionBuilder {
    game_config: GameConfig,
    timer_config: TimerConfig,
    /// Explicit (local, peer) sides. Defaults depend on the role.
    sides: Option<(SideId, SideId)>,
    input_controller: Option<Box<dyn InputController>>,
    /// Optional observer for protocol and consistency violations.
    violation_observer: Option<Arc<dyn ViolationObserver>>,
    /// Maximum number of events to queue before oldest are dropped.
    event_queue_size: usize,
}

impl std::fmt::Debug for SessionBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Destructure so a new field cannot be forgotten here.
        let Self {
            game_config,
            timer_config,
            sides,
            input_controller,
            violation_observer,
            event_queue_size,
        } = self;

        f.debug_struct("SessionBuilder")
            .field("game_config", game_config)
            .field("timer_config", timer_config)
            .field("sides", sides)
            .field("has_input_controller", &input_controller.is_some())
            .field("has_violation_observer", &violation_observer.is_some())
            .field("event_queue_size", event_queue_size)
            .finish()
    }
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionBuilder {
    /// Construct a new builder with all values set to their defaults.
    pub fn new() -> Self {
        Self {
            game_config: GameConfig::default(),
            timer_config: TimerConfig::default(),
            sides: None,
            input_controller: None,
            violation_observer: None,
            event_queue_size: DEFAULT_MAX_EVENT_QUEUE_SIZE,
        }
    }

    /// Replaces the whole game configuration.
    ///
    /// # Errors
    /// - Returns [`CtfError::InvalidConfig`] if any field is out of range.
    pub fn with_game_config(mut self, config: GameConfig) -> Result<Self, CtfError> {
        config.validate()?;
        self.game_config = config;
        Ok(self)
    }

    /// Sets the number of tokens per side. Only the authority's value is used; the
    /// participant adopts whatever the authority announces.
    ///
    /// # Errors
    /// - Returns [`CtfError::InvalidConfig`] if `token_count` exceeds [`MAX_TOKENS`](crate::MAX_TOKENS).
    pub fn with_token_count(mut self, token_count: usize) -> Result<Self, CtfError> {
        validate_token_count(token_count)?;
        self.game_config.token_count = token_count;
        Ok(self)
    }

    /// Sets the score needed to win.
    ///
    /// # Errors
    /// - Returns [`CtfError::InvalidConfig`] if `target_score` is 0.
    pub fn with_target_score(mut self, target_score: u32) -> Result<Self, CtfError> {
        validate_target_score(target_score)?;
        self.game_config.target_score = target_score;
        Ok(self)
    }

    /// Selects the axes used by the containment test.
    pub fn with_axes(mut self, axes: Axes) -> Self {
        self.game_config.axes = axes;
        self
    }

    /// Sets the setup and reset grace windows.
    pub fn with_timer_config(mut self, timer_config: TimerConfig) -> Self {
        self.timer_config = timer_config;
        self
    }

    /// Overrides which side this session plays and which side the peer plays.
    ///
    /// Without this, the authority plays [`SideId::AUTHORITY`] and the participant plays
    /// [`SideId::PARTICIPANT`].
    ///
    /// # Errors
    /// - Returns [`CtfError::InvalidConfig`] if both sides are the same.
    pub fn with_sides(mut self, local: SideId, peer: SideId) -> Result<Self, CtfError> {
        if local == peer {
            return Err(CtfError::InvalidConfig {
                info: format!("local and peer side must differ, both are {local}"),
            });
        }
        self.sides = Some((local, peer));
        Ok(self)
    }

    /// Sets the controller that is started when play begins and stopped when the game ends.
    pub fn with_input_controller(mut self, controller: impl InputController + 'static) -> Self {
        self.input_controller = Some(Box::new(controller));
        self
    }

    /// Sets a custom observer for protocol and consistency violations.
    ///
    /// If no observer is set, violations are logged via the `tracing` crate.
    ///
    /// ```
    /// use flagline::{telemetry::CollectingObserver, SessionBuilder};
    /// use std::sync::Arc;
    ///
    /// let observer = Arc::new(CollectingObserver::new());
    /// let builder = SessionBuilder::new().with_violation_observer(observer.clone());
    /// ```
    pub fn with_violation_observer(mut self, observer: Arc<dyn ViolationObserver>) -> Self {
        self.violation_observer = Some(observer);
        self
    }

    /// Sets how many undrained events a session keeps. Default is 100.
    ///
    /// # Errors
    /// - Returns [`CtfError::InvalidConfig`] if `size` is below 10.
    pub fn with_event_queue_size(mut self, size: usize) -> Result<Self, CtfError> {
        if size < MIN_EVENT_QUEUE_SIZE {
            return Err(CtfError::InvalidConfig {
                info: format!("event queue size must be at least {MIN_EVENT_QUEUE_SIZE}, got {size}"),
            });
        }
        self.event_queue_size = size;
        Ok(self)
    }

    /// Consumes the builder to construct the authority side of a game.
    ///
    /// The authority announces the token count, decides resets and declares the winner.
    ///
    /// # Errors
    /// - Returns [`CtfError::InvalidConfig`] if the configuration is invalid.
    pub fn start_authority_session(
        self,
        transport: impl Transport + 'static,
        source: impl PositionSource + 'static,
    ) -> Result<GameSession, CtfError> {
        self.start(Role::Authority, Box::new(transport), Box::new(source))
    }

    /// Consumes the builder to construct the participant side of a game.
    ///
    /// # Errors
    /// - Returns [`CtfError::InvalidConfig`] if the configuration is invalid.
    pub fn start_participant_session(
        self,
        transport: impl Transport + 'static,
        source: impl PositionSource + 'static,
    ) -> Result<GameSession, CtfError> {
        self.start(Role::Participant, Box::new(transport), Box::new(source))
    }

    fn start(
        self,
        role: Role,
        transport: Box<dyn Transport>,
        source: Box<dyn PositionSource>,
    ) -> Result<GameSession, CtfError> {
        self.game_config.validate()?;
        let (local, peer) = self.sides.unwrap_or(match role {
            Role::Authority => (SideId::AUTHORITY, SideId::PARTICIPANT),
            Role::Participant => (SideId::PARTICIPANT, SideId::AUTHORITY),
        });
        let controller = self
            .input_controller
            .unwrap_or_else(|| Box::new(NoopInputController));
        GameSession::new(
            role,
            local,
            peer,
            self.game_config,
            self.timer_config,
            transport,
            source,
            controller,
            self.violation_observer,
            self.event_queue_size,
        )
    }
}
