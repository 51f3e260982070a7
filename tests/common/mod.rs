//! Common test infrastructure shared across integration tests.
//!
//! - [`Table`]: a scripted [`PositionSource`] whose tokens a test moves between ticks
//! - [`RecordingController`]: an [`InputController`] that remembers every call
//! - [`Game`]: an authority and a participant wired together over a [`MemoryTransport`] pair
//!
//! # Usage
//!
//! ```ignore
//! #[path = "common/mod.rs"]
//! mod common;
//! use common::{Game, GameOptions};
//! ```

// Each integration crate only uses a subset of these helpers.
#![allow(dead_code)]

use std::sync::Arc;

use flagline::telemetry::CollectingObserver;
use flagline::{
    Axes, CtfError, GameEvent, GameSession, GameState, InputController, LinkProbe, MemoryTransport,
    Position, PositionSource, SessionBuilder, SideId, TimerConfig, TokenPositions,
};
use parking_lot::Mutex;
use web_time::{Duration, Instant};

/// Upper bound on rounds spent waiting for both sessions to start playing.
pub const MAX_SETUP_ROUNDS: usize = 10;

/// Lower corner of the authority's base.
pub const AUTHORITY_BASE: Position = Position::new(0.0, 0.0);
/// Lower corner of the participant's base.
pub const PARTICIPANT_BASE: Position = Position::new(1_000.0, 1_000.0);
/// A point inside the authority's base.
pub const IN_AUTHORITY_BASE: Position = Position::new(150.0, 150.0);
/// A point inside the participant's base.
pub const IN_PARTICIPANT_BASE: Position = Position::new(1_150.0, 1_150.0);

/// A point outside every base, distinct per token.
pub fn neutral(token: usize) -> Position {
    Position::new(600.0 + token as f64 * 10.0, 600.0)
}

/// Installs a test-friendly `tracing` subscriber. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

// ============================================================================
// Scripted position source
// ============================================================================

#[derive(Debug)]
struct TableState {
    origin: Position,
    tokens: TokenPositions,
    reacquired: u32,
}

/// A position source a test can steer after handing it to a session.
#[derive(Debug, Clone)]
pub struct Table(Arc<Mutex<TableState>>);

impl Table {
    /// A table with `token_count` tokens parked on neutral ground.
    pub fn new(origin: Position, token_count: usize) -> Self {
        Self(Arc::new(Mutex::new(TableState {
            origin,
            tokens: (0..token_count).map(neutral).collect(),
            reacquired: 0,
        })))
    }

    /// Moves the base. Only takes effect if setup has not completed yet.
    pub fn set_origin(&self, origin: Position) {
        self.0.lock().origin = origin;
    }

    /// Moves one token.
    pub fn place(&self, token: usize, position: Position) {
        self.0.lock().tokens[token] = position;
    }

    /// Moves every token back to neutral ground.
    pub fn park_all(&self) {
        let mut state = self.0.lock();
        for (token, position) in state.tokens.iter_mut().enumerate() {
            *position = neutral(token);
        }
    }

    /// Replaces the whole token list, including its length.
    pub fn set_tokens(&self, tokens: TokenPositions) {
        self.0.lock().tokens = tokens;
    }

    /// How often the session asked for the tokens to be re-located after a reset.
    pub fn reacquired(&self) -> u32 {
        self.0.lock().reacquired
    }
}

impl PositionSource for Table {
    fn origin(&mut self) -> Result<Position, CtfError> {
        Ok(self.0.lock().origin)
    }

    fn positions(&mut self) -> Result<TokenPositions, CtfError> {
        Ok(self.0.lock().tokens.clone())
    }

    fn reacquire(&mut self) {
        self.0.lock().reacquired += 1;
    }
}

// ============================================================================
// Recording controller
// ============================================================================

/// One call made to a [`RecordingController`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerCall {
    Start,
    Stop,
}

/// Remembers every start and stop.
#[derive(Debug, Clone, Default)]
pub struct RecordingController(Arc<Mutex<Vec<ControllerCall>>>);

impl RecordingController {
    pub fn calls(&self) -> Vec<ControllerCall> {
        self.0.lock().clone()
    }
}

impl InputController for RecordingController {
    fn start(&mut self) {
        self.0.lock().push(ControllerCall::Start);
    }

    fn stop(&mut self) {
        self.0.lock().push(ControllerCall::Stop);
    }
}

// ============================================================================
// Two sessions over one in-memory link
// ============================================================================

/// Knobs for [`Game::start`].
#[derive(Debug, Clone)]
pub struct GameOptions {
    pub token_count: usize,
    pub target_score: u32,
    pub timers: TimerConfig,
    pub axes: Axes,
    /// Largest read either transport returns. `usize::MAX` delivers whole writes.
    pub max_chunk: usize,
    pub authority_observer: Option<Arc<CollectingObserver>>,
    pub participant_observer: Option<Arc<CollectingObserver>>,
}

impl Default for GameOptions {
    fn default() -> Self {
        Self {
            token_count: 3,
            target_score: 3,
            timers: TimerConfig::immediate(),
            axes: Axes::XY,
            max_chunk: usize::MAX,
            authority_observer: None,
            participant_observer: None,
        }
    }
}

/// An authority and a participant connected by a [`MemoryTransport`] pair.
///
/// Every [`round`](Self::round) ticks the authority, then the participant, at the same
/// simulated instant and collects the events both emitted.
pub struct Game {
    pub authority: GameSession,
    pub participant: GameSession,
    pub authority_table: Table,
    pub participant_table: Table,
    pub authority_link: LinkProbe,
    pub participant_link: LinkProbe,
    pub authority_controller: RecordingController,
    pub participant_controller: RecordingController,
    pub authority_events: Vec<GameEvent>,
    pub participant_events: Vec<GameEvent>,
    pub now: Instant,
}

impl Game {
    pub fn start(options: GameOptions) -> Self {
        init_tracing();
        let (authority_end, participant_end) = MemoryTransport::pair();
        let authority_end = authority_end.with_max_chunk(options.max_chunk);
        let participant_end = participant_end.with_max_chunk(options.max_chunk);
        let authority_link = authority_end.probe();
        let participant_link = participant_end.probe();

        let authority_table = Table::new(AUTHORITY_BASE, options.token_count);
        let participant_table = Table::new(PARTICIPANT_BASE, options.token_count);
        let authority_controller = RecordingController::default();
        let participant_controller = RecordingController::default();

        let mut authority_builder = SessionBuilder::new()
            .with_token_count(options.token_count)
            .unwrap()
            .with_target_score(options.target_score)
            .unwrap()
            .with_timer_config(options.timers)
            .with_axes(options.axes)
            .with_input_controller(authority_controller.clone());
        if let Some(observer) = &options.authority_observer {
            authority_builder = authority_builder.with_violation_observer(observer.clone());
        }
        let authority = authority_builder
            .start_authority_session(authority_end, authority_table.clone())
            .unwrap();

        let mut participant_builder = SessionBuilder::new()
            .with_target_score(options.target_score)
            .unwrap()
            .with_timer_config(options.timers)
            .with_axes(options.axes)
            .with_input_controller(participant_controller.clone());
        if let Some(observer) = &options.participant_observer {
            participant_builder = participant_builder.with_violation_observer(observer.clone());
        }
        let participant = participant_builder
            .start_participant_session(participant_end, participant_table.clone())
            .unwrap();

        Self {
            authority,
            participant,
            authority_table,
            participant_table,
            authority_link,
            participant_link,
            authority_controller,
            participant_controller,
            authority_events: Vec::new(),
            participant_events: Vec::new(),
            now: Instant::now(),
        }
    }

    /// Ticks both sessions once and returns both results.
    pub fn round(&mut self) -> (Result<(), CtfError>, Result<(), CtfError>) {
        let authority = self.authority.tick(self.now);
        self.authority_events.extend(self.authority.events());
        let participant = self.participant.tick(self.now);
        self.participant_events.extend(self.participant.events());
        (authority, participant)
    }

    /// Runs `count` rounds that must all succeed.
    #[track_caller]
    pub fn rounds(&mut self, count: usize) {
        for _ in 0..count {
            let (authority, participant) = self.round();
            authority.unwrap();
            participant.unwrap();
        }
    }

    /// Runs rounds until both sessions are playing, then one more so both bases are known
    /// on both ends.
    #[track_caller]
    pub fn play(&mut self) {
        for _ in 0..MAX_SETUP_ROUNDS {
            if self.authority.state() == GameState::Playing
                && self.participant.state() == GameState::Playing
            {
                self.rounds(2);
                return;
            }
            self.rounds(1);
        }
        panic!(
            "setup did not complete: authority {:?}, participant {:?}",
            self.authority.state(),
            self.participant.state()
        );
    }

    /// Moves the simulated clock forward.
    pub fn advance(&mut self, by: Duration) {
        self.now += by;
    }

    /// Forgets the events collected so far.
    pub fn clear_events(&mut self) {
        self.authority_events.clear();
        self.participant_events.clear();
    }
}

/// Scores of both sides as seen by `session`, as (authority, participant).
pub fn scores(session: &GameSession) -> (u32, u32) {
    (
        session.score(SideId::AUTHORITY).unwrap_or_default(),
        session.score(SideId::PARTICIPANT).unwrap_or_default(),
    )
}

/// Number of `Captured` events in `events` with the given capturer.
pub fn captures_by(events: &[GameEvent], side: SideId) -> usize {
    events
        .iter()
        .filter(|event| matches!(event, GameEvent::Captured { capturer, .. } if *capturer == side))
        .count()
}
