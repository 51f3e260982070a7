use std::collections::vec_deque::Drain;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use smallvec::SmallVec;
use tracing::{debug, trace};
use web_time::Instant;

use crate::capture::{CaptureDirection, CaptureStatusVector, CaptureTracker};
use crate::error::CtfError;
use crate::geometry::{contains, Axes, Boundary, Position};
use crate::network::codec::{encode, MessageDecoder};
use crate::network::messages::Message;
use crate::reset::ResetCoordinator;
use crate::sessions::config::{GameConfig, TimerConfig};
use crate::sessions::side_registry::SideRegistry;
use crate::telemetry::{
    InvariantChecker, InvariantViolation, ViolationKind, ViolationObserver, ViolationSeverity,
};
use crate::{debug_check_invariants, report_violation_to};
use crate::{
    GameEvent, GameState, InputController, PositionSource, Received, Role, SideId, Transport,
    MAX_TOKENS,
};

/// The default maximum number of events held in the event queue before the oldest are dropped.
pub(crate) const DEFAULT_MAX_EVENT_QUEUE_SIZE: usize = 100;

/// A tracker per ordered (capturer, owner) pair.
type TrackerMap = BTreeMap<(SideId, SideId), CaptureTracker>;

/// One side of a running game.
///
/// A `GameSession` is driven entirely by [`tick`](Self::tick). While playing, every call
/// expires finished resets, reads and sends the local token positions, applies the peer's
/// messages and then detects captures and updates scores. Timers are measured against the
/// `now` you pass in. Nothing blocks.
///
/// The authority decides resets and the end of the game. The participant mirrors the scoring
/// so both players see the same events, but waits for the authority's `Reset`, `Resetting`
/// and `Exit` messages before acting on them.
///
/// Sessions are created with [`SessionBuilder`](crate::SessionBuilder).
pub struct GameSession {
    role: Role,
    state: GameState,
    local_side: SideId,
    peer_side: SideId,

    config: GameConfig,
    timers: TimerConfig,
    /// Known from the start on the authority, adopted from `SetCount` on the participant.
    token_count: Option<usize>,
    /// The authority has sent `Start`, or the participant has received it.
    start_seen: bool,
    setup_grace_until: Option<Instant>,

    registry: SideRegistry,
    trackers: TrackerMap,

    transport: Box<dyn Transport>,
    transport_closed: bool,
    decoder: MessageDecoder,
    source: Box<dyn PositionSource>,
    controller: Box<dyn InputController>,
    controller_running: bool,

    current_tick: u64,
    winner: Option<SideId>,
    win_observed: bool,
    /// Why scoring was skipped on the previous tick, so a lasting gap is reported once.
    last_skip: Option<CtfError>,
    /// Sides the authority asked us to freeze. Our own side freezes before this tick's
    /// scoring, the peer's side after it, so both ends stop each side's snapshot stream at
    /// the same snapshot.
    requested_freezes: SmallVec<[SideId; 2]>,

    event_queue: VecDeque<GameEvent>,
    max_events: usize,
    violation_observer: Option<Arc<dyn ViolationObserver>>,
}

impl std::fmt::Debug for GameSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameSession")
            .field("role", &self.role)
            .field("state", &self.state)
            .field("local_side", &self.local_side)
            .field("peer_side", &self.peer_side)
            .field("token_count", &self.token_count)
            .field("current_tick", &self.current_tick)
            .field("winner", &self.winner)
            .field("registry", &self.registry)
            .field("queued_events", &self.event_queue.len())
            .finish_non_exhaustive()
    }
}

impl GameSession {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        role: Role,
        local_side: SideId,
        peer_side: SideId,
        config: GameConfig,
        timers: TimerConfig,
        transport: Box<dyn Transport>,
        source: Box<dyn PositionSource>,
        controller: Box<dyn InputController>,
        violation_observer: Option<Arc<dyn ViolationObserver>>,
        max_events: usize,
    ) -> Result<Self, CtfError> {
        let registry = SideRegistry::new(local_side, &[peer_side], config.target_score)?;
        let token_count = match role {
            Role::Authority => Some(config.token_count),
            Role::Participant => None,
        };
        debug!(
            "Created {:?} session for side {} against side {}",
            role, local_side, peer_side
        );
        Ok(Self {
            role,
            state: GameState::Setup,
            local_side,
            peer_side,
            config,
            timers,
            token_count,
            start_seen: false,
            setup_grace_until: None,
            registry,
            trackers: TrackerMap::new(),
            transport,
            transport_closed: false,
            decoder: MessageDecoder::new(),
            source,
            controller,
            controller_running: false,
            current_tick: 0,
            winner: None,
            win_observed: false,
            last_skip: None,
            requested_freezes: SmallVec::new(),
            event_queue: VecDeque::new(),
            max_events: max_events.max(1),
            violation_observer,
        })
    }

    /// Advances the session by one step.
    ///
    /// Ticking a [`GameState::Finished`] session does nothing and returns `Ok(())`.
    ///
    /// # Errors
    ///
    /// - [`CtfError::Transport`] if the connection failed. The session is finished without a
    ///   winner before the error is returned.
    /// - Any error returned by the [`PositionSource`]. The session keeps running and the next
    ///   tick tries again.
    pub fn tick(&mut self, now: Instant) -> Result<(), CtfError> {
        if self.state == GameState::Finished {
            trace!("Ignoring tick on a finished session");
            return Ok(());
        }
        self.current_tick += 1;
        let result = match self.state {
            GameState::Setup => self.tick_setup(now),
            GameState::Playing | GameState::Resetting => self.tick_playing(now),
            GameState::Finished => Ok(()),
        };
        if let Err(err) = &result {
            if err.is_fatal() {
                debug!("Ending session after fatal error: {}", err);
                self.finish(None);
            }
        }
        result
    }

    /// Ends the session without a winner. Stops the input controller and closes the transport.
    ///
    /// Does nothing if the session is already finished.
    pub fn abort(&mut self) {
        self.finish(None);
    }

    /// Returns all events that happened since the last call to this method.
    pub fn events(&mut self) -> Drain<'_, GameEvent> {
        self.event_queue.drain(..)
    }

    /// Current state of the game.
    #[must_use]
    pub fn state(&self) -> GameState {
        self.state
    }

    /// Whether this session is the authority or the participant.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// The side played by this session.
    #[must_use]
    pub fn local_side(&self) -> SideId {
        self.local_side
    }

    /// The side played by the remote end.
    #[must_use]
    pub fn peer_side(&self) -> SideId {
        self.peer_side
    }

    /// Tokens per side. `None` on a participant that has not received `SetCount` yet.
    #[must_use]
    pub fn token_count(&self) -> Option<usize> {
        self.token_count
    }

    /// Current score of `side`, or `None` for an unknown side.
    #[must_use]
    pub fn score(&self, side: SideId) -> Option<u32> {
        self.registry.score(side)
    }

    /// Returns `true` while the tokens of `side` are frozen for a reset.
    #[must_use]
    pub fn is_frozen(&self, side: SideId) -> bool {
        self.registry.is_frozen(side)
    }

    /// The winner, once the game finished with one.
    #[must_use]
    pub fn winner(&self) -> Option<SideId> {
        self.winner
    }

    /// Number of ticks processed so far.
    #[must_use]
    pub fn current_tick(&self) -> u64 {
        self.current_tick
    }

    /// Read-only view of every side's base, tokens, score and reset phase.
    #[must_use]
    pub fn sides(&self) -> &SideRegistry {
        &self.registry
    }

    /// Returns the violation observer, if one was configured.
    #[must_use]
    pub fn violation_observer(&self) -> Option<&Arc<dyn ViolationObserver>> {
        self.violation_observer.as_ref()
    }

    // #############
    // #   SETUP   #
    // #############

    fn tick_setup(&mut self, now: Instant) -> Result<(), CtfError> {
        if self.role == Role::Authority && !self.start_seen {
            let count = self.token_count.unwrap_or(MAX_TOKENS);
            let wire_count = u8::try_from(count).map_err(|_| CtfError::InvalidConfig {
                info: format!("token_count {count} does not fit the wire format"),
            })?;
            self.send(&Message::SetCount(wire_count))?;
            self.send(&Message::Start)?;
            self.start_seen = true;
            debug!("Sent token count {} and Start", count);
        }

        self.drain_inbound()?;
        if self.state == GameState::Finished {
            return Ok(());
        }

        if self.setup_grace_until.is_none() && self.start_seen && self.token_count.is_some() {
            self.setup_grace_until = Some(now + self.timers.setup_grace);
            trace!("Setup grace armed for {:?}", self.timers.setup_grace);
        }
        match self.setup_grace_until {
            Some(until) if now >= until => self.complete_setup(),
            _ => Ok(()),
        }
    }

    fn complete_setup(&mut self) -> Result<(), CtfError> {
        let token_count = self.token_count.ok_or_else(|| CtfError::InvalidRequest {
            info: "setup cannot complete before the token count is known".to_string(),
        })?;
        let mut origin = self.source.origin()?;
        if !origin.is_finite() {
            return Err(CtfError::InvalidRequest {
                info: format!("position source returned a non-finite origin {origin:?}"),
            });
        }
        match self.config.axes {
            Axes::XY => origin.z = None,
            Axes::XYZ if origin.z.is_none() => report_violation_to!(
                self.violation_observer,
                tick = self.current_tick,
                ViolationSeverity::Error,
                ViolationKind::Configuration,
                "Three-axis containment is configured but the base of side {} has no z; \
                 only x and y are tested",
                self.local_side
            ),
            Axes::XYZ => {}
        }

        let boundary = Boundary::new(origin, self.config.boundary_extent);
        if let Some(local) = self.registry.get_mut(self.local_side) {
            local.boundary = Some(boundary);
        }

        let sides: SmallVec<[SideId; 4]> = self.registry.side_ids().collect();
        self.trackers.clear();
        for &capturer in &sides {
            for &owner in sides.iter().filter(|owner| **owner != capturer) {
                self.trackers
                    .insert((capturer, owner), CaptureTracker::new(token_count));
            }
        }

        self.send(&Message::Origin {
            side: self.local_side,
            origin,
        })?;
        self.controller.start();
        self.controller_running = true;
        self.state = GameState::Playing;
        debug!(
            "Setup complete on tick {}: {} tokens per side, base at {:?}",
            self.current_tick, token_count, origin
        );
        self.push_event(GameEvent::Started {
            token_count,
            local_side: self.local_side,
        });
        Ok(())
    }

    // #############
    // #   PLAY    #
    // #############

    fn tick_playing(&mut self, now: Instant) -> Result<(), CtfError> {
        self.expire_resets(now);

        if !self.registry.is_frozen(self.local_side) {
            if let Err(err) = self.send_local_positions() {
                return self.salvage_exit(err);
            }
        }

        self.drain_inbound()?;
        if self.state == GameState::Finished {
            return Ok(());
        }

        let (own, peers): (SmallVec<[SideId; 2]>, SmallVec<[SideId; 2]>) =
            std::mem::take(&mut self.requested_freezes)
                .into_iter()
                .partition(|side| *side == self.local_side);
        for side in own {
            self.freeze_side(side, now, false)?;
        }

        let scored = match self.score_tick() {
            Ok(scored) => {
                self.last_skip = None;
                scored
            }
            Err(reason) if reason.is_transient() => {
                self.report_skip(reason);
                Vec::new()
            }
            Err(err) => return Err(err),
        };

        for side in peers {
            self.freeze_side(side, now, false)?;
        }
        if self.role == Role::Authority {
            self.trigger_resets(&scored, now)?;
        }
        self.check_win()?;
        debug_check_invariants!(self, "after tick");
        Ok(())
    }

    /// Reads the local token positions, stores them for scoring and sends them to the peer.
    ///
    /// Non-finite positions are still scored locally but never sent.
    fn send_local_positions(&mut self) -> Result<(), CtfError> {
        let mut positions = self.source.positions()?;
        if self.config.axes == Axes::XY {
            positions.iter_mut().for_each(|position| position.z = None);
        }
        let sent = if positions.iter().all(Position::is_finite) {
            self.send(&Message::Coordinates {
                side: self.local_side,
                positions: positions.clone(),
            })
        } else {
            report_violation_to!(
                self.violation_observer,
                tick = self.current_tick,
                ViolationSeverity::Warning,
                ViolationKind::Consistency,
                "Local positions contain non-finite values and were not sent: {:?}",
                positions
            );
            Ok(())
        };
        if let Some(local) = self.registry.get_mut(self.local_side) {
            local.positions = Some(positions);
        }
        sent
    }

    /// Runs capture detection for every unfrozen owner against every other side's base.
    ///
    /// All inputs are validated before any tracker or ledger is touched, so a tick either
    /// scores completely or not at all. Returns the (capturer, owner) pairs that changed the
    /// capturer's score.
    ///
    /// A peer that has resumed from a reset is left out until its first fresh snapshot
    /// arrives.
    fn score_tick(&mut self) -> Result<Vec<(SideId, SideId)>, CtfError> {
        let token_count = self.token_count.unwrap_or_default();
        let axes = self.config.axes;

        let mut observations: Vec<((SideId, SideId), CaptureStatusVector)> = Vec::new();
        for (&owner, owner_state) in &self.registry.sides {
            if owner_state.reset.is_frozen() {
                continue;
            }
            let Some(positions) = owner_state.positions.as_ref() else {
                if !owner_state.is_local && owner_state.reset.cycles() > 0 {
                    trace!("Waiting for side {} to report after its reset", owner);
                    continue;
                }
                return Err(CtfError::MissingPeerPositions { side: owner });
            };
            if positions.len() != token_count {
                return Err(CtfError::TokenCountMismatch {
                    expected: token_count,
                    actual: positions.len(),
                });
            }
            for (&capturer, capturer_state) in &self.registry.sides {
                if capturer == owner {
                    continue;
                }
                let boundary = capturer_state
                    .boundary
                    .as_ref()
                    .ok_or(CtfError::MissingPeerBoundary { side: capturer })?;
                let status = positions
                    .iter()
                    .map(|position| contains(position, boundary, axes))
                    .collect();
                observations.push(((capturer, owner), status));
            }
        }

        let mut scored = Vec::new();
        for ((capturer, owner), status) in observations {
            let Some(tracker) = self.trackers.get_mut(&(capturer, owner)) else {
                report_violation_to!(
                    self.violation_observer,
                    tick = self.current_tick,
                    ViolationSeverity::Critical,
                    ViolationKind::InternalError,
                    "No capture tracker for side {} capturing side {}",
                    capturer,
                    owner
                );
                continue;
            };
            let transitions = tracker.observe(&status)?;
            if transitions.is_empty() {
                continue;
            }
            let tick = self.current_tick;
            for transition in &transitions {
                trace!(
                    "Token {} of side {} {:?} base of side {}",
                    transition.token,
                    owner,
                    transition.direction,
                    capturer
                );
                self.push_event(match transition.direction {
                    CaptureDirection::Entered => GameEvent::Captured {
                        capturer,
                        owner,
                        token: transition.token,
                        tick,
                    },
                    CaptureDirection::Left => GameEvent::Released {
                        capturer,
                        owner,
                        token: transition.token,
                        tick,
                    },
                });
            }

            let Some(capturer_state) = self.registry.get_mut(capturer) else {
                report_violation_to!(
                    self.violation_observer,
                    tick = self.current_tick,
                    ViolationSeverity::Critical,
                    ViolationKind::InternalError,
                    "Side {} scored but is not registered",
                    capturer
                );
                continue;
            };
            let before = capturer_state.ledger.score();
            let after = capturer_state.ledger.apply(&transitions).own_score;
            if after != before {
                debug!("Side {} scored: {} -> {}", capturer, before, after);
                self.push_event(GameEvent::ScoreChanged {
                    side: capturer,
                    score: after,
                });
                scored.push((capturer, owner));
            }
        }
        debug_check_invariants!(self.registry, "after scoring");
        Ok(scored)
    }

    fn report_skip(&mut self, reason: CtfError) {
        if self.last_skip.as_ref() == Some(&reason) {
            trace!("Still skipping scoring: {}", reason);
            return;
        }
        report_violation_to!(
            self.violation_observer,
            tick = self.current_tick,
            ViolationSeverity::Warning,
            ViolationKind::Consistency,
            "Skipping scoring: {}",
            reason
        );
        self.last_skip = Some(reason);
    }

    // #############
    // #  RESETS   #
    // #############

    fn trigger_resets(&mut self, scored: &[(SideId, SideId)], now: Instant) -> Result<(), CtfError> {
        let token_count = self.token_count.unwrap_or_default();
        for &(capturer, owner) in scored {
            let score = self.registry.score(capturer).unwrap_or_default();
            if ResetCoordinator::should_trigger(true, score, token_count)
                && !self.registry.is_frozen(owner)
            {
                debug!(
                    "Side {} captured every token of side {}; resetting side {}",
                    capturer, owner, owner
                );
                self.freeze_side(owner, now, true)?;
            }
        }
        Ok(())
    }

    /// Freezes `side` for the reset grace window. With `announce`, the authority tells the
    /// participant which side is resetting.
    fn freeze_side(&mut self, side: SideId, now: Instant, announce: bool) -> Result<(), CtfError> {
        let grace = self.timers.reset_grace;
        let Some(side_state) = self.registry.get_mut(side) else {
            report_violation_to!(
                self.violation_observer,
                tick = self.current_tick,
                ViolationSeverity::Warning,
                ViolationKind::ResetCycle,
                "Reset requested for unknown side {}",
                side
            );
            return Ok(());
        };
        if !side_state.reset.freeze(now, grace) {
            report_violation_to!(
                self.violation_observer,
                tick = self.current_tick,
                ViolationSeverity::Warning,
                ViolationKind::ResetCycle,
                "Side {} is already frozen; reset ignored",
                side
            );
            return Ok(());
        }
        if !side_state.is_local {
            side_state.positions = None;
        }
        debug!("Side {} frozen for {:?}", side, grace);
        self.push_event(GameEvent::Frozen { side });
        self.refresh_state();
        if announce {
            let message = if side == self.local_side {
                Message::Resetting
            } else {
                Message::Reset
            };
            self.send(&message)?;
        }
        Ok(())
    }

    fn expire_resets(&mut self, now: Instant) {
        let mut resumed: SmallVec<[SideId; 4]> = SmallVec::new();
        for (&side, side_state) in &mut self.registry.sides {
            if side_state.reset.poll_expired(now) {
                resumed.push(side);
            }
        }
        for side in resumed {
            for ((_, owner), tracker) in &mut self.trackers {
                if *owner == side {
                    tracker.clear();
                }
            }
            if side == self.local_side {
                self.source.reacquire();
            }
            debug!("Side {} resumed on tick {}", side, self.current_tick);
            self.push_event(GameEvent::Resumed { side });
        }
        self.refresh_state();
    }

    fn refresh_state(&mut self) {
        if matches!(self.state, GameState::Playing | GameState::Resetting) {
            self.state = if self.registry.is_frozen(self.local_side) {
                GameState::Resetting
            } else {
                GameState::Playing
            };
        }
    }

    // #############
    // #    END    #
    // #############

    fn check_win(&mut self) -> Result<(), CtfError> {
        let Some(winner) = self.registry.winner() else {
            return Ok(());
        };
        match self.role {
            Role::Authority => {
                let sent = self.send(&Message::Exit { winner });
                self.finish(Some(winner));
                sent
            }
            Role::Participant => {
                if !self.win_observed {
                    self.win_observed = true;
                    debug!("Side {} reached the target; waiting for Exit", winner);
                    self.push_event(GameEvent::WinObserved { side: winner });
                }
                Ok(())
            }
        }
    }

    fn finish(&mut self, winner: Option<SideId>) {
        if self.state == GameState::Finished {
            return;
        }
        self.state = GameState::Finished;
        self.winner = winner;
        self.shutdown();
        match winner {
            Some(side) => debug!("Game over on tick {}: side {} wins", self.current_tick, side),
            None => debug!("Game aborted on tick {}", self.current_tick),
        }
        self.push_event(GameEvent::Finished { winner });
    }

    /// Stops the controller and closes the transport, each at most once.
    fn shutdown(&mut self) {
        if self.controller_running {
            self.controller.stop();
            self.controller_running = false;
        }
        if !self.transport_closed {
            self.transport.close();
            self.transport_closed = true;
        }
    }

    // #############
    // #  NETWORK  #
    // #############

    fn send(&mut self, message: &Message) -> Result<(), CtfError> {
        trace!("Sending {}", message.name());
        self.transport.send(&encode(message))
    }

    /// The authority may have sent `Exit` and hung up before our write. Reads what it left
    /// behind so the game still ends with its winner; otherwise returns `err`.
    fn salvage_exit(&mut self, err: CtfError) -> Result<(), CtfError> {
        if err.is_fatal() {
            if let Err(read_err) = self.drain_inbound() {
                trace!("Nothing left to read after failed send: {}", read_err);
            }
            if self.state == GameState::Finished {
                return Ok(());
            }
        }
        Err(err)
    }

    fn drain_inbound(&mut self) -> Result<(), CtfError> {
        loop {
            let bytes = match self.transport.try_receive()? {
                Received::Data(bytes) => bytes,
                Received::Empty => return Ok(()),
            };
            for decoded in self.decoder.feed(&bytes) {
                if self.state == GameState::Finished {
                    return Ok(());
                }
                match decoded {
                    Ok(message) => self.handle_message(message),
                    Err(err) => report_violation_to!(
                        self.violation_observer,
                        tick = self.current_tick,
                        ViolationSeverity::Warning,
                        ViolationKind::WireDecode,
                        "Dropped undecodable line: {}",
                        err
                    ),
                }
            }
            if self.state == GameState::Finished {
                return Ok(());
            }
        }
    }

    fn handle_message(&mut self, message: Message) {
        trace!("Received {}", message.name());
        if self.role == Role::Authority && message.is_authority_only() {
            report_violation_to!(
                self.violation_observer,
                tick = self.current_tick,
                ViolationSeverity::Warning,
                ViolationKind::NetworkProtocol,
                "Ignoring {} sent by the participant",
                message.name()
            );
            return;
        }

        match message {
            Message::SetCount(count) => {
                if self.state == GameState::Setup {
                    debug!("Adopting token count {}", count);
                    self.token_count = Some(usize::from(count));
                } else {
                    self.report_out_of_phase("SetCount");
                }
            }
            Message::Start => {
                if self.state != GameState::Setup {
                    self.report_out_of_phase("Start");
                } else {
                    if self.token_count.is_none() {
                        report_violation_to!(
                            self.violation_observer,
                            tick = self.current_tick,
                            ViolationSeverity::Warning,
                            ViolationKind::NetworkProtocol,
                            "Start arrived before SetCount; waiting for the token count"
                        );
                    }
                    self.start_seen = true;
                }
            }
            Message::Coordinates { side, positions } => {
                let role = self.role;
                match self.registry.get_mut(side) {
                    // Read by the participant before it learned of its own reset.
                    Some(side_state)
                        if !side_state.is_local
                            && role == Role::Authority
                            && side_state.reset.is_frozen() =>
                    {
                        trace!("Dropping coordinates of frozen side {}", side);
                    }
                    Some(side_state) if !side_state.is_local => {
                        side_state.positions = Some(positions);
                    }
                    _ => self.report_foreign_side("Coordinates", side),
                }
            }
            Message::Origin { side, origin } => {
                let extent = self.config.boundary_extent;
                match self.registry.get_mut(side) {
                    Some(side_state) if !side_state.is_local => {
                        debug!("Base of side {} at {:?}", side, origin);
                        side_state.boundary = Some(Boundary::new(origin, extent));
                    }
                    _ => self.report_foreign_side("Origin", side),
                }
            }
            Message::Reset => {
                if self.state == GameState::Setup {
                    self.report_out_of_phase("Reset");
                } else {
                    self.requested_freezes.push(self.local_side);
                }
            }
            Message::Resetting => {
                if self.state == GameState::Setup {
                    self.report_out_of_phase("Resetting");
                } else {
                    self.requested_freezes.push(self.peer_side);
                }
            }
            Message::Exit { winner } => {
                debug!("Authority declared side {} the winner", winner);
                self.finish(Some(winner));
            }
        }
    }

    fn report_out_of_phase(&self, name: &str) {
        report_violation_to!(
            self.violation_observer,
            tick = self.current_tick,
            ViolationSeverity::Warning,
            ViolationKind::NetworkProtocol,
            "Ignoring {} received in state {:?}",
            name,
            self.state
        );
    }

    fn report_foreign_side(&self, name: &str, side: SideId) {
        report_violation_to!(
            self.violation_observer,
            tick = self.current_tick,
            ViolationSeverity::Warning,
            ViolationKind::NetworkProtocol,
            "Ignoring {} for side {}, which the peer does not play",
            name,
            side
        );
    }

    fn push_event(&mut self, event: GameEvent) {
        self.event_queue.push_back(event);
        while self.event_queue.len() > self.max_events {
            self.event_queue.pop_front();
        }
    }
}

impl InvariantChecker for GameSession {
    fn check_invariants(&self) -> Result<(), InvariantViolation> {
        self.registry.check_invariants()?;
        if let Some(token_count) = self.token_count {
            if let Some(((capturer, owner), tracker)) = self
                .trackers
                .iter()
                .find(|(_, tracker)| tracker.token_count() != token_count)
            {
                return Err(InvariantViolation::new(
                    "GameSession",
                    "every capture tracker must match the token count",
                )
                .with_details(format!(
                    "capturer={capturer}, owner={owner}, tracker={}, expected={token_count}",
                    tracker.token_count()
                )));
            }
        }
        if self.state == GameState::Finished && !self.transport_closed {
            return Err(InvariantViolation::new(
                "GameSession",
                "a finished session must have closed its transport",
            ));
        }
        Ok(())
    }
}

impl Drop for GameSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::geometry::TokenPositions;
    use crate::network::codec::decode;
    use crate::network::memory_transport::{LinkProbe, MemoryTransport};
    use crate::telemetry::CollectingObserver;
    use crate::NoopInputController;
    use smallvec::smallvec;

    struct FixedSource {
        origin: Position,
        positions: TokenPositions,
    }

    impl PositionSource for FixedSource {
        fn origin(&mut self) -> Result<Position, CtfError> {
            Ok(self.origin)
        }

        fn positions(&mut self) -> Result<TokenPositions, CtfError> {
            Ok(self.positions.clone())
        }
    }

    fn far_away(token_count: usize) -> FixedSource {
        FixedSource {
            origin: Position::new(0.0, 0.0),
            positions: (0..token_count)
                .map(|_| Position::new(5_000.0, 5_000.0))
                .collect(),
        }
    }

    fn authority(
        token_count: usize,
        observer: Option<Arc<dyn ViolationObserver>>,
    ) -> (GameSession, MemoryTransport, LinkProbe) {
        let (local, remote) = MemoryTransport::pair();
        let probe = local.probe();
        let session = GameSession::new(
            Role::Authority,
            SideId::AUTHORITY,
            SideId::PARTICIPANT,
            GameConfig {
                token_count,
                ..GameConfig::default()
            },
            TimerConfig::immediate(),
            Box::new(local),
            Box::new(far_away(token_count)),
            Box::new(NoopInputController),
            observer,
            DEFAULT_MAX_EVENT_QUEUE_SIZE,
        )
        .unwrap();
        (session, remote, probe)
    }

    fn read_messages(remote: &mut MemoryTransport) -> Vec<Message> {
        let mut bytes = Vec::new();
        while let Received::Data(chunk) = remote.try_receive().unwrap() {
            bytes.extend(chunk);
        }
        decode(&bytes).into_iter().map(Result::unwrap).collect()
    }

    #[test]
    fn authority_announces_count_then_start() {
        let (mut session, mut remote, _probe) = authority(2, None);
        let now = Instant::now();
        session.tick(now).unwrap();
        let messages = read_messages(&mut remote);
        assert_eq!(messages[0], Message::SetCount(2));
        assert_eq!(messages[1], Message::Start);
        assert!(matches!(messages[2], Message::Origin { side, .. } if side == SideId::AUTHORITY));
        assert_eq!(session.state(), GameState::Playing);
        assert_eq!(
            session.events().collect::<Vec<_>>(),
            vec![GameEvent::Started {
                token_count: 2,
                local_side: SideId::AUTHORITY
            }]
        );
    }

    #[test]
    fn missing_peer_data_is_reported_once() {
        let collector = Arc::new(CollectingObserver::new());
        let (mut session, _remote, _probe) = authority(1, Some(collector.clone()));
        let now = Instant::now();
        for _ in 0..5 {
            session.tick(now).unwrap();
        }
        assert_eq!(collector.violations_of_kind(ViolationKind::Consistency).len(), 1);
        assert_eq!(session.score(SideId::AUTHORITY), Some(0));
    }

    #[test]
    fn participant_messages_rejected_by_authority() {
        let collector = Arc::new(CollectingObserver::new());
        let (mut session, _remote, probe) = authority(1, Some(collector.clone()));
        probe.inject(b"Exit 2\n");
        session.tick(Instant::now()).unwrap();
        assert_ne!(session.state(), GameState::Finished);
        assert!(collector.has_violation(ViolationKind::NetworkProtocol));
    }

    #[test]
    fn finished_session_ignores_ticks_and_closes_once() {
        let (mut session, _remote, probe) = authority(1, None);
        session.tick(Instant::now()).unwrap();
        session.abort();
        assert_eq!(session.state(), GameState::Finished);
        let tick = session.current_tick();
        session.tick(Instant::now()).unwrap();
        assert_eq!(session.current_tick(), tick);
        drop(session);
        assert_eq!(probe.close_calls(), 1);
    }

    #[test]
    fn transport_failure_finishes_without_winner() {
        let (mut session, _remote, probe) = authority(1, None);
        session.tick(Instant::now()).unwrap();
        probe.sever();
        let err = session.tick(Instant::now()).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(session.state(), GameState::Finished);
        assert!(session
            .events()
            .any(|event| event == GameEvent::Finished { winner: None }));
    }

    #[test]
    fn event_queue_is_bounded() {
        let (mut session, _remote, _probe) = authority(1, None);
        for side in 0..250_u8 {
            session.push_event(GameEvent::Resumed {
                side: SideId::new(side),
            });
        }
        let events: Vec<_> = session.events().collect();
        assert_eq!(events.len(), DEFAULT_MAX_EVENT_QUEUE_SIZE);
        assert_eq!(
            events[0],
            GameEvent::Resumed {
                side: SideId::new(150)
            }
        );
    }

    #[test]
    fn invariants_hold_after_setup() {
        let (mut session, _remote, _probe) = authority(3, None);
        session.tick(Instant::now()).unwrap();
        assert!(session.check_invariants().is_ok());
        assert_eq!(session.trackers.len(), 2);
    }

    #[test]
    fn missing_tracker_is_an_internal_error() {
        let collector = Arc::new(CollectingObserver::new());
        let (mut session, _remote, probe) = authority(1, Some(collector.clone()));
        let now = Instant::now();
        session.tick(now).unwrap();
        session.trackers.clear();
        probe.inject(b"Origin S2 1000.0 1000.0\nS2 5000.0 5000.0\n");
        session.tick(now).unwrap();
        let internal = collector.violations_of_kind(ViolationKind::InternalError);
        assert_eq!(internal.len(), 2);
        assert!(internal
            .iter()
            .all(|violation| violation.severity == ViolationSeverity::Critical));
        assert_eq!(session.score(SideId::AUTHORITY), Some(0));
    }

    #[test]
    fn planar_base_with_three_axes_is_a_configuration_error() {
        let collector = Arc::new(CollectingObserver::new());
        let (local, _remote) = MemoryTransport::pair();
        let mut session = GameSession::new(
            Role::Authority,
            SideId::AUTHORITY,
            SideId::PARTICIPANT,
            GameConfig {
                token_count: 1,
                axes: Axes::XYZ,
                ..GameConfig::default()
            },
            TimerConfig::immediate(),
            Box::new(local),
            Box::new(far_away(1)),
            Box::new(NoopInputController),
            Some(collector.clone()),
            DEFAULT_MAX_EVENT_QUEUE_SIZE,
        )
        .unwrap();
        session.tick(Instant::now()).unwrap();
        assert_eq!(session.state(), GameState::Playing);
        let configuration = collector.violations_of_kind(ViolationKind::Configuration);
        assert_eq!(configuration.len(), 1);
        assert_eq!(configuration[0].severity, ViolationSeverity::Error);
    }

    #[test]
    fn planar_games_never_send_z() {
        let (local, mut remote) = MemoryTransport::pair();
        let source = FixedSource {
            origin: Position::with_z(0.0, 0.0, 40.0),
            positions: smallvec![Position::with_z(5_000.0, 5_000.0, 12.0)],
        };
        let mut session = GameSession::new(
            Role::Authority,
            SideId::AUTHORITY,
            SideId::PARTICIPANT,
            GameConfig {
                token_count: 1,
                ..GameConfig::default()
            },
            TimerConfig::immediate(),
            Box::new(local),
            Box::new(source),
            Box::new(NoopInputController),
            None,
            DEFAULT_MAX_EVENT_QUEUE_SIZE,
        )
        .unwrap();
        let now = Instant::now();
        session.tick(now).unwrap();
        session.tick(now).unwrap();
        let messages = read_messages(&mut remote);
        assert!(messages.contains(&Message::Origin {
            side: SideId::AUTHORITY,
            origin: Position::new(0.0, 0.0),
        }));
        assert!(messages.contains(&Message::Coordinates {
            side: SideId::AUTHORITY,
            positions: smallvec![Position::new(5_000.0, 5_000.0)],
        }));
    }

    #[test]
    fn local_positions_are_sent_every_tick() {
        let (mut session, mut remote, _probe) = authority(1, None);
        let now = Instant::now();
        session.tick(now).unwrap();
        read_messages(&mut remote);
        session.tick(now).unwrap();
        let expected: TokenPositions = smallvec![Position::new(5_000.0, 5_000.0)];
        assert_eq!(
            read_messages(&mut remote),
            vec![Message::Coordinates {
                side: SideId::AUTHORITY,
                positions: expected
            }]
        );
    }
}
