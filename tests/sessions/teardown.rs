//! Garbage on the wire, dropped links and shutting sessions down.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use std::sync::Arc;

use crate::common::{
    init_tracing, scores, ControllerCall, Game, GameOptions, Table, IN_AUTHORITY_BASE,
    PARTICIPANT_BASE,
};
use flagline::telemetry::{CollectingObserver, ViolationKind};
use flagline::{
    CtfError, GameEvent, GameState, MemoryTransport, SessionBuilder, SideId, TimerConfig,
};
use web_time::Instant;

#[test]
fn undecodable_lines_are_dropped_and_play_continues() {
    let observer = Arc::new(CollectingObserver::new());
    let mut game = Game::start(GameOptions {
        authority_observer: Some(observer.clone()),
        ..GameOptions::default()
    });
    game.play();

    game.authority_link.inject(b"Bogus 1 2\nS2 1.0\n");
    game.rounds(1);
    let decode_errors = observer.violations_of_kind(ViolationKind::WireDecode);
    assert_eq!(decode_errors.len(), 2);
    assert!(decode_errors.iter().all(|violation| violation.tick.is_some()));
    assert_eq!(game.authority.state(), GameState::Playing);

    game.participant_table.place(0, IN_AUTHORITY_BASE);
    game.rounds(2);
    assert_eq!(scores(&game.authority), (1, 0));
}

#[test]
fn exit_closes_both_transports_exactly_once() {
    let mut game = Game::start(GameOptions {
        token_count: 1,
        target_score: 1,
        ..GameOptions::default()
    });
    game.play();
    game.participant_table.place(0, IN_AUTHORITY_BASE);
    game.rounds(2);
    assert_eq!(game.authority.state(), GameState::Finished);
    assert_eq!(game.participant.state(), GameState::Finished);

    // Ticking a finished session is a no-op.
    game.rounds(3);

    let Game {
        authority,
        participant,
        authority_link,
        participant_link,
        ..
    } = game;
    drop(authority);
    drop(participant);
    assert_eq!(authority_link.close_calls(), 1);
    assert_eq!(participant_link.close_calls(), 1);
}

#[test]
fn dropped_link_finishes_both_sides_without_winner() {
    let mut game = Game::start(GameOptions::default());
    game.play();
    game.clear_events();

    game.authority_link.sever();
    let (authority, participant) = game.round();

    assert!(matches!(authority, Err(CtfError::Transport { .. })));
    assert!(matches!(participant, Err(CtfError::Transport { .. })));
    assert_eq!(game.authority.state(), GameState::Finished);
    assert_eq!(game.participant.state(), GameState::Finished);
    assert_eq!(game.authority.winner(), None);
    assert!(game
        .authority_events
        .contains(&GameEvent::Finished { winner: None }));
    assert!(game
        .participant_events
        .contains(&GameEvent::Finished { winner: None }));
    assert_eq!(game.authority_link.close_calls(), 1);
    assert_eq!(
        game.participant_controller.calls(),
        vec![ControllerCall::Start, ControllerCall::Stop]
    );

    let (authority, participant) = game.round();
    assert!(authority.is_ok());
    assert!(participant.is_ok());
}

#[test]
fn abort_is_seen_by_the_peer_as_a_dropped_link() {
    let mut game = Game::start(GameOptions::default());
    game.play();

    game.authority.abort();
    assert_eq!(game.authority.state(), GameState::Finished);
    let (_, participant) = game.round();
    assert!(participant.unwrap_err().is_fatal());
    assert_eq!(game.participant.state(), GameState::Finished);
    assert_eq!(game.participant.winner(), None);
}

#[test]
fn dropping_a_running_session_closes_its_transport() {
    let mut game = Game::start(GameOptions::default());
    game.play();
    let Game {
        authority,
        authority_link,
        authority_controller,
        ..
    } = game;
    drop(authority);
    assert_eq!(authority_link.close_calls(), 1);
    assert_eq!(
        authority_controller.calls(),
        vec![ControllerCall::Start, ControllerCall::Stop]
    );
}

#[test]
fn start_before_count_waits_for_count() {
    init_tracing();
    let observer = Arc::new(CollectingObserver::new());
    let (local, _remote) = MemoryTransport::pair();
    let link = local.probe();
    let mut participant = SessionBuilder::new()
        .with_timer_config(TimerConfig::immediate())
        .with_violation_observer(observer.clone())
        .start_participant_session(local, Table::new(PARTICIPANT_BASE, 2))
        .unwrap();

    link.inject(b"Start\n");
    participant.tick(Instant::now()).unwrap();
    assert_eq!(participant.state(), GameState::Setup);
    assert!(observer.has_violation(ViolationKind::NetworkProtocol));

    link.inject(b"2\n");
    participant.tick(Instant::now()).unwrap();
    assert_eq!(participant.state(), GameState::Playing);
    assert_eq!(participant.token_count(), Some(2));
    assert!(participant.events().any(|event| event
        == GameEvent::Started {
            token_count: 2,
            local_side: SideId::PARTICIPANT
        }));
}

#[test]
fn token_count_mismatch_skips_scoring() {
    let observer = Arc::new(CollectingObserver::new());
    let mut game = Game::start(GameOptions {
        authority_observer: Some(observer.clone()),
        ..GameOptions::default()
    });
    game.play();
    observer.clear();

    game.participant_table
        .set_tokens([IN_AUTHORITY_BASE; 2].into_iter().collect());
    game.rounds(3);
    assert_eq!(scores(&game.authority), (0, 0));
    assert_eq!(
        observer.violations_of_kind(ViolationKind::Consistency).len(),
        1
    );
    assert_eq!(game.authority.state(), GameState::Playing);
}
