//! Reset handshakes: who freezes, for how long, and what happens afterwards.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use std::sync::Arc;

use crate::common::{scores, Game, GameOptions, IN_AUTHORITY_BASE, IN_PARTICIPANT_BASE};
use flagline::telemetry::{CollectingObserver, ViolationKind};
use flagline::{GameEvent, GameState, SideId, TimerConfig};
use web_time::Duration;

const RESET_GRACE: Duration = Duration::from_secs(5);

fn reset_options() -> GameOptions {
    GameOptions {
        token_count: 2,
        target_score: 10,
        timers: TimerConfig {
            setup_grace: Duration::ZERO,
            reset_grace: RESET_GRACE,
        },
        ..GameOptions::default()
    }
}

fn cycles(game: &Game, side: SideId) -> u32 {
    game.authority.sides().get(side).unwrap().reset.cycles()
}

#[test]
fn capturing_every_participant_token_resets_the_participant() {
    let mut game = Game::start(reset_options());
    game.play();
    game.clear_events();

    game.participant_table.place(0, IN_AUTHORITY_BASE);
    game.participant_table.place(1, IN_AUTHORITY_BASE);
    game.rounds(2);

    assert_eq!(scores(&game.authority), (2, 0));
    assert_eq!(scores(&game.participant), (2, 0));
    assert!(game.authority.is_frozen(SideId::PARTICIPANT));
    assert!(game.participant.is_frozen(SideId::PARTICIPANT));
    assert_eq!(game.authority.state(), GameState::Playing);
    assert_eq!(game.participant.state(), GameState::Resetting);
    assert!(game.authority_events.contains(&GameEvent::Frozen {
        side: SideId::PARTICIPANT
    }));
    assert!(game.participant_events.contains(&GameEvent::Frozen {
        side: SideId::PARTICIPANT
    }));

    // Players re-hide their tokens while frozen. Nothing is scored in the meantime.
    game.participant_table.park_all();
    game.rounds(3);
    game.participant_table.place(0, IN_AUTHORITY_BASE);
    game.rounds(1);
    game.participant_table.park_all();
    game.rounds(2);
    assert_eq!(scores(&game.authority), (2, 0));
    assert_eq!(game.participant.state(), GameState::Resetting);

    game.advance(RESET_GRACE);
    game.rounds(1);
    assert!(!game.authority.is_frozen(SideId::PARTICIPANT));
    assert_eq!(game.participant.state(), GameState::Playing);
    assert_eq!(game.participant_table.reacquired(), 1);
    assert_eq!(game.authority_table.reacquired(), 0);
    assert!(game.participant_events.contains(&GameEvent::Resumed {
        side: SideId::PARTICIPANT
    }));

    game.rounds(2);
    assert_eq!(scores(&game.authority), (2, 0));
}

#[test]
fn scores_agree_when_tokens_move_during_a_reset() {
    let mut game = Game::start(reset_options());
    game.play();

    // The participant scores its own tokens one round before the authority sees them.
    game.participant_table.place(0, IN_AUTHORITY_BASE);
    game.rounds(1);
    game.participant_table.park_all();
    game.rounds(1);
    game.participant_table.place(0, IN_AUTHORITY_BASE);
    game.rounds(1);
    // The authority resets the participant this round, after the second token moved in.
    game.participant_table.place(1, IN_AUTHORITY_BASE);
    game.rounds(1);

    assert!(game.authority.is_frozen(SideId::PARTICIPANT));
    assert!(game.participant.is_frozen(SideId::PARTICIPANT));
    game.rounds(2);
    assert_eq!(scores(&game.authority), (2, 0));
    assert_eq!(scores(&game.participant), (2, 0));

    game.participant_table.park_all();
    game.advance(RESET_GRACE);
    game.rounds(1);
    assert_eq!(game.participant.state(), GameState::Playing);
    assert!(!game.authority.is_frozen(SideId::PARTICIPANT));

    game.participant_table.place(0, IN_AUTHORITY_BASE);
    game.rounds(2);
    assert_eq!(scores(&game.authority), (3, 0));
    assert_eq!(scores(&game.participant), (3, 0));
    assert_eq!(cycles(&game, SideId::PARTICIPANT), 1);
}

#[test]
fn frozen_participant_stops_reporting_positions() {
    let observer = Arc::new(CollectingObserver::new());
    let mut game = Game::start(GameOptions {
        authority_observer: Some(observer.clone()),
        ..reset_options()
    });
    game.play();

    game.participant_table.place(0, IN_AUTHORITY_BASE);
    game.participant_table.place(1, IN_AUTHORITY_BASE);
    game.rounds(2);
    assert!(game.participant.is_frozen(SideId::PARTICIPANT));

    game.participant_table.park_all();
    game.rounds(1);
    let skipped = observer.violations_of_kind(ViolationKind::Consistency).len();
    game.advance(RESET_GRACE);
    game.rounds(1);
    // The authority resumed first and has not heard from the participant yet.
    assert!(game
        .authority
        .sides()
        .get(SideId::PARTICIPANT)
        .unwrap()
        .positions
        .is_none());
    game.rounds(1);
    assert!(game
        .authority
        .sides()
        .get(SideId::PARTICIPANT)
        .unwrap()
        .positions
        .is_some());
    assert_eq!(
        observer.violations_of_kind(ViolationKind::Consistency).len(),
        skipped
    );
}

#[test]
fn second_full_capture_starts_another_cycle() {
    let mut game = Game::start(reset_options());
    game.play();

    game.participant_table.place(0, IN_AUTHORITY_BASE);
    game.participant_table.place(1, IN_AUTHORITY_BASE);
    game.rounds(2);
    game.participant_table.park_all();
    game.rounds(1);
    game.advance(RESET_GRACE);
    game.rounds(2);
    assert_eq!(cycles(&game, SideId::PARTICIPANT), 1);

    game.participant_table.place(0, IN_AUTHORITY_BASE);
    game.participant_table.place(1, IN_AUTHORITY_BASE);
    game.rounds(2);
    assert_eq!(scores(&game.authority), (4, 0));
    assert_eq!(scores(&game.participant), (4, 0));
    assert_eq!(cycles(&game, SideId::PARTICIPANT), 2);
    assert_eq!(game.participant.state(), GameState::Resetting);
}

#[test]
fn authority_resets_itself_and_announces_it() {
    let mut game = Game::start(reset_options());
    game.play();
    game.clear_events();

    game.authority_table.place(0, IN_PARTICIPANT_BASE);
    game.authority_table.place(1, IN_PARTICIPANT_BASE);
    game.rounds(1);

    assert_eq!(game.authority.state(), GameState::Resetting);
    assert!(game.participant.is_frozen(SideId::AUTHORITY));
    assert_eq!(game.participant.state(), GameState::Playing);
    assert_eq!(scores(&game.authority), (0, 2));
    assert_eq!(scores(&game.participant), (0, 2));

    game.authority_table.park_all();
    game.advance(RESET_GRACE);
    game.rounds(1);
    assert_eq!(game.authority.state(), GameState::Playing);
    assert!(!game.participant.is_frozen(SideId::AUTHORITY));
    assert_eq!(game.authority_table.reacquired(), 1);
    assert_eq!(game.participant_table.reacquired(), 0);
}

#[test]
fn partial_capture_does_not_reset() {
    let mut game = Game::start(GameOptions {
        token_count: 3,
        ..reset_options()
    });
    game.play();
    game.participant_table.place(0, IN_AUTHORITY_BASE);
    game.participant_table.place(1, IN_AUTHORITY_BASE);
    game.rounds(3);

    assert_eq!(scores(&game.authority), (2, 0));
    assert!(!game.authority.is_frozen(SideId::PARTICIPANT));
    assert_eq!(game.participant.state(), GameState::Playing);
}

#[test]
fn repeated_reset_request_is_ignored() {
    let observer = Arc::new(CollectingObserver::new());
    let mut game = Game::start(GameOptions {
        participant_observer: Some(observer.clone()),
        ..reset_options()
    });
    game.play();

    game.participant_link.inject(b"Reset\nReset\n");
    game.rounds(1);

    assert_eq!(game.participant.state(), GameState::Resetting);
    assert_eq!(
        game.participant
            .sides()
            .get(SideId::PARTICIPANT)
            .unwrap()
            .reset
            .cycles(),
        1
    );
    assert_eq!(observer.violations_of_kind(ViolationKind::ResetCycle).len(), 1);
}

#[test]
fn authority_ignores_reset_from_participant() {
    let observer = Arc::new(CollectingObserver::new());
    let mut game = Game::start(GameOptions {
        authority_observer: Some(observer.clone()),
        ..reset_options()
    });
    game.play();

    game.authority_link.inject(b"Reset\nResetting\n");
    game.rounds(1);

    assert_eq!(game.authority.state(), GameState::Playing);
    assert!(!game.authority.is_frozen(SideId::AUTHORITY));
    assert!(!game.authority.is_frozen(SideId::PARTICIPANT));
    assert_eq!(
        observer
            .violations_of_kind(ViolationKind::NetworkProtocol)
            .len(),
        2
    );
}
