//! Two sessions talking over a loopback TCP connection.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use std::net::TcpListener;
use std::thread;

use crate::common::{
    init_tracing, Table, AUTHORITY_BASE, IN_AUTHORITY_BASE, PARTICIPANT_BASE,
};
use flagline::{GameSession, GameState, SessionBuilder, SideId, TcpTransport, TimerConfig};
use serial_test::serial;
use web_time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(5);
const MAX_POLLS: usize = 400;

/// Ticks both sessions with the wall clock until `done` holds or the poll budget runs out.
fn tick_until(
    authority: &mut GameSession,
    participant: &mut GameSession,
    mut done: impl FnMut(&GameSession, &GameSession) -> bool,
) -> bool {
    for _ in 0..MAX_POLLS {
        let now = Instant::now();
        // A tick may fail once the other end hangs up; `done` decides what counts.
        let _ = authority.tick(now);
        let _ = participant.tick(now);
        if done(authority, participant) {
            return true;
        }
        thread::sleep(POLL_INTERVAL);
    }
    false
}

#[test]
#[serial]
#[cfg(not(miri))]
fn full_game_over_tcp() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let participant_end = TcpTransport::connect(addr).unwrap();
    let authority_end = TcpTransport::accept_one(&listener).unwrap();

    let authority_table = Table::new(AUTHORITY_BASE, 2);
    let participant_table = Table::new(PARTICIPANT_BASE, 2);
    let mut authority = SessionBuilder::new()
        .with_token_count(2)
        .unwrap()
        .with_target_score(1)
        .unwrap()
        .with_timer_config(TimerConfig::immediate())
        .start_authority_session(authority_end, authority_table)
        .unwrap();
    let mut participant = SessionBuilder::new()
        .with_target_score(1)
        .unwrap()
        .with_timer_config(TimerConfig::immediate())
        .start_participant_session(participant_end, participant_table.clone())
        .unwrap();

    let started = tick_until(&mut authority, &mut participant, |a, p| {
        a.state() == GameState::Playing
            && p.state() == GameState::Playing
            && a.sides().get(SideId::PARTICIPANT).is_some_and(|s| s.boundary.is_some())
    });
    assert!(started, "sessions never started playing");
    assert_eq!(participant.token_count(), Some(2));

    participant_table.place(1, IN_AUTHORITY_BASE);
    let finished = tick_until(&mut authority, &mut participant, |a, p| {
        a.state() == GameState::Finished && p.state() == GameState::Finished
    });
    assert!(finished, "game never finished");
    assert_eq!(authority.winner(), Some(SideId::AUTHORITY));
    assert_eq!(participant.winner(), Some(SideId::AUTHORITY));
}

#[test]
#[serial]
#[cfg(not(miri))]
fn peer_disconnect_aborts_the_game() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let participant_end = TcpTransport::connect(addr).unwrap();
    let authority_end = TcpTransport::accept_one(&listener).unwrap();

    let mut authority = SessionBuilder::new()
        .with_timer_config(TimerConfig::immediate())
        .start_authority_session(authority_end, Table::new(AUTHORITY_BASE, 3))
        .unwrap();
    let participant = SessionBuilder::new()
        .with_timer_config(TimerConfig::immediate())
        .start_participant_session(participant_end, Table::new(PARTICIPANT_BASE, 3))
        .unwrap();
    drop(participant);

    let mut outcome = Ok(());
    for _ in 0..MAX_POLLS {
        outcome = authority.tick(Instant::now());
        if outcome.is_err() {
            break;
        }
        thread::sleep(POLL_INTERVAL);
    }
    assert!(outcome.unwrap_err().is_fatal());
    assert_eq!(authority.state(), GameState::Finished);
    assert_eq!(authority.winner(), None);
}
