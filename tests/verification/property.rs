//! Property-based tests for the building blocks of a game.
//!
//! # Properties Tested
//!
//! - Containment is the conjunction of the per-axis range checks
//! - Capture detection yields exactly one event per changed token, in token order
//! - A ledger's score never decreases and never exceeds its target
//! - The win is visible on the very batch that reaches the target
//! - A token bouncing in and out scores once per entry
//! - Coordinates survive the wire unchanged, with or without z
//! - Chunking a byte stream at arbitrary points does not change what is decoded

// Allow test-specific patterns that are appropriate for test code
#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use flagline::telemetry::InvariantChecker;
use flagline::{
    contains, decode, detect, encode, Axes, Boundary, CaptureDirection, CaptureEvent,
    CaptureTracker, Message, MessageDecoder, Position, ScoreLedger, SideId, TokenPositions,
    MAX_TOKENS,
};
use proptest::prelude::*;

// ============================================================================
// Strategies
// ============================================================================

fn coordinate() -> impl Strategy<Value = f64> {
    -10_000.0..10_000.0_f64
}

fn position() -> impl Strategy<Value = Position> {
    (coordinate(), coordinate()).prop_map(|(x, y)| Position::new(x, y))
}

fn raised_position() -> impl Strategy<Value = Position> {
    (coordinate(), coordinate(), coordinate()).prop_map(|(x, y, z)| Position::with_z(x, y, z))
}

fn token_positions() -> impl Strategy<Value = TokenPositions> {
    prop::collection::vec(position(), 0..=MAX_TOKENS)
        .prop_map(|positions| positions.into_iter().collect())
}

fn raised_token_positions() -> impl Strategy<Value = TokenPositions> {
    prop::collection::vec(raised_position(), 1..=MAX_TOKENS)
        .prop_map(|positions| positions.into_iter().collect())
}

fn status_pair() -> impl Strategy<Value = (Vec<bool>, Vec<bool>)> {
    (0..=MAX_TOKENS).prop_flat_map(|len| {
        (
            prop::collection::vec(any::<bool>(), len),
            prop::collection::vec(any::<bool>(), len),
        )
    })
}

fn capture_event() -> impl Strategy<Value = CaptureEvent> {
    (0..MAX_TOKENS, any::<bool>()).prop_map(|(token, entered)| CaptureEvent {
        token,
        direction: if entered {
            CaptureDirection::Entered
        } else {
            CaptureDirection::Left
        },
    })
}

fn message() -> impl Strategy<Value = Message> {
    prop_oneof![
        Just(Message::Start),
        Just(Message::Reset),
        Just(Message::Resetting),
        (0..=MAX_TOKENS as u8).prop_map(Message::SetCount),
        (1..=3_u8).prop_map(|side| Message::Exit {
            winner: SideId::new(side)
        }),
        (1..=3_u8, token_positions()).prop_map(|(side, positions)| Message::Coordinates {
            side: SideId::new(side),
            positions
        }),
        (1..=3_u8, raised_token_positions()).prop_map(|(side, positions)| {
            Message::Coordinates {
                side: SideId::new(side),
                positions,
            }
        }),
        (1..=3_u8, prop_oneof![position(), raised_position()]).prop_map(|(side, origin)| {
            Message::Origin {
                side: SideId::new(side),
                origin,
            }
        }),
    ]
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn containment_requires_every_axis(
        position in position(),
        origin in position(),
        extent in 1.0..2_000.0_f64,
    ) {
        let boundary = Boundary::new(origin, extent);
        let in_x = position.x >= origin.x && position.x <= origin.x + extent;
        let in_y = position.y >= origin.y && position.y <= origin.y + extent;
        prop_assert_eq!(contains(&position, &boundary, Axes::XY), in_x && in_y);
    }

    #[test]
    fn planar_positions_ignore_the_z_axis(
        position in position(),
        origin in position(),
        extent in 1.0..2_000.0_f64,
    ) {
        let boundary = Boundary::new(origin, extent);
        prop_assert_eq!(
            contains(&position, &boundary, Axes::XYZ),
            contains(&position, &boundary, Axes::XY)
        );
    }

    #[test]
    fn raised_positions_are_tested_on_every_axis(
        position in raised_position(),
        origin in raised_position(),
        extent in 1.0..2_000.0_f64,
    ) {
        let boundary = Boundary::new(origin, extent);
        let (z, origin_z) = (position.z.unwrap(), origin.z.unwrap());
        let in_z = z >= origin_z && z <= origin_z + extent;
        prop_assert_eq!(
            contains(&position, &boundary, Axes::XYZ),
            contains(&position, &boundary, Axes::XY) && in_z
        );
    }

    #[test]
    fn one_event_per_changed_token((previous, current) in status_pair()) {
        let events = detect(&previous, &current).unwrap();
        let changed: Vec<usize> = (0..previous.len())
            .filter(|&i| previous[i] != current[i])
            .collect();
        prop_assert_eq!(events.iter().map(|e| e.token).collect::<Vec<_>>(), changed);
        for event in &events {
            let expected = if current[event.token] {
                CaptureDirection::Entered
            } else {
                CaptureDirection::Left
            };
            prop_assert_eq!(event.direction, expected);
        }
    }

    #[test]
    fn tracker_replays_to_the_same_total(
        steps in prop::collection::vec(prop::collection::vec(any::<bool>(), 2), 1..30),
    ) {
        let mut tracker = CaptureTracker::new(2);
        let mut entries = 0;
        for step in &steps {
            entries += tracker
                .observe(step)
                .unwrap()
                .iter()
                .filter(|e| e.direction == CaptureDirection::Entered)
                .count();
            prop_assert_eq!(tracker.previous(), step.as_slice());
        }
        // Every entry but the ones still inside was matched by a departure.
        let inside = steps.last().unwrap().iter().filter(|b| **b).count();
        prop_assert!(entries >= inside);
        prop_assert!(tracker.check_invariants().is_ok());
    }

    #[test]
    fn score_is_monotone_and_bounded(
        target in 1..10_u32,
        batches in prop::collection::vec(prop::collection::vec(capture_event(), 0..4), 0..20),
    ) {
        let mut ledger = ScoreLedger::new(target);
        let mut last = 0;
        for batch in &batches {
            let state = ledger.apply(batch);
            prop_assert!(state.own_score >= last);
            prop_assert!(state.own_score <= target);
            prop_assert_eq!(state.target_score, target);
            last = state.own_score;
        }
        prop_assert!(ledger.check_invariants().is_ok());
    }

    #[test]
    fn win_is_reported_on_the_reaching_batch(
        target in 1..6_u32,
        batch_sizes in prop::collection::vec(1..3_usize, 1..10),
    ) {
        let mut ledger = ScoreLedger::new(target);
        for size in batch_sizes {
            let before = ledger.score();
            let batch: Vec<CaptureEvent> = (0..size)
                .map(|token| CaptureEvent { token, direction: CaptureDirection::Entered })
                .collect();
            let after = ledger.apply(&batch).own_score;
            let expected = (before + size as u32).min(target);
            prop_assert_eq!(after, expected);
            prop_assert_eq!(ledger.is_won(), after == target);
        }
    }

    #[test]
    fn messages_survive_the_wire(message in message()) {
        let results = decode(&encode(&message));
        prop_assert_eq!(results.len(), 1);
        prop_assert_eq!(results[0].as_ref().unwrap(), &message);
    }

    #[test]
    fn chunking_does_not_change_decoding(
        messages in prop::collection::vec(message(), 1..8),
        cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..16),
    ) {
        let stream: Vec<u8> = messages.iter().flat_map(encode).collect();
        let mut offsets: Vec<usize> = cuts.iter().map(|cut| cut.index(stream.len())).collect();
        offsets.push(0);
        offsets.push(stream.len());
        offsets.sort_unstable();
        offsets.dedup();

        let mut decoder = MessageDecoder::new();
        let mut decoded = Vec::new();
        for window in offsets.windows(2) {
            decoded.extend(decoder.feed(&stream[window[0]..window[1]]));
        }
        prop_assert_eq!(decoder.pending(), 0);
        let decoded: Vec<Message> = decoded.into_iter().map(Result::unwrap).collect();
        prop_assert_eq!(decoded, messages);
    }
}

#[test]
fn oscillating_token_scores_once_per_entry() {
    let boundary = Boundary::new(Position::new(0.0, 0.0), 300.0);
    let inside = Position::new(150.0, 150.0);
    let outside = Position::new(600.0, 600.0);
    let mut tracker = CaptureTracker::new(1);
    let mut ledger = ScoreLedger::new(100);

    for tick in 0..10 {
        let position = if tick % 2 == 0 { inside } else { outside };
        let status = [contains(&position, &boundary, Axes::XY)];
        let events = tracker.observe(&status).unwrap();
        ledger.apply(&events);
    }

    assert_eq!(ledger.score(), 5);
    assert_eq!(ledger.releases(), 5);
}
