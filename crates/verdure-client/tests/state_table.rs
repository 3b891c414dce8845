//! Exhaustive checks of the conversation transition table.
//!
//! Every `(state, trigger)` pair is pinned: either to its successor state or
//! to rejection. A change to the table cannot land without showing up here.

use verdure_client::state::{StateMachine, transition};
use verdure_core::domain::{ConversationTrigger as T, DeviceState as S};

/// The full table, one row per state, one entry per trigger in `T::ALL`
/// order.
const TABLE: [(S, [Option<S>; 10]); 4] = [
    (
        S::Idle,
        [
            Some(S::Listening),  // StartVoiceChat
            Some(S::Idle),       // StopVoiceChat
            Some(S::Listening),  // KeywordDetected
            None,                // TtsStarted
            None,                // TtsCompleted
            None,                // AudioPlaybackCompleted
            Some(S::Connecting), // ConnectToServer
            Some(S::Connecting), // ServerDisconnected
            None,                // UserInterrupt
            Some(S::Idle),       // ForceIdle
        ],
    ),
    (
        S::Connecting,
        [
            None,                // StartVoiceChat
            Some(S::Idle),       // StopVoiceChat
            None,                // KeywordDetected
            None,                // TtsStarted
            None,                // TtsCompleted
            None,                // AudioPlaybackCompleted
            None,                // ConnectToServer
            Some(S::Connecting), // ServerDisconnected
            None,                // UserInterrupt
            Some(S::Idle),       // ForceIdle
        ],
    ),
    (
        S::Listening,
        [
            None,                // StartVoiceChat
            Some(S::Idle),       // StopVoiceChat
            Some(S::Idle),       // KeywordDetected (interrupt)
            Some(S::Speaking),   // TtsStarted
            Some(S::Idle),       // TtsCompleted
            None,                // AudioPlaybackCompleted
            None,                // ConnectToServer
            Some(S::Connecting), // ServerDisconnected
            Some(S::Idle),       // UserInterrupt
            Some(S::Idle),       // ForceIdle
        ],
    ),
    (
        S::Speaking,
        [
            None,                // StartVoiceChat
            Some(S::Idle),       // StopVoiceChat
            Some(S::Idle),       // KeywordDetected (interrupt)
            Some(S::Speaking),   // TtsStarted
            Some(S::Idle),       // TtsCompleted
            Some(S::Idle),       // AudioPlaybackCompleted
            None,                // ConnectToServer
            Some(S::Connecting), // ServerDisconnected
            Some(S::Idle),       // UserInterrupt
            Some(S::Idle),       // ForceIdle
        ],
    ),
];

#[test]
fn every_pair_matches_the_table() {
    for (state, row) in TABLE {
        for (trigger, expected) in T::ALL.into_iter().zip(row) {
            assert_eq!(
                transition(state, trigger),
                expected,
                "({state}, {trigger}) diverged from the table"
            );
        }
    }
}

#[test]
fn table_covers_every_pair() {
    // 4 states × 10 triggers; the TABLE constant must not silently shrink.
    let entries: usize = TABLE.iter().map(|(_, row)| row.len()).sum();
    assert_eq!(entries, S::ALL.len() * T::ALL.len());
}

#[test]
fn machine_is_always_in_exactly_one_state() {
    // Drive the machine through every trigger from every reachable state;
    // after each step the state must be one of the four and must equal the
    // table's prediction (or be unchanged on rejection).
    let mut machine = StateMachine::new();
    for _ in 0..3 {
        for trigger in T::ALL {
            let before = machine.state();
            let expected = transition(before, trigger);
            let change = machine.apply(trigger, None);
            match (expected, change) {
                (Some(next), Some(change)) => {
                    assert_eq!(change.from, before);
                    assert_eq!(change.to, next);
                    assert_eq!(machine.state(), next);
                }
                (None, None) => assert_eq!(machine.state(), before),
                (expected, change) => {
                    panic!("table/machine divergence: {expected:?} vs {change:?}")
                }
            }
            assert!(S::ALL.contains(&machine.state()));
        }
    }
}

#[test]
fn no_transition_escapes_rejection_silently() {
    let mut machine = StateMachine::new();
    // Force into Connecting and verify the sparse row really rejects.
    machine.apply(T::ConnectToServer, None).unwrap();
    assert_eq!(machine.state(), S::Connecting);

    for trigger in [
        T::StartVoiceChat,
        T::KeywordDetected,
        T::TtsStarted,
        T::TtsCompleted,
        T::AudioPlaybackCompleted,
        T::UserInterrupt,
    ] {
        assert!(!machine.can_transition(trigger));
        assert!(machine.apply(trigger, None).is_none());
        assert_eq!(machine.state(), S::Connecting);
    }
}

#[test]
fn disconnect_always_routes_to_connecting() {
    for state in S::ALL {
        assert_eq!(
            transition(state, T::ServerDisconnected),
            Some(S::Connecting)
        );
    }
}

#[test]
fn force_idle_always_converges() {
    for state in S::ALL {
        assert_eq!(transition(state, T::ForceIdle), Some(S::Idle));
    }
}
