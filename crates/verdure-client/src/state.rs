//! The conversation state machine.
//!
//! A deterministic table over `(DeviceState, ConversationTrigger)`. Pairs the
//! table does not name are rejected and leave the state unchanged (debug-level
//! log only — an invalid trigger is routine, not an error). Serialization of
//! concurrent triggers is the dispatcher's job: the orchestrator feeds this
//! machine from a single queue, which makes transitions globally
//! linearizable.

use verdure_core::domain::DeviceState::{self, Connecting, Idle, Listening, Speaking};
use verdure_core::domain::{ConversationTrigger, ConversationTrigger as Trigger};
use verdure_core::events::StateChange;

/// The transition table.
///
/// Returns the successor state, or `None` when the pair is rejected.
#[must_use]
pub const fn transition(state: DeviceState, trigger: ConversationTrigger) -> Option<DeviceState> {
    match (state, trigger) {
        // Conversation entry
        (Idle, Trigger::StartVoiceChat | Trigger::KeywordDetected) => Some(Listening),
        (Idle, Trigger::ConnectToServer) => Some(Connecting),

        // Wake word / user interruption ends the turn
        (Listening | Speaking, Trigger::KeywordDetected | Trigger::UserInterrupt) => Some(Idle),

        // Server speech lifecycle
        (Listening | Speaking, Trigger::TtsStarted) => Some(Speaking),
        (Listening | Speaking, Trigger::TtsCompleted) => Some(Idle),
        (Speaking, Trigger::AudioPlaybackCompleted) => Some(Idle),

        // Explicit stop works from everywhere
        (Idle | Connecting | Listening | Speaking, Trigger::StopVoiceChat) => Some(Idle),

        // Connection loss always routes through Connecting
        (Idle | Connecting | Listening | Speaking, Trigger::ServerDisconnected) => Some(Connecting),

        // Recovery hatch
        (Idle | Connecting | Listening | Speaking, Trigger::ForceIdle) => Some(Idle),

        _ => None,
    }
}

/// Mutable state-machine core.
///
/// The owner is the orchestrator's single dispatcher task; everyone else
/// observes state through [`StateChange`] events.
#[derive(Debug)]
pub struct StateMachine {
    current: DeviceState,
}

impl StateMachine {
    #[must_use]
    pub const fn new() -> Self {
        Self { current: Idle }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> DeviceState {
        self.current
    }

    /// Pre-flight check: would `trigger` fire from the current state?
    #[must_use]
    pub const fn can_transition(&self, trigger: ConversationTrigger) -> bool {
        transition(self.current, trigger).is_some()
    }

    /// Apply a trigger.
    ///
    /// Returns the resulting [`StateChange`] on success; a rejected pair
    /// returns `None` and leaves the state untouched.
    pub fn apply(
        &mut self,
        trigger: ConversationTrigger,
        reason: Option<String>,
    ) -> Option<StateChange> {
        match transition(self.current, trigger) {
            Some(next) => {
                let change = StateChange {
                    from: self.current,
                    to: next,
                    trigger,
                    reason,
                };
                tracing::debug!(from = %change.from, to = %change.to, %trigger, "State transition");
                self.current = next;
                Some(change)
            }
            None => {
                tracing::debug!(state = %self.current, %trigger, "Trigger rejected in this state");
                None
            }
        }
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}
