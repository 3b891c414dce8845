//! Interrupt coordination.
//!
//! Interrupts arrive from independent paths (network loss, user action,
//! voice barge-in, wake word). The coordinator merges whatever is queued at
//! each step and forwards only the highest-priority signal, so a burst of
//! simultaneous interrupts produces one decisive outcome instead of four
//! competing ones.

use tokio::sync::mpsc;

use verdure_core::domain::{AbortReason, ConversationTrigger};

/// Where an interrupt came from. Priority: network > user > voice > keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptSource {
    Network,
    User,
    Voice,
    Keyword,
}

impl InterruptSource {
    /// Larger wins when merging.
    #[must_use]
    pub const fn priority(self) -> u8 {
        match self {
            Self::Network => 3,
            Self::User => 2,
            Self::Voice => 1,
            Self::Keyword => 0,
        }
    }

    /// The state-machine trigger this interrupt maps to.
    #[must_use]
    pub const fn trigger(self) -> ConversationTrigger {
        match self {
            Self::Network => ConversationTrigger::ServerDisconnected,
            Self::User | Self::Voice => ConversationTrigger::UserInterrupt,
            Self::Keyword => ConversationTrigger::KeywordDetected,
        }
    }

    /// The abort reason reported to the server and the context.
    #[must_use]
    pub const fn abort_reason(self) -> AbortReason {
        match self {
            Self::Network => AbortReason::NetworkError,
            Self::User => AbortReason::UserInterruption,
            Self::Voice => AbortReason::VoiceInterruption,
            Self::Keyword => AbortReason::WakeWordDetected,
        }
    }

    /// Whether this interrupt flushes playback when it lands during Speaking.
    #[must_use]
    pub const fn flushes_playback(self) -> bool {
        matches!(self, Self::User | Self::Voice | Self::Keyword)
    }
}

/// Merges raised interrupts into one prioritized stream.
#[derive(Debug, Clone)]
pub struct InterruptCoordinator {
    tx: mpsc::UnboundedSender<InterruptSource>,
}

impl InterruptCoordinator {
    /// Create the coordinator and its merged output stream.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<InterruptSource>) {
        let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<InterruptSource>();
        let (merged_tx, merged_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(first) = raw_rx.recv().await {
                // Everything already queued competes with `first`; only the
                // winner goes out.
                let mut winner = first;
                while let Ok(next) = raw_rx.try_recv() {
                    if next.priority() > winner.priority() {
                        tracing::debug!(?winner, superseded_by = ?next, "Interrupt superseded");
                        winner = next;
                    }
                }
                if merged_tx.send(winner).is_err() {
                    return;
                }
            }
        });

        (Self { tx: raw_tx }, merged_rx)
    }

    /// Raise an interrupt. Never blocks.
    pub fn raise(&self, source: InterruptSource) {
        if self.tx.send(source).is_err() {
            tracing::warn!(?source, "Interrupt raised after coordinator shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn single_interrupt_passes_through() {
        let (coordinator, mut rx) = InterruptCoordinator::new();
        coordinator.raise(InterruptSource::User);
        let got = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, InterruptSource::User);
    }

    #[tokio::test]
    async fn burst_collapses_to_highest_priority() {
        let (coordinator, mut rx) = InterruptCoordinator::new();
        coordinator.raise(InterruptSource::Keyword);
        coordinator.raise(InterruptSource::Voice);
        coordinator.raise(InterruptSource::Network);
        coordinator.raise(InterruptSource::User);

        // Give the merge task a beat to see the whole burst.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let got = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, InterruptSource::Network);
    }

    #[test]
    fn priority_ordering_matches_policy() {
        assert!(InterruptSource::Network.priority() > InterruptSource::User.priority());
        assert!(InterruptSource::User.priority() > InterruptSource::Voice.priority());
        assert!(InterruptSource::Voice.priority() > InterruptSource::Keyword.priority());
    }

    #[test]
    fn mappings_are_stable() {
        assert_eq!(
            InterruptSource::Network.trigger(),
            ConversationTrigger::ServerDisconnected
        );
        assert_eq!(
            InterruptSource::Keyword.abort_reason(),
            AbortReason::WakeWordDetected
        );
        assert!(!InterruptSource::Network.flushes_playback());
        assert!(InterruptSource::User.flushes_playback());
    }
}
