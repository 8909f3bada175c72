//! Conversation event bus
//!
//! Observers (the demo binary, integration tests, a future UI) subscribe to a
//! broadcast channel. Slow subscribers miss events instead of blocking the
//! state machine.

use crate::state::ConversationState;
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Events emitted by the conversation state machine
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationEvent {
    /// State transition
    StateChanged {
        /// Previous state
        from: ConversationState,
        /// New state
        to: ConversationState,
    },
    /// Recognized or typed user input
    UserSpeech {
        /// Turn identifier
        turn_id: Uuid,
        /// User text
        text: String,
    },
    /// Assistant reply with tags removed
    AssistantResponse {
        /// Turn identifier
        turn_id: Uuid,
        /// Clean reply text
        text: String,
    },
    /// Emotion tag found in a reply
    EmotionDetected {
        /// Turn identifier
        turn_id: Uuid,
        /// Tag identifier as written by the model
        emotion: String,
        /// Whether the tag is in the emotion table
        known: bool,
    },
    /// Turn stored in history
    TurnCompleted {
        /// Turn identifier
        turn_id: Uuid,
        /// End-to-end latency in milliseconds
        total_ms: u64,
    },
    /// Turn ended without a stored exchange
    TurnAborted {
        /// Reason, safe to display
        reason: String,
    },
    /// Explicit interrupt applied
    Interrupted {
        /// State that was cancelled
        during: ConversationState,
    },
}

/// Broadcast bus for [`ConversationEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ConversationEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to all future events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ConversationEvent> {
        self.sender.subscribe()
    }

    /// Publish to all subscribers; returns how many received it
    pub fn publish(&self, event: ConversationEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Number of active subscribers
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
