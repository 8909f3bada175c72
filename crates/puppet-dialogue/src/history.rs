//! Bounded conversation history and LLM context assembly

use crate::message::Message;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use uuid::Uuid;

/// One completed exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// Turn identifier
    pub id: Uuid,
    /// What the user said or typed
    pub user_input: String,
    /// Assistant reply with emotion tags removed
    pub assistant_response: String,
    /// When the turn started
    pub started_at: DateTime<Utc>,
    /// Transcription latency (voice turns only)
    pub asr_latency: Option<Duration>,
    /// Language model latency
    pub llm_latency: Option<Duration>,
    /// Synthesis latency (spoken turns only)
    pub tts_latency: Option<Duration>,
    /// End-to-end latency
    pub total_latency: Option<Duration>,
    /// Authoritative emotion tag of the reply
    pub emotion_detected: Option<String>,
}

impl ConversationTurn {
    /// Create a turn with no latency data
    #[must_use]
    pub fn new(user_input: impl Into<String>, assistant_response: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_input: user_input.into(),
            assistant_response: assistant_response.into(),
            started_at: Utc::now(),
            asr_latency: None,
            llm_latency: None,
            tts_latency: None,
            total_latency: None,
            emotion_detected: None,
        }
    }

    /// Set the detected emotion
    #[must_use]
    pub fn with_emotion(mut self, emotion: Option<String>) -> Self {
        self.emotion_detected = emotion;
        self
    }
}

/// FIFO of the most recent turns; the oldest is dropped on overflow
#[derive(Debug, Clone)]
pub struct TurnHistory {
    turns: VecDeque<ConversationTurn>,
    capacity: usize,
}

impl TurnHistory {
    /// Create an empty history holding at most `capacity` turns
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            turns: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a turn, dropping the oldest when full
    pub fn push(&mut self, turn: ConversationTurn) {
        while self.turns.len() >= self.capacity {
            self.turns.pop_front();
        }
        self.turns.push_back(turn);
    }

    /// The last `k` turns, oldest first
    pub fn recent(&self, k: usize) -> impl Iterator<Item = &ConversationTurn> {
        self.turns.iter().skip(self.turns.len().saturating_sub(k))
    }

    /// All turns, oldest first
    #[must_use]
    pub fn snapshot(&self) -> Vec<ConversationTurn> {
        self.turns.iter().cloned().collect()
    }

    /// Forget everything
    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// Number of stored turns
    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Whether no turns are stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Maximum number of stored turns
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Build the message list for a language model call: the persona prompt,
/// the last `context_turns` exchanges, then the new user input.
#[must_use]
pub fn build_context(
    system_prompt: &str,
    history: &TurnHistory,
    context_turns: usize,
    user_input: &str,
) -> Vec<Message> {
    let mut messages = Vec::with_capacity(2 + context_turns * 2);
    messages.push(Message::system(system_prompt));
    for turn in history.recent(context_turns) {
        messages.push(Message::user(turn.user_input.clone()));
        messages.push(Message::assistant(turn.assistant_response.clone()));
    }
    messages.push(Message::user(user_input));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageRole;

    fn filled(n: usize, capacity: usize) -> TurnHistory {
        let mut history = TurnHistory::new(capacity);
        for i in 0..n {
            history.push(ConversationTurn::new(format!("q{i}"), format!("a{i}")));
        }
        history
    }

    #[test]
    fn test_push_drops_oldest() {
        let history = filled(11, 10);
        assert_eq!(history.len(), 10);
        let turns = history.snapshot();
        assert_eq!(turns[0].user_input, "q1");
        assert_eq!(turns[9].user_input, "q10");
    }

    #[test]
    fn test_recent_is_oldest_first() {
        let history = filled(7, 10);
        let recent: Vec<_> = history.recent(3).map(|t| t.user_input.as_str()).collect();
        assert_eq!(recent, vec!["q4", "q5", "q6"]);
        assert_eq!(history.recent(50).count(), 7);
    }

    #[test]
    fn test_build_context_layout() {
        let history = filled(8, 10);
        let messages = build_context("persona", &history, 5, "now");

        assert_eq!(messages.len(), 1 + 5 * 2 + 1);
        assert_eq!(messages[0], Message::system("persona"));
        assert_eq!(messages[1], Message::user("q3"));
        assert_eq!(messages[2], Message::assistant("a3"));
        assert_eq!(messages[10], Message::assistant("a7"));
        assert_eq!(messages[11].role, MessageRole::User);
        assert_eq!(messages[11].content, "now");
    }

    #[test]
    fn test_build_context_empty_history() {
        let messages = build_context("persona", &TurnHistory::new(10), 5, "hello");
        assert_eq!(messages, vec![Message::system("persona"), Message::user("hello")]);
    }

    #[test]
    fn test_clear() {
        let mut history = filled(3, 10);
        history.clear();
        assert!(history.is_empty());
    }
}
