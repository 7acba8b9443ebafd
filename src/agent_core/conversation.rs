//! Conversation history across turns.
//!
//! Each turn starts from the prior turns' user/assistant messages and the
//! orchestrator sees only the last few of them. Tool traffic never crosses a
//! turn boundary.

use crate::inference::types::{ChatMessage, Role};

use super::types::TurnOutcome;

/// Default number of prior messages shown to the model.
pub const DEFAULT_HISTORY_WINDOW: usize = 6;

/// The last `window` user/assistant messages with non-empty content.
pub fn windowed(history: &[ChatMessage], window: usize) -> Vec<ChatMessage> {
    let relevant: Vec<&ChatMessage> = history
        .iter()
        .filter(|m| matches!(m.role, Role::User | Role::Assistant))
        .filter(|m| !m.text().trim().is_empty())
        .collect();
    let skip = relevant.len().saturating_sub(window);
    relevant.into_iter().skip(skip).cloned().collect()
}

/// In-memory transcript of a chat session.
#[derive(Debug, Clone, Default)]
pub struct ConversationManager {
    messages: Vec<ChatMessage>,
}

impl ConversationManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages to seed the next turn with.
    pub fn history(&self) -> Vec<ChatMessage> {
        self.messages.clone()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Adopt a finished turn's transcript.
    pub fn record(&mut self, outcome: &TurnOutcome) {
        self.messages = outcome.transcript.clone();
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_core::types::ConversationState;

    #[test]
    fn test_windowed_keeps_latest_dialogue() {
        let history: Vec<ChatMessage> = (0..10)
            .map(|i| {
                if i % 2 == 0 {
                    ChatMessage::user(format!("q{i}"))
                } else {
                    ChatMessage::assistant(format!("a{i}"))
                }
            })
            .chain([ChatMessage::tool_result("c1", "noise"), ChatMessage::assistant("  ")])
            .collect();

        let window = windowed(&history, 4);
        let texts: Vec<&str> = window.iter().map(|m| m.text()).collect();
        assert_eq!(texts, vec!["q6", "a7", "q8", "a9"]);

        assert_eq!(windowed(&history, 100).len(), 10);
        assert!(windowed(&history, 0).is_empty());
    }

    #[test]
    fn test_record_adopts_transcript() {
        let mut conversation = ConversationManager::new();
        let mut state = ConversationState::new(conversation.history(), "hello");
        state.final_response = Some("hi there".into());
        conversation.record(&state.into_outcome());
        assert_eq!(conversation.len(), 2);

        let mut state = ConversationState::new(conversation.history(), "again");
        state.final_response = Some("sure".into());
        conversation.record(&state.into_outcome());
        assert_eq!(conversation.len(), 4);

        conversation.clear();
        assert!(conversation.is_empty());
    }
}
