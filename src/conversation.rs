//! Chat turn log.

use chrono::Utc;
use serde::Serialize;

use crate::models::{ConversationTurn, Role};

#[derive(Debug, Default)]
pub struct Conversation {
    turns: Vec<ConversationTurn>,
    memory_length: usize,
}

/// Snapshot of the conversation state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationSummary {
    pub total_messages: usize,
    pub memory_length: usize,
    pub has_conversation: bool,
}

impl Conversation {
    /// `memory_length` is the number of exchanges (user + agent pairs)
    /// returned by [`Conversation::recent_window`].
    pub fn new(memory_length: usize) -> Self {
        Self {
            turns: Vec::new(),
            memory_length,
        }
    }

    pub fn add(&mut self, role: Role, message: impl Into<String>) {
        self.turns.push(ConversationTurn {
            role,
            message: message.into(),
            timestamp: Utc::now(),
        });
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    /// The last `exchanges` exchanges, oldest first.
    pub fn recent(&self, exchanges: usize) -> &[ConversationTurn] {
        let keep = exchanges.saturating_mul(2).min(self.turns.len());
        &self.turns[self.turns.len() - keep..]
    }

    pub fn recent_window(&self) -> &[ConversationTurn] {
        self.recent(self.memory_length)
    }

    pub fn reset(&mut self) {
        self.turns = Vec::new();
    }

    pub fn summary(&self) -> ConversationSummary {
        ConversationSummary {
            total_messages: self.turns.len(),
            memory_length: self.memory_length,
            has_conversation: !self.turns.is_empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recent_returns_last_exchanges_in_order() {
        let mut c = Conversation::new(2);
        for i in 0..4 {
            c.add(Role::User, format!("q{}", i));
            c.add(Role::Agent, format!("a{}", i));
        }
        let window: Vec<&str> = c.recent_window().iter().map(|t| t.message.as_str()).collect();
        assert_eq!(window, vec!["q2", "a2", "q3", "a3"]);
        assert_eq!(c.recent(100).len(), 8);
        assert!(c.recent(0).is_empty());
    }

    #[test]
    fn reset_clears_everything() {
        let mut c = Conversation::new(5);
        c.add(Role::User, "hello");
        assert!(c.summary().has_conversation);
        c.reset();
        assert!(c.turns().is_empty());
        assert_eq!(
            c.summary(),
            ConversationSummary {
                total_messages: 0,
                memory_length: 5,
                has_conversation: false
            }
        );
    }
}
