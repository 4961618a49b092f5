//! Conversation history and the merge step that produces next-turn input.

use serde::{Deserialize, Serialize};

use crate::model::{Message, Response};

/// How a new message joins the conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Always append the new message.
    #[default]
    Append,
    /// Replace the last message when it has the same role as the new one.
    ///
    /// For vendors that stream a final message incrementally and then replay
    /// it whole, so the replay must not be stored twice.
    ReplaceSameRole,
}

/// Ordered conversation history.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Context {
    pub messages: Vec<Message>,
}

impl Context {
    /// Create a context from messages.
    pub fn new(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    /// Merge a response's message into a new context value.
    pub fn merge(&self, response: &Response, policy: MergePolicy) -> Context {
        self.with_message(response.message.clone(), policy)
    }

    /// Return a new context with `message` merged under `policy`.
    pub fn with_message(&self, message: Message, policy: MergePolicy) -> Context {
        let mut messages = self.messages.clone();

        let replace = policy == MergePolicy::ReplaceSameRole
            && messages.last().is_some_and(|last| last.role == message.role);
        if replace {
            messages.pop();
        }
        messages.push(message);

        Context { messages }
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl From<Vec<Message>> for Context {
    fn from(messages: Vec<Message>) -> Self {
        Self::new(messages)
    }
}
