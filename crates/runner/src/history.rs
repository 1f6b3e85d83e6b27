//! History diffing: what to send to the model on each turn.
//!
//! With client-side memory the whole transcript is resent every turn. With
//! server-side memory only the items the server has not seen travel, tracked
//! by a [`SendProgress`] that is persisted with the execution state so that
//! pause/resume cycles never resend anything.

use serde::{Deserialize, Serialize};
use switchboard_core::{AgentInputItem, ConversationMemory};

/// How much of a run's history the server already holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendProgress {
    /// Whether the original input has been delivered.
    pub sent_original_input: bool,
    /// Number of generated items the server has seen, as a prefix length.
    pub sent_generated: usize,
}

impl SendProgress {
    /// Record a successful model call. `generated_len` must include the
    /// output of that call, which the server keeps on its own.
    pub fn mark_sent(&mut self, generated_len: usize) {
        self.sent_original_input = true;
        self.sent_generated = self.sent_generated.max(generated_len);
    }
}

/// Input for one model call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnInput {
    pub input: Vec<AgentInputItem>,
    pub conversation_id: Option<String>,
    pub previous_response_id: Option<String>,
}

/// Compute the model input for the next turn.
///
/// `last_response_id` is the id returned by the immediately preceding model
/// call of this run, if any.
pub fn compute_turn_input(
    memory: &ConversationMemory,
    progress: &SendProgress,
    original_input: &[AgentInputItem],
    generated: &[AgentInputItem],
    last_response_id: Option<&str>,
) -> TurnInput {
    match memory {
        ConversationMemory::FullHistory => TurnInput {
            input: model_input(original_input.iter().chain(generated)),
            conversation_id: None,
            previous_response_id: None,
        },
        ConversationMemory::ServerConversation { conversation_id } => TurnInput {
            input: unsent(progress, original_input, generated),
            conversation_id: Some(conversation_id.clone()),
            previous_response_id: None,
        },
        ConversationMemory::ServerPreviousResponse {
            previous_response_id,
        } => TurnInput {
            input: unsent(progress, original_input, generated),
            conversation_id: None,
            previous_response_id: last_response_id
                .map(str::to_string)
                .or_else(|| previous_response_id.clone()),
        },
    }
}

fn unsent(
    progress: &SendProgress,
    original_input: &[AgentInputItem],
    generated: &[AgentInputItem],
) -> Vec<AgentInputItem> {
    let original: &[AgentInputItem] = if progress.sent_original_input {
        &[]
    } else {
        original_input
    };
    let suffix = generated.get(progress.sent_generated..).unwrap_or(&[]);
    model_input(original.iter().chain(suffix))
}

fn model_input<'a>(items: impl Iterator<Item = &'a AgentInputItem>) -> Vec<AgentInputItem> {
    items.filter(|item| item.is_model_input()).cloned().collect()
}
