//! Conversation memory modes.
//!
//! Decides who owns the transcript: the client (full history is resent each
//! turn) or the server (only the unsent suffix travels, plus a server handle).

use serde::{Deserialize, Serialize};

/// Where conversation history lives for the duration of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ConversationMemory {
    /// The client resends the whole transcript every turn.
    #[default]
    FullHistory,

    /// The server keeps the transcript under a conversation id.
    ServerConversation { conversation_id: String },

    /// The server chains responses; each turn names the previous one.
    ServerPreviousResponse {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        previous_response_id: Option<String>,
    },
}

impl ConversationMemory {
    pub fn is_server_managed(&self) -> bool {
        !matches!(self, ConversationMemory::FullHistory)
    }

    pub fn conversation_id(&self) -> Option<&str> {
        match self {
            ConversationMemory::ServerConversation { conversation_id } => Some(conversation_id),
            _ => None,
        }
    }

    /// The response id to chain from before any model call of this run.
    pub fn initial_previous_response_id(&self) -> Option<&str> {
        match self {
            ConversationMemory::ServerPreviousResponse {
                previous_response_id,
            } => previous_response_id.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_client_side() {
        assert_eq!(ConversationMemory::default(), ConversationMemory::FullHistory);
        assert!(!ConversationMemory::default().is_server_managed());
    }

    #[test]
    fn serializes_with_mode_tag() {
        let memory = ConversationMemory::ServerConversation {
            conversation_id: "conv_1".into(),
        };
        let json = serde_json::to_value(&memory).unwrap();
        assert_eq!(json["mode"], "server_conversation");
        assert_eq!(json["conversation_id"], "conv_1");
        assert_eq!(memory.conversation_id(), Some("conv_1"));
    }

    #[test]
    fn previous_response_seed() {
        let memory = ConversationMemory::ServerPreviousResponse {
            previous_response_id: Some("resp_0".into()),
        };
        assert!(memory.is_server_managed());
        assert_eq!(memory.initial_previous_response_id(), Some("resp_0"));
    }
}
