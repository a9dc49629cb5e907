//! Canonical conversation-input shape and the prompt-formatting helper.
//!
//! `SPEC_FULL.md` §9 fixes one shape for a `conversation`-typed input,
//! `[{role, content, person_id?}]`, and rejects any other. Formatting
//! prior turns into a prompt is a plain function here, not a service or
//! trait object: the Engine passes the typed input through unchanged, and
//! a handler that wants the prepended-history behavior calls
//! [`format_with_history`] itself.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::HandlerError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub person_id: Option<String>,
}

/// Parses a `conversation`-typed input value into the canonical message
/// list, or rejects it. `node_id` is only used to attribute the error.
pub fn parse_conversation(node_id: &str, value: &Value) -> Result<Vec<ConversationMessage>, HandlerError> {
    let array = value
        .as_array()
        .ok_or_else(|| HandlerError::InvalidConversationShape { node_id: node_id.to_string() })?;

    array
        .iter()
        .map(|entry| {
            serde_json::from_value(entry.clone())
                .map_err(|_| HandlerError::InvalidConversationShape { node_id: node_id.to_string() })
        })
        .collect()
}

/// Prepends prior turns to `prompt`, one line per message as
/// `role: content`, followed by a blank line and the new prompt.
pub fn format_with_history(history: &[ConversationMessage], prompt: &str) -> String {
    if history.is_empty() {
        return prompt.to_string();
    }
    let mut out = String::new();
    for message in history {
        out.push_str(&message.role);
        out.push_str(": ");
        out.push_str(&message.content);
        out.push('\n');
    }
    out.push('\n');
    out.push_str(prompt);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_well_formed_conversation() {
        let value = serde_json::json!([
            {"role": "user", "content": "hi"},
            {"role": "assistant", "content": "hello", "person_id": "p1"},
        ]);
        let messages = parse_conversation("n1", &value).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].person_id.as_deref(), Some("p1"));
    }

    #[test]
    fn rejects_a_non_array_shape() {
        let value = serde_json::json!({"role": "user", "content": "hi"});
        let err = parse_conversation("n1", &value).unwrap_err();
        assert!(matches!(err, HandlerError::InvalidConversationShape { .. }));
    }

    #[test]
    fn rejects_entries_missing_required_fields() {
        let value = serde_json::json!([{"content": "hi"}]);
        assert!(parse_conversation("n1", &value).is_err());
    }

    #[test]
    fn format_with_history_prepends_prior_turns() {
        let history = vec![
            ConversationMessage { role: "user".into(), content: "hi".into(), person_id: None },
            ConversationMessage { role: "assistant".into(), content: "hello".into(), person_id: None },
        ];
        let formatted = format_with_history(&history, "what next?");
        assert_eq!(formatted, "user: hi\nassistant: hello\n\nwhat next?");
    }

    #[test]
    fn format_with_history_is_identity_on_empty_history() {
        assert_eq!(format_with_history(&[], "prompt"), "prompt");
    }
}
