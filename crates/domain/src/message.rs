use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Roles & content
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Developer,
    User,
    Assistant,
}

/// One content item inside a message.
///
/// Matches the Responses API wire shape: text fragments, images (URL or
/// inline base64), files, and the tool-call request/output pair used to
/// thread tool round trips through the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Content {
    Text {
        text: String,
    },
    Image {
        #[serde(skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        base64: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        media_type: Option<String>,
    },
    File {
        #[serde(skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        base64: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },
    ToolCall {
        call_id: String,
        name: String,
        /// Arguments as the literal JSON text the model produced.
        arguments: String,
    },
    ToolOutput {
        call_id: String,
        output: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Content::Text { text: text.into() }
    }

    pub fn image_url(url: impl Into<String>) -> Self {
        Content::Image {
            url: Some(url.into()),
            base64: None,
            media_type: None,
        }
    }

    pub fn image_base64(data: impl Into<String>, media_type: impl Into<String>) -> Self {
        Content::Image {
            url: None,
            base64: Some(data.into()),
            media_type: Some(media_type.into()),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A message in the conversation.
///
/// `id` is assigned by the model for assistant messages; `parsed` holds
/// the structured-output value when the request asked for one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parsed: Option<serde_json::Value>,
}

impl Message {
    pub fn developer(text: impl Into<String>) -> Self {
        Self {
            role: Role::Developer,
            content: vec![Content::text(text)],
            id: None,
            parsed: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![Content::text(text)],
            id: None,
            parsed: None,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: vec![Content::text(text)],
            id: None,
            parsed: None,
        }
    }

    pub fn tool_output(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![Content::ToolOutput {
                call_id: call_id.into(),
                output: output.into(),
                is_error: false,
            }],
            id: None,
            parsed: None,
        }
    }

    pub fn tool_error(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![Content::ToolOutput {
                call_id: call_id.into(),
                output: output.into(),
                is_error: true,
            }],
            id: None,
            parsed: None,
        }
    }

    /// Every message has at least one content item; assistant messages
    /// originating from the wire carry an id.
    pub fn validate(&self) -> Result<()> {
        if self.content.is_empty() {
            return Err(Error::Configuration(
                "message must carry at least one content item".into(),
            ));
        }
        Ok(())
    }

    /// First text fragment, if any.
    pub fn text(&self) -> Option<&str> {
        self.content.iter().find_map(|c| match c {
            Content::Text { text } => Some(text.as_str()),
            _ => None,
        })
    }

    /// All text fragments joined with `"\n"`. Non-text items are skipped.
    pub fn all_text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                Content::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Tool calls carried in this message, in order.
    pub fn tool_calls(&self) -> impl Iterator<Item = (&str, &str, &str)> {
        self.content.iter().filter_map(|c| match c {
            Content::ToolCall {
                call_id,
                name,
                arguments,
            } => Some((call_id.as_str(), name.as_str(), arguments.as_str())),
            _ => None,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_wire_format_is_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Developer).unwrap(), r#""developer""#);
        assert_eq!(serde_json::to_string(&Role::Assistant).unwrap(), r#""assistant""#);
    }

    #[test]
    fn content_tagged_serialization() {
        let json = serde_json::to_value(Content::text("hi")).unwrap();
        assert_eq!(json["type"], "text");
        assert_eq!(json["text"], "hi");

        let json = serde_json::to_value(Content::ToolOutput {
            call_id: "c1".into(),
            output: "ok".into(),
            is_error: false,
        })
        .unwrap();
        assert_eq!(json["type"], "tool_output");
        // is_error is omitted when false.
        assert!(json.get("is_error").is_none());
    }

    #[test]
    fn empty_message_fails_validation() {
        let msg = Message {
            role: Role::User,
            content: vec![],
            id: None,
            parsed: None,
        };
        assert!(msg.validate().is_err());
        assert!(Message::user("hello").validate().is_ok());
    }

    #[test]
    fn all_text_joins_fragments() {
        let msg = Message {
            role: Role::Assistant,
            content: vec![
                Content::text("one"),
                Content::ToolCall {
                    call_id: "c".into(),
                    name: "t".into(),
                    arguments: "{}".into(),
                },
                Content::text("two"),
            ],
            id: Some("msg_1".into()),
            parsed: None,
        };
        assert_eq!(msg.all_text(), "one\ntwo");
        assert_eq!(msg.text(), Some("one"));
    }

    #[test]
    fn tool_calls_iterator_preserves_order() {
        let msg = Message {
            role: Role::Assistant,
            content: vec![
                Content::ToolCall {
                    call_id: "a".into(),
                    name: "first".into(),
                    arguments: "{}".into(),
                },
                Content::ToolCall {
                    call_id: "b".into(),
                    name: "second".into(),
                    arguments: "{}".into(),
                },
            ],
            id: Some("msg_2".into()),
            parsed: None,
        };
        let names: Vec<&str> = msg.tool_calls().map(|(_, n, _)| n).collect();
        assert_eq!(names, vec!["first", "second"]);
    }
}
