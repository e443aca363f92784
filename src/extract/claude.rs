//! Linear adapter for Claude-style exports.
//!
//! A `conversations.json` export is an array of conversation objects, each
//! with an ordered `chat_messages` list and no parent pointers. The
//! adapter synthesizes a degenerate linear tree (every message's parent
//! is its predecessor) and normalizes the `human` sender to the `user`
//! role.
//!
//! Message content is a list of tagged blocks (`text`, `thinking`,
//! `tool_use`, `tool_result`, `image`); older exports carry a plain `text`
//! field instead, which maps to a single text part.

use chrono::{DateTime, Utc};
use eyre::Result;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use super::PlatformAdapter;
use crate::model::{
    Attachment, ClaudeMeta, ContentPart, IncomingDialogue, IncomingMessage, MessageExtras, Role,
};

// ---------------------------------------------------------------------------
// Export shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Conversation {
    #[serde(default)]
    uuid: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    chat_messages: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    uuid: Option<String>,
    #[serde(default)]
    sender: Option<String>,
    /// Flattened text, kept by every export generation.
    #[serde(default)]
    text: Option<String>,
    /// Tagged content blocks; absent in the oldest exports.
    #[serde(default)]
    content: Option<Vec<Value>>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    attachments: Vec<Value>,
    #[serde(default)]
    files: Vec<Value>,
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

pub struct ClaudeAdapter;

impl PlatformAdapter for ClaudeAdapter {
    fn source_name(&self) -> &'static str {
        "claude"
    }

    fn parse_dialogue(&self, raw: &Value) -> Result<Option<IncomingDialogue>> {
        let conversation: Conversation = serde_json::from_value(raw.clone())?;
        let Some(external_id) = conversation.uuid.clone() else {
            return Ok(None);
        };

        let mut messages = Vec::with_capacity(conversation.chat_messages.len());
        let mut previous_external_id: Option<String> = None;
        for (index, msg) in conversation.chat_messages.iter().enumerate() {
            let Some(role) = message_role(msg) else {
                warn!(
                    external_id = %external_id,
                    index,
                    sender = msg.sender.as_deref().unwrap_or("<none>"),
                    "unknown sender, skipping message"
                );
                continue;
            };
            // Position-based fallback keeps ids stable across re-imports
            // of the same export, which is all identity needs here.
            let message_external_id = msg
                .uuid
                .clone()
                .unwrap_or_else(|| format!("{external_id}:{index}"));
            messages.push(translate_message(
                message_external_id.clone(),
                previous_external_id.take(),
                role,
                msg,
            ));
            previous_external_id = Some(message_external_id);
        }

        Ok(Some(IncomingDialogue {
            external_id,
            title: conversation.name,
            source_created_at: conversation.created_at,
            source_updated_at: conversation.updated_at,
            raw: raw.clone(),
            messages,
        }))
    }
}

/// Normalize the sender to a role. A message whose blocks are all tool
/// results is a tool turn even when the sender field is missing.
fn message_role(msg: &ChatMessage) -> Option<Role> {
    if let Some(sender) = msg.sender.as_deref()
        && let Some(role) = Role::parse(sender)
    {
        return Some(role);
    }
    let blocks = msg.content.as_deref()?;
    let all_tool_results = !blocks.is_empty()
        && blocks
            .iter()
            .all(|b| b.get("type").and_then(|t| t.as_str()) == Some("tool_result"));
    all_tool_results.then_some(Role::Tool)
}

fn translate_message(
    external_id: String,
    parent_external_id: Option<String>,
    role: Role,
    msg: &ChatMessage,
) -> IncomingMessage {
    let parts = match msg.content.as_deref() {
        Some(blocks) if !blocks.is_empty() => blocks.iter().map(translate_block).collect(),
        _ => match msg.text.as_deref() {
            Some(text) if !text.is_empty() => vec![ContentPart::Text {
                text: text.to_string(),
            }],
            _ => Vec::new(),
        },
    };

    let attachments = msg
        .attachments
        .iter()
        .map(|a| Attachment {
            file_name: str_field(a, "file_name"),
            media_type: str_field(a, "file_type"),
            size_bytes: a.get("file_size").and_then(|v| v.as_i64()),
            url: None,
            source_json: Some(a.clone()),
        })
        .chain(msg.files.iter().map(|f| Attachment {
            file_name: str_field(f, "file_name"),
            media_type: None,
            size_bytes: None,
            url: None,
            source_json: Some(f.clone()),
        }))
        .collect();

    // Hash over the block list when present, the flat text otherwise, so
    // either export generation detects edits.
    let content = match &msg.content {
        Some(blocks) if !blocks.is_empty() => Value::Array(blocks.clone()),
        _ => Value::String(msg.text.clone().unwrap_or_default()),
    };

    IncomingMessage {
        external_id,
        parent_external_id,
        role,
        author_name: None,
        author_metadata: None,
        source_created_at: msg.created_at,
        source_updated_at: msg.updated_at,
        content,
        parts,
        citations: Vec::new(),
        attachments,
        extras: MessageExtras::Claude(ClaudeMeta {
            sender: msg.sender.clone(),
            stop_reason: msg.stop_reason.clone(),
            source_json: None,
        }),
    }
}

fn translate_block(block: &Value) -> ContentPart {
    let block_type = block.get("type").and_then(|v| v.as_str());
    match block_type {
        Some("text") => ContentPart::Text {
            text: str_field(block, "text").unwrap_or_default(),
        },
        Some("thinking") => ContentPart::Thinking {
            text: str_field(block, "thinking")
                .or_else(|| str_field(block, "text"))
                .unwrap_or_default(),
        },
        Some("tool_use") => ContentPart::ToolUse {
            tool_name: str_field(block, "name").unwrap_or_default(),
            tool_use_id: str_field(block, "id"),
            tool_input: block.get("input").cloned(),
        },
        Some("tool_result") => ContentPart::ToolResult {
            tool_use_id: str_field(block, "tool_use_id"),
            text: tool_result_text(block.get("content")),
            is_error: block
                .get("is_error")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            source_json: Some(block.clone()),
        },
        Some("image") => ContentPart::Image {
            media_type: block
                .get("source")
                .and_then(|s| s.get("media_type"))
                .and_then(|v| v.as_str())
                .map(String::from),
            url: None,
            source_json: Some(block.clone()),
        },
        _ => ContentPart::Unknown {
            source_json: block.clone(),
        },
    }
}

/// Tool-result content may be a plain string or a heterogeneous block
/// list; textual children are concatenated, anything else is preserved in
/// the part's `source_json`.
fn tool_result_text(content: Option<&Value>) -> Option<String> {
    match content? {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => {
            let texts: Vec<&str> = items
                .iter()
                .filter_map(|item| {
                    if item.get("type").and_then(|t| t.as_str()) == Some("text") {
                        item.get("text").and_then(|v| v.as_str())
                    } else {
                        item.as_str()
                    }
                })
                .collect();
            if texts.is_empty() {
                None
            } else {
                Some(texts.join("\n"))
            }
        }
        _ => None,
    }
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(|v| v.as_str()).map(String::from)
}
