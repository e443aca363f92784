//! Core entity types shared across the store, the extractors, the pair
//! builder, and the annotators.
//!
//! The on-disk representation is flat SQL rows (nullable columns per part
//! type); in memory we use enums so that match arms stay exhaustive when a
//! new variant is added.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Render a timestamp in the fixed-width RFC 3339 format used for every
/// `created_at`-style column. Fixed microsecond precision keeps string
/// comparison equivalent to chronological comparison.
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Current time in storage format.
pub fn now_ts() -> String {
    format_ts(Utc::now())
}

/// The Unix epoch in storage format; initial high-water mark for cursors.
pub const EPOCH_TS: &str = "1970-01-01T00:00:00.000000Z";

/// Parse a stored or source-supplied RFC 3339 timestamp.
/// Returns `None` for anything unparseable; callers treat that as "unknown".
pub fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

// ---------------------------------------------------------------------------
// Roles
// ---------------------------------------------------------------------------

/// Conversation turn role, normalized across platforms (`human` → `User`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
        }
    }

    /// Parse a platform role string. Case-insensitive, accepts the Claude
    /// spelling `human` for `User`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "user" | "human" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "system" => Some(Role::System),
            "tool" => Some(Role::Tool),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl rusqlite::types::FromSql for Role {
    fn column_result(
        value: rusqlite::types::ValueRef<'_>,
    ) -> rusqlite::types::FromSqlResult<Self> {
        let s = value.as_str()?;
        Role::parse(s).ok_or(rusqlite::types::FromSqlError::InvalidType)
    }
}

impl rusqlite::types::ToSql for Role {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
        Ok(rusqlite::types::ToSqlOutput::from(self.as_str()))
    }
}

// ---------------------------------------------------------------------------
// Content parts
// ---------------------------------------------------------------------------

/// A typed fragment of a message. Stored flat in `content_parts` with
/// nullable columns; the enum keeps translation code exhaustive.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
    Text {
        text: String,
    },
    Code {
        text: String,
        language: Option<String>,
    },
    Image {
        media_type: Option<String>,
        url: Option<String>,
        source_json: Option<Value>,
    },
    Audio {
        media_type: Option<String>,
        url: Option<String>,
        source_json: Option<Value>,
    },
    Video {
        media_type: Option<String>,
        url: Option<String>,
        source_json: Option<Value>,
    },
    ToolUse {
        tool_name: String,
        tool_use_id: Option<String>,
        tool_input: Option<Value>,
    },
    ToolResult {
        tool_use_id: Option<String>,
        text: Option<String>,
        is_error: bool,
        source_json: Option<Value>,
    },
    Thinking {
        text: String,
    },
    /// Synthetic part representing a canvas document revision; the document
    /// itself lands in `chatgpt_canvas_docs`.
    Canvas {
        text: String,
    },
    /// Anything the adapter does not recognize; the original object is kept.
    Unknown {
        source_json: Value,
    },
}

impl ContentPart {
    /// The `part_type` discriminator stored in the database.
    pub fn kind(&self) -> &'static str {
        match self {
            ContentPart::Text { .. } => "text",
            ContentPart::Code { .. } => "code",
            ContentPart::Image { .. } => "image",
            ContentPart::Audio { .. } => "audio",
            ContentPart::Video { .. } => "video",
            ContentPart::ToolUse { .. } => "tool_use",
            ContentPart::ToolResult { .. } => "tool_result",
            ContentPart::Thinking { .. } => "thinking",
            ContentPart::Canvas { .. } => "canvas",
            ContentPart::Unknown { .. } => "unknown",
        }
    }

    /// Textual payload, when the variant carries one.
    pub fn text(&self) -> Option<&str> {
        match self {
            ContentPart::Text { text }
            | ContentPart::Code { text, .. }
            | ContentPart::Thinking { text }
            | ContentPart::Canvas { text } => Some(text),
            ContentPart::ToolResult { text, .. } => text.as_deref(),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Normalized incoming records (adapter output, extractor input)
// ---------------------------------------------------------------------------

/// One dialogue as produced by a platform adapter, ready for reconciliation.
#[derive(Debug, Clone)]
pub struct IncomingDialogue {
    pub external_id: String,
    pub title: Option<String>,
    pub source_created_at: Option<DateTime<Utc>>,
    pub source_updated_at: Option<DateTime<Utc>>,
    /// The raw export object, persisted verbatim in `dialogues.raw_json`.
    pub raw: Value,
    pub messages: Vec<IncomingMessage>,
}

/// One message as produced by a platform adapter.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub external_id: String,
    pub parent_external_id: Option<String>,
    pub role: Role,
    pub author_name: Option<String>,
    pub author_metadata: Option<Value>,
    pub source_created_at: Option<DateTime<Utc>>,
    pub source_updated_at: Option<DateTime<Utc>>,
    /// The raw per-message content object; sole input to the content hash.
    pub content: Value,
    pub parts: Vec<ContentPart>,
    pub citations: Vec<Citation>,
    pub attachments: Vec<Attachment>,
    pub extras: MessageExtras,
}

#[derive(Debug, Clone, Default)]
pub struct Citation {
    pub title: Option<String>,
    pub url: Option<String>,
    pub snippet: Option<String>,
    pub source_json: Option<Value>,
}

#[derive(Debug, Clone, Default)]
pub struct Attachment {
    pub file_name: Option<String>,
    pub media_type: Option<String>,
    pub size_bytes: Option<i64>,
    pub url: Option<String>,
    pub source_json: Option<Value>,
}

/// Platform-specific rows carried alongside a message. Torn down and
/// rebuilt together with the message's content parts.
#[derive(Debug, Clone, Default)]
pub enum MessageExtras {
    #[default]
    None,
    ChatGpt(ChatGptExtras),
    Claude(ClaudeMeta),
}

#[derive(Debug, Clone, Default)]
pub struct ChatGptExtras {
    pub meta: Option<ChatGptMessageMeta>,
    pub search_groups: Vec<SearchGroup>,
    pub code_executions: Vec<CodeExecution>,
    pub dalle_generations: Vec<DalleGeneration>,
    pub canvas_docs: Vec<CanvasDoc>,
}

#[derive(Debug, Clone, Default)]
pub struct ChatGptMessageMeta {
    pub model_slug: Option<String>,
    pub request_id: Option<String>,
    pub recipient: Option<String>,
    pub channel: Option<String>,
    pub source_json: Option<Value>,
}

#[derive(Debug, Clone, Default)]
pub struct SearchGroup {
    pub group_type: Option<String>,
    pub summary: Option<String>,
    pub entries: Vec<SearchEntry>,
}

#[derive(Debug, Clone, Default)]
pub struct SearchEntry {
    pub title: Option<String>,
    pub url: Option<String>,
    pub snippet: Option<String>,
    pub attribution: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CodeExecution {
    pub code: Option<String>,
    pub language: Option<String>,
    pub status: Option<String>,
    pub outputs: Vec<CodeOutput>,
}

#[derive(Debug, Clone, Default)]
pub struct CodeOutput {
    pub output_type: Option<String>,
    pub text_content: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DalleGeneration {
    pub prompt: Option<String>,
    pub asset_pointer: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub seed: Option<i64>,
    pub gen_id: Option<String>,
}

/// One canvas document revision. `part_sequence` points at the synthetic
/// `canvas` content part within the same message, so the revision can be
/// annotated after the parts are written.
#[derive(Debug, Clone, Default)]
pub struct CanvasDoc {
    pub textdoc_id: Option<String>,
    pub version: Option<i64>,
    pub doc_type: Option<String>,
    pub title: Option<String>,
    pub content: Option<String>,
    pub part_sequence: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct ClaudeMeta {
    pub sender: Option<String>,
    pub stop_reason: Option<String>,
    pub source_json: Option<Value>,
}

// ---------------------------------------------------------------------------
// Row types read back out of the store
// ---------------------------------------------------------------------------

/// A `dialogues` row.
#[derive(Debug, Clone)]
pub struct DialogueRow {
    pub id: i64,
    pub source_id: i64,
    pub external_id: String,
    pub title: Option<String>,
    pub source_created_at: Option<String>,
    pub source_updated_at: Option<String>,
    pub imported_at: String,
}

/// A `messages` row.
#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: i64,
    pub dialogue_id: i64,
    pub external_id: String,
    pub parent_id: Option<i64>,
    pub role: Role,
    pub source_created_at: Option<String>,
    pub deleted_at: Option<String>,
    pub created_at: String,
}

/// A `content_parts` row, as seen by annotators.
#[derive(Debug, Clone)]
pub struct ContentPartRow {
    pub id: i64,
    pub message_id: i64,
    pub sequence: i64,
    pub part_type: String,
    pub text_content: Option<String>,
    pub language: Option<String>,
    pub media_type: Option<String>,
    pub url: Option<String>,
    pub tool_name: Option<String>,
    pub tool_use_id: Option<String>,
    pub is_error: bool,
    pub created_at: String,
}

/// A `prompt_responses` row.
#[derive(Debug, Clone)]
pub struct PromptResponseRow {
    pub id: i64,
    pub dialogue_id: i64,
    pub prompt_message_id: i64,
    pub response_message_id: i64,
    pub prompt_position: i64,
    pub response_position: i64,
    pub prompt_role: Role,
    pub response_role: Role,
    pub created_at: String,
}

/// Per-run outcome counts reported by `import-*`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportCounts {
    pub new: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl std::fmt::Display for ImportCounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} new, {} updated, {} skipped, {} failed",
            self.new, self.updated, self.skipped, self.failed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trip() {
        for (input, expected) in [
            ("user", Role::User),
            ("human", Role::User),
            ("ASSISTANT", Role::Assistant),
            ("system", Role::System),
            ("tool", Role::Tool),
        ] {
            assert_eq!(Role::parse(input), Some(expected), "input: {input}");
        }
        assert_eq!(Role::parse("moderator"), None);
    }

    #[test]
    fn timestamp_format_is_fixed_width() {
        let a = parse_ts("2024-01-02T03:04:05Z").unwrap();
        let b = parse_ts("2024-01-02T03:04:05.000001Z").unwrap();
        let (fa, fb) = (format_ts(a), format_ts(b));
        assert_eq!(fa.len(), fb.len());
        assert!(fa < fb);
        assert!(EPOCH_TS < fa.as_str());
    }

    #[test]
    fn part_kind_and_text() {
        let p = ContentPart::Code {
            text: "fn main() {}".into(),
            language: Some("rust".into()),
        };
        assert_eq!(p.kind(), "code");
        assert_eq!(p.text(), Some("fn main() {}"));
        assert_eq!(
            ContentPart::Image {
                media_type: None,
                url: None,
                source_json: None
            }
            .text(),
            None
        );
    }
}
