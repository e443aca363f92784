//! Tree-native adapter for ChatGPT-style exports.
//!
//! A `conversations.json` export is an array of conversation objects, each
//! holding an id-keyed `mapping` of nodes with explicit parent/children
//! pointers. Nodes without a `message` are routing nodes and carry no
//! content; parent pointers are resolved through them so the message graph
//! stays connected.
//!
//! Content objects are discriminated by `content_type`; recognized types
//! translate to typed [`ContentPart`]s, anything else becomes an `unknown`
//! part carrying the original object. Platform-specific payloads found in
//! message metadata (web-search groups, code executions, DALL·E
//! generations, canvas documents) land in the `chatgpt_*` extension
//! tables.
//!
//! Field layout last verified against exports produced in 2024; unknown
//! fields are ignored, absent fields default.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use eyre::Result;
use rusqlite::Connection;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use super::PlatformAdapter;
use crate::annotations::store::{self as ann, Provenance};
use crate::annotations::EntityKind;
use crate::model::{
    Attachment, CanvasDoc, ChatGptExtras, ChatGptMessageMeta, Citation, CodeExecution, CodeOutput,
    ContentPart, DalleGeneration, IncomingDialogue, IncomingMessage, MessageExtras, Role,
    SearchEntry, SearchGroup,
};
use crate::store;

/// Provenance tag on rows written during ingestion (priority band:
/// platform ground truth).
const SOURCE: &str = "chatgpt_import";

// ---------------------------------------------------------------------------
// Export shapes
// ---------------------------------------------------------------------------

/// One conversation object. Exports carry the external id both as `id`
/// and `conversation_id`; either may be missing in older dumps.
#[derive(Debug, Deserialize)]
struct Conversation {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    conversation_id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    create_time: Option<f64>,
    #[serde(default)]
    update_time: Option<f64>,
    #[serde(default)]
    mapping: HashMap<String, Node>,
}

/// One node of the conversation tree. `message` is absent on routing
/// nodes (the synthetic root, client-side placeholders).
#[derive(Debug, Deserialize)]
struct Node {
    #[serde(default)]
    parent: Option<String>,
    #[serde(default)]
    message: Option<NodeMessage>,
}

#[derive(Debug, Deserialize)]
struct NodeMessage {
    author: Author,
    #[serde(default)]
    create_time: Option<f64>,
    #[serde(default)]
    update_time: Option<f64>,
    /// Polymorphic content object, translated by [`translate_content`].
    content: Value,
    #[serde(default)]
    metadata: Value,
    #[serde(default)]
    recipient: Option<String>,
    #[serde(default)]
    channel: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Author {
    role: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    metadata: Option<Value>,
}

/// Export timestamps are fractional epoch seconds.
fn from_epoch(t: f64) -> Option<DateTime<Utc>> {
    let secs = t.trunc() as i64;
    let nanos = (t.fract() * 1e9) as u32;
    DateTime::from_timestamp(secs, nanos)
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

pub struct ChatGptAdapter;

impl PlatformAdapter for ChatGptAdapter {
    fn source_name(&self) -> &'static str {
        "chatgpt"
    }

    fn parse_dialogue(&self, raw: &Value) -> Result<Option<IncomingDialogue>> {
        let conversation: Conversation = serde_json::from_value(raw.clone())?;
        let Some(external_id) = conversation
            .conversation_id
            .clone()
            .or_else(|| conversation.id.clone())
        else {
            return Ok(None);
        };

        // Message-bearing nodes, in source creation order so sequential
        // fallbacks downstream see the conversation the way it ran.
        let mut node_ids: Vec<&String> = conversation
            .mapping
            .iter()
            .filter(|(_, node)| node.message.is_some())
            .map(|(id, _)| id)
            .collect();
        node_ids.sort_unstable_by(|a, b| {
            let ta = conversation.mapping[*a]
                .message
                .as_ref()
                .and_then(|m| m.create_time);
            let tb = conversation.mapping[*b]
                .message
                .as_ref()
                .and_then(|m| m.create_time);
            ta.partial_cmp(&tb)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.cmp(b))
        });

        let mut messages = Vec::with_capacity(node_ids.len());
        for node_id in node_ids {
            let node = &conversation.mapping[node_id];
            let Some(msg) = node.message.as_ref() else {
                continue;
            };
            let Some(role) = Role::parse(&msg.author.role) else {
                warn!(
                    external_id = %external_id,
                    node_id = %node_id,
                    role = %msg.author.role,
                    "unknown author role, skipping message"
                );
                continue;
            };
            messages.push(translate_message(
                node_id.clone(),
                message_parent(&conversation.mapping, node_id),
                role,
                msg,
            ));
        }

        Ok(Some(IncomingDialogue {
            external_id,
            title: conversation.title,
            source_created_at: conversation.create_time.and_then(from_epoch),
            source_updated_at: conversation.update_time.and_then(from_epoch),
            raw: raw.clone(),
            messages,
        }))
    }

    fn after_message_write(
        &self,
        conn: &Connection,
        message_id: i64,
        msg: &IncomingMessage,
    ) -> Result<()> {
        let MessageExtras::ChatGpt(extras) = &msg.extras else {
            return Ok(());
        };
        // Ground-truth annotations on the synthetic canvas parts.
        for doc in &extras.canvas_docs {
            let Some(sequence) = doc.part_sequence else {
                continue;
            };
            let Some(part_id) = store::find_part_id(conn, message_id, sequence)? else {
                continue;
            };
            let prov = Provenance {
                source: SOURCE,
                ..Default::default()
            };
            if let Some(textdoc_id) = doc.textdoc_id.as_deref() {
                ann::write_string(
                    conn,
                    EntityKind::ContentPart,
                    part_id,
                    "canvas_textdoc_id",
                    textdoc_id,
                    prov,
                )?;
            }
            if let Some(title) = doc.title.as_deref() {
                ann::write_string(
                    conn,
                    EntityKind::ContentPart,
                    part_id,
                    "canvas_title",
                    title,
                    prov,
                )?;
            }
            if let Some(version) = doc.version {
                ann::write_numeric(
                    conn,
                    EntityKind::ContentPart,
                    part_id,
                    "canvas_version",
                    version as f64,
                    prov,
                )?;
            }
        }
        Ok(())
    }

    /// Flag the highest canvas revision per `textdoc_id` as latest. Runs
    /// over the whole dialogue so a re-import moves the flag forward.
    fn post_sync(&self, conn: &Connection, dialogue_id: i64) -> Result<()> {
        let mut stmt = conn.prepare(
            "SELECT p.id FROM content_parts p
             JOIN messages m ON m.id = p.message_id
             WHERE m.dialogue_id = ?1 AND p.part_type = 'canvas'",
        )?;
        let part_ids = stmt
            .query_map([dialogue_id], |r| r.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        for part_id in &part_ids {
            ann::delete_flag(conn, EntityKind::ContentPart, *part_id, "canvas_latest")?;
        }

        let mut stmt = conn.prepare(
            "SELECT d.textdoc_id, MAX(d.version) FROM chatgpt_canvas_docs d
             JOIN messages m ON m.id = d.message_id
             WHERE m.dialogue_id = ?1
               AND d.textdoc_id IS NOT NULL AND d.version IS NOT NULL
             GROUP BY d.textdoc_id",
        )?;
        let winners = stmt
            .query_map([dialogue_id], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        for (textdoc_id, version) in winners {
            let candidates = ann::find_entities_with_string(
                conn,
                EntityKind::ContentPart,
                "canvas_textdoc_id",
                Some(&textdoc_id),
            )?;
            for part_id in candidates {
                let versions =
                    ann::get_numerics(conn, EntityKind::ContentPart, part_id, "canvas_version")?;
                if versions.contains(&(version as f64)) {
                    ann::write_flag(
                        conn,
                        EntityKind::ContentPart,
                        part_id,
                        "canvas_latest",
                        Provenance {
                            source: SOURCE,
                            ..Default::default()
                        },
                    )?;
                }
            }
        }
        Ok(())
    }
}

/// Nearest message-bearing ancestor of a node, skipping routing nodes.
/// Guards against cycles; a chain that ends at routing nodes yields None.
fn message_parent(mapping: &HashMap<String, Node>, node_id: &str) -> Option<String> {
    let mut visited = std::collections::HashSet::new();
    visited.insert(node_id.to_string());
    let mut current = mapping.get(node_id)?.parent.as_deref();
    while let Some(parent_id) = current {
        if !visited.insert(parent_id.to_string()) {
            return None;
        }
        let parent = mapping.get(parent_id)?;
        if parent.message.is_some() {
            return Some(parent_id.to_string());
        }
        current = parent.parent.as_deref();
    }
    None
}

fn translate_message(
    external_id: String,
    parent_external_id: Option<String>,
    role: Role,
    msg: &NodeMessage,
) -> IncomingMessage {
    let (parts, mut extras) = translate_content(&msg.content);
    extras.meta = message_meta(msg);
    extras.search_groups = search_groups(&msg.metadata);
    extras.code_executions = code_executions(&msg.metadata);
    let citations = citations(&msg.metadata);
    let attachments = attachments(&msg.metadata);

    // A canvas operation is an ordinary tool message plus a `canvas`
    // object in metadata; it gets a synthetic part so the revision is
    // addressable as an entity.
    let mut parts = parts;
    if let Some(canvas) = msg.metadata.get("canvas").filter(|v| v.is_object()) {
        let text: String = parts
            .iter()
            .filter_map(|p| p.text())
            .collect::<Vec<_>>()
            .join("\n");
        extras.canvas_docs.push(CanvasDoc {
            textdoc_id: str_field(canvas, "textdoc_id"),
            version: canvas.get("version").and_then(|v| v.as_i64()),
            doc_type: str_field(canvas, "textdoc_type"),
            title: str_field(canvas, "title"),
            content: Some(text.clone()),
            part_sequence: Some(parts.len() as i64),
        });
        parts.push(ContentPart::Canvas { text });
    }

    IncomingMessage {
        external_id,
        parent_external_id,
        role,
        author_name: msg.author.name.clone(),
        author_metadata: msg
            .author
            .metadata
            .clone()
            .filter(|v| v.as_object().is_none_or(|m| !m.is_empty())),
        source_created_at: msg.create_time.and_then(from_epoch),
        source_updated_at: msg.update_time.and_then(from_epoch),
        content: msg.content.clone(),
        parts,
        citations,
        attachments,
        extras: MessageExtras::ChatGpt(extras),
    }
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(|v| v.as_str()).map(String::from)
}

// ---------------------------------------------------------------------------
// Content translation
// ---------------------------------------------------------------------------

/// Translate a content object into parts; DALL·E generations referenced by
/// image parts are collected into the extras on the side.
fn translate_content(content: &Value) -> (Vec<ContentPart>, ChatGptExtras) {
    let mut extras = ChatGptExtras::default();
    let Some(content_type) = content.get("content_type").and_then(|v| v.as_str()) else {
        return (
            vec![ContentPart::Unknown {
                source_json: content.clone(),
            }],
            extras,
        );
    };

    let parts = match content_type {
        "text" => content
            .get("parts")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.as_str())
                    .map(|text| ContentPart::Text {
                        text: text.to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default(),
        "code" => vec![ContentPart::Code {
            text: str_field(content, "text").unwrap_or_default(),
            language: str_field(content, "language").filter(|l| l != "unknown"),
        }],
        "execution_output" => vec![ContentPart::ToolResult {
            tool_use_id: None,
            text: str_field(content, "text"),
            is_error: false,
            source_json: None,
        }],
        "thoughts" => content
            .get("thoughts")
            .and_then(|v| v.as_array())
            .map(|thoughts| {
                thoughts
                    .iter()
                    .map(|t| ContentPart::Thinking {
                        text: str_field(t, "content")
                            .or_else(|| str_field(t, "summary"))
                            .unwrap_or_default(),
                    })
                    .collect()
            })
            .unwrap_or_default(),
        "reasoning_recap" => vec![ContentPart::Text {
            text: str_field(content, "content").unwrap_or_default(),
        }],
        "multimodal_text" => content
            .get("parts")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .map(|item| translate_multimodal_part(item, &mut extras))
                    .collect()
            })
            .unwrap_or_default(),
        _ => vec![ContentPart::Unknown {
            source_json: content.clone(),
        }],
    };
    (parts, extras)
}

fn translate_multimodal_part(item: &Value, extras: &mut ChatGptExtras) -> ContentPart {
    if let Some(text) = item.as_str() {
        return ContentPart::Text {
            text: text.to_string(),
        };
    }
    let part_type = item.get("content_type").and_then(|v| v.as_str());
    match part_type {
        Some("image_asset_pointer") => {
            if let Some(dalle) = item
                .get("metadata")
                .and_then(|m| m.get("dalle"))
                .filter(|v| v.is_object())
            {
                extras.dalle_generations.push(DalleGeneration {
                    prompt: str_field(dalle, "prompt"),
                    asset_pointer: str_field(item, "asset_pointer"),
                    width: item.get("width").and_then(|v| v.as_i64()),
                    height: item.get("height").and_then(|v| v.as_i64()),
                    seed: dalle.get("seed").and_then(|v| v.as_i64()),
                    gen_id: str_field(dalle, "gen_id"),
                });
            }
            ContentPart::Image {
                media_type: None,
                url: str_field(item, "asset_pointer"),
                source_json: Some(item.clone()),
            }
        }
        Some("audio_transcription") => ContentPart::Text {
            text: str_field(item, "text").unwrap_or_default(),
        },
        Some("audio_asset_pointer") => ContentPart::Audio {
            media_type: None,
            url: str_field(item, "asset_pointer"),
            source_json: Some(item.clone()),
        },
        Some("video_container_asset_pointer")
        | Some("real_time_user_audio_video_asset_pointer") => ContentPart::Video {
            media_type: None,
            url: str_field(item, "asset_pointer"),
            source_json: Some(item.clone()),
        },
        _ => ContentPart::Unknown {
            source_json: item.clone(),
        },
    }
}

// ---------------------------------------------------------------------------
// Metadata extras
// ---------------------------------------------------------------------------

fn message_meta(msg: &NodeMessage) -> Option<ChatGptMessageMeta> {
    let model_slug = str_field(&msg.metadata, "model_slug");
    let request_id = str_field(&msg.metadata, "request_id");
    if model_slug.is_none()
        && request_id.is_none()
        && msg.recipient.is_none()
        && msg.channel.is_none()
    {
        return None;
    }
    Some(ChatGptMessageMeta {
        model_slug,
        request_id,
        recipient: msg.recipient.clone(),
        channel: msg.channel.clone(),
        source_json: None,
    })
}

fn attachments(metadata: &Value) -> Vec<Attachment> {
    metadata
        .get("attachments")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .map(|item| Attachment {
                    file_name: str_field(item, "name"),
                    media_type: str_field(item, "mime_type"),
                    size_bytes: item.get("size").and_then(|v| v.as_i64()),
                    url: None,
                    source_json: Some(item.clone()),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn citations(metadata: &Value) -> Vec<Citation> {
    metadata
        .get("citations")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .map(|item| {
                    let meta = item.get("metadata").unwrap_or(item);
                    Citation {
                        title: str_field(meta, "title"),
                        url: str_field(meta, "url"),
                        snippet: str_field(meta, "text"),
                        source_json: Some(item.clone()),
                    }
                })
                .collect()
        })
        .unwrap_or_default()
}

fn search_groups(metadata: &Value) -> Vec<SearchGroup> {
    metadata
        .get("search_result_groups")
        .and_then(|v| v.as_array())
        .map(|groups| {
            groups
                .iter()
                .map(|group| SearchGroup {
                    group_type: str_field(group, "type"),
                    summary: str_field(group, "domain"),
                    entries: group
                        .get("entries")
                        .and_then(|v| v.as_array())
                        .map(|entries| {
                            entries
                                .iter()
                                .map(|entry| SearchEntry {
                                    title: str_field(entry, "title"),
                                    url: str_field(entry, "url"),
                                    snippet: str_field(entry, "snippet"),
                                    attribution: str_field(entry, "attribution"),
                                })
                                .collect()
                        })
                        .unwrap_or_default(),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn code_executions(metadata: &Value) -> Vec<CodeExecution> {
    let Some(aggregate) = metadata.get("aggregate_result").filter(|v| v.is_object()) else {
        return Vec::new();
    };
    let outputs = aggregate
        .get("messages")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .map(|item| CodeOutput {
                    output_type: str_field(item, "message_type"),
                    text_content: str_field(item, "text"),
                })
                .collect()
        })
        .unwrap_or_default();
    vec![CodeExecution {
        code: str_field(aggregate, "code"),
        language: Some("python".to_string()),
        status: str_field(aggregate, "status"),
        outputs,
    }]
}
