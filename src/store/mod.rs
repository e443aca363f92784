//! Store gateway: the single access layer for the raw tables and the
//! derived pair tables.
//!
//! Every function here takes `&Connection` so it works equally inside a
//! `Transaction` (which derefs to `Connection`). Units of work — one
//! dialogue's sync, one annotator's run — open their own transaction on
//! [`Store::conn`] and commit or roll back as a whole.
//!
//! The 16-table annotation matrix has its own typed accessor in
//! `crate::annotations::store`.

pub mod schema;

use std::collections::HashMap;
use std::path::Path;

use eyre::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;

use crate::model::{
    ChatGptExtras, ContentPart, ContentPartRow, DialogueRow, IncomingMessage, MessageExtras,
    MessageRow, PromptResponseRow, Role,
};

/// Owns the SQLite connection. Opening a store applies the schema, which is
/// idempotent, so every subcommand can just open and go.
pub struct Store {
    pub conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .wrap_err_with(|| format!("Failed to open database: {}", path.display()))?;
        Self::setup(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().wrap_err("Failed to open in-memory database")?;
        Self::setup(conn)
    }

    fn setup(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .wrap_err("Failed to enable foreign keys")?;
        schema::init_db(&conn).wrap_err("Failed to apply schema")?;
        Ok(Store { conn })
    }
}

fn json_text(value: Option<&Value>) -> Option<String> {
    value.map(|v| v.to_string())
}

// ---------------------------------------------------------------------------
// Sources and dialogues
// ---------------------------------------------------------------------------

pub fn find_source_id(conn: &Connection, name: &str) -> rusqlite::Result<i64> {
    conn.query_row("SELECT id FROM sources WHERE name = ?1", [name], |r| {
        r.get(0)
    })
}

/// The slice of an existing dialogue row the extractor needs for the
/// skip-or-resync decision.
#[derive(Debug, Clone)]
pub struct ExistingDialogue {
    pub id: i64,
    pub source_updated_at: Option<String>,
}

pub fn find_dialogue(
    conn: &Connection,
    source_id: i64,
    external_id: &str,
) -> rusqlite::Result<Option<ExistingDialogue>> {
    conn.query_row(
        "SELECT id, source_updated_at FROM dialogues
         WHERE source_id = ?1 AND external_id = ?2",
        params![source_id, external_id],
        |r| {
            Ok(ExistingDialogue {
                id: r.get(0)?,
                source_updated_at: r.get(1)?,
            })
        },
    )
    .optional()
}

#[allow(clippy::too_many_arguments)]
pub fn insert_dialogue(
    conn: &Connection,
    source_id: i64,
    external_id: &str,
    title: Option<&str>,
    source_created_at: Option<&str>,
    source_updated_at: Option<&str>,
    raw_json: &str,
    now: &str,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO dialogues
            (source_id, external_id, title, source_created_at, source_updated_at,
             raw_json, imported_at, last_synced_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
        params![
            source_id,
            external_id,
            title,
            source_created_at,
            source_updated_at,
            raw_json,
            now
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn update_dialogue(
    conn: &Connection,
    id: i64,
    title: Option<&str>,
    source_created_at: Option<&str>,
    source_updated_at: Option<&str>,
    raw_json: &str,
    now: &str,
) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE dialogues
         SET title = ?2, source_created_at = ?3, source_updated_at = ?4,
             raw_json = ?5, last_synced_at = ?6
         WHERE id = ?1",
        params![id, title, source_created_at, source_updated_at, raw_json, now],
    )?;
    Ok(())
}

pub fn all_dialogue_ids(conn: &Connection) -> rusqlite::Result<Vec<i64>> {
    let mut stmt = conn.prepare("SELECT id FROM dialogues ORDER BY id")?;
    let ids = stmt
        .query_map([], |r| r.get(0))?
        .collect::<rusqlite::Result<Vec<i64>>>()?;
    Ok(ids)
}

pub fn dialogues_since(conn: &Connection, cursor: &str) -> rusqlite::Result<Vec<DialogueRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, source_id, external_id, title, source_created_at, source_updated_at,
                imported_at
         FROM dialogues WHERE imported_at > ?1
         ORDER BY imported_at, id",
    )?;
    let rows = stmt
        .query_map([cursor], |r| {
            Ok(DialogueRow {
                id: r.get(0)?,
                source_id: r.get(1)?,
                external_id: r.get(2)?,
                title: r.get(3)?,
                source_created_at: r.get(4)?,
                source_updated_at: r.get(5)?,
                imported_at: r.get(6)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// The slice of an existing message row the reconciliation loop keys on.
#[derive(Debug, Clone)]
pub struct ExistingMessage {
    pub id: i64,
    pub content_hash: Option<String>,
    pub deleted_at: Option<String>,
}

pub fn existing_messages(
    conn: &Connection,
    dialogue_id: i64,
) -> rusqlite::Result<HashMap<String, ExistingMessage>> {
    let mut stmt = conn.prepare(
        "SELECT external_id, id, content_hash, deleted_at
         FROM messages WHERE dialogue_id = ?1",
    )?;
    let mut map = HashMap::new();
    let rows = stmt.query_map([dialogue_id], |r| {
        Ok((
            r.get::<_, String>(0)?,
            ExistingMessage {
                id: r.get(1)?,
                content_hash: r.get(2)?,
                deleted_at: r.get(3)?,
            },
        ))
    })?;
    for row in rows {
        let (external_id, existing) = row?;
        map.insert(external_id, existing);
    }
    Ok(map)
}

/// Insert the message row itself. Parent pointers start NULL; the fixup
/// pass resolves them once every incoming message has an internal id.
pub fn insert_message(
    conn: &Connection,
    dialogue_id: i64,
    msg: &IncomingMessage,
    content_hash: &str,
    now: &str,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO messages
            (dialogue_id, external_id, parent_id, role, author_name, author_metadata,
             source_created_at, source_updated_at, content_hash, deleted_at, created_at)
         VALUES (?1, ?2, NULL, ?3, ?4, ?5, ?6, ?7, ?8, NULL, ?9)",
        params![
            dialogue_id,
            msg.external_id,
            msg.role,
            msg.author_name,
            json_text(msg.author_metadata.as_ref()),
            msg.source_created_at.map(crate::model::format_ts),
            msg.source_updated_at.map(crate::model::format_ts),
            content_hash,
            now
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// In-place update after a content-hash mismatch. Clears `deleted_at` and
/// the parent pointer; the fixup pass re-resolves the parent.
pub fn update_message_in_place(
    conn: &Connection,
    id: i64,
    msg: &IncomingMessage,
    content_hash: &str,
) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE messages
         SET role = ?2, author_name = ?3, author_metadata = ?4,
             source_created_at = ?5, source_updated_at = ?6,
             content_hash = ?7, parent_id = NULL, deleted_at = NULL
         WHERE id = ?1",
        params![
            id,
            msg.role,
            msg.author_name,
            json_text(msg.author_metadata.as_ref()),
            msg.source_created_at.map(crate::model::format_ts),
            msg.source_updated_at.map(crate::model::format_ts),
            content_hash
        ],
    )?;
    Ok(())
}

pub fn restore_message(conn: &Connection, id: i64) -> rusqlite::Result<()> {
    conn.execute("UPDATE messages SET deleted_at = NULL WHERE id = ?1", [id])?;
    Ok(())
}

pub fn soft_delete_message(conn: &Connection, id: i64, now: &str) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE messages SET deleted_at = ?2 WHERE id = ?1",
        params![id, now],
    )?;
    Ok(())
}

pub fn set_message_parent(
    conn: &Connection,
    id: i64,
    parent_id: Option<i64>,
) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE messages SET parent_id = ?2 WHERE id = ?1",
        params![id, parent_id],
    )?;
    Ok(())
}

/// Remove every dependent row of a message ahead of a rebuild: content
/// parts (whose annotations cascade), citations, attachments, platform
/// extension rows, and the message's own annotations.
pub fn purge_message_children(conn: &Connection, message_id: i64) -> rusqlite::Result<()> {
    for sql in [
        "DELETE FROM content_parts WHERE message_id = ?1",
        "DELETE FROM citations WHERE message_id = ?1",
        "DELETE FROM attachments WHERE message_id = ?1",
        "DELETE FROM chatgpt_message_meta WHERE message_id = ?1",
        "DELETE FROM chatgpt_search_groups WHERE message_id = ?1",
        "DELETE FROM chatgpt_code_executions WHERE message_id = ?1",
        "DELETE FROM chatgpt_dalle_generations WHERE message_id = ?1",
        "DELETE FROM chatgpt_canvas_docs WHERE message_id = ?1",
        "DELETE FROM claude_message_meta WHERE message_id = ?1",
        "DELETE FROM message_annotations_flag WHERE entity_id = ?1",
        "DELETE FROM message_annotations_string WHERE entity_id = ?1",
        "DELETE FROM message_annotations_numeric WHERE entity_id = ?1",
        "DELETE FROM message_annotations_json WHERE entity_id = ?1",
    ] {
        conn.execute(sql, [message_id])?;
    }
    Ok(())
}

/// Messages of a dialogue that are not soft-deleted, ordered by
/// `(source_created_at, id)`. SQLite sorts NULL timestamps first, which is
/// the ordering the pair builder wants.
pub fn active_dialogue_messages(
    conn: &Connection,
    dialogue_id: i64,
) -> rusqlite::Result<Vec<MessageRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, dialogue_id, external_id, parent_id, role, source_created_at,
                deleted_at, created_at
         FROM messages
         WHERE dialogue_id = ?1 AND deleted_at IS NULL
         ORDER BY source_created_at, id",
    )?;
    let rows = stmt
        .query_map([dialogue_id], map_message_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn messages_since(conn: &Connection, cursor: &str) -> rusqlite::Result<Vec<MessageRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, dialogue_id, external_id, parent_id, role, source_created_at,
                deleted_at, created_at
         FROM messages
         WHERE deleted_at IS NULL AND created_at > ?1
         ORDER BY created_at, id",
    )?;
    let rows = stmt
        .query_map([cursor], map_message_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

fn map_message_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: r.get(0)?,
        dialogue_id: r.get(1)?,
        external_id: r.get(2)?,
        parent_id: r.get(3)?,
        role: r.get(4)?,
        source_created_at: r.get(5)?,
        deleted_at: r.get(6)?,
        created_at: r.get(7)?,
    })
}

// ---------------------------------------------------------------------------
// Content parts, citations, attachments, platform extras
// ---------------------------------------------------------------------------

/// Write everything a message carries besides its own row: ordered content
/// parts, citations, attachments, and platform extension rows.
pub fn insert_message_content(
    conn: &Connection,
    message_id: i64,
    msg: &IncomingMessage,
    now: &str,
) -> rusqlite::Result<()> {
    insert_content_parts(conn, message_id, &msg.parts, now)?;
    for (i, citation) in msg.citations.iter().enumerate() {
        conn.execute(
            "INSERT INTO citations (message_id, sequence, title, url, snippet, source_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                message_id,
                i as i64,
                citation.title,
                citation.url,
                citation.snippet,
                json_text(citation.source_json.as_ref())
            ],
        )?;
    }
    for attachment in &msg.attachments {
        conn.execute(
            "INSERT INTO attachments (message_id, file_name, media_type, size_bytes, url, source_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                message_id,
                attachment.file_name,
                attachment.media_type,
                attachment.size_bytes,
                attachment.url,
                json_text(attachment.source_json.as_ref())
            ],
        )?;
    }
    match &msg.extras {
        MessageExtras::None => {}
        MessageExtras::ChatGpt(extras) => insert_chatgpt_extras(conn, message_id, extras)?,
        MessageExtras::Claude(meta) => {
            conn.execute(
                "INSERT INTO claude_message_meta (message_id, sender, stop_reason, source_json)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(message_id) DO UPDATE SET
                    sender = excluded.sender,
                    stop_reason = excluded.stop_reason,
                    source_json = excluded.source_json",
                params![
                    message_id,
                    meta.sender,
                    meta.stop_reason,
                    json_text(meta.source_json.as_ref())
                ],
            )?;
        }
    }
    Ok(())
}

fn insert_content_parts(
    conn: &Connection,
    message_id: i64,
    parts: &[ContentPart],
    now: &str,
) -> rusqlite::Result<()> {
    let mut stmt = conn.prepare(
        "INSERT INTO content_parts
            (message_id, sequence, part_type, text_content, language, media_type, url,
             tool_name, tool_use_id, tool_input, is_error, source_json, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
    )?;
    for (i, part) in parts.iter().enumerate() {
        let mut language: Option<&str> = None;
        let mut media_type: Option<&str> = None;
        let mut url: Option<&str> = None;
        let mut tool_name: Option<&str> = None;
        let mut tool_use_id: Option<&str> = None;
        let mut tool_input: Option<String> = None;
        let mut is_error = false;
        let mut source_json: Option<String> = None;
        match part {
            ContentPart::Text { .. }
            | ContentPart::Thinking { .. }
            | ContentPart::Canvas { .. } => {}
            ContentPart::Code { language: lang, .. } => language = lang.as_deref(),
            ContentPart::Image {
                media_type: mt,
                url: u,
                source_json: src,
            }
            | ContentPart::Audio {
                media_type: mt,
                url: u,
                source_json: src,
            }
            | ContentPart::Video {
                media_type: mt,
                url: u,
                source_json: src,
            } => {
                media_type = mt.as_deref();
                url = u.as_deref();
                source_json = json_text(src.as_ref());
            }
            ContentPart::ToolUse {
                tool_name: name,
                tool_use_id: use_id,
                tool_input: input,
            } => {
                tool_name = Some(name);
                tool_use_id = use_id.as_deref();
                tool_input = json_text(input.as_ref());
            }
            ContentPart::ToolResult {
                tool_use_id: use_id,
                is_error: err,
                source_json: src,
                ..
            } => {
                tool_use_id = use_id.as_deref();
                is_error = *err;
                source_json = json_text(src.as_ref());
            }
            ContentPart::Unknown { source_json: src } => {
                source_json = Some(src.to_string());
            }
        }
        stmt.execute(params![
            message_id,
            i as i64,
            part.kind(),
            part.text(),
            language,
            media_type,
            url,
            tool_name,
            tool_use_id,
            tool_input,
            is_error,
            source_json,
            now
        ])?;
    }
    Ok(())
}

fn insert_chatgpt_extras(
    conn: &Connection,
    message_id: i64,
    extras: &ChatGptExtras,
) -> rusqlite::Result<()> {
    if let Some(meta) = &extras.meta {
        conn.execute(
            "INSERT INTO chatgpt_message_meta
                (message_id, model_slug, request_id, recipient, channel, source_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(message_id) DO UPDATE SET
                model_slug = excluded.model_slug,
                request_id = excluded.request_id,
                recipient = excluded.recipient,
                channel = excluded.channel,
                source_json = excluded.source_json",
            params![
                message_id,
                meta.model_slug,
                meta.request_id,
                meta.recipient,
                meta.channel,
                json_text(meta.source_json.as_ref())
            ],
        )?;
    }
    for (gi, group) in extras.search_groups.iter().enumerate() {
        conn.execute(
            "INSERT INTO chatgpt_search_groups (message_id, sequence, group_type, summary)
             VALUES (?1, ?2, ?3, ?4)",
            params![message_id, gi as i64, group.group_type, group.summary],
        )?;
        let group_id = conn.last_insert_rowid();
        for (ei, entry) in group.entries.iter().enumerate() {
            conn.execute(
                "INSERT INTO chatgpt_search_entries
                    (group_id, sequence, title, url, snippet, attribution)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    group_id,
                    ei as i64,
                    entry.title,
                    entry.url,
                    entry.snippet,
                    entry.attribution
                ],
            )?;
        }
    }
    for execution in &extras.code_executions {
        conn.execute(
            "INSERT INTO chatgpt_code_executions (message_id, code, language, status)
             VALUES (?1, ?2, ?3, ?4)",
            params![message_id, execution.code, execution.language, execution.status],
        )?;
        let execution_id = conn.last_insert_rowid();
        for (oi, output) in execution.outputs.iter().enumerate() {
            conn.execute(
                "INSERT INTO chatgpt_code_outputs
                    (execution_id, sequence, output_type, text_content)
                 VALUES (?1, ?2, ?3, ?4)",
                params![execution_id, oi as i64, output.output_type, output.text_content],
            )?;
        }
    }
    for generation in &extras.dalle_generations {
        conn.execute(
            "INSERT INTO chatgpt_dalle_generations
                (message_id, prompt, asset_pointer, width, height, seed, gen_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                message_id,
                generation.prompt,
                generation.asset_pointer,
                generation.width,
                generation.height,
                generation.seed,
                generation.gen_id
            ],
        )?;
    }
    for doc in &extras.canvas_docs {
        conn.execute(
            "INSERT INTO chatgpt_canvas_docs
                (message_id, textdoc_id, version, doc_type, title, content)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                message_id,
                doc.textdoc_id,
                doc.version,
                doc.doc_type,
                doc.title,
                doc.content
            ],
        )?;
    }
    Ok(())
}

pub fn find_part_id(
    conn: &Connection,
    message_id: i64,
    sequence: i64,
) -> rusqlite::Result<Option<i64>> {
    conn.query_row(
        "SELECT id FROM content_parts WHERE message_id = ?1 AND sequence = ?2",
        params![message_id, sequence],
        |r| r.get(0),
    )
    .optional()
}

pub fn content_parts_since(
    conn: &Connection,
    cursor: &str,
) -> rusqlite::Result<Vec<ContentPartRow>> {
    let mut stmt = conn.prepare(
        "SELECT p.id, p.message_id, p.sequence, p.part_type, p.text_content, p.language,
                p.media_type, p.url, p.tool_name, p.tool_use_id, p.is_error, p.created_at
         FROM content_parts p
         JOIN messages m ON m.id = p.message_id
         WHERE m.deleted_at IS NULL AND p.created_at > ?1
         ORDER BY p.created_at, p.id",
    )?;
    let rows = stmt
        .query_map([cursor], |r| {
            Ok(ContentPartRow {
                id: r.get(0)?,
                message_id: r.get(1)?,
                sequence: r.get(2)?,
                part_type: r.get(3)?,
                text_content: r.get(4)?,
                language: r.get(5)?,
                media_type: r.get(6)?,
                url: r.get(7)?,
                tool_name: r.get(8)?,
                tool_use_id: r.get(9)?,
                is_error: r.get(10)?,
                created_at: r.get(11)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Ordered `text` part contents of a message, for pair content aggregation.
pub fn message_text_parts(conn: &Connection, message_id: i64) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT text_content FROM content_parts
         WHERE message_id = ?1 AND part_type = 'text' AND text_content IS NOT NULL
         ORDER BY sequence",
    )?;
    let rows = stmt
        .query_map([message_id], |r| r.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Prompt/response pairs
// ---------------------------------------------------------------------------

/// Drop all derived pairs for a dialogue; their content rows and
/// annotations cascade.
pub fn clear_prompt_responses(conn: &Connection, dialogue_id: i64) -> rusqlite::Result<()> {
    conn.execute(
        "DELETE FROM prompt_responses WHERE dialogue_id = ?1",
        [dialogue_id],
    )?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub fn insert_prompt_response(
    conn: &Connection,
    dialogue_id: i64,
    prompt_message_id: i64,
    response_message_id: i64,
    prompt_position: i64,
    response_position: i64,
    prompt_role: Role,
    response_role: Role,
    now: &str,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO prompt_responses
            (dialogue_id, prompt_message_id, response_message_id,
             prompt_position, response_position, prompt_role, response_role, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            dialogue_id,
            prompt_message_id,
            response_message_id,
            prompt_position,
            response_position,
            prompt_role,
            response_role,
            now
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn insert_prompt_response_content(
    conn: &Connection,
    prompt_response_id: i64,
    prompt_text: &str,
    response_text: &str,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO prompt_response_content
            (prompt_response_id, prompt_text, response_text,
             prompt_word_count, response_word_count)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            prompt_response_id,
            prompt_text,
            response_text,
            prompt_text.split_whitespace().count() as i64,
            response_text.split_whitespace().count() as i64
        ],
    )?;
    Ok(())
}

/// A pair plus its aggregated content, as seen by annotators.
#[derive(Debug, Clone)]
pub struct PromptResponseData {
    pub pair: PromptResponseRow,
    pub prompt_text: String,
    pub response_text: String,
}

pub fn prompt_responses_since(
    conn: &Connection,
    cursor: &str,
) -> rusqlite::Result<Vec<PromptResponseData>> {
    let mut stmt = conn.prepare(
        "SELECT pr.id, pr.dialogue_id, pr.prompt_message_id, pr.response_message_id,
                pr.prompt_position, pr.response_position, pr.prompt_role, pr.response_role,
                pr.created_at, c.prompt_text, c.response_text
         FROM prompt_responses pr
         JOIN prompt_response_content c ON c.prompt_response_id = pr.id
         WHERE pr.created_at > ?1
         ORDER BY pr.created_at, pr.id",
    )?;
    let rows = stmt
        .query_map([cursor], |r| {
            Ok(PromptResponseData {
                pair: PromptResponseRow {
                    id: r.get(0)?,
                    dialogue_id: r.get(1)?,
                    prompt_message_id: r.get(2)?,
                    response_message_id: r.get(3)?,
                    prompt_position: r.get(4)?,
                    response_position: r.get(5)?,
                    prompt_role: r.get(6)?,
                    response_role: r.get(7)?,
                    created_at: r.get(8)?,
                },
                prompt_text: r.get(9)?,
                response_text: r.get(10)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

pub fn table_counts(conn: &Connection) -> rusqlite::Result<Vec<(String, i64)>> {
    let mut counts = Vec::new();
    for table in schema::all_tables() {
        let count: i64 =
            conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))?;
        counts.push((table, count));
    }
    Ok(counts)
}
