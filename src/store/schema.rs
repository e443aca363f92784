//! Idempotent schema definition. Safe to apply on every startup — every
//! statement is `CREATE ... IF NOT EXISTS` or `INSERT OR IGNORE`.
//!
//! Two logical groups share one SQLite file: the `raw` tables mirror the
//! imported exports, the derived tables (`prompt_responses`, cursors, the
//! annotation matrix) are rebuildable from them.

use rusqlite::Connection;

/// `(entity_kind, owning raw/derived table)` pairs behind the 4×4
/// annotation matrix. `entity_id` in each annotation table references the
/// owner's `id` with `ON DELETE CASCADE`, so purging an entity purges its
/// annotations.
pub const ANNOTATION_ENTITIES: [(&str, &str); 4] = [
    ("content_part", "content_parts"),
    ("message", "messages"),
    ("prompt_response", "prompt_responses"),
    ("dialogue", "dialogues"),
];

pub const ANNOTATION_VALUE_KINDS: [&str; 4] = ["flag", "string", "numeric", "json"];

const RAW_DDL: &str = "
CREATE TABLE IF NOT EXISTS sources (
    id              INTEGER PRIMARY KEY,
    name            TEXT NOT NULL UNIQUE,
    display_name    TEXT NOT NULL,
    has_native_trees INTEGER NOT NULL DEFAULT 0,
    role_vocabulary TEXT NOT NULL DEFAULT '[]'
);

CREATE TABLE IF NOT EXISTS dialogues (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    source_id         INTEGER NOT NULL REFERENCES sources(id),
    external_id       TEXT NOT NULL,
    title             TEXT,
    source_created_at TEXT,
    source_updated_at TEXT,
    raw_json          TEXT NOT NULL,
    imported_at       TEXT NOT NULL,
    last_synced_at    TEXT NOT NULL,
    UNIQUE(source_id, external_id)
);

CREATE TABLE IF NOT EXISTS messages (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    dialogue_id       INTEGER NOT NULL REFERENCES dialogues(id) ON DELETE CASCADE,
    external_id       TEXT NOT NULL,
    parent_id         INTEGER REFERENCES messages(id),
    role              TEXT NOT NULL,
    author_name       TEXT,
    author_metadata   TEXT,
    source_created_at TEXT,
    source_updated_at TEXT,
    content_hash      TEXT,
    deleted_at        TEXT,
    created_at        TEXT NOT NULL,
    UNIQUE(dialogue_id, external_id)
);
CREATE INDEX IF NOT EXISTS idx_messages_dialogue
    ON messages(dialogue_id, source_created_at, id);

CREATE TABLE IF NOT EXISTS content_parts (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    message_id   INTEGER NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
    sequence     INTEGER NOT NULL,
    part_type    TEXT NOT NULL,
    text_content TEXT,
    language     TEXT,
    media_type   TEXT,
    url          TEXT,
    tool_name    TEXT,
    tool_use_id  TEXT,
    tool_input   TEXT,
    is_error     INTEGER NOT NULL DEFAULT 0,
    source_json  TEXT,
    created_at   TEXT NOT NULL,
    UNIQUE(message_id, sequence)
);
CREATE INDEX IF NOT EXISTS idx_content_parts_created
    ON content_parts(created_at, id);

CREATE TABLE IF NOT EXISTS citations (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    message_id  INTEGER NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
    sequence    INTEGER NOT NULL,
    title       TEXT,
    url         TEXT,
    snippet     TEXT,
    source_json TEXT
);

CREATE TABLE IF NOT EXISTS attachments (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    message_id  INTEGER NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
    file_name   TEXT,
    media_type  TEXT,
    size_bytes  INTEGER,
    url         TEXT,
    source_json TEXT
);
";

const CHATGPT_DDL: &str = "
CREATE TABLE IF NOT EXISTS chatgpt_message_meta (
    message_id  INTEGER PRIMARY KEY REFERENCES messages(id) ON DELETE CASCADE,
    model_slug  TEXT,
    request_id  TEXT,
    recipient   TEXT,
    channel     TEXT,
    source_json TEXT
);

CREATE TABLE IF NOT EXISTS chatgpt_search_groups (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    message_id INTEGER NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
    sequence   INTEGER NOT NULL,
    group_type TEXT,
    summary    TEXT
);

CREATE TABLE IF NOT EXISTS chatgpt_search_entries (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    group_id    INTEGER NOT NULL REFERENCES chatgpt_search_groups(id) ON DELETE CASCADE,
    sequence    INTEGER NOT NULL,
    title       TEXT,
    url         TEXT,
    snippet     TEXT,
    attribution TEXT
);

CREATE TABLE IF NOT EXISTS chatgpt_code_executions (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    message_id INTEGER NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
    code       TEXT,
    language   TEXT,
    status     TEXT
);

CREATE TABLE IF NOT EXISTS chatgpt_code_outputs (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    execution_id INTEGER NOT NULL REFERENCES chatgpt_code_executions(id) ON DELETE CASCADE,
    sequence     INTEGER NOT NULL,
    output_type  TEXT,
    text_content TEXT
);

CREATE TABLE IF NOT EXISTS chatgpt_dalle_generations (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    message_id    INTEGER NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
    prompt        TEXT,
    asset_pointer TEXT,
    width         INTEGER,
    height        INTEGER,
    seed          INTEGER,
    gen_id        TEXT
);

CREATE TABLE IF NOT EXISTS chatgpt_canvas_docs (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    message_id INTEGER NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
    textdoc_id TEXT,
    version    INTEGER,
    doc_type   TEXT,
    title      TEXT,
    content    TEXT
);
";

const CLAUDE_DDL: &str = "
CREATE TABLE IF NOT EXISTS claude_message_meta (
    message_id  INTEGER PRIMARY KEY REFERENCES messages(id) ON DELETE CASCADE,
    sender      TEXT,
    stop_reason TEXT,
    source_json TEXT
);
";

const DERIVED_DDL: &str = "
CREATE TABLE IF NOT EXISTS prompt_responses (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    dialogue_id         INTEGER NOT NULL REFERENCES dialogues(id) ON DELETE CASCADE,
    prompt_message_id   INTEGER NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
    response_message_id INTEGER NOT NULL UNIQUE REFERENCES messages(id) ON DELETE CASCADE,
    prompt_position     INTEGER NOT NULL,
    response_position   INTEGER NOT NULL,
    prompt_role         TEXT NOT NULL,
    response_role       TEXT NOT NULL,
    created_at          TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_prompt_responses_created
    ON prompt_responses(created_at, id);

CREATE TABLE IF NOT EXISTS prompt_response_content (
    prompt_response_id  INTEGER PRIMARY KEY REFERENCES prompt_responses(id) ON DELETE CASCADE,
    prompt_text         TEXT NOT NULL,
    response_text       TEXT NOT NULL,
    prompt_word_count   INTEGER NOT NULL,
    response_word_count INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS annotator_cursors (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    annotator_name      TEXT NOT NULL,
    annotator_version   TEXT NOT NULL,
    entity_kind         TEXT NOT NULL,
    high_water_mark     TEXT NOT NULL,
    entities_seen       INTEGER NOT NULL DEFAULT 0,
    annotations_written INTEGER NOT NULL DEFAULT 0,
    last_run_at         TEXT,
    UNIQUE(annotator_name, annotator_version, entity_kind)
);
";

/// DDL for one cell of the annotation matrix.
fn annotation_table_ddl(entity: &str, owner: &str, value_kind: &str) -> String {
    let value_column = match value_kind {
        "flag" => "",
        "numeric" => "annotation_value REAL NOT NULL,",
        _ => "annotation_value TEXT NOT NULL,",
    };
    let unique = match value_kind {
        "flag" | "json" => "UNIQUE(entity_id, key)",
        _ => "UNIQUE(entity_id, key, annotation_value)",
    };
    format!(
        "CREATE TABLE IF NOT EXISTS {entity}_annotations_{value_kind} (
            id             INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_id      INTEGER NOT NULL REFERENCES {owner}(id) ON DELETE CASCADE,
            key            TEXT NOT NULL,
            {value_column}
            confidence     REAL,
            reason         TEXT,
            source         TEXT NOT NULL,
            source_version TEXT,
            created_at     TEXT NOT NULL,
            {unique}
        );"
    )
}

/// Seed the static source catalog.
const SEED_SOURCES: &str = r#"
INSERT OR IGNORE INTO sources (name, display_name, has_native_trees, role_vocabulary) VALUES
    ('chatgpt', 'ChatGPT', 1, '["user","assistant","system","tool"]'),
    ('claude',  'Claude',  0, '["human","assistant"]');
"#;

/// Create every table and seed the source catalog. Idempotent.
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(RAW_DDL)?;
    conn.execute_batch(CHATGPT_DDL)?;
    conn.execute_batch(CLAUDE_DDL)?;
    conn.execute_batch(DERIVED_DDL)?;
    for (entity, owner) in ANNOTATION_ENTITIES {
        for value_kind in ANNOTATION_VALUE_KINDS {
            conn.execute_batch(&annotation_table_ddl(entity, owner, value_kind))?;
        }
    }
    conn.execute_batch(SEED_SOURCES)?;
    Ok(())
}

/// Every table name, in display order for `stats`.
pub fn all_tables() -> Vec<String> {
    let mut tables: Vec<String> = [
        "sources",
        "dialogues",
        "messages",
        "content_parts",
        "citations",
        "attachments",
        "chatgpt_message_meta",
        "chatgpt_search_groups",
        "chatgpt_search_entries",
        "chatgpt_code_executions",
        "chatgpt_code_outputs",
        "chatgpt_dalle_generations",
        "chatgpt_canvas_docs",
        "claude_message_meta",
        "prompt_responses",
        "prompt_response_content",
        "annotator_cursors",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    for (entity, _) in ANNOTATION_ENTITIES {
        for value_kind in ANNOTATION_VALUE_KINDS {
            tables.push(format!("{entity}_annotations_{value_kind}"));
        }
    }
    tables
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        init_db(&conn).unwrap();
        let sources: i64 = conn
            .query_row("SELECT COUNT(*) FROM sources", [], |r| r.get(0))
            .unwrap();
        assert_eq!(sources, 2);
    }

    #[test]
    fn all_tables_exist_after_init() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        for table in all_tables() {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                    [&table],
                    |r| r.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "missing table: {table}");
        }
        // 17 named + 16 annotation tables
        assert_eq!(all_tables().len(), 33);
    }
}
