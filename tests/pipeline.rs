//! End-to-end pipeline tests: import → build pairs → annotate, against an
//! in-memory store.

use indicatif::ProgressBar;
use serde_json::{Value, json};

use chat_ingest::annotations::runtime::run as run_annotators;
use chat_ingest::annotations::store as ann;
use chat_ingest::annotations::{EntityKind, detectors::builtin_annotators};
use chat_ingest::extract::{
    ExtractOptions, PlatformAdapter, chatgpt::ChatGptAdapter, claude::ClaudeAdapter,
    import_dialogues,
};
use chat_ingest::model::ImportCounts;
use chat_ingest::pairs::build_prompt_responses;
use chat_ingest::store::Store;

fn import(store: &mut Store, adapter: &dyn PlatformAdapter, raw: Value) -> ImportCounts {
    let dialogues = match raw {
        Value::Array(items) => items,
        other => vec![other],
    };
    import_dialogues(
        store,
        adapter,
        &dialogues,
        ExtractOptions::default(),
        &ProgressBar::hidden(),
    )
    .unwrap()
}

fn count(store: &Store, sql: &str) -> i64 {
    store.conn.query_row(sql, [], |r| r.get(0)).unwrap()
}

// ---------------------------------------------------------------------------
// ChatGPT scenarios
// ---------------------------------------------------------------------------

fn chatgpt_node(parent: Option<&str>, role: &str, text: &str, create_time: f64) -> Value {
    json!({
        "parent": parent,
        "children": [],
        "message": {
            "author": { "role": role },
            "create_time": create_time,
            "content": { "content_type": "text", "parts": [text] },
            "metadata": {},
        },
    })
}

#[test]
fn simple_linear_chatgpt_import_builds_two_pairs() {
    let raw = json!({
        "conversation_id": "conv-linear",
        "title": "linear",
        "create_time": 1700000000.0,
        "update_time": 1700000010.0,
        "mapping": {
            "root": chatgpt_node(None, "system", "", 1.0),
            "u1": chatgpt_node(Some("root"), "user", "first question", 2.0),
            "a1": chatgpt_node(Some("u1"), "assistant", "first answer", 3.0),
            "u2": chatgpt_node(Some("a1"), "user", "second question", 4.0),
            "a2": chatgpt_node(Some("u2"), "assistant", "second answer", 5.0),
        },
    });

    let mut store = Store::open_in_memory().unwrap();
    let counts = import(&mut store, &ChatGptAdapter, raw);
    assert_eq!(counts.new, 1);
    assert_eq!(count(&store, "SELECT COUNT(*) FROM messages"), 5);

    let built = build_prompt_responses(&mut store, None).unwrap();
    assert_eq!(built.pairs, 2);

    let rows: Vec<(String, String)> = {
        let mut stmt = store
            .conn
            .prepare(
                "SELECT c.prompt_text, c.response_text
                 FROM prompt_response_content c
                 JOIN prompt_responses pr ON pr.id = c.prompt_response_id
                 ORDER BY pr.response_position",
            )
            .unwrap();
        stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?)))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap()
    };
    assert_eq!(
        rows,
        vec![
            ("first question".to_string(), "first answer".to_string()),
            ("second question".to_string(), "second answer".to_string()),
        ]
    );
}

#[test]
fn branched_chatgpt_import_surfaces_regenerations() {
    let raw = json!({
        "conversation_id": "conv-branch",
        "update_time": 1700000010.0,
        "mapping": {
            "u1": chatgpt_node(None, "user", "prompt", 1.0),
            "a1_v1": chatgpt_node(Some("u1"), "assistant", "take one", 2.0),
            "a1_v2": chatgpt_node(Some("u1"), "assistant", "take two", 3.0),
        },
    });

    let mut store = Store::open_in_memory().unwrap();
    import(&mut store, &ChatGptAdapter, raw);
    build_prompt_responses(&mut store, None).unwrap();

    let prompts: Vec<i64> = {
        let mut stmt = store
            .conn
            .prepare("SELECT DISTINCT prompt_message_id FROM prompt_responses")
            .unwrap();
        stmt.query_map([], |r| r.get(0))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap()
    };
    assert_eq!(prompts.len(), 1, "both regenerations share one prompt");
    assert_eq!(count(&store, "SELECT COUNT(*) FROM prompt_responses"), 2);
    assert_eq!(
        count(
            &store,
            "SELECT COUNT(DISTINCT response_message_id) FROM prompt_responses"
        ),
        2
    );
}

#[test]
fn canvas_revisions_get_latest_flag() {
    let canvas_message = |parent: Option<&str>, version: i64, body: &str, t: f64| {
        json!({
            "parent": parent,
            "children": [],
            "message": {
                "author": { "role": "tool", "name": "canmore.create_textdoc" },
                "create_time": t,
                "content": { "content_type": "text", "parts": [body] },
                "metadata": { "canvas": {
                    "textdoc_id": "td1",
                    "version": version,
                    "textdoc_type": "document",
                    "title": "Draft",
                }},
            },
        })
    };
    let raw = json!({
        "conversation_id": "conv-canvas",
        "update_time": 1700000010.0,
        "mapping": {
            "c1": canvas_message(None, 1, "v1 body", 1.0),
            "c2": canvas_message(Some("c1"), 2, "v2 body", 2.0),
        },
    });

    let mut store = Store::open_in_memory().unwrap();
    import(&mut store, &ChatGptAdapter, raw);

    assert_eq!(count(&store, "SELECT COUNT(*) FROM chatgpt_canvas_docs"), 2);
    let latest = ann::find_entities_with_flag(&store.conn, EntityKind::ContentPart, "canvas_latest")
        .unwrap();
    assert_eq!(latest.len(), 1);
    let versions =
        ann::get_numerics(&store.conn, EntityKind::ContentPart, latest[0], "canvas_version")
            .unwrap();
    assert_eq!(versions, vec![2.0]);
    assert_eq!(
        ann::get_string_single(&store.conn, EntityKind::ContentPart, latest[0], "canvas_title")
            .unwrap()
            .as_deref(),
        Some("Draft")
    );
}

// ---------------------------------------------------------------------------
// Claude scenarios
// ---------------------------------------------------------------------------

fn claude_export(updated_at: &str, messages: Vec<Value>) -> Value {
    json!({
        "uuid": "conv-claude",
        "name": "claude conversation",
        "created_at": "2024-03-01T10:00:00Z",
        "updated_at": updated_at,
        "chat_messages": messages,
    })
}

#[test]
fn claude_tool_flow_imports_with_linear_parents() {
    let raw = claude_export(
        "2024-03-01T10:05:00Z",
        vec![
            json!({ "uuid": "m1", "sender": "human",
                    "content": [ { "type": "text", "text": "search X" } ],
                    "created_at": "2024-03-01T10:00:00Z" }),
            json!({ "uuid": "m2", "sender": "assistant",
                    "content": [
                        { "type": "thinking", "thinking": "hm" },
                        { "type": "tool_use", "id": "T", "name": "web_search", "input": { "q": "X" } },
                    ],
                    "created_at": "2024-03-01T10:01:00Z" }),
            json!({ "uuid": "m3",
                    "content": [ { "type": "tool_result", "tool_use_id": "T", "content": "hit" } ],
                    "created_at": "2024-03-01T10:02:00Z" }),
            json!({ "uuid": "m4", "sender": "assistant",
                    "content": [ { "type": "text", "text": "found X" } ],
                    "created_at": "2024-03-01T10:03:00Z" }),
        ],
    );

    let mut store = Store::open_in_memory().unwrap();
    import(&mut store, &ClaudeAdapter, raw);

    let kinds: Vec<String> = {
        let mut stmt = store
            .conn
            .prepare(
                "SELECT p.part_type FROM content_parts p
                 JOIN messages m ON m.id = p.message_id
                 ORDER BY m.id, p.sequence",
            )
            .unwrap();
        stmt.query_map([], |r| r.get(0))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap()
    };
    assert_eq!(kinds, vec!["text", "thinking", "tool_use", "tool_result", "text"]);

    let roles: Vec<String> = {
        let mut stmt = store
            .conn
            .prepare("SELECT role FROM messages ORDER BY id")
            .unwrap();
        stmt.query_map([], |r| r.get(0))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap()
    };
    assert_eq!(roles, vec!["user", "assistant", "tool", "assistant"]);

    // Parent chain is linear: each message's parent is its predecessor.
    let orphans = count(
        &store,
        "SELECT COUNT(*) FROM messages WHERE parent_id IS NULL",
    );
    assert_eq!(orphans, 1);

    // Both assistant turns pair with the single user message.
    build_prompt_responses(&mut store, None).unwrap();
    assert_eq!(
        count(
            &store,
            "SELECT COUNT(DISTINCT prompt_message_id) FROM prompt_responses"
        ),
        1
    );
    assert_eq!(count(&store, "SELECT COUNT(*) FROM prompt_responses"), 2);
}

#[test]
fn reimport_then_partial_then_restore() {
    let full = |updated_at: &str| {
        claude_export(
            updated_at,
            vec![
                json!({ "uuid": "m1", "sender": "human", "text": "one" }),
                json!({ "uuid": "m2", "sender": "assistant", "text": "two" }),
                json!({ "uuid": "m3", "sender": "human", "text": "three" }),
            ],
        )
    };
    let partial = claude_export(
        "2024-03-02T00:00:00Z",
        vec![
            json!({ "uuid": "m1", "sender": "human", "text": "one" }),
            json!({ "uuid": "m3", "sender": "human", "text": "three" }),
        ],
    );

    let mut store = Store::open_in_memory().unwrap();
    import(&mut store, &ClaudeAdapter, full("2024-03-01T00:00:00Z"));
    let ids_before: Vec<i64> = {
        let mut stmt = store
            .conn
            .prepare("SELECT id FROM messages ORDER BY external_id")
            .unwrap();
        stmt.query_map([], |r| r.get(0))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap()
    };

    import(&mut store, &ClaudeAdapter, partial);
    assert_eq!(
        count(
            &store,
            "SELECT COUNT(*) FROM messages WHERE deleted_at IS NOT NULL"
        ),
        1
    );

    import(&mut store, &ClaudeAdapter, full("2024-03-03T00:00:00Z"));
    assert_eq!(
        count(
            &store,
            "SELECT COUNT(*) FROM messages WHERE deleted_at IS NOT NULL"
        ),
        0
    );
    let ids_after: Vec<i64> = {
        let mut stmt = store
            .conn
            .prepare("SELECT id FROM messages ORDER BY external_id")
            .unwrap();
        stmt.query_map([], |r| r.get(0))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap()
    };
    assert_eq!(ids_before, ids_after);
}

#[test]
fn content_hash_change_purges_annotations() {
    let export = |updated_at: &str, text: &str| {
        claude_export(
            updated_at,
            vec![
                json!({ "uuid": "m1", "sender": "human", "text": "q" }),
                json!({ "uuid": "m2", "sender": "assistant", "text": text }),
            ],
        )
    };

    let mut store = Store::open_in_memory().unwrap();
    import(
        &mut store,
        &ClaudeAdapter,
        export("2024-03-01T00:00:00Z", "```rust\nfn f() {}\n```"),
    );
    let annotators = builtin_annotators();
    run_annotators(&mut store, &annotators, None, false).unwrap();
    assert!(count(&store, "SELECT COUNT(*) FROM content_part_annotations_flag") > 0);

    // Edit the assistant message: its parts and their annotations go away.
    import(
        &mut store,
        &ClaudeAdapter,
        export("2024-03-02T00:00:00Z", "prose now"),
    );
    let stale = count(
        &store,
        "SELECT COUNT(*) FROM content_part_annotations_flag a
         WHERE NOT EXISTS (SELECT 1 FROM content_parts p WHERE p.id = a.entity_id)",
    );
    assert_eq!(stale, 0);
    assert_eq!(
        count(&store, "SELECT COUNT(*) FROM content_part_annotations_flag"),
        0
    );
}

// ---------------------------------------------------------------------------
// Annotation pipeline scenario
// ---------------------------------------------------------------------------

#[test]
fn wiki_candidate_feeds_naive_title() {
    let raw = claude_export(
        "2024-03-01T10:05:00Z",
        vec![
            json!({ "uuid": "m1", "sender": "human", "text": "write about entanglement" }),
            json!({ "uuid": "m2", "sender": "assistant",
                    "text": "# Quantum Entanglement\n\nSee [[Bell's theorem]] and [[EPR paradox]] and [[nonlocality]]." }),
        ],
    );

    let mut store = Store::open_in_memory().unwrap();
    import(&mut store, &ClaudeAdapter, raw);
    build_prompt_responses(&mut store, None).unwrap();
    let annotators = builtin_annotators();
    run_annotators(&mut store, &annotators, None, false).unwrap();

    let pair_id: i64 = store
        .conn
        .query_row("SELECT id FROM prompt_responses", [], |r| r.get(0))
        .unwrap();

    assert!(
        ann::has_string(
            &store.conn,
            EntityKind::PromptResponse,
            pair_id,
            "exchange_type",
            "wiki_article"
        )
        .unwrap()
    );
    let confidence: f64 = store
        .conn
        .query_row(
            "SELECT confidence FROM prompt_response_annotations_string WHERE key = 'exchange_type'",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert!(confidence >= 0.8);
    assert_eq!(
        ann::get_string_single(
            &store.conn,
            EntityKind::PromptResponse,
            pair_id,
            "proposed_title"
        )
        .unwrap()
        .as_deref(),
        Some("Quantum Entanglement")
    );

    // Drop the prerequisite and the title, then re-run only the title
    // annotator from scratch: the gate fails and nothing is re-emitted.
    store
        .conn
        .execute(
            "DELETE FROM prompt_response_annotations_string WHERE key IN ('exchange_type', 'proposed_title')",
            [],
        )
        .unwrap();
    run_annotators(&mut store, &annotators, Some("NaiveTitleAnnotator"), true).unwrap();
    assert_eq!(
        ann::get_string_single(
            &store.conn,
            EntityKind::PromptResponse,
            pair_id,
            "proposed_title"
        )
        .unwrap(),
        None
    );
}

#[test]
fn completed_annotators_rerun_to_zero_new_annotations() {
    let raw = claude_export(
        "2024-03-01T10:05:00Z",
        vec![
            json!({ "uuid": "m1", "sender": "human", "text": "code?" }),
            json!({ "uuid": "m2", "sender": "assistant", "text": "```python\nprint(1)\n```" }),
        ],
    );

    let mut store = Store::open_in_memory().unwrap();
    import(&mut store, &ClaudeAdapter, raw);
    build_prompt_responses(&mut store, None).unwrap();
    let annotators = builtin_annotators();
    run_annotators(&mut store, &annotators, None, false).unwrap();
    let total_before: i64 = count(&store, "SELECT COUNT(*) FROM content_part_annotations_flag")
        + count(&store, "SELECT COUNT(*) FROM content_part_annotations_string")
        + count(&store, "SELECT COUNT(*) FROM content_part_annotations_numeric")
        + count(&store, "SELECT COUNT(*) FROM prompt_response_annotations_flag")
        + count(&store, "SELECT COUNT(*) FROM prompt_response_annotations_string");

    let reports = run_annotators(&mut store, &annotators, None, false).unwrap();
    for report in &reports {
        assert_eq!(report.annotations_written, 0, "{} wrote rows", report.name);
    }
    let total_after: i64 = count(&store, "SELECT COUNT(*) FROM content_part_annotations_flag")
        + count(&store, "SELECT COUNT(*) FROM content_part_annotations_string")
        + count(&store, "SELECT COUNT(*) FROM content_part_annotations_numeric")
        + count(&store, "SELECT COUNT(*) FROM prompt_response_annotations_flag")
        + count(&store, "SELECT COUNT(*) FROM prompt_response_annotations_string");
    assert_eq!(total_before, total_after);
}

#[test]
fn cursors_advance_monotonically_across_runs() {
    let mut store = Store::open_in_memory().unwrap();
    let annotators = builtin_annotators();
    run_annotators(&mut store, &annotators, None, false).unwrap();
    let before: Vec<(String, String)> = {
        let mut stmt = store
            .conn
            .prepare("SELECT annotator_name, high_water_mark FROM annotator_cursors ORDER BY annotator_name")
            .unwrap();
        stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?)))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap()
    };

    import(
        &mut store,
        &ClaudeAdapter,
        claude_export(
            "2024-03-01T10:05:00Z",
            vec![json!({ "uuid": "m1", "sender": "human", "text": "hi" })],
        ),
    );
    run_annotators(&mut store, &annotators, None, false).unwrap();
    let after: Vec<(String, String)> = {
        let mut stmt = store
            .conn
            .prepare("SELECT annotator_name, high_water_mark FROM annotator_cursors ORDER BY annotator_name")
            .unwrap();
        stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?)))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap()
    };
    for ((name_before, hwm_before), (name_after, hwm_after)) in before.iter().zip(after.iter()) {
        assert_eq!(name_before, name_after);
        assert!(hwm_after >= hwm_before, "{name_after} cursor went backwards");
    }
}
