//! Annotator runtime: declarative filters, cursor tracking, and
//! priority-ordered execution.
//!
//! An annotator is data plus one pure function: its [`AnnotatorMeta`]
//! declares what it targets, what it produces, and which annotation state
//! makes an entity eligible; `annotate` maps entity data to results. The
//! runtime is a dispatcher: it streams entities newer than the
//! annotator's cursor in `(created_at, id)` order, applies the filters
//! against live annotation state, writes the results, and advances the
//! cursor. Higher-priority annotators run strictly first, so their output
//! can gate lower-priority ones within the same pass.

use eyre::Result;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info, warn};

use super::store as ann_store;
use super::{AnnotationResult, EntityKind, ValueKind};
use crate::model::{now_ts, DialogueRow, MessageRow, ContentPartRow, EPOCH_TS};
use crate::store::{self, PromptResponseData, Store};

/// Fixed per-class metadata. Changing `version` retires the old cursor and
/// re-runs the annotator over every entity.
#[derive(Debug, Clone)]
pub struct AnnotatorMeta {
    pub name: &'static str,
    pub entity_kind: EntityKind,
    /// The single concept this annotator produces.
    pub annotation_key: &'static str,
    pub value_kind: ValueKind,
    /// Higher runs first; ties break on `name`.
    pub priority: i32,
    pub version: &'static str,
    /// Provenance tag stored on every written row.
    pub source: &'static str,
    pub requires_flags: &'static [&'static str],
    pub requires_strings: &'static [(&'static str, &'static str)],
    pub skip_if_flags: &'static [&'static str],
    /// `(key, None)` disqualifies on any value for the key.
    pub skip_if_strings: &'static [(&'static str, Option<&'static str>)],
}

/// Entity data handed to `annotate`. Pure input: annotators do no I/O.
#[derive(Debug, Clone)]
pub enum EntityData {
    ContentPart(ContentPartRow),
    Message(MessageRow),
    PromptResponse(PromptResponseData),
    Dialogue(DialogueRow),
}

impl EntityData {
    pub fn id(&self) -> i64 {
        match self {
            EntityData::ContentPart(p) => p.id,
            EntityData::Message(m) => m.id,
            EntityData::PromptResponse(pr) => pr.pair.id,
            EntityData::Dialogue(d) => d.id,
        }
    }

    pub fn created_at(&self) -> &str {
        match self {
            EntityData::ContentPart(p) => &p.created_at,
            EntityData::Message(m) => &m.created_at,
            EntityData::PromptResponse(pr) => &pr.pair.created_at,
            EntityData::Dialogue(d) => &d.imported_at,
        }
    }
}

pub trait Annotator {
    fn meta(&self) -> &AnnotatorMeta;

    /// Pure function of the entity's data. An `Err` skips this entity
    /// only; the run continues and the cursor still advances past it.
    fn annotate(&self, entity: &EntityData) -> Result<Vec<AnnotationResult>>;
}

/// Per-annotator outcome of a run.
#[derive(Debug, Clone)]
pub struct AnnotatorReport {
    pub name: &'static str,
    pub entities_seen: usize,
    pub annotations_written: usize,
    pub error: Option<String>,
}

/// Run annotators against the store. `only` restricts to one annotator by
/// name; `clear` drops matching cursor rows first so they start from the
/// epoch. Each annotator runs in its own transaction; a failure rolls that
/// annotator back and the next one still runs.
pub fn run(
    store: &mut Store,
    annotators: &[Box<dyn Annotator>],
    only: Option<&str>,
    clear: bool,
) -> Result<Vec<AnnotatorReport>> {
    let mut selected: Vec<&dyn Annotator> = annotators
        .iter()
        .map(|a| a.as_ref())
        .filter(|a| only.is_none_or(|name| a.meta().name == name))
        .collect();
    selected.sort_by(|a, b| {
        b.meta()
            .priority
            .cmp(&a.meta().priority)
            .then_with(|| a.meta().name.cmp(b.meta().name))
    });

    let mut reports = Vec::with_capacity(selected.len());
    for annotator in selected {
        let meta = annotator.meta();
        let tx = store.conn.transaction()?;
        match run_one(&tx, annotator, clear) {
            Ok((seen, written)) => {
                tx.commit()?;
                info!(
                    annotator = meta.name,
                    seen, written, "annotator run complete"
                );
                reports.push(AnnotatorReport {
                    name: meta.name,
                    entities_seen: seen,
                    annotations_written: written,
                    error: None,
                });
            }
            Err(e) => {
                drop(tx);
                warn!(annotator = meta.name, error = %e, "annotator failed, rolled back");
                reports.push(AnnotatorReport {
                    name: meta.name,
                    entities_seen: 0,
                    annotations_written: 0,
                    error: Some(format!("{e:#}")),
                });
            }
        }
    }
    Ok(reports)
}

fn run_one(conn: &Connection, annotator: &dyn Annotator, clear: bool) -> Result<(usize, usize)> {
    let meta = annotator.meta();
    if clear {
        delete_cursor(conn, meta)?;
    }
    let cursor = fetch_or_create_cursor(conn, meta)?;

    let candidates = load_candidates(conn, meta.entity_kind, &cursor)?;
    let mut seen = 0usize;
    let mut written = 0usize;
    let mut high_water_mark = cursor;

    for entity in &candidates {
        seen += 1;
        high_water_mark = entity.created_at().to_string();
        if !is_eligible(conn, meta, entity.id())? {
            continue;
        }
        let results = match annotator.annotate(entity) {
            Ok(results) => results,
            Err(e) => {
                warn!(
                    annotator = meta.name,
                    entity_id = entity.id(),
                    error = %e,
                    "annotate failed on entity, skipping"
                );
                continue;
            }
        };
        for result in &results {
            let created = ann_store::write_result(
                conn,
                meta.entity_kind,
                entity.id(),
                result,
                meta.source,
                Some(meta.version),
            )?;
            if created {
                written += 1;
            }
        }
        if !results.is_empty() {
            debug!(
                annotator = meta.name,
                entity_id = entity.id(),
                results = results.len(),
                "annotated"
            );
        }
    }

    // An empty stream still advances the cursor to now, so a cold
    // annotator reaches stability instead of rescanning forever.
    if candidates.is_empty() {
        high_water_mark = now_ts();
    }
    update_cursor(conn, meta, &high_water_mark, seen, written)?;
    Ok((seen, written))
}

fn load_candidates(
    conn: &Connection,
    kind: EntityKind,
    cursor: &str,
) -> rusqlite::Result<Vec<EntityData>> {
    Ok(match kind {
        EntityKind::ContentPart => store::content_parts_since(conn, cursor)?
            .into_iter()
            .map(EntityData::ContentPart)
            .collect(),
        EntityKind::Message => store::messages_since(conn, cursor)?
            .into_iter()
            .map(EntityData::Message)
            .collect(),
        EntityKind::PromptResponse => store::prompt_responses_since(conn, cursor)?
            .into_iter()
            .map(EntityData::PromptResponse)
            .collect(),
        EntityKind::Dialogue => store::dialogues_since(conn, cursor)?
            .into_iter()
            .map(EntityData::Dialogue)
            .collect(),
    })
}

/// Evaluate the declarative filters against current annotation state.
fn is_eligible(conn: &Connection, meta: &AnnotatorMeta, entity_id: i64) -> rusqlite::Result<bool> {
    for key in meta.requires_flags {
        if !ann_store::has_flag(conn, meta.entity_kind, entity_id, key)? {
            return Ok(false);
        }
    }
    for (key, value) in meta.requires_strings {
        if !ann_store::has_string(conn, meta.entity_kind, entity_id, key, value)? {
            return Ok(false);
        }
    }
    for key in meta.skip_if_flags {
        if ann_store::has_flag(conn, meta.entity_kind, entity_id, key)? {
            return Ok(false);
        }
    }
    for (key, value) in meta.skip_if_strings {
        let disqualified = match value {
            Some(value) => ann_store::has_string(conn, meta.entity_kind, entity_id, key, value)?,
            None => ann_store::has_string_key(conn, meta.entity_kind, entity_id, key)?,
        };
        if disqualified {
            return Ok(false);
        }
    }
    Ok(true)
}

// ---------------------------------------------------------------------------
// Cursors
// ---------------------------------------------------------------------------

fn fetch_or_create_cursor(conn: &Connection, meta: &AnnotatorMeta) -> rusqlite::Result<String> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT high_water_mark FROM annotator_cursors
             WHERE annotator_name = ?1 AND annotator_version = ?2 AND entity_kind = ?3",
            params![meta.name, meta.version, meta.entity_kind.as_str()],
            |r| r.get(0),
        )
        .optional()?;
    match existing {
        Some(hwm) => Ok(hwm),
        None => {
            conn.execute(
                "INSERT INTO annotator_cursors
                    (annotator_name, annotator_version, entity_kind, high_water_mark)
                 VALUES (?1, ?2, ?3, ?4)",
                params![meta.name, meta.version, meta.entity_kind.as_str(), EPOCH_TS],
            )?;
            Ok(EPOCH_TS.to_string())
        }
    }
}

fn update_cursor(
    conn: &Connection,
    meta: &AnnotatorMeta,
    high_water_mark: &str,
    seen: usize,
    written: usize,
) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE annotator_cursors
         SET high_water_mark = ?4,
             entities_seen = entities_seen + ?5,
             annotations_written = annotations_written + ?6,
             last_run_at = ?7
         WHERE annotator_name = ?1 AND annotator_version = ?2 AND entity_kind = ?3",
        params![
            meta.name,
            meta.version,
            meta.entity_kind.as_str(),
            high_water_mark,
            seen as i64,
            written as i64,
            now_ts()
        ],
    )?;
    Ok(())
}

fn delete_cursor(conn: &Connection, meta: &AnnotatorMeta) -> rusqlite::Result<()> {
    conn.execute(
        "DELETE FROM annotator_cursors
         WHERE annotator_name = ?1 AND entity_kind = ?2",
        params![meta.name, meta.entity_kind.as_str()],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::AnnotationResult;
    use crate::model::now_ts;

    struct FlagEverything {
        meta: AnnotatorMeta,
    }

    impl FlagEverything {
        fn new() -> Self {
            FlagEverything {
                meta: AnnotatorMeta {
                    name: "FlagEverything",
                    entity_kind: EntityKind::Message,
                    annotation_key: "seen",
                    value_kind: ValueKind::Flag,
                    priority: 50,
                    version: "1",
                    source: "test",
                    requires_flags: &[],
                    requires_strings: &[],
                    skip_if_flags: &[],
                    skip_if_strings: &[],
                },
            }
        }
    }

    impl Annotator for FlagEverything {
        fn meta(&self) -> &AnnotatorMeta {
            &self.meta
        }

        fn annotate(&self, _entity: &EntityData) -> Result<Vec<AnnotationResult>> {
            Ok(vec![AnnotationResult::flag("seen")])
        }
    }

    fn store_with_messages(n: usize) -> Store {
        let store = Store::open_in_memory().unwrap();
        store
            .conn
            .execute(
                "INSERT INTO dialogues (source_id, external_id, raw_json, imported_at, last_synced_at)
                 VALUES (1, 'd1', '{}', ?1, ?1)",
                [now_ts()],
            )
            .unwrap();
        let dialogue_id = store.conn.last_insert_rowid();
        for i in 0..n {
            store
                .conn
                .execute(
                    "INSERT INTO messages (dialogue_id, external_id, role, created_at)
                     VALUES (?1, ?2, 'user', ?3)",
                    params![dialogue_id, format!("m{i}"), now_ts()],
                )
                .unwrap();
        }
        store
    }

    fn cursor_hwm(store: &Store, name: &str) -> String {
        store
            .conn
            .query_row(
                "SELECT high_water_mark FROM annotator_cursors WHERE annotator_name = ?1",
                [name],
                |r| r.get(0),
            )
            .unwrap()
    }

    #[test]
    fn first_run_annotates_everything_second_run_nothing() {
        let mut store = store_with_messages(3);
        let annotators: Vec<Box<dyn Annotator>> = vec![Box::new(FlagEverything::new())];

        let reports = run(&mut store, &annotators, None, false).unwrap();
        assert_eq!(reports[0].entities_seen, 3);
        assert_eq!(reports[0].annotations_written, 3);

        let reports = run(&mut store, &annotators, None, false).unwrap();
        assert_eq!(reports[0].entities_seen, 0);
        assert_eq!(reports[0].annotations_written, 0);
    }

    #[test]
    fn cursor_advances_even_on_empty_stream() {
        let mut store = Store::open_in_memory().unwrap();
        let annotators: Vec<Box<dyn Annotator>> = vec![Box::new(FlagEverything::new())];
        run(&mut store, &annotators, None, false).unwrap();
        let hwm = cursor_hwm(&store, "FlagEverything");
        assert!(hwm.as_str() > EPOCH_TS);
    }

    #[test]
    fn cursor_is_monotonic_across_runs() {
        let mut store = store_with_messages(2);
        let annotators: Vec<Box<dyn Annotator>> = vec![Box::new(FlagEverything::new())];
        run(&mut store, &annotators, None, false).unwrap();
        let first = cursor_hwm(&store, "FlagEverything");
        run(&mut store, &annotators, None, false).unwrap();
        let second = cursor_hwm(&store, "FlagEverything");
        assert!(second >= first);
    }

    #[test]
    fn clear_resets_the_cursor_and_reprocesses() {
        let mut store = store_with_messages(2);
        let annotators: Vec<Box<dyn Annotator>> = vec![Box::new(FlagEverything::new())];
        run(&mut store, &annotators, None, false).unwrap();
        let reports = run(&mut store, &annotators, None, true).unwrap();
        assert_eq!(reports[0].entities_seen, 2);
        // Flags are write-once, so the rerun creates nothing new.
        assert_eq!(reports[0].annotations_written, 0);
    }

    #[test]
    fn version_bump_reprocesses_every_entity() {
        let mut store = store_with_messages(2);
        let v1: Vec<Box<dyn Annotator>> = vec![Box::new(FlagEverything::new())];
        run(&mut store, &v1, None, false).unwrap();

        let mut bumped = FlagEverything::new();
        bumped.meta.version = "2";
        let v2: Vec<Box<dyn Annotator>> = vec![Box::new(bumped)];
        let reports = run(&mut store, &v2, None, false).unwrap();
        assert_eq!(reports[0].entities_seen, 2);
        let cursors: i64 = store
            .conn
            .query_row("SELECT COUNT(*) FROM annotator_cursors", [], |r| r.get(0))
            .unwrap();
        assert_eq!(cursors, 2);
    }

    #[test]
    fn priority_orders_execution_and_name_breaks_ties() {
        struct Recorder {
            meta: AnnotatorMeta,
        }
        impl Annotator for Recorder {
            fn meta(&self) -> &AnnotatorMeta {
                &self.meta
            }
            fn annotate(&self, _entity: &EntityData) -> Result<Vec<AnnotationResult>> {
                Ok(vec![AnnotationResult::string("order", self.meta.name)])
            }
        }
        let make = |name: &'static str, priority: i32| -> Box<dyn Annotator> {
            Box::new(Recorder {
                meta: AnnotatorMeta {
                    name,
                    entity_kind: EntityKind::Message,
                    annotation_key: "order",
                    value_kind: ValueKind::String,
                    priority,
                    version: "1",
                    source: "test",
                    requires_flags: &[],
                    requires_strings: &[],
                    skip_if_flags: &[],
                    skip_if_strings: &[],
                },
            })
        };
        let mut store = store_with_messages(1);
        let annotators = vec![make("Beta", 10), make("Alpha", 10), make("Gamma", 90)];
        let reports = run(&mut store, &annotators, None, false).unwrap();
        let order: Vec<&str> = reports.iter().map(|r| r.name).collect();
        assert_eq!(order, vec!["Gamma", "Alpha", "Beta"]);
    }

    #[test]
    fn high_priority_output_gates_lower_priority_in_same_pass() {
        struct Gate {
            meta: AnnotatorMeta,
        }
        impl Annotator for Gate {
            fn meta(&self) -> &AnnotatorMeta {
                &self.meta
            }
            fn annotate(&self, _entity: &EntityData) -> Result<Vec<AnnotationResult>> {
                Ok(vec![AnnotationResult::flag("blocked")])
            }
        }
        let gate = Box::new(Gate {
            meta: AnnotatorMeta {
                name: "Gate",
                entity_kind: EntityKind::Message,
                annotation_key: "blocked",
                value_kind: ValueKind::Flag,
                priority: 90,
                version: "1",
                source: "test",
                requires_flags: &[],
                requires_strings: &[],
                skip_if_flags: &[],
                skip_if_strings: &[],
            },
        });
        let mut follower = FlagEverything::new();
        follower.meta.priority = 10;
        follower.meta.skip_if_flags = &["blocked"];

        let mut store = store_with_messages(2);
        let annotators: Vec<Box<dyn Annotator>> = vec![Box::new(follower), gate];
        let reports = run(&mut store, &annotators, None, false).unwrap();
        // Gate ran first and disqualified every entity for the follower.
        assert_eq!(reports[0].name, "Gate");
        assert_eq!(reports[1].name, "FlagEverything");
        assert_eq!(reports[1].annotations_written, 0);
    }

    #[test]
    fn failing_annotate_skips_entity_but_advances_cursor() {
        struct Flaky {
            meta: AnnotatorMeta,
        }
        impl Annotator for Flaky {
            fn meta(&self) -> &AnnotatorMeta {
                &self.meta
            }
            fn annotate(&self, entity: &EntityData) -> Result<Vec<AnnotationResult>> {
                if entity.id() % 2 == 1 {
                    eyre::bail!("boom");
                }
                Ok(vec![AnnotationResult::flag("ok")])
            }
        }
        let annotators: Vec<Box<dyn Annotator>> = vec![Box::new(Flaky {
            meta: AnnotatorMeta {
                name: "Flaky",
                entity_kind: EntityKind::Message,
                annotation_key: "ok",
                value_kind: ValueKind::Flag,
                priority: 50,
                version: "1",
                source: "test",
                requires_flags: &[],
                requires_strings: &[],
                skip_if_flags: &[],
                skip_if_strings: &[],
            },
        })];
        let mut store = store_with_messages(4);
        let reports = run(&mut store, &annotators, None, false).unwrap();
        assert_eq!(reports[0].entities_seen, 4);
        assert!(reports[0].error.is_none());
        // Rerun finds nothing new: the cursor moved past the failures too.
        let reports = run(&mut store, &annotators, None, false).unwrap();
        assert_eq!(reports[0].entities_seen, 0);
    }
}
