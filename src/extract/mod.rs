//! Extractor core: reconcile incoming exports against what is already
//! stored.
//!
//! The algorithm is platform-agnostic; a [`PlatformAdapter`] turns one raw
//! export object into normalized [`IncomingDialogue`] records and gets a
//! post-sync hook for platform-level passes. Re-importing the same export
//! is a no-op: internal ids survive, unchanged messages are untouched,
//! edits are detected by content hash, vanished messages are soft-deleted
//! and revived if they come back.

pub mod chatgpt;
pub mod claude;

use std::collections::{HashMap, HashSet};

use eyre::Result;
use indicatif::ProgressBar;
use rusqlite::Connection;
use serde_json::Value;
use tracing::{debug, warn};

use crate::hash::content_hash;
use crate::model::{format_ts, now_ts, ImportCounts, IncomingDialogue, IncomingMessage};
use crate::store::{self, Store};

/// Import-mode switches recognized by the reconciliation loop.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractOptions {
    /// Skip content-hash comparison for existing messages and treat them as
    /// unchanged. Faster; misses in-place edits. New and removed messages
    /// are still detected.
    pub assume_immutable: bool,
    /// Treat the import as a delta: messages absent from it are left alone
    /// instead of being soft-deleted.
    pub incremental: bool,
}

/// Turns platform-shaped export objects into normalized records.
pub trait PlatformAdapter {
    /// Catalog name of the source this adapter feeds (`sources.name`).
    fn source_name(&self) -> &'static str;

    /// Parse one raw dialogue object. `Ok(None)` means the object has no
    /// usable external id and must be skipped; a parse error fails the
    /// dialogue.
    fn parse_dialogue(&self, raw: &Value) -> Result<Option<IncomingDialogue>>;

    /// Runs right after a message's content rows are written (created or
    /// rebuilt), for per-message platform writes such as ground-truth
    /// annotations.
    fn after_message_write(
        &self,
        conn: &Connection,
        message_id: i64,
        msg: &IncomingMessage,
    ) -> Result<()> {
        let _ = (conn, message_id, msg);
        Ok(())
    }

    /// Runs inside the dialogue's transaction after message sync, for
    /// platform-level passes over the synced rows.
    fn post_sync(&self, conn: &Connection, dialogue_id: i64) -> Result<()> {
        let _ = (conn, dialogue_id);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DialogueOutcome {
    New,
    Updated,
    Skipped,
}

/// Import a batch of raw dialogue objects. One transaction per dialogue;
/// a failing dialogue is rolled back, counted, and the rest continue.
pub fn import_dialogues(
    store: &mut Store,
    adapter: &dyn PlatformAdapter,
    raw_dialogues: &[Value],
    options: ExtractOptions,
    progress: &ProgressBar,
) -> Result<ImportCounts> {
    let source_id = store::find_source_id(&store.conn, adapter.source_name())?;
    let mut counts = ImportCounts::default();

    for raw in raw_dialogues {
        let incoming = match adapter.parse_dialogue(raw) {
            Ok(Some(incoming)) => incoming,
            Ok(None) => {
                warn!(source = adapter.source_name(), "dialogue without external id, skipping");
                counts.failed += 1;
                progress.inc(1);
                continue;
            }
            Err(e) => {
                warn!(source = adapter.source_name(), error = %e, "unparseable dialogue");
                counts.failed += 1;
                progress.inc(1);
                continue;
            }
        };

        let external_id = incoming.external_id.clone();
        let tx = store.conn.transaction()?;
        match sync_dialogue(&tx, source_id, adapter, &incoming, options) {
            Ok(outcome) => {
                tx.commit()?;
                match outcome {
                    DialogueOutcome::New => counts.new += 1,
                    DialogueOutcome::Updated => counts.updated += 1,
                    DialogueOutcome::Skipped => counts.skipped += 1,
                }
            }
            Err(e) => {
                // Dropping the transaction rolls the dialogue back.
                drop(tx);
                warn!(external_id = %external_id, error = %e, "dialogue sync failed, rolled back");
                counts.failed += 1;
            }
        }
        progress.inc(1);
    }

    Ok(counts)
}

fn sync_dialogue(
    conn: &Connection,
    source_id: i64,
    adapter: &dyn PlatformAdapter,
    incoming: &IncomingDialogue,
    options: ExtractOptions,
) -> Result<DialogueOutcome> {
    let now = now_ts();
    let title = incoming.title.as_deref();
    let created = incoming.source_created_at.map(format_ts);
    let updated = incoming.source_updated_at.map(format_ts);
    let raw_json = incoming.raw.to_string();

    let existing = store::find_dialogue(conn, source_id, &incoming.external_id)?;
    let (dialogue_id, outcome) = match existing {
        None => {
            let id = store::insert_dialogue(
                conn,
                source_id,
                &incoming.external_id,
                title,
                created.as_deref(),
                updated.as_deref(),
                &raw_json,
                &now,
            )?;
            (id, DialogueOutcome::New)
        }
        Some(stored) => {
            // Skip only when both sides carry a timestamp and the incoming
            // one is not strictly newer; unknown timestamps force a resync.
            if let (Some(stored_ts), Some(incoming_ts)) =
                (stored.source_updated_at.as_deref(), updated.as_deref())
                && incoming_ts <= stored_ts
            {
                debug!(
                    external_id = %incoming.external_id,
                    "dialogue unchanged, skipping"
                );
                return Ok(DialogueOutcome::Skipped);
            }
            store::update_dialogue(
                conn,
                stored.id,
                title,
                created.as_deref(),
                updated.as_deref(),
                &raw_json,
                &now,
            )?;
            (stored.id, DialogueOutcome::Updated)
        }
    };

    sync_messages(conn, dialogue_id, adapter, &incoming.messages, options, &now)?;
    adapter.post_sync(conn, dialogue_id)?;
    Ok(outcome)
}

/// Reconcile the incoming message set against the stored one. See the
/// module docs for the new/updated/unchanged/removed/restored taxonomy.
fn sync_messages(
    conn: &Connection,
    dialogue_id: i64,
    adapter: &dyn PlatformAdapter,
    incoming: &[IncomingMessage],
    options: ExtractOptions,
    now: &str,
) -> Result<()> {
    let existing = store::existing_messages(conn, dialogue_id)?;
    let mut id_by_external: HashMap<&str, i64> = existing
        .iter()
        .map(|(ext, e)| (ext.as_str(), e.id))
        .collect();
    let incoming_ids: HashSet<&str> = incoming.iter().map(|m| m.external_id.as_str()).collect();

    for msg in incoming {
        match existing.get(&msg.external_id) {
            None => {
                let hash = content_hash(&msg.content);
                let id = store::insert_message(conn, dialogue_id, msg, &hash, now)?;
                store::insert_message_content(conn, id, msg, now)?;
                adapter.after_message_write(conn, id, msg)?;
                id_by_external.insert(msg.external_id.as_str(), id);
                debug!(external_id = %msg.external_id, id, "message created");
            }
            Some(stored) if options.assume_immutable => {
                if stored.deleted_at.is_some() {
                    store::restore_message(conn, stored.id)?;
                    debug!(external_id = %msg.external_id, "message restored");
                }
            }
            Some(stored) => {
                let hash = content_hash(&msg.content);
                if stored.content_hash.as_deref() == Some(hash.as_str()) {
                    if stored.deleted_at.is_some() {
                        store::restore_message(conn, stored.id)?;
                        debug!(external_id = %msg.external_id, "message restored");
                    }
                } else {
                    store::update_message_in_place(conn, stored.id, msg, &hash)?;
                    store::purge_message_children(conn, stored.id)?;
                    store::insert_message_content(conn, stored.id, msg, now)?;
                    adapter.after_message_write(conn, stored.id, msg)?;
                    debug!(external_id = %msg.external_id, "message content rebuilt");
                }
            }
        }
    }

    // Second pass: resolve external parent ids to internal ids. Runs for
    // every incoming message (including immutable-mode ones) so structural
    // re-parenting is always picked up; an unknown parent stays NULL.
    for msg in incoming {
        let Some(&id) = id_by_external.get(msg.external_id.as_str()) else {
            continue;
        };
        let parent_id = msg
            .parent_external_id
            .as_deref()
            .and_then(|ext| id_by_external.get(ext))
            .copied();
        store::set_message_parent(conn, id, parent_id)?;
    }

    if !options.incremental {
        for (external_id, stored) in &existing {
            if !incoming_ids.contains(external_id.as_str()) && stored.deleted_at.is_none() {
                store::soft_delete_message(conn, stored.id, now)?;
                debug!(external_id = %external_id, "message soft-deleted");
            }
        }
    }

    Ok(())
}
