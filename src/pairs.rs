//! Derive (prompt, response) pairs from the synced messages.
//!
//! Each non-user, non-system, non-tool message is paired with the user
//! message that elicited it: its parent when that is a user message, else
//! the nearest user ancestor, else the last user message seen in order.
//! Regenerations fall out naturally: several responses share one prompt.
//!
//! Rebuilding is idempotent: pairs (and their content rows and
//! annotations, via cascade) are cleared per dialogue before being
//! rederived.

use std::collections::{HashMap, HashSet};

use eyre::Result;
use tracing::{debug, warn};

use crate::model::{now_ts, MessageRow, Role};
use crate::store::{self, Store};

/// Totals reported by `build-pairs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildCounts {
    pub dialogues: usize,
    pub pairs: usize,
    pub failed: usize,
}

/// Rebuild pairs for one dialogue or all of them. One transaction per
/// dialogue; a failing dialogue is rolled back and the rest continue.
pub fn build_prompt_responses(store: &mut Store, dialogue_id: Option<i64>) -> Result<BuildCounts> {
    let ids = match dialogue_id {
        Some(id) => vec![id],
        None => store::all_dialogue_ids(&store.conn)?,
    };

    let mut counts = BuildCounts::default();
    for id in ids {
        let tx = store.conn.transaction()?;
        match build_for_dialogue(&tx, id) {
            Ok(pairs) => {
                tx.commit()?;
                counts.dialogues += 1;
                counts.pairs += pairs;
            }
            Err(e) => {
                drop(tx);
                warn!(dialogue_id = id, error = %e, "pair build failed, rolled back");
                counts.failed += 1;
            }
        }
    }
    Ok(counts)
}

fn build_for_dialogue(conn: &rusqlite::Connection, dialogue_id: i64) -> Result<usize> {
    store::clear_prompt_responses(conn, dialogue_id)?;

    let messages = store::active_dialogue_messages(conn, dialogue_id)?;
    let by_id: HashMap<i64, &MessageRow> = messages.iter().map(|m| (m.id, m)).collect();
    let position_by_id: HashMap<i64, i64> = messages
        .iter()
        .enumerate()
        .map(|(i, m)| (m.id, i as i64))
        .collect();

    let now = now_ts();
    let mut last_user: Option<&MessageRow> = None;
    let mut pairs = 0usize;

    for message in &messages {
        match message.role {
            Role::User => {
                last_user = Some(message);
                continue;
            }
            Role::System | Role::Tool => continue,
            Role::Assistant => {}
        }

        let prompt = find_prompt(message, &by_id).or(last_user);
        let Some(prompt) = prompt else {
            debug!(
                message_id = message.id,
                "no eliciting user message, dropping response"
            );
            continue;
        };

        let pair_id = store::insert_prompt_response(
            conn,
            dialogue_id,
            prompt.id,
            message.id,
            position_by_id[&prompt.id],
            position_by_id[&message.id],
            prompt.role,
            message.role,
            &now,
        )?;
        let prompt_text = store::message_text_parts(conn, prompt.id)?.join("\n\n");
        let response_text = store::message_text_parts(conn, message.id)?.join("\n\n");
        store::insert_prompt_response_content(conn, pair_id, &prompt_text, &response_text)?;
        pairs += 1;
    }

    Ok(pairs)
}

/// Walk the ancestor chain looking for a user message. The visited set is
/// seeded with the response itself; corrupt exports can contain cycles and
/// the walk must terminate on the first repeat.
fn find_prompt<'a>(
    message: &MessageRow,
    by_id: &HashMap<i64, &'a MessageRow>,
) -> Option<&'a MessageRow> {
    let mut visited = HashSet::new();
    visited.insert(message.id);
    let mut current = message.parent_id;
    while let Some(parent_id) = current {
        if !visited.insert(parent_id) {
            return None;
        }
        let parent = *by_id.get(&parent_id)?;
        if parent.role == Role::User {
            return Some(parent);
        }
        current = parent.parent_id;
    }
    None
}
