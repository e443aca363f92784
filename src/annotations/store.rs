//! Reader/writer over the annotation matrix.
//!
//! Upsert rules per value kind:
//! - flag: `(entity_id, key)` unique; conflicting insert is a no-op.
//! - string / numeric: `(entity_id, key, value)` unique; multi-value per
//!   key, conflicting insert is a no-op.
//! - json: `(entity_id, key)` unique; conflicting insert replaces the value.
//!
//! Writers report whether a new row was actually created. Nothing here
//! deletes implicitly; the extractor asks for purges explicitly when an
//! entity is rebuilt.

use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;

use super::{AnnotationResult, AnnotationValue, EntityKind, ValueKind, table_name};
use crate::model::now_ts;

/// Provenance attached to every written row.
#[derive(Debug, Clone, Copy, Default)]
pub struct Provenance<'a> {
    pub source: &'a str,
    pub source_version: Option<&'a str>,
    pub confidence: Option<f64>,
    pub reason: Option<&'a str>,
}

pub fn write_flag(
    conn: &Connection,
    entity: EntityKind,
    entity_id: i64,
    key: &str,
    prov: Provenance<'_>,
) -> rusqlite::Result<bool> {
    let table = table_name(entity, ValueKind::Flag);
    let inserted = conn.execute(
        &format!(
            "INSERT OR IGNORE INTO {table}
                (entity_id, key, confidence, reason, source, source_version, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
        ),
        params![
            entity_id,
            key,
            prov.confidence,
            prov.reason,
            prov.source,
            prov.source_version,
            now_ts()
        ],
    )?;
    Ok(inserted > 0)
}

pub fn write_string(
    conn: &Connection,
    entity: EntityKind,
    entity_id: i64,
    key: &str,
    value: &str,
    prov: Provenance<'_>,
) -> rusqlite::Result<bool> {
    let table = table_name(entity, ValueKind::String);
    let inserted = conn.execute(
        &format!(
            "INSERT OR IGNORE INTO {table}
                (entity_id, key, annotation_value, confidence, reason, source,
                 source_version, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
        ),
        params![
            entity_id,
            key,
            value,
            prov.confidence,
            prov.reason,
            prov.source,
            prov.source_version,
            now_ts()
        ],
    )?;
    Ok(inserted > 0)
}

pub fn write_numeric(
    conn: &Connection,
    entity: EntityKind,
    entity_id: i64,
    key: &str,
    value: f64,
    prov: Provenance<'_>,
) -> rusqlite::Result<bool> {
    let table = table_name(entity, ValueKind::Numeric);
    let inserted = conn.execute(
        &format!(
            "INSERT OR IGNORE INTO {table}
                (entity_id, key, annotation_value, confidence, reason, source,
                 source_version, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
        ),
        params![
            entity_id,
            key,
            value,
            prov.confidence,
            prov.reason,
            prov.source,
            prov.source_version,
            now_ts()
        ],
    )?;
    Ok(inserted > 0)
}

/// Single-value upsert: a later write for the same `(entity, key)`
/// replaces the stored value and provenance.
pub fn write_json(
    conn: &Connection,
    entity: EntityKind,
    entity_id: i64,
    key: &str,
    value: &Value,
    prov: Provenance<'_>,
) -> rusqlite::Result<bool> {
    let table = table_name(entity, ValueKind::Json);
    let inserted = conn.execute(
        &format!(
            "INSERT INTO {table}
                (entity_id, key, annotation_value, confidence, reason, source,
                 source_version, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(entity_id, key) DO UPDATE SET
                annotation_value = excluded.annotation_value,
                confidence = excluded.confidence,
                reason = excluded.reason,
                source = excluded.source,
                source_version = excluded.source_version"
        ),
        params![
            entity_id,
            key,
            value.to_string(),
            prov.confidence,
            prov.reason,
            prov.source,
            prov.source_version,
            now_ts()
        ],
    )?;
    Ok(inserted > 0)
}

/// Dispatch one annotator result to the write method its value selects.
pub fn write_result(
    conn: &Connection,
    entity: EntityKind,
    entity_id: i64,
    result: &AnnotationResult,
    source: &str,
    source_version: Option<&str>,
) -> rusqlite::Result<bool> {
    let prov = Provenance {
        source,
        source_version,
        confidence: result.confidence,
        reason: result.reason.as_deref(),
    };
    match &result.value {
        AnnotationValue::Flag => write_flag(conn, entity, entity_id, &result.key, prov),
        AnnotationValue::String(v) => write_string(conn, entity, entity_id, &result.key, v, prov),
        AnnotationValue::Numeric(v) => write_numeric(conn, entity, entity_id, &result.key, *v, prov),
        AnnotationValue::Json(v) => write_json(conn, entity, entity_id, &result.key, v, prov),
    }
}

pub fn has_flag(
    conn: &Connection,
    entity: EntityKind,
    entity_id: i64,
    key: &str,
) -> rusqlite::Result<bool> {
    let table = table_name(entity, ValueKind::Flag);
    let found: Option<i64> = conn
        .query_row(
            &format!("SELECT 1 FROM {table} WHERE entity_id = ?1 AND key = ?2"),
            params![entity_id, key],
            |r| r.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn delete_flag(
    conn: &Connection,
    entity: EntityKind,
    entity_id: i64,
    key: &str,
) -> rusqlite::Result<()> {
    let table = table_name(entity, ValueKind::Flag);
    conn.execute(
        &format!("DELETE FROM {table} WHERE entity_id = ?1 AND key = ?2"),
        params![entity_id, key],
    )?;
    Ok(())
}

pub fn get_strings(
    conn: &Connection,
    entity: EntityKind,
    entity_id: i64,
    key: &str,
) -> rusqlite::Result<Vec<String>> {
    let table = table_name(entity, ValueKind::String);
    let mut stmt = conn.prepare(&format!(
        "SELECT annotation_value FROM {table}
         WHERE entity_id = ?1 AND key = ?2 ORDER BY id"
    ))?;
    let values = stmt
        .query_map(params![entity_id, key], |r| r.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(values)
}

pub fn get_string_single(
    conn: &Connection,
    entity: EntityKind,
    entity_id: i64,
    key: &str,
) -> rusqlite::Result<Option<String>> {
    Ok(get_strings(conn, entity, entity_id, key)?.into_iter().next())
}

pub fn get_numerics(
    conn: &Connection,
    entity: EntityKind,
    entity_id: i64,
    key: &str,
) -> rusqlite::Result<Vec<f64>> {
    let table = table_name(entity, ValueKind::Numeric);
    let mut stmt = conn.prepare(&format!(
        "SELECT annotation_value FROM {table}
         WHERE entity_id = ?1 AND key = ?2 ORDER BY id"
    ))?;
    let values = stmt
        .query_map(params![entity_id, key], |r| r.get(0))?
        .collect::<rusqlite::Result<Vec<f64>>>()?;
    Ok(values)
}

pub fn get_json(
    conn: &Connection,
    entity: EntityKind,
    entity_id: i64,
    key: &str,
) -> rusqlite::Result<Option<Value>> {
    let table = table_name(entity, ValueKind::Json);
    let text: Option<String> = conn
        .query_row(
            &format!("SELECT annotation_value FROM {table} WHERE entity_id = ?1 AND key = ?2"),
            params![entity_id, key],
            |r| r.get(0),
        )
        .optional()?;
    Ok(text.and_then(|t| serde_json::from_str(&t).ok()))
}

pub fn find_entities_with_flag(
    conn: &Connection,
    entity: EntityKind,
    key: &str,
) -> rusqlite::Result<Vec<i64>> {
    let table = table_name(entity, ValueKind::Flag);
    let mut stmt = conn.prepare(&format!(
        "SELECT entity_id FROM {table} WHERE key = ?1 ORDER BY entity_id"
    ))?;
    let ids = stmt
        .query_map([key], |r| r.get(0))?
        .collect::<rusqlite::Result<Vec<i64>>>()?;
    Ok(ids)
}

pub fn find_entities_with_string(
    conn: &Connection,
    entity: EntityKind,
    key: &str,
    value: Option<&str>,
) -> rusqlite::Result<Vec<i64>> {
    let table = table_name(entity, ValueKind::String);
    match value {
        Some(value) => {
            let mut stmt = conn.prepare(&format!(
                "SELECT DISTINCT entity_id FROM {table}
                 WHERE key = ?1 AND annotation_value = ?2 ORDER BY entity_id"
            ))?;
            let ids = stmt
                .query_map(params![key, value], |r| r.get(0))?
                .collect::<rusqlite::Result<Vec<i64>>>()?;
            Ok(ids)
        }
        None => {
            let mut stmt = conn.prepare(&format!(
                "SELECT DISTINCT entity_id FROM {table} WHERE key = ?1 ORDER BY entity_id"
            ))?;
            let ids = stmt
                .query_map([key], |r| r.get(0))?
                .collect::<rusqlite::Result<Vec<i64>>>()?;
            Ok(ids)
        }
    }
}

/// Check whether a string annotation `(key, value)` exists for an entity.
pub fn has_string(
    conn: &Connection,
    entity: EntityKind,
    entity_id: i64,
    key: &str,
    value: &str,
) -> rusqlite::Result<bool> {
    let table = table_name(entity, ValueKind::String);
    let found: Option<i64> = conn
        .query_row(
            &format!(
                "SELECT 1 FROM {table}
                 WHERE entity_id = ?1 AND key = ?2 AND annotation_value = ?3"
            ),
            params![entity_id, key, value],
            |r| r.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Check whether any string annotation with `key` exists for an entity.
pub fn has_string_key(
    conn: &Connection,
    entity: EntityKind,
    entity_id: i64,
    key: &str,
) -> rusqlite::Result<bool> {
    let table = table_name(entity, ValueKind::String);
    let found: Option<i64> = conn
        .query_row(
            &format!("SELECT 1 FROM {table} WHERE entity_id = ?1 AND key = ?2"),
            params![entity_id, key],
            |r| r.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}
