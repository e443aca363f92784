//! # chat-ingest
//!
//! An ETL and annotation engine for LLM conversation exports. Ingests
//! ChatGPT-style tree exports and Claude-style linear exports into a
//! normalized SQLite store, derives prompt/response pairs, and attaches
//! typed annotations computed by a priority-ordered, incrementally
//! resumable annotator pipeline.
//!
//! ## What it does
//!
//! Imports are reconciled, not appended: re-importing an export preserves
//! internal ids, detects in-place edits by content hash, soft-deletes
//! messages that disappeared, and revives ones that came back. After
//! ingestion, each non-user message is paired with the user message that
//! elicited it (parent pointers when the platform has them, sequential
//! fallback otherwise; regenerations surface as several pairs per
//! prompt). Annotators then walk the new entities, gated by declarative
//! prerequisite/skip filters and resumed from per-annotator cursors.
//!
//! ## Architecture
//!
//! - [`store`] — SQLite gateway: schema, transactions, typed queries
//! - [`hash`] — canonical-JSON SHA-256 content hashing for edit detection
//! - [`model`] — entities: roles, content parts, normalized records
//! - [`extract`] — reconciliation core plus the two platform adapters
//! - [`pairs`] — prompt/response pair derivation
//! - [`annotations`] — the 16-table annotation matrix, runtime, detectors
//! - [`config`] — TOML file config merged under CLI flags
//!
//! ## Usage
//!
//! ```sh
//! chat-ingest --db chats.db import-chatgpt conversations.json
//! chat-ingest --db chats.db build-pairs
//! chat-ingest --db chats.db annotate
//! chat-ingest --db chats.db stats
//! ```

pub mod annotations;
pub mod config;
pub mod extract;
pub mod hash;
pub mod model;
pub mod pairs;
pub mod store;
