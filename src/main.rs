//! Command-line shell over the ingest engine.
//!
//! Subcommands map 1:1 onto the engine's operations: `init`,
//! `import-chatgpt`, `import-claude`, `build-pairs`, `annotate`, `stats`.
//! The schema is applied idempotently on every open, so `init` alone is
//! never required — it exists to create the database ahead of time.

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use eyre::{Context, Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;

use chat_ingest::annotations::{detectors, runtime};
use chat_ingest::config::load_file_config;
use chat_ingest::extract::{
    self, ExtractOptions, PlatformAdapter, chatgpt::ChatGptAdapter, claude::ClaudeAdapter,
};
use chat_ingest::pairs;
use chat_ingest::store::{self, Store};

/// Ingest ChatGPT and Claude conversation exports into a normalized
/// SQLite store with derived prompt/response pairs and typed annotations.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the SQLite database. Defaults to ./chat-ingest.db
    /// or db_path from the config file.
    #[arg(long, value_name = "PATH", global = true)]
    db: Option<PathBuf>,

    /// Path to a specific configuration file.
    /// Defaults to $XDG_CONFIG_HOME/chat-ingest/config.toml
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Suppress progress bars.
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the database and apply the schema. Idempotent.
    Init,

    /// Import a ChatGPT-style export (array of conversations with node
    /// mappings).
    ImportChatgpt {
        /// Path to the export JSON (e.g. conversations.json).
        path: PathBuf,

        /// Treat existing messages as unchanged; skip content hashing.
        #[arg(long)]
        assume_immutable: bool,

        /// Delta import: do not soft-delete messages absent from this
        /// export.
        #[arg(long)]
        incremental: bool,
    },

    /// Import a Claude-style export (array of conversations with ordered
    /// message lists).
    ImportClaude {
        /// Path to the export JSON (e.g. conversations.json).
        path: PathBuf,

        /// Treat existing messages as unchanged; skip content hashing.
        #[arg(long)]
        assume_immutable: bool,

        /// Delta import: do not soft-delete messages absent from this
        /// export.
        #[arg(long)]
        incremental: bool,
    },

    /// Rebuild prompt/response pairs for one dialogue or all of them.
    BuildPairs {
        /// Internal dialogue id; omit to rebuild everything.
        #[arg(long)]
        dialogue: Option<i64>,
    },

    /// Run registered annotators over entities newer than their cursors.
    Annotate {
        /// Run a single annotator by name.
        #[arg(long)]
        annotator: Option<String>,

        /// Delete matching cursors first, re-running from the epoch.
        #[arg(long)]
        clear: bool,
    },

    /// Report row counts per table.
    Stats,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let file_cfg = load_file_config(cli.config.as_deref())?;
    let db_path = cli
        .db
        .clone()
        .or(file_cfg.db_path)
        .unwrap_or_else(|| PathBuf::from("chat-ingest.db"));

    let mut store = Store::open(&db_path)?;

    match cli.command {
        Command::Init => {
            println!("Initialized {}", db_path.display());
            Ok(())
        }
        Command::ImportChatgpt {
            path,
            assume_immutable,
            incremental,
        } => import(
            &mut store,
            &ChatGptAdapter,
            &path,
            ExtractOptions {
                assume_immutable,
                incremental,
            },
            cli.quiet,
        ),
        Command::ImportClaude {
            path,
            assume_immutable,
            incremental,
        } => import(
            &mut store,
            &ClaudeAdapter,
            &path,
            ExtractOptions {
                assume_immutable,
                incremental,
            },
            cli.quiet,
        ),
        Command::BuildPairs { dialogue } => {
            let counts = pairs::build_prompt_responses(&mut store, dialogue)?;
            println!(
                "Built {} pair(s) across {} dialogue(s).",
                counts.pairs, counts.dialogues
            );
            if counts.failed > 0 {
                return Err(eyre!("{} dialogue(s) failed to build", counts.failed));
            }
            Ok(())
        }
        Command::Annotate { annotator, clear } => {
            let annotators = detectors::builtin_annotators();
            if let Some(name) = annotator.as_deref()
                && !annotators.iter().any(|a| a.meta().name == name)
            {
                return Err(eyre!("Unknown annotator: {name}"));
            }
            let reports = runtime::run(&mut store, &annotators, annotator.as_deref(), clear)?;
            let mut failures = 0usize;
            for report in &reports {
                match &report.error {
                    None => println!(
                        "{:28} {} seen, {} written",
                        report.name, report.entities_seen, report.annotations_written
                    ),
                    Some(error) => {
                        failures += 1;
                        println!("{:28} FAILED: {error}", report.name);
                    }
                }
            }
            if failures > 0 {
                return Err(eyre!("{failures} annotator(s) failed"));
            }
            Ok(())
        }
        Command::Stats => {
            for (table, count) in store::table_counts(&store.conn)? {
                println!("{table:40} {count}");
            }
            Ok(())
        }
    }
}

/// Load an export file (an array of dialogue objects, or a single
/// object), run the extractor, and report counts.
fn import(
    store: &mut Store,
    adapter: &dyn PlatformAdapter,
    path: &std::path::Path,
    options: ExtractOptions,
    quiet: bool,
) -> Result<()> {
    let file =
        File::open(path).wrap_err_with(|| format!("Failed to open export: {}", path.display()))?;
    let value: Value = serde_json::from_reader(BufReader::new(file))
        .wrap_err_with(|| format!("Failed to parse export: {}", path.display()))?;
    let dialogues: Vec<Value> = match value {
        Value::Array(items) => items,
        other => vec![other],
    };

    let pb = if quiet {
        ProgressBar::hidden()
    } else {
        let bar = ProgressBar::new(dialogues.len() as u64);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({percent}%)",
            )
            .unwrap()
            .progress_chars("=>-"),
        );
        bar.println(format!("Found {} dialogue(s).", dialogues.len()));
        bar
    };

    let counts = extract::import_dialogues(store, adapter, &dialogues, options, &pb)?;
    pb.finish_and_clear();

    println!("Done. {counts}.");
    if counts.failed > 0 {
        return Err(eyre!("{} dialogue(s) failed to import", counts.failed));
    }
    Ok(())
}
