//! Built-in annotators: syntactic detectors over content parts and
//! aggregate signals over prompt/response pairs.
//!
//! Priorities follow the strategy bands: ingestion-time ground truth sits
//! at 90+, these explicit syntactic detectors in the 70–80s, the
//! wiki-candidate classifier as a structural model at 50, and the naive
//! title heuristic at 30 where it can be gated by the classifier's output.

use eyre::Result;

use super::runtime::{Annotator, AnnotatorMeta, EntityData};
use super::{AnnotationResult, EntityKind, ValueKind};
use crate::model::Role;

/// Every built-in annotator, in registration order. The runtime re-sorts
/// by priority.
pub fn builtin_annotators() -> Vec<Box<dyn Annotator>> {
    vec![
        Box::new(CodeBlockAnnotator),
        Box::new(ScriptHeaderAnnotator),
        Box::new(WikiLinkContentAnnotator),
        Box::new(LatexContentAnnotator),
        Box::new(HasCodeAnnotator),
        Box::new(HasLatexAnnotator),
        Box::new(WikiCandidateAnnotator),
        Box::new(NaiveTitleAnnotator),
    ]
}

// ---------------------------------------------------------------------------
// Text scanning helpers
// ---------------------------------------------------------------------------

struct FenceScan {
    blocks: usize,
    languages: Vec<String>,
}

/// Count triple-backtick fences and collect opening-fence languages.
fn scan_code_fences(text: &str) -> FenceScan {
    let mut blocks = 0usize;
    let mut languages = Vec::new();
    let mut in_fence = false;
    for line in text.lines() {
        let trimmed = line.trim_start();
        if !trimmed.starts_with("```") {
            continue;
        }
        if in_fence {
            in_fence = false;
            continue;
        }
        in_fence = true;
        blocks += 1;
        let language = trimmed[3..]
            .split_whitespace()
            .next()
            .unwrap_or("")
            .to_lowercase();
        if !language.is_empty() && !languages.contains(&language) {
            languages.push(language);
        }
    }
    FenceScan { blocks, languages }
}

/// C++-only standard headers; a `#include` of anything else counts as C.
const CPP_HEADERS: [&str; 8] = [
    "iostream", "vector", "string", "map", "memory", "algorithm", "cstdint", "array",
];

/// Script types detected from file headers, in the fixed vocabulary
/// {python, bash, c, cpp, php}.
fn detect_script_types(text: &str) -> Vec<&'static str> {
    let mut types = Vec::new();
    let mut push = |t: &'static str| {
        if !types.contains(&t) {
            types.push(t);
        }
    };
    for line in text.lines() {
        let trimmed = line.trim_start();
        if let Some(interpreter) = trimmed.strip_prefix("#!") {
            if interpreter.contains("python") {
                push("python");
            } else if interpreter.contains("bash") || interpreter.contains("/sh") {
                push("bash");
            }
        } else if let Some(rest) = trimmed.strip_prefix("#include") {
            let header = rest
                .trim_start()
                .trim_start_matches(['<', '"'])
                .trim_end_matches(['>', '"']);
            if CPP_HEADERS.contains(&header) || text.contains("std::") {
                push("cpp");
            } else {
                push("c");
            }
        }
    }
    if text.contains("<?php") {
        push("php");
    }
    types
}

const LATEX_COMMANDS: [&str; 10] = [
    "\\frac", "\\sum", "\\int", "\\sqrt", "\\alpha", "\\beta", "\\cdot", "\\times", "\\begin{",
    "\\end{",
];

/// LaTeX subtypes present in the text: `display` (`$$…$$`), `inline`
/// (`$…$`, avoiding currency), `commands`.
fn detect_latex_types(text: &str) -> Vec<&'static str> {
    let mut types = Vec::new();
    if text.matches("$$").count() >= 2 {
        types.push("display");
    }
    if has_inline_math(text) {
        types.push("inline");
    }
    if LATEX_COMMANDS.iter().any(|cmd| text.contains(cmd)) {
        types.push("commands");
    }
    types
}

/// Single-dollar spans on one line whose first character is neither a
/// digit nor whitespace; `$5` and `$ 5` read as currency, `$x$` as math.
fn has_inline_math(text: &str) -> bool {
    // Positions of '$' that are not part of a "$$" pair.
    let bytes = text.as_bytes();
    let mut singles = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            if i + 1 < bytes.len() && bytes[i + 1] == b'$' {
                i += 2;
                continue;
            }
            singles.push(i);
        }
        i += 1;
    }
    for pair in singles.chunks(2) {
        let [open, close] = pair else {
            continue;
        };
        let span = &text[open + 1..*close];
        if span.is_empty() || span.contains('\n') {
            continue;
        }
        let first = span.chars().next().unwrap_or(' ');
        if !first.is_ascii_digit() && !first.is_whitespace() {
            return true;
        }
    }
    false
}

/// Count well-formed `[[…]]` occurrences.
fn count_wiki_links(text: &str) -> usize {
    let mut count = 0usize;
    let mut rest = text;
    while let Some(open) = rest.find("[[") {
        let after_open = &rest[open + 2..];
        match after_open.find("]]") {
            Some(close) => {
                let inner = &after_open[..close];
                if !inner.is_empty() && !inner.contains("[[") {
                    count += 1;
                }
                rest = &after_open[close + 2..];
            }
            None => break,
        }
    }
    count
}

/// Title from the first non-empty line: a markdown heading (`#`–`###`) or
/// a bold span (`**Title**`, `**Title** — Subtitle`).
fn extract_title(text: &str) -> Option<String> {
    let line = text.lines().find(|l| !l.trim().is_empty())?.trim();
    for prefix in ["### ", "## ", "# "] {
        if let Some(title) = line.strip_prefix(prefix) {
            let title = title.trim();
            if !title.is_empty() {
                return Some(title.to_string());
            }
        }
    }
    if let Some(after_open) = line.strip_prefix("**")
        && let Some(close) = after_open.find("**")
    {
        let title = after_open[..close].trim();
        if !title.is_empty() {
            return Some(title.to_string());
        }
    }
    None
}

fn part_text(entity: &EntityData) -> Option<&str> {
    match entity {
        EntityData::ContentPart(part) => part.text_content.as_deref(),
        _ => None,
    }
}

fn pair_texts(entity: &EntityData) -> Option<(&str, &str)> {
    match entity {
        EntityData::PromptResponse(pr) => Some((pr.prompt_text.as_str(), pr.response_text.as_str())),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Content-part annotators
// ---------------------------------------------------------------------------

/// Triple-backtick fences in a content part.
pub struct CodeBlockAnnotator;

impl CodeBlockAnnotator {
    const META: AnnotatorMeta = AnnotatorMeta {
        name: "CodeBlockAnnotator",
        entity_kind: EntityKind::ContentPart,
        annotation_key: "has_code_block",
        value_kind: ValueKind::Flag,
        priority: 80,
        version: "1",
        source: "code_block_annotator",
        requires_flags: &[],
        requires_strings: &[],
        skip_if_flags: &[],
        skip_if_strings: &[],
    };
}

impl Annotator for CodeBlockAnnotator {
    fn meta(&self) -> &AnnotatorMeta {
        &Self::META
    }

    fn annotate(&self, entity: &EntityData) -> Result<Vec<AnnotationResult>> {
        let Some(text) = part_text(entity) else {
            return Ok(Vec::new());
        };
        let scan = scan_code_fences(text);
        if scan.blocks == 0 {
            return Ok(Vec::new());
        }
        let mut results = vec![
            AnnotationResult::flag("has_code_block"),
            AnnotationResult::numeric("code_block_count", scan.blocks as f64),
        ];
        for language in scan.languages {
            results.push(AnnotationResult::string("code_languages", language));
        }
        Ok(results)
    }
}

/// Shebangs, `#include`s and `<?php` openers.
pub struct ScriptHeaderAnnotator;

impl ScriptHeaderAnnotator {
    const META: AnnotatorMeta = AnnotatorMeta {
        name: "ScriptHeaderAnnotator",
        entity_kind: EntityKind::ContentPart,
        annotation_key: "has_script_header",
        value_kind: ValueKind::Flag,
        priority: 75,
        version: "1",
        source: "script_header_annotator",
        requires_flags: &[],
        requires_strings: &[],
        skip_if_flags: &[],
        skip_if_strings: &[],
    };
}

impl Annotator for ScriptHeaderAnnotator {
    fn meta(&self) -> &AnnotatorMeta {
        &Self::META
    }

    fn annotate(&self, entity: &EntityData) -> Result<Vec<AnnotationResult>> {
        let Some(text) = part_text(entity) else {
            return Ok(Vec::new());
        };
        let types = detect_script_types(text);
        if types.is_empty() {
            return Ok(Vec::new());
        }
        let mut results = vec![AnnotationResult::flag("has_script_header")];
        for script_type in types {
            results.push(AnnotationResult::string("script_type", script_type));
        }
        Ok(results)
    }
}

/// `[[…]]` occurrences in a content part.
pub struct WikiLinkContentAnnotator;

impl WikiLinkContentAnnotator {
    const META: AnnotatorMeta = AnnotatorMeta {
        name: "WikiLinkContentAnnotator",
        entity_kind: EntityKind::ContentPart,
        annotation_key: "has_wiki_links",
        value_kind: ValueKind::Flag,
        priority: 76,
        version: "1",
        source: "wiki_link_annotator",
        requires_flags: &[],
        requires_strings: &[],
        skip_if_flags: &[],
        skip_if_strings: &[],
    };
}

impl Annotator for WikiLinkContentAnnotator {
    fn meta(&self) -> &AnnotatorMeta {
        &Self::META
    }

    fn annotate(&self, entity: &EntityData) -> Result<Vec<AnnotationResult>> {
        let Some(text) = part_text(entity) else {
            return Ok(Vec::new());
        };
        let count = count_wiki_links(text);
        if count == 0 {
            return Ok(Vec::new());
        }
        Ok(vec![
            AnnotationResult::flag("has_wiki_links"),
            AnnotationResult::numeric("wiki_link_count", count as f64),
        ])
    }
}

/// Display math, inline math, and common LaTeX commands.
pub struct LatexContentAnnotator;

impl LatexContentAnnotator {
    const META: AnnotatorMeta = AnnotatorMeta {
        name: "LatexContentAnnotator",
        entity_kind: EntityKind::ContentPart,
        annotation_key: "has_latex",
        value_kind: ValueKind::Flag,
        priority: 74,
        version: "1",
        source: "latex_annotator",
        requires_flags: &[],
        requires_strings: &[],
        skip_if_flags: &[],
        skip_if_strings: &[],
    };
}

impl Annotator for LatexContentAnnotator {
    fn meta(&self) -> &AnnotatorMeta {
        &Self::META
    }

    fn annotate(&self, entity: &EntityData) -> Result<Vec<AnnotationResult>> {
        let Some(text) = part_text(entity) else {
            return Ok(Vec::new());
        };
        let types = detect_latex_types(text);
        if types.is_empty() {
            return Ok(Vec::new());
        }
        let mut results = vec![AnnotationResult::flag("has_latex")];
        for latex_type in types {
            results.push(AnnotationResult::string("latex_type", latex_type));
        }
        Ok(results)
    }
}

// ---------------------------------------------------------------------------
// Prompt/response annotators
// ---------------------------------------------------------------------------

/// Aggregate code signal over a pair, with evidence strings per subsignal.
pub struct HasCodeAnnotator;

impl HasCodeAnnotator {
    const META: AnnotatorMeta = AnnotatorMeta {
        name: "HasCodeAnnotator",
        entity_kind: EntityKind::PromptResponse,
        annotation_key: "has_code",
        value_kind: ValueKind::Flag,
        priority: 72,
        version: "1",
        source: "has_code_annotator",
        requires_flags: &[],
        requires_strings: &[],
        skip_if_flags: &[],
        skip_if_strings: &[],
    };
}

impl Annotator for HasCodeAnnotator {
    fn meta(&self) -> &AnnotatorMeta {
        &Self::META
    }

    fn annotate(&self, entity: &EntityData) -> Result<Vec<AnnotationResult>> {
        let Some((prompt, response)) = pair_texts(entity) else {
            return Ok(Vec::new());
        };
        let mut evidence = Vec::new();
        if scan_code_fences(prompt).blocks > 0 || scan_code_fences(response).blocks > 0 {
            evidence.push("code_fence");
        }
        if has_inline_code(prompt) || has_inline_code(response) {
            evidence.push("inline_code");
        }
        if !detect_script_types(prompt).is_empty() || !detect_script_types(response).is_empty() {
            evidence.push("script_header");
        }
        if evidence.is_empty() {
            return Ok(Vec::new());
        }
        let mut results = vec![AnnotationResult::flag("has_code")];
        for signal in evidence {
            results.push(AnnotationResult::string("code_evidence", signal));
        }
        Ok(results)
    }
}

/// A single-backtick span on one line, excluding fence markers.
fn has_inline_code(text: &str) -> bool {
    for line in text.lines() {
        if line.trim_start().starts_with("```") {
            continue;
        }
        let mut ticks = line.match_indices('`').map(|(i, _)| i);
        if let (Some(open), Some(close)) = (ticks.next(), ticks.next())
            && close > open + 1
        {
            return true;
        }
    }
    false
}

/// Aggregate LaTeX signal over a pair.
pub struct HasLatexAnnotator;

impl HasLatexAnnotator {
    const META: AnnotatorMeta = AnnotatorMeta {
        name: "HasLatexAnnotator",
        entity_kind: EntityKind::PromptResponse,
        annotation_key: "has_latex",
        value_kind: ValueKind::Flag,
        priority: 71,
        version: "1",
        source: "has_latex_annotator",
        requires_flags: &[],
        requires_strings: &[],
        skip_if_flags: &[],
        skip_if_strings: &[],
    };
}

impl Annotator for HasLatexAnnotator {
    fn meta(&self) -> &AnnotatorMeta {
        &Self::META
    }

    fn annotate(&self, entity: &EntityData) -> Result<Vec<AnnotationResult>> {
        let Some((prompt, response)) = pair_texts(entity) else {
            return Ok(Vec::new());
        };
        let mut types = detect_latex_types(response);
        for t in detect_latex_types(prompt) {
            if !types.contains(&t) {
                types.push(t);
            }
        }
        if types.is_empty() {
            return Ok(Vec::new());
        }
        let mut results = vec![AnnotationResult::flag("has_latex")];
        for latex_type in types {
            results.push(AnnotationResult::string("latex_type", latex_type));
        }
        Ok(results)
    }
}

/// Classifies assistant responses carrying wiki links as wiki articles.
/// Three or more links make a high-confidence call.
pub struct WikiCandidateAnnotator;

impl WikiCandidateAnnotator {
    const META: AnnotatorMeta = AnnotatorMeta {
        name: "WikiCandidateAnnotator",
        entity_kind: EntityKind::PromptResponse,
        annotation_key: "exchange_type",
        value_kind: ValueKind::String,
        priority: 50,
        version: "1",
        source: "wiki_candidate_annotator",
        requires_flags: &[],
        requires_strings: &[],
        skip_if_flags: &[],
        skip_if_strings: &[],
    };
}

impl Annotator for WikiCandidateAnnotator {
    fn meta(&self) -> &AnnotatorMeta {
        &Self::META
    }

    fn annotate(&self, entity: &EntityData) -> Result<Vec<AnnotationResult>> {
        let EntityData::PromptResponse(pr) = entity else {
            return Ok(Vec::new());
        };
        if pr.pair.response_role != Role::Assistant {
            return Ok(Vec::new());
        }
        let links = count_wiki_links(&pr.response_text);
        if links == 0 {
            return Ok(Vec::new());
        }
        let confidence = if links >= 3 { 0.9 } else { 0.6 };
        Ok(vec![
            AnnotationResult::string("exchange_type", "wiki_article")
                .with_confidence(confidence)
                .with_reason(format!("{links} wiki links in response")),
        ])
    }
}

/// Proposes a title for wiki-article exchanges from the response's first
/// non-empty line. Gated on the classifier's output.
pub struct NaiveTitleAnnotator;

impl NaiveTitleAnnotator {
    const META: AnnotatorMeta = AnnotatorMeta {
        name: "NaiveTitleAnnotator",
        entity_kind: EntityKind::PromptResponse,
        annotation_key: "proposed_title",
        value_kind: ValueKind::String,
        priority: 30,
        version: "1",
        source: "naive_title_annotator",
        requires_flags: &[],
        requires_strings: &[("exchange_type", "wiki_article")],
        skip_if_flags: &[],
        skip_if_strings: &[],
    };
}

impl Annotator for NaiveTitleAnnotator {
    fn meta(&self) -> &AnnotatorMeta {
        &Self::META
    }

    fn annotate(&self, entity: &EntityData) -> Result<Vec<AnnotationResult>> {
        let EntityData::PromptResponse(pr) = entity else {
            return Ok(Vec::new());
        };
        match extract_title(&pr.response_text) {
            Some(title) => Ok(vec![
                AnnotationResult::string("proposed_title", title)
                    .with_reason("first non-empty response line"),
            ]),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PromptResponseRow, Role};
    use crate::store::PromptResponseData;

    fn pair_entity(response_role: Role, prompt: &str, response: &str) -> EntityData {
        EntityData::PromptResponse(PromptResponseData {
            pair: PromptResponseRow {
                id: 1,
                dialogue_id: 1,
                prompt_message_id: 1,
                response_message_id: 2,
                prompt_position: 0,
                response_position: 1,
                prompt_role: Role::User,
                response_role,
                created_at: "2024-01-01T00:00:00.000000Z".into(),
            },
            prompt_text: prompt.to_string(),
            response_text: response.to_string(),
        })
    }

    fn part_entity(text: &str) -> EntityData {
        EntityData::ContentPart(crate::model::ContentPartRow {
            id: 1,
            message_id: 1,
            sequence: 0,
            part_type: "text".into(),
            text_content: Some(text.to_string()),
            language: None,
            media_type: None,
            url: None,
            tool_name: None,
            tool_use_id: None,
            is_error: false,
            created_at: "2024-01-01T00:00:00.000000Z".into(),
        })
    }

    #[test]
    fn fence_scan_counts_blocks_and_languages() {
        let text = "intro\n```rust\nfn main() {}\n```\nmiddle\n```python\nprint(1)\n```\n```\nplain\n```";
        let scan = scan_code_fences(text);
        assert_eq!(scan.blocks, 3);
        assert_eq!(scan.languages, vec!["rust".to_string(), "python".to_string()]);
    }

    #[test]
    fn code_block_annotator_emits_flag_count_and_languages() {
        let results = CodeBlockAnnotator
            .annotate(&part_entity("```rust\nlet x = 1;\n```"))
            .unwrap();
        assert!(results.contains(&AnnotationResult::flag("has_code_block")));
        assert!(results.contains(&AnnotationResult::numeric("code_block_count", 1.0)));
        assert!(results.contains(&AnnotationResult::string("code_languages", "rust")));
        assert!(CodeBlockAnnotator
            .annotate(&part_entity("no code here"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn script_headers_detect_the_fixed_vocabulary() {
        assert_eq!(detect_script_types("#!/usr/bin/env python3\nprint(1)"), vec!["python"]);
        assert_eq!(detect_script_types("#!/bin/bash\necho hi"), vec!["bash"]);
        assert_eq!(detect_script_types("#!/bin/sh\necho hi"), vec!["bash"]);
        assert_eq!(detect_script_types("#include <stdio.h>\nint main() {}"), vec!["c"]);
        assert_eq!(
            detect_script_types("#include <iostream>\nint main() { std::cout; }"),
            vec!["cpp"]
        );
        assert_eq!(detect_script_types("<?php echo 'hi'; ?>"), vec!["php"]);
        assert!(detect_script_types("plain prose").is_empty());
    }

    #[test]
    fn latex_subtypes() {
        assert_eq!(detect_latex_types("$$\\int_0^1 x dx$$"), vec!["display", "commands"]);
        assert_eq!(detect_latex_types("the value $x$ grows"), vec!["inline"]);
        assert_eq!(detect_latex_types("use \\frac{a}{b} here"), vec!["commands"]);
        assert!(detect_latex_types("costs $5 and $10 total").is_empty());
        assert!(detect_latex_types("no math").is_empty());
    }

    #[test]
    fn wiki_link_counting() {
        assert_eq!(count_wiki_links("see [[A]] and [[B|alias]]"), 2);
        assert_eq!(count_wiki_links("broken [[link"), 0);
        assert_eq!(count_wiki_links("empty [[]]"), 0);
        assert_eq!(count_wiki_links("nested [[a [[b]] c]]"), 1);
        assert_eq!(count_wiki_links("none"), 0);
    }

    #[test]
    fn wiki_candidate_confidence_scales_with_links() {
        let few = WikiCandidateAnnotator
            .annotate(&pair_entity(Role::Assistant, "q", "See [[One]]."))
            .unwrap();
        assert_eq!(few.len(), 1);
        assert_eq!(few[0].confidence, Some(0.6));

        let many = WikiCandidateAnnotator
            .annotate(&pair_entity(
                Role::Assistant,
                "q",
                "See [[Bell's theorem]] and [[EPR paradox]] and [[nonlocality]].",
            ))
            .unwrap();
        assert_eq!(many[0].confidence, Some(0.9));
        assert_eq!(
            many[0],
            AnnotationResult::string("exchange_type", "wiki_article")
        );
    }

    #[test]
    fn wiki_candidate_is_assistant_only() {
        let results = WikiCandidateAnnotator
            .annotate(&pair_entity(Role::Tool, "q", "[[A]] [[B]] [[C]]"))
            .unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn title_extraction_variants() {
        assert_eq!(
            extract_title("# Quantum Entanglement\n\nbody"),
            Some("Quantum Entanglement".to_string())
        );
        assert_eq!(extract_title("\n\n## Spaced\ntext"), Some("Spaced".to_string()));
        assert_eq!(
            extract_title("**Bold Title** — Subtitle\ntext"),
            Some("Bold Title".to_string())
        );
        assert_eq!(extract_title("plain first line"), None);
        assert_eq!(extract_title("#### too deep"), None);
        assert_eq!(extract_title(""), None);
    }

    #[test]
    fn has_code_collects_evidence() {
        let results = HasCodeAnnotator
            .annotate(&pair_entity(
                Role::Assistant,
                "how do I print in `rust`?",
                "```rust\nprintln!(\"hi\");\n```",
            ))
            .unwrap();
        assert!(results.contains(&AnnotationResult::flag("has_code")));
        assert!(results.contains(&AnnotationResult::string("code_evidence", "code_fence")));
        assert!(results.contains(&AnnotationResult::string("code_evidence", "inline_code")));
    }

    #[test]
    fn has_latex_merges_pair_subtypes() {
        let results = HasLatexAnnotator
            .annotate(&pair_entity(
                Role::Assistant,
                "what is $x$?",
                "$$x = \\frac{1}{2}$$",
            ))
            .unwrap();
        assert!(results.contains(&AnnotationResult::flag("has_latex")));
        assert!(results.contains(&AnnotationResult::string("latex_type", "display")));
        assert!(results.contains(&AnnotationResult::string("latex_type", "inline")));
        assert!(results.contains(&AnnotationResult::string("latex_type", "commands")));
    }

    #[test]
    fn registry_priorities_are_distinct() {
        let annotators = builtin_annotators();
        let mut priorities: Vec<i32> = annotators.iter().map(|a| a.meta().priority).collect();
        let names: Vec<&str> = annotators.iter().map(|a| a.meta().name).collect();
        assert_eq!(annotators.len(), 8);
        priorities.sort_unstable();
        priorities.dedup();
        assert_eq!(priorities.len(), 8, "priorities must be distinct: {names:?}");
    }
}
