//! Typed annotations: a 4×4 matrix of tables keyed by
//! (entity kind × value kind), a reader/writer with per-kind upsert
//! semantics, and a runtime that executes declarative annotators
//! incrementally.

pub mod detectors;
pub mod runtime;
pub mod store;

use serde_json::Value;

/// Which entity an annotation (or annotator) targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    ContentPart,
    Message,
    PromptResponse,
    Dialogue,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::ContentPart => "content_part",
            EntityKind::Message => "message",
            EntityKind::PromptResponse => "prompt_response",
            EntityKind::Dialogue => "dialogue",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which physical table family a value lands in, and therefore which
/// upsert rule applies (see [`store`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Flag,
    String,
    Numeric,
    Json,
}

impl ValueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::Flag => "flag",
            ValueKind::String => "string",
            ValueKind::Numeric => "numeric",
            ValueKind::Json => "json",
        }
    }
}

/// Table name for one cell of the matrix. All names are static, so the
/// SQL built from them never interpolates runtime data.
pub fn table_name(entity: EntityKind, value: ValueKind) -> &'static str {
    use EntityKind::*;
    use ValueKind::*;
    match (entity, value) {
        (ContentPart, Flag) => "content_part_annotations_flag",
        (ContentPart, String) => "content_part_annotations_string",
        (ContentPart, Numeric) => "content_part_annotations_numeric",
        (ContentPart, Json) => "content_part_annotations_json",
        (Message, Flag) => "message_annotations_flag",
        (Message, String) => "message_annotations_string",
        (Message, Numeric) => "message_annotations_numeric",
        (Message, Json) => "message_annotations_json",
        (PromptResponse, Flag) => "prompt_response_annotations_flag",
        (PromptResponse, String) => "prompt_response_annotations_string",
        (PromptResponse, Numeric) => "prompt_response_annotations_numeric",
        (PromptResponse, Json) => "prompt_response_annotations_json",
        (Dialogue, Flag) => "dialogue_annotations_flag",
        (Dialogue, String) => "dialogue_annotations_string",
        (Dialogue, Numeric) => "dialogue_annotations_numeric",
        (Dialogue, Json) => "dialogue_annotations_json",
    }
}

/// The value payload of one annotation result; its variant selects the
/// write method.
#[derive(Debug, Clone, PartialEq)]
pub enum AnnotationValue {
    Flag,
    String(std::string::String),
    Numeric(f64),
    Json(Value),
}

impl AnnotationValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            AnnotationValue::Flag => ValueKind::Flag,
            AnnotationValue::String(_) => ValueKind::String,
            AnnotationValue::Numeric(_) => ValueKind::Numeric,
            AnnotationValue::Json(_) => ValueKind::Json,
        }
    }
}

/// One annotation produced by an annotator. Equality is structural over
/// `(key, value)`; confidence and reason are provenance, not identity.
#[derive(Debug, Clone)]
pub struct AnnotationResult {
    pub key: String,
    pub value: AnnotationValue,
    pub confidence: Option<f64>,
    pub reason: Option<String>,
}

impl PartialEq for AnnotationResult {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.value == other.value
    }
}

impl AnnotationResult {
    pub fn flag(key: impl Into<String>) -> Self {
        AnnotationResult {
            key: key.into(),
            value: AnnotationValue::Flag,
            confidence: None,
            reason: None,
        }
    }

    pub fn string(key: impl Into<String>, value: impl Into<String>) -> Self {
        AnnotationResult {
            key: key.into(),
            value: AnnotationValue::String(value.into()),
            confidence: None,
            reason: None,
        }
    }

    pub fn numeric(key: impl Into<String>, value: f64) -> Self {
        AnnotationResult {
            key: key.into(),
            value: AnnotationValue::Numeric(value),
            confidence: None,
            reason: None,
        }
    }

    pub fn json(key: impl Into<String>, value: Value) -> Self {
        AnnotationResult {
            key: key.into(),
            value: AnnotationValue::Json(value),
            confidence: None,
            reason: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn equality_ignores_provenance() {
        let a = AnnotationResult::string("k", "v").with_confidence(0.9);
        let b = AnnotationResult::string("k", "v").with_reason("other");
        assert_eq!(a, b);
        assert_ne!(a, AnnotationResult::string("k", "w"));
        assert_ne!(a, AnnotationResult::flag("k"));
    }

    #[test]
    fn value_kind_follows_variant() {
        assert_eq!(AnnotationValue::Flag.kind(), ValueKind::Flag);
        assert_eq!(AnnotationValue::Json(json!({})).kind(), ValueKind::Json);
    }

    #[test]
    fn table_names_cover_the_matrix() {
        let kinds = [
            EntityKind::ContentPart,
            EntityKind::Message,
            EntityKind::PromptResponse,
            EntityKind::Dialogue,
        ];
        let values = [
            ValueKind::Flag,
            ValueKind::String,
            ValueKind::Numeric,
            ValueKind::Json,
        ];
        let mut seen = std::collections::HashSet::new();
        for k in kinds {
            for v in values {
                let name = table_name(k, v);
                assert!(name.starts_with(k.as_str()));
                assert!(name.ends_with(v.as_str()));
                assert!(seen.insert(name));
            }
        }
        assert_eq!(seen.len(), 16);
    }
}
