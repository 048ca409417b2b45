/// Delta decoder: one logical SSE line in, zero or more normalized deltas out.
///
/// A malformed payload is dropped (logged and counted), never raised.
use serde::Deserialize;
use smallvec::SmallVec;

use crate::observability::record_dropped_event;

pub const DATA_PREFIX: &str = "data:";
pub const DONE_TOKEN: &str = "[DONE]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaKind {
    Answer(String),
    Reasoning(String),
    /// The terminal `[DONE]` marker.
    Done,
    /// A top-level `error` in the payload; fatal for the stream.
    Error(String),
}

/// One incremental unit decoded from a single upstream event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delta {
    /// Event id shared by every delta decoded from the same payload.
    pub id: Option<String>,
    pub kind: DeltaKind,
    /// The choice carried a non-null `finish_reason`.
    pub finish_hint: bool,
}

impl Delta {
    #[must_use]
    pub fn done() -> Self {
        Self {
            id: None,
            kind: DeltaKind::Done,
            finish_hint: true,
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, DeltaKind::Done | DeltaKind::Error(_))
    }
}

pub type Deltas = SmallVec<[Delta; 2]>;

#[derive(Debug, Deserialize)]
struct ChunkWire {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    choices: Vec<ChoiceWire>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChoiceWire {
    #[serde(default)]
    delta: Option<DeltaWire>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeltaWire {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
}

/// Strip the `data:` marker and surrounding whitespace. `None` for any other line.
#[must_use]
pub fn data_payload(line: &str) -> Option<&str> {
    line.trim_start()
        .strip_prefix(DATA_PREFIX)
        .map(str::trim)
}

/// Decode one logical line into deltas.
#[must_use]
pub fn decode_line(line: &str) -> Deltas {
    let mut out = Deltas::new();
    let Some(payload) = data_payload(line) else {
        return out;
    };
    if payload == DONE_TOKEN {
        out.push(Delta::done());
        return out;
    }
    if payload.is_empty() {
        return out;
    }

    let chunk: ChunkWire = match serde_json::from_str(payload) {
        Ok(chunk) => chunk,
        Err(err) => {
            record_dropped_event(&err);
            return out;
        }
    };

    if let Some(error) = chunk.error {
        out.push(Delta {
            id: chunk.id,
            kind: DeltaKind::Error(error_message(&error)),
            finish_hint: true,
        });
        return out;
    }

    let Some(choice) = chunk.choices.into_iter().next() else {
        return out;
    };
    let finish_hint = choice.finish_reason.is_some();
    let Some(delta) = choice.delta else {
        return out;
    };

    let reasoning = delta
        .reasoning_content
        .filter(|text| !text.is_empty())
        .or(delta.reasoning.filter(|text| !text.is_empty()));
    if let Some(text) = reasoning {
        out.push(Delta {
            id: chunk.id.clone(),
            kind: DeltaKind::Reasoning(text),
            finish_hint,
        });
    }
    if let Some(text) = delta.content.filter(|text| !text.is_empty()) {
        out.push(Delta {
            id: chunk.id,
            kind: DeltaKind::Answer(text),
            finish_hint,
        });
    }
    out
}

fn error_message(error: &serde_json::Value) -> String {
    match error {
        serde_json::Value::String(message) => message.clone(),
        serde_json::Value::Object(fields) => fields
            .get("message")
            .and_then(serde_json::Value::as_str)
            .map_or_else(|| error.to_string(), ToString::to_string),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(line: &str) -> Vec<DeltaKind> {
        decode_line(line).into_iter().map(|delta| delta.kind).collect()
    }

    #[test]
    fn test_non_data_line_yields_nothing() {
        assert!(decode_line("event: message").is_empty());
        assert!(decode_line(": keep-alive").is_empty());
    }

    #[test]
    fn test_done_marker() {
        let deltas = decode_line("data: [DONE]");
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].kind, DeltaKind::Done);
        assert!(deltas[0].is_terminal());
        assert_eq!(kinds("data:[DONE]  "), vec![DeltaKind::Done]);
    }

    #[test]
    fn test_answer_delta() {
        let line = r#"data: {"id":"c1","choices":[{"delta":{"content":"Hi"},"finish_reason":null}]}"#;
        let deltas = decode_line(line);
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].id.as_deref(), Some("c1"));
        assert_eq!(deltas[0].kind, DeltaKind::Answer("Hi".to_string()));
        assert!(!deltas[0].finish_hint);
    }

    #[test]
    fn test_reasoning_and_answer_in_one_event() {
        let line = r#"data: {"id":"c2","choices":[{"delta":{"reasoning_content":"hmm","content":"ok"}}]}"#;
        let deltas = decode_line(line);
        assert_eq!(
            deltas.iter().map(|d| d.kind.clone()).collect::<Vec<_>>(),
            vec![
                DeltaKind::Reasoning("hmm".to_string()),
                DeltaKind::Answer("ok".to_string())
            ]
        );
        assert!(deltas.iter().all(|d| d.id.as_deref() == Some("c2")));
    }

    #[test]
    fn test_reasoning_alias_field() {
        let line = r#"data: {"choices":[{"delta":{"reasoning":"step"}}]}"#;
        assert_eq!(kinds(line), vec![DeltaKind::Reasoning("step".to_string())]);
    }

    #[test]
    fn test_finish_reason_sets_hint() {
        let line = r#"data: {"choices":[{"delta":{"content":"."},"finish_reason":"stop"}]}"#;
        let deltas = decode_line(line);
        assert!(deltas[0].finish_hint);
        assert!(!deltas[0].is_terminal());
    }

    #[test]
    fn test_empty_and_null_fields_yield_nothing() {
        assert!(decode_line(r#"data: {"choices":[{"delta":{"content":""}}]}"#).is_empty());
        assert!(decode_line(r#"data: {"choices":[{"delta":{"content":null}}]}"#).is_empty());
        assert!(decode_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#).is_empty());
        assert!(decode_line(r#"data: {"choices":[]}"#).is_empty());
    }

    #[test]
    fn test_malformed_json_is_dropped() {
        let before = crate::observability::dropped_events();
        assert!(decode_line(r#"data: {"choices":[{"delta":"#).is_empty());
        assert!(crate::observability::dropped_events() > before);
    }

    #[test]
    fn test_error_payload_object() {
        let line = r#"data: {"error":{"message":"model overloaded","type":"server_error"}}"#;
        let deltas = decode_line(line);
        assert_eq!(
            deltas[0].kind,
            DeltaKind::Error("model overloaded".to_string())
        );
        assert!(deltas[0].is_terminal());
    }

    #[test]
    fn test_error_payload_string() {
        assert_eq!(
            kinds(r#"data: {"error":"bad things"}"#),
            vec![DeltaKind::Error("bad things".to_string())]
        );
    }

    #[test]
    fn test_data_payload_strips_marker() {
        assert_eq!(data_payload("data: {}"), Some("{}"));
        assert_eq!(data_payload("data:{}"), Some("{}"));
        assert_eq!(data_payload("id: 1"), None);
    }
}
