//! Rewriting of reassembled stream frames before they go back to the caller.
//!
//! Reasoning models stream chain-of-thought in `delta.reasoning_content`,
//! which most OpenAI clients do not understand. The [`ReasoningMerger`] either
//! folds it into `delta.content` inside a `<think>` section or drops it, and
//! tracks across frames whether that section is still open.

use bytes::Bytes;
use serde_json::{Map, Value};

use super::sse::{LogicalFrame, DATA_PREFIX, DONE_TOKEN};
use crate::config::FeatureFlags;

pub const THINK_OPEN: &str = "<think>\n";
pub const THINK_CLOSE: &str = "</think>\n\n";

/// A frame ready to be written to the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    Data(String),
    Done,
}

impl OutboundFrame {
    /// Encode as a `data: ...\n\n` event.
    pub fn to_bytes(&self) -> Bytes {
        let payload = match self {
            Self::Data(payload) => payload.as_str(),
            Self::Done => DONE_TOKEN,
        };
        Bytes::from(format!("{DATA_PREFIX}{payload}\n\n"))
    }
}

/// Per-stream merge state. Create one per forwarded response.
#[derive(Debug, Default)]
pub struct ReasoningMerger {
    show_reasoning: bool,
    open: bool,
}

impl ReasoningMerger {
    pub fn new(flags: &FeatureFlags) -> Self {
        Self {
            show_reasoning: flags.show_reasoning,
            open: false,
        }
    }

    /// Whether a `<think>` section has been opened but not yet closed.
    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn rewrite(&mut self, frame: LogicalFrame) -> Vec<OutboundFrame> {
        match frame {
            LogicalFrame::Done => vec![OutboundFrame::Done],
            LogicalFrame::Raw(text) => vec![OutboundFrame::Data(text)],
            LogicalFrame::Json(mut value) => {
                if let Some(delta) = value
                    .pointer_mut("/choices/0/delta")
                    .and_then(Value::as_object_mut)
                {
                    self.merge_delta(delta);
                }
                match serde_json::to_string(&value) {
                    Ok(json) => vec![OutboundFrame::Data(json)],
                    Err(e) => {
                        tracing::debug!(error = %e, "Dropping unserializable frame");
                        Vec::new()
                    }
                }
            }
        }
    }

    fn merge_delta(&mut self, delta: &mut Map<String, Value>) {
        let reasoning = take_text(delta, "reasoning_content");
        let content = take_text(delta, "content");

        let mut merged = String::new();
        if self.show_reasoning {
            if let Some(reasoning) = reasoning {
                if !self.open {
                    merged.push_str(THINK_OPEN);
                    self.open = true;
                }
                merged.push_str(&reasoning);
            }
            if let Some(content) = content {
                if self.open {
                    merged.push_str(THINK_CLOSE);
                    self.open = false;
                }
                merged.push_str(&content);
            }
        } else if let Some(content) = content {
            merged = content;
        }

        delta.insert("content".to_string(), Value::String(merged));
    }
}

/// Remove `key` and return it if it held a non-empty string.
fn take_text(delta: &mut Map<String, Value>, key: &str) -> Option<String> {
    match delta.remove(key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn delta_frame(delta: Value) -> LogicalFrame {
        LogicalFrame::Json(json!({
            "id": "chatcmpl-1",
            "object": "chat.completion.chunk",
            "choices": [{"index": 0, "delta": delta, "finish_reason": null}]
        }))
    }

    fn emitted_delta(frames: &[OutboundFrame]) -> Value {
        match frames {
            [OutboundFrame::Data(json)] => {
                let value: Value = serde_json::from_str(json).unwrap();
                value["choices"][0]["delta"].clone()
            }
            other => panic!("expected one data frame, got {other:?}"),
        }
    }

    fn showing() -> ReasoningMerger {
        ReasoningMerger::new(&FeatureFlags {
            show_reasoning: true,
            ..FeatureFlags::default()
        })
    }

    #[test]
    fn test_reasoning_then_content_is_wrapped() {
        let mut merger = showing();
        let mut text = String::new();

        for delta in [
            json!({"reasoning_content": "A"}),
            json!({"reasoning_content": "B"}),
            json!({"content": "C"}),
        ] {
            let out = emitted_delta(&merger.rewrite(delta_frame(delta)));
            assert!(out.get("reasoning_content").is_none());
            text.push_str(out["content"].as_str().unwrap());
        }

        assert_eq!(text, "<think>\nAB</think>\n\nC");
        assert!(!merger.is_open());
    }

    #[test]
    fn test_reasoning_and_content_in_one_delta() {
        let mut merger = showing();
        let out = emitted_delta(&merger.rewrite(delta_frame(json!({
            "reasoning_content": "R",
            "content": "C"
        }))));
        assert_eq!(out["content"], "<think>\nR</think>\n\nC");
        assert!(!merger.is_open());
    }

    #[test]
    fn test_section_stays_open_across_empty_deltas() {
        let mut merger = showing();
        merger.rewrite(delta_frame(json!({"reasoning_content": "R"})));
        let out = emitted_delta(&merger.rewrite(delta_frame(json!({"role": "assistant"}))));
        assert_eq!(out["content"], "");
        assert_eq!(out["role"], "assistant");
        assert!(merger.is_open());
    }

    #[test]
    fn test_hidden_reasoning_is_stripped() {
        let mut merger = ReasoningMerger::new(&FeatureFlags::default());

        let out = emitted_delta(&merger.rewrite(delta_frame(json!({
            "reasoning_content": "secret",
            "content": "visible"
        }))));
        assert_eq!(out["content"], "visible");
        assert!(out.get("reasoning_content").is_none());

        let out = emitted_delta(&merger.rewrite(delta_frame(json!({"reasoning_content": "x"}))));
        assert_eq!(out["content"], "");
        assert!(!merger.is_open());
    }

    #[test]
    fn test_other_fields_preserved() {
        let mut merger = ReasoningMerger::new(&FeatureFlags::default());
        let frames = merger.rewrite(delta_frame(json!({"content": "hi", "tool_calls": []})));
        let OutboundFrame::Data(json) = &frames[0] else {
            panic!("expected data frame");
        };
        let value: Value = serde_json::from_str(json).unwrap();
        assert_eq!(value["id"], "chatcmpl-1");
        assert_eq!(value["object"], "chat.completion.chunk");
        assert_eq!(value["choices"][0]["delta"]["tool_calls"], json!([]));
    }

    #[test]
    fn test_non_delta_shapes_pass_through() {
        let mut merger = showing();
        for payload in [
            json!({"usage": {"prompt_tokens": 1}}),
            json!({"choices": []}),
            json!({"choices": [{"delta": "not an object"}]}),
            json!([1, 2, 3]),
        ] {
            let frames = merger.rewrite(LogicalFrame::Json(payload.clone()));
            assert_eq!(
                frames,
                vec![OutboundFrame::Data(serde_json::to_string(&payload).unwrap())]
            );
        }
        assert!(!merger.is_open());
    }

    #[test]
    fn test_done_and_raw_frames() {
        let mut merger = showing();
        assert_eq!(merger.rewrite(LogicalFrame::Done), vec![OutboundFrame::Done]);
        assert_eq!(
            merger.rewrite(LogicalFrame::Raw("{broken".to_string())),
            vec![OutboundFrame::Data("{broken".to_string())]
        );
    }

    #[test]
    fn test_frame_encoding() {
        assert_eq!(OutboundFrame::Done.to_bytes(), Bytes::from("data: [DONE]\n\n"));
        assert_eq!(
            OutboundFrame::Data("{}".to_string()).to_bytes(),
            Bytes::from("data: {}\n\n")
        );
    }
}
