use serde_json::Value;

use super::openai_types::{ChatCompletionResponse, ChatUsage, Choice, ChoiceMessage};
use super::streaming::THINK_OPEN;
use crate::config::FeatureFlags;

/// Translate a complete upstream completion body into the caller-facing
/// envelope. `original_model` is what the caller asked for, echoed back
/// verbatim regardless of the upstream model that served it.
pub fn translate_completion(
    upstream: &Value,
    original_model: &str,
    flags: &FeatureFlags,
) -> ChatCompletionResponse {
    let choices = upstream
        .get("choices")
        .and_then(Value::as_array)
        .map(|choices| {
            choices
                .iter()
                .enumerate()
                .map(|(position, choice)| translate_choice(choice, position, flags))
                .collect()
        })
        .unwrap_or_default();

    let usage = translate_usage(upstream.get("usage"));

    ChatCompletionResponse {
        id: format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
        object: "chat.completion".to_string(),
        created: chrono::Utc::now().timestamp(),
        model: original_model.to_string(),
        choices,
        usage,
    }
}

/// Each counter is read on its own so one malformed field does not zero the
/// others.
fn translate_usage(usage: Option<&Value>) -> ChatUsage {
    let counter = |key: &str| {
        usage
            .and_then(|u| u.get(key))
            .and_then(Value::as_u64)
            .unwrap_or(0)
    };

    ChatUsage {
        prompt_tokens: counter("prompt_tokens"),
        completion_tokens: counter("completion_tokens"),
        total_tokens: counter("total_tokens"),
    }
}

fn translate_choice(choice: &Value, position: usize, flags: &FeatureFlags) -> Choice {
    let message = choice.get("message");
    let text = |key: &str| message_text(message, key);

    let mut content = text("content").unwrap_or_default().to_string();
    if flags.show_reasoning {
        if let Some(reasoning) = text("reasoning_content") {
            content = format!("{THINK_OPEN}{reasoning}\n</think>\n\n{content}");
        }
    }

    let index = choice
        .get("index")
        .and_then(Value::as_f64)
        .filter(|i| i.is_finite() && *i >= 0.0)
        .map_or(position as u64, |i| i as u64);

    let finish_reason = choice
        .get("finish_reason")
        .and_then(Value::as_str)
        .unwrap_or("stop")
        .to_string();

    Choice {
        index,
        message: ChoiceMessage {
            role: text("role").unwrap_or("assistant").to_string(),
            content,
        },
        finish_reason,
    }
}

fn message_text<'a>(message: Option<&'a Value>, key: &str) -> Option<&'a str> {
    message
        .and_then(|m| m.get(key))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}
