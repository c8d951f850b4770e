use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result};
use crate::models::ModelResolver;
use crate::translate::openai_types::{ChatCompletionResponse, ErrorEnvelope};
use crate::translate::request::{build_upstream_request, InboundRequest};
use crate::translate::response::translate_completion;
use crate::translate::sse::{FrameReassembler, LogicalFrame};
use crate::translate::streaming::ReasoningMerger;

use bytes::Bytes;
use futures::stream::Stream;
use futures::StreamExt;
use serde_json::Value;
use std::convert::Infallible;
use std::fmt::Display;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outbound event stream: already-encoded `data: ...\n\n` frames. Upstream
/// faults end the stream instead of surfacing as errors.
pub type FrameStream = Pin<Box<dyn Stream<Item = std::result::Result<Bytes, Infallible>> + Send>>;

/// Outcome of forwarding one chat completion.
pub enum ProxyOutcome {
    Complete(ChatCompletionResponse),
    Stream(FrameStream),
    /// Upstream answered with status >= 400. `body` is the upstream JSON
    /// verbatim, or an error envelope wrapping a non-JSON body.
    UpstreamFailure { status: u16, body: Value },
}

/// Forward a validated request to the upstream. Issues exactly one upstream
/// call, or none when the API key is missing.
pub async fn forward_completion(
    req: &InboundRequest,
    config: &ProxyConfig,
    resolver: &ModelResolver,
    client: &reqwest::Client,
) -> Result<ProxyOutcome> {
    let api_key = config.resolve_api_key()?;
    let url = config.completions_url();
    let timeout_secs = config.upstream.timeout_secs;
    let timeout = Duration::from_secs(timeout_secs);

    let upstream_req =
        build_upstream_request(req, resolver.resolve(&req.model), &config.features);

    info!(
        url = %url,
        model = %req.model,
        upstream_model = %upstream_req.model,
        stream = upstream_req.stream,
        "Forwarding chat completion"
    );

    let builder = client
        .post(&url)
        .bearer_auth(&api_key)
        .json(&upstream_req);

    let response = if upstream_req.stream {
        // Headers here; the body is bounded per chunk in `forward_stream`.
        tokio::time::timeout(timeout, builder.send())
            .await
            .map_err(|_| ProxyError::UpstreamTimeout { secs: timeout_secs })?
            .map_err(|e| ProxyError::from_reqwest(e, timeout_secs))?
    } else {
        builder
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| ProxyError::from_reqwest(e, timeout_secs))?
    };

    let status = response.status().as_u16();

    if status >= 400 {
        let body = response
            .text()
            .await
            .map_err(|e| ProxyError::from_reqwest(e, timeout_secs))?;
        warn!(status, body = truncate(&body, 300), "Upstream returned an error");
        return Ok(ProxyOutcome::UpstreamFailure {
            status,
            body: upstream_error_body(status, &body),
        });
    }

    if upstream_req.stream {
        let merger = ReasoningMerger::new(&config.features);
        let stream = forward_stream(response.bytes_stream(), merger, timeout);
        return Ok(ProxyOutcome::Stream(Box::pin(stream)));
    }

    let body = response
        .text()
        .await
        .map_err(|e| ProxyError::from_reqwest(e, timeout_secs))?;
    debug!(status, body_len = body.len(), "Upstream response received");

    let value: Value = serde_json::from_str(&body).map_err(|e| {
        ProxyError::translation(format!(
            "Failed to parse upstream response: {}. Body: {}",
            e,
            truncate(&body, 300)
        ))
    })?;

    let translated = translate_completion(&value, &req.model, &config.features);
    info!(
        prompt_tokens = translated.usage.prompt_tokens,
        completion_tokens = translated.usage.completion_tokens,
        "Completed"
    );

    Ok(ProxyOutcome::Complete(translated))
}

/// Structured upstream error bodies are forwarded untouched; anything else
/// is wrapped into the standard envelope.
pub fn upstream_error_body(status: u16, body: &str) -> Value {
    match serde_json::from_str::<Value>(body) {
        Ok(value @ (Value::Object(_) | Value::Array(_))) => value,
        _ => {
            let message = if body.trim().is_empty() {
                format!("Upstream returned status {status}")
            } else {
                body.to_string()
            };
            serde_json::to_value(ErrorEnvelope::upstream(message, status))
                .unwrap_or(Value::Null)
        }
    }
}

/// Re-frame an upstream SSE byte stream: reassemble lines, rewrite each frame
/// and emit it immediately. Stops after `[DONE]`. A transport fault, or no
/// chunk arriving within `idle`, ends the stream without emitting the
/// partially buffered line.
pub fn forward_stream<S, E>(
    byte_stream: S,
    mut merger: ReasoningMerger,
    idle: Duration,
) -> impl Stream<Item = std::result::Result<Bytes, Infallible>> + Send + 'static
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    async_stream::stream! {
        let mut reassembler = FrameReassembler::new();
        let mut done = false;
        let mut faulted = false;
        let mut frames_out = 0usize;

        tokio::pin!(byte_stream);

        loop {
            let chunk_result = match tokio::time::timeout(idle, byte_stream.next()).await {
                Ok(Some(r)) => r,
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        idle_secs = idle.as_secs_f64(),
                        "Upstream idle timeout, closing outbound stream"
                    );
                    faulted = true;
                    break;
                }
            };

            let chunk = match chunk_result {
                Ok(c) => c,
                Err(e) => {
                    warn!(error = %e, "Upstream stream fault, closing outbound stream");
                    faulted = true;
                    break;
                }
            };

            for frame in reassembler.push(&chunk) {
                let is_done = matches!(frame, LogicalFrame::Done);
                for out in merger.rewrite(frame) {
                    frames_out += 1;
                    yield Ok(out.to_bytes());
                }
                if is_done {
                    done = true;
                    break;
                }
            }

            if done {
                break;
            }
        }

        if !done && !faulted {
            if let Some(frame) = reassembler.finish() {
                for out in merger.rewrite(frame) {
                    frames_out += 1;
                    yield Ok(out.to_bytes());
                }
            }
        }

        info!(frames = frames_out, done, faulted, "Stream completed");
    }
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeatureFlags;
    use futures::stream;

    fn collect(chunks: Vec<std::result::Result<Bytes, String>>, flags: FeatureFlags) -> String {
        let out = forward_stream(
            stream::iter(chunks),
            ReasoningMerger::new(&flags),
            Duration::from_secs(5),
        );
        let frames: Vec<Bytes> = tokio_test::block_on(out.collect::<Vec<_>>())
            .into_iter()
            .map(|r| match r {
                Ok(b) => b,
                Err(never) => match never {},
            })
            .collect();
        frames
            .iter()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .collect()
    }

    fn ok(s: &str) -> std::result::Result<Bytes, String> {
        Ok(Bytes::copy_from_slice(s.as_bytes()))
    }

    const UPSTREAM: &str = concat!(
        "data: {\"choices\":[{\"delta\":{\"reasoning_content\":\"A\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"reasoning_content\":\"B\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"C\"}}]}\n\n",
        "data: [DONE]\n\n",
    );

    #[test]
    fn test_done_emitted_exactly_once_for_any_split() {
        let bytes = UPSTREAM.as_bytes();
        let whole = collect(vec![ok(UPSTREAM)], FeatureFlags::default());
        assert_eq!(whole.matches("data: [DONE]\n\n").count(), 1);

        for cut in 0..=bytes.len() {
            let (a, b) = bytes.split_at(cut);
            let split = collect(
                vec![
                    Ok(Bytes::copy_from_slice(a)),
                    Ok(Bytes::copy_from_slice(b)),
                ],
                FeatureFlags::default(),
            );
            assert_eq!(split, whole, "split at byte {cut}");
        }
    }

    #[test]
    fn test_nothing_forwarded_after_done() {
        let out = collect(
            vec![ok("data: [DONE]\n\ndata: {\"late\":true}\n\ndata: [DONE]\n\n")],
            FeatureFlags::default(),
        );
        assert_eq!(out, "data: [DONE]\n\n");
    }

    #[test]
    fn test_reasoning_merged_over_the_wire() {
        let flags = FeatureFlags {
            show_reasoning: true,
            ..FeatureFlags::default()
        };
        let out = collect(vec![ok(UPSTREAM)], flags);

        let content: String = out
            .split("\n\n")
            .filter_map(|event| event.strip_prefix("data: "))
            .filter_map(|payload| serde_json::from_str::<Value>(payload).ok())
            .filter_map(|v| v["choices"][0]["delta"]["content"].as_str().map(str::to_string))
            .collect();
        assert_eq!(content, "<think>\nAB</think>\n\nC");
        assert!(!out.contains("reasoning_content"));
    }

    #[test]
    fn test_fault_ends_stream_without_partial_frame() {
        let out = collect(
            vec![
                ok("data: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}\n\ndata: {\"cho"),
                Err("connection reset".to_string()),
                ok("ices\":[]}\n\n"),
            ],
            FeatureFlags::default(),
        );
        assert_eq!(out.matches("data: ").count(), 1);
        assert!(!out.contains("[DONE]"));
    }

    #[tokio::test]
    async fn test_stalled_upstream_ends_stream_after_idle_timeout() {
        let first = ok("data: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}\n\ndata: {\"cho");
        let stalled = stream::iter(vec![first]).chain(stream::pending());
        let out = forward_stream(
            stalled,
            ReasoningMerger::new(&FeatureFlags::default()),
            Duration::from_millis(50),
        );

        let frames = tokio::time::timeout(Duration::from_secs(5), out.collect::<Vec<_>>())
            .await
            .expect("stream should end once the upstream goes idle");
        let body: String = frames
            .into_iter()
            .map(|r| match r {
                Ok(b) => String::from_utf8_lossy(&b).into_owned(),
                Err(never) => match never {},
            })
            .collect();

        assert_eq!(body.matches("data: ").count(), 1);
        assert!(body.contains("\"hi\""));
        assert!(!body.contains("[DONE]"));
    }

    #[test]
    fn test_upstream_error_body() {
        let json = r#"{"error":{"message":"slow down","type":"rate_limit","code":429}}"#;
        assert_eq!(
            upstream_error_body(429, json),
            serde_json::from_str::<Value>(json).unwrap()
        );

        let wrapped = upstream_error_body(502, "<html>Bad Gateway</html>");
        assert_eq!(wrapped["error"]["message"], "<html>Bad Gateway</html>");
        assert_eq!(wrapped["error"]["type"], "upstream_error");
        assert_eq!(wrapped["error"]["code"], 502);

        let empty = upstream_error_body(503, "");
        assert_eq!(empty["error"]["message"], "Upstream returned status 503");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "h");
        assert_eq!(truncate("abc", 10), "abc");
    }
}
