//! Server-Sent Events aggregation for streaming chat-completion responses.
//!
//! Many providers answer a single chat request with a stream of `data:`
//! frames rather than one JSON body; stage-2 content verification needs the
//! full assistant text, not one frame. This mirrors the frame-to-text
//! union used by multi-provider SSE accumulators in the pack (Anthropic
//! `delta.text`, OpenAI `choices[*].delta.content`, Gemini
//! `candidates[*].content.parts[*].text`), generalized here into a single
//! pass over raw response bytes rather than a typed `StreamAction` enum,
//! since this service only needs the aggregated text, not tool calls or
//! stop reasons.

const MIN_LINE_BUFFER: usize = 1024 * 1024;

/// Aggregates a raw HTTP response body into the text that should be
/// checked against `success_contains`. Falls back to the raw body when the
/// response isn't SSE-shaped or aggregation yields nothing.
pub fn aggregate_body(raw: &str) -> String {
    if !looks_like_sse(raw) {
        return raw.to_string();
    }

    let mut aggregated = String::with_capacity(raw.len().max(MIN_LINE_BUFFER).min(raw.len() + 64));
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() || !line.starts_with("data:") {
            continue;
        }
        let payload = line["data:".len()..].trim();
        if payload.is_empty() || payload == "[DONE]" {
            continue;
        }
        match serde_json::from_str::<serde_json::Value>(payload) {
            Ok(value) => aggregated.push_str(&extract_text(&value)),
            Err(_) => aggregated.push_str(payload),
        }
    }

    if aggregated.is_empty() {
        raw.to_string()
    } else {
        aggregated
    }
}

/// `event:` lines confirm SSE framing but aren't required — Gemini sends
/// bare `data:` lines with no `event:` at all.
fn looks_like_sse(raw: &str) -> bool {
    raw.lines().any(|l| l.trim_start().starts_with("data:"))
}

/// Union of known text-extraction paths across provider SSE schemas, plus a
/// fallback for flat `{"content": ...}` / `{"message": ...}` shapes.
fn extract_text(value: &serde_json::Value) -> String {
    let mut out = String::new();

    if let Some(text) = value.pointer("/delta/text").and_then(|v| v.as_str()) {
        out.push_str(text);
    }

    if let Some(choices) = value.get("choices").and_then(|v| v.as_array()) {
        for choice in choices {
            if let Some(content) = choice.pointer("/delta/content").and_then(|v| v.as_str()) {
                out.push_str(content);
            }
        }
    }

    if let Some(candidates) = value.get("candidates").and_then(|v| v.as_array()) {
        for candidate in candidates {
            if let Some(parts) = candidate.pointer("/content/parts").and_then(|v| v.as_array()) {
                for part in parts {
                    if let Some(text) = part.get("text").and_then(|v| v.as_str()) {
                        out.push_str(text);
                    }
                }
            }
        }
    }

    if out.is_empty() {
        if let Some(content) = value.get("content").and_then(|v| v.as_str()) {
            out.push_str(content);
        } else if let Some(message) = value.get("message").and_then(|v| v.as_str()) {
            out.push_str(message);
        }
    }

    out
}
