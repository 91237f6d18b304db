//! SSE wire formatting
//!
//! Each message is one or more `field: value` lines terminated by a blank
//! line. Structured payloads are serialized as single-line JSON; a payload
//! that does contain newlines gets one `data: ` prefix per line.

use chrono::Utc;
use serde_json::{json, Value};

/// Render one SSE frame
///
/// Field order is fixed: `id`, `event`, `retry`, then the `data:` lines.
pub fn format_frame(data: &Value, event: Option<&str>, id: Option<&str>, retry: Option<u64>) -> String {
    let mut parts: Vec<String> = Vec::new();

    if let Some(id) = id {
        parts.push(format!("id: {id}"));
    }
    if let Some(event) = event {
        parts.push(format!("event: {event}"));
    }
    if let Some(retry) = retry {
        parts.push(format!("retry: {retry}"));
    }

    let payload = match data {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    for line in payload.split('\n') {
        parts.push(format!("data: {line}"));
    }

    parts.join("\n") + "\n\n"
}

fn timestamp() -> String {
    Utc::now().to_rfc3339()
}

/// `status` event: lifecycle progress for the client
pub fn status(status: &str, message: Option<&str>, progress: Option<f64>) -> String {
    let mut data = json!({
        "type": "status",
        "status": status,
        "timestamp": timestamp(),
    });
    if let Some(message) = message {
        data["message"] = json!(message);
    }
    if let Some(progress) = progress {
        data["progress"] = json!(progress);
    }
    format_frame(&data, Some("status"), None, None)
}

/// `chunk` event: one text fragment plus caller-supplied metadata
///
/// `metadata` must be a JSON object; its entries are merged into the payload.
pub fn chunk(chunk: &str, chunk_type: Option<&str>, metadata: Value) -> String {
    let mut data = json!({
        "type": "chunk",
        "chunk": chunk,
        "chunk_type": chunk_type.unwrap_or("content"),
        "timestamp": timestamp(),
    });
    if let (Some(data_map), Value::Object(extra)) = (data.as_object_mut(), metadata) {
        for (key, value) in extra {
            data_map.insert(key, value);
        }
    }
    format_frame(&data, Some("chunk"), None, None)
}

/// `complete` event: terminal success, with result fields merged in
pub fn complete(result: Value) -> String {
    let mut data = json!({
        "type": "complete",
        "timestamp": timestamp(),
    });
    if let (Some(data_map), Value::Object(extra)) = (data.as_object_mut(), result) {
        for (key, value) in extra {
            data_map.insert(key, value);
        }
    }
    format_frame(&data, Some("complete"), None, None)
}

/// `error` event: terminal failure
pub fn error(message: &str, code: Option<&str>) -> String {
    let mut data = json!({
        "type": "error",
        "message": message,
        "timestamp": timestamp(),
    });
    if let Some(code) = code {
        data["code"] = json!(code);
    }
    format_frame(&data, Some("error"), None, None)
}

/// `heartbeat` event: liveness proof, no payload beyond the timestamp
pub fn heartbeat() -> String {
    let data = json!({
        "type": "heartbeat",
        "timestamp": timestamp(),
    });
    format_frame(&data, Some("heartbeat"), None, None)
}
