use serde_json::{Map, Value};

pub(crate) fn strip_code_fence(text: &str) -> String {
    let raw = text.trim();
    if !(raw.starts_with("```") && raw.ends_with("```")) {
        return raw.to_string();
    }
    let lines: Vec<&str> = raw.lines().collect();
    if lines.len() < 2 {
        return raw.trim_matches('`').trim().to_string();
    }
    let first = lines[0].trim_start_matches('`').trim();
    let mut body = lines[1..lines.len() - 1].join("\n").trim().to_string();
    if first.is_empty() && body.to_ascii_lowercase().starts_with("json") {
        body = body[4..].trim().to_string();
    }
    body
}

/// Finds the first JSON object in free-form model output: the whole text,
/// then the outermost `{...}` span.
pub(crate) fn extract_json_object_from_text(text: &str) -> Option<Map<String, Value>> {
    let raw = strip_code_fence(text);
    if raw.trim().is_empty() {
        return None;
    }
    let mut candidates = vec![raw.clone()];
    if let (Some(start), Some(end)) = (raw.find('{'), raw.rfind('}')) {
        if end > start {
            candidates.push(raw[start..=end].to_string());
        }
    }
    for candidate in candidates {
        if let Ok(Value::Object(object)) = serde_json::from_str::<Value>(&candidate) {
            return Some(object);
        }
    }
    None
}

/// Normalizes a caption returned by a vision model into one short line.
pub(crate) fn clean_description(text: &str, max_chars: usize) -> String {
    let mut cleaned = text.trim().to_string();
    if cleaned.is_empty() {
        return String::new();
    }

    let lower = cleaned.to_ascii_lowercase();
    for prefix in ["description:", "caption:"] {
        if lower.starts_with(prefix) {
            cleaned = cleaned[prefix.len()..].trim().to_string();
            break;
        }
    }

    cleaned = cleaned
        .trim_matches(|ch: char| matches!(ch, '"' | '\''))
        .replace(['\r', '\n', '\t'], " ");
    cleaned = cleaned.split_whitespace().collect::<Vec<&str>>().join(" ");
    if cleaned.is_empty() {
        return String::new();
    }

    if cleaned.chars().count() > max_chars {
        cleaned = cleaned.chars().take(max_chars + 1).collect::<String>();
        if let Some((head, _)) = cleaned.rsplit_once(' ') {
            cleaned = head.trim().to_string();
        }
        if cleaned.chars().count() > max_chars {
            cleaned = cleaned.chars().take(max_chars).collect();
        }
    }
    cleaned.trim().to_string()
}
