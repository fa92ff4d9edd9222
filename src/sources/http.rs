//! Small helpers shared by the HTTP feeds: status mapping and tolerant field
//! picking over loosely-typed JSON payloads.

use reqwest::RequestBuilder;
use serde_json::Value;

use crate::error::{FuseError, Result};

/// Send `request`, map 429 and non-2xx statuses, and parse the body as JSON.
pub async fn send_json(request: RequestBuilder, provider: &str) -> Result<Value> {
    let response = request.send().await?;
    let status = response.status();

    if status.as_u16() == 429 {
        return Err(FuseError::RateLimited(provider.to_string()));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(FuseError::UpstreamStatus {
            status: status.as_u16(),
            body: truncate(&body, 256),
        });
    }

    Ok(response.json::<Value>().await?)
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

pub fn pick_array<'a>(root: &'a Value, keys: &[&str]) -> Option<&'a [Value]> {
    keys.iter()
        .find_map(|key| root.get(*key).and_then(|v| v.as_array()).map(Vec::as_slice))
}

pub fn pick_obj<'a>(root: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| root.get(*key).filter(|v| !v.is_null()))
}

pub fn pick_str<'a>(root: &'a Value, keys: &[&str]) -> Option<&'a str> {
    pick_obj(root, keys).and_then(|v| v.as_str())
}

/// Numbers or numeric strings
pub fn as_f64ish(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .filter(|v: &f64| v.is_finite())
}

pub fn pick_f64(root: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter()
        .find_map(|key| root.get(*key).and_then(as_f64ish))
}

/// Exchange prices quoted in cents (1..=100) become [0, 1]
pub fn from_cents_if_needed(value: f64) -> f64 {
    if value > 1.0 && value <= 100.0 {
        value / 100.0
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn picks_first_present_key() {
        let v = json!({"data": [1, 2], "last_price": "42", "yes_bid": null, "title": "T"});
        assert_eq!(pick_array(&v, &["markets", "data"]).map(|a| a.len()), Some(2));
        assert_eq!(pick_f64(&v, &["yes_bid", "last_price"]), Some(42.0));
        assert_eq!(pick_str(&v, &["question", "title"]), Some("T"));
        assert_eq!(pick_obj(&v, &["yes_bid"]), None);
    }

    #[test]
    fn cents_are_normalised() {
        assert_eq!(from_cents_if_needed(42.0), 0.42);
        assert_eq!(from_cents_if_needed(0.42), 0.42);
        assert_eq!(from_cents_if_needed(1.0), 1.0);
    }

    #[test]
    fn long_bodies_are_truncated() {
        let body = "x".repeat(300);
        assert_eq!(truncate(&body, 10), format!("{}...", "x".repeat(10)));
    }
}
