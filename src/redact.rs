use serde_json::Value;

/// Key substrings whose values are scrubbed before a payload reaches
/// persistent memory or logs. Matching is case-insensitive.
const SENSITIVE_KEYS: &[&str] = &[
    "password",
    "secret",
    "api_key",
    "apikey",
    "token",
    "credential",
    "account_number",
    "account_id",
    "authorization",
    "broker_payload",
];

pub const REDACTED: &str = "[REDACTED]";

/// Deterministically scrub sensitive fields from a structured payload.
///
/// Walks objects and arrays recursively; any object entry whose key contains
/// a sensitive substring has its entire value replaced with `"[REDACTED]"`.
/// Idempotent: redacting an already-redacted payload is a no-op.
pub fn redact(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, val) in map {
                if is_sensitive(key) {
                    out.insert(key.clone(), Value::String(REDACTED.to_string()));
                } else {
                    out.insert(key.clone(), redact(val));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact).collect()),
        other => other.clone(),
    }
}

fn is_sensitive(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    SENSITIVE_KEYS.iter().any(|s| lower.contains(s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scrubs_sensitive_keys_at_any_depth() {
        let payload = json!({
            "symbol": "AAPL",
            "broker": { "api_key": "sk-123", "endpoint": "https://x" },
            "legs": [{ "Account_Number": "999-1", "qty": 5 }],
        });
        let clean = redact(&payload);
        assert_eq!(clean["broker"]["api_key"], REDACTED);
        assert_eq!(clean["legs"][0]["Account_Number"], REDACTED);
        assert_eq!(clean["symbol"], "AAPL");
        assert_eq!(clean["broker"]["endpoint"], "https://x");
        assert_eq!(clean["legs"][0]["qty"], 5);
    }

    #[test]
    fn redaction_is_idempotent() {
        let payload = json!({ "auth_token": { "nested": "value" }, "ok": 1 });
        let once = redact(&payload);
        let twice = redact(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn redacts_whole_value_not_just_leaves() {
        let payload = json!({ "credentials": { "user": "a", "pass": "b" } });
        let clean = redact(&payload);
        assert_eq!(clean["credentials"], REDACTED);
    }

    #[test]
    fn non_objects_pass_through() {
        assert_eq!(redact(&json!(42)), json!(42));
        assert_eq!(redact(&json!("text")), json!("text"));
        assert_eq!(redact(&json!([1, 2])), json!([1, 2]));
    }
}
