//! Structural validation, independent of business rules.
//!
//! Mirrors the original implementation's standalone `validate_message`
//! helper: it returns a list of human-readable reasons rather than a
//! single error, and is reusable outside the Governor's stateful checks.

use crate::envelope::{parse_payload, Payload, RawEnvelope, KNOWN_KINDS};

/// Structural checks only: non-empty `from`/`topic`, known `type`, payload
/// matching that type's schema. Returns an empty vec when structurally
/// sound. On an unknown `type`, returns immediately without attempting a
/// payload check (there's no schema to check against).
pub fn validate_message(raw: &RawEnvelope) -> Vec<String> {
    let mut errors = Vec::new();

    if raw.from_agent.is_empty() {
        errors.push("from is required".to_string());
    }
    if raw.topic.is_empty() {
        errors.push("topic is required".to_string());
    }
    if !KNOWN_KINDS.contains(&raw.kind.as_str()) {
        errors.push(format!("unknown message type: {}", raw.kind));
        return errors;
    }

    if let Err(e) = parse_payload(&raw.kind, &raw.payload) {
        errors.push(format!("payload: {e}"));
    }

    errors
}

/// Convenience: structural validation plus the successfully-parsed
/// payload, when structurally sound.
pub fn validate_and_parse(raw: &RawEnvelope) -> Result<Payload, Vec<String>> {
    let errors = validate_message(raw);
    if !errors.is_empty() {
        return Err(errors);
    }
    parse_payload(&raw.kind, &raw.payload).map_err(|e| vec![format!("payload: {e}")])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(from: &str, topic: &str, kind: &str, payload: serde_json::Value) -> RawEnvelope {
        serde_json::from_value(json!({
            "id": "m1",
            "from": from,
            "topic": topic,
            "timestamp": 0.0,
            "tick": 0,
            "type": kind,
            "payload": payload,
        }))
        .unwrap()
    }

    #[test]
    fn rejects_missing_from_and_topic() {
        let r = raw("", "", "heartbeat", json!({"agent_id":"a","wallet":1.0,"inventory_count":0}));
        let errs = validate_message(&r);
        assert!(errs.iter().any(|e| e.contains("from is required")));
        assert!(errs.iter().any(|e| e.contains("topic is required")));
    }

    #[test]
    fn rejects_unknown_kind_and_short_circuits() {
        let r = raw("a", "/t", "frobnicate", json!({}));
        let errs = validate_message(&r);
        assert_eq!(errs.len(), 1);
        assert!(errs[0].contains("unknown message type"));
    }

    #[test]
    fn rejects_payload_missing_fields() {
        let r = raw("a", "/market/raw-goods", "offer", json!({"item": "potato"}));
        let errs = validate_message(&r);
        assert!(errs.iter().any(|e| e.starts_with("payload:")));
    }

    #[test]
    fn accepts_well_formed_message() {
        let r = raw(
            "a",
            "/market/raw-goods",
            "offer",
            json!({"item": "potato", "quantity": 5, "price_per_unit": 3.0}),
        );
        assert!(validate_message(&r).is_empty());
    }
}
