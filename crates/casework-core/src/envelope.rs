//! Authority Envelope (C6): versioned payload wrapper for replay-safe schema evolution.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const ENVELOPE_VERSION_V1: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "envelopeVersion")]
    pub envelope_version: u32,
    pub domain: String,
    pub event: String,
    pub data: Value,
}

impl Envelope {
    pub fn v1(domain: impl Into<String>, event: impl Into<String>, data: Value) -> Self {
        Self {
            envelope_version: ENVELOPE_VERSION_V1,
            domain: domain.into(),
            event: event.into(),
            data,
        }
    }
}

/// Identifies valid envelopes for replay. Unrecognized versions are preserved opaquely rather
/// than rejected, so future additive versions don't break older readers.
pub fn is_recognized_envelope(value: &Value) -> bool {
    value
        .get("envelopeVersion")
        .and_then(Value::as_u64)
        .map(|v| v == ENVELOPE_VERSION_V1 as u64)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn recognizes_v1_envelope() {
        let env = Envelope::v1("CASE_LIFECYCLE", "TRANSITION", json!({"from": "INTAKED"}));
        let value = serde_json::to_value(&env).unwrap();
        assert!(is_recognized_envelope(&value));
    }

    #[test]
    fn unknown_version_is_not_recognized_but_not_rejected() {
        let value = json!({"envelopeVersion": 7, "domain": "X", "event": "Y", "data": {}});
        assert!(!is_recognized_envelope(&value));
        // round trips opaquely through serde_json::Value without panicking
        let _: Value = value;
    }
}
