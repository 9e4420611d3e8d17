//! JSON text framing for relay envelopes.
//!
//! Wire format: one UTF-8 JSON object per WebSocket text frame. Long-poll
//! bodies may carry either a single object or an array of objects.

use crate::error::{RelayError, RelayResult};
use crate::messages::Envelope;
use serde_json::Value;

/// Encode an envelope into a JSON text frame.
pub fn encode_envelope(envelope: &Envelope) -> RelayResult<String> {
    Ok(serde_json::to_string(envelope)?)
}

/// Decode a single JSON text frame into an envelope.
pub fn decode_frame(text: &str) -> RelayResult<Envelope> {
    let envelope: Envelope = serde_json::from_str(text)?;
    if envelope.event.is_empty() {
        return Err(RelayError::InvalidMessage("empty event name".into()));
    }
    Ok(envelope)
}

/// Decode a body holding one envelope or an array of envelopes.
///
/// Order is preserved. An empty array yields no envelopes.
pub fn decode_batch(text: &str) -> RelayResult<Vec<Envelope>> {
    let value: Value = serde_json::from_str(text)?;
    let items = match value {
        Value::Array(items) => items,
        single @ Value::Object(_) => vec![single],
        other => {
            return Err(RelayError::InvalidMessage(format!(
                "expected envelope object or array, got {}",
                json_kind(&other)
            )));
        }
    };

    let mut envelopes = Vec::with_capacity(items.len());
    for item in items {
        let envelope: Envelope = serde_json::from_value(item)?;
        if envelope.event.is_empty() {
            return Err(RelayError::InvalidMessage("empty event name".into()));
        }
        envelopes.push(envelope);
    }
    Ok(envelopes)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::events;
    use serde_json::json;

    #[test]
    fn decode_keeps_payload_verbatim() {
        let env = decode_frame(
            r#"{"event":"ice-candidate","data":{"candidate":"candidate:1 1 udp 2122260223 10.0.0.2 54321 typ host","sdpMid":"0","sdpMLineIndex":0}}"#,
        )
        .unwrap();
        assert_eq!(env.event, events::ICE_CANDIDATE);
        assert_eq!(env.data["sdpMLineIndex"], json!(0));
        assert_eq!(env.data["sdpMid"], json!("0"));
    }

    #[test]
    fn explicit_null_data_reencodes_without_field() {
        let env = decode_frame(r#"{"event":"exercise-feedback","data":null}"#).unwrap();
        assert!(env.data.is_null());
        assert_eq!(encode_envelope(&env).unwrap(), r#"{"event":"exercise-feedback"}"#);
    }

    #[test]
    fn missing_data_is_null() {
        let env = decode_frame(r#"{"event":"ping"}"#).unwrap();
        assert_eq!(env.event, events::PING);
        assert!(env.data.is_null());
    }

    #[test]
    fn malformed_payload_still_decodes() {
        // Payload shape is the endpoints' business.
        let env = decode_frame(r#"{"event":"webrtc-offer","data":"not an sdp"}"#).unwrap();
        assert_eq!(env.data, json!("not an sdp"));
    }

    #[test]
    fn rejects_non_envelopes() {
        assert!(decode_frame("not json").is_err());
        assert!(decode_frame(r#"{"data":{}}"#).is_err());
        assert!(decode_frame(r#"{"event":""}"#).is_err());
    }

    #[test]
    fn batch_accepts_single_or_array() {
        let one = decode_batch(r#"{"event":"ping"}"#).unwrap();
        assert_eq!(one.len(), 1);

        let many = decode_batch(
            r#"[{"event":"connect-python"},{"event":"exercise-feedback","data":{"repCount":5}}]"#,
        )
        .unwrap();
        assert_eq!(many.len(), 2);
        assert_eq!(many[0].event, events::CONNECT_PYTHON);
        assert_eq!(many[1].data["repCount"], json!(5));

        assert!(decode_batch("[]").unwrap().is_empty());
        assert!(decode_batch("42").is_err());
        assert!(decode_batch(r#"[{"event":"ping"},{"nope":1}]"#).is_err());
    }

    #[test]
    fn encode_is_compact_json() {
        let text = encode_envelope(&Envelope::new(events::EXERCISE_CHANGE, json!({"exerciseType":"squat"}))).unwrap();
        assert_eq!(text, r#"{"event":"exercise-change","data":{"exerciseType":"squat"}}"#);
    }
}
