//! Message shapes used by the headset API.
//!
//! A subscribe reply looks like
//! `{"success":[{"streamName":"pow","cols":[...]}],"failure":[...]}` and every
//! data message carries exactly one stream key next to a timestamp, e.g.
//! `{"mot":[...],"sid":"...","time":1559903137.1053}`.

use crate::device::types::{StreamEvent, StreamKind, SubscriptionAck};
use crate::device::DeviceError;
use chrono::Utc;
use serde_json::{Map, Value};

/// Parse a subscribe reply.
pub fn parse_subscription(line: &str) -> Result<SubscriptionAck, DeviceError> {
    serde_json::from_str(line).map_err(|e| DeviceError::Malformed(e.to_string()))
}

/// Parse one data message.
pub fn parse_event(line: &str) -> Result<StreamEvent, DeviceError> {
    let value: Value =
        serde_json::from_str(line).map_err(|e| DeviceError::Malformed(e.to_string()))?;
    let object = value
        .as_object()
        .ok_or_else(|| DeviceError::Malformed("event is not a JSON object".to_string()))?;

    event_from_object(object)
}

fn event_from_object(object: &Map<String, Value>) -> Result<StreamEvent, DeviceError> {
    let (stream, payload) = StreamKind::ALL
        .iter()
        .find_map(|kind| object.get(kind.key()).map(|p| (*kind, p)))
        .ok_or_else(|| DeviceError::Malformed("event carries no known stream key".to_string()))?;

    let values = payload
        .as_array()
        .ok_or_else(|| DeviceError::Malformed(format!("'{stream}' payload is not an array")))?
        .iter()
        .map(coerce_value)
        .collect();

    Ok(StreamEvent {
        stream,
        time: object.get("time").and_then(Value::as_f64),
        values,
        received_at: Utc::now(),
    })
}

/// Numeric view of one payload entry.
///
/// Metric payloads mix numbers with `isActive` booleans and `null` for
/// metrics that are not computed yet; those read as 1/0 and 0.
pub fn coerce_value(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        _ => 0.0,
    }
}

/// Encode an event in the device message shape.
pub fn encode_event(event: &StreamEvent) -> String {
    let mut object = Map::new();
    object.insert(event.stream.key().to_string(), Value::from(event.values.clone()));
    if let Some(time) = event.time {
        object.insert("time".to_string(), Value::from(time));
    }
    Value::Object(object).to_string()
}

/// Encode a subscribe reply.
pub fn encode_subscription(ack: &SubscriptionAck) -> Result<String, DeviceError> {
    serde_json::to_string(ack).map_err(|e| DeviceError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::types::StreamHeader;

    #[test]
    fn test_parse_met_event_with_flags() {
        let event =
            parse_event(r#"{"met":[true,0.55,false,null,0.3],"sid":"s1","time":1559903137.5}"#)
                .unwrap();

        assert_eq!(event.stream, StreamKind::Met);
        assert_eq!(event.time, Some(1559903137.5));
        assert_eq!(event.values, vec![1.0, 0.55, 0.0, 0.0, 0.3]);
    }

    #[test]
    fn test_parse_event_without_time() {
        let event = parse_event(r#"{"pow":[1,2.5]}"#).unwrap();
        assert_eq!(event.stream, StreamKind::Pow);
        assert_eq!(event.time, None);
        assert_eq!(event.values, vec![1.0, 2.5]);
    }

    #[test]
    fn test_parse_event_errors() {
        assert!(matches!(
            parse_event(r#"{"eeg":[1,2]}"#),
            Err(DeviceError::Malformed(_))
        ));
        assert!(matches!(
            parse_event(r#"{"mot":5}"#),
            Err(DeviceError::Malformed(_))
        ));
        assert!(matches!(parse_event("[1,2]"), Err(DeviceError::Malformed(_))));
        assert!(matches!(parse_event("not json"), Err(DeviceError::Malformed(_))));
    }

    #[test]
    fn test_encoded_event_parses_back() {
        let event = StreamEvent::new(StreamKind::Mot, vec![0.5, -1.0]).with_time(12.25);
        let parsed = parse_event(&encode_event(&event)).unwrap();

        assert_eq!(parsed.stream, StreamKind::Mot);
        assert_eq!(parsed.time, Some(12.25));
        assert_eq!(parsed.values, event.values);
    }

    #[test]
    fn test_encoded_subscription_uses_device_field_names() {
        let ack = SubscriptionAck {
            success: vec![StreamHeader::new(StreamKind::Met, vec!["eng".to_string()])],
            failure: vec![],
        };
        let line = encode_subscription(&ack).unwrap();

        assert!(line.contains(r#""streamName":"met""#));
        assert_eq!(parse_subscription(&line).unwrap(), ack);
    }
}
