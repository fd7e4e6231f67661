// Invocation Serializer Port

use crate::domain::Invocation;
use crate::error::{OutboxError, Result};

/// Converts invocations to and from the text stored in the outbox row.
///
/// Implementations must round-trip exactly: `deserialize(serialize(x)) == x`.
pub trait InvocationSerializer: Send + Sync {
    fn serialize(&self, invocation: &Invocation) -> Result<String>;

    fn deserialize(&self, text: &str) -> Result<Invocation>;
}

/// JSON serializer (default)
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonInvocationSerializer;

impl InvocationSerializer for JsonInvocationSerializer {
    fn serialize(&self, invocation: &Invocation) -> Result<String> {
        serde_json::to_string(invocation).map_err(|e| OutboxError::Serialization(e.to_string()))
    }

    fn deserialize(&self, text: &str) -> Result<Invocation> {
        serde_json::from_str(text).map_err(|e| OutboxError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_round_trip() {
        let serializer = JsonInvocationSerializer;
        let invocation = Invocation::new("billing", "charge")
            .with_argument("String", json!("cust-42"))
            .with_argument("Money", json!({"amount": 1999, "currency": "EUR"}))
            .with_argument("Option<String>", json!(null))
            .with_argument("Vec<u8>", json!([0, 255, 7]));

        let text = serializer.serialize(&invocation).unwrap();
        assert_eq!(serializer.deserialize(&text).unwrap(), invocation);
    }

    #[test]
    fn test_wire_format() {
        let text = JsonInvocationSerializer
            .serialize(&Invocation::new("a", "b").with_argument("i64", json!(1)))
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();

        assert_eq!(
            value,
            json!({"target": "a", "method": "b", "parameterTypes": ["i64"], "arguments": [1]})
        );
    }

    #[test]
    fn test_missing_lists_default_to_empty() {
        let invocation = JsonInvocationSerializer
            .deserialize(r#"{"target":"cache","method":"flush"}"#)
            .unwrap();
        assert_eq!(invocation, Invocation::new("cache", "flush"));
    }

    #[test]
    fn test_garbage_is_an_error() {
        let err = JsonInvocationSerializer.deserialize("not json").unwrap_err();
        assert!(matches!(err, OutboxError::Serialization(_)));
    }
}
