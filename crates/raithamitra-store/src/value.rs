//! Conversion between JSON document fields and Firestore typed values.
//!
//! Firestore's REST API wraps every value in a single-key object naming its
//! type (`{"stringValue": "..."}`, `{"integerValue": "42"}`, ...). Timestamps,
//! references and bytes decode to strings; geo points decode to
//! `{"latitude", "longitude"}` objects.

use serde_json::{Map, Number, Value, json};

use crate::{Fields, StoreError};

/// Encode a JSON value as a Firestore value.
pub fn encode(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) => match n.as_i64() {
            // Firestore transmits 64-bit integers as strings
            Some(i) => json!({ "integerValue": i.to_string() }),
            None => json!({ "doubleValue": n.as_f64().unwrap_or_default() }),
        },
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(items) => json!({
            "arrayValue": { "values": items.iter().map(encode).collect::<Vec<_>>() }
        }),
        Value::Object(map) => json!({ "mapValue": { "fields": encode_fields(map) } }),
    }
}

/// Encode document fields as a Firestore `fields` map.
pub fn encode_fields(fields: &Fields) -> Value {
    Value::Object(
        fields
            .iter()
            .map(|(key, value)| (key.clone(), encode(value)))
            .collect(),
    )
}

/// Decode a Firestore value into JSON.
pub fn decode(value: &Value) -> Result<Value, StoreError> {
    let map = value
        .as_object()
        .ok_or_else(|| invalid(format!("expected typed value object, got {}", value)))?;
    let (kind, inner) = map
        .iter()
        .next()
        .ok_or_else(|| invalid("empty typed value".to_string()))?;

    match kind.as_str() {
        "nullValue" => Ok(Value::Null),
        "booleanValue" => Ok(Value::Bool(inner.as_bool().unwrap_or_default())),
        "integerValue" => {
            let parsed = match inner {
                Value::String(s) => s.parse::<i64>().ok(),
                Value::Number(n) => n.as_i64(),
                _ => None,
            };
            parsed
                .map(|i| Value::Number(i.into()))
                .ok_or_else(|| invalid(format!("bad integerValue: {}", inner)))
        }
        "doubleValue" => inner
            .as_f64()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| invalid(format!("bad doubleValue: {}", inner))),
        "stringValue" | "timestampValue" | "referenceValue" | "bytesValue" => Ok(inner.clone()),
        "geoPointValue" => Ok(json!({
            "latitude": inner.get("latitude").cloned().unwrap_or(json!(0.0)),
            "longitude": inner.get("longitude").cloned().unwrap_or(json!(0.0)),
        })),
        "arrayValue" => {
            let items = match inner.get("values").and_then(Value::as_array) {
                Some(values) => values.iter().map(decode).collect::<Result<Vec<_>, _>>()?,
                None => Vec::new(),
            };
            Ok(Value::Array(items))
        }
        "mapValue" => {
            let fields = match inner.get("fields") {
                Some(fields) => decode_fields(fields)?,
                None => Map::new(),
            };
            Ok(Value::Object(fields))
        }
        other => Err(invalid(format!("unknown value type: {}", other))),
    }
}

/// Decode a Firestore `fields` map into document fields.
pub fn decode_fields(fields: &Value) -> Result<Fields, StoreError> {
    let map = fields
        .as_object()
        .ok_or_else(|| invalid("fields must be an object".to_string()))?;

    map.iter()
        .map(|(key, value)| Ok::<_, StoreError>((key.clone(), decode(value)?)))
        .collect()
}

/// Quote a top-level field name for use in a field path.
///
/// Simple names pass through; anything else is wrapped in backticks.
pub fn field_path(name: &str) -> String {
    let simple = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');

    if simple {
        name.to_string()
    } else {
        format!("`{}`", name.replace('\\', "\\\\").replace('`', "\\`"))
    }
}

fn invalid(message: String) -> StoreError {
    StoreError::InvalidResponse(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_encode_integer_as_string() {
        assert_eq!(encode(&json!(42)), json!({"integerValue": "42"}));
    }

    #[test]
    fn test_encode_nested() {
        let encoded = encode(&json!({"tags": ["organic"], "price": 12.5}));
        assert_eq!(
            encoded,
            json!({"mapValue": {"fields": {
                "tags": {"arrayValue": {"values": [{"stringValue": "organic"}]}},
                "price": {"doubleValue": 12.5}
            }}})
        );
    }

    #[test]
    fn test_decode_document_fields() {
        let fields = decode_fields(&json!({
            "phone": {"stringValue": "9876543210"},
            "quantity": {"integerValue": "12"},
            "createdAt": {"timestampValue": "2026-01-29T00:00:00Z"},
            "isNewUser": {"booleanValue": true},
            "location": {"geoPointValue": {"latitude": 12.9, "longitude": 77.6}},
            "empty": {"arrayValue": {}},
            "missing": {"nullValue": null}
        }))
        .unwrap();

        assert_eq!(fields["phone"], json!("9876543210"));
        assert_eq!(fields["quantity"], json!(12));
        assert_eq!(fields["createdAt"], json!("2026-01-29T00:00:00Z"));
        assert_eq!(fields["isNewUser"], json!(true));
        assert_eq!(fields["location"], json!({"latitude": 12.9, "longitude": 77.6}));
        assert_eq!(fields["empty"], json!([]));
        assert_eq!(fields["missing"], Value::Null);
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        assert!(decode(&json!({"mysteryValue": 1})).is_err());
    }

    #[test]
    fn test_field_path_quoting() {
        assert_eq!(field_path("farmerId"), "farmerId");
        assert_eq!(field_path("_private"), "_private");
        assert_eq!(field_path("delivery-date"), "`delivery-date`");
        assert_eq!(field_path("2fa"), "`2fa`");
    }
}
