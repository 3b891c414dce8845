//! Input-schema validation for tool arguments.
//!
//! Tools describe their arguments with a small JSON-Schema subset (`object`
//! with typed properties, `required`, numeric `minimum`/`maximum`, string
//! `enum`). Validation happens at the protocol boundary so handlers only
//! ever see arguments of the declared shape.

use serde_json::{Map, Value};

use crate::error::McpError;

/// Validate `arguments` against `schema`.
///
/// The schema subset understood here covers everything the device adapters
/// declare; unknown schema keywords are ignored rather than rejected.
pub fn validate_arguments(arguments: &Map<String, Value>, schema: &Value) -> Result<(), McpError> {
    let Some(schema) = schema.as_object() else {
        return Ok(()); // no constraints
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for key in required.iter().filter_map(Value::as_str) {
            if !arguments.contains_key(key) {
                return Err(McpError::InvalidArguments(format!(
                    "missing required property `{key}`"
                )));
            }
        }
    }

    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Ok(());
    };

    for (key, value) in arguments {
        let Some(property) = properties.get(key).and_then(Value::as_object) else {
            continue; // extra arguments are tolerated
        };
        check_property(key, value, property)?;
    }

    Ok(())
}

fn check_property(
    key: &str,
    value: &Value,
    property: &Map<String, Value>,
) -> Result<(), McpError> {
    if let Some(expected) = property.get("type").and_then(Value::as_str) {
        let matches = match expected {
            "integer" => value.as_i64().is_some() || value.as_u64().is_some(),
            "number" => value.is_number(),
            "string" => value.is_string(),
            "boolean" => value.is_boolean(),
            "object" => value.is_object(),
            "array" => value.is_array(),
            _ => true,
        };
        if !matches {
            return Err(McpError::InvalidArguments(format!(
                "property `{key}` must be of type {expected}"
            )));
        }
    }

    if let Some(minimum) = property.get("minimum").and_then(Value::as_f64) {
        if let Some(number) = value.as_f64() {
            if number < minimum {
                return Err(McpError::InvalidArguments(format!(
                    "property `{key}` must be >= {minimum}"
                )));
            }
        }
    }

    if let Some(maximum) = property.get("maximum").and_then(Value::as_f64) {
        if let Some(number) = value.as_f64() {
            if number > maximum {
                return Err(McpError::InvalidArguments(format!(
                    "property `{key}` must be <= {maximum}"
                )));
            }
        }
    }

    if let Some(allowed) = property.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            return Err(McpError::InvalidArguments(format!(
                "property `{key}` must be one of {allowed:?}"
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    fn brightness_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "brightness": { "type": "integer", "minimum": 0, "maximum": 100 }
            },
            "required": ["brightness"]
        })
    }

    #[test]
    fn accepts_in_range_integer() {
        assert!(validate_arguments(&args(json!({"brightness": 75})), &brightness_schema()).is_ok());
    }

    #[test]
    fn rejects_missing_required() {
        let err =
            validate_arguments(&args(json!({})), &brightness_schema()).unwrap_err();
        assert!(matches!(err, McpError::InvalidArguments(m) if m.contains("brightness")));
    }

    #[test]
    fn rejects_out_of_range() {
        assert!(validate_arguments(&args(json!({"brightness": 101})), &brightness_schema()).is_err());
        assert!(validate_arguments(&args(json!({"brightness": -1})), &brightness_schema()).is_err());
    }

    #[test]
    fn rejects_wrong_type() {
        let err = validate_arguments(&args(json!({"brightness": "high"})), &brightness_schema())
            .unwrap_err();
        assert!(matches!(err, McpError::InvalidArguments(m) if m.contains("integer")));
    }

    #[test]
    fn enum_constraint_is_enforced() {
        let schema = json!({
            "type": "object",
            "properties": { "mode": { "type": "string", "enum": ["on", "off"] } }
        });
        assert!(validate_arguments(&args(json!({"mode": "on"})), &schema).is_ok());
        assert!(validate_arguments(&args(json!({"mode": "dim"})), &schema).is_err());
    }

    #[test]
    fn extra_arguments_are_tolerated() {
        assert!(
            validate_arguments(
                &args(json!({"brightness": 10, "color": "red"})),
                &brightness_schema()
            )
            .is_ok()
        );
    }
}
