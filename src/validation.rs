//! Input validation against JSON schemas

use crate::error::{MetadataError, Result};
use serde_json::Value;

/// Validate input against a JSON schema
///
/// Covers the subset the service schemas use: `required`, property `type`,
/// `enum` and `additionalProperties: false`.
pub fn validate_input(input: &Value, schema: &Value) -> Result<()> {
    let input_obj = input
        .as_object()
        .ok_or_else(|| MetadataError::InvalidInput("Input must be a JSON object".to_string()))?;

    // Get required fields from schema
    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for field_name in required {
            let field_str = field_name.as_str().ok_or_else(|| {
                MetadataError::InvalidInput("Invalid schema: required field not a string".to_string())
            })?;

            if input_obj.get(field_str).is_none() {
                return Err(MetadataError::InvalidInput(format!(
                    "Missing required field: {}",
                    field_str
                )));
            }
        }
    }

    let properties = schema.get("properties").and_then(|p| p.as_object());
    let closed = schema.get("additionalProperties") == Some(&Value::Bool(false));

    for (key, value) in input_obj {
        match properties.and_then(|p| p.get(key)) {
            Some(prop_schema) => {
                validate_type(key, value, prop_schema)?;
                validate_enum(key, value, prop_schema)?;
            }
            None if closed => {
                return Err(MetadataError::InvalidInput(format!("Unknown field: {}", key)));
            }
            None => {}
        }
    }

    Ok(())
}

/// Validate that a value matches the expected type
fn validate_type(key: &str, value: &Value, schema: &Value) -> Result<()> {
    if let Some(expected_type) = schema.get("type").and_then(|t| t.as_str()) {
        let valid = match expected_type {
            "string" => value.is_string(),
            "integer" => value.is_i64() || value.is_u64(),
            "number" => value.is_number(),
            "boolean" => value.is_boolean(),
            "array" => value.is_array(),
            "object" => value.is_object(),
            "null" => value.is_null(),
            _ => true, // Unknown types pass validation
        };

        if !valid {
            return Err(MetadataError::InvalidInput(format!(
                "Type mismatch for '{}': expected {}, got {}",
                key, expected_type, value
            )));
        }
    }

    Ok(())
}

fn validate_enum(key: &str, value: &Value, schema: &Value) -> Result<()> {
    if let Some(allowed) = schema.get("enum").and_then(|e| e.as_array()) {
        if !allowed.contains(value) {
            return Err(MetadataError::InvalidInput(format!(
                "Invalid value for '{}': {} (expected one of {})",
                key,
                value,
                Value::Array(allowed.clone())
            )));
        }
    }
    Ok(())
}
