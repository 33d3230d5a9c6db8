use crate::error::StrategyError;
use serde_json::Value;

/// Validate a parameter map against a declared schema.
///
/// Checks the `required` list, primitive `type` tags (string / number / integer /
/// boolean) and `enum` membership for every property present. Runs before a
/// strategy config is persisted and again before every task start.
pub fn validate(schema: &Value, params: &Value) -> Result<(), StrategyError> {
    let Some(params_map) = params.as_object() else {
        return Err(StrategyError::InvalidConfig(
            "parameters must be an object".into(),
        ));
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for field in required.iter().filter_map(Value::as_str) {
            if !params_map.contains_key(field) || params_map[field].is_null() {
                return Err(StrategyError::field(field));
            }
        }
    }

    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Ok(());
    };

    for (field, value) in params_map {
        let Some(property) = properties.get(field) else {
            continue;
        };

        if let Some(type_tag) = property.get("type").and_then(Value::as_str) {
            let type_ok = match type_tag {
                "string" => value.is_string(),
                "number" => value.is_number(),
                "integer" => value.is_i64() || value.is_u64(),
                "boolean" => value.is_boolean(),
                "object" => value.is_object(),
                "array" => value.is_array(),
                _ => true,
            };
            if !type_ok {
                return Err(StrategyError::field(field.as_str()));
            }
        }

        if let Some(allowed) = property.get("enum").and_then(Value::as_array)
            && !allowed.contains(value)
        {
            return Err(StrategyError::field(field.as_str()));
        }
    }

    Ok(())
}
