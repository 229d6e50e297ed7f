//! Substitution of `${type.name.field}` references from persisted state.

use serde_json::{Map, Value};

use crate::config::Reference;
use crate::error::{ConfigError, Result};
use crate::state::StackState;

/// Looks up the value a reference points at in `state`.
///
/// `id` yields the backend identifier; any other field is read from the
/// recorded field map.
///
/// # Errors
///
/// Returns `UnresolvedReference` if the resource is not in state or the
/// field is missing or empty.
pub fn lookup(reference: &Reference, state: &StackState) -> Result<Value> {
    let unresolved = |reason: &str| ConfigError::UnresolvedReference {
        reference: reference.to_string(),
        reason: reason.to_string(),
    };

    let record = state
        .get(&reference.address())
        .ok_or_else(|| unresolved("resource not created yet"))?;

    let value = if reference.field == "id" {
        Value::String(record.id.clone())
    } else {
        record
            .fields
            .get(&reference.field)
            .cloned()
            .unwrap_or(Value::Null)
    };

    match &value {
        Value::Null => Err(unresolved("field has no value").into()),
        Value::String(s) if s.is_empty() => Err(unresolved("field is empty").into()),
        _ => Ok(value),
    }
}

/// Replaces every reference in `value` with its current value.
///
/// # Errors
///
/// Returns the first reference that cannot be resolved.
pub fn resolve_value(value: &Value, state: &StackState) -> Result<Value> {
    Ok(match value {
        Value::String(text) => match Reference::parse(text) {
            Some(reference) => lookup(&reference, state)?,
            None => value.clone(),
        },
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| resolve_value(item, state))
                .collect::<Result<_>>()?,
        ),
        Value::Object(map) => Value::Object(resolve_fields(map, state)?),
        _ => value.clone(),
    })
}

/// Resolves every reference in a declared field map.
///
/// # Errors
///
/// Returns the first reference that cannot be resolved.
pub fn resolve_fields(fields: &Map<String, Value>, state: &StackState) -> Result<Map<String, Value>> {
    fields
        .iter()
        .map(|(key, value)| Ok((key.clone(), resolve_value(value, state)?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StackformError;
    use crate::resources::ResourceState;
    use serde_json::json;

    fn state_with_ip() -> StackState {
        let mut state = StackState::new();
        state.record(
            "ip_address",
            "front",
            &ResourceState {
                id: String::from("ip-1"),
                fields: json!({"ip_address": "203.0.113.7", "network_id": ""}),
            },
        );
        state
    }

    #[test]
    fn test_resolves_id_and_fields_inside_lists() {
        let state = state_with_ip();
        let fields = json!({
            "ip_address_id": "${ip_address.front.id}",
            "cidr_list": ["${ip_address.front.ip_address}", "10.0.0.0/8"],
            "protocol": "tcp"
        });

        let resolved = resolve_fields(fields.as_object().unwrap(), &state).unwrap();
        assert_eq!(resolved["ip_address_id"], json!("ip-1"));
        assert_eq!(resolved["cidr_list"], json!(["203.0.113.7", "10.0.0.0/8"]));
        assert_eq!(resolved["protocol"], json!("tcp"));
    }

    #[test]
    fn test_missing_resource_or_empty_field_is_unresolved() {
        let state = state_with_ip();

        for text in ["${ip_address.back.id}", "${ip_address.front.network_id}", "${ip_address.front.nope}"] {
            let result = resolve_value(&json!(text), &state);
            assert!(
                matches!(
                    result,
                    Err(StackformError::Config(ConfigError::UnresolvedReference { .. }))
                ),
                "{text}"
            );
        }
    }
}
