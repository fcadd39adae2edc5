//! Minimal, tolerant view over an inbound ActivityStreams document.
//!
//! Only `id`, `type` and `actor` are required to route an activity; everything
//! else stays an untyped [`Value`] that handlers pick apart with the fallible
//! accessors below.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("payload is not a JSON object")]
    NotAnObject,
    #[error("activity is missing string field `{0}`")]
    MissingField(&'static str),
}

#[derive(Debug, Error, PartialEq)]
pub enum FieldError {
    #[error("field `{0}` is missing")]
    Missing(&'static str),
    #[error("field `{0}` has the wrong type")]
    WrongType(&'static str),
    #[error("field `{field}` is not an RFC 3339 timestamp: {value}")]
    BadTimestamp { field: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActivityView {
    pub id: String,
    pub kind: String,
    pub actor: String,
    /// Nested object, `Value::Null` when absent.
    pub object: Value,
}

pub fn decode(raw: &[u8]) -> Result<ActivityView, DecodeError> {
    let value: Value = serde_json::from_slice(raw)?;
    let Value::Object(mut map) = value else {
        return Err(DecodeError::NotAnObject);
    };

    let id = take_string(&map, "id")?;
    let kind = take_string(&map, "type")?;
    let actor = match map.get("actor") {
        Some(Value::String(actor)) => actor.clone(),
        // Some servers embed the actor document instead of referencing it.
        Some(Value::Object(embedded)) => match embedded.get("id") {
            Some(Value::String(actor)) => actor.clone(),
            _ => return Err(DecodeError::MissingField("actor")),
        },
        _ => return Err(DecodeError::MissingField("actor")),
    };
    let object = map.remove("object").unwrap_or(Value::Null);

    Ok(ActivityView {
        id,
        kind,
        actor,
        object,
    })
}

fn take_string(map: &Map<String, Value>, field: &'static str) -> Result<String, DecodeError> {
    match map.get(field) {
        Some(Value::String(value)) => Ok(value.clone()),
        _ => Err(DecodeError::MissingField(field)),
    }
}

/// Type tag of a nested object, if it has one.
pub fn object_type(object: &Value) -> Option<&str> {
    object.get("type").and_then(Value::as_str)
}

pub fn bool_or_default(object: &Value, field: &str) -> bool {
    object.get(field).and_then(Value::as_bool).unwrap_or(false)
}

pub fn str_or_default<'a>(object: &'a Value, field: &str) -> &'a str {
    object.get(field).and_then(Value::as_str).unwrap_or("")
}

pub fn optional_str<'a>(object: &'a Value, field: &str) -> Option<&'a str> {
    object.get(field).and_then(Value::as_str)
}

pub fn required_str<'a>(object: &'a Value, field: &'static str) -> Result<&'a str, FieldError> {
    match object.get(field) {
        None | Some(Value::Null) => Err(FieldError::Missing(field)),
        Some(Value::String(value)) => Ok(value.as_str()),
        Some(_) => Err(FieldError::WrongType(field)),
    }
}

pub fn required_time(object: &Value, field: &'static str) -> Result<DateTime<Utc>, FieldError> {
    let raw = required_str(object, field)?;
    DateTime::parse_from_rfc3339(raw)
        .map(|time| time.with_timezone(&Utc))
        .map_err(|_| FieldError::BadTimestamp {
            field,
            value: raw.to_string(),
        })
}
