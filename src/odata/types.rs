//! OData type system
//!
//! Maps OData primitive names to the abstract shapes used by the schema
//! generator, renders key predicates for entity URLs, and coerces values on
//! the write path (decimal-as-string, legacy date formats).

use chrono::{DateTime, FixedOffset, NaiveDate, SecondsFormat, TimeZone, Utc};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::{Map, Value};

use crate::error::BridgeError;
use crate::odata::guid;
use crate::odata::metadata::{EntityProperty, EntityType};

/// Abstract shape of an OData primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdmType {
    String,
    Guid,
    Binary,
    DateTime,
    DateTimeOffset,
    Time,
    Int,
    Decimal,
    Double,
    Bool,
}

impl EdmType {
    pub fn from_edm(name: &str) -> Self {
        match name {
            "Edm.Guid" => EdmType::Guid,
            "Edm.Binary" => EdmType::Binary,
            "Edm.DateTime" => EdmType::DateTime,
            "Edm.DateTimeOffset" => EdmType::DateTimeOffset,
            "Edm.Time" => EdmType::Time,
            "Edm.Int16" | "Edm.Int32" | "Edm.Int64" | "Edm.Byte" | "Edm.SByte" => EdmType::Int,
            "Edm.Decimal" => EdmType::Decimal,
            "Edm.Double" | "Edm.Single" => EdmType::Double,
            "Edm.Boolean" => EdmType::Bool,
            _ => EdmType::String,
        }
    }

    /// JSON Schema type name for tool input schemas. `Edm.Decimal` is
    /// string-shaped: several SAP gateways reject JSON numbers for it.
    pub fn json_type(&self) -> &'static str {
        match self {
            EdmType::Int => "integer",
            EdmType::Double => "number",
            EdmType::Bool => "boolean",
            _ => "string",
        }
    }

    /// Whether key literals of this type are single-quoted.
    fn quoted_in_key(&self) -> bool {
        matches!(
            self,
            EdmType::String
                | EdmType::Guid
                | EdmType::DateTime
                | EdmType::DateTimeOffset
                | EdmType::Time
        )
    }
}

/// Octets escaped inside key literals: everything outside the unreserved set,
/// except the single quote which is part of the OData key syntax. `/` must
/// become `%2F` or SAP identifiers like `/NS/NAME` break the URL path.
const KEY_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'\'');

/// Octets escaped in query-string values. Spaces encode as `%20`, never `+`.
const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Percent-encode one key component after quote doubling.
pub fn encode_key_component(raw: &str) -> String {
    utf8_percent_encode(raw, KEY_COMPONENT).to_string()
}

/// Percent-encode a query-string value.
pub fn encode_query_value(raw: &str) -> String {
    utf8_percent_encode(raw, QUERY_VALUE).to_string()
}

/// Render the parenthesized key predicate for an entity URL:
/// `('value')` for a single key, `(K1='a',K2=2)` for composite keys.
pub fn format_key_predicate(
    entity: &EntityType,
    args: &Map<String, Value>,
) -> Result<String, BridgeError> {
    let key_props = entity.key_props();
    if key_props.is_empty() {
        return Err(BridgeError::Argument(format!(
            "entity type {} has no key properties",
            entity.name
        )));
    }

    let missing: Vec<&str> = key_props
        .iter()
        .filter(|p| !args.contains_key(&p.name) || args[&p.name].is_null())
        .map(|p| p.name.as_str())
        .collect();
    if !missing.is_empty() {
        return Err(BridgeError::Argument(format!(
            "missing required key parameter(s): {}",
            missing.join(", ")
        )));
    }

    if key_props.len() == 1 {
        let prop = key_props[0];
        let literal = format_key_literal(prop, &args[&prop.name])?;
        Ok(format!("({})", literal))
    } else {
        let mut parts = Vec::with_capacity(key_props.len());
        for prop in key_props {
            let literal = format_key_literal(prop, &args[&prop.name])?;
            parts.push(format!("{}={}", prop.name, literal));
        }
        Ok(format!("({})", parts.join(",")))
    }
}

/// Render one key value as an encoded OData literal.
fn format_key_literal(prop: &EntityProperty, value: &Value) -> Result<String, BridgeError> {
    let edm = EdmType::from_edm(&prop.edm_type);
    match edm {
        EdmType::Bool => match value {
            Value::Bool(b) => Ok(b.to_string()),
            Value::String(s) if s == "true" || s == "false" => Ok(s.clone()),
            other => Err(bad_key(prop, other, "boolean")),
        },
        EdmType::Int => match value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(n.to_string()),
            Value::String(s) if s.parse::<i64>().is_ok() => Ok(s.clone()),
            other => Err(bad_key(prop, other, "integer")),
        },
        EdmType::Decimal | EdmType::Double => match value {
            Value::Number(n) => Ok(n.to_string()),
            Value::String(s) if s.parse::<f64>().is_ok() => Ok(s.clone()),
            other => Err(bad_key(prop, other, "number")),
        },
        EdmType::Binary => {
            let s = value
                .as_str()
                .ok_or_else(|| bad_key(prop, value, "string"))?;
            // A canonical GUID literal goes back to base64, the form the
            // service itself emits for binary key values.
            if let Some(b64) = guid::guid_to_base64(s) {
                Ok(format!("'{}'", encode_key_component(&b64)))
            } else if s.chars().all(|c| c.is_ascii_hexdigit()) && !s.is_empty() {
                Ok(format!("X'{}'", s.to_uppercase()))
            } else {
                Ok(format!(
                    "'{}'",
                    encode_key_component(&s.replace('\'', "''"))
                ))
            }
        }
        _ if edm.quoted_in_key() => {
            let s = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                other => return Err(bad_key(prop, other, "string")),
            };
            Ok(format!(
                "'{}'",
                encode_key_component(&s.replace('\'', "''"))
            ))
        }
        _ => Err(bad_key(prop, value, "scalar")),
    }
}

fn bad_key(prop: &EntityProperty, value: &Value, expected: &str) -> BridgeError {
    BridgeError::Argument(format!(
        "key property '{}' ({}) expects a {} value, got {}",
        prop.name, prop.edm_type, expected, value
    ))
}

/// Parse a key predicate back into (name, value) pairs. Single-key
/// predicates yield a `None` name. Used to verify formatting round-trips.
pub fn parse_key_predicate(predicate: &str) -> Option<Vec<(Option<String>, String)>> {
    let inner = predicate.strip_prefix('(')?.strip_suffix(')')?;
    let mut out = Vec::new();
    // Literal commas inside values are percent-encoded, so a plain split is
    // unambiguous here.
    for part in inner.split(',') {
        let (name, literal) = match part.split_once('=') {
            Some((n, v)) if !n.starts_with('\'') => (Some(n.to_string()), v),
            _ => (None, part),
        };
        let value = if let Some(stripped) = literal
            .strip_prefix('\'')
            .and_then(|s| s.strip_suffix('\''))
        {
            let decoded = percent_decode_str(stripped).decode_utf8().ok()?;
            decoded.replace("''", "'")
        } else {
            literal.to_string()
        };
        out.push((name, value));
    }
    Some(out)
}

/// Coerce payload values before a create/update request. Decimal numbers are
/// serialized as strings (works around a gateway "Failed to read property"
/// defect), ISO dates become `/Date(ms)/` when legacy-dates mode is on, and
/// GUID literals for binary GUID fields go back to base64.
pub fn coerce_write_properties(entity: &EntityType, data: &mut Map<String, Value>, legacy_dates: bool) {
    for (name, value) in data.iter_mut() {
        let Some(prop) = entity.property(name) else {
            continue;
        };
        match EdmType::from_edm(&prop.edm_type) {
            EdmType::Decimal => {
                if let Value::Number(n) = value {
                    *value = Value::String(n.to_string());
                }
            }
            EdmType::DateTime | EdmType::DateTimeOffset => {
                if legacy_dates {
                    if let Value::String(s) = value {
                        if let Some(legacy) = iso_to_legacy_date(s) {
                            *value = Value::String(legacy);
                        }
                    }
                }
            }
            EdmType::Binary if guid::is_guid_shaped(prop) => {
                if let Value::String(s) = value {
                    if let Some(b64) = guid::guid_to_base64(s) {
                        *value = Value::String(b64);
                    }
                }
            }
            _ => {}
        }
    }
}

/// Convert `/Date(ms)/` or `/Date(ms+zzzz)/` to ISO-8601. The optional
/// four-digit suffix is an offset in minutes.
pub fn legacy_date_to_iso(raw: &str) -> Option<String> {
    let body = raw.strip_prefix("/Date(")?.strip_suffix(")/")?;
    if body.is_empty() {
        return None;
    }

    // The millisecond part may itself start with '-' for pre-epoch values.
    let split_at = body[1..]
        .find(['+', '-'])
        .map(|i| i + 1)
        .unwrap_or(body.len());
    let (ms_part, offset_part) = body.split_at(split_at);
    let millis: i64 = ms_part.parse().ok()?;

    if offset_part.is_empty() {
        let dt = DateTime::<Utc>::from_timestamp_millis(millis)?;
        Some(dt.to_rfc3339_opts(SecondsFormat::Millis, true))
    } else {
        let sign: i32 = if offset_part.starts_with('-') { -1 } else { 1 };
        let minutes: i32 = offset_part[1..].parse().ok()?;
        let offset = FixedOffset::east_opt(sign * minutes * 60)?;
        let dt = DateTime::<Utc>::from_timestamp_millis(millis)?.with_timezone(&offset);
        Some(dt.to_rfc3339_opts(SecondsFormat::Millis, false))
    }
}

/// Convert an ISO-8601 timestamp (or a bare date) to `/Date(ms)/`.
pub fn iso_to_legacy_date(raw: &str) -> Option<String> {
    if raw.starts_with("/Date(") {
        return Some(raw.to_string());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(format!("/Date({})/", dt.timestamp_millis()));
    }
    // Bare dates are common for Edm.DateTime; interpret as UTC midnight.
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        let dt = Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?);
        return Some(format!("/Date({})/", dt.timestamp_millis()));
    }
    None
}

/// Whether a string carries the legacy wire date format.
pub fn is_legacy_date(raw: &str) -> bool {
    raw.starts_with("/Date(") && raw.ends_with(")/")
}
