//! Response normalizer
//!
//! Rewrites successful OData payloads before they reach the client: envelope
//! unwrap, `__metadata` stripping, GUID and legacy-date conversion, item and
//! byte budgets, and pagination hints. Implemented as a pure value-to-value
//! transform so each pass is testable in isolation.

use serde_json::{json, Map, Value};

use crate::odata::client::QueryOptions;
use crate::odata::guid;
use crate::odata::types;

/// Knobs controlled by CLI flags.
#[derive(Debug, Clone)]
pub struct NormalizeOptions {
    /// Convert `/Date(ms)/` strings to ISO-8601.
    pub legacy_dates: bool,
    /// Keep `__metadata` blocks instead of dropping them.
    pub response_metadata: bool,
    /// Attach a `suggested_next_call` advisory when more items exist.
    pub pagination_hints: bool,
    pub max_items: usize,
    pub max_response_size: usize,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            legacy_dates: true,
            response_metadata: false,
            pagination_hints: false,
            max_items: 100,
            max_response_size: 5 * 1024 * 1024,
        }
    }
}

/// Normalize a successful non-count OData response body.
pub fn normalize_response(
    data: Value,
    guid_fields: &[String],
    opts: &NormalizeOptions,
    query: Option<&QueryOptions>,
) -> Value {
    // Outer {"d": ...} envelope
    let data = match data {
        Value::Object(mut map) if map.contains_key("d") => {
            map.remove("d").unwrap_or(Value::Null)
        }
        other => other,
    };

    let normalized = match data {
        Value::Object(map) if map.contains_key("results") => {
            normalize_list(map, guid_fields, opts, query)
        }
        other => walk(other, guid_fields, opts),
    };

    enforce_byte_budget(normalized, opts)
}

fn normalize_list(
    mut map: Map<String, Value>,
    guid_fields: &[String],
    opts: &NormalizeOptions,
    query: Option<&QueryOptions>,
) -> Value {
    let raw_results = match map.remove("results") {
        Some(Value::Array(items)) => items,
        Some(other) => vec![other],
        None => Vec::new(),
    };

    let total_count = map
        .remove("__count")
        .and_then(|v| match v {
            Value::String(s) => s.parse::<u64>().ok(),
            Value::Number(n) => n.as_u64(),
            _ => None,
        });
    let next_link = map.remove("__next").and_then(|v| match v {
        Value::String(s) => Some(s),
        _ => None,
    });

    let full_len = raw_results.len();
    let truncated = full_len > opts.max_items;
    let results: Vec<Value> = raw_results
        .into_iter()
        .take(opts.max_items)
        .map(|item| walk(item, guid_fields, opts))
        .collect();
    let returned = results.len();

    let mut out = Map::new();
    out.insert("results".to_string(), Value::Array(results));
    if let Some(count) = total_count {
        out.insert("total_count".to_string(), json!(count));
    }
    if let Some(link) = &next_link {
        out.insert("next_link".to_string(), json!(link));
    }
    if truncated {
        out.insert("truncated".to_string(), Value::Bool(true));
    }

    let skip = query.and_then(|q| q.skip).unwrap_or(0);
    let has_more = truncated
        || next_link.is_some()
        || total_count.is_some_and(|count| count > skip + returned as u64);

    if opts.pagination_hints && has_more {
        out.insert(
            "pagination".to_string(),
            pagination_block(skip, returned, total_count, next_link.as_deref(), query),
        );
    }

    Value::Object(out)
}

/// Advisory block describing how to fetch the next page with the same tool.
fn pagination_block(
    skip: u64,
    returned: usize,
    total_count: Option<u64>,
    next_link: Option<&str>,
    query: Option<&QueryOptions>,
) -> Value {
    let mut block = Map::new();
    block.insert("has_more".to_string(), Value::Bool(true));
    if let Some(count) = total_count {
        block.insert("total_count".to_string(), json!(count));
    }

    let mut next_call = Map::new();
    if let Some(q) = query {
        if let Some(filter) = &q.filter {
            next_call.insert("filter".to_string(), json!(filter));
        }
        if let Some(select) = &q.select {
            next_call.insert("select".to_string(), json!(select));
        }
        if let Some(expand) = &q.expand {
            next_call.insert("expand".to_string(), json!(expand));
        }
        if let Some(orderby) = &q.orderby {
            next_call.insert("orderby".to_string(), json!(orderby));
        }
        if let Some(top) = q.top {
            next_call.insert("top".to_string(), json!(top));
        }
    }

    // A server-supplied continuation token wins over computed skip.
    if let Some(token) = next_link.and_then(|link| query_param(link, "$skiptoken")) {
        block.insert("next_skiptoken".to_string(), json!(token));
        next_call.insert("skiptoken".to_string(), json!(token));
    } else {
        let next_skip = next_link
            .and_then(|link| query_param(link, "$skip"))
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(skip + returned as u64);
        block.insert("next_skip".to_string(), json!(next_skip));
        next_call.insert("skip".to_string(), json!(next_skip));
    }

    block.insert("suggested_next_call".to_string(), Value::Object(next_call));
    Value::Object(block)
}

fn query_param(url: &str, key: &str) -> Option<String> {
    let query = url.split_once('?')?.1;
    for pair in query.split('&') {
        if let Some((k, v)) = pair.split_once('=') {
            if k == key {
                return Some(v.to_string());
            }
        }
    }
    None
}

/// Recursive value rewrite: metadata stripping, GUID and date conversion.
fn walk(value: Value, guid_fields: &[String], opts: &NormalizeOptions) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, val) in map {
                if key == "__metadata" && !opts.response_metadata {
                    continue;
                }
                let rewritten = match val {
                    Value::String(s) => Value::String(rewrite_string(&key, s, guid_fields, opts)),
                    other => walk(other, guid_fields, opts),
                };
                out.insert(key, rewritten);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| walk(item, guid_fields, opts))
                .collect(),
        ),
        other => other,
    }
}

fn rewrite_string(key: &str, value: String, guid_fields: &[String], opts: &NormalizeOptions) -> String {
    if guid_fields.iter().any(|f| f == key) {
        if let Some(guid) = guid::base64_to_guid(&value) {
            return guid;
        }
    }
    if opts.legacy_dates && types::is_legacy_date(&value) {
        if let Some(iso) = types::legacy_date_to_iso(&value) {
            return iso;
        }
    }
    value
}

/// Replace oversized payloads with an abbreviated summary. Never returns a
/// partial-object prefix.
fn enforce_byte_budget(value: Value, opts: &NormalizeOptions) -> Value {
    let serialized = match serde_json::to_string(&value) {
        Ok(s) => s,
        Err(_) => return value,
    };
    if serialized.len() <= opts.max_response_size {
        return value;
    }

    let item_count = value
        .get("results")
        .and_then(Value::as_array)
        .map(|items| items.len());
    json!({
        "truncated": true,
        "item_count": item_count,
        "original_size_bytes": serialized.len(),
        "message": format!(
            "Response of {} bytes exceeds the {}-byte limit; narrow the query with select, filter, or top.",
            serialized.len(),
            opts.max_response_size
        ),
    })
}
