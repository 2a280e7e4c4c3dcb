//! Hint manager
//!
//! Loads advisory hint documents, selects the entries whose URL pattern
//! matches the target service, and merges them by ascending priority. The
//! merged payload is embedded verbatim in the info tool and never
//! interpreted by the engine.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

/// Match `*`/`?` wildcard patterns against text, case-insensitively.
/// Patterns without a leading/trailing `*` are anchored at that end.
pub fn pattern_matches(pattern: &str, text: &str) -> bool {
    let pattern = pattern.to_lowercase();
    let text = text.to_lowercase();
    wildcard(pattern.as_bytes(), text.as_bytes())
}

fn wildcard(pattern: &[u8], text: &[u8]) -> bool {
    // Iterative glob match with backtracking over the last '*'.
    let (mut p, mut t) = (0usize, 0usize);
    let (mut star, mut star_t) = (None::<usize>, 0usize);

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == b'?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == b'*' {
            star = Some(p);
            star_t = t;
            p += 1;
        } else if let Some(s) = star {
            p = s + 1;
            star_t += 1;
            t = star_t;
        } else {
            return false;
        }
    }
    while p < pattern.len() && pattern[p] == b'*' {
        p += 1;
    }
    p == pattern.len()
}

/// Loads and merges hint documents.
#[derive(Debug, Default)]
pub struct HintManager {
    /// (pattern, priority, payload) triplets from the hints file.
    hints: Vec<(String, i64, Value)>,
    /// Hint supplied directly on the command line; highest priority.
    cli_hint: Option<Value>,
    pub hints_file: Option<PathBuf>,
}

impl HintManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a hints JSON file: `{version, hints: [{pattern, priority, ...}]}`.
    /// With no explicit path, `hints.json` is searched next to the
    /// executable and in the working directory.
    pub fn load_file(&mut self, path: Option<&Path>) -> bool {
        let candidates: Vec<PathBuf> = match path {
            Some(path) => vec![path.to_path_buf()],
            None => {
                let mut paths = Vec::new();
                if let Ok(exe) = std::env::current_exe() {
                    if let Some(dir) = exe.parent() {
                        paths.push(dir.join("hints.json"));
                    }
                }
                paths.push(PathBuf::from("hints.json"));
                paths
            }
        };

        for candidate in candidates {
            if !candidate.exists() {
                continue;
            }
            let text = match std::fs::read_to_string(&candidate) {
                Ok(text) => text,
                Err(err) => {
                    tracing::warn!("Could not read hints file {:?}: {}", candidate, err);
                    continue;
                }
            };
            match serde_json::from_str::<Value>(&text) {
                Ok(doc) => {
                    self.hints = doc
                        .get("hints")
                        .and_then(Value::as_array)
                        .map(|entries| {
                            entries
                                .iter()
                                .filter_map(|entry| {
                                    let pattern = entry.get("pattern")?.as_str()?.to_string();
                                    let priority = entry
                                        .get("priority")
                                        .and_then(Value::as_i64)
                                        .unwrap_or(0);
                                    Some((pattern, priority, entry.clone()))
                                })
                                .collect()
                        })
                        .unwrap_or_default();
                    tracing::debug!(
                        "Loaded {} hints from {:?}",
                        self.hints.len(),
                        candidate
                    );
                    self.hints_file = Some(candidate);
                    return true;
                }
                Err(err) => {
                    tracing::warn!("Invalid hints file {:?}: {}", candidate, err);
                }
            }
        }
        false
    }

    /// Set the CLI hint: a JSON hint object (defaults: priority 1000,
    /// pattern `*`), or plain text stored as a note.
    pub fn set_cli_hint(&mut self, raw: &str) {
        let value = match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(mut obj)) => {
                obj.entry("priority").or_insert(Value::from(1000));
                obj.entry("pattern").or_insert(Value::from("*"));
                Value::Object(obj)
            }
            _ => serde_json::json!({
                "pattern": "*",
                "priority": 1000,
                "notes": [raw],
            }),
        };
        self.cli_hint = Some(value);
    }

    /// Merge every hint matching the service URL, ascending by priority so
    /// later entries win per key while arrays concatenate.
    pub fn hints_for(&self, service_url: &str) -> Option<Value> {
        let mut matching: Vec<(i64, &Value)> = self
            .hints
            .iter()
            .filter(|(pattern, _, _)| pattern_matches(pattern, service_url))
            .map(|(_, priority, value)| (*priority, value))
            .collect();
        if let Some(cli) = &self.cli_hint {
            let priority = cli.get("priority").and_then(Value::as_i64).unwrap_or(1000);
            matching.push((priority, cli));
        }
        if matching.is_empty() {
            return None;
        }
        matching.sort_by_key(|(priority, _)| *priority);

        let mut merged = Value::Object(Map::new());
        for (_, value) in matching {
            merge_into(&mut merged, value);
        }
        Some(merged)
    }
}

/// Recursive merge: objects merge key-wise, arrays concatenate (unique
/// scalar entries), anything else is replaced by the later value.
fn merge_into(target: &mut Value, source: &Value) {
    match (target, source) {
        (Value::Object(target_map), Value::Object(source_map)) => {
            for (key, source_value) in source_map {
                match target_map.get_mut(key) {
                    Some(existing) => merge_into(existing, source_value),
                    None => {
                        target_map.insert(key.clone(), source_value.clone());
                    }
                }
            }
        }
        (Value::Array(target_items), Value::Array(source_items)) => {
            for item in source_items {
                if !target_items.contains(item) {
                    target_items.push(item.clone());
                }
            }
        }
        (target_slot, source_value) => {
            *target_slot = source_value.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn test_pattern_matching() {
        assert!(pattern_matches("*", "https://anything"));
        assert!(pattern_matches("*northwind*", "https://services.odata.org/V2/Northwind/"));
        assert!(pattern_matches("*.svc", "https://h/My.svc"));
        assert!(!pattern_matches("*.svc", "https://h/My.svc/extra"));
        assert!(pattern_matches("Prod?cts", "Products"));
        assert!(!pattern_matches("Prod?cts", "Produucts"));
        // Anchored when no leading wildcard
        assert!(!pattern_matches("https://a", "xhttps://a"));
    }

    #[test]
    fn test_merge_priority_and_arrays() {
        let mut manager = HintManager::new();
        manager.hints = vec![
            (
                "*".to_string(),
                0,
                json!({"service_type": "generic", "notes": ["base note"]}),
            ),
            (
                "*northwind*".to_string(),
                10,
                json!({"service_type": "demo", "notes": ["nw note"]}),
            ),
            (
                "*other*".to_string(),
                5,
                json!({"service_type": "never"}),
            ),
        ];

        let merged = manager
            .hints_for("https://services.odata.org/V2/Northwind/Northwind.svc")
            .unwrap();
        // Higher priority wins per key.
        assert_eq!(merged["service_type"], "demo");
        // Arrays concatenate in priority order.
        assert_eq!(merged["notes"], json!(["base note", "nw note"]));
    }

    #[test]
    fn test_no_match_returns_none() {
        let mut manager = HintManager::new();
        manager.hints = vec![("*sap*".to_string(), 0, json!({"service_type": "sap"}))];
        assert!(manager.hints_for("https://example.com/odata/").is_none());
    }

    #[test]
    fn test_cli_hint_json_and_text() {
        let mut manager = HintManager::new();
        manager.set_cli_hint(r#"{"known_issues": ["expand breaks"]}"#);
        let merged = manager.hints_for("https://any/").unwrap();
        assert_eq!(merged["known_issues"], json!(["expand breaks"]));
        assert_eq!(merged["priority"], 1000);

        let mut manager = HintManager::new();
        manager.set_cli_hint("just a plain note");
        let merged = manager.hints_for("https://any/").unwrap();
        assert_eq!(merged["notes"], json!(["just a plain note"]));
    }

    #[test]
    fn test_cli_hint_overrides_file_hints() {
        let mut manager = HintManager::new();
        manager.hints = vec![("*".to_string(), 50, json!({"service_type": "file"}))];
        manager.set_cli_hint(r#"{"service_type": "cli"}"#);
        let merged = manager.hints_for("https://any/").unwrap();
        assert_eq!(merged["service_type"], "cli");
    }

    #[test]
    fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"version": "1.0", "hints": [
                {{"pattern": "*", "priority": 1, "notes": ["from file"]}},
                {{"pattern": "*skipme*", "notes": ["other"]}}
            ]}}"#
        )
        .unwrap();

        let mut manager = HintManager::new();
        assert!(manager.load_file(Some(file.path())));
        assert_eq!(manager.hints.len(), 2);
        let merged = manager.hints_for("https://x/").unwrap();
        assert_eq!(merged["notes"], json!(["from file"]));
    }

    #[test]
    fn test_missing_file_is_not_fatal() {
        let mut manager = HintManager::new();
        assert!(!manager.load_file(Some(Path::new("/nonexistent/hints.json"))));
        assert!(manager.hints_for("https://x/").is_none());
    }
}
