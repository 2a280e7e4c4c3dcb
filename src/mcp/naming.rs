//! Tool naming
//!
//! Derives the service identifier from the service URL, composes final tool
//! names with a prefix or postfix, and implements the deterministic name
//! shortener behind `--tool-shrink`.

/// Names longer than this get shortened when shrinking is enabled.
const SHRINK_TARGET: usize = 40;

/// MCP clients commonly reject tool names beyond this length.
const MAX_TOOL_NAME: usize = 64;

/// Fixed abbreviations for common business vocabulary.
const SYNONYMS: [(&str, &str); 18] = [
    ("SCREENING", "Scrn"),
    ("ADDRESS", "Addr"),
    ("INVESTIGATION", "Inv"),
    ("BUSINESS", "Biz"),
    ("CUSTOMER", "Cust"),
    ("PRODUCT", "Prod"),
    ("SERVICE", "Svc"),
    ("MANAGEMENT", "Mgmt"),
    ("INFORMATION", "Info"),
    ("CONFIGURATION", "Conf"),
    ("ADMINISTRATION", "Admin"),
    ("TRANSACTION", "Txn"),
    ("DOCUMENT", "Doc"),
    ("ORGANIZATION", "Org"),
    ("DISTRIBUTION", "Dist"),
    ("MANUFACTURING", "Mfg"),
    ("MATERIAL", "Matl"),
    ("WAREHOUSE", "Wh"),
];

/// Words that carry no entity meaning and are dropped first.
const GENERIC_WORDS: [&str; 14] = [
    "Type", "Info", "Data", "Set", "Collection", "Entity", "Object", "Item", "Record", "Entry",
    "View", "Model", "List", "Service",
];

/// Operation-verb abbreviations.
const VERB_MAP: [(&str, &str); 7] = [
    ("create", "crt"),
    ("update", "upd"),
    ("delete", "del"),
    ("search", "srch"),
    ("filter", "fltr"),
    ("count", "cnt"),
    ("get", "get"),
];

/// Derive a short stable identifier from the service URL, in priority
/// order: SAP gateway path, `.svc` endpoint, `/odata/<Name>` path, host.
pub fn service_identifier(service_url: &str) -> String {
    let without_scheme = service_url
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(service_url);
    let (host, path) = match without_scheme.split_once('/') {
        Some((host, path)) => (host, path),
        None => (without_scheme, ""),
    };
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    // /sap/opu/odata/[sap/]<ID>/
    if let Some(pos) = segments
        .windows(3)
        .position(|w| w[0].eq_ignore_ascii_case("sap")
            && w[1].eq_ignore_ascii_case("opu")
            && w[2].eq_ignore_ascii_case("odata"))
    {
        let mut idx = pos + 3;
        if segments
            .get(idx)
            .is_some_and(|s| s.eq_ignore_ascii_case("sap"))
        {
            idx += 1;
        }
        if let Some(id) = segments.get(idx) {
            return (*id).to_string();
        }
    }

    // Path ending in <Name>.svc
    for segment in segments.iter().rev() {
        if let Some(name) = segment
            .strip_suffix(".svc")
            .or_else(|| segment.strip_suffix(".SVC"))
        {
            if !name.is_empty() {
                return format!("{}_svc", name);
            }
        }
    }

    // /odata/<Name>/
    if let Some(pos) = segments
        .iter()
        .position(|s| s.eq_ignore_ascii_case("odata"))
    {
        if let Some(name) = segments.get(pos + 1) {
            return (*name).to_string();
        }
    }

    // Host with dots flattened; port dropped.
    let host = host.split(':').next().unwrap_or(host);
    host.replace('.', "_")
}

/// Composes final tool names.
#[derive(Debug, Clone)]
pub struct ToolNamer {
    prefix: String,
    postfix: String,
    shrink: bool,
}

impl ToolNamer {
    /// Postfix placement is the default (`_for_<id>`); `use_postfix: false`
    /// switches to a `<id>_` prefix. Custom overrides replace the derived
    /// identifier entirely.
    pub fn new(
        service_url: &str,
        custom_prefix: Option<&str>,
        custom_postfix: Option<&str>,
        use_postfix: bool,
        shrink: bool,
    ) -> Self {
        let service_id = service_identifier(service_url);
        if use_postfix {
            let postfix = match custom_postfix {
                Some(postfix) => postfix.to_string(),
                None if shrink => format!("_{}", shrink_service_id(&service_id)),
                None => format!("_for_{}", service_id),
            };
            Self {
                prefix: String::new(),
                postfix,
                shrink,
            }
        } else {
            let prefix = match custom_prefix {
                Some(prefix) => prefix.to_string(),
                None => format!("{}_", service_id),
            };
            Self {
                prefix,
                postfix: String::new(),
                shrink,
            }
        }
    }

    /// Final name for a base like `filter_Products` or a function import.
    pub fn name(&self, base: &str) -> String {
        let mut base = base.to_string();
        if self.shrink {
            let full_len = self.prefix.len() + base.len() + self.postfix.len();
            if full_len > SHRINK_TARGET {
                let budget = SHRINK_TARGET
                    .saturating_sub(self.prefix.len() + self.postfix.len())
                    .max(12);
                base = shrink_tool_base(&base, budget);
            }
        }

        let full = format!("{}{}{}", self.prefix, base, self.postfix);
        if full.len() <= MAX_TOOL_NAME {
            return full;
        }

        // Over the hard cap: truncate the base, preserving the verb.
        let max_base = MAX_TOOL_NAME.saturating_sub(self.prefix.len() + self.postfix.len());
        let truncated = match base.split_once('_') {
            Some((verb, entity)) if max_base > verb.len() + 9 => {
                let keep = max_base - verb.len() - 1;
                format!("{}_{}", verb, truncate(entity, keep))
            }
            _ => truncate(&base, max_base),
        };
        format!("{}{}{}", self.prefix, truncated, self.postfix)
    }
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Compact form of the service identifier used as a postfix when shrinking:
/// the longest `_`-separated word, at most four characters, lowercased.
fn shrink_service_id(service_id: &str) -> String {
    let longest = service_id
        .split('_')
        .max_by_key(|part| part.len())
        .unwrap_or(service_id);
    longest.chars().take(4).collect::<String>().to_lowercase()
}

/// Shorten `verb_Entity` bases: abbreviate the verb, then compress the
/// entity part into the remaining budget.
fn shrink_tool_base(base: &str, budget: usize) -> String {
    let (verb, entity) = match base.split_once('_') {
        Some(parts) => parts,
        None => return shorten_name(base, budget),
    };
    let verb = VERB_MAP
        .iter()
        .find(|(long, _)| *long == verb)
        .map(|(_, short)| *short)
        .unwrap_or(verb);
    if entity.is_empty() {
        return verb.to_string();
    }
    let entity_budget = budget.saturating_sub(verb.len() + 1).max(8);
    format!("{}_{}", verb, shorten_name(entity, entity_budget))
}

/// Progressive, deterministic name shortening. A name already within the
/// target length is returned unchanged, which makes the pass idempotent.
pub fn shorten_name(name: &str, target: usize) -> String {
    if name.len() <= target {
        return name.to_string();
    }

    // Stage 1: tokenize and keep the longest meaningful token.
    let tokens = tokenize(name);
    let longest = tokens
        .iter()
        .filter(|t| t.len() > 3 && !t.chars().all(|c| c.is_ascii_digit()))
        .max_by_key(|t| t.len());

    let words: Vec<String> = match longest {
        Some(token) if token.len() <= target => return token.to_string(),
        Some(token) => decompose_camel_case(token),
        None => tokens
            .iter()
            .flat_map(|t| decompose_camel_case(t))
            .collect(),
    };

    // Stage 2: drop generic words.
    let mut filtered: Vec<String> = words
        .iter()
        .filter(|w| !GENERIC_WORDS.contains(&w.as_str()))
        .cloned()
        .collect();
    if filtered.is_empty() {
        filtered = words;
    }

    let joined: String = filtered.concat();
    if joined.len() <= target && !joined.is_empty() {
        return joined;
    }

    // Stage 3: synonym table.
    let abbreviated: Vec<String> = filtered
        .iter()
        .map(|w| {
            SYNONYMS
                .iter()
                .find(|(long, _)| *long == w.to_uppercase())
                .map(|(_, short)| short.to_string())
                .unwrap_or_else(|| w.clone())
        })
        .collect();
    let joined: String = abbreviated.concat();
    if joined.len() <= target && !joined.is_empty() {
        return joined;
    }

    // Stage 4: keep the longest prefix of words that fits.
    for n in (1..=abbreviated.len()).rev() {
        let candidate: String = abbreviated[..n].concat();
        if candidate.len() <= target {
            return candidate;
        }
    }

    // Stage 5: strip interior vowels from the first word, then truncate.
    let first = &abbreviated[0];
    let compressed = strip_interior_vowels(first);
    if compressed.len() <= target && compressed.len() >= 3 {
        return compressed;
    }
    truncate(first, target)
}

fn tokenize(name: &str) -> Vec<&str> {
    name.split(|c: char| c == '_' || c == '-' || c == '.' || c == ':' || c.is_whitespace())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Split CamelCase/PascalCase into words; runs of capitals stay together
/// ("XMLParser" -> ["XML", "Parser"]).
fn decompose_camel_case(word: &str) -> Vec<String> {
    let chars: Vec<char> = word.chars().collect();
    let mut parts = Vec::new();
    let mut current = String::new();

    for (i, &c) in chars.iter().enumerate() {
        if i == 0 {
            current.push(c);
            continue;
        }
        let boundary = c.is_uppercase()
            && (chars[i - 1].is_lowercase()
                || (i + 1 < chars.len() && chars[i + 1].is_lowercase()));
        if boundary && !current.is_empty() {
            parts.push(std::mem::take(&mut current));
        }
        current.push(c);
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

fn strip_interior_vowels(word: &str) -> String {
    let chars: Vec<char> = word.chars().collect();
    if chars.len() <= 3 {
        return word.to_string();
    }
    let mut out = String::new();
    out.push(chars[0]);
    for &c in &chars[1..chars.len() - 1] {
        if !"aeiouAEIOU".contains(c) {
            out.push(c);
        }
    }
    out.push(chars[chars.len() - 1]);
    out
}
