//! Metadata reader
//!
//! Fetches `<base>$metadata`, scans the EDMX document into the service
//! model, and falls back to service-document probing when the metadata
//! endpoint is unusable. Per-entity parse problems are skipped with a
//! warning; only a total failure of both paths aborts startup.

use reqwest::header::ACCEPT;
use serde_json::Value;

use crate::auth::Auth;
use crate::error::BridgeError;
use crate::odata::metadata::{
    EntityProperty, EntitySet, EntityType, FunctionImport, ServiceMetadata,
};

/// Loads service metadata over the shared HTTP session.
pub struct MetadataLoader {
    http: reqwest::Client,
    auth: Auth,
    service_url: String,
}

impl MetadataLoader {
    pub fn new(http: reqwest::Client, auth: Auth, service_url: impl Into<String>) -> Self {
        Self {
            http,
            auth,
            service_url: service_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Fetch and parse `$metadata`, falling back to the service document.
    pub async fn load(&self) -> Result<ServiceMetadata, BridgeError> {
        let metadata_url = format!("{}/$metadata", self.service_url);
        tracing::debug!("Fetching metadata from {}", metadata_url);

        match self.fetch_text(&metadata_url, "application/xml").await {
            Ok(xml) => match parse_edmx(&xml, &self.service_url) {
                Ok(metadata) if !metadata.entity_sets.is_empty() => {
                    tracing::info!(
                        "Parsed metadata: {} types, {} sets, {} functions",
                        metadata.entity_types.len(),
                        metadata.entity_sets.len(),
                        metadata.function_imports.len()
                    );
                    return Ok(metadata);
                }
                Ok(metadata) => {
                    tracing::warn!("Metadata contained no entity sets, probing service document");
                    return self.fallback(Some(metadata)).await;
                }
                Err(err) => {
                    tracing::warn!("Failed to parse metadata ({}), probing service document", err);
                }
            },
            Err(err) => {
                tracing::warn!("Failed to fetch metadata ({}), probing service document", err);
            }
        }

        self.fallback(None).await
    }

    /// Service-document fallback: enumerate entity-set names and synthesize
    /// minimal string-keyed entity shells. Write capabilities stay off.
    async fn fallback(&self, partial: Option<ServiceMetadata>) -> Result<ServiceMetadata, BridgeError> {
        let body = self
            .fetch_text(&self.service_url, "application/json, application/atom+xml")
            .await
            .map_err(|err| {
                BridgeError::MetadataUnavailable(format!(
                    "both $metadata and the service document failed: {}",
                    err
                ))
            })?;

        let set_names = service_doc_entity_sets(&body);
        if set_names.is_empty() {
            return Err(BridgeError::MetadataUnavailable(
                "service document listed no entity sets".to_string(),
            ));
        }

        tracing::warn!(
            "Using service-document fallback: {} entity sets, write operations disabled",
            set_names.len()
        );

        let mut metadata = partial.unwrap_or_else(|| ServiceMetadata::new(&self.service_url));
        for name in set_names {
            metadata
                .entity_types
                .entry(name.clone())
                .or_insert_with(|| EntityType::minimal(&name));
            metadata
                .entity_sets
                .entry(name.clone())
                .or_insert_with(|| EntitySet::read_only_fallback(&name, &name));
        }
        Ok(metadata)
    }

    async fn fetch_text(&self, url: &str, accept: &str) -> Result<String, BridgeError> {
        let mut request = self.http.get(url).header(ACCEPT, accept);
        if let Auth::Basic { username, password } = &self.auth {
            request = request.basic_auth(username, Some(password));
        }
        let response = request.send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(BridgeError::Auth {
                status: status.as_u16(),
                message: "check credentials for the metadata endpoint".to_string(),
            });
        }
        if !status.is_success() {
            return Err(BridgeError::upstream(
                status.as_u16(),
                format!("unexpected status fetching {}", url),
            ));
        }
        // Tolerate odd encodings in large SAP metadata documents.
        let bytes = response.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).to_string())
    }
}

/// Entity-set names from a service document. JSON (`{"d":{"EntitySets":[..]}}`)
/// is preferred; AtomPub `<collection href="..">` is the compatibility path.
fn service_doc_entity_sets(body: &str) -> Vec<String> {
    if let Ok(json) = serde_json::from_str::<Value>(body) {
        if let Some(sets) = json
            .pointer("/d/EntitySets")
            .and_then(Value::as_array)
        {
            return sets
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect();
        }
    }

    let mut names = Vec::new();
    for event in scan_xml(body) {
        if let XmlEvent::Open(tag) | XmlEvent::Empty(tag) = event {
            if local_name(tag.name) == "collection" {
                if let Some(href) = tag.attr("href") {
                    names.push(href);
                }
            }
        }
    }
    names
}

/// Parse an EDMX document into the service model.
pub fn parse_edmx(xml: &str, service_url: &str) -> Result<ServiceMetadata, BridgeError> {
    if !xml.contains("Edmx") && !xml.contains("Schema") {
        return Err(BridgeError::MetadataUnavailable(
            "response does not look like an EDMX document".to_string(),
        ));
    }

    let mut metadata = ServiceMetadata::new(service_url);
    let mut namespace = String::new();

    // Builder state while walking the element stream.
    let mut current_type: Option<EntityTypeDraft> = None;
    let mut in_key = false;
    let mut current_function: Option<FunctionImport> = None;

    for event in scan_xml(xml) {
        match event {
            XmlEvent::Open(tag) => match local_name(tag.name) {
                "Schema" => {
                    if let Some(ns) = tag.attr("Namespace") {
                        namespace = ns;
                    }
                }
                "EntityType" => match tag.attr("Name") {
                    Some(name) => {
                        current_type = Some(EntityTypeDraft {
                            name,
                            properties: Vec::new(),
                            keys: Vec::new(),
                            label: tag.attr("sap:label"),
                        })
                    }
                    None => tracing::warn!("Skipping EntityType without a Name attribute"),
                },
                "Key" => in_key = true,
                "FunctionImport" => current_function = function_draft(&tag),
                // Elements that are usually self-closing but may carry
                // children (Documentation and the like).
                _ => handle_leaf(
                    &tag,
                    in_key,
                    &mut current_type,
                    &mut current_function,
                    &mut metadata,
                ),
            },
            XmlEvent::Empty(tag) => match local_name(tag.name) {
                "FunctionImport" => {
                    if let Some(func) = function_draft(&tag) {
                        metadata.function_imports.insert(func.name.clone(), func);
                    }
                }
                _ => handle_leaf(
                    &tag,
                    in_key,
                    &mut current_type,
                    &mut current_function,
                    &mut metadata,
                ),
            },
            XmlEvent::Close(name) => match local_name(name) {
                "Key" => in_key = false,
                "EntityType" => {
                    if let Some(draft) = current_type.take() {
                        let entity = draft.finish(&namespace);
                        metadata.entity_types.insert(entity.name.clone(), entity);
                    }
                }
                "FunctionImport" => {
                    if let Some(func) = current_function.take() {
                        metadata.function_imports.insert(func.name.clone(), func);
                    }
                }
                _ => {}
            },
        }
    }

    // Entity sets referencing unknown types get a minimal shell so their
    // filter/count tools stay callable.
    let missing: Vec<String> = metadata
        .entity_sets
        .values()
        .map(|set| set.entity_type.clone())
        .filter(|t| !metadata.entity_types.contains_key(t))
        .collect();
    for type_name in missing {
        tracing::warn!(
            "EntityType '{}' referenced by an EntitySet was not found; using a minimal shell",
            type_name
        );
        metadata
            .entity_types
            .insert(type_name.clone(), EntityType::minimal(&type_name));
    }

    Ok(metadata)
}

/// Shared handling for the leaf-ish elements that may appear either
/// self-closing or with children.
fn handle_leaf(
    tag: &XmlTag<'_>,
    in_key: bool,
    current_type: &mut Option<EntityTypeDraft>,
    current_function: &mut Option<FunctionImport>,
    metadata: &mut ServiceMetadata,
) {
    match local_name(tag.name) {
        "PropertyRef" if in_key => {
            if let (Some(draft), Some(name)) = (current_type.as_mut(), tag.attr("Name")) {
                draft.keys.push(name);
            }
        }
        "Property" => {
            if let Some(draft) = current_type.as_mut() {
                match property_from_tag(tag) {
                    Some(prop) => draft.properties.push(prop),
                    None => tracing::warn!(
                        "Skipping malformed property in EntityType '{}'",
                        draft.name
                    ),
                }
            }
        }
        "Parameter" => {
            if let Some(func) = current_function.as_mut() {
                // Output-only parameters are not callable inputs.
                let mode = tag.attr("sap:Mode").unwrap_or_else(|| "In".to_string());
                if mode.eq_ignore_ascii_case("in") || mode.eq_ignore_ascii_case("inout") {
                    if let Some(param) = property_from_tag(tag) {
                        func.parameters.push(param);
                    }
                }
            }
        }
        "EntitySet" => match entity_set_from_tag(tag) {
            Some(set) => {
                metadata.entity_sets.insert(set.name.clone(), set);
            }
            None => tracing::warn!("Skipping EntitySet without Name/EntityType attributes"),
        },
        _ => {}
    }
}

struct EntityTypeDraft {
    name: String,
    properties: Vec<EntityProperty>,
    keys: Vec<String>,
    label: Option<String>,
}

impl EntityTypeDraft {
    fn finish(mut self, namespace: &str) -> EntityType {
        for prop in &mut self.properties {
            prop.is_key = self.keys.contains(&prop.name);
            if prop.is_key {
                prop.nullable = false;
            }
        }
        let qualified_name = if namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", namespace, self.name)
        };
        EntityType {
            name: self.name,
            qualified_name,
            properties: self.properties,
            key_properties: self.keys,
            description: self.label,
        }
    }
}

fn property_from_tag(tag: &XmlTag<'_>) -> Option<EntityProperty> {
    let name = tag.attr("Name")?;
    let edm_type = tag.attr("Type")?;
    let mut prop = EntityProperty::new(name, edm_type);
    prop.nullable = tag
        .attr("Nullable")
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(true);
    prop.max_length = tag.attr("MaxLength").and_then(|v| v.parse().ok());
    prop.label = tag.attr("sap:label");
    Some(prop)
}

fn entity_set_from_tag(tag: &XmlTag<'_>) -> Option<EntitySet> {
    let name = tag.attr("Name")?;
    let type_fqn = tag.attr("EntityType")?;
    // "Namespace.Type" -> "Type"
    let type_name = type_fqn.rsplit('.').next().unwrap_or(&type_fqn).to_string();

    let flag = |attr: &str, default: bool| {
        tag.attr(attr)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(default)
    };

    let mut set = EntitySet::new(name, type_name);
    set.creatable = flag("sap:creatable", true);
    set.updatable = flag("sap:updatable", true);
    set.deletable = flag("sap:deletable", true);
    set.searchable = flag("sap:searchable", false);
    set.pageable = flag("sap:pageable", true);
    set.addressable = flag("sap:addressable", true);
    set.description = tag.attr("sap:label");
    Some(set)
}

fn function_draft(tag: &XmlTag<'_>) -> Option<FunctionImport> {
    let name = match tag.attr("Name") {
        Some(name) => name,
        None => {
            tracing::warn!("Skipping FunctionImport without a Name attribute");
            return None;
        }
    };
    let http_method = tag
        .attr("m:HttpMethod")
        .or_else(|| tag.attr("HttpMethod"))
        .unwrap_or_else(|| "GET".to_string())
        .to_uppercase();
    Some(FunctionImport {
        name,
        http_method,
        return_type: tag.attr("ReturnType"),
        parameters: Vec::new(),
        description: tag.attr("sap:label"),
    })
}

// --- minimal XML scanning ------------------------------------------------
//
// The EDMX documents this bridge consumes are machine-written and flat, so a
// small tag scanner is enough: elements, attributes, and entity unescaping.
// Comments, processing instructions, DOCTYPE, and CDATA are skipped.

#[derive(Debug)]
enum XmlEvent<'a> {
    Open(XmlTag<'a>),
    Empty(XmlTag<'a>),
    Close(&'a str),
}

#[derive(Debug)]
struct XmlTag<'a> {
    name: &'a str,
    attrs: Vec<(&'a str, String)>,
}

impl XmlTag<'_> {
    /// Attribute lookup by exact name, or by local name when the stored
    /// attribute carries a namespace prefix the caller did not use.
    fn attr(&self, name: &str) -> Option<String> {
        if let Some((_, value)) = self.attrs.iter().find(|(k, _)| *k == name) {
            return Some(value.clone());
        }
        if !name.contains(':') {
            return self
                .attrs
                .iter()
                .find(|(k, _)| local_name(k) == name && !k.starts_with("xmlns"))
                .map(|(_, v)| v.clone());
        }
        None
    }
}

fn local_name(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}

fn scan_xml(xml: &str) -> Vec<XmlEvent<'_>> {
    let mut events = Vec::new();
    let bytes = xml.as_bytes();
    let mut pos = 0;

    while let Some(start) = find_byte(bytes, pos, b'<') {
        // Comments, PIs, DOCTYPE, CDATA
        if xml[start..].starts_with("<!--") {
            pos = xml[start..]
                .find("-->")
                .map(|i| start + i + 3)
                .unwrap_or(xml.len());
            continue;
        }
        if xml[start..].starts_with("<![CDATA[") {
            pos = xml[start..]
                .find("]]>")
                .map(|i| start + i + 3)
                .unwrap_or(xml.len());
            continue;
        }
        if xml[start..].starts_with("<?") || xml[start..].starts_with("<!") {
            pos = find_byte(bytes, start, b'>').map(|i| i + 1).unwrap_or(xml.len());
            continue;
        }

        // Find the closing '>' outside quoted attribute values.
        let Some(end) = find_tag_end(bytes, start + 1) else {
            break;
        };
        let body = xml[start + 1..end].trim();
        pos = end + 1;
        if body.is_empty() {
            continue;
        }

        if let Some(name) = body.strip_prefix('/') {
            events.push(XmlEvent::Close(name.trim()));
            continue;
        }

        let (body, self_closing) = match body.strip_suffix('/') {
            Some(stripped) => (stripped.trim_end(), true),
            None => (body, false),
        };

        let name_end = body
            .find(|c: char| c.is_whitespace())
            .unwrap_or(body.len());
        let name = &body[..name_end];
        let attrs = parse_attrs(&body[name_end..]);
        let tag = XmlTag { name, attrs };
        if self_closing {
            events.push(XmlEvent::Empty(tag));
        } else {
            events.push(XmlEvent::Open(tag));
        }
    }

    events
}

fn find_byte(bytes: &[u8], from: usize, needle: u8) -> Option<usize> {
    bytes[from.min(bytes.len())..]
        .iter()
        .position(|&b| b == needle)
        .map(|i| from + i)
}

fn find_tag_end(bytes: &[u8], from: usize) -> Option<usize> {
    let mut quote: Option<u8> = None;
    for (i, &b) in bytes[from..].iter().enumerate() {
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None => match b {
                b'"' | b'\'' => quote = Some(b),
                b'>' => return Some(from + i),
                _ => {}
            },
        }
    }
    None
}

fn parse_attrs(raw: &str) -> Vec<(&str, String)> {
    let mut attrs = Vec::new();
    let bytes = raw.as_bytes();
    let mut pos = 0;

    while pos < raw.len() {
        // attribute name
        while pos < raw.len() && (bytes[pos] as char).is_whitespace() {
            pos += 1;
        }
        let name_start = pos;
        while pos < raw.len() && bytes[pos] != b'=' && !(bytes[pos] as char).is_whitespace() {
            pos += 1;
        }
        if name_start == pos {
            break;
        }
        let name = &raw[name_start..pos];

        while pos < raw.len() && (bytes[pos] as char).is_whitespace() {
            pos += 1;
        }
        if pos >= raw.len() || bytes[pos] != b'=' {
            // Valueless attribute; ignore and continue.
            continue;
        }
        pos += 1;
        while pos < raw.len() && (bytes[pos] as char).is_whitespace() {
            pos += 1;
        }
        if pos >= raw.len() {
            break;
        }
        let quote = bytes[pos];
        if quote != b'"' && quote != b'\'' {
            break;
        }
        pos += 1;
        let value_start = pos;
        while pos < raw.len() && bytes[pos] != quote {
            pos += 1;
        }
        let value = unescape_entities(&raw[value_start..pos]);
        attrs.push((name, value));
        pos += 1;
    }

    attrs
}

fn unescape_entities(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_string();
    }
    raw.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
