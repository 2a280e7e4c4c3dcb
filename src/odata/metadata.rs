//! OData metadata model
//!
//! Immutable description of an OData v2 service: entity types with their
//! properties and keys, entity sets with SAP capability flags, and function
//! imports. Built once at startup by the metadata reader.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single property of an entity type or a function-import parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityProperty {
    pub name: String,
    /// OData type string, e.g. "Edm.String".
    #[serde(rename = "type")]
    pub edm_type: String,
    pub nullable: bool,
    pub is_key: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl EntityProperty {
    pub fn new(name: impl Into<String>, edm_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            edm_type: edm_type.into(),
            nullable: true,
            is_key: false,
            max_length: None,
            label: None,
        }
    }

    /// Human-readable parameter description for tool schemas.
    pub fn describe(&self) -> String {
        let mut desc = match &self.label {
            Some(label) => format!("{} ({})", label, self.edm_type),
            None => self.edm_type.clone(),
        };
        if self.is_key {
            desc.push_str(" (key)");
        }
        desc
    }
}

/// An entity type: named shape with properties, a subset of which are keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityType {
    pub name: String,
    /// Namespace-qualified name as written in the EDMX.
    pub qualified_name: String,
    pub properties: Vec<EntityProperty>,
    pub key_properties: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl EntityType {
    /// Properties flagged as key, in declaration order.
    pub fn key_props(&self) -> Vec<&EntityProperty> {
        self.properties.iter().filter(|p| p.is_key).collect()
    }

    /// Non-key properties, in declaration order.
    pub fn non_key_props(&self) -> Vec<&EntityProperty> {
        self.properties.iter().filter(|p| !p.is_key).collect()
    }

    pub fn property(&self, name: &str) -> Option<&EntityProperty> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Minimal shell used when metadata is unavailable: a single string `ID`
    /// key so filter/count tools remain callable.
    pub fn minimal(name: impl Into<String>) -> Self {
        let name = name.into();
        let mut id = EntityProperty::new("ID", "Edm.String");
        id.is_key = true;
        id.nullable = false;
        Self {
            qualified_name: name.clone(),
            name,
            properties: vec![id],
            key_properties: vec!["ID".to_string()],
            description: None,
        }
    }
}

/// An entity set with its capability flags. Flags default to true when the
/// corresponding SAP annotation is absent, except `searchable`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitySet {
    pub name: String,
    pub entity_type: String,
    pub creatable: bool,
    pub updatable: bool,
    pub deletable: bool,
    pub searchable: bool,
    pub pageable: bool,
    pub addressable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl EntitySet {
    pub fn new(name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entity_type: entity_type.into(),
            creatable: true,
            updatable: true,
            deletable: true,
            searchable: false,
            pageable: true,
            addressable: true,
            description: None,
        }
    }

    /// Conservative flags for sets discovered via the service-document
    /// fallback: reads only.
    pub fn read_only_fallback(name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            creatable: false,
            updatable: false,
            deletable: false,
            ..Self::new(name, entity_type)
        }
    }
}

/// A server-defined callable not bound to an entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionImport {
    pub name: String,
    /// "GET" or "POST".
    pub http_method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_type: Option<String>,
    pub parameters: Vec<EntityProperty>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Everything known about the target service. Immutable after startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceMetadata {
    pub service_url: String,
    pub entity_types: BTreeMap<String, EntityType>,
    pub entity_sets: BTreeMap<String, EntitySet>,
    pub function_imports: BTreeMap<String, FunctionImport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_description: Option<String>,
}

impl ServiceMetadata {
    pub fn new(service_url: impl Into<String>) -> Self {
        Self {
            service_url: service_url.into().trim_end_matches('/').to_string(),
            entity_types: BTreeMap::new(),
            entity_sets: BTreeMap::new(),
            function_imports: BTreeMap::new(),
            service_description: None,
        }
    }

    /// The entity type backing an entity set, if both are known.
    pub fn type_of_set(&self, set_name: &str) -> Option<&EntityType> {
        let set = self.entity_sets.get(set_name)?;
        self.entity_types.get(&set.entity_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_type() -> EntityType {
        let mut program = EntityProperty::new("Program", "Edm.String");
        program.is_key = true;
        program.nullable = false;
        let mut title = EntityProperty::new("Title", "Edm.String");
        title.max_length = Some(60);
        EntityType {
            name: "Program".to_string(),
            qualified_name: "ZNS.Program".to_string(),
            properties: vec![program, title],
            key_properties: vec!["Program".to_string()],
            description: None,
        }
    }

    #[test]
    fn test_key_props_order_and_filter() {
        let et = sample_type();
        let keys = et.key_props();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].name, "Program");
        assert_eq!(et.non_key_props().len(), 1);
    }

    #[test]
    fn test_minimal_shell_has_string_id_key() {
        let et = EntityType::minimal("Orders");
        assert_eq!(et.key_properties, vec!["ID"]);
        let id = et.property("ID").unwrap();
        assert!(id.is_key);
        assert_eq!(id.edm_type, "Edm.String");
    }

    #[test]
    fn test_fallback_set_is_read_only() {
        let es = EntitySet::read_only_fallback("Orders", "Orders");
        assert!(!es.creatable);
        assert!(!es.updatable);
        assert!(!es.deletable);
    }

    #[test]
    fn test_describe_marks_keys() {
        let et = sample_type();
        assert_eq!(et.property("Program").unwrap().describe(), "Edm.String (key)");
        assert_eq!(et.property("Title").unwrap().describe(), "Edm.String");
    }

    #[test]
    fn test_service_url_trailing_slash_trimmed() {
        let meta = ServiceMetadata::new("https://host/svc/");
        assert_eq!(meta.service_url, "https://host/svc");
    }
}
