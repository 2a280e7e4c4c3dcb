//! Tool projector
//!
//! Walks the service metadata and derives the tool catalog: one tool per
//! entity-set capability and per function import, plus the service-info
//! tool. Tools are plain data (descriptor + handler kind); argument
//! validation is a schema check in the dispatcher.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::error::BridgeError;
use crate::hints::pattern_matches;
use crate::mcp::naming::ToolNamer;
use crate::mcp::protocol::{create_tool_schema, ParamSpec, Tool};
use crate::odata::client::{ODataClient, QueryOptions};
use crate::odata::metadata::{EntityType, ServiceMetadata};
use crate::odata::types::EdmType;

/// Operation classes, keyed by the `--enable`/`--disable` code alphabet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Create,
    Search,
    Filter,
    Get,
    Update,
    Delete,
    Action,
    Info,
}

impl OpCode {
    pub fn letter(&self) -> Option<char> {
        match self {
            OpCode::Create => Some('C'),
            OpCode::Search => Some('S'),
            OpCode::Filter => Some('F'),
            OpCode::Get => Some('G'),
            OpCode::Update => Some('U'),
            OpCode::Delete => Some('D'),
            OpCode::Action => Some('A'),
            OpCode::Info => None,
        }
    }

    fn is_modifying(&self) -> bool {
        matches!(
            self,
            OpCode::Create | OpCode::Update | OpCode::Delete | OpCode::Action
        )
    }
}

/// What a tool does when called; the dispatcher routes on this.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolKind {
    Filter { set: String },
    Count { set: String },
    Search { set: String },
    Get { set: String },
    Create { set: String },
    Update { set: String },
    Delete { set: String },
    Function { name: String },
    ServiceInfo,
}

/// One registered tool: final name, schema, and handler routing.
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub params: Vec<ParamSpec>,
    pub kind: ToolKind,
    pub op: OpCode,
}

impl ToolDescriptor {
    pub fn input_schema(&self) -> Value {
        create_tool_schema(&self.params)
    }

    pub fn to_tool(&self) -> Tool {
        Tool {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema(),
        }
    }
}

/// Projection policy from CLI flags, applied in order: read-only modes,
/// disable set, enable set, name allowlists.
#[derive(Debug, Clone, Default)]
pub struct ProjectorOptions {
    pub read_only: bool,
    pub read_only_but_functions: bool,
    pub enabled_ops: Option<BTreeSet<char>>,
    pub disabled_ops: Option<BTreeSet<char>>,
    pub allowed_entities: Option<Vec<String>>,
    pub allowed_functions: Option<Vec<String>>,
    pub info_tool_name: Option<String>,
}

impl ProjectorOptions {
    fn allows(&self, op: OpCode) -> bool {
        if self.read_only && op.is_modifying() {
            return false;
        }
        if self.read_only_but_functions && op.is_modifying() && op != OpCode::Action {
            return false;
        }
        let Some(letter) = op.letter() else {
            // The info tool survives every filter.
            return true;
        };
        if let Some(disabled) = &self.disabled_ops {
            if disabled.contains(&letter) {
                return false;
            }
        }
        if let Some(enabled) = &self.enabled_ops {
            if !enabled.contains(&letter) {
                return false;
            }
        }
        true
    }

    fn entity_allowed(&self, name: &str) -> bool {
        match &self.allowed_entities {
            Some(patterns) => patterns.iter().any(|p| pattern_matches(p, name)),
            None => true,
        }
    }

    fn function_allowed(&self, name: &str) -> bool {
        match &self.allowed_functions {
            Some(patterns) => patterns.iter().any(|p| pattern_matches(p, name)),
            None => true,
        }
    }
}

/// Derive the full tool catalog for a service.
pub fn project_tools(
    metadata: &ServiceMetadata,
    namer: &ToolNamer,
    opts: &ProjectorOptions,
) -> Vec<ToolDescriptor> {
    let mut tools = Vec::new();

    let info_base = opts
        .info_tool_name
        .clone()
        .unwrap_or_else(|| "odata_service_info".to_string());
    let info_desc = "Provides metadata about the configured OData service: entity sets, \
                     entity types, function imports, and the registered tools."
        .to_string();
    tools.push(ToolDescriptor {
        name: namer.name(&info_base),
        description: info_desc.clone(),
        params: Vec::new(),
        kind: ToolKind::ServiceInfo,
        op: OpCode::Info,
    });
    tools.push(ToolDescriptor {
        name: "readme".to_string(),
        description: info_desc,
        params: Vec::new(),
        kind: ToolKind::ServiceInfo,
        op: OpCode::Info,
    });

    for (set_name, set) in &metadata.entity_sets {
        if !opts.entity_allowed(set_name) {
            continue;
        }
        let Some(entity_type) = metadata.entity_types.get(&set.entity_type) else {
            tracing::warn!(
                "Skipping tools for '{}': entity type '{}' unknown",
                set_name,
                set.entity_type
            );
            continue;
        };
        let has_keys = !entity_type.key_props().is_empty();

        if opts.allows(OpCode::Filter) {
            tools.push(ToolDescriptor {
                name: namer.name(&format!("filter_{}", set_name)),
                description: format!(
                    "Retrieve a list of {} entities from the '{}' set.",
                    entity_type.name, set_name
                ),
                params: filter_params(),
                kind: ToolKind::Filter {
                    set: set_name.clone(),
                },
                op: OpCode::Filter,
            });
            tools.push(ToolDescriptor {
                name: namer.name(&format!("count_{}", set_name)),
                description: format!(
                    "Get the total count of {} entities in the '{}' set.",
                    entity_type.name, set_name
                ),
                params: vec![ParamSpec::optional_string(
                    "filter",
                    "OData $filter expression",
                )],
                kind: ToolKind::Count {
                    set: set_name.clone(),
                },
                op: OpCode::Filter,
            });
        }

        if set.searchable && opts.allows(OpCode::Search) {
            tools.push(ToolDescriptor {
                name: namer.name(&format!("search_{}", set_name)),
                description: format!("Performs a free-text search within the '{}' set.", set_name),
                params: vec![
                    ParamSpec::new("search_term", "string", "Text term(s) to search for", true),
                    ParamSpec::optional_integer("top", "Maximum number of entities"),
                    ParamSpec::optional_integer("skip", "Number of entities to skip"),
                ],
                kind: ToolKind::Search {
                    set: set_name.clone(),
                },
                op: OpCode::Search,
            });
        }

        if has_keys && opts.allows(OpCode::Get) {
            let mut params = key_params(entity_type);
            params.push(ParamSpec::optional_string(
                "select",
                "Comma-separated properties to return",
            ));
            params.push(ParamSpec::optional_string(
                "expand",
                "Navigation properties to expand",
            ));
            tools.push(ToolDescriptor {
                name: namer.name(&format!("get_{}", set_name)),
                description: format!(
                    "Retrieve a single {} entity from '{}' by its unique key(s).",
                    entity_type.name, set_name
                ),
                params,
                kind: ToolKind::Get {
                    set: set_name.clone(),
                },
                op: OpCode::Get,
            });
        }

        if set.creatable && opts.allows(OpCode::Create) {
            tools.push(ToolDescriptor {
                name: namer.name(&format!("create_{}", set_name)),
                description: format!(
                    "Create a new {} entity in the '{}' set.",
                    entity_type.name, set_name
                ),
                params: create_params(entity_type),
                kind: ToolKind::Create {
                    set: set_name.clone(),
                },
                op: OpCode::Create,
            });
        }

        if set.updatable && has_keys && opts.allows(OpCode::Update) {
            let mut params = key_params(entity_type);
            for prop in entity_type.non_key_props() {
                params.push(ParamSpec::new(
                    prop.name.clone(),
                    EdmType::from_edm(&prop.edm_type).json_type(),
                    prop.describe(),
                    false,
                ));
            }
            tools.push(ToolDescriptor {
                name: namer.name(&format!("update_{}", set_name)),
                description: format!(
                    "Update an existing {} entity in '{}' using its key(s). Uses MERGE semantics.",
                    entity_type.name, set_name
                ),
                params,
                kind: ToolKind::Update {
                    set: set_name.clone(),
                },
                op: OpCode::Update,
            });
        }

        if set.deletable && has_keys && opts.allows(OpCode::Delete) {
            tools.push(ToolDescriptor {
                name: namer.name(&format!("delete_{}", set_name)),
                description: format!(
                    "Delete a {} entity from '{}' using its unique key(s).",
                    entity_type.name, set_name
                ),
                params: key_params(entity_type),
                kind: ToolKind::Delete {
                    set: set_name.clone(),
                },
                op: OpCode::Delete,
            });
        }
    }

    for (func_name, function) in &metadata.function_imports {
        if !opts.function_allowed(func_name) || !opts.allows(OpCode::Action) {
            continue;
        }
        let params = function
            .parameters
            .iter()
            .map(|p| {
                ParamSpec::new(
                    p.name.clone(),
                    EdmType::from_edm(&p.edm_type).json_type(),
                    p.describe(),
                    !p.nullable,
                )
            })
            .collect();
        tools.push(ToolDescriptor {
            name: namer.name(func_name),
            description: format!(
                "Invoke the OData function import '{}'. HTTP method: {}.",
                func_name, function.http_method
            ),
            params,
            kind: ToolKind::Function {
                name: func_name.clone(),
            },
            op: OpCode::Action,
        });
    }

    tools
}

fn filter_params() -> Vec<ParamSpec> {
    vec![
        ParamSpec::optional_string("filter", "OData $filter expression"),
        ParamSpec::optional_string("select", "Comma-separated properties to return"),
        ParamSpec::optional_string("expand", "Comma-separated navigation properties to expand"),
        ParamSpec::optional_string("orderby", "Property to sort by, e.g. 'Price desc'"),
        ParamSpec::optional_integer("top", "Maximum number of entities"),
        ParamSpec::optional_integer("skip", "Number of entities to skip"),
        ParamSpec::optional_string("skiptoken", "Continuation token for pagination"),
        ParamSpec::new(
            "count",
            "boolean",
            "Include the total entity count in the response",
            false,
        ),
    ]
}

fn key_params(entity_type: &EntityType) -> Vec<ParamSpec> {
    entity_type
        .key_props()
        .into_iter()
        .map(|prop| {
            ParamSpec::new(
                prop.name.clone(),
                EdmType::from_edm(&prop.edm_type).json_type(),
                prop.describe(),
                true,
            )
        })
        .collect()
}

/// Create parameters: keys and non-nullable properties required, the rest
/// optional.
fn create_params(entity_type: &EntityType) -> Vec<ParamSpec> {
    entity_type
        .properties
        .iter()
        .map(|prop| {
            ParamSpec::new(
                prop.name.clone(),
                EdmType::from_edm(&prop.edm_type).json_type(),
                prop.describe(),
                prop.is_key || !prop.nullable,
            )
        })
        .collect()
}

/// Executes tool calls against the request engine.
pub struct BridgeHandler {
    client: Arc<ODataClient>,
    metadata: Arc<ServiceMetadata>,
    /// Merged hint payload, embedded verbatim in the info tool.
    hints: Option<Value>,
    /// Registered tool names grouped per entity set, for the info tool.
    entity_tools: BTreeMap<String, Vec<String>>,
    function_tools: Vec<String>,
}

impl BridgeHandler {
    pub fn new(
        client: Arc<ODataClient>,
        metadata: Arc<ServiceMetadata>,
        hints: Option<Value>,
        tools: &[ToolDescriptor],
    ) -> Self {
        let mut entity_tools: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut function_tools = Vec::new();
        for tool in tools {
            match &tool.kind {
                ToolKind::Filter { set }
                | ToolKind::Count { set }
                | ToolKind::Search { set }
                | ToolKind::Get { set }
                | ToolKind::Create { set }
                | ToolKind::Update { set }
                | ToolKind::Delete { set } => {
                    entity_tools
                        .entry(set.clone())
                        .or_default()
                        .push(tool.name.clone());
                }
                ToolKind::Function { .. } => function_tools.push(tool.name.clone()),
                ToolKind::ServiceInfo => {}
            }
        }
        Self {
            client,
            metadata,
            hints,
            entity_tools,
            function_tools,
        }
    }

    /// Run one tool call. Arguments have already been validated against the
    /// descriptor's schema.
    pub async fn call(
        &self,
        kind: &ToolKind,
        mut args: Map<String, Value>,
    ) -> Result<String, BridgeError> {
        let result = match kind {
            ToolKind::Filter { set } => {
                let query = query_from_args(&args)?;
                let filter = query.filter.clone();
                let mut result = self.client.list_or_filter(set, query).await?;
                if let (Some(filter), Some(obj)) = (filter, result.as_object_mut()) {
                    obj.insert(
                        "filter_explanation".to_string(),
                        json!(format!("Returned {} matching filter: '{}'", set, filter)),
                    );
                }
                result
            }
            ToolKind::Count { set } => {
                let filter = args.get("filter").and_then(Value::as_str);
                let count = self.client.count(set, filter).await?;
                let mut result = json!({ "count": count });
                if let Some(filter) = filter {
                    result["filter_explanation"] =
                        json!(format!("Counted {} matching filter: '{}'", set, filter));
                }
                result
            }
            ToolKind::Search { set } => {
                let term = args
                    .get("search_term")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        BridgeError::Argument("missing required parameter: search_term".to_string())
                    })?
                    .to_string();
                let top = args.get("top").and_then(Value::as_u64);
                let skip = args.get("skip").and_then(Value::as_u64);
                let mut result = self.client.search(set, &term, top, skip).await?;
                if let Some(obj) = result.as_object_mut() {
                    obj.insert(
                        "search_explanation".to_string(),
                        json!(format!("Found {} matching search term: '{}'", set, term)),
                    );
                }
                result
            }
            ToolKind::Get { set } => {
                let select = take_string(&mut args, "select");
                let expand = take_string(&mut args, "expand");
                self.client
                    .get(set, &args, select.as_deref(), expand.as_deref())
                    .await?
            }
            ToolKind::Create { set } => self.client.create(set, args).await?,
            ToolKind::Update { set } => {
                let entity_type = self.metadata.type_of_set(set).ok_or_else(|| {
                    BridgeError::Argument(format!("unknown entity set: {}", set))
                })?;
                let (keys, data) = split_key_args(entity_type, args);
                self.client.update(set, &keys, data).await?
            }
            ToolKind::Delete { set } => self.client.delete(set, &args).await?,
            ToolKind::Function { name } => self.client.invoke_function(name, &args).await?,
            ToolKind::ServiceInfo => self.service_info(),
        };

        serde_json::to_string_pretty(&result)
            .map_err(|e| BridgeError::Internal(format!("failed to serialize result: {}", e)))
    }

    /// Structured service summary merged with hint data.
    fn service_info(&self) -> Value {
        let entity_sets: BTreeMap<&String, Value> = self
            .metadata
            .entity_sets
            .iter()
            .map(|(name, set)| {
                (
                    name,
                    json!({
                        "entity_type": set.entity_type,
                        "description": set.description,
                        "creatable": set.creatable,
                        "updatable": set.updatable,
                        "deletable": set.deletable,
                        "searchable": set.searchable,
                        "pageable": set.pageable,
                        "addressable": set.addressable,
                    }),
                )
            })
            .collect();

        let mut info = json!({
            "service_url": self.metadata.service_url,
            "service_description": self.metadata.service_description,
            "entity_sets": entity_sets,
            "entity_types": self.metadata.entity_types,
            "function_imports": self.metadata.function_imports,
            "registered_entity_tools": self.entity_tools,
            "registered_function_tools": self.function_tools,
        });
        if let Some(hints) = &self.hints {
            info["implementation_hints"] = hints.clone();
        }
        info
    }
}

fn take_string(args: &mut Map<String, Value>, key: &str) -> Option<String> {
    args.remove(key).and_then(|v| match v {
        Value::String(s) => Some(s),
        _ => None,
    })
}

fn split_key_args(
    entity_type: &EntityType,
    args: Map<String, Value>,
) -> (Map<String, Value>, Map<String, Value>) {
    let key_names: Vec<&String> = entity_type.key_properties.iter().collect();
    let mut keys = Map::new();
    let mut data = Map::new();
    for (name, value) in args {
        if key_names.iter().any(|k| **k == name) {
            keys.insert(name, value);
        } else {
            data.insert(name, value);
        }
    }
    (keys, data)
}

fn query_from_args(args: &Map<String, Value>) -> Result<QueryOptions, BridgeError> {
    Ok(QueryOptions {
        filter: args
            .get("filter")
            .and_then(Value::as_str)
            .map(str::to_string),
        select: args
            .get("select")
            .and_then(Value::as_str)
            .map(str::to_string),
        expand: args
            .get("expand")
            .and_then(Value::as_str)
            .map(str::to_string),
        orderby: args
            .get("orderby")
            .and_then(Value::as_str)
            .map(str::to_string),
        top: optional_u64(args, "top")?,
        skip: optional_u64(args, "skip")?,
        skiptoken: args
            .get("skiptoken")
            .and_then(Value::as_str)
            .map(str::to_string),
        search: None,
        count: args.get("count").and_then(Value::as_bool).unwrap_or(false),
    })
}

fn optional_u64(args: &Map<String, Value>, key: &str) -> Result<Option<u64>, BridgeError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value.as_u64().map(Some).ok_or_else(|| {
            BridgeError::Argument(format!("parameter '{}' must be a non-negative integer", key))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::odata::metadata::{EntityProperty, EntitySet};

    fn metadata_fixture() -> ServiceMetadata {
        let mut meta = ServiceMetadata::new("https://services.odata.org/V2/Northwind/Northwind.svc");

        let mut id = EntityProperty::new("ProductID", "Edm.Int32");
        id.is_key = true;
        id.nullable = false;
        let mut name = EntityProperty::new("ProductName", "Edm.String");
        name.nullable = false;
        let price = EntityProperty::new("Price", "Edm.Decimal");
        meta.entity_types.insert(
            "Product".to_string(),
            EntityType {
                name: "Product".to_string(),
                qualified_name: "NW.Product".to_string(),
                properties: vec![id, name, price],
                key_properties: vec!["ProductID".to_string()],
                description: None,
            },
        );
        meta.entity_sets
            .insert("Products".to_string(), {
                let mut set = EntitySet::new("Products", "Product");
                set.searchable = true;
                set
            });

        let mut readonly = EntitySet::new("Categories", "Product");
        readonly.creatable = false;
        readonly.updatable = false;
        readonly.deletable = false;
        meta.entity_sets.insert("Categories".to_string(), readonly);

        meta.function_imports.insert(
            "Refresh".to_string(),
            crate::odata::metadata::FunctionImport {
                name: "Refresh".to_string(),
                http_method: "POST".to_string(),
                return_type: None,
                parameters: vec![],
                description: None,
            },
        );
        meta
    }

    fn namer() -> ToolNamer {
        ToolNamer::new(
            "https://services.odata.org/V2/Northwind/Northwind.svc",
            None,
            None,
            true,
            false,
        )
    }

    fn names(tools: &[ToolDescriptor]) -> Vec<&str> {
        tools.iter().map(|t| t.name.as_str()).collect()
    }

    #[test]
    fn test_projection_respects_capabilities() {
        let meta = metadata_fixture();
        let tools = project_tools(&meta, &namer(), &ProjectorOptions::default());
        let names = names(&tools);

        assert!(names.contains(&"filter_Products_for_Northwind_svc"));
        assert!(names.contains(&"count_Products_for_Northwind_svc"));
        assert!(names.contains(&"search_Products_for_Northwind_svc"));
        assert!(names.contains(&"get_Products_for_Northwind_svc"));
        assert!(names.contains(&"create_Products_for_Northwind_svc"));
        assert!(names.contains(&"update_Products_for_Northwind_svc"));
        assert!(names.contains(&"delete_Products_for_Northwind_svc"));
        assert!(names.contains(&"Refresh_for_Northwind_svc"));
        assert!(names.contains(&"readme"));

        // Categories is flagged non-writable and non-searchable.
        assert!(!names.contains(&"create_Categories_for_Northwind_svc"));
        assert!(!names.contains(&"update_Categories_for_Northwind_svc"));
        assert!(!names.contains(&"delete_Categories_for_Northwind_svc"));
        assert!(!names.contains(&"search_Categories_for_Northwind_svc"));
        assert!(names.contains(&"filter_Categories_for_Northwind_svc"));
    }

    #[test]
    fn test_read_only_drops_all_modifying_ops() {
        let meta = metadata_fixture();
        let opts = ProjectorOptions {
            read_only: true,
            ..ProjectorOptions::default()
        };
        let tools = project_tools(&meta, &namer(), &opts);
        for tool in &tools {
            assert!(
                !tool.op.is_modifying(),
                "modifying tool survived read-only: {}",
                tool.name
            );
        }
    }

    #[test]
    fn test_read_only_but_functions_keeps_actions() {
        let meta = metadata_fixture();
        let opts = ProjectorOptions {
            read_only_but_functions: true,
            ..ProjectorOptions::default()
        };
        let tools = project_tools(&meta, &namer(), &opts);
        let names = names(&tools);
        assert!(names.contains(&"Refresh_for_Northwind_svc"));
        assert!(!names.iter().any(|n| n.starts_with("create_")));
        assert!(!names.iter().any(|n| n.starts_with("update_")));
        assert!(!names.iter().any(|n| n.starts_with("delete_")));
    }

    #[test]
    fn test_disable_set_subtracts() {
        let meta = metadata_fixture();
        let opts = ProjectorOptions {
            disabled_ops: Some(['C', 'U', 'D'].into_iter().collect()),
            ..ProjectorOptions::default()
        };
        let tools = project_tools(&meta, &namer(), &opts);
        let names = names(&tools);
        assert!(!names.iter().any(|n| n.starts_with("create_")));
        assert!(names.iter().any(|n| n.starts_with("filter_")));
        assert!(names.contains(&"Refresh_for_Northwind_svc"));
    }

    #[test]
    fn test_enable_set_restricts() {
        let meta = metadata_fixture();
        let opts = ProjectorOptions {
            enabled_ops: Some(['F', 'G'].into_iter().collect()),
            ..ProjectorOptions::default()
        };
        let tools = project_tools(&meta, &namer(), &opts);
        for tool in &tools {
            assert!(
                matches!(tool.op, OpCode::Filter | OpCode::Get | OpCode::Info),
                "unexpected tool {}",
                tool.name
            );
        }
        // Info tool survives an enable filter.
        assert!(names(&tools).contains(&"readme"));
    }

    #[test]
    fn test_entity_wildcard_allowlist() {
        let meta = metadata_fixture();
        let opts = ProjectorOptions {
            allowed_entities: Some(vec!["Prod*".to_string()]),
            ..ProjectorOptions::default()
        };
        let tools = project_tools(&meta, &namer(), &opts);
        let names = names(&tools);
        assert!(names.iter().any(|n| n.contains("_Products_")));
        assert!(!names.iter().any(|n| n.contains("_Categories_")));
    }

    #[test]
    fn test_get_params_are_exactly_keys_plus_select_expand() {
        let meta = metadata_fixture();
        let tools = project_tools(&meta, &namer(), &ProjectorOptions::default());
        let get = tools
            .iter()
            .find(|t| t.name.starts_with("get_Products"))
            .unwrap();
        let required: Vec<&str> = get
            .params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();
        assert_eq!(required, vec!["ProductID"]);
        let optional: Vec<&str> = get
            .params
            .iter()
            .filter(|p| !p.required)
            .map(|p| p.name.as_str())
            .collect();
        assert_eq!(optional, vec!["select", "expand"]);
    }

    #[test]
    fn test_create_requires_keys_and_non_nullable() {
        let meta = metadata_fixture();
        let tools = project_tools(&meta, &namer(), &ProjectorOptions::default());
        let create = tools
            .iter()
            .find(|t| t.name.starts_with("create_Products"))
            .unwrap();
        let required: Vec<&str> = create
            .params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();
        assert_eq!(required, vec!["ProductID", "ProductName"]);
        assert!(create.params.iter().any(|p| p.name == "Price" && !p.required));
    }

    #[test]
    fn test_update_requires_only_keys() {
        let meta = metadata_fixture();
        let tools = project_tools(&meta, &namer(), &ProjectorOptions::default());
        let update = tools
            .iter()
            .find(|t| t.name.starts_with("update_Products"))
            .unwrap();
        let required: Vec<&str> = update
            .params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();
        assert_eq!(required, vec!["ProductID"]);
    }

    #[test]
    fn test_key_param_marks_type_and_key() {
        let meta = metadata_fixture();
        let tools = project_tools(&meta, &namer(), &ProjectorOptions::default());
        let delete = tools
            .iter()
            .find(|t| t.name.starts_with("delete_Products"))
            .unwrap();
        assert_eq!(delete.params.len(), 1);
        let key = &delete.params[0];
        assert_eq!(key.json_type, "integer");
        assert!(key.description.contains("Edm.Int32"));
        assert!(key.description.contains("(key)"));
    }

    #[test]
    fn test_decimal_param_is_string_shaped() {
        let meta = metadata_fixture();
        let tools = project_tools(&meta, &namer(), &ProjectorOptions::default());
        let create = tools
            .iter()
            .find(|t| t.name.starts_with("create_Products"))
            .unwrap();
        let price = create.params.iter().find(|p| p.name == "Price").unwrap();
        assert_eq!(price.json_type, "string");
    }

    #[test]
    fn test_custom_info_tool_name() {
        let meta = metadata_fixture();
        let opts = ProjectorOptions {
            info_tool_name: Some("service_readme".to_string()),
            ..ProjectorOptions::default()
        };
        let tools = project_tools(&meta, &namer(), &opts);
        assert!(names(&tools).contains(&"service_readme_for_Northwind_svc"));
    }

    #[test]
    fn test_query_from_args_rejects_bad_top() {
        let mut args = Map::new();
        args.insert("top".to_string(), json!("twenty"));
        assert!(query_from_args(&args).is_err());

        let mut args = Map::new();
        args.insert("top".to_string(), json!(20));
        assert_eq!(query_from_args(&args).unwrap().top, Some(20));
    }
}
