//! OData request engine
//!
//! One long-lived HTTP session per process: authentication variants, the
//! CSRF token lifecycle, query-string assembly, per-verb request shapes, and
//! layered error extraction from upstream response bodies.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Method, Response, StatusCode};
use serde_json::{json, Map, Value};
use tokio::sync::Mutex;

use crate::auth::Auth;
use crate::error::BridgeError;
use crate::odata::guid;
use crate::odata::metadata::{EntityType, ServiceMetadata};
use crate::odata::response::{normalize_response, NormalizeOptions};
use crate::odata::types::{self, EdmType};

const CSRF_HEADER: &str = "X-CSRF-Token";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const USER_AGENT: &str = concat!("odata-mcp/", env!("CARGO_PKG_VERSION"));

/// Query options for list-shaped OData requests.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub filter: Option<String>,
    pub select: Option<String>,
    pub expand: Option<String>,
    pub orderby: Option<String>,
    pub top: Option<u64>,
    pub skip: Option<u64>,
    pub skiptoken: Option<String>,
    pub search: Option<String>,
    /// Request `$inlinecount=allpages` so the response carries a total.
    pub count: bool,
}

impl QueryOptions {
    /// Build the query string. Values are percent-encoded with `%20` for
    /// spaces; a literal `+` never reaches the wire.
    pub fn to_query_string(&self) -> String {
        let mut pairs: Vec<(&str, String)> = Vec::new();

        if let Some(filter) = &self.filter {
            pairs.push(("$filter", filter.clone()));
        }
        if let Some(select) = &self.select {
            pairs.push(("$select", select.clone()));
        }
        if let Some(expand) = &self.expand {
            pairs.push(("$expand", expand.clone()));
        }
        if let Some(orderby) = &self.orderby {
            pairs.push(("$orderby", orderby.clone()));
        }
        if let Some(top) = self.top {
            pairs.push(("$top", top.to_string()));
        }
        if let Some(skip) = self.skip {
            pairs.push(("$skip", skip.to_string()));
        }
        if let Some(token) = &self.skiptoken {
            pairs.push(("$skiptoken", token.clone()));
        }
        if let Some(search) = &self.search {
            pairs.push(("$search", search.clone()));
        }
        if self.count {
            pairs.push(("$inlinecount", "allpages".to_string()));
        }
        pairs.push(("$format", "json".to_string()));

        build_query(&pairs)
    }
}

/// Assemble `?k=v&k2=v2` with encoded values. Keys are OData system options
/// and stay literal.
fn build_query(pairs: &[(&str, String)]) -> String {
    if pairs.is_empty() {
        return String::new();
    }
    let encoded: Vec<String> = pairs
        .iter()
        .map(|(key, value)| format!("{}={}", key, types::encode_query_value(value)))
        .collect();
    // Some servers reject '+' for space; only %20 may appear on the wire.
    format!("?{}", encoded.join("&")).replace('+', "%20")
}

/// Engine configuration beyond the normalizer knobs.
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    pub verbose_errors: bool,
    pub normalize: NormalizeOptions,
}

/// Build the shared HTTP session. Cookie auth preloads the jar and disables
/// TLS verification; every other variant keeps verification on.
pub fn build_http_client(auth: &Auth, base_url: &str) -> Result<Client, BridgeError> {
    let mut builder = Client::builder()
        .user_agent(USER_AGENT)
        .timeout(REQUEST_TIMEOUT)
        .pool_idle_timeout(POOL_IDLE_TIMEOUT);

    match auth {
        Auth::Cookies(cookies) => {
            let url: reqwest::Url = base_url
                .parse()
                .map_err(|e| BridgeError::Argument(format!("invalid service URL: {}", e)))?;
            let jar = reqwest::cookie::Jar::default();
            for (name, value) in cookies {
                jar.add_cookie_str(&format!("{}={}", name, value), &url);
            }
            builder = builder
                .cookie_provider(Arc::new(jar))
                .danger_accept_invalid_certs(true);
        }
        _ => {
            builder = builder.cookie_store(true);
        }
    }

    builder
        .build()
        .map_err(|e| BridgeError::Internal(format!("failed to build HTTP client: {}", e)))
}

/// Client for one OData v2 service.
pub struct ODataClient {
    http: Client,
    metadata: Arc<ServiceMetadata>,
    auth: Auth,
    options: ClientOptions,
    /// Single CSRF slot; the mutex serializes fetch+assign so a fresh token
    /// is never overwritten by a stale one.
    csrf_token: Mutex<CsrfSlot>,
}

#[derive(Debug, Clone, PartialEq)]
enum CsrfSlot {
    /// No fetch attempted yet.
    Unfetched,
    /// The service answered the fetch without issuing a token.
    NotIssued,
    Token(String),
}

impl CsrfSlot {
    fn token(&self) -> Option<String> {
        match self {
            CsrfSlot::Token(value) => Some(value.clone()),
            _ => None,
        }
    }
}

impl ODataClient {
    pub fn new(
        http: Client,
        metadata: Arc<ServiceMetadata>,
        auth: Auth,
        options: ClientOptions,
    ) -> Self {
        Self {
            http,
            metadata,
            auth,
            options,
            csrf_token: Mutex::new(CsrfSlot::Unfetched),
        }
    }

    pub fn metadata(&self) -> &ServiceMetadata {
        &self.metadata
    }

    fn base_url(&self) -> &str {
        &self.metadata.service_url
    }

    fn entity_type_for(&self, set_name: &str) -> Result<&EntityType, BridgeError> {
        self.metadata
            .type_of_set(set_name)
            .ok_or_else(|| BridgeError::Argument(format!("unknown entity set: {}", set_name)))
    }

    fn require_capability(&self, set_name: &str, capability: &str) -> Result<(), BridgeError> {
        let set = self
            .metadata
            .entity_sets
            .get(set_name)
            .ok_or_else(|| BridgeError::Argument(format!("unknown entity set: {}", set_name)))?;
        let allowed = match capability {
            "creatable" => set.creatable,
            "updatable" => set.updatable,
            "deletable" => set.deletable,
            _ => true,
        };
        if allowed {
            Ok(())
        } else {
            Err(BridgeError::Policy(format!(
                "entity set {} is not {}",
                set_name, capability
            )))
        }
    }

    /// Names of GUID-shaped properties for a set's entity type.
    fn guid_fields_for(&self, set_name: &str) -> Vec<String> {
        self.metadata
            .type_of_set(set_name)
            .map(|et| {
                et.properties
                    .iter()
                    .filter(|p| guid::is_guid_shaped(p))
                    .map(|p| p.name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// List/filter entities. Without an explicit `$select`, defaults to all
    /// non-binary properties; wide SAP entities with binary payloads are
    /// expensive to return whole.
    pub async fn list_or_filter(
        &self,
        set_name: &str,
        mut query: QueryOptions,
    ) -> Result<Value, BridgeError> {
        let entity_type = self.entity_type_for(set_name)?;
        if query.select.is_none() {
            query.select = default_select(entity_type);
        }

        let url = format!(
            "{}/{}{}",
            self.base_url(),
            set_name,
            query.to_query_string()
        );
        let (_, body) = self.execute(Method::GET, &url, None, false).await?;
        let data = parse_json_body(&body);
        Ok(normalize_response(
            data,
            &self.guid_fields_for(set_name),
            &self.options.normalize,
            Some(&query),
        ))
    }

    /// Count entities via `/$count`, falling back to `$inlinecount` for
    /// services that do not support the count segment.
    pub async fn count(
        &self,
        set_name: &str,
        filter: Option<&str>,
    ) -> Result<i64, BridgeError> {
        self.entity_type_for(set_name)?;

        let mut pairs: Vec<(&str, String)> = Vec::new();
        if let Some(filter) = filter {
            pairs.push(("$filter", filter.to_string()));
        }
        let url = format!(
            "{}/{}/$count{}",
            self.base_url(),
            set_name,
            build_query(&pairs)
        );

        match self.execute(Method::GET, &url, None, false).await {
            Ok((_, body)) => {
                if let Ok(count) = body.trim().parse::<i64>() {
                    return Ok(count);
                }
                tracing::debug!("/$count returned a non-numeric body, using $inlinecount");
            }
            Err(BridgeError::Upstream { status, .. })
                if matches!(status, 400 | 404 | 405) =>
            {
                tracing::debug!(
                    "/$count unsupported for {} (status {}), using $inlinecount",
                    set_name,
                    status
                );
            }
            Err(err) => return Err(err),
        }

        let query = QueryOptions {
            filter: filter.map(str::to_string),
            top: Some(0),
            count: true,
            ..QueryOptions::default()
        };
        let listed = self.list_or_filter(set_name, query).await?;
        listed
            .get("total_count")
            .and_then(Value::as_i64)
            .ok_or_else(|| {
                BridgeError::upstream(
                    200,
                    format!("could not determine count for {}", set_name),
                )
            })
    }

    /// Free-text `$search` over a set.
    pub async fn search(
        &self,
        set_name: &str,
        term: &str,
        top: Option<u64>,
        skip: Option<u64>,
    ) -> Result<Value, BridgeError> {
        let query = QueryOptions {
            search: Some(term.to_string()),
            top,
            skip,
            ..QueryOptions::default()
        };
        self.list_or_filter(set_name, query).await
    }

    /// Fetch a single entity by key.
    pub async fn get(
        &self,
        set_name: &str,
        key_args: &Map<String, Value>,
        select: Option<&str>,
        expand: Option<&str>,
    ) -> Result<Value, BridgeError> {
        let entity_type = self.entity_type_for(set_name)?;
        let key = types::format_key_predicate(entity_type, key_args)?;

        let mut pairs: Vec<(&str, String)> = Vec::new();
        if let Some(select) = select {
            pairs.push(("$select", select.to_string()));
        }
        if let Some(expand) = expand {
            pairs.push(("$expand", expand.to_string()));
        }
        pairs.push(("$format", "json".to_string()));

        let url = format!(
            "{}/{}{}{}",
            self.base_url(),
            set_name,
            key,
            build_query(&pairs)
        );
        let (_, body) = self.execute(Method::GET, &url, None, false).await?;
        Ok(normalize_response(
            parse_json_body(&body),
            &self.guid_fields_for(set_name),
            &self.options.normalize,
            None,
        ))
    }

    /// Create an entity. The body carries only metadata-declared properties,
    /// coerced per the write rules.
    pub async fn create(
        &self,
        set_name: &str,
        data: Map<String, Value>,
    ) -> Result<Value, BridgeError> {
        self.require_capability(set_name, "creatable")?;
        let entity_type = self.entity_type_for(set_name)?;
        let payload = prepare_payload(entity_type, data, self.options.normalize.legacy_dates);

        let url = format!("{}/{}", self.base_url(), set_name);
        let (status, body) = self
            .execute(Method::POST, &url, Some(&Value::Object(payload)), true)
            .await?;
        if status != StatusCode::CREATED {
            tracing::debug!("create on {} returned {} (expected 201)", set_name, status);
        }
        Ok(self.normalize_entity(set_name, status, &body, "created"))
    }

    /// Update via MERGE, falling back to PUT on 405.
    pub async fn update(
        &self,
        set_name: &str,
        key_args: &Map<String, Value>,
        data: Map<String, Value>,
    ) -> Result<Value, BridgeError> {
        self.require_capability(set_name, "updatable")?;
        let entity_type = self.entity_type_for(set_name)?;
        if data.is_empty() {
            return Err(BridgeError::Argument(
                "no properties provided to update".to_string(),
            ));
        }
        let key = types::format_key_predicate(entity_type, key_args)?;
        let payload = Value::Object(prepare_payload(
            entity_type,
            data,
            self.options.normalize.legacy_dates,
        ));

        let url = format!("{}/{}{}", self.base_url(), set_name, key);
        let merge = Method::from_bytes(b"MERGE")
            .map_err(|e| BridgeError::Internal(format!("MERGE method: {}", e)))?;

        let result = self.execute(merge, &url, Some(&payload), true).await;
        let (status, body) = match result {
            Err(BridgeError::Upstream { status: 405, .. }) => {
                tracing::debug!("MERGE not allowed on {}, retrying as PUT", set_name);
                self.execute(Method::PUT, &url, Some(&payload), true).await?
            }
            other => other?,
        };
        Ok(self.normalize_entity(set_name, status, &body, "updated"))
    }

    /// Delete by key. Any 2xx is success; an empty body is tolerated.
    pub async fn delete(
        &self,
        set_name: &str,
        key_args: &Map<String, Value>,
    ) -> Result<Value, BridgeError> {
        self.require_capability(set_name, "deletable")?;
        let entity_type = self.entity_type_for(set_name)?;
        let key = types::format_key_predicate(entity_type, key_args)?;
        let url = format!("{}/{}{}", self.base_url(), set_name, key);

        let (status, body) = self.execute(Method::DELETE, &url, None, true).await?;
        Ok(self.normalize_entity(set_name, status, &body, "deleted"))
    }

    /// Invoke a function import. Scalar parameters travel in the query
    /// string for both GET and POST; there is no body.
    pub async fn invoke_function(
        &self,
        name: &str,
        args: &Map<String, Value>,
    ) -> Result<Value, BridgeError> {
        let function = self
            .metadata
            .function_imports
            .get(name)
            .ok_or_else(|| BridgeError::Argument(format!("unknown function import: {}", name)))?;

        let mut pairs: Vec<(&str, String)> = Vec::new();
        for param in &function.parameters {
            if let Some(value) = args.get(&param.name) {
                if value.is_null() {
                    continue;
                }
                pairs.push((
                    param.name.as_str(),
                    function_param_literal(&param.edm_type, value),
                ));
            }
        }
        pairs.push(("$format", "json".to_string()));

        let url = format!("{}/{}{}", self.base_url(), name, build_query(&pairs));
        let method = match function.http_method.as_str() {
            "POST" => Method::POST,
            _ => Method::GET,
        };
        let requires_csrf = method == Method::POST;

        let (_, body) = self.execute(method, &url, None, requires_csrf).await?;
        let normalized = normalize_response(
            parse_json_body(&body),
            &[],
            &self.options.normalize,
            None,
        );
        // One shape for every function result: collections under "results",
        // primitives under "result".
        Ok(match normalized {
            Value::Array(items) => json!({ "results": items }),
            v @ (Value::String(_) | Value::Number(_) | Value::Bool(_)) => json!({ "result": v }),
            Value::Null => json!({}),
            other => other,
        })
    }

    fn normalize_entity(
        &self,
        set_name: &str,
        status: StatusCode,
        body: &str,
        verb: &str,
    ) -> Value {
        if status == StatusCode::NO_CONTENT || body.trim().is_empty() {
            return json!({ "message": format!("Successfully {} entity in {}.", verb, set_name) });
        }
        match serde_json::from_str::<Value>(body) {
            Ok(data) => normalize_response(
                data,
                &self.guid_fields_for(set_name),
                &self.options.normalize,
                None,
            ),
            Err(_) => json!({
                "message": format!("Operation successful (non-JSON response, status {}).", status),
            }),
        }
    }

    // --- request plumbing -------------------------------------------------

    async fn send_once(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
        csrf_token: Option<&str>,
    ) -> Result<Response, BridgeError> {
        let mut request = self
            .http
            .request(method, url)
            .header(ACCEPT, "application/json");
        if let Auth::Basic { username, password } = &self.auth {
            request = request.basic_auth(username, Some(password));
        }
        if let Some(token) = csrf_token {
            request = request.header(CSRF_HEADER, token);
        }
        if let Some(body) = body {
            request = request.header(CONTENT_TYPE, "application/json").json(body);
        }
        tracing::debug!("-> {}", url);
        Ok(request.send().await?)
    }

    /// Execute a request, handling the CSRF lifecycle: lazy fetch before
    /// modifying requests, one refresh-and-retry on a CSRF 403.
    async fn execute(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
        requires_csrf: bool,
    ) -> Result<(StatusCode, String), BridgeError> {
        let token = if requires_csrf {
            self.ensure_csrf_token().await?
        } else {
            None
        };

        let response = self
            .send_once(method.clone(), url, body, token.as_deref())
            .await?;

        if response.status() == StatusCode::FORBIDDEN && requires_csrf {
            let headers = response.headers().clone();
            let text = response.text().await.unwrap_or_default();
            if is_csrf_failure(&headers, &text) {
                tracing::debug!("CSRF token rejected, refreshing once");
                let fresh = self.refresh_csrf_token().await?;
                let retry = self.send_once(method, url, body, fresh.as_deref()).await?;
                if retry.status() == StatusCode::FORBIDDEN {
                    let retry_text = retry.text().await.unwrap_or_default();
                    let (_, message) = extract_error(&retry_text);
                    return Err(BridgeError::Csrf(message));
                }
                return self.finish(retry, url).await;
            }
            let (_, message) = extract_error(&text);
            return Err(BridgeError::Auth {
                status: 403,
                message,
            });
        }

        self.finish(response, url).await
    }

    async fn finish(
        &self,
        response: Response,
        url: &str,
    ) -> Result<(StatusCode, String), BridgeError> {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if status.is_success() {
            return Ok((status, text));
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let (_, message) = extract_error(&text);
            return Err(BridgeError::Auth {
                status: status.as_u16(),
                message,
            });
        }
        Err(self.upstream_error(status, &text, url))
    }

    fn upstream_error(&self, status: StatusCode, body: &str, url: &str) -> BridgeError {
        let (code, message) = extract_error(body);
        let message = if message.is_empty() {
            format!("empty response with status {}", status.as_u16())
        } else {
            message
        };
        let details = if self.options.verbose_errors {
            Some(json!({
                "request": {
                    "url": url,
                    "headers": { "Authorization": "<redacted>", "Cookie": "<redacted>" },
                }
            }))
        } else {
            None
        };
        BridgeError::Upstream {
            status: status.as_u16(),
            code,
            message,
            details,
        }
    }

    /// Return the cached CSRF token, fetching it on first use. Holding the
    /// slot lock across the fetch keeps concurrent writers from racing.
    async fn ensure_csrf_token(&self) -> Result<Option<String>, BridgeError> {
        let mut slot = self.csrf_token.lock().await;
        if *slot == CsrfSlot::Unfetched {
            *slot = self.fetch_csrf_token().await?;
        }
        Ok(slot.token())
    }

    async fn refresh_csrf_token(&self) -> Result<Option<String>, BridgeError> {
        let mut slot = self.csrf_token.lock().await;
        *slot = self.fetch_csrf_token().await?;
        Ok(slot.token())
    }

    async fn fetch_csrf_token(&self) -> Result<CsrfSlot, BridgeError> {
        let mut request = self
            .http
            .head(self.base_url())
            .header(CSRF_HEADER, "Fetch");
        if let Auth::Basic { username, password } = &self.auth {
            request = request.basic_auth(username, Some(password));
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                tracing::debug!("CSRF fetch failed ({}), proceeding without token", err);
                return Ok(CsrfSlot::NotIssued);
            }
        };

        let token = response
            .headers()
            .get(CSRF_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        match token {
            Some(value)
                if !value.eq_ignore_ascii_case("fetch")
                    && !value.eq_ignore_ascii_case("required") =>
            {
                tracing::debug!("CSRF token obtained");
                Ok(CsrfSlot::Token(value))
            }
            _ => {
                tracing::debug!("service did not issue a CSRF token");
                Ok(CsrfSlot::NotIssued)
            }
        }
    }
}

/// Default `$select`: every non-binary property. Skipped for minimal
/// fallback shells whose property list does not reflect the real entity.
fn default_select(entity_type: &EntityType) -> Option<String> {
    if entity_type.properties.len() <= 1 {
        return None;
    }
    let names: Vec<&str> = entity_type
        .properties
        .iter()
        .filter(|p| EdmType::from_edm(&p.edm_type) != EdmType::Binary)
        .map(|p| p.name.as_str())
        .collect();
    if names.is_empty() || names.len() == entity_type.properties.len() {
        // Nothing binary to exclude; let the server send its default shape.
        return None;
    }
    Some(names.join(","))
}

/// Keep only metadata-declared properties and coerce the survivors.
fn prepare_payload(
    entity_type: &EntityType,
    data: Map<String, Value>,
    legacy_dates: bool,
) -> Map<String, Value> {
    let mut payload: Map<String, Value> = data
        .into_iter()
        .filter(|(name, value)| entity_type.property(name).is_some() && !value.is_null())
        .collect();
    types::coerce_write_properties(entity_type, &mut payload, legacy_dates);
    payload
}

fn function_param_literal(edm_type: &str, value: &Value) -> String {
    match (EdmType::from_edm(edm_type), value) {
        (EdmType::Bool, Value::Bool(b)) => b.to_string(),
        (_, Value::String(s)) => match EdmType::from_edm(edm_type) {
            // String-shaped function parameters are quoted OData literals.
            EdmType::String | EdmType::Guid | EdmType::DateTime | EdmType::DateTimeOffset
            | EdmType::Time | EdmType::Binary => format!("'{}'", s.replace('\'', "''")),
            _ => s.clone(),
        },
        (_, Value::Number(n)) => n.to_string(),
        (_, Value::Bool(b)) => b.to_string(),
        (_, other) => other.to_string(),
    }
}

fn parse_json_body(body: &str) -> Value {
    match serde_json::from_str(body) {
        Ok(value) => value,
        Err(_) => json!({
            "message": "Operation successful (non-JSON response received).",
            "content": body.chars().take(500).collect::<String>(),
        }),
    }
}

fn is_csrf_failure(headers: &HeaderMap, body: &str) -> bool {
    if headers
        .get("x-csrf-token")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("required"))
    {
        return true;
    }
    body.contains("CSRF token validation failed") || body.to_lowercase().contains("csrf")
}

/// Extract `(code, message)` from an upstream error body, trying the OData
/// v2 and v4 JSON shapes, SAP inner-error envelopes, then XML.
pub fn extract_error(body: &str) -> (Option<String>, String) {
    if body.trim().is_empty() {
        return (None, String::new());
    }

    if let Ok(data) = serde_json::from_str::<Value>(body) {
        let code = data
            .pointer("/error/code")
            .and_then(Value::as_str)
            .map(str::to_string);

        // OData v2: error.message.value
        if let Some(message) = data
            .pointer("/error/message/value")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
        {
            return (code, message.to_string());
        }
        // OData v4: error.message as a plain string
        if let Some(message) = data
            .pointer("/error/message")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
        {
            return (code, message.to_string());
        }
        // SAP inner error detail list
        if let Some(details) = data
            .pointer("/error/innererror/errordetails")
            .and_then(Value::as_array)
        {
            let messages: Vec<&str> = details
                .iter()
                .filter_map(|d| d.get("message").and_then(Value::as_str))
                .collect();
            if !messages.is_empty() {
                return (code, messages.join("; "));
            }
        }
        if let Some(message) = data
            .pointer("/error/innererror/message")
            .and_then(Value::as_str)
        {
            return (code, message.to_string());
        }
        // v4 details array
        if let Some(details) = data.pointer("/error/details").and_then(Value::as_array) {
            let messages: Vec<&str> = details
                .iter()
                .filter_map(|d| d.get("message").and_then(Value::as_str))
                .collect();
            if !messages.is_empty() {
                return (code, messages.join("; "));
            }
        }
        if let Some(error) = data.get("error") {
            return (code, error.to_string());
        }
        if let Some(message) = data.get("Message").and_then(Value::as_str) {
            return (None, message.to_string());
        }
        let rendered = data.to_string();
        return (None, rendered.chars().take(1000).collect());
    }

    // XML bodies: first <message> (or <error>) element text.
    if body.trim_start().starts_with('<') {
        for tag in ["message", "Message", "error", "Error"] {
            if let Some(text) = xml_element_text(body, tag) {
                return (None, text);
            }
        }
        return (None, "XML error response (details in response body)".to_string());
    }

    (None, body.trim().chars().take(500).collect())
}

fn xml_element_text(body: &str, tag: &str) -> Option<String> {
    let open = format!("<{}", tag);
    let close = format!("</{}>", tag);
    let start = body.find(&open)?;
    let content_start = body[start..].find('>').map(|i| start + i + 1)?;
    let end = body[content_start..].find(&close).map(|i| content_start + i)?;
    let text = body[content_start..end].trim();
    if text.is_empty() || text.contains('<') {
        None
    } else {
        Some(text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_string_empty_options_still_requests_json() {
        let q = QueryOptions::default();
        assert_eq!(q.to_query_string(), "?$format=json");
    }

    #[test]
    fn test_query_string_full() {
        let q = QueryOptions {
            filter: Some("Price gt 20".to_string()),
            select: Some("Name,Price".to_string()),
            orderby: Some("Price desc".to_string()),
            top: Some(2),
            count: true,
            ..QueryOptions::default()
        };
        let query = q.to_query_string();
        assert!(query.contains("$filter=Price%20gt%2020"));
        assert!(query.contains("$select=Name%2CPrice"));
        assert!(query.contains("$orderby=Price%20desc"));
        assert!(query.contains("$top=2"));
        assert!(query.contains("$inlinecount=allpages"));
        assert!(query.contains("$format=json"));
    }

    #[test]
    fn test_query_string_never_contains_plus() {
        let q = QueryOptions {
            filter: Some("Name eq 'a + b' and Qty gt 1".to_string()),
            search: Some("one two+three".to_string()),
            ..QueryOptions::default()
        };
        let query = q.to_query_string();
        assert!(!query.contains('+'), "query was: {}", query);
        assert!(query.contains("%20"));
    }

    #[test]
    fn test_default_select_excludes_binary() {
        let mut et = EntityType::minimal("T");
        et.properties = vec![
            {
                let mut p = crate::odata::metadata::EntityProperty::new("Id", "Edm.Binary");
                p.max_length = Some(16);
                p
            },
            crate::odata::metadata::EntityProperty::new("Name", "Edm.String"),
            crate::odata::metadata::EntityProperty::new("Qty", "Edm.Int32"),
        ];
        assert_eq!(default_select(&et).unwrap(), "Name,Qty");
    }

    #[test]
    fn test_default_select_skipped_for_minimal_shell() {
        let et = EntityType::minimal("T");
        assert!(default_select(&et).is_none());
    }

    #[test]
    fn test_default_select_skipped_when_nothing_binary() {
        let mut et = EntityType::minimal("T");
        et.properties = vec![
            crate::odata::metadata::EntityProperty::new("Name", "Edm.String"),
            crate::odata::metadata::EntityProperty::new("Qty", "Edm.Int32"),
        ];
        assert!(default_select(&et).is_none());
    }

    #[test]
    fn test_extract_error_odata_v2() {
        let body = r#"{"error": {"code": "SY/530", "message": {"lang": "en", "value": "Order not found"}}}"#;
        let (code, message) = extract_error(body);
        assert_eq!(code.as_deref(), Some("SY/530"));
        assert_eq!(message, "Order not found");
    }

    #[test]
    fn test_extract_error_odata_v4() {
        let body = r#"{"error": {"code": "400", "message": "Bad filter"}}"#;
        let (code, message) = extract_error(body);
        assert_eq!(code.as_deref(), Some("400"));
        assert_eq!(message, "Bad filter");
    }

    #[test]
    fn test_extract_error_sap_errordetails() {
        let body = r#"{"error": {"code": "X", "message": {"value": ""},
            "innererror": {"errordetails": [
                {"code": "A", "message": "First problem"},
                {"code": "B", "message": "Second problem"}]}}}"#;
        let (code, message) = extract_error(body);
        assert_eq!(code.as_deref(), Some("X"));
        assert_eq!(message, "First problem; Second problem");
    }

    #[test]
    fn test_extract_error_xml() {
        let body = r#"<?xml version="1.0"?><error xmlns="x"><code>ERR</code><message xml:lang="en">It broke</message></error>"#;
        let (_, message) = extract_error(body);
        assert_eq!(message, "It broke");
    }

    #[test]
    fn test_extract_error_plain_text() {
        let (_, message) = extract_error("Service Unavailable");
        assert_eq!(message, "Service Unavailable");
    }

    #[test]
    fn test_csrf_failure_detection() {
        let mut headers = HeaderMap::new();
        assert!(is_csrf_failure(
            &headers,
            "CSRF token validation failed"
        ));
        assert!(!is_csrf_failure(&headers, "plain forbidden"));
        headers.insert("x-csrf-token", "Required".parse().unwrap());
        assert!(is_csrf_failure(&headers, ""));
    }

    #[test]
    fn test_function_param_literals() {
        assert_eq!(
            function_param_literal("Edm.String", &json!("O'Brien")),
            "'O''Brien'"
        );
        assert_eq!(function_param_literal("Edm.Int32", &json!(42)), "42");
        assert_eq!(function_param_literal("Edm.Boolean", &json!(true)), "true");
    }

    #[test]
    fn test_prepare_payload_filters_and_coerces() {
        let mut et = EntityType::minimal("T");
        et.properties = vec![
            crate::odata::metadata::EntityProperty::new("Name", "Edm.String"),
            crate::odata::metadata::EntityProperty::new("Price", "Edm.Decimal"),
        ];
        let mut data = Map::new();
        data.insert("Name".to_string(), json!("Widget"));
        data.insert("Price".to_string(), json!(9.5));
        data.insert("NotDeclared".to_string(), json!("dropped"));
        data.insert("Null".to_string(), Value::Null);

        let payload = prepare_payload(&et, data, true);
        assert_eq!(payload.len(), 2);
        assert_eq!(payload["Price"], json!("9.5"));
        assert!(!payload.contains_key("NotDeclared"));
    }
}
