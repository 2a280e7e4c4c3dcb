//! OData MCP bridge binary
//!
//! Command surface, environment fallbacks, and startup wiring: metadata
//! load, tool projection, and transport selection.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use odata_mcp::auth::Auth;
use odata_mcp::hints::HintManager;
use odata_mcp::mcp::{project_tools, BridgeHandler, McpServer, ProjectorOptions, ToolNamer};
use odata_mcp::odata::{
    build_http_client, ClientOptions, MetadataLoader, NormalizeOptions, ODataClient,
    ServiceMetadata,
};
use odata_mcp::transport::{is_localhost_addr, HttpTransport, StdioTransport, Transport};

#[derive(Debug, Parser)]
#[command(
    name = "odata-mcp",
    version,
    about = "Model Context Protocol bridge for OData v2 services"
)]
struct Args {
    /// URL of the OData service (overrides the positional argument and
    /// ODATA_SERVICE_URL / ODATA_URL).
    #[arg(long = "service")]
    service: Option<String>,

    /// URL of the OData service (positional alternative).
    #[arg(value_name = "SERVICE_URL")]
    service_pos: Option<String>,

    /// Username for basic authentication (overrides ODATA_USERNAME / ODATA_USER).
    #[arg(short = 'u', long, conflicts_with_all = ["cookie_file", "cookie_string"])]
    user: Option<String>,

    /// Password for basic authentication (overrides ODATA_PASSWORD / ODATA_PASS).
    #[arg(short = 'p', long)]
    password: Option<String>,

    /// Path to a cookie file in Netscape format.
    #[arg(long, conflicts_with = "cookie_string")]
    cookie_file: Option<PathBuf>,

    /// Cookie string (key1=val1; key2=val2).
    #[arg(long)]
    cookie_string: Option<String>,

    /// Enable verbose output on stderr.
    #[arg(short, long, alias = "debug")]
    verbose: bool,

    /// Initialize, print the tool table, and exit.
    #[arg(long)]
    trace: bool,

    /// Append all MCP protocol messages to a trace file in the temp directory.
    #[arg(long)]
    trace_mcp: bool,

    /// Custom prefix for tool names (use with --no-postfix).
    #[arg(long)]
    tool_prefix: Option<String>,

    /// Custom postfix for tool names (default: _for_<service_id>).
    #[arg(long)]
    tool_postfix: Option<String>,

    /// Use prefix instead of postfix naming.
    #[arg(long)]
    no_postfix: bool,

    /// Shorten long tool names deterministically.
    #[arg(long)]
    tool_shrink: bool,

    /// Comma-separated entity allowlist; supports * and ? wildcards.
    #[arg(long)]
    entities: Option<String>,

    /// Comma-separated function-import allowlist; supports * and ? wildcards.
    #[arg(long)]
    functions: Option<String>,

    /// Sort tools alphabetically (default).
    #[arg(long, conflicts_with = "no_sort_tools")]
    sort_tools: bool,

    /// Keep tools in projection order.
    #[arg(long)]
    no_sort_tools: bool,

    /// Attach suggested_next_call blocks when more items exist.
    #[arg(long)]
    pagination_hints: bool,

    /// Convert legacy /Date(ms)/ values to ISO-8601 (default).
    #[arg(long, conflicts_with = "no_legacy_dates")]
    legacy_dates: bool,

    /// Leave legacy date values untouched.
    #[arg(long)]
    no_legacy_dates: bool,

    /// Include request context in upstream error messages.
    #[arg(long)]
    verbose_errors: bool,

    /// Keep __metadata blocks in responses.
    #[arg(long)]
    response_metadata: bool,

    /// Maximum response size in bytes before the summary form is returned.
    #[arg(long, default_value_t = 5 * 1024 * 1024)]
    max_response_size: usize,

    /// Maximum items returned per response.
    #[arg(long, default_value_t = 100)]
    max_items: usize,

    /// Hide all modifying operations (create, update, delete, functions).
    #[arg(long, alias = "ro", conflicts_with = "read_only_but_functions")]
    read_only: bool,

    /// Hide create/update/delete but keep function imports.
    #[arg(long, alias = "robf")]
    read_only_but_functions: bool,

    /// Enable only these operation codes (C, S, F, G, U, D, A; R = S+F+G).
    #[arg(long, conflicts_with = "disable")]
    enable: Option<String>,

    /// Disable these operation codes (C, S, F, G, U, D, A).
    #[arg(long)]
    disable: Option<String>,

    /// Path to a hints JSON file (default: hints.json next to the binary or CWD).
    #[arg(long)]
    hints_file: Option<PathBuf>,

    /// Direct hint JSON or plain text merged into the info tool output.
    #[arg(long)]
    hint: Option<String>,

    /// Custom name for the service info tool.
    #[arg(long)]
    info_tool_name: Option<String>,

    /// Transport: stdio or http ("sse" is accepted as an alias for http).
    #[arg(long, default_value = "stdio", value_parser = ["stdio", "http", "sse"])]
    transport: String,

    /// HTTP bind address for the http transport.
    #[arg(long, default_value = "localhost:8080")]
    http_addr: String,

    /// Allow the unauthenticated HTTP transport to bind beyond localhost.
    #[arg(long = "i-am-security-expert-i-know-what-i-am-doing")]
    allow_remote_bind: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // stdout belongs to the protocol; all diagnostics go to stderr.
    let default_level = if args.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let service_url = resolve_service_url(&args)?;
    let auth = resolve_auth(&args)?;
    tracing::info!("Service: {} (auth: {})", service_url, auth.describe());

    let enabled_ops = args
        .enable
        .as_deref()
        .map(|codes| parse_operation_codes(codes, true))
        .transpose()?;
    let disabled_ops = args
        .disable
        .as_deref()
        .map(|codes| parse_operation_codes(codes, false))
        .transpose()?;

    // Affirmative flags restate the defaults; the no-* variants turn them off.
    let sort_tools = args.sort_tools || !args.no_sort_tools;
    let legacy_dates = args.legacy_dates || !args.no_legacy_dates;

    let use_http = matches!(args.transport.as_str(), "http" | "sse");
    if use_http && !is_localhost_addr(&args.http_addr) {
        if !args.allow_remote_bind {
            eprintln!("ERROR: the HTTP transport carries no authentication.");
            eprintln!(
                "Refusing to bind '{}'; use localhost, or pass \
                 --i-am-security-expert-i-know-what-i-am-doing to override.",
                args.http_addr
            );
            std::process::exit(2);
        }
        tracing::warn!(
            "Binding unauthenticated HTTP transport to non-localhost address {}",
            args.http_addr
        );
    }

    // Shared HTTP session for metadata and all tool calls.
    let http = build_http_client(&auth, &service_url)?;

    let loader = MetadataLoader::new(http.clone(), auth.clone(), &service_url);
    let metadata = Arc::new(
        loader
            .load()
            .await
            .context("failed to load service metadata")?,
    );

    let mut hint_manager = HintManager::new();
    hint_manager.load_file(args.hints_file.as_deref());
    if let Some(path) = &hint_manager.hints_file {
        tracing::info!("Hints loaded from {:?}", path);
    }
    if let Some(hint) = &args.hint {
        hint_manager.set_cli_hint(hint);
    }
    let hints = hint_manager.hints_for(&service_url);

    let namer = ToolNamer::new(
        &service_url,
        args.tool_prefix.as_deref(),
        args.tool_postfix.as_deref(),
        !args.no_postfix,
        args.tool_shrink,
    );
    let projector_options = ProjectorOptions {
        read_only: args.read_only,
        read_only_but_functions: args.read_only_but_functions,
        enabled_ops,
        disabled_ops,
        allowed_entities: args.entities.as_deref().map(parse_name_list),
        allowed_functions: args.functions.as_deref().map(parse_name_list),
        info_tool_name: args.info_tool_name.clone(),
    };
    let tools = project_tools(&metadata, &namer, &projector_options);
    tracing::info!("Projected {} tools", tools.len());

    let client_options = ClientOptions {
        verbose_errors: args.verbose_errors,
        normalize: NormalizeOptions {
            legacy_dates,
            response_metadata: args.response_metadata,
            pagination_hints: args.pagination_hints,
            max_items: args.max_items,
            max_response_size: args.max_response_size,
        },
    };
    let client = Arc::new(ODataClient::new(
        http,
        Arc::clone(&metadata),
        auth,
        client_options,
    ));
    let handler = BridgeHandler::new(client, Arc::clone(&metadata), hints, &tools);

    let trace_mcp_path = args
        .trace_mcp
        .then(|| std::env::temp_dir().join("odata-mcp-trace.log"));
    let server = McpServer::new(tools, handler, sort_tools, trace_mcp_path);

    if args.trace {
        print_trace(&server, &metadata, &args, &service_url);
        return Ok(());
    }

    let server = Arc::new(server);
    let transport: Box<dyn Transport> = if use_http {
        Box::new(HttpTransport::new(args.http_addr.clone()))
    } else {
        Box::new(StdioTransport::new())
    };
    transport.serve(server).await?;
    Ok(())
}

/// Flag > positional > environment.
fn resolve_service_url(args: &Args) -> anyhow::Result<String> {
    if let Some(url) = args.service.clone().or_else(|| args.service_pos.clone()) {
        return Ok(url);
    }
    for var in ["ODATA_SERVICE_URL", "ODATA_URL"] {
        if let Ok(url) = std::env::var(var) {
            if !url.is_empty() {
                return Ok(url);
            }
        }
    }
    bail!(
        "OData service URL not provided; pass --service, a positional URL, \
         or set ODATA_SERVICE_URL"
    );
}

/// Cookie material beats basic credentials; CLI beats environment.
fn resolve_auth(args: &Args) -> anyhow::Result<Auth> {
    if let Some(path) = &args.cookie_file {
        return Auth::from_cookie_file(path).context("cookie file authentication failed");
    }
    if let Some(raw) = &args.cookie_string {
        return Auth::from_cookie_string(raw).context("cookie string authentication failed");
    }
    if let Ok(path) = std::env::var("ODATA_COOKIE_FILE") {
        if !path.is_empty() {
            return Auth::from_cookie_file(&path).context("ODATA_COOKIE_FILE failed");
        }
    }
    if let Ok(raw) = std::env::var("ODATA_COOKIE_STRING") {
        if !raw.is_empty() {
            return Auth::from_cookie_string(&raw).context("ODATA_COOKIE_STRING failed");
        }
    }

    let env_user = ["ODATA_USERNAME", "ODATA_USER"]
        .iter()
        .find_map(|var| std::env::var(var).ok().filter(|v| !v.is_empty()));
    let env_pass = ["ODATA_PASSWORD", "ODATA_PASS"]
        .iter()
        .find_map(|var| std::env::var(var).ok().filter(|v| !v.is_empty()));

    let username = args.user.clone().or(env_user);
    let password = args.password.clone().or(env_pass);
    match (username, password) {
        (Some(username), Some(password)) => Ok(Auth::Basic { username, password }),
        (Some(_), None) => bail!("username given without a password"),
        _ => Ok(Auth::None),
    }
}

fn parse_name_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse `--enable`/`--disable` code strings. `R` expands to S, F, G and is
/// only meaningful for `--enable`.
fn parse_operation_codes(raw: &str, allow_read_expansion: bool) -> anyhow::Result<BTreeSet<char>> {
    let mut codes = BTreeSet::new();
    for c in raw.chars() {
        if c.is_whitespace() || c == ',' {
            continue;
        }
        let code = c.to_ascii_uppercase();
        match code {
            'C' | 'S' | 'F' | 'G' | 'U' | 'D' | 'A' => {
                codes.insert(code);
            }
            'R' if allow_read_expansion => {
                codes.extend(['S', 'F', 'G']);
            }
            _ => bail!(
                "invalid operation code '{}'; valid codes are C, S, F, G, U, D, A{}",
                c,
                if allow_read_expansion { ", R" } else { "" }
            ),
        }
    }
    if codes.is_empty() {
        bail!("no operation codes given");
    }
    Ok(codes)
}

/// `--trace`: dump configuration and the full tool table, then exit.
fn print_trace(server: &McpServer, metadata: &ServiceMetadata, args: &Args, service_url: &str) {
    println!("OData MCP bridge trace");
    println!("======================");
    println!("Service URL:      {}", service_url);
    println!("Transport:        {}", args.transport);
    println!(
        "Tool naming:      {}",
        if args.no_postfix { "prefix" } else { "postfix" }
    );
    println!("Tool shrink:      {}", args.tool_shrink);
    println!("Sort tools:       {}", !args.no_sort_tools);
    println!("Legacy dates:     {}", !args.no_legacy_dates);
    println!("Pagination hints: {}", args.pagination_hints);
    println!("Max items:        {}", args.max_items);
    println!("Max response:     {} bytes", args.max_response_size);
    if args.read_only {
        println!("Mode:             read-only");
    } else if args.read_only_but_functions {
        println!("Mode:             read-only + functions");
    }
    println!();
    println!(
        "Metadata: {} entity types, {} entity sets, {} function imports",
        metadata.entity_types.len(),
        metadata.entity_sets.len(),
        metadata.function_imports.len()
    );
    println!();
    println!("Tools ({}):", server.tools().len());
    for tool in server.tools() {
        println!("  {}", tool.name);
        println!("    {}", tool.description);
        for param in &tool.params {
            println!(
                "    - {} ({}, {}): {}",
                param.name,
                param.json_type,
                if param.required { "required" } else { "optional" },
                param.description
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_operation_codes() {
        let codes = parse_operation_codes("cud", false).unwrap();
        assert_eq!(codes, ['C', 'D', 'U'].into_iter().collect());

        let codes = parse_operation_codes("R", true).unwrap();
        assert_eq!(codes, ['F', 'G', 'S'].into_iter().collect());

        assert!(parse_operation_codes("X", false).is_err());
        assert!(parse_operation_codes("R", false).is_err());
        assert!(parse_operation_codes("", false).is_err());
    }

    #[test]
    fn test_parse_name_list() {
        assert_eq!(
            parse_name_list("Products, Orders , "),
            vec!["Products", "Orders"]
        );
        assert_eq!(parse_name_list("Prod*"), vec!["Prod*"]);
    }

    #[test]
    fn test_args_parse_defaults() {
        let args = Args::parse_from(["odata-mcp", "https://example.com/odata/Svc/"]);
        assert_eq!(args.service_pos.as_deref(), Some("https://example.com/odata/Svc/"));
        assert_eq!(args.transport, "stdio");
        assert_eq!(args.http_addr, "localhost:8080");
        assert_eq!(args.max_items, 100);
        assert_eq!(args.max_response_size, 5 * 1024 * 1024);
        assert!(!args.no_sort_tools);
        assert!(!args.read_only);
    }

    #[test]
    fn test_args_mutual_exclusions() {
        assert!(Args::try_parse_from([
            "odata-mcp",
            "--read-only",
            "--read-only-but-functions",
            "url"
        ])
        .is_err());
        assert!(Args::try_parse_from([
            "odata-mcp",
            "--enable",
            "R",
            "--disable",
            "C",
            "url"
        ])
        .is_err());
        assert!(Args::try_parse_from([
            "odata-mcp",
            "--user",
            "u",
            "--cookie-string",
            "a=b",
            "url"
        ])
        .is_err());
    }
}
