//! End-to-end flow over the dispatcher: EDMX metadata in, tool table and
//! JSON-RPC behavior out. No network traffic: every call either stops at
//! validation or reads the projected catalog.

use std::sync::Arc;

use serde_json::{json, Value};

use odata_mcp::auth::Auth;
use odata_mcp::mcp::{
    project_tools, BridgeHandler, JsonRpcRequest, McpServer, ProjectorOptions, ToolNamer,
};
use odata_mcp::odata::{build_http_client, parser, ClientOptions, ODataClient};

const NORTHWIND_EDMX: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<edmx:Edmx Version="1.0" xmlns:edmx="http://schemas.microsoft.com/ado/2007/06/edmx"
           xmlns:m="http://schemas.microsoft.com/ado/2007/08/dataservices/metadata"
           xmlns:sap="http://www.sap.com/Protocols/SAPData">
  <edmx:DataServices m:DataServiceVersion="2.0">
    <Schema Namespace="NorthwindModel" xmlns="http://schemas.microsoft.com/ado/2008/09/edm">
      <EntityType Name="Product">
        <Key><PropertyRef Name="ProductID"/></Key>
        <Property Name="ProductID" Type="Edm.Int32" Nullable="false"/>
        <Property Name="ProductName" Type="Edm.String" Nullable="false" MaxLength="40"/>
        <Property Name="Price" Type="Edm.Decimal"/>
        <Property Name="Discontinued" Type="Edm.Boolean"/>
      </EntityType>
      <EntityType Name="OrderDetail">
        <Key>
          <PropertyRef Name="OrderID"/>
          <PropertyRef Name="ProductID"/>
          <PropertyRef Name="Line"/>
        </Key>
        <Property Name="OrderID" Type="Edm.Int32" Nullable="false"/>
        <Property Name="ProductID" Type="Edm.Int32" Nullable="false"/>
        <Property Name="Line" Type="Edm.String" Nullable="false"/>
        <Property Name="Quantity" Type="Edm.Int16"/>
      </EntityType>
      <EntityContainer Name="NorthwindEntities" m:IsDefaultEntityContainer="true">
        <EntitySet Name="Products" EntityType="NorthwindModel.Product"/>
        <EntitySet Name="Order_Details" EntityType="NorthwindModel.OrderDetail"
                   sap:creatable="false" sap:updatable="false" sap:deletable="false"/>
        <FunctionImport Name="TopSellers" ReturnType="Collection(NorthwindModel.Product)"
                        m:HttpMethod="GET">
          <Parameter Name="Count" Type="Edm.Int32" Nullable="false"/>
        </FunctionImport>
      </EntityContainer>
    </Schema>
  </edmx:DataServices>
</edmx:Edmx>"#;

const SERVICE_URL: &str = "https://services.odata.org/V2/Northwind/Northwind.svc";

fn build_server(opts: ProjectorOptions) -> McpServer {
    let metadata = Arc::new(parser::parse_edmx(NORTHWIND_EDMX, SERVICE_URL).unwrap());
    let namer = ToolNamer::new(SERVICE_URL, None, None, true, false);
    let tools = project_tools(&metadata, &namer, &opts);

    let http = build_http_client(&Auth::None, SERVICE_URL).unwrap();
    let client = Arc::new(ODataClient::new(
        http,
        Arc::clone(&metadata),
        Auth::None,
        ClientOptions::default(),
    ));
    let handler = BridgeHandler::new(client, metadata, None, &tools);
    McpServer::new(tools, handler, true, None)
}

fn request(method: &str, params: Value) -> JsonRpcRequest {
    serde_json::from_value(json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": method,
        "params": params,
    }))
    .unwrap()
}

async fn list_tool_names(server: &McpServer) -> Vec<String> {
    let response = server
        .handle(request("tools/list", json!(null)))
        .await
        .unwrap();
    response.result.unwrap()["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn initialize_reports_server_info() {
    let server = build_server(ProjectorOptions::default());
    let response = server
        .handle(request("initialize", json!({})))
        .await
        .unwrap();
    let result = response.result.unwrap();
    assert_eq!(result["protocolVersion"], "2024-11-05");
    assert_eq!(result["serverInfo"]["name"], "odata-mcp");
}

#[tokio::test]
async fn tools_list_is_alphabetical_and_service_qualified() {
    let server = build_server(ProjectorOptions::default());
    let names = list_tool_names(&server).await;

    assert!(names.contains(&"filter_Products_for_Northwind_svc".to_string()));
    assert!(names.contains(&"get_Order_Details_for_Northwind_svc".to_string()));
    assert!(names.contains(&"TopSellers_for_Northwind_svc".to_string()));
    assert!(names.contains(&"readme".to_string()));

    let mut sorted = names.clone();
    sorted.sort();
    assert_eq!(names, sorted, "tool table must be deterministically ordered");
}

#[tokio::test]
async fn capability_flags_gate_write_tools() {
    let server = build_server(ProjectorOptions::default());
    let names = list_tool_names(&server).await;

    assert!(names.contains(&"create_Products_for_Northwind_svc".to_string()));
    assert!(!names.contains(&"create_Order_Details_for_Northwind_svc".to_string()));
    assert!(!names.contains(&"update_Order_Details_for_Northwind_svc".to_string()));
    assert!(!names.contains(&"delete_Order_Details_for_Northwind_svc".to_string()));
}

#[tokio::test]
async fn read_only_hides_every_modifying_tool() {
    let server = build_server(ProjectorOptions {
        read_only: true,
        ..ProjectorOptions::default()
    });
    let names = list_tool_names(&server).await;

    for name in &names {
        assert!(
            !name.starts_with("create_")
                && !name.starts_with("update_")
                && !name.starts_with("delete_")
                && !name.starts_with("TopSellers"),
            "modifying tool registered in read-only mode: {}",
            name
        );
    }
    assert!(names.iter().any(|n| n.starts_with("filter_Products")));
}

#[tokio::test]
async fn composite_key_get_requires_all_three_keys() {
    let server = build_server(ProjectorOptions::default());
    let response = server
        .handle(request(
            "tools/call",
            json!({
                "name": "get_Order_Details_for_Northwind_svc",
                "arguments": {"OrderID": 10248}
            }),
        ))
        .await
        .unwrap();
    let error = response.error.expect("missing keys must be rejected");
    assert_eq!(error.code, -32602);
    assert!(error.message.contains("ProductID"));
    assert!(error.message.contains("Line"));
}

#[tokio::test]
async fn unknown_tool_and_unknown_argument_are_rejected() {
    let server = build_server(ProjectorOptions::default());

    let response = server
        .handle(request(
            "tools/call",
            json!({"name": "no_such_tool", "arguments": {}}),
        ))
        .await
        .unwrap();
    assert_eq!(response.error.unwrap().code, -32602);

    let response = server
        .handle(request(
            "tools/call",
            json!({
                "name": "count_Products_for_Northwind_svc",
                "arguments": {"bogus": 1}
            }),
        ))
        .await
        .unwrap();
    let error = response.error.unwrap();
    assert_eq!(error.code, -32602);
    assert!(error.message.contains("bogus"));
}

#[tokio::test]
async fn type_mismatch_is_rejected_before_any_request() {
    let server = build_server(ProjectorOptions::default());
    let response = server
        .handle(request(
            "tools/call",
            json!({
                "name": "filter_Products_for_Northwind_svc",
                "arguments": {"top": "two"}
            }),
        ))
        .await
        .unwrap();
    let error = response.error.unwrap();
    assert_eq!(error.code, -32602);
    assert!(error.message.contains("integer"));
}

#[tokio::test]
async fn function_import_parameters_follow_nullability() {
    let server = build_server(ProjectorOptions::default());
    let response = server
        .handle(request("tools/list", json!(null)))
        .await
        .unwrap();
    let tools = response.result.unwrap()["tools"].clone();
    let top_sellers = tools
        .as_array()
        .unwrap()
        .iter()
        .find(|t| t["name"] == "TopSellers_for_Northwind_svc")
        .unwrap()
        .clone();
    assert_eq!(top_sellers["inputSchema"]["required"], json!(["Count"]));
    assert_eq!(
        top_sellers["inputSchema"]["properties"]["Count"]["type"],
        "integer"
    );
}

#[tokio::test]
async fn zero_entity_sets_still_serves_info_tools() {
    let empty = r#"<edmx:Edmx xmlns:edmx="e"><Schema Namespace="NS">
        <EntityContainer Name="C"/></Schema></edmx:Edmx>"#;
    let metadata = Arc::new(parser::parse_edmx(empty, "https://host/odata/Empty").unwrap());
    let namer = ToolNamer::new("https://host/odata/Empty", None, None, true, false);
    let tools = project_tools(&metadata, &namer, &ProjectorOptions::default());

    let http = build_http_client(&Auth::None, "https://host/odata/Empty").unwrap();
    let client = Arc::new(ODataClient::new(
        http,
        Arc::clone(&metadata),
        Auth::None,
        ClientOptions::default(),
    ));
    let handler = BridgeHandler::new(client, metadata, None, &tools);
    let server = McpServer::new(tools, handler, true, None);

    let names = list_tool_names(&server).await;
    assert_eq!(names.len(), 2);
    assert!(names.contains(&"odata_service_info_for_Empty".to_string()));
    assert!(names.contains(&"readme".to_string()));
}

#[tokio::test]
async fn notifications_get_no_response() {
    let server = build_server(ProjectorOptions::default());
    let notification: JsonRpcRequest =
        serde_json::from_value(json!({"jsonrpc": "2.0", "method": "initialized"})).unwrap();
    assert!(server.handle(notification).await.is_none());
}

#[tokio::test]
async fn service_info_tool_reports_catalog() {
    let server = build_server(ProjectorOptions::default());
    let response = server
        .handle(request(
            "tools/call",
            json!({"name": "readme", "arguments": {}}),
        ))
        .await
        .unwrap();
    let result = response.result.unwrap();
    let text = result["content"][0]["text"].as_str().unwrap();
    let info: Value = serde_json::from_str(text).unwrap();

    assert_eq!(info["service_url"], SERVICE_URL);
    assert!(info["entity_sets"]["Products"]["creatable"].as_bool().unwrap());
    assert!(!info["entity_sets"]["Order_Details"]["creatable"].as_bool().unwrap());
    assert!(info["registered_entity_tools"]["Products"]
        .as_array()
        .unwrap()
        .iter()
        .any(|n| n == "filter_Products_for_Northwind_svc"));
}
