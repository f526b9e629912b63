//! MCP Server Implementation
//!
//! Dispatches JSON-RPC requests to the memory service.

use super::protocol::*;
use super::tools::{self, get_all_tools};
use super::transport::{Inbound, LineTransport};
use crate::error::ServerError;
use crate::handlers::{AddMemoryParams, GetEpisodesRequest, SearchRequest, UpdateEpisodeRequest};
use crate::memory::MemoryService;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncWrite};

pub const PROTOCOL_VERSION: &str = "2024-11-05";
const SERVER_NAME: &str = "engram";
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// How a tool call failed
enum ToolFailure {
    /// Reported as a JSON-RPC error
    Protocol(JsonRpcError),
    /// Reported as a tool result with `isError`
    Tool(String),
}

impl From<ServerError> for ToolFailure {
    fn from(err: ServerError) -> Self {
        match err.kind() {
            engram_store::ErrorKind::InvalidArgument => Self::Protocol(err.into()),
            _ => {
                tracing::warn!(error = %err, "Tool call failed");
                Self::Tool(err.public_message())
            }
        }
    }
}

#[derive(Deserialize)]
struct UpdateEpisodeArgs {
    #[serde(default)]
    id: String,
    #[serde(flatten)]
    update: UpdateEpisodeRequest,
}

/// MCP Server - handles protocol messages
pub struct McpServer {
    service: MemoryService,
    /// Set once the client has sent `initialize`; tool calls wait for it
    initialized: bool,
}

impl McpServer {
    pub fn new(service: MemoryService) -> Self {
        Self {
            service,
            initialized: false,
        }
    }

    /// Serve stdin/stdout until the client disconnects
    pub async fn run(&mut self) -> std::io::Result<()> {
        tracing::info!("MCP server listening on stdio");
        self.serve(LineTransport::stdio()).await
    }

    pub async fn serve<R, W>(&mut self, mut transport: LineTransport<R, W>) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        while let Some(message) = transport.read_message().await? {
            let response = match message {
                Inbound::Blank => continue,
                Inbound::Malformed(reason) => Some(JsonRpcResponse::error(
                    None,
                    JsonRpcError::parse_error(format!("Parse error: {reason}")),
                )),
                Inbound::Request(request) => self.handle_request(request).await,
            };
            if let Some(response) = response {
                transport.write_response(&response).await?;
            }
        }
        tracing::info!("Client disconnected");
        Ok(())
    }

    /// Handle one message; notifications produce no response
    pub async fn handle_request(&mut self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        tracing::debug!("Handling request: {}", request.method);

        if request.is_notification() {
            return None;
        }

        let id = request.id;
        let response = match request.method.as_str() {
            "initialize" => self.handle_initialize(id, request.params),
            "ping" => JsonRpcResponse::success(id, json!({})),
            "tools/list" => JsonRpcResponse::from_result(
                id,
                &ToolsListResult {
                    tools: get_all_tools(),
                },
            ),
            "tools/call" if !self.initialized => JsonRpcResponse::error(
                id,
                JsonRpcError::invalid_request("Server not initialized"),
            ),
            "tools/call" => self.handle_tools_call(id, request.params).await,
            other => JsonRpcResponse::error(id, JsonRpcError::method_not_found(other)),
        };
        Some(response)
    }

    fn handle_initialize(&mut self, id: Option<Value>, params: Option<Value>) -> JsonRpcResponse {
        let params: InitializeParams = params
            .and_then(|p| serde_json::from_value(p).ok())
            .unwrap_or_default();
        if let Some(client) = &params.client_info {
            tracing::info!(
                client = %client.name,
                version = client.version.as_deref().unwrap_or("unknown"),
                "MCP client connected"
            );
        }

        self.initialized = true;

        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: ToolsCapability::default(),
            },
            server_info: ServerInfo {
                name: SERVER_NAME.to_string(),
                version: SERVER_VERSION.to_string(),
            },
        };
        JsonRpcResponse::from_result(id, &result)
    }

    async fn handle_tools_call(&self, id: Option<Value>, params: Option<Value>) -> JsonRpcResponse {
        let params: ToolCallParams = match params.map(serde_json::from_value) {
            Some(Ok(p)) => p,
            Some(Err(e)) => {
                return JsonRpcResponse::error(
                    id,
                    JsonRpcError::invalid_params(format!("Invalid params: {e}")),
                )
            }
            None => return JsonRpcResponse::error(id, JsonRpcError::invalid_params("Missing params")),
        };

        match self.execute_tool(&params.name, params.arguments).await {
            Ok(result) => {
                let text =
                    serde_json::to_string_pretty(&result).unwrap_or_else(|_| result.to_string());
                JsonRpcResponse::from_result(id, &ToolCallResult::text(text))
            }
            Err(ToolFailure::Tool(message)) => {
                JsonRpcResponse::from_result(id, &ToolCallResult::failure(message))
            }
            Err(ToolFailure::Protocol(error)) => JsonRpcResponse::error(id, error),
        }
    }

    async fn execute_tool(&self, name: &str, args: Option<Value>) -> Result<Value, ToolFailure> {
        let args = args.unwrap_or_else(|| json!({}));

        match name {
            tools::ADD_MEMORY => {
                let params: AddMemoryParams = parse_args(args)?;
                let added = self.service.add_memory(params).await?;
                Ok(json!({
                    "success": true,
                    "id": added.episode.id,
                    "message": "Episode stored successfully",
                    "embedded": added.embedded,
                }))
            }
            tools::SEARCH => {
                let request: SearchRequest = parse_args(args)?;
                to_json(self.service.search(request).await?)
            }
            tools::GET_EPISODES => {
                let request: GetEpisodesRequest = parse_args(args)?;
                to_json(self.service.get_episodes(request).await?)
            }
            tools::UPDATE_EPISODE => {
                let args: UpdateEpisodeArgs = parse_args(args)?;
                self.service.update_episode(&args.id, args.update).await?;
                Ok(json!({
                    "success": true,
                    "message": "Episode updated successfully",
                }))
            }
            tools::GET_STATUS => to_json(self.service.status().await),
            other => Err(ToolFailure::Protocol(JsonRpcError::invalid_params(format!(
                "Unknown tool: {other}"
            )))),
        }
    }
}

fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T, ToolFailure> {
    serde_json::from_value(args).map_err(|e| {
        ToolFailure::Protocol(JsonRpcError::invalid_params(format!(
            "invalid parameters: {e}"
        )))
    })
}

fn to_json<T: serde::Serialize>(value: T) -> Result<Value, ToolFailure> {
    serde_json::to_value(value).map_err(|e| ToolFailure::Tool(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::testing::service;
    use tempfile::TempDir;

    fn request(id: i64, method: &str, params: Value) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: "2.0".into(),
            id: Some(json!(id)),
            method: method.into(),
            params: Some(params),
        }
    }

    fn call(id: i64, tool: &str, arguments: Value) -> JsonRpcRequest {
        request(id, "tools/call", json!({ "name": tool, "arguments": arguments }))
    }

    async fn initialized(dir: &TempDir, available: bool) -> McpServer {
        let mut server = McpServer::new(service(dir, available));
        server
            .handle_request(request(0, "initialize", json!({})))
            .await
            .unwrap();
        server
    }

    fn tool_text(response: &JsonRpcResponse) -> Value {
        let result = response.result.as_ref().expect("tool result");
        let text = result["content"][0]["text"].as_str().unwrap();
        serde_json::from_str(text).unwrap()
    }

    #[tokio::test]
    async fn test_initialize_and_list_tools() {
        let dir = TempDir::new().unwrap();
        let mut server = McpServer::new(service(&dir, true));

        let response = server
            .handle_request(request(1, "initialize", json!({"clientInfo": {"name": "test"}})))
            .await
            .unwrap();
        let result = response.result.unwrap();
        assert_eq!(result["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(result["serverInfo"]["name"], "engram");

        let response = server
            .handle_request(request(2, "tools/list", Value::Null))
            .await
            .unwrap();
        let tools = response.result.unwrap()["tools"].as_array().unwrap().len();
        assert_eq!(tools, 5);
    }

    #[tokio::test]
    async fn test_notifications_get_no_response() {
        let dir = TempDir::new().unwrap();
        let mut server = McpServer::new(service(&dir, true));

        let note = JsonRpcRequest {
            jsonrpc: "2.0".into(),
            id: None,
            method: "notifications/initialized".into(),
            params: None,
        };
        assert!(server.handle_request(note).await.is_none());
    }

    #[tokio::test]
    async fn test_tool_call_requires_initialize() {
        let dir = TempDir::new().unwrap();
        let mut server = McpServer::new(service(&dir, true));

        let response = server
            .handle_request(call(1, tools::GET_STATUS, json!({})))
            .await
            .unwrap();
        assert_eq!(response.error.unwrap().code, JsonRpcError::INVALID_REQUEST);

        server
            .handle_request(request(2, "initialize", json!({})))
            .await
            .unwrap();
        let response = server
            .handle_request(call(3, tools::GET_STATUS, json!({})))
            .await
            .unwrap();
        assert_eq!(tool_text(&response)["episode_count"], 0);
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let dir = TempDir::new().unwrap();
        let mut server = McpServer::new(service(&dir, true));

        let response = server
            .handle_request(request(3, "resources/list", Value::Null))
            .await
            .unwrap();
        assert_eq!(response.error.unwrap().code, JsonRpcError::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_add_search_update_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut server = initialized(&dir, false).await;

        let response = server
            .handle_request(call(
                1,
                tools::ADD_MEMORY,
                json!({"content": "prod deploys on fridays are banned", "source": "cli", "tags": ["policy"]}),
            ))
            .await
            .unwrap();
        let added = tool_text(&response);
        assert_eq!(added["success"], true);
        assert_eq!(added["embedded"], false);
        let id = added["id"].as_str().unwrap().to_string();

        let response = server
            .handle_request(call(2, tools::SEARCH, json!({"tags": ["policy"]})))
            .await
            .unwrap();
        let found = tool_text(&response);
        assert_eq!(found[0]["id"], id.as_str());

        let response = server
            .handle_request(call(
                3,
                tools::UPDATE_EPISODE,
                json!({"id": id, "tags": ["policy", "deploy"]}),
            ))
            .await
            .unwrap();
        assert_eq!(tool_text(&response)["success"], true);

        let response = server
            .handle_request(call(4, tools::GET_EPISODES, json!({})))
            .await
            .unwrap();
        assert_eq!(tool_text(&response)[0]["tags"], json!(["policy", "deploy"]));

        let response = server
            .handle_request(call(5, tools::GET_STATUS, json!({})))
            .await
            .unwrap();
        assert_eq!(tool_text(&response)["episode_count"], 1);
    }

    #[tokio::test]
    async fn test_tool_errors() {
        let dir = TempDir::new().unwrap();
        let mut server = initialized(&dir, true).await;

        // Invalid arguments surface as JSON-RPC errors
        let response = server
            .handle_request(call(1, tools::SEARCH, json!({"after": "last week"})))
            .await
            .unwrap();
        assert_eq!(response.error.unwrap().code, JsonRpcError::INVALID_PARAMS);

        let response = server
            .handle_request(call(2, tools::ADD_MEMORY, json!({"source": "cli"})))
            .await
            .unwrap();
        assert_eq!(response.error.unwrap().code, JsonRpcError::INVALID_PARAMS);

        // Store failures surface as tool results
        let response = server
            .handle_request(call(
                3,
                tools::UPDATE_EPISODE,
                json!({"id": "missing", "tags": ["x"]}),
            ))
            .await
            .unwrap();
        let result = response.result.unwrap();
        assert_eq!(result["isError"], true);
        assert!(result["content"][0]["text"]
            .as_str()
            .unwrap()
            .contains("missing"));
    }

    #[tokio::test]
    async fn test_serve_over_buffers() {
        let dir = TempDir::new().unwrap();
        let mut server = McpServer::new(service(&dir, true));

        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#,
            "\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "\n",
            "not json\n",
        );
        let mut output = Vec::new();
        server
            .serve(LineTransport::new(input.as_bytes(), &mut output))
            .await
            .unwrap();

        let lines: Vec<Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["id"], 1);
        assert_eq!(lines[1]["error"]["code"], JsonRpcError::PARSE_ERROR);
    }
}
