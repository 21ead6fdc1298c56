// MCP tool surface: subsidy search/detail plus stored-file retrieval, served
// through the rmcp SDK.
use crate::convert;
use crate::jgrants::{JgrantsClient, SearchParams};
use crate::registry::{AddAttachmentInput, FileRegistry, RegistryError};
use crate::schemas::Attachment;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rmcp::handler::server::ServerHandler;
use rmcp::model::{
    CallToolRequestParam, CallToolResult, Content, ErrorData as McpError, Implementation,
    JsonObject, ListToolsResult, PaginatedRequestParam, ServerCapabilities, ServerInfo, Tool,
};
use rmcp::service::{RequestContext, RoleServer};
use serde_json::{json, Map, Value};
use std::borrow::Cow;
use std::sync::Arc;
use tracing::warn;

const INSTRUCTIONS: &str = "Search Japanese J-Grants subsidies, fetch details with attachments, \
and read stored attachment files as markdown or base64.";

#[derive(Clone)]
pub struct JgrantsMcpServer {
    client: JgrantsClient,
    registry: Arc<FileRegistry>,
}

impl JgrantsMcpServer {
    pub fn new(client: JgrantsClient, registry: Arc<FileRegistry>) -> Self {
        Self { client, registry }
    }

    fn tool(name: &'static str, description: &'static str, schema: Value) -> Tool {
        let schema: JsonObject = serde_json::from_value(schema).unwrap_or_default();
        Tool::new(
            Cow::Borrowed(name),
            Cow::Borrowed(description),
            Arc::new(schema),
        )
    }

    fn tool_list() -> Vec<Tool> {
        vec![
            Self::tool("ping", "Health check", json!({ "type": "object", "properties": {} })),
            Self::tool(
                "search_subsidies",
                "Search subsidies from the J-Grants public API",
                json!({
                    "type": "object",
                    "properties": {
                        "keyword": { "type": "string" },
                        "sort": {
                            "type": "string",
                            "enum": ["created_date", "acceptance_start_datetime", "acceptance_end_datetime"]
                        },
                        "order": { "type": "string", "enum": ["ASC", "DESC"] },
                        "acceptance": { "type": "integer", "enum": [0, 1] },
                        "use_purpose": { "type": "string" },
                        "industry": { "type": "string" },
                        "target_number_of_employees": { "type": "string" },
                        "target_area_search": { "type": "string" }
                    }
                }),
            ),
            Self::tool(
                "get_subsidy_detail",
                "Get subsidy detail by id; attachments are stored locally and reported with file ids",
                json!({
                    "type": "object",
                    "properties": {
                        "id": { "type": "string" },
                        "include_file_data": { "type": "boolean" }
                    },
                    "required": ["id"]
                }),
            ),
            Self::tool(
                "get_file_content",
                "Get stored attachment content as markdown or base64",
                json!({
                    "type": "object",
                    "properties": {
                        "file_id": { "type": "string" },
                        "format": { "type": "string", "enum": ["markdown", "base64"] }
                    },
                    "required": ["file_id"]
                }),
            ),
        ]
    }

    async fn handle_search(&self, args: &Map<String, Value>) -> Result<CallToolResult, McpError> {
        let params: SearchParams = serde_json::from_value(Value::Object(args.clone()))
            .map_err(|err| McpError::invalid_params(format!("invalid search input: {err}"), None))?;
        match self.client.fetch_subsidies(&params).await {
            Ok(response) => {
                let payload = serde_json::to_value(response).unwrap_or(Value::Null);
                Ok(ok_result(payload))
            }
            Err(err) => Ok(error_result(format!("search_subsidies failed: {err}"))),
        }
    }

    async fn handle_detail(&self, args: &Map<String, Value>) -> Result<CallToolResult, McpError> {
        let id = args
            .get("id")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| McpError::invalid_params("id is required", None))?;
        let include_file_data = args
            .get("include_file_data")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let response = match self.client.fetch_subsidy_detail(id).await {
            Ok(response) => response,
            Err(err) => return Ok(error_result(format!("get_subsidy_detail failed: {err}"))),
        };

        let attachments = response
            .result
            .as_ref()
            .and_then(|detail| detail.attachments.clone());
        let mut payload = serde_json::to_value(&response).unwrap_or(Value::Null);
        let Some(attachments) = attachments else {
            return Ok(ok_result(payload));
        };

        let (saved, warnings) = self
            .store_attachments(id, attachments, include_file_data)
            .await;
        if let Some(result) = payload.get_mut("result") {
            if let Some(object) = result.as_object_mut() {
                object.insert("attachments".to_string(), Value::Array(saved));
            }
        }
        if !warnings.is_empty() {
            if let Some(object) = payload.as_object_mut() {
                object.insert(
                    "file_warnings".to_string(),
                    Value::Array(warnings.into_iter().map(Value::String).collect()),
                );
            }
        }
        Ok(ok_result(payload))
    }

    /// Stores each attachment from a detail response. Per-attachment failures
    /// become warnings on the overall response, never a failed call.
    async fn store_attachments(
        &self,
        subsidy_id: &str,
        attachments: Vec<Attachment>,
        include_file_data: bool,
    ) -> (Vec<Value>, Vec<String>) {
        let mut saved = Vec::new();
        let mut warnings = Vec::new();
        for attachment in attachments {
            let stored = self
                .registry
                .add_attachment(AddAttachmentInput {
                    subsidy_id: subsidy_id.to_string(),
                    category: attachment.category.clone(),
                    name: attachment.name.clone(),
                    data_base64: attachment.data.clone(),
                })
                .await;
            match stored {
                Ok(record) => {
                    let mut output = json!({
                        "file_id": record.file_id,
                        "name": record.name,
                        "category": record.category,
                        "size": record.size,
                        "mime": record.mime,
                    });
                    if include_file_data {
                        if let Some(object) = output.as_object_mut() {
                            object.insert("data".to_string(), Value::String(attachment.data));
                        }
                    }
                    saved.push(output);
                }
                Err(err @ RegistryError::SizeLimitExceeded { .. }) => {
                    warnings.push(format!("Attachment {} skipped: {err}", attachment.name));
                }
                Err(err) => {
                    warn!(subsidy_id, name = %attachment.name, "attachment store failed: {err}");
                    warnings.push(format!("Attachment {} skipped: {err}", attachment.name));
                }
            }
        }
        (saved, warnings)
    }

    async fn handle_file_content(
        &self,
        args: &Map<String, Value>,
    ) -> Result<CallToolResult, McpError> {
        let file_id = args
            .get("file_id")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| McpError::invalid_params("file_id is required", None))?;
        let format = args.get("format").and_then(Value::as_str);

        let Some(record) = self.registry.get(file_id).await else {
            return Ok(error_result(format!("file_id not found: {file_id}")));
        };

        if format == Some("base64") {
            return match tokio::fs::read(&record.path).await {
                Ok(bytes) => Ok(ok_result(json!({
                    "file_id": record.file_id,
                    "name": record.name,
                    "mime": record.mime,
                    "base64": BASE64.encode(bytes),
                }))),
                Err(err) => Ok(error_result(format!("get_file_content failed: {err}"))),
            };
        }

        let result = convert::convert_file_to_markdown(&record.path, record.mime.as_deref()).await;
        Ok(ok_result(json!({
            "file_id": record.file_id,
            "name": record.name,
            "mime": record.mime,
            "markdown": result.markdown,
            "base64": result.base64,
            "warning": result.warning,
        })))
    }
}

fn ok_result(payload: Value) -> CallToolResult {
    CallToolResult {
        content: vec![Content::text("ok")],
        structured_content: Some(payload),
        is_error: Some(false),
        meta: None,
    }
}

fn error_result(message: String) -> CallToolResult {
    CallToolResult {
        content: vec![Content::text(message)],
        structured_content: None,
        is_error: Some(true),
        meta: None,
    }
}

impl ServerHandler for JgrantsMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(INSTRUCTIONS.to_string()),
            ..ServerInfo::default()
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        let tools = Self::tool_list();
        async move {
            Ok(ListToolsResult {
                tools,
                next_cursor: None,
                meta: None,
            })
        }
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let args = request.arguments.unwrap_or_default();
        match request.name.as_ref() {
            "ping" => Ok(ok_result(json!({
                "status": "ok",
                "version": env!("CARGO_PKG_VERSION"),
            }))),
            "search_subsidies" => self.handle_search(&args).await,
            "get_subsidy_detail" => self.handle_detail(&args).await,
            "get_file_content" => self.handle_file_content(&args).await,
            other => Err(McpError::invalid_params(
                format!("unknown tool: {other}"),
                None,
            )),
        }
    }
}
