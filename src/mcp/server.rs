//! MCP server handler and shared application state.

use std::future::Future;
use std::sync::Arc;

use rmcp::handler::server::{
    tool::{ToolCallContext, ToolRoute, ToolRouter},
    ServerHandler,
};
use rmcp::model::{
    CallToolRequestParam, CallToolResult, ListToolsResult, PaginatedRequestParam, Tool,
};
use rmcp::service::{RequestContext, RoleServer};
use tracing::info_span;

use crate::config::GlobalConfig;
use crate::manager::SessionManager;
use crate::mcp::broker::ApprovalBroker;
use crate::persistence::db::Database;
use crate::slack::gateway::ChatGateway;

/// Shared application state accessible by MCP tool handlers and the Slack
/// event dispatch.
pub struct AppState {
    /// Global configuration.
    pub config: Arc<GlobalConfig>,
    /// `SQLite` connection pool.
    pub db: Arc<Database>,
    /// Chat gateway used for approval rendering and updates.
    pub gateway: Arc<dyn ChatGateway>,
    /// Session routing table and lifecycle owner.
    pub manager: Arc<SessionManager>,
    /// Pending-approval broker.
    pub broker: Arc<ApprovalBroker>,
}

/// MCP server the agent child connects back to.
///
/// Exposes exactly one tool, `approval_prompt`, advertised to the child as
/// `mcp__<server-name>__approval_prompt` via `--permission-prompt-tool`.
pub struct RelayServer {
    state: Arc<AppState>,
}

impl RelayServer {
    /// Create a new MCP server bound to shared application state.
    #[must_use]
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Access the shared application state.
    #[must_use]
    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    fn tool_router() -> ToolRouter<Self> {
        let mut router = ToolRouter::new();

        for tool in Self::all_tools() {
            let name = tool.name.to_string();
            if name.as_str() == "approval_prompt" {
                router.add_route(ToolRoute::new_dyn(tool, |context| {
                    Box::pin(crate::mcp::tools::approval_prompt::handle(context))
                }));
            } else {
                router.add_route(ToolRoute::new_dyn(tool, |_context| {
                    Box::pin(async {
                        Err(rmcp::ErrorData::internal_error("tool not implemented", None))
                    })
                }));
            }
        }

        router
    }

    /// Convert a `serde_json::Value::Object` into the `Arc<Map>` expected by `Tool`.
    fn schema(value: serde_json::Value) -> Arc<serde_json::Map<String, serde_json::Value>> {
        match value {
            serde_json::Value::Object(map) => Arc::new(map),
            _ => Arc::new(serde_json::Map::default()),
        }
    }

    fn all_tools() -> Vec<Tool> {
        vec![Tool {
            name: "approval_prompt".into(),
            title: None,
            description: Some(
                "Ask the thread's operator to approve or deny a tool invocation. \
                 Blocks until a decision is made or the deadline elapses."
                    .into(),
            ),
            input_schema: Self::schema(serde_json::json!({
                "type": "object",
                "properties": {
                    "tool_name": { "type": "string" },
                    "input": { "type": "object" },
                    "tool_use_id": { "type": "string" }
                },
                "required": ["tool_name"]
            })),
            output_schema: None,
            annotations: None,
            icons: None,
            meta: None,
        }]
    }
}

impl ServerHandler for RelayServer {
    fn call_tool(
        &self,
        request: CallToolRequestParam,
        context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<CallToolResult, rmcp::ErrorData>> + Send + '_ {
        let router = Self::tool_router();
        let _span = info_span!("call_tool", tool = %request.name).entered();

        async move {
            router
                .call(ToolCallContext::new(self, request, context))
                .await
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<ListToolsResult, rmcp::ErrorData>> + Send + '_ {
        let tools = Self::all_tools();

        std::future::ready(Ok(ListToolsResult::with_all_items(tools)))
    }
}
