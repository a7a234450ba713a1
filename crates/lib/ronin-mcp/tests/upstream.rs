use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use rmcp::model::{
    CallToolRequestParams,
    CallToolResult,
    ClientInfo,
    Content,
    ErrorCode,
    ListToolsResult,
    PaginatedRequestParams,
    ServerCapabilities,
    ServerInfo,
    Tool,
};
use rmcp::service::{RequestContext, RoleServer, RunningService};
use rmcp::{ErrorData, ServerHandler, ServiceExt};
use ronin_mcp::upstream::{
    Connector,
    RemoteUpstream,
    StreamableHttpConnector,
    Upstream,
    UpstreamError,
    UpstreamSession,
};
use serde_json::Map;
use tokio::sync::Mutex;

const ENDPOINT: &str = "duplex://echo";

#[derive(Clone)]
struct EchoServer;

impl ServerHandler for EchoServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, ErrorData> {
        Ok(ListToolsResult::with_all_items(vec![Tool::new(
            "echo",
            "Replies with pong",
            Arc::new(Map::new()),
        )]))
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        if request.name == "echo" {
            Ok(CallToolResult::success(vec![Content::text("pong")]))
        } else {
            Err(ErrorData::invalid_params("unknown tool", None))
        }
    }
}

/// Serves a fresh `EchoServer` over an in-memory pipe per session.
#[derive(Default)]
struct DuplexConnector {
    servers: Mutex<Vec<RunningService<RoleServer, EchoServer>>>,
    opened: AtomicUsize,
}

impl DuplexConnector {
    fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Stops every server side, as a hosted upstream dropping sessions would.
    async fn drop_sessions(&self) {
        let servers: Vec<_> = self.servers.lock().await.drain(..).collect();
        for server in servers {
            let _ = server.cancel().await;
        }
    }
}

fn connect_error(err: impl std::fmt::Display) -> UpstreamError {
    UpstreamError::Connect {
        url: ENDPOINT.to_string(),
        message: err.to_string(),
    }
}

impl Connector for DuplexConnector {
    fn endpoint(&self) -> &str {
        ENDPOINT
    }

    async fn connect(&self) -> Result<UpstreamSession, UpstreamError> {
        let (server_io, client_io) = tokio::io::duplex(65536);
        let server = tokio::spawn(EchoServer.serve(server_io));
        let client = ClientInfo::default()
            .serve(client_io)
            .await
            .map_err(connect_error)?;
        let server = server.await.map_err(connect_error)?.map_err(connect_error)?;
        self.servers.lock().await.push(server);
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(client)
    }
}

fn call(name: &str) -> CallToolRequestParams {
    CallToolRequestParams {
        meta: None,
        name: name.to_string().into(),
        arguments: None,
        task: None,
    }
}

fn text(result: &CallToolResult) -> String {
    result
        .content
        .first()
        .and_then(|content| content.raw.as_text())
        .map(|text| text.text.clone())
        .expect("text content in tool result")
}

#[tokio::test]
async fn dropped_session_is_reopened_and_the_call_retried() {
    let upstream = RemoteUpstream::new(DuplexConnector::default())
        .await
        .expect("first session");
    assert_eq!(upstream.list_all_tools().await.expect("tools listed").len(), 1);

    upstream.connector().drop_sessions().await;

    let result = upstream
        .call_tool(call("echo"))
        .await
        .expect("call succeeds on a new session");
    assert_eq!(text(&result), "pong");
    assert_eq!(upstream.reconnects().await, 1);
    assert_eq!(upstream.connector().opened(), 2);

    let result = upstream.call_tool(call("echo")).await.expect("session reused");
    assert_eq!(text(&result), "pong");
    assert_eq!(upstream.connector().opened(), 2);
}

#[tokio::test]
async fn upstream_errors_do_not_reconnect() {
    let upstream = RemoteUpstream::new(DuplexConnector::default())
        .await
        .expect("first session");

    let err = upstream
        .call_tool(call("nope"))
        .await
        .expect_err("unknown tool fails");
    assert_eq!(err.code, ErrorCode::INVALID_PARAMS);
    assert_eq!(upstream.reconnects().await, 0);
    assert_eq!(upstream.connector().opened(), 1);
}

#[tokio::test]
async fn shutdown_stops_reconnecting() {
    let upstream = RemoteUpstream::new(DuplexConnector::default())
        .await
        .expect("first session");
    upstream.shutdown().await;

    let err = upstream
        .list_all_tools()
        .await
        .expect_err("closed upstream fails");
    assert_eq!(err.code, ErrorCode::INTERNAL_ERROR);
    assert_eq!(upstream.connector().opened(), 1);
}

#[test]
fn http_connector_rejects_non_http_urls() {
    assert!(matches!(
        StreamableHttpConnector::new("ftp://example.com/mcp"),
        Err(UpstreamError::InvalidUrl(_))
    ));
    let connector = StreamableHttpConnector::new("  https://example.com/mcp ").expect("valid url");
    assert_eq!(connector.endpoint(), "https://example.com/mcp");
}
