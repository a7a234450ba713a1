//! Connection to the MCP server being fronted by the proxy.

use std::error::Error;
use std::fmt;
use std::future::{Future, ready};

use rmcp::model::{
    CallToolRequestParams,
    CallToolResult,
    ClientInfo,
    ErrorCode,
    GetPromptRequestParams,
    GetPromptResult,
    Prompt,
    ReadResourceRequestParams,
    ReadResourceResult,
    Resource,
    ResourceTemplate,
    Tool,
};
use rmcp::service::{Peer, RoleClient, RunningService, ServiceError};
use rmcp::transport::StreamableHttpClientTransport;
use rmcp::{ErrorData, ServiceExt};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Upstream endpoint fronted when no other is configured.
pub const DEFAULT_UPSTREAM_URL: &str = "https://ronin-mcp-v1.fastmcp.app/mcp";

/// Client session held against an upstream server.
pub type UpstreamSession = RunningService<RoleClient, ClientInfo>;

fn unsupported(method: &str) -> ErrorData {
    ErrorData::new(
        ErrorCode::METHOD_NOT_FOUND,
        format!("upstream does not support {method}"),
        None,
    )
}

/// Operations the proxy forwards.
///
/// Prompt and resource methods default to `METHOD_NOT_FOUND`, which the
/// proxy reports as an empty listing.
pub trait Upstream: Send + Sync + 'static {
    /// Lists every tool the upstream server exposes, following pagination.
    fn list_all_tools(&self) -> impl Future<Output = Result<Vec<Tool>, ErrorData>> + Send;

    /// Invokes a tool on the upstream server.
    fn call_tool(
        &self,
        request: CallToolRequestParams,
    ) -> impl Future<Output = Result<CallToolResult, ErrorData>> + Send;

    fn list_all_prompts(&self) -> impl Future<Output = Result<Vec<Prompt>, ErrorData>> + Send {
        ready(Err(unsupported("prompts/list")))
    }

    fn get_prompt(
        &self,
        _request: GetPromptRequestParams,
    ) -> impl Future<Output = Result<GetPromptResult, ErrorData>> + Send {
        ready(Err(unsupported("prompts/get")))
    }

    fn list_all_resources(&self) -> impl Future<Output = Result<Vec<Resource>, ErrorData>> + Send {
        ready(Err(unsupported("resources/list")))
    }

    fn list_all_resource_templates(
        &self,
    ) -> impl Future<Output = Result<Vec<ResourceTemplate>, ErrorData>> + Send {
        ready(Err(unsupported("resources/templates/list")))
    }

    fn read_resource(
        &self,
        _request: ReadResourceRequestParams,
    ) -> impl Future<Output = Result<ReadResourceResult, ErrorData>> + Send {
        ready(Err(unsupported("resources/read")))
    }
}

#[derive(Debug)]
pub enum UpstreamError {
    InvalidUrl(String),
    Connect { url: String, message: String },
}

impl fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidUrl(url) => write!(f, "invalid upstream url: {url}"),
            Self::Connect { url, message } => {
                write!(f, "failed to connect to upstream {url}: {message}")
            }
        }
    }
}

impl Error for UpstreamError {}

impl From<UpstreamError> for ErrorData {
    fn from(err: UpstreamError) -> Self {
        Self::internal_error(err.to_string(), None)
    }
}

/// Opens fresh client sessions to an upstream server.
pub trait Connector: Send + Sync + 'static {
    /// Where sessions are opened, for logs.
    fn endpoint(&self) -> &str;

    /// Opens a session and completes the MCP initialize handshake.
    fn connect(&self) -> impl Future<Output = Result<UpstreamSession, UpstreamError>> + Send;
}

/// Connects over streamable HTTP.
#[derive(Debug, Clone)]
pub struct StreamableHttpConnector {
    url: String,
}

impl StreamableHttpConnector {
    /// # Errors
    /// Returns [`UpstreamError::InvalidUrl`] unless the url is http(s).
    pub fn new(url: &str) -> Result<Self, UpstreamError> {
        let url = url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(UpstreamError::InvalidUrl(url.to_string()));
        }
        Ok(Self {
            url: url.to_string(),
        })
    }
}

impl Connector for StreamableHttpConnector {
    fn endpoint(&self) -> &str {
        &self.url
    }

    async fn connect(&self) -> Result<UpstreamSession, UpstreamError> {
        let transport = StreamableHttpClientTransport::from_uri(self.url.clone());
        ClientInfo::default()
            .serve(transport)
            .await
            .map_err(|err| UpstreamError::Connect {
                url: self.url.clone(),
                message: err.to_string(),
            })
    }
}

struct SessionSlot {
    service: Option<UpstreamSession>,
    generation: u64,
    closed: bool,
}

/// rmcp client session to an upstream, reopened once when the transport
/// fails mid-request.
pub struct RemoteUpstream<C: Connector> {
    connector: C,
    session: Mutex<SessionSlot>,
}

/// Upstream reached over streamable HTTP.
pub type HttpUpstream = RemoteUpstream<StreamableHttpConnector>;

impl HttpUpstream {
    /// Connects to `url` over streamable HTTP.
    ///
    /// # Errors
    /// Returns an error if the url is not http(s) or the handshake fails.
    pub async fn connect(url: &str) -> Result<Self, UpstreamError> {
        Self::new(StreamableHttpConnector::new(url)?).await
    }
}

impl<C: Connector> RemoteUpstream<C> {
    /// Opens the first session.
    ///
    /// # Errors
    /// Returns the connector error if the handshake fails.
    pub async fn new(connector: C) -> Result<Self, UpstreamError> {
        let service = connector.connect().await?;
        info!(upstream = connector.endpoint(), "connected to upstream MCP server");
        Ok(Self {
            connector,
            session: Mutex::new(SessionSlot {
                service: Some(service),
                generation: 0,
                closed: false,
            }),
        })
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        self.connector.endpoint()
    }

    #[must_use]
    pub const fn connector(&self) -> &C {
        &self.connector
    }

    /// Number of times the session has been reopened.
    pub async fn reconnects(&self) -> u64 {
        self.session.lock().await.generation
    }

    /// Closes the upstream session. Later calls fail without reconnecting.
    pub async fn shutdown(&self) {
        let mut slot = self.session.lock().await;
        slot.closed = true;
        let Some(service) = slot.service.take() else {
            return;
        };
        if let Err(err) = service.cancel().await {
            warn!(upstream = self.endpoint(), "upstream session did not shut down cleanly: {err}");
        }
    }

    async fn current(&self) -> Result<(Peer<RoleClient>, u64), ErrorData> {
        let generation = {
            let slot = self.session.lock().await;
            if slot.closed {
                return Err(ErrorData::internal_error("upstream session is closed", None));
            }
            if let Some(service) = slot.service.as_ref() {
                return Ok((service.peer().clone(), slot.generation));
            }
            slot.generation
        };
        // A previous reconnect failed; try again before giving up.
        self.reopen(generation).await
    }

    async fn reopen(&self, stale: u64) -> Result<(Peer<RoleClient>, u64), ErrorData> {
        let mut slot = self.session.lock().await;
        if slot.closed {
            return Err(ErrorData::internal_error("upstream session is closed", None));
        }
        if slot.generation != stale
            && let Some(service) = slot.service.as_ref()
        {
            return Ok((service.peer().clone(), slot.generation));
        }

        if let Some(old) = slot.service.take() {
            let _ = old.cancel().await;
        }
        let service = self.connector.connect().await?;
        let peer = service.peer().clone();
        slot.service = Some(service);
        slot.generation += 1;
        info!(
            upstream = self.endpoint(),
            generation = slot.generation,
            "reopened upstream MCP session"
        );
        Ok((peer, slot.generation))
    }

    /// Runs `request` on the current session. A transport failure reopens
    /// the session and retries once; MCP errors from the upstream pass
    /// through untouched.
    async fn with_session<T, F, Fut>(
        &self,
        method: &'static str,
        request: F,
    ) -> Result<T, ErrorData>
    where
        F: Fn(Peer<RoleClient>) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, ServiceError>> + Send,
        T: Send,
    {
        let (peer, generation) = self.current().await?;
        match request(peer).await {
            Ok(value) => Ok(value),
            Err(ServiceError::McpError(error)) => Err(error),
            Err(err) => {
                warn!(
                    upstream = self.endpoint(),
                    method, "upstream transport failed, reconnecting: {err}"
                );
                let (peer, _) = self.reopen(generation).await?;
                request(peer).await.map_err(upstream_failure)
            }
        }
    }
}

fn upstream_failure(err: ServiceError) -> ErrorData {
    match err {
        ServiceError::McpError(error) => error,
        other => ErrorData::internal_error(format!("upstream request failed: {other}"), None),
    }
}

impl<C: Connector> Upstream for RemoteUpstream<C> {
    async fn list_all_tools(&self) -> Result<Vec<Tool>, ErrorData> {
        self.with_session("tools/list", |peer| async move { peer.list_all_tools().await })
            .await
    }

    async fn call_tool(&self, request: CallToolRequestParams) -> Result<CallToolResult, ErrorData> {
        self.with_session("tools/call", |peer| {
            let request = request.clone();
            async move { peer.call_tool(request).await }
        })
        .await
    }

    async fn list_all_prompts(&self) -> Result<Vec<Prompt>, ErrorData> {
        self.with_session("prompts/list", |peer| async move { peer.list_all_prompts().await })
            .await
    }

    async fn get_prompt(&self, request: GetPromptRequestParams) -> Result<GetPromptResult, ErrorData> {
        self.with_session("prompts/get", |peer| {
            let request = request.clone();
            async move { peer.get_prompt(request).await }
        })
        .await
    }

    async fn list_all_resources(&self) -> Result<Vec<Resource>, ErrorData> {
        self.with_session("resources/list", |peer| async move {
            peer.list_all_resources().await
        })
        .await
    }

    async fn list_all_resource_templates(&self) -> Result<Vec<ResourceTemplate>, ErrorData> {
        self.with_session("resources/templates/list", |peer| async move {
            peer.list_all_resource_templates().await
        })
        .await
    }

    async fn read_resource(
        &self,
        request: ReadResourceRequestParams,
    ) -> Result<ReadResourceResult, ErrorData> {
        self.with_session("resources/read", |peer| {
            let request = request.clone();
            async move { peer.read_resource(request).await }
        })
        .await
    }
}
