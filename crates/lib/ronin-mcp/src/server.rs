//! MCP server runners for the defense proxy.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::get;
use rmcp::serve_server;
use rmcp::transport::io::stdio;
use rmcp::transport::streamable_http_server::{
    StreamableHttpServerConfig,
    StreamableHttpService,
    session::local::LocalSessionManager,
};
use tracing::info;

use crate::RoninProxy;
use crate::ide_config::endpoint_url;
use crate::upstream::Upstream;

pub const DEFAULT_MCP_HTTP_ADDR: &str = "127.0.0.1:4020";

const SSE_KEEP_ALIVE: Duration = Duration::from_secs(15);
const SSE_RETRY: Duration = Duration::from_secs(3);

/// Listener settings for the proxy's streamable HTTP endpoint.
///
/// IDE sessions are stateful by default so the agent keeps one MCP session
/// per window.
#[derive(Debug, Clone)]
pub struct McpHttpServerConfig {
    pub addr: SocketAddr,
    pub stateful_mode: bool,
    pub sse_keep_alive: Option<Duration>,
    pub sse_retry: Option<Duration>,
}

impl McpHttpServerConfig {
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            stateful_mode: true,
            sse_keep_alive: Some(SSE_KEEP_ALIVE),
            sse_retry: Some(SSE_RETRY),
        }
    }

    /// Stateless sessions without SSE keep-alives, for one-shot HTTP clients.
    #[must_use]
    pub const fn stateless(mut self) -> Self {
        self.stateful_mode = false;
        self.sse_keep_alive = None;
        self
    }

    /// URL to register in IDE settings.
    #[must_use]
    pub fn endpoint_url(&self) -> String {
        endpoint_url(self.addr)
    }
}

impl Default for McpHttpServerConfig {
    fn default() -> Self {
        Self::new(SocketAddr::from(([127, 0, 0, 1], 4020)))
    }
}

/// Serves the proxy over stdio.
///
/// # Errors
/// Returns any transport or server error.
pub async fn serve_stdio<U: Upstream>(
    proxy: RoninProxy<U>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    info!(server = proxy.name(), "serving MCP over stdio");
    let (stdin, stdout) = stdio();
    let running = serve_server(proxy, (stdin, stdout)).await?;
    let _ = running.waiting().await?;
    Ok(())
}

/// Builds the HTTP router: the MCP endpoint at `/mcp` and `GET /health`.
pub fn build_router<U: Upstream>(proxy: RoninProxy<U>, config: &McpHttpServerConfig) -> Router {
    let service: StreamableHttpService<RoninProxy<U>, LocalSessionManager> =
        StreamableHttpService::new(
            move || Ok(proxy.clone()),
            Arc::new(LocalSessionManager::default()),
            StreamableHttpServerConfig {
                sse_keep_alive: config.sse_keep_alive,
                sse_retry: config.sse_retry,
                stateful_mode: config.stateful_mode,
                ..Default::default()
            },
        );

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .nest_service("/mcp", service)
}

/// Serves the proxy using streamable HTTP transport.
///
/// # Errors
/// Returns any listener or server error.
pub async fn serve_streamable_http<U: Upstream>(
    proxy: RoninProxy<U>,
    config: McpHttpServerConfig,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = build_router(proxy, &config);
    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    info!("ronin MCP proxy listening on {}", config.endpoint_url());
    axum::serve(listener, app).await?;
    Ok(())
}
