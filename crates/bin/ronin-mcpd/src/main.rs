//! Daemon entry point for the Ronin MCP defense proxy.
//!
//! Loads configuration from the command line and environment, connects to the
//! upstream MCP server, and serves the defended tool surface over stdio and/or
//! streamable HTTP.

mod config;
mod repl;

use std::error::Error;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use ronin_core::DefensePipeline;
use ronin_mcp::RoninProxy;
use ronin_mcp::ide_config::{IdeConfig, UPSTREAM_ENTRY_NAME, endpoint_url};
use ronin_mcp::server::{McpHttpServerConfig, serve_stdio, serve_streamable_http};
use ronin_mcp::upstream::HttpUpstream;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::{RoninConfig, RunMode};

type BoxError = Box<dyn Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let config = RoninConfig::from_args()?;
    init_tracing(&config.log_filter)?;

    match &config.mode {
        RunMode::SanitiseRepl => {
            repl::run(std::io::stdin().lock(), std::io::stdout().lock())?;
            Ok(())
        }
        RunMode::PrintIdeConfig { merge_into } => print_ide_config(&config, merge_into.as_deref()),
        RunMode::Serve => serve(&config).await,
    }
}

fn init_tracing(default_filter: &str) -> Result<(), BoxError> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default_filter))?;
    // stdout carries the stdio transport.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
}

async fn serve(config: &RoninConfig) -> Result<(), BoxError> {
    let upstream = Arc::new(HttpUpstream::connect(&config.upstream_url).await?);
    let defense = Arc::new(DefensePipeline::new(config.defense.clone()));
    let proxy = RoninProxy::with_shared(upstream.clone(), defense)
        .with_name(config.server_name.as_str());
    info!(
        server = proxy.name(),
        upstream = upstream.endpoint(),
        "ronin defense proxy ready"
    );

    let http = config.mcp_serve.then(|| {
        let http_config = McpHttpServerConfig::new(config.mcp_http_addr);
        tokio::spawn(serve_streamable_http(proxy.clone(), http_config))
    });

    if config.enable_stdio {
        let result = serve_stdio(proxy).await;
        if let Some(handle) = http {
            handle.abort();
        }
        result?;
    } else if let Some(handle) = http {
        handle.await??;
    }

    upstream.shutdown().await;
    Ok(())
}

fn print_ide_config(config: &RoninConfig, merge_into: Option<&Path>) -> Result<(), BoxError> {
    let json = render_ide_config(&config.ide_entry_name, config.mcp_http_addr, merge_into)?;
    println!("{json}");
    eprintln!(
        "Disable the '{UPSTREAM_ENTRY_NAME}' server in your IDE settings before enabling '{}'.\n\
         Start the proxy with `--mcp-serve true` so {} is reachable.",
        config.ide_entry_name,
        endpoint_url(config.mcp_http_addr)
    );
    Ok(())
}

/// Registers the proxy in a fresh or existing IDE settings document. The
/// settings file itself is never written.
fn render_ide_config(
    entry_name: &str,
    addr: SocketAddr,
    merge_into: Option<&Path>,
) -> Result<String, BoxError> {
    let mut ide_config = match merge_into {
        Some(path) => IdeConfig::from_json(&std::fs::read_to_string(path)?)?,
        None => IdeConfig::default(),
    };

    if ide_config
        .install_defense(entry_name, &endpoint_url(addr))
        .is_some()
    {
        info!("removed the '{UPSTREAM_ENTRY_NAME}' entry from the IDE settings");
    }
    Ok(ide_config.to_pretty_json()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ronin_mcp::ide_config::DEFENSE_ENTRY_NAME;

    fn addr() -> SocketAddr {
        "127.0.0.1:4020".parse().expect("valid addr")
    }

    fn parse(json: &str) -> IdeConfig {
        IdeConfig::from_json(json).expect("rendered settings parse")
    }

    #[test]
    fn fresh_snippet_registers_the_proxy() {
        let config = parse(&render_ide_config(DEFENSE_ENTRY_NAME, addr(), None).expect("rendered"));
        assert_eq!(config.mcp_servers.len(), 1);
        assert_eq!(
            config.mcp_servers[DEFENSE_ENTRY_NAME]["url"],
            "http://127.0.0.1:4020/mcp"
        );
    }

    #[test]
    fn merge_reads_existing_settings_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("mcp.json");
        let settings = r#"{
            "editor.fontSize": 13,
            "mcpServers": {
                "ronin-mcp-v1": { "url": "https://ronin-mcp-v1.fastmcp.app/mcp", "headers": {} },
                "github": { "url": "https://api.example.com/mcp", "headers": { "Authorization": "token" } }
            }
        }"#;
        std::fs::write(&path, settings).expect("settings written");

        let merged = parse(&render_ide_config("ronin-guard", addr(), Some(&path)).expect("rendered"));

        assert!(!merged.mcp_servers.contains_key(UPSTREAM_ENTRY_NAME));
        assert_eq!(
            merged.mcp_servers["github"]["headers"]["Authorization"],
            "token"
        );
        assert_eq!(merged.mcp_servers["ronin-guard"]["url"], "http://127.0.0.1:4020/mcp");
        assert_eq!(merged.other["editor.fontSize"], 13);
        assert_eq!(
            std::fs::read_to_string(&path).expect("settings readable"),
            settings
        );
    }

    #[test]
    fn missing_or_malformed_settings_file_is_an_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let missing = dir.path().join("absent.json");
        assert!(render_ide_config(DEFENSE_ENTRY_NAME, addr(), Some(&missing)).is_err());

        let malformed = dir.path().join("broken.json");
        std::fs::write(&malformed, "{ not json").expect("settings written");
        assert!(render_ide_config(DEFENSE_ENTRY_NAME, addr(), Some(&malformed)).is_err());
    }
}
