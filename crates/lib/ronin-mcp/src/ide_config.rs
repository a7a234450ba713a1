//! IDE registration snippet for the proxy endpoint.
//!
//! IDEs register remote MCP servers with an `mcpServers` object keyed by a
//! display name. Installing the proxy means removing the entry that points
//! straight at the upstream and adding one that points at the proxy.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Entry name of the upstream server that must be disabled.
pub const UPSTREAM_ENTRY_NAME: &str = "ronin-mcp-v1";
/// Entry name used for the proxy.
pub const DEFENSE_ENTRY_NAME: &str = "ronin-defense-mcp-v1";

/// IDE settings document; keys other than `mcpServers` are preserved.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdeConfig {
    #[serde(rename = "mcpServers", default)]
    pub mcp_servers: BTreeMap<String, Value>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl IdeConfig {
    /// Parses an existing settings document.
    ///
    /// # Errors
    /// Returns the JSON error for malformed input.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Settings containing only the proxy entry.
    #[must_use]
    pub fn for_endpoint(name: &str, url: &str) -> Self {
        let mut config = Self::default();
        config.install_defense(name, url);
        config
    }

    /// Removes the upstream entry and registers the proxy under `name`.
    ///
    /// Returns the removed upstream entry, if there was one.
    pub fn install_defense(&mut self, name: &str, url: &str) -> Option<Value> {
        let removed = self.mcp_servers.remove(UPSTREAM_ENTRY_NAME);
        self.mcp_servers
            .insert(name.to_string(), json!({ "url": url, "headers": {} }));
        removed
    }

    /// Pretty JSON for pasting into IDE settings.
    ///
    /// # Errors
    /// Returns the JSON error if serialization fails.
    pub fn to_pretty_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// URL at which the streamable HTTP runner exposes the proxy.
#[must_use]
pub fn endpoint_url(addr: SocketAddr) -> String {
    format!("http://{addr}/mcp")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snippet_has_url_and_empty_headers() {
        let config = IdeConfig::for_endpoint(DEFENSE_ENTRY_NAME, "http://127.0.0.1:4020/mcp");
        let value = serde_json::to_value(&config).expect("serializable config");
        assert_eq!(
            value,
            json!({
                "mcpServers": {
                    "ronin-defense-mcp-v1": {
                        "url": "http://127.0.0.1:4020/mcp",
                        "headers": {}
                    }
                }
            })
        );
    }

    #[test]
    fn install_replaces_upstream_and_keeps_other_entries() {
        let mut config = IdeConfig::from_json(
            r#"{
                "theme": "dark",
                "mcpServers": {
                    "ronin-mcp-v1": { "url": "https://ronin-mcp-v1.fastmcp.app/mcp", "headers": {} },
                    "local-files": { "command": "files-mcp", "args": ["--root", "."] }
                }
            }"#,
        )
        .expect("valid settings");

        let removed = config.install_defense(DEFENSE_ENTRY_NAME, "http://127.0.0.1:4020/mcp");

        assert_eq!(
            removed.and_then(|entry| entry.get("url").cloned()),
            Some(json!("https://ronin-mcp-v1.fastmcp.app/mcp"))
        );
        assert!(!config.mcp_servers.contains_key(UPSTREAM_ENTRY_NAME));
        assert!(config.mcp_servers.contains_key("local-files"));
        assert!(config.mcp_servers.contains_key(DEFENSE_ENTRY_NAME));
        assert_eq!(config.other.get("theme"), Some(&json!("dark")));
    }

    #[test]
    fn endpoint_url_points_at_mcp_route() {
        let addr: SocketAddr = "127.0.0.1:4020".parse().expect("valid addr");
        assert_eq!(endpoint_url(addr), "http://127.0.0.1:4020/mcp");
    }
}
