//! Agent configuration.

use anyhow::{Context, Result};
use std::time::Duration;
use url::Url;

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Replica identifier this agent writes and replicates under.
    pub identifier: u8,

    /// Tree paths of the replicated stores to create at startup.
    pub stores: Vec<String>,

    /// Peer endpoints to replicate with.
    pub peers: Vec<String>,

    /// Segment count for each created store.
    pub segments: usize,

    /// How long to wait for handshake replies. `None` waits forever.
    pub reply_timeout: Option<Duration>,

    /// Address to accept inbound replication connections on.
    pub listen: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            identifier: 1,
            stores: vec!["data".to_string()],
            peers: Vec::new(),
            segments: gridstore_core::store::DEFAULT_SEGMENTS,
            reply_timeout: None,
            listen: None,
        }
    }
}

impl AgentConfig {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `GRIDSTORE_IDENTIFIER`: Replica identifier (1-255)
    /// - `GRIDSTORE_STORES`: Comma-separated store paths
    /// - `GRIDSTORE_PEERS`: Comma-separated peer endpoints
    /// - `GRIDSTORE_SEGMENTS`: Segments per store
    /// - `GRIDSTORE_REPLY_TIMEOUT_SECS`: Handshake reply wait, in seconds
    /// - `GRIDSTORE_LISTEN`: Listen address for inbound replication
    ///
    /// # Errors
    ///
    /// Returns error if a variable is present but malformed.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(identifier) = std::env::var("GRIDSTORE_IDENTIFIER") {
            config.identifier = identifier
                .parse()
                .context("Invalid GRIDSTORE_IDENTIFIER")?;
        }

        if let Ok(stores) = std::env::var("GRIDSTORE_STORES") {
            config.stores = split_list(&stores);
        }

        if let Ok(peers) = std::env::var("GRIDSTORE_PEERS") {
            config.peers = split_list(&peers);
        }

        if let Ok(segments) = std::env::var("GRIDSTORE_SEGMENTS") {
            config.segments = segments.parse().context("Invalid GRIDSTORE_SEGMENTS")?;
        }

        if let Ok(secs) = std::env::var("GRIDSTORE_REPLY_TIMEOUT_SECS") {
            let secs: u64 = secs
                .parse()
                .context("Invalid GRIDSTORE_REPLY_TIMEOUT_SECS")?;
            config.reply_timeout = Some(Duration::from_secs(secs));
        }

        if let Ok(listen) = std::env::var("GRIDSTORE_LISTEN") {
            config.listen = Some(listen);
        }

        Ok(config)
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

/// Default port for peer endpoints that do not name one.
pub const DEFAULT_PEER_PORT: u16 = 5700;

/// Parse a peer endpoint into host and port.
///
/// Accepts `tcp://host:port`, `host:port`, or a bare host.
///
/// # Errors
///
/// Returns error on unsupported schemes, missing hosts, or bad ports.
pub fn parse_peer_url(input: &str) -> Result<(String, u16)> {
    if input.contains("://") {
        let url = Url::parse(input).with_context(|| format!("Invalid peer endpoint {input}"))?;

        match url.scheme() {
            "tcp" => {}
            scheme => {
                anyhow::bail!("Invalid peer endpoint {input}: unsupported scheme '{scheme}'");
            }
        }

        let host = url
            .host_str()
            .with_context(|| format!("Invalid peer endpoint {input}: missing host"))?;
        let port = url.port().unwrap_or(DEFAULT_PEER_PORT);

        return Ok((host.to_string(), port));
    }

    let mut parts = input.split(':');
    let host = parts
        .next()
        .filter(|value| !value.is_empty())
        .with_context(|| format!("Invalid peer endpoint {input}: missing host"))?;
    let port = match parts.next() {
        None => DEFAULT_PEER_PORT,
        Some(port) => port
            .parse()
            .with_context(|| format!("Invalid peer endpoint {input}: invalid port '{port}'"))?,
    };
    if parts.next().is_some() {
        anyhow::bail!("Invalid peer endpoint {input}: too many colons");
    }

    Ok((host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scheme_host_and_port() {
        let (host, port) = parse_peer_url("tcp://grid-2.local:9000").unwrap();
        assert_eq!(host, "grid-2.local");
        assert_eq!(port, 9000);
    }

    #[test]
    fn defaults_the_port() {
        assert_eq!(
            parse_peer_url("tcp://grid-2").unwrap(),
            ("grid-2".to_string(), DEFAULT_PEER_PORT)
        );
        assert_eq!(
            parse_peer_url("grid-2").unwrap(),
            ("grid-2".to_string(), DEFAULT_PEER_PORT)
        );
    }

    #[test]
    fn accepts_bare_host_port() {
        assert_eq!(
            parse_peer_url("10.0.0.7:5701").unwrap(),
            ("10.0.0.7".to_string(), 5701)
        );
    }

    #[test]
    fn rejects_bad_endpoints() {
        assert!(parse_peer_url("http://grid-2:80").is_err());
        assert!(parse_peer_url(":5700").is_err());
        assert!(parse_peer_url("a:b:c").is_err());
        assert!(parse_peer_url("grid-2:not-a-port").is_err());
    }
}
