//! Node configuration.
//!
//! ```toml
//! peer = "node:alpha"
//! listen = "127.0.0.1:7001"
//! connect = ["ws://127.0.0.1:7002"]
//! initial = ["primary"]
//! ```
//!
//! Every key is optional; command-line flags override the file.

use metachange_core::PeerId;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

pub const DEFAULT_PORT: u16 = 7001;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeConfig {
    pub peer: Option<PeerId>,
    pub listen: Option<SocketAddr>,
    pub connect: Vec<String>,
    pub initial: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

impl NodeConfig {
    /// Read and parse the file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    /// Parse a config from TOML text.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Load `path` if given, else the empty config.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Apply command-line overrides. Lists given on the command line replace,
    /// not extend, the file's lists.
    pub fn with_overrides(
        mut self,
        peer: Option<PeerId>,
        listen: Option<SocketAddr>,
        connect: Vec<String>,
        initial: Vec<String>,
    ) -> Self {
        if peer.is_some() {
            self.peer = peer;
        }
        if listen.is_some() {
            self.listen = listen;
        }
        if !connect.is_empty() {
            self.connect = connect;
        }
        if !initial.is_empty() {
            self.initial = initial;
        }
        self
    }

    /// The configured peer id, or `node:node-<pid>`.
    pub fn peer_or_default(&self) -> PeerId {
        self.peer
            .clone()
            .unwrap_or_else(|| PeerId::node(format!("node-{}", std::process::id())))
    }

    /// The configured listen address, or loopback on [`DEFAULT_PORT`].
    pub fn listen_or_default(&self) -> SocketAddr {
        self.listen
            .unwrap_or_else(|| ([127, 0, 0, 1], DEFAULT_PORT).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let config = NodeConfig::parse(
            r#"
            peer = "node:alpha"
            listen = "127.0.0.1:7101"
            connect = ["ws://127.0.0.1:7102"]
            initial = ["primary"]
            "#,
        )
        .unwrap();
        assert_eq!(config.peer, Some(PeerId::node("alpha")));
        assert_eq!(config.listen_or_default().port(), 7101);
        assert_eq!(config.connect, vec!["ws://127.0.0.1:7102"]);
        assert_eq!(config.initial, vec!["primary"]);
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config = NodeConfig::parse("").unwrap();
        assert_eq!(config, NodeConfig::default());
        assert_eq!(config.listen_or_default(), "127.0.0.1:7001".parse::<SocketAddr>().unwrap());
        assert_eq!(config.peer_or_default().scheme(), "node");
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            NodeConfig::parse(r#"peer = "alpha""#),
            Err(ConfigError::Parse(_))
        ));
        assert!(NodeConfig::parse(r#"colour = "blue""#).is_err());
    }

    #[test]
    fn overrides_replace_file_values() {
        let config = NodeConfig::parse(
            r#"
            peer = "node:alpha"
            connect = ["ws://a", "ws://b"]
            initial = ["x"]
            "#,
        )
        .unwrap()
        .with_overrides(
            Some(PeerId::node("beta")),
            None,
            vec!["ws://c".into()],
            vec![],
        );
        assert_eq!(config.peer, Some(PeerId::node("beta")));
        assert_eq!(config.listen, None);
        assert_eq!(config.connect, vec!["ws://c"]);
        assert_eq!(config.initial, vec!["x"]);
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = NodeConfig::load(Path::new("/nonexistent/metachange.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
