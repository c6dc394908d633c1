//! Peer identity.
//!
//! A peer id names one node for routing and connectivity tracking, written
//! `scheme:name`:
//!
//! - `node:alpha` is a cluster member that serves changes under a stable name;
//! - `tmp:propose-4242` is a short-lived process that only dials out.
//!
//! Schemes are lowercase ASCII and names may not contain whitespace or `#`,
//! so an id prints unambiguously inside an address (`node:alpha#1`) and in a
//! config file. Names may contain `:`; only the first one separates.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const NODE: &str = "node";
const EPHEMERAL: &str = "tmp";

/// The identity of a node in the cluster.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PeerId {
    // Always `scheme:name`, already validated.
    text: String,
    colon: usize,
}

impl PeerId {
    /// Build an id from its parts, validating both.
    pub fn try_new(scheme: &str, name: &str) -> Result<Self, PeerIdError> {
        validate(scheme, name)?;
        Ok(Self {
            text: format!("{scheme}:{name}"),
            colon: scheme.len(),
        })
    }

    /// A cluster member named `name`.
    ///
    /// # Panics
    ///
    /// If `name` is empty or contains whitespace, a control character or `#`.
    /// Use [`PeerId::try_new`] or `parse` for untrusted input.
    pub fn node(name: impl AsRef<str>) -> Self {
        Self::known(NODE, name.as_ref())
    }

    /// An id for a process that lives only as long as one job, e.g.
    /// `tmp:propose-4242`. Unique per process on one host.
    ///
    /// # Panics
    ///
    /// Under the same conditions as [`PeerId::node`].
    pub fn ephemeral(role: &str) -> Self {
        Self::known(EPHEMERAL, &format!("{role}-{}", std::process::id()))
    }

    fn known(scheme: &str, name: &str) -> Self {
        match Self::try_new(scheme, name) {
            Ok(id) => id,
            Err(e) => panic!("invalid peer name: {e}"),
        }
    }

    /// The part before the first `:`, e.g. `node`.
    pub fn scheme(&self) -> &str {
        &self.text[..self.colon]
    }

    /// The part after the first `:`.
    pub fn name(&self) -> &str {
        &self.text[self.colon + 1..]
    }

    /// Whether this id was made by [`PeerId::ephemeral`].
    pub fn is_ephemeral(&self) -> bool {
        self.scheme() == EPHEMERAL
    }

    /// The full `scheme:name` form.
    pub fn as_str(&self) -> &str {
        &self.text
    }
}

fn validate(scheme: &str, name: &str) -> Result<(), PeerIdError> {
    let scheme_ok = !scheme.is_empty()
        && scheme
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-');
    if !scheme_ok {
        return Err(PeerIdError::BadScheme(scheme.to_string()));
    }
    if name.is_empty() {
        return Err(PeerIdError::EmptyName);
    }
    if let Some(found) = name
        .chars()
        .find(|c| c.is_whitespace() || c.is_control() || *c == '#')
    {
        return Err(PeerIdError::BadName {
            name: name.to_string(),
            found,
        });
    }
    Ok(())
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self.text)
    }
}

impl FromStr for PeerId {
    type Err = PeerIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((scheme, name)) = s.split_once(':') else {
            return Err(PeerIdError::MissingSeparator(s.to_string()));
        };
        Self::try_new(scheme, name)
    }
}

impl TryFrom<String> for PeerId {
    type Error = PeerIdError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<PeerId> for String {
    fn from(id: PeerId) -> Self {
        id.text
    }
}

/// Why a string is not a valid peer id.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PeerIdError {
    #[error("expected `scheme:name`, got {0:?}")]
    MissingSeparator(String),
    #[error("scheme {0:?} must be non-empty lowercase letters, digits or '-'")]
    BadScheme(String),
    #[error("peer name cannot be empty")]
    EmptyName,
    #[error("peer name {name:?} contains {found:?}")]
    BadName { name: String, found: char },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_node() {
        let id: PeerId = "node:alpha".parse().unwrap();
        assert_eq!(id.scheme(), "node");
        assert_eq!(id.name(), "alpha");
        assert_eq!(id, PeerId::node("alpha"));
        assert!(!id.is_ephemeral());
    }

    #[test]
    fn name_may_contain_colons() {
        let id: PeerId = "addr:127.0.0.1:7001".parse().unwrap();
        assert_eq!(id.scheme(), "addr");
        assert_eq!(id.name(), "127.0.0.1:7001");
        assert_eq!(id.as_str(), "addr:127.0.0.1:7001");
    }

    #[test]
    fn rejects_malformed() {
        assert_eq!(
            "alpha".parse::<PeerId>(),
            Err(PeerIdError::MissingSeparator("alpha".into()))
        );
        assert_eq!(":alpha".parse::<PeerId>(), Err(PeerIdError::BadScheme("".into())));
        assert_eq!("Node:alpha".parse::<PeerId>(), Err(PeerIdError::BadScheme("Node".into())));
        assert_eq!("node:".parse::<PeerId>(), Err(PeerIdError::EmptyName));
        assert_eq!(
            "node:a#1".parse::<PeerId>(),
            Err(PeerIdError::BadName {
                name: "a#1".into(),
                found: '#'
            })
        );
        assert!("node:two words".parse::<PeerId>().is_err());
    }

    #[test]
    #[should_panic(expected = "invalid peer name")]
    fn node_rejects_names_that_would_not_parse_back() {
        PeerId::node("a#b");
    }

    #[test]
    fn ephemeral_ids_are_marked() {
        let id = PeerId::ephemeral("propose");
        assert!(id.is_ephemeral());
        assert_eq!(id.name(), format!("propose-{}", std::process::id()));
        assert_eq!(id.to_string().parse::<PeerId>().unwrap(), id);
    }

    #[test]
    fn serializes_as_string() {
        let id = PeerId::node("beta");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"node:beta\"");
        let back: PeerId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        assert!(serde_json::from_str::<PeerId>("\"beta\"").is_err());
        assert!(serde_json::from_str::<PeerId>("\"node:a b\"").is_err());
    }
}
