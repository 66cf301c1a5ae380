use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The six resource kinds the fabric registers, forming a parentage DAG
/// rooted at nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Node,
    Device,
    Source,
    Flow,
    Sender,
    Receiver,
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("unknown resource kind {0:?}")]
pub struct ParseKindError(pub String);

impl ResourceKind {
    pub const ALL: [ResourceKind; 6] =
        [Self::Node, Self::Device, Self::Source, Self::Flow, Self::Sender, Self::Receiver];

    pub fn singular(&self) -> &'static str {
        match self {
            Self::Node => "node",
            Self::Device => "device",
            Self::Source => "source",
            Self::Flow => "flow",
            Self::Sender => "sender",
            Self::Receiver => "receiver",
        }
    }

    pub fn plural(&self) -> &'static str {
        match self {
            Self::Node => "nodes",
            Self::Device => "devices",
            Self::Source => "sources",
            Self::Flow => "flows",
            Self::Sender => "senders",
            Self::Receiver => "receivers",
        }
    }

    pub fn from_singular(s: &str) -> Result<Self, ParseKindError> {
        Self::ALL.iter().copied().find(|k| k.singular() == s).ok_or_else(|| ParseKindError(s.to_string()))
    }

    pub fn from_plural(s: &str) -> Result<Self, ParseKindError> {
        Self::ALL.iter().copied().find(|k| k.plural() == s).ok_or_else(|| ParseKindError(s.to_string()))
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(self.singular()) }
}

impl std::str::FromStr for ResourceKind {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> { Self::from_singular(s) }
}
