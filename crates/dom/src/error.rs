use crate::NodeId;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("input is not valid UTF-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),
    #[error("XML syntax error at byte {position}: {source}")]
    Syntax {
        position: u64,
        #[source]
        source: quick_xml::Error,
    },
    #[error("document is empty")]
    Empty,
    #[error("extra content at the end of the document (byte {0})")]
    TrailingContent(u64),
    #[error("unknown entity '&{name};' at byte {position}")]
    UnknownEntity { name: String, position: u64 },
    #[error("namespace prefix '{prefix}' is not bound (byte {position})")]
    UnboundPrefix { prefix: String, position: u64 },
    #[error("premature end of data: element <{0}> is not closed")]
    Unclosed(String),
    #[error("failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum SerializeError {
    #[error("I/O error while writing XML: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialized output is not valid UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
}

/// Structural violations of tree operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TreeError {
    #[error("node {0} does not exist or was removed")]
    UnknownNode(NodeId),
    #[error("node {child} cannot be placed under node {parent}")]
    InvalidPlacement { parent: NodeId, child: NodeId },
    #[error("document already has a root element")]
    RootExists,
    #[error("node {0} is an ancestor of the target parent")]
    Cycle(NodeId),
    #[error("node {0} cannot be copied")]
    NotCopyable(NodeId),
    #[error("node {0} is not an element")]
    NotAnElement(NodeId),
}
