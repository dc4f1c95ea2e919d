//! Arena-backed XML tree with quick-xml based reading and writing.
//!
//! The tree keeps CDATA sections apart from plain text so that callers can
//! address them separately. Node ids are stable for the lifetime of a
//! [`Document`].

pub mod document;
pub mod error;
pub mod node;
pub mod node_ref;
pub mod parser;
pub mod serializer;

pub use document::Document;
pub use error::{ParseError, SerializeError, TreeError};
pub use node::{Namespace, NodeId, NodeKind, QName, XML_NAMESPACE};
pub use node_ref::NodeRef;
pub use parser::{parse, parse_bytes, parse_file};
pub use serializer::{OutputOptions, node_to_string, save_file, to_string, write_document};
