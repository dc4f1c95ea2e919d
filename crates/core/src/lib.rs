//! Stateful XML document contexts.
//!
//! A [`DocumentContext`] owns a parsed document and the [`XmlSource`] it was
//! read from. Queries, edits and merges address nodes through XPath 1.0
//! expressions and record their outcome as an [`OperationState`] instead of
//! returning errors.
//!
//! ```
//! use xmlctx_core::{DocumentContext, XmlSource};
//!
//! let source = XmlSource::from_bytes("xml/heros.xml", r#"<heros><hero age="20"/></heros>"#);
//! let mut ctx = DocumentContext::new(Some(source));
//! ctx.set_attribute("//hero/@age", "21");
//! assert_eq!(ctx.attribute("age", "//hero").as_deref(), Some("21"));
//! assert!(ctx.state().is_success());
//! ```

pub mod context;
pub mod extensions;
pub mod merge;
pub mod mutation;
pub mod numeric;
pub mod query;
pub mod source;
pub mod state;

pub use context::DocumentContext;
pub use extensions::{in_range, max_number, regex_match, register_extensions};
pub use merge::{
    merge, merge_fmt, merge_into_each, merge_into_one, merge_node, merge_node_fmt,
    merge_node_into_result,
};
pub use numeric::{Coerced, string_to_float, string_to_long, to_double, to_float, to_long};
pub use query::{EvaluateOptions, QueryError, QueryResult, evaluate_document, node_strings};
pub use source::{
    DirectoryArchive, MemoryArchive, ResourceArchive, ResourceFile, SourceError, SourceKind,
    XmlSource,
};
pub use state::{OperationState, Reason, StatusCode};
