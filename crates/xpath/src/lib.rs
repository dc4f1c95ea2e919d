//! XPath 1.0 for xmlctx documents.
//!
//! Expressions are parsed with a pest grammar into [`ast::Expr`] and
//! evaluated over any tree implementing [`model::XdmNode`]. The DOM's
//! [`xmlctx_dom::NodeRef`] implements it out of the box.
//!
//! ```
//! use xmlctx_dom::{NodeRef, parse};
//! use xmlctx_xpath::{DynamicContextBuilder, StaticContext, XPath};
//!
//! let doc = parse("<heros><hero name='Tom'/></heros>").unwrap();
//! let static_ctx = StaticContext::new();
//! let dyn_ctx = DynamicContextBuilder::new()
//!     .with_context_item(NodeRef::new(&doc, doc.root()))
//!     .build();
//! let value = XPath::compile("count(//hero)").unwrap().evaluate(&static_ctx, &dyn_ctx).unwrap();
//! assert_eq!(value.to_number(), 1.0);
//! ```

pub mod ast;
pub mod evaluator;
pub mod functions;
pub mod model;
pub mod parser;
pub mod runtime;
pub mod value;

pub use evaluator::{Focus, XPath, compare_values, evaluate};
pub use model::XdmNode;
pub use parser::parse_xpath;
pub use runtime::{
    CallCtx, DynamicContext, DynamicContextBuilder, Error, ErrorCode, ExpandedName, FunctionImpl,
    FunctionRegistry, StaticContext,
};
pub use value::{Value, number_to_string, string_to_number};
