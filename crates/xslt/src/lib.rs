//! XSLT 1.0 transforms for xmlctx documents.
//!
//! A [`Stylesheet`] is compiled once from its XML form and can be applied to
//! any number of inputs. [`TransformContext`] ties a stylesheet to a
//! [`DocumentContext`](xmlctx_core::DocumentContext), binds parameters and
//! collects the diagnostics of each run.
//!
//! ```
//! use xmlctx_core::{DocumentContext, XmlSource};
//! use xmlctx_xslt::{Stylesheet, TransformContext};
//!
//! let input = DocumentContext::new(Some(XmlSource::from_bytes("heros.xml", "<heros><hero>Tom</hero></heros>")));
//! let stylesheet: Stylesheet = r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
//!     <xsl:param name="greeting"/>
//!     <xsl:template match="/"><out><xsl:value-of select="concat($greeting, ' ', //hero)"/></out></xsl:template>
//! </xsl:stylesheet>"#
//!     .parse()
//!     .unwrap();
//! let mut transform = TransformContext::new(&input, Some(stylesheet)).with_text_param("greeting", "Hello");
//! let result = transform.apply().unwrap();
//! assert_eq!(result.string_value(result.root()), "Hello Tom");
//! ```

mod compile;
pub mod context;
pub mod error;
pub mod executor;
pub mod output;
pub mod pattern;
pub mod stylesheet;

pub use compile::{Avt, AvtPart, Instruction, Sort, SortType, Variable, VariableValue};
pub use context::TransformContext;
pub use error::{Diagnostic, Severity, StylesheetError};
pub use executor::{DEFAULT_MAX_DEPTH, Executor, Halt, TemplateProfile, TransformOutcome, write_profile};
pub use output::{OutputMethod, OutputSettings};
pub use pattern::{Alternative, Pattern};
pub use stylesheet::{Stylesheet, Template, XSLT_NAMESPACE};
