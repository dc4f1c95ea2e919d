use core::fmt;
use xmlctx_dom::ParseError;

/// Failures while loading and compiling a stylesheet.
#[derive(Debug, thiserror::Error)]
pub enum StylesheetError {
    #[error("stylesheet is not well-formed: {0}")]
    Parse(#[from] ParseError),
    #[error("document element <{0}> is neither xsl:stylesheet, xsl:transform nor a literal result element")]
    NotAStylesheet(String),
    #[error("<{element}> requires the '{attribute}' attribute")]
    MissingAttribute { element: String, attribute: String },
    #[error("invalid expression '{expr}' in <{element}>: {source}")]
    Expression {
        element: String,
        expr: String,
        #[source]
        source: xmlctx_xpath::Error,
    },
    #[error("invalid pattern '{pattern}': {reason}")]
    Pattern { pattern: String, reason: String },
    #[error("unsupported instruction <xsl:{0}>")]
    UnsupportedInstruction(String),
    #[error("invalid value '{value}' for attribute '{attribute}' of <{element}>")]
    InvalidAttribute { element: String, attribute: String, value: String },
    #[error("call to unknown named template '{0}'")]
    UnknownTemplate(String),
    #[error("<xsl:{element}> is not allowed inside <{parent}>")]
    Misplaced { element: String, parent: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Output of a non-terminating `xsl:message`.
    Message,
    Warning,
    Error,
    /// The transform was aborted.
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Message => "message",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Fatal => "fatal",
        })
    }
}

/// One entry of a transform's diagnostic list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
}

impl Diagnostic {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self { severity, message: message.into() }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity == Severity::Fatal
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.severity, self.message)
    }
}
