use crate::error::{Diagnostic, Severity};
use crate::executor::{DEFAULT_MAX_DEPTH, Executor, strip_space, write_profile};
use crate::stylesheet::Stylesheet;
use core::fmt;
use std::borrow::Cow;
use std::io::Write;
use std::path::PathBuf;
use xmlctx_core::DocumentContext;
use xmlctx_dom::Document;

/// Applies a [`Stylesheet`] to the document of a [`DocumentContext`].
///
/// Diagnostics of every run accumulate until [`clear_errors`](Self::clear_errors)
/// or [`cleanup`](Self::cleanup).
pub struct TransformContext<'a> {
    input: &'a DocumentContext,
    stylesheet: Option<Stylesheet>,
    text_params: Vec<(String, String)>,
    xpath_params: Vec<(String, String)>,
    output: Option<PathBuf>,
    profile: Option<Box<dyn Write + 'a>>,
    max_depth: usize,
    errors: Vec<Diagnostic>,
}

impl fmt::Debug for TransformContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformContext")
            .field("has_stylesheet", &self.stylesheet.is_some())
            .field("text_params", &self.text_params)
            .field("xpath_params", &self.xpath_params)
            .field("output", &self.output)
            .field("profile", &self.profile.is_some())
            .field("max_depth", &self.max_depth)
            .field("errors", &self.errors)
            .finish_non_exhaustive()
    }
}

/// Wraps literal parameter text into an XPath string literal.
fn quote(text: &str) -> Option<Cow<'_, str>> {
    match (text.contains('"'), text.contains('\'')) {
        (false, _) => Some(Cow::Owned(format!("\"{text}\""))),
        (true, false) => Some(Cow::Owned(format!("'{text}'"))),
        (true, true) => None,
    }
}

impl<'a> TransformContext<'a> {
    pub fn new(input: &'a DocumentContext, stylesheet: Option<Stylesheet>) -> Self {
        Self {
            input,
            stylesheet,
            text_params: Vec::new(),
            xpath_params: Vec::new(),
            output: None,
            profile: None,
            max_depth: DEFAULT_MAX_DEPTH,
            errors: Vec::new(),
        }
    }

    /// Binds `name` to the string `value`.
    #[must_use]
    pub fn with_text_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.text_params.push((name.into(), value.into()));
        self
    }

    /// Binds `name` to the result of evaluating `expr` against the input root.
    #[must_use]
    pub fn with_xpath_param(mut self, name: impl Into<String>, expr: impl Into<String>) -> Self {
        self.xpath_params.push((name.into(), expr.into()));
        self
    }

    /// Also writes the result to `path`, serialized per `xsl:output`.
    #[must_use]
    pub fn with_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = Some(path.into());
        self
    }

    /// Writes per-template timings to `sink` after each run.
    #[must_use]
    pub fn with_profile(mut self, sink: impl Write + 'a) -> Self {
        self.profile = Some(Box::new(sink));
        self
    }

    #[must_use]
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn stylesheet(&self) -> Option<&Stylesheet> {
        self.stylesheet.as_ref()
    }

    /// Forgets stylesheet, parameters, output target, profile sink and diagnostics.
    pub fn cleanup(&mut self) {
        self.errors.clear();
        self.stylesheet = None;
        self.text_params.clear();
        self.xpath_params.clear();
        self.output = None;
        self.profile = None;
    }

    /// Runs the transform. `None` when there is nothing to transform or the run hit a fatal condition.
    pub fn apply(&mut self) -> Option<Document> {
        let Some(stylesheet) = self.stylesheet.as_ref() else {
            tracing::warn!("transform without stylesheet");
            return None;
        };
        let Some(document) = self.input.document() else {
            tracing::warn!("transform without input document");
            return None;
        };
        self.errors.extend(stylesheet.warnings().iter().cloned());

        let stripped;
        let input = if stylesheet.has_space_stripping() {
            let mut copy = document.clone();
            let removed = strip_space(stylesheet, &mut copy);
            tracing::debug!(removed, "stripped whitespace text");
            stripped = copy;
            &stripped
        } else {
            document
        };

        let mut executor = Executor::new(stylesheet, input)
            .with_max_depth(self.max_depth)
            .with_profiling(self.profile.is_some());
        for (name, text) in &self.text_params {
            match quote(text) {
                Some(literal) => executor = executor.with_param(name, literal),
                None => self.errors.push(Diagnostic::new(
                    Severity::Error,
                    format!("parameter '{name}' mixes both quote characters and was not passed"),
                )),
            }
        }
        for (name, expr) in &self.xpath_params {
            executor = executor.with_param(name, expr.clone());
        }

        let outcome = executor.run();
        self.errors.extend(outcome.diagnostics);
        if let Some(sink) = self.profile.as_mut()
            && let Err(error) = write_profile(sink, &outcome.profile)
        {
            tracing::warn!(%error, "cannot write transform profile");
        }
        let result = outcome.result?;
        if let Some(path) = &self.output
            && let Err(error) = stylesheet.output_settings().save(&result, path)
        {
            tracing::warn!(%error, path = %path.display(), "cannot save transform result");
            self.errors.push(Diagnostic::new(
                Severity::Error,
                format!("cannot save result to '{}': {error}", path.display()),
            ));
        }
        Some(result)
    }

    pub fn errors(&self) -> &[Diagnostic] {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        self.errors.iter().any(|d| d.severity >= Severity::Error)
    }

    /// One diagnostic per line, oldest first.
    pub fn print_errors<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        for diagnostic in &self.errors {
            writeln!(out, "{diagnostic}")?;
        }
        Ok(())
    }

    pub fn clear_errors(&mut self) {
        self.errors.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("Thorin", Some("\"Thorin\""))]
    #[case("say \"hi\"", Some("'say \"hi\"'"))]
    #[case("it's", Some("\"it's\""))]
    #[case("\"it's\"", None)]
    fn literal_params_are_quoted(#[case] text: &str, #[case] expected: Option<&str>) {
        assert_eq!(quote(text).as_deref(), expected);
    }
}
