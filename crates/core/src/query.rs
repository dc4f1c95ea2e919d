use crate::context::DocumentContext;
use crate::extensions::register_extensions;
use core::fmt;
use thiserror::Error;
use xmlctx_dom::{Document, NodeId, NodeRef};
use xmlctx_xpath::{DynamicContextBuilder, ExpandedName, StaticContext, Value, XPath};

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("context has no document")]
    NoDocument,
    #[error("path expression is empty")]
    EmptyExpression,
    #[error("XPath evaluation failed: {0}")]
    XPath(#[from] xmlctx_xpath::Error),
}

/// Result of evaluating a path expression against one document.
///
/// Node-sets hold ids of that document in document order.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    NodeSet(Vec<NodeId>),
    Number(f64),
    String(String),
    Boolean(bool),
}

impl QueryResult {
    fn from_value(value: Value<NodeRef<'_>>) -> Self {
        match value {
            Value::NodeSet(nodes) => QueryResult::NodeSet(nodes.iter().map(NodeRef::id).collect()),
            Value::Number(n) => QueryResult::Number(n),
            Value::String(s) => QueryResult::String(s),
            Value::Boolean(b) => QueryResult::Boolean(b),
        }
    }

    fn to_value<'a>(&self, document: &'a Document) -> Value<NodeRef<'a>> {
        match self {
            QueryResult::NodeSet(ids) => Value::NodeSet(
                ids.iter()
                    .filter(|&&id| document.contains(id))
                    .map(|&id| NodeRef::new(document, id))
                    .collect(),
            ),
            QueryResult::Number(n) => Value::Number(*n),
            QueryResult::String(s) => Value::String(s.clone()),
            QueryResult::Boolean(b) => Value::Boolean(*b),
        }
    }

    /// True for a non-empty node-set.
    pub fn has_result(&self) -> bool {
        matches!(self, QueryResult::NodeSet(nodes) if !nodes.is_empty())
    }

    /// Matched nodes; empty for scalar results.
    pub fn nodes(&self) -> &[NodeId] {
        match self {
            QueryResult::NodeSet(nodes) => nodes,
            _ => &[],
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes().len()
    }

    /// XPath `number()` of the result; a node-set converts its first node.
    pub fn to_number(&self, document: &Document) -> f64 {
        self.to_value(document).to_number()
    }

    /// XPath `string()` of the result.
    pub fn to_string_value(&self, document: &Document) -> String {
        self.to_value(document).to_string_value()
    }

    pub fn to_boolean(&self) -> bool {
        match self {
            QueryResult::NodeSet(nodes) => !nodes.is_empty(),
            QueryResult::Number(n) => *n != 0.0 && !n.is_nan(),
            QueryResult::String(s) => !s.is_empty(),
            QueryResult::Boolean(b) => *b,
        }
    }
}

/// Namespace bindings and variables for one evaluation.
#[derive(Debug, Clone, Default)]
pub struct EvaluateOptions {
    namespaces: Vec<(String, String)>,
    variables: Vec<(ExpandedName, QueryResult)>,
    document_namespaces: bool,
}

impl EvaluateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_namespace(mut self, prefix: impl Into<String>, uri: impl Into<String>) -> Self {
        self.namespaces.push((prefix.into(), uri.into()));
        self
    }

    /// Binds a variable; node-set values must come from the evaluated document.
    #[must_use]
    pub fn with_variable(mut self, name: impl Into<ExpandedName>, value: QueryResult) -> Self {
        self.variables.push((name.into(), value));
        self
    }

    /// Also binds the prefixes declared on the document element.
    #[must_use]
    pub fn with_document_namespaces(mut self, enabled: bool) -> Self {
        self.document_namespaces = enabled;
        self
    }

    pub fn namespaces(&self) -> &[(String, String)] {
        &self.namespaces
    }

    pub fn document_namespaces(&self) -> bool {
        self.document_namespaces
    }
}

/// The static environment of one evaluation: core library, extensions, prefixes.
pub fn static_context<'a>(
    document: &'a Document,
    options: &EvaluateOptions,
) -> StaticContext<NodeRef<'a>> {
    let mut static_ctx = StaticContext::new();
    register_extensions(static_ctx.functions_mut());
    if options.document_namespaces
        && let Some(root) = document.document_element()
    {
        for ns in document.in_scope_namespaces(root) {
            if let Some(prefix) = &ns.prefix {
                static_ctx.bind_namespace(prefix, &ns.uri);
            }
        }
    }
    for (prefix, uri) in &options.namespaces {
        static_ctx.bind_namespace(prefix, uri);
    }
    static_ctx
}

/// Evaluates `expr` with the document node as context.
pub fn evaluate_document(
    document: &Document,
    expr: &str,
    options: &EvaluateOptions,
) -> Result<QueryResult, QueryError> {
    if expr.trim().is_empty() {
        return Err(QueryError::EmptyExpression);
    }
    let xpath = XPath::compile(expr)?;
    let static_ctx = static_context(document, options);
    let dyn_ctx = DynamicContextBuilder::new()
        .with_context_item(NodeRef::new(document, document.root()))
        .with_variables(
            options.variables.iter().map(|(name, value)| (name.clone(), value.to_value(document))),
        )
        .build();
    let value = xpath.evaluate(&static_ctx, &dyn_ctx)?;
    tracing::trace!(expression = expr, result = value.type_name(), "evaluated path expression");
    Ok(QueryResult::from_value(value))
}

impl DocumentContext {
    /// Evaluates `expr` against the document. Never changes the state.
    ///
    /// `None` when there is no document or the expression is empty, malformed
    /// or fails at runtime.
    pub fn evaluate(&self, expr: &str) -> Option<QueryResult> {
        self.evaluate_with(expr, &EvaluateOptions::default())
    }

    pub fn evaluate_with(&self, expr: &str, options: &EvaluateOptions) -> Option<QueryResult> {
        match self.try_evaluate(expr, options) {
            Ok(result) => Some(result),
            Err(error) => {
                tracing::debug!(expression = expr, %error, "evaluation failed");
                None
            }
        }
    }

    /// Evaluates a formatted expression, e.g. `ctx.evaluate_fmt(format_args!("//hero[@name='{name}']"))`.
    pub fn evaluate_fmt(&self, args: fmt::Arguments<'_>) -> Option<QueryResult> {
        self.evaluate(&args.to_string())
    }

    pub fn try_evaluate(
        &self,
        expr: &str,
        options: &EvaluateOptions,
    ) -> Result<QueryResult, QueryError> {
        let document = self.document().ok_or(QueryError::NoDocument)?;
        evaluate_document(document, expr, options)
    }

    /// Value of attribute `name` on the first node `expr` selects.
    pub fn attribute(&self, name: &str, expr: &str) -> Option<String> {
        let document = self.document()?;
        let result = self.evaluate(expr)?;
        let first = *result.nodes().first()?;
        document.attribute(first, name).map(str::to_string)
    }

    pub fn attribute_fmt(&self, name: &str, args: fmt::Arguments<'_>) -> Option<String> {
        self.attribute(name, &args.to_string())
    }

    /// Nodes of a result as handles into this context's document.
    pub fn result_nodes<'a>(&'a self, result: &QueryResult) -> Vec<NodeRef<'a>> {
        result.nodes().iter().filter_map(|&id| self.node(id)).collect()
    }
}

/// String-values of all nodes in `result`, for display.
pub fn node_strings(document: &Document, result: &QueryResult) -> Vec<String> {
    result
        .nodes()
        .iter()
        .filter(|&&id| document.contains(id))
        .map(|&id| NodeRef::new(document, id).string_value())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn ctx() -> DocumentContext {
        let xml = r#"<heros xmlns:g="urn:game"><hero name="Tom" age="20"/><g:hero name="Ann"/></heros>"#;
        DocumentContext::from(xmlctx_dom::parse(xml).unwrap())
    }

    #[rstest]
    fn scalar_results_keep_their_type() {
        let ctx = ctx();
        assert_eq!(ctx.evaluate("count(//hero)"), Some(QueryResult::Number(1.0)));
        assert_eq!(ctx.evaluate("string(//hero/@name)"), Some(QueryResult::String("Tom".into())));
        assert_eq!(ctx.evaluate("1 = 1"), Some(QueryResult::Boolean(true)));
        assert!(!ctx.evaluate("//villain").unwrap().has_result());
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    #[case("//hero[")]
    #[case("undefined-function()")]
    fn failing_expressions_give_none(#[case] expr: &str) {
        let ctx = ctx();
        assert!(ctx.evaluate(expr).is_none());
        assert_eq!(ctx.state(), crate::OperationState::success(crate::Reason::ReadAndParse));
    }

    #[rstest]
    fn document_namespaces_are_opt_in() {
        let ctx = ctx();
        assert!(ctx.evaluate("//g:hero").is_none());
        let options = EvaluateOptions::new().with_document_namespaces(true);
        assert_eq!(ctx.evaluate_with("//g:hero", &options).map(|r| r.node_count()), Some(1));
    }

    #[rstest]
    fn variables_can_hold_prior_results() {
        let ctx = ctx();
        let heroes = ctx.evaluate("//hero").unwrap();
        let options = EvaluateOptions::new().with_variable("h", heroes);
        let name = ctx.evaluate_with("string($h/@name)", &options);
        assert_eq!(name, Some(QueryResult::String("Tom".into())));
    }

    #[rstest]
    fn attribute_reads_first_match() {
        let ctx = ctx();
        let age = 20;
        assert_eq!(ctx.attribute_fmt("name", format_args!("//hero[@age={age}]")), Some("Tom".into()));
        assert_eq!(ctx.attribute("missing", "//hero"), None);
    }
}
