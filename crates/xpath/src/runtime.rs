use crate::ast::NameRef;
use crate::functions::register_core_functions;
use crate::model::XdmNode;
use crate::value::Value;
use core::fmt;
use std::collections::HashMap;
use std::sync::Arc;

pub type Arity = usize;

/// Error codes emitted by the engine, named after their XPath counterparts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Expression does not match the grammar.
    Syntax,
    UnknownVariable,
    UnknownFunction,
    UnboundPrefix,
    /// An operand has the wrong type (e.g. `count('x')`).
    Type,
    /// Evaluation needs a context node but none was supplied.
    NoContext,
    InvalidRegex,
    Dynamic,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Syntax => "err:XPST0003",
            ErrorCode::UnknownVariable => "err:XPST0008",
            ErrorCode::UnknownFunction => "err:XPST0017",
            ErrorCode::UnboundPrefix => "err:XPST0081",
            ErrorCode::Type => "err:XPTY0004",
            ErrorCode::NoContext => "err:XPDY0002",
            ErrorCode::InvalidRegex => "err:FORX0002",
            ErrorCode::Dynamic => "err:FOER0000",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} ({code})")]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    pub fn syntax(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Syntax, message)
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Type, message)
    }

    pub fn dynamic(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Dynamic, message)
    }
}

/// Namespace URI plus local part.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExpandedName {
    pub ns_uri: Option<String>,
    pub local: String,
}

impl ExpandedName {
    pub fn local(local: impl Into<String>) -> Self {
        Self { ns_uri: None, local: local.into() }
    }

    pub fn new(ns_uri: Option<&str>, local: impl Into<String>) -> Self {
        Self { ns_uri: ns_uri.map(str::to_string), local: local.into() }
    }
}

impl From<&str> for ExpandedName {
    fn from(local: &str) -> Self {
        Self::local(local)
    }
}

impl fmt::Display for ExpandedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.ns_uri {
            Some(ns) => write!(f, "{{{ns}}}{}", self.local),
            None => f.write_str(&self.local),
        }
    }
}

/// What a function implementation sees of the evaluation.
pub struct CallCtx<'c, N> {
    pub static_ctx: &'c StaticContext<N>,
    pub dyn_ctx: &'c DynamicContext<N>,
    pub context_node: Option<N>,
    pub position: usize,
    pub size: usize,
}

pub type FunctionImpl<N> =
    Arc<dyn Fn(&CallCtx<'_, N>, &[Value<N>]) -> Result<Value<N>, Error> + Send + Sync>;

#[derive(Debug, Clone)]
pub enum ResolveError {
    Unknown(ExpandedName),
    WrongArity { name: ExpandedName, argc: Arity },
}

impl From<ResolveError> for Error {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::Unknown(name) => {
                Error::new(ErrorCode::UnknownFunction, format!("unknown function {name}()"))
            }
            ResolveError::WrongArity { name, argc } => Error::new(
                ErrorCode::UnknownFunction,
                format!("function {name}() does not accept {argc} argument(s)"),
            ),
        }
    }
}

pub struct FunctionRegistry<N> {
    // Each entry is (min_arity, max_arity, impl); `None` as max means variadic.
    fns: HashMap<ExpandedName, Vec<(Arity, Option<Arity>, FunctionImpl<N>)>>,
}

impl<N> Default for FunctionRegistry<N> {
    fn default() -> Self {
        Self { fns: HashMap::new() }
    }
}

impl<N> Clone for FunctionRegistry<N> {
    fn clone(&self) -> Self {
        Self { fns: self.fns.clone() }
    }
}

impl<N> FunctionRegistry<N> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an implementation for an arity range. A later registration
    /// with the same range replaces the earlier one.
    pub fn register_range(
        &mut self,
        name: ExpandedName,
        min_arity: Arity,
        max_arity: Option<Arity>,
        func: FunctionImpl<N>,
    ) {
        let entries = self.fns.entry(name).or_default();
        entries.retain(|(min, max, _)| !(*min == min_arity && *max == max_arity));
        entries.push((min_arity, max_arity, func));
    }

    /// Convenience for functions without namespace.
    pub fn register_local<F>(&mut self, local: &str, min_arity: Arity, max_arity: Option<Arity>, f: F)
    where
        F: 'static + Send + Sync + Fn(&CallCtx<'_, N>, &[Value<N>]) -> Result<Value<N>, Error>,
    {
        self.register_range(ExpandedName::local(local), min_arity, max_arity, Arc::new(f));
    }

    pub fn contains(&self, name: &ExpandedName) -> bool {
        self.fns.contains_key(name)
    }

    /// Picks the most specific registration (highest minimum arity) accepting `argc`.
    pub fn resolve(&self, name: &ExpandedName, argc: Arity) -> Result<&FunctionImpl<N>, ResolveError> {
        let entries = self.fns.get(name).ok_or_else(|| ResolveError::Unknown(name.clone()))?;
        entries
            .iter()
            .filter(|(min, max, _)| argc >= *min && max.is_none_or(|max| argc <= max))
            .max_by_key(|(min, _, _)| *min)
            .map(|(_, _, func)| func)
            .ok_or_else(|| ResolveError::WrongArity { name: name.clone(), argc })
    }
}

/// Prefix bindings and the function library.
pub struct StaticContext<N> {
    namespaces: HashMap<String, String>,
    functions: FunctionRegistry<N>,
}

impl<N: XdmNode> Default for StaticContext<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N: XdmNode> StaticContext<N> {
    /// A context with the XPath 1.0 core function library.
    pub fn new() -> Self {
        let mut functions = FunctionRegistry::new();
        register_core_functions(&mut functions);
        Self { namespaces: HashMap::new(), functions }
    }
}

impl<N> StaticContext<N> {
    /// A context without any functions.
    pub fn empty() -> Self {
        Self { namespaces: HashMap::new(), functions: FunctionRegistry::new() }
    }

    #[must_use]
    pub fn with_namespace(mut self, prefix: &str, uri: &str) -> Self {
        self.bind_namespace(prefix, uri);
        self
    }

    pub fn bind_namespace(&mut self, prefix: &str, uri: &str) {
        self.namespaces.insert(prefix.to_string(), uri.to_string());
    }

    pub fn namespace(&self, prefix: &str) -> Option<&str> {
        self.namespaces.get(prefix).map(String::as_str)
    }

    pub fn functions(&self) -> &FunctionRegistry<N> {
        &self.functions
    }

    pub fn functions_mut(&mut self) -> &mut FunctionRegistry<N> {
        &mut self.functions
    }

    /// Resolves a lexical name; unprefixed names have no namespace.
    pub fn expand(&self, name: &NameRef) -> Result<ExpandedName, Error> {
        match &name.prefix {
            None => Ok(ExpandedName::local(name.local.clone())),
            Some(prefix) => self.resolve_prefix(prefix).map(|uri| ExpandedName {
                ns_uri: Some(uri.to_string()),
                local: name.local.clone(),
            }),
        }
    }

    pub fn resolve_prefix(&self, prefix: &str) -> Result<&str, Error> {
        if prefix == "xml" {
            return Ok(xmlctx_dom::XML_NAMESPACE);
        }
        self.namespace(prefix).ok_or_else(|| {
            Error::new(ErrorCode::UnboundPrefix, format!("namespace prefix '{prefix}' is not bound"))
        })
    }
}

/// Context item and variable bindings of one evaluation.
pub struct DynamicContext<N> {
    context_item: Option<N>,
    current_item: Option<N>,
    variables: HashMap<ExpandedName, Value<N>>,
}

impl<N> DynamicContext<N> {
    pub fn context_item(&self) -> Option<&N> {
        self.context_item.as_ref()
    }

    /// The node an enclosing template is processing (`current()`).
    pub fn current_item(&self) -> Option<&N> {
        self.current_item.as_ref().or(self.context_item.as_ref())
    }

    pub fn variable(&self, name: &ExpandedName) -> Option<&Value<N>> {
        self.variables.get(name)
    }
}

pub struct DynamicContextBuilder<N> {
    ctx: DynamicContext<N>,
}

impl<N> Default for DynamicContextBuilder<N> {
    fn default() -> Self {
        Self {
            ctx: DynamicContext {
                context_item: None,
                current_item: None,
                variables: HashMap::new(),
            },
        }
    }
}

impl<N> DynamicContextBuilder<N> {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_context_item(mut self, item: N) -> Self {
        self.ctx.context_item = Some(item);
        self
    }

    #[must_use]
    pub fn with_current_item(mut self, item: N) -> Self {
        self.ctx.current_item = Some(item);
        self
    }

    #[must_use]
    pub fn with_variable(mut self, name: impl Into<ExpandedName>, value: Value<N>) -> Self {
        self.ctx.variables.insert(name.into(), value);
        self
    }

    #[must_use]
    pub fn with_variables(mut self, variables: impl IntoIterator<Item = (ExpandedName, Value<N>)>) -> Self {
        self.ctx.variables.extend(variables);
        self
    }

    pub fn build(self) -> DynamicContext<N> {
        self.ctx
    }
}
