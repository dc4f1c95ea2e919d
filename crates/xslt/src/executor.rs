//! Template execution.
//!
//! The executor walks the input document with the compiled templates and
//! builds the result in a fragment [`Document`]. Local variables live on a
//! scope stack; a template invocation only sees the global scope and its own
//! scopes. Recoverable problems are collected as [`Diagnostic`]s, fatal ones
//! unwind the whole run through [`Halt`].

use crate::compile::{Avt, AvtPart, Instruction, Sort, SortType, Variable, VariableValue};
use crate::error::{Diagnostic, Severity};
use crate::stylesheet::{Stylesheet, Template, XSLT_NAMESPACE};
use core::cmp::Ordering;
use core::fmt;
use std::io::Write;
use std::rc::Rc;
use std::time::{Duration, Instant};
use xmlctx_core::register_extensions;
use xmlctx_dom::{Document, Namespace, NodeId, NodeKind, NodeRef, QName, TreeError};
use xmlctx_xpath::ast::{Expr, NameRef};
use xmlctx_xpath::{
    DynamicContextBuilder, Error, ExpandedName, Focus, FunctionRegistry, StaticContext, Value, XPath, XdmNode,
};

pub const DEFAULT_MAX_DEPTH: usize = 1000;

/// A fatal condition; the transform stops and produces no result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Halt(pub String);

impl fmt::Display for Halt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

type Exec<T = ()> = Result<T, Halt>;

/// Call statistics of one template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateProfile {
    pub template: usize,
    pub pattern: Option<String>,
    pub name: Option<String>,
    pub mode: Option<String>,
    pub calls: u64,
    pub total: Duration,
}

/// Writes a profile table, slowest template first.
pub fn write_profile<W: Write>(out: &mut W, entries: &[TemplateProfile]) -> std::io::Result<()> {
    let mut entries: Vec<&TemplateProfile> = entries.iter().filter(|e| e.calls > 0).collect();
    entries.sort_by(|a, b| b.total.cmp(&a.total).then(a.template.cmp(&b.template)));
    writeln!(
        out,
        "{:>6} {:>20} {:>20} {:>10} {:>8} {:>12} {:>10}",
        "number", "match", "name", "mode", "calls", "tot(us)", "avg(us)"
    )?;
    let mut calls = 0;
    let mut total = Duration::ZERO;
    for entry in entries {
        let avg = entry.total.as_micros() / u128::from(entry.calls);
        writeln!(
            out,
            "{:>6} {:>20} {:>20} {:>10} {:>8} {:>12} {:>10}",
            entry.template,
            entry.pattern.as_deref().unwrap_or(""),
            entry.name.as_deref().unwrap_or(""),
            entry.mode.as_deref().unwrap_or(""),
            entry.calls,
            entry.total.as_micros(),
            avg
        )?;
        calls += entry.calls;
        total += entry.total;
    }
    writeln!(out, "{:>6} {:>20} {:>20} {:>10} {:>8} {:>12}", "", "", "", "Total", calls, total.as_micros())
}

/// What a run produced.
#[derive(Debug, Default)]
pub struct TransformOutcome {
    /// `None` after a fatal condition.
    pub result: Option<Document>,
    pub diagnostics: Vec<Diagnostic>,
    pub profile: Vec<TemplateProfile>,
}

/// A result tree fragment bound to a variable.
#[derive(Debug)]
struct Fragment {
    doc: Document,
    text: String,
}

#[derive(Debug, Clone)]
enum Binding<'a> {
    Value(Value<NodeRef<'a>>),
    Fragment(Rc<Fragment>),
}

impl<'a> Binding<'a> {
    /// Fragments are seen by expressions as their string value.
    fn to_value(&self) -> Value<NodeRef<'a>> {
        match self {
            Binding::Value(value) => value.clone(),
            Binding::Fragment(fragment) => Value::String(fragment.text.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Frame<'a> {
    node: NodeRef<'a>,
    position: usize,
    size: usize,
}

impl<'a> Frame<'a> {
    fn new(node: NodeRef<'a>) -> Self {
        Self { node, position: 1, size: 1 }
    }
}

/// A result tree under construction and the node new content goes into.
struct Output {
    doc: Document,
    parent: NodeId,
}

impl Output {
    fn new() -> Self {
        let doc = Document::new_fragment();
        let parent = doc.root();
        Self { doc, parent }
    }

    /// Appends text, merging with a preceding text node.
    fn append_text(&mut self, text: &str) -> Result<(), TreeError> {
        if text.is_empty() {
            return Ok(());
        }
        if let Some(&last) = self.doc.children(self.parent).last()
            && self.doc.kind(last) == Some(NodeKind::Text)
        {
            let merged = format!("{}{text}", self.doc.value(last));
            return self.doc.set_value(last, merged);
        }
        let node = self.doc.create_text(text);
        self.doc.append_child(self.parent, node)
    }

    fn append(&mut self, node: NodeId) -> Result<(), TreeError> {
        self.doc.append_child(self.parent, node)
    }

    /// Declares `uri` for `prefix` on `element` unless it is already in scope there.
    fn ensure_namespace(&mut self, element: NodeId, prefix: Option<&str>, uri: &str) -> Result<(), TreeError> {
        if self.doc.lookup_namespace(element, prefix).as_deref().unwrap_or("") == uri {
            return Ok(());
        }
        self.doc.declare_namespace(element, prefix, uri)
    }

    fn open_element(&mut self, name: QName, namespaces: &[Namespace]) -> Result<NodeId, TreeError> {
        let prefix = name.prefix.clone();
        let uri = name.ns_uri.clone().unwrap_or_default();
        let element = self.doc.create_element(name);
        self.append(element)?;
        for ns in namespaces {
            self.ensure_namespace(element, ns.prefix.as_deref(), &ns.uri)?;
        }
        self.ensure_namespace(element, prefix.as_deref(), &uri)?;
        Ok(element)
    }

    fn add_attribute(&mut self, mut name: QName, value: String) -> Result<(), String> {
        let element = self.parent;
        if self.doc.kind(element) != Some(NodeKind::Element) {
            return Err(format!("attribute '{name}' can only be added to an element"));
        }
        if !self.doc.children(element).is_empty() {
            return Err(format!("attribute '{name}' added after children of element"));
        }
        if let Some(uri) = name.ns_uri.clone() {
            if name.prefix.is_none() {
                let known = self
                    .doc
                    .in_scope_namespaces(element)
                    .into_iter()
                    .find(|ns| ns.uri == uri && ns.prefix.is_some())
                    .and_then(|ns| ns.prefix);
                name.prefix = Some(known.unwrap_or_else(|| format!("ns{}", element.index())));
            }
            self.ensure_namespace(element, name.prefix.as_deref(), &uri).map_err(|err| err.to_string())?;
        }
        self.doc.set_attribute(element, name, value).map(|_| ()).map_err(|err| err.to_string())
    }
}

fn is_blank(text: &str) -> bool {
    text.chars().all(|c| matches!(c, ' ' | '\t' | '\r' | '\n'))
}

fn is_ncname(text: &str) -> bool {
    let mut chars = text.chars();
    chars.next().is_some_and(|c| c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

fn is_qname(text: &str) -> bool {
    match text.split_once(':') {
        Some((prefix, local)) => is_ncname(prefix) && is_ncname(local),
        None => is_ncname(text),
    }
}

/// Removes whitespace-only text nodes that `xsl:strip-space` selects.
///
/// An `xml:space="preserve"` on the nearest declaring ancestor keeps them.
pub fn strip_space(stylesheet: &Stylesheet, doc: &mut Document) -> usize {
    let preserved = |doc: &Document, element: NodeId| {
        let mut current = Some(element);
        while let Some(node) = current {
            match doc.attribute(node, "xml:space") {
                Some("preserve") => return true,
                Some("default") => return false,
                _ => current = doc.parent(node),
            }
        }
        false
    };
    let blank: Vec<NodeId> = doc
        .descendants(doc.root())
        .into_iter()
        .filter(|&id| {
            doc.kind(id) == Some(NodeKind::Text)
                && is_blank(doc.value(id))
                && doc.parent(id).is_some_and(|parent| {
                    doc.name(parent).is_some_and(|name| stylesheet.strips_space(name)) && !preserved(doc, parent)
                })
        })
        .collect();
    let mut removed = 0;
    for id in blank {
        match doc.remove(id) {
            Ok(()) => removed += 1,
            Err(error) => tracing::debug!(%error, node = %id, "cannot strip whitespace node"),
        }
    }
    removed
}

fn register_xslt_functions<'a>(reg: &mut FunctionRegistry<NodeRef<'a>>) {
    reg.register_local("current", 0, Some(0), |ctx, _| {
        Ok(Value::NodeSet(ctx.dyn_ctx.current_item().copied().into_iter().collect()))
    });
    reg.register_local("generate-id", 0, Some(1), |ctx, args| {
        let node = match args.first() {
            Some(value) => value
                .as_nodes()
                .ok_or_else(|| Error::type_error("generate-id() expects a node-set"))?
                .first()
                .copied(),
            None => ctx.context_node,
        };
        Ok(Value::String(node.map(|n| format!("id{}", n.id().index())).unwrap_or_default()))
    });
    reg.register_local("system-property", 1, Some(1), |ctx, args| {
        let name = ctx.static_ctx.expand(&NameRef::parse(&args[0].to_string_value()))?;
        if name.ns_uri.as_deref() != Some(XSLT_NAMESPACE) {
            return Ok(Value::String(String::new()));
        }
        Ok(match name.local.as_str() {
            "version" => Value::Number(1.0),
            "vendor" => Value::String("xmlctx".to_string()),
            _ => Value::String(String::new()),
        })
    });
    reg.register_local("function-available", 1, Some(1), |ctx, args| {
        let name = ctx.static_ctx.expand(&NameRef::parse(&args[0].to_string_value()))?;
        Ok(Value::Boolean(ctx.static_ctx.functions().contains(&name)))
    });
}

/// Runs one stylesheet over one input document.
pub struct Executor<'s, 'a> {
    stylesheet: &'s Stylesheet,
    input: &'a Document,
    static_ctx: StaticContext<NodeRef<'a>>,
    params: Vec<(ExpandedName, String)>,
    scopes: Vec<Vec<(ExpandedName, Binding<'a>)>>,
    /// First scope of the running template; scope 0 holds the globals.
    base: usize,
    main: Output,
    fragments: Vec<Output>,
    depth: usize,
    max_depth: usize,
    diagnostics: Vec<Diagnostic>,
    profile: Option<Vec<TemplateProfile>>,
}

impl<'s, 'a> Executor<'s, 'a> {
    pub fn new(stylesheet: &'s Stylesheet, input: &'a Document) -> Self {
        let mut static_ctx = StaticContext::new();
        register_extensions(static_ctx.functions_mut());
        register_xslt_functions(static_ctx.functions_mut());
        for ns in stylesheet.namespaces() {
            if let Some(prefix) = &ns.prefix {
                static_ctx.bind_namespace(prefix, &ns.uri);
            }
        }
        Self {
            stylesheet,
            input,
            static_ctx,
            params: Vec::new(),
            scopes: vec![Vec::new()],
            base: 1,
            main: Output::new(),
            fragments: Vec::new(),
            depth: 0,
            max_depth: DEFAULT_MAX_DEPTH,
            diagnostics: Vec::new(),
            profile: None,
        }
    }

    /// Binds a global parameter to an expression evaluated against the input root.
    #[must_use]
    pub fn with_param(mut self, name: &str, expr: impl Into<String>) -> Self {
        self.params.push((ExpandedName::local(name), expr.into()));
        self
    }

    #[must_use]
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    #[must_use]
    pub fn with_profiling(mut self, enabled: bool) -> Self {
        self.profile = enabled.then(|| {
            self.stylesheet
                .templates()
                .iter()
                .enumerate()
                .map(|(index, template)| TemplateProfile {
                    template: index,
                    pattern: template.pattern.as_ref().map(|p| p.source().to_string()),
                    name: template.name.as_ref().map(ToString::to_string),
                    mode: template.mode.clone(),
                    calls: 0,
                    total: Duration::ZERO,
                })
                .collect()
        });
        self
    }

    pub fn run(mut self) -> TransformOutcome {
        let started = Instant::now();
        let root = Frame::new(NodeRef::new(self.input, self.input.root()));
        let outcome = self.bind_globals(root).and_then(|()| self.apply_to(&[root.node], None, &[]));
        let result = match outcome {
            Ok(()) => Some(self.finish()),
            Err(Halt(message)) => {
                tracing::warn!(%message, "transform stopped");
                self.diagnostics.push(Diagnostic::new(Severity::Fatal, message));
                None
            }
        };
        tracing::debug!(
            ok = result.is_some(),
            diagnostics = self.diagnostics.len(),
            elapsed_us = started.elapsed().as_micros(),
            "transform finished"
        );
        TransformOutcome { result, diagnostics: self.diagnostics, profile: self.profile.unwrap_or_default() }
    }

    /// Turns the result fragment into a regular document when it is well-formed.
    fn finish(&mut self) -> Document {
        let fragment = std::mem::replace(&mut self.main, Output::new()).doc;
        let top: Vec<NodeId> = fragment.children(fragment.root()).to_vec();
        let elements = top.iter().filter(|&&id| fragment.kind(id) == Some(NodeKind::Element)).count();
        let loose_text = top
            .iter()
            .any(|&id| fragment.kind(id).is_some_and(NodeKind::is_text) && !is_blank(fragment.value(id)));
        if elements != 1 || loose_text {
            return fragment;
        }
        let mut doc = Document::new();
        for id in top {
            if fragment.kind(id).is_some_and(NodeKind::is_text) {
                continue;
            }
            let placed = doc.import_node(&fragment, id).and_then(|copy| doc.append_child(doc.root(), copy));
            if let Err(error) = placed {
                tracing::debug!(%error, "keeping result as fragment");
                return fragment;
            }
        }
        doc
    }

    fn warn(&mut self, severity: Severity, message: String) {
        tracing::debug!(%severity, %message, "transform diagnostic");
        self.diagnostics.push(Diagnostic::new(severity, message));
    }

    fn bind_globals(&mut self, root: Frame<'a>) -> Exec {
        for (name, expr) in std::mem::take(&mut self.params) {
            let xpath = XPath::compile(&expr)
                .map_err(|err| Halt(format!("invalid expression '{expr}' for parameter '{name}': {err}")))?;
            let value = self.evaluate(&xpath, root)?;
            self.scopes[0].push((name, Binding::Value(value)));
        }
        let stylesheet = self.stylesheet;
        for global in stylesheet.globals() {
            if global.param && self.scopes[0].iter().any(|(name, _)| *name == global.name) {
                continue;
            }
            let binding = self.bind(&global.value, root)?;
            self.scopes[0].push((global.name.clone(), binding));
        }
        Ok(())
    }

    fn out(&mut self) -> &mut Output {
        self.fragments.last_mut().unwrap_or(&mut self.main)
    }

    fn visible_variables(&self) -> impl Iterator<Item = (ExpandedName, Value<NodeRef<'a>>)> + '_ {
        self.scopes[..1]
            .iter()
            .chain(self.scopes.get(self.base..).unwrap_or_default())
            .flatten()
            .map(|(name, binding)| (name.clone(), binding.to_value()))
    }

    fn lookup(&self, name: &ExpandedName) -> Option<&Binding<'a>> {
        self.scopes
            .get(self.base..)
            .unwrap_or_default()
            .iter()
            .rev()
            .chain(self.scopes[..1].iter())
            .find_map(|scope| scope.iter().rev().find(|(n, _)| n == name).map(|(_, binding)| binding))
    }

    fn declare(&mut self, name: ExpandedName, binding: Binding<'a>) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.push((name, binding));
        }
    }

    fn evaluate(&self, xpath: &XPath, frame: Frame<'a>) -> Exec<Value<NodeRef<'a>>> {
        let dyn_ctx = DynamicContextBuilder::new()
            .with_context_item(frame.node)
            .with_current_item(frame.node)
            .with_variables(self.visible_variables())
            .build();
        let focus = Focus::at(frame.node, frame.position, frame.size);
        xpath
            .evaluate_with_focus(&self.static_ctx, &dyn_ctx, &focus)
            .map_err(|err| Halt(format!("XPath evaluation of '{}' failed: {err}", xpath.source())))
    }

    fn select(&self, xpath: &XPath, frame: Frame<'a>) -> Exec<Vec<NodeRef<'a>>> {
        self.evaluate(xpath, frame)?
            .into_nodes()
            .map_err(|err| Halt(format!("'{}' does not select nodes: {err}", xpath.source())))
    }

    fn avt(&self, avt: &Avt, frame: Frame<'a>) -> Exec<String> {
        let mut out = String::new();
        for part in avt.parts() {
            match part {
                AvtPart::Literal(text) => out.push_str(text),
                AvtPart::Expr(xpath) => out.push_str(&self.evaluate(xpath, frame)?.to_string_value()),
            }
        }
        Ok(out)
    }

    fn bind(&mut self, value: &'s VariableValue, frame: Frame<'a>) -> Exec<Binding<'a>> {
        Ok(match value {
            VariableValue::Select(xpath) => Binding::Value(self.evaluate(xpath, frame)?),
            VariableValue::Content(body) => {
                let doc = self.capture(body, frame)?;
                let text = doc.string_value(doc.root());
                Binding::Fragment(Rc::new(Fragment { doc, text }))
            }
            VariableValue::Empty => Binding::Value(Value::String(String::new())),
        })
    }

    /// Instantiates `body` into a fresh fragment.
    fn capture(&mut self, body: &'s [Instruction], frame: Frame<'a>) -> Exec<Document> {
        self.fragments.push(Output::new());
        let outcome = self.sequence(body, frame);
        let fragment = self.fragments.pop().map(|output| output.doc).unwrap_or_default();
        outcome.map(|()| fragment)
    }

    fn text_of(&mut self, body: &'s [Instruction], frame: Frame<'a>) -> Exec<String> {
        let doc = self.capture(body, frame)?;
        Ok(doc.string_value(doc.root()))
    }

    fn sequence(&mut self, body: &'s [Instruction], frame: Frame<'a>) -> Exec {
        self.scopes.push(Vec::new());
        let outcome = body.iter().try_for_each(|instruction| self.execute(instruction, frame));
        self.scopes.pop();
        outcome
    }

    fn tree(&mut self, outcome: Result<(), TreeError>) {
        if let Err(error) = outcome {
            self.warn(Severity::Error, format!("cannot build result tree: {error}"));
        }
    }

    /// Runs `body` with `element` as the output parent.
    fn inside(&mut self, element: NodeId, body: &'s [Instruction], frame: Frame<'a>) -> Exec {
        let saved = std::mem::replace(&mut self.out().parent, element);
        let outcome = self.sequence(body, frame);
        self.out().parent = saved;
        outcome
    }

    fn execute(&mut self, instruction: &'s Instruction, frame: Frame<'a>) -> Exec {
        match instruction {
            Instruction::Text(text) => {
                let outcome = self.out().append_text(text);
                self.tree(outcome);
            }
            Instruction::ValueOf(xpath) => {
                let text = self.evaluate(xpath, frame)?.to_string_value();
                let outcome = self.out().append_text(&text);
                self.tree(outcome);
            }
            Instruction::CopyOf(xpath) => self.copy_of(xpath, frame)?,
            Instruction::Copy(body) => self.shallow_copy(body, frame)?,
            Instruction::LiteralElement { name, namespaces, attributes, body } => {
                let element = match self.out().open_element(name.clone(), namespaces) {
                    Ok(element) => element,
                    Err(error) => {
                        self.tree(Err(error));
                        return Ok(());
                    }
                };
                for (attr_name, value) in attributes {
                    let value = self.avt(value, frame)?;
                    let output = self.out();
                    let saved = std::mem::replace(&mut output.parent, element);
                    let outcome = output.add_attribute(attr_name.clone(), value);
                    output.parent = saved;
                    if let Err(message) = outcome {
                        self.warn(Severity::Error, message);
                    }
                }
                self.inside(element, body, frame)?;
            }
            Instruction::Element { name, namespace, in_scope, body } => {
                match self.computed_name(name, namespace.as_ref(), in_scope, true, frame)? {
                    Some(qname) => match self.out().open_element(qname, &[]) {
                        Ok(element) => self.inside(element, body, frame)?,
                        Err(error) => self.tree(Err(error)),
                    },
                    None => self.sequence(body, frame)?,
                }
            }
            Instruction::Attribute { name, namespace, in_scope, body } => {
                let qname = self.computed_name(name, namespace.as_ref(), in_scope, false, frame)?;
                let value = self.text_of(body, frame)?;
                if let Some(qname) = qname {
                    if qname.prefix.is_none() && qname.local == "xmlns" {
                        self.warn(Severity::Error, "xsl:attribute cannot create a namespace declaration".into());
                    } else if let Err(message) = self.out().add_attribute(qname, value) {
                        self.warn(Severity::Error, message);
                    }
                }
            }
            Instruction::Comment(body) => {
                let text = self.text_of(body, frame)?;
                let output = self.out();
                let comment = output.doc.create_comment(text);
                let outcome = output.append(comment);
                self.tree(outcome);
            }
            Instruction::ProcessingInstruction { name, body } => {
                let target = self.avt(name, frame)?;
                let data = self.text_of(body, frame)?;
                if !is_ncname(&target) || target.eq_ignore_ascii_case("xml") {
                    self.warn(Severity::Error, format!("invalid processing instruction target '{target}'"));
                } else {
                    let output = self.out();
                    let pi = output.doc.create_processing_instruction(&target, data);
                    let outcome = output.append(pi);
                    self.tree(outcome);
                }
            }
            Instruction::ApplyTemplates { select, mode, sorts, params } => {
                let mut nodes = match select {
                    Some(xpath) => self.select(xpath, frame)?,
                    None => XdmNode::children(&frame.node),
                };
                self.sort(&mut nodes, sorts)?;
                let params = self.with_params(params, frame)?;
                self.apply_to(&nodes, mode.as_deref(), &params)?;
            }
            Instruction::CallTemplate { name, params } => {
                let params = self.with_params(params, frame)?;
                let stylesheet = self.stylesheet;
                let index = stylesheet
                    .templates()
                    .iter()
                    .rposition(|t| t.name.as_ref() == Some(name))
                    .ok_or_else(|| Halt(format!("call to unknown named template '{name}'")))?;
                self.invoke(index, frame, &params)?;
            }
            Instruction::ForEach { select, sorts, body } => {
                let mut nodes = self.select(select, frame)?;
                self.sort(&mut nodes, sorts)?;
                let size = nodes.len();
                for (index, node) in nodes.into_iter().enumerate() {
                    self.sequence(body, Frame { node, position: index + 1, size })?;
                }
            }
            Instruction::If { test, body } => {
                if self.evaluate(test, frame)?.to_boolean() {
                    self.sequence(body, frame)?;
                }
            }
            Instruction::Choose { branches, otherwise } => {
                let mut chosen = otherwise;
                for (test, body) in branches {
                    if self.evaluate(test, frame)?.to_boolean() {
                        chosen = body;
                        break;
                    }
                }
                self.sequence(chosen, frame)?;
            }
            Instruction::Variable(variable) => {
                let binding = self.bind(&variable.value, frame)?;
                self.declare(variable.name.clone(), binding);
            }
            Instruction::Message { terminate, body } => {
                let text = self.text_of(body, frame)?;
                if *terminate {
                    return Err(Halt(format!("xsl:message terminated the transform: {text}")));
                }
                tracing::info!(message = %text, "xsl:message");
                self.warn(Severity::Message, text);
            }
        }
        Ok(())
    }

    /// Resolves the name of `xsl:element` / `xsl:attribute`; `None` after a reported error.
    fn computed_name(
        &mut self,
        name: &Avt,
        namespace: Option<&Avt>,
        in_scope: &[Namespace],
        element: bool,
        frame: Frame<'a>,
    ) -> Exec<Option<QName>> {
        let lexical = self.avt(name, frame)?;
        if !is_qname(&lexical) {
            self.warn(Severity::Error, format!("'{lexical}' is not a valid name"));
            return Ok(None);
        }
        let mut qname = QName::parse(&lexical);
        qname.ns_uri = match namespace {
            Some(namespace) => Some(self.avt(namespace, frame)?).filter(|uri| !uri.is_empty()),
            None => {
                let prefix = qname.prefix.as_deref();
                let declared = in_scope.iter().find(|ns| ns.prefix.as_deref() == prefix).map(|ns| ns.uri.clone());
                match (prefix, declared) {
                    (Some("xml"), _) => Some(xmlctx_dom::XML_NAMESPACE.to_string()),
                    (Some(prefix), None) => {
                        self.warn(Severity::Error, format!("namespace prefix '{prefix}' is not declared"));
                        return Ok(None);
                    }
                    (None, _) if !element => None,
                    (_, declared) => declared,
                }
            }
        };
        if qname.ns_uri.is_none() && qname.prefix.is_some() {
            qname.prefix = None;
        }
        Ok(Some(qname))
    }

    fn with_params(&mut self, params: &'s [Variable], frame: Frame<'a>) -> Exec<Vec<(ExpandedName, Binding<'a>)>> {
        params.iter().map(|param| Ok((param.name.clone(), self.bind(&param.value, frame)?))).collect()
    }

    fn sort(&self, nodes: &mut Vec<NodeRef<'a>>, sorts: &[Sort]) -> Exec {
        if sorts.is_empty() {
            return Ok(());
        }
        enum Key {
            Text(String),
            Number(f64),
        }
        let size = nodes.len();
        let mut keyed = Vec::with_capacity(size);
        for (index, &node) in nodes.iter().enumerate() {
            let frame = Frame { node, position: index + 1, size };
            let mut keys = Vec::with_capacity(sorts.len());
            for sort in sorts {
                let value = self.evaluate(&sort.select, frame)?;
                keys.push(match sort.data_type {
                    SortType::Text => Key::Text(value.to_string_value()),
                    SortType::Number => Key::Number(value.to_number()),
                });
            }
            keyed.push((keys, node));
        }
        keyed.sort_by(|(a, _), (b, _)| {
            for ((left, right), sort) in a.iter().zip(b).zip(sorts) {
                let ordering = match (left, right) {
                    (Key::Text(l), Key::Text(r)) => l.cmp(r),
                    (Key::Number(l), Key::Number(r)) => match (l.is_nan(), r.is_nan()) {
                        (true, true) => Ordering::Equal,
                        (true, false) => Ordering::Less,
                        (false, true) => Ordering::Greater,
                        (false, false) => l.partial_cmp(r).unwrap_or(Ordering::Equal),
                    },
                    _ => Ordering::Equal,
                };
                let ordering = if sort.descending { ordering.reverse() } else { ordering };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });
        *nodes = keyed.into_iter().map(|(_, node)| node).collect();
        Ok(())
    }

    /// Processes `nodes` as the current node list, with the best matching rule or the built-in one.
    fn apply_to(
        &mut self,
        nodes: &[NodeRef<'a>],
        mode: Option<&str>,
        params: &[(ExpandedName, Binding<'a>)],
    ) -> Exec {
        let size = nodes.len();
        for (index, &node) in nodes.iter().enumerate() {
            let frame = Frame { node, position: index + 1, size };
            match self.find_template(node, mode)? {
                Some(template) => self.invoke(template, frame, params)?,
                None => self.builtin(frame, mode)?,
            }
        }
        Ok(())
    }

    fn find_template(&self, node: NodeRef<'a>, mode: Option<&str>) -> Exec<Option<usize>> {
        let dyn_ctx = DynamicContextBuilder::new().with_variables(self.visible_variables()).build();
        let templates = self.stylesheet.templates();
        let mut best: Option<(usize, f64)> = None;
        for rule in self.stylesheet.rules() {
            let template = &templates[rule.template];
            if template.mode.as_deref() != mode || best.is_some_and(|(_, priority)| rule.priority < priority) {
                continue;
            }
            let Some(alternative) = template.pattern.as_ref().and_then(|p| p.alternatives().get(rule.alternative))
            else {
                continue;
            };
            let matched = alternative
                .matches(node, &self.static_ctx, &dyn_ctx)
                .map_err(|err| Halt(format!("cannot match pattern '{}': {err}", pattern_source(template))))?;
            if matched {
                best = Some((rule.template, rule.priority));
            }
        }
        Ok(best.map(|(template, _)| template))
    }

    fn builtin(&mut self, frame: Frame<'a>, mode: Option<&str>) -> Exec {
        match XdmNode::kind(&frame.node) {
            NodeKind::Document | NodeKind::Element => {
                let children = XdmNode::children(&frame.node);
                self.enter()?;
                let outcome = self.apply_to(&children, mode, &[]);
                self.depth -= 1;
                outcome
            }
            NodeKind::Text | NodeKind::CData | NodeKind::Attribute => {
                let outcome = self.out().append_text(&frame.node.string_value());
                self.tree(outcome);
                Ok(())
            }
            NodeKind::Comment | NodeKind::ProcessingInstruction => Ok(()),
        }
    }

    fn enter(&mut self) -> Exec {
        self.depth += 1;
        if self.depth > self.max_depth {
            return Err(Halt(format!(
                "template nesting exceeds the limit of {} (infinite recursion?)",
                self.max_depth
            )));
        }
        Ok(())
    }

    fn invoke(&mut self, index: usize, frame: Frame<'a>, params: &[(ExpandedName, Binding<'a>)]) -> Exec {
        self.enter()?;
        let started = self.profile.is_some().then(Instant::now);
        let stylesheet = self.stylesheet;
        let template: &'s Template = &stylesheet.templates()[index];
        let saved_base = std::mem::replace(&mut self.base, self.scopes.len());
        self.scopes.push(Vec::new());
        let outcome = self.run_template(template, frame, params);
        self.scopes.truncate(self.base);
        self.base = saved_base;
        self.depth -= 1;
        if let (Some(started), Some(profile)) = (started, self.profile.as_mut())
            && let Some(entry) = profile.get_mut(index)
        {
            entry.calls += 1;
            entry.total += started.elapsed();
        }
        outcome
    }

    fn run_template(
        &mut self,
        template: &'s Template,
        frame: Frame<'a>,
        params: &[(ExpandedName, Binding<'a>)],
    ) -> Exec {
        for param in &template.params {
            let binding = match params.iter().rev().find(|(name, _)| *name == param.name) {
                Some((_, binding)) => binding.clone(),
                None => self.bind(&param.value, frame)?,
            };
            self.declare(param.name.clone(), binding);
        }
        self.sequence(&template.body, frame)
    }

    fn copy_of(&mut self, xpath: &'s XPath, frame: Frame<'a>) -> Exec {
        if let Expr::Variable(name) = xpath.expr() {
            let expanded = self
                .static_ctx
                .expand(name)
                .map_err(|err| Halt(format!("XPath evaluation of '{}' failed: {err}", xpath.source())))?;
            if let Some(Binding::Fragment(fragment)) = self.lookup(&expanded) {
                let fragment = Rc::clone(fragment);
                for &child in fragment.doc.children(fragment.doc.root()) {
                    self.copy_node(&fragment.doc, child);
                }
                return Ok(());
            }
        }
        match self.evaluate(xpath, frame)? {
            Value::NodeSet(nodes) => {
                for node in nodes {
                    self.copy_node(node.document(), node.id());
                }
            }
            other => {
                let outcome = self.out().append_text(&other.to_string_value());
                self.tree(outcome);
            }
        }
        Ok(())
    }

    /// Deep-copies a node of `source` into the output.
    fn copy_node(&mut self, source: &Document, id: NodeId) {
        let output = self.out();
        let outcome = match source.kind(id) {
            Some(NodeKind::Document) => {
                for &child in source.children(id) {
                    self.copy_node(source, child);
                }
                return;
            }
            Some(NodeKind::Attribute) => {
                let name = source.name(id).cloned().unwrap_or_default();
                if let Err(message) = output.add_attribute(name, source.value(id).to_string()) {
                    self.warn(Severity::Error, message);
                }
                return;
            }
            Some(NodeKind::Text) => output.append_text(source.value(id)),
            _ => output.doc.import_node(source, id).and_then(|copy| output.append(copy)),
        };
        self.tree(outcome);
    }

    fn shallow_copy(&mut self, body: &'s [Instruction], frame: Frame<'a>) -> Exec {
        let node = frame.node;
        let input = self.input;
        match XdmNode::kind(&node) {
            NodeKind::Document => return self.sequence(body, frame),
            NodeKind::Element => {
                let name = node.name().cloned().unwrap_or_default();
                let namespaces = input.in_scope_namespaces(node.id());
                match self.out().open_element(name, &namespaces) {
                    Ok(element) => return self.inside(element, body, frame),
                    Err(error) => self.tree(Err(error)),
                }
            }
            NodeKind::Attribute => {
                let name = node.name().cloned().unwrap_or_default();
                if let Err(message) = self.out().add_attribute(name, node.string_value()) {
                    self.warn(Severity::Error, message);
                }
            }
            NodeKind::Text => {
                let outcome = self.out().append_text(&node.string_value());
                self.tree(outcome);
            }
            NodeKind::CData | NodeKind::Comment | NodeKind::ProcessingInstruction => {
                let output = self.out();
                let outcome = output.doc.import_node(input, node.id()).and_then(|copy| output.append(copy));
                self.tree(outcome);
            }
        }
        Ok(())
    }
}

fn pattern_source(template: &Template) -> &str {
    template.pattern.as_ref().map_or("", |pattern| pattern.source())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn stylesheet(body: &str) -> Stylesheet {
        format!(r#"<xsl:stylesheet version="1.0" xmlns:xsl="{XSLT_NAMESPACE}">{body}</xsl:stylesheet>"#)
            .parse()
            .unwrap()
    }

    fn run(body: &str, input: &str) -> TransformOutcome {
        let doc = xmlctx_dom::parse(input).unwrap();
        Executor::new(&stylesheet(body), &doc).run()
    }

    fn markup(outcome: &TransformOutcome) -> String {
        let doc = outcome.result.as_ref().unwrap();
        xmlctx_dom::to_string(doc, &xmlctx_dom::OutputOptions::new().with_declaration(false)).unwrap()
    }

    #[rstest]
    fn builtin_rules_copy_text() {
        let outcome = run("", "<heros><hero>Thorin</hero><hero>Elanor</hero></heros>");
        assert_eq!(markup(&outcome), "ThorinElanor\n");
        assert!(outcome.result.unwrap().is_fragment());
    }

    #[rstest]
    fn higher_priority_wins_then_later_template() {
        let body = r#"
            <xsl:template match="/"><r><xsl:apply-templates select="//hero"/></r></xsl:template>
            <xsl:template match="hero">a</xsl:template>
            <xsl:template match="hero">b</xsl:template>
            <xsl:template match="hero[@age > 100]">c</xsl:template>
            <xsl:template match="*" priority="-1">d</xsl:template>"#;
        let outcome = run(body, r#"<heros><hero age="20"/><hero age="120"/></heros>"#);
        assert_eq!(markup(&outcome), "<r>bc</r>\n");
    }

    #[rstest]
    fn attribute_after_children_is_reported() {
        let body = r#"<xsl:template match="/"><r>x<xsl:attribute name="late">1</xsl:attribute></r></xsl:template>"#;
        let outcome = run(body, "<a/>");
        assert_eq!(markup(&outcome), "<r>x</r>\n");
        assert_eq!(outcome.diagnostics.len(), 1);
        assert_eq!(outcome.diagnostics[0].severity, Severity::Error);
    }

    #[rstest]
    fn numeric_sort_puts_nan_first() {
        let body = r#"<xsl:template match="/">
            <xsl:for-each select="//t">
                <xsl:sort select="@v" data-type="number"/>
                <xsl:value-of select="@id"/>
            </xsl:for-each>
        </xsl:template>"#;
        let outcome = run(body, r#"<r><t id="a" v="10"/><t id="b" v="x"/><t id="c" v="2"/><t id="d" v="10"/></r>"#);
        assert_eq!(markup(&outcome), "bcad\n");
    }

    #[rstest]
    fn recursion_limit_is_fatal() {
        let sheet = stylesheet(
            r#"<xsl:template match="/"><xsl:call-template name="loop"/></xsl:template>
               <xsl:template name="loop"><xsl:call-template name="loop"/></xsl:template>"#,
        );
        let doc = xmlctx_dom::parse("<a/>").unwrap();
        let outcome = Executor::new(&sheet, &doc).with_max_depth(50).run();
        assert!(outcome.result.is_none());
        assert!(outcome.diagnostics.last().is_some_and(Diagnostic::is_fatal));
    }

    #[rstest]
    fn generate_id_is_stable_per_node() {
        let body = r#"<xsl:template match="/">
            <xsl:value-of select="generate-id(//hero) = generate-id(//hero[1])"/>
            <xsl:value-of select="generate-id(//hero[1]) = generate-id(//hero[2])"/>
        </xsl:template>"#;
        assert_eq!(markup(&run(body, "<h><hero/><hero/></h>")), "truefalse\n");
    }

    #[rstest]
    fn stripping_removes_blank_text() {
        let sheet = stylesheet(r#"<xsl:strip-space elements="*"/>"#);
        let mut doc = xmlctx_dom::parse("<a>\n <b> </b>\n <c xml:space=\"preserve\"> </c></a>").unwrap();
        assert_eq!(strip_space(&sheet, &mut doc), 3);
    }

    #[rstest]
    fn profile_counts_calls() {
        let sheet = stylesheet(r#"<xsl:template match="hero"/>"#);
        let doc = xmlctx_dom::parse("<h><hero/><hero/></h>").unwrap();
        let outcome = Executor::new(&sheet, &doc).with_profiling(true).run();
        assert_eq!(outcome.profile[0].calls, 2);
        let mut table = Vec::new();
        write_profile(&mut table, &outcome.profile).unwrap();
        let table = String::from_utf8(table).unwrap();
        assert!(table.lines().any(|line| line.contains("hero") && line.contains(" 2 ")));
    }
}
