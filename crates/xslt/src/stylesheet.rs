//! Loading XSLT 1.0 stylesheets.

use crate::compile::{Compiler, Instruction, Variable, is_xslt};
use crate::error::{Diagnostic, Severity, StylesheetError};
use crate::output::{OutputMethod, OutputSettings};
use crate::pattern::Pattern;
use core::str::FromStr;
use std::path::Path;
use xmlctx_core::XmlSource;
use xmlctx_dom::{Document, Namespace, NodeId, NodeKind, QName};
use xmlctx_xpath::ExpandedName;

pub const XSLT_NAMESPACE: &str = "http://www.w3.org/1999/XSL/Transform";

#[derive(Debug, Clone)]
pub struct Template {
    pub name: Option<ExpandedName>,
    pub pattern: Option<Pattern>,
    pub mode: Option<String>,
    pub priority: Option<f64>,
    pub params: Vec<Variable>,
    pub body: Vec<Instruction>,
}

/// One pattern alternative of a template, the unit of conflict resolution.
#[derive(Debug, Clone)]
pub(crate) struct Rule {
    pub template: usize,
    pub alternative: usize,
    pub priority: f64,
}

/// Element name test of `xsl:strip-space` / `xsl:preserve-space`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpaceTest {
    Any,
    InNamespace(String),
    Name(Option<String>, String),
}

impl SpaceTest {
    /// Same ranking as the default priority of the equivalent pattern.
    fn rank(&self) -> u8 {
        match self {
            SpaceTest::Any => 0,
            SpaceTest::InNamespace(_) => 1,
            SpaceTest::Name(..) => 2,
        }
    }

    fn matches(&self, name: &QName) -> bool {
        match self {
            SpaceTest::Any => true,
            SpaceTest::InNamespace(uri) => name.ns_uri.as_deref() == Some(uri.as_str()),
            SpaceTest::Name(uri, local) => &name.local == local && name.ns_uri == *uri,
        }
    }
}

/// A compiled stylesheet, independent of any input document.
#[derive(Debug, Clone, Default)]
pub struct Stylesheet {
    templates: Vec<Template>,
    rules: Vec<Rule>,
    globals: Vec<Variable>,
    output: OutputSettings,
    strip: Vec<SpaceTest>,
    preserve: Vec<SpaceTest>,
    namespaces: Vec<Namespace>,
    warnings: Vec<Diagnostic>,
}

impl Stylesheet {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, StylesheetError> {
        let doc = xmlctx_dom::parse_file(path.as_ref())?;
        tracing::debug!(path = %path.as_ref().display(), "loading stylesheet");
        Self::from_document(&doc)
    }

    pub fn from_source(source: &XmlSource) -> Result<Self, StylesheetError> {
        let doc = xmlctx_dom::parse_bytes(source.bytes())?;
        tracing::debug!(source = source.name(), "loading stylesheet");
        Self::from_document(&doc)
    }

    pub fn from_document(doc: &Document) -> Result<Self, StylesheetError> {
        let Some(root) = doc.document_element() else {
            return Err(StylesheetError::NotAStylesheet(String::new()));
        };
        let mut stylesheet = Stylesheet { namespaces: collect_namespaces(doc), ..Stylesheet::default() };
        let mut compiler = Compiler::new(doc);
        if is_xslt(doc, root, "stylesheet") || is_xslt(doc, root, "transform") {
            compiler.excluded.extend(excluded_namespaces(doc, root));
            stylesheet.load_top_level(&mut compiler, root)?;
        } else if has_xslt_version(doc, root) {
            let body = vec![compiler.literal_element(root)?];
            stylesheet.add_template(Template {
                name: None,
                pattern: Some(Pattern::parse("/")?),
                mode: None,
                priority: None,
                params: Vec::new(),
                body,
            });
        } else {
            return Err(StylesheetError::NotAStylesheet(compiler.element_name(root)));
        }
        if let Some(missing) = compiler
            .called
            .iter()
            .find(|name| !stylesheet.templates.iter().any(|t| t.name.as_ref() == Some(*name)))
        {
            return Err(StylesheetError::UnknownTemplate(missing.to_string()));
        }
        tracing::debug!(
            templates = stylesheet.templates.len(),
            rules = stylesheet.rules.len(),
            globals = stylesheet.globals.len(),
            "compiled stylesheet"
        );
        Ok(stylesheet)
    }

    fn load_top_level(&mut self, compiler: &mut Compiler<'_>, root: NodeId) -> Result<(), StylesheetError> {
        let doc = compiler.doc;
        for &child in doc.children(root) {
            if doc.kind(child) != Some(NodeKind::Element) {
                continue;
            }
            let Some(name) = doc.name(child) else {
                continue;
            };
            if name.ns_uri.as_deref() != Some(XSLT_NAMESPACE) {
                // User-defined top-level data.
                continue;
            }
            match name.local.as_str() {
                "template" => {
                    let template = Self::template(compiler, child)?;
                    self.add_template(template);
                }
                "variable" | "param" => self.globals.push(compiler.variable(child)?),
                "output" => self.output(compiler, child)?,
                "strip-space" => self.strip.extend(space_tests(compiler, child)?),
                "preserve-space" => self.preserve.extend(space_tests(compiler, child)?),
                other => {
                    tracing::warn!(element = other, "ignoring unsupported top-level element");
                    self.warnings.push(Diagnostic::new(
                        Severity::Warning,
                        format!("ignoring unsupported top-level element xsl:{other}"),
                    ));
                }
            }
        }
        Ok(())
    }

    fn template(compiler: &mut Compiler<'_>, id: NodeId) -> Result<Template, StylesheetError> {
        let doc = compiler.doc;
        let name = compiler.optional(id, "name").map(|n| compiler.expanded_name(id, n));
        let pattern = compiler.optional(id, "match").map(Pattern::parse).transpose()?;
        if name.is_none() && pattern.is_none() {
            return Err(StylesheetError::MissingAttribute {
                element: compiler.element_name(id),
                attribute: "match".to_string(),
            });
        }
        let priority = match compiler.optional(id, "priority") {
            Some(text) => Some(text.trim().parse::<f64>().map_err(|_| StylesheetError::InvalidAttribute {
                element: compiler.element_name(id),
                attribute: "priority".to_string(),
                value: text.to_string(),
            })?),
            None => None,
        };
        let mode = compiler.optional(id, "mode").map(str::to_string);
        let mut params = Vec::new();
        let mut body = Vec::new();
        for &child in doc.children(id) {
            if is_xslt(doc, child, "param") {
                if !body.is_empty() {
                    return Err(StylesheetError::Misplaced {
                        element: "param".to_string(),
                        parent: compiler.element_name(id),
                    });
                }
                params.push(compiler.variable(child)?);
            } else if !compiler.is_blank_text(child) {
                body.push(child);
            }
        }
        let body = compiler.sequence(id, &body)?;
        Ok(Template { name, pattern, mode, priority, params, body })
    }

    fn add_template(&mut self, template: Template) {
        let index = self.templates.len();
        if let Some(pattern) = &template.pattern {
            for (alternative, alt) in pattern.alternatives().iter().enumerate() {
                let priority = template.priority.unwrap_or_else(|| alt.default_priority());
                self.rules.push(Rule { template: index, alternative, priority });
            }
        }
        self.templates.push(template);
    }

    fn output(&mut self, compiler: &Compiler<'_>, id: NodeId) -> Result<(), StylesheetError> {
        if let Some(method) = compiler.optional(id, "method") {
            self.output.method = OutputMethod::parse(method).ok_or_else(|| StylesheetError::InvalidAttribute {
                element: compiler.element_name(id),
                attribute: "method".to_string(),
                value: method.to_string(),
            })?;
        }
        if compiler.optional(id, "indent").is_some() {
            self.output.indent = compiler.yes_no(id, "indent")?;
        }
        if compiler.optional(id, "omit-xml-declaration").is_some() {
            self.output.omit_xml_declaration = compiler.yes_no(id, "omit-xml-declaration")?;
        }
        if let Some(encoding) = compiler.optional(id, "encoding") {
            self.output.encoding = encoding.to_string();
        }
        Ok(())
    }

    pub fn templates(&self) -> &[Template] {
        &self.templates
    }

    pub(crate) fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn globals(&self) -> &[Variable] {
        &self.globals
    }

    pub fn output_settings(&self) -> &OutputSettings {
        &self.output
    }

    /// Prefix bindings used to evaluate the stylesheet's expressions.
    pub fn namespaces(&self) -> &[Namespace] {
        &self.namespaces
    }

    /// Non-fatal findings of the load, e.g. ignored top-level elements.
    pub fn warnings(&self) -> &[Diagnostic] {
        &self.warnings
    }

    pub fn named_template(&self, name: &ExpandedName) -> Option<&Template> {
        self.templates.iter().rev().find(|t| t.name.as_ref() == Some(name))
    }

    /// Whether whitespace-only text children of an element named `name` are dropped from the input.
    pub fn strips_space(&self, name: &QName) -> bool {
        let best = |tests: &[SpaceTest]| tests.iter().filter(|t| t.matches(name)).map(SpaceTest::rank).max();
        match (best(&self.strip), best(&self.preserve)) {
            (Some(strip), Some(preserve)) => strip > preserve,
            (Some(_), None) => true,
            _ => false,
        }
    }

    pub fn has_space_stripping(&self) -> bool {
        !self.strip.is_empty()
    }
}

impl FromStr for Stylesheet {
    type Err = StylesheetError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        Self::from_document(&xmlctx_dom::parse(text)?)
    }
}

fn has_xslt_version(doc: &Document, id: NodeId) -> bool {
    doc.attributes(id).iter().any(|&attr| {
        doc.name(attr).is_some_and(|q| q.local == "version" && q.ns_uri.as_deref() == Some(XSLT_NAMESPACE))
    })
}

/// Every prefix declared anywhere in the stylesheet; the first binding of a prefix wins.
fn collect_namespaces(doc: &Document) -> Vec<Namespace> {
    let mut out: Vec<Namespace> = Vec::new();
    for id in doc.descendants(doc.root()) {
        for ns in doc.namespace_declarations(id) {
            if ns.prefix.is_some() && !out.iter().any(|seen| seen.prefix == ns.prefix) {
                out.push(ns.clone());
            }
        }
    }
    out
}

fn excluded_namespaces(doc: &Document, root: NodeId) -> Vec<String> {
    let Some(prefixes) = doc.attribute(root, "exclude-result-prefixes") else {
        return Vec::new();
    };
    prefixes
        .split_whitespace()
        .filter_map(|prefix| {
            let prefix = (prefix != "#default").then_some(prefix);
            doc.lookup_namespace(root, prefix)
        })
        .collect()
}

fn space_tests(compiler: &Compiler<'_>, id: NodeId) -> Result<Vec<SpaceTest>, StylesheetError> {
    let elements = compiler.required(id, "elements")?;
    Ok(elements
        .split_whitespace()
        .map(|token| {
            if token == "*" {
                return SpaceTest::Any;
            }
            let name = QName::parse(token);
            let uri = name.prefix.as_deref().and_then(|prefix| compiler.doc.lookup_namespace(id, Some(prefix)));
            match uri {
                Some(uri) if name.local == "*" => SpaceTest::InNamespace(uri),
                uri => SpaceTest::Name(uri, name.local),
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn stylesheet(body: &str) -> Result<Stylesheet, StylesheetError> {
        format!(r#"<xsl:stylesheet version="1.0" xmlns:xsl="{XSLT_NAMESPACE}">{body}</xsl:stylesheet>"#).parse()
    }

    #[rstest]
    fn templates_split_into_rules() {
        let sheet = stylesheet(
            r#"<xsl:template match="hero | breed" priority="2"/><xsl:template match="*"/><xsl:template name="n"/>"#,
        )
        .unwrap();
        assert_eq!(sheet.templates().len(), 3);
        let priorities: Vec<f64> = sheet.rules().iter().map(|r| r.priority).collect();
        assert_eq!(priorities, [2.0, 2.0, -0.5]);
    }

    #[rstest]
    fn output_settings_are_read() {
        let sheet = stylesheet(r#"<xsl:output method="text" indent="yes" encoding="ISO-8859-1"/>"#).unwrap();
        let output = sheet.output_settings();
        assert_eq!(output.method, OutputMethod::Text);
        assert!(output.indent);
        assert_eq!(output.encoding, "ISO-8859-1");
    }

    #[rstest]
    fn unknown_top_level_elements_become_warnings() {
        let sheet = stylesheet(r#"<xsl:key name="k" match="hero" use="@name"/>"#).unwrap();
        assert_eq!(sheet.warnings().len(), 1);
        assert!(sheet.warnings()[0].message.contains("xsl:key"));
    }

    #[rstest]
    #[case::no_match_or_name("<xsl:template/>")]
    #[case::bad_select(r#"<xsl:template match="/"><xsl:value-of select="1 +"/></xsl:template>"#)]
    #[case::bad_pattern(r#"<xsl:template match="ancestor::hero"/>"#)]
    #[case::unknown_callee(r#"<xsl:template match="/"><xsl:call-template name="missing"/></xsl:template>"#)]
    #[case::unsupported(r#"<xsl:template match="/"><xsl:number/></xsl:template>"#)]
    #[case::bad_method(r#"<xsl:output method="pdf"/>"#)]
    #[case::late_param(r#"<xsl:template name="t"><x/><xsl:param name="p"/></xsl:template>"#)]
    fn broken_stylesheets_are_rejected(#[case] body: &str) {
        assert!(stylesheet(body).is_err());
    }

    #[rstest]
    fn plain_documents_are_not_stylesheets() {
        let err = "<heros/>".parse::<Stylesheet>().unwrap_err();
        assert!(matches!(err, StylesheetError::NotAStylesheet(name) if name == "heros"));
    }

    #[rstest]
    fn literal_result_element_becomes_root_template() {
        let text = format!(
            r#"<report xsl:version="1.0" xmlns:xsl="{XSLT_NAMESPACE}"><xsl:value-of select="count(//hero)"/></report>"#
        );
        let sheet: Stylesheet = text.parse().unwrap();
        assert_eq!(sheet.templates().len(), 1);
        assert_eq!(sheet.templates()[0].pattern.as_ref().map(Pattern::source), Some("/"));
    }

    #[rstest]
    #[case("hero", false)]
    #[case("breed", true)]
    #[case("note", false)]
    fn space_stripping_prefers_specific_tests(#[case] element: &str, #[case] stripped: bool) {
        let sheet = stylesheet(r#"<xsl:strip-space elements="*"/><xsl:preserve-space elements="hero note"/>"#).unwrap();
        assert_eq!(sheet.strips_space(&QName::local(element)), stripped);
    }
}
