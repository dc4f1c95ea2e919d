//! Compilation of template bodies into instruction trees.

use crate::error::StylesheetError;
use crate::stylesheet::XSLT_NAMESPACE;
use xmlctx_dom::{Document, Namespace, NodeId, NodeKind, QName};
use xmlctx_xpath::{ExpandedName, XPath};

/// Part of an attribute value template.
#[derive(Debug, Clone)]
pub enum AvtPart {
    Literal(String),
    Expr(XPath),
}

/// An attribute value with `{expr}` substitutions.
#[derive(Debug, Clone)]
pub struct Avt {
    parts: Vec<AvtPart>,
}

impl Avt {
    pub fn parse(text: &str) -> Result<Self, String> {
        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut chars = text.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '}' => return Err("unmatched '}'".to_string()),
                '{' => {
                    let mut expr = String::new();
                    let mut quote = None;
                    loop {
                        match (chars.next(), quote) {
                            (None, _) => return Err("unterminated '{'".to_string()),
                            (Some('}'), None) => break,
                            (Some(q @ ('"' | '\'')), None) => {
                                quote = Some(q);
                                expr.push(q);
                            }
                            (Some(q), Some(open)) if q == open => {
                                quote = None;
                                expr.push(q);
                            }
                            (Some(other), _) => expr.push(other),
                        }
                    }
                    if !literal.is_empty() {
                        parts.push(AvtPart::Literal(std::mem::take(&mut literal)));
                    }
                    parts.push(AvtPart::Expr(XPath::compile(&expr).map_err(|err| err.to_string())?));
                }
                other => literal.push(other),
            }
        }
        if !literal.is_empty() {
            parts.push(AvtPart::Literal(literal));
        }
        Ok(Self { parts })
    }

    pub fn parts(&self) -> &[AvtPart] {
        &self.parts
    }

    /// The value when the template has no expressions.
    pub fn as_static(&self) -> Option<String> {
        self.parts
            .iter()
            .map(|part| match part {
                AvtPart::Literal(text) => Some(text.as_str()),
                AvtPart::Expr(_) => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortType {
    Text,
    Number,
}

#[derive(Debug, Clone)]
pub struct Sort {
    pub select: XPath,
    pub data_type: SortType,
    pub descending: bool,
}

#[derive(Debug, Clone)]
pub enum VariableValue {
    Select(XPath),
    /// A result tree fragment built from the content.
    Content(Vec<Instruction>),
    Empty,
}

/// `xsl:variable`, `xsl:param` and `xsl:with-param`.
#[derive(Debug, Clone)]
pub struct Variable {
    pub name: ExpandedName,
    pub value: VariableValue,
    /// Declared with `xsl:param`, so a supplied value takes precedence.
    pub param: bool,
}

#[derive(Debug, Clone)]
pub enum Instruction {
    Text(String),
    ValueOf(XPath),
    CopyOf(XPath),
    Copy(Vec<Instruction>),
    LiteralElement {
        name: QName,
        namespaces: Vec<Namespace>,
        attributes: Vec<(QName, Avt)>,
        body: Vec<Instruction>,
    },
    Element {
        name: Avt,
        namespace: Option<Avt>,
        in_scope: Vec<Namespace>,
        body: Vec<Instruction>,
    },
    Attribute {
        name: Avt,
        namespace: Option<Avt>,
        in_scope: Vec<Namespace>,
        body: Vec<Instruction>,
    },
    Comment(Vec<Instruction>),
    ProcessingInstruction {
        name: Avt,
        body: Vec<Instruction>,
    },
    ApplyTemplates {
        select: Option<XPath>,
        mode: Option<String>,
        sorts: Vec<Sort>,
        params: Vec<Variable>,
    },
    CallTemplate {
        name: ExpandedName,
        params: Vec<Variable>,
    },
    ForEach {
        select: XPath,
        sorts: Vec<Sort>,
        body: Vec<Instruction>,
    },
    If {
        test: XPath,
        body: Vec<Instruction>,
    },
    Choose {
        branches: Vec<(XPath, Vec<Instruction>)>,
        otherwise: Vec<Instruction>,
    },
    Variable(Variable),
    Message {
        terminate: bool,
        body: Vec<Instruction>,
    },
}

/// Walks stylesheet elements and builds instructions.
pub(crate) struct Compiler<'d> {
    pub doc: &'d Document,
    /// Namespace URIs never copied onto literal result elements.
    pub excluded: Vec<String>,
    /// Targets of every `xsl:call-template`, checked once all templates are known.
    pub called: Vec<ExpandedName>,
}

pub(crate) fn is_xslt(doc: &Document, id: NodeId, local: &str) -> bool {
    doc.kind(id) == Some(NodeKind::Element)
        && doc.name(id).is_some_and(|q| q.local == local && q.ns_uri.as_deref() == Some(XSLT_NAMESPACE))
}

fn is_whitespace(text: &str) -> bool {
    text.chars().all(|c| matches!(c, ' ' | '\t' | '\r' | '\n'))
}

impl<'d> Compiler<'d> {
    pub fn new(doc: &'d Document) -> Self {
        Self { doc, excluded: vec![XSLT_NAMESPACE.to_string()], called: Vec::new() }
    }

    pub fn element_name(&self, id: NodeId) -> String {
        self.doc.name(id).map(QName::lexical).unwrap_or_default()
    }

    pub fn optional(&self, id: NodeId, attribute: &str) -> Option<&'d str> {
        self.doc.attribute(id, attribute)
    }

    pub fn required(&self, id: NodeId, attribute: &str) -> Result<&'d str, StylesheetError> {
        self.optional(id, attribute).ok_or_else(|| StylesheetError::MissingAttribute {
            element: self.element_name(id),
            attribute: attribute.to_string(),
        })
    }

    pub fn expression(&self, id: NodeId, expr: &str) -> Result<XPath, StylesheetError> {
        XPath::compile(expr).map_err(|source| StylesheetError::Expression {
            element: self.element_name(id),
            expr: expr.to_string(),
            source,
        })
    }

    fn avt(&self, id: NodeId, attribute: &str, value: &str) -> Result<Avt, StylesheetError> {
        Avt::parse(value).map_err(|_| StylesheetError::InvalidAttribute {
            element: self.element_name(id),
            attribute: attribute.to_string(),
            value: value.to_string(),
        })
    }

    /// Resolves a lexical QName against the declarations in scope at `id`.
    pub fn expanded_name(&self, id: NodeId, lexical: &str) -> ExpandedName {
        let name = QName::parse(lexical);
        match &name.prefix {
            Some(prefix) => ExpandedName::new(self.doc.lookup_namespace(id, Some(prefix)).as_deref(), name.local),
            None => ExpandedName::local(name.local),
        }
    }

    pub fn yes_no(&self, id: NodeId, attribute: &str) -> Result<bool, StylesheetError> {
        match self.optional(id, attribute) {
            None | Some("no") => Ok(false),
            Some("yes") => Ok(true),
            Some(other) => Err(StylesheetError::InvalidAttribute {
                element: self.element_name(id),
                attribute: attribute.to_string(),
                value: other.to_string(),
            }),
        }
    }

    /// Compiles the children of `parent`.
    pub fn body(&mut self, parent: NodeId) -> Result<Vec<Instruction>, StylesheetError> {
        self.sequence(parent, self.doc.children(parent))
    }

    pub fn sequence(&mut self, parent: NodeId, children: &[NodeId]) -> Result<Vec<Instruction>, StylesheetError> {
        let mut out = Vec::new();
        for &child in children {
            match self.doc.kind(child) {
                Some(NodeKind::Text | NodeKind::CData) => {
                    let text = self.doc.value(child);
                    if !is_whitespace(text) {
                        out.push(Instruction::Text(text.to_string()));
                    }
                }
                Some(NodeKind::Element) => out.push(self.instruction(parent, child)?),
                _ => {}
            }
        }
        Ok(out)
    }

    fn misplaced(&self, parent: NodeId, id: NodeId) -> StylesheetError {
        let element = self.doc.name(id).map(|q| q.local.clone()).unwrap_or_default();
        StylesheetError::Misplaced { element, parent: self.element_name(parent) }
    }

    fn instruction(&mut self, parent: NodeId, id: NodeId) -> Result<Instruction, StylesheetError> {
        let Some(name) = self.doc.name(id) else {
            return Err(self.misplaced(parent, id));
        };
        if name.ns_uri.as_deref() != Some(XSLT_NAMESPACE) {
            return self.literal_element(id);
        }
        Ok(match name.local.as_str() {
            "value-of" => Instruction::ValueOf(self.expression(id, self.required(id, "select")?)?),
            "copy-of" => Instruction::CopyOf(self.expression(id, self.required(id, "select")?)?),
            "copy" => Instruction::Copy(self.body(id)?),
            "text" => Instruction::Text(self.doc.string_value(id)),
            "element" | "attribute" => {
                let name = self.avt(id, "name", self.required(id, "name")?)?;
                let namespace = self.optional(id, "namespace").map(|ns| self.avt(id, "namespace", ns)).transpose()?;
                let in_scope = self.doc.in_scope_namespaces(id);
                let body = self.body(id)?;
                if self.doc.name(id).is_some_and(|q| q.local == "element") {
                    Instruction::Element { name, namespace, in_scope, body }
                } else {
                    Instruction::Attribute { name, namespace, in_scope, body }
                }
            }
            "comment" => Instruction::Comment(self.body(id)?),
            "processing-instruction" => Instruction::ProcessingInstruction {
                name: self.avt(id, "name", self.required(id, "name")?)?,
                body: self.body(id)?,
            },
            "apply-templates" => {
                let select = self.optional(id, "select").map(|expr| self.expression(id, expr)).transpose()?;
                let mode = self.optional(id, "mode").map(str::to_string);
                let (sorts, params) = self.sorts_and_params(id)?;
                Instruction::ApplyTemplates { select, mode, sorts, params }
            }
            "call-template" => {
                let name = self.expanded_name(id, self.required(id, "name")?);
                let (sorts, params) = self.sorts_and_params(id)?;
                if !sorts.is_empty() {
                    return Err(StylesheetError::Misplaced { element: "sort".into(), parent: self.element_name(id) });
                }
                self.called.push(name.clone());
                Instruction::CallTemplate { name, params }
            }
            "for-each" => {
                let select = self.expression(id, self.required(id, "select")?)?;
                let children = self.doc.children(id);
                let split = children.iter().take_while(|&&c| self.is_sort_or_space(c)).count();
                let sorts = children[..split]
                    .iter()
                    .filter(|&&c| is_xslt(self.doc, c, "sort"))
                    .map(|&c| self.sort(c))
                    .collect::<Result<Vec<_>, _>>()?;
                let body = self.sequence(id, &children[split..])?;
                Instruction::ForEach { select, sorts, body }
            }
            "if" => Instruction::If {
                test: self.expression(id, self.required(id, "test")?)?,
                body: self.body(id)?,
            },
            "choose" => self.choose(id)?,
            "variable" => Instruction::Variable(self.variable(id)?),
            "message" => Instruction::Message { terminate: self.yes_no(id, "terminate")?, body: self.body(id)? },
            "param" | "sort" | "with-param" | "when" | "otherwise" | "template" => {
                return Err(self.misplaced(parent, id));
            }
            other => return Err(StylesheetError::UnsupportedInstruction(other.to_string())),
        })
    }

    fn is_sort_or_space(&self, id: NodeId) -> bool {
        is_xslt(self.doc, id, "sort") || self.is_blank_text(id)
    }

    pub fn is_blank_text(&self, id: NodeId) -> bool {
        self.doc.kind(id).is_some_and(NodeKind::is_text) && is_whitespace(self.doc.value(id))
    }

    fn sort(&self, id: NodeId) -> Result<Sort, StylesheetError> {
        let select = self.expression(id, self.optional(id, "select").unwrap_or("."))?;
        let invalid = |attribute: &str, value: &str| StylesheetError::InvalidAttribute {
            element: self.element_name(id),
            attribute: attribute.to_string(),
            value: value.to_string(),
        };
        let data_type = match self.optional(id, "data-type") {
            None | Some("text") => SortType::Text,
            Some("number") => SortType::Number,
            Some(other) => return Err(invalid("data-type", other)),
        };
        let descending = match self.optional(id, "order") {
            None | Some("ascending") => false,
            Some("descending") => true,
            Some(other) => return Err(invalid("order", other)),
        };
        Ok(Sort { select, data_type, descending })
    }

    fn sorts_and_params(&mut self, id: NodeId) -> Result<(Vec<Sort>, Vec<Variable>), StylesheetError> {
        let mut sorts = Vec::new();
        let mut params = Vec::new();
        for &child in self.doc.children(id) {
            if is_xslt(self.doc, child, "sort") {
                sorts.push(self.sort(child)?);
            } else if is_xslt(self.doc, child, "with-param") {
                params.push(self.variable(child)?);
            } else if self.doc.kind(child) == Some(NodeKind::Element)
                || (self.doc.kind(child).is_some_and(NodeKind::is_text) && !self.is_blank_text(child))
            {
                return Err(self.misplaced(id, child));
            }
        }
        Ok((sorts, params))
    }

    fn choose(&mut self, id: NodeId) -> Result<Instruction, StylesheetError> {
        let mut branches = Vec::new();
        let mut otherwise = Vec::new();
        for &child in self.doc.children(id) {
            if is_xslt(self.doc, child, "when") {
                let test = self.expression(child, self.required(child, "test")?)?;
                branches.push((test, self.body(child)?));
            } else if is_xslt(self.doc, child, "otherwise") {
                otherwise = self.body(child)?;
            } else if self.doc.kind(child) == Some(NodeKind::Element) {
                return Err(self.misplaced(id, child));
            }
        }
        if branches.is_empty() {
            return Err(StylesheetError::MissingAttribute {
                element: self.element_name(id),
                attribute: "xsl:when".to_string(),
            });
        }
        Ok(Instruction::Choose { branches, otherwise })
    }

    /// `xsl:variable`, `xsl:param` or `xsl:with-param`.
    pub fn variable(&mut self, id: NodeId) -> Result<Variable, StylesheetError> {
        let name = self.expanded_name(id, self.required(id, "name")?);
        let value = match self.optional(id, "select") {
            Some(expr) => VariableValue::Select(self.expression(id, expr)?),
            None if self.doc.children(id).is_empty() => VariableValue::Empty,
            None => VariableValue::Content(self.body(id)?),
        };
        let param = self.doc.name(id).is_some_and(|q| q.local == "param");
        Ok(Variable { name, value, param })
    }

    pub fn literal_element(&mut self, id: NodeId) -> Result<Instruction, StylesheetError> {
        let name = self.doc.name(id).cloned().unwrap_or_default();
        let namespaces = self
            .doc
            .in_scope_namespaces(id)
            .into_iter()
            .filter(|ns| !self.excluded.contains(&ns.uri))
            .collect();
        let mut attributes = Vec::new();
        for &attr in self.doc.attributes(id) {
            let Some(attr_name) = self.doc.name(attr) else {
                continue;
            };
            if attr_name.ns_uri.as_deref() == Some(XSLT_NAMESPACE) {
                continue;
            }
            let value = self.doc.value(attr);
            attributes.push((attr_name.clone(), self.avt(id, &attr_name.lexical(), value)?));
        }
        let body = self.body(id)?;
        Ok(Instruction::LiteralElement { name, namespaces, attributes, body })
    }
}
