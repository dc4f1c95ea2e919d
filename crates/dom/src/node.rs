use core::fmt;

/// Namespace URI bound to the reserved `xml` prefix.
pub const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

/// Handle of a node inside one [`Document`](crate::Document) arena.
///
/// Ids are only meaningful for the document that issued them. The arena never
/// reuses slots, so an id of a removed node stays invalid instead of pointing
/// at a different node later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// The document node of every [`Document`](crate::Document).
    pub const DOCUMENT: NodeId = NodeId(0);

    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Document,
    Element,
    Attribute,
    Text,
    CData,
    Comment,
    ProcessingInstruction,
}

impl NodeKind {
    /// Text and CDATA sections are both text nodes for path queries.
    pub fn is_text(self) -> bool {
        matches!(self, NodeKind::Text | NodeKind::CData)
    }

    /// Kinds that can live in a parent's child list.
    pub fn is_child_kind(self) -> bool {
        !matches!(self, NodeKind::Document | NodeKind::Attribute)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct QName {
    pub prefix: Option<String>,
    pub local: String,
    pub ns_uri: Option<String>,
}

impl QName {
    /// Unqualified name without namespace.
    pub fn local(local: impl Into<String>) -> Self {
        Self { prefix: None, local: local.into(), ns_uri: None }
    }

    /// Splits a lexical `prefix:local` name. The namespace stays unresolved.
    pub fn parse(lexical: &str) -> Self {
        match lexical.split_once(':') {
            Some((prefix, local)) if !prefix.is_empty() && !local.is_empty() => Self {
                prefix: Some(prefix.to_string()),
                local: local.to_string(),
                ns_uri: None,
            },
            _ => Self::local(lexical),
        }
    }

    #[must_use]
    pub fn with_namespace(mut self, ns_uri: Option<String>) -> Self {
        self.ns_uri = ns_uri;
        self
    }

    /// Expanded-name equality: local part and namespace URI.
    pub fn matches(&self, other: &QName) -> bool {
        self.local == other.local && self.ns_uri == other.ns_uri
    }

    /// The lexical form as written in markup.
    pub fn lexical(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.prefix {
            Some(prefix) => write!(f, "{prefix}:{}", self.local),
            None => f.write_str(&self.local),
        }
    }
}

/// A namespace declaration (`xmlns` / `xmlns:prefix`) carried by an element.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    pub prefix: Option<String>,
    pub uri: String,
}

#[derive(Debug, Clone)]
pub(crate) struct NodeData {
    pub(crate) kind: NodeKind,
    pub(crate) name: Option<QName>,
    pub(crate) value: String,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) attributes: Vec<NodeId>,
    pub(crate) namespaces: Vec<Namespace>,
    pub(crate) alive: bool,
}

impl NodeData {
    pub(crate) fn new(kind: NodeKind, name: Option<QName>, value: String) -> Self {
        Self {
            kind,
            name,
            value,
            parent: None,
            children: Vec::new(),
            attributes: Vec::new(),
            namespaces: Vec::new(),
            alive: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("hero", None, "hero")]
    #[case("xsl:template", Some("xsl"), "template")]
    #[case(":odd", None, ":odd")]
    fn qname_parse_splits_prefix(
        #[case] input: &str,
        #[case] prefix: Option<&str>,
        #[case] local: &str,
    ) {
        let name = QName::parse(input);
        assert_eq!(name.prefix.as_deref(), prefix);
        assert_eq!(name.local, local);
        assert_eq!(name.to_string(), input);
    }

    #[rstest]
    fn text_kinds() {
        assert!(NodeKind::CData.is_text());
        assert!(NodeKind::Text.is_text());
        assert!(!NodeKind::Comment.is_text());
        assert!(!NodeKind::Attribute.is_child_kind());
    }
}
