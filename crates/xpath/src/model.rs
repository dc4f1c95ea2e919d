use core::cmp::Ordering;
use core::fmt;
use xmlctx_dom::NodeRef;

pub use xmlctx_dom::{NodeKind, QName};

/// Tree navigation the evaluator needs from a node handle.
///
/// Adapters must supply a total document order, also across trees, so that
/// node-sets coming from several documents can be merged.
pub trait XdmNode: Clone + Eq + fmt::Debug {
    fn kind(&self) -> NodeKind;
    fn name(&self) -> Option<QName>;
    fn string_value(&self) -> String;
    fn parent(&self) -> Option<Self>;
    fn children(&self) -> Vec<Self>;
    fn attributes(&self) -> Vec<Self>;
    fn compare_document_order(&self, other: &Self) -> Ordering;

    fn has_name(&self, local: &str, ns_uri: Option<&str>) -> bool {
        self.name().is_some_and(|q| q.local == local && q.ns_uri.as_deref() == ns_uri)
    }

    fn namespace_uri(&self) -> Option<String> {
        self.name().and_then(|q| q.ns_uri)
    }

    fn root(&self) -> Self {
        let mut node = self.clone();
        while let Some(parent) = node.parent() {
            node = parent;
        }
        node
    }

    /// Descendants in document order, attributes excluded.
    fn descendants(&self) -> Vec<Self> {
        let mut out = Vec::new();
        let mut stack: Vec<Self> = self.children().into_iter().rev().collect();
        while let Some(node) = stack.pop() {
            stack.extend(node.children().into_iter().rev());
            out.push(node);
        }
        out
    }

    fn following_siblings(&self) -> Vec<Self> {
        let Some(parent) = self.parent() else {
            return Vec::new();
        };
        let siblings = parent.children();
        match siblings.iter().position(|s| s == self) {
            Some(index) => siblings[index + 1..].to_vec(),
            None => Vec::new(),
        }
    }

    /// Preceding siblings in document order.
    fn preceding_siblings(&self) -> Vec<Self> {
        let Some(parent) = self.parent() else {
            return Vec::new();
        };
        let siblings = parent.children();
        match siblings.iter().position(|s| s == self) {
            Some(index) => siblings[..index].to_vec(),
            None => Vec::new(),
        }
    }
}

/// Sorts into document order and drops duplicates.
pub fn sort_document_order<N: XdmNode>(nodes: &mut Vec<N>) {
    nodes.sort_by(|a, b| a.compare_document_order(b));
    nodes.dedup();
}

impl XdmNode for NodeRef<'_> {
    /// Removed nodes report as empty text nodes.
    fn kind(&self) -> NodeKind {
        NodeRef::kind(self).unwrap_or(NodeKind::Text)
    }

    fn name(&self) -> Option<QName> {
        NodeRef::name(self).cloned()
    }

    fn string_value(&self) -> String {
        NodeRef::string_value(self)
    }

    fn parent(&self) -> Option<Self> {
        NodeRef::parent(self)
    }

    fn children(&self) -> Vec<Self> {
        NodeRef::children(self).collect()
    }

    fn attributes(&self) -> Vec<Self> {
        NodeRef::attributes(self).collect()
    }

    fn compare_document_order(&self, other: &Self) -> Ordering {
        NodeRef::compare_document_order(self, other)
    }

    fn has_name(&self, local: &str, ns_uri: Option<&str>) -> bool {
        NodeRef::name(self).is_some_and(|q| q.local == local && q.ns_uri.as_deref() == ns_uri)
    }

    fn descendants(&self) -> Vec<Self> {
        let doc = self.document();
        doc.descendants(self.id()).into_iter().map(|id| NodeRef::new(doc, id)).collect()
    }

    fn following_siblings(&self) -> Vec<Self> {
        let doc = self.document();
        doc.following_siblings(self.id()).iter().map(|&id| NodeRef::new(doc, id)).collect()
    }

    fn preceding_siblings(&self) -> Vec<Self> {
        let doc = self.document();
        doc.preceding_siblings(self.id()).iter().map(|&id| NodeRef::new(doc, id)).collect()
    }
}
