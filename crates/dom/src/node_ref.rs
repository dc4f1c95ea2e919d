use crate::document::Document;
use crate::node::{NodeId, NodeKind, QName};
use core::cmp::Ordering;
use core::fmt;
use core::hash::{Hash, Hasher};

/// A node id paired with the document it belongs to.
///
/// Two refs are equal when they point at the same slot of the same document
/// instance. Nodes of different documents are ordered by document address,
/// which gives a stable total order for the lifetime of the borrows.
#[derive(Clone, Copy)]
pub struct NodeRef<'a> {
    doc: &'a Document,
    id: NodeId,
}

impl<'a> NodeRef<'a> {
    pub fn new(doc: &'a Document, id: NodeId) -> Self {
        Self { doc, id }
    }

    pub fn document(&self) -> &'a Document {
        self.doc
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn kind(&self) -> Option<NodeKind> {
        self.doc.kind(self.id)
    }

    pub fn name(&self) -> Option<&'a QName> {
        self.doc.name(self.id)
    }

    pub fn string_value(&self) -> String {
        self.doc.string_value(self.id)
    }

    pub fn parent(&self) -> Option<NodeRef<'a>> {
        self.doc.parent(self.id).map(|id| Self::new(self.doc, id))
    }

    pub fn children(&self) -> impl Iterator<Item = NodeRef<'a>> + use<'a> {
        let doc = self.doc;
        doc.children(self.id).iter().map(move |&id| Self::new(doc, id))
    }

    pub fn attributes(&self) -> impl Iterator<Item = NodeRef<'a>> + use<'a> {
        let doc = self.doc;
        doc.attributes(self.id).iter().map(move |&id| Self::new(doc, id))
    }

    pub fn same_document(&self, other: &NodeRef<'_>) -> bool {
        core::ptr::eq(self.doc, other.doc)
    }

    fn doc_addr(&self) -> usize {
        core::ptr::from_ref(self.doc).addr()
    }

    pub fn compare_document_order(&self, other: &NodeRef<'_>) -> Ordering {
        if self.same_document(other) {
            self.doc.compare_document_order(self.id, other.id)
        } else {
            self.doc_addr().cmp(&other.doc_addr())
        }
    }
}

impl PartialEq for NodeRef<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.same_document(other) && self.id == other.id
    }
}

impl Eq for NodeRef<'_> {}

impl Hash for NodeRef<'_> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.doc_addr().hash(state);
        self.id.hash(state);
    }
}

impl fmt::Debug for NodeRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.kind(), self.name()) {
            (Some(kind), Some(name)) => write!(f, "{kind:?}({name}, {})", self.id),
            (Some(kind), None) => write!(f, "{kind:?}({})", self.id),
            (None, _) => write!(f, "Removed({})", self.id),
        }
    }
}
