use crate::error::TreeError;
use crate::node::{Namespace, NodeData, NodeId, NodeKind, QName, XML_NAMESPACE};
use core::cmp::Ordering;
use std::sync::OnceLock;

const NO_NODES: &[NodeId] = &[];

/// An XML document stored as an arena of nodes.
///
/// Slot 0 is always the document node. Removing a node unlinks it and marks
/// its whole subtree dead; slots are never recycled, so ids stay unique for
/// the lifetime of the document. A long-lived document that is edited
/// repeatedly keeps growing; [`Document::compacted`] rebuilds it without the
/// dead slots at the price of new ids.
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<NodeData>,
    order: OnceLock<Vec<usize>>,
    fragment: bool,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        Self {
            nodes: vec![NodeData::new(NodeKind::Document, None, String::new())],
            order: OnceLock::new(),
            fragment: false,
        }
    }

    /// A result tree whose document node accepts text and several elements.
    pub fn new_fragment() -> Self {
        Self { fragment: true, ..Self::new() }
    }

    pub fn is_fragment(&self) -> bool {
        self.fragment
    }

    /// A document with a single empty root element.
    pub fn with_root(name: &str) -> Self {
        let mut doc = Self::new();
        let root = doc.create_element(QName::parse(name));
        doc.link(NodeId::DOCUMENT, root);
        doc
    }

    pub fn root(&self) -> NodeId {
        NodeId::DOCUMENT
    }

    /// The outermost element, if the document has one.
    pub fn document_element(&self) -> Option<NodeId> {
        self.children(NodeId::DOCUMENT)
            .iter()
            .copied()
            .find(|&id| self.kind(id) == Some(NodeKind::Element))
    }

    fn data(&self, id: NodeId) -> Option<&NodeData> {
        self.nodes.get(id.0).filter(|n| n.alive)
    }

    fn data_mut(&mut self, id: NodeId) -> Option<&mut NodeData> {
        self.nodes.get_mut(id.0).filter(|n| n.alive)
    }

    /// True when `id` was issued by this document and is not removed.
    pub fn contains(&self, id: NodeId) -> bool {
        self.data(id).is_some()
    }

    /// True when `id` is alive and reachable from the document node.
    pub fn is_attached(&self, id: NodeId) -> bool {
        let mut current = Some(id);
        while let Some(node) = current {
            if node == NodeId::DOCUMENT {
                return true;
            }
            current = self.data(node).and_then(|n| n.parent);
        }
        false
    }

    pub fn kind(&self, id: NodeId) -> Option<NodeKind> {
        self.data(id).map(|n| n.kind)
    }

    pub fn name(&self, id: NodeId) -> Option<&QName> {
        self.data(id).and_then(|n| n.name.as_ref())
    }

    /// Raw value of attribute, text, CDATA, comment and PI nodes.
    pub fn value(&self, id: NodeId) -> &str {
        self.data(id).map_or("", |n| n.value.as_str())
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.data(id).and_then(|n| n.parent)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.data(id).map_or(NO_NODES, |n| n.children.as_slice())
    }

    pub fn attributes(&self, id: NodeId) -> &[NodeId] {
        self.data(id).map_or(NO_NODES, |n| n.attributes.as_slice())
    }

    /// Namespace declarations written on this element.
    pub fn namespace_declarations(&self, id: NodeId) -> &[Namespace] {
        self.data(id).map_or(&[] as &[Namespace], |n| n.namespaces.as_slice())
    }

    /// XPath string-value: concatenated descendant text for documents and
    /// elements, the raw value for everything else.
    pub fn string_value(&self, id: NodeId) -> String {
        match self.kind(id) {
            Some(NodeKind::Document | NodeKind::Element) => {
                let mut out = String::new();
                for node in self.descendants(id) {
                    if self.kind(node).is_some_and(NodeKind::is_text) {
                        out.push_str(self.value(node));
                    }
                }
                out
            }
            Some(_) => self.value(id).to_string(),
            None => String::new(),
        }
    }

    /// Descendants in document order, excluding attributes and `id` itself.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(id).iter().rev().copied().collect();
        while let Some(node) = stack.pop() {
            out.push(node);
            stack.extend(self.children(node).iter().rev().copied());
        }
        out
    }

    /// Ancestors from the parent up to the document node.
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut current = self.parent(id);
        while let Some(node) = current {
            out.push(node);
            current = self.parent(node);
        }
        out
    }

    fn position_in_parent(&self, id: NodeId) -> Option<(NodeId, usize)> {
        let parent = self.parent(id)?;
        let index = self.children(parent).iter().position(|&c| c == id)?;
        Some((parent, index))
    }

    pub fn following_siblings(&self, id: NodeId) -> &[NodeId] {
        match self.position_in_parent(id) {
            Some((parent, index)) => &self.children(parent)[index + 1..],
            None => NO_NODES,
        }
    }

    /// Preceding siblings in document order (nearest last).
    pub fn preceding_siblings(&self, id: NodeId) -> &[NodeId] {
        match self.position_in_parent(id) {
            Some((parent, index)) => &self.children(parent)[..index],
            None => NO_NODES,
        }
    }

    /// The node followed by all of its following siblings.
    pub fn sibling_run(&self, id: NodeId) -> Vec<NodeId> {
        let mut run = vec![id];
        run.extend_from_slice(self.following_siblings(id));
        run
    }

    /// Attribute node of `element` whose lexical name is `name`.
    pub fn attribute_node(&self, element: NodeId, name: &str) -> Option<NodeId> {
        self.attributes(element)
            .iter()
            .copied()
            .find(|&attr| self.name(attr).is_some_and(|q| q.lexical() == name))
    }

    pub fn attribute(&self, element: NodeId, name: &str) -> Option<&str> {
        self.attribute_node(element, name).map(|attr| self.value(attr))
    }

    /// Resolves `prefix` (or the default namespace for `None`) in scope at `id`.
    pub fn lookup_namespace(&self, id: NodeId, prefix: Option<&str>) -> Option<String> {
        if prefix == Some("xml") {
            return Some(XML_NAMESPACE.to_string());
        }
        let mut current = Some(id);
        while let Some(node) = current {
            for decl in self.namespace_declarations(node) {
                if decl.prefix.as_deref() == prefix {
                    return (!decl.uri.is_empty()).then(|| decl.uri.clone());
                }
            }
            current = self.parent(node);
        }
        None
    }

    /// Declarations visible at `id`, nearest declaration winning.
    pub fn in_scope_namespaces(&self, id: NodeId) -> Vec<Namespace> {
        let mut out: Vec<Namespace> = Vec::new();
        let mut current = Some(id);
        while let Some(node) = current {
            for decl in self.namespace_declarations(node) {
                if !out.iter().any(|seen| seen.prefix == decl.prefix) {
                    out.push(decl.clone());
                }
            }
            current = self.parent(node);
        }
        out.retain(|ns| !ns.uri.is_empty());
        out
    }

    /// Preorder rank of `id`; detached nodes sort after the tree.
    pub fn document_order(&self, id: NodeId) -> usize {
        let order = self.order.get_or_init(|| self.compute_order());
        order.get(id.0).copied().unwrap_or(usize::MAX)
    }

    pub fn compare_document_order(&self, a: NodeId, b: NodeId) -> Ordering {
        self.document_order(a).cmp(&self.document_order(b)).then(a.0.cmp(&b.0))
    }

    fn compute_order(&self) -> Vec<usize> {
        let mut order = vec![usize::MAX; self.nodes.len()];
        let mut rank = 0usize;
        let mut stack = vec![NodeId::DOCUMENT];
        while let Some(node) = stack.pop() {
            order[node.0] = rank;
            rank += 1;
            for &attr in self.attributes(node) {
                order[attr.0] = rank;
                rank += 1;
            }
            stack.extend(self.children(node).iter().rev().copied());
        }
        order
    }

    fn touch(&mut self) {
        self.order = OnceLock::new();
    }

    fn push(&mut self, data: NodeData) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(data);
        id
    }

    pub fn create_element(&mut self, name: QName) -> NodeId {
        self.push(NodeData::new(NodeKind::Element, Some(name), String::new()))
    }

    pub fn create_text(&mut self, text: impl Into<String>) -> NodeId {
        self.push(NodeData::new(NodeKind::Text, None, text.into()))
    }

    pub fn create_cdata(&mut self, text: impl Into<String>) -> NodeId {
        self.push(NodeData::new(NodeKind::CData, None, text.into()))
    }

    pub fn create_comment(&mut self, text: impl Into<String>) -> NodeId {
        self.push(NodeData::new(NodeKind::Comment, None, text.into()))
    }

    pub fn create_processing_instruction(&mut self, target: &str, data: impl Into<String>) -> NodeId {
        self.push(NodeData::new(
            NodeKind::ProcessingInstruction,
            Some(QName::local(target)),
            data.into(),
        ))
    }

    fn link(&mut self, parent: NodeId, child: NodeId) {
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.push(child);
        self.touch();
    }

    /// Appends `child` as the last child of `parent`, detaching it first.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), TreeError> {
        let parent_kind = self.kind(parent).ok_or(TreeError::UnknownNode(parent))?;
        let child_kind = self.kind(child).ok_or(TreeError::UnknownNode(child))?;
        if !child_kind.is_child_kind() {
            return Err(TreeError::InvalidPlacement { parent, child });
        }
        match parent_kind {
            NodeKind::Element => {}
            NodeKind::Document if self.fragment => {}
            NodeKind::Document => match child_kind {
                NodeKind::Element => {
                    if self.document_element().is_some_and(|root| root != child) {
                        return Err(TreeError::RootExists);
                    }
                }
                NodeKind::Comment | NodeKind::ProcessingInstruction => {}
                _ => return Err(TreeError::InvalidPlacement { parent, child }),
            },
            _ => return Err(TreeError::InvalidPlacement { parent, child }),
        }
        if child == parent || self.ancestors(parent).contains(&child) {
            return Err(TreeError::Cycle(child));
        }
        self.detach(child);
        self.link(parent, child);
        Ok(())
    }

    /// Sets (or replaces) an attribute with the same expanded name.
    pub fn set_attribute(
        &mut self,
        element: NodeId,
        name: QName,
        value: impl Into<String>,
    ) -> Result<NodeId, TreeError> {
        if self.kind(element).ok_or(TreeError::UnknownNode(element))? != NodeKind::Element {
            return Err(TreeError::NotAnElement(element));
        }
        let value = value.into();
        let existing = self.attributes(element).iter().copied().find(|&attr| {
            self.name(attr).is_some_and(|q| q.matches(&name))
        });
        if let Some(attr) = existing {
            self.nodes[attr.0].value = value;
            return Ok(attr);
        }
        let mut data = NodeData::new(NodeKind::Attribute, Some(name), value);
        data.parent = Some(element);
        let attr = self.push(data);
        self.nodes[element.0].attributes.push(attr);
        self.touch();
        Ok(attr)
    }

    pub fn declare_namespace(
        &mut self,
        element: NodeId,
        prefix: Option<&str>,
        uri: &str,
    ) -> Result<(), TreeError> {
        let data = self.data_mut(element).ok_or(TreeError::UnknownNode(element))?;
        if data.kind != NodeKind::Element {
            return Err(TreeError::NotAnElement(element));
        }
        match data.namespaces.iter_mut().find(|ns| ns.prefix.as_deref() == prefix) {
            Some(ns) => uri.clone_into(&mut ns.uri),
            None => data
                .namespaces
                .push(Namespace { prefix: prefix.map(str::to_string), uri: uri.to_string() }),
        }
        Ok(())
    }

    pub(crate) fn set_name(&mut self, id: NodeId, name: QName) {
        if let Some(data) = self.data_mut(id) {
            data.name = Some(name);
        }
    }

    /// Replaces the raw value of a non-container node.
    pub fn set_value(&mut self, id: NodeId, value: impl Into<String>) -> Result<(), TreeError> {
        let data = self.data_mut(id).ok_or(TreeError::UnknownNode(id))?;
        if matches!(data.kind, NodeKind::Document | NodeKind::Element) {
            return Err(TreeError::InvalidPlacement { parent: id, child: id });
        }
        data.value = value.into();
        Ok(())
    }

    /// Appends text to an existing text node (used while parsing entities).
    pub(crate) fn push_value(&mut self, id: NodeId, text: &str) {
        if let Some(data) = self.data_mut(id) {
            data.value.push_str(text);
        }
    }

    /// Unlinks `id` from its parent; the subtree stays alive.
    pub fn detach(&mut self, id: NodeId) {
        let Some(parent) = self.parent(id) else {
            return;
        };
        let parent_data = &mut self.nodes[parent.0];
        parent_data.children.retain(|&c| c != id);
        parent_data.attributes.retain(|&a| a != id);
        self.nodes[id.0].parent = None;
        self.touch();
    }

    /// Unlinks `id` and destroys it together with its subtree.
    pub fn remove(&mut self, id: NodeId) -> Result<(), TreeError> {
        if id == NodeId::DOCUMENT {
            return Err(TreeError::InvalidPlacement { parent: id, child: id });
        }
        if !self.contains(id) {
            return Err(TreeError::UnknownNode(id));
        }
        self.detach(id);
        let mut stack = vec![id];
        while let Some(node) = stack.pop() {
            let data = &mut self.nodes[node.0];
            data.alive = false;
            stack.append(&mut data.children);
            stack.append(&mut data.attributes);
        }
        self.touch();
        Ok(())
    }

    /// Number of arena slots, removed nodes included.
    pub fn slot_count(&self) -> usize {
        self.nodes.len()
    }

    /// A copy holding only the live nodes. Ids issued by `self` do not apply to it.
    pub fn compacted(&self) -> Result<Document, TreeError> {
        let mut copy = if self.fragment { Self::new_fragment() } else { Self::new() };
        for &child in self.children(NodeId::DOCUMENT) {
            let node = copy.import_node(self, child)?;
            copy.append_child(NodeId::DOCUMENT, node)?;
        }
        Ok(copy)
    }

    /// Deep-copies `id` from `source` into this document as a detached node.
    ///
    /// A copied element also receives the namespace declarations that were in
    /// scope at its original position.
    pub fn import_node(&mut self, source: &Document, id: NodeId) -> Result<NodeId, TreeError> {
        let kind = source.kind(id).ok_or(TreeError::UnknownNode(id))?;
        if kind == NodeKind::Document {
            return Err(TreeError::NotCopyable(id));
        }
        let copy = self.copy_subtree(Some(source), id);
        if kind == NodeKind::Element {
            for ns in source.in_scope_namespaces(id) {
                self.declare_inherited(copy, ns);
            }
        }
        Ok(copy)
    }

    /// Deep-copies a node of this document as a detached node.
    pub fn copy_node(&mut self, id: NodeId) -> Result<NodeId, TreeError> {
        let kind = self.kind(id).ok_or(TreeError::UnknownNode(id))?;
        if kind == NodeKind::Document {
            return Err(TreeError::NotCopyable(id));
        }
        let copy = self.copy_subtree(None, id);
        if kind == NodeKind::Element {
            for ns in self.in_scope_namespaces(id) {
                self.declare_inherited(copy, ns);
            }
        }
        Ok(copy)
    }

    fn declare_inherited(&mut self, element: NodeId, ns: Namespace) {
        let data = &mut self.nodes[element.0];
        if !data.namespaces.iter().any(|own| own.prefix == ns.prefix) {
            data.namespaces.push(ns);
        }
    }

    fn copy_subtree(&mut self, source: Option<&Document>, id: NodeId) -> NodeId {
        let (template, attributes, children) = {
            let src = source.unwrap_or(&*self);
            let data = &src.nodes[id.0];
            let mut template = NodeData::new(data.kind, data.name.clone(), data.value.clone());
            template.namespaces.clone_from(&data.namespaces);
            let alive = |list: &[NodeId]| -> Vec<NodeId> {
                list.iter().copied().filter(|&n| src.contains(n)).collect()
            };
            (template, alive(&data.attributes), alive(&data.children))
        };
        let copy = self.push(template);
        for attr in attributes {
            let new_attr = self.copy_subtree(source, attr);
            self.nodes[new_attr.0].parent = Some(copy);
            self.nodes[copy.0].attributes.push(new_attr);
        }
        for child in children {
            let new_child = self.copy_subtree(source, child);
            self.nodes[new_child.0].parent = Some(copy);
            self.nodes[copy.0].children.push(new_child);
        }
        self.touch();
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn hero() -> (Document, NodeId) {
        let mut doc = Document::with_root("hero");
        let root = doc.document_element().unwrap();
        doc.set_attribute(root, QName::local("age"), "20").unwrap();
        let name = doc.create_element(QName::local("name"));
        doc.append_child(root, name).unwrap();
        let text = doc.create_text("Alrik");
        doc.append_child(name, text).unwrap();
        (doc, root)
    }

    #[rstest]
    fn string_value_concatenates_descendant_text() {
        let (mut doc, root) = hero();
        let story = doc.create_element(QName::local("story"));
        doc.append_child(root, story).unwrap();
        let cdata = doc.create_cdata(" of Gareth");
        doc.append_child(story, cdata).unwrap();
        assert_eq!(doc.string_value(root), "Alrik of Gareth");
        assert_eq!(doc.attribute(root, "age"), Some("20"));
    }

    #[rstest]
    fn compaction_drops_removed_slots() {
        let (mut doc, root) = hero();
        for round in 0..20 {
            let note = doc.create_element(QName::local("note"));
            doc.append_child(root, note).unwrap();
            let text = doc.create_text(format!("round {round}"));
            doc.append_child(note, text).unwrap();
            doc.remove(note).unwrap();
        }
        assert!(doc.slot_count() > 40);

        let compact = doc.compacted().unwrap();
        assert_eq!(compact.slot_count(), 5);
        let compact_root = compact.document_element().unwrap();
        assert_eq!(compact.attribute(compact_root, "age"), Some("20"));
        assert_eq!(compact.string_value(compact_root), doc.string_value(root));
    }

    #[rstest]
    fn fragments_take_any_top_level_content() {
        let mut doc = Document::new_fragment();
        for name in ["a", "b"] {
            let element = doc.create_element(QName::local(name));
            doc.append_child(NodeId::DOCUMENT, element).unwrap();
        }
        let text = doc.create_text("tail");
        doc.append_child(NodeId::DOCUMENT, text).unwrap();
        assert!(doc.is_fragment());
        assert_eq!(doc.children(NodeId::DOCUMENT).len(), 3);
        assert_eq!(doc.string_value(NodeId::DOCUMENT), "tail");
    }

    #[rstest]
    fn second_root_is_rejected() {
        let (mut doc, _) = hero();
        let other = doc.create_element(QName::local("other"));
        assert_eq!(doc.append_child(NodeId::DOCUMENT, other), Err(TreeError::RootExists));
    }

    #[rstest]
    fn remove_kills_subtree() {
        let (mut doc, root) = hero();
        let name = doc.children(root)[0];
        let text = doc.children(name)[0];
        doc.remove(name).unwrap();
        assert!(!doc.contains(name));
        assert!(!doc.contains(text));
        assert!(doc.children(root).is_empty());
        assert_eq!(doc.remove(name), Err(TreeError::UnknownNode(name)));
    }

    #[rstest]
    fn cycle_is_rejected() {
        let (mut doc, root) = hero();
        let name = doc.children(root)[0];
        assert_eq!(doc.append_child(name, root), Err(TreeError::Cycle(root)));
    }

    #[rstest]
    fn import_copies_deeply_and_keeps_source() {
        let (source, root) = hero();
        let mut target = Document::with_root("heros");
        let heros = target.document_element().unwrap();
        let copy = target.import_node(&source, root).unwrap();
        target.append_child(heros, copy).unwrap();
        assert_eq!(target.string_value(heros), "Alrik");
        assert_eq!(target.attribute(copy, "age"), Some("20"));
        assert_eq!(source.string_value(root), "Alrik");
    }

    #[rstest]
    fn document_order_is_preorder_with_attributes_first() {
        let (doc, root) = hero();
        let age = doc.attributes(root)[0];
        let name = doc.children(root)[0];
        assert_eq!(doc.compare_document_order(root, age), Ordering::Less);
        assert_eq!(doc.compare_document_order(age, name), Ordering::Less);
        assert_eq!(doc.compare_document_order(name, root), Ordering::Greater);
    }

    #[rstest]
    fn sibling_run_includes_following_siblings() {
        let mut doc = Document::with_root("list");
        let root = doc.document_element().unwrap();
        let items: Vec<NodeId> = (0..3)
            .map(|i| {
                let item = doc.create_element(QName::local(format!("item{i}")));
                doc.append_child(root, item).unwrap();
                item
            })
            .collect();
        assert_eq!(doc.sibling_run(items[1]), vec![items[1], items[2]]);
        assert_eq!(doc.preceding_siblings(items[1]), &[items[0]]);
    }
}
