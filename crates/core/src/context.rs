use crate::source::XmlSource;
use crate::state::{OperationState, Reason};
use std::path::Path;
use xmlctx_dom::{Document, NodeId, NodeKind, NodeRef, OutputOptions, QName, TreeError};
use xmlctx_xpath::XPath;

/// A parsed document, the source it came from and the state of the last operation.
///
/// Context operations never fail with `Err`: outcomes are recorded as an
/// [`OperationState`] that the next state-producing call overwrites.
#[derive(Debug, Default)]
pub struct DocumentContext {
    source: Option<XmlSource>,
    document: Option<Document>,
    state: OperationState,
}

impl DocumentContext {
    /// A context holding an empty document.
    pub fn new_empty() -> Self {
        Self {
            source: None,
            document: Some(Document::new()),
            state: OperationState::success(Reason::ReadAndParse),
        }
    }

    /// An empty document with root element `name`; an empty name adds no root.
    pub fn new_empty_with_root(name: &str) -> Self {
        let document = if name.is_empty() { Document::new() } else { Document::with_root(name) };
        Self {
            source: None,
            document: Some(document),
            state: OperationState::success(Reason::ReadAndParse),
        }
    }

    /// Parses `source`. The source is kept even when parsing fails.
    pub fn new(source: Option<XmlSource>) -> Self {
        let Some(source) = source else {
            tracing::warn!("no source given, document context stays empty");
            return Self::failed(None);
        };
        if source.is_empty() {
            tracing::warn!(source = source.name(), "source buffer is empty");
            return Self::failed(Some(source));
        }
        match xmlctx_dom::parse_bytes(source.bytes()) {
            Ok(document) => {
                tracing::debug!(source = source.name(), bytes = source.len(), "parsed source");
                Self {
                    source: Some(source),
                    document: Some(document),
                    state: OperationState::success(Reason::ReadAndParse),
                }
            }
            Err(error) => {
                tracing::warn!(source = source.name(), %error, "failed to parse source");
                Self::failed(Some(source))
            }
        }
    }

    /// A fresh document holding a deep copy of `node` and its descendants.
    ///
    /// A document node contributes all of its children. Attribute and text
    /// nodes cannot be the content of a document and leave an error state.
    pub fn new_from_node(node: NodeRef<'_>) -> Self {
        let mut document = Document::new();
        match copy_as_content(&mut document, node) {
            Ok(()) => Self {
                source: None,
                document: Some(document),
                state: OperationState::success(Reason::ReadAndParse),
            },
            Err(error) => {
                tracing::warn!(node = %node.id(), %error, "cannot copy node into a new document");
                Self::failed(None)
            }
        }
    }

    pub fn new_from_file(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            tracing::warn!("empty document path");
            return Self::failed(None);
        }
        match xmlctx_dom::parse_file(path) {
            Ok(document) => {
                tracing::debug!(path = %path.display(), "loaded document");
                Self {
                    source: None,
                    document: Some(document),
                    state: OperationState::success(Reason::ReadAndParse),
                }
            }
            Err(error) => {
                tracing::warn!(path = %path.display(), %error, "failed to load document");
                Self::failed(None)
            }
        }
    }

    fn failed(source: Option<XmlSource>) -> Self {
        Self { source, document: None, state: OperationState::error(Reason::ReadAndParse) }
    }

    /// Writes the document as UTF-8 with an XML declaration.
    ///
    /// Does nothing when there is no document or `path` is empty. The state
    /// of the previous operation is then returned untouched, so a skipped
    /// save never reads as a successful write.
    pub fn save_to_file(&mut self, path: impl AsRef<Path>) -> OperationState {
        let path = path.as_ref();
        let Some(document) = &self.document else {
            return self.state;
        };
        if path.as_os_str().is_empty() {
            return self.state;
        }
        self.state = match xmlctx_dom::save_file(document, path, &OutputOptions::default()) {
            Ok(()) => OperationState::success(Reason::ReadAndParse),
            Err(error) => {
                tracing::error!(path = %path.display(), %error, "failed to save document");
                OperationState::error(Reason::ReadAndParse)
            }
        };
        self.state
    }

    /// Drops the document and hands the source back untouched.
    pub fn release(self) -> Option<XmlSource> {
        self.source
    }

    /// Drops the document together with its source.
    pub fn release_with_source(self) {
        drop(self);
    }

    /// Clears document and source of a context kept by value; the state resets.
    pub fn release_in_place(&mut self) -> Option<XmlSource> {
        self.document = None;
        self.state = OperationState::NONE;
        self.source.take()
    }

    /// Rebuilds the document without the slots of removed nodes.
    ///
    /// Node ids held from earlier queries are stale afterwards. The state is not touched.
    pub fn compact(&mut self) {
        let Some(document) = &self.document else {
            return;
        };
        match document.compacted() {
            Ok(compact) => {
                tracing::debug!(before = document.slot_count(), after = compact.slot_count(), "compacted document");
                self.document = Some(compact);
            }
            Err(error) => tracing::warn!(%error, "cannot compact document"),
        }
    }

    pub fn document(&self) -> Option<&Document> {
        self.document.as_ref()
    }

    pub fn document_mut(&mut self) -> Option<&mut Document> {
        self.document.as_mut()
    }

    pub fn source(&self) -> Option<&XmlSource> {
        self.source.as_ref()
    }

    pub fn state(&self) -> OperationState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: OperationState) -> OperationState {
        self.state = state;
        state
    }

    /// Name of the document element, if any.
    pub fn root_name(&self) -> Option<&QName> {
        let document = self.document.as_ref()?;
        document.document_element().and_then(|id| document.name(id))
    }

    /// A handle on node `id` of this context's document.
    pub fn node(&self, id: NodeId) -> Option<NodeRef<'_>> {
        let document = self.document.as_ref()?;
        document.contains(id).then(|| NodeRef::new(document, id))
    }

    /// Records `SourceInvalid` when the context has no document.
    pub(crate) fn check_document(&mut self) -> bool {
        if self.document.is_some() {
            self.state = OperationState::success(Reason::NoReason);
            true
        } else {
            self.state = OperationState::error(Reason::SourceInvalid);
            false
        }
    }

    /// Records `PathInvalid` for an empty or malformed expression.
    pub(crate) fn check_expression(&mut self, expr: &str) -> bool {
        if expr.trim().is_empty() {
            self.state = OperationState::error(Reason::PathInvalid);
            return false;
        }
        match XPath::compile(expr) {
            Ok(_) => {
                self.state = OperationState::success(Reason::NoReason);
                true
            }
            Err(error) => {
                tracing::debug!(expression = expr, %error, "rejected path expression");
                self.state = OperationState::error(Reason::PathInvalid);
                false
            }
        }
    }

    /// Serializes the document with declaration, as [`save_to_file`](Self::save_to_file) would.
    pub fn to_xml_string(&self) -> Option<String> {
        let document = self.document.as_ref()?;
        match xmlctx_dom::to_string(document, &OutputOptions::default()) {
            Ok(text) => Some(text),
            Err(error) => {
                tracing::error!(%error, "failed to serialize document");
                None
            }
        }
    }
}

fn copy_as_content(document: &mut Document, node: NodeRef<'_>) -> Result<(), TreeError> {
    let source = node.document();
    let roots: Vec<NodeId> = match node.kind() {
        Some(NodeKind::Document) => source.children(node.id()).to_vec(),
        Some(_) => vec![node.id()],
        None => return Err(TreeError::UnknownNode(node.id())),
    };
    for id in roots {
        let copy = document.import_node(source, id)?;
        document.append_child(document.root(), copy)?;
    }
    Ok(())
}

impl From<Document> for DocumentContext {
    fn from(document: Document) -> Self {
        Self {
            source: None,
            document: Some(document),
            state: OperationState::success(Reason::ReadAndParse),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StatusCode;
    use rstest::rstest;

    #[rstest]
    fn empty_contexts_have_a_document_and_no_source() {
        for ctx in [DocumentContext::new_empty(), DocumentContext::new_empty_with_root("heros")] {
            assert!(ctx.document().is_some());
            assert!(ctx.source().is_none());
            assert_eq!(ctx.state(), OperationState::success(Reason::ReadAndParse));
        }
    }

    #[rstest]
    #[case("")]
    #[case("heros")]
    fn root_name_follows_constructor(#[case] name: &str) {
        let ctx = DocumentContext::new_empty_with_root(name);
        assert_eq!(ctx.root_name().map(QName::lexical), (!name.is_empty()).then(|| name.to_string()));
    }

    #[rstest]
    fn missing_source_is_a_read_error() {
        let ctx = DocumentContext::new(None);
        assert!(ctx.document().is_none());
        assert_eq!(ctx.state(), OperationState::error(Reason::ReadAndParse));
    }

    #[rstest]
    #[case(b"".as_slice())]
    #[case(b"<heros>".as_slice())]
    #[case(b"\xff\xfe<a/>".as_slice())]
    fn bad_sources_are_kept_but_not_parsed(#[case] bytes: &[u8]) {
        let ctx = DocumentContext::new(Some(XmlSource::from_bytes("xml/bad.xml", bytes)));
        assert!(ctx.document().is_none());
        assert_eq!(ctx.state().status, StatusCode::Error);
        assert_eq!(ctx.release().map(|s| s.bytes().to_vec()), Some(bytes.to_vec()));
    }

    #[rstest]
    fn release_in_place_resets_everything() {
        let mut ctx = DocumentContext::new(Some(XmlSource::from_bytes("xml/a.xml", "<a/>")));
        let source = ctx.release_in_place();
        assert_eq!(source.map(|s| s.name().to_string()), Some("xml/a.xml".to_string()));
        assert!(ctx.document().is_none());
        assert!(ctx.source().is_none());
        assert_eq!(ctx.state(), OperationState::NONE);
    }

    #[rstest]
    fn copies_of_text_nodes_are_rejected() {
        let doc = xmlctx_dom::parse("<a>text</a>").unwrap();
        let text = doc.children(doc.document_element().unwrap())[0];
        let ctx = DocumentContext::new_from_node(NodeRef::new(&doc, text));
        assert!(ctx.document().is_none());
        assert!(ctx.state().is_error());
    }
}
