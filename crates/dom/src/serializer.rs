use crate::document::Document;
use crate::error::SerializeError;
use crate::node::{NodeId, NodeKind, QName};
use quick_xml::Writer;
use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesPI, BytesStart, BytesText, Event};
use std::io::Write;
use std::path::Path;

/// Serialization settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputOptions {
    declaration: bool,
    indent: Option<usize>,
    encoding: String,
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self { declaration: true, indent: None, encoding: "UTF-8".to_string() }
    }
}

impl OutputOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_declaration(mut self, declaration: bool) -> Self {
        self.declaration = declaration;
        self
    }

    /// Pretty-prints with `width` spaces per level.
    #[must_use]
    pub fn with_indent(mut self, width: Option<usize>) -> Self {
        self.indent = width;
        self
    }

    /// Encoding label written into the declaration. Output bytes are always UTF-8.
    #[must_use]
    pub fn with_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = encoding.into();
        self
    }

    pub fn declaration(&self) -> bool {
        self.declaration
    }

    pub fn indent(&self) -> Option<usize> {
        self.indent
    }

    pub fn encoding(&self) -> &str {
        &self.encoding
    }
}

/// Writes the whole document: declaration, then every top-level node on its own line.
pub fn write_document<W: Write>(
    doc: &Document,
    out: W,
    options: &OutputOptions,
) -> Result<(), SerializeError> {
    let mut writer = match options.indent {
        Some(width) => Writer::new_with_indent(out, b' ', width),
        None => Writer::new(out),
    };
    let pretty = options.indent.is_some();
    if options.declaration {
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some(options.encoding.as_str()), None)))?;
        if !pretty {
            writer.get_mut().write_all(b"\n")?;
        }
    }
    // Fragments keep their top-level text runs intact.
    let line_per_node = !pretty && !doc.is_fragment();
    for &child in doc.children(NodeId::DOCUMENT) {
        write_node(&mut writer, doc, child)?;
        if line_per_node {
            writer.get_mut().write_all(b"\n")?;
        }
    }
    if pretty || (doc.is_fragment() && !doc.children(NodeId::DOCUMENT).is_empty()) {
        writer.get_mut().write_all(b"\n")?;
    }
    writer.get_mut().flush()?;
    Ok(())
}

pub fn to_string(doc: &Document, options: &OutputOptions) -> Result<String, SerializeError> {
    let mut buffer = Vec::new();
    write_document(doc, &mut buffer, options)?;
    Ok(String::from_utf8(buffer)?)
}

pub fn save_file(
    doc: &Document,
    path: impl AsRef<Path>,
    options: &OutputOptions,
) -> Result<(), SerializeError> {
    let file = std::fs::File::create(path.as_ref())?;
    write_document(doc, std::io::BufWriter::new(file), options)?;
    tracing::debug!(path = %path.as_ref().display(), "saved XML document");
    Ok(())
}

/// Markup of a single node and its subtree, without declaration.
pub fn node_to_string(doc: &Document, id: NodeId) -> Result<String, SerializeError> {
    let mut writer = Writer::new(Vec::new());
    write_node(&mut writer, doc, id)?;
    Ok(String::from_utf8(writer.into_inner())?)
}

/// Writes the content of a document without declaration or line breaks (text output).
pub fn text_content(doc: &Document) -> String {
    doc.string_value(NodeId::DOCUMENT)
}

fn lexical_name(doc: &Document, id: NodeId) -> String {
    doc.name(id).map(QName::lexical).unwrap_or_default()
}

fn write_node<W: Write>(
    writer: &mut Writer<W>,
    doc: &Document,
    id: NodeId,
) -> Result<(), SerializeError> {
    let Some(kind) = doc.kind(id) else {
        return Ok(());
    };
    match kind {
        NodeKind::Document => {
            for &child in doc.children(id) {
                write_node(writer, doc, child)?;
            }
        }
        NodeKind::Element => {
            let name = lexical_name(doc, id);
            let mut start = BytesStart::new(name.as_str());
            for ns in doc.namespace_declarations(id) {
                let key = match &ns.prefix {
                    Some(prefix) => format!("xmlns:{prefix}"),
                    None => "xmlns".to_string(),
                };
                start.push_attribute((key.as_str(), ns.uri.as_str()));
            }
            for &attr in doc.attributes(id) {
                let key = lexical_name(doc, attr);
                start.push_attribute((key.as_str(), doc.value(attr)));
            }
            let children = doc.children(id);
            if children.is_empty() {
                writer.write_event(Event::Empty(start))?;
            } else {
                writer.write_event(Event::Start(start))?;
                for &child in children {
                    write_node(writer, doc, child)?;
                }
                writer.write_event(Event::End(BytesEnd::new(name.as_str())))?;
            }
        }
        NodeKind::Attribute | NodeKind::Text => {
            writer.write_event(Event::Text(BytesText::new(doc.value(id))))?;
        }
        NodeKind::CData => {
            for section in BytesCData::escaped(doc.value(id)) {
                writer.write_event(Event::CData(section))?;
            }
        }
        NodeKind::Comment => {
            writer.write_event(Event::Comment(BytesText::from_escaped(doc.value(id))))?;
        }
        NodeKind::ProcessingInstruction => {
            let target = lexical_name(doc, id);
            let data = doc.value(id);
            let content = if data.is_empty() { target } else { format!("{target} {data}") };
            writer.write_event(Event::PI(BytesPI::new(content)))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse;
    use rstest::rstest;

    #[rstest]
    fn empty_document_is_just_the_declaration() {
        let out = to_string(&Document::new(), &OutputOptions::default()).unwrap();
        assert_eq!(out, "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        assert_eq!(out.len(), 39);
    }

    #[rstest]
    fn empty_root_uses_short_form() {
        let out = to_string(&Document::with_root("heros"), &OutputOptions::default()).unwrap();
        assert!(out.ends_with("<heros/>\n"));
        assert_eq!(out.len(), 48);
    }

    #[rstest]
    fn markup_survives_a_parse_round() {
        let input = r#"<hero age="20"><!--c--><story><![CDATA[a < b]]></story><n>x &amp; y</n><?pi data?></hero>"#;
        let doc = parse(input).unwrap();
        let out = to_string(&doc, &OutputOptions::new().with_declaration(false)).unwrap();
        assert_eq!(out, format!("{input}\n"));
    }

    #[rstest]
    fn namespaces_are_written_back() {
        let input = r#"<x:root xmlns:x="urn:x"><x:child/></x:root>"#;
        let doc = parse(input).unwrap();
        let root = doc.document_element().unwrap();
        assert_eq!(node_to_string(&doc, root).unwrap(), input);
    }

    #[rstest]
    fn indented_output_breaks_lines() {
        let doc = parse("<a><b/><c/></a>").unwrap();
        let out = to_string(&doc, &OutputOptions::new().with_indent(Some(2))).unwrap();
        assert!(out.contains("\n  <b/>"));
        assert!(out.ends_with("</a>\n"));
    }
}
