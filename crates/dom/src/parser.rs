use crate::document::Document;
use crate::error::ParseError;
use crate::node::{NodeId, NodeKind, QName};
use quick_xml::Reader;
use quick_xml::escape::resolve_predefined_entity;
use quick_xml::events::{BytesStart, Event};
use std::path::Path;

/// Parses a UTF-8 XML document held in memory.
pub fn parse(text: &str) -> Result<Document, ParseError> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(false);

    let mut doc = Document::new();
    let mut stack: Vec<NodeId> = vec![NodeId::DOCUMENT];

    loop {
        let position = reader.buffer_position();
        let event = match reader.read_event() {
            Ok(event) => event,
            Err(source) => {
                return Err(ParseError::Syntax { position: reader.error_position(), source });
            }
        };
        let parent = stack.last().copied().unwrap_or(NodeId::DOCUMENT);
        match event {
            Event::Start(start) => {
                let element = open_element(&mut doc, parent, &start, position)?;
                stack.push(element);
            }
            Event::Empty(start) => {
                open_element(&mut doc, parent, &start, position)?;
            }
            Event::End(_) => {
                if stack.len() > 1 {
                    stack.pop();
                }
            }
            Event::Text(text) => {
                let text = text.decode().map_err(|e| syntax(position, e.into()))?;
                append_text(&mut doc, parent, &text, position)?;
            }
            Event::GeneralRef(reference) => {
                let resolved = if reference.is_char_ref() {
                    reference
                        .resolve_char_ref()
                        .map_err(|e| syntax(position, e))?
                        .map(String::from)
                } else {
                    let name = reference.decode().map_err(|e| syntax(position, e.into()))?;
                    resolve_predefined_entity(&name).map(str::to_string)
                };
                match resolved {
                    Some(text) => append_text(&mut doc, parent, &text, position)?,
                    None => {
                        let name = String::from_utf8_lossy(&reference).into_owned();
                        return Err(ParseError::UnknownEntity { name, position });
                    }
                }
            }
            Event::CData(cdata) => {
                if parent == NodeId::DOCUMENT {
                    return Err(ParseError::TrailingContent(position));
                }
                let text = cdata.decode().map_err(|e| syntax(position, e.into()))?;
                let node = doc.create_cdata(text);
                attach(&mut doc, parent, node, position)?;
            }
            Event::Comment(comment) => {
                let text = comment.decode().map_err(|e| syntax(position, e.into()))?;
                let node = doc.create_comment(text);
                attach(&mut doc, parent, node, position)?;
            }
            Event::PI(pi) => {
                let target = String::from_utf8_lossy(pi.target()).into_owned();
                let content = String::from_utf8_lossy(pi.content());
                let node = doc.create_processing_instruction(&target, content.trim_start());
                attach(&mut doc, parent, node, position)?;
            }
            Event::Decl(_) | Event::DocType(_) => {}
            Event::Eof => break,
        }
    }

    if let Some(&open) = stack.get(1) {
        let name = doc.name(open).map(QName::lexical).unwrap_or_default();
        return Err(ParseError::Unclosed(name));
    }
    if doc.document_element().is_none() {
        return Err(ParseError::Empty);
    }
    tracing::trace!(nodes = doc.descendants(NodeId::DOCUMENT).len(), "parsed XML document");
    Ok(doc)
}

/// Parses raw bytes after checking that they are UTF-8.
pub fn parse_bytes(bytes: &[u8]) -> Result<Document, ParseError> {
    let text = std::str::from_utf8(bytes)?;
    parse(text)
}

pub fn parse_file(path: impl AsRef<Path>) -> Result<Document, ParseError> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)
        .map_err(|source| ParseError::Io { path: path.to_path_buf(), source })?;
    parse_bytes(&bytes)
}

fn syntax(position: u64, source: quick_xml::Error) -> ParseError {
    ParseError::Syntax { position, source }
}

fn attach(doc: &mut Document, parent: NodeId, node: NodeId, position: u64) -> Result<(), ParseError> {
    doc.append_child(parent, node).map_err(|_| ParseError::TrailingContent(position))
}

fn append_text(doc: &mut Document, parent: NodeId, text: &str, position: u64) -> Result<(), ParseError> {
    if parent == NodeId::DOCUMENT {
        if text.trim().is_empty() {
            return Ok(());
        }
        return Err(ParseError::TrailingContent(position));
    }
    match doc.children(parent).last().copied() {
        Some(last) if doc.kind(last) == Some(NodeKind::Text) => doc.push_value(last, text),
        _ => {
            let node = doc.create_text(text);
            attach(doc, parent, node, position)?;
        }
    }
    Ok(())
}

fn open_element(
    doc: &mut Document,
    parent: NodeId,
    start: &BytesStart<'_>,
    position: u64,
) -> Result<NodeId, ParseError> {
    let lexical = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let element = doc.create_element(QName::parse(&lexical));
    attach(doc, parent, element, position)?;

    let mut plain: Vec<(QName, String)> = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| syntax(position, e.into()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value().map_err(|e| syntax(position, e))?.into_owned();
        if key == "xmlns" {
            doc.declare_namespace(element, None, &value)
                .map_err(|_| ParseError::TrailingContent(position))?;
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            doc.declare_namespace(element, Some(prefix), &value)
                .map_err(|_| ParseError::TrailingContent(position))?;
        } else {
            plain.push((QName::parse(&key), value));
        }
    }

    let mut name = QName::parse(&lexical);
    name.ns_uri = resolve(doc, element, name.prefix.as_deref(), true, position)?;
    doc.set_name(element, name);

    for (mut attr_name, value) in plain {
        attr_name.ns_uri = resolve(doc, element, attr_name.prefix.as_deref(), false, position)?;
        doc.set_attribute(element, attr_name, value)
            .map_err(|_| ParseError::TrailingContent(position))?;
    }
    Ok(element)
}

/// Unprefixed attributes never take the default namespace.
fn resolve(
    doc: &Document,
    element: NodeId,
    prefix: Option<&str>,
    use_default: bool,
    position: u64,
) -> Result<Option<String>, ParseError> {
    match prefix {
        Some(prefix) => doc
            .lookup_namespace(element, Some(prefix))
            .map(Some)
            .ok_or_else(|| ParseError::UnboundPrefix { prefix: prefix.to_string(), position }),
        None if use_default => Ok(doc.lookup_namespace(element, None)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn entities_merge_into_one_text_node() {
        let doc = parse("<a>x &amp; y &#65;</a>").unwrap();
        let root = doc.document_element().unwrap();
        assert_eq!(doc.children(root).len(), 1);
        assert_eq!(doc.string_value(root), "x & y A");
    }

    #[rstest]
    fn cdata_is_its_own_node() {
        let doc = parse("<story>intro<![CDATA[<b>bold</b>]]></story>").unwrap();
        let root = doc.document_element().unwrap();
        let kinds: Vec<_> = doc.children(root).iter().map(|&c| doc.kind(c).unwrap()).collect();
        assert_eq!(kinds, vec![NodeKind::Text, NodeKind::CData]);
        assert_eq!(doc.string_value(root), "intro<b>bold</b>");
    }

    #[rstest]
    fn namespaces_are_resolved() {
        let doc = parse(
            r#"<x:root xmlns:x="urn:x" xmlns="urn:d"><child x:id="1" plain="2"/></x:root>"#,
        )
        .unwrap();
        let root = doc.document_element().unwrap();
        assert_eq!(doc.name(root).unwrap().ns_uri.as_deref(), Some("urn:x"));
        let child = doc.children(root)[0];
        assert_eq!(doc.name(child).unwrap().ns_uri.as_deref(), Some("urn:d"));
        let attrs = doc.attributes(child);
        assert_eq!(doc.name(attrs[0]).unwrap().ns_uri.as_deref(), Some("urn:x"));
        assert_eq!(doc.name(attrs[1]).unwrap().ns_uri, None);
    }

    #[rstest]
    #[case("", "empty")]
    #[case("<a></b>", "syntax")]
    #[case("<a/><b/>", "trailing")]
    #[case("<a>", "unclosed")]
    #[case("<a>&bogus;</a>", "entity")]
    #[case("<p:a/>", "prefix")]
    fn malformed_input_is_rejected(#[case] input: &str, #[case] expected: &str) {
        let err = parse(input).unwrap_err();
        let kind = match err {
            ParseError::Empty => "empty",
            ParseError::Syntax { .. } => "syntax",
            ParseError::TrailingContent(_) => "trailing",
            ParseError::Unclosed(_) => "unclosed",
            ParseError::UnknownEntity { .. } => "entity",
            ParseError::UnboundPrefix { .. } => "prefix",
            other => panic!("unexpected error: {other:?}"),
        };
        assert_eq!(kind, expected);
    }

    #[rstest]
    fn invalid_utf8_is_an_encoding_error() {
        assert!(matches!(parse_bytes(&[b'<', 0xff, b'/', b'>']), Err(ParseError::Encoding(_))));
    }
}
