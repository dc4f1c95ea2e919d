use rstest::rstest;
use xmlctx_dom::{Document, OutputOptions, ParseError, QName, parse_file, save_file};

#[rstest]
fn saved_document_parses_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hero.xml");

    let mut doc = Document::with_root("hero");
    let root = doc.document_element().unwrap();
    doc.set_attribute(root, QName::local("age"), "20").unwrap();
    let story = doc.create_element(QName::local("story"));
    doc.append_child(root, story).unwrap();
    let cdata = doc.create_cdata("Once upon a time");
    doc.append_child(story, cdata).unwrap();

    save_file(&doc, &path, &OutputOptions::default()).unwrap();
    let loaded = parse_file(&path).unwrap();
    let root = loaded.document_element().unwrap();
    assert_eq!(loaded.attribute(root, "age"), Some("20"));
    assert_eq!(loaded.string_value(root), "Once upon a time");

    let text = std::fs::read_to_string(&path).unwrap();
    assert_eq!(
        text,
        concat!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n",
            "<hero age=\"20\"><story><![CDATA[Once upon a time]]></story></hero>\n",
        )
    );
}

#[rstest]
fn missing_file_reports_io_error() {
    let dir = tempfile::tempdir().unwrap();
    match parse_file(dir.path().join("missing.xml")) {
        Err(ParseError::Io { path, .. }) => assert!(path.ends_with("missing.xml")),
        other => panic!("unexpected result: {other:?}"),
    }
}
