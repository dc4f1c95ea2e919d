use rstest::{fixture, rstest};
use std::path::PathBuf;
use tempfile::TempDir;
use xmlctx_core::{
    DirectoryArchive, DocumentContext, OperationState, Reason, ResourceArchive, SourceKind,
    StatusCode, XmlSource,
};

const EMPTY_DOCUMENT: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n";

#[fixture]
fn fixtures() -> DirectoryArchive {
    DirectoryArchive::new(PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures"))
}

#[fixture]
fn workdir() -> TempDir {
    tempfile::tempdir().unwrap()
}

#[rstest]
#[case::no_root(DocumentContext::new_empty())]
#[case::with_root(DocumentContext::new_empty_with_root("heros"))]
#[case::empty_root_name(DocumentContext::new_empty_with_root(""))]
fn empty_construction_has_document_but_no_source(#[case] ctx: DocumentContext) {
    assert!(ctx.document().is_some());
    assert!(ctx.source().is_none());
    assert_eq!(ctx.state(), OperationState::success(Reason::ReadAndParse));
}

#[rstest]
fn missing_source_yields_no_document() {
    let ctx = DocumentContext::new(None);
    assert!(ctx.document().is_none());
    assert_eq!(ctx.state(), OperationState::new(StatusCode::Error, Reason::ReadAndParse));
}

#[rstest]
fn empty_document_saves_as_declaration_only(workdir: TempDir) {
    let path = workdir.path().join("empty.xml");
    let mut ctx = DocumentContext::new_empty();
    assert!(ctx.save_to_file(&path).is_success());
    let written = std::fs::read_to_string(&path).unwrap();
    assert_eq!(written, EMPTY_DOCUMENT);
    assert_eq!(written.len(), 39);
}

#[rstest]
fn root_only_document_saves_in_48_bytes(workdir: TempDir) {
    let path = workdir.path().join("heros.xml");
    let mut ctx = DocumentContext::new_empty_with_root("heros");
    ctx.save_to_file(&path);
    assert_eq!(std::fs::metadata(&path).unwrap().len(), 48);
    assert_eq!(std::fs::read_to_string(&path).unwrap(), format!("{EMPTY_DOCUMENT}<heros/>\n"));
}

#[rstest]
fn saving_into_missing_directory_is_a_read_error(workdir: TempDir) {
    let mut ctx = DocumentContext::new_empty_with_root("heros");
    let state = ctx.save_to_file(workdir.path().join("missing/heros.xml"));
    assert_eq!(state, OperationState::error(Reason::ReadAndParse));
}

#[rstest]
fn saving_without_document_or_path_is_a_no_op(workdir: TempDir) {
    let mut ctx = DocumentContext::new(None);
    let path = workdir.path().join("never.xml");
    assert_eq!(ctx.save_to_file(&path), OperationState::error(Reason::ReadAndParse));
    assert!(!path.exists());

    let mut ctx = DocumentContext::new_empty();
    assert_eq!(ctx.save_to_file(""), OperationState::success(Reason::ReadAndParse));
}

#[rstest]
fn skipped_save_keeps_the_previous_state() {
    let mut ctx = DocumentContext::new_empty_with_root("heros");
    ctx.remove("//hero[");
    assert_eq!(ctx.state(), OperationState::error(Reason::PathInvalid));
    assert_eq!(ctx.save_to_file(""), OperationState::error(Reason::PathInvalid));
    assert_eq!(ctx.state(), OperationState::error(Reason::PathInvalid));
}

#[rstest]
fn compaction_keeps_content_after_repeated_edits() {
    let mut ctx = DocumentContext::new(Some(XmlSource::from_bytes(
        "xml/bio.xml",
        "<hero><bio><![CDATA[v0]]></bio></hero>",
    )));
    for round in 1..=10 {
        ctx.set_content("//bio/text()", &format!("v{round}"));
    }
    let grown = ctx.document().unwrap().slot_count();
    ctx.compact();
    assert!(ctx.document().unwrap().slot_count() < grown);
    assert!(ctx.state().is_success());
    assert!(ctx.to_xml_string().unwrap().contains("<bio><![CDATA[v10]]></bio>"));
}

#[rstest]
fn edits_survive_a_file_round_trip(fixtures: DirectoryArchive, workdir: TempDir) {
    let source = XmlSource::from_resource_name(&fixtures, "heros");
    let mut ctx = DocumentContext::new(source);
    ctx.set_attribute("//hero[@name='Thorin']/@age", "21");
    let path = workdir.path().join("heros.xml");
    assert!(ctx.save_to_file(&path).is_success());

    let reloaded = DocumentContext::new_from_file(&path);
    assert_eq!(reloaded.state(), OperationState::success(Reason::ReadAndParse));
    assert_eq!(reloaded.attribute("age", "//hero[@name='Thorin']").as_deref(), Some("21"));
    assert!(reloaded.source().is_none());
}

#[rstest]
#[case::empty_path("")]
#[case::missing_file("does/not/exist.xml")]
fn unreadable_files_leave_no_document(#[case] path: &str) {
    let ctx = DocumentContext::new_from_file(path);
    assert!(ctx.document().is_none());
    assert_eq!(ctx.state(), OperationState::error(Reason::ReadAndParse));
}

#[rstest]
fn malformed_file_leaves_no_document(workdir: TempDir) {
    let path = workdir.path().join("broken.xml");
    std::fs::write(&path, "<heros><hero></heros>").unwrap();
    let ctx = DocumentContext::new_from_file(&path);
    assert!(ctx.document().is_none());
    assert!(ctx.state().is_error());
}

#[rstest]
#[case("heros", "heros")]
#[case("breeds", "breeds")]
#[case("talents", "talents")]
fn fixtures_resolve_by_resource_name(
    fixtures: DirectoryArchive,
    #[case] name: &str,
    #[case] root: &str,
) {
    let source = XmlSource::from_resource_name(&fixtures, name).unwrap();
    assert_eq!(source.name(), format!("xml/{name}.xml"));
    assert!(matches!(source.kind(), SourceKind::ResourceFile(_)));
    let ctx = DocumentContext::new(Some(source));
    assert_eq!(ctx.root_name().map(|q| q.lexical()).as_deref(), Some(root));
}

#[rstest]
fn directory_archive_globs_relative_paths(fixtures: DirectoryArchive) {
    let mut paths: Vec<String> = fixtures
        .search_by_name("xml/*.xml")
        .unwrap()
        .iter()
        .map(|file| file.path().to_string())
        .collect();
    paths.sort();
    assert_eq!(paths, ["xml/breeds.xml", "xml/heros.xml", "xml/talents.xml"]);
    assert!(XmlSource::from_resource_name_full(&fixtures, "xml/", "heros", "xsl").is_none());
}

#[rstest]
fn release_hands_the_source_back(fixtures: DirectoryArchive) {
    let source = XmlSource::from_resource_name(&fixtures, "breeds").unwrap();
    let expected = source.clone();
    let ctx = DocumentContext::new(Some(source));
    assert_eq!(ctx.release(), Some(expected.clone()));

    // The returned source can back another context.
    let ctx = DocumentContext::new(Some(expected));
    assert!(ctx.evaluate("/breeds").is_some_and(|result| result.has_result()));
    ctx.release_with_source();
}

#[rstest]
fn copying_a_node_builds_an_independent_document(fixtures: DirectoryArchive) {
    let heros = DocumentContext::new(XmlSource::from_resource_name(&fixtures, "heros"));
    let thorin = heros.evaluate("//hero[@name='Thorin']").unwrap();
    let node = heros.result_nodes(&thorin)[0];

    let mut copy = DocumentContext::new_from_node(node);
    assert_eq!(copy.state(), OperationState::success(Reason::ReadAndParse));
    assert_eq!(copy.root_name().map(|q| q.lexical()).as_deref(), Some("hero"));
    copy.remove("/hero/config");
    assert!(!copy.exists("//config"));
    assert!(heros.evaluate("//hero[@name='Thorin']/config").unwrap().has_result());
}

#[rstest]
fn copying_the_document_node_keeps_all_content(fixtures: DirectoryArchive) {
    let heros = DocumentContext::new(XmlSource::from_resource_name(&fixtures, "heros"));
    let document = heros.document().unwrap();
    let copy = DocumentContext::new_from_node(xmlctx_dom::NodeRef::new(document, document.root()));
    assert_eq!(copy.to_xml_string(), heros.to_xml_string());
}
