//! Evaluation against parsed documents.

use rstest::{fixture, rstest};
use xmlctx_dom::{Document, NodeRef, parse};
use xmlctx_xpath::{
    DynamicContextBuilder, ErrorCode, StaticContext, Value, XPath, evaluate,
};

const HEROS: &str = r#"<heros xmlns:g="urn:game">
  <hero name="Tom" age="20"><config><base-gp value="110"/></config></hero>
  <hero name="Ann" age="31" xml:lang="en-GB"><g:skill>sword</g:skill></hero>
  <!-- retired -->
  <hero name="Bob" age="x"/>
</heros>"#;

#[fixture]
fn heros() -> Document {
    parse(HEROS).expect("fixture parses")
}

fn eval<'a>(doc: &'a Document, expr: &str) -> Value<NodeRef<'a>> {
    let static_ctx = StaticContext::new().with_namespace("g", "urn:game");
    let dyn_ctx = DynamicContextBuilder::new().with_context_item(NodeRef::new(doc, doc.root())).build();
    evaluate(expr, &static_ctx, &dyn_ctx).expect("expression evaluates")
}

#[rstest]
#[case("count(//hero)", 3.0)]
#[case("count(/heros/hero[@age > 25])", 1.0)]
#[case("sum(//hero[1]/@age | //hero[2]/@age)", 51.0)]
#[case("//hero/config/base-gp/@value + 1", 111.0)]
#[case("count(//hero[last()])", 1.0)]
#[case("count(//g:skill)", 1.0)]
#[case("count(//g:*)", 1.0)]
#[case("count(//comment())", 1.0)]
#[case("count(//hero[2]/preceding-sibling::*)", 1.0)]
#[case("count(//base-gp/ancestor::*)", 3.0)]
#[case("count(//hero[1]/following::hero)", 2.0)]
#[case("7 mod 3", 1.0)]
#[case("-(2 * 3) div 4", -1.5)]
fn numeric_results(heros: Document, #[case] expr: &str, #[case] expected: f64) {
    let value = eval(&heros, expr);
    assert!((value.to_number() - expected).abs() < 1e-9, "{expr} gave {value:?}");
}

#[rstest]
#[case("string(//hero[2]/@name)", "Ann")]
#[case("name(//g:skill)", "g:skill")]
#[case("local-name(//g:skill)", "skill")]
#[case("namespace-uri(//g:skill)", "urn:game")]
#[case("concat(//hero[1]/@name, '-', //hero[3]/@name)", "Tom-Bob")]
#[case("substring-after('base-gp', '-')", "gp")]
#[case("normalize-space(' a  b ')", "a b")]
#[case("string(1 div 0)", "Infinity")]
#[case("string(number(//hero[3]/@age))", "NaN")]
fn string_results(heros: Document, #[case] expr: &str, #[case] expected: &str) {
    assert_eq!(eval(&heros, expr).to_string_value(), expected);
}

#[rstest]
#[case("//hero/@name = 'Bob'", true)]
#[case("//hero/@name != 'Bob'", true)]
#[case("not(//hero/@name = 'Eve')", true)]
#[case("//hero[@name='Ann'][lang('en')]", true)]
#[case("//hero[@name='Tom'][lang('en')]", false)]
#[case("//nothing = //nothing", false)]
#[case("true() = 'x'", true)]
#[case("1 = '1.0'", true)]
fn boolean_results(heros: Document, #[case] expr: &str, #[case] expected: bool) {
    assert_eq!(eval(&heros, expr).to_boolean(), expected, "{expr}");
}

#[rstest]
fn node_sets_are_in_document_order(heros: Document) {
    let nodes = eval(&heros, "//hero[3] | //hero[1]").into_nodes().unwrap();
    let names: Vec<String> = nodes
        .iter()
        .map(|n| heros.attribute(n.id(), "name").unwrap_or_default().to_string())
        .collect();
    assert_eq!(names, ["Tom", "Bob"]);
}

#[rstest]
#[case("id('t2 t1')", vec!["Tom", "Ann"])]
#[case("id(//ref)", vec!["Ann"])]
#[case("id('missing')", vec![])]
fn id_looks_up_elements_by_id_attribute(#[case] expr: &str, #[case] expected: Vec<&str>) {
    let doc = parse(r#"<heros><hero id="t1" name="Tom"/><hero xml:id="t2" name="Ann"/><ref>t2</ref></heros>"#)
        .unwrap();
    let nodes = eval(&doc, expr).into_nodes().unwrap();
    let names: Vec<&str> = nodes.iter().filter_map(|n| doc.attribute(n.id(), "name")).collect();
    assert_eq!(names, expected);
}

#[rstest]
fn repeated_evaluation_returns_identical_nodes(heros: Document) {
    let xpath = XPath::compile("//hero").unwrap();
    let static_ctx = StaticContext::new();
    let dyn_ctx = DynamicContextBuilder::new().with_context_item(NodeRef::new(&heros, heros.root())).build();
    let first = xpath.select(&static_ctx, &dyn_ctx).unwrap();
    let second = xpath.select(&static_ctx, &dyn_ctx).unwrap();
    assert_eq!(first, second);
}

#[rstest]
fn variables_are_bound_by_name(heros: Document) {
    let static_ctx = StaticContext::new();
    let dyn_ctx = DynamicContextBuilder::new()
        .with_context_item(NodeRef::new(&heros, heros.root()))
        .with_variable("min", Value::Number(30.0))
        .build();
    let value = evaluate("//hero[@age > $min]/@name", &static_ctx, &dyn_ctx).unwrap();
    assert_eq!(value.to_string_value(), "Ann");
}

#[rstest]
#[case("$missing", ErrorCode::UnknownVariable)]
#[case("nope()", ErrorCode::UnknownFunction)]
#[case("count()", ErrorCode::UnknownFunction)]
#[case("//x:hero", ErrorCode::UnboundPrefix)]
#[case("count('text')", ErrorCode::Type)]
#[case("'a' | //hero", ErrorCode::Type)]
fn evaluation_errors_carry_codes(heros: Document, #[case] expr: &str, #[case] code: ErrorCode) {
    let static_ctx = StaticContext::new();
    let dyn_ctx = DynamicContextBuilder::new().with_context_item(NodeRef::new(&heros, heros.root())).build();
    let err = evaluate(expr, &static_ctx, &dyn_ctx).unwrap_err();
    assert_eq!(err.code, code, "{expr}: {err}");
}

#[rstest]
fn path_without_context_node_fails() {
    let static_ctx: StaticContext<NodeRef<'_>> = StaticContext::new();
    let dyn_ctx = DynamicContextBuilder::new().build();
    let err = evaluate("//hero", &static_ctx, &dyn_ctx).unwrap_err();
    assert_eq!(err.code, ErrorCode::NoContext);
    assert!(evaluate("1 + 1", &static_ctx, &dyn_ctx).is_ok());
}

#[rstest]
fn custom_functions_see_the_context(heros: Document) {
    let mut static_ctx: StaticContext<NodeRef<'_>> = StaticContext::new();
    static_ctx.functions_mut().register_local("depth", 0, Some(0), |ctx, _| {
        let mut depth = 0.0;
        let mut node = ctx.context_node.clone();
        while let Some(n) = node.and_then(|n| n.parent()) {
            depth += 1.0;
            node = Some(n);
        }
        Ok(Value::Number(depth))
    });
    let dyn_ctx = DynamicContextBuilder::new().with_context_item(NodeRef::new(&heros, heros.root())).build();
    let value = evaluate("//base-gp[depth() = 4]", &static_ctx, &dyn_ctx).unwrap();
    assert!(value.has_nodes());
}
