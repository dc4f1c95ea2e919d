use crate::OutputFormat;
use crate::util::{CliResult, load, parse_key_value};
use clap::Args;
use owo_colors::{OwoColorize, Stream};
use serde::Serialize;
use std::fmt::Write;
use std::path::PathBuf;
use xmlctx_core::{DocumentContext, EvaluateOptions, QueryResult};
use xmlctx_dom::{Document, NodeId, NodeKind};

#[derive(Args, Debug, Clone)]
pub struct QueryArgs {
    #[arg(value_name = "FILE")]
    pub file: PathBuf,
    #[arg(value_name = "XPATH")]
    pub expression: String,
    /// Binds a prefix for the expression, as `prefix=uri`.
    #[arg(long = "namespace", value_parser = parse_key_value)]
    pub namespaces: Vec<(String, String)>,
    /// Also bind the prefixes declared on the document element.
    #[arg(long = "document-namespaces")]
    pub document_namespaces: bool,
    #[arg(long = "format", value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct AttributeSummary {
    name: String,
    value: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum QueryItemSummary {
    Element {
        node: String,
        name: String,
        attributes: Vec<AttributeSummary>,
        text: String,
    },
    Attribute {
        owner: String,
        name: String,
        value: String,
    },
    Content {
        kind: &'static str,
        value: String,
    },
    Value {
        value: serde_json::Value,
    },
}

pub fn run(args: &QueryArgs) -> CliResult<String> {
    let ctx = load(&args.file)?;
    let summaries = evaluate(&ctx, args)?;
    let output = match args.format {
        OutputFormat::Text => render_query_text(&summaries),
        OutputFormat::Json => render_query_json(&summaries)?,
    };
    Ok(output)
}

pub(crate) fn evaluate(ctx: &DocumentContext, args: &QueryArgs) -> CliResult<Vec<QueryItemSummary>> {
    let options = args
        .namespaces
        .iter()
        .fold(EvaluateOptions::new(), |options, (prefix, uri)| options.with_namespace(prefix, uri))
        .with_document_namespaces(args.document_namespaces);
    let result = ctx.try_evaluate(&args.expression, &options)?;
    let Some(document) = ctx.document() else {
        return Ok(Vec::new());
    };
    Ok(summarize_query_result(document, &result))
}

pub(crate) fn summarize_query_result(document: &Document, result: &QueryResult) -> Vec<QueryItemSummary> {
    let scalar = |value: serde_json::Value| vec![QueryItemSummary::Value { value }];
    match result {
        QueryResult::NodeSet(nodes) => nodes.iter().filter_map(|&id| summarize_node(document, id)).collect(),
        QueryResult::Number(n) => scalar(json_number(*n)),
        QueryResult::String(s) => scalar(serde_json::Value::String(s.clone())),
        QueryResult::Boolean(b) => scalar(serde_json::Value::Bool(*b)),
    }
}

/// Integral numbers stay integers; NaN and infinities become their XPath string.
fn json_number(n: f64) -> serde_json::Value {
    let text = QueryResult::Number(n).to_string_value(&Document::new());
    match text.parse::<i64>() {
        Ok(integer) => integer.into(),
        Err(_) => serde_json::Number::from_f64(n).map_or(serde_json::Value::String(text), serde_json::Value::Number),
    }
}

fn summarize_node(document: &Document, id: NodeId) -> Option<QueryItemSummary> {
    let lexical = |id: NodeId| document.name(id).map(ToString::to_string).unwrap_or_default();
    let summary = match document.kind(id)? {
        NodeKind::Document => QueryItemSummary::Content { kind: "document", value: document.string_value(id) },
        NodeKind::Element => QueryItemSummary::Element {
            node: id.to_string(),
            name: lexical(id),
            attributes: document
                .attributes(id)
                .iter()
                .map(|&attr| AttributeSummary { name: lexical(attr), value: document.value(attr).to_owned() })
                .collect(),
            text: document.string_value(id).trim().to_owned(),
        },
        NodeKind::Attribute => QueryItemSummary::Attribute {
            owner: document.parent(id).map(lexical).unwrap_or_default(),
            name: lexical(id),
            value: document.value(id).to_owned(),
        },
        NodeKind::Text => QueryItemSummary::Content { kind: "text", value: document.value(id).to_owned() },
        NodeKind::CData => QueryItemSummary::Content { kind: "cdata", value: document.value(id).to_owned() },
        NodeKind::Comment => QueryItemSummary::Content { kind: "comment", value: document.value(id).to_owned() },
        NodeKind::ProcessingInstruction => {
            QueryItemSummary::Content { kind: "processing-instruction", value: document.value(id).to_owned() }
        }
    };
    Some(summary)
}

fn colorize_node_label(label: &str) -> String {
    label
        .if_supports_color(Stream::Stdout, |text| text.bold().fg_rgb::<79, 166, 255>().to_string())
        .to_string()
}

fn colorize_attribute_name(name: &str) -> String {
    let rendered = format!("@{name}");
    rendered
        .if_supports_color(Stream::Stdout, |text| text.bold().fg_rgb::<241, 149, 255>().to_string())
        .to_string()
}

fn colorize_value(value: &str) -> String {
    value.if_supports_color(Stream::Stdout, |text| text.fg_rgb::<136, 192, 74>().to_string()).to_string()
}

fn colorize_owner_label(label: &str) -> String {
    label.if_supports_color(Stream::Stdout, |text| text.dimmed().to_string()).to_string()
}

fn quoted(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| format!("\"{}\"", value.replace('"', "\\\"")))
}

pub(crate) fn render_query_text(items: &[QueryItemSummary]) -> String {
    let mut output = String::new();
    for item in items {
        match item {
            QueryItemSummary::Element { node: _, name, attributes, text } => {
                let _ = writeln!(&mut output, "{}", colorize_node_label(&format!("<{name}>")));
                for attribute in attributes {
                    let colored_name = colorize_attribute_name(&attribute.name);
                    let colored_value = colorize_value(&quoted(&attribute.value));
                    let _ = writeln!(&mut output, "    {colored_name} = {colored_value}");
                }
                if !text.is_empty() {
                    let _ = writeln!(&mut output, "    {}", colorize_value(&quoted(text)));
                }
            }
            QueryItemSummary::Attribute { owner, name, value } => {
                let colored_owner = colorize_owner_label(&format!("<{owner}>"));
                let colored_name = colorize_attribute_name(name);
                let colored_value = colorize_value(&quoted(value));
                let _ = writeln!(&mut output, "{colored_name} = {colored_value} ({colored_owner})");
            }
            QueryItemSummary::Content { kind, value } => {
                let colored_kind = colorize_owner_label(kind);
                let _ = writeln!(&mut output, "{colored_kind} {}", colorize_value(&quoted(value)));
            }
            QueryItemSummary::Value { value } => {
                let plain = match value {
                    serde_json::Value::String(text) => text.clone(),
                    other => other.to_string(),
                };
                let _ = writeln!(&mut output, "{}", colorize_value(&plain));
            }
        }
    }

    output.trim_end().to_owned()
}

pub(crate) fn render_query_json(items: &[QueryItemSummary]) -> CliResult<String> {
    Ok(serde_json::to_string_pretty(items)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};
    use std::borrow::Cow;
    use tempfile::TempDir;

    const HEROS: &str = r#"<heros xmlns:g="urn:xmlctx:game">
  <hero name="Thorin" age="20"><note>Prefers axes.</note><g:rank>3</g:rank></hero>
  <hero name="Elanor" age="120"><note>Prefers bows.</note><g:rank>5</g:rank></hero>
</heros>"#;

    fn strip_ansi(input: &str) -> Cow<'_, str> {
        if !input.contains('\u{1b}') {
            return Cow::Borrowed(input);
        }

        let mut result = String::with_capacity(input.len());
        let mut chars = input.chars();
        loop {
            match chars.next() {
                Some('\u{1b}') => {
                    for next in chars.by_ref() {
                        if next == 'm' {
                            break;
                        }
                    }
                }
                Some(ch) => result.push(ch),
                None => break,
            }
        }
        Cow::Owned(result)
    }

    #[fixture]
    fn heros_file() -> (TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("heros.xml");
        std::fs::write(&path, HEROS).unwrap();
        (dir, path)
    }

    fn args(file: PathBuf, expression: &str, format: OutputFormat) -> QueryArgs {
        QueryArgs { file, expression: expression.into(), namespaces: vec![], document_namespaces: false, format }
    }

    #[rstest]
    fn query_text_lists_elements(heros_file: (TempDir, PathBuf)) {
        let output = run(&args(heros_file.1, "//hero", OutputFormat::Text)).unwrap();
        let plain = strip_ansi(&output);
        assert!(plain.contains("<hero>"));
        assert!(plain.contains("@name = \"Thorin\""));
        assert_eq!(plain.matches("<hero>").count(), 2);
    }

    #[rstest]
    fn query_attribute_names_owner(heros_file: (TempDir, PathBuf)) {
        let output = run(&args(heros_file.1, "//hero[2]/@age", OutputFormat::Text)).unwrap();
        assert_eq!(strip_ansi(&output), "@age = \"120\" (<hero>)");
    }

    #[rstest]
    #[case("count(//hero)", "2")]
    #[case("string(//hero/@name)", "Thorin")]
    #[case("max(//hero/@age) > 100", "true")]
    fn query_scalars(heros_file: (TempDir, PathBuf), #[case] expression: &str, #[case] expected: &str) {
        let output = run(&args(heros_file.1, expression, OutputFormat::Text)).unwrap();
        assert_eq!(strip_ansi(&output), expected);
    }

    #[rstest]
    fn query_with_document_namespaces(heros_file: (TempDir, PathBuf)) {
        let mut query = args(heros_file.1, "sum(//g:rank)", OutputFormat::Text);
        assert!(run(&query).is_err());
        query.document_namespaces = true;
        assert_eq!(strip_ansi(&run(&query).unwrap()), "8");
    }

    #[rstest]
    fn query_json_produces_valid_payload(heros_file: (TempDir, PathBuf)) {
        let output = run(&args(heros_file.1, "//hero[1] | //hero/note", OutputFormat::Json)).unwrap();
        let json: serde_json::Value = serde_json::from_str(output.trim()).unwrap();
        assert_eq!(json[0]["type"], "Element");
        assert_eq!(json[0]["attributes"][0]["name"], "name");
        assert_eq!(json[1]["text"], "Prefers axes.");
    }

    #[rstest]
    fn invalid_expression_is_an_error(heros_file: (TempDir, PathBuf)) {
        assert!(run(&args(heros_file.1, "//hero[", OutputFormat::Text)).is_err());
    }

    #[rstest]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(run(&args(dir.path().join("missing.xml"), "/", OutputFormat::Text)).is_err());
    }
}
