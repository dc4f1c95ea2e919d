//! The XPath 1.0 core function library.

use crate::model::{NodeKind, XdmNode, sort_document_order};
use crate::runtime::{CallCtx, Error, ErrorCode, FunctionRegistry};
use crate::value::{Value, string_to_number};
use xmlctx_dom::XML_NAMESPACE;

fn is_xml_space(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r' | '\n')
}

#[allow(clippy::cast_precision_loss)]
fn count_value<N>(n: usize) -> Value<N> {
    Value::Number(n as f64)
}

fn context_node<N: XdmNode>(ctx: &CallCtx<'_, N>) -> Result<N, Error> {
    ctx.context_node
        .clone()
        .ok_or_else(|| Error::new(ErrorCode::NoContext, "function requires a context node"))
}

/// The argument as string, or the context node's string-value without arguments.
fn string_or_context<N: XdmNode>(ctx: &CallCtx<'_, N>, args: &[Value<N>]) -> String {
    match args.first() {
        Some(arg) => arg.to_string_value(),
        None => ctx.context_node.as_ref().map(XdmNode::string_value).unwrap_or_default(),
    }
}

fn string_arg<N: XdmNode>(args: &[Value<N>], index: usize) -> String {
    args.get(index).map(Value::to_string_value).unwrap_or_default()
}

fn number_arg<N: XdmNode>(args: &[Value<N>], index: usize) -> f64 {
    args.get(index).map_or(f64::NAN, Value::to_number)
}

fn node_set_arg<'v, N: XdmNode>(args: &'v [Value<N>], function: &str) -> Result<&'v [N], Error> {
    args.first().and_then(Value::as_nodes).ok_or_else(|| {
        Error::type_error(format!("{function}() expects a node-set argument"))
    })
}

/// First node of the argument, or the context node without arguments.
fn node_or_context<N: XdmNode>(
    ctx: &CallCtx<'_, N>,
    args: &[Value<N>],
    function: &str,
) -> Result<Option<N>, Error> {
    if args.is_empty() {
        return Ok(ctx.context_node.clone());
    }
    Ok(node_set_arg(args, function)?.first().cloned())
}

/// XPath `round()`: halves go toward positive infinity, negative values keep their sign.
pub fn xpath_round(n: f64) -> f64 {
    if n.is_nan() || n.is_infinite() {
        n
    } else if (-0.5..0.0).contains(&n) {
        -0.0
    } else {
        (n + 0.5).floor()
    }
}

#[allow(clippy::cast_precision_loss)]
fn substring(text: &str, start: f64, length: Option<f64>) -> String {
    let first = xpath_round(start);
    let end = length.map_or(f64::INFINITY, |len| first + xpath_round(len));
    text.chars()
        .enumerate()
        .filter(|(index, _)| {
            let position = (*index + 1) as f64;
            position >= first && position < end
        })
        .map(|(_, c)| c)
        .collect()
}

fn translate(text: &str, from: &str, to: &str) -> String {
    let from: Vec<char> = from.chars().collect();
    let to: Vec<char> = to.chars().collect();
    text.chars()
        .filter_map(|c| match from.iter().position(|&f| f == c) {
            Some(index) => to.get(index).copied(),
            None => Some(c),
        })
        .collect()
}

fn normalize_space(text: &str) -> String {
    text.split(is_xml_space).filter(|part| !part.is_empty()).collect::<Vec<_>>().join(" ")
}

fn lang_matches<N: XdmNode>(node: &N, wanted: &str) -> bool {
    let mut current = Some(node.clone());
    while let Some(candidate) = current {
        let lang = candidate
            .attributes()
            .into_iter()
            .find(|attr| attr.has_name("lang", Some(XML_NAMESPACE)));
        if let Some(attr) = lang {
            let value = attr.string_value().to_lowercase();
            let wanted = wanted.to_lowercase();
            return value == wanted
                || value.strip_prefix(&wanted).is_some_and(|rest| rest.starts_with('-'));
        }
        current = candidate.parent();
    }
    false
}

fn ids<N: XdmNode>(ctx: &CallCtx<'_, N>, args: &[Value<N>]) -> Result<Value<N>, Error> {
    let tokens: Vec<String> = match args.first() {
        Some(Value::NodeSet(nodes)) => nodes
            .iter()
            .flat_map(|n| n.string_value().split(is_xml_space).map(str::to_string).collect::<Vec<_>>())
            .filter(|t| !t.is_empty())
            .collect(),
        Some(other) => other
            .to_string_value()
            .split(is_xml_space)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect(),
        None => Vec::new(),
    };
    let root = context_node(ctx)?.root();
    let mut found: Vec<N> = root
        .descendants()
        .into_iter()
        .filter(|n| n.kind() == NodeKind::Element)
        .filter(|n| {
            n.attributes().iter().any(|attr| {
                (attr.has_name("id", None) || attr.has_name("id", Some(XML_NAMESPACE)))
                    && tokens.contains(&attr.string_value())
            })
        })
        .collect();
    sort_document_order(&mut found);
    Ok(Value::NodeSet(found))
}

pub fn register_core_functions<N: XdmNode>(reg: &mut FunctionRegistry<N>) {
    // Node-set functions
    reg.register_local("last", 0, Some(0), |ctx, _| Ok(count_value(ctx.size)));
    reg.register_local("position", 0, Some(0), |ctx, _| Ok(count_value(ctx.position)));
    reg.register_local("count", 1, Some(1), |_, args| {
        Ok(count_value(node_set_arg(args, "count")?.len()))
    });
    reg.register_local("id", 1, Some(1), |ctx, args| ids(ctx, args));
    reg.register_local("local-name", 0, Some(1), |ctx, args| {
        let node = node_or_context(ctx, args, "local-name")?;
        Ok(Value::String(node.and_then(|n| n.name()).map(|q| q.local).unwrap_or_default()))
    });
    reg.register_local("namespace-uri", 0, Some(1), |ctx, args| {
        let node = node_or_context(ctx, args, "namespace-uri")?;
        Ok(Value::String(node.and_then(|n| n.namespace_uri()).unwrap_or_default()))
    });
    reg.register_local("name", 0, Some(1), |ctx, args| {
        let node = node_or_context(ctx, args, "name")?;
        Ok(Value::String(node.and_then(|n| n.name()).map(|q| q.to_string()).unwrap_or_default()))
    });

    // String functions
    reg.register_local("string", 0, Some(1), |ctx, args| {
        Ok(Value::String(string_or_context(ctx, args)))
    });
    reg.register_local("concat", 2, None, |_, args| {
        Ok(Value::String(args.iter().map(Value::to_string_value).collect()))
    });
    reg.register_local("starts-with", 2, Some(2), |_, args| {
        Ok(Value::Boolean(string_arg(args, 0).starts_with(&string_arg(args, 1))))
    });
    reg.register_local("contains", 2, Some(2), |_, args| {
        Ok(Value::Boolean(string_arg(args, 0).contains(&string_arg(args, 1))))
    });
    reg.register_local("substring-before", 2, Some(2), |_, args| {
        let text = string_arg(args, 0);
        let needle = string_arg(args, 1);
        Ok(Value::String(
            text.split_once(needle.as_str()).map(|(before, _)| before.to_string()).unwrap_or_default(),
        ))
    });
    reg.register_local("substring-after", 2, Some(2), |_, args| {
        let text = string_arg(args, 0);
        let needle = string_arg(args, 1);
        Ok(Value::String(
            text.split_once(needle.as_str()).map(|(_, after)| after.to_string()).unwrap_or_default(),
        ))
    });
    reg.register_local("substring", 2, Some(3), |_, args| {
        let length = (args.len() == 3).then(|| number_arg(args, 2));
        Ok(Value::String(substring(&string_arg(args, 0), number_arg(args, 1), length)))
    });
    reg.register_local("string-length", 0, Some(1), |ctx, args| {
        Ok(count_value(string_or_context(ctx, args).chars().count()))
    });
    reg.register_local("normalize-space", 0, Some(1), |ctx, args| {
        Ok(Value::String(normalize_space(&string_or_context(ctx, args))))
    });
    reg.register_local("translate", 3, Some(3), |_, args| {
        Ok(Value::String(translate(&string_arg(args, 0), &string_arg(args, 1), &string_arg(args, 2))))
    });

    // Boolean functions
    reg.register_local("boolean", 1, Some(1), |_, args| Ok(Value::Boolean(args[0].to_boolean())));
    reg.register_local("not", 1, Some(1), |_, args| Ok(Value::Boolean(!args[0].to_boolean())));
    reg.register_local("true", 0, Some(0), |_, _| Ok(Value::Boolean(true)));
    reg.register_local("false", 0, Some(0), |_, _| Ok(Value::Boolean(false)));
    reg.register_local("lang", 1, Some(1), |ctx, args| {
        let node = context_node(ctx)?;
        Ok(Value::Boolean(lang_matches(&node, &string_arg(args, 0))))
    });

    // Number functions
    reg.register_local("number", 0, Some(1), |ctx, args| {
        Ok(Value::Number(match args.first() {
            Some(arg) => arg.to_number(),
            None => string_to_number(&string_or_context(ctx, args)),
        }))
    });
    reg.register_local("sum", 1, Some(1), |_, args| {
        let nodes = node_set_arg(args, "sum")?;
        Ok(Value::Number(nodes.iter().map(|n| string_to_number(&n.string_value())).sum()))
    });
    reg.register_local("floor", 1, Some(1), |_, args| Ok(Value::Number(number_arg(args, 0).floor())));
    reg.register_local("ceiling", 1, Some(1), |_, args| {
        Ok(Value::Number(number_arg(args, 0).ceil()))
    });
    reg.register_local("round", 1, Some(1), |_, args| {
        Ok(Value::Number(xpath_round(number_arg(args, 0))))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("12345", 2.0, Some(3.0), "234")]
    #[case("12345", 1.5, Some(2.6), "234")]
    #[case("12345", 0.0, Some(3.0), "12")]
    #[case("12345", f64::NAN, Some(3.0), "")]
    #[case("12345", -42.0, Some(f64::INFINITY), "12345")]
    #[case("12345", f64::NEG_INFINITY, Some(f64::INFINITY), "")]
    #[case("12345", 2.0, None, "2345")]
    fn substring_follows_rounding_rules(
        #[case] text: &str,
        #[case] start: f64,
        #[case] length: Option<f64>,
        #[case] expected: &str,
    ) {
        assert_eq!(substring(text, start, length), expected);
    }

    #[rstest]
    fn translate_maps_and_drops() {
        assert_eq!(translate("--aaa--", "abc-", "ABC"), "AAA");
        assert_eq!(translate("bar", "abc", "ABC"), "BAr");
    }

    #[rstest]
    #[case(2.5, 3.0)]
    #[case(-2.5, -2.0)]
    #[case(-0.3, -0.0)]
    fn rounding(#[case] input: f64, #[case] expected: f64) {
        assert!((xpath_round(input) - expected).abs() < f64::EPSILON);
    }

    #[rstest]
    fn normalize_space_collapses_runs() {
        assert_eq!(normalize_space("  a \n\t b  "), "a b");
    }
}
