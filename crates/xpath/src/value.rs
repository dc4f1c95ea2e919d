use crate::model::XdmNode;
use crate::runtime::{Error, ErrorCode};

/// The four XPath 1.0 value types.
#[derive(Debug, Clone, PartialEq)]
pub enum Value<N> {
    /// Nodes in document order without duplicates.
    NodeSet(Vec<N>),
    Boolean(bool),
    Number(f64),
    String(String),
}

impl<N: XdmNode> Value<N> {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::NodeSet(_) => "node-set",
            Value::Boolean(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
        }
    }

    pub fn to_boolean(&self) -> bool {
        match self {
            Value::NodeSet(nodes) => !nodes.is_empty(),
            Value::Boolean(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
        }
    }

    pub fn to_number(&self) -> f64 {
        match self {
            Value::NodeSet(_) => string_to_number(&self.to_string_value()),
            Value::Boolean(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::Number(n) => *n,
            Value::String(s) => string_to_number(s),
        }
    }

    /// `string()` conversion; a node-set yields the value of its first node.
    pub fn to_string_value(&self) -> String {
        match self {
            Value::NodeSet(nodes) => nodes.first().map(XdmNode::string_value).unwrap_or_default(),
            Value::Boolean(b) => b.to_string(),
            Value::Number(n) => number_to_string(*n),
            Value::String(s) => s.clone(),
        }
    }

    pub fn as_nodes(&self) -> Option<&[N]> {
        match self {
            Value::NodeSet(nodes) => Some(nodes),
            _ => None,
        }
    }

    pub fn into_nodes(self) -> Result<Vec<N>, Error> {
        match self {
            Value::NodeSet(nodes) => Ok(nodes),
            other => Err(Error::new(
                ErrorCode::Type,
                format!("expected a node-set, found a {}", other.type_name()),
            )),
        }
    }

    /// True for a node-set with at least one node.
    pub fn has_nodes(&self) -> bool {
        matches!(self, Value::NodeSet(nodes) if !nodes.is_empty())
    }
}

fn is_xml_space(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r' | '\n')
}

/// XPath 1.0 `number()` on a string: optional minus, digits with an optional
/// fraction, surrounded by whitespace. Anything else is NaN.
pub fn string_to_number(text: &str) -> f64 {
    let trimmed = text.trim_matches(is_xml_space);
    let unsigned = trimmed.strip_prefix('-').unwrap_or(trimmed);
    let (int_part, frac_part) = match unsigned.split_once('.') {
        Some((int_part, frac_part)) => (int_part, Some(frac_part)),
        None => (unsigned, None),
    };
    let digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    let valid = digits(int_part)
        && frac_part.is_none_or(digits)
        && !(int_part.is_empty() && frac_part.is_none_or(str::is_empty));
    if !valid {
        return f64::NAN;
    }
    trimmed.parse::<f64>().unwrap_or(f64::NAN)
}

/// XPath 1.0 `string()` on a number.
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity".to_string() } else { "-Infinity".to_string() }
    } else if n == 0.0 {
        "0".to_string()
    } else {
        format!("{n}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("20", 20.0)]
    #[case("  -3.5 ", -3.5)]
    #[case(".5", 0.5)]
    #[case("5.", 5.0)]
    fn numeric_strings(#[case] input: &str, #[case] expected: f64) {
        assert!((string_to_number(input) - expected).abs() < f64::EPSILON);
    }

    #[rstest]
    #[case("")]
    #[case("abc")]
    #[case("1e3")]
    #[case("+1")]
    #[case(".")]
    #[case("-")]
    fn non_numeric_strings_are_nan(#[case] input: &str) {
        assert!(string_to_number(input).is_nan());
    }

    #[rstest]
    #[case(20.0, "20")]
    #[case(-0.0, "0")]
    #[case(0.25, "0.25")]
    #[case(1e21, "1000000000000000000000")]
    #[case(f64::NAN, "NaN")]
    #[case(f64::NEG_INFINITY, "-Infinity")]
    fn number_formatting(#[case] input: f64, #[case] expected: &str) {
        assert_eq!(number_to_string(input), expected);
    }
}
