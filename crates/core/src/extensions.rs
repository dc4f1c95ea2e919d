//! Extension functions registered next to the XPath core library.

use fancy_regex::Regex;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, LazyLock, Mutex, PoisonError};
use xmlctx_xpath::{Error, ErrorCode, FunctionRegistry, Value, XdmNode, string_to_number};

pub const REGEXMATCH: &str = "regexmatch";
pub const MAX: &str = "max";
pub const IN_RANGE: &str = "in_range";

const REGEX_CACHE_SIZE: NonZeroUsize = match NonZeroUsize::new(128) {
    Some(size) => size,
    None => NonZeroUsize::MIN,
};

static REGEX_CACHE: LazyLock<Mutex<LruCache<String, Arc<Regex>>>> =
    LazyLock::new(|| Mutex::new(LruCache::new(REGEX_CACHE_SIZE)));

fn cached_regex(pattern: &str) -> Result<Arc<Regex>, Error> {
    let mut cache = REGEX_CACHE.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(regex) = cache.get(pattern) {
        return Ok(Arc::clone(regex));
    }
    let regex = Regex::new(pattern).map_err(|err| {
        Error::new(ErrorCode::InvalidRegex, format!("invalid pattern '{pattern}': {err}"))
    })?;
    let regex = Arc::new(regex);
    cache.put(pattern.to_string(), Arc::clone(&regex));
    Ok(regex)
}

/// True when `pattern` matches anywhere in `value`.
pub fn regex_match(value: &str, pattern: &str) -> Result<bool, Error> {
    cached_regex(pattern)?
        .is_match(value)
        .map_err(|err| Error::new(ErrorCode::InvalidRegex, format!("regex evaluation failed: {err}")))
}

/// Largest of `values`, ignoring NaN; NaN when nothing is left.
pub fn max_number(values: impl IntoIterator<Item = f64>) -> f64 {
    values
        .into_iter()
        .filter(|v| !v.is_nan())
        .fold(f64::NAN, |acc, v| if acc.is_nan() || v > acc { v } else { acc })
}

/// Whether `number` lies in a range list such as `1-3, 7, 10.5-12`.
///
/// Bounds are inclusive. A malformed item never matches.
pub fn in_range(ranges: &str, number: f64) -> bool {
    if number.is_nan() {
        return false;
    }
    ranges.split(',').filter_map(parse_range_item).any(|(low, high)| low <= number && number <= high)
}

fn parse_range_item(item: &str) -> Option<(f64, f64)> {
    let item: String = item.chars().filter(|c| !c.is_whitespace()).collect();
    if item.is_empty() {
        return None;
    }
    // A leading '-' belongs to the lower bound.
    let split_at = item.char_indices().skip(1).find(|&(_, c)| c == '-').map(|(i, _)| i);
    let (low, high) = match split_at {
        Some(index) => (&item[..index], &item[index + 1..]),
        None => (item.as_str(), item.as_str()),
    };
    let low = string_to_number(low);
    let high = string_to_number(high);
    (!low.is_nan() && !high.is_nan()).then_some((low, high))
}

/// Registers `regexmatch`, `max` and `in_range`.
pub fn register_extensions<N: XdmNode>(reg: &mut FunctionRegistry<N>) {
    reg.register_local(REGEXMATCH, 2, Some(2), |_, args| {
        let value = args[0].to_string_value();
        let pattern = args[1].to_string_value();
        regex_match(&value, &pattern).map(Value::Boolean)
    });
    reg.register_local(MAX, 1, Some(1), |_, args| {
        let nodes = args[0]
            .as_nodes()
            .ok_or_else(|| Error::type_error(format!("{MAX}() expects a node-set argument")))?;
        Ok(Value::Number(max_number(nodes.iter().map(|n| string_to_number(&n.string_value())))))
    });
    reg.register_local(IN_RANGE, 2, Some(2), |_, args| {
        Ok(Value::Boolean(in_range(&args[0].to_string_value(), args[1].to_number())))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("1-3", 2.0, true)]
    #[case("1-3", 3.0, true)]
    #[case("1-3", 3.5, false)]
    #[case("1, 5, 9", 5.0, true)]
    #[case(" 10 - 20 , 30", 30.0, true)]
    #[case("-5-0", -2.0, true)]
    #[case("0.5-1.5", 1.25, true)]
    #[case("a-b, 4", 4.0, true)]
    #[case("a-b", 1.0, false)]
    #[case("", 0.0, false)]
    #[case("1-3", f64::NAN, false)]
    fn range_lists(#[case] ranges: &str, #[case] number: f64, #[case] expected: bool) {
        assert_eq!(in_range(ranges, number), expected);
    }

    #[rstest]
    fn max_skips_nan() {
        assert!((max_number([3.0, f64::NAN, 7.5, 1.0]) - 7.5).abs() < f64::EPSILON);
        assert!(max_number([f64::NAN]).is_nan());
        assert!(max_number([]).is_nan());
    }

    #[rstest]
    #[case("Dwarf Warrior", "^Dw", true)]
    #[case("Dwarf Warrior", "elf", false)]
    #[case("abcabc", r"(abc)\1", true)]
    fn regex_searches(#[case] value: &str, #[case] pattern: &str, #[case] expected: bool) {
        assert_eq!(regex_match(value, pattern).unwrap(), expected);
    }

    #[rstest]
    fn invalid_pattern_is_an_error() {
        let err = regex_match("x", "(unclosed").unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidRegex);
    }
}
