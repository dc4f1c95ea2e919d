//! Numeric coercion of query results and raw text.
//!
//! These functions report through a local 0/1 code instead of the context
//! state, so they also work without any context.

use crate::context::DocumentContext;
use crate::query::QueryResult;

pub const CODE_OK: u8 = 0;
pub const CODE_FAILED: u8 = 1;

/// A converted value and its 0 (ok) / 1 (failed) code.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coerced<T> {
    pub code: u8,
    pub value: T,
}

impl<T> Coerced<T> {
    pub fn ok(value: T) -> Self {
        Self { code: CODE_OK, value }
    }

    pub fn failed(value: T) -> Self {
        Self { code: CODE_FAILED, value }
    }

    pub fn is_ok(&self) -> bool {
        self.code == CODE_OK
    }
}

/// XPath `number()` of a non-empty node-set or numeric result of `expr`.
pub fn to_double(ctx: Option<&DocumentContext>, expr: &str) -> Coerced<f64> {
    let Some(ctx) = ctx else {
        return Coerced::failed(0.0);
    };
    let (Some(document), Some(result)) = (ctx.document(), ctx.evaluate(expr)) else {
        return Coerced::failed(0.0);
    };
    let number = match &result {
        QueryResult::NodeSet(nodes) if !nodes.is_empty() => result.to_number(document),
        QueryResult::Number(n) => *n,
        _ => return Coerced::failed(0.0),
    };
    if number.is_nan() { Coerced::failed(0.0) } else { Coerced::ok(number) }
}

/// [`to_double`] truncated toward zero; out-of-range values saturate.
#[allow(clippy::cast_possible_truncation)]
pub fn to_long(ctx: Option<&DocumentContext>, expr: &str) -> Coerced<i64> {
    let double = to_double(ctx, expr);
    if double.is_ok() { Coerced::ok(double.value as i64) } else { Coerced::failed(0) }
}

/// [`to_long`] widened back to a float, so fractions are dropped.
#[allow(clippy::cast_precision_loss)]
pub fn to_float(ctx: Option<&DocumentContext>, expr: &str) -> Coerced<f32> {
    let long = to_long(ctx, expr);
    if long.is_ok() { Coerced::ok(long.value as f32) } else { Coerced::failed(0.0) }
}

fn is_c_space(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\u{0b}' | '\u{0c}' | '\r')
}

fn split_sign(text: &str) -> (bool, &str) {
    if let Some(rest) = text.strip_prefix('-') {
        (true, rest)
    } else {
        (false, text.strip_prefix('+').unwrap_or(text))
    }
}

/// Base-10 `strtol`: leading whitespace, optional sign, then the longest digit run.
///
/// Text without digits converts to 0 with code 0. Overflow saturates with code 1.
pub fn string_to_long(text: &str) -> Coerced<i64> {
    let (negative, rest) = split_sign(text.trim_start_matches(is_c_space));
    let mut value: i64 = 0;
    for byte in rest.bytes().take_while(u8::is_ascii_digit) {
        let digit = i64::from(byte - b'0');
        let next = value
            .checked_mul(10)
            .and_then(|v| if negative { v.checked_sub(digit) } else { v.checked_add(digit) });
        match next {
            Some(v) => value = v,
            None => return Coerced::failed(if negative { i64::MIN } else { i64::MAX }),
        }
    }
    Coerced::ok(value)
}

fn starts_with_ignore_case(text: &str, word: &str) -> bool {
    text.get(..word.len()).is_some_and(|head| head.eq_ignore_ascii_case(word))
}

/// Length of the longest decimal float literal at the start of `text`.
fn decimal_prefix_len(text: &str) -> usize {
    let bytes = text.as_bytes();
    let digits_from = |start: usize| bytes[start..].iter().take_while(|b| b.is_ascii_digit()).count();
    let mut len = digits_from(0);
    let mut mantissa_digits = len;
    if bytes.get(len) == Some(&b'.') {
        let fraction = digits_from(len + 1);
        mantissa_digits += fraction;
        len += 1 + fraction;
    }
    if mantissa_digits == 0 {
        return 0;
    }
    if matches!(bytes.get(len), Some(b'e' | b'E')) {
        let mut exp = len + 1;
        if matches!(bytes.get(exp), Some(b'+' | b'-')) {
            exp += 1;
        }
        let exp_digits = digits_from(exp.min(bytes.len()));
        if exp_digits > 0 {
            len = exp + exp_digits;
        }
    }
    len
}

/// `strtof`: leading whitespace, optional sign, then the longest decimal
/// literal or `inf`/`infinity`/`nan`.
///
/// Text without a numeric prefix converts to 0.0 with code 0. Values out of
/// `f32` range give code 1.
pub fn string_to_float(text: &str) -> Coerced<f32> {
    let (negative, rest) = split_sign(text.trim_start_matches(is_c_space));
    let sign = if negative { -1.0 } else { 1.0 };
    if starts_with_ignore_case(rest, "inf") {
        return Coerced::ok(sign * f32::INFINITY);
    }
    if starts_with_ignore_case(rest, "nan") {
        return Coerced::ok(f32::NAN);
    }
    let len = decimal_prefix_len(rest);
    if len == 0 {
        return Coerced::ok(0.0);
    }
    let literal = &rest[..len];
    let Ok(magnitude) = literal.parse::<f32>() else {
        return Coerced::ok(0.0);
    };
    let value = sign * magnitude;
    let nonzero_digits = literal
        .split(['e', 'E'])
        .next()
        .is_some_and(|mantissa| mantissa.bytes().any(|b| (b'1'..=b'9').contains(&b)));
    if magnitude.is_infinite() || (nonzero_digits && !magnitude.is_normal()) {
        Coerced::failed(value)
    } else {
        Coerced::ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("341", 0, 341)]
    #[case("  -42abc", 0, -42)]
    #[case("+7", 0, 7)]
    #[case("ABCD", 0, 0)]
    #[case("", 0, 0)]
    #[case("9223372036854775807", 0, i64::MAX)]
    #[case("-9223372036854775808", 0, i64::MIN)]
    #[case("9223372036854775808", 1, i64::MAX)]
    #[case("-99999999999999999999", 1, i64::MIN)]
    fn strtol_behaviour(#[case] text: &str, #[case] code: u8, #[case] value: i64) {
        assert_eq!(string_to_long(text), Coerced { code, value });
    }

    #[rstest]
    fn eighty_digit_numeral_overflows() {
        let numeral = "1234567890".repeat(8);
        assert_eq!(string_to_long(&numeral).code, CODE_FAILED);
    }

    #[rstest]
    #[case("3.5", 0, 3.5)]
    #[case("  -2e3x", 0, -2000.0)]
    #[case(".25", 0, 0.25)]
    #[case("7.", 0, 7.0)]
    #[case("1e", 0, 1.0)]
    #[case("ABCD", 0, 0.0)]
    #[case("1e39", 1, f32::INFINITY)]
    #[case("-1e39", 1, f32::NEG_INFINITY)]
    #[case("1e-50", 1, 0.0)]
    #[case("0.000", 0, 0.0)]
    #[case("-Infinity", 0, f32::NEG_INFINITY)]
    fn strtof_behaviour(#[case] text: &str, #[case] code: u8, #[case] value: f32) {
        let result = string_to_float(text);
        assert_eq!(result.code, code, "{text}");
        assert!(result.value == value || (result.value - value).abs() < f32::EPSILON, "{text}");
    }

    #[rstest]
    fn nan_text_parses_as_nan() {
        let result = string_to_float("nan(123)");
        assert!(result.is_ok());
        assert!(result.value.is_nan());
    }

    #[rstest]
    fn missing_context_fails() {
        assert_eq!(to_double(None, "1").code, CODE_FAILED);
        assert_eq!(to_long(None, "1").code, CODE_FAILED);
        assert_eq!(to_float(None, "1").code, CODE_FAILED);
    }
}
