use crate::OutputFormat;
use crate::util::{CliResult, load};
use anyhow::bail;
use clap::{Args, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use xmlctx_core::{to_double, to_float, to_long};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default, ValueEnum)]
pub enum NumberKind {
    #[default]
    Double,
    /// Truncated toward zero.
    Long,
    Float,
}

#[derive(Args, Debug, Clone)]
pub struct NumberArgs {
    #[arg(value_name = "FILE")]
    pub file: PathBuf,
    #[arg(value_name = "XPATH")]
    pub expression: String,
    #[arg(long = "as", value_enum, default_value_t = NumberKind::Double)]
    pub kind: NumberKind,
    #[arg(long = "format", value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(Serialize, Debug, PartialEq)]
struct NumberSummary {
    expression: String,
    kind: &'static str,
    value: String,
}

pub fn run(args: &NumberArgs) -> CliResult<String> {
    let ctx = load(&args.file)?;
    let (value, ok) = match args.kind {
        NumberKind::Double => {
            let coerced = to_double(Some(&ctx), &args.expression);
            (coerced.value.to_string(), coerced.is_ok())
        }
        NumberKind::Long => {
            let coerced = to_long(Some(&ctx), &args.expression);
            (coerced.value.to_string(), coerced.is_ok())
        }
        NumberKind::Float => {
            let coerced = to_float(Some(&ctx), &args.expression);
            (coerced.value.to_string(), coerced.is_ok())
        }
    };
    if !ok {
        bail!("'{}' does not evaluate to a number", args.expression);
    }
    let summary = NumberSummary {
        expression: args.expression.clone(),
        kind: match args.kind {
            NumberKind::Double => "double",
            NumberKind::Long => "long",
            NumberKind::Float => "float",
        },
        value,
    };
    Ok(match args.format {
        OutputFormat::Text => summary.value,
        OutputFormat::Json => serde_json::to_string_pretty(&summary)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    #[fixture]
    fn heros_file() -> (TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("heros.xml");
        std::fs::write(&path, r#"<heros><hero age="20.75"/><hero age="young"/></heros>"#).unwrap();
        (dir, path)
    }

    fn args(file: PathBuf, expression: &str, kind: NumberKind) -> NumberArgs {
        NumberArgs { file, expression: expression.into(), kind, format: OutputFormat::Text }
    }

    #[rstest]
    #[case("//hero/@age", NumberKind::Double, "20.75")]
    #[case("//hero/@age", NumberKind::Long, "20")]
    #[case("//hero/@age", NumberKind::Float, "20")]
    #[case("count(//hero) * 1.5", NumberKind::Double, "3")]
    fn numbers(
        heros_file: (TempDir, PathBuf),
        #[case] expression: &str,
        #[case] kind: NumberKind,
        #[case] expected: &str,
    ) {
        assert_eq!(run(&args(heros_file.1, expression, kind)).unwrap(), expected);
    }

    #[rstest]
    #[case("//hero[2]/@age")]
    #[case("//villain")]
    #[case("string(//hero/@age)")]
    fn not_a_number(heros_file: (TempDir, PathBuf), #[case] expression: &str) {
        assert!(run(&args(heros_file.1, expression, NumberKind::Double)).is_err());
    }

    #[rstest]
    fn json_summary(heros_file: (TempDir, PathBuf)) {
        let mut number = args(heros_file.1, "//hero/@age", NumberKind::Long);
        number.format = OutputFormat::Json;
        let json: serde_json::Value = serde_json::from_str(&run(&number).unwrap()).unwrap();
        assert_eq!(json["kind"], "long");
        assert_eq!(json["value"], "20");
    }
}
