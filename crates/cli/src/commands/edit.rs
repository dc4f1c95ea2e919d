use crate::util::{CliResult, emit, ensure_success, load, yes_no};
use clap::Args;
use std::path::{Path, PathBuf};
use xmlctx_core::{DocumentContext, OperationState};

#[derive(Args, Debug, Clone)]
pub struct ExistsArgs {
    #[arg(value_name = "FILE")]
    pub file: PathBuf,
    #[arg(value_name = "XPATH")]
    pub expression: String,
}

/// Where an edited document goes.
#[derive(Args, Debug, Clone, Default)]
pub struct Destination {
    /// Write the edited document here instead of printing it.
    #[arg(long = "output", short = 'o', conflicts_with = "in_place")]
    pub output: Option<PathBuf>,
    /// Overwrite the input file.
    #[arg(long = "in-place")]
    pub in_place: bool,
}

#[derive(Args, Debug, Clone)]
pub struct SetAttrArgs {
    #[arg(value_name = "FILE")]
    pub file: PathBuf,
    /// Selects the attributes to change, e.g. `//hero/@age`.
    #[arg(value_name = "XPATH")]
    pub expression: String,
    #[arg(value_name = "VALUE", allow_hyphen_values = true)]
    pub value: String,
    #[command(flatten)]
    pub destination: Destination,
}

#[derive(Args, Debug, Clone)]
pub struct SetContentArgs {
    #[arg(value_name = "FILE")]
    pub file: PathBuf,
    /// Selects the CDATA sections to replace, e.g. `//bio/text()`.
    #[arg(value_name = "XPATH")]
    pub expression: String,
    #[arg(value_name = "VALUE", allow_hyphen_values = true)]
    pub value: String,
    #[command(flatten)]
    pub destination: Destination,
}

#[derive(Args, Debug, Clone)]
pub struct RemoveArgs {
    #[arg(value_name = "FILE")]
    pub file: PathBuf,
    #[arg(value_name = "XPATH")]
    pub expression: String,
    #[command(flatten)]
    pub destination: Destination,
}

pub fn exists(args: &ExistsArgs) -> CliResult<String> {
    let mut ctx = load(&args.file)?;
    let found = ctx.exists(&args.expression);
    ensure_success(ctx.state(), "exists")?;
    Ok(yes_no(found).to_owned())
}

pub fn set_attr(args: &SetAttrArgs) -> CliResult<String> {
    edit(&args.file, &args.destination, "set-attr", |ctx| ctx.set_attribute(&args.expression, &args.value))
}

pub fn set_content(args: &SetContentArgs) -> CliResult<String> {
    edit(&args.file, &args.destination, "set-content", |ctx| ctx.set_content(&args.expression, &args.value))
}

pub fn remove(args: &RemoveArgs) -> CliResult<String> {
    edit(&args.file, &args.destination, "remove", |ctx| ctx.remove(&args.expression))
}

fn edit(
    file: &Path,
    destination: &Destination,
    what: &str,
    operation: impl FnOnce(&mut DocumentContext) -> OperationState,
) -> CliResult<String> {
    let mut ctx = load(file)?;
    let state = operation(&mut ctx);
    tracing::debug!(command = what, %state, "edit applied");
    ensure_success(state, what)?;
    let target = if destination.in_place { Some(file) } else { destination.output.as_deref() };
    emit(&mut ctx, target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    const HEROS: &str = r#"<heros><hero name="Thorin" age="20"><bio><![CDATA[old]]></bio></hero></heros>"#;

    #[fixture]
    fn heros_file() -> (TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("heros.xml");
        std::fs::write(&path, HEROS).unwrap();
        (dir, path)
    }

    #[rstest]
    #[case("//hero[@age = 20]", "yes")]
    #[case("//villain", "no")]
    fn exists_reports_matches(heros_file: (TempDir, PathBuf), #[case] expression: &str, #[case] expected: &str) {
        let args = ExistsArgs { file: heros_file.1, expression: expression.into() };
        assert_eq!(exists(&args).unwrap(), expected);
    }

    #[rstest]
    fn set_attr_prints_document(heros_file: (TempDir, PathBuf)) {
        let args = SetAttrArgs {
            file: heros_file.1,
            expression: "//hero/@age".into(),
            value: "21".into(),
            destination: Destination::default(),
        };
        let output = set_attr(&args).unwrap();
        assert!(output.starts_with("<?xml"));
        assert!(output.contains(r#"age="21""#));
    }

    #[rstest]
    fn set_content_in_place(heros_file: (TempDir, PathBuf)) {
        let (_dir, path) = heros_file;
        let args = SetContentArgs {
            file: path.clone(),
            expression: "//bio/text()".into(),
            value: "new".into(),
            destination: Destination { output: None, in_place: true },
        };
        assert_eq!(set_content(&args).unwrap(), "");
        assert!(std::fs::read_to_string(&path).unwrap().contains("<![CDATA[new]]>"));
    }

    #[rstest]
    fn remove_writes_output(heros_file: (TempDir, PathBuf)) {
        let (dir, path) = heros_file;
        let output = dir.path().join("out.xml");
        let args = RemoveArgs {
            file: path,
            expression: "//bio".into(),
            destination: Destination { output: Some(output.clone()), in_place: false },
        };
        remove(&args).unwrap();
        assert!(!std::fs::read_to_string(&output).unwrap().contains("bio"));
    }

    #[rstest]
    #[case("")]
    #[case("//hero[")]
    fn invalid_path_is_an_error(heros_file: (TempDir, PathBuf), #[case] expression: &str) {
        let args =
            RemoveArgs { file: heros_file.1, expression: expression.into(), destination: Destination::default() };
        let error = remove(&args).unwrap_err();
        assert!(error.to_string().contains("PathInvalid"));
    }
}
