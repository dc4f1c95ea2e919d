use anyhow::{Context, bail};
use std::path::Path;
use xmlctx_core::{DocumentContext, OperationState};

pub type CliResult<T> = anyhow::Result<T>;

/// Loads `path` into a context; a file that does not parse is an error.
pub fn load(path: &Path) -> CliResult<DocumentContext> {
    let ctx = DocumentContext::new_from_file(path);
    if ctx.document().is_none() {
        bail!("cannot read XML document '{}' ({})", path.display(), ctx.state());
    }
    Ok(ctx)
}

/// Fails with `what` when the last operation ended in an error state.
pub fn ensure_success(state: OperationState, what: &str) -> CliResult<()> {
    if state.is_error() {
        bail!("{what} failed ({state})");
    }
    Ok(())
}

/// Writes the document to `output`, or returns its markup for printing.
pub fn emit(ctx: &mut DocumentContext, output: Option<&Path>) -> CliResult<String> {
    match output {
        Some(path) => {
            ensure_success(ctx.save_to_file(path), &format!("saving '{}'", path.display()))?;
            tracing::info!(path = %path.display(), "document written");
            Ok(String::new())
        }
        None => ctx.to_xml_string().context("document cannot be serialized").map(|xml| xml.trim_end().to_owned()),
    }
}

/// Splits a `name=value` argument.
pub fn parse_key_value(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((key, val)) if !key.trim().is_empty() => Ok((key.trim().to_owned(), val.to_owned())),
        _ => Err(format!("expected NAME=VALUE, got '{value}'")),
    }
}

pub fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
