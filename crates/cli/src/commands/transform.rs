use crate::util::{CliResult, load, parse_key_value};
use anyhow::{Context, bail};
use clap::Args;
use std::path::PathBuf;
use xmlctx_xslt::{Severity, Stylesheet, TransformContext};

#[derive(Args, Debug, Clone)]
pub struct TransformArgs {
    #[arg(value_name = "FILE")]
    pub file: PathBuf,
    #[arg(value_name = "STYLESHEET")]
    pub stylesheet: PathBuf,
    /// String parameter, as `name=text`.
    #[arg(long = "param", value_parser = parse_key_value)]
    pub params: Vec<(String, String)>,
    /// Parameter bound to an XPath expression over the input, as `name=expr`.
    #[arg(long = "xpath-param", value_parser = parse_key_value)]
    pub xpath_params: Vec<(String, String)>,
    /// Write the result here instead of printing it.
    #[arg(long = "output", short = 'o')]
    pub output: Option<PathBuf>,
    /// Print per-template timings to stderr.
    #[arg(long = "profile")]
    pub profile: bool,
    /// Maximum template nesting before the run is aborted.
    #[arg(long = "max-depth", default_value_t = xmlctx_xslt::DEFAULT_MAX_DEPTH)]
    pub max_depth: usize,
}

pub fn run(args: &TransformArgs) -> CliResult<String> {
    let input = load(&args.file)?;
    let stylesheet = Stylesheet::from_file(&args.stylesheet)
        .with_context(|| format!("cannot load stylesheet '{}'", args.stylesheet.display()))?;
    let settings = stylesheet.output_settings().clone();

    let mut transform = TransformContext::new(&input, Some(stylesheet)).with_max_depth(args.max_depth);
    for (name, value) in &args.params {
        transform = transform.with_text_param(name, value);
    }
    for (name, expr) in &args.xpath_params {
        transform = transform.with_xpath_param(name, expr);
    }
    if let Some(output) = &args.output {
        transform = transform.with_output(output.clone());
    }
    if args.profile {
        transform = transform.with_profile(std::io::stderr());
    }

    let result = transform.apply();
    for diagnostic in transform.errors() {
        match diagnostic.severity {
            Severity::Message => tracing::info!(%diagnostic, "transform"),
            Severity::Warning => tracing::warn!(%diagnostic, "transform"),
            Severity::Error | Severity::Fatal => tracing::error!(%diagnostic, "transform"),
        }
    }
    let Some(result) = result else {
        bail!("transform of '{}' produced no result", args.file.display());
    };
    if transform.has_errors() {
        bail!("transform of '{}' reported errors", args.file.display());
    }
    if args.output.is_some() {
        return Ok(String::new());
    }
    Ok(settings.serialize(&result)?.trim_end().to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    const STYLESHEET: &str = r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
  <xsl:output method="text"/>
  <xsl:param name="greeting" select="'Hi'"/>
  <xsl:param name="limit" select="1"/>
  <xsl:template match="/">
    <xsl:for-each select="//hero[position() &lt;= $limit]">
      <xsl:value-of select="concat($greeting, ' ', @name, ';')"/>
    </xsl:for-each>
  </xsl:template>
</xsl:stylesheet>"#;

    #[fixture]
    fn workdir() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("heros.xml"), "<heros><hero name='Thorin'/><hero name='Elanor'/></heros>")
            .unwrap();
        std::fs::write(dir.path().join("greet.xsl"), STYLESHEET).unwrap();
        dir
    }

    fn args(dir: &TempDir) -> TransformArgs {
        TransformArgs {
            file: dir.path().join("heros.xml"),
            stylesheet: dir.path().join("greet.xsl"),
            params: vec![],
            xpath_params: vec![],
            output: None,
            profile: false,
            max_depth: xmlctx_xslt::DEFAULT_MAX_DEPTH,
        }
    }

    #[rstest]
    fn defaults_apply(workdir: TempDir) {
        assert_eq!(run(&args(&workdir)).unwrap(), "Hi Thorin;");
    }

    #[rstest]
    fn params_override_defaults(workdir: TempDir) {
        let mut transform = args(&workdir);
        transform.params.push(("greeting".into(), "Hail".into()));
        transform.xpath_params.push(("limit".into(), "count(//hero)".into()));
        assert_eq!(run(&transform).unwrap(), "Hail Thorin;Hail Elanor;");
    }

    #[rstest]
    fn output_file_receives_result(workdir: TempDir) {
        let mut transform = args(&workdir);
        let path = workdir.path().join("out.txt");
        transform.output = Some(path.clone());
        assert_eq!(run(&transform).unwrap(), "");
        assert_eq!(std::fs::read_to_string(path).unwrap(), "Hi Thorin;");
    }

    #[rstest]
    fn mixed_quotes_param_fails(workdir: TempDir) {
        let mut transform = args(&workdir);
        transform.params.push(("greeting".into(), r#"it's "odd""#.into()));
        assert!(run(&transform).is_err());
    }

    #[rstest]
    fn missing_stylesheet_fails(workdir: TempDir) {
        let mut transform = args(&workdir);
        transform.stylesheet = workdir.path().join("missing.xsl");
        let error = run(&transform).unwrap_err();
        assert!(error.to_string().contains("missing.xsl"));
    }
}
