//! `xsl:output` settings and result serialization.

use std::io::Write;
use std::path::Path;
use xmlctx_dom::{Document, OutputOptions, SerializeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMethod {
    #[default]
    Xml,
    /// Written like XML, without declaration.
    Html,
    /// Only the string value of the result.
    Text,
}

impl OutputMethod {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "xml" => Some(OutputMethod::Xml),
            "html" => Some(OutputMethod::Html),
            "text" => Some(OutputMethod::Text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSettings {
    pub method: OutputMethod,
    pub indent: bool,
    pub omit_xml_declaration: bool,
    pub encoding: String,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            method: OutputMethod::Xml,
            indent: false,
            omit_xml_declaration: false,
            encoding: "UTF-8".to_string(),
        }
    }
}

impl OutputSettings {
    pub fn to_output_options(&self) -> OutputOptions {
        let declaration = self.method == OutputMethod::Xml && !self.omit_xml_declaration;
        OutputOptions::new()
            .with_declaration(declaration)
            .with_indent(self.indent.then_some(2))
            .with_encoding(self.encoding.clone())
    }

    pub fn write<W: Write>(&self, result: &Document, mut out: W) -> Result<(), SerializeError> {
        match self.method {
            OutputMethod::Text => {
                out.write_all(result.string_value(result.root()).as_bytes())?;
                out.flush()?;
                Ok(())
            }
            OutputMethod::Xml | OutputMethod::Html => {
                xmlctx_dom::write_document(result, out, &self.to_output_options())
            }
        }
    }

    pub fn serialize(&self, result: &Document) -> Result<String, SerializeError> {
        let mut buffer = Vec::new();
        self.write(result, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    pub fn save(&self, result: &Document, path: impl AsRef<Path>) -> Result<(), SerializeError> {
        let file = std::fs::File::create(path.as_ref())?;
        self.write(result, std::io::BufWriter::new(file))?;
        tracing::debug!(path = %path.as_ref().display(), method = ?self.method, "saved transform result");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn text_method_writes_string_value() {
        let doc = xmlctx_dom::parse("<a>Thorin<b>, son of Thrain</b></a>").unwrap();
        let settings = OutputSettings { method: OutputMethod::Text, ..OutputSettings::default() };
        assert_eq!(settings.serialize(&doc).unwrap(), "Thorin, son of Thrain");
    }

    #[rstest]
    #[case(OutputMethod::Xml, false, true)]
    #[case(OutputMethod::Xml, true, false)]
    #[case(OutputMethod::Html, false, false)]
    fn declaration_follows_method(#[case] method: OutputMethod, #[case] omit: bool, #[case] expected: bool) {
        let settings = OutputSettings { method, omit_xml_declaration: omit, ..OutputSettings::default() };
        assert_eq!(settings.to_output_options().declaration(), expected);
    }
}
