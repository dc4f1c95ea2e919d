//! Document sources and the resource archives they are looked up in.

use glob::{MatchOptions, Pattern};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("no resource matches '{0}'")]
    NotFound(String),
    #[error("{count} resources match '{key}', expected exactly one")]
    Ambiguous { key: String, count: usize },
    #[error("invalid resource pattern: {0}")]
    Pattern(#[from] glob::PatternError),
    #[error("failed to read resource '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A named file loaded from an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceFile {
    path: String,
    data: Vec<u8>,
}

impl ResourceFile {
    pub fn new(path: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self { path: path.into(), data: data.into() }
    }

    /// Archive-relative path with `/` separators.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// Where the bytes of a source came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
    ResourceFile(ResourceFile),
}

/// An immutable byte buffer together with its provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlSource {
    kind: SourceKind,
}

impl From<ResourceFile> for XmlSource {
    fn from(file: ResourceFile) -> Self {
        Self { kind: SourceKind::ResourceFile(file) }
    }
}

impl XmlSource {
    /// A source backed by an in-memory resource file.
    pub fn from_bytes(path: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        ResourceFile::new(path, data).into()
    }

    pub fn kind(&self) -> &SourceKind {
        &self.kind
    }

    pub fn name(&self) -> &str {
        match &self.kind {
            SourceKind::ResourceFile(file) => file.path(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        match &self.kind {
            SourceKind::ResourceFile(file) => file.data(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes().is_empty()
    }

    /// Looks up exactly one resource stored under `key`.
    pub fn lookup(archive: &dyn ResourceArchive, key: &str) -> Result<Self, SourceError> {
        let mut matches = archive.search_by_name(&Pattern::escape(key))?;
        match matches.len() {
            0 => Err(SourceError::NotFound(key.to_string())),
            1 => Ok(matches.remove(0).into()),
            count => Err(SourceError::Ambiguous { key: key.to_string(), count }),
        }
    }

    /// Resolves `xml/<name>.xml`.
    pub fn from_resource_name(archive: &dyn ResourceArchive, name: &str) -> Option<Self> {
        Self::lookup_logged(archive, &format!("xml/{name}.xml"))
    }

    /// Resolves `<path><name>.<suffix>`; `path` carries its own trailing separator.
    pub fn from_resource_name_full(
        archive: &dyn ResourceArchive,
        path: &str,
        name: &str,
        suffix: &str,
    ) -> Option<Self> {
        Self::lookup_logged(archive, &format!("{path}{name}.{suffix}"))
    }

    fn lookup_logged(archive: &dyn ResourceArchive, key: &str) -> Option<Self> {
        match Self::lookup(archive, key) {
            Ok(source) => {
                tracing::debug!(key, bytes = source.len(), "resolved resource");
                Some(source)
            }
            Err(error) => {
                tracing::warn!(key, %error, "resource lookup failed");
                None
            }
        }
    }
}

/// A searchable collection of resource files.
pub trait ResourceArchive {
    /// All files whose archive-relative path matches the glob `pattern`.
    fn search_by_name(&self, pattern: &str) -> Result<Vec<ResourceFile>, SourceError>;
}

fn match_options() -> MatchOptions {
    MatchOptions { require_literal_separator: true, ..MatchOptions::new() }
}

/// Resources below a directory on disk.
#[derive(Debug, Clone)]
pub struct DirectoryArchive {
    root: PathBuf,
}

impl DirectoryArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn relative_path(&self, path: &Path) -> String {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }
}

impl ResourceArchive for DirectoryArchive {
    fn search_by_name(&self, pattern: &str) -> Result<Vec<ResourceFile>, SourceError> {
        let root = Pattern::escape(&self.root.to_string_lossy());
        let full = format!("{}/{pattern}", root.trim_end_matches('/'));
        let mut files = Vec::new();
        for entry in glob::glob_with(&full, match_options())? {
            let path = entry.map_err(|err| SourceError::Io {
                path: err.path().to_path_buf(),
                source: err.into_error(),
            })?;
            if !path.is_file() {
                continue;
            }
            let data = std::fs::read(&path)
                .map_err(|source| SourceError::Io { path: path.clone(), source })?;
            files.push(ResourceFile::new(self.relative_path(&path), data));
        }
        tracing::trace!(pattern, matches = files.len(), "searched directory archive");
        Ok(files)
    }
}

/// Resources held in memory, keyed by archive-relative path.
#[derive(Debug, Clone, Default)]
pub struct MemoryArchive {
    files: BTreeMap<String, Vec<u8>>,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_file(mut self, path: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        self.insert(path, data);
        self
    }

    pub fn insert(&mut self, path: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.files.insert(path.into(), data.into());
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl ResourceArchive for MemoryArchive {
    fn search_by_name(&self, pattern: &str) -> Result<Vec<ResourceFile>, SourceError> {
        let pattern = Pattern::new(pattern)?;
        let options = match_options();
        Ok(self
            .files
            .iter()
            .filter(|(path, _)| pattern.matches_with(path, options))
            .map(|(path, data)| ResourceFile::new(path.clone(), data.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn archive() -> MemoryArchive {
        MemoryArchive::new()
            .with_file("xml/heros.xml", "<heros/>")
            .with_file("xml/breeds.xml", "<breeds/>")
            .with_file("rules/talents.xsl", "<xsl:stylesheet/>")
    }

    #[rstest]
    fn resource_name_uses_xml_folder() {
        let source = XmlSource::from_resource_name(&archive(), "heros").unwrap();
        assert_eq!(source.name(), "xml/heros.xml");
        assert_eq!(source.bytes(), b"<heros/>");
        assert!(matches!(source.kind(), SourceKind::ResourceFile(_)));
    }

    #[rstest]
    fn full_resource_name_joins_parts() {
        let source = XmlSource::from_resource_name_full(&archive(), "rules/", "talents", "xsl");
        assert_eq!(source.map(|s| s.len()), Some(17));
    }

    #[rstest]
    fn missing_resource_is_none() {
        assert!(XmlSource::from_resource_name(&archive(), "talents").is_none());
    }

    #[rstest]
    fn names_are_matched_literally() {
        let archive = archive().with_file("xml/h*.xml", "<x/>");
        let source = XmlSource::lookup(&archive, "xml/h*.xml").unwrap();
        assert_eq!(source.bytes(), b"<x/>");
    }

    #[rstest]
    fn glob_search_sees_all_matches() {
        let found = archive().search_by_name("xml/*.xml").unwrap();
        let paths: Vec<&str> = found.iter().map(ResourceFile::path).collect();
        assert_eq!(paths, ["xml/breeds.xml", "xml/heros.xml"]);
    }

    #[rstest]
    fn several_matches_are_ambiguous() {
        struct Twice;
        impl ResourceArchive for Twice {
            fn search_by_name(&self, pattern: &str) -> Result<Vec<ResourceFile>, SourceError> {
                Ok(vec![ResourceFile::new(pattern, "a"), ResourceFile::new(pattern, "b")])
            }
        }
        let err = XmlSource::lookup(&Twice, "xml/heros.xml").unwrap_err();
        assert!(matches!(err, SourceError::Ambiguous { count: 2, .. }));
        assert!(XmlSource::from_resource_name(&Twice, "heros").is_none());
    }
}
