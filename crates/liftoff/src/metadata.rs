//! Application metadata naming the workload to deploy by default.
//!
//! A manifest is a plain text file of `Key: Value` headers. A line starting
//! with a single space continues the previous value, and the main section
//! ends at the first blank line. Attribute names compare case-insensitively.

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::BOOTSTRAP_TARGET;

/// Attribute naming the application a manifest belongs to.
pub const MAIN_CLASS_ATTRIBUTE: &str = "Main-Class";
/// Attribute naming the workload deployed when none is given on the command
/// line.
pub const MAIN_WORKLOAD_ATTRIBUTE: &str = "Main-Workload";
/// Attribute naming the factory prefix applied to unqualified workload names.
pub const DEFAULT_FACTORY_ATTRIBUTE: &str = "Default-Workload-Factory";
/// Environment variable pointing at an explicit manifest file.
pub const MANIFEST_ENV_VAR: &str = "LIFTOFF_MANIFEST";

/// Main-section attributes of one manifest.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Attributes {
    entries: Vec<(String, String)>,
}

impl Attributes {
    /// Value of `name`, compared case-insensitively.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Whether no attribute is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn insert(&mut self, name: String, value: String) {
        match self
            .entries
            .iter_mut()
            .find(|(key, _)| key.eq_ignore_ascii_case(&name))
        {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }
}

impl<K, V> FromIterator<(K, V)> for Attributes
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut attributes = Self::default();
        for (key, value) in iter {
            attributes.insert(key.into(), value.into());
        }
        attributes
    }
}

/// Errors raised while reading manifests.
#[derive(Debug, Error)]
pub enum MetadataError {
    /// A manifest exists but could not be read.
    #[error("failed to read manifest {}: {source}", .path.display())]
    Read {
        /// Manifest that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// A manifest line could not be parsed.
    #[error("malformed manifest {} at line {line}: {reason}", .path.display())]
    Malformed {
        /// Manifest that failed.
        path: PathBuf,
        /// One-based line number.
        line: usize,
        /// What is wrong with the line.
        reason: &'static str,
    },
}

/// Supplies the metadata of the launching application.
pub trait MetadataSource: Send + Sync {
    /// Attributes of the manifest belonging to `application`, or empty
    /// attributes when no manifest matches.
    fn attributes(&self, application: &str) -> Result<Attributes, MetadataError>;
}

/// Fixed metadata, used when embedding the launcher or in tests.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StaticMetadata {
    attributes: Attributes,
}

impl StaticMetadata {
    /// Serves `attributes` for every application.
    #[must_use]
    pub const fn new(attributes: Attributes) -> Self {
        Self { attributes }
    }
}

impl MetadataSource for StaticMetadata {
    fn attributes(&self, _application: &str) -> Result<Attributes, MetadataError> {
        Ok(self.attributes.clone())
    }
}

/// Manifest files on disk, searched in order.
///
/// The first file whose `Main-Class` names the application wins. Missing
/// files are skipped; unreadable or malformed ones are errors.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ManifestFile {
    candidates: Vec<PathBuf>,
}

impl ManifestFile {
    /// Searches exactly `candidates`, in order.
    #[must_use]
    pub const fn new(candidates: Vec<PathBuf>) -> Self {
        Self { candidates }
    }

    /// Candidates for `application`: the file named by
    /// [`MANIFEST_ENV_VAR`], then `<application>.manifest` beside the running
    /// executable.
    #[must_use]
    pub fn discover(application: &str) -> Self {
        let mut candidates = Vec::new();
        if let Some(path) = env::var_os(MANIFEST_ENV_VAR) {
            candidates.push(PathBuf::from(path));
        }
        if let Some(directory) = env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
        {
            candidates.push(directory.join(format!("{application}.manifest")));
        }
        Self { candidates }
    }
}

impl MetadataSource for ManifestFile {
    fn attributes(&self, application: &str) -> Result<Attributes, MetadataError> {
        for path in &self.candidates {
            let text = match fs::read_to_string(path) {
                Ok(text) => text,
                Err(source) if source.kind() == io::ErrorKind::NotFound => {
                    debug!(
                        target: BOOTSTRAP_TARGET,
                        path = %path.display(),
                        "manifest not found"
                    );
                    continue;
                }
                Err(source) => {
                    return Err(MetadataError::Read {
                        path: path.clone(),
                        source,
                    });
                }
            };
            let attributes = parse(&text).map_err(|(line, reason)| MetadataError::Malformed {
                path: path.clone(),
                line,
                reason,
            })?;
            if attributes.get(MAIN_CLASS_ATTRIBUTE) == Some(application) {
                return Ok(attributes);
            }
        }
        Ok(Attributes::default())
    }
}

fn parse(text: &str) -> Result<Attributes, (usize, &'static str)> {
    let mut entries: Vec<(String, String)> = Vec::new();
    for (index, raw) in text.lines().enumerate() {
        let line = raw.strip_suffix('\r').unwrap_or(raw);
        if line.is_empty() {
            break;
        }
        if let Some(continued) = line.strip_prefix(' ') {
            let Some((_, value)) = entries.last_mut() else {
                return Err((index + 1, "continuation line before any header"));
            };
            value.push_str(continued);
            continue;
        }
        let Some((name, value)) = line.split_once(':') else {
            return Err((index + 1, "header is missing ':'"));
        };
        if name.is_empty() {
            return Err((index + 1, "header has an empty name"));
        }
        entries.push((name.to_owned(), value.strip_prefix(' ').unwrap_or(value).to_owned()));
    }
    Ok(entries.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use rstest::rstest;
    use tempfile::NamedTempFile;

    use super::*;

    fn manifest(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("create manifest");
        file.write_all(contents.as_bytes()).expect("write manifest");
        file
    }

    #[test]
    fn parses_headers_and_continuations() {
        let attributes = parse(
            "Main-Class: demo\r\nMain-Workload: long-\n name\n\nMain-Workload: ignored\n",
        )
        .expect("manifest should parse");

        assert_eq!(attributes.get("main-workload"), Some("long-name"));
        assert_eq!(attributes.get(MAIN_CLASS_ATTRIBUTE), Some("demo"));
    }

    #[rstest]
    #[case(" orphan\n", 1)]
    #[case("Main-Class: demo\nno separator\n", 2)]
    #[case(": value\n", 1)]
    fn rejects_malformed_lines(#[case] text: &str, #[case] line: usize) {
        let (at, _) = parse(text).expect_err("manifest should be rejected");
        assert_eq!(at, line);
    }

    #[test]
    fn picks_the_manifest_of_the_named_application() {
        let other = manifest("Main-Class: other\nMain-Workload: wrong\n");
        let ours = manifest("Main-Class: demo\nMain-Workload: echo\n");
        let source = ManifestFile::new(vec![
            PathBuf::from("/nonexistent/demo.manifest"),
            other.path().to_path_buf(),
            ours.path().to_path_buf(),
        ]);

        let attributes = source.attributes("demo").expect("manifests should load");

        assert_eq!(attributes.get(MAIN_WORKLOAD_ATTRIBUTE), Some("echo"));
    }

    #[test]
    fn no_matching_manifest_yields_empty_attributes() {
        let other = manifest("Main-Class: other\n");
        let source = ManifestFile::new(vec![other.path().to_path_buf()]);

        let attributes = source.attributes("demo").expect("manifests should load");

        assert!(attributes.is_empty());
    }

    #[test]
    fn malformed_manifests_are_errors() {
        let broken = manifest("garbage\n");
        let source = ManifestFile::new(vec![broken.path().to_path_buf()]);

        let error = source.attributes("demo").expect_err("manifest should be rejected");

        assert!(matches!(error, MetadataError::Malformed { line: 1, .. }));
    }
}
