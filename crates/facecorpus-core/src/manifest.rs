//! Manifest files: one resource reference per line.
//!
//! Three line shapes are understood:
//! - tagged: a JSON record `{"v":1,"url":"..."}`, accepted anywhere;
//! - prefixed: legacy candidate lines such as `Image URL: https://...`;
//! - plain: a bare reference.
//!
//! Lines that do not yield an absolute http(s) or file reference are dropped
//! without comment.

use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

/// Current tagged-line version.
pub const MANIFEST_VERSION: u32 = 1;

const ACCEPTED_SCHEMES: [&str; 3] = ["http", "https", "file"];

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("cannot enumerate {}: {source}", path.display())]
    Enumerate {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot read manifest {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot write manifest {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// How untagged lines of a manifest are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect<'a> {
    /// Only lines starting with the prefix count; the prefix is stripped.
    Prefixed(&'a str),
    Plain,
}

/// Line format used when writing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManifestFormat {
    #[default]
    Tagged,
    /// Bare references, readable by older tooling.
    Plain,
}

#[derive(Serialize, Deserialize)]
struct TaggedLine {
    v: u32,
    url: String,
}

/// Parse a reference string. Only absolute http, https and file URLs pass.
///
/// The string must be exactly the reference: `Url::parse` would silently
/// trim surrounding spaces and strip embedded tabs and line breaks.
pub fn parse_reference(s: &str) -> Option<Url> {
    if s.is_empty() || s != s.trim() || s.contains(|c: char| c.is_ascii_control()) {
        return None;
    }
    let url = Url::parse(s).ok()?;
    ACCEPTED_SCHEMES
        .contains(&url.scheme())
        .then_some(url)
}

/// Interpret a single manifest line.
pub fn parse_line(line: &str, dialect: Dialect<'_>) -> Option<Url> {
    if line.starts_with('{') {
        let tagged: TaggedLine = serde_json::from_str(line).ok()?;
        if tagged.v != MANIFEST_VERSION {
            return None;
        }
        return parse_reference(&tagged.url);
    }

    match dialect {
        Dialect::Prefixed(prefix) => parse_reference(line.strip_prefix(prefix)?),
        Dialect::Plain => parse_reference(line),
    }
}

/// Render one reference in the given format (no trailing newline).
pub fn render_line(url: &Url, format: ManifestFormat) -> String {
    match format {
        ManifestFormat::Plain => url.as_str().to_string(),
        ManifestFormat::Tagged => {
            let line = TaggedLine {
                v: MANIFEST_VERSION,
                url: url.as_str().to_string(),
            };
            // A struct of a u32 and a String always serializes.
            serde_json::to_string(&line).unwrap_or_default()
        }
    }
}

/// Any of `\n`, `\r\n` or a bare `\r` ends a line.
pub fn parse_manifest(content: &str, dialect: Dialect<'_>) -> Vec<Url> {
    content
        .split(['\n', '\r'])
        .filter_map(|line| parse_line(line, dialect))
        .collect()
}

pub fn read_manifest(path: &Path, dialect: Dialect<'_>) -> Result<Vec<Url>, ManifestError> {
    let content = std::fs::read_to_string(path).map_err(|source| ManifestError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(parse_manifest(&content, dialect))
}

/// Non-hidden regular files directly inside `dir`, sorted by file name.
pub fn list_files(dir: &Path) -> Result<Vec<PathBuf>, ManifestError> {
    let enumerate = |source| ManifestError::Enumerate {
        path: dir.to_path_buf(),
        source,
    };

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(enumerate)? {
        let entry = entry.map_err(enumerate)?;
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        if entry.file_type().map_err(enumerate)?.is_dir() {
            continue;
        }
        files.push(entry.path());
    }
    files.sort();
    Ok(files)
}

/// References gathered from every manifest in a directory.
#[derive(Debug, Default)]
pub struct DirManifests {
    pub references: Vec<Url>,
    /// Files that could not be read; their contents are missing from `references`.
    pub unreadable: Vec<ManifestError>,
}

/// Read every manifest file directly under `dir`.
///
/// Failing to enumerate `dir` is an error; an unreadable file is recorded
/// and skipped.
pub fn read_manifest_dir(dir: &Path, dialect: Dialect<'_>) -> Result<DirManifests, ManifestError> {
    let mut out = DirManifests::default();
    for file in list_files(dir)? {
        match read_manifest(&file, dialect) {
            Ok(refs) => out.references.extend(refs),
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable manifest");
                out.unreadable.push(e);
            }
        }
    }
    tracing::debug!(
        dir = %dir.display(),
        references = out.references.len(),
        skipped = out.unreadable.len(),
        "read manifest directory"
    );
    Ok(out)
}

/// Replace the manifest at `path` with `refs`.
pub fn write_manifest(
    path: &Path,
    refs: &[Url],
    format: ManifestFormat,
) -> Result<(), ManifestError> {
    let body = refs
        .iter()
        .map(|url| render_line(url, format))
        .collect::<Vec<_>>()
        .join("\n");

    let _ = std::fs::remove_file(path);
    std::fs::write(path, body).map_err(|source| ManifestError::Write {
        path: path.to_path_buf(),
        source,
    })
}
