// ============================================================
// Layer 3 — Manifest Entry
// ============================================================
// A train list is a plain text file with one image per line:
//
//   /data/webface/0000045/001.jpg 000000
//   /data/webface/0000045/002.jpg 000000
//   /data/webface/0000099/001.jpg 000001
//
// The label is the 0-based index of the identity folder the
// image came from, zero-padded to six digits. Paths may contain
// spaces, so the label is always the LAST whitespace token.

use std::fmt;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};

/// Width of the zero-padded label field.
pub const LABEL_WIDTH: usize = 6;

/// One line of a train list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub path:  PathBuf,
    pub label: usize,
}

impl ManifestEntry {
    pub fn new(path: impl Into<PathBuf>, label: usize) -> Self {
        Self { path: path.into(), label }
    }

    /// Render the entry without a trailing newline.
    pub fn to_line(&self) -> String {
        format!("{} {:0width$}", self.path.display(), self.label, width = LABEL_WIDTH)
    }

    /// Parse one manifest line. Blank lines are rejected; callers
    /// that tolerate them should filter first.
    pub fn parse_line(line: &str) -> Result<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        let Some((path, label)) = line.trim_end().rsplit_once(char::is_whitespace) else {
            bail!("manifest line has no label field: {line:?}");
        };
        let path = path.trim_end();
        if path.is_empty() {
            bail!("manifest line has an empty path: {line:?}");
        }
        let label = label
            .parse::<usize>()
            .with_context(|| format!("invalid label {label:?} in manifest line {line:?}"))?;
        Ok(Self::new(path, label))
    }
}

impl fmt::Display for ManifestEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_line())
    }
}
