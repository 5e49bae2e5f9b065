// ============================================================
// Layer 2 — GenerateListUseCase
// ============================================================
// Writes the train list for a directory of identity folders.
// The output file is appended to, never truncated, so several
// roots can be collected into one list by running it repeatedly.

use std::path::PathBuf;

use anyhow::Result;

use crate::data::list_generator::generate_all;

pub struct GenerateListUseCase {
    root:     PathBuf,
    manifest: PathBuf,
}

impl GenerateListUseCase {
    pub fn new(root: impl Into<PathBuf>, manifest: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), manifest: manifest.into() }
    }

    /// Returns `(identities, images)` written.
    pub fn execute(&self) -> Result<(usize, usize)> {
        tracing::info!(
            "Listing identity folders under '{}' into '{}'",
            self.root.display(),
            self.manifest.display()
        );
        let (identities, images) = generate_all(&self.root, &self.manifest)?;
        tracing::info!("{} identities, {} images", identities, images);
        Ok((identities, images))
    }
}
