// ============================================================
// Layer 4 — Train List Generator
// ============================================================
// Turns a directory tree of aligned faces
//
//   root/
//     0000045/  001.jpg 002.jpg ...
//     0000099/  001.jpg ...
//
// into a flat manifest, one `<absolute path> <label>` line per
// image. Identity folders are labelled 0, 1, 2, ... in sorted
// name order so reruns over the same tree produce the same file.
//
// The manifest is opened in append mode once per identity
// folder; running over several roots into one file keeps
// growing it. Files ending in `.list` are skipped so a manifest
// written inside the tree is never listed as an image.

use anyhow::{Context, Result};
use std::{
    fs::{self, OpenOptions},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use crate::domain::manifest::ManifestEntry;

pub const LIST_EXTENSION: &str = "list";

/// Sorted entries of a directory.
fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir)
        .with_context(|| format!("Cannot read directory '{}'", dir.display()))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()
        .with_context(|| format!("Cannot list directory '{}'", dir.display()))?;
    entries.sort();
    Ok(entries)
}

fn is_list_file(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(LIST_EXTENSION)
}

/// Append one line per image in `dir` to `manifest`, all with `label`.
/// Returns the number of lines written.
pub fn generate(dir: &Path, label: usize, manifest: &Path) -> Result<usize> {
    tracing::info!("start dealing dir: {}", dir.display());

    let dir = fs::canonicalize(dir)
        .with_context(|| format!("Identity directory '{}' does not exist", dir.display()))?;

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(manifest)
        .with_context(|| format!("Cannot open manifest '{}'", manifest.display()))?;
    let mut writer = BufWriter::new(file);

    let mut written = 0;
    for path in sorted_entries(&dir)? {
        if !path.is_file() || is_list_file(&path) {
            continue;
        }
        let entry = ManifestEntry::new(path, label);
        writeln!(writer, "{}", entry.to_line())?;
        tracing::debug!("name = {}", entry);
        written += 1;
    }
    writer.flush()?;

    tracing::info!("dealing over! {} images labelled {:06}", written, label);
    Ok(written)
}

/// Run [`generate`] for every identity folder under `root`, labelling
/// them by their 0-based position. Returns `(identities, images)`.
pub fn generate_all(root: &Path, manifest: &Path) -> Result<(usize, usize)> {
    let mut label = 0;
    let mut images = 0;
    for path in sorted_entries(root)? {
        if !path.is_dir() {
            tracing::warn!("Skipping non-directory entry '{}'", path.display());
            continue;
        }
        images += generate(&path, label, manifest)?;
        label += 1;
    }
    Ok((label, images))
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    fn read_entries(manifest: &Path) -> Vec<ManifestEntry> {
        fs::read_to_string(manifest)
            .unwrap()
            .lines()
            .map(|l| ManifestEntry::parse_line(l).unwrap())
            .collect()
    }

    #[test]
    fn test_one_line_per_image_with_padded_label() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("faces/id_a");
        touch(&dir.join("1.jpg"));
        touch(&dir.join("2.jpg"));
        touch(&dir.join("train.list"));
        let manifest = tmp.path().join("train.list");

        let written = generate(&dir, 7, &manifest).unwrap();

        assert_eq!(written, 2);
        let text = fs::read_to_string(&manifest).unwrap();
        for line in text.lines() {
            assert!(line.ends_with(" 000007"), "{line}");
            assert!(Path::new(line.rsplit_once(' ').unwrap().0).is_absolute());
        }
    }

    #[test]
    fn test_calls_accumulate_in_one_file() {
        let tmp = TempDir::new().unwrap();
        let manifest = tmp.path().join("out.list");
        for (i, id) in ["a", "b"].iter().enumerate() {
            let dir = tmp.path().join(id);
            touch(&dir.join("x.png"));
            generate(&dir, i, &manifest).unwrap();
        }
        let labels: Vec<usize> = read_entries(&manifest).iter().map(|e| e.label).collect();
        assert_eq!(labels, vec![0, 1]);
    }

    #[test]
    fn test_generate_all_labels_identities_in_sorted_order() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("root");
        for id in ["zeta", "alpha", "mid"] {
            for img in ["1.jpg", "2.jpg", "3.jpg"] {
                touch(&root.join(id).join(img));
            }
        }
        touch(&root.join("README.txt"));
        let manifest = tmp.path().join("train.list");

        let (identities, images) = generate_all(&root, &manifest).unwrap();

        assert_eq!((identities, images), (3, 9));
        let entries = read_entries(&manifest);
        let alpha = entries.iter().find(|e| e.path.ends_with("alpha/1.jpg")).unwrap();
        let zeta = entries.iter().find(|e| e.path.ends_with("zeta/3.jpg")).unwrap();
        assert_eq!(alpha.label, 0);
        assert_eq!(zeta.label, 2);
    }

    #[test]
    fn test_missing_directory_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let result = generate(&tmp.path().join("nope"), 0, &tmp.path().join("m.list"));
        assert!(result.is_err());
    }
}
