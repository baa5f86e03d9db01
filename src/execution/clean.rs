//! Clean Mode
//!
//! Deletes the paths listed under the workflow's `clean:` key instead of
//! running anything.

use std::env;
use std::fs;
use std::io;
use std::path::{Component, Path};

use log::{debug, info, warn};

/// Outcome of a clean pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanReport {
    /// Paths that were (or in a dry run, would be) deleted
    pub removed: Vec<String>,
    /// Listed paths that did not exist
    pub absent: Vec<String>,
    /// Listed paths refused because they contain `..` or point at the
    /// working directory, one of its ancestors or the filesystem root
    pub refused: Vec<String>,
}

/// True for paths that may reach outside the listed location: anything with
/// a `..` component, the working directory, its ancestors and the root.
fn is_protected(path: &Path) -> bool {
    if path.components().any(|c| c == Component::ParentDir) {
        return true;
    }
    if path
        .components()
        .all(|c| matches!(c, Component::CurDir | Component::RootDir | Component::Prefix(_)))
    {
        return true;
    }

    match (fs::canonicalize(path), env::current_dir().and_then(fs::canonicalize)) {
        (Ok(target), Ok(cwd)) => cwd.starts_with(target),
        _ => false,
    }
}

/// Removes every listed path. Directories are removed recursively.
///
/// With `dry_run` nothing is deleted; the report lists what would be.
pub fn clean(paths: &[String], dry_run: bool) -> io::Result<CleanReport> {
    let mut report = CleanReport::default();

    for entry in paths {
        let path = Path::new(entry);

        if entry.trim().is_empty() || is_protected(path) {
            warn!("Refusing to clean '{}'", entry);
            report.refused.push(entry.clone());
            continue;
        }

        let meta = match fs::symlink_metadata(path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Nothing to clean at {}", entry);
                report.absent.push(entry.clone());
                continue;
            }
            Err(e) => return Err(e),
        };

        if dry_run {
            info!("Would remove {}", entry);
        } else {
            if meta.is_dir() {
                fs::remove_dir_all(path)?;
            } else {
                fs::remove_file(path)?;
            }
            info!("Removed {}", entry);
        }
        report.removed.push(entry.clone());
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn s(path: &Path) -> String {
        path.to_str().unwrap().to_string()
    }

    #[test]
    fn test_clean_files_and_directories() {
        let temp_dir = tempdir().unwrap();
        let dir = temp_dir.path().join("trimmed");
        let file = temp_dir.path().join("summary.tsv");
        fs::create_dir_all(dir.join("nested")).unwrap();
        fs::write(dir.join("nested/s1.bam"), "").unwrap();
        fs::write(&file, "").unwrap();
        let missing = temp_dir.path().join("missing");

        let report = clean(&[s(&dir), s(&file), s(&missing)], false).unwrap();
        assert_eq!(report.removed, vec![s(&dir), s(&file)]);
        assert_eq!(report.absent, vec![s(&missing)]);
        assert!(!dir.exists());
        assert!(!file.exists());
    }

    #[test]
    fn test_clean_dry_run_keeps_files() {
        let temp_dir = tempdir().unwrap();
        let file = temp_dir.path().join("keep.txt");
        fs::write(&file, "").unwrap();

        let report = clean(&[s(&file)], true).unwrap();
        assert_eq!(report.removed.len(), 1);
        assert!(file.exists());
    }

    #[test]
    fn test_clean_refuses_working_directory_and_root() {
        let cwd = env::current_dir().unwrap();
        let entries: Vec<String> = [".", "/", "", "..", "data/..", "./..", "a/../../b"]
            .iter()
            .map(|e| e.to_string())
            .chain([s(&cwd), s(cwd.parent().unwrap_or(&cwd))])
            .collect();

        let report = clean(&entries, true).unwrap();
        assert_eq!(report.refused, entries);
        assert!(report.removed.is_empty());
    }
}
