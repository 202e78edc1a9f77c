//! Copy of the launching source tree into the experiment directory.

use std::path::{Path, PathBuf};

use glob::Pattern;
use walkdir::{DirEntry, WalkDir};

use crate::checkpoint::expand_home;
use crate::error::{ConfigError, EpochalError};

pub const DEFAULT_INCLUDE: [&str; 3] = ["*.rs", "*.toml", "*.sh"];

/// Copies files whose names match the include globs, keeping relative paths.
#[derive(Debug, Clone)]
pub struct SourceBackup {
    source_dir: PathBuf,
    dest_dir: PathBuf,
    include: Vec<Pattern>,
}

impl SourceBackup {
    pub fn new(source_dir: &str, dest_dir: impl Into<PathBuf>, include: &[&str]) -> Result<Self, ConfigError> {
        let source_dir = expand_home(source_dir);
        let source_dir = source_dir
            .canonicalize()
            .ok()
            .filter(|dir| dir.is_dir())
            .ok_or_else(|| ConfigError::InvalidValue {
                key: "backup.source_dir".into(),
                reason: format!("source dir {} does not exist", source_dir.display()),
            })?;
        let include = include
            .iter()
            .map(|p| {
                Pattern::new(p).map_err(|e| ConfigError::InvalidPattern {
                    pattern: p.to_string(),
                    message: e.to_string(),
                })
            })
            .collect::<Result<_, _>>()?;
        Ok(Self {
            source_dir,
            dest_dir: dest_dir.into(),
            include,
        })
    }

    pub fn dest_dir(&self) -> &Path {
        &self.dest_dir
    }

    /// Skips hidden directories, `target/`, and the destination itself.
    ///
    /// `dest` must be canonical; walked paths are, since the source dir is.
    fn descend(entry: &DirEntry, dest: &Path) -> bool {
        if entry.depth() == 0 {
            return true;
        }
        if entry.path() == dest {
            return false;
        }
        let name = entry.file_name().to_string_lossy();
        !(entry.file_type().is_dir() && (name.starts_with('.') || name == "target"))
    }

    /// Copy matching files; returns how many were copied.
    pub fn run(&self) -> Result<usize, EpochalError> {
        std::fs::create_dir_all(&self.dest_dir)?;
        let dest = self.dest_dir.canonicalize()?;
        let mut copied = 0;
        let walker = WalkDir::new(&self.source_dir)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| Self::descend(e, &dest));
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping unreadable entry during backup");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if !self.include.iter().any(|p| p.matches(&name)) {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&self.source_dir) else {
                continue;
            };
            let target = dest.join(relative);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &target)?;
            copied += 1;
        }
        tracing::info!(
            source = %self.source_dir.display(),
            dest = %self.dest_dir.display(),
            files = copied,
            "Backed up source code"
        );
        Ok(copied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, "x").unwrap();
    }

    #[test]
    fn test_backup_copies_matching_files() {
        let src = TempDir::new().unwrap();
        touch(&src.path().join("main.rs"));
        touch(&src.path().join("nested/lib.rs"));
        touch(&src.path().join("Cargo.toml"));
        touch(&src.path().join("notes.txt"));
        touch(&src.path().join(".git/config.toml"));
        touch(&src.path().join("target/debug/build.rs"));

        let dest = TempDir::new().unwrap();
        let backup = SourceBackup::new(
            &src.path().display().to_string(),
            dest.path().join("code"),
            &DEFAULT_INCLUDE,
        )
        .unwrap();
        assert_eq!(backup.run().unwrap(), 3);
        assert!(dest.path().join("code/nested/lib.rs").exists());
        assert!(!dest.path().join("code/notes.txt").exists());
        assert!(!dest.path().join("code/.git").exists());
    }

    #[test]
    fn test_dest_inside_source_is_skipped() {
        let src = TempDir::new().unwrap();
        touch(&src.path().join("a.rs"));
        let backup = SourceBackup::new(
            &src.path().display().to_string(),
            src.path().join("runs/exp/code"),
            &["*.rs"],
        )
        .unwrap();
        assert_eq!(backup.run().unwrap(), 1);
        // second run must not pick up its own previous output
        assert_eq!(backup.run().unwrap(), 1);
    }

    #[test]
    fn test_dest_given_by_another_spelling_is_skipped() {
        let src = TempDir::new().unwrap();
        touch(&src.path().join("a.rs"));
        std::fs::create_dir_all(src.path().join("runs")).unwrap();
        let backup = SourceBackup::new(
            &src.path().join(".").display().to_string(),
            src.path().join("runs/../runs/exp/code"),
            &["*.rs"],
        )
        .unwrap();
        assert_eq!(backup.run().unwrap(), 1);
        assert_eq!(backup.run().unwrap(), 1);
        assert!(!src.path().join("runs/exp/code/runs").exists());
    }

    #[test]
    fn test_missing_source() {
        assert!(SourceBackup::new("/nonexistent/src", "/tmp/x", &["*.rs"]).is_err());
    }
}
