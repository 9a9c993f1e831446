//! Per-run export directory with overwrite avoidance

use crate::Result;
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};

/// `<root>/<YYYY-MM-DD>/<vm>`, suffixed with `-HHmmss` (and `-N` if that
/// is taken too) when an earlier run already used the directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportDestination {
    path: PathBuf,
    disambiguated: bool,
}

impl ExportDestination {
    pub fn resolve(root: &Path, vm: &str, now: DateTime<Local>) -> Self {
        let day_dir = root.join(now.format("%Y-%m-%d").to_string());
        let primary = day_dir.join(vm);
        if !primary.exists() {
            return Self { path: primary, disambiguated: false };
        }

        let stamped = format!("{}-{}", vm, now.format("%H%M%S"));
        let mut candidate = day_dir.join(&stamped);
        let mut n = 2u32;
        while candidate.exists() {
            candidate = day_dir.join(format!("{}-{}", stamped, n));
            n += 1;
        }

        tracing::info!(
            vm,
            existing = %primary.display(),
            chosen = %candidate.display(),
            "Export directory already exists, using suffixed path"
        );
        Self { path: candidate, disambiguated: true }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True when the primary path was taken
    pub fn is_disambiguated(&self) -> bool {
        self.disambiguated
    }

    pub fn create(&self) -> Result<()> {
        std::fs::create_dir_all(&self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 10, 19, h, m, s).unwrap()
    }

    #[test]
    fn test_primary_path_layout() {
        let temp = TempDir::new().unwrap();
        let dest = ExportDestination::resolve(temp.path(), "AD01", at(2, 30, 0));

        assert_eq!(dest.path(), temp.path().join("2026-10-19").join("AD01"));
        assert!(!dest.is_disambiguated());
        assert!(!dest.path().exists());
    }

    #[test]
    fn test_collision_gets_time_suffix() {
        let temp = TempDir::new().unwrap();
        let first = ExportDestination::resolve(temp.path(), "AD01", at(2, 30, 0));
        first.create().unwrap();

        let second = ExportDestination::resolve(temp.path(), "AD01", at(14, 5, 9));

        assert_ne!(second.path(), first.path());
        assert!(!second.path().exists());
        assert!(second.is_disambiguated());
        assert_eq!(second.path(), temp.path().join("2026-10-19").join("AD01-140509"));
    }

    #[test]
    fn test_same_second_collision_gets_counter() {
        let temp = TempDir::new().unwrap();
        let now = at(9, 0, 0);
        for _ in 0..3 {
            ExportDestination::resolve(temp.path(), "AD02", now).create().unwrap();
        }

        let next = ExportDestination::resolve(temp.path(), "AD02", now);

        assert_eq!(next.path(), temp.path().join("2026-10-19").join("AD02-090000-3"));
        assert!(!next.path().exists());
    }

    #[test]
    fn test_other_day_does_not_collide() {
        let temp = TempDir::new().unwrap();
        ExportDestination::resolve(temp.path(), "AD01", at(1, 0, 0)).create().unwrap();

        let tomorrow = Local.with_ymd_and_hms(2026, 10, 20, 1, 0, 0).unwrap();
        let dest = ExportDestination::resolve(temp.path(), "AD01", tomorrow);

        assert!(!dest.is_disambiguated());
    }
}
