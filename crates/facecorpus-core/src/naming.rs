//! Timestamp-derived file names for archived manifests and saved faces.

use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};

/// Lexicographic order matches chronological order.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S%.6f";

pub fn timestamp_stem(at: DateTime<Local>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// A path `dir/<now>.<ext>` that does not exist yet.
///
/// Two calls inside the same microsecond get `-1`, `-2`, ... suffixes.
pub fn unique_timestamped_path(dir: &Path, ext: &str) -> PathBuf {
    let stem = timestamp_stem(Local::now());
    let mut candidate = dir.join(format!("{stem}.{ext}"));
    let mut n = 1u32;
    while candidate.exists() {
        candidate = dir.join(format!("{stem}-{n}.{ext}"));
        n += 1;
    }
    candidate
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_stem_format() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(timestamp_stem(at), "2024-03-09_07-05-01.000000");
    }

    #[test]
    fn test_stems_sort_chronologically() {
        let a = Local.with_ymd_and_hms(2024, 3, 9, 23, 59, 59).unwrap();
        let b = Local.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap();
        assert!(timestamp_stem(a) < timestamp_stem(b));
    }

    #[test]
    fn test_unique_paths_never_collide() {
        let tmp = tempfile::tempdir().unwrap();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..20 {
            let path = unique_timestamped_path(tmp.path(), "txt");
            std::fs::write(&path, "").unwrap();
            assert!(seen.insert(path));
        }
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 20);
    }
}
