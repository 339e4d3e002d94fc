//! On-disk directory layout for the corpus root and each person.

use std::path::{Path, PathBuf};

// --- Shared pools (not per-person) ---
pub const VERIFICATION_POOL_DIR: &str = "Verification Photos";
pub const TRAINING_SET_DIR: &str = "Training Set";
pub const TEST_SET_DIR: &str = "Test Set";

/// Root entries that are never persons.
pub const RESERVED_DIRS: [&str; 3] = [VERIFICATION_POOL_DIR, TRAINING_SET_DIR, TEST_SET_DIR];

// --- Per-person labels ---
pub const CANDIDATES_DIR: &str = "FaceCandidateFiles";
pub const PENDING_REVIEW_DIR: &str = "PendingReview";
pub const ASSIGNMENTS_DIR: &str = "FaceCandidateAssignments";
pub const ARCHIVE_DIR: &str = "Archive";
pub const TRAINING_FACES_DIR: &str = "TrainingFaces";
pub const TEST_FACES_DIR: &str = "TestFaces";

// --- Manifest file stems ---
pub const ORPHAN_MANIFEST: &str = "orphanPhotos.txt";
pub const TRAINING_MANIFEST: &str = "trainingPhotos.txt";
pub const VERIFICATION_MANIFEST: &str = "verificationPhotos.txt";

/// Prefix carried by lines in freshly-found candidate manifests.
pub const CANDIDATE_LINE_PREFIX: &str = "Image URL: ";

/// Paths of the corpus root and its shared pools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn verification_pool(&self) -> PathBuf {
        self.root.join(VERIFICATION_POOL_DIR)
    }

    pub fn training_set(&self) -> PathBuf {
        self.root.join(TRAINING_SET_DIR)
    }

    pub fn test_set(&self) -> PathBuf {
        self.root.join(TEST_SET_DIR)
    }

    /// Create the root and the three shared pools when missing.
    pub fn ensure_shared(&self) -> std::io::Result<()> {
        for dir in [
            self.root.clone(),
            self.verification_pool(),
            self.training_set(),
            self.test_set(),
        ] {
            if !dir.is_dir() {
                std::fs::create_dir_all(&dir)?;
                tracing::debug!(path = %dir.display(), "created shared directory");
            }
        }
        Ok(())
    }

    /// Resolve the directory set for `name` (no filesystem access).
    pub fn person_dirs(&self, name: &str) -> PersonDirs {
        PersonDirs::resolve(self.root.join(name))
    }

    /// True when `name` collides with one of the shared pools.
    pub fn is_reserved(name: &str) -> bool {
        RESERVED_DIRS.contains(&name)
    }
}

/// The seven locations that make up one person's tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonDirs {
    pub root: PathBuf,
    pub candidates: PathBuf,
    pub pending_review: PathBuf,
    pub assignments: PathBuf,
    pub archive: PathBuf,
    pub training_faces: PathBuf,
    pub test_faces: PathBuf,
}

impl PersonDirs {
    fn resolve(root: PathBuf) -> Self {
        let candidates = root.join(CANDIDATES_DIR);
        Self {
            pending_review: candidates.join(PENDING_REVIEW_DIR),
            assignments: candidates.join(ASSIGNMENTS_DIR),
            archive: candidates.join(ARCHIVE_DIR),
            training_faces: root.join(TRAINING_FACES_DIR),
            test_faces: root.join(TEST_FACES_DIR),
            candidates,
            root,
        }
    }

    /// Person name, taken from the root directory's last component.
    pub fn name(&self) -> String {
        self.root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// All seven locations, parents before children.
    pub fn all(&self) -> [&Path; 7] {
        [
            self.root.as_path(),
            self.training_faces.as_path(),
            self.test_faces.as_path(),
            self.candidates.as_path(),
            self.pending_review.as_path(),
            self.archive.as_path(),
            self.assignments.as_path(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_person_dirs_nesting() {
        let layout = StorageLayout::new("/data");
        let dirs = layout.person_dirs("Ada");
        assert_eq!(dirs.root, PathBuf::from("/data/Ada"));
        assert_eq!(dirs.candidates, PathBuf::from("/data/Ada/FaceCandidateFiles"));
        assert_eq!(
            dirs.pending_review,
            PathBuf::from("/data/Ada/FaceCandidateFiles/PendingReview")
        );
        assert_eq!(
            dirs.assignments,
            PathBuf::from("/data/Ada/FaceCandidateFiles/FaceCandidateAssignments")
        );
        assert_eq!(dirs.archive, PathBuf::from("/data/Ada/FaceCandidateFiles/Archive"));
        assert_eq!(dirs.training_faces, PathBuf::from("/data/Ada/TrainingFaces"));
        assert_eq!(dirs.test_faces, PathBuf::from("/data/Ada/TestFaces"));
        assert_eq!(dirs.name(), "Ada");
    }

    #[test]
    fn test_all_lists_parents_first() {
        let dirs = StorageLayout::new("/data").person_dirs("Ada");
        let all = dirs.all();
        for (i, path) in all.iter().enumerate() {
            if let Some(parent) = path.parent() {
                if let Some(j) = all.iter().position(|p| *p == parent) {
                    assert!(j < i, "{} listed before its parent", path.display());
                }
            }
        }
    }

    #[test]
    fn test_reserved_names() {
        assert!(StorageLayout::is_reserved("Training Set"));
        assert!(StorageLayout::is_reserved("Test Set"));
        assert!(StorageLayout::is_reserved("Verification Photos"));
        assert!(!StorageLayout::is_reserved("Ada"));
    }

    #[test]
    fn test_ensure_shared_creates_pools() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(tmp.path().join("root"));
        layout.ensure_shared().unwrap();
        assert!(layout.verification_pool().is_dir());
        assert!(layout.training_set().is_dir());
        assert!(layout.test_set().is_dir());
        // second call is a no-op
        layout.ensure_shared().unwrap();
    }
}
