//! Person registry: maps person names to their directory trees on disk.
//!
//! Persons are discovered by scanning the corpus root. Everything except the
//! three shared pools, hidden entries and plain files is a person.

use crate::layout::{PersonDirs, StorageLayout};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("storage unavailable at {}: {source}", path.display())]
    StorageUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid person name: {0:?}")]
    InvalidPersonName(String),
}

impl RegistryError {
    pub(crate) fn storage(path: &Path, source: io::Error) -> Self {
        Self::StorageUnavailable {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Storage-layer failures the host should treat as unrecoverable.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::StorageUnavailable { .. })
    }
}

/// Owns the person → directory-set mapping plus the selection state.
///
/// Not synchronized; one controlling thread drives it.
#[derive(Debug)]
pub struct PersonRegistry {
    layout: StorageLayout,
    people: BTreeMap<String, PersonDirs>,
    selected_person: Option<String>,
    persist_required_for: Option<String>,
}

impl PersonRegistry {
    /// Create the shared pools if needed and perform the initial scan.
    pub fn open(layout: StorageLayout) -> Result<Self, RegistryError> {
        layout
            .ensure_shared()
            .map_err(|e| RegistryError::storage(layout.root(), e))?;
        // Face references are file URLs, which need an absolute root.
        let root = std::fs::canonicalize(layout.root())
            .map_err(|e| RegistryError::storage(layout.root(), e))?;
        let layout = StorageLayout::new(root);

        let mut registry = Self {
            layout,
            people: BTreeMap::new(),
            selected_person: None,
            persist_required_for: None,
        };
        registry.list_persons()?;

        tracing::info!(
            root = %registry.layout.root().display(),
            persons = registry.people.len(),
            "person registry opened"
        );
        Ok(registry)
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    /// Re-scan the root and return every person's directory set, ordered by name.
    pub fn list_persons(&mut self) -> Result<Vec<PersonDirs>, RegistryError> {
        let root = self.layout.root();
        let entries = std::fs::read_dir(root).map_err(|e| RegistryError::storage(root, e))?;

        let mut people = BTreeMap::new();
        for entry in entries {
            let entry = entry.map_err(|e| RegistryError::storage(root, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') || StorageLayout::is_reserved(&name) {
                continue;
            }
            let is_dir = entry
                .file_type()
                .map_err(|e| RegistryError::storage(&entry.path(), e))?
                .is_dir();
            if !is_dir {
                continue;
            }
            people.insert(name.clone(), self.layout.person_dirs(&name));
        }

        tracing::debug!(count = people.len(), "scanned persons");
        self.people = people;
        Ok(self.people.values().cloned().collect())
    }

    /// Create a person's full directory tree. Returns `false` when the person
    /// already exists, in which case nothing on disk is touched.
    ///
    /// The tree is built under a hidden staging name and renamed into place,
    /// so a half-built tree is never visible to a scan.
    pub fn create_person(&mut self, name: &str) -> Result<bool, RegistryError> {
        validate_name(name)?;
        let target = self.layout.person_dirs(name);
        if self.people.contains_key(name) || target.root.is_dir() {
            tracing::debug!(name, "person already registered");
            self.list_persons()?;
            return Ok(false);
        }

        let staging_root = self.layout.root().join(format!(".{name}.partial"));
        let _ = std::fs::remove_dir_all(&staging_root);
        let staging = self.layout.person_dirs(&format!(".{name}.partial"));

        let built = staging
            .all()
            .iter()
            .try_for_each(|dir| {
                std::fs::create_dir_all(dir).map_err(|e| RegistryError::storage(dir, e))
            })
            .and_then(|()| {
                std::fs::rename(&staging.root, &target.root)
                    .map_err(|e| RegistryError::storage(&target.root, e))
            });
        if let Err(e) = built {
            let _ = std::fs::remove_dir_all(&staging_root);
            return Err(e);
        }

        tracing::info!(name, path = %target.root.display(), "created person");
        self.list_persons()?;
        Ok(true)
    }

    pub fn person(&self, name: &str) -> Option<&PersonDirs> {
        self.people.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.people.contains_key(name)
    }

    /// Registered names in sorted order (as of the last scan).
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.people.keys().map(String::as_str)
    }

    pub fn selected_person(&self) -> Option<&str> {
        self.selected_person.as_deref()
    }

    pub fn select(&mut self, name: &str) {
        self.selected_person = Some(name.to_string());
    }

    pub fn clear_selection(&mut self) {
        self.selected_person = None;
    }

    pub fn persist_required_for(&self) -> Option<&str> {
        self.persist_required_for.as_deref()
    }

    /// Record that `name` has in-memory edits not yet flushed to disk.
    pub fn mark_persist_required(&mut self, name: &str) {
        self.persist_required_for = Some(name.to_string());
    }

    pub fn take_persist_required(&mut self) -> Option<String> {
        self.persist_required_for.take()
    }
}

/// A person name doubles as a directory name.
fn validate_name(name: &str) -> Result<(), RegistryError> {
    let bad = name.trim().is_empty()
        || name.starts_with('.')
        || name.contains(['/', '\\', '\0'])
        || StorageLayout::is_reserved(name);
    if bad {
        return Err(RegistryError::InvalidPersonName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_tmp() -> (tempfile::TempDir, PersonRegistry) {
        let tmp = tempfile::tempdir().unwrap();
        let registry = PersonRegistry::open(StorageLayout::new(tmp.path())).unwrap();
        (tmp, registry)
    }

    fn is_empty_dir(path: &Path) -> bool {
        std::fs::read_dir(path).unwrap().next().is_none()
    }

    #[test]
    fn test_open_empty_root_has_no_persons() {
        let (_tmp, mut registry) = open_tmp();
        assert!(registry.list_persons().unwrap().is_empty());
    }

    #[test]
    fn test_create_then_list_yields_full_tree() {
        let (_tmp, mut registry) = open_tmp();
        assert!(registry.create_person("Ada Lovelace").unwrap());

        let persons = registry.list_persons().unwrap();
        assert_eq!(persons.len(), 1);
        let dirs = &persons[0];
        assert_eq!(dirs.name(), "Ada Lovelace");
        for dir in &dirs.all()[1..] {
            assert!(dir.is_dir(), "{} missing", dir.display());
        }
        // Leaf directories are empty.
        for dir in [
            &dirs.training_faces,
            &dirs.test_faces,
            &dirs.pending_review,
            &dirs.archive,
            &dirs.assignments,
        ] {
            assert!(is_empty_dir(dir), "{} not empty", dir.display());
        }
    }

    #[test]
    fn test_create_is_idempotent() {
        let (_tmp, mut registry) = open_tmp();
        assert!(registry.create_person("Ada").unwrap());

        let marker = registry.person("Ada").unwrap().training_faces.join("face.png");
        std::fs::write(&marker, b"png").unwrap();

        assert!(!registry.create_person("Ada").unwrap());
        assert!(marker.exists());
        assert_eq!(registry.list_persons().unwrap().len(), 1);
    }

    #[test]
    fn test_no_staging_leftovers() {
        let (tmp, mut registry) = open_tmp();
        registry.create_person("Ada").unwrap();
        let hidden: Vec<_> = std::fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with('.'))
            .collect();
        assert!(hidden.is_empty());
    }

    #[test]
    fn test_reserved_hidden_and_files_excluded() {
        let (tmp, mut registry) = open_tmp();
        std::fs::create_dir(tmp.path().join(".cache")).unwrap();
        std::fs::write(tmp.path().join("notes.txt"), "x").unwrap();
        std::fs::create_dir(tmp.path().join("Grace")).unwrap();

        let names: Vec<String> = registry
            .list_persons()
            .unwrap()
            .iter()
            .map(PersonDirs::name)
            .collect();
        assert_eq!(names, vec!["Grace".to_string()]);
    }

    #[test]
    fn test_invalid_names_rejected() {
        let (_tmp, mut registry) = open_tmp();
        for name in ["", "  ", ".", "..", ".hidden", "a/b", "Training Set"] {
            let err = registry.create_person(name).unwrap_err();
            assert!(matches!(err, RegistryError::InvalidPersonName(_)), "{name:?}");
            assert!(!err.is_fatal());
        }
    }

    #[test]
    fn test_missing_root_is_storage_unavailable() {
        let (tmp, mut registry) = open_tmp();
        let root = registry.layout().root().to_path_buf();
        drop(tmp);
        let err = registry.list_persons().unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains(&root.display().to_string()));
    }

    #[test]
    fn test_selection_and_persist_markers() {
        let (_tmp, mut registry) = open_tmp();
        assert_eq!(registry.selected_person(), None);
        registry.select("Ada");
        assert_eq!(registry.selected_person(), Some("Ada"));
        registry.clear_selection();
        assert_eq!(registry.selected_person(), None);

        registry.mark_persist_required("Ada");
        assert_eq!(registry.persist_required_for(), Some("Ada"));
        assert_eq!(registry.take_persist_required().as_deref(), Some("Ada"));
        assert_eq!(registry.persist_required_for(), None);
    }
}
