//! Asset catalog: the in-memory lists for the currently loaded person.
//!
//! Lists are rebuilt from disk on every load and written back as manifests on
//! persist. Failures split into two tiers: storage that cannot be enumerated
//! or created is an error, while an unreadable manifest, a failed manifest
//! write or a failed archive move is a [`CatalogWarning`] returned in the
//! report (and logged).

use crate::layout::{
    PersonDirs, CANDIDATE_LINE_PREFIX, ORPHAN_MANIFEST, TRAINING_MANIFEST, VERIFICATION_MANIFEST,
};
use crate::manifest::{self, Dialect, ManifestError, ManifestFormat};
use crate::naming::unique_timestamped_path;
use crate::registry::{PersonRegistry, RegistryError};
use crate::split;
use image::{DynamicImage, ImageFormat};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("unknown person: {0}")]
    UnknownPerson(String),
    #[error("assets for {0} are not loaded")]
    NotLoaded(String),
    #[error("no person selected")]
    NoSelection,
    #[error("storage unavailable at {}: {source}", path.display())]
    StorageUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("path is not absolute: {}", .0.display())]
    NotAbsolute(PathBuf),
    #[error("cannot write face image {}: {source}", path.display())]
    FaceWrite {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("copy {} -> {} failed: {source}", from.display(), to.display())]
    CopyFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("index {index} out of range for {kind} ({len} items)")]
    IndexOutOfRange {
        kind: AssetKind,
        index: usize,
        len: usize,
    },
}

impl CatalogError {
    /// Storage-layer failures the host should treat as unrecoverable.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Registry(e) => e.is_fatal(),
            Self::StorageUnavailable { .. } => true,
            _ => false,
        }
    }

    fn storage(path: &Path, source: io::Error) -> Self {
        Self::StorageUnavailable {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl From<ManifestError> for CatalogError {
    fn from(e: ManifestError) -> Self {
        match e {
            ManifestError::Enumerate { path, source }
            | ManifestError::Read { path, source }
            | ManifestError::Write { path, source } => Self::StorageUnavailable { path, source },
        }
    }
}

/// Recoverable failure; the operation carried on without this piece.
#[derive(Error, Debug)]
pub enum CatalogWarning {
    #[error("skipped manifest: {0}")]
    UnreadableManifest(#[source] ManifestError),
    #[error("manifest not saved: {0}")]
    ManifestWriteFailed(#[source] ManifestError),
    #[error("cannot scan {} for archiving: {source}", path.display())]
    ArchiveScanFailed {
        path: PathBuf,
        #[source]
        source: ManifestError,
    },
    #[error("pending edits for {0} dropped: person is no longer registered")]
    PendingEditsDropped(String),
    #[error("cannot archive {} as {}: {source}", from.display(), to.display())]
    ArchiveMoveFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// The five per-person lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AssetKind {
    SearchCandidates,
    TrainingCandidates,
    VerificationCandidates,
    TrainingFaces,
    TestFaces,
}

impl AssetKind {
    pub const ALL: [AssetKind; 5] = [
        AssetKind::SearchCandidates,
        AssetKind::TrainingCandidates,
        AssetKind::VerificationCandidates,
        AssetKind::TrainingFaces,
        AssetKind::TestFaces,
    ];

    pub fn label(self) -> &'static str {
        match self {
            AssetKind::SearchCandidates => "search-candidates",
            AssetKind::TrainingCandidates => "training-candidates",
            AssetKind::VerificationCandidates => "verification-candidates",
            AssetKind::TrainingFaces => "training-faces",
            AssetKind::TestFaces => "test-faces",
        }
    }

    /// Lists persisted as manifests; the face lists mirror folder contents instead.
    pub fn is_manifest_backed(self) -> bool {
        !matches!(self, AssetKind::TrainingFaces | AssetKind::TestFaces)
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for AssetKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AssetKind::ALL
            .into_iter()
            .find(|k| k.label() == s)
            .ok_or_else(|| format!("unknown asset list: {s}"))
    }
}

#[derive(Debug, Default)]
pub struct LoadReport {
    /// Result of flushing a person with pending edits before loading.
    pub flushed: Option<PersistReport>,
    pub warnings: Vec<CatalogWarning>,
}

#[derive(Debug, Default)]
pub struct PersistReport {
    pub person: String,
    /// Candidate files moved into the archive.
    pub archived: Vec<PathBuf>,
    pub warnings: Vec<CatalogWarning>,
}

/// Counts copied by a train/test split.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitSummary {
    pub training: usize,
    pub test: usize,
}

/// In-memory asset lists for one person at a time.
#[derive(Debug, Default)]
pub struct AssetCatalog {
    loaded: Option<String>,
    lists: [Vec<Url>; 5],
    format: ManifestFormat,
}

impl AssetCatalog {
    pub fn new(format: ManifestFormat) -> Self {
        Self {
            format,
            ..Self::default()
        }
    }

    pub fn loaded_person(&self) -> Option<&str> {
        self.loaded.as_deref()
    }

    pub fn items(&self, kind: AssetKind) -> &[Url] {
        &self.lists[kind.index()]
    }

    pub fn push(&mut self, kind: AssetKind, reference: Url) {
        self.lists[kind.index()].push(reference);
    }

    pub fn remove(&mut self, kind: AssetKind, index: usize) -> Result<Url, CatalogError> {
        let list = &mut self.lists[kind.index()];
        if index >= list.len() {
            return Err(CatalogError::IndexOutOfRange {
                kind,
                index,
                len: list.len(),
            });
        }
        Ok(list.remove(index))
    }

    /// Move the items at `indices` from one list to the end of another,
    /// keeping their relative order. Returns how many moved.
    pub fn move_items(
        &mut self,
        from: AssetKind,
        to: AssetKind,
        indices: &[usize],
    ) -> Result<usize, CatalogError> {
        let len = self.items(from).len();
        let mut indices = indices.to_vec();
        indices.sort_unstable();
        indices.dedup();
        if let Some(&index) = indices.iter().find(|&&i| i >= len) {
            return Err(CatalogError::IndexOutOfRange {
                kind: from,
                index,
                len,
            });
        }

        let source = &mut self.lists[from.index()];
        let mut moved: Vec<Url> = indices.iter().rev().map(|&i| source.remove(i)).collect();
        moved.reverse();
        let count = moved.len();
        self.lists[to.index()].extend(moved);
        Ok(count)
    }

    /// Drop the first occurrence of each reference. Returns how many were found.
    pub fn remove_matching(&mut self, kind: AssetKind, references: &[Url]) -> usize {
        let list = &mut self.lists[kind.index()];
        let mut removed = 0;
        for reference in references {
            if let Some(pos) = list.iter().position(|u| u == reference) {
                list.remove(pos);
                removed += 1;
            }
        }
        removed
    }

    /// Rebuild every list for `person` from disk.
    ///
    /// A person with pending edits is flushed first, so switching persons
    /// never drops unsaved work.
    pub fn load_assets(
        &mut self,
        registry: &mut PersonRegistry,
        person: &str,
    ) -> Result<LoadReport, CatalogError> {
        let dirs = registry
            .person(person)
            .cloned()
            .ok_or_else(|| CatalogError::UnknownPerson(person.to_string()))?;

        let mut report = LoadReport::default();
        if let Some(pending) = registry.persist_required_for().map(str::to_string) {
            if self.loaded.as_deref() == Some(pending.as_str()) {
                tracing::info!(
                    pending = %pending,
                    next = person,
                    "flushing pending edits before load"
                );
                match self.persist_assets(registry, &pending) {
                    Ok(flushed) => report.flushed = Some(flushed),
                    Err(CatalogError::UnknownPerson(gone)) => {
                        tracing::warn!(pending = %gone, "pending person vanished; edits dropped");
                        registry.take_persist_required();
                        self.loaded = None;
                        self.lists = Default::default();
                        report.warnings.push(CatalogWarning::PendingEditsDropped(gone));
                    }
                    Err(e) => return Err(e),
                }
            } else {
                // In-memory lists belong to another person.
                tracing::warn!(pending = %pending, "pending marker without loaded assets; dropped");
                registry.take_persist_required();
            }
        }

        // Built aside so a failed read leaves the previous person loaded.
        let mut lists: [Vec<Url>; 5] = Default::default();
        let verification_pool = registry.layout().verification_pool();
        let sources = [
            (
                AssetKind::SearchCandidates,
                &dirs.candidates,
                Dialect::Prefixed(CANDIDATE_LINE_PREFIX),
            ),
            (AssetKind::SearchCandidates, &dirs.pending_review, Dialect::Plain),
            (AssetKind::TrainingCandidates, &dirs.assignments, Dialect::Plain),
            (AssetKind::VerificationCandidates, &verification_pool, Dialect::Plain),
        ];
        for (kind, dir, dialect) in sources {
            let gathered = manifest::read_manifest_dir(dir, dialect)?;
            lists[kind.index()].extend(gathered.references);
            report
                .warnings
                .extend(gathered.unreadable.into_iter().map(CatalogWarning::UnreadableManifest));
        }
        lists[AssetKind::TrainingFaces.index()] = face_files(&dirs.training_faces)?;
        lists[AssetKind::TestFaces.index()] = face_files(&dirs.test_faces)?;

        self.lists = lists;
        self.loaded = Some(person.to_string());

        tracing::info!(
            person,
            search = self.items(AssetKind::SearchCandidates).len(),
            training = self.items(AssetKind::TrainingCandidates).len(),
            verification = self.items(AssetKind::VerificationCandidates).len(),
            training_faces = self.items(AssetKind::TrainingFaces).len(),
            test_faces = self.items(AssetKind::TestFaces).len(),
            warnings = report.warnings.len(),
            "assets loaded"
        );
        Ok(report)
    }

    /// Write the loaded lists back to `person`'s manifests, then sweep the
    /// raw candidate files into the archive.
    pub fn persist_assets(
        &mut self,
        registry: &mut PersonRegistry,
        person: &str,
    ) -> Result<PersistReport, CatalogError> {
        let dirs = registry
            .person(person)
            .cloned()
            .ok_or_else(|| CatalogError::UnknownPerson(person.to_string()))?;
        if self.loaded.as_deref() != Some(person) {
            return Err(CatalogError::NotLoaded(person.to_string()));
        }

        let mut report = PersistReport {
            person: person.to_string(),
            ..PersistReport::default()
        };

        let search = self.items(AssetKind::SearchCandidates);
        if !search.is_empty() {
            let path = dirs.pending_review.join(ORPHAN_MANIFEST);
            self.write_or_warn(&path, search, &mut report.warnings);
        }

        let path = dirs.assignments.join(TRAINING_MANIFEST);
        self.write_or_warn(&path, self.items(AssetKind::TrainingCandidates), &mut report.warnings);

        let path = registry.layout().verification_pool().join(VERIFICATION_MANIFEST);
        self.write_or_warn(
            &path,
            self.items(AssetKind::VerificationCandidates),
            &mut report.warnings,
        );

        archive_candidates(&dirs, &mut report);

        registry.take_persist_required();
        tracing::info!(
            person,
            archived = report.archived.len(),
            warnings = report.warnings.len(),
            "assets persisted"
        );
        Ok(report)
    }

    fn write_or_warn(&self, path: &Path, refs: &[Url], warnings: &mut Vec<CatalogWarning>) {
        if let Err(e) = manifest::write_manifest(path, refs, self.format) {
            tracing::warn!(error = %e, "manifest write failed");
            warnings.push(CatalogWarning::ManifestWriteFailed(e));
        }
    }

    /// Save a cropped face as a timestamp-named PNG in the person's training faces.
    pub fn save_cropped_face(
        &mut self,
        registry: &PersonRegistry,
        image: &DynamicImage,
        person: &str,
    ) -> Result<Url, CatalogError> {
        let dirs = registry
            .person(person)
            .ok_or_else(|| CatalogError::UnknownPerson(person.to_string()))?;

        let path = unique_timestamped_path(&dirs.training_faces, "png");
        if let Err(source) = image.save_with_format(&path, ImageFormat::Png) {
            tracing::warn!(path = %path.display(), error = %source, "face not saved");
            return Err(CatalogError::FaceWrite { path, source });
        }
        let url = Url::from_file_path(&path).map_err(|()| CatalogError::NotAbsolute(path.clone()))?;

        if self.loaded.as_deref() == Some(person) {
            self.push(AssetKind::TrainingFaces, url.clone());
        }
        tracing::debug!(person, path = %path.display(), "saved training face");
        Ok(url)
    }

    /// Rebuild the person's folders under the global training and test sets,
    /// holding out `floor(n * test_fraction)` randomly chosen faces for testing.
    ///
    /// Any copy failure aborts the split.
    pub fn split_into_training_set<R>(
        &self,
        registry: &PersonRegistry,
        person: &str,
        test_fraction: f64,
        rng: &mut R,
    ) -> Result<SplitSummary, CatalogError>
    where
        R: Rng + ?Sized,
    {
        let dirs = registry
            .person(person)
            .ok_or_else(|| CatalogError::UnknownPerson(person.to_string()))?;
        let layout = registry.layout();

        let training_dir = layout.training_set().join(person);
        let test_dir = layout.test_set().join(person);
        for dir in [&training_dir, &test_dir] {
            let _ = std::fs::remove_dir_all(dir);
            std::fs::create_dir_all(dir).map_err(|e| CatalogError::storage(dir, e))?;
        }

        let faces = manifest::list_files(&dirs.training_faces)?;
        let k = split::test_count(faces.len(), test_fraction);
        let (training, test) = split::partial_shuffle(faces, k, rng);

        let copied = copy_into(&training, &training_dir).and_then(|()| copy_into(&test, &test_dir));
        if let Err(e) = copied {
            tracing::error!(person, error = %e, "train/test split aborted");
            return Err(e);
        }

        let summary = SplitSummary {
            training: training.len(),
            test: test.len(),
        };
        tracing::info!(person, training = summary.training, test = summary.test, "split faces");
        Ok(summary)
    }
}

/// Every visible file in a face folder, as file URLs.
fn face_files(dir: &Path) -> Result<Vec<Url>, CatalogError> {
    manifest::list_files(dir)?
        .into_iter()
        .map(|path| Url::from_file_path(&path).map_err(|()| CatalogError::NotAbsolute(path)))
        .collect()
}

fn copy_into(files: &[PathBuf], dir: &Path) -> Result<(), CatalogError> {
    for from in files {
        let Some(name) = from.file_name() else {
            continue;
        };
        let to = dir.join(name);
        std::fs::copy(from, &to).map_err(|source| CatalogError::CopyFailed {
            from: from.clone(),
            to,
            source,
        })?;
    }
    Ok(())
}

/// Move every file directly under the candidates folder into the archive.
fn archive_candidates(dirs: &PersonDirs, report: &mut PersistReport) {
    let files = match manifest::list_files(&dirs.candidates) {
        Ok(files) => files,
        Err(source) => {
            tracing::warn!(error = %source, "archive sweep skipped");
            report.warnings.push(CatalogWarning::ArchiveScanFailed {
                path: dirs.candidates.clone(),
                source,
            });
            return;
        }
    };

    for from in files {
        let to = unique_timestamped_path(&dirs.archive, "txt");
        match std::fs::rename(&from, &to) {
            Ok(()) => report.archived.push(to),
            Err(source) => {
                tracing::warn!(from = %from.display(), error = %source, "archive move failed");
                report
                    .warnings
                    .push(CatalogWarning::ArchiveMoveFailed { from, to, source });
            }
        }
    }
}
