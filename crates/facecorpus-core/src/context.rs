//! The corpus context: registry, catalog and settings behind one handle.
//!
//! Constructed once by the host and passed to whatever drives the workflow.

use crate::catalog::{
    AssetCatalog, AssetKind, CatalogError, LoadReport, PersistReport, SplitSummary,
};
use crate::layout::{PersonDirs, StorageLayout};
use crate::manifest::ManifestFormat;
use crate::registry::PersonRegistry;
use crate::split::DEFAULT_TEST_FRACTION;
use crate::worker::BatchOutcome;
use image::DynamicImage;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use url::Url;

/// Tunables for a corpus.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorpusSettings {
    /// Share of training faces copied to the test set.
    pub test_fraction: f64,
    /// Line format used when writing manifests.
    pub manifest_format: ManifestFormat,
}

impl Default for CorpusSettings {
    fn default() -> Self {
        Self {
            test_fraction: DEFAULT_TEST_FRACTION,
            manifest_format: ManifestFormat::default(),
        }
    }
}

/// What applying a batch did.
#[derive(Debug, Default)]
pub struct BatchApplied {
    /// Saved face files, in batch order.
    pub saved: Vec<Url>,
    /// Accepted references whose face could not be saved; they stay in the
    /// training candidates.
    pub failed: Vec<(Url, CatalogError)>,
}

pub struct Corpus {
    registry: PersonRegistry,
    catalog: AssetCatalog,
    settings: CorpusSettings,
}

impl Corpus {
    pub fn open(root: impl Into<PathBuf>, settings: CorpusSettings) -> Result<Self, CatalogError> {
        let registry = PersonRegistry::open(StorageLayout::new(root))?;
        Ok(Self {
            registry,
            catalog: AssetCatalog::new(settings.manifest_format),
            settings,
        })
    }

    pub fn registry(&self) -> &PersonRegistry {
        &self.registry
    }

    pub fn catalog(&self) -> &AssetCatalog {
        &self.catalog
    }

    pub fn settings(&self) -> &CorpusSettings {
        &self.settings
    }

    pub fn list_persons(&mut self) -> Result<Vec<PersonDirs>, CatalogError> {
        Ok(self.registry.list_persons()?)
    }

    pub fn create_person(&mut self, name: &str) -> Result<bool, CatalogError> {
        Ok(self.registry.create_person(name)?)
    }

    pub fn selected(&self) -> Option<&str> {
        self.registry.selected_person()
    }

    fn require_selected(&self) -> Result<String, CatalogError> {
        self.registry
            .selected_person()
            .map(str::to_string)
            .ok_or(CatalogError::NoSelection)
    }

    /// Make `name` the selected person and load its assets. Pending edits of
    /// the previous person are written out before anything is read.
    pub fn select_person(&mut self, name: &str) -> Result<LoadReport, CatalogError> {
        let report = self.catalog.load_assets(&mut self.registry, name)?;
        self.registry.select(name);
        Ok(report)
    }

    pub fn add_asset(&mut self, kind: AssetKind, reference: Url) -> Result<(), CatalogError> {
        let person = self.require_selected()?;
        self.catalog.push(kind, reference);
        self.registry.mark_persist_required(&person);
        Ok(())
    }

    pub fn move_assets(
        &mut self,
        from: AssetKind,
        to: AssetKind,
        indices: &[usize],
    ) -> Result<usize, CatalogError> {
        let person = self.require_selected()?;
        let moved = self.catalog.move_items(from, to, indices)?;
        if moved > 0 {
            self.registry.mark_persist_required(&person);
        }
        Ok(moved)
    }

    pub fn remove_asset(&mut self, kind: AssetKind, index: usize) -> Result<Url, CatalogError> {
        let person = self.require_selected()?;
        let removed = self.catalog.remove(kind, index)?;
        self.registry.mark_persist_required(&person);
        Ok(removed)
    }

    /// Write the selected person's lists to disk.
    pub fn flush(&mut self) -> Result<Option<PersistReport>, CatalogError> {
        let Some(person) = self.registry.selected_person().map(str::to_string) else {
            return Ok(None);
        };
        Ok(Some(self.catalog.persist_assets(&mut self.registry, &person)?))
    }

    /// Flush, then drop the selection.
    pub fn deselect(&mut self) -> Result<Option<PersistReport>, CatalogError> {
        let report = self.flush()?;
        self.registry.clear_selection();
        Ok(report)
    }

    pub fn save_face(&mut self, face: &DynamicImage) -> Result<Url, CatalogError> {
        let person = self.require_selected()?;
        self.catalog.save_cropped_face(&self.registry, face, &person)
    }

    /// Apply a worker's batch on the controlling thread: save every accepted
    /// face and drop its reference from the training candidates.
    pub fn apply_batch(&mut self, outcome: BatchOutcome) -> Result<BatchApplied, CatalogError> {
        let person = self.require_selected()?;
        let mut applied = BatchApplied::default();

        for accepted in outcome.accepted {
            match self
                .catalog
                .save_cropped_face(&self.registry, &accepted.face.image, &person)
            {
                Ok(url) => {
                    self.catalog
                        .remove_matching(AssetKind::TrainingCandidates, &[accepted.reference]);
                    applied.saved.push(url);
                }
                Err(e) => applied.failed.push((accepted.reference, e)),
            }
        }

        if !applied.saved.is_empty() {
            self.registry.mark_persist_required(&person);
        }
        tracing::info!(
            person = %person,
            saved = applied.saved.len(),
            failed = applied.failed.len(),
            skipped = outcome.skipped.len(),
            "batch applied"
        );
        Ok(applied)
    }

    /// Split the selected person's training faces using the configured fraction.
    pub fn split_selected<R>(&self, rng: &mut R) -> Result<SplitSummary, CatalogError>
    where
        R: Rng + ?Sized,
    {
        let person = self.require_selected()?;
        self.catalog
            .split_into_training_set(&self.registry, &person, self.settings.test_fraction, rng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::TRAINING_MANIFEST;
    use crate::manifest::{read_manifest, Dialect};
    use crate::vision::{CroppedFace, PixelRect};
    use crate::worker::{AcceptedFace, SkipReason, SkippedReference};
    use image::RgbaImage;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn open(persons: &[&str]) -> (tempfile::TempDir, Corpus) {
        let tmp = tempfile::tempdir().unwrap();
        let mut corpus = Corpus::open(tmp.path(), CorpusSettings::default()).unwrap();
        for p in persons {
            corpus.create_person(p).unwrap();
        }
        (tmp, corpus)
    }

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn training_manifest(corpus: &Corpus, person: &str) -> Vec<Url> {
        let dirs = corpus.registry().person(person).unwrap();
        read_manifest(&dirs.assignments.join(TRAINING_MANIFEST), Dialect::Plain).unwrap_or_default()
    }

    #[test]
    fn test_edits_require_selection() {
        let (_tmp, mut corpus) = open(&["Ada"]);
        let err = corpus
            .add_asset(AssetKind::TrainingCandidates, url("https://a/1.png"))
            .unwrap_err();
        assert!(matches!(err, CatalogError::NoSelection));
        assert!(corpus.flush().unwrap().is_none());
    }

    #[test]
    fn test_select_edit_switch_flushes_previous() {
        let (_tmp, mut corpus) = open(&["Ada", "Bob"]);
        corpus.select_person("Ada").unwrap();
        corpus
            .add_asset(AssetKind::TrainingCandidates, url("https://a/1.png"))
            .unwrap();
        assert_eq!(corpus.registry().persist_required_for(), Some("Ada"));
        assert!(training_manifest(&corpus, "Ada").is_empty());

        let report = corpus.select_person("Bob").unwrap();
        assert!(report.flushed.is_some());
        assert_eq!(corpus.selected(), Some("Bob"));
        assert_eq!(training_manifest(&corpus, "Ada"), [url("https://a/1.png")]);

        // Coming back picks up what was flushed.
        corpus.select_person("Ada").unwrap();
        assert_eq!(
            corpus.catalog().items(AssetKind::TrainingCandidates),
            [url("https://a/1.png")]
        );
    }

    #[test]
    fn test_select_recovers_when_pending_person_deleted() {
        let (_tmp, mut corpus) = open(&["Ada", "Bob"]);
        corpus.select_person("Ada").unwrap();
        corpus
            .add_asset(AssetKind::TrainingCandidates, url("https://a/1.png"))
            .unwrap();
        let ada_root = corpus.registry().person("Ada").unwrap().root.clone();
        std::fs::remove_dir_all(ada_root).unwrap();
        corpus.list_persons().unwrap();

        let report = corpus.select_person("Bob").unwrap();
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(corpus.selected(), Some("Bob"));
        assert_eq!(corpus.registry().persist_required_for(), None);
        corpus.select_person("Bob").unwrap();
        assert!(corpus.deselect().unwrap().is_some());
    }

    #[test]
    fn test_failed_select_leaves_previous_selection_editable() {
        let (_tmp, mut corpus) = open(&["Ada", "Bob"]);
        corpus.select_person("Ada").unwrap();
        let bob_test_faces = corpus.registry().person("Bob").unwrap().test_faces.clone();
        std::fs::remove_dir_all(bob_test_faces).unwrap();

        let err = corpus.select_person("Bob").unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(corpus.selected(), Some("Ada"));
        assert_eq!(corpus.catalog().loaded_person(), Some("Ada"));

        corpus
            .add_asset(AssetKind::TrainingCandidates, url("https://a/1.png"))
            .unwrap();
        let report = corpus.flush().unwrap().unwrap();
        assert_eq!(report.person, "Ada");
        assert_eq!(training_manifest(&corpus, "Ada"), [url("https://a/1.png")]);
    }

    #[test]
    fn test_move_marks_persist_and_deselect_writes() {
        let (_tmp, mut corpus) = open(&["Ada"]);
        corpus.select_person("Ada").unwrap();
        corpus
            .add_asset(AssetKind::SearchCandidates, url("https://s/1.png"))
            .unwrap();
        corpus.flush().unwrap();
        assert_eq!(corpus.registry().persist_required_for(), None);

        let moved = corpus
            .move_assets(AssetKind::SearchCandidates, AssetKind::TrainingCandidates, &[0])
            .unwrap();
        assert_eq!(moved, 1);
        assert_eq!(corpus.registry().persist_required_for(), Some("Ada"));

        corpus.deselect().unwrap();
        assert_eq!(corpus.selected(), None);
        assert_eq!(training_manifest(&corpus, "Ada"), [url("https://s/1.png")]);
    }

    #[test]
    fn test_apply_batch_saves_and_prunes_candidates() {
        let (_tmp, mut corpus) = open(&["Ada"]);
        corpus.select_person("Ada").unwrap();
        let keep = url("https://t/keep.png");
        let done = url("https://t/done.png");
        corpus.add_asset(AssetKind::TrainingCandidates, keep.clone()).unwrap();
        corpus.add_asset(AssetKind::TrainingCandidates, done.clone()).unwrap();
        corpus.flush().unwrap();

        let face = CroppedFace {
            image: DynamicImage::ImageRgba8(RgbaImage::new(6, 6)),
            rect: PixelRect { x: 0, y: 0, width: 6, height: 6 },
        };
        let outcome = BatchOutcome {
            accepted: vec![AcceptedFace { reference: done.clone(), face }],
            skipped: vec![SkippedReference {
                reference: keep.clone(),
                reason: SkipReason::FaceCount(0),
            }],
        };

        let applied = corpus.apply_batch(outcome).unwrap();
        assert_eq!(applied.saved.len(), 1);
        assert!(applied.failed.is_empty());
        assert_eq!(corpus.catalog().items(AssetKind::TrainingCandidates), [keep]);
        assert_eq!(corpus.catalog().items(AssetKind::TrainingFaces), applied.saved.as_slice());
        assert_eq!(corpus.registry().persist_required_for(), Some("Ada"));
    }

    #[test]
    fn test_split_selected_uses_settings() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = CorpusSettings { test_fraction: 0.5, ..CorpusSettings::default() };
        let mut corpus = Corpus::open(tmp.path(), settings).unwrap();
        corpus.create_person("Ada").unwrap();
        corpus.select_person("Ada").unwrap();
        for _ in 0..4 {
            corpus
                .save_face(&DynamicImage::ImageRgba8(RgbaImage::new(2, 2)))
                .unwrap();
        }

        let summary = corpus.split_selected(&mut StdRng::seed_from_u64(3)).unwrap();
        assert_eq!(summary, SplitSummary { training: 2, test: 2 });
    }

    #[test]
    fn test_settings_deserialize_with_defaults() {
        let s: CorpusSettings = serde_json::from_str(r#"{"manifest_format":"plain"}"#).unwrap();
        assert_eq!(s.manifest_format, ManifestFormat::Plain);
        assert_eq!(s.test_fraction, DEFAULT_TEST_FRACTION);
    }
}
