//! facecorpus-core — bookkeeping for a face-recognition training corpus.
//!
//! Keeps one directory tree per person on local storage, reads and writes the
//! manifests of candidate photo references, and splits confirmed face crops
//! into global training and test sets. Detection, classification and image
//! fetching are plugged in through the traits in [`vision`].

pub mod catalog;
pub mod context;
pub mod layout;
pub mod manifest;
pub mod naming;
pub mod registry;
pub mod split;
pub mod vision;
pub mod worker;

pub use catalog::{AssetCatalog, AssetKind, CatalogError, CatalogWarning, SplitSummary};
pub use context::{Corpus, CorpusSettings};
pub use layout::{PersonDirs, StorageLayout};
pub use manifest::ManifestFormat;
pub use registry::{PersonRegistry, RegistryError};
pub use vision::{FaceClassifier, FaceDetector, ImageLoader};
pub use worker::{spawn_batch_worker, BatchHandle, BatchOutcome};

/// Default corpus root: `$XDG_DATA_HOME/facecorpus`, else `~/.local/share/facecorpus`.
pub fn default_root() -> std::path::PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            std::path::PathBuf::from(home).join(".local/share")
        })
        .join("facecorpus")
}
