use anyhow::{Context, Result};
use facecorpus_core::{CorpusSettings, ManifestFormat};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Optional TOML file named by `FACECORPUS_CONFIG`. Every key may be omitted.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub root: Option<PathBuf>,
    pub test_fraction: Option<f64>,
    pub manifest_format: Option<ManifestFormat>,
    pub seed: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }
}

/// CLI configuration: environment over config file over defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Corpus root directory.
    pub root: PathBuf,
    pub settings: CorpusSettings,
    /// Fixed seed for the train/test split; random when unset.
    pub seed: Option<u64>,
}

impl Config {
    /// Load configuration from `FACECORPUS_*` environment variables, layered
    /// over the file named by `FACECORPUS_CONFIG` when set.
    pub fn from_env() -> Result<Self> {
        let file = match std::env::var("FACECORPUS_CONFIG") {
            Ok(path) => FileConfig::load(Path::new(&path))?,
            Err(_) => FileConfig::default(),
        };
        Ok(Self::resolve(file, |key| std::env::var(key).ok()))
    }

    fn resolve(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = CorpusSettings::default();

        let root = env("FACECORPUS_ROOT")
            .map(PathBuf::from)
            .or(file.root)
            .unwrap_or_else(facecorpus_core::default_root);

        let test_fraction = env("FACECORPUS_TEST_FRACTION")
            .and_then(|v| v.parse().ok())
            .or(file.test_fraction)
            .unwrap_or(defaults.test_fraction);

        let manifest_format = match env("FACECORPUS_MANIFEST_FORMAT").as_deref() {
            Some("plain") => ManifestFormat::Plain,
            Some("tagged") => ManifestFormat::Tagged,
            _ => file.manifest_format.unwrap_or(defaults.manifest_format),
        };

        let seed = env("FACECORPUS_SEED")
            .and_then(|v| v.parse().ok())
            .or(file.seed);

        Self {
            root,
            settings: CorpusSettings {
                test_fraction,
                manifest_format,
            },
            seed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let cfg = Config::resolve(FileConfig::default(), env(&[]));
        assert_eq!(cfg.settings, CorpusSettings::default());
        assert_eq!(cfg.seed, None);
        assert!(cfg.root.ends_with("facecorpus"));
    }

    #[test]
    fn test_env_overrides_file() {
        let file: FileConfig = toml::from_str(
            r#"
            root = "/from/file"
            test_fraction = 0.3
            manifest_format = "plain"
            seed = 9
            "#,
        )
        .unwrap();
        let cfg = Config::resolve(
            file,
            env(&[("FACECORPUS_ROOT", "/from/env"), ("FACECORPUS_SEED", "42")]),
        );
        assert_eq!(cfg.root, PathBuf::from("/from/env"));
        assert_eq!(cfg.seed, Some(42));
        assert_eq!(cfg.settings.test_fraction, 0.3);
        assert_eq!(cfg.settings.manifest_format, ManifestFormat::Plain);
    }

    #[test]
    fn test_unparseable_env_falls_back() {
        let cfg = Config::resolve(
            FileConfig::default(),
            env(&[
                ("FACECORPUS_TEST_FRACTION", "lots"),
                ("FACECORPUS_MANIFEST_FORMAT", "yaml"),
            ]),
        );
        assert_eq!(cfg.settings.test_fraction, 0.2);
        assert_eq!(cfg.settings.manifest_format, ManifestFormat::Tagged);
    }

    #[test]
    fn test_unknown_file_key_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("facecorpus.toml");
        std::fs::write(&path, "colour = \"blue\"\n").unwrap();
        assert!(FileConfig::load(&path).is_err());
    }
}
