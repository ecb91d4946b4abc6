use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::BuildError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Root of the photo tree to publish.
    #[serde(default)]
    pub source_dir: PathBuf,

    /// Root of the generated site.
    #[serde(default)]
    pub dest_dir: PathBuf,

    /// Index location. Defaults to `<dest_dir>/.photoboxy.db`.
    #[serde(default)]
    pub db_path: Option<PathBuf>,

    #[serde(default)]
    pub build: BuildConfig,

    #[serde(default)]
    pub clustering: ClusteringConfig,

    #[serde(default)]
    pub media: MediaConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Maximum concurrent background jobs. Unset means one per CPU.
    #[serde(default)]
    pub workers: Option<usize>,

    /// Re-render every page without re-running media jobs.
    #[serde(default)]
    pub html_only: bool,

    #[serde(default)]
    pub skip_videos: bool,

    #[serde(default)]
    pub skip_docs: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusteringConfig {
    #[serde(default = "default_clustering_enabled")]
    pub enabled: bool,

    /// Single-linkage merge distance.
    #[serde(default = "default_distance_threshold")]
    pub distance_threshold: f32,

    /// Minimum number of photos a cluster must span to become a tag.
    #[serde(default = "default_occurrence_threshold")]
    pub occurrence_threshold: usize,

    #[serde(default)]
    pub use_dimensionality_reduction: bool,

    /// Clusters holding more than this share of all embeddings are re-clustered
    /// at half the distance threshold.
    #[serde(default = "default_oversize_fraction")]
    pub oversize_fraction: f32,
}

fn default_clustering_enabled() -> bool {
    true
}

fn default_distance_threshold() -> f32 {
    1.0
}

fn default_occurrence_threshold() -> usize {
    3
}

fn default_oversize_fraction() -> f32 {
    0.1
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            enabled: default_clustering_enabled(),
            distance_threshold: default_distance_threshold(),
            occurrence_threshold: default_occurrence_threshold(),
            use_dimensionality_reduction: false,
            oversize_fraction: default_oversize_fraction(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Edge length of square thumbnails.
    #[serde(default = "default_thumbnail_size")]
    pub thumbnail_size: u32,

    /// Bounding size of the display copy.
    #[serde(default = "default_display_size")]
    pub display_size: u32,

    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: String,

    #[serde(default = "default_unoconv")]
    pub unoconv: String,

    #[serde(default = "default_convert")]
    pub convert: String,
}

fn default_thumbnail_size() -> u32 {
    100
}

fn default_display_size() -> u32 {
    800
}

fn default_ffmpeg() -> String {
    "ffmpeg".to_string()
}

fn default_unoconv() -> String {
    "unoconv".to_string()
}

fn default_convert() -> String {
    "convert".to_string()
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            thumbnail_size: default_thumbnail_size(),
            display_size: default_display_size(),
            ffmpeg: default_ffmpeg(),
            unoconv: default_unoconv(),
            convert: default_convert(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            // Create default config
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;

        Ok(())
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("photoboxy")
    }

    fn config_path() -> PathBuf {
        std::env::var_os("PHOTOBOXY_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| Self::config_dir().join("config.toml"))
    }

    pub fn db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| self.dest_dir.join(".photoboxy.db"))
    }

    /// Number of background workers, falling back to the CPU count.
    pub fn workers(&self) -> usize {
        self.build
            .workers
            .filter(|n| *n > 0)
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1)
            })
    }

    /// Reject configurations the build cannot start from.
    pub fn validate(&self) -> Result<(), BuildError> {
        if self.source_dir.as_os_str().is_empty() {
            return Err(BuildError::MissingSourceRoot);
        }
        if !self.source_dir.is_dir() || std::fs::read_dir(&self.source_dir).is_err() {
            return Err(BuildError::SourceNotDirectory(self.source_dir.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_from_empty_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.clustering.distance_threshold, 1.0);
        assert_eq!(config.clustering.occurrence_threshold, 3);
        assert!(config.clustering.enabled);
        assert_eq!(config.media.thumbnail_size, 100);
        assert_eq!(config.media.display_size, 800);
        assert!(!config.build.html_only);
    }

    #[test]
    fn test_partial_sections() {
        let config: Config = toml::from_str(
            r#"
            source_dir = "/photos"
            dest_dir = "/site"

            [clustering]
            distance_threshold = 0.6
            "#,
        )
        .unwrap();
        assert_eq!(config.clustering.distance_threshold, 0.6);
        assert_eq!(config.clustering.occurrence_threshold, 3);
        assert_eq!(config.db_path(), PathBuf::from("/site/.photoboxy.db"));
    }

    #[test]
    fn test_validate_source_root() {
        let config = Config::default();
        assert!(matches!(config.validate(), Err(BuildError::MissingSourceRoot)));

        let dir = tempdir().unwrap();
        let config = Config {
            source_dir: dir.path().join("missing"),
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(BuildError::SourceNotDirectory(_))
        ));

        let config = Config {
            source_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_workers_fallback() {
        let mut config = Config::default();
        assert!(config.workers() >= 1);
        config.build.workers = Some(0);
        assert!(config.workers() >= 1);
        config.build.workers = Some(3);
        assert_eq!(config.workers(), 3);
    }
}
