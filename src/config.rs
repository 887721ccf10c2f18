// src/config.rs
//! Build configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::json_io::read_json;

/// How archive instances are placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveMode {
    /// One packed-disk primitive per instance, all sharing the converted artifact.
    #[default]
    Reference,
    /// Load the artifact and duplicate it into an independent packed primitive per instance.
    Copy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Root every descriptor path is relative to.
    pub scene_root: PathBuf,
    /// Descriptor tree, `<scene_root>/json` when unset. Relative paths hang off `scene_root`.
    pub json_dir: Option<PathBuf>,
    /// Artifact cache, `<scene_root>/geo` when unset.
    pub cache_dir: Option<PathBuf>,
    /// Where cleaned mesh streams are staged; the system temp dir when unset.
    pub scratch_dir: Option<PathBuf>,
    pub overwrite_converted: bool,
    pub overwrite_element: bool,
    pub archive_mode: ArchiveMode,
    /// Worker threads for independent elements. 1 builds sequentially.
    pub jobs: usize,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            scene_root: PathBuf::from("."),
            json_dir: None,
            cache_dir: None,
            scratch_dir: None,
            overwrite_converted: false,
            overwrite_element: false,
            archive_mode: ArchiveMode::Reference,
            jobs: 1,
        }
    }
}

impl BuildConfig {
    pub fn new(scene_root: impl Into<PathBuf>) -> Self {
        Self {
            scene_root: scene_root.into(),
            ..Self::default()
        }
    }

    /// Load from JSON. A relative `scene_root` is taken relative to the file's directory.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let mut config: BuildConfig = read_json(path)?;
        if config.scene_root.is_relative() {
            if let Some(parent) = path.parent() {
                config.scene_root = parent.join(&config.scene_root);
            }
        }
        Ok(config)
    }

    pub fn with_scene_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scene_root = root.into();
        self
    }

    pub fn with_json_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.json_dir = Some(dir.into());
        self
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    pub fn with_overwrite_converted(mut self, enabled: bool) -> Self {
        self.overwrite_converted = enabled;
        self
    }

    pub fn with_overwrite_element(mut self, enabled: bool) -> Self {
        self.overwrite_element = enabled;
        self
    }

    pub fn with_archive_mode(mut self, mode: ArchiveMode) -> Self {
        self.archive_mode = mode;
        self
    }

    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    pub fn json_dir(&self) -> PathBuf {
        self.under_root(self.json_dir.as_deref(), "json")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.under_root(self.cache_dir.as_deref(), "geo")
    }

    /// Resolve a descriptor path against the scene root.
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        self.scene_root.join(path)
    }

    /// `<json_dir>/<name>/<name>.json`
    pub fn descriptor_path(&self, element: &str) -> PathBuf {
        self.json_dir().join(element).join(format!("{element}.json"))
    }

    fn under_root(&self, dir: Option<&Path>, fallback: &str) -> PathBuf {
        match dir {
            Some(dir) => self.scene_root.join(dir),
            None => self.scene_root.join(fallback),
        }
    }
}
