// src/scene_assembler.rs
//! Scene-level driver: discovers element descriptors and builds each element.
//!
//! Elements are independent apart from explicit nested references, so a failing element is
//! recorded and the run moves on. A cyclic nested reference aborts the whole run. With
//! `jobs > 1` elements are spread over scoped worker threads sharing one conversion cache.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam::channel;
use log::{error, info, warn};

use crate::config::BuildConfig;
use crate::conversion_cache::ConversionCache;
use crate::element::{Element, ElementAssembler, SaveOutcome};
use crate::error::{Error, Result};

/// Directories under the descriptor root that never hold elements.
pub const RESERVED_DIRS: &[&str] = &["lights", "cameras"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    pub written: Vec<String>,
    pub skipped: Vec<String>,
    /// Element name and the error that stopped it.
    pub failed: Vec<(String, String)>,
    /// Set when the run stopped early on the cancel flag.
    pub cancelled: bool,
}

impl BuildReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && !self.cancelled
    }

    pub fn total(&self) -> usize {
        self.written.len() + self.skipped.len() + self.failed.len()
    }

    /// Fold one element result in. Only a cyclic reference is returned as an error.
    fn record(&mut self, name: String, result: Result<SaveOutcome>) -> Result<()> {
        match result {
            Ok(SaveOutcome::Written(_)) => self.written.push(name),
            Ok(SaveOutcome::Skipped(_)) => self.skipped.push(name),
            Err(e) if e.is_cycle() => {
                error!("Aborting build, {name}: {e}");
                return Err(e);
            }
            Err(e) if e.is_cancelled() => {
                warn!("Build of {name} cancelled");
                self.cancelled = true;
            }
            Err(e) => {
                error!("Failed to build {name}: {e}");
                self.failed.push((name, e.to_string()));
            }
        }
        Ok(())
    }

    fn sort(&mut self) {
        self.written.sort();
        self.skipped.sort();
        self.failed.sort();
    }
}

pub struct SceneAssembler {
    config: BuildConfig,
    cache: Arc<ConversionCache>,
    cancel: Arc<AtomicBool>,
}

impl SceneAssembler {
    pub fn new(config: BuildConfig) -> Self {
        let cache = Arc::new(ConversionCache::new(&config));
        Self::with_cache(config, cache)
    }

    pub fn with_cache(config: BuildConfig, cache: Arc<ConversionCache>) -> Self {
        Self {
            config,
            cache,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<ConversionCache> {
        &self.cache
    }

    /// Setting the flag stops the run before the next element starts.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// `(name, descriptor path)` for every `<json-root>/<name>/<name>.json`, sorted by name.
    pub fn discover(&self) -> Result<Vec<(String, PathBuf)>> {
        let root = self.config.json_dir();
        let entries = fs::read_dir(&root).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::MissingSource(root.clone())
            } else {
                Error::io(&root, e)
            }
        })?;

        let mut found = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::io(&root, e))?;
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if RESERVED_DIRS.contains(&name.as_str()) {
                continue;
            }
            let descriptor = entry.path().join(format!("{name}.json"));
            if descriptor.exists() {
                found.push((name, descriptor));
            }
        }
        found.sort();
        info!("Found {} elements under {}", found.len(), root.display());
        Ok(found)
    }

    pub fn build_element(&self, path: &Path) -> Result<SaveOutcome> {
        let element = Element::load(path, &self.config)?;
        ElementAssembler::new(&self.config, &self.cache, element)
            .with_cancel_flag(self.cancel_flag())
            .save_geo()
    }

    pub fn build_all(&self) -> Result<BuildReport> {
        let targets = self.discover()?;
        self.build_targets(targets)
    }

    /// Build only the named elements.
    pub fn build_named<S: AsRef<str>>(&self, names: &[S]) -> Result<BuildReport> {
        let targets = names
            .iter()
            .map(|n| {
                let name = n.as_ref().to_string();
                let path = self.config.descriptor_path(&name);
                (name, path)
            })
            .collect();
        self.build_targets(targets)
    }

    fn build_target(&self, name: &str, path: &Path) -> Result<SaveOutcome> {
        if !path.exists() {
            return Err(Error::UnknownElement(name.to_string()));
        }
        self.build_element(path)
    }

    fn build_targets(&self, targets: Vec<(String, PathBuf)>) -> Result<BuildReport> {
        let mut report = if self.config.jobs > 1 && targets.len() > 1 {
            self.build_parallel(targets)?
        } else {
            self.build_sequential(targets)?
        };
        report.sort();

        let stats = self.cache.stats();
        info!(
            "Built {} elements ({} skipped, {} failed), {} meshes converted, {} reused",
            report.written.len(),
            report.skipped.len(),
            report.failed.len(),
            stats.conversions,
            stats.reused
        );
        Ok(report)
    }

    fn build_sequential(&self, targets: Vec<(String, PathBuf)>) -> Result<BuildReport> {
        let mut report = BuildReport::default();
        for (name, path) in targets {
            if self.cancel.load(Ordering::Relaxed) {
                report.cancelled = true;
                break;
            }
            let result = self.build_target(&name, &path);
            report.record(name, result)?;
        }
        Ok(report)
    }

    fn build_parallel(&self, targets: Vec<(String, PathBuf)>) -> Result<BuildReport> {
        let workers = self.config.jobs.min(targets.len());
        info!("Building {} elements on {} workers", targets.len(), workers);

        let (job_tx, job_rx) = channel::unbounded::<(String, PathBuf)>();
        for target in targets {
            // The receiver is alive, so this can not fail.
            let _ = job_tx.send(target);
        }
        drop(job_tx);

        let abort = AtomicBool::new(false);
        let (result_tx, result_rx) = channel::unbounded::<(String, Result<SaveOutcome>)>();
        let mut report = BuildReport::default();
        let mut fatal = None;

        crossbeam::scope(|s| {
            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                let abort = &abort;
                s.spawn(move |_| {
                    for (name, path) in job_rx.iter() {
                        if abort.load(Ordering::Relaxed) || self.cancel.load(Ordering::Relaxed) {
                            break;
                        }
                        let result = self.build_target(&name, &path);
                        if matches!(&result, Err(e) if e.is_cycle()) {
                            abort.store(true, Ordering::Relaxed);
                        }
                        if result_tx.send((name, result)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(result_tx);

            for (name, result) in result_rx.iter() {
                if let Err(e) = report.record(name, result) {
                    if fatal.is_none() {
                        fatal = Some(e);
                    }
                }
            }
        })
        .map_err(|_| Error::msg("element worker panicked"))?;

        if let Some(e) = fatal {
            return Err(e);
        }
        if self.cancel.load(Ordering::Relaxed) {
            report.cancelled = true;
        }
        Ok(report)
    }
}
