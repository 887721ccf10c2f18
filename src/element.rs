// src/element.rs
//! Element loading and assembly.
//!
//! [`ElementAssembler`] builds one element in one of two modes: the top-level element
//! (`variant = None`: base geometry plus every instanced copy) or a single variant
//! (`Some(name)`, used by nested element references). `"base"` names the element's own
//! descriptor placed at identity.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{info, warn};

use crate::config::BuildConfig;
use crate::context::Context;
use crate::conversion_cache::{ConversionCache, ConversionRecord, CONVERTED_EXT};
use crate::descriptor::{ElementDescriptor, GeometryDescriptor};
use crate::error::{Error, Result};
use crate::geometry::Geometry;
use crate::instancer::build_instanced_prims;
use crate::json_io::write_json_atomic;
use crate::materials::{MaterialResolver, MaterialTable};
use crate::transform::Transform;

/// A loaded element descriptor together with its material resolver.
pub struct Element {
    descriptor: ElementDescriptor,
    resolver: MaterialResolver,
}

impl Element {
    pub fn load(path: &Path, config: &BuildConfig) -> Result<Self> {
        info!("Loading {}", path.display());
        let descriptor = ElementDescriptor::load(path)?;
        let table = MaterialTable::load(&config.resolve(&descriptor.mat_file))
            .with_context(|| format!("loading materials for {}", descriptor.name))?;
        Ok(Self {
            descriptor,
            resolver: MaterialResolver::new(table),
        })
    }

    /// Load `<json-root>/<name>/<name>.json`.
    pub fn load_by_name(config: &BuildConfig, name: &str) -> Result<Self> {
        let path = config.descriptor_path(name);
        if !path.exists() {
            return Err(Error::UnknownElement(name.to_string()));
        }
        Self::load(&path, config)
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &ElementDescriptor {
        &self.descriptor
    }

    pub fn resolver(&self) -> &MaterialResolver {
        &self.resolver
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Written(PathBuf),
    /// The artifact already existed and overwriting was off.
    Skipped(PathBuf),
}

impl SaveOutcome {
    pub fn path(&self) -> &Path {
        match self {
            SaveOutcome::Written(p) | SaveOutcome::Skipped(p) => p,
        }
    }
}

pub struct ElementAssembler<'a> {
    config: &'a BuildConfig,
    cache: &'a ConversionCache,
    element: Element,
    /// Elements currently being built, outermost first, ending with this one.
    chain: Vec<String>,
    cancel: Option<Arc<AtomicBool>>,
}

impl<'a> ElementAssembler<'a> {
    pub fn new(config: &'a BuildConfig, cache: &'a ConversionCache, element: Element) -> Self {
        let chain = vec![element.name().to_string()];
        Self {
            config,
            cache,
            element,
            chain,
            cancel: None,
        }
    }

    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn name(&self) -> &str {
        self.element.name()
    }

    pub fn element(&self) -> &Element {
        &self.element
    }

    pub fn config(&self) -> &BuildConfig {
        self.config
    }

    pub fn resolver(&self) -> &MaterialResolver {
        &self.element.resolver
    }

    /// `<cache-root>/<element>.geo.json`
    pub fn element_path(&self) -> PathBuf {
        self.config
            .cache_dir()
            .join(format!("{}.{}", self.name(), CONVERTED_EXT))
    }

    /// `<cache-root>/<element>.materials.json`
    pub fn materials_path(&self) -> PathBuf {
        self.config
            .cache_dir()
            .join(format!("{}.materials.json", self.name()))
    }

    pub fn convert(&self, source: &str) -> Result<ConversionRecord> {
        self.cache
            .ensure_converted(source, self.name(), self.config.overwrite_converted)
    }

    pub(crate) fn check_cancelled(&self) -> Result<()> {
        match &self.cancel {
            Some(flag) if flag.load(Ordering::Relaxed) => Err(Error::Cancelled),
            _ => Ok(()),
        }
    }

    /// Assembler for a nested element reference. Fails when `name` is already being built.
    pub(crate) fn nested(&self, name: &str) -> Result<ElementAssembler<'a>> {
        if self.chain.iter().any(|n| n == name) {
            let mut cycle = self.chain.clone();
            cycle.push(name.to_string());
            return Err(Error::CyclicReference(cycle));
        }
        let element = Element::load_by_name(self.config, name)
            .with_context(|| format!("nested element of {}", self.name()))?;
        let mut chain = self.chain.clone();
        chain.push(name.to_string());
        Ok(ElementAssembler {
            config: self.config,
            cache: self.cache,
            element,
            chain,
            cancel: self.cancel.clone(),
        })
    }

    /// Base mesh as one named reference primitive, merged with every instanced primitive
    /// subtree, packed into one named primitive at the descriptor's transform.
    pub fn build_geo(&self, name: &str, desc: &GeometryDescriptor) -> Result<Geometry> {
        info!("Building geo for {}", name);
        let record = self.convert(desc.mesh(&self.element.descriptor))?;

        let mut base = Geometry::new();
        let prim = base.add_packed_disk(record.output, Transform::IDENTITY);
        base.prims_mut()[prim].set_name(name);

        for (prim_name, prim_desc) in &desc.instanced_primitive_json_files {
            let prims = build_instanced_prims(self, prim_name, prim_desc)
                .with_context(|| format!("instanced prims {prim_name} of {}", self.name()))?;
            base.merge(prims);
        }

        Ok(base.pack(Some(name), Some(desc.transform())))
    }

    pub fn build_element_geo(&self, variant: Option<&str>) -> Result<Geometry> {
        info!("Building element geo for {}", self.name());
        let descriptor = &self.element.descriptor;
        let desc = descriptor.geometry_for(variant)?;

        if let Some(variant) = variant {
            info!("Constructing variant {}", variant);
            return self.build_geo(variant, &desc);
        }

        let geo = self.build_geo(self.name(), &desc)?;

        let mut copies = Geometry::new();
        for (copy_name, copy) in &descriptor.instanced_copies {
            self.check_cancelled()?;
            info!("Creating instance copy for {}", copy_name);
            if copy.has_overrides() {
                copies.merge(self.build_geo(copy_name, copy)?);
            } else {
                let mut dup = geo.clone();
                dup.stamp(copy_name, copy.transform());
                copies.merge(dup);
            }
        }

        let mut out = geo;
        out.merge(copies);
        Ok(out)
    }

    /// Build and persist the element artifact and its material bindings. Nothing is
    /// written unless the whole element built.
    pub fn save_geo(&self) -> Result<SaveOutcome> {
        let path = self.element_path();
        if path.exists() && !self.config.overwrite_element {
            warn!("Skipping existing Element: {}", self.name());
            return Ok(SaveOutcome::Skipped(path));
        }

        let geo = self.build_element_geo(None)?;
        self.check_cancelled()?;

        info!("Saving Element to {}", path.display());
        geo.save(&path)?;
        let bindings = self.element.resolver.table().bindings(self.name());
        write_json_atomic(&self.materials_path(), &bindings)
            .context("writing material bindings")?;
        Ok(SaveOutcome::Written(path))
    }
}
