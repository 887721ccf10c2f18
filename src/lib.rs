// src/lib.rs
//! Build-time scene assembly.
//!
//! Turns a tree of element descriptors plus raw OBJ meshes and curve payloads into one
//! packed geometry artifact per element, with names, transforms and namespaced material
//! bindings. Meshes are cleaned and converted once into a shared cache; archives, curves and
//! nested elements are expanded into instanced subtrees.
//!
//! ```no_run
//! use scene_forge::{BuildConfig, SceneAssembler};
//!
//! let scene = SceneAssembler::new(BuildConfig::new("/data/island").with_jobs(4));
//! let report = scene.build_all()?;
//! assert!(report.is_success());
//! # Ok::<(), scene_forge::Error>(())
//! ```

pub mod config;
pub mod context;
pub mod conversion_cache;
pub mod descriptor;
pub mod element;
pub mod error;
pub mod geometry;
pub mod instancer;
pub mod json_io;
pub mod materials;
pub mod obj_loader;
pub mod obj_reader;
pub mod scene_assembler;
pub mod transform;

pub use config::{ArchiveMode, BuildConfig};
pub use conversion_cache::{ConversionCache, ConversionRecord};
pub use descriptor::{ElementDescriptor, GeometryDescriptor, InstancedPrimDescriptor};
pub use element::{Element, ElementAssembler, SaveOutcome};
pub use error::{Error, Result};
pub use geometry::{AttribValue, Geometry, PrimKind, Primitive};
pub use materials::{MaterialResolver, MaterialTable};
pub use scene_assembler::{BuildReport, SceneAssembler};
pub use transform::Transform;
