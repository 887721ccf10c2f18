// src/conversion_cache.rs
//! Content-addressed conversion cache.
//!
//! Converts raw OBJ meshes into geometry artifacts under the cache root, once per source
//! path per process. The cache is shared by every element build (wrap it in an `Arc`); a
//! per-path lock makes [`ConversionCache::ensure_converted`] atomic, so two workers racing
//! on the same mesh produce a single artifact.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::io::BufWriter;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use tempfile::NamedTempFile;

use crate::config::BuildConfig;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::geometry::{Geometry, FACENUM_ATTRIB, HIER_ATTRIB, MATERIAL_ATTRIB};
use crate::json_io::read_json;
use crate::obj_loader::load_obj_file;
use crate::obj_reader::{ObjStreamCleaner, DEFAULT_GROUP};

/// Extension of converted artifacts.
pub const CONVERTED_EXT: &str = "geo.json";
/// Material name used for faces that had none in the source mesh.
pub const DEFAULT_MATERIAL: &str = "default";

/// Primitive count per group, in order of first appearance.
pub type GroupCounts = IndexMap<String, usize>;

#[derive(Clone, Debug, PartialEq)]
pub struct ConversionRecord {
    /// Source path as written in the descriptor.
    pub source: String,
    /// Derived artifact path.
    pub output: PathBuf,
    /// `None` when an existing artifact was reused without reading it.
    pub counts: Option<GroupCounts>,
    /// Element whose id prefixes the stamped materials, `None` for a reused artifact.
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub conversions: usize,
    pub reused: usize,
    pub records: usize,
}

pub struct ConversionCache {
    scene_root: PathBuf,
    cache_dir: PathBuf,
    scratch_dir: Option<PathBuf>,

    records: RwLock<HashMap<String, ConversionRecord>>,
    path_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,

    conversions: AtomicUsize,
    reused: AtomicUsize,
}

impl ConversionCache {
    pub fn new(config: &BuildConfig) -> Self {
        Self {
            scene_root: config.scene_root.clone(),
            cache_dir: config.cache_dir(),
            scratch_dir: config.scratch_dir.clone(),
            records: RwLock::new(HashMap::new()),
            path_locks: Mutex::new(HashMap::new()),
            conversions: AtomicUsize::new(0),
            reused: AtomicUsize::new(0),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// `X/Y.ext` → `<cache-root>/Y.geo.json`; the first path component is dropped.
    pub fn derived_path(&self, source: &str) -> Result<PathBuf> {
        let mut parts: Vec<&OsStr> = Path::new(source)
            .components()
            .filter_map(|c| match c {
                Component::Normal(s) => Some(s),
                _ => None,
            })
            .collect();
        if parts.len() > 1 {
            parts.remove(0);
        }
        let file = parts
            .pop()
            .ok_or_else(|| Error::InvalidDescriptor(format!("empty source path '{source}'")))?;
        let stem = Path::new(file)
            .file_stem()
            .unwrap_or(file)
            .to_string_lossy()
            .into_owned();

        let mut out = self.cache_dir.clone();
        out.extend(parts);
        out.push(format!("{stem}.{CONVERTED_EXT}"));
        Ok(out)
    }

    /// Convert `source` unless it was already handled in this run or, with `force` unset,
    /// an artifact already sits at its derived path.
    pub fn ensure_converted(
        &self,
        source: &str,
        element_id: &str,
        force: bool,
    ) -> Result<ConversionRecord> {
        if let Some(record) = self.lookup(source, element_id) {
            return Ok(record);
        }

        let lock = self.path_lock(source);
        let _guard = lock.lock();
        if let Some(record) = self.lookup(source, element_id) {
            return Ok(record);
        }

        let output = self.derived_path(source)?;
        let (counts, namespace) = if output.exists() && !force {
            debug!("Reusing converted {}", output.display());
            self.reused.fetch_add(1, Ordering::Relaxed);
            (None, None)
        } else {
            let input = self.scene_root.join(source);
            let counts = convert_obj(&input, &output, element_id, self.scratch_dir.as_deref())
                .with_context(|| format!("converting {source}"))?;
            self.conversions.fetch_add(1, Ordering::Relaxed);
            (Some(counts), Some(element_id.to_string()))
        };

        let record = ConversionRecord {
            source: source.to_string(),
            output,
            counts,
            namespace,
        };
        self.records
            .write()
            .insert(source.to_string(), record.clone());
        Ok(record)
    }

    /// Record from this run. The artifact keeps the namespace of the element that
    /// converted it first.
    fn lookup(&self, source: &str, element_id: &str) -> Option<ConversionRecord> {
        let record = self.records.read().get(source).cloned()?;
        if let Some(namespace) = record.namespace.as_deref().filter(|ns| *ns != element_id) {
            debug!("{element_id} reuses {source}, materials stay namespaced by {namespace}");
        }
        Some(record)
    }

    pub fn record(&self, source: &str) -> Option<ConversionRecord> {
        self.records.read().get(source).cloned()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            conversions: self.conversions.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            records: self.records.read().len(),
        }
    }

    fn path_lock(&self, source: &str) -> Arc<Mutex<()>> {
        self.path_locks
            .lock()
            .entry(source.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Clean `input`, load it, de-double it if provably doubled, stamp per-primitive
/// attributes and save to `output`. Returns the per-group primitive counts.
pub fn convert_obj(
    input: &Path,
    output: &Path,
    element_id: &str,
    scratch_dir: Option<&Path>,
) -> Result<GroupCounts> {
    info!("Converting {} to {}", input.display(), output.display());
    if !input.exists() {
        return Err(Error::MissingSource(input.to_path_buf()));
    }
    let hier = load_hier(input);

    // The scratch file is removed when `scratch` drops, on success and on every error path.
    let mut scratch = scratch_file(scratch_dir)?;
    let mut cleaner = ObjStreamCleaner::open(input)?;
    cleaner
        .clean_into(BufWriter::new(scratch.as_file_mut()))
        .with_context(|| format!("writing cleaned {}", input.display()))?;
    let report = cleaner.finish();
    debug!(
        "Groups in {}: {}",
        input.display(),
        report.group_names().collect::<Vec<_>>().join(", ")
    );
    let mut geo = load_obj_file(scratch.path())?;
    drop(scratch);

    let num_prims = geo.num_prims();
    if report.doubled() {
        if num_prims % 2 == 0 {
            warn!("Duplicate geo detected in {}, cleaning!", input.display());
            geo.delete_prims_from(num_prims / 2);
        } else {
            warn!(
                "Duplicate geo detected in {} but it has an odd primitive count ({}), leaving it",
                input.display(),
                num_prims
            );
        }
    } else if report.ambiguous_duplicates() {
        warn!(
            "{} of {} vertex blocks in {} are duplicates, leaving geometry unmodified",
            report.duplicate_blocks,
            report.vertex_blocks,
            input.display()
        );
    }

    let counts = stamp_prims(&mut geo, &report, element_id, hier.as_ref());

    info!("Saving out {}", output.display());
    geo.save(output)?;
    Ok(counts)
}

fn stamp_prims(
    geo: &mut Geometry,
    report: &crate::obj_reader::CleanReport,
    element_id: &str,
    hier: Option<&HashMap<String, String>>,
) -> GroupCounts {
    let mut counts = GroupCounts::new();
    for (i, prim) in geo.prims_mut().iter_mut().enumerate() {
        let group = report.prim_group(i).unwrap_or(DEFAULT_GROUP);
        let facenum = match counts.get_mut(group) {
            Some(count) => {
                *count += 1;
                *count - 1
            }
            None => {
                counts.insert(group.to_string(), 1);
                0
            }
        };

        let material = prim
            .str_attrib(MATERIAL_ATTRIB)
            .map(material_basename)
            .unwrap_or(DEFAULT_MATERIAL);
        let element_material = format!("{element_id}.{material}");

        prim.set_name(group);
        prim.set_attrib(FACENUM_ATTRIB, facenum as i64);
        prim.set_attrib(MATERIAL_ATTRIB, element_material);
        if let Some(path) = hier.and_then(|h| h.get(group)) {
            prim.set_attrib(HIER_ATTRIB, path.as_str());
        }
    }
    counts
}

fn material_basename(material: &str) -> &str {
    material.rsplit('/').next().unwrap_or(material)
}

fn scratch_file(dir: Option<&Path>) -> Result<NamedTempFile> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("clean_").suffix(".obj");
    match dir {
        Some(dir) => builder.tempfile_in(dir).map_err(|e| Error::io(dir, e)),
        None => builder
            .tempfile()
            .map_err(|e| Error::io(std::env::temp_dir(), e)),
    }
}

/// Optional `<mesh>.hier` sidecar: group name → hierarchy path.
fn load_hier(input: &Path) -> Option<HashMap<String, String>> {
    let path = input.with_extension("hier");
    if !path.exists() {
        return None;
    }
    match read_json(&path) {
        Ok(map) => Some(map),
        Err(e) => {
            warn!("Ignoring unreadable hierarchy file: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const MESH: &str = "\
mtllib leaf.mtl
v 0 0 0
v 1 0 0
v 1 1 0
v 0 1 0
g stem
usemtl /shop/bark
f 1 2 3
g leaf
usemtl leafMat
f 1 3 4
f 2 3 4
";

    fn setup(mesh: &str) -> (TempDir, ConversionCache) {
        let dir = tempfile::tempdir().unwrap();
        let obj = dir.path().join("obj/plant");
        fs::create_dir_all(&obj).unwrap();
        fs::write(obj.join("plant.obj"), mesh).unwrap();
        let config = BuildConfig::new(dir.path());
        let cache = ConversionCache::new(&config);
        (dir, cache)
    }

    #[test]
    fn test_derived_path_drops_first_component() {
        let (dir, cache) = setup(MESH);
        let derived = cache.derived_path("obj/plant/plant.obj").unwrap();
        assert_eq!(
            derived,
            dir.path().join("geo").join("plant").join("plant.geo.json")
        );
        let single = cache.derived_path("rock.obj").unwrap();
        assert_eq!(single, dir.path().join("geo").join("rock.geo.json"));
        assert!(cache.derived_path("").is_err());
    }

    #[test]
    fn test_conversion_stamps_attributes() {
        let (_dir, cache) = setup(MESH);
        let record = cache
            .ensure_converted("obj/plant/plant.obj", "isPlant", false)
            .unwrap();
        let counts = record.counts.clone().unwrap();
        assert_eq!(counts["stem"], 1);
        assert_eq!(counts["leaf"], 2);
        assert_eq!(counts.keys().collect::<Vec<_>>(), vec!["stem", "leaf"]);

        let geo = Geometry::load(&record.output).unwrap();
        assert_eq!(geo.num_prims(), 3);
        let p0 = &geo.prims()[0];
        assert_eq!(p0.name(), Some("stem"));
        assert_eq!(p0.str_attrib(MATERIAL_ATTRIB), Some("isPlant.bark"));
        let p2 = &geo.prims()[2];
        assert_eq!(p2.name(), Some("leaf"));
        assert_eq!(p2.attrib(FACENUM_ATTRIB).and_then(|v| v.as_int()), Some(1));
        assert_eq!(p2.str_attrib(MATERIAL_ATTRIB), Some("isPlant.leafMat"));
    }

    #[test]
    fn test_ensure_converted_is_idempotent() {
        let (_dir, cache) = setup(MESH);
        let first = cache.ensure_converted("obj/plant/plant.obj", "e", false).unwrap();
        let modified = fs::metadata(&first.output).unwrap().modified().unwrap();
        let second = cache.ensure_converted("obj/plant/plant.obj", "e", false).unwrap();
        assert_eq!(first, second);
        assert_eq!(cache.stats().conversions, 1);
        assert_eq!(
            fs::metadata(&second.output).unwrap().modified().unwrap(),
            modified
        );
    }

    #[test]
    fn test_existing_artifact_is_reused_without_counts() {
        let (dir, cache) = setup(MESH);
        cache.ensure_converted("obj/plant/plant.obj", "e", false).unwrap();

        let config = BuildConfig::new(dir.path());
        let fresh = ConversionCache::new(&config);
        let record = fresh.ensure_converted("obj/plant/plant.obj", "e", false).unwrap();
        assert!(record.counts.is_none());
        assert_eq!(fresh.stats().conversions, 0);
        assert_eq!(fresh.stats().reused, 1);

        let forced = ConversionCache::new(&config);
        let record = forced.ensure_converted("obj/plant/plant.obj", "e", true).unwrap();
        assert!(record.counts.is_some());
        assert_eq!(forced.stats().conversions, 1);
    }

    #[test]
    fn test_doubled_mesh_loses_back_half() {
        let half = "v 0 0 0\nv 1 0 0\nv 0 1 0\ng tri\nf 1 2 3\nf 3 2 1\n";
        let (_dir, cache) = setup(&format!("{half}{half}"));
        let record = cache.ensure_converted("obj/plant/plant.obj", "e", false).unwrap();
        let geo = Geometry::load(&record.output).unwrap();
        assert_eq!(geo.num_prims(), 2);
        assert_eq!(record.counts.unwrap()["tri"], 2);
    }

    #[test]
    fn test_clean_mesh_keeps_every_prim() {
        let (_dir, cache) = setup(MESH);
        let record = cache.ensure_converted("obj/plant/plant.obj", "e", false).unwrap();
        assert_eq!(Geometry::load(&record.output).unwrap().num_prims(), 3);
    }

    #[test]
    fn test_ambiguous_duplicates_are_left_alone() {
        let a = "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n";
        let b = "v 5 0 0\nv 6 0 0\nv 5 1 0\nf 4 5 6\n";
        let text = format!("{a}{b}{a}{a}{a}");
        let (_dir, cache) = setup(&text);
        let record = cache.ensure_converted("obj/plant/plant.obj", "e", false).unwrap();
        assert_eq!(Geometry::load(&record.output).unwrap().num_prims(), 5);
    }

    #[test]
    fn test_hier_sidecar() {
        let (dir, cache) = setup(MESH);
        fs::write(
            dir.path().join("obj/plant/plant.hier"),
            r#"{"leaf": "/plant/leaves"}"#,
        )
        .unwrap();
        let record = cache.ensure_converted("obj/plant/plant.obj", "e", false).unwrap();
        let geo = Geometry::load(&record.output).unwrap();
        assert_eq!(geo.prims()[1].str_attrib(HIER_ATTRIB), Some("/plant/leaves"));
        assert_eq!(geo.prims()[0].str_attrib(HIER_ATTRIB), None);
    }

    #[test]
    fn test_missing_source_is_an_error() {
        let (_dir, cache) = setup(MESH);
        let err = cache
            .ensure_converted("obj/plant/absent.obj", "e", false)
            .unwrap_err();
        assert!(matches!(err.root(), Error::MissingSource(_)));
        assert!(cache.record("obj/plant/absent.obj").is_none());
    }

    #[test]
    fn test_scratch_files_are_removed() {
        let (dir, _cache) = setup(MESH);
        let scratch = dir.path().join("scratch");
        fs::create_dir_all(&scratch).unwrap();
        convert_obj(
            &dir.path().join("obj/plant/plant.obj"),
            &dir.path().join("out.geo.json"),
            "e",
            Some(&scratch),
        )
        .unwrap();
        assert_eq!(fs::read_dir(&scratch).unwrap().count(), 0);

        let bad = dir.path().join("obj/plant/bad.obj");
        fs::write(&bad, "v 0 0 0\nf 1 2 9\n").unwrap();
        assert!(convert_obj(&bad, &dir.path().join("bad.geo.json"), "e", Some(&scratch)).is_err());
        assert_eq!(fs::read_dir(&scratch).unwrap().count(), 0);
    }

    #[test]
    fn test_tab_separated_face_keeps_group_numbering() {
        let (_dir, cache) = setup("v 0 0 0\nv 1 0 0\nv 0 1 0\ng first\nf\t1 2 3\ng second\nf 1 2 3\n");
        let record = cache.ensure_converted("obj/plant/plant.obj", "e", false).unwrap();
        let counts = record.counts.unwrap();
        assert_eq!(counts.keys().collect::<Vec<_>>(), vec!["first", "second"]);

        let geo = Geometry::load(&record.output).unwrap();
        let names: Vec<_> = geo.prims().iter().map(|p| p.name()).collect();
        assert_eq!(names, vec![Some("first"), Some("second")]);
    }

    #[test]
    fn test_non_utf8_comment_converts() {
        let dir = tempfile::tempdir().unwrap();
        let obj = dir.path().join("obj/plant");
        fs::create_dir_all(&obj).unwrap();
        let mut bytes = b"# caf\xE9\n".to_vec();
        bytes.extend_from_slice(MESH.as_bytes());
        fs::write(obj.join("plant.obj"), bytes).unwrap();

        let cache = ConversionCache::new(&BuildConfig::new(dir.path()));
        let record = cache.ensure_converted("obj/plant/plant.obj", "e", false).unwrap();
        assert_eq!(Geometry::load(&record.output).unwrap().num_prims(), 3);
    }

    #[test]
    fn test_first_converter_owns_the_namespace() {
        let (_dir, cache) = setup(MESH);
        let first = cache.ensure_converted("obj/plant/plant.obj", "isPlant", false).unwrap();
        let second = cache.ensure_converted("obj/plant/plant.obj", "isOther", false).unwrap();
        assert_eq!(first.namespace.as_deref(), Some("isPlant"));
        assert_eq!(second.namespace.as_deref(), Some("isPlant"));
        let geo = Geometry::load(&second.output).unwrap();
        assert_eq!(geo.prims()[0].str_attrib(MATERIAL_ATTRIB), Some("isPlant.bark"));
    }

    #[test]
    fn test_concurrent_callers_convert_once() {
        let (_dir, cache) = setup(MESH);
        let cache = Arc::new(cache);
        crossbeam::scope(|s| {
            for _ in 0..4 {
                let cache = Arc::clone(&cache);
                s.spawn(move |_| {
                    cache
                        .ensure_converted("obj/plant/plant.obj", "e", false)
                        .unwrap();
                });
            }
        })
        .unwrap();
        assert_eq!(cache.stats().conversions, 1);
        assert_eq!(cache.stats().records, 1);
    }
}
