// src/geometry.rs
//! In-memory geometry container.
//!
//! A [`Geometry`] owns points and primitives. Primitives are polygons, B-spline curves,
//! packed primitives (an owned subtree placed by a transform) or packed-disk primitives (a
//! reference to an artifact on disk placed by a transform). Every primitive carries an
//! ordered table of named attributes and, for curves, named per-vertex float attributes.
//!
//! Ownership is the merge discipline: [`Geometry::merge`] and [`Geometry::pack`] take their
//! input by value, so a child that has been folded into a parent can not be read again.
//! Stamping the same subtree several times is done on explicit clones.

use std::path::{Path, PathBuf};

use glam::Vec3;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::json_io::{read_json, write_json_atomic};
use crate::transform::Transform;

/// Primitive attribute holding the logical instance / group name.
pub const NAME_ATTRIB: &str = "name";
/// Running per-group face counter stamped during conversion.
pub const FACENUM_ATTRIB: &str = "facenum";
/// Material binding of a primitive.
pub const MATERIAL_ATTRIB: &str = "material_path";
/// Hierarchy path from an optional `.hier` sidecar.
pub const HIER_ATTRIB: &str = "hier";
/// Per-vertex curve width.
pub const WIDTH_ATTRIB: &str = "width";
pub const FACE_CAMERA_ATTRIB: &str = "face_camera";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum AttribValue {
    Int(i64),
    Float(f64),
    Str(String),
}

impl AttribValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttribValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttribValue::Int(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<&str> for AttribValue {
    fn from(s: &str) -> Self {
        AttribValue::Str(s.to_string())
    }
}

impl From<String> for AttribValue {
    fn from(s: String) -> Self {
        AttribValue::Str(s)
    }
}

impl From<i64> for AttribValue {
    fn from(v: i64) -> Self {
        AttribValue::Int(v)
    }
}

impl From<f64> for AttribValue {
    fn from(v: f64) -> Self {
        AttribValue::Float(v)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PrimKind {
    Polygon {
        vertices: Vec<u32>,
    },
    BSpline {
        vertices: Vec<u32>,
        order: u32,
        knots: Vec<f32>,
    },
    /// Combined-representation primitive; pivot at the origin.
    Packed {
        geometry: Box<Geometry>,
        transform: Transform,
    },
    /// Reference instance of an on-disk artifact.
    PackedDisk {
        path: PathBuf,
        transform: Transform,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Primitive {
    pub kind: PrimKind,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub attribs: IndexMap<String, AttribValue>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub vertex_attribs: IndexMap<String, Vec<f32>>,
}

impl Primitive {
    pub fn new(kind: PrimKind) -> Self {
        Self {
            kind,
            attribs: IndexMap::new(),
            vertex_attribs: IndexMap::new(),
        }
    }

    pub fn set_attrib(&mut self, name: &str, value: impl Into<AttribValue>) {
        self.attribs.insert(name.to_string(), value.into());
    }

    pub fn attrib(&self, name: &str) -> Option<&AttribValue> {
        self.attribs.get(name)
    }

    pub fn str_attrib(&self, name: &str) -> Option<&str> {
        self.attrib(name).and_then(AttribValue::as_str)
    }

    pub fn name(&self) -> Option<&str> {
        self.str_attrib(NAME_ATTRIB)
    }

    pub fn set_name(&mut self, name: &str) {
        self.set_attrib(NAME_ATTRIB, name);
    }

    pub fn is_packed(&self) -> bool {
        matches!(
            self.kind,
            PrimKind::Packed { .. } | PrimKind::PackedDisk { .. }
        )
    }

    /// Placement of a packed primitive; `None` for polygons and curves.
    pub fn transform(&self) -> Option<Transform> {
        match &self.kind {
            PrimKind::Packed { transform, .. } | PrimKind::PackedDisk { transform, .. } => {
                Some(*transform)
            }
            _ => None,
        }
    }

    /// Returns false when the primitive can not carry a transform.
    pub fn set_transform(&mut self, xform: Transform) -> bool {
        match &mut self.kind {
            PrimKind::Packed { transform, .. } | PrimKind::PackedDisk { transform, .. } => {
                *transform = xform;
                true
            }
            _ => false,
        }
    }

    pub fn packed_geometry(&self) -> Option<&Geometry> {
        match &self.kind {
            PrimKind::Packed { geometry, .. } => Some(geometry),
            _ => None,
        }
    }

    pub fn disk_path(&self) -> Option<&Path> {
        match &self.kind {
            PrimKind::PackedDisk { path, .. } => Some(path),
            _ => None,
        }
    }

    pub fn vertices(&self) -> &[u32] {
        match &self.kind {
            PrimKind::Polygon { vertices } | PrimKind::BSpline { vertices, .. } => {
                vertices.as_slice()
            }
            _ => &[],
        }
    }

    fn offset_vertices(&mut self, offset: u32) {
        if let PrimKind::Polygon { vertices } | PrimKind::BSpline { vertices, .. } =
            &mut self.kind
        {
            for v in vertices.iter_mut() {
                *v += offset;
            }
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    #[serde(default)]
    points: Vec<Vec3>,
    #[serde(default)]
    prims: Vec<Primitive>,
}

impl Geometry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.prims.is_empty() && self.points.is_empty()
    }

    pub fn num_points(&self) -> usize {
        self.points.len()
    }

    pub fn num_prims(&self) -> usize {
        self.prims.len()
    }

    pub fn points(&self) -> &[Vec3] {
        &self.points
    }

    pub fn prims(&self) -> &[Primitive] {
        &self.prims
    }

    pub fn prims_mut(&mut self) -> &mut [Primitive] {
        &mut self.prims
    }

    pub fn prim(&self, index: usize) -> Option<&Primitive> {
        self.prims.get(index)
    }

    pub fn add_point(&mut self, position: Vec3) -> u32 {
        self.points.push(position);
        (self.points.len() - 1) as u32
    }

    pub fn add_prim(&mut self, prim: Primitive) -> usize {
        self.prims.push(prim);
        self.prims.len() - 1
    }

    pub fn add_polygon(&mut self, vertices: Vec<u32>) -> usize {
        self.add_prim(Primitive::new(PrimKind::Polygon { vertices }))
    }

    /// Adds the control points and a uniform B-spline of the given order over them.
    pub fn add_bspline(&mut self, control_points: &[Vec3], order: u32) -> usize {
        let vertices = control_points.iter().map(|p| self.add_point(*p)).collect();
        let knots = uniform_knots(control_points.len(), order);
        self.add_prim(Primitive::new(PrimKind::BSpline {
            vertices,
            order,
            knots,
        }))
    }

    pub fn add_packed_disk(&mut self, path: impl Into<PathBuf>, transform: Transform) -> usize {
        self.add_prim(Primitive::new(PrimKind::PackedDisk {
            path: path.into(),
            transform,
        }))
    }

    /// Deletes every primitive with index `>= start`, then drops points nothing references.
    pub fn delete_prims_from(&mut self, start: usize) {
        if start >= self.prims.len() {
            return;
        }
        self.prims.truncate(start);
        self.remove_unused_points();
    }

    fn remove_unused_points(&mut self) {
        let mut used = vec![false; self.points.len()];
        for prim in &self.prims {
            for &v in prim.vertices() {
                if let Some(slot) = used.get_mut(v as usize) {
                    *slot = true;
                }
            }
        }
        let mut remap = vec![u32::MAX; self.points.len()];
        let mut kept = Vec::with_capacity(self.points.len());
        for (i, p) in self.points.iter().enumerate() {
            if used[i] {
                remap[i] = kept.len() as u32;
                kept.push(*p);
            }
        }
        self.points = kept;
        for prim in &mut self.prims {
            if let PrimKind::Polygon { vertices } | PrimKind::BSpline { vertices, .. } =
                &mut prim.kind
            {
                for v in vertices.iter_mut() {
                    *v = remap[*v as usize];
                }
            }
        }
    }

    /// Fold `other` into `self`. `other` is consumed.
    pub fn merge(&mut self, other: Geometry) {
        let offset = self.points.len() as u32;
        self.points.extend(other.points);
        self.prims.reserve(other.prims.len());
        for mut prim in other.prims {
            prim.offset_vertices(offset);
            self.prims.push(prim);
        }
    }

    /// Wrap the whole container into a single packed primitive, optionally named and placed.
    pub fn pack(self, name: Option<&str>, transform: Option<Transform>) -> Geometry {
        let mut prim = Primitive::new(PrimKind::Packed {
            geometry: Box::new(self),
            transform: Transform::or_identity(transform),
        });
        if let Some(name) = name {
            prim.set_name(name);
        }
        let mut packed = Geometry::new();
        packed.add_prim(prim);
        packed
    }

    /// Set `name` on every primitive and place every packed primitive at `transform`.
    pub fn stamp(&mut self, name: &str, transform: Transform) {
        for prim in &mut self.prims {
            prim.set_name(name);
            prim.set_transform(transform);
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, self)
    }

    pub fn load(path: &Path) -> Result<Geometry> {
        read_json(path)
    }
}

/// Uniform knot vector for `num_points` control points of the given order.
pub fn uniform_knots(num_points: usize, order: u32) -> Vec<f32> {
    let count = num_points + order as usize;
    if count < 2 {
        return vec![0.0; count];
    }
    let last = (count - 1) as f32;
    (0..count).map(|i| i as f32 / last).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle(geo: &mut Geometry, base: f32) -> usize {
        let a = geo.add_point(Vec3::new(base, 0.0, 0.0));
        let b = geo.add_point(Vec3::new(base + 1.0, 0.0, 0.0));
        let c = geo.add_point(Vec3::new(base, 1.0, 0.0));
        geo.add_polygon(vec![a, b, c])
    }

    #[test]
    fn test_merge_offsets_point_indices() {
        let mut a = Geometry::new();
        triangle(&mut a, 0.0);
        let mut b = Geometry::new();
        triangle(&mut b, 10.0);

        a.merge(b);
        assert_eq!(a.num_prims(), 2);
        assert_eq!(a.num_points(), 6);
        assert_eq!(a.prims()[1].vertices(), &[3, 4, 5]);
        assert_eq!(a.points()[3], Vec3::new(10.0, 0.0, 0.0));
    }

    #[test]
    fn test_delete_back_half_drops_points() {
        let mut geo = Geometry::new();
        for i in 0..4 {
            triangle(&mut geo, i as f32);
        }
        geo.delete_prims_from(2);
        assert_eq!(geo.num_prims(), 2);
        assert_eq!(geo.num_points(), 6);
        assert_eq!(geo.prims()[1].vertices(), &[3, 4, 5]);
    }

    #[test]
    fn test_pack_names_and_places() {
        let mut geo = Geometry::new();
        triangle(&mut geo, 0.0);
        let xform = Transform::from_translation(Vec3::new(1.0, 2.0, 3.0));
        let packed = geo.pack(Some("rock"), Some(xform));
        assert_eq!(packed.num_prims(), 1);
        let prim = &packed.prims()[0];
        assert_eq!(prim.name(), Some("rock"));
        assert_eq!(prim.transform(), Some(xform));
        assert_eq!(prim.packed_geometry().unwrap().num_prims(), 1);
    }

    #[test]
    fn test_stamp_leaves_polygons_unplaced() {
        let mut geo = Geometry::new();
        triangle(&mut geo, 0.0);
        geo.add_packed_disk("geo/a.geo.json", Transform::IDENTITY);
        let xform = Transform::from_translation(Vec3::X);
        geo.stamp("copy", xform);
        assert!(geo.prims().iter().all(|p| p.name() == Some("copy")));
        assert_eq!(geo.prims()[0].transform(), None);
        assert_eq!(geo.prims()[1].transform(), Some(xform));
    }

    #[test]
    fn test_uniform_knots() {
        let knots = uniform_knots(4, 4);
        assert_eq!(knots.len(), 8);
        assert_eq!(knots[0], 0.0);
        assert_eq!(knots[7], 1.0);
        let step = knots[1] - knots[0];
        assert!(knots.windows(2).all(|w| ((w[1] - w[0]) - step).abs() < 1e-6));
    }

    #[test]
    fn test_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/geo.geo.json");
        let mut geo = Geometry::new();
        let idx = triangle(&mut geo, 0.0);
        geo.prims_mut()[idx].set_attrib(FACENUM_ATTRIB, 0i64);
        geo.add_bspline(&[Vec3::ZERO, Vec3::X, Vec3::Y, Vec3::Z], 4);
        let packed = geo.pack(Some("p"), None);

        packed.save(&path).unwrap();
        let back = Geometry::load(&path).unwrap();
        assert_eq!(back, packed);
    }
}
