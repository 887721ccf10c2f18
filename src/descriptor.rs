// src/descriptor.rs
//! Descriptor JSON as it is laid out in the scene tree.
//!
//! All types here are plain data. Deriving the descriptor for a variant or an instanced copy
//! never touches the loaded [`ElementDescriptor`]; it produces a new [`GeometryDescriptor`].

use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::config::ArchiveMode;
use crate::error::{Error, Result};
use crate::json_io::read_json;
use crate::transform::Transform;

/// Variant name that selects the element's own descriptor, placed at identity.
pub const BASE_VARIANT: &str = "base";

pub type InstancedPrims = IndexMap<String, InstancedPrimDescriptor>;

/// Archive payload: source mesh path → instance name → transform.
pub type ArchivePayload = IndexMap<String, IndexMap<String, Transform>>;
/// Curve payload: one control-point list per curve.
pub type CurvePayload = Vec<Vec<[f32; 3]>>;
/// Nested element payload: variant name → instance name → transform.
pub type ElementPayload = IndexMap<String, IndexMap<String, Transform>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementDescriptor {
    pub name: String,
    pub geom_obj_file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform_matrix: Option<Transform>,
    pub mat_file: String,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub instanced_primitive_json_files: InstancedPrims,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub instanced_copies: IndexMap<String, GeometryDescriptor>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub variants: IndexMap<String, GeometryDescriptor>,
}

/// Partial descriptor used by variants and instanced copies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeometryDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geom_obj_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform_matrix: Option<Transform>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub instanced_primitive_json_files: InstancedPrims,
}

impl GeometryDescriptor {
    /// True when the copy replaces the mesh or the instanced primitives.
    pub fn has_overrides(&self) -> bool {
        self.geom_obj_file.is_some() || !self.instanced_primitive_json_files.is_empty()
    }

    pub fn transform(&self) -> Transform {
        Transform::or_identity(self.transform_matrix)
    }

    /// Mesh path, falling back to the element's.
    pub fn mesh<'a>(&'a self, element: &'a ElementDescriptor) -> &'a str {
        self.geom_obj_file
            .as_deref()
            .unwrap_or(element.geom_obj_file.as_str())
    }
}

impl ElementDescriptor {
    pub fn load(path: &Path) -> Result<Self> {
        let desc: ElementDescriptor = read_json(path)?;
        if desc.name.is_empty() {
            return Err(Error::InvalidDescriptor(format!(
                "{} has an empty element name",
                path.display()
            )));
        }
        Ok(desc)
    }

    /// The element's own geometry. `drop_transform` places it at identity.
    pub fn base_geometry(&self, drop_transform: bool) -> GeometryDescriptor {
        GeometryDescriptor {
            geom_obj_file: Some(self.geom_obj_file.clone()),
            transform_matrix: if drop_transform {
                None
            } else {
                self.transform_matrix
            },
            instanced_primitive_json_files: self.instanced_primitive_json_files.clone(),
        }
    }

    /// Descriptor for a build entry point. `None` is the top-level element, `"base"` the
    /// element's own descriptor without its transform, anything else a declared variant.
    pub fn geometry_for(&self, variant: Option<&str>) -> Result<GeometryDescriptor> {
        match variant {
            None => Ok(self.base_geometry(false)),
            Some(BASE_VARIANT) => Ok(self.base_geometry(true)),
            Some(name) => {
                let mut desc = self
                    .variants
                    .get(name)
                    .cloned()
                    .ok_or_else(|| Error::UnknownVariant {
                        element: self.name.clone(),
                        variant: name.to_string(),
                    })?;
                if desc.geom_obj_file.is_none() {
                    desc.geom_obj_file = Some(self.geom_obj_file.clone());
                }
                Ok(desc)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InstancedPrimDescriptor {
    Archive(ArchiveDescriptor),
    Curve(CurveDescriptor),
    Element(NestedElementDescriptor),
}

impl InstancedPrimDescriptor {
    pub fn json_file(&self) -> &str {
        match self {
            InstancedPrimDescriptor::Archive(d) => &d.json_file,
            InstancedPrimDescriptor::Curve(d) => &d.json_file,
            InstancedPrimDescriptor::Element(d) => &d.json_file,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            InstancedPrimDescriptor::Archive(_) => "archive",
            InstancedPrimDescriptor::Curve(_) => "curve",
            InstancedPrimDescriptor::Element(_) => "element",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveDescriptor {
    pub json_file: String,
    #[serde(default)]
    pub archives: Vec<String>,
    /// Overrides the configured archive mode for this descriptor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instancing: Option<ArchiveMode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurveDescriptor {
    pub json_file: String,
    pub width_tip: f32,
    pub width_root: f32,
    pub degrees: u32,
    #[serde(default)]
    pub face_camera: bool,
}

impl CurveDescriptor {
    pub fn order(&self) -> u32 {
        self.degrees + 1
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NestedElementDescriptor {
    pub json_file: String,
    pub element: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    const ELEMENT: &str = r#"{
        "name": "isCoral",
        "geomObjFile": "obj/isCoral/isCoral.obj",
        "matFile": "json/isCoral/materials.json",
        "transformMatrix": [1,0,0,0, 0,1,0,0, 0,0,1,0, 5,6,7,1],
        "instancedPrimitiveJsonFiles": {
            "xgFlutes": {
                "type": "archive",
                "jsonFile": "json/isCoral/isCoral_xgFlutes.json",
                "archives": ["obj/isCoral/archives/flute.obj"]
            },
            "xgHair": {
                "type": "curve",
                "jsonFile": "json/isCoral/isCoral_xgHair.json",
                "widthTip": 0.01, "widthRoot": 0.05, "degrees": 3, "faceCamera": true
            },
            "xgPalms": {"type": "element", "jsonFile": "json/isCoral/palms.json", "element": "isPalm"}
        },
        "instancedCopies": {
            "isCoral_1": {"name": "isCoral_1", "transformMatrix": [1,0,0,0, 0,1,0,0, 0,0,1,0, 1,0,0,1]},
            "isCoral_2": {"geomObjFile": "obj/isCoral/isCoral_2.obj"}
        },
        "variants": {
            "small": {"transformMatrix": [2,0,0,0, 0,2,0,0, 0,0,2,0, 0,0,0,1]}
        }
    }"#;

    fn element() -> ElementDescriptor {
        serde_json::from_str(ELEMENT).unwrap()
    }

    #[test]
    fn test_parse_element() {
        let desc = element();
        assert_eq!(desc.name, "isCoral");
        assert_eq!(
            desc.transform_matrix.unwrap().translation(),
            Vec3::new(5.0, 6.0, 7.0)
        );
        let kinds: Vec<_> = desc
            .instanced_primitive_json_files
            .values()
            .map(InstancedPrimDescriptor::kind)
            .collect();
        assert_eq!(kinds, vec!["archive", "curve", "element"]);
        match &desc.instanced_primitive_json_files["xgHair"] {
            InstancedPrimDescriptor::Curve(c) => {
                assert_eq!(c.order(), 4);
                assert!(c.face_camera);
            }
            other => panic!("expected curve, got {other:?}"),
        }
        assert!(!desc.instanced_copies["isCoral_1"].has_overrides());
        assert!(desc.instanced_copies["isCoral_2"].has_overrides());
    }

    #[test]
    fn test_unknown_prim_type_is_rejected() {
        let text = r#"{"name": "a", "geomObjFile": "obj/a/a.obj", "matFile": "m.json",
            "instancedPrimitiveJsonFiles": {"x": {"type": "volume", "jsonFile": "x.json"}}}"#;
        assert!(serde_json::from_str::<ElementDescriptor>(text).is_err());
    }

    #[test]
    fn test_base_variant_drops_transform_without_mutating() {
        let desc = element();
        let base = desc.geometry_for(Some(BASE_VARIANT)).unwrap();
        assert!(base.transform().is_identity());
        assert_eq!(base.instanced_primitive_json_files.len(), 3);
        assert!(desc.transform_matrix.is_some());

        let top = desc.geometry_for(None).unwrap();
        assert_eq!(top.transform().translation(), Vec3::new(5.0, 6.0, 7.0));
    }

    #[test]
    fn test_variant_falls_back_to_element_mesh() {
        let desc = element();
        let small = desc.geometry_for(Some("small")).unwrap();
        assert_eq!(small.geom_obj_file.as_deref(), Some("obj/isCoral/isCoral.obj"));
        assert!(small.instanced_primitive_json_files.is_empty());

        let err = desc.geometry_for(Some("huge")).unwrap_err();
        assert!(matches!(err, Error::UnknownVariant { .. }));
    }

    #[test]
    fn test_copy_mesh_fallback() {
        let desc = element();
        assert_eq!(
            desc.instanced_copies["isCoral_1"].mesh(&desc),
            "obj/isCoral/isCoral.obj"
        );
        assert_eq!(
            desc.instanced_copies["isCoral_2"].mesh(&desc),
            "obj/isCoral/isCoral_2.obj"
        );
    }
}
