//! Miniature scene trees on disk.

#![allow(dead_code)]

use std::fs;
use std::path::Path;

use serde_json::{json, Value};
use tempfile::TempDir;

use scene_forge::BuildConfig;

/// Two faces in two groups with two original materials.
pub const MESH: &str = "\
mtllib rock.mtl
v 0 0 0
v 1 0 0
v 0 1 0
v 1 1 0
g trunk
usemtl bark
f 1 2 3
g leaves
usemtl /shop/leaf
f 2 4 3
";

pub const MATERIALS: &str = r#"{
    "bark": {"assignment": ["trunk*"], "baseColor": [0.3, 0.2, 0.1]},
    "hair": {"assignment": ["xgHair"], "roughness": 0.4}
}"#;

pub struct Scene {
    dir: TempDir,
}

impl Scene {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn config(&self) -> BuildConfig {
        BuildConfig::new(self.root())
    }

    pub fn write(&self, rel: &str, contents: &str) {
        let path = self.root().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    pub fn write_json(&self, rel: &str, value: &Value) {
        self.write(rel, &serde_json::to_string_pretty(value).unwrap());
    }

    /// Writes `obj/<name>/<name>.obj`, `json/<name>/materials.json` and the descriptor;
    /// `extra` fields are merged into the descriptor.
    pub fn element(&self, name: &str, extra: Value) {
        self.write(&format!("obj/{name}/{name}.obj"), MESH);
        self.write(&format!("json/{name}/materials.json"), MATERIALS);
        let mut desc = json!({
            "name": name,
            "geomObjFile": format!("obj/{name}/{name}.obj"),
            "matFile": format!("json/{name}/materials.json"),
        });
        if let (Some(desc), Value::Object(extra)) = (desc.as_object_mut(), extra) {
            desc.extend(extra);
        }
        self.write_json(&format!("json/{name}/{name}.json"), &desc);
    }
}

/// Row-vector translation matrix as it appears in descriptors.
pub fn translate(x: f32, y: f32, z: f32) -> Value {
    json!([1, 0, 0, 0, 0, 1, 0, 0, 0, 0, 1, 0, x, y, z, 1])
}
