// src/materials.rs
//! Material tables and pattern-based material assignment.
//!
//! A table maps material name → `{assignment: [pattern, ...], ...parameters}`. Resolution
//! walks materials in declaration order and each material's patterns in order; the first
//! case-sensitive shell-glob match wins. Unmatched paths are an [`Error::NoAssignment`].

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use glob::{MatchOptions, Pattern};
use indexmap::IndexMap;
use log::debug;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::json_io::read_json;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

#[derive(Deserialize)]
struct MaterialSource {
    #[serde(default)]
    assignment: Vec<String>,
    #[serde(flatten)]
    params: IndexMap<String, Value>,
}

#[derive(Debug, Clone)]
pub struct Material {
    pub name: String,
    patterns: Vec<Pattern>,
    /// Every field except `assignment`, in file order.
    pub params: IndexMap<String, Value>,
}

impl Material {
    pub fn matches(&self, path: &str) -> bool {
        self.patterns
            .iter()
            .any(|p| p.matches_with(path, MATCH_OPTIONS))
    }

}

/// Compile a shell-glob pattern. Runs of `*` mean the same as a single `*`.
fn compile_pattern(pattern: &str) -> Result<Pattern> {
    let mut collapsed = String::with_capacity(pattern.len());
    for c in pattern.chars() {
        if c == '*' && collapsed.ends_with('*') {
            continue;
        }
        collapsed.push(c);
    }
    Pattern::new(&collapsed).map_err(|source| Error::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}

/// Resolved binding handed to the material sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialBinding {
    /// `<element>.<material>`
    pub name: String,
    pub material: String,
    pub params: IndexMap<String, Value>,
}

#[derive(Debug, Clone, Default)]
pub struct MaterialTable {
    materials: Vec<Material>,
}

impl MaterialTable {
    pub fn load(path: &Path) -> Result<Self> {
        let sources: IndexMap<String, MaterialSource> = read_json(path)?;
        Self::from_sources(sources)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let sources: IndexMap<String, MaterialSource> =
            serde_json::from_str(text).map_err(|e| Error::json("<inline>", e))?;
        Self::from_sources(sources)
    }

    fn from_sources(sources: IndexMap<String, MaterialSource>) -> Result<Self> {
        let materials = sources
            .into_iter()
            .map(|(name, src)| -> Result<Material> {
                let patterns = src
                    .assignment
                    .iter()
                    .map(|p| compile_pattern(p))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Material {
                    name,
                    patterns,
                    params: src.params,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { materials })
    }

    /// First material, in declaration order, with a pattern matching `path`.
    pub fn find(&self, path: &str) -> Option<&Material> {
        self.materials.iter().find(|m| m.matches(path))
    }

    pub fn bindings(&self, element: &str) -> Vec<MaterialBinding> {
        self.materials
            .iter()
            .map(|m| MaterialBinding {
                name: format!("{element}.{}", m.name),
                material: m.name.clone(),
                params: m.params.clone(),
            })
            .collect()
    }
}

/// Memoizing resolver over one table. Owned by an element build.
pub struct MaterialResolver {
    table: MaterialTable,
    memo: Mutex<HashMap<String, String>>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl MaterialResolver {
    pub fn new(table: MaterialTable) -> Self {
        Self {
            table,
            memo: Mutex::new(HashMap::new()),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    pub fn table(&self) -> &MaterialTable {
        &self.table
    }

    pub fn resolve(&self, path: &str) -> Result<String> {
        if let Some(material) = self.memo.lock().get(path) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(material.clone());
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let material = self
            .table
            .find(path)
            .ok_or_else(|| Error::NoAssignment(path.to_string()))?;
        debug!("Assigned {} to {}", material.name, path);
        self.memo
            .lock()
            .insert(path.to_string(), material.name.clone());
        Ok(material.name.clone())
    }

    /// (memo hits, table scans)
    pub fn stats(&self) -> (usize, usize) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = r#"{
        "hibiscusLeaf": {"assignment": ["xgHibiscus*", "leaf_?"], "color": [0.1, 0.5, 0.1]},
        "catchAll":     {"assignment": ["*"], "roughness": 0.7},
        "neverReached": {"assignment": ["xgHibiscusFlower"]}
    }"#;

    fn resolver() -> MaterialResolver {
        MaterialResolver::new(MaterialTable::from_json_str(TABLE).unwrap())
    }

    #[test]
    fn test_first_match_in_declaration_order() {
        let r = resolver();
        assert_eq!(r.resolve("xgHibiscusFlower").unwrap(), "hibiscusLeaf");
        assert_eq!(r.resolve("leaf_3").unwrap(), "hibiscusLeaf");
        assert_eq!(r.resolve("trunk").unwrap(), "catchAll");
    }

    #[test]
    fn test_memo_skips_rescan() {
        let r = resolver();
        let first = r.resolve("xgHibiscus_a").unwrap();
        let second = r.resolve("xgHibiscus_a").unwrap();
        assert_eq!(first, second);
        assert_eq!(r.stats(), (1, 1));
    }

    #[test]
    fn test_case_sensitive_and_slash() {
        let table = MaterialTable::from_json_str(
            r#"{"bark": {"assignment": ["trunk*", "[Bb]ranch"]}}"#,
        )
        .unwrap();
        let r = MaterialResolver::new(table);
        assert!(r.resolve("Trunk").is_err());
        assert_eq!(r.resolve("trunk/upper").unwrap(), "bark");
        assert_eq!(r.resolve("Branch").unwrap(), "bark");
    }

    #[test]
    fn test_no_assignment() {
        let table = MaterialTable::from_json_str(r#"{"bark": {"assignment": ["trunk"]}}"#)
            .unwrap();
        let r = MaterialResolver::new(table);
        let err = r.resolve("leaf").unwrap_err();
        assert!(err.is_no_assignment());
        assert!(r.resolve("leaf").is_err());
    }

    #[test]
    fn test_invalid_pattern() {
        let err = MaterialTable::from_json_str(r#"{"bad": {"assignment": ["[a"]}}"#)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidPattern { .. }));
    }

    #[test]
    fn test_repeated_stars_match_like_one() {
        let table = MaterialTable::from_json_str(
            r#"{"leaf": {"assignment": ["xg**Leaf", "**"]}}"#,
        )
        .unwrap();
        let r = MaterialResolver::new(table);
        assert_eq!(r.resolve("xgPalmLeaf").unwrap(), "leaf");
        assert_eq!(r.resolve("xgLeaf").unwrap(), "leaf");
        assert_eq!(r.resolve("anything/else").unwrap(), "leaf");
    }

    #[test]
    fn test_bindings_strip_assignment() {
        let table = MaterialTable::from_json_str(TABLE).unwrap();
        let bindings = table.bindings("isHibiscus");
        assert_eq!(bindings.len(), 3);
        assert_eq!(bindings[0].name, "isHibiscus.hibiscusLeaf");
        assert!(bindings[0].params.contains_key("color"));
        assert!(!bindings[0].params.contains_key("assignment"));
        assert_eq!(bindings[1].params["roughness"], serde_json::json!(0.7));
    }
}
