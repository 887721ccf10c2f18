// src/transform.rs
//! 4x4 homogeneous transforms as they appear in descriptor JSON.
//!
//! Descriptors store `transformMatrix` either as 16 numbers (row-vector convention, translation
//! in elements 12..15) or as four rows of four. Read row-major, that layout is exactly glam's
//! column-major storage, so no transposition happens anywhere.

use glam::{Mat4, Vec3};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Transform(pub Mat4);

impl Transform {
    pub const IDENTITY: Transform = Transform(Mat4::IDENTITY);

    pub fn from_flat(values: [f32; 16]) -> Self {
        Transform(Mat4::from_cols_array(&values))
    }

    pub fn from_translation(t: Vec3) -> Self {
        Transform(Mat4::from_translation(t))
    }

    pub fn to_flat(&self) -> [f32; 16] {
        self.0.to_cols_array()
    }

    pub fn translation(&self) -> Vec3 {
        self.0.w_axis.truncate()
    }

    pub fn is_identity(&self) -> bool {
        self.0 == Mat4::IDENTITY
    }

    /// Identity when the descriptor carries no matrix.
    pub fn or_identity(t: Option<Transform>) -> Transform {
        t.unwrap_or(Transform::IDENTITY)
    }
}

impl Default for Transform {
    fn default() -> Self {
        Transform::IDENTITY
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MatrixRepr {
    Flat(Vec<f32>),
    Rows(Vec<Vec<f32>>),
}

impl<'de> Deserialize<'de> for Transform {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let flat: Vec<f32> = match MatrixRepr::deserialize(deserializer)? {
            MatrixRepr::Flat(v) => v,
            MatrixRepr::Rows(rows) => {
                if rows.len() != 4 || rows.iter().any(|r| r.len() != 4) {
                    return Err(serde::de::Error::custom(
                        "transformMatrix rows must be 4x4",
                    ));
                }
                rows.into_iter().flatten().collect()
            }
        };
        let values: [f32; 16] = flat.try_into().map_err(|v: Vec<f32>| {
            serde::de::Error::custom(format!(
                "transformMatrix needs 16 values, got {}",
                v.len()
            ))
        })?;
        Ok(Transform::from_flat(values))
    }
}

impl Serialize for Transform {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_flat().serialize(serializer)
    }
}
