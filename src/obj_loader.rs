// src/obj_loader.rs
//! Loads a cleaned OBJ stream into a [`Geometry`].
//!
//! One polygon per `f` line, in stream order, so primitive numbers line up with the
//! cleaner's per-face group list. Lines are classified with the cleaner's tokenizer.
//! `usemtl` sets the original material of following faces.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use glam::Vec3;

use crate::error::{Error, Result};
use crate::geometry::{Geometry, MATERIAL_ATTRIB};
use crate::obj_reader::tokens;

pub fn load_obj_file(path: &Path) -> Result<Geometry> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    load_obj_stream(BufReader::new(file), path)
}

pub fn load_obj_stream<R: BufRead>(mut reader: R, path: &Path) -> Result<Geometry> {
    let mut geo = Geometry::new();
    let mut material: Option<String> = None;
    let mut line = Vec::new();
    let mut line_no = 0;

    loop {
        line.clear();
        let read = reader
            .read_until(b'\n', &mut line)
            .map_err(|e| Error::io(path, e))?;
        if read == 0 {
            break;
        }
        line_no += 1;
        let parse_err = |message: String| Error::Parse {
            path: path.to_path_buf(),
            line: line_no,
            message,
        };

        let mut parts = tokens(&line);
        match parts.next() {
            Some(b"v") => {
                let mut coord = [0.0f32; 3];
                for c in coord.iter_mut() {
                    let token = parts
                        .next()
                        .ok_or_else(|| parse_err("vertex needs three coordinates".into()))?;
                    *c = std::str::from_utf8(token)
                        .ok()
                        .and_then(|t| t.parse().ok())
                        .ok_or_else(|| {
                            parse_err(format!(
                                "invalid coordinate '{}'",
                                String::from_utf8_lossy(token)
                            ))
                        })?;
                }
                geo.add_point(Vec3::from_array(coord));
            }
            Some(b"f") => {
                let num_points = geo.num_points() as i64;
                let mut vertices = Vec::new();
                for token in parts {
                    let index_str = token.split(|&b| b == b'/').next().unwrap_or(token);
                    let index: i64 = std::str::from_utf8(index_str)
                        .ok()
                        .and_then(|t| t.parse().ok())
                        .ok_or_else(|| {
                            parse_err(format!(
                                "invalid face index '{}'",
                                String::from_utf8_lossy(token)
                            ))
                        })?;
                    // 1-based; negative is relative to the points read so far.
                    let resolved = if index < 0 { num_points + index } else { index - 1 };
                    if resolved < 0 || resolved >= num_points {
                        return Err(parse_err(format!("face index {index} out of range")));
                    }
                    vertices.push(resolved as u32);
                }
                if vertices.len() < 3 {
                    return Err(parse_err("face needs at least three vertices".into()));
                }
                let prim = geo.add_polygon(vertices);
                if let Some(material) = &material {
                    geo.prims_mut()[prim].set_attrib(MATERIAL_ATTRIB, material.as_str());
                }
            }
            Some(b"usemtl") => {
                material = parts
                    .next()
                    .map(|name| String::from_utf8_lossy(name).into_owned());
            }
            // g (multi-group), o, s, vt, vn, l, mtllib, comments
            _ => {}
        }
    }

    Ok(geo)
}
