// src/instancer.rs
//! Expands instanced-primitive descriptors into geometry.
//!
//! One build function per descriptor kind, selected by a single match in
//! [`build_instanced_prims`]. Every instance in the produced subtree carries a `name`
//! primitive attribute.

use glam::Vec3;
use log::{debug, info, warn};

use crate::config::ArchiveMode;
use crate::descriptor::{
    ArchiveDescriptor, ArchivePayload, CurveDescriptor, CurvePayload, ElementPayload,
    InstancedPrimDescriptor, NestedElementDescriptor,
};
use crate::element::ElementAssembler;
use crate::error::{Error, Result};
use crate::geometry::{Geometry, FACE_CAMERA_ATTRIB, MATERIAL_ATTRIB, WIDTH_ATTRIB};
use crate::json_io::read_json;

pub fn build_instanced_prims(
    assembler: &ElementAssembler<'_>,
    name: &str,
    desc: &InstancedPrimDescriptor,
) -> Result<Geometry> {
    info!("Building {} prims {} for {}", desc.kind(), name, assembler.name());
    assembler.check_cancelled()?;
    match desc {
        InstancedPrimDescriptor::Archive(archive) => build_archive(assembler, archive),
        InstancedPrimDescriptor::Curve(curve) => build_curves(assembler, name, curve),
        InstancedPrimDescriptor::Element(nested) => build_nested(assembler, nested),
    }
}

// ── Archives ─────────────────────────────────────────────────────────────

fn build_archive(assembler: &ElementAssembler<'_>, desc: &ArchiveDescriptor) -> Result<Geometry> {
    // Every archive is converted before any instancing starts.
    for archive in &desc.archives {
        assembler.convert(archive)?;
    }

    let payload: ArchivePayload = read_json(&assembler.config().resolve(&desc.json_file))?;
    let mode = desc.instancing.unwrap_or(assembler.config().archive_mode);

    let mut all = Geometry::new();
    for (source, instances) in payload {
        info!("Creating {} prims for {}", instances.len(), source);
        let record = assembler.convert(&source)?;
        match mode {
            ArchiveMode::Reference => {
                for (instance, xform) in instances {
                    debug!("built {instance}");
                    let prim = all.add_packed_disk(record.output.clone(), xform);
                    all.prims_mut()[prim].set_name(&instance);
                }
            }
            ArchiveMode::Copy => {
                let packed = Geometry::load(&record.output)?.pack(None, None);
                for (instance, xform) in instances {
                    debug!("copied {instance}");
                    let mut copy = packed.clone();
                    copy.stamp(&instance, xform);
                    all.merge(copy);
                }
            }
        }
    }
    Ok(all)
}

// ── Curves ───────────────────────────────────────────────────────────────

fn build_curves(
    assembler: &ElementAssembler<'_>,
    name: &str,
    desc: &CurveDescriptor,
) -> Result<Geometry> {
    let curves: CurvePayload = read_json(&assembler.config().resolve(&desc.json_file))?;
    let order = desc.order();

    let material = match assembler.resolver().resolve(name) {
        Ok(material) => Some(format!("{}.{}", assembler.name(), material)),
        Err(e) if e.is_no_assignment() => {
            warn!("Missing assignment for {}:{}", assembler.name(), name);
            None
        }
        Err(e) => return Err(e),
    };

    let mut all = Geometry::new();
    for (i, control_points) in curves.iter().enumerate() {
        if control_points.len() < order as usize {
            return Err(Error::InvalidDescriptor(format!(
                "curve {i} of {name} has {} control points, order {order} needs at least {order}",
                control_points.len()
            )));
        }
        let points: Vec<Vec3> = control_points.iter().copied().map(Vec3::from_array).collect();
        let prim = all.add_bspline(&points, order);

        let prim = &mut all.prims_mut()[prim];
        prim.vertex_attribs.insert(
            WIDTH_ATTRIB.to_string(),
            curve_widths(points.len(), desc.width_root, desc.width_tip),
        );
        prim.set_attrib(FACE_CAMERA_ATTRIB, desc.face_camera as i64);
        if let Some(material) = &material {
            prim.set_attrib(MATERIAL_ATTRIB, material.as_str());
        }
    }
    debug!("built {} curves for {}", curves.len(), name);
    Ok(all.pack(Some(name), None))
}

/// Root width at the first vertex, tip width at the last, linear in between.
pub fn curve_widths(num_vertices: usize, root: f32, tip: f32) -> Vec<f32> {
    match num_vertices {
        0 => Vec::new(),
        1 => vec![root],
        n => {
            let last = (n - 1) as f32;
            (0..n)
                .map(|i| root + (tip - root) * (i as f32 / last))
                .collect()
        }
    }
}

// ── Nested elements ──────────────────────────────────────────────────────

fn build_nested(
    assembler: &ElementAssembler<'_>,
    desc: &NestedElementDescriptor,
) -> Result<Geometry> {
    let nested = assembler.nested(&desc.element)?;
    let payload: ElementPayload = read_json(&assembler.config().resolve(&desc.json_file))?;

    let mut all = Geometry::new();
    for (variant, instances) in payload {
        // Built once per variant, stamped once per instance.
        let variant_geo = nested.build_element_geo(Some(&variant))?;
        for (instance, xform) in instances {
            debug!("Copied element {} variant {} as {}", desc.element, variant, instance);
            let mut copy = variant_geo.clone();
            copy.stamp(&instance, xform);
            all.merge(copy);
        }
        assembler.check_cancelled()?;
    }
    Ok(all)
}
