//! Mesh file I/O (PLY).
//!
//! Exported vertices are single precision; faces are written as
//! `vertex_indices` lists.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use ply_rs::ply::{
    Addable, DefaultElement, ElementDef, Encoding, Ply, Property, PropertyDef, PropertyType,
    ScalarType,
};
use tracing::{debug, info};

use crate::error::{MeshError, MeshResult};
use crate::pointcloud::get_ply_float;
use crate::{Mesh, Vertex};

/// PLY encodings supported when saving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlyEncoding {
    /// Binary little-endian.
    #[default]
    Binary,
    /// ASCII, useful for debugging.
    Ascii,
}

/// Load a triangle mesh from a PLY file.
///
/// Polygons with more than three vertices are fan-triangulated.
pub fn load_ply(path: &Path) -> MeshResult<Mesh> {
    if !path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("ply"))
    {
        return Err(MeshError::unsupported_format(path));
    }

    let file = File::open(path).map_err(|e| MeshError::io_read(path, e))?;
    let mut reader = BufReader::new(file);

    let parser = ply_rs::parser::Parser::<DefaultElement>::new();
    let ply = parser
        .read_ply(&mut reader)
        .map_err(|e| MeshError::parse_error(path, format!("PLY parse error: {:?}", e)))?;

    let mut mesh = Mesh::new();

    if let Some(vertices) = ply.payload.get("vertex") {
        mesh.vertices.reserve(vertices.len());
        for element in vertices {
            mesh.vertices.push(Vertex::from_coords(
                get_ply_float(element.get("x"), "x", path)?,
                get_ply_float(element.get("y"), "y", path)?,
                get_ply_float(element.get("z"), "z", path)?,
            ));
        }
    }

    if let Some(faces) = ply.payload.get("face") {
        for (face_index, element) in faces.iter().enumerate() {
            let indices: Vec<i64> = match element
                .get("vertex_indices")
                .or_else(|| element.get("vertex_index"))
            {
                Some(Property::ListInt(v)) => v.iter().map(|&i| i as i64).collect(),
                Some(Property::ListUInt(v)) => v.iter().map(|&i| i as i64).collect(),
                Some(Property::ListShort(v)) => v.iter().map(|&i| i as i64).collect(),
                Some(Property::ListUShort(v)) => v.iter().map(|&i| i as i64).collect(),
                Some(Property::ListUChar(v)) => v.iter().map(|&i| i as i64).collect(),
                _ => continue,
            };

            for &idx in &indices {
                if idx < 0 || idx as usize >= mesh.vertices.len() {
                    return Err(MeshError::InvalidVertexIndex {
                        face_index,
                        vertex_index: idx.max(0) as u32,
                        vertex_count: mesh.vertices.len(),
                    });
                }
            }

            for i in 1..indices.len().saturating_sub(1) {
                mesh.faces.push([
                    indices[0] as u32,
                    indices[i] as u32,
                    indices[i + 1] as u32,
                ]);
            }
        }
    }

    if mesh.is_empty() {
        return Err(MeshError::empty_mesh(format!(
            "{} has {} vertices and {} faces",
            path.display(),
            mesh.vertex_count(),
            mesh.face_count()
        )));
    }

    debug!(
        "PLY loaded: {} vertices, {} faces",
        mesh.vertices.len(),
        mesh.faces.len()
    );

    Ok(mesh)
}

/// Save a mesh to PLY with the given encoding.
pub fn save_ply(mesh: &Mesh, path: &Path, encoding: PlyEncoding) -> MeshResult<()> {
    let mut ply = Ply::<DefaultElement>::new();
    ply.header.encoding = match encoding {
        PlyEncoding::Binary => Encoding::BinaryLittleEndian,
        PlyEncoding::Ascii => Encoding::Ascii,
    };

    let mut vertex_def = ElementDef::new("vertex".to_string());
    for axis in ["x", "y", "z"] {
        vertex_def.properties.add(PropertyDef::new(
            axis.to_string(),
            PropertyType::Scalar(ScalarType::Float),
        ));
    }
    vertex_def.count = mesh.vertices.len();
    ply.header.elements.add(vertex_def);

    let mut face_def = ElementDef::new("face".to_string());
    face_def.properties.add(PropertyDef::new(
        "vertex_indices".to_string(),
        PropertyType::List(ScalarType::UChar, ScalarType::UInt),
    ));
    face_def.count = mesh.faces.len();
    ply.header.elements.add(face_def);

    let vertices_payload: Vec<DefaultElement> = mesh
        .positions_f32()
        .into_iter()
        .map(|[x, y, z]| {
            let mut element = DefaultElement::new();
            element.insert("x".to_string(), Property::Float(x));
            element.insert("y".to_string(), Property::Float(y));
            element.insert("z".to_string(), Property::Float(z));
            element
        })
        .collect();
    ply.payload.insert("vertex".to_string(), vertices_payload);

    let faces_payload: Vec<DefaultElement> = mesh
        .faces
        .iter()
        .map(|face| {
            let mut element = DefaultElement::new();
            element.insert("vertex_indices".to_string(), Property::ListUInt(face.to_vec()));
            element
        })
        .collect();
    ply.payload.insert("face".to_string(), faces_payload);

    ply.make_consistent().map_err(|e| {
        MeshError::io_write(
            path,
            std::io::Error::other(format!("PLY consistency error: {:?}", e)),
        )
    })?;

    let file = File::create(path).map_err(|e| MeshError::io_write(path, e))?;
    let mut writer = BufWriter::new(file);

    ply_rs::writer::Writer::new()
        .write_ply(&mut writer, &mut ply)
        .map_err(|e| MeshError::io_write(path, e))?;
    writer.flush().map_err(|e| MeshError::io_write(path, e))?;

    info!(
        "Saved {} vertices and {} faces to {:?} ({:?} PLY)",
        mesh.vertices.len(),
        mesh.faces.len(),
        path,
        encoding
    );

    Ok(())
}
