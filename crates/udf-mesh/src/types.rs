//! Indexed triangle mesh shared by the reconstruction and smoothing stages.

use nalgebra::{Point3, Vector3};

/// Mesh vertex. `normal` is filled in by [`crate::compute_vertex_normals`].
#[derive(Debug, Clone)]
pub struct Vertex {
    pub position: Point3<f64>,
    pub normal: Option<Vector3<f64>>,
}

impl Vertex {
    #[inline]
    pub fn new(position: Point3<f64>) -> Self {
        Self {
            position,
            normal: None,
        }
    }

    #[inline]
    pub fn from_coords(x: f64, y: f64, z: f64) -> Self {
        Vertex::new(Point3::new(x, y, z))
    }
}

/// Triangle soup over a shared vertex list.
///
/// Faces index into `vertices`. Front faces wind counter-clockwise, so a
/// closed surface with outward orientation has positive [`Mesh::signed_volume`].
#[derive(Debug, Clone, Default)]
pub struct Mesh {
    pub vertices: Vec<Vertex>,
    pub faces: Vec<[u32; 3]>,
}

impl Mesh {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assemble a mesh from bare positions and index triples.
    pub fn from_parts(positions: impl IntoIterator<Item = Point3<f64>>, faces: Vec<[u32; 3]>) -> Self {
        Self {
            vertices: positions.into_iter().map(Vertex::new).collect(),
            faces,
        }
    }

    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    #[inline]
    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    /// True when there is nothing to render: no vertices or no faces.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.faces.is_empty() || self.vertices.is_empty()
    }

    /// Axis-aligned `(min, max)` over all vertices, `None` without vertices.
    pub fn bounds(&self) -> Option<(Point3<f64>, Point3<f64>)> {
        let mut positions = self.vertices.iter().map(|v| v.position);
        let first = positions.next()?;
        Some(positions.fold((first, first), |(lo, hi), p| {
            (lo.inf(&p), hi.sup(&p))
        }))
    }

    pub fn triangles(&self) -> impl Iterator<Item = Triangle> + '_ {
        self.faces.iter().map(|&face| self.face_triangle(face))
    }

    pub fn triangle(&self, face_idx: usize) -> Option<Triangle> {
        self.faces.get(face_idx).map(|&face| self.face_triangle(face))
    }

    #[inline]
    fn face_triangle(&self, face: [u32; 3]) -> Triangle {
        let at = |i: u32| self.vertices[i as usize].position;
        Triangle::new(at(face[0]), at(face[1]), at(face[2]))
    }

    /// Reverse the winding of every face.
    pub fn flip_faces(&mut self) {
        for face in &mut self.faces {
            face.swap(1, 2);
        }
    }

    /// Enclosed volume via the divergence theorem, one origin tetrahedron
    /// per face. Negative for inside-out surfaces; meaningless when open.
    pub fn signed_volume(&self) -> f64 {
        self.triangles()
            .map(|t| t.v0.coords.dot(&t.v1.coords.cross(&t.v2.coords)))
            .sum::<f64>()
            / 6.0
    }

    #[inline]
    pub fn is_inside_out(&self) -> bool {
        self.signed_volume() < 0.0
    }

    pub fn surface_area(&self) -> f64 {
        self.triangles().map(|t| t.area()).sum()
    }

    /// Positions narrowed to `f32`, the precision written to PLY.
    pub fn positions_f32(&self) -> Vec<[f32; 3]> {
        self.vertices
            .iter()
            .map(|v| v.position.coords.map(|c| c as f32).into())
            .collect()
    }
}

/// Three resolved corner positions of one face.
#[derive(Debug, Clone, Copy)]
pub struct Triangle {
    pub v0: Point3<f64>,
    pub v1: Point3<f64>,
    pub v2: Point3<f64>,
}

impl Triangle {
    #[inline]
    pub fn new(v0: Point3<f64>, v1: Point3<f64>, v2: Point3<f64>) -> Self {
        Self { v0, v1, v2 }
    }

    /// Cross product of the two edges leaving `v0`; length is twice the area.
    #[inline]
    pub fn normal_unnormalized(&self) -> Vector3<f64> {
        (self.v1 - self.v0).cross(&(self.v2 - self.v0))
    }

    /// Unit normal, `None` when the triangle has collapsed to a line or point.
    pub fn normal(&self) -> Option<Vector3<f64>> {
        self.normal_unnormalized().try_normalize(f64::EPSILON)
    }

    #[inline]
    pub fn area(&self) -> f64 {
        0.5 * self.normal_unnormalized().norm()
    }
}
