//! Marching cubes over the cells touching the narrow band.

use hashbrown::HashMap;
use nalgebra::Point3;
use tracing::{debug, info};
use udf_mesh::{Mesh, OperationTimer};

use crate::error::{ReconError, ReconResult};
use crate::grid::Grid;
use crate::passes::{DistanceVolume, GradientVolume, NarrowBand};

use super::sign::{SignField, infer_signs};
use super::tables::{CORNER_OFFSETS, EDGE_CONNECTIONS, EDGE_TABLE, TRI_TABLE};

/// Counters from one extraction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractStats {
    /// Cells with at least one band corner.
    pub cells: usize,
    /// Processed cells whose corners change sign.
    pub crossing_cells: usize,
    /// Connected components of the band.
    pub components: usize,
    /// Band edges with inconsistent gradient labels.
    pub conflicts: usize,
    /// Non-band corners labelled from the band.
    pub halo_points: usize,
    /// Output vertices.
    pub vertices: usize,
    /// Output triangles.
    pub faces: usize,
}

/// Triangle mesh of the zero set in normalized coordinates.
#[derive(Debug, Clone)]
pub struct Isosurface {
    pub mesh: Mesh,
    pub stats: ExtractStats,
}

/// Lower-corner flat indices of every cell with at least one band corner,
/// ascending.
pub fn processed_cells(grid: &Grid, band: &NarrowBand) -> Vec<usize> {
    let last = grid.resolution() - 2;
    let mut cells = Vec::with_capacity(band.len() * 2);
    for &flat in band.indices() {
        let [i, j, k] = grid.delinearize(flat);
        for ci in i.saturating_sub(1)..=i.min(last) {
            for cj in j.saturating_sub(1)..=j.min(last) {
                for ck in k.saturating_sub(1)..=k.min(last) {
                    cells.push(grid.linearize(ci, cj, ck));
                }
            }
        }
    }
    cells.sort_unstable();
    cells.dedup();
    cells
}

/// Extract the zero set of the signed field inferred from the band.
///
/// One vertex is placed per crossing grid edge at `t = s_a / (s_a - s_b)`
/// and shared by every cell on that edge. Triangles face toward positive
/// (outside) values.
pub fn extract_isosurface(
    volume: &DistanceVolume,
    band: &NarrowBand,
    gradients: &GradientVolume,
) -> ReconResult<Isosurface> {
    let _timer = OperationTimer::with_items("extract isosurface", band.len());
    let grid = volume.grid();
    let signs = infer_signs(volume, band, gradients);
    let cells = processed_cells(grid, band);

    info!(
        dims = grid.resolution(),
        band_points = band.len(),
        cells = cells.len(),
        "Extracting isosurface"
    );

    let mut builder = MeshBuilder::new(grid, volume, &signs);
    let mut crossing_cells = 0;
    for &cell in &cells {
        if builder.march_cell(cell) {
            crossing_cells += 1;
        }
    }

    let MeshBuilder {
        positions, faces, ..
    } = builder;

    if faces.is_empty() {
        return Err(ReconError::EmptyIsosurface { cells: cells.len() });
    }

    let stats = ExtractStats {
        cells: cells.len(),
        crossing_cells,
        components: signs.components(),
        conflicts: signs.conflicts(),
        halo_points: signs.halo_points(),
        vertices: positions.len(),
        faces: faces.len(),
    };

    info!(
        vertices = stats.vertices,
        faces = stats.faces,
        crossing_cells,
        "Isosurface mesh created"
    );
    if stats.conflicts > 0 {
        debug!(conflicts = stats.conflicts, "Gradient labels disagreed on some band edges");
    }

    Ok(Isosurface {
        mesh: Mesh::from_parts(positions, faces),
        stats,
    })
}

/// Accumulates vertices and faces with a per-edge vertex cache.
struct MeshBuilder<'a> {
    grid: &'a Grid,
    volume: &'a DistanceVolume,
    signs: &'a SignField,
    edge_vertices: HashMap<usize, u32>,
    positions: Vec<Point3<f64>>,
    faces: Vec<[u32; 3]>,
}

impl<'a> MeshBuilder<'a> {
    fn new(grid: &'a Grid, volume: &'a DistanceVolume, signs: &'a SignField) -> Self {
        Self {
            grid,
            volume,
            signs,
            edge_vertices: HashMap::new(),
            positions: Vec::new(),
            faces: Vec::new(),
        }
    }

    /// Triangulate one cell. Returns true if it produced any triangle.
    fn march_cell(&mut self, cell: usize) -> bool {
        let [i, j, k] = self.grid.delinearize(cell);
        let mut corners = [0usize; 8];
        let mut values = [0.0f64; 8];
        let mut cube_index = 0usize;

        for (c, offset) in CORNER_OFFSETS.iter().enumerate() {
            let flat = self.grid.linearize(i + offset[0], j + offset[1], k + offset[2]);
            // Every corner of a processed cell is band or halo
            let Some(s) = self.signs.signed_distance(self.volume, flat) else {
                return false;
            };
            corners[c] = flat;
            values[c] = s;
            if s < 0.0 {
                cube_index |= 1 << c;
            }
        }

        let edges = EDGE_TABLE[cube_index];
        if edges == 0 {
            return false;
        }

        let mut edge_vertex = [0u32; 12];
        for (e, &[a, b]) in EDGE_CONNECTIONS.iter().enumerate() {
            if edges & (1 << e) != 0 {
                edge_vertex[e] = self.edge_vertex(corners[a], corners[b], values[a], values[b]);
            }
        }

        for tri in TRI_TABLE[cube_index].chunks_exact(3) {
            if tri[0] < 0 {
                break;
            }
            let [a, b, c] = [tri[0], tri[1], tri[2]].map(|e| edge_vertex[e as usize]);
            // Table winding faces the inside; reverse it
            self.faces.push([a, c, b]);
        }
        true
    }

    /// Vertex on the grid edge between two adjacent corners, created once.
    fn edge_vertex(&mut self, a: usize, b: usize, s_a: f64, s_b: f64) -> u32 {
        let (lower, upper, s_lower, s_upper) = if a < b {
            (a, b, s_a, s_b)
        } else {
            (b, a, s_b, s_a)
        };
        let axis = match upper - lower {
            1 => 2,
            d if d == self.grid.resolution() => 1,
            _ => 0,
        };
        let key = lower * 3 + axis;

        if let Some(&idx) = self.edge_vertices.get(&key) {
            return idx;
        }

        let denom = s_lower - s_upper;
        let t = if denom.abs() < 1e-12 {
            0.5
        } else {
            (s_lower / denom).clamp(0.0, 1.0)
        };
        let p0 = self.grid.point(lower);
        let p1 = self.grid.point(upper);
        let idx = self.positions.len() as u32;
        self.positions.push(p0 + (p1 - p0) * t);
        self.edge_vertices.insert(key, idx);
        idx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::passes::select_narrow_band;
    use nalgebra::Vector3;

    /// Exact fields of a sphere of radius `r` at the origin.
    fn sphere_fields(grid: &Grid, r: f64) -> (DistanceVolume, NarrowBand, GradientVolume) {
        let values = grid.points().map(|p| (p.coords.norm() - r).abs()).collect();
        let volume = DistanceVolume::from_values(*grid, values).unwrap();
        let band = select_narrow_band(&volume, 2.0 * grid.voxel_size()).unwrap();
        let gradients = band
            .indices()
            .iter()
            .map(|&flat| {
                let p = grid.point(flat).coords;
                let sign = if p.norm() < r { -1.0 } else { 1.0 };
                p.try_normalize(1e-12).unwrap_or_else(Vector3::z) * sign
            })
            .collect();
        let gradients = GradientVolume::new(band.indices().to_vec(), gradients);
        (volume, band, gradients)
    }

    #[test]
    fn test_sphere_is_closed_and_outward() {
        let grid = Grid::new(32).unwrap();
        let (volume, band, gradients) = sphere_fields(&grid, 0.3);
        let surface = extract_isosurface(&volume, &band, &gradients).unwrap();
        let mesh = &surface.mesh;

        assert_eq!(surface.stats.components, 1);
        assert_eq!(surface.stats.conflicts, 0);
        assert!(mesh.is_watertight());
        assert_eq!(mesh.euler_characteristic(), 2);
        assert!(mesh.signed_volume() > 0.0);

        let expected = 4.0 / 3.0 * std::f64::consts::PI * 0.3_f64.powi(3);
        assert!((mesh.signed_volume() - expected).abs() / expected < 0.02);
        for v in &mesh.vertices {
            assert!((v.position.coords.norm() - 0.3).abs() < 0.005);
        }
    }

    #[test]
    fn test_edge_vertices_are_shared() {
        let grid = Grid::new(20).unwrap();
        let (volume, band, gradients) = sphere_fields(&grid, 0.25);
        let surface = extract_isosurface(&volume, &band, &gradients).unwrap();

        // Closed triangle mesh: 3F = 2E and every vertex sits on one edge
        let mesh = &surface.mesh;
        let edges = mesh.faces.len() * 3 / 2;
        assert_eq!(mesh.vertices.len() + mesh.faces.len(), edges + 2);
    }

    #[test]
    fn test_processed_cells_cover_band() {
        let grid = Grid::new(10).unwrap();
        let (_, band, _) = sphere_fields(&grid, 0.3);
        let cells = processed_cells(&grid, &band);
        assert!(cells.windows(2).all(|w| w[0] < w[1]));

        for cell in 0..grid.len() {
            let [i, j, k] = grid.delinearize(cell);
            if i + 1 >= grid.resolution() || j + 1 >= grid.resolution() || k + 1 >= grid.resolution()
            {
                continue;
            }
            let touches = CORNER_OFFSETS
                .iter()
                .any(|o| band.contains(grid.linearize(i + o[0], j + o[1], k + o[2])));
            assert_eq!(cells.binary_search(&cell).is_ok(), touches);
        }
    }

    #[test]
    fn test_flat_field_yields_empty_isosurface() {
        let grid = Grid::new(6).unwrap();
        let volume = DistanceVolume::from_values(grid, vec![0.0; grid.len()]).unwrap();
        let band = select_narrow_band(&volume, 0.1).unwrap();
        let gradients = GradientVolume::new(
            band.indices().to_vec(),
            vec![Vector3::z(); band.len()],
        );

        let err = extract_isosurface(&volume, &band, &gradients).unwrap_err();
        assert!(matches!(err, ReconError::EmptyIsosurface { cells: 125 }));
    }
}
