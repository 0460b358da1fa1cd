//! Point cloud data structures, I/O, and normal estimation.
//!
//! Supported formats:
//! - PLY (ascii or binary) with optional `nx ny nz` per vertex
//! - XYZ text, `x y z [nx ny nz]` per line
//!
//! # Example
//!
//! ```ignore
//! use udf_mesh::PointCloud;
//!
//! let cloud = PointCloud::load("scan.ply")?;
//! let cloud = if cloud.has_normals() {
//!     cloud
//! } else {
//!     cloud.with_estimated_normals(16)?
//! };
//! ```

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use kiddo::SquaredEuclidean;
use nalgebra::{Matrix3, Point3, Vector3};
use ply_rs::ply::Property;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::error::{MeshError, MeshResult};

/// A point in the cloud with an optional unit normal.
#[derive(Debug, Clone, PartialEq)]
pub struct CloudPoint {
    /// 3D position.
    pub position: Point3<f64>,

    /// Unit normal vector (estimated or from the source file).
    pub normal: Option<Vector3<f64>>,
}

impl CloudPoint {
    /// Create a point with only position.
    #[inline]
    pub fn new(position: Point3<f64>) -> Self {
        Self {
            position,
            normal: None,
        }
    }

    /// Create a point from raw coordinates.
    #[inline]
    pub fn from_coords(x: f64, y: f64, z: f64) -> Self {
        Self::new(Point3::new(x, y, z))
    }

    /// Create a point with position and normal.
    #[inline]
    pub fn with_normal(position: Point3<f64>, normal: Vector3<f64>) -> Self {
        Self {
            position,
            normal: Some(normal),
        }
    }
}

/// A collection of 3D points.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointCloud {
    /// The points in the cloud.
    pub points: Vec<CloudPoint>,
}

impl PointCloud {
    /// Create a new empty point cloud.
    pub fn new() -> Self {
        Self { points: Vec::new() }
    }

    /// Create a point cloud with pre-allocated capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            points: Vec::with_capacity(capacity),
        }
    }

    /// Create a point cloud from a list of positions.
    pub fn from_positions(positions: &[Point3<f64>]) -> Self {
        Self {
            points: positions.iter().map(|&p| CloudPoint::new(p)).collect(),
        }
    }

    /// Number of points.
    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// True when the cloud has no points.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// True when every point carries a normal.
    pub fn has_normals(&self) -> bool {
        !self.points.is_empty() && self.points.iter().all(|p| p.normal.is_some())
    }

    /// Iterate over positions.
    pub fn positions(&self) -> impl Iterator<Item = Point3<f64>> + '_ {
        self.points.iter().map(|p| p.position)
    }

    /// Compute the axis-aligned bounding box.
    pub fn bounds(&self) -> Option<(Point3<f64>, Point3<f64>)> {
        let first = self.points.first()?.position;
        Some(self.positions().skip(1).fold((first, first), |(min, max), p| {
            (min.inf(&p), max.sup(&p))
        }))
    }

    /// Compute the centroid of the point positions.
    pub fn centroid(&self) -> Option<Point3<f64>> {
        if self.points.is_empty() {
            return None;
        }
        let sum: Vector3<f64> = self.positions().map(|p| p.coords).sum();
        Some(Point3::from(sum / self.points.len() as f64))
    }

    /// Find the first point with a NaN or infinite coordinate.
    pub fn check_finite(&self) -> MeshResult<()> {
        for (i, p) in self.points.iter().enumerate() {
            for (axis, value) in ["x", "y", "z"].into_iter().zip(p.position.iter()) {
                if !value.is_finite() {
                    return Err(MeshError::invalid_coordinate(i, axis, *value));
                }
            }
        }
        Ok(())
    }

    /// Add a point to the cloud.
    #[inline]
    pub fn push(&mut self, point: CloudPoint) {
        self.points.push(point);
    }

    /// Load a point cloud, detecting the format from the extension.
    pub fn load(path: impl AsRef<Path>) -> MeshResult<Self> {
        let path = path.as_ref();
        let format =
            PointCloudFormat::from_path(path).ok_or_else(|| MeshError::unsupported_format(path))?;

        debug!("Loading point cloud from {:?} (format: {:?})", path, format);

        let cloud = match format {
            PointCloudFormat::Ply => load_ply_pointcloud(path)?,
            PointCloudFormat::Xyz => load_xyz(path)?,
        };

        info!(
            "Loaded {} points (has_normals: {})",
            cloud.len(),
            cloud.has_normals()
        );

        Ok(cloud)
    }

    /// Save the point cloud, detecting the format from the extension.
    pub fn save(&self, path: impl AsRef<Path>) -> MeshResult<()> {
        let path = path.as_ref();
        let format =
            PointCloudFormat::from_path(path).ok_or_else(|| MeshError::unsupported_format(path))?;

        debug!("Saving point cloud to {:?} (format: {:?})", path, format);

        match format {
            PointCloudFormat::Ply => save_ply_pointcloud(self, path),
            PointCloudFormat::Xyz => save_xyz(self, path),
        }
    }

    /// Build a kd-tree over the positions; items are point indices.
    ///
    /// The immutable tree tolerates any number of points sharing a
    /// coordinate, as planar scans and gridded samples do.
    pub fn kdtree(&self) -> kiddo::ImmutableKdTree<f64, 3> {
        let coords: Vec<[f64; 3]> = self.positions().map(|p| p.coords.into()).collect();
        kiddo::ImmutableKdTree::new_from_slice(&coords)
    }

    /// Estimate normals with PCA over `k` nearest neighbours, then orient
    /// them consistently over the neighbour graph.
    pub fn with_estimated_normals(&self, k: usize) -> MeshResult<Self> {
        if self.len() < 3 {
            return Err(MeshError::EmptyPointCloud {
                details: format!("normal estimation needs at least 3 points, got {}", self.len()),
            });
        }
        if k < 3 {
            return Err(MeshError::invalid_parameter(
                "k",
                format!("normal estimation needs at least 3 neighbours, got {k}"),
            ));
        }

        info!(k, points = self.len(), "Estimating normals");

        let kdtree = self.kdtree();
        let normals = estimate_normals(self, &kdtree, k);
        let mut result = self.clone();
        for (point, normal) in result.points.iter_mut().zip(normals) {
            point.normal = Some(normal);
        }
        let components = result.orient_normals_consistently(&kdtree, k);
        debug!(components, "Normals oriented");

        Ok(result)
    }

    /// Give every connected patch of the `k`-nearest-neighbour graph one
    /// orientation. Returns the number of patches.
    ///
    /// Each patch is seeded at its point of largest x, turned to face +x
    /// (outward for a closed surface), and orientation spreads along a
    /// minimum spanning tree weighted by `1 - |nᵢ·nⱼ|`, so decisions are
    /// made across the flattest edges first. Points without a normal are
    /// skipped.
    pub fn orient_normals_consistently(
        &mut self,
        kdtree: &kiddo::ImmutableKdTree<f64, 3>,
        k: usize,
    ) -> usize {
        let Some(centroid) = self.centroid() else {
            return 0;
        };
        let graph = neighbour_graph(self, kdtree, k);
        let mut normals: Vec<Option<Vector3<f64>>> = self.points.iter().map(|p| p.normal).collect();

        let mut seeds: Vec<usize> = (0..self.len()).collect();
        seeds.sort_by(|&a, &b| {
            let (pa, pb) = (&self.points[a].position, &self.points[b].position);
            pb.x.total_cmp(&pa.x).then(a.cmp(&b))
        });

        let mut visited = vec![false; self.len()];
        let mut heap = BinaryHeap::new();
        let mut components = 0;

        for seed in seeds {
            if visited[seed] {
                continue;
            }
            let Some(normal) = normals[seed] else {
                visited[seed] = true;
                continue;
            };
            components += 1;

            let position = self.points[seed].position;
            // A flat patch has no outward x; fall back to the centroid
            let outward = if normal.x.abs() > 1e-6 {
                normal.x
            } else {
                normal.dot(&(position - centroid))
            };
            if outward < 0.0 {
                normals[seed] = Some(-normal);
            }

            visited[seed] = true;
            push_edges(&mut heap, &graph, &normals, &visited, seed);
            while let Some(Edge { to, from, .. }) = heap.pop() {
                if visited[to] {
                    continue;
                }
                visited[to] = true;
                if let (Some(n), Some(parent)) = (normals[to], normals[from])
                    && n.dot(&parent) < 0.0
                {
                    normals[to] = Some(-n);
                }
                push_edges(&mut heap, &graph, &normals, &visited, to);
            }
        }

        for (point, normal) in self.points.iter_mut().zip(normals) {
            point.normal = normal;
        }
        components
    }
}

/// Symmetric `k`-nearest-neighbour adjacency, each list sorted.
fn neighbour_graph(
    cloud: &PointCloud,
    kdtree: &kiddo::ImmutableKdTree<f64, 3>,
    k: usize,
) -> Vec<Vec<u32>> {
    let k = (k + 1).min(cloud.len());
    let knn: Vec<Vec<u32>> = cloud
        .points
        .par_iter()
        .map(|point| {
            kdtree
                .nearest_n::<SquaredEuclidean>(&point.position.coords.into(), k)
                .into_iter()
                .map(|n| n.item as u32)
                .collect()
        })
        .collect();

    let mut graph = vec![Vec::new(); cloud.len()];
    for (i, neighbours) in knn.iter().enumerate() {
        for &j in neighbours {
            if j as usize != i {
                graph[i].push(j);
                graph[j as usize].push(i as u32);
            }
        }
    }
    for neighbours in &mut graph {
        neighbours.sort_unstable();
        neighbours.dedup();
    }
    graph
}

fn push_edges(
    heap: &mut BinaryHeap<Edge>,
    graph: &[Vec<u32>],
    normals: &[Option<Vector3<f64>>],
    visited: &[bool],
    from: usize,
) {
    let Some(n) = normals[from] else {
        return;
    };
    for &to in &graph[from] {
        let to = to as usize;
        if visited[to] {
            continue;
        }
        let alignment = normals[to].map_or(0.0, |m| n.dot(&m).abs());
        heap.push(Edge {
            cost: 1.0 - alignment,
            to,
            from,
        });
    }
}

/// Candidate spanning-tree edge. Ordered so the heap pops the cheapest,
/// ties broken by index for a deterministic tree.
#[derive(Debug, Clone, Copy)]
struct Edge {
    cost: f64,
    to: usize,
    from: usize,
}

impl PartialEq for Edge {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Edge {}

impl PartialOrd for Edge {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Edge {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.to.cmp(&self.to))
            .then_with(|| other.from.cmp(&self.from))
    }
}

/// Supported point cloud file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointCloudFormat {
    /// PLY (Stanford Polygon File Format)
    Ply,
    /// XYZ (ASCII `x y z [nx ny nz]`)
    Xyz,
}

impl PointCloudFormat {
    /// Detect format from file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase())
            .and_then(|ext| match ext.as_str() {
                "ply" => Some(PointCloudFormat::Ply),
                "xyz" => Some(PointCloudFormat::Xyz),
                _ => None,
            })
    }
}

fn load_ply_pointcloud(path: &Path) -> MeshResult<PointCloud> {
    use ply_rs::parser::Parser;

    let file = File::open(path).map_err(|e| MeshError::io_read(path, e))?;
    let mut reader = BufReader::new(file);

    let parser = Parser::<ply_rs::ply::DefaultElement>::new();
    let ply = parser
        .read_ply(&mut reader)
        .map_err(|e| MeshError::parse_error(path, format!("PLY parse error: {:?}", e)))?;

    let Some(vertices) = ply.payload.get("vertex") else {
        return Err(MeshError::EmptyPointCloud {
            details: format!("{} has no vertex element", path.display()),
        });
    };

    let mut cloud = PointCloud::with_capacity(vertices.len());
    for element in vertices {
        let x = get_ply_float(element.get("x"), "x", path)?;
        let y = get_ply_float(element.get("y"), "y", path)?;
        let z = get_ply_float(element.get("z"), "z", path)?;

        let mut point = CloudPoint::from_coords(x, y, z);

        if let (Some(nx), Some(ny), Some(nz)) =
            (element.get("nx"), element.get("ny"), element.get("nz"))
            && let (Ok(nx), Ok(ny), Ok(nz)) = (
                get_ply_float(Some(nx), "nx", path),
                get_ply_float(Some(ny), "ny", path),
                get_ply_float(Some(nz), "nz", path),
            )
        {
            point.normal = unit_normal(Vector3::new(nx, ny, nz));
        }

        cloud.push(point);
    }

    Ok(cloud)
}

pub(crate) fn get_ply_float(prop: Option<&Property>, name: &str, path: &Path) -> MeshResult<f64> {
    match prop {
        Some(Property::Float(v)) => Ok(*v as f64),
        Some(Property::Double(v)) => Ok(*v),
        Some(Property::Int(v)) => Ok(*v as f64),
        Some(Property::UInt(v)) => Ok(*v as f64),
        Some(Property::Short(v)) => Ok(*v as f64),
        Some(Property::UShort(v)) => Ok(*v as f64),
        Some(Property::Char(v)) => Ok(*v as f64),
        Some(Property::UChar(v)) => Ok(*v as f64),
        _ => Err(MeshError::parse_error(
            path,
            format!("Missing or invalid PLY property: {}", name),
        )),
    }
}

/// Normalize a file normal; zero-length normals are treated as absent.
fn unit_normal(n: Vector3<f64>) -> Option<Vector3<f64>> {
    let len = n.norm();
    (len > 1e-12 && len.is_finite()).then(|| n / len)
}

fn save_ply_pointcloud(cloud: &PointCloud, path: &Path) -> MeshResult<()> {
    let file = File::create(path).map_err(|e| MeshError::io_write(path, e))?;
    let mut writer = BufWriter::new(file);
    let io_err = |e| MeshError::io_write(path, e);

    let has_normals = cloud.has_normals();

    writeln!(writer, "ply").map_err(io_err)?;
    writeln!(writer, "format ascii 1.0").map_err(io_err)?;
    writeln!(writer, "element vertex {}", cloud.len()).map_err(io_err)?;
    for axis in ["x", "y", "z"] {
        writeln!(writer, "property float {}", axis).map_err(io_err)?;
    }
    if has_normals {
        for axis in ["nx", "ny", "nz"] {
            writeln!(writer, "property float {}", axis).map_err(io_err)?;
        }
    }
    writeln!(writer, "end_header").map_err(io_err)?;

    for point in &cloud.points {
        write_point_line(&mut writer, point, has_normals).map_err(io_err)?;
    }

    writer.flush().map_err(io_err)
}

fn load_xyz(path: &Path) -> MeshResult<PointCloud> {
    let file = File::open(path).map_err(|e| MeshError::io_read(path, e))?;
    let reader = BufReader::new(file);

    let mut cloud = PointCloud::new();

    for (line_idx, line) in reader.lines().enumerate() {
        let line_num = line_idx + 1;
        let line = line.map_err(|e| MeshError::io_read(path, e))?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with("//") {
            continue;
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 3 {
            warn!("Skipping invalid line {} in XYZ file", line_num);
            continue;
        }

        let coord = |i: usize, axis: &str| -> MeshResult<f64> {
            parts[i].parse().map_err(|_| {
                MeshError::parse_error_at(path, line_num, format!("Invalid {} coordinate", axis))
            })
        };

        let mut point = CloudPoint::from_coords(coord(0, "x")?, coord(1, "y")?, coord(2, "z")?);

        if parts.len() >= 6
            && let (Ok(nx), Ok(ny), Ok(nz)) = (
                parts[3].parse::<f64>(),
                parts[4].parse::<f64>(),
                parts[5].parse::<f64>(),
            )
        {
            point.normal = unit_normal(Vector3::new(nx, ny, nz));
        }

        cloud.push(point);
    }

    Ok(cloud)
}

fn save_xyz(cloud: &PointCloud, path: &Path) -> MeshResult<()> {
    let file = File::create(path).map_err(|e| MeshError::io_write(path, e))?;
    let mut writer = BufWriter::new(file);
    let has_normals = cloud.has_normals();

    for point in &cloud.points {
        write_point_line(&mut writer, point, has_normals).map_err(|e| MeshError::io_write(path, e))?;
    }

    writer.flush().map_err(|e| MeshError::io_write(path, e))
}

fn write_point_line(
    writer: &mut impl Write,
    point: &CloudPoint,
    has_normals: bool,
) -> std::io::Result<()> {
    let p = &point.position;
    write!(writer, "{} {} {}", p.x, p.y, p.z)?;
    if has_normals {
        let n = point.normal.unwrap_or_else(Vector3::zeros);
        write!(writer, " {} {} {}", n.x, n.y, n.z)?;
    }
    writeln!(writer)
}

/// PCA normal per point: the eigenvector of the smallest eigenvalue of the
/// neighbourhood covariance.
fn estimate_normals(
    cloud: &PointCloud,
    kdtree: &kiddo::ImmutableKdTree<f64, 3>,
    k: usize,
) -> Vec<Vector3<f64>> {
    let k = k.min(cloud.len());

    cloud
        .points
        .par_iter()
        .map(|point| {
            let neighbors =
                kdtree.nearest_n::<SquaredEuclidean>(&point.position.coords.into(), k);

            let centroid: Vector3<f64> = neighbors
                .iter()
                .map(|n| cloud.points[n.item as usize].position.coords)
                .sum::<Vector3<f64>>()
                / neighbors.len() as f64;

            let cov = neighbors.iter().fold(Matrix3::zeros(), |acc, n| {
                let d = cloud.points[n.item as usize].position.coords - centroid;
                acc + d * d.transpose()
            });

            let eig = cov.symmetric_eigen();
            let min_idx = eig.eigenvalues.imin();
            let normal = eig.eigenvectors.column(min_idx).into_owned();
            unit_normal(normal).unwrap_or_else(Vector3::z)
        })
        .collect()
}
