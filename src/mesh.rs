//! Triangle mesh storage with surface sampling.
//!
//! Meshes arrive pre-loaded (this crate never reads mesh files); the type
//! keeps vertices, faces, per-face normals and bounds together and offers
//! the weighted surface sampling the grasp and placement generators need.

use nalgebra::{Isometry3, Point3, Vector3};
use parry3d_f64::bounding_volume::Aabb;
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;

use crate::errors::{Error, Result};

/// An indexed triangle mesh with cached face normals and bounds.
#[derive(Debug, Clone)]
pub struct TriMesh {
    vertices: Vec<Point3<f64>>,
    faces: Vec<[u32; 3]>,
    face_normals: Vec<Vector3<f64>>,
    bounds: Aabb,
}

impl TriMesh {
    /// Builds a mesh and derives face normals and bounds.
    ///
    /// Fails if the mesh is empty or an index is out of range.
    pub fn new(vertices: Vec<Point3<f64>>, faces: Vec<[u32; 3]>) -> Result<Self> {
        if vertices.is_empty() || faces.is_empty() {
            return Err(Error::InvalidMesh("empty vertex or face list".to_owned()));
        }
        let n = vertices.len() as u32;
        if let Some(face) = faces.iter().find(|f| f.iter().any(|&i| i >= n)) {
            return Err(Error::InvalidMesh(format!(
                "face {face:?} references a vertex out of range (mesh has {n} vertices)"
            )));
        }
        let face_normals = compute_face_normals(&vertices, &faces);
        let bounds = compute_bounds(&vertices);
        Ok(Self {
            vertices,
            faces,
            face_normals,
            bounds,
        })
    }

    pub fn vertices(&self) -> &[Point3<f64>] {
        &self.vertices
    }

    pub fn faces(&self) -> &[[u32; 3]] {
        &self.faces
    }

    pub fn face_normals(&self) -> &[Vector3<f64>] {
        &self.face_normals
    }

    /// Axis-aligned bounds of the vertices.
    pub fn bounds(&self) -> &Aabb {
        &self.bounds
    }

    /// The three corner points of face `index`.
    pub fn face_vertices(&self, index: usize) -> [Point3<f64>; 3] {
        let [a, b, c] = self.faces[index];
        [
            self.vertices[a as usize],
            self.vertices[b as usize],
            self.vertices[c as usize],
        ]
    }

    pub fn face_area(&self, index: usize) -> f64 {
        let [a, b, c] = self.face_vertices(index);
        0.5 * (b - a).cross(&(c - a)).norm()
    }

    /// Transforms all vertices and normals in place and refreshes bounds.
    pub fn apply_transform(&mut self, transform: &Isometry3<f64>) {
        for v in &mut self.vertices {
            *v = transform * *v;
        }
        for n in &mut self.face_normals {
            *n = transform.rotation * *n;
        }
        self.bounds = compute_bounds(&self.vertices);
    }

    /// Returns a transformed copy.
    pub fn transformed(&self, transform: &Isometry3<f64>) -> Self {
        let mut mesh = self.clone();
        mesh.apply_transform(transform);
        mesh
    }

    /// Samples `count` surface points with their face normals.
    ///
    /// Faces are drawn proportionally to `area * weight` (uniform weights
    /// when `weights` is `None`); the point is uniform in the chosen face.
    pub fn sample_surface<R: Rng + ?Sized>(
        &self,
        count: usize,
        weights: Option<&[f64]>,
        rng: &mut R,
    ) -> Result<Vec<(Point3<f64>, Vector3<f64>)>> {
        if let Some(w) = weights {
            if w.len() != self.faces.len() {
                return Err(Error::InvalidMesh(format!(
                    "{} sampling weights for {} faces",
                    w.len(),
                    self.faces.len()
                )));
            }
        }
        let effective: Vec<f64> = (0..self.faces.len())
            .map(|i| self.face_area(i) * weights.map_or(1.0, |w| w[i]))
            .collect();
        let dist = WeightedIndex::new(&effective)
            .map_err(|_| Error::InvalidMesh("all sampling weights are zero".to_owned()))?;

        let mut samples = Vec::with_capacity(count);
        for _ in 0..count {
            let face = dist.sample(rng);
            let [a, b, c] = self.face_vertices(face);
            // uniform barycentric sampling
            let r1: f64 = rng.gen::<f64>().sqrt();
            let r2: f64 = rng.gen();
            let point = Point3::from(
                a.coords * (1.0 - r1) + b.coords * (r1 * (1.0 - r2)) + c.coords * (r1 * r2),
            );
            samples.push((point, self.face_normals[face]));
        }
        Ok(samples)
    }

    /// An axis-aligned box mesh centred at the origin with full side
    /// lengths `extents`, triangulated with outward-facing normals.
    pub fn cuboid(extents: Vector3<f64>) -> Self {
        let h = extents / 2.0;
        let vertices = vec![
            Point3::new(-h.x, -h.y, -h.z),
            Point3::new(h.x, -h.y, -h.z),
            Point3::new(h.x, h.y, -h.z),
            Point3::new(-h.x, h.y, -h.z),
            Point3::new(-h.x, -h.y, h.z),
            Point3::new(h.x, -h.y, h.z),
            Point3::new(h.x, h.y, h.z),
            Point3::new(-h.x, h.y, h.z),
        ];
        let faces = vec![
            [0, 2, 1],
            [0, 3, 2],
            [4, 5, 6],
            [4, 6, 7],
            [0, 1, 5],
            [0, 5, 4],
            [2, 3, 7],
            [2, 7, 6],
            [0, 4, 7],
            [0, 7, 3],
            [1, 2, 6],
            [1, 6, 5],
        ];
        Self::new(vertices, faces).expect("cuboid mesh is well formed")
    }
}

fn compute_face_normals(vertices: &[Point3<f64>], faces: &[[u32; 3]]) -> Vec<Vector3<f64>> {
    faces
        .iter()
        .map(|&[a, b, c]| {
            let a = vertices[a as usize];
            let b = vertices[b as usize];
            let c = vertices[c as usize];
            let n = (b - a).cross(&(c - a));
            let norm = n.norm();
            if norm > 0.0 {
                n / norm
            } else {
                Vector3::z()
            }
        })
        .collect()
}

fn compute_bounds(vertices: &[Point3<f64>]) -> Aabb {
    let mut mins = Point3::new(f64::INFINITY, f64::INFINITY, f64::INFINITY);
    let mut maxs = Point3::new(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY);
    for v in vertices {
        mins = mins.inf(v);
        maxs = maxs.sup(v);
    }
    Aabb::new(mins, maxs)
}
