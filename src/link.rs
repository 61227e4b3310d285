//! Link model: name, geometry and the link-local offset transform.

use std::sync::Arc;

use nalgebra::{Isometry3, Point3, Vector3};
use parry3d_f64::shape::SharedShape;

use crate::errors::{Error, Result};
use crate::mesh::TriMesh;

/// Collision / visual geometry attached to a link or scene object.
///
/// Cylinders and capsules follow the URDF convention: their axis is the
/// local z axis and `length` is the full extent along it.
#[derive(Debug, Clone)]
pub enum Geometry {
    Box { extents: Vector3<f64> },
    Sphere { radius: f64 },
    Cylinder { radius: f64, length: f64 },
    Capsule { radius: f64, length: f64 },
    Mesh { mesh: Arc<TriMesh> },
}

impl Geometry {
    /// Converts to a parry shape for narrow-phase queries.
    pub fn shared_shape(&self) -> Result<SharedShape> {
        match self {
            Geometry::Box { extents } => Ok(SharedShape::cuboid(
                extents.x / 2.0,
                extents.y / 2.0,
                extents.z / 2.0,
            )),
            Geometry::Sphere { radius } => Ok(SharedShape::ball(*radius)),
            Geometry::Cylinder { radius, length } => {
                // parry cylinders are y-aligned; rotate into the z-aligned
                // URDF convention.
                let upright = Isometry3::rotation(Vector3::x() * std::f64::consts::FRAC_PI_2);
                Ok(SharedShape::compound(vec![(
                    upright,
                    SharedShape::cylinder(length / 2.0, *radius),
                )]))
            }
            Geometry::Capsule { radius, length } => Ok(SharedShape::capsule(
                Point3::new(0.0, 0.0, -length / 2.0),
                Point3::new(0.0, 0.0, length / 2.0),
                *radius,
            )),
            Geometry::Mesh { mesh } => Ok(SharedShape::trimesh(
                mesh.vertices().to_vec(),
                mesh.faces().to_vec(),
            )),
        }
    }

    /// View of the geometry as a triangle mesh, for surface sampling.
    ///
    /// Boxes are triangulated on the fly; other primitives have no exact
    /// triangulation here and must be supplied as meshes by the caller.
    pub fn to_trimesh(&self) -> Result<TriMesh> {
        match self {
            Geometry::Mesh { mesh } => Ok((**mesh).clone()),
            Geometry::Box { extents } => Ok(TriMesh::cuboid(*extents)),
            other => Err(Error::InvalidMesh(format!(
                "surface sampling needs a mesh or box geometry, got {other:?}"
            ))),
        }
    }
}

/// A rigid body of the kinematic tree.
#[derive(Debug, Clone)]
pub struct Link {
    pub name: String,
    pub geometry: Option<Geometry>,
    /// Transform from the joint frame to the geometry frame.
    pub offset: Isometry3<f64>,
    /// RGBA, if the model carries one.
    pub color: Option<[f32; 4]>,
}

impl Link {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            geometry: None,
            offset: Isometry3::identity(),
            color: None,
        }
    }

    pub fn with_geometry(mut self, geometry: Geometry) -> Self {
        self.geometry = Some(geometry);
        self
    }

    pub fn with_offset(mut self, offset: Isometry3<f64>) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_color(mut self, color: [f32; 4]) -> Self {
        self.color = Some(color);
        self
    }
}
