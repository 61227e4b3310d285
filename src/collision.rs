//! Collision manager: named geometries with transforms, an adjacency
//! filter, and self / cross narrow-phase queries backed by parry.

use std::collections::{HashMap, HashSet};
use std::fmt;

use nalgebra::{Isometry3, Point3, Vector3};
use parry3d_f64::query;
use parry3d_f64::shape::SharedShape;
use tracing::debug;

use crate::errors::{Error, Result};
use crate::kinematics::Transforms;
use crate::link::Geometry;

/// A contact reported by a collision query.
#[derive(Debug, Clone)]
pub struct ContactInfo {
    /// Canonically ordered object names.
    pub names: (String, String),
    /// Contact point on the first object, in world coordinates.
    pub point: Point3<f64>,
    /// Contact normal on the first object.
    pub normal: Vector3<f64>,
    /// Signed distance; negative means penetration.
    pub depth: f64,
}

/// Result of a full collision query with names and contact data.
#[derive(Debug, Clone, Default)]
pub struct CollisionReport {
    pub in_collision: bool,
    /// Colliding pairs, each ordered `(a, b)` with `a < b`.
    pub pairs: HashSet<(String, String)>,
    pub contacts: Vec<ContactInfo>,
}

#[derive(Clone)]
struct CollisionObject {
    name: String,
    shape: SharedShape,
    pose: Isometry3<f64>,
}

impl fmt::Debug for CollisionObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollisionObject")
            .field("name", &self.name)
            .field("pose", &self.pose)
            .finish_non_exhaustive()
    }
}

/// A named set of collision geometries.
///
/// Internal queries skip pairs registered in the adjacency filter; cross
/// queries against another manager apply no filtering.
#[derive(Debug, Clone)]
pub struct CollisionManager {
    name: String,
    objects: Vec<CollisionObject>,
    index: HashMap<String, usize>,
    adjacency: HashSet<(String, String)>,
}

/// Canonically ordered pair.
fn ordered(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_owned(), b.to_owned())
    } else {
        (b.to_owned(), a.to_owned())
    }
}

impl CollisionManager {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            objects: Vec::new(),
            index: HashMap::new(),
            adjacency: HashSet::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.objects.iter().map(|o| o.name.as_str())
    }

    pub fn has_object(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Registers a geometry under a unique name.
    pub fn add_object(
        &mut self,
        name: impl Into<String>,
        geometry: &Geometry,
        pose: Isometry3<f64>,
    ) -> Result<()> {
        self.add_shape(name, geometry.shared_shape()?, pose)
    }

    pub fn add_shape(
        &mut self,
        name: impl Into<String>,
        shape: SharedShape,
        pose: Isometry3<f64>,
    ) -> Result<()> {
        let name = name.into();
        if self.index.contains_key(&name) {
            return Err(Error::DuplicateName(name));
        }
        self.index.insert(name.clone(), self.objects.len());
        self.objects.push(CollisionObject { name, shape, pose });
        Ok(())
    }

    /// Removes an object, returning its shape and pose.
    pub fn remove_object(&mut self, name: &str) -> Result<(SharedShape, Isometry3<f64>)> {
        let i = *self
            .index
            .get(name)
            .ok_or_else(|| Error::UnknownName(name.to_owned()))?;
        let removed = self.objects.remove(i);
        self.index.remove(name);
        for (_, idx) in self.index.iter_mut() {
            if *idx > i {
                *idx -= 1;
            }
        }
        Ok((removed.shape, removed.pose))
    }

    pub fn set_transform(&mut self, name: &str, pose: Isometry3<f64>) -> Result<()> {
        let i = *self
            .index
            .get(name)
            .ok_or_else(|| Error::UnknownName(name.to_owned()))?;
        self.objects[i].pose = pose;
        Ok(())
    }

    pub fn transform_of(&self, name: &str) -> Option<&Isometry3<f64>> {
        self.index.get(name).map(|&i| &self.objects[i].pose)
    }

    /// World-space AABB of an object.
    pub fn aabb_of(&self, name: &str) -> Option<parry3d_f64::bounding_volume::Aabb> {
        self.index
            .get(name)
            .map(|&i| self.objects[i].shape.compute_aabb(&self.objects[i].pose))
    }

    /// Marks a pair as never tested in internal queries.
    pub fn add_filter_pair(&mut self, a: &str, b: &str) {
        self.adjacency.insert(ordered(a, b));
    }

    pub fn is_filtered(&self, a: &str, b: &str) -> bool {
        self.adjacency.contains(&ordered(a, b))
    }

    pub fn filtered_pairs(&self) -> &HashSet<(String, String)> {
        &self.adjacency
    }

    /// Adds every link of `fk` that carries geometry, posed accordingly.
    pub fn setup_robot_collision<'a>(
        &mut self,
        links: impl IntoIterator<Item = (&'a str, &'a Geometry)>,
        fk: &Transforms,
    ) -> Result<()> {
        for (name, geometry) in links {
            if let Some(pose) = fk.get(name) {
                self.add_object(name, geometry, *pose)?;
            }
        }
        Ok(())
    }

    /// Updates transforms of objects named in `fk`; unknown links are
    /// ignored (they carry no geometry here).
    pub fn sync_transforms(&mut self, fk: &Transforms) {
        for (name, pose) in fk.iter() {
            if let Some(&i) = self.index.get(name) {
                self.objects[i].pose = *pose;
            }
        }
    }

    /// Seeds the adjacency filter from a robot.
    ///
    /// Filters every link pair connected by a joint, and every pair that is
    /// already touching in the given (usually zero) configuration; those
    /// pairs would otherwise report permanent self-collisions.
    pub fn filter_contact_names(
        &mut self,
        adjacent_pairs: &[(String, String)],
        fk: &Transforms,
    ) {
        for (a, b) in adjacent_pairs {
            self.adjacency.insert(ordered(a, b));
        }
        self.sync_transforms(fk);
        let touching = self.raw_colliding_pairs();
        debug!(
            manager = %self.name,
            joint_pairs = adjacent_pairs.len(),
            touching_pairs = touching.len(),
            "seeded adjacency filter"
        );
        self.adjacency.extend(touching);
    }

    /// All colliding pairs ignoring the adjacency filter.
    fn raw_colliding_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        for i in 0..self.objects.len() {
            for k in (i + 1)..self.objects.len() {
                let (a, b) = (&self.objects[i], &self.objects[k]);
                if intersects(a, b) {
                    pairs.push(ordered(&a.name, &b.name));
                }
            }
        }
        pairs
    }

    /// Whether any unfiltered internal pair collides.
    pub fn in_collision_internal(&self) -> bool {
        for i in 0..self.objects.len() {
            for k in (i + 1)..self.objects.len() {
                let (a, b) = (&self.objects[i], &self.objects[k]);
                if !self.is_filtered(&a.name, &b.name) && intersects(a, b) {
                    return true;
                }
            }
        }
        false
    }

    /// Internal query returning colliding pairs and contact data.
    pub fn internal_collision_report(&self) -> CollisionReport {
        let mut report = CollisionReport::default();
        for i in 0..self.objects.len() {
            for k in (i + 1)..self.objects.len() {
                let (a, b) = (&self.objects[i], &self.objects[k]);
                if self.is_filtered(&a.name, &b.name) {
                    continue;
                }
                record_contact(a, b, &mut report);
            }
        }
        report
    }

    /// Whether any object of `self` collides with any object of `other`.
    /// No adjacency filtering applies across managers.
    pub fn in_collision_other(&self, other: &CollisionManager) -> bool {
        self.objects
            .iter()
            .any(|a| other.objects.iter().any(|b| intersects(a, b)))
    }

    /// Cross-manager query with names and contact data.
    pub fn collision_report_other(&self, other: &CollisionManager) -> CollisionReport {
        let mut report = CollisionReport::default();
        for a in &self.objects {
            for b in &other.objects {
                record_contact(a, b, &mut report);
            }
        }
        report
    }
}

fn intersects(a: &CollisionObject, b: &CollisionObject) -> bool {
    query::intersection_test(&a.pose, &*a.shape, &b.pose, &*b.shape).unwrap_or(false)
}

fn record_contact(a: &CollisionObject, b: &CollisionObject, report: &mut CollisionReport) {
    let contact =
        query::contact(&a.pose, &*a.shape, &b.pose, &*b.shape, 0.0).unwrap_or(None);
    if let Some(contact) = contact {
        if contact.dist <= 0.0 {
            report.in_collision = true;
            report.pairs.insert(ordered(&a.name, &b.name));
            report.contacts.push(ContactInfo {
                names: ordered(&a.name, &b.name),
                point: contact.point1,
                normal: contact.normal1.into_inner(),
                depth: contact.dist,
            });
        }
    }
}
