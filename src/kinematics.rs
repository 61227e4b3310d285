//! Forward kinematics and the geometric Jacobian.

use std::collections::HashMap;

use nalgebra::{DMatrix, Isometry3, Vector3};

use crate::errors::{Error, Result};
use crate::frame::{Frame, FrameTree};
use crate::joint::JointType;

/// Link poses keyed by link name, preserving insertion (DFS) order.
#[derive(Debug, Clone, Default)]
pub struct Transforms {
    order: Vec<String>,
    poses: HashMap<String, Isometry3<f64>>,
}

impl Transforms {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or updates a pose; the original position in the order is
    /// kept on update.
    pub fn insert(&mut self, name: impl Into<String>, pose: Isometry3<f64>) {
        let name = name.into();
        if self.poses.insert(name.clone(), pose).is_none() {
            self.order.push(name);
        }
    }

    pub fn get(&self, name: &str) -> Option<&Isometry3<f64>> {
        self.poses.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.poses.contains_key(name)
    }

    /// The most recently inserted link and its pose.
    pub fn last(&self) -> Option<(&str, &Isometry3<f64>)> {
        let name = self.order.last()?;
        Some((name.as_str(), &self.poses[name]))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Isometry3<f64>)> {
        self.order
            .iter()
            .map(move |name| (name.as_str(), &self.poses[name]))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Forward kinematics over the whole tree by iterative DFS.
///
/// `q` holds one value per active joint, in the tree's active-joint order.
/// Each link pose is `parent_pose * joint_transform(q) * link_offset`.
pub fn forward_kinematics(
    tree: &FrameTree,
    base: &Isometry3<f64>,
    q: &[f64],
) -> Result<Transforms> {
    if q.len() != tree.dof() {
        return Err(Error::MismatchedDof {
            expected: tree.dof(),
            actual: q.len(),
        });
    }
    let mut result = Transforms::new();
    let mut stack = vec![(tree.root(), *base)];
    while let Some((id, parent_pose)) = stack.pop() {
        let frame = tree.get(id);
        let angle = tree
            .active_index(id)
            .map_or(0.0, |i| frame.joint.normalize_position(q[i]));
        let pose = parent_pose * frame.transform(angle);
        result.insert(frame.link.name.clone(), pose * frame.link.offset);
        for &child in tree.children(id).iter().rev() {
            stack.push((child, pose));
        }
    }
    Ok(result)
}

/// Forward kinematics along a serial chain of frames.
///
/// The angle index advances only on movable joints and clamps at the last
/// entry once `q` is exhausted, so IK partials with short vectors still
/// evaluate.
pub fn forward_kinematics_chain(
    chain: &[&Frame],
    base: &Isometry3<f64>,
    q: &[f64],
) -> Transforms {
    let mut result = Transforms::new();
    let mut pose = *base;
    let mut cursor = 0usize;
    for frame in chain {
        let angle = if frame.joint.is_movable() {
            let angle = q.get(cursor).copied().unwrap_or(0.0);
            cursor = (cursor + 1).min(q.len().saturating_sub(1));
            frame.joint.normalize_position(angle)
        } else {
            0.0
        };
        pose *= frame.transform(angle);
        result.insert(frame.link.name.clone(), pose * frame.link.offset);
    }
    result
}

/// Geometric Jacobian (6 x `dof`) of a serial chain at the FK snapshot `fk`.
///
/// Columns follow the chain's movable joints in order. Rows are
/// `[linear; angular]`, matching [`crate::math::pose_error`].
pub fn jacobian(chain: &[&Frame], fk: &Transforms, dof: usize) -> DMatrix<f64> {
    let target: Vector3<f64> = fk
        .last()
        .map(|(_, pose)| pose.translation.vector)
        .unwrap_or_else(Vector3::zeros);
    let mut j = DMatrix::zeros(6, dof);
    let mut column = 0usize;
    for frame in chain {
        if column >= dof {
            break;
        }
        let Some(axis) = frame.joint.joint_type.axis() else {
            continue;
        };
        let Some(pose) = fk.get(&frame.link.name) else {
            continue;
        };
        let world_axis = pose.rotation * axis.into_inner();
        let (linear, angular) = match frame.joint.joint_type {
            JointType::Prismatic { .. } => (world_axis, Vector3::zeros()),
            _ => (
                world_axis.cross(&(target - pose.translation.vector)),
                world_axis,
            ),
        };
        for row in 0..3 {
            j[(row, column)] = linear[row];
            j[(row + 3, column)] = angular[row];
        }
        column += 1;
    }
    j
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameTreeBuilder;
    use crate::joint::Joint;
    use crate::link::Link;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;
    use std::f64::consts::FRAC_PI_2;

    fn planar_two_link() -> FrameTree {
        // two unit links rotating about z, extending along x
        let mut builder = FrameTreeBuilder::new();
        let root = builder.add_root(Frame::new(Link::new("base"), Joint::fixed("root")));
        let j0 = Joint::new(
            "j0",
            JointType::Revolute {
                axis: Vector3::z_axis(),
            },
        );
        let a = builder.add_child(root, Frame::new(Link::new("l0"), j0));
        let j1 = Joint::new(
            "j1",
            JointType::Revolute {
                axis: Vector3::z_axis(),
            },
        )
        .with_origin(Isometry3::translation(1.0, 0.0, 0.0));
        let b = builder.add_child(a, Frame::new(Link::new("l1"), j1));
        let tip = Joint::fixed("tip_fix").with_origin(Isometry3::translation(1.0, 0.0, 0.0));
        builder.add_child(b, Frame::new(Link::new("tip"), tip));
        builder.finalize().unwrap()
    }

    #[test]
    fn fk_zero_configuration() {
        let tree = planar_two_link();
        let fk = forward_kinematics(&tree, &Isometry3::identity(), &[0.0, 0.0]).unwrap();
        let tip = fk.get("tip").unwrap();
        assert_relative_eq!(tip.translation.vector.x, 2.0, epsilon = 1e-12);
        assert_relative_eq!(tip.translation.vector.y, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn fk_elbow_bend() {
        let tree = planar_two_link();
        let fk = forward_kinematics(&tree, &Isometry3::identity(), &[0.0, FRAC_PI_2]).unwrap();
        let tip = fk.get("tip").unwrap();
        assert_relative_eq!(tip.translation.vector.x, 1.0, epsilon = 1e-12);
        assert_relative_eq!(tip.translation.vector.y, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn fk_rejects_wrong_dof() {
        let tree = planar_two_link();
        assert!(matches!(
            forward_kinematics(&tree, &Isometry3::identity(), &[0.0]),
            Err(Error::MismatchedDof { .. })
        ));
    }

    #[test]
    fn fk_preserves_dfs_order() {
        let tree = planar_two_link();
        let fk = forward_kinematics(&tree, &Isometry3::identity(), &[0.0, 0.0]).unwrap();
        let names: Vec<_> = fk.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["base", "l0", "l1", "tip"]);
    }

    #[test]
    fn chain_fk_matches_tree_fk() {
        let tree = planar_two_link();
        let ids = tree.chain_to("tip").unwrap();
        let chain = tree.frames_of(&ids);
        let q = [0.3, -0.5];
        let full = forward_kinematics(&tree, &Isometry3::identity(), &q).unwrap();
        let linear = forward_kinematics_chain(&chain, &Isometry3::identity(), &q);
        let a = full.get("tip").unwrap();
        let b = linear.get("tip").unwrap();
        assert_relative_eq!(
            (a.translation.vector - b.translation.vector).norm(),
            0.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn chain_fk_clamps_short_angle_vectors() {
        let tree = planar_two_link();
        let ids = tree.chain_to("tip").unwrap();
        let chain = tree.frames_of(&ids);
        // one angle for two movable joints: the last value is reused
        let fk = forward_kinematics_chain(&chain, &Isometry3::identity(), &[FRAC_PI_2]);
        let tip = fk.get("tip").unwrap();
        assert_relative_eq!(tip.translation.vector.x, -1.0, epsilon = 1e-12);
    }

    #[test]
    fn jacobian_matches_finite_differences() {
        let tree = planar_two_link();
        let ids = tree.chain_to("tip").unwrap();
        let chain = tree.frames_of(&ids);
        let q = [0.4, 0.7];
        let fk = forward_kinematics_chain(&chain, &Isometry3::identity(), &q);
        let j = jacobian(&chain, &fk, q.len());

        let eps = 1e-7;
        for k in 0..q.len() {
            let mut q2 = q;
            q2[k] += eps;
            let fk2 = forward_kinematics_chain(&chain, &Isometry3::identity(), &q2);
            let p1 = fk.last().unwrap().1.translation.vector;
            let p2 = fk2.last().unwrap().1.translation.vector;
            let d = (p2 - p1) / eps;
            for row in 0..3 {
                assert_relative_eq!(j[(row, k)], d[row], epsilon = 1e-5);
            }
        }
    }
}
