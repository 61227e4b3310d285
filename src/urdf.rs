//! Conversion from parsed [`urdf_rs`] records into a [`FrameTree`].
//!
//! Only the already-parsed model is consumed here; XML parsing stays in
//! `urdf_rs`, and mesh file loading stays with the caller, which can hand
//! pre-loaded meshes in through a provider closure.

use std::collections::HashMap;
use std::sync::Arc;

use nalgebra::{Isometry3, Translation3, Unit, UnitQuaternion, Vector3};
use tracing::debug;

use crate::errors::{Error, Result};
use crate::frame::{Frame, FrameId, FrameTree, FrameTreeBuilder};
use crate::joint::{Joint, JointType};
use crate::link::{Geometry, Link};
use crate::mesh::TriMesh;

/// Builds a frame tree from a parsed URDF robot, dropping mesh geometries.
pub fn frame_tree_from_urdf(robot: &urdf_rs::Robot) -> Result<FrameTree> {
    frame_tree_with_meshes(robot, |_| None)
}

/// Builds a frame tree from a parsed URDF robot.
///
/// `mesh_provider` maps a mesh filename to a pre-loaded [`TriMesh`];
/// returning `None` leaves the link without geometry.
pub fn frame_tree_with_meshes(
    robot: &urdf_rs::Robot,
    mut mesh_provider: impl FnMut(&str) -> Option<Arc<TriMesh>>,
) -> Result<FrameTree> {
    let links: HashMap<&str, &urdf_rs::Link> = robot
        .links
        .iter()
        .map(|l| (l.name.as_str(), l))
        .collect();

    // joints grouped by parent link, in declaration order
    let mut children: HashMap<&str, Vec<&urdf_rs::Joint>> = HashMap::new();
    let mut has_parent: HashMap<&str, bool> = HashMap::new();
    for joint in &robot.joints {
        if !links.contains_key(joint.parent.link.as_str()) {
            return Err(Error::InvalidModel(format!(
                "joint {} references unknown parent link {}",
                joint.name, joint.parent.link
            )));
        }
        if !links.contains_key(joint.child.link.as_str()) {
            return Err(Error::InvalidModel(format!(
                "joint {} references unknown child link {}",
                joint.name, joint.child.link
            )));
        }
        children
            .entry(joint.parent.link.as_str())
            .or_default()
            .push(joint);
        has_parent.insert(joint.child.link.as_str(), true);
    }

    let root = robot
        .links
        .iter()
        .find(|l| !has_parent.contains_key(l.name.as_str()))
        .ok_or_else(|| Error::InvalidModel("urdf model has no root link".to_owned()))?;

    let mut builder = FrameTreeBuilder::new();
    let root_id = builder.add_root(Frame::new(
        convert_link(root, &mut mesh_provider),
        Joint::fixed(format!("{}_root", root.name)),
    ));

    // non-recursive expansion keeps declaration order per parent
    let mut stack: Vec<(&str, FrameId)> = vec![(root.name.as_str(), root_id)];
    while let Some((link_name, parent_id)) = stack.pop() {
        let Some(joints) = children.get(link_name) else {
            continue;
        };
        let mut added = Vec::with_capacity(joints.len());
        for joint in joints.iter() {
            let child_link = links[joint.child.link.as_str()];
            let id = builder.add_child(
                parent_id,
                Frame::new(
                    convert_link(child_link, &mut mesh_provider),
                    convert_joint(joint)?,
                ),
            );
            added.push((child_link.name.as_str(), id));
        }
        stack.extend(added.into_iter().rev());
    }

    builder.finalize()
}

fn convert_joint(joint: &urdf_rs::Joint) -> Result<Joint> {
    let axis = Unit::new_normalize(Vector3::new(
        joint.axis.xyz.0[0],
        joint.axis.xyz.0[1],
        joint.axis.xyz.0[2],
    ));
    let joint_type = match joint.joint_type {
        urdf_rs::JointType::Fixed => JointType::Fixed,
        urdf_rs::JointType::Revolute => JointType::Revolute { axis },
        urdf_rs::JointType::Prismatic => JointType::Prismatic { axis },
        urdf_rs::JointType::Continuous => JointType::Continuous { axis },
        ref other => {
            return Err(Error::InvalidModel(format!(
                "joint {} has unsupported type {other:?}",
                joint.name
            )))
        }
    };
    let mut converted = Joint::new(joint.name.clone(), joint_type)
        .with_origin(isometry_from_pose(&joint.origin));
    // urdf emits limit 0..0 for continuous joints; leave those unbounded
    let has_limits = matches!(
        joint.joint_type,
        urdf_rs::JointType::Revolute | urdf_rs::JointType::Prismatic
    );
    if has_limits {
        converted = converted.with_limits(joint.limit.lower, joint.limit.upper);
    }
    Ok(converted)
}

fn convert_link(
    link: &urdf_rs::Link,
    mesh_provider: &mut impl FnMut(&str) -> Option<Arc<TriMesh>>,
) -> Link {
    let mut converted = Link::new(link.name.clone());
    // prefer collision geometry, fall back to visual
    let (geometry, origin) = match (link.collision.first(), link.visual.first()) {
        (Some(collision), _) => (
            convert_geometry(&collision.geometry, mesh_provider),
            isometry_from_pose(&collision.origin),
        ),
        (None, Some(visual)) => (
            convert_geometry(&visual.geometry, mesh_provider),
            isometry_from_pose(&visual.origin),
        ),
        (None, None) => (None, Isometry3::identity()),
    };
    if geometry.is_none() && (!link.collision.is_empty() || !link.visual.is_empty()) {
        debug!(link = %link.name, "geometry not resolved, link left bare");
    }
    if let Some(geometry) = geometry {
        converted = converted.with_geometry(geometry).with_offset(origin);
    }
    if let Some(color) = link
        .visual
        .first()
        .and_then(|v| v.material.as_ref())
        .and_then(|m| m.color.as_ref())
    {
        let rgba = color.rgba.0;
        converted = converted.with_color([
            rgba[0] as f32,
            rgba[1] as f32,
            rgba[2] as f32,
            rgba[3] as f32,
        ]);
    }
    converted
}

fn convert_geometry(
    geometry: &urdf_rs::Geometry,
    mesh_provider: &mut impl FnMut(&str) -> Option<Arc<TriMesh>>,
) -> Option<Geometry> {
    match geometry {
        urdf_rs::Geometry::Box { size } => Some(Geometry::Box {
            extents: Vector3::new(size.0[0], size.0[1], size.0[2]),
        }),
        urdf_rs::Geometry::Sphere { radius } => Some(Geometry::Sphere { radius: *radius }),
        urdf_rs::Geometry::Cylinder { radius, length } => Some(Geometry::Cylinder {
            radius: *radius,
            length: *length,
        }),
        urdf_rs::Geometry::Capsule { radius, length } => Some(Geometry::Capsule {
            radius: *radius,
            length: *length,
        }),
        urdf_rs::Geometry::Mesh { filename, .. } => mesh_provider(filename)
            .map(|mesh| Geometry::Mesh { mesh }),
    }
}

fn isometry_from_pose(pose: &urdf_rs::Pose) -> Isometry3<f64> {
    Isometry3::from_parts(
        Translation3::new(pose.xyz.0[0], pose.xyz.0[1], pose.xyz.0[2]),
        UnitQuaternion::from_euler_angles(pose.rpy.0[0], pose.rpy.0[1], pose.rpy.0[2]),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        <robot name="two_link">
          <link name="base"/>
          <link name="upper"/>
          <link name="hand"/>
          <joint name="shoulder" type="revolute">
            <parent link="base"/>
            <child link="upper"/>
            <origin xyz="0 0 0.1" rpy="0 0 0"/>
            <axis xyz="0 0 1"/>
            <limit lower="-1.5" upper="1.5" effort="10" velocity="1"/>
          </joint>
          <joint name="wrist" type="fixed">
            <parent link="upper"/>
            <child link="hand"/>
            <origin xyz="0 0 0.2" rpy="0 0 0"/>
          </joint>
        </robot>
    "#;

    #[test]
    fn converts_links_joints_and_limits() {
        let robot = urdf_rs::read_from_string(SAMPLE).unwrap();
        let tree = frame_tree_from_urdf(&robot).unwrap();
        assert_eq!(tree.len(), 3);
        assert_eq!(tree.dof(), 1);
        assert_eq!(tree.active_joint_names(), vec!["shoulder"]);
        let id = tree.find_joint("shoulder").unwrap();
        let limits = tree.get(id).joint.limits.unwrap();
        assert_eq!(limits.min, -1.5);
        assert_eq!(limits.max, 1.5);
        let chain = tree.chain_to("hand").unwrap();
        assert_eq!(chain.len(), 3);
    }
}
