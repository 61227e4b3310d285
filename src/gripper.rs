//! Parallel gripper model: element links, TCP offset and attachment state.

use nalgebra::Isometry3;

use crate::link::Geometry;
use crate::math::{translated, z_axis};

/// One gripper link with its pose relative to the end-effector frame.
#[derive(Debug, Clone)]
pub struct GripperElement {
    pub name: String,
    pub geometry: Option<Geometry>,
    pub rel_to_eef: Isometry3<f64>,
}

/// Record of an object currently held by the gripper.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub obj_name: String,
    /// Object pose at the moment it was picked.
    pub pick_obj_pose: Isometry3<f64>,
    /// End-effector pose at the moment it was picked.
    pub grasp_pose: Isometry3<f64>,
    /// Constant transform from the gripper (eef) frame to the object frame.
    pub gripper_to_obj: Isometry3<f64>,
}

/// A gripper mounted on the robot's end-effector.
///
/// The tool center point (TCP) sits `tcp_offset` metres along the
/// end-effector's approach (z) axis.
#[derive(Debug, Clone)]
pub struct Gripper {
    pub name: String,
    elements: Vec<GripperElement>,
    pub max_width: f64,
    pub max_depth: f64,
    pub tcp_offset: f64,
    pose: Isometry3<f64>,
    attachment: Option<Attachment>,
}

impl Gripper {
    pub fn new(name: impl Into<String>, max_width: f64, max_depth: f64, tcp_offset: f64) -> Self {
        Self {
            name: name.into(),
            elements: Vec::new(),
            max_width,
            max_depth,
            tcp_offset,
            pose: Isometry3::identity(),
            attachment: None,
        }
    }

    pub fn add_element(&mut self, element: GripperElement) {
        self.elements.push(element);
    }

    pub fn with_element(mut self, element: GripperElement) -> Self {
        self.elements.push(element);
        self
    }

    pub fn elements(&self) -> &[GripperElement] {
        &self.elements
    }

    /// Current end-effector pose of the gripper.
    pub fn pose(&self) -> &Isometry3<f64> {
        &self.pose
    }

    pub fn set_pose(&mut self, eef_pose: Isometry3<f64>) {
        self.pose = eef_pose;
    }

    /// World poses of all elements at the current gripper pose.
    pub fn element_poses(&self) -> impl Iterator<Item = (&str, Isometry3<f64>)> {
        self.elements
            .iter()
            .map(move |e| (e.name.as_str(), self.pose * e.rel_to_eef))
    }

    /// TCP pose for a given end-effector pose.
    pub fn tcp_pose_from_eef(&self, eef_pose: &Isometry3<f64>) -> Isometry3<f64> {
        translated(eef_pose, &(z_axis(eef_pose) * self.tcp_offset))
    }

    /// End-effector pose for a given TCP pose:
    /// `t_eef = t_tcp - tcp_offset * z_tcp`, same rotation.
    pub fn eef_pose_from_tcp(&self, tcp_pose: &Isometry3<f64>) -> Isometry3<f64> {
        translated(tcp_pose, &(z_axis(tcp_pose) * -self.tcp_offset))
    }

    /// TCP pose at the current gripper pose.
    pub fn tcp_pose(&self) -> Isometry3<f64> {
        self.tcp_pose_from_eef(&self.pose)
    }

    pub fn is_attached(&self) -> bool {
        self.attachment.is_some()
    }

    pub fn attachment(&self) -> Option<&Attachment> {
        self.attachment.as_ref()
    }

    pub fn attach(&mut self, attachment: Attachment) {
        self.attachment = Some(attachment);
    }

    pub fn detach(&mut self) -> Option<Attachment> {
        self.attachment.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn tcp_eef_round_trip() {
        let gripper = Gripper::new("hand", 0.08, 0.035, 0.097);
        let eef = Isometry3::new(
            Vector3::new(0.4, -0.1, 0.5),
            Vector3::new(0.3, FRAC_PI_2, 0.0),
        );
        let tcp = gripper.tcp_pose_from_eef(&eef);
        let back = gripper.eef_pose_from_tcp(&tcp);
        assert_relative_eq!(
            (eef.translation.vector - back.translation.vector).norm(),
            0.0,
            epsilon = 1e-12
        );
        // the offset runs along the approach axis
        assert_relative_eq!(
            (tcp.translation.vector - eef.translation.vector).norm(),
            0.097,
            epsilon = 1e-12
        );
    }

    #[test]
    fn elements_follow_the_pose() {
        let mut gripper = Gripper::new("hand", 0.08, 0.035, 0.0);
        gripper.add_element(GripperElement {
            name: "finger".to_owned(),
            geometry: None,
            rel_to_eef: Isometry3::translation(0.0, 0.04, 0.0),
        });
        gripper.set_pose(Isometry3::translation(1.0, 0.0, 0.0));
        let (_, pose) = gripper.element_poses().next().unwrap();
        assert_relative_eq!(pose.translation.vector.x, 1.0, epsilon = 1e-12);
        assert_relative_eq!(pose.translation.vector.y, 0.04, epsilon = 1e-12);
    }
}
