//! Robot models: a single-arm manipulator and a bimanual torso robot.

use std::collections::HashMap;

use nalgebra::Isometry3;

use crate::errors::{Error, Result};
use crate::frame::{Frame, FrameId, FrameTree};
use crate::gripper::Gripper;
use crate::ik::{IkMethod, IkSolution, IkSolver};
use crate::joint::Limits;
use crate::kinematics::{forward_kinematics, forward_kinematics_chain, Transforms};
use crate::math::pose_distance;

/// A single-arm manipulator: a kinematic tree with a designated base and
/// end-effector link, an optional gripper, and a world offset.
#[derive(Debug, Clone)]
pub struct SingleArm {
    pub name: String,
    tree: FrameTree,
    offset: Isometry3<f64>,
    base_name: Option<String>,
    eef_name: Option<String>,
    chain: Vec<FrameId>,
    pub gripper: Option<Gripper>,
}

impl SingleArm {
    pub fn new(name: impl Into<String>, tree: FrameTree, offset: Isometry3<f64>) -> Self {
        let chain = tree.dfs().to_vec();
        Self {
            name: name.into(),
            tree,
            offset,
            base_name: None,
            eef_name: None,
            chain,
            gripper: None,
        }
    }

    /// Builds the robot from a parsed URDF model.
    pub fn from_urdf(robot: &urdf_rs::Robot, offset: Isometry3<f64>) -> Result<Self> {
        let tree = crate::urdf::frame_tree_from_urdf(robot)?;
        Ok(Self::new(robot.name.clone(), tree, offset))
    }

    /// Declares the base and end-effector links; the IK chain runs from the
    /// root through `eef_name`.
    pub fn setup_link_name(&mut self, base_name: Option<&str>, eef_name: &str) -> Result<()> {
        if let Some(base) = base_name {
            if self.tree.find_link(base).is_none() {
                return Err(Error::UnknownName(base.to_owned()));
            }
            self.base_name = Some(base.to_owned());
        }
        let chain = self
            .tree
            .chain_to(eef_name)
            .ok_or_else(|| Error::UnknownName(eef_name.to_owned()))?;
        self.eef_name = Some(eef_name.to_owned());
        self.chain = chain;
        Ok(())
    }

    pub fn tree(&self) -> &FrameTree {
        &self.tree
    }

    pub fn offset(&self) -> &Isometry3<f64> {
        &self.offset
    }

    pub fn eef_name(&self) -> Option<&str> {
        self.eef_name.as_deref()
    }

    pub fn base_name(&self) -> Option<&str> {
        self.base_name.as_deref()
    }

    /// Degrees of freedom of the whole tree.
    pub fn dof(&self) -> usize {
        self.tree.dof()
    }

    /// Degrees of freedom along the IK chain.
    pub fn arm_dof(&self) -> usize {
        self.chain_frames()
            .iter()
            .filter(|f| f.joint.is_movable())
            .count()
    }

    pub fn chain_frames(&self) -> Vec<&Frame> {
        self.tree.frames_of(&self.chain)
    }

    /// Limits of the chain's movable joints, in order.
    pub fn arm_joint_limits(&self) -> Vec<Option<Limits>> {
        self.chain_frames()
            .iter()
            .filter(|f| f.joint.is_movable())
            .map(|f| f.joint.limits)
            .collect()
    }

    /// Whether each movable chain joint is continuous, in order.
    pub fn arm_joint_continuous(&self) -> Vec<bool> {
        self.chain_frames()
            .iter()
            .filter(|f| f.joint.is_movable())
            .map(|f| f.joint.joint_type.is_continuous())
            .collect()
    }

    /// Link geometries of the whole tree, for collision setup.
    pub fn link_geometries(&self) -> Vec<(&str, &crate::link::Geometry)> {
        self.tree
            .dfs()
            .iter()
            .filter_map(|&id| {
                let frame = self.tree.get(id);
                frame
                    .link
                    .geometry
                    .as_ref()
                    .map(|g| (frame.link.name.as_str(), g))
            })
            .collect()
    }

    /// Forward kinematics of the whole tree; `q` covers all active joints.
    pub fn forward_kin(&self, q: &[f64]) -> Result<Transforms> {
        forward_kinematics(&self.tree, &self.offset, q)
    }

    /// Forward kinematics along the IK chain; `q` covers the chain's
    /// movable joints only.
    pub fn forward_kin_chain(&self, q: &[f64]) -> Transforms {
        forward_kinematics_chain(&self.chain_frames(), &self.offset, q)
    }

    /// Inverse kinematics towards `target_pose` from `q_seed`.
    ///
    /// The best joint vector reached is always inside the returned
    /// [`IkSolution`]; converged-ness is decided by pose error.
    pub fn inverse_kin(
        &self,
        q_seed: &[f64],
        target_pose: &Isometry3<f64>,
        method: IkMethod,
        max_iter: usize,
    ) -> Result<IkSolution> {
        if q_seed.len() != self.arm_dof() {
            return Err(Error::MismatchedDof {
                expected: self.arm_dof(),
                actual: q_seed.len(),
            });
        }
        let solver = IkSolver::new(method, max_iter);
        Ok(solver.solve(&self.chain_frames(), &self.offset, q_seed, target_pose))
    }

    /// End-effector pose out of an FK result.
    pub fn get_eef_pose(&self, fk: &Transforms) -> Option<Isometry3<f64>> {
        match &self.eef_name {
            Some(name) => fk.get(name).copied(),
            None => fk.last().map(|(_, pose)| *pose),
        }
    }

    /// Scalar pose error between two poses.
    pub fn get_pose_error(&self, p1: &Isometry3<f64>, p2: &Isometry3<f64>) -> f64 {
        pose_distance(p1, p2)
    }

    pub fn has_gripper(&self) -> bool {
        self.gripper.is_some()
    }
}

/// Arm selector of a bimanual robot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arm {
    Right,
    Left,
}

/// A bimanual robot: one shared tree (torso) with two end-effectors.
#[derive(Debug, Clone)]
pub struct Bimanual {
    pub name: String,
    tree: FrameTree,
    offset: Isometry3<f64>,
    eef_names: HashMap<Arm, String>,
    chains: HashMap<Arm, Vec<FrameId>>,
    /// Fixed links on the shared torso that chain FK results also report,
    /// so downstream consumers see the torso geometry.
    visual_links: Vec<String>,
}

impl Bimanual {
    pub fn new(name: impl Into<String>, tree: FrameTree, offset: Isometry3<f64>) -> Self {
        Self {
            name: name.into(),
            tree,
            offset,
            eef_names: HashMap::new(),
            chains: HashMap::new(),
            visual_links: Vec::new(),
        }
    }

    pub fn from_urdf(robot: &urdf_rs::Robot, offset: Isometry3<f64>) -> Result<Self> {
        let tree = crate::urdf::frame_tree_from_urdf(robot)?;
        Ok(Self::new(robot.name.clone(), tree, offset))
    }

    /// Declares the end-effector link of one arm.
    pub fn setup_link_name(&mut self, arm: Arm, eef_name: &str) -> Result<()> {
        let chain = self
            .tree
            .chain_to(eef_name)
            .ok_or_else(|| Error::UnknownName(eef_name.to_owned()))?;
        self.eef_names.insert(arm, eef_name.to_owned());
        self.chains.insert(arm, chain);
        Ok(())
    }

    /// Registers fixed torso links to inject into chain FK results.
    pub fn set_visual_links(&mut self, names: impl IntoIterator<Item = String>) {
        self.visual_links = names.into_iter().collect();
    }

    pub fn tree(&self) -> &FrameTree {
        &self.tree
    }

    pub fn dof(&self) -> usize {
        self.tree.dof()
    }

    pub fn arms(&self) -> impl Iterator<Item = Arm> + '_ {
        [Arm::Right, Arm::Left]
            .into_iter()
            .filter(|arm| self.chains.contains_key(arm))
    }

    pub fn eef_name(&self, arm: Arm) -> Option<&str> {
        self.eef_names.get(&arm).map(String::as_str)
    }

    pub fn arm_chain(&self, arm: Arm) -> Result<Vec<&Frame>> {
        let chain = self
            .chains
            .get(&arm)
            .ok_or_else(|| Error::InvalidModel(format!("arm {arm:?} is not set up")))?;
        Ok(self.tree.frames_of(chain))
    }

    pub fn arm_dof(&self, arm: Arm) -> Result<usize> {
        Ok(self
            .arm_chain(arm)?
            .iter()
            .filter(|f| f.joint.is_movable())
            .count())
    }

    pub fn arm_joint_limits(&self, arm: Arm) -> Result<Vec<Option<Limits>>> {
        Ok(self
            .arm_chain(arm)?
            .iter()
            .filter(|f| f.joint.is_movable())
            .map(|f| f.joint.limits)
            .collect())
    }

    /// Forward kinematics of the whole tree.
    pub fn forward_kin(&self, q: &[f64]) -> Result<Transforms> {
        forward_kinematics(&self.tree, &self.offset, q)
    }

    /// Forward kinematics along one arm's chain, with the shared-torso
    /// visual links injected afterwards.
    pub fn forward_kin_chain(&self, arm: Arm, q: &[f64]) -> Result<Transforms> {
        let chain = self.arm_chain(arm)?;
        let mut fk = forward_kinematics_chain(&chain, &self.offset, q);
        self.inject_visual_links(&mut fk);
        Ok(fk)
    }

    /// End-effector poses keyed by arm, out of a full-tree FK result.
    pub fn compute_eef_pose(&self, fk: &Transforms) -> HashMap<Arm, Isometry3<f64>> {
        self.eef_names
            .iter()
            .filter_map(|(&arm, name)| fk.get(name).map(|pose| (arm, *pose)))
            .collect()
    }

    /// Inverse kinematics for one arm.
    pub fn inverse_kin(
        &self,
        arm: Arm,
        q_seed: &[f64],
        target_pose: &Isometry3<f64>,
        method: IkMethod,
        max_iter: usize,
    ) -> Result<IkSolution> {
        let chain = self.arm_chain(arm)?;
        let dof = chain.iter().filter(|f| f.joint.is_movable()).count();
        if q_seed.len() != dof {
            return Err(Error::MismatchedDof {
                expected: dof,
                actual: q_seed.len(),
            });
        }
        let solver = IkSolver::new(method, max_iter);
        Ok(solver.solve(&chain, &self.offset, q_seed, target_pose))
    }

    pub fn get_pose_error(&self, p1: &Isometry3<f64>, p2: &Isometry3<f64>) -> f64 {
        pose_distance(p1, p2)
    }

    /// Adds the configured fixed torso links to a chain FK result.
    ///
    /// Their poses depend only on fixed joints above them, so a zero joint
    /// vector evaluates them exactly.
    fn inject_visual_links(&self, fk: &mut Transforms) {
        if self.visual_links.is_empty() {
            return;
        }
        let zeros = vec![0.0; self.tree.dof()];
        if let Ok(full) = forward_kinematics(&self.tree, &self.offset, &zeros) {
            for name in &self.visual_links {
                if !fk.contains(name) {
                    if let Some(pose) = full.get(name) {
                        fk.insert(name.clone(), *pose);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Frame, FrameTreeBuilder};
    use crate::joint::{Joint, JointType};
    use crate::link::Link;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    fn torso_with_two_arms() -> FrameTree {
        let mut builder = FrameTreeBuilder::new();
        let root = builder.add_root(Frame::new(Link::new("torso"), Joint::fixed("root")));
        builder.add_child(
            root,
            Frame::new(Link::new("head"), Joint::fixed("head_fix")),
        );
        for (side, offset) in [("right", -0.2), ("left", 0.2)] {
            let shoulder = Joint::new(
                format!("{side}_shoulder"),
                JointType::Revolute {
                    axis: Vector3::z_axis(),
                },
            )
            .with_origin(Isometry3::translation(0.0, offset, 0.3));
            let upper = builder.add_child(
                root,
                Frame::new(Link::new(format!("{side}_upper")), shoulder),
            );
            let elbow = Joint::new(
                format!("{side}_elbow"),
                JointType::Revolute {
                    axis: Vector3::y_axis(),
                },
            )
            .with_origin(Isometry3::translation(0.3, 0.0, 0.0));
            let fore = builder.add_child(
                upper,
                Frame::new(Link::new(format!("{side}_fore")), elbow),
            );
            let wrist =
                Joint::fixed(format!("{side}_wrist")).with_origin(Isometry3::translation(
                    0.25, 0.0, 0.0,
                ));
            builder.add_child(
                fore,
                Frame::new(Link::new(format!("{side}_hand")), wrist),
            );
        }
        builder.finalize().unwrap()
    }

    #[test]
    fn single_arm_fk_and_eef() {
        let tree = torso_with_two_arms();
        let mut robot = SingleArm::new("demo", tree, Isometry3::identity());
        robot.setup_link_name(Some("torso"), "right_hand").unwrap();
        assert_eq!(robot.dof(), 4);
        assert_eq!(robot.arm_dof(), 2);
        let fk = robot.forward_kin(&[0.0; 4]).unwrap();
        let eef = robot.get_eef_pose(&fk).unwrap();
        assert_relative_eq!(eef.translation.vector.x, 0.55, epsilon = 1e-12);
        assert_relative_eq!(eef.translation.vector.y, -0.2, epsilon = 1e-12);
    }

    #[test]
    fn bimanual_eef_poses_are_keyed_by_arm() {
        let tree = torso_with_two_arms();
        let mut robot = Bimanual::new("demo", tree, Isometry3::identity());
        robot.setup_link_name(Arm::Right, "right_hand").unwrap();
        robot.setup_link_name(Arm::Left, "left_hand").unwrap();
        let fk = robot.forward_kin(&[0.0; 4]).unwrap();
        let eefs = robot.compute_eef_pose(&fk);
        assert_eq!(eefs.len(), 2);
        assert_relative_eq!(eefs[&Arm::Right].translation.vector.y, -0.2, epsilon = 1e-12);
        assert_relative_eq!(eefs[&Arm::Left].translation.vector.y, 0.2, epsilon = 1e-12);
    }

    #[test]
    fn torso_visual_links_appear_in_chain_fk() {
        let tree = torso_with_two_arms();
        let mut robot = Bimanual::new("demo", tree, Isometry3::identity());
        robot.setup_link_name(Arm::Right, "right_hand").unwrap();
        robot.set_visual_links(vec!["head".to_owned()]);
        let fk = robot.forward_kin_chain(Arm::Right, &[0.1, -0.2]).unwrap();
        assert!(fk.contains("head"));
        assert!(fk.contains("right_hand"));
        assert!(!fk.contains("left_hand"));
    }
}
