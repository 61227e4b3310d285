//! High-level pick and place action generation.
//!
//! Candidate actions flow through successive filters: level 1 keeps
//! candidates whose gripper-only placement is collision free, level 2
//! keeps those with a consistent IK solution and a collision-free robot,
//! level 3 asks a planner for a feasible joint path.

mod pick;
mod place;

pub use pick::{ContactPair, PickAction};
pub use place::PlaceAction;

use nalgebra::{Isometry3, Unit, UnitVector3, Vector3};

use crate::errors::Result;
use crate::math::orthogonal_to;
use crate::planner::{RrtStarConfig, RrtStarPlanner};
use crate::scene::SceneManager;

/// Pose error below which an IK solution counts as reaching its target.
pub(crate) const IK_ACCEPT_EPS: f64 = 1e-3;
/// IK iteration budget used by the action filters.
pub(crate) const IK_MAX_ITER: usize = 100;

/// Grasp pose set: approach, grasp and lift-off end-effector poses plus
/// the TCP frame they derive from.
#[derive(Debug, Clone)]
pub struct GraspPoses {
    pub pre_grasp: Isometry3<f64>,
    pub grasp: Isometry3<f64>,
    pub post_grasp: Isometry3<f64>,
    pub tcp: Isometry3<f64>,
}

/// Release pose set emitted by the place action, together with the
/// placed object pose it corresponds to.
#[derive(Debug, Clone)]
pub struct ReleasePoses {
    pub pre_release: Isometry3<f64>,
    pub release: Isometry3<f64>,
    pub post_release: Isometry3<f64>,
    pub obj_pose: Isometry3<f64>,
}

/// A fully parameterised candidate action.
#[derive(Debug, Clone)]
pub enum Action {
    Pick {
        obj_name: String,
        grasp_poses: Vec<GraspPoses>,
    },
    Place {
        support_obj_name: String,
        held_obj_name: String,
        release_poses: Vec<ReleasePoses>,
    },
}

impl Action {
    pub fn is_empty(&self) -> bool {
        match self {
            Action::Pick { grasp_poses, .. } => grasp_poses.is_empty(),
            Action::Place { release_poses, .. } => release_poses.is_empty(),
        }
    }
}

/// Capability interface of an action generator.
pub trait Activity {
    fn scene(&self) -> &SceneManager;
    fn scene_mut(&mut self) -> &mut SceneManager;

    /// Candidates that pass the gripper-only collision filter.
    fn possible_actions_level_1(&mut self) -> Result<Vec<Action>>;

    /// Refines one candidate with the IK + full-robot collision filter.
    fn possible_ik_solve_level_2(&mut self, action: Action) -> Result<Action>;

    /// Scene snapshots resulting from applying one candidate.
    fn possible_transitions(&mut self, action: &Action) -> Result<Vec<SceneManager>>;

    /// Joint path to the first executable pose of one candidate.
    fn possible_joint_path_level_3(&mut self, action: &Action) -> Result<Vec<Vec<f64>>> {
        let target = match action {
            Action::Pick { grasp_poses, .. } => {
                grasp_poses.first().map(|g| g.grasp)
            }
            Action::Place { release_poses, .. } => {
                release_poses.first().map(|r| r.release)
            }
        }
        .ok_or(crate::errors::Error::NoPlanFound)?;

        let scene = self.scene_mut();
        let goal_q = scene.compute_ik(&target, IK_MAX_ITER)?.into_result()?;
        let start_q = scene.current_joints().to_vec();
        let dimension = goal_q.len();
        let mut planner = RrtStarPlanner::new(RrtStarConfig::new(dimension));
        planner.setup_start_goal_joint(&start_q, &goal_q)?;
        planner.run(scene)?;
        planner
            .get_joint_path(30)
            .ok_or(crate::errors::Error::NoPlanFound)
    }
}

/// Directions swept uniformly around `line`, perpendicular to it.
///
/// These become the candidate approach (z) axes of TCP frames whose y
/// axis runs along the contact line.
pub(crate) fn grasp_directions(line: &Vector3<f64>, n: usize) -> Vec<UnitVector3<f64>> {
    let e1 = orthogonal_to(line);
    let e2 = Unit::new_normalize(line.cross(&e1));
    (0..n)
        .map(|k| {
            let theta = std::f64::consts::TAU * k as f64 / n as f64;
            Unit::new_normalize(e1.into_inner() * theta.cos() + e2.into_inner() * theta.sin())
        })
        .collect()
}

/// Temporarily attaches an object to the gripper, restoring the previous
/// managers and logical state when dropped.
pub(crate) struct ScopedAttachment<'a> {
    scene: &'a mut SceneManager,
}

impl<'a> ScopedAttachment<'a> {
    pub(crate) fn attach(scene: &'a mut SceneManager, obj_name: &str) -> Result<Self> {
        scene.attach_object_on_gripper(obj_name)?;
        Ok(Self { scene })
    }

    pub(crate) fn scene_mut(&mut self) -> &mut SceneManager {
        self.scene
    }
}

impl Drop for ScopedAttachment<'_> {
    fn drop(&mut self) {
        // restoration must happen on every exit path
        let _ = self.scene.detach_object_from_gripper();
    }
}
