//! Task-space planner: SE(3) interpolation with per-waypoint damped IK.

use nalgebra::Isometry3;
use tracing::debug;

use crate::errors::{Error, Result};
use crate::ik::damped_least_squares_step;
use crate::kinematics::{forward_kinematics_chain, jacobian};
use crate::math::{interpolate_pose, pose_error};
use crate::scene::SceneManager;

/// Cartesian planner parameters.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CartesianConfig {
    /// Minimum number of interpolated waypoints.
    pub n_step: usize,
    /// Number of active joints.
    pub dimension: usize,
    /// Per-waypoint IK convergence threshold on the pose error norm.
    pub epsilon: f64,
    /// Maximum task-space distance between consecutive waypoints; the
    /// waypoint count grows beyond `n_step` when needed.
    pub resolution: f64,
    /// Damping of the least-squares IK step.
    pub damping: f64,
    /// Acceptance bound on the positional error at each waypoint.
    pub pos_thresh: f64,
    /// Validate every waypoint against the scene's collision managers.
    pub collision_check: bool,
}

impl CartesianConfig {
    pub fn new(dimension: usize) -> Self {
        Self {
            n_step: 500,
            dimension,
            epsilon: 1e-6,
            resolution: 0.1,
            damping: 0.05,
            pos_thresh: 0.03,
            collision_check: false,
        }
    }
}

const WAYPOINT_MAX_ITER: usize = 50;

/// Interpolates end-effector poses and tracks them with damped IK.
#[derive(Debug)]
pub struct CartesianPlanner {
    cfg: CartesianConfig,
    waypoints: Vec<Isometry3<f64>>,
    joint_path: Option<Vec<Vec<f64>>>,
}

impl CartesianPlanner {
    pub fn new(cfg: CartesianConfig) -> Self {
        Self {
            cfg,
            waypoints: Vec::new(),
            joint_path: None,
        }
    }

    pub fn config(&self) -> &CartesianConfig {
        &self.cfg
    }

    /// Plans from the robot pose at `current_q` to `goal_pose`.
    ///
    /// On failure ([`Error::NoPlanFound`], unconverged waypoint IK) no
    /// joint path is stored.
    pub fn run(
        &mut self,
        scene: &mut SceneManager,
        current_q: &[f64],
        goal_pose: &Isometry3<f64>,
    ) -> Result<()> {
        self.joint_path = None;
        let robot = scene
            .robot
            .as_ref()
            .ok_or_else(|| Error::InvalidModel("scene has no robot".to_owned()))?;
        if current_q.len() != self.cfg.dimension {
            return Err(Error::MismatchedDof {
                expected: self.cfg.dimension,
                actual: current_q.len(),
            });
        }
        let fk = robot.forward_kin_chain(current_q);
        let start_pose = robot
            .get_eef_pose(&fk)
            .ok_or_else(|| Error::InvalidModel("robot has no end-effector link".to_owned()))?;

        self.waypoints = self.interpolate(&start_pose, goal_pose);
        let path = self.track_waypoints(scene, current_q);
        if self.cfg.collision_check {
            scene.restore_collision_state()?;
        }
        self.joint_path = Some(path?);
        Ok(())
    }

    /// The joint trajectory and the target poses of the last run.
    pub fn get_path_in_joint_space(&self) -> Result<(&[Vec<f64>], &[Isometry3<f64>])> {
        match &self.joint_path {
            Some(path) => Ok((path, &self.waypoints)),
            None => Err(Error::NoPlanFound),
        }
    }

    /// Plans with explicit solver parameters, overriding the config.
    #[allow(clippy::too_many_arguments)]
    pub fn get_path_in_joint_space_with(
        &mut self,
        scene: &mut SceneManager,
        current_q: &[f64],
        goal_pose: &Isometry3<f64>,
        epsilon: f64,
        resolution: f64,
        damping: f64,
        pos_thresh: f64,
    ) -> Result<(Vec<Vec<f64>>, Vec<Isometry3<f64>>)> {
        self.cfg.epsilon = epsilon;
        self.cfg.resolution = resolution;
        self.cfg.damping = damping;
        self.cfg.pos_thresh = pos_thresh;
        self.run(scene, current_q, goal_pose)?;
        let (path, poses) = self.get_path_in_joint_space()?;
        Ok((path.to_vec(), poses.to_vec()))
    }

    /// Linear translation + slerp rotation over the waypoint count.
    fn interpolate(
        &self,
        start: &Isometry3<f64>,
        goal: &Isometry3<f64>,
    ) -> Vec<Isometry3<f64>> {
        let distance = (goal.translation.vector - start.translation.vector).norm();
        let by_resolution = (distance / self.cfg.resolution).ceil() as usize;
        let n = self.cfg.n_step.max(by_resolution).max(1);
        (0..=n)
            .map(|i| interpolate_pose(start, goal, i as f64 / n as f64))
            .collect()
    }

    fn track_waypoints(
        &self,
        scene: &mut SceneManager,
        current_q: &[f64],
    ) -> Result<Vec<Vec<f64>>> {
        let mut q = current_q.to_vec();
        let mut path = Vec::with_capacity(self.waypoints.len());
        for (i, target) in self.waypoints.iter().enumerate() {
            let robot = scene
                .robot
                .as_ref()
                .ok_or_else(|| Error::InvalidModel("scene has no robot".to_owned()))?;
            let chain = robot.chain_frames();
            let base = *robot.offset();
            let mut err = {
                let fk = forward_kinematics_chain(&chain, &base, &q);
                pose_error(target, fk.last().map(|(_, p)| p).unwrap_or(&base))
            };
            for _ in 0..WAYPOINT_MAX_ITER {
                if err.norm() <= self.cfg.epsilon {
                    break;
                }
                let fk = forward_kinematics_chain(&chain, &base, &q);
                let j = jacobian(&chain, &fk, q.len());
                let dq = damped_least_squares_step(&j, &err, self.cfg.damping);
                for (qi, d) in q.iter_mut().zip(dq.iter()) {
                    *qi += d;
                }
                let fk = forward_kinematics_chain(&chain, &base, &q);
                err = pose_error(target, fk.last().map(|(_, p)| p).unwrap_or(&base));
            }
            let pos_err = err.fixed_rows::<3>(0).norm();
            if pos_err > self.cfg.pos_thresh {
                debug!(waypoint = i, pos_err, "waypoint ik exceeded tolerance");
                return Err(Error::NoPlanFound);
            }
            if self.cfg.collision_check && !scene.is_collision_free(&q) {
                debug!(waypoint = i, "waypoint in collision");
                return Err(Error::NoPlanFound);
            }
            path.push(q.clone());
        }
        Ok(path)
    }
}
