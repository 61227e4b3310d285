//! Scene manager: robot, movable objects, gripper and logical state.
//!
//! The scene owns three collision managers (robot, objects, gripper) and
//! keeps them in sync with the robot's joint vector and the gripper pose.
//! Planners treat a scene as a snapshot; [`SceneManager::copy_scene`]
//! produces a cheap copy that shares geometry through `Arc`.

use std::collections::BTreeMap;

use nalgebra::Isometry3;
use tracing::debug;

use crate::collision::CollisionManager;
use crate::errors::{Error, Result};
use crate::gripper::Attachment;
use crate::ik::{IkMethod, IkSolution};
use crate::link::Geometry;
use crate::robot::SingleArm;

/// Vertical tolerance of the `on` predicate: an object rests on a support
/// when its bottom face is within this distance of the support's top face.
const ON_EPS_Z: f64 = 2e-3;

/// Symbolic predicates attached to a scene entity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogicalState {
    /// Name of the object this one rests on.
    pub on: Option<String>,
    /// Whether the object is currently held by the gripper.
    pub held: bool,
    /// For the gripper entry: the object it is holding.
    pub holding: Option<String>,
    /// Static scenery is never picked and never re-derived as held.
    pub is_static: bool,
}

/// A movable or static object in the scene.
#[derive(Debug, Clone)]
pub struct SceneObject {
    pub name: String,
    pub geometry: Geometry,
    pub pose: Isometry3<f64>,
    pub color: Option<[f32; 4]>,
}

/// Pose and trajectory view handed to renderers; the core never calls a
/// renderer directly.
#[derive(Debug, Clone, Default)]
pub struct SceneView {
    pub link_poses: Vec<(String, Isometry3<f64>)>,
    pub object_poses: Vec<(String, Isometry3<f64>)>,
    pub trajectories: Vec<Vec<f64>>,
}

/// Rendering seam: adapters (mesh scene, plots, ...) implement this
/// outside the core.
pub trait SceneRender {
    fn render(&mut self, view: &SceneView);
}

/// The scene: one robot, named objects, logical state and the three
/// collision managers.
#[derive(Debug, Clone)]
pub struct SceneManager {
    pub robot: Option<SingleArm>,
    objs: BTreeMap<String, SceneObject>,
    logical_states: BTreeMap<String, LogicalState>,
    pub robot_collision_mngr: CollisionManager,
    pub obj_collision_mngr: CollisionManager,
    pub gripper_collision_mngr: CollisionManager,
    /// Transient names used while sequencing pick / place actions.
    pub pick_obj: Option<String>,
    pub place_obj: Option<String>,
    current_joints: Vec<f64>,
}

impl Default for SceneManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneManager {
    pub fn new() -> Self {
        Self {
            robot: None,
            objs: BTreeMap::new(),
            logical_states: BTreeMap::new(),
            robot_collision_mngr: CollisionManager::new("robot"),
            obj_collision_mngr: CollisionManager::new("object"),
            gripper_collision_mngr: CollisionManager::new("gripper"),
            pick_obj: None,
            place_obj: None,
            current_joints: Vec::new(),
        }
    }

    /// Adds the robot at `init_joints`, builds its collision manager and
    /// seeds the adjacency filter from the initial configuration.
    pub fn add_robot(&mut self, robot: SingleArm, init_joints: &[f64]) -> Result<()> {
        let fk = robot.forward_kin(init_joints)?;
        self.robot_collision_mngr
            .setup_robot_collision(robot.link_geometries(), &fk)?;
        self.robot_collision_mngr
            .filter_contact_names(&robot.tree().adjacent_link_pairs(), &fk);

        if let Some(gripper) = &robot.gripper {
            self.logical_states
                .entry(gripper.name.clone())
                .or_default();
            for element in gripper.elements() {
                if let Some(geometry) = &element.geometry {
                    self.gripper_collision_mngr.add_object(
                        element.name.clone(),
                        geometry,
                        *gripper.pose() * element.rel_to_eef,
                    )?;
                }
            }
        }
        self.current_joints = init_joints.to_vec();
        self.robot = Some(robot);
        self.sync_gripper_with_robot()?;
        Ok(())
    }

    /// Adds a named object; static scenery should set `is_static`.
    pub fn add_object(&mut self, object: SceneObject, is_static: bool) -> Result<()> {
        self.obj_collision_mngr
            .add_object(object.name.clone(), &object.geometry, object.pose)?;
        self.logical_states.insert(
            object.name.clone(),
            LogicalState {
                is_static,
                ..LogicalState::default()
            },
        );
        self.objs.insert(object.name.clone(), object);
        Ok(())
    }

    pub fn remove_object(&mut self, name: &str) -> Result<SceneObject> {
        let object = self
            .objs
            .remove(name)
            .ok_or_else(|| Error::UnknownName(name.to_owned()))?;
        // tolerate objects that sit in the gripper manager while held
        let _ = self.obj_collision_mngr.remove_object(name);
        let _ = self.gripper_collision_mngr.remove_object(name);
        self.logical_states.remove(name);
        Ok(object)
    }

    pub fn object(&self, name: &str) -> Option<&SceneObject> {
        self.objs.get(name)
    }

    pub fn objects(&self) -> impl Iterator<Item = &SceneObject> {
        self.objs.values()
    }

    pub fn set_object_pose(&mut self, name: &str, pose: Isometry3<f64>) -> Result<()> {
        let object = self
            .objs
            .get_mut(name)
            .ok_or_else(|| Error::UnknownName(name.to_owned()))?;
        object.pose = pose;
        if self.obj_collision_mngr.has_object(name) {
            self.obj_collision_mngr.set_transform(name, pose)?;
        }
        Ok(())
    }

    pub fn logical_state(&self, name: &str) -> Option<&LogicalState> {
        self.logical_states.get(name)
    }

    pub fn logical_states(&self) -> impl Iterator<Item = (&str, &LogicalState)> {
        self.logical_states.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn current_joints(&self) -> &[f64] {
        &self.current_joints
    }

    fn robot_ref(&self) -> Result<&SingleArm> {
        self.robot
            .as_ref()
            .ok_or_else(|| Error::InvalidModel("scene has no robot".to_owned()))
    }

    /// Sets the robot joint vector (chain joints) and re-syncs the robot
    /// and gripper collision managers.
    pub fn set_robot_eef_pose(&mut self, q: &[f64]) -> Result<()> {
        let robot = self.robot_ref()?;
        if q.len() != robot.arm_dof() {
            return Err(Error::MismatchedDof {
                expected: robot.arm_dof(),
                actual: q.len(),
            });
        }
        let fk = robot.forward_kin_chain(q);
        self.robot_collision_mngr.sync_transforms(&fk);
        self.current_joints = q.to_vec();
        self.sync_gripper_with_robot()?;
        Ok(())
    }

    /// Current end-effector pose at the scene's joint vector.
    pub fn get_robot_eef_pose(&self) -> Result<Isometry3<f64>> {
        let robot = self.robot_ref()?;
        let fk = robot.forward_kin_chain(&self.current_joints);
        robot
            .get_eef_pose(&fk)
            .ok_or_else(|| Error::InvalidModel("robot has no end-effector link".to_owned()))
    }

    /// Solves IK from the scene's current joints towards `pose`.
    pub fn compute_ik(&self, pose: &Isometry3<f64>, max_iter: usize) -> Result<IkSolution> {
        let robot = self.robot_ref()?;
        robot.inverse_kin(
            &self.current_joints,
            pose,
            IkMethod::LevenbergMarquardt,
            max_iter,
        )
    }

    /// Moves the gripper (and whatever it holds) to an end-effector pose.
    pub fn set_gripper_pose(&mut self, eef_pose: Isometry3<f64>) -> Result<()> {
        let robot = self.robot.as_mut().ok_or(Error::NoGripper)?;
        let gripper = robot.gripper.as_mut().ok_or(Error::NoGripper)?;
        gripper.set_pose(eef_pose);
        let element_poses: Vec<(String, Isometry3<f64>)> = gripper
            .element_poses()
            .map(|(name, pose)| (name.to_owned(), pose))
            .collect();
        let attached = gripper
            .attachment()
            .map(|a| (a.obj_name.clone(), eef_pose * a.gripper_to_obj));
        for (name, pose) in element_poses {
            if self.gripper_collision_mngr.has_object(&name) {
                self.gripper_collision_mngr.set_transform(&name, pose)?;
            }
        }
        if let Some((obj_name, obj_pose)) = attached {
            if self.gripper_collision_mngr.has_object(&obj_name) {
                self.gripper_collision_mngr.set_transform(&obj_name, obj_pose)?;
            }
            if let Some(object) = self.objs.get_mut(&obj_name) {
                object.pose = obj_pose;
            }
        }
        Ok(())
    }

    fn sync_gripper_with_robot(&mut self) -> Result<()> {
        let robot = self.robot_ref()?;
        if robot.gripper.is_none() || robot.eef_name().is_none() {
            return Ok(());
        }
        let eef = {
            let fk = robot.forward_kin_chain(&self.current_joints);
            robot.get_eef_pose(&fk)
        };
        if let Some(eef) = eef {
            self.set_gripper_pose(eef)?;
        }
        Ok(())
    }

    /// Records the gripper-object transform, moves the object from the
    /// object manager into the gripper manager and flips logical state.
    pub fn attach_object_on_gripper(&mut self, name: &str) -> Result<()> {
        let object_pose = self
            .objs
            .get(name)
            .map(|o| o.pose)
            .ok_or_else(|| Error::UnknownName(name.to_owned()))?;
        let gripper = self
            .robot
            .as_ref()
            .and_then(|r| r.gripper.as_ref())
            .ok_or(Error::NoGripper)?;
        if let Some(held) = gripper.attachment() {
            return Err(Error::InvalidModel(format!(
                "gripper already holds {}",
                held.obj_name
            )));
        }
        let grasp_pose = *gripper.pose();
        let gripper_name = gripper.name.clone();

        // managers first, so a failure leaves the gripper record untouched
        let (shape, pose) = self.obj_collision_mngr.remove_object(name)?;
        self.gripper_collision_mngr.add_shape(name, shape, pose)?;

        let gripper = self
            .robot
            .as_mut()
            .and_then(|r| r.gripper.as_mut())
            .ok_or(Error::NoGripper)?;
        gripper.attach(Attachment {
            obj_name: name.to_owned(),
            pick_obj_pose: object_pose,
            grasp_pose,
            gripper_to_obj: grasp_pose.inverse() * object_pose,
        });

        self.logical_states.entry(name.to_owned()).or_default().held = true;
        self.logical_states
            .entry(gripper_name)
            .or_default()
            .holding = Some(name.to_owned());
        debug!(object = name, "attached object on gripper");
        Ok(())
    }

    /// Reverse of [`Self::attach_object_on_gripper`]; the object's pose
    /// becomes `gripper_pose * gripper_to_obj`.
    pub fn detach_object_from_gripper(&mut self) -> Result<()> {
        let robot = self.robot.as_mut().ok_or(Error::NoGripper)?;
        let gripper = robot.gripper.as_mut().ok_or(Error::NoGripper)?;
        let attachment = gripper.detach().ok_or(Error::NotAttached)?;
        let pose = *gripper.pose() * attachment.gripper_to_obj;
        let gripper_name = gripper.name.clone();
        let name = attachment.obj_name;

        let (shape, _) = self.gripper_collision_mngr.remove_object(&name)?;
        self.obj_collision_mngr.add_shape(&name, shape, pose)?;
        if let Some(object) = self.objs.get_mut(&name) {
            object.pose = pose;
        }

        if let Some(state) = self.logical_states.get_mut(&name) {
            state.held = false;
        }
        if let Some(state) = self.logical_states.get_mut(&gripper_name) {
            state.holding = None;
        }
        debug!(object = %name, "detached object from gripper");
        Ok(())
    }

    /// Whether the gripper touches any scene object.
    pub fn collide_objs_and_gripper(&self) -> bool {
        self.gripper_collision_mngr
            .in_collision_other(&self.obj_collision_mngr)
    }

    /// Whether the robot self-collides or touches any scene object.
    pub fn collide_objs_and_robot(&self) -> bool {
        self.robot_collision_mngr.in_collision_internal()
            || self
                .robot_collision_mngr
                .in_collision_other(&self.obj_collision_mngr)
    }

    /// Re-derives the `on` predicate geometrically: A is on B when A's
    /// bottom face sits on B's top face (within tolerance) and their XY
    /// projections overlap.
    pub fn update_logical_states(&mut self) {
        let names: Vec<String> = self.objs.keys().cloned().collect();
        for name in &names {
            let held = self
                .logical_states
                .get(name)
                .map(|s| s.held)
                .unwrap_or(false);
            if held {
                continue;
            }
            let support = self.find_support(name, &names);
            if let Some(state) = self.logical_states.get_mut(name) {
                state.on = support;
            }
        }
    }

    fn find_support(&self, name: &str, names: &[String]) -> Option<String> {
        let aabb = self.object_aabb(name)?;
        for other in names {
            if other == name {
                continue;
            }
            let Some(other_aabb) = self.object_aabb(other) else {
                continue;
            };
            let resting = (aabb.mins.z - other_aabb.maxs.z).abs() <= ON_EPS_Z;
            let overlap_x = aabb.mins.x <= other_aabb.maxs.x && other_aabb.mins.x <= aabb.maxs.x;
            let overlap_y = aabb.mins.y <= other_aabb.maxs.y && other_aabb.mins.y <= aabb.maxs.y;
            if resting && overlap_x && overlap_y {
                return Some(other.clone());
            }
        }
        None
    }

    fn object_aabb(&self, name: &str) -> Option<parry3d_f64::bounding_volume::Aabb> {
        let object = self.objs.get(name)?;
        let shape = object.geometry.shared_shape().ok()?;
        Some(shape.compute_aabb(&object.pose))
    }

    /// Snapshot copy: geometry is shared, poses / joints / logical state
    /// are copied.
    pub fn copy_scene(&self) -> SceneManager {
        self.clone()
    }

    /// Checks a joint vector for validity against limits and collision.
    ///
    /// Mutates the collision managers' transforms; call
    /// [`Self::restore_collision_state`] after a planning sweep.
    pub fn is_collision_free(&mut self, q: &[f64]) -> bool {
        let Ok(robot) = self.robot_ref() else {
            return true;
        };
        for (limits, value) in robot.arm_joint_limits().iter().zip(q.iter()) {
            if let Some(limits) = limits {
                if !limits.contains(*value) {
                    return false;
                }
            }
        }
        let fk = robot.forward_kin_chain(q);
        let eef = robot.get_eef_pose(&fk);
        self.robot_collision_mngr.sync_transforms(&fk);
        if let Some(eef) = eef {
            let _ = self.set_gripper_pose(eef);
        }
        !(self.collide_objs_and_robot()
            || self
                .gripper_collision_mngr
                .in_collision_other(&self.obj_collision_mngr))
    }

    /// Re-syncs the collision managers with the scene's stored joints.
    pub fn restore_collision_state(&mut self) -> Result<()> {
        let q = self.current_joints.clone();
        if self.robot.is_some() {
            self.set_robot_eef_pose(&q)?;
        }
        Ok(())
    }

    /// Builds a renderer view of the current scene.
    pub fn scene_view(&self, trajectory: Option<&[Vec<f64>]>) -> SceneView {
        let mut view = SceneView::default();
        if let Some(robot) = &self.robot {
            let fk = robot.forward_kin_chain(&self.current_joints);
            view.link_poses = fk.iter().map(|(n, p)| (n.to_owned(), *p)).collect();
        }
        view.object_poses = self
            .objs
            .values()
            .map(|o| (o.name.clone(), o.pose))
            .collect();
        if let Some(trajectory) = trajectory {
            view.trajectories = trajectory.to_vec();
        }
        view
    }
}
