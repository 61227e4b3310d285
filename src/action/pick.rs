//! Grasp generation: antipodal contact sampling with a force-closure
//! proxy, TCP frame sweeping and the level-wise filters.

use nalgebra::{Point3, Unit, Vector3};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::debug;

use super::{grasp_directions, Action, Activity, GraspPoses, IK_ACCEPT_EPS, IK_MAX_ITER};
use crate::errors::{Error, Result};
use crate::math::{isometry_from_axes, pose_distance, translated, z_axis};
use crate::scene::SceneManager;

/// An accepted antipodal contact pair with its surface normals.
#[derive(Debug, Clone)]
pub struct ContactPair {
    pub p1: Point3<f64>,
    pub p2: Point3<f64>,
    pub n1: Vector3<f64>,
    pub n2: Vector3<f64>,
}

/// Generates grasp candidates for movable objects.
#[derive(Debug)]
pub struct PickAction {
    scene: SceneManager,
    pub n_contacts: usize,
    pub n_directions: usize,
    /// Force-closure proxy: maximum angle between a flipped contact
    /// normal and the contact line.
    pub limit_angle: f64,
    pub retreat_distance: f64,
    rng: StdRng,
}

/// Sampling attempts allowed per requested contact before giving up.
/// Tight force-closure limits reject most random pairs.
const ATTEMPTS_PER_CONTACT: usize = 2000;

impl PickAction {
    pub fn new(
        scene: &SceneManager,
        n_contacts: usize,
        n_directions: usize,
        limit_angle: f64,
    ) -> Self {
        Self {
            scene: scene.copy_scene(),
            n_contacts,
            n_directions,
            limit_angle,
            retreat_distance: 0.1,
            rng: StdRng::seed_from_u64(0),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Samples antipodal contact pairs on the object surface until
    /// `n_contacts` pass the force-closure proxy.
    pub fn get_contact_points(&mut self, obj_name: &str) -> Result<Vec<ContactPair>> {
        let max_width = self.gripper_max_width()?;
        let object = self
            .scene
            .object(obj_name)
            .ok_or_else(|| Error::UnknownName(obj_name.to_owned()))?;
        let mesh = object.geometry.to_trimesh()?.transformed(&object.pose);

        let mut accepted = Vec::with_capacity(self.n_contacts);
        let mut attempts = 0;
        while accepted.len() < self.n_contacts
            && attempts < self.n_contacts * ATTEMPTS_PER_CONTACT
        {
            attempts += 1;
            let sampled = mesh.sample_surface(2, None, &mut self.rng)?;
            let pair = ContactPair {
                p1: sampled[0].0,
                p2: sampled[1].0,
                n1: sampled[0].1,
                n2: sampled[1].1,
            };
            if is_force_closure(&pair, max_width, self.limit_angle) {
                accepted.push(pair);
            }
        }
        debug!(
            obj = obj_name,
            accepted = accepted.len(),
            attempts,
            "contact sampling finished"
        );
        Ok(accepted)
    }

    /// TCP frames for each contact pair: y along the contact line, z swept
    /// around it, origin at the midpoint.
    pub fn get_tcp_poses(&mut self, obj_name: &str) -> Result<Vec<nalgebra::Isometry3<f64>>> {
        let contacts = self.get_contact_points(obj_name)?;
        let mut poses = Vec::with_capacity(contacts.len() * self.n_directions);
        for contact in &contacts {
            let line = contact.p2 - contact.p1;
            let center = Point3::from((contact.p1.coords + contact.p2.coords) / 2.0);
            let y = Unit::new_normalize(line);
            for dir in grasp_directions(&line, self.n_directions) {
                let z = dir.into_inner();
                let x = y.cross(&z);
                poses.push(isometry_from_axes(&x, &y, &z, &center));
            }
        }
        Ok(poses)
    }

    /// Unfiltered grasp pose sets (EEF frame) for an object.
    pub fn get_grasp_poses(&mut self, obj_name: &str) -> Result<Vec<GraspPoses>> {
        let gripper = self.gripper()?.clone();
        let retreat = self.retreat_distance;
        let tcp_poses = self.get_tcp_poses(obj_name)?;
        Ok(tcp_poses
            .into_iter()
            .map(|tcp| {
                let grasp = gripper.eef_pose_from_tcp(&tcp);
                GraspPoses {
                    pre_grasp: translated(&grasp, &(z_axis(&grasp) * -retreat)),
                    grasp,
                    post_grasp: translated(&grasp, &(Vector3::z() * retreat)),
                    tcp,
                }
            })
            .collect())
    }

    /// Level 1: keeps grasps where the gripper alone is collision free.
    pub fn get_grasp_poses_for_only_gripper(
        &mut self,
        grasp_poses: Vec<GraspPoses>,
    ) -> impl Iterator<Item = GraspPoses> + '_ {
        let scene = &mut self.scene;
        grasp_poses.into_iter().filter(move |g| {
            scene.set_gripper_pose(g.grasp).is_ok() && !scene.collide_objs_and_gripper()
        })
    }

    /// Level 2: keeps grasps that are IK-reachable with a collision-free
    /// robot.
    pub fn get_grasp_poses_for_robot(
        &mut self,
        grasp_poses: Vec<GraspPoses>,
    ) -> impl Iterator<Item = GraspPoses> + '_ {
        let scene = &mut self.scene;
        grasp_poses.into_iter().filter(move |g| {
            let Ok(solution) = scene.compute_ik(&g.grasp, IK_MAX_ITER) else {
                return false;
            };
            if scene.set_robot_eef_pose(&solution.joints).is_err() {
                return false;
            }
            let Ok(reached) = scene.get_robot_eef_pose() else {
                return false;
            };
            pose_distance(&g.grasp, &reached) < IK_ACCEPT_EPS && !scene.collide_objs_and_robot()
        })
    }

    fn gripper(&self) -> Result<&crate::gripper::Gripper> {
        self.scene
            .robot
            .as_ref()
            .and_then(|r| r.gripper.as_ref())
            .ok_or(Error::NoGripper)
    }

    fn gripper_max_width(&self) -> Result<f64> {
        Ok(self.gripper()?.max_width)
    }

    /// Movable, unheld objects eligible for picking.
    fn pickable_objects(&self) -> Vec<String> {
        if let Some(name) = &self.scene.pick_obj {
            return vec![name.clone()];
        }
        self.scene
            .logical_states()
            .filter(|(_, state)| !state.is_static && !state.held && state.holding.is_none())
            .map(|(name, _)| name.to_owned())
            .filter(|name| self.scene.object(name).is_some())
            .collect()
    }
}

/// Antipodal acceptance: the pair is graspable when the points fit in the
/// gripper and both flipped normals are nearly collinear with the contact
/// line.
fn is_force_closure(pair: &ContactPair, max_width: f64, limit_angle: f64) -> bool {
    let line = pair.p2 - pair.p1;
    let distance = line.norm();
    if distance > max_width || distance <= f64::EPSILON {
        return false;
    }
    let unit = line / distance;
    let angle1 = (-pair.n1).dot(&unit).clamp(-1.0, 1.0).acos();
    let angle2 = (-pair.n2).dot(&-unit).clamp(-1.0, 1.0).acos();
    angle1 <= limit_angle && angle2 <= limit_angle
}

impl Activity for PickAction {
    fn scene(&self) -> &SceneManager {
        &self.scene
    }

    fn scene_mut(&mut self) -> &mut SceneManager {
        &mut self.scene
    }

    fn possible_actions_level_1(&mut self) -> Result<Vec<Action>> {
        let mut actions = Vec::new();
        for obj_name in self.pickable_objects() {
            let candidates = self.get_grasp_poses(&obj_name)?;
            let filtered: Vec<GraspPoses> =
                self.get_grasp_poses_for_only_gripper(candidates).collect();
            if !filtered.is_empty() {
                actions.push(Action::Pick {
                    obj_name,
                    grasp_poses: filtered,
                });
            }
        }
        Ok(actions)
    }

    fn possible_ik_solve_level_2(&mut self, action: Action) -> Result<Action> {
        let Action::Pick {
            obj_name,
            grasp_poses,
        } = action
        else {
            return Err(Error::InvalidModel(
                "pick action generator received a place action".to_owned(),
            ));
        };
        let filtered: Vec<GraspPoses> = self.get_grasp_poses_for_robot(grasp_poses).collect();
        Ok(Action::Pick {
            obj_name,
            grasp_poses: filtered,
        })
    }

    fn possible_transitions(&mut self, action: &Action) -> Result<Vec<SceneManager>> {
        let Action::Pick {
            obj_name,
            grasp_poses,
        } = action
        else {
            return Err(Error::InvalidModel(
                "pick action generator received a place action".to_owned(),
            ));
        };
        let mut scenes = Vec::with_capacity(grasp_poses.len());
        for grasp in grasp_poses {
            let mut next = self.scene.copy_scene();
            next.set_gripper_pose(grasp.grasp)?;
            next.attach_object_on_gripper(obj_name)?;
            next.pick_obj = Some(obj_name.clone());
            next.update_logical_states();
            scenes.push(next);
        }
        Ok(scenes)
    }
}
