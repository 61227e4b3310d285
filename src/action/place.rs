//! Placement generation: support-surface sampling, normal alignment and
//! the level-wise filters.

use nalgebra::{Isometry3, Point3, Translation3, Vector3};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::debug;

use super::{Action, Activity, ReleasePoses, ScopedAttachment, IK_ACCEPT_EPS, IK_MAX_ITER};
use crate::errors::{Error, Result};
use crate::math::{pose_distance, rotation_between, translated, z_axis};
use crate::mesh::TriMesh;
use crate::scene::SceneManager;

/// Faces whose vertices all reach `0.99 * z_max` count as the top surface
/// of a support object.
const SUPPORT_TOP_FACTOR: f64 = 0.99;
/// Faces whose vertices all stay below `1.02 * z_min` count as the bottom
/// surface of a held object.
const HELD_BOTTOM_FACTOR: f64 = 1.02;
const HELD_BOTTOM_WEIGHT: f64 = 0.7;
const HELD_OTHER_WEIGHT: f64 = 0.3;

/// Generates release poses that put the held object onto a support.
#[derive(Debug)]
pub struct PlaceAction {
    scene: SceneManager,
    pub n_samples_held_obj: usize,
    pub n_samples_sup_obj: usize,
    /// Lift applied to the end-effector release pose above the contact.
    pub release_distance: f64,
    pub retreat_distance: f64,
    rng: StdRng,
}

impl PlaceAction {
    pub fn new(
        scene: &SceneManager,
        n_samples_held_obj: usize,
        n_samples_sup_obj: usize,
        release_distance: f64,
    ) -> Self {
        Self {
            scene: scene.copy_scene(),
            n_samples_held_obj,
            n_samples_sup_obj,
            release_distance,
            retreat_distance: 0.1,
            rng: StdRng::seed_from_u64(0),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Surface samples weighted toward the top face of the support object.
    pub fn get_surface_points_for_support_obj(
        &mut self,
        obj_name: &str,
    ) -> Result<Vec<(Point3<f64>, Vector3<f64>)>> {
        let mesh = self.world_mesh(obj_name)?;
        let weights = support_weights(&mesh);
        mesh.sample_surface(self.n_samples_sup_obj, Some(&weights), &mut self.rng)
    }

    /// Surface samples weighted toward the bottom face of the held object.
    pub fn get_surface_points_for_held_obj(
        &mut self,
        obj_name: &str,
    ) -> Result<Vec<(Point3<f64>, Vector3<f64>)>> {
        let mesh = self.world_mesh(obj_name)?;
        let weights = held_weights(&mesh);
        mesh.sample_surface(self.n_samples_held_obj, Some(&weights), &mut self.rng)
    }

    /// Release pose sets placing `held_obj_name` onto `support_obj_name`.
    ///
    /// The placed object pose carries no lift; only the end-effector pose
    /// is raised by `release_distance` along world z.
    pub fn get_release_poses(
        &mut self,
        support_obj_name: &str,
        held_obj_name: &str,
    ) -> Result<Vec<ReleasePoses>> {
        let held_pose = self
            .scene
            .object(held_obj_name)
            .map(|o| o.pose)
            .ok_or_else(|| Error::UnknownName(held_obj_name.to_owned()))?;
        let gripper = self
            .scene
            .robot
            .as_ref()
            .and_then(|r| r.gripper.as_ref())
            .ok_or(Error::NoGripper)?;
        let tcp_pose = gripper.tcp_pose();
        let eef_from_tcp = {
            let g = gripper.clone();
            move |tcp: &Isometry3<f64>| g.eef_pose_from_tcp(tcp)
        };

        let support_points = self.get_surface_points_for_support_obj(support_obj_name)?;
        let held_points = self.get_surface_points_for_held_obj(held_obj_name)?;

        let mut poses = Vec::with_capacity(support_points.len() * held_points.len());
        for (sup_point, sup_normal) in &support_points {
            for (held_point, held_normal) in &held_points {
                let rot = rotation_between(held_normal, &(-sup_normal));
                let pivot = held_pose.translation.vector;
                let held_point_rotated =
                    Point3::from(rot * (held_point.coords - pivot) + pivot);
                let shift = sup_point.coords - held_point_rotated.coords;

                // rigid motion: rotate about the held object origin, then
                // translate the rotated contact point onto the support point
                let motion = Translation3::from(pivot + shift)
                    * rot
                    * Translation3::from(-pivot);

                let obj_pose = motion * held_pose;
                let tcp_transformed = motion * tcp_pose;
                let tcp_lifted = translated(
                    &tcp_transformed,
                    &(Vector3::z() * self.release_distance),
                );
                let release = eef_from_tcp(&tcp_lifted);
                poses.push(ReleasePoses {
                    pre_release: translated(
                        &release,
                        &(Vector3::z() * self.retreat_distance),
                    ),
                    release,
                    post_release: translated(
                        &release,
                        &(z_axis(&release) * -self.retreat_distance),
                    ),
                    obj_pose,
                });
            }
        }
        debug!(
            support = support_obj_name,
            held = held_obj_name,
            candidates = poses.len(),
            "release pose generation finished"
        );
        Ok(poses)
    }

    /// Level 1: keeps releases where the gripper (with the held object
    /// attached) is collision free.
    pub fn get_release_poses_for_only_gripper(
        &mut self,
        held_obj_name: &str,
        release_poses: Vec<ReleasePoses>,
    ) -> Result<Vec<ReleasePoses>> {
        let already_attached = self
            .scene
            .robot
            .as_ref()
            .and_then(|r| r.gripper.as_ref())
            .map(|g| g.is_attached())
            .ok_or(Error::NoGripper)?;

        let filter = |scene: &mut SceneManager| -> Vec<ReleasePoses> {
            release_poses
                .into_iter()
                .filter(|r| {
                    scene.set_gripper_pose(r.release).is_ok()
                        && !scene.collide_objs_and_gripper()
                })
                .collect()
        };

        if already_attached {
            Ok(filter(&mut self.scene))
        } else {
            let mut guard = ScopedAttachment::attach(&mut self.scene, held_obj_name)?;
            Ok(filter(guard.scene_mut()))
        }
    }

    /// Level 2: keeps releases whose pre / release / post poses all admit
    /// an IK solution with a collision-free robot.
    pub fn get_release_poses_for_robot(
        &mut self,
        release_poses: Vec<ReleasePoses>,
    ) -> Vec<ReleasePoses> {
        let scene = &mut self.scene;
        release_poses
            .into_iter()
            .filter(|r| {
                [r.pre_release, r.release, r.post_release]
                    .iter()
                    .all(|pose| {
                        let Ok(solution) = scene.compute_ik(pose, IK_MAX_ITER) else {
                            return false;
                        };
                        if scene.set_robot_eef_pose(&solution.joints).is_err() {
                            return false;
                        }
                        let Ok(reached) = scene.get_robot_eef_pose() else {
                            return false;
                        };
                        pose_distance(pose, &reached) < IK_ACCEPT_EPS
                            && !scene.collide_objs_and_robot()
                    })
            })
            .collect()
    }

    fn world_mesh(&self, obj_name: &str) -> Result<TriMesh> {
        let object = self
            .scene
            .object(obj_name)
            .ok_or_else(|| Error::UnknownName(obj_name.to_owned()))?;
        Ok(object.geometry.to_trimesh()?.transformed(&object.pose))
    }

    fn held_object(&self) -> Option<String> {
        self.scene
            .robot
            .as_ref()
            .and_then(|r| r.gripper.as_ref())
            .and_then(|g| g.attachment())
            .map(|a| a.obj_name.clone())
            .or_else(|| self.scene.pick_obj.clone())
    }

    /// Static or resting objects eligible as supports for `held`.
    fn support_objects(&self, held: &str) -> Vec<String> {
        if let Some(name) = &self.scene.place_obj {
            return vec![name.clone()];
        }
        self.scene
            .objects()
            .filter(|o| o.name != held)
            .map(|o| o.name.clone())
            .collect()
    }
}

fn support_weights(mesh: &TriMesh) -> Vec<f64> {
    let z_max = mesh.bounds().maxs.z;
    (0..mesh.faces().len())
        .map(|i| {
            let top = mesh
                .face_vertices(i)
                .iter()
                .all(|v| v.z >= z_max * SUPPORT_TOP_FACTOR);
            if top {
                1.0
            } else {
                0.0
            }
        })
        .collect()
}

fn held_weights(mesh: &TriMesh) -> Vec<f64> {
    let z_min = mesh.bounds().mins.z;
    (0..mesh.faces().len())
        .map(|i| {
            let bottom = mesh
                .face_vertices(i)
                .iter()
                .all(|v| v.z <= z_min * HELD_BOTTOM_FACTOR);
            if bottom {
                HELD_BOTTOM_WEIGHT
            } else {
                HELD_OTHER_WEIGHT
            }
        })
        .collect()
}

impl Activity for PlaceAction {
    fn scene(&self) -> &SceneManager {
        &self.scene
    }

    fn scene_mut(&mut self) -> &mut SceneManager {
        &mut self.scene
    }

    fn possible_actions_level_1(&mut self) -> Result<Vec<Action>> {
        let held = self
            .held_object()
            .ok_or(Error::NotAttached)?;
        let mut actions = Vec::new();
        for support in self.support_objects(&held) {
            let candidates = self.get_release_poses(&support, &held)?;
            let filtered = self.get_release_poses_for_only_gripper(&held, candidates)?;
            if !filtered.is_empty() {
                actions.push(Action::Place {
                    support_obj_name: support,
                    held_obj_name: held.clone(),
                    release_poses: filtered,
                });
            }
        }
        Ok(actions)
    }

    fn possible_ik_solve_level_2(&mut self, action: Action) -> Result<Action> {
        let Action::Place {
            support_obj_name,
            held_obj_name,
            release_poses,
        } = action
        else {
            return Err(Error::InvalidModel(
                "place action generator received a pick action".to_owned(),
            ));
        };
        let filtered = self.get_release_poses_for_robot(release_poses);
        Ok(Action::Place {
            support_obj_name,
            held_obj_name,
            release_poses: filtered,
        })
    }

    fn possible_transitions(&mut self, action: &Action) -> Result<Vec<SceneManager>> {
        let Action::Place {
            support_obj_name,
            held_obj_name,
            release_poses,
        } = action
        else {
            return Err(Error::InvalidModel(
                "place action generator received a pick action".to_owned(),
            ));
        };
        let mut scenes = Vec::with_capacity(release_poses.len());
        for release in release_poses {
            let mut next = self.scene.copy_scene();
            next.set_gripper_pose(release.release)?;
            if next
                .robot
                .as_ref()
                .and_then(|r| r.gripper.as_ref())
                .map(|g| g.is_attached())
                != Some(true)
            {
                next.attach_object_on_gripper(held_obj_name)?;
            }
            next.detach_object_from_gripper()?;
            next.set_object_pose(held_obj_name, release.obj_pose)?;
            next.place_obj = Some(support_obj_name.clone());
            next.update_logical_states();
            scenes.push(next);
        }
        Ok(scenes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Frame, FrameTreeBuilder};
    use crate::gripper::Gripper;
    use crate::joint::Joint;
    use crate::link::{Geometry, Link};
    use crate::robot::SingleArm;
    use crate::scene::SceneObject;
    use approx::assert_relative_eq;

    fn cube(name: &str, side: f64, pose: Isometry3<f64>) -> SceneObject {
        SceneObject {
            name: name.to_owned(),
            geometry: Geometry::Box {
                extents: Vector3::new(side, side, side),
            },
            pose,
            color: None,
        }
    }

    fn scene_with_held_cube() -> SceneManager {
        let mut builder = FrameTreeBuilder::new();
        let root = builder.add_root(Frame::new(Link::new("base"), Joint::fixed("root")));
        builder.add_child(
            root,
            Frame::new(
                Link::new("hand"),
                Joint::fixed("hand_fix").with_origin(Isometry3::translation(0.2, 0.0, 0.4)),
            ),
        );
        let tree = builder.finalize().unwrap();
        let mut robot = SingleArm::new("poser", tree, Isometry3::identity());
        robot.setup_link_name(Some("base"), "hand").unwrap();
        robot.gripper = Some(Gripper::new("hand_gripper", 0.15, 0.05, 0.1));

        let mut scene = SceneManager::new();
        scene.add_robot(robot, &[]).unwrap();
        scene
            .add_object(cube("table", 0.3, Isometry3::translation(0.5, 0.0, 0.15)), true)
            .unwrap();
        // held cube floats under the gripper tcp
        scene
            .add_object(cube("block", 0.06, Isometry3::translation(0.2, 0.0, 0.3)), false)
            .unwrap();
        scene.attach_object_on_gripper("block").unwrap();
        scene
    }

    #[test]
    fn support_samples_come_from_the_top_face() {
        let scene = scene_with_held_cube();
        let mut action = PlaceAction::new(&scene, 8, 8, 0.01).with_seed(5);
        let samples = action.get_surface_points_for_support_obj("table").unwrap();
        assert_eq!(samples.len(), 8);
        for (p, n) in &samples {
            assert_relative_eq!(p.z, 0.3, epsilon = 1e-9);
            assert!(n.z > 0.99);
        }
    }

    #[test]
    fn held_samples_prefer_the_bottom_face() {
        let scene = scene_with_held_cube();
        let mut action = PlaceAction::new(&scene, 256, 8, 0.01).with_seed(6);
        let samples = action.get_surface_points_for_held_obj("block").unwrap();
        let bottom = samples.iter().filter(|(_, n)| n.z < -0.99).count();
        // weight 0.7 on 2 of 12 equal-area faces against 0.3 elsewhere
        // puts ~32% of samples on the bottom, far above the 1/6 area share
        assert!(bottom * 5 > samples.len());
    }

    #[test]
    fn release_obj_pose_rests_on_the_support_without_lift() {
        let scene = scene_with_held_cube();
        let mut action = PlaceAction::new(&scene, 4, 4, 0.01).with_seed(8);
        let releases = action.get_release_poses("table", "block").unwrap();
        assert!(!releases.is_empty());
        for r in &releases {
            // bottom-face contacts on the top face: the placed cube centre
            // sits half a side above the table top, with no release lift
            let bottom = r.obj_pose.translation.vector.z - 0.03;
            assert!(
                (bottom - 0.3).abs() < 1e-6,
                "object bottom at {bottom}, expected on table top"
            );
        }
    }

    #[test]
    fn release_eef_pose_carries_the_lift() {
        let scene = scene_with_held_cube();
        let mut action = PlaceAction::new(&scene, 4, 4, 0.01).with_seed(8);
        let releases = action.get_release_poses("table", "block").unwrap();
        assert!(!releases.is_empty());
        // before placing, the tcp sat 0.2 m from the block centre; after
        // removing the world-z lift the recovered tcp keeps that distance,
        // so the lift went to the eef side only
        for r in &releases {
            let tcp = r.release.translation.vector + z_axis(&r.release) * 0.1;
            let tcp_unlifted = tcp - Vector3::z() * 0.01;
            let gap = (tcp_unlifted - r.obj_pose.translation.vector).norm();
            assert_relative_eq!(gap, 0.2, epsilon = 1e-9);
        }
    }

    #[test]
    fn pre_and_post_release_offsets() {
        let scene = scene_with_held_cube();
        let mut action = PlaceAction::new(&scene, 2, 2, 0.01).with_seed(4);
        let releases = action.get_release_poses("table", "block").unwrap();
        for r in &releases {
            let up = r.pre_release.translation.vector - r.release.translation.vector;
            assert_relative_eq!(up.x, 0.0, epsilon = 1e-12);
            assert_relative_eq!(up.y, 0.0, epsilon = 1e-12);
            assert_relative_eq!(up.z, 0.1, epsilon = 1e-12);
            let back = r.post_release.translation.vector - r.release.translation.vector;
            assert_relative_eq!((back + z_axis(&r.release) * 0.1).norm(), 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn transitions_place_the_object_on_the_support() {
        let scene = scene_with_held_cube();
        let mut action = PlaceAction::new(&scene, 4, 4, 0.001).with_seed(12);
        let releases = action.get_release_poses("table", "block").unwrap();
        let candidate = Action::Place {
            support_obj_name: "table".to_owned(),
            held_obj_name: "block".to_owned(),
            release_poses: releases.into_iter().take(1).collect(),
        };
        let scenes = action.possible_transitions(&candidate).unwrap();
        assert_eq!(scenes.len(), 1);
        let next = &scenes[0];
        assert!(!next.logical_state("block").unwrap().held);
        assert!(next.obj_collision_mngr.has_object("block"));
        assert!(!next.gripper_collision_mngr.has_object("block"));
        assert_eq!(
            next.logical_state("block").unwrap().on.as_deref(),
            Some("table")
        );
    }
}
