use manip::nalgebra as na;

use manip::{
    Frame, FrameTreeBuilder, Geometry, Gripper, GripperElement, Joint, Link, SceneManager,
    SceneObject, SingleArm,
};
use na::{Isometry3, Vector3};
use std::collections::BTreeSet;

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

/// Fixed-pose robot with a gripper whose single finger box sits at the
/// end-effector.
fn poser_scene() -> SceneManager {
    let mut builder = FrameTreeBuilder::new();
    let root = builder.add_root(Frame::new(Link::new("base"), Joint::fixed("base_root")));
    builder.add_child(
        root,
        Frame::new(
            Link::new("hand"),
            Joint::fixed("hand_fix").with_origin(Isometry3::translation(0.3, 0.0, 0.5)),
        ),
    );
    let tree = builder.finalize().unwrap();
    let mut robot = SingleArm::new("poser", tree, Isometry3::identity());
    robot.setup_link_name(Some("base"), "hand").unwrap();
    let gripper = Gripper::new("poser_gripper", 0.1, 0.04, 0.05).with_element(GripperElement {
        name: "finger".to_owned(),
        geometry: Some(Geometry::Box {
            extents: Vector3::new(0.02, 0.06, 0.04),
        }),
        rel_to_eef: Isometry3::translation(0.0, 0.0, 0.02),
    });
    robot.gripper = Some(gripper);

    let mut scene = SceneManager::new();
    scene.add_robot(robot, &[]).unwrap();
    scene
}

fn manager_names(scene: &SceneManager) -> (BTreeSet<String>, BTreeSet<String>) {
    (
        scene.obj_collision_mngr.names().map(str::to_owned).collect(),
        scene
            .gripper_collision_mngr
            .names()
            .map(str::to_owned)
            .collect(),
    )
}

#[test]
fn attach_then_detach_restores_the_scene() {
    let mut scene = poser_scene();
    scene
        .add_object(cube("box", 0.05, Isometry3::translation(0.3, 0.0, 0.45)), false)
        .unwrap();

    let (objs_before, gripper_before) = manager_names(&scene);
    let logical_before: Vec<_> = scene
        .logical_states()
        .map(|(n, s)| (n.to_owned(), s.clone()))
        .collect();
    let pose_before = scene.object("box").unwrap().pose;

    scene.attach_object_on_gripper("box").unwrap();
    assert!(scene.logical_state("box").unwrap().held);
    assert!(scene.gripper_collision_mngr.has_object("box"));
    assert!(!scene.obj_collision_mngr.has_object("box"));
    assert_eq!(
        scene
            .logical_state("poser_gripper")
            .unwrap()
            .holding
            .as_deref(),
        Some("box")
    );

    scene.detach_object_from_gripper().unwrap();

    let (objs_after, gripper_after) = manager_names(&scene);
    assert_eq!(objs_before, objs_after);
    assert_eq!(gripper_before, gripper_after);
    let logical_after: Vec<_> = scene
        .logical_states()
        .map(|(n, s)| (n.to_owned(), s.clone()))
        .collect();
    assert_eq!(logical_before, logical_after);
    let pose_after = scene.object("box").unwrap().pose;
    assert!(
        (pose_before.translation.vector - pose_after.translation.vector).norm() < 1e-9
    );
}

#[test]
fn detach_without_attach_is_an_error() {
    let mut scene = poser_scene();
    assert!(scene.detach_object_from_gripper().is_err());
}

#[test]
fn attached_objects_follow_the_gripper() {
    let mut scene = poser_scene();
    scene
        .add_object(cube("box", 0.05, Isometry3::translation(0.3, 0.0, 0.45)), false)
        .unwrap();
    scene.attach_object_on_gripper("box").unwrap();

    // move the gripper 10 cm along x: the held box must follow rigidly
    scene
        .set_gripper_pose(Isometry3::translation(0.4, 0.0, 0.5))
        .unwrap();
    let pose = scene.object("box").unwrap().pose;
    assert!((pose.translation.vector - Vector3::new(0.4, 0.0, 0.45)).norm() < 1e-9);

    scene.detach_object_from_gripper().unwrap();
    let dropped = scene.object("box").unwrap().pose;
    assert!((dropped.translation.vector - Vector3::new(0.4, 0.0, 0.45)).norm() < 1e-9);
    assert!(scene.obj_collision_mngr.has_object("box"));
}

#[test]
fn gripper_collision_with_objects() {
    let mut scene = poser_scene();
    // far away: no contact
    scene
        .add_object(cube("far", 0.05, Isometry3::translation(2.0, 0.0, 0.0)), false)
        .unwrap();
    assert!(!scene.collide_objs_and_gripper());
    // overlapping the finger box
    scene
        .add_object(cube("near", 0.05, Isometry3::translation(0.3, 0.0, 0.52)), false)
        .unwrap();
    assert!(scene.collide_objs_and_gripper());
}

#[test]
fn copy_scene_is_independent() {
    let mut scene = poser_scene();
    scene
        .add_object(cube("box", 0.05, Isometry3::translation(0.3, 0.0, 0.45)), false)
        .unwrap();
    let mut copy = scene.copy_scene();
    copy.set_object_pose("box", Isometry3::translation(9.0, 0.0, 0.0))
        .unwrap();
    copy.attach_object_on_gripper("box").unwrap();

    assert!(
        (scene.object("box").unwrap().pose.translation.vector
            - Vector3::new(0.3, 0.0, 0.45))
        .norm()
            < 1e-12
    );
    assert!(!scene.logical_state("box").unwrap().held);
    assert!(scene.obj_collision_mngr.has_object("box"));
}

#[test]
fn scene_view_reports_poses_and_trajectories() {
    let mut scene = poser_scene();
    scene
        .add_object(cube("box", 0.05, Isometry3::translation(0.3, 0.0, 0.45)), false)
        .unwrap();
    let trajectory = vec![vec![0.0], vec![0.1]];
    let view = scene.scene_view(Some(&trajectory));
    assert!(view.link_poses.iter().any(|(n, _)| n == "hand"));
    assert!(view.object_poses.iter().any(|(n, _)| n == "box"));
    assert_eq!(view.trajectories.len(), 2);
}
