//! # manip — manipulator kinematics and motion planning
//!
//! `manip` models articulated manipulators (single-arm and bimanual) from
//! URDF-shaped records and provides, on top of the kinematic core:
//!
//! 1. Forward kinematics and Jacobian-based inverse kinematics
//!    (Newton-Raphson and Levenberg-Marquardt)
//! 1. Collision managers with adjacency filtering, backed by parry
//! 1. An RRT* joint-space planner and a Cartesian task-space planner
//! 1. A scene layer with logical states and pick / place action
//!    generation
//!
//! ```
//! use manip::{Frame, FrameTreeBuilder, Joint, JointType, Link};
//! use manip::nalgebra::{Isometry3, Vector3};
//!
//! let mut builder = FrameTreeBuilder::new();
//! let root = builder.add_root(Frame::new(Link::new("base"), Joint::fixed("root")));
//! let swivel = Joint::new(
//!     "swivel",
//!     JointType::Revolute { axis: Vector3::z_axis() },
//! );
//! builder.add_child(root, Frame::new(Link::new("turret"), swivel));
//! let tree = builder.finalize().unwrap();
//!
//! let fk = manip::forward_kinematics(&tree, &Isometry3::identity(), &[0.5]).unwrap();
//! assert!(fk.get("turret").is_some());
//! ```

mod arena;
mod collision;
mod errors;
mod frame;
mod gripper;
mod ik;
mod joint;
mod kinematics;
mod link;
mod mesh;
mod robot;
mod scene;

pub mod action;
pub mod math;
pub mod planner;
pub mod urdf;

pub use self::arena::{Ancestors, Arena, Descendants, Node, NodeId};
pub use self::collision::{CollisionManager, CollisionReport, ContactInfo};
pub use self::errors::{Error, Result};
pub use self::frame::{Frame, FrameId, FrameTree, FrameTreeBuilder};
pub use self::gripper::{Attachment, Gripper, GripperElement};
pub use self::ik::{damped_least_squares_step, IkMethod, IkSolution, IkSolver};
pub use self::joint::{Joint, JointType, Limits};
pub use self::kinematics::{
    forward_kinematics, forward_kinematics_chain, jacobian, Transforms,
};
pub use self::link::{Geometry, Link};
pub use self::mesh::TriMesh;
pub use self::robot::{Arm, Bimanual, SingleArm};
pub use self::scene::{
    LogicalState, SceneManager, SceneObject, SceneRender, SceneView,
};

// public dependencies
pub use nalgebra;
pub use parry3d_f64 as parry;
pub use urdf_rs;
