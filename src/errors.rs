use nalgebra::Vector3;
use thiserror::Error;

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds returned by the kinematics, collision and planning layers.
///
/// Numerical failures (unconverged IK, exhausted planners) are ordinary
/// values of this enum; nothing in the crate panics on them.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid model: {0}")]
    InvalidModel(String),

    #[error("expected {expected} joint positions but got {actual}")]
    MismatchedDof { expected: usize, actual: usize },

    #[error("joint {joint}: position {value} is out of limits [{min}, {max}]")]
    OutOfLimits {
        joint: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error(
        "ik did not converge in {iterations} iterations \
         (position diff = {position_diff:?}, rotation diff = {rotation_diff:?})"
    )]
    IkNotConverged {
        iterations: usize,
        position_diff: Vector3<f64>,
        rotation_diff: Vector3<f64>,
    },

    #[error("no plan found within the iteration budget")]
    NoPlanFound,

    #[error("start configuration is in collision")]
    CollisionAtStart,

    #[error("goal configuration is in collision")]
    CollisionAtGoal,

    #[error("collision object `{0}` already exists")]
    DuplicateName(String),

    #[error("unknown name `{0}`")]
    UnknownName(String),

    #[error("robot has no gripper")]
    NoGripper,

    #[error("no object is attached to the gripper")]
    NotAttached,

    #[error("invalid mesh: {0}")]
    InvalidMesh(String),
}
