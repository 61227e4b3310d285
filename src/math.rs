//! Math helpers over [nalgebra] poses: pose errors, rotation construction
//! and SE(3) interpolation.

use nalgebra::{
    Isometry3, Matrix3, Point3, Rotation3, Translation3, Unit, UnitQuaternion, UnitVector3,
    Vector3, Vector6,
};

/// Rotations closer to identity than this yield a zero rotational error.
const ROT_EPS: f64 = 1e-9;

/// Positional and rotational error between two poses as a 6-vector
/// `[dx, dy, dz, wx, wy, wz]`.
///
/// The rotational part is the axis-angle vector of `target_R * current_Rᵀ`.
pub fn pose_error(target: &Isometry3<f64>, current: &Isometry3<f64>) -> Vector6<f64> {
    let pos = target.translation.vector - current.translation.vector;
    let rot = rotation_error(target, current);
    Vector6::new(pos.x, pos.y, pos.z, rot.x, rot.y, rot.z)
}

/// Axis-angle vector of the rotation taking `current` onto `target`.
pub fn rotation_error(target: &Isometry3<f64>, current: &Isometry3<f64>) -> Vector3<f64> {
    let diff = target.rotation * current.rotation.inverse();
    if diff.angle() < ROT_EPS {
        Vector3::zeros()
    } else {
        diff.scaled_axis()
    }
}

/// Scalar distance between two poses: the norm of [`pose_error`].
pub fn pose_distance(a: &Isometry3<f64>, b: &Isometry3<f64>) -> f64 {
    pose_error(a, b).norm()
}

/// Rotation taking unit direction `from` onto unit direction `to`.
///
/// Anti-parallel inputs rotate by pi about an arbitrary perpendicular axis.
pub fn rotation_between(from: &Vector3<f64>, to: &Vector3<f64>) -> UnitQuaternion<f64> {
    UnitQuaternion::rotation_between(from, to).unwrap_or_else(|| {
        let axis = orthogonal_to(from);
        UnitQuaternion::from_axis_angle(&axis, std::f64::consts::PI)
    })
}

/// Any unit vector perpendicular to `v`.
pub fn orthogonal_to(v: &Vector3<f64>) -> UnitVector3<f64> {
    let candidate = if v.x.abs() < 0.9 {
        Vector3::x()
    } else {
        Vector3::y()
    };
    Unit::new_normalize(v.cross(&candidate))
}

/// Interpolates between two poses: linear in translation, slerp in rotation.
pub fn interpolate_pose(p0: &Isometry3<f64>, p1: &Isometry3<f64>, t: f64) -> Isometry3<f64> {
    p0.lerp_slerp(p1, t)
}

/// Builds a pose from three column axes and an origin.
///
/// The axes must form a right-handed orthonormal basis.
pub fn isometry_from_axes(
    x: &Vector3<f64>,
    y: &Vector3<f64>,
    z: &Vector3<f64>,
    origin: &Point3<f64>,
) -> Isometry3<f64> {
    let rot = Rotation3::from_matrix_unchecked(Matrix3::from_columns(&[*x, *y, *z]));
    Isometry3::from_parts(
        Translation3::from(origin.coords),
        UnitQuaternion::from_rotation_matrix(&rot),
    )
}

/// Pose translated by `offset` expressed in the world frame.
pub fn translated(pose: &Isometry3<f64>, offset: &Vector3<f64>) -> Isometry3<f64> {
    Isometry3::from_parts(
        Translation3::from(pose.translation.vector + offset),
        pose.rotation,
    )
}

/// The z (approach) axis of a pose in world coordinates.
pub fn z_axis(pose: &Isometry3<f64>) -> Vector3<f64> {
    pose.rotation * Vector3::z()
}

/// Wraps an angle to `(-pi, pi]`.
pub fn wrap_angle(angle: f64) -> f64 {
    use std::f64::consts::{PI, TAU};
    let mut a = angle % TAU;
    if a <= -PI {
        a += TAU;
    } else if a > PI {
        a -= TAU;
    }
    a
}
