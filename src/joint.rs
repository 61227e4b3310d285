//! Joint model: kind, axis, origin transform and position limits.

use nalgebra::{Isometry3, Translation3, UnitQuaternion, UnitVector3};

use crate::errors::{Error, Result};
use crate::math::wrap_angle;

/// Kind of a joint together with its motion axis.
#[derive(Debug, Clone)]
pub enum JointType {
    /// Rigid connection.
    Fixed,
    /// 1-DOF rotation about `axis`, bounded by position limits.
    Revolute { axis: UnitVector3<f64> },
    /// 1-DOF translation along `axis`.
    Prismatic { axis: UnitVector3<f64> },
    /// 1-DOF unbounded rotation about `axis`.
    Continuous { axis: UnitVector3<f64> },
}

impl JointType {
    pub fn is_fixed(&self) -> bool {
        matches!(self, JointType::Fixed)
    }

    pub fn is_continuous(&self) -> bool {
        matches!(self, JointType::Continuous { .. })
    }

    pub fn axis(&self) -> Option<UnitVector3<f64>> {
        match self {
            JointType::Fixed => None,
            JointType::Revolute { axis }
            | JointType::Prismatic { axis }
            | JointType::Continuous { axis } => Some(*axis),
        }
    }
}

/// Position limits `[min, max]` of a movable joint.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Limits {
    pub min: f64,
    pub max: f64,
}

impl Limits {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        self.min <= value && value <= self.max
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }
}

/// A joint between a parent link and a child link.
#[derive(Debug, Clone)]
pub struct Joint {
    pub name: String,
    pub joint_type: JointType,
    /// Transform from the parent link frame to this joint frame at zero position.
    pub origin: Isometry3<f64>,
    /// `None` for fixed and continuous joints.
    pub limits: Option<Limits>,
}

impl Joint {
    pub fn new(name: impl Into<String>, joint_type: JointType) -> Self {
        Self {
            name: name.into(),
            joint_type,
            origin: Isometry3::identity(),
            limits: None,
        }
    }

    pub fn fixed(name: impl Into<String>) -> Self {
        Self::new(name, JointType::Fixed)
    }

    pub fn with_origin(mut self, origin: Isometry3<f64>) -> Self {
        self.origin = origin;
        self
    }

    pub fn with_limits(mut self, min: f64, max: f64) -> Self {
        self.limits = Some(Limits::new(min, max));
        self
    }

    pub fn is_movable(&self) -> bool {
        !self.joint_type.is_fixed()
    }

    /// Parent-to-child transform at joint position `q`: `origin * motion(q)`.
    pub fn local_transform(&self, q: f64) -> Isometry3<f64> {
        let motion = match &self.joint_type {
            JointType::Fixed => Isometry3::identity(),
            JointType::Revolute { axis } | JointType::Continuous { axis } => {
                Isometry3::from_parts(
                    Translation3::identity(),
                    UnitQuaternion::from_axis_angle(axis, q),
                )
            }
            JointType::Prismatic { axis } => {
                Isometry3::translation(axis.x * q, axis.y * q, axis.z * q)
            }
        };
        self.origin * motion
    }

    /// Errors with [`Error::OutOfLimits`] if `q` violates the position limits.
    pub fn check_limits(&self, q: f64) -> Result<()> {
        match self.limits {
            Some(limits) if !limits.contains(q) => Err(Error::OutOfLimits {
                joint: self.name.clone(),
                value: q,
                min: limits.min,
                max: limits.max,
            }),
            _ => Ok(()),
        }
    }

    pub fn clamp(&self, q: f64) -> f64 {
        match self.limits {
            Some(limits) => limits.clamp(q),
            None => q,
        }
    }

    /// Continuous joints wrap to `(-pi, pi]`; others pass through.
    pub fn normalize_position(&self, q: f64) -> f64 {
        if self.joint_type.is_continuous() {
            wrap_angle(q)
        } else {
            q
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Unit, Vector3};
    use std::f64::consts::{FRAC_PI_2, PI};

    #[test]
    fn revolute_transform_rotates_about_axis() {
        let joint = Joint::new(
            "j0",
            JointType::Revolute {
                axis: Vector3::z_axis(),
            },
        );
        let t = joint.local_transform(FRAC_PI_2);
        let p = t * nalgebra::Point3::new(1.0, 0.0, 0.0);
        assert_relative_eq!(p.x, 0.0, epsilon = 1e-12);
        assert_relative_eq!(p.y, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn prismatic_transform_translates_along_axis() {
        let axis = Unit::new_normalize(Vector3::new(0.0, 0.0, 2.0));
        let joint = Joint::new("slide", JointType::Prismatic { axis });
        let t = joint.local_transform(0.3);
        assert_relative_eq!(t.translation.vector.z, 0.3, epsilon = 1e-12);
    }

    #[test]
    fn origin_composes_before_motion() {
        let joint = Joint::new(
            "j0",
            JointType::Revolute {
                axis: Vector3::z_axis(),
            },
        )
        .with_origin(Isometry3::translation(0.0, 0.0, 1.0));
        let t = joint.local_transform(PI);
        assert_relative_eq!(t.translation.vector.z, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn limits_are_enforced() {
        let joint = Joint::new(
            "j0",
            JointType::Revolute {
                axis: Vector3::z_axis(),
            },
        )
        .with_limits(-1.0, 1.0);
        assert!(joint.check_limits(0.5).is_ok());
        assert!(matches!(
            joint.check_limits(1.5),
            Err(Error::OutOfLimits { .. })
        ));
        assert_relative_eq!(joint.clamp(1.5), 1.0);
    }

    #[test]
    fn continuous_wraps() {
        let joint = Joint::new(
            "spin",
            JointType::Continuous {
                axis: Vector3::z_axis(),
            },
        );
        assert!(joint.check_limits(100.0).is_ok());
        assert_relative_eq!(joint.normalize_position(3.0 * PI), PI, epsilon = 1e-12);
    }
}
