//! Inverse kinematics: Newton-Raphson and Levenberg-Marquardt solvers over
//! the geometric Jacobian, plus the damped-least-squares step used by the
//! Cartesian planner.

use nalgebra::{DMatrix, DVector, Isometry3, Matrix6, Vector3, Vector6};
use tracing::debug;

use crate::errors::{Error, Result};
use crate::frame::Frame;
use crate::kinematics::{forward_kinematics_chain, jacobian};
use crate::math::pose_error;

/// Iterative IK method selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IkMethod {
    /// Newton-Raphson with a fixed step gain.
    NewtonRaphson,
    /// Levenberg-Marquardt with error-proportional damping.
    LevenbergMarquardt,
}

/// Outcome of an IK solve. The best joint vector reached is always
/// returned; `converged` tells whether the tolerance was met.
#[derive(Debug, Clone)]
pub struct IkSolution {
    pub joints: Vec<f64>,
    pub iterations: usize,
    pub converged: bool,
    /// Pose error of the returned joints against the target.
    pub error: Vector6<f64>,
}

impl IkSolution {
    /// Converts an unconverged solution into [`Error::IkNotConverged`].
    pub fn into_result(self) -> Result<Vec<f64>> {
        if self.converged {
            Ok(self.joints)
        } else {
            Err(Error::IkNotConverged {
                iterations: self.iterations,
                position_diff: Vector3::new(self.error[0], self.error[1], self.error[2]),
                rotation_diff: Vector3::new(self.error[3], self.error[4], self.error[5]),
            })
        }
    }

    pub fn position_error(&self) -> f64 {
        self.error.fixed_rows::<3>(0).norm()
    }
}

/// Jacobian-based IK solver for a serial chain.
///
/// The canonical target representation is a full pose (`Isometry3`); there
/// is no 6-vector target form.
#[derive(Debug, Clone)]
pub struct IkSolver {
    pub method: IkMethod,
    pub max_iter: usize,
}

impl Default for IkSolver {
    fn default() -> Self {
        Self {
            method: IkMethod::LevenbergMarquardt,
            max_iter: 1000,
        }
    }
}

const NR_GAIN: f64 = 0.5;
const NR_TOLERANCE: f64 = 1e-6;
const LM_TOLERANCE: f64 = 1e-12;
const LM_DAMPING_OFFSET: f64 = 0.002;
const PINV_EPS: f64 = 1e-10;

impl IkSolver {
    pub fn new(method: IkMethod, max_iter: usize) -> Self {
        Self { method, max_iter }
    }

    /// Solves for joint positions bringing the chain tip onto `target`.
    ///
    /// `seed` may violate joint limits; the solution is not limit-clamped
    /// here (planners enforce limits on their own outputs).
    pub fn solve(
        &self,
        chain: &[&Frame],
        base: &Isometry3<f64>,
        seed: &[f64],
        target: &Isometry3<f64>,
    ) -> IkSolution {
        match self.method {
            IkMethod::NewtonRaphson => solve_nr(chain, base, seed, target, self.max_iter),
            IkMethod::LevenbergMarquardt => solve_lm(chain, base, seed, target, self.max_iter),
        }
    }
}

fn tip_error(
    chain: &[&Frame],
    base: &Isometry3<f64>,
    q: &[f64],
    target: &Isometry3<f64>,
) -> (crate::kinematics::Transforms, Vector6<f64>) {
    let fk = forward_kinematics_chain(chain, base, q);
    let err = fk
        .last()
        .map(|(_, pose)| pose_error(target, pose))
        .unwrap_or_else(Vector6::zeros);
    (fk, err)
}

fn solve_nr(
    chain: &[&Frame],
    base: &Isometry3<f64>,
    seed: &[f64],
    target: &Isometry3<f64>,
    max_iter: usize,
) -> IkSolution {
    let dof = seed.len();
    let mut q = seed.to_vec();
    let (mut fk, mut err) = tip_error(chain, base, &q, target);
    let mut iterations = 0;

    while err.norm() > NR_TOLERANCE {
        iterations += 1;
        if iterations > max_iter {
            break;
        }
        let j = jacobian(chain, &fk, dof);
        let Ok(pinv) = j.pseudo_inverse(PINV_EPS) else {
            break;
        };
        let dq = &pinv * DVector::from_column_slice(err.as_slice()) * NR_GAIN;
        for (qi, d) in q.iter_mut().zip(dq.iter()) {
            *qi += d;
        }
        let next = tip_error(chain, base, &q, target);
        fk = next.0;
        err = next.1;
    }
    debug!(iterations, error = err.norm(), "newton-raphson ik finished");
    IkSolution {
        joints: q,
        iterations,
        converged: err.norm() <= NR_TOLERANCE,
        error: err,
    }
}

fn solve_lm(
    chain: &[&Frame],
    base: &Isometry3<f64>,
    seed: &[f64],
    target: &Isometry3<f64>,
    max_iter: usize,
) -> IkSolution {
    let dof = seed.len();
    let wn_pos = 1.0 / 0.3;
    let wn_ang = 1.0 / std::f64::consts::TAU;
    let we = Matrix6::from_diagonal(&Vector6::new(
        wn_pos, wn_pos, wn_pos, wn_ang, wn_ang, wn_ang,
    ));
    let wn = DMatrix::<f64>::identity(dof, dof);

    let mut q = seed.to_vec();
    let (mut fk, mut err) = tip_error(chain, base, &q, target);
    let mut ek = (err.transpose() * we * err)[0];
    let mut iterations = 0;

    while ek > LM_TOLERANCE {
        iterations += 1;
        if iterations > max_iter {
            break;
        }
        let lambda = ek + LM_DAMPING_OFFSET;

        let j = jacobian(chain, &fk, dof);
        let jt_we = j.transpose() * we;
        let jh = &jt_we * &j + &wn * lambda;
        let g = &jt_we * DVector::from_column_slice(err.as_slice());
        let Ok(pinv) = jh.pseudo_inverse(PINV_EPS) else {
            break;
        };
        let dq = pinv * g;

        let trial: Vec<f64> = q.iter().zip(dq.iter()).map(|(qi, d)| qi + d).collect();
        let (trial_fk, trial_err) = tip_error(chain, base, &trial, target);
        let ek2 = (trial_err.transpose() * we * trial_err)[0];
        if ek2 < ek {
            q = trial;
            fk = trial_fk;
            err = trial_err;
            ek = ek2;
        } else {
            // no improvement: keep the previous joints and stop
            break;
        }
    }
    debug!(iterations, residual = ek, "levenberg-marquardt ik finished");
    IkSolution {
        joints: q,
        iterations,
        converged: ek <= LM_TOLERANCE,
        error: err,
    }
}

/// One damped-least-squares step: `dq = Jt (J Jt + damping^2 I)^-1 e`.
///
/// Falls back to a zero step when the damped system is singular.
pub fn damped_least_squares_step(
    j: &DMatrix<f64>,
    err: &Vector6<f64>,
    damping: f64,
) -> DVector<f64> {
    let jjt = j * j.transpose() + DMatrix::identity(6, 6) * (damping * damping);
    match jjt.try_inverse() {
        Some(inv) => j.transpose() * inv * DVector::from_column_slice(err.as_slice()),
        None => DVector::zeros(j.ncols()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Frame, FrameTree, FrameTreeBuilder};
    use crate::joint::{Joint, JointType};
    use crate::link::Link;
    use nalgebra::{Isometry3, Translation3, Vector3};

    fn arm_3dof() -> FrameTree {
        let mut builder = FrameTreeBuilder::new();
        let root = builder.add_root(Frame::new(Link::new("base"), Joint::fixed("root")));
        let j0 = Joint::new(
            "j0",
            JointType::Revolute {
                axis: Vector3::z_axis(),
            },
        );
        let a = builder.add_child(root, Frame::new(Link::new("l0"), j0));
        let j1 = Joint::new(
            "j1",
            JointType::Revolute {
                axis: Vector3::y_axis(),
            },
        )
        .with_origin(Isometry3::from_parts(
            Translation3::new(0.0, 0.0, 0.3),
            Default::default(),
        ));
        let b = builder.add_child(a, Frame::new(Link::new("l1"), j1));
        let j2 = Joint::new(
            "j2",
            JointType::Revolute {
                axis: Vector3::y_axis(),
            },
        )
        .with_origin(Isometry3::from_parts(
            Translation3::new(0.0, 0.0, 0.25),
            Default::default(),
        ));
        let c = builder.add_child(b, Frame::new(Link::new("l2"), j2));
        let tip = Joint::fixed("tip_fix").with_origin(Isometry3::from_parts(
            Translation3::new(0.0, 0.0, 0.2),
            Default::default(),
        ));
        builder.add_child(c, Frame::new(Link::new("tip"), tip));
        builder.finalize().unwrap()
    }

    fn solve_round_trip(method: IkMethod) {
        let tree = arm_3dof();
        let ids = tree.chain_to("tip").unwrap();
        let chain = tree.frames_of(&ids);
        let base = Isometry3::identity();

        let q_true = [0.5, -0.4, 0.8];
        let fk = forward_kinematics_chain(&chain, &base, &q_true);
        let target = *fk.last().unwrap().1;

        let seed = [0.3, -0.2, 0.6];
        let solver = IkSolver::new(method, 1000);
        let solution = solver.solve(&chain, &base, &seed, &target);

        let reached = forward_kinematics_chain(&chain, &base, &solution.joints);
        let err = pose_error(&target, reached.last().unwrap().1);
        assert!(
            err.norm() < 1e-4,
            "{method:?} left error {}",
            err.norm()
        );
    }

    #[test]
    fn newton_raphson_round_trip() {
        solve_round_trip(IkMethod::NewtonRaphson);
    }

    #[test]
    fn levenberg_marquardt_round_trip() {
        solve_round_trip(IkMethod::LevenbergMarquardt);
    }

    #[test]
    fn unconverged_solution_reports_error_kind() {
        let tree = arm_3dof();
        let ids = tree.chain_to("tip").unwrap();
        let chain = tree.frames_of(&ids);
        // the arm has total reach 0.75, so this target is unreachable
        let target = Isometry3::translation(5.0, 0.0, 0.0);
        let solver = IkSolver::new(IkMethod::LevenbergMarquardt, 50);
        let solution = solver.solve(&chain, &Isometry3::identity(), &[0.0, 0.1, 0.0], &target);
        assert!(!solution.converged);
        assert!(matches!(
            solution.into_result(),
            Err(Error::IkNotConverged { .. })
        ));
    }

    #[test]
    fn dls_step_reduces_error() {
        let tree = arm_3dof();
        let ids = tree.chain_to("tip").unwrap();
        let chain = tree.frames_of(&ids);
        let base = Isometry3::identity();
        let q = [0.2, -0.3, 0.5];
        let fk = forward_kinematics_chain(&chain, &base, &q);
        let target =
            *forward_kinematics_chain(&chain, &base, &[0.25, -0.3, 0.5]).last().unwrap().1;
        let err = pose_error(&target, fk.last().unwrap().1);
        let j = jacobian(&chain, &fk, q.len());
        let dq = damped_least_squares_step(&j, &err, 0.05);
        let q2: Vec<f64> = q.iter().zip(dq.iter()).map(|(a, b)| a + b).collect();
        let fk2 = forward_kinematics_chain(&chain, &base, &q2);
        let err2 = pose_error(&target, fk2.last().unwrap().1);
        assert!(err2.norm() < err.norm());
    }
}
