//! Sampling-based RRT* planner in joint space.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, trace};

use super::{interpolate_joint_path, joint_delta, joint_distance, JointBound};
use crate::errors::{Error, Result};
use crate::scene::SceneManager;

/// RRT* parameters.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RrtStarConfig {
    /// Steering step size in joint space.
    pub delta_distance: f64,
    /// Probability of sampling the goal instead of a random state.
    pub epsilon: f64,
    pub max_iter: usize,
    /// Constant of the shrinking near-neighbour radius.
    pub gamma_rrt_star: f64,
    /// Number of active joints the planner works in.
    pub dimension: usize,
    /// RNG seed; a fixed seed makes the returned path reproducible.
    pub seed: u64,
}

impl RrtStarConfig {
    pub fn new(dimension: usize) -> Self {
        Self {
            delta_distance: 0.1,
            epsilon: 0.2,
            max_iter: 500,
            gamma_rrt_star: 1.5,
            dimension,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone)]
struct TreeNode {
    q: Vec<f64>,
    parent: Option<usize>,
    cost: f64,
}

/// Single-tree RRT* with goal biasing and rewiring.
#[derive(Debug)]
pub struct RrtStarPlanner {
    cfg: RrtStarConfig,
    rng: StdRng,
    start: Option<Vec<f64>>,
    goal: Option<Vec<f64>>,
    nodes: Vec<TreeNode>,
    goal_nodes: Vec<usize>,
    path: Option<Vec<Vec<f64>>>,
}

impl RrtStarPlanner {
    pub fn new(cfg: RrtStarConfig) -> Self {
        let rng = StdRng::seed_from_u64(cfg.seed);
        Self {
            cfg,
            rng,
            start: None,
            goal: None,
            nodes: Vec::new(),
            goal_nodes: Vec::new(),
            path: None,
        }
    }

    pub fn config(&self) -> &RrtStarConfig {
        &self.cfg
    }

    /// Sets start and goal joint vectors and resets the tree and RNG.
    pub fn setup_start_goal_joint(&mut self, start: &[f64], goal: &[f64]) -> Result<()> {
        for (label, q) in [("start", start), ("goal", goal)] {
            if q.len() != self.cfg.dimension {
                debug!(label, len = q.len(), "joint vector has wrong dimension");
                return Err(Error::MismatchedDof {
                    expected: self.cfg.dimension,
                    actual: q.len(),
                });
            }
        }
        self.start = Some(start.to_vec());
        self.goal = Some(goal.to_vec());
        self.nodes.clear();
        self.goal_nodes.clear();
        self.path = None;
        self.rng = StdRng::seed_from_u64(self.cfg.seed);
        Ok(())
    }

    /// Plans inside a scene: joint bounds come from the robot's chain and
    /// states are validated with the scene's collision managers.
    pub fn run(&mut self, scene: &mut SceneManager) -> Result<()> {
        let robot = scene
            .robot
            .as_ref()
            .ok_or_else(|| Error::InvalidModel("scene has no robot".to_owned()))?;
        let bounds =
            JointBound::from_limits(&robot.arm_joint_limits(), &robot.arm_joint_continuous());
        let path = {
            let mut validator = |q: &[f64]| scene.is_collision_free(q);
            self.generate_path(&bounds, &mut validator)
        };
        scene.restore_collision_state()?;
        self.path = Some(path?);
        Ok(())
    }

    /// Core planning loop; `is_free` validates a configuration.
    pub fn generate_path<F>(&mut self, bounds: &[JointBound], is_free: &mut F) -> Result<Vec<Vec<f64>>>
    where
        F: FnMut(&[f64]) -> bool,
    {
        self.generate_path_with(bounds, is_free, || false)
    }

    /// Like [`Self::generate_path`] with a cooperative cancellation
    /// predicate checked between iterations; on cancellation the best
    /// path found so far is returned (or `NoPlanFound`).
    pub fn generate_path_with<F, C>(
        &mut self,
        bounds: &[JointBound],
        is_free: &mut F,
        mut cancelled: C,
    ) -> Result<Vec<Vec<f64>>>
    where
        F: FnMut(&[f64]) -> bool,
        C: FnMut() -> bool,
    {
        let start = self
            .start
            .clone()
            .ok_or_else(|| Error::InvalidModel("start joints are not set".to_owned()))?;
        let goal = self
            .goal
            .clone()
            .ok_or_else(|| Error::InvalidModel("goal joints are not set".to_owned()))?;
        if bounds.len() != self.cfg.dimension {
            return Err(Error::MismatchedDof {
                expected: self.cfg.dimension,
                actual: bounds.len(),
            });
        }
        if !is_free(&start) {
            return Err(Error::CollisionAtStart);
        }
        if !is_free(&goal) {
            return Err(Error::CollisionAtGoal);
        }

        self.nodes = vec![TreeNode {
            q: start,
            parent: None,
            cost: 0.0,
        }];
        self.goal_nodes.clear();

        let delta = self.cfg.delta_distance;
        for iter in 0..self.cfg.max_iter {
            if cancelled() {
                debug!(iter, "planning cancelled");
                break;
            }
            let q_rand = self.sample(&goal, bounds);
            let near_idx = self.nearest(&q_rand, bounds);
            let q_new = steer(&self.nodes[near_idx].q, &q_rand, delta, bounds);
            if !self.edge_is_free(&self.nodes[near_idx].q, &q_new, bounds, is_free) {
                continue;
            }

            let neighbours = self.near_indices(&q_new, bounds);
            let mut best_parent = near_idx;
            let mut best_cost = self.nodes[near_idx].cost
                + joint_distance(&self.nodes[near_idx].q, &q_new, bounds);
            for &n in &neighbours {
                let cost = self.nodes[n].cost + joint_distance(&self.nodes[n].q, &q_new, bounds);
                if cost < best_cost && self.edge_is_free(&self.nodes[n].q, &q_new, bounds, is_free)
                {
                    best_parent = n;
                    best_cost = cost;
                }
            }

            let new_idx = self.nodes.len();
            self.nodes.push(TreeNode {
                q: q_new.clone(),
                parent: Some(best_parent),
                cost: best_cost,
            });

            // rewire the neighbourhood through the new node; the chosen
            // parent is skipped, a reparent there would close a cycle
            for &n in &neighbours {
                if n == best_parent {
                    continue;
                }
                let through = best_cost + joint_distance(&q_new, &self.nodes[n].q, bounds);
                if through < self.nodes[n].cost
                    && self.edge_is_free(&q_new, &self.nodes[n].q, bounds, is_free)
                {
                    self.nodes[n].parent = Some(new_idx);
                    self.nodes[n].cost = through;
                    self.refresh_subtree_costs(n, bounds);
                }
            }

            if joint_distance(&q_new, &goal, bounds) <= delta
                && self.edge_is_free(&q_new, &goal, bounds, is_free)
            {
                let goal_idx = self.nodes.len();
                self.nodes.push(TreeNode {
                    q: goal.clone(),
                    parent: Some(new_idx),
                    cost: best_cost + joint_distance(&q_new, &goal, bounds),
                });
                self.goal_nodes.push(goal_idx);
                trace!(iter, cost = self.nodes[goal_idx].cost, "goal reached");
            }
        }

        let best_goal = self
            .goal_nodes
            .iter()
            .copied()
            .min_by(|&a, &b| self.nodes[a].cost.total_cmp(&self.nodes[b].cost))
            .ok_or(Error::NoPlanFound)?;
        debug!(
            nodes = self.nodes.len(),
            goals = self.goal_nodes.len(),
            cost = self.nodes[best_goal].cost,
            "rrt* finished"
        );
        let path = self.backtrack(best_goal);
        self.path = Some(path.clone());
        Ok(path)
    }

    /// The raw waypoint path from the last successful run.
    pub fn path(&self) -> Option<&[Vec<f64>]> {
        self.path.as_deref()
    }

    /// The last path resampled into `n_step` uniform configurations.
    pub fn get_joint_path(&self, n_step: usize) -> Option<Vec<Vec<f64>>> {
        self.path
            .as_ref()
            .map(|path| interpolate_joint_path(path, n_step))
    }

    fn sample(&mut self, goal: &[f64], bounds: &[JointBound]) -> Vec<f64> {
        if self.rng.gen::<f64>() < self.cfg.epsilon {
            return goal.to_vec();
        }
        bounds
            .iter()
            .map(|b| self.rng.gen_range(b.min..=b.max))
            .collect()
    }

    fn nearest(&self, q: &[f64], bounds: &[JointBound]) -> usize {
        let mut best = 0;
        let mut best_dist = f64::INFINITY;
        for (i, node) in self.nodes.iter().enumerate() {
            let d = joint_distance(&node.q, q, bounds);
            if d < best_dist {
                best = i;
                best_dist = d;
            }
        }
        best
    }

    /// Indices within the shrinking RRT* radius
    /// `min(gamma * (log n / n)^(1/d), delta)`.
    fn near_indices(&self, q: &[f64], bounds: &[JointBound]) -> Vec<usize> {
        let n = self.nodes.len() as f64;
        let d = self.cfg.dimension as f64;
        let radius = if self.nodes.len() > 1 {
            (self.cfg.gamma_rrt_star * ((n.ln() / n).powf(1.0 / d)))
                .min(self.cfg.delta_distance)
        } else {
            self.cfg.delta_distance
        };
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| joint_distance(&node.q, q, bounds) <= radius)
            .map(|(i, _)| i)
            .collect()
    }

    /// Discretised edge validity check at resolution `delta_distance`.
    fn edge_is_free<F>(
        &self,
        from: &[f64],
        to: &[f64],
        bounds: &[JointBound],
        is_free: &mut F,
    ) -> bool
    where
        F: FnMut(&[f64]) -> bool,
    {
        let dist = joint_distance(from, to, bounds);
        let steps = (dist / self.cfg.delta_distance).ceil().max(1.0) as usize;
        for s in 1..=steps {
            let t = s as f64 / steps as f64;
            let q: Vec<f64> = from
                .iter()
                .zip(to.iter())
                .zip(bounds.iter())
                .map(|((&a, &b), bound)| a + joint_delta(a, b, bound.continuous) * t)
                .collect();
            if !is_free(&q) {
                return false;
            }
        }
        true
    }

    /// Re-derives cost-to-come below a rewired node, so stored costs stay
    /// consistent with the tree and never increase over iterations.
    fn refresh_subtree_costs(&mut self, root_idx: usize, bounds: &[JointBound]) {
        let mut stack = vec![root_idx];
        while let Some(i) = stack.pop() {
            let base = self.nodes[i].cost;
            let q = self.nodes[i].q.clone();
            for k in 0..self.nodes.len() {
                if self.nodes[k].parent == Some(i) && k != i {
                    self.nodes[k].cost = base + joint_distance(&q, &self.nodes[k].q, bounds);
                    stack.push(k);
                }
            }
        }
    }

    fn backtrack(&self, goal_idx: usize) -> Vec<Vec<f64>> {
        let mut path = Vec::new();
        let mut cursor = Some(goal_idx);
        while let Some(i) = cursor {
            path.push(self.nodes[i].q.clone());
            cursor = self.nodes[i].parent;
        }
        path.reverse();
        path
    }
}

/// Moves `delta` from `from` towards `to`, clamped to the bounds.
fn steer(from: &[f64], to: &[f64], delta: f64, bounds: &[JointBound]) -> Vec<f64> {
    let dist = joint_distance(from, to, bounds);
    if dist <= delta {
        return from
            .iter()
            .zip(to.iter())
            .zip(bounds.iter())
            .map(|((&a, &b), bound)| bound.clamp(a + joint_delta(a, b, bound.continuous)))
            .collect();
    }
    from.iter()
        .zip(to.iter())
        .zip(bounds.iter())
        .map(|((&a, &b), bound)| {
            bound.clamp(a + joint_delta(a, b, bound.continuous) * delta / dist)
        })
        .collect()
}
