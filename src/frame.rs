//! Kinematic tree of frames.
//!
//! A [`Frame`] binds one [`Link`] to the [`Joint`] connecting it to its
//! parent; frames live in an index [`Arena`] so the tree carries no
//! reference cycles. The root frame's joint is conventionally fixed.

use nalgebra::Isometry3;

use crate::arena::{Arena, NodeId};
use crate::errors::{Error, Result};
use crate::joint::{Joint, Limits};
use crate::link::Link;

/// Identifier of a frame inside a [`FrameTree`].
pub type FrameId = NodeId;

/// One edge of the kinematic tree: a link plus its parent joint.
#[derive(Debug, Clone)]
pub struct Frame {
    pub link: Link,
    pub joint: Joint,
}

impl Frame {
    pub fn new(link: Link, joint: Joint) -> Self {
        Self { link, joint }
    }

    /// Parent-to-child transform at joint position `q`.
    pub fn transform(&self, q: f64) -> Isometry3<f64> {
        self.joint.local_transform(q)
    }
}

/// Arena-backed kinematic tree with a cached DFS order and the ordered
/// list of active (non-fixed) joints.
#[derive(Debug, Clone)]
pub struct FrameTree {
    arena: Arena<Frame>,
    root: FrameId,
    dfs_order: Vec<FrameId>,
    active: Vec<FrameId>,
}

impl FrameTree {
    /// Finalizes an arena of frames into a tree.
    ///
    /// Fails if the arena is empty or does not have exactly one root.
    pub fn from_arena(arena: Arena<Frame>) -> Result<Self> {
        let mut roots = arena.iter().filter(|(_, n)| n.parent.is_none());
        let root = roots
            .next()
            .map(|(id, _)| id)
            .ok_or_else(|| Error::InvalidModel("frame tree has no root".to_owned()))?;
        if let Some((id, _)) = roots.next() {
            return Err(Error::InvalidModel(format!(
                "frame tree has more than one root ({} and {})",
                arena.get(root).data.link.name,
                arena.get(id).data.link.name
            )));
        }
        drop(roots);
        let dfs_order: Vec<FrameId> = arena.descendants(root).collect();
        if dfs_order.len() != arena.len() {
            return Err(Error::InvalidModel(
                "frame tree contains nodes unreachable from the root".to_owned(),
            ));
        }
        let active = dfs_order
            .iter()
            .copied()
            .filter(|&id| arena.get(id).data.joint.is_movable())
            .collect();
        Ok(Self {
            arena,
            root,
            dfs_order,
            active,
        })
    }

    pub fn root(&self) -> FrameId {
        self.root
    }

    pub fn get(&self, id: FrameId) -> &Frame {
        &self.arena.get(id).data
    }

    pub fn children(&self, id: FrameId) -> &[FrameId] {
        &self.arena.get(id).children
    }

    pub fn parent(&self, id: FrameId) -> Option<FrameId> {
        self.arena.get(id).parent
    }

    /// All frame ids in DFS pre-order from the root.
    pub fn dfs(&self) -> &[FrameId] {
        &self.dfs_order
    }

    /// Number of frames.
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    /// Active (non-fixed) joints in DFS order; their count is the
    /// dimensionality of joint vectors accepted by FK and IK.
    pub fn active_frames(&self) -> &[FrameId] {
        &self.active
    }

    pub fn dof(&self) -> usize {
        self.active.len()
    }

    pub fn active_joint_names(&self) -> Vec<String> {
        self.active
            .iter()
            .map(|&id| self.get(id).joint.name.clone())
            .collect()
    }

    /// Position of frame `id` in the active joint ordering, if movable.
    pub fn active_index(&self, id: FrameId) -> Option<usize> {
        self.active.iter().position(|&a| a == id)
    }

    /// Limits of the active joints, in order (`None` = unbounded).
    pub fn joint_limits(&self) -> Vec<Option<Limits>> {
        self.active
            .iter()
            .map(|&id| self.get(id).joint.limits)
            .collect()
    }

    pub fn find_link(&self, name: &str) -> Option<FrameId> {
        self.dfs_order
            .iter()
            .copied()
            .find(|&id| self.get(id).link.name == name)
    }

    pub fn find_joint(&self, name: &str) -> Option<FrameId> {
        self.dfs_order
            .iter()
            .copied()
            .find(|&id| self.get(id).joint.name == name)
    }

    /// Frame ids from the root down to the frame owning `end_link`.
    pub fn chain_to(&self, end_link: &str) -> Option<Vec<FrameId>> {
        let end = self.find_link(end_link)?;
        let mut ids: Vec<FrameId> = self.arena.ancestors(end).collect();
        ids.reverse();
        Some(ids)
    }

    /// Resolves ids into frames, chain-style.
    pub fn frames_of(&self, ids: &[FrameId]) -> Vec<&Frame> {
        ids.iter().map(|&id| self.get(id)).collect()
    }

    /// Link-name pairs connected by a joint, canonically ordered.
    ///
    /// These are the pairs a collision manager should never test.
    pub fn adjacent_link_pairs(&self) -> Vec<(String, String)> {
        self.dfs_order
            .iter()
            .filter_map(|&id| {
                let parent = self.parent(id)?;
                let a = self.get(parent).link.name.clone();
                let b = self.get(id).link.name.clone();
                Some(if a <= b { (a, b) } else { (b, a) })
            })
            .collect()
    }
}

/// Incremental builder for a [`FrameTree`].
#[derive(Debug, Default)]
pub struct FrameTreeBuilder {
    arena: Arena<Frame>,
}

impl FrameTreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the root frame. Its joint is usually [`Joint::fixed`].
    pub fn add_root(&mut self, frame: Frame) -> FrameId {
        self.arena.insert(frame)
    }

    pub fn add_child(&mut self, parent: FrameId, frame: Frame) -> FrameId {
        let id = self.arena.insert(frame);
        self.arena.set_parent_child(parent, id);
        id
    }

    pub fn finalize(self) -> Result<FrameTree> {
        FrameTree::from_arena(self.arena)
    }
}
