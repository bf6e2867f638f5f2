//! # Task table: arena of live task nodes.
//!
//! Tasks form a tree. Instead of a pointer graph, every node lives in one
//! `HashMap<TaskId, Node>` and refers to its parent and children by id.
//!
//! ## Rules
//! - A node is inserted **before** its runner is spawned, so a cancellation
//!   walk never misses a freshly started child.
//! - A child inserted under a parent that already has `cancel_requested` is
//!   cancelled on insertion.
//! - Cancellation walks the subtree depth-first (children before parent).
//! - A node is reaped once it is terminal **and** has no children left; reaping
//!   cascades to an already-terminal parent.
//! - The table is guarded by a plain mutex that is never held across `.await`.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::handle::{TaskId, TaskStatus};
use crate::error::TaskError;

/// How a task relates to its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// No parent. Failures go to the root-failure hook.
    Root,
    /// `fork`: the parent waits for it and fails with it.
    Attached,
    /// `spawn`: cancelled with the parent's tree, never awaited by it.
    /// Failures go to the root-failure hook.
    Detached,
    /// Member of a `race`/`all`/time limit; reports only through its join.
    Joined,
}

/// One task in the arena.
pub(crate) struct Node {
    pub name: Arc<str>,
    pub parent: Option<TaskId>,
    pub children: Vec<TaskId>,
    pub ownership: Ownership,
    /// Cancels the task itself (set by the depth-first walk).
    pub token: CancellationToken,
    /// Aborts the task body because an attached child failed.
    pub abort: CancellationToken,
    pub cancel_requested: bool,
    /// First failure reported by an attached child.
    pub child_failure: Option<TaskError>,
    pub status: watch::Sender<TaskStatus>,
}

impl Node {
    fn is_terminal(&self) -> bool {
        self.status.borrow().is_terminal()
    }
}

#[derive(Default)]
pub(crate) struct TaskTable {
    nodes: HashMap<TaskId, Node>,
}

impl TaskTable {
    /// Inserts a node and links it to its parent.
    ///
    /// Returns the effective parent (`None` if the requested one is gone).
    pub fn insert(&mut self, id: TaskId, mut node: Node) -> Option<TaskId> {
        let parent = node.parent.filter(|p| self.nodes.contains_key(p));
        node.parent = parent;

        if let Some(pid) = parent {
            if let Some(p) = self.nodes.get_mut(&pid) {
                p.children.push(id);
                if p.cancel_requested {
                    node.cancel_requested = true;
                    node.token.cancel();
                }
            }
        }
        self.nodes.insert(id, node);
        parent
    }

    /// Cancels `id` and its whole subtree, depth-first.
    pub fn cancel_subtree(&mut self, id: TaskId) {
        let mut order = Vec::new();
        self.post_order(id, &mut order);
        for nid in order {
            if let Some(node) = self.nodes.get_mut(&nid) {
                node.cancel_requested = true;
                node.token.cancel();
            }
        }
    }

    /// Cancels the subtrees of every child of `id`, leaving `id` itself alone.
    pub fn cancel_children(&mut self, id: TaskId) {
        let children = self.children(id);
        for child in children {
            self.cancel_subtree(child);
        }
    }

    fn post_order(&self, id: TaskId, out: &mut Vec<TaskId>) {
        // iterative: (node, children_pushed)
        let mut stack = vec![(id, false)];
        while let Some((nid, expanded)) = stack.pop() {
            if expanded {
                out.push(nid);
                continue;
            }
            let Some(node) = self.nodes.get(&nid) else {
                continue;
            };
            stack.push((nid, true));
            for child in node.children.iter().rev() {
                stack.push((*child, false));
            }
        }
    }

    pub fn children(&self, id: TaskId) -> Vec<TaskId> {
        self.nodes
            .get(&id)
            .map(|n| n.children.clone())
            .unwrap_or_default()
    }

    /// Status receivers of the non-terminal children of `id`.
    ///
    /// With `attached_only`, joined and detached children are skipped.
    pub fn pending_children(
        &self,
        id: TaskId,
        attached_only: bool,
    ) -> Vec<watch::Receiver<TaskStatus>> {
        let Some(node) = self.nodes.get(&id) else {
            return Vec::new();
        };
        node.children
            .iter()
            .filter_map(|cid| self.nodes.get(cid))
            .filter(|c| !attached_only || c.ownership == Ownership::Attached)
            .filter(|c| !c.is_terminal())
            .map(|c| c.status.subscribe())
            .collect()
    }

    pub fn get(&self, id: TaskId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn get_mut(&mut self, id: TaskId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    /// Ids of all live root tasks.
    pub fn roots(&self) -> Vec<TaskId> {
        self.nodes
            .iter()
            .filter(|(_, n)| n.parent.is_none())
            .map(|(id, _)| *id)
            .collect()
    }

    /// Records an attached child's failure on its parent.
    ///
    /// Only the first failure is kept; returns `true` if the parent must abort.
    pub fn report_child_failure(&mut self, parent: TaskId, err: TaskError) -> bool {
        let Some(p) = self.nodes.get_mut(&parent) else {
            return false;
        };
        if p.is_terminal() || p.child_failure.is_some() {
            return false;
        }
        p.child_failure = Some(err);
        p.abort.cancel();
        true
    }

    pub fn take_child_failure(&mut self, id: TaskId) -> Option<TaskError> {
        self.nodes.get_mut(&id).and_then(|n| n.child_failure.take())
    }

    /// Removes `id` if it is terminal and childless, then retries on its parent.
    pub fn reap(&mut self, id: TaskId) {
        let mut current = Some(id);
        while let Some(nid) = current.take() {
            let removable = self
                .nodes
                .get(&nid)
                .is_some_and(|n| n.is_terminal() && n.children.is_empty());
            if !removable {
                break;
            }
            let Some(node) = self.nodes.remove(&nid) else {
                break;
            };
            if let Some(pid) = node.parent {
                if let Some(p) = self.nodes.get_mut(&pid) {
                    p.children.retain(|c| *c != nid);
                }
                current = Some(pid);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }
}
