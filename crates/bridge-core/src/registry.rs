//! Local mirror of the remote view tree.
//!
//! The registry only does bookkeeping. It never talks to the native side and
//! never cascades on its own; the renderer decides what a removal means.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{BridgeError, BridgeResult};
use crate::hash::HashMap;
use crate::view::{ViewId, ViewNode, ViewType};

static NEXT_VIEW_ID: AtomicU64 = AtomicU64::new(1);

/// Returns a process-unique id. Ids are strictly increasing and never reused.
pub fn generate_view_id() -> ViewId {
    let id = NEXT_VIEW_ID.fetch_add(1, Ordering::Relaxed);
    ViewId::new(format!("view_{id}"))
}

#[derive(Default)]
pub struct ViewRegistry {
    nodes: HashMap<ViewId, ViewNode>,
}

impl ViewRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the node stored under `node.id`.
    pub fn register(&mut self, node: ViewNode) {
        self.nodes.insert(node.id.clone(), node);
    }

    pub fn get(&self, id: &ViewId) -> Option<&ViewNode> {
        self.nodes.get(id)
    }

    pub fn get_mut(&mut self, id: &ViewId) -> Option<&mut ViewNode> {
        self.nodes.get_mut(id)
    }

    pub fn has(&self, id: &ViewId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Removes the node only. Children and the parent's child list are left
    /// as they are.
    pub fn unregister(&mut self, id: &ViewId) -> Option<ViewNode> {
        self.nodes.remove(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn children(&self, id: &ViewId) -> &[ViewId] {
        self.nodes
            .get(id)
            .map(|node| node.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn parent(&self, id: &ViewId) -> Option<&ViewId> {
        self.nodes.get(id).and_then(|node| node.parent.as_ref())
    }

    /// Nearest ancestor first.
    pub fn ancestors(&self, id: &ViewId) -> Vec<ViewId> {
        let mut ancestors = Vec::new();
        let mut current = self.parent(id);
        while let Some(parent) = current {
            // A corrupted link must not loop forever.
            if parent == id || ancestors.contains(parent) {
                break;
            }
            ancestors.push(parent.clone());
            current = self.parent(parent);
        }
        ancestors
    }

    /// Depth-first, pre-order. Does not include `id` itself.
    pub fn descendants(&self, id: &ViewId) -> Vec<ViewId> {
        let mut out = Vec::new();
        let mut stack: Vec<&ViewId> = self.children(id).iter().rev().collect();
        while let Some(next) = stack.pop() {
            if next == id || out.contains(next) {
                continue;
            }
            out.push(next.clone());
            stack.extend(self.children(next).iter().rev());
        }
        out
    }

    pub fn find_by_type(&self, view_type: &ViewType) -> Vec<&ViewNode> {
        self.find_where(|node| &node.view_type == view_type)
    }

    pub fn find_where(&self, mut predicate: impl FnMut(&ViewNode) -> bool) -> Vec<&ViewNode> {
        let mut found: Vec<&ViewNode> = self.nodes.values().filter(|node| predicate(node)).collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        found
    }

    /// Nodes without a parent, in id order.
    pub fn roots(&self) -> Vec<&ViewNode> {
        self.find_where(ViewNode::is_root)
    }

    pub fn append_child(&mut self, parent: &ViewId, child: &ViewId) -> BridgeResult<()> {
        let end = self.children(parent).len();
        self.link(parent, child, end).map(|_| ())
    }

    /// Links `child` under `parent` at `index`, clamped to the child count.
    ///
    /// Returns the index the child ended up at.
    pub fn insert_child(
        &mut self,
        parent: &ViewId,
        child: &ViewId,
        index: usize,
    ) -> BridgeResult<usize> {
        self.link(parent, child, index)
    }

    /// Returns false when `child` was not a child of `parent`.
    pub fn remove_child(&mut self, parent: &ViewId, child: &ViewId) -> bool {
        let removed = match self.nodes.get_mut(parent) {
            Some(node) => {
                let before = node.children.len();
                node.children.retain(|id| id != child);
                node.children.len() != before
            }
            None => false,
        };
        if let Some(node) = self.nodes.get_mut(child) {
            if node.parent.as_ref() == Some(parent) {
                node.parent = None;
            }
        }
        removed
    }

    /// Indented one-line-per-node rendering of the subtree under `root`.
    pub fn dump_tree(&self, root: &ViewId) -> String {
        let mut out = String::new();
        self.dump_node(root, 0, &mut out);
        out
    }

    fn dump_node(&self, id: &ViewId, depth: usize, out: &mut String) {
        let Some(node) = self.nodes.get(id) else {
            let _ = writeln!(out, "{:indent$}{id} <missing>", "", indent = depth * 2);
            return;
        };
        let _ = writeln!(
            out,
            "{:indent$}{} {}",
            "",
            node.view_type,
            node.id,
            indent = depth * 2
        );
        // Depth is bounded by the node count so a cycle cannot recurse forever.
        if depth >= self.nodes.len() {
            return;
        }
        for child in &node.children {
            self.dump_node(child, depth + 1, out);
        }
    }

    fn link(&mut self, parent: &ViewId, child: &ViewId, index: usize) -> BridgeResult<usize> {
        if !self.has(parent) {
            return Err(BridgeError::UnknownView(parent.clone()));
        }
        if !self.has(child) {
            return Err(BridgeError::UnknownView(child.clone()));
        }
        if parent == child || self.ancestors(parent).contains(child) {
            return Err(BridgeError::InvalidHierarchy(format!(
                "{child} cannot become a child of its own descendant {parent}"
            )));
        }
        let previous = self.parent(child).cloned();
        if let Some(previous) = previous {
            self.remove_child(&previous, child);
        }
        let position = match self.nodes.get_mut(parent) {
            Some(node) => {
                let position = index.min(node.children.len());
                node.children.insert(position, child.clone());
                position
            }
            None => return Err(BridgeError::UnknownView(parent.clone())),
        };
        if let Some(node) = self.nodes.get_mut(child) {
            node.parent = Some(parent.clone());
        }
        Ok(position)
    }
}

impl std::fmt::Debug for ViewRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewRegistry")
            .field("len", &self.nodes.len())
            .finish()
    }
}

#[cfg(test)]
#[path = "tests/registry_tests.rs"]
mod tests;
