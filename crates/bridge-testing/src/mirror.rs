use std::fmt::Write as _;

use bridge_core::{BridgeError, BridgeMessage, BridgeResult, Operation, Props, ViewId, ViewType};
use indexmap::IndexMap;

use crate::transport::WireLog;

/// A view as the fake native side sees it.
#[derive(Clone, Debug, PartialEq)]
pub struct MirrorNode {
    pub view_type: ViewType,
    pub props: Props,
    pub children: Vec<ViewId>,
    pub parent: Option<ViewId>,
}

/// Applies structural operations the way a native host would, so tests can
/// assert on the tree the remote side ends up with.
#[derive(Debug, Default)]
pub struct NativeMirror {
    nodes: IndexMap<ViewId, MirrorNode>,
    root: Option<ViewId>,
    applied: usize,
}

impl NativeMirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &ViewId) -> Option<&MirrorNode> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &ViewId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn root(&self) -> Option<&ViewId> {
        self.root.as_ref()
    }

    pub fn applied(&self) -> usize {
        self.applied
    }

    pub fn children(&self, id: &ViewId) -> &[ViewId] {
        self.nodes
            .get(id)
            .map(|node| node.children.as_slice())
            .unwrap_or(&[])
    }

    /// Drains the log's frames and applies every structural message in them.
    pub fn sync(&mut self, log: &WireLog) -> BridgeResult<usize> {
        let frames = log.take_frames();
        let mut applied = 0;
        for message in crate::transport::flatten_operations(&frames) {
            if self.apply_message(&message)? {
                applied += 1;
            }
        }
        Ok(applied)
    }

    /// Returns false for messages that are not structural operations.
    pub fn apply_message(&mut self, message: &BridgeMessage) -> BridgeResult<bool> {
        if !is_structural(&message.message_type) {
            return Ok(false);
        }
        let operation = Operation::from_message(message)?;
        self.apply(&operation)?;
        Ok(true)
    }

    pub fn apply(&mut self, operation: &Operation) -> BridgeResult<()> {
        match operation {
            Operation::CreateView {
                view_id,
                view_type,
                props,
            } => {
                self.nodes.insert(
                    view_id.clone(),
                    MirrorNode {
                        view_type: view_type.clone(),
                        props: props.clone(),
                        children: Vec::new(),
                        parent: None,
                    },
                );
            }
            Operation::UpdateView { view_id, props } => {
                let node = self.node_mut(view_id)?;
                for (key, value) in props {
                    node.props.insert(key.clone(), value.clone());
                }
            }
            Operation::RemoveView { view_id } => {
                let parent = self.node_mut(view_id)?.parent.clone();
                if let Some(parent) = parent {
                    self.detach(&parent, view_id);
                }
                self.nodes.shift_remove(view_id);
                if self.root.as_ref() == Some(view_id) {
                    self.root = None;
                }
            }
            Operation::AppendChild {
                parent_id,
                child_id,
            } => {
                let end = self.children(parent_id).len();
                self.attach(parent_id, child_id, end)?;
            }
            Operation::InsertChild {
                parent_id,
                child_id,
                index,
            } => self.attach(parent_id, child_id, *index)?,
            Operation::RemoveChild {
                parent_id,
                child_id,
            } => self.detach(parent_id, child_id),
            Operation::SetRootView { view_id } => {
                self.node_mut(view_id)?;
                self.root = Some(view_id.clone());
            }
        }
        self.applied += 1;
        Ok(())
    }

    /// Indented rendering of the mirrored tree under `root`.
    pub fn dump(&self, root: &ViewId) -> String {
        let mut out = String::new();
        self.dump_node(root, 0, &mut out);
        out
    }

    fn dump_node(&self, id: &ViewId, depth: usize, out: &mut String) {
        match self.nodes.get(id) {
            Some(node) => {
                let _ = writeln!(out, "{:indent$}{} {id}", "", node.view_type, indent = depth * 2);
                for child in &node.children {
                    self.dump_node(child, depth + 1, out);
                }
            }
            None => {
                let _ = writeln!(out, "{:indent$}{id} <missing>", "", indent = depth * 2);
            }
        }
    }

    fn node_mut(&mut self, id: &ViewId) -> BridgeResult<&mut MirrorNode> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| BridgeError::UnknownView(id.clone()))
    }

    fn attach(&mut self, parent: &ViewId, child: &ViewId, index: usize) -> BridgeResult<()> {
        self.node_mut(parent)?;
        let previous = self.node_mut(child)?.parent.clone();
        if let Some(previous) = previous {
            self.detach(&previous, child);
        }
        let siblings = &mut self.node_mut(parent)?.children;
        let index = index.min(siblings.len());
        siblings.insert(index, child.clone());
        self.node_mut(child)?.parent = Some(parent.clone());
        Ok(())
    }

    fn detach(&mut self, parent: &ViewId, child: &ViewId) {
        if let Some(node) = self.nodes.get_mut(parent) {
            node.children.retain(|id| id != child);
        }
        if let Some(node) = self.nodes.get_mut(child) {
            if node.parent.as_ref() == Some(parent) {
                node.parent = None;
            }
        }
    }
}

fn is_structural(message_type: &str) -> bool {
    matches!(
        message_type,
        "createView"
            | "updateView"
            | "removeView"
            | "appendChild"
            | "insertChild"
            | "removeChild"
            | "setRootView"
    )
}
