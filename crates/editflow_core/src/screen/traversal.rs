//! Pure planning over the component tree.
//!
//! Functions here return `(component id, action)` pairs and never touch a
//! rendering layer; applying the plan is the host's job.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentNode {
    pub id: String,
    /// Input components whose editability follows the screen state.
    pub editable: bool,
    pub children: Vec<ComponentNode>,
}

impl ComponentNode {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            editable: false,
            children: Vec::new(),
        }
    }

    pub fn field(id: impl Into<String>) -> Self {
        Self {
            editable: true,
            ..Self::new(id)
        }
    }

    pub fn with_child(mut self, child: ComponentNode) -> Self {
        self.children.push(child);
        self
    }

    /// Depth-first search by id.
    pub fn find(&self, id: &str) -> Option<&ComponentNode> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(id))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.find(id).is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComponentAction {
    Enable,
    Disable,
}

impl ComponentAction {
    pub fn from_flag(enabled: bool) -> Self {
        if enabled {
            Self::Enable
        } else {
            Self::Disable
        }
    }
}

pub type ComponentPlan = Vec<(String, ComponentAction)>;

/// Enables or disables `node` and its whole subtree, pre-order.
pub fn plan_enabled(node: &ComponentNode, enabled: bool) -> ComponentPlan {
    let mut plan = Vec::new();
    walk(node, &mut |current| {
        plan.push((current.id.clone(), ComponentAction::from_flag(enabled)));
    });
    plan
}

/// Sets editability of every editable component under `node`.
pub fn plan_editable(node: &ComponentNode, editable: bool) -> ComponentPlan {
    let mut plan = Vec::new();
    walk(node, &mut |current| {
        if current.editable {
            plan.push((current.id.clone(), ComponentAction::from_flag(editable)));
        }
    });
    plan
}

fn walk(node: &ComponentNode, visit: &mut impl FnMut(&ComponentNode)) {
    visit(node);
    for child in &node.children {
        walk(child, visit);
    }
}
