//! Declarative node selection over a graph snapshot.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{Graph, Node, NodeClass};

/// A pattern for picking nodes out of a snapshot.
///
/// All set fields must match: `name_contains` is a case-insensitive
/// substring over the node name and description, `class` and `role` are
/// exact (role compared case-insensitively). Results keep the graph's
/// enumeration order; an empty result is a normal outcome, not an error -
/// callers decide whether absence matters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub name_contains: Option<String>,
    pub class: Option<NodeClass>,
    pub role: Option<String>,
}

impl Pattern {
    /// Match by name/description substring.
    pub fn name(fragment: impl Into<String>) -> Self {
        Self {
            name_contains: Some(fragment.into()),
            ..Self::default()
        }
    }

    pub fn with_class(mut self, class: NodeClass) -> Self {
        self.class = Some(class);
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn matches(&self, node: &Node) -> bool {
        if let Some(fragment) = &self.name_contains {
            let fragment = fragment.to_lowercase();
            let in_name = node.name.to_lowercase().contains(&fragment);
            let in_desc = node
                .description
                .as_ref()
                .map(|d| d.to_lowercase().contains(&fragment))
                .unwrap_or(false);
            if !in_name && !in_desc {
                return false;
            }
        }
        if let Some(class) = self.class {
            if node.class != class {
                return false;
            }
        }
        if let Some(role) = &self.role {
            let node_role = match &node.media_role {
                Some(r) => r,
                None => return false,
            };
            if !node_role.eq_ignore_ascii_case(role) {
                return false;
            }
        }
        true
    }

    /// All matching nodes, in graph enumeration order.
    pub fn find<'a>(&self, graph: &'a Graph) -> Vec<&'a Node> {
        graph.nodes.iter().filter(|n| self.matches(n)).collect()
    }

    /// First matching node, if any.
    pub fn find_first<'a>(&self, graph: &'a Graph) -> Option<&'a Node> {
        graph.nodes.iter().find(|n| self.matches(n))
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(name) = &self.name_contains {
            parts.push(format!("name~\"{name}\""));
        }
        if let Some(class) = self.class {
            parts.push(format!("class={class}"));
        }
        if let Some(role) = &self.role {
            parts.push(format!("role={role}"));
        }
        if parts.is_empty() {
            write!(f, "any")
        } else {
            write!(f, "{}", parts.join(" "))
        }
    }
}
