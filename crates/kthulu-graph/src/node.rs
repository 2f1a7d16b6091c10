use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// Declared by a `module` tag in the scanned tree.
    Module,
    /// Only ever seen as a dependency target.
    External,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Module => write!(f, "module"),
            NodeKind::External => write!(f, "external"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub name: String,
    pub kind: NodeKind,
    /// Distinct tag types attached to the module, in first-seen order.
    pub tags: Vec<String>,
    pub metadata: BTreeMap<String, String>,
    pub in_degree: usize,
    pub out_degree: usize,
}

impl GraphNode {
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            kind,
            tags: Vec::new(),
            metadata: BTreeMap::new(),
            in_degree: 0,
            out_degree: 0,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn add_tag(&mut self, tag_type: &str) {
        if !self.tags.iter().any(|t| t == tag_type) {
            self.tags.push(tag_type.to_string());
        }
    }

    pub fn is_external(&self) -> bool {
        self.kind == NodeKind::External
    }
}
