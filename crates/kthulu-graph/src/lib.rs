pub mod algorithms;
pub mod edge;
pub mod export;
pub mod graph;
pub mod node;

pub use algorithms::{canonicalize, compute_levels, find_cycles, Adjacency};
pub use edge::GraphEdge;
pub use graph::DependencyGraph;
pub use node::{GraphNode, NodeKind};
