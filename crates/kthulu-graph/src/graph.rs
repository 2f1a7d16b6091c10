use crate::algorithms::{self, Adjacency};
use crate::edge::GraphEdge;
use crate::node::{GraphNode, NodeKind};
use kthulu_core::{KthuluError, ProjectAnalysis, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Module-level dependency graph derived from one [`ProjectAnalysis`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DependencyGraph {
    pub nodes: BTreeMap<String, GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub cycles: Vec<Vec<String>>,
    pub levels: BTreeMap<String, usize>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// One node per module, one edge per dependency. Targets that are not
    /// declared modules become `external` nodes. Levels and cycles are
    /// computed before returning.
    #[tracing::instrument(skip_all, fields(modules = analysis.modules.len()))]
    pub fn from_analysis(analysis: &ProjectAnalysis) -> Self {
        let mut graph = Self::new();

        for module in &analysis.modules {
            let mut node = GraphNode::new(&module.name, NodeKind::Module)
                .with_metadata("package", &module.package_name)
                .with_metadata("files", module.files.len().to_string());
            for tag in &module.tags {
                node.add_tag(tag.tag_type.as_str());
            }
            graph.add_node(node);
        }

        for dep in &analysis.dependencies {
            for id in [&dep.from, &dep.to] {
                if !graph.nodes.contains_key(id.as_str()) {
                    debug!("Adding external node {}", id);
                    graph.add_node(GraphNode::new(id.as_str(), NodeKind::External));
                }
            }
            let mut edge = GraphEdge::new(&dep.from, &dep.to, dep.kind);
            if let Some(line) = dep.line {
                edge = edge.with_metadata("line", line.to_string());
            }
            // Endpoints were inserted just above.
            let _ = graph.add_edge(edge);
        }

        graph.recompute();
        info!(
            nodes = graph.nodes.len(),
            edges = graph.edges.len(),
            cycles = graph.cycles.len(),
            "Dependency graph built"
        );
        graph
    }

    /// Inserts or replaces a node, keeping any degrees already counted.
    pub fn add_node(&mut self, mut node: GraphNode) {
        if let Some(existing) = self.nodes.get(&node.id) {
            node.in_degree = existing.in_degree;
            node.out_degree = existing.out_degree;
        }
        self.nodes.insert(node.id.clone(), node);
    }

    /// Adds an edge between existing nodes. Returns `Ok(false)` when an edge
    /// with the same (from, to, kind) is already present.
    pub fn add_edge(&mut self, edge: GraphEdge) -> Result<bool> {
        for id in [&edge.from, &edge.to] {
            if !self.nodes.contains_key(id) {
                return Err(KthuluError::NotFound(format!("graph node {}", id)));
            }
        }
        if self.edges.iter().any(|e| e.key() == edge.key()) {
            return Ok(false);
        }
        if let Some(from) = self.nodes.get_mut(&edge.from) {
            from.out_degree += 1;
        }
        if let Some(to) = self.nodes.get_mut(&edge.to) {
            to.in_degree += 1;
        }
        self.edges.push(edge);
        Ok(true)
    }

    /// Refreshes levels and cycles after mutation.
    pub fn recompute(&mut self) {
        let adj = self.adjacency();
        self.levels = algorithms::compute_levels(&adj);
        self.cycles = algorithms::find_cycles(&adj);
    }

    /// Successor lists over all edge kinds.
    pub fn adjacency(&self) -> Adjacency {
        let mut adj: Adjacency = self.nodes.keys().map(|id| (id.clone(), Vec::new())).collect();
        for edge in &self.edges {
            adj.entry(edge.from.clone()).or_default().push(edge.to.clone());
        }
        for succ in adj.values_mut() {
            succ.sort();
            succ.dedup();
        }
        adj
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.get(id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn has_cycles(&self) -> bool {
        !self.cycles.is_empty()
    }

    pub fn level(&self, id: &str) -> Option<usize> {
        self.levels.get(id).copied()
    }

    /// Longest chain length in the graph.
    pub fn max_depth(&self) -> usize {
        self.levels.values().copied().max().unwrap_or(0)
    }

    /// Direct successors, sorted.
    pub fn dependencies_of(&self, id: &str) -> Vec<&str> {
        let mut out: Vec<&str> = self
            .edges
            .iter()
            .filter(|e| e.from == id)
            .map(|e| e.to.as_str())
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Direct predecessors, sorted.
    pub fn dependents_of(&self, id: &str) -> Vec<&str> {
        let mut out: Vec<&str> = self
            .edges
            .iter()
            .filter(|e| e.to == id)
            .map(|e| e.from.as_str())
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    pub fn transitive_dependencies(&self, id: &str) -> Vec<String> {
        algorithms::reachable_from(&self.adjacency(), id)
    }

    /// Nodes nothing depends on.
    pub fn roots(&self) -> Vec<&str> {
        self.nodes
            .values()
            .filter(|n| n.in_degree == 0)
            .map(|n| n.id.as_str())
            .collect()
    }

    /// Nodes that depend on nothing.
    pub fn leaves(&self) -> Vec<&str> {
        self.nodes
            .values()
            .filter(|n| n.out_degree == 0)
            .map(|n| n.id.as_str())
            .collect()
    }

    pub fn isolated(&self) -> Vec<&str> {
        self.nodes
            .values()
            .filter(|n| n.in_degree == 0 && n.out_degree == 0)
            .map(|n| n.id.as_str())
            .collect()
    }

    /// Edges in (from, to, kind name) order.
    pub fn sorted_edges(&self) -> Vec<&GraphEdge> {
        let mut edges: Vec<&GraphEdge> = self.edges.iter().collect();
        edges.sort_by(|a, b| {
            (a.from.as_str(), a.to.as_str(), a.kind.as_str())
                .cmp(&(b.from.as_str(), b.to.as_str(), b.kind.as_str()))
        });
        edges
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kthulu_core::{Dependency, DependencyKind, Module, Tag};

    fn analysis(modules: &[&str], deps: &[(&str, &str)]) -> ProjectAnalysis {
        let mut p = ProjectAnalysis::new("/tmp/project");
        for name in modules {
            let mut m = Module::new(*name, *name);
            m.add_file(&format!("{name}/{name}.go"));
            m.tags.push(Tag::new("module", 1).with_value(*name));
            p.modules.push(m);
        }
        for (from, to) in deps {
            p.add_dependency(Dependency::new(*from, *to, DependencyKind::Module));
        }
        p
    }

    #[test]
    fn degrees_match_edge_count() {
        let p = analysis(&["a", "b", "c"], &[("a", "b"), ("a", "c"), ("b", "c")]);
        let g = DependencyGraph::from_analysis(&p);
        let out: usize = g.nodes.values().map(|n| n.out_degree).sum();
        let inn: usize = g.nodes.values().map(|n| n.in_degree).sum();
        assert_eq!(g.edge_count(), 3);
        assert_eq!(out, 3);
        assert_eq!(inn, 3);
        assert_eq!(g.level("a"), Some(2));
        assert_eq!(g.max_depth(), 2);
        assert!(!g.has_cycles());
    }

    #[test]
    fn unknown_targets_become_external() {
        let p = analysis(&["payments"], &[("payments", "core")]);
        let g = DependencyGraph::from_analysis(&p);
        assert_eq!(g.node("core").map(|n| n.kind), Some(NodeKind::External));
        assert_eq!(g.node("payments").map(|n| n.kind), Some(NodeKind::Module));
        assert_eq!(g.node("payments").unwrap().tags, vec!["module"]);
    }

    #[test]
    fn duplicate_edges_are_ignored() {
        let mut g = DependencyGraph::new();
        g.add_node(GraphNode::new("a", NodeKind::Module));
        g.add_node(GraphNode::new("b", NodeKind::Module));
        assert!(g.add_edge(GraphEdge::new("a", "b", DependencyKind::Module)).unwrap());
        assert!(!g.add_edge(GraphEdge::new("a", "b", DependencyKind::Module)).unwrap());
        assert!(g.add_edge(GraphEdge::new("a", "b", DependencyKind::Import)).unwrap());
        assert_eq!(g.node("b").unwrap().in_degree, 2);
    }

    #[test]
    fn parallel_edges_sort_by_kind_name() {
        let mut g = DependencyGraph::new();
        g.add_node(GraphNode::new("a", NodeKind::Module));
        g.add_node(GraphNode::new("b", NodeKind::Module));
        for kind in [DependencyKind::Requires, DependencyKind::Module, DependencyKind::Import] {
            g.add_edge(GraphEdge::new("a", "b", kind)).unwrap();
        }
        let kinds: Vec<_> = g.sorted_edges().iter().map(|e| e.kind.as_str()).collect();
        assert_eq!(kinds, vec!["import", "module", "requires"]);
    }

    #[test]
    fn edges_need_existing_endpoints() {
        let mut g = DependencyGraph::new();
        g.add_node(GraphNode::new("a", NodeKind::Module));
        let err = g.add_edge(GraphEdge::new("a", "ghost", DependencyKind::Module));
        assert!(matches!(err, Err(KthuluError::NotFound(_))));
    }

    #[test]
    fn cycle_of_three_modules() {
        let p = analysis(&["A", "B", "C"], &[("A", "B"), ("B", "C"), ("C", "A")]);
        let g = DependencyGraph::from_analysis(&p);
        assert_eq!(g.cycles, vec![vec!["A", "B", "C"]]);
    }

    #[test]
    fn structural_queries() {
        let p = analysis(
            &["api", "svc", "repo", "lonely"],
            &[("api", "svc"), ("svc", "repo")],
        );
        let g = DependencyGraph::from_analysis(&p);
        assert_eq!(g.dependencies_of("api"), vec!["svc"]);
        assert_eq!(g.dependents_of("repo"), vec!["svc"]);
        assert_eq!(g.transitive_dependencies("api"), vec!["repo", "svc"]);
        assert_eq!(g.roots(), vec!["api", "lonely"]);
        assert_eq!(g.leaves(), vec!["lonely", "repo"]);
        assert_eq!(g.isolated(), vec!["lonely"]);
    }
}
