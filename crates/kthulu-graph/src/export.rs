// ABOUTME: DOT and stable JSON renderings of a DependencyGraph
// ABOUTME: JSON orders nodes by id and edges by (from, to, kind) so output diffs cleanly

use crate::edge::GraphEdge;
use crate::graph::DependencyGraph;
use crate::node::{GraphNode, NodeKind};
use kthulu_core::{KthuluError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write;

#[derive(Debug, Serialize, Deserialize)]
struct GraphDocument {
    nodes: Vec<GraphNode>,
    edges: Vec<GraphEdge>,
    #[serde(default)]
    cycles: Vec<Vec<String>>,
    #[serde(default)]
    levels: BTreeMap<String, usize>,
}

impl DependencyGraph {
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph kthulu {\n    rankdir=LR;\n    node [shape=box];\n");
        for node in self.nodes.values() {
            let style = match node.kind {
                NodeKind::Module => "",
                NodeKind::External => ", style=dashed",
            };
            let _ = writeln!(
                out,
                "    \"{}\" [label=\"{}\"{}];",
                escape(&node.id),
                escape(&node.name),
                style
            );
        }
        for edge in self.sorted_edges() {
            let _ = writeln!(
                out,
                "    \"{}\" -> \"{}\" [label=\"{}\"];",
                escape(&edge.from),
                escape(&edge.to),
                edge.kind
            );
        }
        out.push_str("}\n");
        out
    }

    pub fn to_json(&self) -> Result<String> {
        let doc = GraphDocument {
            nodes: self.nodes.values().cloned().collect(),
            edges: self.sorted_edges().into_iter().cloned().collect(),
            cycles: self.cycles.clone(),
            levels: self.levels.clone(),
        };
        Ok(serde_json::to_string_pretty(&doc)?)
    }

    /// Degrees, levels and cycles are rebuilt from nodes and edges, so the
    /// result is canonical even if the input was edited by hand.
    pub fn from_json(json: &str) -> Result<Self> {
        let doc: GraphDocument = serde_json::from_str(json)?;
        let mut graph = DependencyGraph::new();
        for mut node in doc.nodes {
            node.in_degree = 0;
            node.out_degree = 0;
            graph.add_node(node);
        }
        for edge in doc.edges {
            graph.add_edge(edge).map_err(|e| {
                KthuluError::InvalidInput(format!("graph document: {}", e))
            })?;
        }
        graph.recompute();
        Ok(graph)
    }
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use kthulu_core::DependencyKind;

    fn sample() -> DependencyGraph {
        let mut g = DependencyGraph::new();
        for id in ["c", "a", "b"] {
            g.add_node(GraphNode::new(id, NodeKind::Module));
        }
        g.add_node(GraphNode::new("ext", NodeKind::External));
        g.add_edge(GraphEdge::new("b", "c", DependencyKind::Import)).unwrap();
        g.add_edge(GraphEdge::new("a", "b", DependencyKind::Module)).unwrap();
        g.add_edge(GraphEdge::new("c", "a", DependencyKind::Requires)).unwrap();
        g.add_edge(GraphEdge::new("a", "ext", DependencyKind::Module).with_weight(0.5))
            .unwrap();
        g.recompute();
        g
    }

    #[test]
    fn dot_labels_edges_with_kind() {
        let dot = sample().to_dot();
        assert!(dot.starts_with("digraph kthulu {"));
        assert!(dot.contains("\"a\" -> \"b\" [label=\"module\"];"));
        assert!(dot.contains("\"b\" -> \"c\" [label=\"import\"];"));
        assert!(dot.contains("\"ext\" [label=\"ext\", style=dashed];"));
    }

    #[test]
    fn json_is_sorted_and_round_trips() {
        let g = sample();
        let json = g.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        let ids: Vec<_> = value["nodes"]
            .as_array()
            .unwrap()
            .iter()
            .map(|n| n["id"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c", "ext"]);
        assert_eq!(value["edges"][0]["from"], "a");
        assert_eq!(value["edges"][0]["to"], "b");

        let back = DependencyGraph::from_json(&json).unwrap();
        assert_eq!(back.to_json().unwrap(), json);
        assert_eq!(back.cycles, vec![vec!["a", "b", "c"]]);
        approx::assert_abs_diff_eq!(back.sorted_edges()[1].weight, 0.5);
    }

    #[test]
    fn dangling_edges_are_rejected() {
        let json = r#"{"nodes":[{"id":"a","name":"a","kind":"module","tags":[],"metadata":{},"in_degree":0,"out_degree":0}],
                      "edges":[{"from":"a","to":"zz","kind":"module","weight":1.0,"metadata":{}}]}"#;
        assert!(matches!(
            DependencyGraph::from_json(json),
            Err(KthuluError::InvalidInput(_))
        ));
    }
}
