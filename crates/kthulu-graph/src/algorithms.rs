// ABOUTME: Graph algorithms over an id-keyed adjacency map
// ABOUTME: Longest-path levels, three-colour cycle enumeration, reachability

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

/// Sorted, deduplicated successor lists keyed by node id.
pub type Adjacency = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Grey,
    Black,
}

/// level(n) = 1 + max(level(m)) over n -> m; nodes without successors sit at 0.
/// Edges that close a cycle are ignored so every node gets a finite level.
pub fn compute_levels(adj: &Adjacency) -> BTreeMap<String, usize> {
    fn visit<'a>(
        id: &'a str,
        adj: &'a Adjacency,
        levels: &mut HashMap<&'a str, usize>,
        on_path: &mut HashSet<&'a str>,
    ) -> usize {
        if let Some(&level) = levels.get(id) {
            return level;
        }
        on_path.insert(id);
        let mut level = 0;
        for next in adj.get(id).into_iter().flatten() {
            if on_path.contains(next.as_str()) {
                continue;
            }
            level = level.max(1 + visit(next, adj, levels, on_path));
        }
        on_path.remove(id);
        levels.insert(id, level);
        level
    }

    let mut levels = HashMap::new();
    let mut on_path = HashSet::new();
    for id in adj.keys() {
        visit(id, adj, &mut levels, &mut on_path);
    }
    levels
        .into_iter()
        .map(|(id, level)| (id.to_string(), level))
        .collect()
}

/// Enumerates cycles with a three-colour DFS restarted from every node in id
/// order. Each back edge yields the grey-stack suffix as a cycle; results are
/// canonical and distinct, sorted.
pub fn find_cycles(adj: &Adjacency) -> Vec<Vec<String>> {
    fn dfs<'a>(
        v: &'a str,
        adj: &'a Adjacency,
        colors: &mut HashMap<&'a str, Color>,
        stack: &mut Vec<&'a str>,
        found: &mut BTreeSet<Vec<String>>,
    ) {
        colors.insert(v, Color::Grey);
        stack.push(v);
        for w in adj.get(v).into_iter().flatten() {
            let w = w.as_str();
            match colors.get(w).copied().unwrap_or(Color::White) {
                Color::White => dfs(w, adj, colors, stack, found),
                Color::Grey => {
                    if let Some(start) = stack.iter().position(|s| *s == w) {
                        let cycle: Vec<String> =
                            stack[start..].iter().map(|s| s.to_string()).collect();
                        found.insert(canonicalize(cycle));
                    }
                }
                Color::Black => {}
            }
        }
        stack.pop();
        colors.insert(v, Color::Black);
    }

    let mut found = BTreeSet::new();
    for start in adj.keys() {
        let mut colors = HashMap::new();
        let mut stack = Vec::new();
        dfs(start, adj, &mut colors, &mut stack, &mut found);
    }
    found.into_iter().collect()
}

/// Rotates a cycle so its lexicographically smallest id comes first.
pub fn canonicalize(mut cycle: Vec<String>) -> Vec<String> {
    if let Some((min_idx, _)) = cycle.iter().enumerate().min_by(|a, b| a.1.cmp(b.1)) {
        cycle.rotate_left(min_idx);
    }
    cycle
}

/// Every node reachable from `start`, excluding `start`, in id order.
pub fn reachable_from(adj: &Adjacency, start: &str) -> Vec<String> {
    let mut seen: BTreeSet<String> = BTreeSet::new();
    let mut queue: VecDeque<&str> = VecDeque::new();
    queue.push_back(start);
    while let Some(current) = queue.pop_front() {
        for next in adj.get(current).into_iter().flatten() {
            if next != start && seen.insert(next.clone()) {
                queue.push_back(next);
            }
        }
    }
    seen.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adj(edges: &[(&str, &str)]) -> Adjacency {
        let mut adj: Adjacency = BTreeMap::new();
        for (from, to) in edges {
            adj.entry(from.to_string()).or_default().push(to.to_string());
            adj.entry(to.to_string()).or_default();
        }
        for succ in adj.values_mut() {
            succ.sort();
            succ.dedup();
        }
        adj
    }

    #[test]
    fn levels_follow_longest_path() {
        let g = adj(&[("api", "svc"), ("svc", "repo"), ("api", "repo"), ("repo", "db")]);
        let levels = compute_levels(&g);
        assert_eq!(levels["db"], 0);
        assert_eq!(levels["repo"], 1);
        assert_eq!(levels["svc"], 2);
        assert_eq!(levels["api"], 3);
    }

    #[test]
    fn levels_terminate_on_cycles() {
        let g = adj(&[("a", "b"), ("b", "a")]);
        let levels = compute_levels(&g);
        assert_eq!(levels.len(), 2);
    }

    #[test]
    fn single_cycle_is_canonical() {
        let g = adj(&[("B", "C"), ("C", "A"), ("A", "B")]);
        assert_eq!(find_cycles(&g), vec![vec!["A", "B", "C"]]);
    }

    #[test]
    fn all_cycles_are_enumerated() {
        // a <-> b and b -> c -> b share node b
        let g = adj(&[("a", "b"), ("b", "a"), ("b", "c"), ("c", "b")]);
        let cycles = find_cycles(&g);
        assert_eq!(cycles, vec![vec!["a", "b"], vec!["b", "c"]]);
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let g = adj(&[("x", "x")]);
        assert_eq!(find_cycles(&g), vec![vec!["x"]]);
    }

    #[test]
    fn acyclic_graph_has_no_cycles() {
        let g = adj(&[("a", "b"), ("a", "c"), ("b", "c")]);
        assert!(find_cycles(&g).is_empty());
    }

    #[test]
    fn reachability_excludes_start() {
        let g = adj(&[("a", "b"), ("b", "c"), ("c", "a"), ("c", "d")]);
        assert_eq!(reachable_from(&g, "a"), vec!["b", "c", "d"]);
        assert!(reachable_from(&g, "d").is_empty());
    }
}
