//! Structural traversals over a [`DependencyGraph`].

use std::collections::{BTreeSet, HashMap};

use tracegraph_core::DependencyGraph;

/// Index-based adjacency view. Services are numbered in lexicographic order,
/// so every result derived from it is deterministic.
struct Adjacency<'a> {
    names: Vec<&'a str>,
    out: Vec<Vec<usize>>,
}

impl<'a> Adjacency<'a> {
    fn new(graph: &'a DependencyGraph) -> Self {
        let names: Vec<&str> = graph.services().collect();
        let index: HashMap<&str, usize> = names.iter().enumerate().map(|(i, n)| (*n, i)).collect();
        let mut out = vec![Vec::new(); names.len()];
        for (source, target, _) in graph.edges() {
            if let (Some(&s), Some(&t)) = (index.get(source), index.get(target)) {
                out[s].push(t);
            }
        }
        for list in &mut out {
            list.sort_unstable();
        }
        Self { names, out }
    }

    fn len(&self) -> usize {
        self.names.len()
    }

    fn to_names(&self, ids: &[usize]) -> Vec<String> {
        ids.iter().map(|&i| self.names[i].to_string()).collect()
    }
}

/// Tarjan's strongly connected components restricted to vertices where
/// `allowed[v]` holds.
struct Tarjan<'g> {
    adj: &'g [Vec<usize>],
    allowed: &'g [bool],
    index_counter: usize,
    indices: Vec<Option<usize>>,
    lowlinks: Vec<usize>,
    on_stack: Vec<bool>,
    stack: Vec<usize>,
    components: Vec<Vec<usize>>,
}

impl<'g> Tarjan<'g> {
    fn run(adj: &'g [Vec<usize>], allowed: &'g [bool]) -> Vec<Vec<usize>> {
        let n = adj.len();
        let mut tarjan = Self {
            adj,
            allowed,
            index_counter: 0,
            indices: vec![None; n],
            lowlinks: vec![0; n],
            on_stack: vec![false; n],
            stack: Vec::new(),
            components: Vec::new(),
        };
        for v in 0..n {
            if allowed[v] && tarjan.indices[v].is_none() {
                tarjan.strongconnect(v);
            }
        }
        tarjan.components
    }

    fn visit(&mut self, node: usize) {
        self.indices[node] = Some(self.index_counter);
        self.lowlinks[node] = self.index_counter;
        self.index_counter += 1;
        self.stack.push(node);
        self.on_stack[node] = true;
    }

    /// Depth-first walk from `root` on an explicit stack of
    /// `(node, next neighbour position)` frames.
    fn strongconnect(&mut self, root: usize) {
        let adj = self.adj;
        self.visit(root);
        let mut frames = vec![(root, 0usize)];

        while let Some(frame) = frames.last_mut() {
            let node = frame.0;
            if let Some(&neighbor) = adj[node].get(frame.1) {
                frame.1 += 1;
                if !self.allowed[neighbor] {
                    continue;
                }
                match self.indices[neighbor] {
                    None => {
                        self.visit(neighbor);
                        frames.push((neighbor, 0));
                    }
                    Some(neighbor_index) if self.on_stack[neighbor] => {
                        self.lowlinks[node] = self.lowlinks[node].min(neighbor_index);
                    }
                    Some(_) => {}
                }
                continue;
            }

            frames.pop();
            if let Some(&(parent, _)) = frames.last() {
                self.lowlinks[parent] = self.lowlinks[parent].min(self.lowlinks[node]);
            }

            // Root of a component: pop it off the stack
            if Some(self.lowlinks[node]) == self.indices[node] {
                let mut component = Vec::new();
                while let Some(w) = self.stack.pop() {
                    self.on_stack[w] = false;
                    component.push(w);
                    if w == node {
                        break;
                    }
                }
                component.sort_unstable();
                self.components.push(component);
            }
        }
    }
}

/// Strongly connected components, each sorted, listed by first member.
pub fn strongly_connected_components(graph: &DependencyGraph) -> Vec<Vec<String>> {
    let adj = Adjacency::new(graph);
    let allowed = vec![true; adj.len()];
    let mut components = Tarjan::run(&adj.out, &allowed);
    components.sort();
    components.iter().map(|c| adj.to_names(c)).collect()
}

/// Blocked-set search state for Johnson's circuit enumeration.
struct CircuitSearch<'g> {
    adj: &'g [Vec<usize>],
    in_component: Vec<bool>,
    blocked: Vec<bool>,
    blocked_by: Vec<BTreeSet<usize>>,
    path: Vec<usize>,
    cycles: Vec<Vec<usize>>,
}

impl<'g> CircuitSearch<'g> {
    fn enter(&mut self, v: usize) {
        self.path.push(v);
        self.blocked[v] = true;
    }

    /// Frames are `(vertex, next neighbour position, closed a cycle)`.
    fn circuit(&mut self, start: usize) {
        let adj = self.adj;
        self.enter(start);
        let mut frames = vec![(start, 0usize, false)];

        while let Some(frame) = frames.last_mut() {
            let v = frame.0;
            if let Some(&w) = adj[v].get(frame.1) {
                frame.1 += 1;
                if !self.in_component[w] {
                    continue;
                }
                if w == start {
                    self.cycles.push(self.path.clone());
                    frame.2 = true;
                } else if !self.blocked[w] {
                    self.enter(w);
                    frames.push((w, 0, false));
                }
                continue;
            }

            let found = frame.2;
            frames.pop();
            if found {
                self.unblock(v);
            } else {
                for &w in &adj[v] {
                    if self.in_component[w] {
                        self.blocked_by[w].insert(v);
                    }
                }
            }
            self.path.pop();

            if found {
                if let Some(parent) = frames.last_mut() {
                    parent.2 = true;
                }
            }
        }
    }

    fn unblock(&mut self, u: usize) {
        self.blocked[u] = false;
        let mut pending = vec![u];
        while let Some(x) = pending.pop() {
            for w in std::mem::take(&mut self.blocked_by[x]) {
                if self.blocked[w] {
                    self.blocked[w] = false;
                    pending.push(w);
                }
            }
        }
    }
}

/// Every elementary directed cycle (Johnson's algorithm).
///
/// Each cycle starts at its lexicographically smallest service and the list
/// is sorted, so a graph has exactly one representation of its cycle set.
pub fn simple_cycles(graph: &DependencyGraph) -> Vec<Vec<String>> {
    let adj = Adjacency::new(graph);
    let n = adj.len();
    let mut cycles: Vec<Vec<usize>> = Vec::new();

    let mut allowed = vec![true; n];
    for start in 0..n {
        // Component of `start` in the subgraph induced by vertices >= start
        let component = Tarjan::run(&adj.out, &allowed)
            .into_iter()
            .find(|c| c.contains(&start));
        allowed[start] = false;

        let Some(component) = component else {
            continue;
        };
        if component.len() < 2 {
            continue;
        }

        let mut in_component = vec![false; n];
        for &v in &component {
            in_component[v] = true;
        }
        let mut search = CircuitSearch {
            adj: &adj.out,
            in_component,
            blocked: vec![false; n],
            blocked_by: vec![BTreeSet::new(); n],
            path: Vec::new(),
            cycles: Vec::new(),
        };
        search.circuit(start);
        cycles.extend(search.cycles);
    }

    cycles.sort();
    cycles.iter().map(|c| adj.to_names(c)).collect()
}

pub fn has_cycle(graph: &DependencyGraph) -> bool {
    strongly_connected_components(graph)
        .iter()
        .any(|component| component.len() > 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracegraph_core::EdgeStats;

    fn graph(edges: &[(&str, &str)]) -> DependencyGraph {
        let mut g = DependencyGraph::new();
        for (s, t) in edges {
            g.add_edge_stats(s, t, EdgeStats::new(1, 0, 0));
        }
        g
    }

    #[test]
    fn triangle_has_one_cycle() {
        let g = graph(&[("A", "B"), ("B", "C"), ("C", "A")]);
        assert_eq!(simple_cycles(&g), vec![vec!["A", "B", "C"]]);
        assert!(has_cycle(&g));
    }

    #[test]
    fn rotation_starts_at_smallest_name() {
        let g = graph(&[("b", "c"), ("c", "a"), ("a", "b")]);
        assert_eq!(simple_cycles(&g), vec![vec!["a", "b", "c"]]);
    }

    #[test]
    fn dag_has_no_cycles() {
        let g = graph(&[("a", "b"), ("b", "c"), ("a", "c")]);
        assert!(simple_cycles(&g).is_empty());
        assert!(!has_cycle(&g));
        assert_eq!(strongly_connected_components(&g).len(), 3);
    }

    #[test]
    fn finds_all_elementary_cycles() {
        // Two cycles sharing the a<->b pair plus a disjoint one
        let g = graph(&[
            ("a", "b"),
            ("b", "a"),
            ("b", "c"),
            ("c", "a"),
            ("x", "y"),
            ("y", "x"),
        ]);
        assert_eq!(
            simple_cycles(&g),
            vec![vec!["a", "b"], vec!["a", "b", "c"], vec!["x", "y"]]
        );
    }

    #[test]
    fn complete_digraph_cycle_count() {
        // K4 with both directions on every pair has 20 elementary cycles
        let names = ["a", "b", "c", "d"];
        let mut edges = Vec::new();
        for s in names {
            for t in names {
                if s != t {
                    edges.push((s, t));
                }
            }
        }
        let g = graph(&edges);
        assert_eq!(simple_cycles(&g).len(), 20);
    }

    fn ring(len: usize) -> DependencyGraph {
        let mut g = DependencyGraph::new();
        for i in 0..len {
            let next = (i + 1) % len;
            g.add_edge_stats(
                &format!("svc{i:06}"),
                &format!("svc{next:06}"),
                EdgeStats::new(1, 0, 0),
            );
        }
        g
    }

    #[test]
    fn long_call_chains_do_not_exhaust_the_stack() {
        let g = ring(200_000);
        assert!(has_cycle(&g));
        let components = strongly_connected_components(&g);
        assert_eq!(components.len(), 1);
        assert_eq!(components[0].len(), 200_000);

        let cycles = simple_cycles(&ring(3_000));
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].len(), 3_000);
        assert_eq!(cycles[0][0], "svc000000");
    }

    #[test]
    fn scc_groups_cycle_members() {
        let g = graph(&[("a", "b"), ("b", "a"), ("b", "c")]);
        assert_eq!(
            strongly_connected_components(&g),
            vec![vec!["a".to_string(), "b".to_string()], vec!["c".to_string()]]
        );
    }
}
