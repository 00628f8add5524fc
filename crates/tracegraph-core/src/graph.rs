use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One caller -> callee observation extracted from a parent/child span pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallEvent {
    pub parent_service: String,
    pub child_service: String,
    pub duration: u64,
    pub is_error: bool,
}

impl CallEvent {
    /// Returns `None` for self-loops and empty service names.
    pub fn new(
        parent_service: impl Into<String>,
        child_service: impl Into<String>,
        duration: u64,
        is_error: bool,
    ) -> Option<Self> {
        let parent_service = parent_service.into();
        let child_service = child_service.into();
        if parent_service.is_empty() || child_service.is_empty() || parent_service == child_service
        {
            return None;
        }
        Some(Self {
            parent_service,
            child_service,
            duration,
            is_error,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct EdgeStats {
    pub weight: u64,
    pub latency_sum: u64,
    pub error_count: u64,
}

impl EdgeStats {
    pub fn new(weight: u64, latency_sum: u64, error_count: u64) -> Self {
        Self {
            weight,
            latency_sum,
            error_count,
        }
    }

    pub fn from_event(event: &CallEvent) -> Self {
        Self::new(1, event.duration, u64::from(event.is_error))
    }

    pub fn avg_latency(&self) -> f64 {
        if self.weight == 0 {
            0.0
        } else {
            self.latency_sum as f64 / self.weight as f64
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.weight == 0 {
            0.0
        } else {
            self.error_count as f64 / self.weight as f64
        }
    }

    /// Field-wise addition.
    pub fn absorb(&mut self, other: &EdgeStats) {
        self.weight = self.weight.saturating_add(other.weight);
        self.latency_sum = self.latency_sum.saturating_add(other.latency_sum);
        self.error_count = self.error_count.saturating_add(other.error_count);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct NodeStats {
    in_degree: usize,
    out_degree: usize,
}

impl NodeStats {
    pub fn in_degree(&self) -> usize {
        self.in_degree
    }

    pub fn out_degree(&self) -> usize {
        self.out_degree
    }
}

/// Weighted service call graph.
///
/// Node degrees are maintained by the graph itself: they change only when an
/// edge key is created, so they can never disagree with the edge set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DependencyGraph {
    nodes: BTreeMap<String, NodeStats>,
    edges: BTreeMap<(String, String), EdgeStats>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Create-if-absent.
    pub fn add_service(&mut self, name: &str) {
        if !self.nodes.contains_key(name) {
            self.nodes.insert(name.to_string(), NodeStats::default());
        }
    }

    /// Add `stats` to the `source -> target` edge, creating it (and its
    /// endpoints) on first sight. Self-loops are ignored.
    pub fn add_edge_stats(&mut self, source: &str, target: &str, stats: EdgeStats) -> bool {
        if source == target || source.is_empty() || target.is_empty() {
            return false;
        }
        self.add_service(source);
        self.add_service(target);

        let key = (source.to_string(), target.to_string());
        match self.edges.get_mut(&key) {
            Some(existing) => existing.absorb(&stats),
            None => {
                self.edges.insert(key, stats);
                if let Some(node) = self.nodes.get_mut(source) {
                    node.out_degree += 1;
                }
                if let Some(node) = self.nodes.get_mut(target) {
                    node.in_degree += 1;
                }
            }
        }
        true
    }

    pub fn record_call(&mut self, event: &CallEvent) -> bool {
        self.add_edge_stats(
            &event.parent_service,
            &event.child_service,
            EdgeStats::from_event(event),
        )
    }

    /// Additive merge of another graph into this one.
    pub fn merge(&mut self, other: &DependencyGraph) {
        for name in other.nodes.keys() {
            self.add_service(name);
        }
        for ((source, target), stats) in &other.edges {
            self.add_edge_stats(source, target, *stats);
        }
    }

    /// Rebuild every node's degrees from the current edge set.
    pub fn recompute_degrees(&mut self) {
        for stats in self.nodes.values_mut() {
            *stats = NodeStats::default();
        }
        for (source, target) in self.edges.keys() {
            if let Some(node) = self.nodes.get_mut(source) {
                node.out_degree += 1;
            }
            if let Some(node) = self.nodes.get_mut(target) {
                node.in_degree += 1;
            }
        }
    }

    pub fn node(&self, name: &str) -> Option<&NodeStats> {
        self.nodes.get(name)
    }

    pub fn edge(&self, source: &str, target: &str) -> Option<&EdgeStats> {
        self.edges.get(&(source.to_string(), target.to_string()))
    }

    /// Nodes in lexicographic order.
    pub fn nodes(&self) -> impl Iterator<Item = (&str, &NodeStats)> {
        self.nodes.iter().map(|(name, stats)| (name.as_str(), stats))
    }

    /// Edges ordered by `(source, target)`.
    pub fn edges(&self) -> impl Iterator<Item = (&str, &str, &EdgeStats)> {
        self.edges
            .iter()
            .map(|((s, t), stats)| (s.as_str(), t.as_str(), stats))
    }

    pub fn services(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    /// Sum of `weight` over every edge touching `name`.
    pub fn incident_weight(&self, name: &str) -> u64 {
        self.edges()
            .filter(|(source, target, _)| *source == name || *target == name)
            .map(|(_, _, stats)| stats.weight)
            .fold(0, u64::saturating_add)
    }

    pub fn to_node_link(&self) -> NodeLinkGraph {
        NodeLinkGraph {
            directed: true,
            nodes: self
                .nodes()
                .map(|(id, stats)| NodeLinkNode {
                    id: id.to_string(),
                    in_degree: stats.in_degree,
                    out_degree: stats.out_degree,
                })
                .collect(),
            links: self
                .edges()
                .map(|(source, target, stats)| NodeLinkEdge {
                    source: source.to_string(),
                    target: target.to_string(),
                    weight: stats.weight,
                    latency_sum: stats.latency_sum,
                    error_count: stats.error_count,
                    avg_latency: stats.avg_latency(),
                    error_rate: stats.error_rate(),
                })
                .collect(),
        }
    }

    /// Rebuild from a node-link document. Derived fields in the document are
    /// ignored and recomputed.
    pub fn from_node_link(doc: &NodeLinkGraph) -> Self {
        let mut graph = Self::new();
        for node in &doc.nodes {
            graph.add_service(&node.id);
        }
        for link in &doc.links {
            graph.add_edge_stats(
                &link.source,
                &link.target,
                EdgeStats::new(link.weight, link.latency_sum, link.error_count),
            );
        }
        graph
    }
}

/// JSON-facing node-link view of a [`DependencyGraph`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NodeLinkGraph {
    pub directed: bool,
    pub nodes: Vec<NodeLinkNode>,
    pub links: Vec<NodeLinkEdge>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NodeLinkNode {
    pub id: String,
    pub in_degree: usize,
    pub out_degree: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NodeLinkEdge {
    pub source: String,
    pub target: String,
    pub weight: u64,
    pub latency_sum: u64,
    pub error_count: u64,
    pub avg_latency: f64,
    #[serde(default)]
    pub error_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn degree_invariant_holds(graph: &DependencyGraph) -> bool {
        graph.nodes().all(|(name, stats)| {
            let out = graph.edges().filter(|(s, _, _)| *s == name).count();
            let inc = graph.edges().filter(|(_, t, _)| *t == name).count();
            stats.out_degree() == out && stats.in_degree() == inc
        })
    }

    #[test]
    fn call_event_rejects_self_loops_and_empty_names() {
        assert!(CallEvent::new("a", "a", 1, false).is_none());
        assert!(CallEvent::new("", "b", 1, false).is_none());
        assert!(CallEvent::new("a", "b", 1, false).is_some());
    }

    #[test]
    fn degrees_follow_edge_creation() {
        let mut graph = DependencyGraph::new();
        graph.add_edge_stats("a", "b", EdgeStats::new(1, 10, 0));
        graph.add_edge_stats("a", "b", EdgeStats::new(2, 20, 1));
        graph.add_edge_stats("a", "c", EdgeStats::new(1, 5, 0));
        graph.add_edge_stats("c", "b", EdgeStats::new(1, 5, 0));

        assert_eq!(graph.node("a").unwrap().out_degree(), 2);
        assert_eq!(graph.node("b").unwrap().in_degree(), 2);
        assert_eq!(graph.edge("a", "b").unwrap(), &EdgeStats::new(3, 30, 1));
        assert!(degree_invariant_holds(&graph));
    }

    #[test]
    fn self_loop_edges_are_dropped() {
        let mut graph = DependencyGraph::new();
        assert!(!graph.add_edge_stats("a", "a", EdgeStats::new(1, 1, 0)));
        assert!(graph.is_empty());
    }

    #[test]
    fn avg_latency_guards_zero_weight() {
        assert_eq!(EdgeStats::default().avg_latency(), 0.0);
        assert_eq!(EdgeStats::new(4, 100, 1).avg_latency(), 25.0);
        assert_eq!(EdgeStats::new(4, 100, 1).error_rate(), 0.25);
    }

    #[test]
    fn merge_adds_field_wise() {
        let mut persisted = DependencyGraph::new();
        persisted.add_edge_stats("a", "b", EdgeStats::new(2, 200, 0));

        let mut delta = DependencyGraph::new();
        delta.add_edge_stats("a", "b", EdgeStats::new(1, 100, 1));
        delta.add_edge_stats("b", "c", EdgeStats::new(1, 50, 0));

        persisted.merge(&delta);
        assert_eq!(persisted.edge("a", "b").unwrap(), &EdgeStats::new(3, 300, 1));
        assert_eq!(persisted.edge("a", "b").unwrap().avg_latency(), 100.0);
        assert_eq!(persisted.node("b").unwrap().out_degree(), 1);
        assert!(degree_invariant_holds(&persisted));
    }

    #[test]
    fn node_link_output_is_sorted() {
        let mut graph = DependencyGraph::new();
        graph.add_edge_stats("zeta", "alpha", EdgeStats::new(1, 1, 0));
        graph.add_edge_stats("beta", "alpha", EdgeStats::new(1, 1, 0));

        let doc = graph.to_node_link();
        let ids: Vec<_> = doc.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["alpha", "beta", "zeta"]);
        assert_eq!(doc.links[0].source, "beta");
        assert_eq!(DependencyGraph::from_node_link(&doc), graph);
    }

    #[test]
    fn incident_weight_counts_both_directions() {
        let mut graph = DependencyGraph::new();
        graph.add_edge_stats("a", "b", EdgeStats::new(3, 0, 0));
        graph.add_edge_stats("c", "a", EdgeStats::new(4, 0, 0));
        graph.add_edge_stats("b", "c", EdgeStats::new(5, 0, 0));
        assert_eq!(graph.incident_weight("a"), 7);
    }

    #[test]
    fn incident_weight_saturates() {
        let mut graph = DependencyGraph::new();
        graph.add_edge_stats("a", "b", EdgeStats::new(u64::MAX, 0, 0));
        graph.add_edge_stats("c", "a", EdgeStats::new(u64::MAX, 0, 0));
        assert_eq!(graph.incident_weight("a"), u64::MAX);
    }
}
