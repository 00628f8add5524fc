//! Coupling metrics: Absolute Importance Score (AIS).
//!
//! `AIS = in_degree * W_IN + out_degree * W_OUT + ln(1 + incident_weight)`
//!
//! Consumers count fully, dependencies count half, and traffic contributes
//! logarithmically so that a hot edge cannot drown out structure. Every term
//! is non-decreasing in its input.

use std::collections::BTreeMap;

use tracegraph_core::{DependencyGraph, Result, TraceGraphError};

pub const AIS_IN_DEGREE_WEIGHT: f64 = 1.0;
pub const AIS_OUT_DEGREE_WEIGHT: f64 = 0.5;

pub fn ais_score(in_degree: usize, out_degree: usize, incident_weight: u64) -> f64 {
    in_degree as f64 * AIS_IN_DEGREE_WEIGHT
        + out_degree as f64 * AIS_OUT_DEGREE_WEIGHT
        + (incident_weight as f64).ln_1p()
}

pub fn calculate_ais(service: &str, graph: &DependencyGraph) -> Result<f64> {
    let stats = graph
        .node(service)
        .ok_or_else(|| TraceGraphError::NotFound(service.to_string()))?;
    Ok(ais_score(
        stats.in_degree(),
        stats.out_degree(),
        graph.incident_weight(service),
    ))
}

pub fn calculate_all_ais(graph: &DependencyGraph) -> BTreeMap<String, f64> {
    let mut incident: BTreeMap<&str, u64> = graph.services().map(|s| (s, 0)).collect();
    for (source, target, stats) in graph.edges() {
        for endpoint in [source, target] {
            if let Some(total) = incident.get_mut(endpoint) {
                *total = total.saturating_add(stats.weight);
            }
        }
    }

    graph
        .nodes()
        .map(|(service, stats)| {
            let weight = incident.get(service).copied().unwrap_or(0);
            (
                service.to_string(),
                ais_score(stats.in_degree(), stats.out_degree(), weight),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tracegraph_core::EdgeStats;

    fn sample() -> DependencyGraph {
        let mut g = DependencyGraph::new();
        g.add_edge_stats("gateway", "orders", EdgeStats::new(10, 100, 0));
        g.add_edge_stats("orders", "payments", EdgeStats::new(4, 400, 1));
        g.add_edge_stats("gateway", "payments", EdgeStats::new(2, 20, 0));
        g
    }

    #[test]
    fn unknown_service_is_not_found() {
        let err = calculate_ais("ghost", &sample()).unwrap_err();
        assert!(matches!(err, TraceGraphError::NotFound(name) if name == "ghost"));
    }

    #[test]
    fn saturated_traffic_agrees_between_single_and_all() {
        let mut g = DependencyGraph::new();
        g.add_edge_stats("hub", "left", EdgeStats::new(u64::MAX, 0, 0));
        g.add_edge_stats("right", "hub", EdgeStats::new(u64::MAX, 0, 0));

        let single = calculate_ais("hub", &g).unwrap();
        assert_relative_eq!(single, calculate_all_ais(&g)["hub"]);
        assert_relative_eq!(single, 1.0 + 0.5 + (u64::MAX as f64).ln_1p());
    }

    #[test]
    fn single_matches_formula() {
        // payments: in 2, out 0, traffic 6
        let ais = calculate_ais("payments", &sample()).unwrap();
        assert_relative_eq!(ais, 2.0 + 7f64.ln());
    }

    #[test]
    fn all_matches_single() {
        let graph = sample();
        let all = calculate_all_ais(&graph);
        assert_eq!(all.len(), 3);
        for (service, score) in &all {
            assert_relative_eq!(*score, calculate_ais(service, &graph).unwrap());
        }
    }

    #[test]
    fn monotonic_in_each_input() {
        let base = ais_score(2, 2, 10);
        assert!(ais_score(3, 2, 10) >= base);
        assert!(ais_score(2, 3, 10) >= base);
        assert!(ais_score(2, 2, 11) >= base);
    }

    #[test]
    fn adding_a_dependency_never_lowers_score() {
        let mut graph = sample();
        let before = calculate_ais("orders", &graph).unwrap();
        graph.add_edge_stats("orders", "inventory", EdgeStats::new(1, 1, 0));
        let after = calculate_ais("orders", &graph).unwrap();
        assert!(after > before);
    }

    #[test]
    fn empty_graph_yields_empty_map() {
        assert!(calculate_all_ais(&DependencyGraph::new()).is_empty());
    }
}
