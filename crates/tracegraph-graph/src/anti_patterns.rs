//! Anti-pattern detection over a materialized dependency graph.

use serde::{Deserialize, Serialize};
use tracegraph_core::DependencyGraph;
use tracing::debug;

use crate::traversal::{has_cycle, simple_cycles};

/// A service calling more than this many distinct services is flagged.
pub const FAN_OUT_THRESHOLD: usize = 5;
/// A service called by more than this many distinct services is flagged.
pub const FAN_IN_THRESHOLD: usize = 5;
/// Edge call count above which the callee is a bottleneck.
pub const BOTTLENECK_REQUEST_THRESHOLD: u64 = 50;
/// Average edge latency (span duration units) above which the callee is a bottleneck.
pub const BOTTLENECK_LATENCY_THRESHOLD: f64 = 1000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AntiPatternKind {
    CyclicDependency,
    HighFanOut,
    ExcessiveFanIn,
    ServiceBottleneck,
}

impl AntiPatternKind {
    pub fn severity(self) -> Severity {
        match self {
            Self::CyclicDependency | Self::ServiceBottleneck => Severity::High,
            Self::HighFanOut | Self::ExcessiveFanIn => Severity::Medium,
        }
    }

    pub fn recommendations(self) -> &'static [&'static str] {
        match self {
            Self::CyclicDependency => &[
                "Break the cycle by introducing asynchronous messaging or events between the services involved.",
                "Extract the shared functionality into a separate service that the cycle members depend on.",
                "Revisit service boundaries; mutually dependent services may belong to one bounded context.",
            ],
            Self::HighFanOut => &[
                "Introduce an aggregator or API composition layer instead of calling many services directly.",
                "Check whether the service has accumulated responsibilities that should be split out.",
                "Prefer event-driven communication for calls that do not need a synchronous answer.",
            ],
            Self::ExcessiveFanIn => &[
                "Scale the service horizontally and make sure it is stateless behind a load balancer.",
                "Cache frequently requested data closer to the callers.",
                "Consider splitting the service so that unrelated callers stop sharing one deployment.",
            ],
            Self::ServiceBottleneck => &[
                "Add caching for repeated requests on this call path.",
                "Batch or coalesce requests to reduce call volume.",
                "Profile the callee and optimize slow operations, or scale it out.",
                "Add timeouts and circuit breakers so that latency does not cascade to callers.",
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FindingDetail {
    Cycle {
        cycle: Vec<String>,
    },
    Degree {
        service: String,
        degree: usize,
    },
    Edge {
        source: String,
        target: String,
        request_rate: u64,
        avg_latency: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AntiPatternFinding {
    pub kind: AntiPatternKind,
    pub severity: Severity,
    pub details: Vec<FindingDetail>,
    pub recommendations: Vec<String>,
}

impl AntiPatternFinding {
    fn new(kind: AntiPatternKind, details: Vec<FindingDetail>) -> Option<Self> {
        if details.is_empty() {
            return None;
        }
        Some(Self {
            kind,
            severity: kind.severity(),
            details,
            recommendations: kind
                .recommendations()
                .iter()
                .map(|r| r.to_string())
                .collect(),
        })
    }
}

pub fn detect_cycles(graph: &DependencyGraph) -> Option<AntiPatternFinding> {
    // Enumerate only when some component is cyclic
    if !has_cycle(graph) {
        return None;
    }
    let details = simple_cycles(graph)
        .into_iter()
        .map(|cycle| FindingDetail::Cycle { cycle })
        .collect();
    AntiPatternFinding::new(AntiPatternKind::CyclicDependency, details)
}

pub fn detect_high_fan_out(graph: &DependencyGraph) -> Option<AntiPatternFinding> {
    let details = graph
        .nodes()
        .filter(|(_, stats)| stats.out_degree() > FAN_OUT_THRESHOLD)
        .map(|(service, stats)| FindingDetail::Degree {
            service: service.to_string(),
            degree: stats.out_degree(),
        })
        .collect();
    AntiPatternFinding::new(AntiPatternKind::HighFanOut, details)
}

pub fn detect_excessive_fan_in(graph: &DependencyGraph) -> Option<AntiPatternFinding> {
    let details = graph
        .nodes()
        .filter(|(_, stats)| stats.in_degree() > FAN_IN_THRESHOLD)
        .map(|(service, stats)| FindingDetail::Degree {
            service: service.to_string(),
            degree: stats.in_degree(),
        })
        .collect();
    AntiPatternFinding::new(AntiPatternKind::ExcessiveFanIn, details)
}

pub fn detect_bottlenecks(graph: &DependencyGraph) -> Option<AntiPatternFinding> {
    let details = graph
        .edges()
        .filter(|(_, _, stats)| stats.weight > 0)
        .filter(|(_, _, stats)| {
            stats.weight > BOTTLENECK_REQUEST_THRESHOLD
                || stats.avg_latency() > BOTTLENECK_LATENCY_THRESHOLD
        })
        .map(|(source, target, stats)| FindingDetail::Edge {
            source: source.to_string(),
            target: target.to_string(),
            request_rate: stats.weight,
            avg_latency: stats.avg_latency(),
        })
        .collect();
    AntiPatternFinding::new(AntiPatternKind::ServiceBottleneck, details)
}

/// Run every detector; only non-empty findings are returned, in fixed order.
pub fn detect_anti_patterns(graph: &DependencyGraph) -> Vec<AntiPatternFinding> {
    let findings: Vec<AntiPatternFinding> = [
        detect_cycles(graph),
        detect_high_fan_out(graph),
        detect_excessive_fan_in(graph),
        detect_bottlenecks(graph),
    ]
    .into_iter()
    .flatten()
    .collect();

    debug!(
        "Detected {} anti-pattern kinds over {} services",
        findings.len(),
        graph.node_count()
    );
    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracegraph_core::EdgeStats;

    fn graph(edges: &[(&str, &str, EdgeStats)]) -> DependencyGraph {
        let mut g = DependencyGraph::new();
        for (s, t, stats) in edges {
            g.add_edge_stats(s, t, *stats);
        }
        g
    }

    fn star_out(center: &str, leaves: usize) -> DependencyGraph {
        let mut g = DependencyGraph::new();
        for i in 0..leaves {
            g.add_edge_stats(center, &format!("leaf-{i}"), EdgeStats::new(1, 1, 0));
        }
        g
    }

    fn star_in(center: &str, leaves: usize) -> DependencyGraph {
        let mut g = DependencyGraph::new();
        for i in 0..leaves {
            g.add_edge_stats(&format!("caller-{i}"), center, EdgeStats::new(1, 1, 0));
        }
        g
    }

    #[test]
    fn triangle_reports_single_cycle_finding() {
        let one = EdgeStats::new(1, 1, 0);
        let g = graph(&[("A", "B", one), ("B", "C", one), ("C", "A", one)]);
        let findings = detect_anti_patterns(&g);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, AntiPatternKind::CyclicDependency);
        assert_eq!(findings[0].severity, Severity::High);
        assert_eq!(
            findings[0].details,
            vec![FindingDetail::Cycle {
                cycle: vec!["A".into(), "B".into(), "C".into()]
            }]
        );
        assert!(!findings[0].recommendations.is_empty());
    }

    #[test]
    fn acyclic_graph_has_no_cycle_finding() {
        let one = EdgeStats::new(1, 1, 0);
        let g = graph(&[("A", "B", one), ("B", "C", one), ("A", "C", one)]);
        assert!(detect_cycles(&g).is_none());
        assert!(detect_cycles(&DependencyGraph::new()).is_none());
    }

    #[test]
    fn fan_out_threshold_is_strict() {
        assert!(detect_high_fan_out(&star_out("hub", 5)).is_none());
        let finding = detect_high_fan_out(&star_out("hub", 6)).unwrap();
        assert_eq!(finding.severity, Severity::Medium);
        assert_eq!(
            finding.details,
            vec![FindingDetail::Degree {
                service: "hub".into(),
                degree: 6
            }]
        );
    }

    #[test]
    fn fan_in_threshold_is_strict() {
        assert!(detect_excessive_fan_in(&star_in("db", 5)).is_none());
        let finding = detect_excessive_fan_in(&star_in("db", 6)).unwrap();
        assert_eq!(finding.kind, AntiPatternKind::ExcessiveFanIn);
        assert_eq!(
            finding.details,
            vec![FindingDetail::Degree {
                service: "db".into(),
                degree: 6
            }]
        );
    }

    #[test]
    fn bottleneck_boundaries() {
        let g = graph(&[
            ("a", "busy", EdgeStats::new(51, 0, 0)),
            ("a", "edge-case", EdgeStats::new(50, 50_000, 0)),
            ("a", "slow", EdgeStats::new(2, 2_002, 0)),
        ]);
        let finding = detect_bottlenecks(&g).unwrap();
        let targets: Vec<_> = finding
            .details
            .iter()
            .map(|d| match d {
                FindingDetail::Edge { target, .. } => target.as_str(),
                other => panic!("unexpected detail {other:?}"),
            })
            .collect();
        assert_eq!(targets, vec!["busy", "slow"]);
    }

    #[test]
    fn bottleneck_reports_rate_and_latency() {
        let g = graph(&[("a", "b", EdgeStats::new(51, 5_100, 3))]);
        let finding = detect_bottlenecks(&g).unwrap();
        assert_eq!(
            finding.details,
            vec![FindingDetail::Edge {
                source: "a".into(),
                target: "b".into(),
                request_rate: 51,
                avg_latency: 100.0
            }]
        );
    }

    #[test]
    fn findings_follow_fixed_order() {
        let mut g = star_out("hub", 6);
        g.add_edge_stats("leaf-0", "hub", EdgeStats::new(60, 60, 0));
        let kinds: Vec<_> = detect_anti_patterns(&g).iter().map(|f| f.kind).collect();
        assert_eq!(
            kinds,
            vec![
                AntiPatternKind::CyclicDependency,
                AntiPatternKind::HighFanOut,
                AntiPatternKind::ServiceBottleneck
            ]
        );
    }

    #[test]
    fn healthy_graph_has_no_findings() {
        let g = graph(&[("a", "b", EdgeStats::new(3, 30, 0))]);
        assert!(detect_anti_patterns(&g).is_empty());
    }

    #[test]
    fn details_serialize_flat() {
        let detail = FindingDetail::Degree {
            service: "hub".into(),
            degree: 7,
        };
        assert_eq!(
            serde_json::to_value(&detail).unwrap(),
            serde_json::json!({"service": "hub", "degree": 7})
        );
    }
}
