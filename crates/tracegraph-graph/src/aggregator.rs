use tracegraph_core::{CallEvent, DependencyGraph};
use tracing::debug;

/// Folds call events into a delta [`DependencyGraph`].
///
/// Pure: the same event sequence always yields the same graph.
#[derive(Debug, Default)]
pub struct GraphAggregator {
    graph: DependencyGraph,
    events_seen: usize,
    events_dropped: usize,
}

impl GraphAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, event: &CallEvent) {
        self.events_seen += 1;
        if !self.graph.record_call(event) {
            self.events_dropped += 1;
        }
    }

    pub fn extend<'a>(&mut self, events: impl IntoIterator<Item = &'a CallEvent>) {
        for event in events {
            self.record(event);
        }
    }

    pub fn finish(self) -> DependencyGraph {
        debug!(
            "Aggregated {} events ({} dropped) into {} services / {} edges",
            self.events_seen,
            self.events_dropped,
            self.graph.node_count(),
            self.graph.edge_count()
        );
        self.graph
    }
}

/// One-shot aggregation of a finite event sequence.
pub fn aggregate<'a>(events: impl IntoIterator<Item = &'a CallEvent>) -> DependencyGraph {
    let mut aggregator = GraphAggregator::new();
    aggregator.extend(events);
    aggregator.finish()
}
