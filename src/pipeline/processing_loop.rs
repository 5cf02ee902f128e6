//! Shared observation processing loop.
//!
//! Drives any [`ObservationSource`] into the stream graph: each observation is
//! published from the entry node (the scanner) and travels synchronously
//! through every downstream node before the next one is read.

use std::sync::{Arc, Mutex, PoisonError};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::source::{ObservationSource, SourceEvent};
use crate::stream::{Delivery, NodeId, StreamGraph};
use crate::types::Observation;

/// Graph shared between the processing loop and whoever built it
pub type SharedGraph = Arc<Mutex<StreamGraph<Observation>>>;

/// Why the loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    SourceExhausted,
    SourceFailed,
    Cancelled,
}

/// Counters returned when the loop stops
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopStats {
    pub observations: u64,
    /// Receiver handler failures across all deliveries
    pub delivery_failures: u64,
    pub stop_reason: StopReason,
}

pub struct ProcessingLoop {
    graph: SharedGraph,
    entry: NodeId,
    cancel_token: CancellationToken,
}

impl ProcessingLoop {
    pub fn new(graph: SharedGraph, entry: NodeId, cancel_token: CancellationToken) -> Self {
        Self {
            graph,
            entry,
            cancel_token,
        }
    }

    /// Run until the source ends, fails, or the token is cancelled.
    ///
    /// However the loop stops, inactivity is then signalled downstream of the
    /// entry node so windowed nodes can flush what they hold.
    pub async fn run<S: ObservationSource>(&self, source: &mut S) -> LoopStats {
        info!(source = source.source_name(), entry = %self.entry, "Processing loop started");

        let mut observations = 0u64;
        let mut delivery_failures = 0u64;

        let stop_reason = loop {
            let event = tokio::select! {
                _ = self.cancel_token.cancelled() => break StopReason::Cancelled,
                result = source.next_observation() => result,
            };

            match event {
                Ok(SourceEvent::Observation(observation)) => {
                    observations += 1;
                    delivery_failures += self.publish(observation);
                }
                Ok(SourceEvent::Eof) => {
                    info!(source = source.source_name(), "Source exhausted");
                    break StopReason::SourceExhausted;
                }
                Err(e) => {
                    warn!(source = source.source_name(), error = %e, "Source error, stopping");
                    break StopReason::SourceFailed;
                }
            }
        };

        delivery_failures += self.signal_inactive();

        info!(
            observations,
            delivery_failures,
            reason = ?stop_reason,
            "Processing loop stopped"
        );

        LoopStats {
            observations,
            delivery_failures,
            stop_reason,
        }
    }

    fn publish(&self, observation: Observation) -> u64 {
        let mut graph = self.graph.lock().unwrap_or_else(PoisonError::into_inner);
        match graph.publish(self.entry, observation) {
            Ok(delivery) => report_failures(&graph, &delivery),
            Err(e) => {
                warn!(error = %e, "Entry node rejected observation");
                1
            }
        }
    }

    fn signal_inactive(&self) -> u64 {
        let mut graph = self.graph.lock().unwrap_or_else(PoisonError::into_inner);
        match graph.signal_inactive(self.entry) {
            Ok(delivery) => {
                debug!(delivered = delivery.delivered, "Inactivity signalled downstream");
                report_failures(&graph, &delivery)
            }
            Err(e) => {
                warn!(error = %e, "Could not signal inactivity");
                1
            }
        }
    }
}

fn report_failures(graph: &StreamGraph<Observation>, delivery: &Delivery) -> u64 {
    for failure in &delivery.failures {
        warn!(
            node = graph.node_name(failure.node).unwrap_or("<removed>"),
            error = %failure.error,
            "Stream node failed"
        );
    }
    delivery.failures.len() as u64
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::pipeline::source::ReplaySource;
    use crate::stream::{PassingNode, QueuedNode};
    use crate::types::BeaconIdentity;

    fn observation(rssi: i32, timestamp: u64) -> Observation {
        Observation::new(
            BeaconIdentity::Device {
                address: "11:22:33:44:55:66".to_string(),
            },
            rssi,
            timestamp,
        )
    }

    #[tokio::test]
    async fn replays_every_observation_into_the_graph() {
        let mut graph = StreamGraph::new();
        let scanner = graph.add_node(PassingNode::new("scanner"));
        let sink = QueuedNode::new("sink");
        let queue = sink.handle();
        let sink = graph.add_node(sink);
        graph.connect(scanner, sink).unwrap();

        let shared = Arc::new(Mutex::new(graph));
        let processing = ProcessingLoop::new(shared, scanner, CancellationToken::new());
        let mut source = ReplaySource::new(
            vec![observation(-50, 1), observation(-60, 2), observation(-70, 3)],
            Duration::ZERO,
        );

        let stats = processing.run(&mut source).await;
        assert_eq!(stats.observations, 3);
        assert_eq!(stats.delivery_failures, 0);
        assert_eq!(stats.stop_reason, StopReason::SourceExhausted);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.try_pull().map(|o| o.rssi), Some(-50));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_a_slow_source() {
        let mut graph = StreamGraph::new();
        let scanner = graph.add_node(PassingNode::new("scanner"));
        let shared = Arc::new(Mutex::new(graph));

        let cancel = CancellationToken::new();
        let processing = ProcessingLoop::new(shared, scanner, cancel.clone());
        let mut source = ReplaySource::new(
            vec![observation(-50, 1), observation(-60, 2)],
            Duration::from_secs(3600),
        );

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            cancel.cancel();
        });

        let stats = processing.run(&mut source).await;
        canceller.await.unwrap();
        assert_eq!(stats.observations, 1);
        assert_eq!(stats.stop_reason, StopReason::Cancelled);
    }
}
