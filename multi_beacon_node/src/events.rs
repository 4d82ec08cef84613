//! The merged event stream.
//!
//! One persistent `/eth/v1/events` subscription is kept per beacon node.
//! Every stream feeds a single channel; the consumer sees each distinct event
//! exactly once, no matter how many nodes reported it. Subscriptions that
//! drop are re-established with exponential backoff capped at one slot.

use core::time::Duration;
use std::{
    collections::{HashSet, VecDeque},
    sync::Arc,
};

use beacon_api::{BeaconNode, BeaconNodeEvent, RawEvent, Topic};
use futures::{
    channel::mpsc::{self, UnboundedReceiver, UnboundedSender},
    StreamExt as _,
};
use log::{debug, info, warn};
use prometheus_metrics::Metrics;
use types::{config::Config, phase0::primitives::H256};

const INITIAL_RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// How many dedup keys are remembered. Old keys cannot recur: events are
/// keyed by slot or by slashing object, both of which move on.
const DEDUP_CAPACITY: usize = 1024;

#[derive(Clone, Debug)]
pub struct SourcedEvent {
    pub node: String,
    pub event: BeaconNodeEvent,
}

pub struct EventPipeline {
    rx: UnboundedReceiver<(String, RawEvent)>,
    seen: HashSet<(Topic, H256)>,
    seen_order: VecDeque<(Topic, H256)>,
    metrics: Option<Arc<Metrics>>,
}

impl EventPipeline {
    #[must_use]
    pub fn new(
        beacon_nodes: &[Arc<BeaconNode>],
        config: Arc<Config>,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded();

        for beacon_node in beacon_nodes {
            tokio::spawn(subscription_loop(
                beacon_node.clone(),
                tx.clone(),
                config.clone(),
            ));
        }

        Self {
            rx,
            seen: HashSet::new(),
            seen_order: VecDeque::new(),
            metrics,
        }
    }

    /// The next distinct event across all beacon nodes. `None` once every
    /// subscription task is gone, which only happens at shutdown.
    pub async fn next_event(&mut self) -> Option<SourcedEvent> {
        while let Some((node, raw_event)) = self.rx.next().await {
            let RawEvent { event, data } = raw_event;
            let key = event.dedup_key(&data);

            if !self.mark_seen(key) {
                debug!("skipping duplicate {} event from {node}", event.topic());
                continue;
            }

            if let Some(metrics) = self.metrics.as_ref() {
                metrics
                    .processed_beacon_node_events
                    .with_label_values(&[&node, event.topic().as_ref()])
                    .inc();
            }

            return Some(SourcedEvent { node, event });
        }

        None
    }

    fn mark_seen(&mut self, key: (Topic, H256)) -> bool {
        if !self.seen.insert(key) {
            return false;
        }

        self.seen_order.push_back(key);

        while self.seen_order.len() > DEDUP_CAPACITY {
            if let Some(oldest) = self.seen_order.pop_front() {
                self.seen.remove(&oldest);
            }
        }

        true
    }
}

async fn subscription_loop(
    beacon_node: Arc<BeaconNode>,
    tx: UnboundedSender<(String, RawEvent)>,
    config: Arc<Config>,
) {
    let mut backoff = INITIAL_RECONNECT_BACKOFF;

    loop {
        let topics = topics_for(&beacon_node);

        match beacon_node.subscribe_to_events(&topics).await {
            Ok(stream) => {
                let mut stream = Box::pin(stream);
                info!("subscribed to events from {}", beacon_node.host());
                backoff = INITIAL_RECONNECT_BACKOFF;

                while let Some(item) = stream.next().await {
                    match item {
                        Ok(raw_event) => {
                            if raw_event.event.execution_optimistic() {
                                warn!(
                                    "ignoring execution optimistic event from {}",
                                    beacon_node.host(),
                                );
                                beacon_node.penalize();
                                continue;
                            }

                            if tx
                                .unbounded_send((beacon_node.host().to_owned(), raw_event))
                                .is_err()
                            {
                                return;
                            }
                        }
                        Err(error) => {
                            warn!(
                                "error in event stream from {}: {error}",
                                beacon_node.host(),
                            );
                            break;
                        }
                    }
                }

                warn!("event stream from {} ended, reconnecting", beacon_node.host());
            }
            Err(error) => {
                warn!(
                    "failed to subscribe to events from {}: {error}",
                    beacon_node.host(),
                );
            }
        }

        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(config.slot_duration());
    }
}

/// Not every consensus client serves every topic; subscribing to an
/// unsupported one fails the whole stream on some implementations.
fn topics_for(beacon_node: &BeaconNode) -> Vec<Topic> {
    let version = beacon_node.node_version().to_lowercase();

    Topic::ALL
        .into_iter()
        .filter(|topic| {
            let slashing_topic =
                matches!(topic, Topic::AttesterSlashing | Topic::ProposerSlashing);

            !(slashing_topic && version.contains("grandine"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn head_event(slot: u64, block_byte: u8) -> RawEvent {
        RawEvent {
            event: BeaconNodeEvent::Head(beacon_api::HeadEvent {
                slot,
                block: H256::repeat_byte(block_byte),
                previous_duty_dependent_root: H256::zero(),
                current_duty_dependent_root: H256::zero(),
                execution_optimistic: false,
            }),
            data: String::new(),
        }
    }

    #[tokio::test]
    async fn duplicate_events_across_nodes_are_collapsed() {
        let (tx, rx) = mpsc::unbounded();

        let mut pipeline = EventPipeline {
            rx,
            seen: HashSet::new(),
            seen_order: VecDeque::new(),
            metrics: None,
        };

        tx.unbounded_send(("node-a".to_owned(), head_event(100, 0xab)))
            .expect("channel is open");
        tx.unbounded_send(("node-b".to_owned(), head_event(100, 0xab)))
            .expect("channel is open");
        tx.unbounded_send(("node-b".to_owned(), head_event(101, 0xcd)))
            .expect("channel is open");
        drop(tx);

        let first = pipeline.next_event().await.expect("first event");
        let second = pipeline.next_event().await.expect("second event");

        assert_eq!(first.node, "node-a");
        assert_eq!(second.node, "node-b");

        match second.event {
            BeaconNodeEvent::Head(head) => assert_eq!(head.slot, 101),
            other => panic!("expected a head event, got {other:?}"),
        }

        assert!(pipeline.next_event().await.is_none());
    }
}
