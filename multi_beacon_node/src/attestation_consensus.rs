//! Threshold consensus on attestation data.
//!
//! An attestation is only ever signed over data that `attestation_consensus_threshold`
//! live beacon nodes agreed on at the moment of decision. Two paths exist:
//! with a head event the nodes are polled until enough of them have processed
//! the event's block, without one the nodes vote with whatever data they
//! produce until one `(head, source, target)` group reaches the threshold.

use std::{
    collections::HashMap,
    sync::Mutex,
    time::Duration,
};

use beacon_api::HeadEvent;
use futures::stream::{FuturesUnordered, StreamExt as _};
use log::{debug, warn};
use tokio::time::Instant;
use types::phase0::{
    containers::{AttestationData, Checkpoint},
    primitives::{CommitteeIndex, Epoch, Slot, H256},
};

use crate::multi_beacon_node::{MultiBeaconNode, MultiBeaconNodeError};

/// Minimum spacing between voting rounds across all nodes.
const VOTE_ROUND_INTERVAL: Duration = Duration::from_millis(30);

/// The source and target checkpoints a threshold of beacon nodes agreed on,
/// cached for the epoch they were confirmed in. A reorg across the epoch
/// boundary drops the cache; the next attestation re-confirms from scratch.
#[derive(Default)]
pub(crate) struct FinalityCache {
    inner: Mutex<Option<ConfirmedCheckpoints>>,
}

#[derive(Clone, Copy)]
struct ConfirmedCheckpoints {
    epoch: Epoch,
    source: Checkpoint,
    target: Checkpoint,
}

impl FinalityCache {
    pub fn get(&self, epoch: Epoch) -> Option<(Checkpoint, Checkpoint)> {
        let inner = self.inner.lock().ok()?;

        inner
            .as_ref()
            .filter(|confirmed| confirmed.epoch == epoch)
            .map(|confirmed| (confirmed.source, confirmed.target))
    }

    pub fn store(&self, epoch: Epoch, source: Checkpoint, target: Checkpoint) {
        if let Ok(mut inner) = self.inner.lock() {
            *inner = Some(ConfirmedCheckpoints {
                epoch,
                source,
                target,
            });
        }
    }

    pub fn invalidate(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            *inner = None;
        }
    }
}

/// The canonical vote identity of an attestation data object.
type VoteKey = (H256, Checkpoint, Checkpoint);

const fn vote_key(data: &AttestationData) -> VoteKey {
    (data.beacon_block_root, data.source, data.target)
}

impl MultiBeaconNode {
    /// Produces attestation data agreed on by at least the configured
    /// threshold of beacon nodes, or fails once `deadline` passes. A failure
    /// abandons the duty for this slot; it is never retried.
    pub async fn produce_attestation_data(
        &self,
        slot: Slot,
        committee_index: CommitteeIndex,
        deadline: Instant,
        head_event: Option<HeadEvent>,
    ) -> Result<AttestationData, MultiBeaconNodeError> {
        let consensus = async {
            if self.beacon_nodes().len() == 1 {
                return self
                    .first_success("produce_attestation_data", move |beacon_node| async move {
                        beacon_node
                            .produce_attestation_data(slot, committee_index)
                            .await
                    })
                    .await;
            }

            match head_event {
                Some(head_event) => {
                    self.attestation_data_for_head(slot, committee_index, head_event)
                        .await
                }
                None => self.attestation_data_by_vote(slot, committee_index).await,
            }
        };

        match tokio::time::timeout_at(deadline, consensus).await {
            Ok(result) => result,
            Err(_) => Err(MultiBeaconNodeError::AttestationConsensus { slot }),
        }
    }

    /// Invalidates cached checkpoint agreement when a reorg reaches back
    /// across the epoch boundary.
    pub fn handle_chain_reorg(&self, slot: Slot, depth: u64) {
        let epoch_start = self
            .config()
            .start_slot_of_epoch(self.config().epoch_of(slot));

        if slot.saturating_sub(depth) < epoch_start {
            debug!("reorg of depth {depth} at slot {slot} crosses the epoch boundary");
            self.finality_cache.invalidate();
        }
    }

    /// Head-pinned path: every node is polled until it reports the head
    /// event's block root. The first `threshold` responses whose checkpoints
    /// agree with each other (and with the cached per-epoch confirmation, if
    /// any) decide; the earliest response of the winning group is returned.
    async fn attestation_data_for_head(
        &self,
        slot: Slot,
        committee_index: CommitteeIndex,
        head_event: HeadEvent,
    ) -> Result<AttestationData, MultiBeaconNodeError> {
        let epoch = self.config().epoch_of(slot);
        let confirmed = self.finality_cache.get(epoch);

        let mut requests = self
            .healthy_nodes()
            .cloned()
            .map(|beacon_node| async move {
                beacon_node
                    .wait_for_attestation_data(head_event.block, slot, committee_index)
                    .await
            })
            .collect::<FuturesUnordered<_>>();

        let mut votes: HashMap<(Checkpoint, Checkpoint), (usize, AttestationData)> =
            HashMap::new();

        while let Some(result) = requests.next().await {
            let Ok(data) = result else {
                // `wait_for_attestation_data` only resolves with a match.
                continue;
            };

            let checkpoints = (data.source, data.target);

            if let Some(confirmed) = confirmed {
                if checkpoints != confirmed {
                    warn!(
                        "attestation data for slot {slot} disagrees with confirmed checkpoints",
                    );
                    continue;
                }
            }

            let (count, first) = votes.entry(checkpoints).or_insert((0, data));
            *count += 1;

            if *count >= self.threshold() {
                let agreed = *first;
                self.finality_cache.store(epoch, agreed.source, agreed.target);
                return Ok(agreed);
            }
        }

        Err(MultiBeaconNodeError::AttestationConsensus { slot })
    }

    /// Voting path: all nodes produce attestation data in rounds until one
    /// `(head, source, target)` group reaches the threshold.
    async fn attestation_data_by_vote(
        &self,
        slot: Slot,
        committee_index: CommitteeIndex,
    ) -> Result<AttestationData, MultiBeaconNodeError> {
        let epoch = self.config().epoch_of(slot);

        loop {
            let round_started = Instant::now();

            let mut requests = self
                .healthy_nodes()
                .cloned()
                .map(|beacon_node| async move {
                    beacon_node
                        .produce_attestation_data(slot, committee_index)
                        .await
                })
                .collect::<FuturesUnordered<_>>();

            let mut votes: HashMap<VoteKey, (usize, AttestationData)> = HashMap::new();

            while let Some(result) = requests.next().await {
                let data = match result {
                    Ok(data) => data,
                    Err(error) => {
                        debug!("attestation data request failed during voting: {error}");
                        continue;
                    }
                };

                let (count, first) = votes.entry(vote_key(&data)).or_insert((0, data));
                *count += 1;

                if *count >= self.threshold() {
                    let agreed = *first;
                    self.finality_cache.store(epoch, agreed.source, agreed.target);
                    return Ok(agreed);
                }
            }

            tokio::time::sleep_until(round_started + VOTE_ROUND_INTERVAL).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use beacon_api::BeaconNode;
    use httpmock::{Method, MockServer};
    use reqwest::Client;
    use serde_json::json;
    use types::{config::Config, redacting_url::RedactingUrl};

    use super::*;

    fn attestation_data_body(head: &str, source_epoch: u64, target_epoch: u64) -> serde_json::Value {
        json!({
            "data": {
                "slot": "100",
                "index": "0",
                "beacon_block_root": format!("0x{}", head.repeat(32)),
                "source": {
                    "epoch": source_epoch.to_string(),
                    "root": format!("0x{}", "05".repeat(32)),
                },
                "target": {
                    "epoch": target_epoch.to_string(),
                    "root": format!("0x{}", "06".repeat(32)),
                },
            },
        })
    }

    fn mock_initialization(server: &MockServer, config: &Config) {
        server.mock(|when, then| {
            when.method(Method::GET).path("/eth/v1/beacon/genesis");
            then.status(200).json_body(json!({
                "data": {
                    "genesis_time": "1606824023",
                    "genesis_validators_root": format!("0x{}", "00".repeat(32)),
                    "genesis_fork_version": "0x00000000",
                },
            }));
        });
        server.mock(|when, then| {
            when.method(Method::GET).path("/eth/v1/config/spec");
            then.status(200)
                .json_body(json!({ "data": config.fingerprint() }));
        });
        server.mock(|when, then| {
            when.method(Method::GET).path("/eth/v1/node/version");
            then.status(200)
                .json_body(json!({ "data": { "version": "mock/v0" } }));
        });
    }

    async fn multi_beacon_node(servers: &[&MockServer], threshold: usize) -> MultiBeaconNode {
        let config = Arc::new(Config::mainnet());

        let beacon_nodes = servers
            .iter()
            .map(|server| {
                mock_initialization(server, &config);

                let url = server
                    .url("/")
                    .parse::<RedactingUrl>()
                    .expect("mock server URL is valid");

                Arc::new(
                    BeaconNode::new(Client::new(), url, config.clone(), None)
                        .expect("beacon node is constructed"),
                )
            })
            .collect();

        let multi = MultiBeaconNode::new(beacon_nodes, vec![], threshold, config, None);

        multi
            .initialize(false)
            .await
            .expect("initialization succeeds");

        multi
    }

    fn deadline_in(duration: Duration) -> Instant {
        Instant::now() + duration
    }

    #[tokio::test]
    async fn all_nodes_agreeing_reach_consensus_immediately() {
        let servers = [MockServer::start(), MockServer::start(), MockServer::start()];

        for server in &servers {
            server.mock(|when, then| {
                when.method(Method::GET)
                    .path("/eth/v1/validator/attestation_data");
                then.status(200).json_body(attestation_data_body("ab", 63, 64));
            });
        }

        let multi = multi_beacon_node(&servers.iter().collect::<Vec<_>>(), 2).await;

        let data = multi
            .produce_attestation_data(100, 0, deadline_in(Duration::from_secs(2)), None)
            .await
            .expect("consensus is reached");

        assert_eq!(data.beacon_block_root, H256::repeat_byte(0xab));
        assert_eq!(data.source.epoch, 63);
        assert_eq!(data.target.epoch, 64);
    }

    #[tokio::test]
    async fn majority_wins_over_a_divergent_node() {
        let servers = [MockServer::start(), MockServer::start(), MockServer::start()];
        let heads = ["cd", "ef", "ef"];

        for (server, head) in servers.iter().zip(heads) {
            server.mock(|when, then| {
                when.method(Method::GET)
                    .path("/eth/v1/validator/attestation_data");
                then.status(200).json_body(attestation_data_body(head, 63, 64));
            });
        }

        let multi = multi_beacon_node(&servers.iter().collect::<Vec<_>>(), 2).await;

        let data = multi
            .produce_attestation_data(100, 0, deadline_in(Duration::from_secs(2)), None)
            .await
            .expect("the majority head wins");

        assert_eq!(data.beacon_block_root, H256::repeat_byte(0xef));
    }

    #[tokio::test]
    async fn no_quorum_abandons_the_duty() {
        let servers = [MockServer::start(), MockServer::start(), MockServer::start()];
        let heads = ["aa", "bb", "cc"];

        for (server, head) in servers.iter().zip(heads) {
            server.mock(|when, then| {
                when.method(Method::GET)
                    .path("/eth/v1/validator/attestation_data");
                then.status(200).json_body(attestation_data_body(head, 63, 64));
            });
        }

        let multi = multi_beacon_node(&servers.iter().collect::<Vec<_>>(), 2).await;

        let error = multi
            .produce_attestation_data(100, 0, deadline_in(Duration::from_millis(300)), None)
            .await
            .expect_err("three distinct heads never reach a threshold of two");

        assert!(matches!(
            error,
            MultiBeaconNodeError::AttestationConsensus { slot: 100 },
        ));
    }

    #[tokio::test]
    async fn consensus_proceeds_with_an_offline_node() {
        let servers = [MockServer::start(), MockServer::start(), MockServer::start()];

        // The third node serves no attestation data at all.
        for server in &servers[..2] {
            server.mock(|when, then| {
                when.method(Method::GET)
                    .path("/eth/v1/validator/attestation_data");
                then.status(200).json_body(attestation_data_body("ab", 63, 64));
            });
        }

        let multi = multi_beacon_node(&servers.iter().collect::<Vec<_>>(), 2).await;

        let data = multi
            .produce_attestation_data(100, 0, deadline_in(Duration::from_secs(2)), None)
            .await
            .expect("two agreeing nodes suffice");

        assert_eq!(data.beacon_block_root, H256::repeat_byte(0xab));
    }

    #[tokio::test]
    async fn threshold_of_one_accepts_the_first_response() {
        let servers = [MockServer::start(), MockServer::start()];
        let heads = ["aa", "bb"];

        for (server, head) in servers.iter().zip(heads) {
            server.mock(|when, then| {
                when.method(Method::GET)
                    .path("/eth/v1/validator/attestation_data");
                then.status(200).json_body(attestation_data_body(head, 63, 64));
            });
        }

        let multi = multi_beacon_node(&servers.iter().collect::<Vec<_>>(), 1).await;

        let data = multi
            .produce_attestation_data(100, 0, deadline_in(Duration::from_secs(2)), None)
            .await
            .expect("any single response forms a quorum of one");

        let expected = [H256::repeat_byte(0xaa), H256::repeat_byte(0xbb)];
        assert!(expected.contains(&data.beacon_block_root));
    }

    #[tokio::test]
    async fn head_event_path_waits_for_matching_nodes() {
        let servers = [MockServer::start(), MockServer::start(), MockServer::start()];
        let heads = ["ab", "ab", "cd"];

        for (server, head) in servers.iter().zip(heads) {
            server.mock(|when, then| {
                when.method(Method::GET)
                    .path("/eth/v1/validator/attestation_data");
                then.status(200).json_body(attestation_data_body(head, 63, 64));
            });
        }

        let multi = multi_beacon_node(&servers.iter().collect::<Vec<_>>(), 2).await;

        let head_event = HeadEvent {
            slot: 100,
            block: H256::repeat_byte(0xab),
            previous_duty_dependent_root: H256::zero(),
            current_duty_dependent_root: H256::zero(),
            execution_optimistic: false,
        };

        let data = multi
            .produce_attestation_data(
                100,
                0,
                deadline_in(Duration::from_secs(2)),
                Some(head_event),
            )
            .await
            .expect("two nodes report the head block");

        assert_eq!(data.beacon_block_root, H256::repeat_byte(0xab));
    }

    #[tokio::test]
    async fn the_aggregate_with_the_most_participants_wins() {
        use ssz_types::BitList;
        use types::{
            phase0::containers::Attestation, preset::MaxValidatorsPerCommittee, SignatureBytes,
        };

        fn aggregate_with_bits(set_bits: usize) -> serde_json::Value {
            let mut aggregation_bits =
                BitList::<MaxValidatorsPerCommittee>::with_capacity(16)
                    .expect("committee fits the list bound");

            for position in 0..set_bits {
                aggregation_bits
                    .set(position, true)
                    .expect("position is within the committee");
            }

            let aggregate = Attestation {
                aggregation_bits,
                data: AttestationData::default(),
                signature: SignatureBytes::zero(),
            };

            json!({ "version": "deneb", "data": aggregate })
        }

        let servers = [MockServer::start(), MockServer::start(), MockServer::start()];
        let participant_counts = [10, 12, 11];

        for (server, count) in servers.iter().zip(participant_counts) {
            server.mock(|when, then| {
                when.method(Method::GET)
                    .path("/eth/v2/validator/aggregate_attestation");
                then.status(200).json_body(aggregate_with_bits(count));
            });
        }

        let multi = multi_beacon_node(&servers.iter().collect::<Vec<_>>(), 2).await;

        let best = multi
            .get_aggregate_attestation(
                100,
                H256::zero(),
                0,
                deadline_in(Duration::from_secs(2)),
            )
            .await
            .expect("at least one aggregate is returned");

        assert_eq!(best.num_set_bits(), 12);
    }

    #[test]
    fn reorgs_crossing_the_epoch_boundary_invalidate_the_cache() {
        let cache = FinalityCache::default();
        let source = Checkpoint::default();
        let target = Checkpoint::default();

        cache.store(3, source, target);
        assert!(cache.get(3).is_some());
        assert!(cache.get(4).is_none());

        cache.invalidate();
        assert!(cache.get(3).is_none());
    }
}
