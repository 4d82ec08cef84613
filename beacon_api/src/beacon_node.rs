use core::{
    sync::atomic::{AtomicBool, AtomicI64, Ordering},
    time::Duration,
};
use std::{
    collections::BTreeMap,
    sync::{Arc, OnceLock, RwLock},
};

use anyhow::Result;
use futures::stream::Stream;
use log::{debug, info};
use prometheus_metrics::Metrics;
use reqwest::{
    header::{ACCEPT, CONTENT_TYPE},
    Client, Method, RequestBuilder, StatusCode,
};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::time::Instant;
use types::{
    altair::containers::{SignedContributionAndProof, SyncCommitteeContribution, SyncCommitteeMessage},
    builder::SignedValidatorRegistrationV1,
    combined::{Attestation, SignedAggregateAndProof, SignedBeaconBlock, SignedBlindedBeaconBlock},
    config::Config,
    electra::containers::SingleAttestation,
    nonstandard::{Phase, ValidatorStatus},
    phase0::{
        containers::{Attestation as Phase0Attestation, AttestationData},
        primitives::{CommitteeIndex, Epoch, Slot, SubcommitteeIndex, ValidatorIndex, H256},
    },
    redacting_url::RedactingUrl,
    PublicKeyBytes,
};

use crate::{
    events::{parse_sse_stream, RawEvent, Topic},
    schemas::{
        AttesterDuty, BeaconCommitteeSubscription, BlockRootData, DataResponse, DutiesResponse,
        Genesis, ProduceBlockV3Response, ProposerDuty, ProposerPreparation, SyncCommitteeSubscription,
        SyncDutiesResponse, SyncDuty, ValidatorInfo, ValidatorLiveness,
    },
};

const SCORE_MAX: i64 = 100;
const SCORE_DELTA_SUCCESS: i64 = 1;

// Failure penalties are graded so that, all else being equal, a node that
// times out sorts above one answering 5xx, which sorts above one refusing
// connections outright.
const SCORE_PENALTY_TIMEOUT: i64 = 3;
const SCORE_PENALTY_SERVER_ERROR: i64 = 4;
const SCORE_PENALTY_CONNECTION: i64 = 5;

/// Total timeout for a single attestation data request. Requests slower than
/// this are useless for quorum anyway.
const ATTESTATION_DATA_TIMEOUT: Duration = Duration::from_millis(300);
/// Minimum spacing between repeated attestation data requests to one node.
const HEAD_POLL_INTERVAL: Duration = Duration::from_millis(50);

const VALIDATORS_FALLBACK_BATCH_SIZE: usize = 64;

#[derive(Debug, Error)]
pub enum BeaconNodeError {
    #[error("beacon node {node} is not ready")]
    NodeNotReady { node: String },
    #[error("beacon node {node} does not support the endpoint")]
    UnsupportedEndpoint { node: String },
    #[error("unexpected status {status} from beacon node {node}: {body}")]
    BadStatus {
        node: String,
        status: StatusCode,
        body: String,
    },
    #[error("request to beacon node {node} failed: {source}")]
    Transport {
        node: String,
        source: reqwest::Error,
    },
    #[error("deadline exceeded waiting for beacon node {node}")]
    DeadlineExceeded { node: String },
    #[error("beacon node {node} response is execution optimistic")]
    ExecutionOptimistic { node: String },
    #[error("beacon node {node} returned an invalid payload: {source}")]
    InvalidPayload {
        node: String,
        #[source]
        source: anyhow::Error,
    },
}

/// A typed client for one beacon node.
///
/// The score starts at zero, jumps to the maximum on successful
/// initialization, then earns a small credit per successful call and a larger
/// penalty per failure. Only completed calls earn credit, so a node that is
/// slow or failing sorts below a healthy one regardless of the failure kind.
pub struct BeaconNode {
    client: Client,
    base_url: RedactingUrl,
    host: String,
    config: Arc<Config>,
    score: AtomicI64,
    initialized: AtomicBool,
    genesis: OnceLock<Genesis>,
    remote_spec: RwLock<BTreeMap<String, String>>,
    node_version: RwLock<String>,
    metrics: Option<Arc<Metrics>>,
}

impl BeaconNode {
    pub fn new(
        client: Client,
        base_url: RedactingUrl,
        config: Arc<Config>,
        metrics: Option<Arc<Metrics>>,
    ) -> Result<Self> {
        let host = base_url
            .host_str()
            .ok_or_else(|| anyhow::anyhow!("failed to parse hostname from {base_url}"))?
            .to_owned();

        Ok(Self {
            client,
            base_url,
            host,
            config,
            score: AtomicI64::new(0),
            initialized: AtomicBool::new(false),
            genesis: OnceLock::new(),
            remote_spec: RwLock::new(BTreeMap::new()),
            node_version: RwLock::new(String::new()),
            metrics,
        })
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub const fn base_url(&self) -> &RedactingUrl {
        &self.base_url
    }

    #[must_use]
    pub fn score(&self) -> i64 {
        self.score.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn genesis(&self) -> Option<Genesis> {
        self.genesis.get().copied()
    }

    #[must_use]
    pub fn node_version(&self) -> String {
        self.node_version
            .read()
            .map(|version| version.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn remote_spec(&self) -> BTreeMap<String, String> {
        self.remote_spec
            .read()
            .map(|spec| spec.clone())
            .unwrap_or_default()
    }

    /// Fetches genesis, spec and version from the node. A node that cannot
    /// serve these is unusable and stays uninitialized; callers retry.
    pub async fn initialize(&self) -> Result<(), BeaconNodeError> {
        let genesis = self.get_genesis().await?;
        let spec = self.get_spec().await?;
        let version = self.get_node_version().await.unwrap_or_else(|error| {
            debug!("failed to fetch node version from {}: {error}", self.host);
            "unknown".to_owned()
        });

        self.genesis.get_or_init(|| genesis);

        if let Ok(mut remote_spec) = self.remote_spec.write() {
            *remote_spec = spec;
        }

        if let Ok(mut node_version) = self.node_version.write() {
            node_version.clone_from(&version);
        }

        if let Some(metrics) = self.metrics.as_ref() {
            metrics
                .beacon_node_version
                .with_label_values(&[&self.host, &version])
                .set(1);
        }

        self.set_score(SCORE_MAX);
        self.initialized.store(true, Ordering::Relaxed);

        info!("initialized beacon node at {}", self.base_url);

        Ok(())
    }

    pub async fn get_genesis(&self) -> Result<Genesis, BeaconNodeError> {
        let response = self
            .request_json::<DataResponse<Genesis>>(
                self.get("/eth/v1/beacon/genesis"),
                None,
            )
            .await?;

        Ok(response.data)
    }

    pub async fn get_spec(&self) -> Result<BTreeMap<String, String>, BeaconNodeError> {
        let response = self
            .request_json::<DataResponse<BTreeMap<String, Value>>>(
                self.get("/eth/v1/config/spec"),
                None,
            )
            .await?;

        Ok(response
            .data
            .into_iter()
            .map(|(key, value)| {
                let value = match value {
                    Value::String(string) => string,
                    other => other.to_string(),
                };
                (key, value)
            })
            .collect())
    }

    pub async fn get_node_version(&self) -> Result<String, BeaconNodeError> {
        #[derive(serde::Deserialize)]
        struct VersionData {
            version: String,
        }

        let response = self
            .request_json::<DataResponse<VersionData>>(self.get("/eth/v1/node/version"), None)
            .await?;

        Ok(response.data.version)
    }

    pub async fn produce_attestation_data(
        &self,
        slot: Slot,
        committee_index: CommitteeIndex,
    ) -> Result<AttestationData, BeaconNodeError> {
        let request = self
            .get("/eth/v1/validator/attestation_data")
            .query(&[("slot", slot), ("committee_index", committee_index)])
            .timeout(ATTESTATION_DATA_TIMEOUT);

        let response = self
            .request_json::<DataResponse<AttestationData>>(request, None)
            .await?;

        Ok(response.data)
    }

    /// Repeatedly requests attestation data until the node reports
    /// `expected_head_block_root`. Runs until cancelled or the root matches.
    pub async fn wait_for_attestation_data(
        &self,
        expected_head_block_root: H256,
        slot: Slot,
        committee_index: CommitteeIndex,
    ) -> Result<AttestationData, BeaconNodeError> {
        loop {
            let request_started = Instant::now();

            match self.produce_attestation_data(slot, committee_index).await {
                Ok(attestation_data)
                    if attestation_data.beacon_block_root == expected_head_block_root =>
                {
                    return Ok(attestation_data);
                }
                Ok(_) => {}
                Err(error) => {
                    debug!(
                        "attestation data request to {} failed while waiting for head: {error}",
                        self.host,
                    );
                }
            }

            tokio::time::sleep_until(request_started + HEAD_POLL_INTERVAL).await;
        }
    }

    pub async fn get_validators(
        &self,
        ids: &[PublicKeyBytes],
        statuses: &[ValidatorStatus],
        state_id: &str,
    ) -> Result<Vec<ValidatorInfo>, BeaconNodeError> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        let path = format!("/eth/v1/beacon/states/{state_id}/validators");
        let body = if statuses.is_empty() {
            json!({ "ids": ids })
        } else {
            json!({ "ids": ids, "statuses": statuses })
        };

        match self
            .request_json::<DataResponse<Vec<ValidatorInfo>>>(
                self.post(&path).json(&body),
                None,
            )
            .await
        {
            Ok(response) => Ok(response.data),
            Err(BeaconNodeError::UnsupportedEndpoint { .. }) => {
                self.get_validators_fallback(ids, statuses, state_id).await
            }
            Err(error) => Err(error),
        }
    }

    /// GET fallback for nodes that do not serve the POST variant yet. Queries
    /// are batched to keep URLs within common length limits.
    async fn get_validators_fallback(
        &self,
        ids: &[PublicKeyBytes],
        statuses: &[ValidatorStatus],
        state_id: &str,
    ) -> Result<Vec<ValidatorInfo>, BeaconNodeError> {
        let path = format!("/eth/v1/beacon/states/{state_id}/validators");
        let statuses = statuses
            .iter()
            .map(|status| (String::from("status"), status.to_string()))
            .collect::<Vec<_>>();

        let mut validators = vec![];

        for batch in ids.chunks(VALIDATORS_FALLBACK_BATCH_SIZE) {
            let ids = batch
                .iter()
                .map(|pubkey| (String::from("id"), format!("{pubkey:?}")))
                .collect::<Vec<_>>();

            let request = self.get(&path).query(&ids).query(&statuses);

            let response = self
                .request_json::<DataResponse<Vec<ValidatorInfo>>>(request, None)
                .await?;

            validators.extend(response.data);
        }

        Ok(validators)
    }

    pub async fn get_attester_duties(
        &self,
        epoch: Epoch,
        indices: &[ValidatorIndex],
    ) -> Result<DutiesResponse<AttesterDuty>, BeaconNodeError> {
        let path = format!("/eth/v1/validator/duties/attester/{epoch}");
        let body = indices.iter().map(ToString::to_string).collect::<Vec<_>>();

        let response = self
            .request_json::<DutiesResponse<AttesterDuty>>(self.post(&path).json(&body), None)
            .await?;

        self.reject_optimistic(response.execution_optimistic)?;

        Ok(response)
    }

    pub async fn get_proposer_duties(
        &self,
        epoch: Epoch,
    ) -> Result<DutiesResponse<ProposerDuty>, BeaconNodeError> {
        let path = format!("/eth/v1/validator/duties/proposer/{epoch}");

        let response = self
            .request_json::<DutiesResponse<ProposerDuty>>(self.get(&path), None)
            .await?;

        self.reject_optimistic(response.execution_optimistic)?;

        Ok(response)
    }

    pub async fn get_sync_duties(
        &self,
        epoch: Epoch,
        indices: &[ValidatorIndex],
    ) -> Result<Vec<SyncDuty>, BeaconNodeError> {
        let path = format!("/eth/v1/validator/duties/sync/{epoch}");
        let body = indices.iter().map(ToString::to_string).collect::<Vec<_>>();

        let response = self
            .request_json::<SyncDutiesResponse>(self.post(&path).json(&body), None)
            .await?;

        self.reject_optimistic(response.execution_optimistic)?;

        Ok(response.data)
    }

    pub async fn get_block_root(&self, block_id: &str) -> Result<H256, BeaconNodeError> {
        #[derive(serde::Deserialize)]
        struct RootResponse {
            #[serde(default)]
            execution_optimistic: bool,
            data: BlockRootData,
        }

        let path = format!("/eth/v1/beacon/blocks/{block_id}/root");
        let request = self.get(&path).timeout(Duration::from_secs(2));

        let response = self.request_json::<RootResponse>(request, None).await?;

        self.reject_optimistic(response.execution_optimistic)?;

        Ok(response.data.root)
    }

    pub async fn get_aggregate_attestation(
        &self,
        slot: Slot,
        attestation_data_root: H256,
        committee_index: CommitteeIndex,
        deadline: Option<Instant>,
    ) -> Result<Attestation, BeaconNodeError> {
        #[derive(serde::Deserialize)]
        struct AggregateResponse {
            version: Phase,
            data: Value,
        }

        let request = self
            .get("/eth/v2/validator/aggregate_attestation")
            .query(&[
                ("slot", slot.to_string()),
                (
                    "attestation_data_root",
                    format!("{attestation_data_root:?}"),
                ),
                ("committee_index", committee_index.to_string()),
            ])
            .timeout(self.config.interval_duration());

        let response = self
            .request_json::<AggregateResponse>(request, deadline)
            .await?;

        let aggregate = if response.version >= Phase::Electra {
            Attestation::Electra(
                serde_json::from_value(response.data).map_err(|error| self.invalid_payload(error))?,
            )
        } else {
            Attestation::Phase0(
                serde_json::from_value(response.data).map_err(|error| self.invalid_payload(error))?,
            )
        };

        Ok(aggregate)
    }

    pub async fn get_sync_committee_contribution(
        &self,
        slot: Slot,
        subcommittee_index: SubcommitteeIndex,
        beacon_block_root: H256,
        deadline: Option<Instant>,
    ) -> Result<SyncCommitteeContribution, BeaconNodeError> {
        let request = self
            .get("/eth/v1/validator/sync_committee_contribution")
            .query(&[
                ("slot", slot.to_string()),
                ("subcommittee_index", subcommittee_index.to_string()),
                ("beacon_block_root", format!("{beacon_block_root:?}")),
            ])
            .timeout(self.config.interval_duration());

        let response = self
            .request_json::<DataResponse<SyncCommitteeContribution>>(request, deadline)
            .await?;

        Ok(response.data)
    }

    pub async fn publish_attestations(
        &self,
        attestations: &[Phase0Attestation],
    ) -> Result<(), BeaconNodeError> {
        self.request_expect_ok(
            self.post("/eth/v1/beacon/pool/attestations").json(attestations),
            None,
        )
        .await
    }

    pub async fn publish_single_attestations(
        &self,
        attestations: &[SingleAttestation],
        phase: Phase,
    ) -> Result<(), BeaconNodeError> {
        let request = self
            .post("/eth/v2/beacon/pool/attestations")
            .header("Eth-Consensus-Version", phase.as_ref())
            .json(attestations);

        self.request_expect_ok(request, None).await
    }

    pub async fn publish_aggregate_and_proofs(
        &self,
        aggregates: &[SignedAggregateAndProof],
        phase: Phase,
    ) -> Result<(), BeaconNodeError> {
        let request = self
            .post("/eth/v2/validator/aggregate_and_proofs")
            .header("Eth-Consensus-Version", phase.as_ref())
            .json(aggregates);

        self.request_expect_ok(request, None).await
    }

    pub async fn publish_sync_committee_messages(
        &self,
        messages: &[SyncCommitteeMessage],
    ) -> Result<(), BeaconNodeError> {
        self.request_expect_ok(
            self.post("/eth/v1/beacon/pool/sync_committees").json(messages),
            None,
        )
        .await
    }

    pub async fn publish_contribution_and_proofs(
        &self,
        contributions: &[SignedContributionAndProof],
    ) -> Result<(), BeaconNodeError> {
        self.request_expect_ok(
            self.post("/eth/v1/validator/contribution_and_proofs")
                .json(contributions),
            None,
        )
        .await
    }

    pub async fn prepare_beacon_committee_subscriptions(
        &self,
        subscriptions: &[BeaconCommitteeSubscription],
    ) -> Result<(), BeaconNodeError> {
        self.request_expect_ok(
            self.post("/eth/v1/validator/beacon_committee_subscriptions")
                .json(subscriptions),
            None,
        )
        .await
    }

    pub async fn prepare_sync_committee_subscriptions(
        &self,
        subscriptions: &[SyncCommitteeSubscription],
    ) -> Result<(), BeaconNodeError> {
        self.request_expect_ok(
            self.post("/eth/v1/validator/sync_committee_subscriptions")
                .json(subscriptions),
            None,
        )
        .await
    }

    pub async fn prepare_beacon_proposer(
        &self,
        preparations: &[ProposerPreparation],
    ) -> Result<(), BeaconNodeError> {
        self.request_expect_ok(
            self.post("/eth/v1/validator/prepare_beacon_proposer")
                .json(preparations),
            None,
        )
        .await
    }

    pub async fn register_validators(
        &self,
        registrations: &[SignedValidatorRegistrationV1],
    ) -> Result<(), BeaconNodeError> {
        self.request_expect_ok(
            self.post("/eth/v1/validator/register_validator")
                .json(registrations),
            None,
        )
        .await
    }

    pub async fn get_liveness(
        &self,
        epoch: Epoch,
        indices: &[ValidatorIndex],
    ) -> Result<Vec<ValidatorLiveness>, BeaconNodeError> {
        let path = format!("/eth/v1/validator/liveness/{epoch}");
        let body = indices.iter().map(ToString::to_string).collect::<Vec<_>>();

        let response = self
            .request_json::<DataResponse<Vec<ValidatorLiveness>>>(
                self.post(&path).json(&body),
                None,
            )
            .await?;

        Ok(response.data)
    }

    pub async fn produce_block_v3(
        &self,
        slot: Slot,
        randao_reveal: types::SignatureBytes,
        graffiti: Option<H256>,
        builder_boost_factor: u64,
        deadline: Option<Instant>,
    ) -> Result<ProduceBlockV3Response, BeaconNodeError> {
        let path = format!("/eth/v3/validator/blocks/{slot}");

        let mut query = vec![
            ("randao_reveal", format!("{randao_reveal:?}")),
            ("builder_boost_factor", builder_boost_factor.to_string()),
        ];

        if let Some(graffiti) = graffiti {
            query.push(("graffiti", format!("{graffiti:?}")));
        }

        self.request_json::<ProduceBlockV3Response>(self.get(&path).query(&query), deadline)
            .await
    }

    /// Publishes a full signed block. Blob sidecar material is passed through
    /// exactly as the producing node returned it.
    pub async fn publish_block(
        &self,
        block: &SignedBeaconBlock,
        kzg_proofs: &Value,
        blobs: &Value,
    ) -> Result<(), BeaconNodeError> {
        let body = json!({
            "signed_block": block,
            "kzg_proofs": kzg_proofs,
            "blobs": blobs,
        });

        let request = self
            .post("/eth/v2/beacon/blocks")
            .header("Eth-Consensus-Version", block.phase().as_ref())
            .json(&body);

        self.request_expect_ok(request, None).await
    }

    /// Publishes a blinded signed block, SSZ-encoded. Nodes that do not
    /// accept SSZ bodies get the JSON representation instead.
    pub async fn publish_blinded_block(
        &self,
        block: &SignedBlindedBeaconBlock,
    ) -> Result<(), BeaconNodeError> {
        let request = self
            .post("/eth/v2/beacon/blinded_blocks")
            .header("Eth-Consensus-Version", block.phase().as_ref())
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(block.as_ssz_bytes());

        let result = self.request_expect_ok(request, None).await;

        let ssz_rejected = match &result {
            Err(BeaconNodeError::UnsupportedEndpoint { .. }) => true,
            Err(BeaconNodeError::BadStatus { status, .. }) => {
                *status == StatusCode::UNSUPPORTED_MEDIA_TYPE
            }
            _ => false,
        };

        if !ssz_rejected {
            return result;
        }

        let request = self
            .post("/eth/v2/beacon/blinded_blocks")
            .header("Eth-Consensus-Version", block.phase().as_ref())
            .json(block);

        self.request_expect_ok(request, None).await
    }

    /// Opens the SSE event stream. The returned stream ends when the node
    /// closes the connection; reconnecting is the caller's concern.
    pub async fn subscribe_to_events(
        &self,
        topics: &[Topic],
    ) -> Result<impl Stream<Item = Result<RawEvent>>, BeaconNodeError> {
        let topics = topics
            .iter()
            .map(|topic| (String::from("topics"), topic.as_ref().to_owned()))
            .collect::<Vec<_>>();

        let request = self
            .get("/eth/v1/events")
            .query(&topics)
            .header(ACCEPT, "text/event-stream")
            // Event streams are long-lived; the client-wide total timeout
            // must not apply.
            .timeout(Duration::from_secs(60 * 60 * 24));

        let response = self.send(request, None).await?;
        let response = self.check_status(response).await?;

        Ok(parse_sse_stream(Box::pin(response.bytes_stream())))
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.request_builder(Method::GET, path)
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.request_builder(Method::POST, path)
    }

    fn request_builder(&self, method: Method, path: &str) -> RequestBuilder {
        let url = self
            .base_url
            .join(path)
            .map(RedactingUrl::into_url)
            .unwrap_or_else(|_| self.base_url.clone().into_url());

        self.client.request(method, url)
    }

    async fn request_json<T: serde::de::DeserializeOwned>(
        &self,
        request: RequestBuilder,
        deadline: Option<Instant>,
    ) -> Result<T, BeaconNodeError> {
        let response = self.send(request, deadline).await?;
        let response = self.check_status(response).await?;

        let payload = response.json::<T>().await.map_err(|source| {
            BeaconNodeError::Transport {
                node: self.host.clone(),
                source,
            }
        })?;

        self.credit();

        Ok(payload)
    }

    async fn request_expect_ok(
        &self,
        request: RequestBuilder,
        deadline: Option<Instant>,
    ) -> Result<(), BeaconNodeError> {
        let response = self.send(request, deadline).await?;
        self.check_status(response).await?;
        self.credit();

        Ok(())
    }

    async fn send(
        &self,
        request: RequestBuilder,
        deadline: Option<Instant>,
    ) -> Result<reqwest::Response, BeaconNodeError> {
        let future = request.send();

        let result = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, future).await {
                Ok(result) => result,
                Err(_) => {
                    self.adjust_score(-SCORE_PENALTY_TIMEOUT);
                    return Err(BeaconNodeError::DeadlineExceeded {
                        node: self.host.clone(),
                    });
                }
            },
            None => future.await,
        };

        result.map_err(|source| {
            let penalty = if source.is_timeout() {
                SCORE_PENALTY_TIMEOUT
            } else {
                SCORE_PENALTY_CONNECTION
            };
            self.adjust_score(-penalty);

            BeaconNodeError::Transport {
                node: self.host.clone(),
                source,
            }
        })
    }

    async fn check_status(
        &self,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, BeaconNodeError> {
        let status = response.status();

        if status.is_success() {
            return Ok(response);
        }

        if status == StatusCode::METHOD_NOT_ALLOWED {
            // Not a fault of the node; the caller falls back to another
            // endpoint shape.
            return Err(BeaconNodeError::UnsupportedEndpoint {
                node: self.host.clone(),
            });
        }

        self.adjust_score(-SCORE_PENALTY_SERVER_ERROR);

        if status == StatusCode::SERVICE_UNAVAILABLE {
            return Err(BeaconNodeError::NodeNotReady {
                node: self.host.clone(),
            });
        }

        let body = response.text().await.unwrap_or_default();

        Err(BeaconNodeError::BadStatus {
            node: self.host.clone(),
            status,
            body,
        })
    }

    fn reject_optimistic(&self, execution_optimistic: bool) -> Result<(), BeaconNodeError> {
        if execution_optimistic {
            self.penalize();
            return Err(BeaconNodeError::ExecutionOptimistic {
                node: self.host.clone(),
            });
        }

        Ok(())
    }

    fn invalid_payload(&self, error: impl Into<anyhow::Error>) -> BeaconNodeError {
        BeaconNodeError::InvalidPayload {
            node: self.host.clone(),
            source: error.into(),
        }
    }

    pub fn penalize(&self) {
        self.adjust_score(-SCORE_PENALTY_CONNECTION);
    }

    fn credit(&self) {
        self.adjust_score(SCORE_DELTA_SUCCESS);
    }

    fn set_score(&self, score: i64) {
        self.score.store(score, Ordering::Relaxed);
        self.publish_score(score);
    }

    fn adjust_score(&self, delta: i64) {
        let updated = self
            .score
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |score| {
                Some((score + delta).clamp(0, SCORE_MAX))
            })
            .map(|previous| (previous + delta).clamp(0, SCORE_MAX))
            .unwrap_or_default();

        self.publish_score(updated);
    }

    fn publish_score(&self, score: i64) {
        if let Some(metrics) = self.metrics.as_ref() {
            metrics.set_beacon_node_score(&self.host, score);
        }
    }
}

impl core::fmt::Debug for BeaconNode {
    fn fmt(&self, formatter: &mut core::fmt::Formatter) -> core::fmt::Result {
        formatter
            .debug_struct("BeaconNode")
            .field("base_url", &self.base_url)
            .field("score", &self.score())
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use httpmock::{Method as MockMethod, MockServer};
    use serde_json::json;

    use super::*;

    fn beacon_node_for(server: &MockServer) -> BeaconNode {
        let url = server
            .url("/")
            .parse::<RedactingUrl>()
            .expect("mock server URL is valid");

        BeaconNode::new(Client::new(), url, Arc::new(Config::mainnet()), None)
            .expect("beacon node is constructed")
    }

    #[tokio::test]
    async fn attestation_data_request_succeeds_and_credits_score() {
        let server = MockServer::start();

        server.mock(|when, then| {
            when.method(MockMethod::GET)
                .path("/eth/v1/validator/attestation_data")
                .query_param("slot", "100");
            then.status(200).json_body(json!({
                "data": {
                    "slot": "100",
                    "index": "0",
                    "beacon_block_root": format!("0x{}", "ab".repeat(32)),
                    "source": { "epoch": "63", "root": format!("0x{}", "01".repeat(32)) },
                    "target": { "epoch": "64", "root": format!("0x{}", "02".repeat(32)) },
                },
            }));
        });

        let beacon_node = beacon_node_for(&server);
        let score_before = beacon_node.score();

        let attestation_data = beacon_node
            .produce_attestation_data(100, 0)
            .await
            .expect("attestation data is produced");

        assert_eq!(attestation_data.slot, 100);
        assert_eq!(
            attestation_data.beacon_block_root,
            H256::repeat_byte(0xab),
        );
        assert_eq!(beacon_node.score(), score_before + SCORE_DELTA_SUCCESS);
    }

    #[tokio::test]
    async fn not_ready_nodes_are_penalized() {
        let server = MockServer::start();

        server.mock(|when, then| {
            when.method(MockMethod::GET).path("/eth/v1/beacon/genesis");
            then.status(503);
        });

        let beacon_node = beacon_node_for(&server);
        beacon_node.set_score(SCORE_MAX);

        let error = beacon_node
            .get_genesis()
            .await
            .expect_err("503 is an error");

        assert!(matches!(error, BeaconNodeError::NodeNotReady { .. }));
        assert_eq!(beacon_node.score(), SCORE_MAX - SCORE_PENALTY_SERVER_ERROR);
    }

    #[tokio::test]
    async fn unsupported_endpoint_is_not_penalized() {
        let server = MockServer::start();

        server.mock(|when, then| {
            when.method(MockMethod::POST)
                .path("/eth/v1/beacon/states/head/validators");
            then.status(405);
        });
        server.mock(|when, then| {
            when.method(MockMethod::GET)
                .path("/eth/v1/beacon/states/head/validators");
            then.status(200).json_body(json!({ "data": [] }));
        });

        let beacon_node = beacon_node_for(&server);
        beacon_node.set_score(SCORE_MAX);

        let validators = beacon_node
            .get_validators(
                &[PublicKeyBytes::repeat_byte(0x93)],
                &[ValidatorStatus::ActiveOngoing],
                "head",
            )
            .await
            .expect("fallback succeeds");

        assert!(validators.is_empty());
        assert_eq!(beacon_node.score(), SCORE_MAX);
    }

    #[tokio::test]
    async fn deadline_cuts_off_slow_requests() {
        let server = MockServer::start();

        server.mock(|when, then| {
            when.method(MockMethod::GET).path("/eth/v1/beacon/genesis");
            then.status(200)
                .delay(Duration::from_millis(500))
                .json_body(json!({ "data": {
                    "genesis_time": "1606824023",
                    "genesis_validators_root": format!("0x{}", "00".repeat(32)),
                    "genesis_fork_version": "0x00000000",
                }}));
        });

        let beacon_node = beacon_node_for(&server);
        let deadline = Instant::now() + Duration::from_millis(50);

        let error = beacon_node
            .request_json::<DataResponse<Genesis>>(
                beacon_node.get("/eth/v1/beacon/genesis"),
                Some(deadline),
            )
            .await
            .expect_err("deadline should cut the request off");

        assert!(matches!(error, BeaconNodeError::DeadlineExceeded { .. }));
    }
}
