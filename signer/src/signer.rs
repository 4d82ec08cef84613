use core::sync::atomic::{AtomicI64, Ordering};
use std::{collections::HashSet, sync::Arc};

use futures::stream::{FuturesUnordered, TryStreamExt as _};
use itertools::Itertools as _;
use log::{debug, warn};
use prometheus_metrics::Metrics;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use types::{redacting_url::RedactingUrl, PublicKeyBytes, SignatureBytes};

use crate::types::{ForkInfo, SigningMessage, SigningRequest, SigningResponse};

const SCORE_MAX: i64 = 100;
const SCORE_DELTA_SUCCESS: i64 = 1;
const SCORE_DELTA_FAILURE: i64 = 5;

#[derive(Debug, Error)]
pub enum SignerError {
    /// The signer deliberately declined to produce this signature. Refusals
    /// must never be retried with the same payload.
    #[error("remote signer refused to sign ({status}): {body}")]
    Refused { status: StatusCode, body: String },
    #[error("remote signer failed ({status}): {body}")]
    Unavailable { status: StatusCode, body: String },
    #[error("failed to reach remote signer: {0}")]
    Transport(#[from] reqwest::Error),
}

pub struct RemoteSigner {
    client: Client,
    url: RedactingUrl,
    score: AtomicI64,
    metrics: Option<Arc<Metrics>>,
}

impl RemoteSigner {
    #[must_use]
    pub fn new(client: Client, url: RedactingUrl, metrics: Option<Arc<Metrics>>) -> Self {
        Self {
            client,
            url,
            score: AtomicI64::new(SCORE_MAX),
            metrics,
        }
    }

    #[must_use]
    pub const fn url(&self) -> &RedactingUrl {
        &self.url
    }

    #[must_use]
    pub fn score(&self) -> i64 {
        self.score.load(Ordering::Relaxed)
    }

    pub async fn upcheck(&self) -> Result<(), SignerError> {
        let url = self
            .url
            .join("/upcheck")
            .expect("upcheck path is valid")
            .into_url();

        let response = self.client.get(url).send().await?;
        self.check_response(response, "upcheck").await?;

        Ok(())
    }

    pub async fn load_public_keys(&self) -> Result<HashSet<PublicKeyBytes>, SignerError> {
        let url = self
            .url
            .join("/api/v1/eth2/publicKeys")
            .expect("public keys path is valid")
            .into_url();

        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(error) => {
                self.penalize();
                return Err(error.into());
            }
        };

        let response = self.check_response(response, "publicKeys").await?;
        let keys = response.json::<HashSet<PublicKeyBytes>>().await?;

        debug!("loaded {} validator key(s) from remote signer", keys.len());
        self.credit();

        Ok(keys)
    }

    pub async fn sign(
        &self,
        message: SigningMessage,
        fork_info: Option<ForkInfo>,
        public_key: PublicKeyBytes,
    ) -> Result<SignatureBytes, SignerError> {
        let url = self
            .url
            .join(&format!("/api/v1/eth2/sign/{public_key:?}"))
            .expect("signing path is valid")
            .into_url();

        let request = SigningRequest::new(message, fork_info);
        let message_type = request.message_type_name();

        let response = match self.client.post(url).json(&request).send().await {
            Ok(response) => response,
            Err(error) => {
                self.penalize();
                return Err(error.into());
            }
        };

        let response = self.check_response(response, message_type).await?;
        let signature = response.json::<SigningResponse>().await?.signature;

        self.credit();

        if let Some(metrics) = self.metrics.as_ref() {
            metrics
                .signed_messages
                .with_label_values(&[message_type])
                .inc();
        }

        Ok(signature)
    }

    /// Signs a batch of messages concurrently, preserving input order. Any
    /// failure fails the whole batch; callers decide per duty whether a
    /// partial retry is safe.
    pub async fn sign_batch(
        &self,
        batch: impl IntoIterator<Item = (SigningMessage, PublicKeyBytes)>,
        fork_info: Option<ForkInfo>,
    ) -> Result<Vec<SignatureBytes>, SignerError> {
        let signatures = batch
            .into_iter()
            .enumerate()
            .map(|(index, (message, public_key))| async move {
                self.sign(message, fork_info, public_key)
                    .await
                    .map(|signature| (index, signature))
            })
            .collect::<FuturesUnordered<_>>()
            .try_collect::<Vec<_>>()
            .await?;

        Ok(signatures
            .into_iter()
            .sorted_by_key(|(index, _)| *index)
            .map(|(_, signature)| signature)
            .collect())
    }

    async fn check_response(
        &self,
        response: reqwest::Response,
        context: &str,
    ) -> Result<reqwest::Response, SignerError> {
        let status = response.status();

        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();

        if status.is_client_error() {
            // A refusal is an answer from a healthy signer.
            warn!("remote signer refused request ({context}): {status}");
            return Err(SignerError::Refused { status, body });
        }

        self.penalize();

        Err(SignerError::Unavailable { status, body })
    }

    fn credit(&self) {
        self.adjust_score(SCORE_DELTA_SUCCESS);
    }

    fn penalize(&self) {
        self.adjust_score(-SCORE_DELTA_FAILURE);
    }

    fn adjust_score(&self, delta: i64) {
        let updated = self
            .score
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |score| {
                Some((score + delta).clamp(0, SCORE_MAX))
            })
            .unwrap_or_default();

        if let Some(metrics) = self.metrics.as_ref() {
            metrics.remote_signer_score.set(updated);
        }
    }
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;
    use httpmock::{Method, MockServer};
    use serde_json::json;
    use types::phase0::containers::AttestationData;

    use super::*;

    const SAMPLE_PUBKEY: PublicKeyBytes = PublicKeyBytes(hex!(
        "93247f2209abcacf57b75a51dafae777f9dd38bc7053d1af526f220a7489a6d3\
         a2753e5f3e8b1cfe39b56f43611df74a"
    ));
    const SAMPLE_SIGNATURE: SignatureBytes = SignatureBytes(hex!(
        "b3baa751d0a9132cfe93e4e3d5ff9075111100e3789dca219ade5a24d27e19d1\
         6b3353149da1833e9b691bb38634e8dc04469be7032132906c927d7e1a49b414\
         730612877bc6b2810c8f202daf793d1ab0d6b5cb21d52f9e52e883859887a5d9"
    ));

    fn signer_for(server: &MockServer) -> RemoteSigner {
        let url = server
            .url("/")
            .parse::<RedactingUrl>()
            .expect("mock server URL is valid");

        RemoteSigner::new(Client::new(), url, None)
    }

    #[tokio::test]
    async fn loads_public_keys() {
        let server = MockServer::start();

        server.mock(|when, then| {
            when.method(Method::GET).path("/api/v1/eth2/publicKeys");
            then.status(200).body(json!([SAMPLE_PUBKEY]).to_string());
        });

        let signer = signer_for(&server);
        let keys = signer.load_public_keys().await.expect("keys load");

        assert_eq!(keys, HashSet::from([SAMPLE_PUBKEY]));
        assert_eq!(signer.score(), SCORE_MAX);
    }

    #[tokio::test]
    async fn signs_attestation_data() {
        let server = MockServer::start();

        server.mock(|when, then| {
            when.method(Method::POST)
                .path(format!("/api/v1/eth2/sign/{SAMPLE_PUBKEY:?}"))
                .json_body_partial(r#"{"type": "ATTESTATION"}"#);
            then.status(200)
                .body(json!({ "signature": SAMPLE_SIGNATURE }).to_string());
        });

        let signer = signer_for(&server);

        let signature = signer
            .sign(
                SigningMessage::Attestation(AttestationData::default()),
                None,
                SAMPLE_PUBKEY,
            )
            .await
            .expect("signing succeeds");

        assert_eq!(signature, SAMPLE_SIGNATURE);
    }

    #[tokio::test]
    async fn refusal_is_distinguished_from_unavailability() {
        let server = MockServer::start();

        server.mock(|when, then| {
            when.method(Method::POST)
                .path_contains("/api/v1/eth2/sign/");
            then.status(412);
        });

        let signer = signer_for(&server);
        let score_before = signer.score();

        let error = signer
            .sign(
                SigningMessage::Attestation(AttestationData::default()),
                None,
                SAMPLE_PUBKEY,
            )
            .await
            .expect_err("a refusal is an error");

        assert!(matches!(error, SignerError::Refused { .. }));
        // Refusals are answers, not signer failures.
        assert_eq!(signer.score(), score_before);
    }

    #[tokio::test]
    async fn server_errors_decrease_the_score() {
        let server = MockServer::start();

        server.mock(|when, then| {
            when.method(Method::GET).path("/api/v1/eth2/publicKeys");
            then.status(500);
        });

        let signer = signer_for(&server);

        signer
            .load_public_keys()
            .await
            .expect_err("a 500 is an error");

        assert_eq!(signer.score(), SCORE_MAX - SCORE_DELTA_FAILURE);
    }
}
