//! Service wiring and supervision.
//!
//! Builds every component from the parsed configuration, runs them under one
//! `select!`, and turns SIGINT/SIGTERM into the deferred-shutdown path of
//! the duty scheduler.

use core::time::Duration;
use std::sync::Arc;

use anyhow::{anyhow, ensure, Context as _, Result};
use beacon_api::BeaconNode;
use doppelganger_protection::DoppelgangerProtection;
use keymanager::{KeyManager, RemoteKeys};
use log::{info, warn};
use metrics::run_metrics_server;
use multi_beacon_node::{EventPipeline, MultiBeaconNode};
use prometheus_metrics::{Metrics, METRICS};
use signer::RemoteSigner;
use thiserror::Error;
use tokio::{select, sync::watch};
use validator::Validator;
use validator_registry::ValidatorRegistry;

use crate::vero_config::VeroConfig;

const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
const HTTP_TOTAL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum Error {
    /// Mapped to a dedicated exit code so orchestration can tell a detected
    /// doppelganger apart from ordinary startup failures.
    #[error(transparent)]
    DoppelgangerDetected(doppelganger_protection::Error),
}

pub fn run(config: VeroConfig) -> Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run_services(config))
}

async fn run_services(config: VeroConfig) -> Result<()> {
    let metrics = initialize_metrics()?;

    // The metrics endpoint comes up before anything that can take a while
    // (initialization, doppelganger detection) so the process is observable
    // from the start.
    let mut metrics_server = tokio::spawn(run_metrics_server(config.metrics_server_config));

    let client = reqwest::Client::builder()
        .connect_timeout(HTTP_CONNECT_TIMEOUT)
        .timeout(HTTP_TOTAL_TIMEOUT)
        .user_agent(vero_version::user_agent())
        .build()?;

    let beacon_nodes = config
        .beacon_node_urls
        .iter()
        .cloned()
        .map(|url| {
            BeaconNode::new(
                client.clone(),
                url,
                config.chain_config.clone(),
                Some(metrics.clone()),
            )
            .map(Arc::new)
        })
        .collect::<Result<Vec<_>>>()?;

    let beacon_nodes_proposal = config
        .beacon_node_urls_proposal
        .iter()
        .cloned()
        .map(|url| {
            BeaconNode::new(
                client.clone(),
                url,
                config.chain_config.clone(),
                Some(metrics.clone()),
            )
            .map(Arc::new)
        })
        .collect::<Result<Vec<_>>>()?;

    let multi_beacon_node = Arc::new(MultiBeaconNode::new(
        beacon_nodes,
        beacon_nodes_proposal,
        config.attestation_consensus_threshold,
        config.chain_config.clone(),
        Some(metrics.clone()),
    ));

    multi_beacon_node
        .initialize(config.ignore_spec_mismatch)
        .await?;

    let genesis = multi_beacon_node.genesis();

    info!(
        "connected to {} (genesis time {})",
        config.chain_config.config_name, genesis.genesis_time,
    );

    // In Keymanager mode the managed keys come from the persisted remote key
    // registry; otherwise the remote signer's key list is authoritative.
    let remote_keys = config
        .enable_keymanager_api
        .then(|| RemoteKeys::load_or_create(config.data_dir.clone()))
        .transpose()?;

    let signer_url = match (&config.remote_signer_url, &remote_keys) {
        (Some(url), _) => url.clone(),
        (None, Some(remote_keys)) => {
            let urls = remote_keys
                .list()
                .into_iter()
                .map(|entry| entry.url)
                .collect::<std::collections::BTreeSet<_>>();

            ensure!(
                urls.len() == 1,
                "the remote key registry must contain keys from exactly one signer \
                 (found {})",
                urls.len(),
            );

            urls.into_iter()
                .next()
                .expect("the set contains exactly one URL")
                .parse()
                .context("persisted remote signer URL is invalid")?
        }
        (None, None) => {
            return Err(anyhow!(
                "either --remote-signer-url or --enable-keymanager-api is required",
            ))
        }
    };

    let remote_signer = Arc::new(RemoteSigner::new(
        client.clone(),
        signer_url,
        Some(metrics.clone()),
    ));

    remote_signer
        .upcheck()
        .await
        .context("remote signer upcheck failed")?;

    let managed_keys = match &remote_keys {
        Some(remote_keys) => remote_keys
            .list()
            .into_iter()
            .map(|entry| entry.pubkey)
            .collect::<Vec<_>>(),
        None => remote_signer
            .load_public_keys()
            .await
            .context("failed to load validator keys from the remote signer")?
            .into_iter()
            .collect(),
    };

    ensure!(
        !managed_keys.is_empty(),
        "no validator keys to perform duties for",
    );

    info!("managing {} validator key(s)", managed_keys.len());

    let registry = Arc::new(ValidatorRegistry::new(
        managed_keys,
        !config.disable_slashing_detection,
        Some(metrics.clone()),
    ));

    let _keymanager = remote_keys
        .map(|remote_keys| {
            let token_path = &config.keymanager_api_token_file_path;
            let _token = keymanager::load_or_generate_api_token(token_path)?;

            KeyManager::new(
                registry.clone(),
                remote_keys,
                remote_signer.clone(),
                config.chain_config.clone(),
                genesis.genesis_time,
                genesis.genesis_validators_root,
            )
        })
        .transpose()?;

    // Without statuses there are no duties to compute; this must succeed
    // before anything else starts.
    validator_registry::refresh_statuses(&registry, &multi_beacon_node).await?;

    if config.enable_doppelganger_detection {
        let protection = DoppelgangerProtection::new(
            multi_beacon_node.clone(),
            registry.clone(),
            genesis.genesis_time,
        );

        protection.detect().await.map_err(|error| {
            match error.downcast::<doppelganger_protection::Error>() {
                Ok(detected) => Error::DoppelgangerDetected(detected).into(),
                Err(other) => other,
            }
        })?;
    }

    let event_pipeline = EventPipeline::new(
        multi_beacon_node.beacon_nodes(),
        config.chain_config.clone(),
        Some(metrics.clone()),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(listen_for_shutdown_signals(shutdown_tx));

    let validator = Validator::new(
        multi_beacon_node.clone(),
        remote_signer,
        registry.clone(),
        Arc::new(config.validator_config),
        event_pipeline,
        genesis.genesis_time,
        genesis.genesis_validators_root,
        Some(metrics),
        shutdown_rx,
    );

    select! {
        result = validator.run() => result,
        result = &mut metrics_server => result?,
        result = validator_registry::run_status_tracker(
            registry,
            multi_beacon_node.clone(),
        ) => result,
        result = multi_beacon_node.clone().run_reinitializer() => result,
    }
}

fn initialize_metrics() -> Result<Arc<Metrics>> {
    let metrics = Arc::new(Metrics::new()?);

    metrics.register_with_default_metrics()?;
    metrics.slashing_detected.set(0);

    METRICS
        .set(metrics.clone())
        .map_err(|_| anyhow!("metrics are already initialized"))?;

    Ok(metrics)
}

async fn listen_for_shutdown_signals(shutdown_tx: watch::Sender<bool>) {
    let sigint = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(
            tokio::signal::unix::SignalKind::terminate(),
        ) {
            Ok(sigterm) => sigterm,
            Err(error) => {
                warn!("failed to install the SIGTERM handler: {error}");
                let _ = sigint.await;
                let _ = shutdown_tx.send(true);
                return;
            }
        };

        select! {
            _ = sigint => info!("received SIGINT"),
            _ = sigterm.recv() => info!("received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = sigint.await;
        info!("received interrupt signal");
    }

    let _ = shutdown_tx.send(true);
}
