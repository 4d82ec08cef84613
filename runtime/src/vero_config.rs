use core::net::IpAddr;
use std::{path::PathBuf, sync::Arc};

use metrics::MetricsServerConfig;
use types::{config::Config as ChainConfig, redacting_url::RedactingUrl};
use validator::ValidatorConfig;

#[derive(Clone, Debug)]
pub struct VeroConfig {
    pub chain_config: Arc<ChainConfig>,
    pub beacon_node_urls: Vec<RedactingUrl>,
    pub beacon_node_urls_proposal: Vec<RedactingUrl>,
    pub attestation_consensus_threshold: usize,
    pub remote_signer_url: Option<RedactingUrl>,
    pub validator_config: ValidatorConfig,
    pub data_dir: PathBuf,
    pub enable_doppelganger_detection: bool,
    pub enable_keymanager_api: bool,
    pub keymanager_api_token_file_path: PathBuf,
    pub keymanager_api_address: IpAddr,
    pub keymanager_api_port: u16,
    pub metrics_server_config: MetricsServerConfig,
    pub ignore_spec_mismatch: bool,
    pub disable_slashing_detection: bool,
}
