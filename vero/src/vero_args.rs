use core::net::IpAddr;
use std::{path::PathBuf, sync::Arc};

use anyhow::{ensure, Result};
use clap::{Args, Parser, ValueEnum};
use keymanager::KEYMANAGER_API_TOKEN_FILENAME;
use metrics::MetricsServerConfig;
use thiserror::Error;
use types::{
    config::Config as ChainConfig,
    phase0::primitives::{ExecutionAddress, Graffiti},
    redacting_url::RedactingUrl,
};
use validator::ValidatorConfig;
use vero_version::{APPLICATION_NAME, APPLICATION_VERSION};

use crate::predefined_network::Network;

const DEFAULT_METRICS_PORT: u16 = 8000;
const DEFAULT_KEYMANAGER_API_PORT: u16 = 8001;

#[derive(Debug, Error)]
enum Error {
    #[error("graffiti must be no longer than {} bytes", Graffiti::len_bytes())]
    GraffitiTooLong,
    #[error("invalid fee recipient: {input}")]
    InvalidFeeRecipient { input: String },
    #[error("beacon node URLs must be unique")]
    DuplicateBeaconNodeUrls,
    #[error(
        "invalid value for attestation consensus threshold ({threshold}) \
         with {nodes} beacon node(s)"
    )]
    InvalidThreshold { threshold: usize, nodes: usize },
    #[error("--network custom requires --network-custom-config-path")]
    CustomConfigPathMissing,
    #[error("either --remote-signer-url or --enable-keymanager-api is required")]
    NoKeySource,
}

/// A multi-node validator client for Ethereum and Gnosis Chain.
#[derive(Parser)]
#[clap(display_name = APPLICATION_NAME, version = APPLICATION_VERSION)]
pub struct VeroArgs {
    #[clap(flatten)]
    chain_options: ChainOptions,

    #[clap(flatten)]
    beacon_node_options: BeaconNodeOptions,

    #[clap(flatten)]
    validator_options: ValidatorOptions,

    #[clap(flatten)]
    keymanager_options: KeymanagerOptions,

    #[clap(flatten)]
    observability_options: ObservabilityOptions,
}

#[derive(Args)]
struct ChainOptions {
    /// Name of the network to connect to
    #[clap(long, value_enum, default_value_t = Network::Mainnet)]
    network: Network,

    /// Load network constants from YAML_FILE instead of a predefined network
    #[clap(long, value_name = "YAML_FILE")]
    network_custom_config_path: Option<PathBuf>,
}

#[derive(Args)]
struct BeaconNodeOptions {
    /// Comma-separated list of beacon node URLs
    #[clap(long, value_delimiter = ',', required = true)]
    beacon_node_urls: Vec<RedactingUrl>,

    /// Comma-separated list of beacon node URLs to use for block proposals
    /// only
    #[clap(long, value_delimiter = ',')]
    beacon_node_urls_proposal: Vec<RedactingUrl>,

    /// How many beacon nodes must agree on attestation data before it is
    /// signed. Defaults to a majority of the connected beacon nodes.
    #[clap(long)]
    attestation_consensus_threshold: Option<usize>,

    /// Continue even when a beacon node reports network constants that
    /// differ from the local configuration
    #[clap(long)]
    ignore_spec_mismatch: bool,
}

#[derive(Args)]
struct ValidatorOptions {
    /// URL of the remote signer holding the validator keys
    #[clap(long, conflicts_with = "enable_keymanager_api")]
    remote_signer_url: Option<RedactingUrl>,

    /// Default fee recipient address
    #[clap(long, value_parser = parse_fee_recipient, required = true)]
    fee_recipient: ExecutionAddress,

    /// Default graffiti
    #[clap(long, value_parser = parse_graffiti)]
    graffiti: Option<Graffiti>,

    /// Default gas limit advertised in builder registrations. Defaults to a
    /// per-network value.
    #[clap(long)]
    gas_limit: Option<u64>,

    /// Register validators with external builders and accept
    /// externally-built blocks
    #[clap(long)]
    use_external_builder: bool,

    /// Percentage weight applied to externally-built block values when
    /// comparing them against locally-built blocks
    #[clap(long, default_value_t = 90)]
    builder_boost_factor: u64,

    /// Refuse to start duties until no other instance of the managed
    /// validators has been observed for two epochs
    #[clap(long)]
    enable_doppelganger_detection: bool,

    /// Directory for persisted state
    #[clap(long, default_value = "/vero/data")]
    data_dir: PathBuf,

    /// Keep signing even if a managed validator is slashed. This switch
    /// removes the last line of defense against slashing; its name is
    /// intentionally hard to type.
    #[clap(long = "----DANGER----disable-slashing-detection")]
    danger_disable_slashing_detection: bool,
}

#[derive(Args)]
struct KeymanagerOptions {
    /// Enable the Keymanager API and source validator keys from its
    /// persisted remote key registry
    #[clap(long)]
    enable_keymanager_api: bool,

    /// Path of the Keymanager API bearer token file. Defaults to
    /// `<data-dir>/keymanager-api-token.txt`.
    #[clap(long)]
    keymanager_api_token_file_path: Option<PathBuf>,

    /// Address for the Keymanager API to listen on
    #[clap(long, default_value = "127.0.0.1")]
    keymanager_api_address: IpAddr,

    /// Port for the Keymanager API to listen on
    #[clap(long, default_value_t = DEFAULT_KEYMANAGER_API_PORT)]
    keymanager_api_port: u16,
}

#[derive(Args)]
struct ObservabilityOptions {
    /// Address for the metrics server to listen on
    #[clap(long, default_value = "127.0.0.1")]
    metrics_address: IpAddr,

    /// Port for the metrics server to listen on
    #[clap(long, default_value_t = DEFAULT_METRICS_PORT)]
    metrics_port: u16,

    /// Logging verbosity
    #[clap(long, value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, ValueEnum)]
#[clap(rename_all = "lowercase")]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => Self::Error,
            LogLevel::Warn => Self::Warn,
            LogLevel::Info => Self::Info,
            LogLevel::Debug => Self::Debug,
            LogLevel::Trace => Self::Trace,
        }
    }
}

impl VeroArgs {
    #[must_use]
    pub fn log_level(&self) -> log::LevelFilter {
        self.observability_options.log_level.into()
    }

    pub fn into_config(self) -> Result<runtime::VeroConfig> {
        let Self {
            chain_options,
            beacon_node_options,
            validator_options,
            keymanager_options,
            observability_options,
        } = self;

        let chain_config = match chain_options.network.chain_config() {
            Some(chain_config) => {
                if chain_options.network_custom_config_path.is_some() {
                    log::warn!(
                        "--network-custom-config-path is ignored for predefined network {}",
                        chain_options.network,
                    );
                }
                chain_config
            }
            None => {
                let path = chain_options
                    .network_custom_config_path
                    .ok_or(Error::CustomConfigPathMissing)?;
                ChainConfig::from_yaml_file(path)?
            }
        };

        let beacon_node_urls = beacon_node_options.beacon_node_urls;
        let node_count = beacon_node_urls.len();

        ensure!(
            unique(&beacon_node_urls) && unique(&beacon_node_options.beacon_node_urls_proposal),
            Error::DuplicateBeaconNodeUrls,
        );

        let threshold = beacon_node_options
            .attestation_consensus_threshold
            .unwrap_or(node_count / 2 + 1);

        ensure!(
            (1..=node_count).contains(&threshold),
            Error::InvalidThreshold {
                threshold,
                nodes: node_count,
            },
        );

        ensure!(
            validator_options.remote_signer_url.is_some()
                || keymanager_options.enable_keymanager_api,
            Error::NoKeySource,
        );

        let gas_limit = validator_options
            .gas_limit
            .unwrap_or_else(|| chain_options.network.default_gas_limit());

        let keymanager_api_token_file_path = keymanager_options
            .keymanager_api_token_file_path
            .unwrap_or_else(|| {
                validator_options
                    .data_dir
                    .join(KEYMANAGER_API_TOKEN_FILENAME)
            });

        Ok(runtime::VeroConfig {
            chain_config: Arc::new(chain_config),
            beacon_node_urls,
            beacon_node_urls_proposal: beacon_node_options.beacon_node_urls_proposal,
            attestation_consensus_threshold: threshold,
            remote_signer_url: validator_options.remote_signer_url,
            validator_config: ValidatorConfig {
                fee_recipient: validator_options.fee_recipient,
                graffiti: validator_options.graffiti,
                gas_limit,
                use_external_builder: validator_options.use_external_builder,
                builder_boost_factor: validator_options.builder_boost_factor,
            },
            data_dir: validator_options.data_dir,
            enable_doppelganger_detection: validator_options.enable_doppelganger_detection,
            enable_keymanager_api: keymanager_options.enable_keymanager_api,
            keymanager_api_token_file_path,
            keymanager_api_address: keymanager_options.keymanager_api_address,
            keymanager_api_port: keymanager_options.keymanager_api_port,
            metrics_server_config: MetricsServerConfig {
                metrics_address: observability_options.metrics_address,
                metrics_port: observability_options.metrics_port,
            },
            ignore_spec_mismatch: beacon_node_options.ignore_spec_mismatch,
            disable_slashing_detection: validator_options.danger_disable_slashing_detection,
        })
    }
}

fn parse_graffiti(string: &str) -> Result<Graffiti> {
    ensure!(string.len() <= Graffiti::len_bytes(), Error::GraffitiTooLong);

    let mut graffiti = Graffiti::zero();
    graffiti[..string.len()].copy_from_slice(string.as_bytes());

    Ok(graffiti)
}

fn parse_fee_recipient(string: &str) -> Result<ExecutionAddress> {
    let digits = string
        .strip_prefix("0x")
        .ok_or_else(|| Error::InvalidFeeRecipient {
            input: string.to_owned(),
        })?;

    ensure!(
        digits.len() == 2 * ExecutionAddress::len_bytes(),
        Error::InvalidFeeRecipient {
            input: string.to_owned(),
        },
    );

    digits
        .parse()
        .map_err(|_| {
            Error::InvalidFeeRecipient {
                input: string.to_owned(),
            }
            .into()
        })
}

fn unique(urls: &[RedactingUrl]) -> bool {
    let mut seen = std::collections::HashSet::new();
    urls.iter().all(|url| seen.insert(url))
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory as _;
    use test_case::test_case;

    use super::*;

    fn parse(extra: &[&str]) -> Result<runtime::VeroConfig> {
        let base = [
            "vero",
            "--beacon-node-urls",
            "http://bn-1:5052,http://bn-2:5052,http://bn-3:5052",
            "--remote-signer-url",
            "http://signer:9000",
            "--fee-recipient",
            "0x0000000000000000000000000000000000000001",
        ];

        let args = VeroArgs::try_parse_from(base.iter().copied().chain(extra.iter().copied()))?;
        args.into_config()
    }

    #[test]
    fn command_is_well_formed() {
        VeroArgs::command().debug_assert();
    }

    #[test]
    fn threshold_defaults_to_a_majority() -> Result<()> {
        let config = parse(&[])?;

        assert_eq!(config.attestation_consensus_threshold, 2);

        Ok(())
    }

    #[test_case(&["--attestation-consensus-threshold", "1"] => 1)]
    #[test_case(&["--attestation-consensus-threshold", "3"] => 3)]
    fn explicit_threshold_is_respected(extra: &[&str]) -> usize {
        parse(extra)
            .expect("arguments are valid")
            .attestation_consensus_threshold
    }

    #[test]
    fn threshold_above_node_count_is_rejected() {
        parse(&["--attestation-consensus-threshold", "4"])
            .expect_err("threshold cannot exceed the node count");
        parse(&["--attestation-consensus-threshold", "0"])
            .expect_err("threshold must be at least one");
    }

    #[test]
    fn duplicate_beacon_node_urls_are_rejected() {
        let result = VeroArgs::try_parse_from([
            "vero",
            "--beacon-node-urls",
            "http://bn-1:5052,http://bn-1:5052",
            "--remote-signer-url",
            "http://signer:9000",
            "--fee-recipient",
            "0x0000000000000000000000000000000000000001",
        ])
        .expect("arguments parse")
        .into_config();

        result.expect_err("duplicate URLs are rejected");
    }

    #[test]
    fn remote_signer_conflicts_with_keymanager_mode() {
        VeroArgs::try_parse_from([
            "vero",
            "--beacon-node-urls",
            "http://bn-1:5052",
            "--remote-signer-url",
            "http://signer:9000",
            "--enable-keymanager-api",
            "--fee-recipient",
            "0x0000000000000000000000000000000000000001",
        ])
        .expect_err("the two key sources are mutually exclusive");
    }

    #[test]
    fn graffiti_is_zero_padded() -> Result<()> {
        let config = parse(&["--graffiti", "vero"])?;
        let graffiti = config.validator_config.graffiti.expect("graffiti is set");

        assert_eq!(&graffiti[..4], b"vero");
        assert_eq!(&graffiti[4..], [0; 28]);

        Ok(())
    }

    #[test]
    fn overlong_graffiti_is_rejected() {
        parse(&["--graffiti", "a graffiti that is way too long to fit"])
            .expect_err("graffiti must fit in 32 bytes");
    }

    #[test_case("0x1234" ; "too short")]
    #[test_case("no-prefix" ; "missing prefix")]
    #[test_case("0xzz00000000000000000000000000000000000000" ; "not hex")]
    fn malformed_fee_recipients_are_rejected(input: &str) {
        parse_fee_recipient(input).expect_err("fee recipient must be 20 bytes of prefixed hex");
    }

    #[test]
    fn gas_limit_defaults_per_network() -> Result<()> {
        let mainnet = parse(&[])?;
        let gnosis = parse(&["--network", "gnosis"])?;

        assert_eq!(mainnet.validator_config.gas_limit, 45_000_000);
        assert_eq!(gnosis.validator_config.gas_limit, 17_000_000);

        Ok(())
    }

    #[test]
    fn custom_network_requires_a_config_path() {
        parse(&["--network", "custom"]).expect_err("custom networks need a config file");
    }

    #[test]
    fn keymanager_token_path_defaults_into_the_data_dir() -> Result<()> {
        let config = VeroArgs::try_parse_from([
            "vero",
            "--beacon-node-urls",
            "http://bn-1:5052",
            "--enable-keymanager-api",
            "--fee-recipient",
            "0x0000000000000000000000000000000000000001",
            "--data-dir",
            "/tmp/vero-test",
        ])
        .expect("arguments parse")
        .into_config()?;

        assert_eq!(
            config.keymanager_api_token_file_path,
            PathBuf::from("/tmp/vero-test").join(KEYMANAGER_API_TOKEN_FILENAME),
        );

        Ok(())
    }
}
