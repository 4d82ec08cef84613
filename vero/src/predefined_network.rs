use clap::ValueEnum;
use strum::Display;
use types::config::Config as ChainConfig;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Display, ValueEnum)]
#[strum(serialize_all = "lowercase")]
#[clap(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Gnosis,
    Holesky,
    Hoodi,
    Chiado,
    Custom,
}

impl Network {
    #[must_use]
    pub fn chain_config(self) -> Option<ChainConfig> {
        match self {
            Self::Mainnet => Some(ChainConfig::mainnet()),
            Self::Gnosis => Some(ChainConfig::gnosis()),
            Self::Holesky => Some(ChainConfig::holesky()),
            Self::Hoodi => Some(ChainConfig::hoodi()),
            Self::Chiado => Some(ChainConfig::chiado()),
            Self::Custom => None,
        }
    }

    /// Default block gas limit advertised in builder registrations.
    #[must_use]
    pub const fn default_gas_limit(self) -> u64 {
        match self {
            Self::Mainnet => 45_000_000,
            Self::Gnosis | Self::Chiado => 17_000_000,
            Self::Holesky | Self::Hoodi => 60_000_000,
            Self::Custom => 100_000_000,
        }
    }
}
