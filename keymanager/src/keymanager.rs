//! The Keymanager API's effects on the validator set.
//!
//! The HTTP surface lives elsewhere; everything here is what those endpoints
//! do to the process: remote key CRUD backed by the persisted registry,
//! per-validator overrides, and one-shot voluntary exit signing. Keys added
//! at runtime skip doppelganger protection for this process lifetime; the
//! guard sees them on the next startup.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use log::info;
use signer::{ForkInfo, RemoteSigner, SigningMessage};
use types::{
    config::Config,
    phase0::{
        containers::{SignedVoluntaryExit, VoluntaryExit},
        primitives::{Epoch, ExecutionAddress, Graffiti, UnixSeconds, H256},
    },
    PublicKeyBytes,
};
use validator_registry::ValidatorRegistry;

use crate::{
    misc::{OperationStatus, Status, ValidatingPubkey},
    remote_keys::{RemoteKeyEntry, RemoteKeys},
};

pub struct KeyManager {
    registry: Arc<ValidatorRegistry>,
    remote_keys: RemoteKeys,
    remote_signer: Arc<RemoteSigner>,
    config: Arc<Config>,
    genesis_time: UnixSeconds,
    genesis_validators_root: H256,
}

impl KeyManager {
    pub fn new(
        registry: Arc<ValidatorRegistry>,
        remote_keys: RemoteKeys,
        remote_signer: Arc<RemoteSigner>,
        config: Arc<Config>,
        genesis_time: UnixSeconds,
        genesis_validators_root: H256,
    ) -> Result<Self> {
        // Persisted keys become managed validators immediately on startup.
        for entry in remote_keys.list() {
            registry.append_key(entry.pubkey).ok();
        }

        Ok(Self {
            registry,
            remote_keys,
            remote_signer,
            config,
            genesis_time,
            genesis_validators_root,
        })
    }

    #[must_use]
    pub fn list_remote_keys(&self) -> Vec<ValidatingPubkey> {
        self.remote_keys
            .list()
            .into_iter()
            .map(|entry| ValidatingPubkey {
                pubkey: entry.pubkey,
                url: entry.url,
                readonly: false,
            })
            .collect()
    }

    pub fn import_remote_keys(
        &self,
        entries: Vec<RemoteKeyEntry>,
    ) -> Vec<OperationStatus> {
        entries
            .into_iter()
            .map(|entry| {
                let pubkey = entry.pubkey;

                match self.remote_keys.import(entry) {
                    Ok(true) => match self.registry.append_key(pubkey) {
                        Ok(()) => {
                            info!("imported remote key {pubkey:?}");
                            Status::Imported.into()
                        }
                        Err(error) => error.into(),
                    },
                    Ok(false) => OperationStatus {
                        status: Status::Error,
                        message: Some("key already exists".to_owned()),
                    },
                    Err(error) => error.into(),
                }
            })
            .collect()
    }

    pub fn delete_remote_keys(&self, pubkeys: Vec<PublicKeyBytes>) -> Vec<OperationStatus> {
        pubkeys
            .into_iter()
            .map(|pubkey| match self.remote_keys.delete(pubkey) {
                Ok(true) => {
                    self.registry.delete_key(pubkey).ok();
                    info!("deleted remote key {pubkey:?}");
                    Status::Deleted.into()
                }
                Ok(false) => Status::NotFound.into(),
                Err(error) => error.into(),
            })
            .collect()
    }

    pub fn set_fee_recipient(
        &self,
        pubkey: PublicKeyBytes,
        fee_recipient: Option<ExecutionAddress>,
    ) -> OperationStatus {
        match self.registry.set_fee_recipient(pubkey, fee_recipient) {
            Ok(()) => Status::Imported.into(),
            Err(error) => error.into(),
        }
    }

    pub fn set_graffiti(
        &self,
        pubkey: PublicKeyBytes,
        graffiti: Option<Graffiti>,
    ) -> OperationStatus {
        match self.registry.set_graffiti(pubkey, graffiti) {
            Ok(()) => Status::Imported.into(),
            Err(error) => error.into(),
        }
    }

    pub fn set_gas_limit(&self, pubkey: PublicKeyBytes, gas_limit: Option<u64>) -> OperationStatus {
        match self.registry.set_gas_limit(pubkey, gas_limit) {
            Ok(()) => Status::Imported.into(),
            Err(error) => error.into(),
        }
    }

    /// Produces a signed voluntary exit for the caller to inspect and
    /// broadcast. The exit is never published by this process.
    pub async fn sign_voluntary_exit(
        &self,
        pubkey: PublicKeyBytes,
        epoch: Option<Epoch>,
    ) -> Result<SignedVoluntaryExit> {
        let snapshot = self.registry.load();

        let validator = snapshot
            .get(pubkey)
            .ok_or_else(|| anyhow!("validator {pubkey:?} is not managed by this process"))?;

        let validator_index = validator
            .index
            .ok_or_else(|| anyhow!("validator {pubkey:?} has no index on chain yet"))?;

        let epoch = epoch.unwrap_or_else(|| self.current_epoch());

        let message = VoluntaryExit {
            epoch,
            validator_index,
        };

        let fork_info = ForkInfo {
            fork: self.config.fork_at_epoch(epoch),
            genesis_validators_root: self.genesis_validators_root,
        };

        let signature = self
            .remote_signer
            .sign(SigningMessage::VoluntaryExit(message), Some(fork_info), pubkey)
            .await?;

        Ok(SignedVoluntaryExit { message, signature })
    }

    fn current_epoch(&self) -> Epoch {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        self.config
            .epoch_of(self.config.slot_at_time(now, self.genesis_time))
    }
}
