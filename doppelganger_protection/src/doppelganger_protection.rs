//! Startup doppelganger detection.
//!
//! Before any duty is performed, the liveness of every managed validator is
//! observed for a full epoch plus the inclusion tail of the following one.
//! A validator reported live during that window is signing somewhere else;
//! starting duties would produce slashable messages, so the process refuses
//! to start instead.

use core::time::Duration;
use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use anyhow::{Context as _, Result};
use beacon_api::ValidatorLiveness;
use log::{debug, info};
use multi_beacon_node::MultiBeaconNode;
use types::{
    config::Config,
    phase0::primitives::{Epoch, Slot, UnixSeconds, ValidatorIndex},
};
use validator_registry::ValidatorRegistry;

use crate::error::Error;

pub struct DoppelgangerProtection {
    multi_beacon_node: Arc<MultiBeaconNode>,
    registry: Arc<ValidatorRegistry>,
    config: Arc<Config>,
    genesis_time: UnixSeconds,
}

impl DoppelgangerProtection {
    #[must_use]
    pub fn new(
        multi_beacon_node: Arc<MultiBeaconNode>,
        registry: Arc<ValidatorRegistry>,
        genesis_time: UnixSeconds,
    ) -> Self {
        let config = multi_beacon_node.config().clone();

        Self {
            multi_beacon_node,
            registry,
            config,
            genesis_time,
        }
    }

    /// Runs the full detection schedule. Returns only once the process may
    /// safely start performing duties; a detected doppelganger is fatal.
    pub async fn detect(&self) -> Result<()> {
        let indices = self.registry.load().duty_indices();

        if indices.is_empty() {
            info!("no validators with known indices, skipping doppelganger detection");
            return Ok(());
        }

        info!(
            "attempting to detect doppelgangers for {} validators",
            indices.len(),
        );

        // Probe immediately so a beacon node without liveness tracking fails
        // the startup now instead of two epochs from now.
        let current_epoch = self.current_epoch();
        self.fetch_liveness(current_epoch, indices.clone()).await?;

        let monitored_epoch = current_epoch + 1;

        info!("waiting for monitored epoch {monitored_epoch} to start");
        self.wait_for_epoch(monitored_epoch).await;

        info!("waiting for monitored epoch {monitored_epoch} to finish");
        self.wait_for_epoch(monitored_epoch + 1).await;

        self.check_epoch(monitored_epoch, indices.clone()).await?;

        // Attestations from the monitored epoch may still be included in any
        // slot of the following epoch. Re-check halfway into its last slot,
        // once the last block that could include them has been seen.
        let last_slot_of_next_epoch = self
            .config
            .start_slot_of_epoch(monitored_epoch + 2)
            .saturating_sub(1);

        info!(
            "waiting for the last slot of epoch {}: {last_slot_of_next_epoch}",
            monitored_epoch + 1,
        );
        self.wait_until_slot_midpoint(last_slot_of_next_epoch).await;

        self.check_epoch(monitored_epoch, indices).await?;

        info!("no doppelgangers detected");

        Ok(())
    }

    async fn check_epoch(&self, epoch: Epoch, indices: Vec<ValidatorIndex>) -> Result<()> {
        let liveness = self.fetch_liveness(epoch, indices).await?;
        process_liveness_data(&liveness)?;
        debug!("no doppelgangers detected in epoch {epoch}");
        Ok(())
    }

    async fn fetch_liveness(
        &self,
        epoch: Epoch,
        indices: Vec<ValidatorIndex>,
    ) -> Result<Vec<ValidatorLiveness>> {
        self.multi_beacon_node
            .get_liveness(epoch, indices)
            .await
            .context(
                "failed to query beacon nodes for liveness data - \
                 is liveness tracking enabled on them?",
            )
    }

    fn current_epoch(&self) -> Epoch {
        let now = unix_time_now();
        self.config
            .epoch_of(self.config.slot_at_time(now, self.genesis_time))
    }

    async fn wait_for_epoch(&self, epoch: Epoch) {
        let start = self
            .config
            .start_of_slot(self.config.start_slot_of_epoch(epoch), self.genesis_time);

        sleep_until_unix_time(start, Duration::ZERO).await;
    }

    async fn wait_until_slot_midpoint(&self, slot: Slot) {
        let start = self.config.start_of_slot(slot, self.genesis_time);
        sleep_until_unix_time(start, self.config.slot_duration() / 2).await;
    }
}

fn process_liveness_data(liveness: &[ValidatorLiveness]) -> Result<(), Error> {
    let indices = liveness
        .iter()
        .filter(|validator| validator.is_live)
        .map(|validator| validator.index)
        .collect::<Vec<_>>();

    if indices.is_empty() {
        return Ok(());
    }

    Err(Error::DoppelgangersDetected { indices })
}

fn unix_time_now() -> UnixSeconds {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

async fn sleep_until_unix_time(time: UnixSeconds, offset: Duration) {
    let target = Duration::from_secs(time) + offset;
    let now = Duration::from_secs(unix_time_now());

    if let Some(remaining) = target.checked_sub(now) {
        tokio::time::sleep(remaining).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const fn liveness(index: ValidatorIndex, is_live: bool) -> ValidatorLiveness {
        ValidatorLiveness { index, is_live }
    }

    #[test]
    fn all_dead_passes() {
        let data = [liveness(1, false), liveness(2, false)];

        assert_eq!(process_liveness_data(&data), Ok(()));
    }

    #[test]
    fn any_live_validator_is_fatal() {
        let data = [liveness(1, false), liveness(2, true), liveness(3, true)];

        assert_eq!(
            process_liveness_data(&data),
            Err(Error::DoppelgangersDetected {
                indices: vec![2, 3],
            }),
        );
    }

    #[test]
    fn empty_liveness_data_passes() {
        assert_eq!(process_liveness_data(&[]), Ok(()));
    }
}
