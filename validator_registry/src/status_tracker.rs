//! Periodic validator status refresh and the slashing-status interlock.
//!
//! Statuses refresh one slot before every epoch boundary so duties for the
//! next epoch are computed against fresh indices. A tighter loop re-checks
//! every four slots purely for `*_slashed` statuses; SSE slashing events can
//! be missed during reconnects, the poll cannot.

use core::time::Duration;
use std::sync::Arc;

use anyhow::Result;
use log::{debug, warn};
use multi_beacon_node::MultiBeaconNode;
use tokio::time::sleep;

use crate::registry::ValidatorRegistry;

const REFRESH_RETRY_INITIAL: Duration = Duration::from_secs(1);
const REFRESH_RETRY_MAX: Duration = Duration::from_secs(10);

const SLASHING_POLL_INTERVAL_SLOTS: u32 = 4;

/// Fetches chain-side indices and statuses for every managed key and applies
/// them to the registry. Retries with backoff until it succeeds.
pub async fn refresh_statuses(
    registry: &ValidatorRegistry,
    multi_beacon_node: &MultiBeaconNode,
) -> Result<()> {
    let mut delay = REFRESH_RETRY_INITIAL;

    loop {
        match try_refresh_statuses(registry, multi_beacon_node).await {
            Ok(()) => return Ok(()),
            Err(error) => {
                warn!("failed to update validator statuses: {error}");
                sleep(delay).await;
                delay = (delay * 2).min(REFRESH_RETRY_MAX);
            }
        }
    }
}

/// A single refresh attempt without retries, for callers that cannot wait.
pub async fn try_refresh_statuses(
    registry: &ValidatorRegistry,
    multi_beacon_node: &MultiBeaconNode,
) -> Result<()> {
    let public_keys = registry.load().keys().copied().collect::<Vec<_>>();

    if public_keys.is_empty() {
        warn!("no validator keys to update statuses for");
        return Ok(());
    }

    debug!("updating statuses for {} validators", public_keys.len());

    let infos = multi_beacon_node.get_validators(public_keys, vec![]).await?;

    registry.apply_chain_info(&infos);

    if !registry.load().any_active_or_pending() {
        warn!("no active or pending validators detected");
    }

    Ok(())
}

/// Re-fetches statuses every few slots so a slashing inflicted while the
/// event streams were down still latches the safety flag.
pub async fn run_status_tracker(
    registry: Arc<ValidatorRegistry>,
    multi_beacon_node: Arc<MultiBeaconNode>,
) -> Result<()> {
    let poll_interval =
        multi_beacon_node.config().slot_duration() * SLASHING_POLL_INTERVAL_SLOTS;

    loop {
        sleep(poll_interval).await;

        if registry.slashing_detected() {
            // The latch never clears; there is nothing left to detect.
            return Ok(());
        }

        if let Err(error) = try_refresh_statuses(&registry, &multi_beacon_node).await {
            warn!("slashing detection poll failed: {error}");
        }
    }
}
