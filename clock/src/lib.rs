//! A [`Stream`]-based timer anchored to the chain's genesis time.
//!
//! Built on [`tokio::time::interval_at`]. [`Interval`] hands out items late
//! rather than dropping them and the delays do not accumulate, which is the
//! behavior duty scheduling wants: a busy slot must not shift every
//! subsequent deadline.
//!
//! Each slot is divided into twelve ticks. Duties fire on the tick opening
//! each third of the slot (proposal at 0, attestation at 1/3, aggregation at
//! 2/3); the finer subdivision exists so lateness can be measured and so
//! consumers can wake up between duties without a second timer.
//!
//! [`Interval`]: tokio::time::Interval

use core::time::Duration;
use std::time::{Instant, SystemTime};

use anyhow::Result;
use enum_iterator::Sequence;
use futures::stream::{Stream, StreamExt as _, TryStreamExt as _};
use strum::AsRefStr;
use thiserror::Error;
use tokio_stream::wrappers::IntervalStream;
use types::{
    config::Config,
    phase0::{
        consts::GENESIS_SLOT,
        primitives::{Epoch, Slot, UnixSeconds},
    },
};

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Tick {
    pub slot: Slot,
    pub kind: TickKind,
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Sequence, AsRefStr)]
pub enum TickKind {
    Propose,
    ProposeSecond,
    ProposeThird,
    ProposeFourth,
    Attest,
    AttestSecond,
    AttestThird,
    AttestFourth,
    Aggregate,
    AggregateSecond,
    AggregateThird,
    AggregateFourth,
}

impl Tick {
    #[must_use]
    pub const fn start_of_slot(slot: Slot) -> Self {
        Self::new(slot, TickKind::Propose)
    }

    pub fn current(config: &Config, genesis_time: UnixSeconds) -> Result<Self> {
        let since_unix_epoch = SystemTime::now().duration_since(SystemTime::UNIX_EPOCH)?;
        let since_genesis =
            since_unix_epoch.saturating_sub(Duration::from_secs(genesis_time));

        Ok(Self::at_duration_since_genesis(config, since_genesis))
    }

    #[must_use]
    pub fn epoch(self, config: &Config) -> Epoch {
        config.epoch_of(self.slot)
    }

    #[must_use]
    pub const fn is_start_of_slot(self) -> bool {
        matches!(self.kind, TickKind::Propose)
    }

    #[must_use]
    pub fn is_start_of_epoch(self, config: &Config) -> bool {
        self.is_start_of_slot() && config.is_epoch_start(self.slot)
    }

    /// The 1/3-of-slot deadline. Attestation duties not triggered by a head
    /// event fire here.
    #[must_use]
    pub const fn is_attestation_deadline(self) -> bool {
        matches!(self.kind, TickKind::Attest)
    }

    /// The 2/3-of-slot deadline for aggregates and sync contributions.
    #[must_use]
    pub const fn is_aggregation_deadline(self) -> bool {
        matches!(self.kind, TickKind::Aggregate)
    }

    #[must_use]
    pub const fn is_duty_tick(self) -> bool {
        matches!(
            self.kind,
            TickKind::Propose | TickKind::Attest | TickKind::Aggregate,
        )
    }

    /// How far into its slot this tick is.
    #[must_use]
    pub fn offset_in_slot(self, config: &Config) -> Duration {
        tick_duration(config) * self.kind as u32
    }

    fn at_duration_since_genesis(config: &Config, since_genesis: Duration) -> Self {
        // `Duration` does not implement `Div<Duration>`, so do the arithmetic
        // on nanoseconds.
        let nanos_per_tick = tick_duration(config).as_nanos().max(1);
        let ticks_per_slot = TickKind::CARDINALITY as u128;

        let ticks_since_genesis = since_genesis.as_nanos() / nanos_per_tick;
        let slot = GENESIS_SLOT + (ticks_since_genesis / ticks_per_slot) as Slot;
        let tick_in_slot = (ticks_since_genesis % ticks_per_slot) as usize;

        let kind = enum_iterator::all::<TickKind>()
            .nth(tick_in_slot)
            .expect("remainder is less than the tick count");

        Self::new(slot, kind)
    }

    const fn new(slot: Slot, kind: TickKind) -> Self {
        Self { slot, kind }
    }

    fn next(self) -> Result<Self, ClockError> {
        let Self { slot, kind } = self;

        match kind.next() {
            Some(next_kind) => Ok(Self::new(slot, next_kind)),
            None => {
                let next_slot = slot.checked_add(1).ok_or(ClockError::RanOutOfSlots)?;
                Ok(Self::new(next_slot, TickKind::Propose))
            }
        }
    }
}

#[derive(Debug, Error)]
#[cfg_attr(test, derive(PartialEq, Eq))]
pub enum ClockError {
    #[error("time of next tick overflowed")]
    NextInstantOverflow,
    #[error("ran out of slots")]
    RanOutOfSlots,
}

/// Emits every duty tick from the next one onward. Ticks before genesis are
/// not emitted; the stream starts at the genesis slot in that case.
pub fn ticks(
    config: &Config,
    genesis_time: UnixSeconds,
) -> Result<impl Stream<Item = Result<Tick>>> {
    // The `Instant` and `SystemTime` obtained here are assumed to correspond
    // to the same point in time. The error is negligible next to clock
    // differences between nodes in the network.
    let now_instant = Instant::now();
    let now_system_time = SystemTime::now();

    let (mut next_tick, time_to_next_tick) =
        next_tick_after(config, now_system_time, genesis_time)?;

    let next_instant = now_instant
        .checked_add(time_to_next_tick)
        .ok_or(ClockError::NextInstantOverflow)?;

    let interval = tokio::time::interval_at(next_instant.into(), tick_duration(config));

    Ok(IntervalStream::new(interval)
        .map(move |_| {
            let current_tick = next_tick;
            next_tick = current_tick.next()?;
            Ok(current_tick)
        })
        .try_filter(|tick| core::future::ready(tick.is_duty_tick())))
}

/// The `Instant` at which `numerator / denominator` of `slot` has elapsed.
/// Saturates to now for moments already in the past.
#[must_use]
pub fn instant_of_slot_fraction(
    config: &Config,
    genesis_time: UnixSeconds,
    slot: Slot,
    numerator: u32,
    denominator: u32,
) -> Instant {
    let now_instant = Instant::now();
    let now_system_time = SystemTime::now();

    let target = Duration::from_secs(config.start_of_slot(slot, genesis_time))
        + config.slot_duration() * numerator / denominator.max(1);

    let since_unix_epoch = now_system_time
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default();

    match target.checked_sub(since_unix_epoch) {
        Some(remaining) => now_instant + remaining,
        None => now_instant,
    }
}

/// Time elapsed since the start of `slot`. Zero for slots that have not
/// started yet.
#[must_use]
pub fn time_since_slot_start(
    config: &Config,
    genesis_time: UnixSeconds,
    slot: Slot,
) -> Duration {
    let since_unix_epoch = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default();

    let slot_start = Duration::from_secs(config.start_of_slot(slot, genesis_time));

    since_unix_epoch.saturating_sub(slot_start)
}

fn next_tick_after(
    config: &Config,
    now: SystemTime,
    genesis_time: UnixSeconds,
) -> Result<(Tick, Duration)> {
    let since_unix_epoch = now.duration_since(SystemTime::UNIX_EPOCH)?;
    let unix_epoch_to_genesis = Duration::from_secs(genesis_time);

    if since_unix_epoch <= unix_epoch_to_genesis {
        let tick = Tick::start_of_slot(GENESIS_SLOT);
        return Ok((tick, unix_epoch_to_genesis - since_unix_epoch));
    }

    let since_genesis = since_unix_epoch - unix_epoch_to_genesis;
    let current = Tick::at_duration_since_genesis(config, since_genesis);
    let next = current.next()?;

    let nanos_per_tick = tick_duration(config).as_nanos().max(1);
    let ticks_elapsed = since_genesis.as_nanos() / nanos_per_tick + 1;
    let next_tick_at = Duration::from_nanos(
        (ticks_elapsed * nanos_per_tick)
            .try_into()
            .map_err(|_| ClockError::NextInstantOverflow)?,
    );

    Ok((next, next_tick_at - since_genesis))
}

fn tick_duration(config: &Config) -> Duration {
    let ticks_per_slot =
        u32::try_from(TickKind::CARDINALITY).expect("tick count per slot fits in u32");

    config.slot_duration() / ticks_per_slot
}

#[cfg(test)]
mod tests {
    use core::ops::Add as _;

    use futures::future::FutureExt as _;
    use test_case::test_case;

    use super::*;

    fn tick_at_offset(config: &Config, offset: u64) -> Tick {
        Tick::at_duration_since_genesis(config, Duration::from_secs(offset))
    }

    #[test_case( 0 => Tick::new(0, TickKind::Propose);         "at genesis")]
    #[test_case( 1 => Tick::new(0, TickKind::ProposeSecond);   "1 second in")]
    #[test_case( 3 => Tick::new(0, TickKind::ProposeFourth);   "3 seconds in")]
    #[test_case( 4 => Tick::new(0, TickKind::Attest);          "attestation deadline")]
    #[test_case( 7 => Tick::new(0, TickKind::AttestFourth);    "7 seconds in")]
    #[test_case( 8 => Tick::new(0, TickKind::Aggregate);       "aggregation deadline")]
    #[test_case(11 => Tick::new(0, TickKind::AggregateFourth); "last tick of slot 0")]
    #[test_case(12 => Tick::new(1, TickKind::Propose);         "start of slot 1")]
    #[test_case(25 => Tick::new(2, TickKind::ProposeSecond);   "25 seconds in")]
    fn tick_at_mainnet_offset(offset: u64) -> Tick {
        tick_at_offset(&Config::mainnet(), offset)
    }

    #[test]
    fn duty_ticks_land_on_slot_thirds() {
        let config = Config::mainnet();

        let attest = tick_at_offset(&config, 4);
        let aggregate = tick_at_offset(&config, 8);

        assert!(attest.is_attestation_deadline());
        assert!(aggregate.is_aggregation_deadline());
        assert_eq!(attest.offset_in_slot(&config), Duration::from_secs(4));
        assert_eq!(aggregate.offset_in_slot(&config), Duration::from_secs(8));
    }

    #[test]
    fn epoch_boundaries() {
        let config = Config::mainnet();

        assert!(Tick::start_of_slot(32).is_start_of_epoch(&config));
        assert!(!Tick::start_of_slot(33).is_start_of_epoch(&config));
        assert!(!tick_at_offset(&config, 32 * 12 + 4).is_start_of_epoch(&config));
        assert_eq!(Tick::start_of_slot(32).epoch(&config), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_emit_duty_ticks_only() -> Result<()> {
        let config = Config::mainnet();
        let genesis_time = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)?
            .as_secs()
            .add(1);

        let mut ticks = ticks(&config, genesis_time)?;
        let mut next_tick = || ticks.next().now_or_never().flatten().transpose();

        assert_eq!(next_tick()?, None);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(next_tick()?, Some(Tick::new(0, TickKind::Propose)));
        assert_eq!(next_tick()?, None);

        // The three intermediate propose ticks are filtered out.
        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(next_tick()?, Some(Tick::new(0, TickKind::Attest)));
        assert_eq!(next_tick()?, None);

        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(next_tick()?, Some(Tick::new(0, TickKind::Aggregate)));
        assert_eq!(next_tick()?, None);

        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(next_tick()?, Some(Tick::new(1, TickKind::Propose)));

        Ok(())
    }

    #[test]
    fn next_tick_before_genesis_is_the_genesis_tick() -> Result<()> {
        let config = Config::mainnet();
        let genesis_time = 1_000_000;
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(genesis_time - 30);

        let (tick, delay) = next_tick_after(&config, now, genesis_time)?;

        assert_eq!(tick, Tick::start_of_slot(GENESIS_SLOT));
        assert_eq!(delay, Duration::from_secs(30));

        Ok(())
    }

    #[test]
    fn next_tick_mid_slot() -> Result<()> {
        let config = Config::mainnet();
        let genesis_time = 1_000_000;
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(genesis_time + 5) + Duration::from_millis(500);

        let (tick, delay) = next_tick_after(&config, now, genesis_time)?;

        assert_eq!(tick, Tick::new(0, TickKind::AttestThird));
        assert_eq!(delay, Duration::from_millis(500));

        Ok(())
    }
}
