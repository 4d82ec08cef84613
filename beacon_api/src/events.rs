//! Server-sent events from `/eth/v1/events`.
//!
//! The SSE protocol is simple enough that the parser lives here rather than
//! behind another dependency: an event is an `event:` line followed by one or
//! more `data:` lines, terminated by an empty line. Comment lines start with
//! a colon and keep-alives are empty.

use anyhow::{anyhow, Error, Result};
use futures::{
    stream::{Stream, TryStreamExt as _},
    StreamExt as _,
};
use log::{debug, warn};
use serde::Deserialize;
use strum::{AsRefStr, Display, EnumString};
use types::{
    electra,
    phase0::{
        containers::ProposerSlashing,
        primitives::{Epoch, Slot, H256},
    },
};

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, AsRefStr, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum Topic {
    Head,
    ChainReorg,
    AttesterSlashing,
    ProposerSlashing,
    BlockGossip,
}

impl Topic {
    pub const ALL: [Self; 5] = [
        Self::Head,
        Self::ChainReorg,
        Self::AttesterSlashing,
        Self::ProposerSlashing,
        Self::BlockGossip,
    ];
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Deserialize)]
pub struct HeadEvent {
    #[serde(with = "serde_utils::string_or_native")]
    pub slot: Slot,
    pub block: H256,
    pub previous_duty_dependent_root: H256,
    pub current_duty_dependent_root: H256,
    #[serde(default)]
    pub execution_optimistic: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Deserialize)]
pub struct ChainReorgEvent {
    #[serde(with = "serde_utils::string_or_native")]
    pub slot: Slot,
    #[serde(with = "serde_utils::string_or_native")]
    pub depth: u64,
    pub old_head_block: H256,
    pub new_head_block: H256,
    #[serde(with = "serde_utils::string_or_native")]
    pub epoch: Epoch,
    #[serde(default)]
    pub execution_optimistic: bool,
}

/// Attester slashings are parsed with the post-Electra index bounds; earlier
/// slashings fit within them.
#[derive(Clone, PartialEq, Eq, Debug, Deserialize)]
pub struct AttesterSlashingEvent(pub electra::containers::AttesterSlashing);

#[derive(Clone, Copy, PartialEq, Eq, Debug, Deserialize)]
pub struct ProposerSlashingEvent(pub ProposerSlashing);

#[derive(Clone, Copy, PartialEq, Eq, Debug, Deserialize)]
pub struct BlockGossipEvent {
    #[serde(with = "serde_utils::string_or_native")]
    pub slot: Slot,
    pub block: H256,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum BeaconNodeEvent {
    Head(HeadEvent),
    ChainReorg(ChainReorgEvent),
    AttesterSlashing(AttesterSlashingEvent),
    ProposerSlashing(ProposerSlashingEvent),
    BlockGossip(BlockGossipEvent),
}

impl BeaconNodeEvent {
    #[must_use]
    pub const fn topic(&self) -> Topic {
        match self {
            Self::Head(_) => Topic::Head,
            Self::ChainReorg(_) => Topic::ChainReorg,
            Self::AttesterSlashing(_) => Topic::AttesterSlashing,
            Self::ProposerSlashing(_) => Topic::ProposerSlashing,
            Self::BlockGossip(_) => Topic::BlockGossip,
        }
    }

    /// The same event arrives once per connected beacon node; this key
    /// identifies duplicates across the merged stream.
    #[must_use]
    pub fn dedup_key(&self, raw_data: &str) -> (Topic, H256) {
        let key = match self {
            Self::Head(event) => two_field_key(event.slot, event.block),
            Self::ChainReorg(event) => two_field_key(event.slot, event.new_head_block),
            Self::BlockGossip(event) => two_field_key(event.slot, event.block),
            Self::AttesterSlashing(_) | Self::ProposerSlashing(_) => {
                hashing::hash_bytes(raw_data)
            }
        };

        (self.topic(), key)
    }

    #[must_use]
    pub const fn execution_optimistic(&self) -> bool {
        match self {
            Self::Head(event) => event.execution_optimistic,
            Self::ChainReorg(event) => event.execution_optimistic,
            _ => false,
        }
    }

    pub fn parse(event_name: &str, data: &str) -> Result<Self> {
        let topic = event_name
            .parse::<Topic>()
            .map_err(|_| anyhow!("unknown event {event_name}"))?;

        let event = match topic {
            Topic::Head => Self::Head(serde_json::from_str(data)?),
            Topic::ChainReorg => Self::ChainReorg(serde_json::from_str(data)?),
            Topic::AttesterSlashing => Self::AttesterSlashing(serde_json::from_str(data)?),
            Topic::ProposerSlashing => Self::ProposerSlashing(serde_json::from_str(data)?),
            Topic::BlockGossip => Self::BlockGossip(serde_json::from_str(data)?),
        };

        Ok(event)
    }
}

fn two_field_key(slot: Slot, root: H256) -> H256 {
    let mut bytes = [0_u8; 40];
    bytes[..8].copy_from_slice(&slot.to_le_bytes());
    bytes[8..].copy_from_slice(root.as_bytes());
    hashing::hash_bytes(bytes)
}

/// An event together with the raw `data:` payload it was parsed from.
#[derive(Clone, Debug)]
pub struct RawEvent {
    pub event: BeaconNodeEvent,
    pub data: String,
}

/// Parses an SSE byte stream into events. Comments, keep-alives and unknown
/// event kinds are skipped.
pub fn parse_sse_stream(
    bytes: impl Stream<Item = reqwest::Result<bytes::Bytes>> + Unpin,
) -> impl Stream<Item = Result<RawEvent>> {
    struct State<S> {
        bytes: S,
        buffer: String,
        finished: bool,
    }

    let state = State {
        bytes,
        buffer: String::new(),
        finished: false,
    };

    futures::stream::try_unfold(state, |mut state| async move {
        loop {
            if let Some(raw_event) = try_extract_event(&mut state.buffer)? {
                return Ok(Some((raw_event, state)));
            }

            if state.finished {
                return Ok(None);
            }

            match state.bytes.next().await {
                Some(chunk) => {
                    let chunk = chunk.map_err(Error::new)?;
                    state.buffer.push_str(&String::from_utf8_lossy(&chunk));
                }
                None => state.finished = true,
            }
        }
    })
    .try_filter_map(|raw_event| core::future::ready(Ok(raw_event)))
}

/// Extracts the first complete event block from `buffer`, if any. Returns
/// `Ok(Some(None))` when a complete block was consumed but did not produce an
/// event (comments, keep-alives, unknown kinds).
#[allow(clippy::option_option)]
fn try_extract_event(buffer: &mut String) -> Result<Option<Option<RawEvent>>> {
    let Some(block_end) = find_block_end(buffer) else {
        return Ok(None);
    };

    let block = buffer[..block_end].to_owned();
    buffer.drain(..block_end);

    let mut event_name = None;
    let mut data_lines = Vec::new();

    for line in block.lines() {
        let line = line.trim_end_matches('\r');

        if line.is_empty() || line.starts_with(':') {
            continue;
        }

        if let Some(name) = line.strip_prefix("event:") {
            event_name = Some(name.trim().to_owned());
        } else if let Some(data) = line.strip_prefix("data:") {
            data_lines.push(data.trim().to_owned());
        } else {
            warn!("unexpected message in event stream: {line:?}");
        }
    }

    let Some(event_name) = event_name else {
        return Ok(Some(None));
    };

    let data = data_lines.join("\n");

    match BeaconNodeEvent::parse(&event_name, &data) {
        Ok(event) => Ok(Some(Some(RawEvent { event, data }))),
        Err(error) => {
            debug!("ignoring unparseable {event_name} event: {error}");
            Ok(Some(None))
        }
    }
}

fn find_block_end(buffer: &str) -> Option<usize> {
    let lf = buffer.find("\n\n").map(|position| position + 2);
    let crlf = buffer.find("\r\n\r\n").map(|position| position + 4);

    match (lf, crlf) {
        (Some(lf), Some(crlf)) => Some(lf.min(crlf)),
        (position, None) | (None, position) => position,
    }
}

#[cfg(test)]
mod tests {
    use futures::executor::block_on;

    use super::*;

    fn collect_events(input: &str) -> Vec<RawEvent> {
        let chunks = input
            .as_bytes()
            .chunks(7)
            .map(|chunk| Ok(bytes::Bytes::copy_from_slice(chunk)))
            .collect::<Vec<_>>();

        let stream = parse_sse_stream(futures::stream::iter(chunks));

        block_on(stream.try_collect()).expect("stream parses")
    }

    #[test]
    fn parses_head_events_and_skips_noise() {
        let input = concat!(
            ": this is a comment\n\n",
            "\n",
            "event: head\n",
            "data: {\"slot\":\"100\",\"block\":\"0x",
            "abababababababababababababababababababababababababababababababab",
            "\",\"previous_duty_dependent_root\":\"0x",
            "0101010101010101010101010101010101010101010101010101010101010101",
            "\",\"current_duty_dependent_root\":\"0x",
            "0202020202020202020202020202020202020202020202020202020202020202",
            "\",\"execution_optimistic\":false}\n",
            "\n",
        );

        let events = collect_events(input);

        assert_eq!(events.len(), 1);

        match &events[0].event {
            BeaconNodeEvent::Head(head) => {
                assert_eq!(head.slot, 100);
                assert!(!head.execution_optimistic);
            }
            other => panic!("expected a head event, got {other:?}"),
        }
    }

    #[test]
    fn unknown_events_are_skipped() {
        let input = concat!(
            "event: finalized_checkpoint\n",
            "data: {\"some\":\"thing\"}\n",
            "\n",
            "event: block_gossip\n",
            "data: {\"slot\":\"7\",\"block\":\"0x",
            "cdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcd",
            "\"}\n\n",
        );

        let events = collect_events(input);

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.topic(), Topic::BlockGossip);
    }

    #[test]
    fn head_events_from_different_nodes_share_a_dedup_key() {
        let head = HeadEvent {
            slot: 100,
            block: H256::repeat_byte(0xab),
            previous_duty_dependent_root: H256::zero(),
            current_duty_dependent_root: H256::zero(),
            execution_optimistic: false,
        };

        let first = BeaconNodeEvent::Head(head);
        let second = BeaconNodeEvent::Head(HeadEvent {
            // Dependent roots do not participate in the key.
            current_duty_dependent_root: H256::repeat_byte(1),
            ..head
        });

        assert_eq!(first.dedup_key(""), second.dedup_key(""));
    }
}
