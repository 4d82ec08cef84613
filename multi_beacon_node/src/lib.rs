pub use crate::{
    events::{EventPipeline, SourcedEvent},
    multi_beacon_node::{MultiBeaconNode, MultiBeaconNodeError},
};

mod attestation_consensus;
mod events;
mod multi_beacon_node;
