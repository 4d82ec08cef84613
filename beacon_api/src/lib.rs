pub use crate::{
    beacon_node::{BeaconNode, BeaconNodeError},
    events::{
        AttesterSlashingEvent, BeaconNodeEvent, BlockGossipEvent, ChainReorgEvent, HeadEvent,
        ProposerSlashingEvent, RawEvent, Topic,
    },
    schemas::{
        AttesterDuty, BeaconCommitteeSubscription, BlockContents, Genesis, ProduceBlockV3Response,
        ProposerDuty, ProposerPreparation, SyncCommitteeSubscription, SyncDuty, ValidatorInfo,
        ValidatorLiveness,
    },
};

mod beacon_node;
mod events;
pub mod schemas;
