pub use crate::{doppelganger_protection::DoppelgangerProtection, error::Error};

mod doppelganger_protection;
mod error;
