pub use crate::{
    helpers::{observe_timer_vec, start_timer_vec, stop_and_discard, stop_and_record},
    metrics::{Metrics, METRICS},
};

mod helpers;
mod metrics;
