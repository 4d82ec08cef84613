pub use crate::{
    runtime::{run, Error},
    vero_config::VeroConfig,
};

mod runtime;
mod vero_config;
