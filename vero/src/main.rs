use std::process::ExitCode;

use anyhow::Result;
use clap::{Error as ClapError, Parser as _};
use log::error;

use crate::vero_args::VeroArgs;

mod predefined_network;
mod vero_args;

/// Exit code reported when a doppelganger is detected. Distinct from plain
/// failures so orchestration can refuse to restart the process.
const DOPPELGANGER_EXIT_CODE: u8 = 3;

fn main() -> ExitCode {
    match try_main() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error.downcast_ref().map(ClapError::exit);

            error!("{error:?}");

            if error.downcast_ref::<runtime::Error>().is_some() {
                ExitCode::from(DOPPELGANGER_EXIT_CODE)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

fn try_main() -> Result<()> {
    let args = VeroArgs::try_parse()?;

    binary_utils::initialize_logger(args.log_level())?;

    let config = args.into_config()?;

    runtime::run(config)
}
