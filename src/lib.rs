pub mod cli;
pub mod combine;
pub mod crunch;
pub mod data;
pub mod engine;
pub mod error;
pub mod headers;
pub mod hints;
pub mod input_groups;
pub mod io_utils;
pub mod json_export;
pub mod options;
pub mod schema_split;
pub mod tables;
pub mod type_reducer;

use std::{env, ffi::OsString, sync::OnceLock};

use clap::Parser;
use log::{LevelFilter, debug};

use crate::{cli::CrunchArgs, crunch::Cruncher};

pub use crate::{
    cli::preprocess_cli_args,
    error::{CrunchError, EXIT_FAILURE, EXIT_USAGE},
    options::CrunchOptions,
};

static LOGGER: OnceLock<()> = OnceLock::new();

/// Installs the logger once. `level` overrides `RUST_LOG` for this crate.
pub fn init_logging(level: Option<LevelFilter>) {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        match level {
            Some(level) => {
                builder.filter_module("csv_cruncher", level);
            }
            None if env::var("RUST_LOG").is_err() => {
                builder.filter_module("csv_cruncher", LevelFilter::Info);
            }
            None => {}
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<(), CrunchError> {
    run_from(env::args_os())
}

/// Parses `args` (program name first) and runs the crunch they describe.
///
/// Help, version and usage errors are printed by clap, which then exits.
pub fn run_from<I, T>(args: I) -> Result<(), CrunchError>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let args = preprocess_cli_args(args.into_iter().map(Into::into).collect());
    let parsed = CrunchArgs::try_parse_from(args).unwrap_or_else(|err| err.exit());
    let options = parsed.into_options()?;
    init_logging(options.log_level);
    debug!("Options: {options:?}");
    Cruncher::new(options).crunch()
}
