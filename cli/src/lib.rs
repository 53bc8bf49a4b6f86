//! Process setup shared by the `rrecv` and `rsend` executables.

use std::process::ExitCode;

use clap::Parser;
use clap::error::ErrorKind;
use tracing_subscriber::EnvFilter;

/// Exit code for a malformed command line.
pub const EXIT_USAGE: u8 = 1;

/// Exit code for a transfer that failed after startup.
pub const EXIT_FAILURE: u8 = 2;

/// Parse the command line.
///
/// `--help` and `--version` print and exit with 0; anything else clap
/// rejects prints the usage and yields [`EXIT_USAGE`].
pub fn parse_args<T: Parser>() -> Result<T, ExitCode> {
    match T::try_parse() {
        Ok(args) => Ok(args),
        Err(err) if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            err.exit()
        }
        Err(err) => {
            let _ = err.print();
            Err(ExitCode::from(EXIT_USAGE))
        }
    }
}

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` wins when set; otherwise the level is `info`, or `debug` with
/// `verbose`.
pub fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Report a failed run on stderr and produce [`EXIT_FAILURE`].
///
/// The library's error messages already embed their causes.
pub fn fail(program: &str, err: &dyn std::error::Error) -> ExitCode {
    eprintln!("{program}: {err}");
    ExitCode::from(EXIT_FAILURE)
}
