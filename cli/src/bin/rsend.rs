//! `rsend`: send the first N bytes of a file over the reliable UDP protocol.
//!
//! ```text
//! rsend <receiver_hostname> <receiver_port> <source_file> <bytes_to_transfer>
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use udpxfer::sender::SenderConfigBuilder;

/// Send a file to a listening `rrecv`.
#[derive(Parser)]
#[command(author, version, about)]
struct Args {
    /// Host name or address of the receiver.
    receiver_hostname: String,

    /// UDP port the receiver listens on.
    receiver_port: u16,

    /// File to read from.
    source_file: PathBuf,

    /// Number of bytes to send (capped at the file size).
    bytes_to_transfer: u64,

    /// Congestion window after the handshake, in 1450-byte units.
    #[arg(long, value_name = "UNITS")]
    initial_window: Option<u32>,

    /// Congestion window ceiling, in 1450-byte units.
    #[arg(long, value_name = "UNITS")]
    max_window: Option<u32>,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = match udpxfer_cli::parse_args::<Args>() {
        Ok(args) => args,
        Err(code) => return code,
    };
    udpxfer_cli::init_logging(args.verbose);

    let mut builder = SenderConfigBuilder::new();
    if let Some(units) = args.initial_window {
        builder = builder.initial_window(units);
    }
    if let Some(units) = args.max_window {
        builder = builder.max_window(units);
    }
    let config = match builder.build() {
        Ok(config) => config,
        Err(err) => return udpxfer_cli::fail("rsend", &err),
    };

    let result = udpxfer::send_file(
        config,
        &args.receiver_hostname,
        args.receiver_port,
        &args.source_file,
        args.bytes_to_transfer,
    )
    .await;

    match result {
        Ok(report) => {
            tracing::info!(
                bytes = report.bytes_acked,
                rounds = report.rounds,
                retransmitted = report.retransmitted_packets,
                timeouts = report.timeouts,
                srtt = ?report.smoothed_rtt,
                "done"
            );
            ExitCode::SUCCESS
        }
        Err(err) => udpxfer_cli::fail("rsend", &err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positional_arguments() {
        let args = Args::try_parse_from(["rsend", "localhost", "9000", "in.bin", "10000"]).unwrap();
        assert_eq!(args.receiver_hostname, "localhost");
        assert_eq!(args.receiver_port, 9000);
        assert_eq!(args.source_file, PathBuf::from("in.bin"));
        assert_eq!(args.bytes_to_transfer, 10_000);
    }

    #[test]
    fn test_window_options() {
        let args = Args::try_parse_from([
            "rsend",
            "localhost",
            "9000",
            "in.bin",
            "10",
            "--initial-window",
            "4",
            "--max-window",
            "16",
        ])
        .unwrap();
        assert_eq!(args.initial_window, Some(4));
        assert_eq!(args.max_window, Some(16));
    }

    #[test]
    fn test_argument_count_mismatch() {
        assert!(Args::try_parse_from(["rsend", "localhost", "9000", "in.bin"]).is_err());
        assert!(Args::try_parse_from(["rsend", "localhost", "9000", "in.bin", "-5"]).is_err());
    }
}
