//! `rrecv`: receive one file over the reliable UDP protocol.
//!
//! ```text
//! rrecv <udp_port> <destination_file>
//! ```

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use udpxfer::receiver::ReceiverConfigBuilder;

/// Receive a file sent by `rsend`.
#[derive(Parser)]
#[command(author, version, about)]
struct Args {
    /// UDP port to listen on.
    udp_port: u16,

    /// File to write the received bytes to (created or truncated).
    destination_file: PathBuf,

    /// Milliseconds of DATA collected before one cumulative ACK.
    #[arg(long, value_name = "MS")]
    flush_delay_ms: Option<u64>,

    /// Milliseconds to keep answering retransmitted FINs.
    #[arg(long, value_name = "MS")]
    linger_ms: Option<u64>,

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

    let mut builder = ReceiverConfigBuilder::new();
    if let Some(ms) = args.flush_delay_ms {
        builder = builder.flush_delay(Duration::from_millis(ms));
    }
    if let Some(ms) = args.linger_ms {
        builder = builder.fin_linger(Duration::from_millis(ms));
    }

    let bind = SocketAddr::from((Ipv4Addr::UNSPECIFIED, args.udp_port));
    match udpxfer::receive_file(builder.build(), bind, &args.destination_file).await {
        Ok(report) => {
            tracing::info!(
                bytes = report.bytes_delivered,
                packets = report.data_packets,
                duplicates = report.duplicates,
                "done"
            );
            ExitCode::SUCCESS
        }
        Err(err) => udpxfer_cli::fail("rrecv", &err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positional_arguments() {
        let args = Args::try_parse_from(["rrecv", "9000", "out.bin"]).unwrap();
        assert_eq!(args.udp_port, 9000);
        assert_eq!(args.destination_file, PathBuf::from("out.bin"));
        assert!(args.flush_delay_ms.is_none());
        assert!(!args.verbose);
    }

    #[test]
    fn test_options() {
        let args =
            Args::try_parse_from(["rrecv", "9000", "out.bin", "--linger-ms", "250", "-v"]).unwrap();
        assert_eq!(args.linger_ms, Some(250));
        assert!(args.verbose);
    }

    #[test]
    fn test_argument_count_mismatch() {
        assert!(Args::try_parse_from(["rrecv", "9000"]).is_err());
        assert!(Args::try_parse_from(["rrecv", "9000", "out.bin", "extra"]).is_err());
        assert!(Args::try_parse_from(["rrecv", "port", "out.bin"]).is_err());
    }
}
