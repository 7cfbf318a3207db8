//! twinlink sender
//!
//! Reads a file (or stdin) and sends it to a twinlink receiver over two TCP
//! channels.

use anyhow::Context;
use clap::Parser;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::net::SocketAddr;
use std::path::PathBuf;
use twinlink::SenderSession;
use twinlink_cli::{display_sender_report, init_logging, Config};

#[derive(Parser, Debug)]
#[command(name = "twinlink-send")]
#[command(about = "Send a file over two reliable channels", long_about = None)]
struct Args {
    /// Input file, '-' for stdin [default: input.txt]
    #[arg(short, long)]
    input: Option<String>,

    /// Receiver address [default: 127.0.0.1:12500]
    #[arg(short, long)]
    address: Option<SocketAddr>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Retransmission timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Transmissions of one packet before giving up
    #[arg(long)]
    max_retries: Option<u32>,

    /// Payload bytes per packet (must match the receiver)
    #[arg(long)]
    payload_size: Option<usize>,

    /// Seed for timer tie-breaks
    #[arg(long)]
    seed: Option<u64>,

    /// Print transfer statistics on completion
    #[arg(long)]
    stats: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn open_input(input: &str) -> anyhow::Result<Box<dyn Read>> {
    if input == "-" {
        tracing::info!("Reading from stdin");
        Ok(Box::new(io::stdin().lock()))
    } else {
        tracing::info!("Reading from {}", input);
        let file = File::open(input).with_context(|| format!("cannot open input {}", input))?;
        Ok(Box::new(BufReader::new(file)))
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    let file = Config::load(args.config.as_deref())?;
    let mut sender = file.sender.unwrap_or_default();
    let mut protocol = file.protocol;

    if let Some(input) = args.input {
        sender.input = input;
    }
    if let Some(address) = args.address {
        sender.address = address;
    }
    if let Some(timeout_ms) = args.timeout_ms {
        protocol.timeout_ms = timeout_ms;
    }
    if let Some(max_retries) = args.max_retries {
        protocol.max_retries = max_retries;
    }
    if let Some(payload_size) = args.payload_size {
        protocol.payload_size = payload_size;
    }
    if args.seed.is_some() {
        protocol.seed = args.seed;
    }
    let protocol = protocol.to_protocol_config()?;

    let input = open_input(&sender.input)?;
    tracing::info!("twinlink sender connecting to {}", sender.address);
    let session = SenderSession::connect(sender.address, input, protocol)?;
    let report = session.run()?;

    println!("\nFile transfer completed successfully");
    if args.stats {
        display_sender_report(&report);
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    run(args).map_err(|e| {
        tracing::error!("Transfer failed: {:#}", e);
        e
    })
}
