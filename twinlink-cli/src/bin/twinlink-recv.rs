//! twinlink receiver
//!
//! Accepts the two channels of one sender, reassembles the transfer and
//! writes it to a file or stdout.

use anyhow::Context;
use clap::Parser;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use twinlink::io::ChannelListener;
use twinlink::ReceiverSession;
use twinlink_cli::{display_receiver_report, init_logging, Config};

#[derive(Parser, Debug)]
#[command(name = "twinlink-recv")]
#[command(about = "Receive a file sent over two reliable channels", long_about = None)]
struct Args {
    /// Output file, '-' for stdout [default: output.txt]
    #[arg(short, long)]
    output: Option<String>,

    /// Listen address [default: 127.0.0.1:12500]
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Simulated drop probability in [0, 1]
    #[arg(long)]
    drop_probability: Option<f64>,

    /// Out-of-order packets held for reassembly
    #[arg(long)]
    reassembly_capacity: Option<usize>,

    /// Payload bytes per packet (must match the sender)
    #[arg(long)]
    payload_size: Option<usize>,

    /// Listen backlog
    #[arg(long)]
    backlog: Option<i32>,

    /// Seed for the loss simulator
    #[arg(long)]
    seed: Option<u64>,

    /// Print transfer statistics on completion
    #[arg(long)]
    stats: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn open_output(output: &str) -> anyhow::Result<Box<dyn Write>> {
    if output == "-" {
        Ok(Box::new(io::stdout().lock()))
    } else {
        let file =
            File::create(output).with_context(|| format!("cannot create output {}", output))?;
        Ok(Box::new(BufWriter::new(file)))
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    let file = Config::load(args.config.as_deref())?;
    let mut receiver = file.receiver.unwrap_or_default();
    let mut protocol = file.protocol;

    if let Some(output) = args.output {
        receiver.output = output;
    }
    if let Some(listen) = args.listen {
        receiver.listen = listen;
    }
    if let Some(drop_probability) = args.drop_probability {
        protocol.drop_probability = drop_probability;
    }
    if let Some(capacity) = args.reassembly_capacity {
        protocol.reassembly_capacity = capacity;
    }
    if let Some(payload_size) = args.payload_size {
        protocol.payload_size = payload_size;
    }
    if let Some(backlog) = args.backlog {
        protocol.listen_backlog = backlog;
    }
    if args.seed.is_some() {
        protocol.seed = args.seed;
    }
    let protocol = protocol.to_protocol_config()?;

    let listener = ChannelListener::bind(receiver.listen, protocol.listen_backlog)?;
    tracing::info!("twinlink receiver listening on {}", listener.local_addr()?);

    let output = open_output(&receiver.output)?;
    let session = ReceiverSession::accept(&listener, output, protocol)?;
    let (report, _output) = session.run()?;

    if receiver.output == "-" {
        eprintln!("\nFile received successfully");
    } else {
        println!("\nFile received successfully, stored as {}", receiver.output);
    }
    if args.stats {
        display_receiver_report(&report);
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
