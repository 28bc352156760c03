use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use bytes::Bytes;
use clap::{Parser, Subcommand};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use fragkit::common::CHANNEL_SIZE_DEFAULT;
use fragkit::handler::{self, Family, Reassemblers};
use fragkit::pcap::PcapReader;
use fragkit::reassembly::ip::Datagram;

#[derive(Debug, Parser)]
struct CommandArguments {
    #[clap(subcommand)]
    second_command: SecondCommand,

    /// Print verbose log.
    #[clap(short, long)]
    verbose: bool,

    /// Print more verbose log.
    #[clap(short, long)]
    trivia: bool,
}

#[derive(Debug, Subcommand)]
enum SecondCommand {
    /// Reassemble IPv4/IPv6 fragments found in a pcap file.
    Reassemble(ReassembleOpts),
}

#[derive(Debug, Parser)]
struct ReassembleOpts {
    /// Capture file (classic pcap).
    pcap: PathBuf,

    /// Also report partially received datagrams.
    #[clap(short, long)]
    lenient: bool,

    /// Only print the datagram this frame number went into.
    #[clap(short, long)]
    frame: Option<u64>,

    /// Only reassemble one address family.
    #[clap(long, value_enum)]
    only: Option<Family>,
}

fn set_loglevel(cli_cmds: &CommandArguments) {
    std::env::set_var("RUST_LOG", "NONE");
    if cli_cmds.verbose {
        std::env::set_var("RUST_LOG", "debug");
    }
    if cli_cmds.trivia {
        std::env::set_var("RUST_LOG", "trace");
    }

    // Setup logging.
    env_logger::builder().format_timestamp_millis().init();
}

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> anyhow::Result<()> {
    let cli_cmds = CommandArguments::parse();
    set_loglevel(&cli_cmds);

    match cli_cmds.second_command {
        SecondCommand::Reassemble(opts) => reassemble(opts).await,
    }
}

async fn reassemble(opts: ReassembleOpts) -> anyhow::Result<()> {
    let bytes = tokio::fs::read(&opts.pcap)
        .await
        .with_context(|| format!("Cannot read {}.", opts.pcap.display()))?;
    let reader = PcapReader::new(Bytes::from(bytes))?;
    log::info!("Reading {} ({:?}).", opts.pcap.display(), reader.link_type());

    let reassemblers = Arc::new(Mutex::new(Reassemblers::new(!opts.lenient)));
    let (fragment_sender, fragment_receiver) = mpsc::channel(CHANNEL_SIZE_DEFAULT);

    let mut reader_handle = tokio::spawn(handler::read_capture(
        reader,
        opts.only,
        fragment_sender,
    ));
    let mut handler_handle = tokio::spawn(handler::reassembly_handler(
        fragment_receiver,
        reassemblers.clone(),
    ));

    // Either the capture runs out or the user interrupts; open buffers are
    // flushed in both cases.
    tokio::select! {
        fragments = &mut handler_handle => {
            let fragments = fragments?;
            let records = (&mut reader_handle).await??;
            log::info!("{records} records read, {fragments} fragments ingested.");
        }
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => log::info!("Signal received. Graceful Shutdown."),
                Err(err) => log::warn!("Unable to listen for shutdown signal: {err}"),
            }
            reader_handle.abort();
            handler_handle.abort();
        }
    }

    let mut reassemblers = reassemblers.lock();
    log::debug!("{} buffers still open.", reassemblers.pending());
    reassemblers.flush_all();

    if let Some(frame) = opts.frame {
        let ipv4 = reassemblers.ipv4.index(frame).map(|i| {
            let datagrams = reassemblers.ipv4.fetch();
            line(reassemblers.ipv4.protocol(), &datagrams[i])
        });
        let ipv6 = reassemblers.ipv6.index(frame).map(|i| {
            let datagrams = reassemblers.ipv6.fetch();
            line(reassemblers.ipv6.protocol(), &datagrams[i])
        });
        match ipv4.or(ipv6) {
            Some(line) => println!("{line}"),
            None => anyhow::bail!("Frame #{frame} is not part of any reassembled datagram."),
        }
        return Ok(());
    }

    let ipv4 = reassemblers.ipv4.drain();
    let ipv6 = reassemblers.ipv6.drain();
    for datagram in ipv4.iter() {
        println!("{}", line(reassemblers.ipv4.protocol(), datagram));
    }
    for datagram in ipv6.iter() {
        println!("{}", line(reassemblers.ipv6.protocol(), datagram));
    }

    log::info!(
        "{}: {} datagrams ({} completed). {}: {} datagrams ({} completed).",
        reassemblers.ipv4.name(),
        ipv4.len(),
        ipv4.iter().filter(|d| d.completed()).count(),
        reassemblers.ipv6.name(),
        ipv6.len(),
        ipv6.iter().filter(|d| d.completed()).count(),
    );
    Ok(())
}

fn line<A: std::fmt::Display>(protocol: &str, datagram: &Datagram<A>) -> String {
    format!("{protocol} {datagram}")
}
