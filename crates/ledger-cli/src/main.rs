use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use ledger_core::{
    constants::DEFAULT_DIFFICULTY, to_hex, Block, Chain, Payload, Transfer, ValidationReport,
};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "ledger-cli")]
#[command(about = "Mine and verify an in-memory proof-of-work ledger")]
struct Cli {
    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Args, Debug)]
struct MiningOpts {
    /// Leading hex zeros required of every block hash
    #[arg(long, default_value_t = DEFAULT_DIFFICULTY)]
    difficulty: u32,

    /// Give up on a block after this many hashes
    #[arg(long)]
    max_attempts: Option<u64>,

    /// Print the chain as JSON instead of a summary
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Mine a Matchbox transfer chain, validate it, optionally tamper and re-validate
    Demo {
        /// Total number of blocks, genesis included
        #[arg(long, default_value_t = 3)]
        blocks: usize,

        /// Index of the block whose receiver gets rewritten after mining
        #[arg(long)]
        tamper: Option<usize>,

        /// Receiver written into the tampered block
        #[arg(long, default_value = "Mallory")]
        tamper_receiver: String,

        #[command(flatten)]
        mining: MiningOpts,
    },
    /// Mine one block per text payload
    Mine {
        /// Payloads, in chain order
        #[arg(required = true)]
        payloads: Vec<String>,

        #[command(flatten)]
        mining: MiningOpts,
    },
}

#[derive(Serialize)]
struct BlockView<'a, T> {
    index: usize,
    data: &'a T,
    timestamp: u64,
    previous_hash: String,
    nonce: u64,
    difficulty: u32,
    hash: String,
}

impl<'a, T> BlockView<'a, T> {
    fn new(index: usize, block: &'a Block<T>) -> Self {
        Self {
            index,
            data: block.data(),
            timestamp: block.timestamp(),
            previous_hash: block.previous_hash().as_ref().map(to_hex).unwrap_or_default(),
            nonce: block.nonce(),
            difficulty: block.difficulty(),
            hash: block.hash_hex(),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .context("invalid --log-level filter")?;
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.cmd {
        Command::Demo {
            blocks,
            tamper,
            tamper_receiver,
            mining,
        } => run_demo(blocks, tamper, &tamper_receiver, &mining),
        Command::Mine { payloads, mining } => {
            let chain = mine_chain(payloads, &mining)?;
            print_chain(&chain, mining.json)?;
            print_verdict(&chain.audit());
            Ok(())
        }
    }
}

fn run_demo(
    blocks: usize,
    tamper: Option<usize>,
    tamper_receiver: &str,
    mining: &MiningOpts,
) -> Result<()> {
    if blocks == 0 {
        bail!("--blocks must be at least 1");
    }
    let payloads = std::iter::once(Transfer::genesis())
        .chain((1..blocks).map(|i| Transfer::new("Matchbox", format!("wallet-{i}"), i as u64 * 5)));
    let chain = mine_chain(payloads, mining)?;
    print_chain(&chain, mining.json)?;
    print_verdict(&chain.audit());

    let Some(index) = tamper else {
        return Ok(());
    };
    if index >= chain.len() {
        bail!("--tamper {index} is out of range for a chain of {} blocks", chain.len());
    }

    // Blocks are never mutable through a Chain, so tamper with the serialized form.
    let mut value = serde_json::to_value(&chain)?;
    value["blocks"][index]["data"]["receiver"] = serde_json::Value::from(tamper_receiver);
    let tampered: Chain<Transfer> = serde_json::from_value(value)?;
    info!(index, receiver = tamper_receiver, "rewrote receiver without re-mining");

    println!();
    println!("after tampering with block {index}:");
    print_verdict(&tampered.audit());
    Ok(())
}

fn mine_chain<T: Payload>(
    payloads: impl IntoIterator<Item = T>,
    mining: &MiningOpts,
) -> Result<Chain<T>> {
    let mut chain = Chain::new();
    for data in payloads {
        match mining.max_attempts {
            Some(max) => chain.append_bounded(data, mining.difficulty, max)?,
            None => chain.append(data, mining.difficulty)?,
        };
    }
    Ok(chain)
}

fn print_chain<T: Serialize>(chain: &Chain<T>, json: bool) -> Result<()> {
    let views: Vec<_> = chain
        .blocks()
        .iter()
        .enumerate()
        .map(|(i, b)| BlockView::new(i, b))
        .collect();
    if json {
        println!("{}", serde_json::to_string_pretty(&views)?);
        return Ok(());
    }
    for view in views {
        println!("block {}", view.index);
        println!("  data:          {}", serde_json::to_string(view.data)?);
        println!("  timestamp:     {}", view.timestamp);
        println!("  previous hash: {}", view.previous_hash);
        println!("  nonce:         {}", view.nonce);
        println!("  difficulty:    {}", view.difficulty);
        println!("  hash:          {}", view.hash);
    }
    Ok(())
}

fn print_verdict(report: &ValidationReport) {
    if report.is_valid() {
        println!("chain valid ({} blocks checked)", report.blocks_checked);
        return;
    }
    println!("chain INVALID ({} failures)", report.failures.len());
    for failure in &report.failures {
        println!("  {failure}");
    }
}
