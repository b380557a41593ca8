use std::path::PathBuf;

use anyhow::Result;
use chainlog_core::{pow, Block, Blockchain};
use chainlog_store::SledStore;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "chainlog")]
#[command(about = "Append-only proof-of-work ledger")]
struct Cli {
    /// Directory holding the ledger database
    #[arg(long, default_value = "./chainlog-db")]
    db: PathBuf,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Mine a block carrying the given payload and append it
    AddBlock {
        /// Block payload
        #[arg(long)]
        data: String,
    },
    /// Print every block from tip to genesis
    PrintChain {
        /// Render each block as a JSON line instead of text
        #[arg(long)]
        json: bool,
    },
    /// Audit proof-of-work and hash links for the whole chain
    Validate,
    /// Print the number of blocks, genesis included
    Height,
    /// Wipe the ledger and mint a fresh genesis
    Reset,
}

#[derive(Serialize)]
struct BlockView {
    timestamp: i64,
    data: String,
    prev_hash: String,
    hash: String,
    nonce: u64,
    pow_valid: bool,
}

impl BlockView {
    fn new(block: &Block) -> Self {
        Self {
            timestamp: block.timestamp,
            data: String::from_utf8_lossy(&block.data).into_owned(),
            prev_hash: hex::encode(&block.prev_hash),
            hash: hex::encode(&block.hash),
            nonce: block.nonce,
            pow_valid: pow::validate(block),
        }
    }
}

fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .pretty()
        .init();

    let cli = Cli::parse();
    let store = SledStore::open(&cli.db)?;
    if matches!(cli.cmd, Command::Reset) {
        store.clear()?;
    }
    let mut chain = Blockchain::open(store)?;

    match cli.cmd {
        Command::AddBlock { data } => {
            let block = chain.append(data.into_bytes())?;
            println!("block added: {}", hex::encode(&block.hash));
        }
        Command::PrintChain { json } => {
            for block in chain.iterator() {
                let view = BlockView::new(&block?);
                if json {
                    println!("{}", serde_json::to_string(&view)?);
                } else {
                    println!("prev: {}", view.prev_hash);
                    println!("data: {}", view.data);
                    println!("hash: {}", view.hash);
                    println!("nonce: {}", view.nonce);
                    println!("pow valid: {}", view.pow_valid);
                    println!();
                }
            }
        }
        Command::Validate => {
            println!("chain valid: {}", chain.is_valid()?);
        }
        Command::Height => {
            println!("height: {}", chain.height()?);
        }
        Command::Reset => {
            println!("reset complete, new genesis minted");
        }
    }

    chain.close()?;
    Ok(())
}
