//! ipalloc CLI
//!
//! Operates on a directory-backed store shared by every allocator pointed at
//! the same directory and key.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ipalloc_rs::{AddressAllocator, AllocatorBuilder, AllocatorConfig, FileStore};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "ipalloc")]
#[command(about = "Allocate addresses from a CIDR range persisted in a shared store")]
struct Args {
    /// Store directory
    #[arg(short = 's', long)]
    store: PathBuf,

    /// TOML configuration file (cidr, key, resource, retry)
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Range to allocate from; overrides the config file
    #[arg(long)]
    cidr: Option<String>,

    /// Store key of the allocation record; overrides the config file
    #[arg(short = 'k', long)]
    key: Option<String>,

    /// Resource name reported in errors; overrides the config file
    #[arg(long)]
    resource: Option<String>,

    /// Compare-and-swap attempts before giving up
    #[arg(long)]
    max_attempts: Option<u32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create an empty allocation record for the range
    Seed,
    /// Reserve a specific address
    Allocate { address: IpAddr },
    /// Reserve the lowest free address and print it
    Next,
    /// Return an address to the pool
    Release { address: IpAddr },
    /// Report whether an address is allocated
    Has { address: IpAddr },
    /// Print range, capacity and usage
    Status,
    /// Print every allocated address
    List,
}

fn builder(args: &Args) -> Result<AllocatorBuilder> {
    let mut builder = match &args.config {
        Some(path) => {
            let config = AllocatorConfig::load(path)
                .with_context(|| format!("loading config {}", path.display()))?;
            AllocatorBuilder::from_config(config)
        }
        None => AllocatorBuilder::new(),
    };

    if let Some(cidr) = &args.cidr {
        builder = builder.cidr(cidr.clone());
    }
    if let Some(key) = &args.key {
        builder = builder.key(key.clone());
    }
    if let Some(resource) = &args.resource {
        builder = builder.resource(resource.clone());
    }
    if let Some(max_attempts) = args.max_attempts {
        builder = builder.max_attempts(max_attempts);
    }

    if args.config.is_none() && args.cidr.is_none() {
        bail!("either --config or --cidr is required");
    }
    Ok(builder)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let store = Arc::new(
        FileStore::open(&args.store)
            .with_context(|| format!("opening store {}", args.store.display()))?,
    );
    let alloc = builder(&args)?.build(store)?;

    info!("Range {} at key {}", alloc.cidr(), alloc.key());

    match args.command {
        Command::Seed => {
            let version = alloc.records().seed().context("seeding allocation record")?;
            println!("seeded {} ({}) at version {}", alloc.key(), alloc.cidr(), version);
        }
        Command::Allocate { address } => {
            alloc
                .allocate(address)
                .with_context(|| format!("allocating {}", address))?;
            println!("{}", address);
        }
        Command::Next => {
            let address = alloc.allocate_next().context("allocating next free address")?;
            println!("{}", address);
        }
        Command::Release { address } => {
            alloc
                .release(address)
                .with_context(|| format!("releasing {}", address))?;
            println!("released {}", address);
        }
        Command::Has { address } => {
            let allocated = alloc.has(address)?;
            println!("{}", allocated);
        }
        Command::Status => {
            let used = alloc.used()?;
            let capacity = alloc.range().capacity();
            println!("range:    {}", alloc.cidr());
            println!("key:      {}", alloc.key());
            println!("store:    {}", alloc.store().root().display());
            println!("capacity: {}", capacity);
            println!("used:     {}", used);
            println!("free:     {}", capacity - used);
        }
        Command::List => {
            alloc.for_each(|address| println!("{}", address))?;
        }
    }

    Ok(())
}
