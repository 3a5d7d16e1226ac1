//! norkv CLI
//!
//! Offline tool for inspecting and editing a flash image file.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use norkv::{
    Config, FileFlash, Flash, NorKvError, Partition, PartitionTable, Store, WriteGranularity,
};
use tracing::error;
use tracing_subscriber::{fmt, EnvFilter};

/// norkv CLI
#[derive(Parser, Debug)]
#[command(name = "norkv-cli")]
#[command(about = "Inspect and edit a norkv flash image")]
#[command(version)]
struct Args {
    /// Flash image file (created erased if missing)
    #[arg(short, long)]
    image: PathBuf,

    /// Erase unit in bytes
    #[arg(long, default_value = "4096", value_parser = parse_u32)]
    sector_size: u32,

    /// Image size in bytes
    #[arg(long, default_value = "65536", value_parser = parse_u32)]
    capacity: u32,

    /// Write granularity in bits (1, 8, 32 or 64)
    #[arg(long, default_value = "8")]
    granularity: u32,

    /// Bootstrap region holding the partition table, as BASE:LEN
    #[arg(long, value_parser = parse_region)]
    bootstrap: Option<(u32, u32)>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Erase the whole image
    Format,

    /// Manage the partition table
    #[command(subcommand)]
    Partition(PartitionCommand),

    /// Get a value by key
    Get {
        /// The key to get
        key: String,

        #[arg(short, long, default_value = DEFAULT_PARTITION)]
        partition: String,
    },

    /// Set a key-value pair
    Set {
        /// The key to set
        key: String,

        /// The value to set
        value: String,

        #[arg(short, long, default_value = DEFAULT_PARTITION)]
        partition: String,
    },

    /// Delete a key
    Del {
        /// The key to delete
        key: String,

        #[arg(short, long, default_value = DEFAULT_PARTITION)]
        partition: String,
    },

    /// Print every sector and record of a partition
    Dump {
        #[arg(short, long, default_value = DEFAULT_PARTITION)]
        partition: String,
    },

    /// Run a GC pass
    Gc {
        #[arg(short, long, default_value = DEFAULT_PARTITION)]
        partition: String,
    },
}

#[derive(Subcommand, Debug)]
enum PartitionCommand {
    /// Add a partition to the bootstrap table
    Add {
        name: String,

        #[arg(value_parser = parse_u32)]
        base: u32,

        #[arg(value_parser = parse_u32)]
        len: u32,
    },

    /// List partitions
    List,
}

/// Partition used when the image has no bootstrap table
const DEFAULT_PARTITION: &str = "default";

fn main() {
    let args = Args::parse();

    let default_filter = if args.verbose {
        "info,norkv=debug"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    fmt().with_env_filter(filter).with_target(false).init();

    if let Err(e) = run(args) {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> norkv::Result<()> {
    let granularity = WriteGranularity::from_bits(args.granularity)
        .ok_or_else(|| NorKvError::Config(format!("unsupported granularity {}", args.granularity)))?;
    let mut builder = Config::builder()
        .sector_size(args.sector_size)
        .write_granularity(granularity);
    if let Some((base, len)) = args.bootstrap {
        builder = builder.bootstrap(base, len);
    }
    let config = builder.build();

    let flash = FileFlash::open(&args.image, args.sector_size, args.capacity)?;
    let mut store = Store::new(flash, config)?;

    if let Commands::Format = args.command {
        let sector_size = args.sector_size;
        for i in 0..store.flash().capacity() / sector_size {
            let addr = i * sector_size;
            store
                .flash_mut()
                .erase(addr, sector_size)
                .map_err(|source| NorKvError::FlashErase { addr, source })?;
        }
    }
    open_partitions(&mut store)?;

    match args.command {
        Commands::Format => println!("formatted {}", args.image.display()),
        Commands::Partition(PartitionCommand::Add { name, base, len }) => {
            store.register_partition(Partition::new(name.clone(), base, len))?;
            println!("added {} at {:#010x}+{:#x}", name, base, len);
        }
        Commands::Partition(PartitionCommand::List) => {
            for p in store.partitions() {
                println!("{:<16} {:#010x}  {:>8} bytes", p.name, p.base, p.len);
            }
        }
        Commands::Get { key, partition } => {
            let pid = store.partition(&partition)?;
            match store.get(pid, &key)? {
                Some(value) => println!("{}", render(&value)),
                None => {
                    println!("(not found)");
                    std::process::exit(2);
                }
            }
        }
        Commands::Set { key, value, partition } => {
            let pid = store.partition(&partition)?;
            store.set(pid, &key, value.as_bytes())?;
            println!("OK");
        }
        Commands::Del { key, partition } => {
            let pid = store.partition(&partition)?;
            store.delete(pid, &key)?;
            println!("OK");
        }
        Commands::Dump { partition } => {
            let pid = store.partition(&partition)?;
            print!("{}", store.dump(pid)?);
            println!("{:?}", store.stats(pid)?);
        }
        Commands::Gc { partition } => {
            let pid = store.partition(&partition)?;
            let report = store.gc_collect(pid)?;
            println!(
                "collected {} sectors, moved {} records",
                report.sectors_collected, report.records_moved
            );
        }
    }
    Ok(())
}

/// Load partitions: from the bootstrap table if there is one, otherwise a
/// single partition over the whole image
fn open_partitions<F: Flash>(store: &mut Store<F>) -> norkv::Result<()> {
    if store.config().bootstrap.is_some() {
        store.discover()?;
    } else {
        let capacity = store.flash().capacity();
        store.init(&PartitionTable::new().with(DEFAULT_PARTITION, 0, capacity))?;
    }
    Ok(())
}

/// Value as text when it is UTF-8, hex otherwise
fn render(value: &[u8]) -> String {
    match std::str::from_utf8(value) {
        Ok(text) => text.to_string(),
        Err(_) => value.iter().map(|b| format!("{:02x}", b)).collect(),
    }
}

fn parse_u32(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid number {:?}: {}", s, e))
}

fn parse_region(s: &str) -> Result<(u32, u32), String> {
    let (base, len) = s
        .split_once(':')
        .ok_or_else(|| format!("expected BASE:LEN, got {:?}", s))?;
    Ok((parse_u32(base)?, parse_u32(len)?))
}
