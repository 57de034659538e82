//! # ringcmd
//!
//! Command-line access to a ring registry: create and delete rings, list
//! and inspect them, dump their contents, and push or drain data.
//!
//! # Usage
//!
//! ```bash
//! # Create a 4 KiB record ring
//! ringcmd newring motion.cmd --size 4096 --mode record
//!
//! # Create every ring declared in a file
//! ringcmd load rings.toml
//!
//! # Status of all rings, as JSON
//! ringcmd --json list
//!
//! # Push two records, then drain them
//! ringcmd write motion.cmd "G1 X10" "G1 Y20"
//! ringcmd read motion.cmd
//!
//! # Follow a ring until Ctrl-C
//! ringcmd read motion.feedback --follow
//! ```

#![deny(warnings)]

mod commands;

use clap::{Args as ClapArgs, Parser, Subcommand};
use commands::{Output, ReadOptions};
use ring_common::config::{ConfigLoader, LogLevel, RegistryConfig, RingsConfig};
use ring_common::consts::{DEFAULT_RING_DIR, DEFAULT_RING_PREFIX, DEFAULT_RING_SIZE};
use ring_common::ring::{RingMode, SaturationPolicy};
use ring_shm::{RingFlags, RingRegistry, RingSpec};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{Level, error, info};
use tracing_subscriber::EnvFilter;

/// Shared-memory ring management tool
#[derive(Parser, Debug)]
#[command(name = "ringcmd")]
#[command(author = "RTS007")]
#[command(version)]
#[command(about = "Create, inspect, feed and drain shared-memory rings")]
#[command(long_about = None)]
struct Args {
    /// Registry directory holding the ring segment files
    #[arg(long, default_value = DEFAULT_RING_DIR, global = true)]
    dir: PathBuf,

    /// Segment file name prefix
    #[arg(long, default_value = DEFAULT_RING_PREFIX, global = true)]
    prefix: String,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Machine-readable output and JSON logs
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a ring (attaches if it exists with identical parameters)
    #[command(alias = "new")]
    Newring(NewringArgs),

    /// Delete a ring
    #[command(alias = "del")]
    Delring {
        /// Ring name
        name: String,
        /// Delete even while handles are attached
        #[arg(short, long)]
        force: bool,
    },

    /// Status table of every ring
    List,

    /// Status of one ring, or of all rings
    Show {
        /// Ring name
        name: Option<String>,
    },

    /// Print unread contents without consuming them
    Dump {
        /// Ring name
        name: String,
    },

    /// Write each argument as one record, stream chunk or group; reads
    /// stdin lines when no data is given
    Write {
        /// Ring name
        name: String,
        /// Data to write
        data: Vec<String>,
    },

    /// Consume and print unread contents
    Read {
        /// Ring name
        name: String,
        /// Keep polling for new data until interrupted
        #[arg(short, long)]
        follow: bool,
        /// Stop after this many chunks
        #[arg(short = 'n', long)]
        count: Option<usize>,
        /// Poll interval for --follow, in milliseconds
        #[arg(long, default_value_t = 10)]
        poll_ms: u64,
    },

    /// Create every ring declared in a TOML file
    Load {
        /// Ring declaration file
        config: PathBuf,
    },

    /// Clear owner and lock words left by exited processes
    Reap {
        /// Ring name
        name: String,
    },
}

#[derive(ClapArgs, Debug)]
struct NewringArgs {
    /// Ring name
    name: String,

    /// Capacity in bytes (multiple of 8)
    #[arg(short, long, default_value_t = DEFAULT_RING_SIZE)]
    size: usize,

    /// Framing discipline: record, stream or multiframe
    #[arg(short, long, default_value = "record")]
    mode: RingMode,

    /// Scratchpad size in bytes
    #[arg(long, default_value_t = 0)]
    scratchpad: usize,

    /// Saturation policy: reject, drop_newest or retry:<attempts>:<backoff_us>
    #[arg(long, default_value = "reject", value_parser = commands::parse_policy)]
    policy: SaturationPolicy,

    /// Serialize readers through a shared-memory mutex
    #[arg(long)]
    reader_mutex: bool,

    /// Serialize writers through a shared-memory mutex
    #[arg(long)]
    writer_mutex: bool,

    /// Prefault and lock the segment pages
    #[arg(long)]
    locked_pages: bool,

    /// Advise transparent huge pages
    #[arg(long)]
    huge_pages: bool,

    /// Remove the segment when the last handle detaches
    #[arg(long)]
    unlink_on_last_detach: bool,
}

impl NewringArgs {
    fn spec(&self) -> RingSpec {
        let mut flags = RingFlags::empty();
        flags.set(RingFlags::READER_MUTEX, self.reader_mutex);
        flags.set(RingFlags::WRITER_MUTEX, self.writer_mutex);
        flags.set(RingFlags::LOCKED_PAGES, self.locked_pages);
        flags.set(RingFlags::HUGE_PAGES, self.huge_pages);
        flags.set(RingFlags::UNLINK_ON_LAST_DETACH, self.unlink_on_last_detach);

        RingSpec::new(self.size, self.mode)
            .with_flags(flags)
            .with_scratchpad(self.scratchpad)
            .with_policy(self.policy)
    }
}

fn main() {
    if let Err(e) = run() {
        error!("ringcmd failed: {}", e);
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // A declaration file carries its own log level; -v still wins.
    let declared = match &args.command {
        Command::Load { config } => Some(RingsConfig::load(config)?),
        _ => None,
    };
    setup_tracing(&args, declared.as_ref().map(|c| c.shared.log_level));

    let registry = RingRegistry::new(RegistryConfig {
        dir: args.dir.clone(),
        prefix: args.prefix.clone(),
    });
    let out = Output::new(args.json);
    let mut stdout = std::io::stdout().lock();

    match &args.command {
        Command::Newring(new) => commands::newring(&registry, &new.name, &new.spec(), &out, &mut stdout),
        Command::Delring { name, force } => commands::delring(&registry, name, *force, &out, &mut stdout),
        Command::List => commands::show(&registry, None, &out, &mut stdout),
        Command::Show { name } => commands::show(&registry, name.as_deref(), &out, &mut stdout),
        Command::Dump { name } => commands::dump(&registry, name, &out, &mut stdout),
        Command::Write { name, data } => {
            let payloads: Vec<Vec<u8>> = if data.is_empty() {
                std::io::stdin()
                    .lines()
                    .map(|line| line.map(String::into_bytes))
                    .collect::<Result<_, _>>()?
            } else {
                data.iter().map(|d| d.as_bytes().to_vec()).collect()
            };
            commands::write(&registry, name, &payloads, &out, &mut stdout)
        }
        Command::Read {
            name,
            follow,
            count,
            poll_ms,
        } => {
            let running = Arc::new(AtomicBool::new(true));
            if *follow {
                let flag = Arc::clone(&running);
                ctrlc::set_handler(move || {
                    info!("Received interrupt, stopping");
                    flag.store(false, Ordering::SeqCst);
                })?;
            }
            let options = ReadOptions {
                follow: *follow,
                count: *count,
                poll: std::time::Duration::from_millis(*poll_ms),
            };
            commands::read(&registry, name, &options, &running, &out, &mut stdout)
        }
        Command::Load { .. } => match &declared {
            Some(config) => commands::load(config, &out, &mut stdout),
            None => Ok(()),
        },
        Command::Reap { name } => commands::reap(&registry, name, &out, &mut stdout),
    }
}

/// Setup tracing subscriber based on CLI arguments. Logs go to stderr so
/// stdout carries only command output.
fn setup_tracing(args: &Args, declared: Option<LogLevel>) {
    let filter = if args.verbose {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else if let Some(level) = declared {
        EnvFilter::new(level.as_directive())
    } else {
        EnvFilter::from_default_env().add_directive(Level::WARN.into())
    };

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}
