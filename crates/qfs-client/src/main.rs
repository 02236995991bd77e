#![warn(missing_docs)]
//! QFS mount driver against a simulated QRPC device

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use qfs_client::{parse_mount_options, ClientConfig, FileSystemTable, QfsFileSystem};
use qfs_transport::{SimBehavior, SimDevice, SimProvider};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// How the simulated host answers.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Remote {
    /// Answer every command with OK
    Accept,
    /// Answer every command with ERROR
    Reject,
    /// Never complete a command
    Silent,
}

/// Mount QFS on a simulated QRPC device, report statfs and unmount.
#[derive(Debug, Parser)]
#[command(name = "qfs-mount", version)]
struct Args {
    /// Device name to mount
    #[arg(default_value = "/dev/qrpc0")]
    device: String,

    /// Comma-separated mount options (ro, rw, timeout_ms=N)
    #[arg(short, long, default_value = "")]
    options: String,

    /// Client config file (.toml or .json)
    #[arg(short, long, env = "QFS_CONFIG")]
    config: Option<PathBuf>,

    /// Behaviour of the simulated host
    #[arg(long, value_enum, default_value_t = Remote::Accept)]
    remote: Remote,

    /// Print statfs as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    tracing::info!("QFS mount driver starting...");

    let config = match &args.config {
        Some(path) => ClientConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => ClientConfig::default(),
    };
    let options = parse_mount_options(&args.options)?;

    let behavior = match args.remote {
        Remote::Accept => SimBehavior::Accept,
        Remote::Reject => SimBehavior::Reject,
        Remote::Silent => SimBehavior::Silent,
    };
    let provider = SimProvider::new();
    provider.add(SimDevice::new(&args.device, behavior));

    let table = FileSystemTable::new();
    table.register(Arc::new(QfsFileSystem::new(config)))?;
    let qfs = table
        .get(QfsFileSystem::NAME)
        .context("qfs filesystem type missing")?;

    let root = qfs.mount(&provider, &args.device, &options).await?;
    let stat = qfs_client::statfs::statfs(root.superblock());
    if args.json {
        println!("{}", serde_json::to_string_pretty(&stat)?);
    } else {
        println!(
            "{}: root ino {}, type {:#010x}, bsize {}, blocks {}, free {}, avail {}, namelen {}",
            args.device,
            root.ino(),
            stat.f_type,
            stat.f_bsize,
            stat.f_blocks,
            stat.f_bfree,
            stat.f_bavail,
            stat.f_namelen
        );
    }

    qfs.kill_sb(root.device_id()).await?;
    table.unregister(QfsFileSystem::NAME)?;
    Ok(())
}
