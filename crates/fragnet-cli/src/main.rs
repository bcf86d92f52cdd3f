//! fragnet CLI
//!
//! Fragmented uploads to, and verified downloads from, a replicated storage
//! network. Runs against a local directory-backed devnet.

mod config;
mod progress;

use anyhow::Context;
use clap::{Parser, Subcommand};
use fragnet_core::devnet::{DiskNetwork, MemoryChain};
use fragnet_core::{
    Downloader, FinalityRequirement, NodeAffinity, SelectionMethod, TransferContext, Uploader,
    parse_roots,
};
use console::style;
use fragnet_files::{FileSource, LocalFile};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

use config::Config;
use progress::{ProgressDisplay, format_bytes, format_duration};

/// fragnet - fragmented, replicated, verified file transfer
#[derive(Parser)]
#[command(name = "fragnet")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the local devnet
    Devnet {
        #[command(subcommand)]
        action: DevnetAction,
    },

    /// Upload a file as replicated fragments
    Upload {
        /// File to upload
        #[arg(required = true)]
        file: PathBuf,

        /// Fragment size in bytes
        #[arg(long)]
        fragment_size: Option<u64>,

        /// Replicas per fragment
        #[arg(long)]
        replica: Option<usize>,

        /// Fragments in flight
        #[arg(long)]
        task_size: Option<usize>,

        /// Finality requirement: none, fragment or file
        #[arg(long)]
        finality: Option<FinalityRequirement>,

        /// Register fragment roots on chain
        #[arg(long)]
        with_tx: bool,

        /// Node ranking: min or random
        #[arg(long)]
        method: Option<SelectionMethod>,

        /// Allow untrusted nodes
        #[arg(long)]
        allow_untrusted: bool,

        /// Place every fragment on the same replica set
        #[arg(long)]
        pinned: bool,

        /// Write the root list here (printed to stdout otherwise)
        #[arg(long)]
        roots: Option<PathBuf>,

        /// Write a JSON manifest here
        #[arg(long)]
        manifest: Option<PathBuf>,

        /// Give up after this many seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Devnet root directory
        #[arg(long)]
        devnet: Option<PathBuf>,
    },

    /// Download and reassemble a file from its fragment roots
    Download {
        /// Root list or JSON manifest
        #[arg(long, required = true)]
        roots: PathBuf,

        /// Output file
        #[arg(short, long, required = true)]
        output: PathBuf,

        /// Skip fragment verification
        #[arg(long)]
        no_verify: bool,

        /// Fragments fetched concurrently
        #[arg(long)]
        task_size: Option<usize>,

        /// Give up after this many seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Devnet root directory
        #[arg(long)]
        devnet: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum DevnetAction {
    /// Create a devnet
    Init {
        /// Devnet root directory
        #[arg(long)]
        root: Option<PathBuf>,

        /// Trusted nodes
        #[arg(long, default_value_t = 4)]
        nodes: usize,

        /// Untrusted nodes
        #[arg(long, default_value_t = 0)]
        untrusted: usize,
    },

    /// List devnet nodes
    Nodes {
        /// Devnet root directory
        #[arg(long)]
        root: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => Config::load_or_default()?,
    };

    // Initialize logging
    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.level.clone()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Validate configuration
    config.validate()?;

    match cli.command {
        Commands::Devnet { action } => match action {
            DevnetAction::Init {
                root,
                nodes,
                untrusted,
            } => {
                let root = root.unwrap_or_else(|| config.devnet.root.clone());
                init_devnet(root, nodes, untrusted).await?;
            }
            DevnetAction::Nodes { root } => {
                let root = root.unwrap_or_else(|| config.devnet.root.clone());
                list_nodes(root).await?;
            }
        },
        Commands::Upload {
            file,
            fragment_size,
            replica,
            task_size,
            finality,
            with_tx,
            method,
            allow_untrusted,
            pinned,
            roots,
            manifest,
            timeout,
            devnet,
        } => {
            let mut config = config;
            let upload = &mut config.upload;
            if let Some(size) = fragment_size {
                upload.fragment_size = size;
            }
            if let Some(replica) = replica {
                upload.expected_replica = replica;
            }
            if let Some(task_size) = task_size {
                upload.task_size = task_size;
            }
            if let Some(finality) = finality {
                upload.finality = finality.to_string();
            }
            if let Some(method) = method {
                upload.method = method.to_string();
            }
            upload.skip_tx &= !with_tx;
            upload.full_trusted &= !allow_untrusted;
            upload.pinned |= pinned;
            if timeout.is_some() {
                upload.timeout_secs = timeout;
            }
            if let Some(devnet) = devnet {
                config.devnet.root = devnet;
            }
            config.validate()?;

            upload_file(file, roots, manifest, &config).await?;
        }
        Commands::Download {
            roots,
            output,
            no_verify,
            task_size,
            timeout,
            devnet,
        } => {
            let mut config = config;
            if let Some(task_size) = task_size {
                config.download.task_size = task_size;
            }
            config.download.verify &= !no_verify;
            if timeout.is_some() {
                config.download.timeout_secs = timeout;
            }
            if let Some(devnet) = devnet {
                config.devnet.root = devnet;
            }
            config.validate()?;

            download_file(roots, output, &config).await?;
        }
    }

    Ok(())
}

/// Context cancelled on Ctrl-C, with an optional timeout
fn transfer_context(timeout_secs: Option<u64>) -> TransferContext {
    let ctx = match timeout_secs {
        Some(secs) => TransferContext::with_timeout(Duration::from_secs(secs)),
        None => TransferContext::new(),
    };

    let interrupt = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling transfer");
            interrupt.cancel();
        }
    });

    ctx
}

/// Summary line on stderr, leaving stdout for the root list
fn field(name: &str, value: impl std::fmt::Display) {
    eprintln!("{} {}", style(format!("{name}:")).bold(), value);
}

/// Create a devnet
async fn init_devnet(root: PathBuf, nodes: usize, untrusted: usize) -> anyhow::Result<()> {
    let network = DiskNetwork::init(&root, nodes, untrusted).await?;
    field("Devnet", network.root().display());
    field("Nodes", format!("{nodes} trusted, {untrusted} untrusted"));
    Ok(())
}

/// List devnet nodes
async fn list_nodes(root: PathBuf) -> anyhow::Result<()> {
    let network = DiskNetwork::open(&root).await?;
    field("Devnet", network.root().display());
    for node in network.nodes() {
        println!(
            "  {:<16} {:<28} {}",
            node.id,
            node.address,
            if node.trusted { "trusted" } else { "untrusted" }
        );
    }
    Ok(())
}

/// Upload a file to the devnet
async fn upload_file(
    file: PathBuf,
    roots_out: Option<PathBuf>,
    manifest_out: Option<PathBuf>,
    config: &Config,
) -> anyhow::Result<()> {
    let source = LocalFile::open(&file)
        .await
        .with_context(|| format!("opening {}", file.display()))?;
    let file_size = source.size();
    let options = config.upload_options()?;

    field("File", file.display());
    field("Size", format_bytes(file_size));
    field(
        "Replica",
        format!(
            "{} ({}{})",
            options.expected_replica,
            options.method,
            if options.node_affinity == NodeAffinity::Pinned {
                ", pinned"
            } else {
                ""
            }
        ),
    );
    field("Finality", options.finality_required);

    let network = DiskNetwork::open(&config.devnet.root).await?;
    let chain = MemoryChain::new(Duration::from_millis(config.devnet.finality_delay_ms));
    let label = file
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload")
        .to_string();

    let (display, events) = ProgressDisplay::start(file_size, &format!("Uploading: {label}"));
    let uploader = Uploader::new(network.clone(), network, chain, options)?.with_events(events);

    let ctx = transfer_context(config.upload.timeout_secs);
    let started = Instant::now();
    let outcome = uploader
        .upload(&ctx, source, config.upload.fragment_size)
        .await;
    drop(uploader);

    let result = match outcome {
        Ok(result) => result,
        Err(err) => {
            display.abandon();
            return Err(err.into());
        }
    };
    display
        .finish(format!(
            "Uploaded {} fragment(s) in {}",
            result.len(),
            format_duration(started.elapsed())
        ))
        .await;

    if let Some(path) = &manifest_out {
        std::fs::write(path, result.to_json()?)
            .with_context(|| format!("writing {}", path.display()))?;
        field("Manifest", path.display());
    }
    match &roots_out {
        Some(path) => {
            std::fs::write(path, result.to_root_list())
                .with_context(|| format!("writing {}", path.display()))?;
            field("Roots", path.display());
        }
        None => print!("{}", result.to_root_list()),
    }

    Ok(())
}

/// Download a file from the devnet
async fn download_file(roots: PathBuf, output: PathBuf, config: &Config) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(&roots)
        .with_context(|| format!("reading {}", roots.display()))?;
    let roots = parse_roots(&text)?;

    let network: Arc<DiskNetwork> = DiskNetwork::open(&config.devnet.root).await?;
    let verify = config.download.verify;

    field("Fragments", roots.len());
    field("Output", output.display());
    field("Verify", verify);

    let (display, events) = ProgressDisplay::start(0, "Downloading");
    let downloader = Downloader::new(network, config.download_options())?.with_events(events);

    let ctx = transfer_context(config.download.timeout_secs);
    let started = Instant::now();
    let outcome = downloader.download(&ctx, &roots, &output, verify).await;
    drop(downloader);

    match outcome {
        Ok(bytes) => {
            display
                .finish(format!(
                    "Downloaded {} in {}",
                    format_bytes(bytes),
                    format_duration(started.elapsed())
                ))
                .await;
            Ok(())
        }
        Err(err) => {
            display.abandon();
            Err(err.into())
        }
    }
}
