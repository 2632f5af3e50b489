//! MiniShare - LAN peer-to-peer file transfer

use anyhow::Result;
use clap::{Parser, Subcommand};
use minishare_core::{CipherKind, FileOutcome, SessionResult};
use minishare_discovery::{broadcast_discover, Responder};
use minishare_peer::session::EVENT_CHANNEL_CAPACITY;
use minishare_peer::{Config, ServerEvent, TransferClient, TransferEvent, TransferServer};
use std::io::Write;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "minishare")]
#[command(about = "Send files to devices on the local network", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "~/.minishare/config.toml")]
    config: String,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Shared passphrase (overrides config)
    #[arg(long)]
    passphrase: Option<String>,

    /// Payload cipher: chacha20-poly1305 or xor-insecure (overrides config)
    #[arg(long)]
    cipher: Option<CipherKind>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a config file with a fresh random passphrase
    Init {
        /// Overwrite an existing config
        #[arg(short, long)]
        force: bool,
    },

    /// List devices answering on the local network
    Discover {
        /// How long to wait for replies, in milliseconds
        #[arg(short, long)]
        timeout: Option<u64>,
    },

    /// Receive files and answer discovery probes
    Serve {
        /// Directory for received files (overrides config)
        #[arg(short, long)]
        receive_dir: Option<String>,

        /// Device name announced to probes (overrides config)
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Send files to a peer
    Send {
        /// Peer as IP, IP:PORT, or discovered device name
        #[arg(required = true)]
        peer: String,

        /// Files to send, in order
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let config_path = minishare_peer::config::expand_path(&cli.config);
    let load = || -> Result<Config> {
        let mut config = Config::load_or_default(&config_path)?;
        if let Some(passphrase) = &cli.passphrase {
            config.security.passphrase = Some(passphrase.clone());
        }
        if let Some(cipher) = cli.cipher {
            config.security.cipher = cipher;
        }
        Ok(config)
    };

    match &cli.command {
        Commands::Init { force } => {
            init_config(&config_path, *force)?;
        }
        Commands::Discover { timeout } => {
            let mut config = load()?;
            if let Some(ms) = timeout {
                config.network.discovery_timeout_ms = *ms;
            }
            discover(&config).await;
        }
        Commands::Serve { receive_dir, name } => {
            let mut config = load()?;
            if let Some(dir) = receive_dir {
                config.storage.receive_dir = dir.clone();
            }
            if let Some(name) = name {
                config.device_name = name.clone();
            }
            serve(&config).await?;
        }
        Commands::Send { peer, files } => {
            send(&load()?, peer, files.clone()).await?;
        }
    }

    Ok(())
}

fn init_config(path: &std::path::Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        println!("Config already exists at: {}", path.display());
        println!("Use --force to replace it.");
        return Ok(());
    }

    let mut secret = [0u8; 16];
    getrandom::getrandom(&mut secret)
        .map_err(|e| anyhow::anyhow!("cannot generate passphrase: {}", e))?;

    let mut config = Config::default();
    config.security.passphrase = Some(hex::encode(secret));
    config.save(path)?;

    println!("Initialized MiniShare at: {}", path.display());
    println!("Device name: {}", config.device_name);
    println!(
        "Passphrase: {}",
        config.security.passphrase.as_deref().unwrap_or_default()
    );
    println!();
    println!("Use the same passphrase on every device you want to share with.");

    Ok(())
}

async fn discover(config: &Config) {
    let discovery = config.discovery();
    println!(
        "Looking for devices ({} ms)...",
        discovery.timeout.as_millis()
    );

    let peers = broadcast_discover(&discovery).await;
    if peers.is_empty() {
        println!("No devices found");
        return;
    }

    println!("Found {} device(s):", peers.len());
    for (i, peer) in peers.iter().enumerate() {
        println!("{}. {}", i + 1, peer);
    }
}

async fn serve(config: &Config) -> Result<()> {
    let codec = config.codec()?;
    tracing::info!("Using cipher {}", codec.cipher_name());

    let (tx, mut events) = tokio::sync::mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let server = TransferServer::bind(
        SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), config.network.transfer_port),
        codec,
        config.receive_dir(),
        config.network.chunk_size,
    )
    .await?
    .with_events(tx);
    let transfer_port = server.local_addr()?.port();

    let responder = Responder::bind(
        SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), config.network.discovery_port),
        &config.device_name,
        transfer_port,
    )
    .await?;

    let responder_task = responder.spawn();
    let server_task = server.spawn();

    println!("Serving as {:?} on port {}", config.device_name, transfer_port);
    println!("Saving to {}", config.receive_dir().display());
    println!("Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => print_server_event(event),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                println!();
                println!("Shutting down");
                break;
            }
        }
    }

    responder_task.abort();
    server_task.abort();
    Ok(())
}

fn print_server_event(event: ServerEvent) {
    match event {
        ServerEvent::Connected { peer } => println!("{} connected", peer),
        ServerEvent::Progress { .. } => {}
        ServerEvent::FileReceived {
            peer,
            path,
            bytes,
            digest_ok,
            ..
        } => {
            if digest_ok {
                println!("Received {} ({} bytes) from {}", path.display(), bytes, peer);
            } else {
                println!(
                    "Received {} ({} bytes) from {} - WARNING: integrity check failed",
                    path.display(),
                    bytes,
                    peer
                );
            }
        }
        ServerEvent::FileFailed {
            peer,
            filename,
            reason,
        } => println!("Failed to receive {:?} from {}: {}", filename, peer, reason),
        ServerEvent::ConnectionFailed { peer, reason } => {
            println!("Connection from {} failed: {}", peer, reason)
        }
        ServerEvent::Disconnected { peer } => println!("{} disconnected", peer),
    }
}

/// Turn IP, IP:PORT, or a device name into a transfer address
async fn resolve_peer(config: &Config, peer: &str) -> Result<SocketAddr> {
    if let Ok(addr) = peer.parse::<SocketAddr>() {
        return Ok(addr);
    }
    if let Ok(ip) = peer.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, config.network.transfer_port));
    }

    tracing::info!("Looking up {:?} via discovery", peer);
    broadcast_discover(&config.discovery())
        .await
        .into_iter()
        .find(|p| {
            p.name
                .as_deref()
                .is_some_and(|name| name.eq_ignore_ascii_case(peer))
        })
        .map(|p| p.addr)
        .ok_or_else(|| anyhow::anyhow!("No device named {:?} answered discovery", peer))
}

async fn send(config: &Config, peer: &str, files: Vec<PathBuf>) -> Result<()> {
    for path in &files {
        if !path.is_file() {
            anyhow::bail!("File not found: {}", path.display());
        }
    }

    let addr = resolve_peer(config, peer).await?;
    let client = TransferClient::new(config.codec()?, config.network.chunk_size);

    println!("Sending {} file(s) to {}", files.len(), addr);

    let mut handle = client.spawn(addr, files);
    let cancel = handle.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!();
            eprintln!("Cancelling...");
            cancel.cancel();
        }
    });

    while let Some(event) = handle.next_event().await {
        match event {
            TransferEvent::Progress { fraction, filename } => {
                print!("\r{:>5.1}%  {:<40}", fraction * 100.0, filename);
                let _ = std::io::stdout().flush();
            }
            TransferEvent::FileFinished { filename, outcome } => {
                println!("\r{:<48}", format!("{}: {}", filename, describe(&outcome)));
            }
            TransferEvent::Finished(_) => {}
        }
    }

    let report = handle.join().await;
    println!();
    for file in &report.files {
        println!(
            "  {} ({} bytes) - {}",
            file.filename,
            file.plaintext_length,
            describe(&file.outcome)
        );
        if let Some(digest) = file.digest_hex() {
            println!("    BLAKE3: {}", digest);
        }
    }
    let delivered = report
        .files
        .iter()
        .filter(|file| file.outcome.is_delivered())
        .count();
    println!("Delivered {} of {} file(s)", delivered, report.files.len());
    println!("Result: {}", report.result);

    match report.result {
        SessionResult::Success | SessionResult::CompletedWithWarnings => Ok(()),
        SessionResult::Cancelled => anyhow::bail!("Transfer cancelled"),
        SessionResult::Failed(detail) => anyhow::bail!("Transfer failed: {}", detail),
    }
}

fn describe(outcome: &FileOutcome) -> String {
    match outcome {
        FileOutcome::Delivered => "delivered".to_string(),
        FileOutcome::DeliveredWithWarning(warning) => {
            format!("delivered with warning ({})", warning)
        }
        FileOutcome::Cancelled => "cancelled".to_string(),
        FileOutcome::Failed(reason) => format!("failed ({})", reason),
    }
}
