//! Pixsync CLI - Command-line interface for pixsync
//!
//! Serves a directory of images to pixel-art tools over WebSocket and
//! offers peer-side commands for poking at a running bridge.

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;
mod host;

#[derive(Parser)]
#[command(name = "pixsync")]
#[command(author = "Pixsync Contributors")]
#[command(version)]
#[command(about = "Keep pixel-art tools in sync with a host's images", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize pixsync in a directory
    Init {
        /// Path to initialize (defaults to current directory)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Serve a directory of PNG images to connected tools
    Serve {
        /// Directory to serve (defaults to current directory)
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Port to listen on (overrides the config file)
        #[arg(short, long)]
        port: Option<u16>,

        /// Address to bind (overrides the config file)
        #[arg(long)]
        host: Option<String>,

        /// Wait for a `start` command instead of listening right away
        #[arg(long)]
        no_autostart: bool,
    },

    /// List the images a running bridge serves
    Inventory {
        /// Bridge address
        #[arg(short, long, default_value = "127.0.0.1:8765")]
        addr: String,
    },

    /// Push an image file to a running bridge
    Sync {
        /// Resource name, e.g. sprite.png
        image: String,

        /// File holding the new pixels
        file: PathBuf,

        /// Bridge address
        #[arg(short, long, default_value = "127.0.0.1:8765")]
        addr: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .with(tracing_subscriber::EnvFilter::new(filter))
        .init();

    let result = match cli.command {
        Commands::Init { path } => commands::init(&path),
        Commands::Serve {
            path,
            port,
            host,
            no_autostart,
        } => commands::serve(&path, port, host, no_autostart).await,
        Commands::Inventory { addr } => commands::inventory(&addr).await,
        Commands::Sync { image, file, addr } => commands::sync(&image, &file, &addr).await,
    };

    if let Err(e) = result {
        eprintln!("{} {}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}
