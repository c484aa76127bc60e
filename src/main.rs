//! Talus target daemon.

use clap::Parser;
use std::path::PathBuf;
use talus::config::TalusConfig;

#[derive(Parser)]
#[command(name = "talusd", about = "Talus storage target daemon", version)]
struct Args {
    /// Path to a JSON configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Mountpath override (repeatable).
    #[arg(long)]
    mountpath: Vec<PathBuf>,

    /// Listen port override.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => match TalusConfig::from_file(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("talusd: {}", e);
                std::process::exit(1);
            }
        },
        None => TalusConfig::development(PathBuf::from("/tmp/talus/mp1")),
    };
    if !args.mountpath.is_empty() {
        config.storage.mountpaths = args.mountpath;
    }
    if let Some(port) = args.port {
        config.node.port = port;
    }

    if let Err(e) = talus::run(config).await {
        eprintln!("talusd: {}", e);
        std::process::exit(1);
    }
}
