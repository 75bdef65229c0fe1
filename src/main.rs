//! Command-line entry point: parse the torrent, announce, download, save.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use rand::Rng;

use leech::download::Torrent;
use leech::metainfo::Metainfo;
use leech::tracker;

// Port we report to trackers; the client never listens on it
const PORT: u16 = 6881;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "A single-torrent BitTorrent download client, written in Rust."
)]
struct Args {
    /// Path to the .torrent file
    torrent: String,

    /// Output filename (defaults to name from torrent)
    #[arg(short = 'o', long)]
    output: Option<String>,
}

/// Generate the random 20-byte identity we present to trackers and peers.
fn generate_peer_id() -> [u8; 20] {
    let mut peer_id = [0; 20];
    rand::thread_rng().fill(&mut peer_id[..]);

    peer_id
}

/// Strip path separators so a hostile torrent name cannot escape the
/// working directory.
fn sanitize_filename(name: &str) -> String {
    let safe_name = name.replace(['/', '\\'], "_");

    if safe_name.trim().is_empty() {
        "download".to_string()
    } else {
        safe_name
    }
}

fn run(args: Args) -> Result<()> {
    let raw = fs::read(&args.torrent)
        .with_context(|| format!("could not read torrent file {}", args.torrent))?;
    let meta = Metainfo::from_bytes(&raw)?;

    // Decide where the payload goes before spending time downloading
    let default_name = sanitize_filename(&meta.name);
    let output_name = args.output.as_deref().unwrap_or(&default_name);

    if Path::new(output_name).exists() {
        println!("Output file '{output_name}' already exists.");
        print!("Do you want to overwrite it? (y/N): ");
        io::stdout().flush()?;

        let mut answer = String::new();
        io::stdin().read_line(&mut answer)?;
        let answer = answer.trim().to_lowercase();

        if answer != "y" && answer != "yes" {
            println!("Download cancelled.");
            return Ok(());
        }
    }

    let our_id = generate_peer_id();
    let peers = tracker::request_peers(&meta, &our_id, PORT)?;

    let torrent = Torrent::new(meta, our_id, peers);
    let data = torrent.download()?;

    fs::write(output_name, data)
        .map_err(|e| anyhow!("could not write data to file '{output_name}': {e}"))?;

    println!("Saved in \"{output_name}\".");

    Ok(())
}

fn main() {
    pretty_env_logger::init_timed();

    let args = Args::parse();

    if let Err(error) = run(args) {
        eprintln!("Error: {error:#}");
        std::process::exit(1);
    }
}
