//! # Tracker Announce
//!
//! Peer discovery over HTTP. Each tracker is asked once with a GET request
//! carrying the torrent identity and our transfer counters; the bencoded
//! response holds a compact peer list (see [`crate::peer`]).
//!
//! All unique tracker URLs from every tier are queried in parallel, each on
//! its own thread with its own timeout, and the surviving responses are
//! merged. A tracker that fails to resolve, times out, or returns garbage is
//! simply skipped; only an empty merged peer list is an error.

use std::collections::HashSet;
use std::net::SocketAddrV4;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Result};
use log::{debug, warn};
use serde::Deserialize;
use serde_bencode::de;
use serde_bytes::ByteBuf;
use url::Url;

use crate::metainfo::Metainfo;
use crate::peer::parse_compact_peers;

/// How long a single tracker gets to answer.
const ANNOUNCE_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
struct TrackerResponse {
    // Seconds until the tracker wants to hear from us again, unused by a
    // one-shot download
    #[serde(default)]
    #[allow(dead_code)]
    interval: u32,
    // Compact peer list, 6 bytes per peer
    peers: ByteBuf,
}

/// Ask every tracker for peers and merge the answers.
///
/// Returns the deduplicated peer list, or an error if no tracker produced a
/// usable response.
pub fn request_peers(meta: &Metainfo, peer_id: &[u8; 20], port: u16) -> Result<Vec<SocketAddrV4>> {
    // Flatten the tiers into a unique URL list
    let mut unique_urls = HashSet::new();
    for tier in &meta.trackers {
        for tracker_url in tier {
            unique_urls.insert(tracker_url.clone());
        }
    }

    if unique_urls.is_empty() {
        return Err(anyhow!("no tracker URLs available"));
    }

    // Collect compact peer blobs from the trackers that answer
    let peer_blobs = Arc::new(Mutex::new(Vec::new()));
    let mut handles = Vec::new();

    for tracker_url in unique_urls {
        let announce_url = match build_announce_url(
            &tracker_url,
            &meta.info_hash,
            peer_id,
            port,
            meta.total_length,
        ) {
            Ok(announce_url) => announce_url,
            Err(e) => {
                warn!("Skipping tracker {tracker_url}: {e}");
                continue;
            }
        };

        let peer_blobs = Arc::clone(&peer_blobs);
        handles.push(thread::spawn(move || {
            match announce(&announce_url) {
                Ok(blob) => {
                    if let Ok(mut guard) = peer_blobs.lock() {
                        guard.push(blob);
                    }
                }
                Err(e) => debug!("Tracker announce failed: {e}"),
            }
        }));
    }

    for handle in handles {
        let _ = handle.join();
    }

    // Parse and merge, skipping malformed lists
    let peer_blobs = peer_blobs
        .lock()
        .map_err(|_| anyhow!("tracker result collection poisoned"))?;
    let mut seen = HashSet::new();
    let mut peers = Vec::new();
    for blob in peer_blobs.iter() {
        match parse_compact_peers(blob) {
            Ok(parsed) => {
                for peer in parsed {
                    if seen.insert(peer) {
                        peers.push(peer);
                    }
                }
            }
            Err(e) => warn!("Discarding malformed peer list: {e}"),
        }
    }

    if peers.is_empty() {
        return Err(anyhow!("could not get peers from any tracker"));
    }

    debug!("Trackers produced {} unique peers", peers.len());

    Ok(peers)
}

/// Send one announce request and return the compact peer blob.
fn announce(announce_url: &str) -> Result<Vec<u8>> {
    let client = reqwest::blocking::Client::builder()
        .timeout(ANNOUNCE_TIMEOUT)
        .build()?;

    let response = client.get(announce_url).send()?.bytes()?;

    let tracker: TrackerResponse =
        de::from_bytes(&response).map_err(|e| anyhow!("could not decode tracker response: {e}"))?;

    Ok(tracker.peers.to_vec())
}

/// Build the announce URL with the standard query parameters.
fn build_announce_url(
    announce: &str,
    info_hash: &[u8; 20],
    peer_id: &[u8; 20],
    port: u16,
    left: u64,
) -> Result<String> {
    // Check the base URL parses before gluing a query onto it
    let base_url =
        Url::parse(announce).map_err(|_| anyhow!("could not parse tracker url {announce}"))?;

    let query = format!(
        "info_hash={}&peer_id={}&port={}&uploaded=0&downloaded=0&compact=1&left={}&event=started",
        percent_encode(info_hash),
        percent_encode(peer_id),
        port,
        left
    );

    let mut full_url = base_url.to_string();
    full_url.push(if full_url.contains('?') { '&' } else { '?' });
    full_url.push_str(&query);

    Ok(full_url)
}

/// Encode arbitrary bytes as %XX escapes, the form trackers expect for the
/// two binary query parameters.
fn percent_encode(data: &[u8]) -> String {
    const HEX_DIGITS: &[u8] = b"0123456789ABCDEF";

    let mut encoded = String::with_capacity(data.len() * 3);
    for &byte in data {
        encoded.push('%');
        encoded.push(HEX_DIGITS[(byte >> 4) as usize] as char);
        encoded.push(HEX_DIGITS[(byte & 0x0F) as usize] as char);
    }

    encoded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_encodes_every_byte() {
        assert_eq!(percent_encode(&[0x00, 0x1F, 0xAB, 0xFF]), "%00%1F%AB%FF");
    }

    #[test]
    fn announce_url_carries_all_parameters() {
        let url = build_announce_url(
            "http://tracker.example/announce",
            &[0x12; 20],
            &[0x34; 20],
            6881,
            20000,
        )
        .unwrap();

        assert!(url.starts_with("http://tracker.example/announce?"));
        assert!(url.contains(&format!("info_hash={}", "%12".repeat(20))));
        assert!(url.contains(&format!("peer_id={}", "%34".repeat(20))));
        assert!(url.contains("port=6881"));
        assert!(url.contains("uploaded=0"));
        assert!(url.contains("downloaded=0"));
        assert!(url.contains("compact=1"));
        assert!(url.contains("left=20000"));
    }

    #[test]
    fn announce_url_appends_to_existing_query() {
        let url = build_announce_url(
            "http://tracker.example/announce?key=abc",
            &[0; 20],
            &[0; 20],
            6881,
            1,
        )
        .unwrap();

        assert!(url.contains("key=abc&info_hash="));
    }

    #[test]
    fn announce_url_rejects_garbage() {
        assert!(build_announce_url("not a url", &[0; 20], &[0; 20], 6881, 1).is_err());
    }
}
