//! # Peer Endpoints
//!
//! Trackers return peers in a compact binary list of 6-byte entries:
//!
//! ```text
//! <IP: 4 bytes><port: 2 bytes>
//! ```
//!
//! both in network byte order. This module decodes that list into socket
//! addresses.

use std::io::Cursor;
use std::net::{Ipv4Addr, SocketAddrV4};

use anyhow::{anyhow, Result};
use byteorder::{BigEndian, ReadBytesExt};

const COMPACT_PEER_LEN: usize = 6;

/// Decode a compact peer list into socket addresses.
///
/// Fails if the blob length is not a multiple of six bytes.
pub fn parse_compact_peers(raw: &[u8]) -> Result<Vec<SocketAddrV4>> {
    if !raw.len().is_multiple_of(COMPACT_PEER_LEN) {
        return Err(anyhow!("compact peer list of {} bytes is malformed", raw.len()));
    }

    let mut peers = Vec::with_capacity(raw.len() / COMPACT_PEER_LEN);

    for entry in raw.chunks_exact(COMPACT_PEER_LEN) {
        let ip = Ipv4Addr::new(entry[0], entry[1], entry[2], entry[3]);
        let port = Cursor::new(&entry[4..6]).read_u16::<BigEndian>()?;

        peers.push(SocketAddrV4::new(ip, port));
    }

    Ok(peers)
}
