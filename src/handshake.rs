//! # Connection Handshake
//!
//! The handshake is the only non-length-prefixed exchange on a peer
//! connection. It is a single fixed-layout blob sent by each side immediately
//! after the TCP connect:
//!
//! ```text
//! <pstrlen><pstr><reserved><info_hash><peer_id>
//! ```
//!
//! - **pstrlen**: 1 byte, length of the protocol string
//! - **pstr**: the literal `BitTorrent protocol` (19 bytes)
//! - **reserved**: 8 zero bytes, extension bits we neither set nor honor
//! - **info_hash**: 20 bytes, identifies the swarm
//! - **peer_id**: 20 bytes, identifies the sender
//!
//! Total size is `49 + pstrlen` bytes, 68 with the canonical protocol string.
//! A connection whose returned `info_hash` differs from ours is talking about
//! a different torrent and gets dropped.

use std::io::Read;

use anyhow::{anyhow, Result};

const PROTOCOL: &[u8] = b"BitTorrent protocol";

/// The fields both sides exchange when a connection opens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    /// 20-byte SHA-1 of the torrent's info dictionary
    pub info_hash: [u8; 20],
    /// 20-byte identifier of the sending peer
    pub peer_id: [u8; 20],
}

impl Handshake {
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Handshake {
        Handshake { info_hash, peer_id }
    }

    /// Serialize the handshake with the canonical protocol string.
    pub fn serialize(&self) -> Vec<u8> {
        let mut serialized = Vec::with_capacity(49 + PROTOCOL.len());

        serialized.push(PROTOCOL.len() as u8);
        serialized.extend_from_slice(PROTOCOL);
        serialized.extend_from_slice(&[0; 8]);
        serialized.extend_from_slice(&self.info_hash);
        serialized.extend_from_slice(&self.peer_id);

        serialized
    }

    /// Read a handshake from a stream.
    ///
    /// Accepts any non-empty protocol string so long as the rest of the blob
    /// is complete. Validating the info hash is the caller's job.
    pub fn read<R: Read>(reader: &mut R) -> Result<Handshake> {
        // Read pstrlen
        let mut len_buf = [0; 1];
        reader
            .read_exact(&mut len_buf)
            .map_err(|_| anyhow!("could not read handshake length from peer"))?;

        let pstrlen = len_buf[0] as usize;
        if pstrlen == 0 {
            return Err(anyhow!("peer sent a handshake with an empty protocol string"));
        }

        // Read the remaining pstr + reserved + info_hash + peer_id
        let mut buf = vec![0; pstrlen + 48];
        reader
            .read_exact(&mut buf)
            .map_err(|_| anyhow!("could not read handshake from peer"))?;

        let mut info_hash = [0; 20];
        info_hash.copy_from_slice(&buf[pstrlen + 8..pstrlen + 28]);

        let mut peer_id = [0; 20];
        peer_id.copy_from_slice(&buf[pstrlen + 28..pstrlen + 48]);

        Ok(Handshake { info_hash, peer_id })
    }
}
