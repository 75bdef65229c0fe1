//! # Torrent Metainfo
//!
//! Parses the bencoded `.torrent` format into the descriptor the rest of the
//! client works from:
//!
//! - **announce / announce-list**: tracker URLs, the latter as tiers (BEP 12)
//! - **info.pieces**: concatenated 20-byte SHA-1 digests, one per piece
//! - **info.piece length**: nominal piece size
//! - **info.length**: total file size (single-file torrents only)
//! - **info.name**: suggested output filename
//!
//! The info hash, the torrent's identity on the wire and towards trackers, is
//! the SHA-1 of the bencoded `info` dictionary.

use anyhow::{anyhow, Result};
use boring::sha::Sha1;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use serde_bencode::{de, ser};
use serde_bytes::ByteBuf;

const SHA1_LEN: usize = 20;

/// Everything a download needs from a `.torrent` file.
#[derive(Debug, Clone)]
pub struct Metainfo {
    /// Tracker tiers, each a list of URLs tried in order
    pub trackers: Vec<Vec<String>>,
    /// SHA-1 of the bencoded info dictionary
    pub info_hash: [u8; 20],
    /// Per-piece SHA-1 digests, in piece order
    pub piece_hashes: Vec<[u8; 20]>,
    /// Nominal piece size in bytes, every piece but possibly the last
    pub piece_length: u32,
    /// Total file size in bytes
    pub total_length: u64,
    /// Suggested output filename
    pub name: String,
}

#[derive(Deserialize, Serialize)]
struct RawInfo {
    // Concatenated 20-byte SHA-1 digests of all pieces
    pieces: ByteBuf,
    #[serde(rename = "piece length")]
    piece_length: u32,
    length: u64,
    name: String,
}

#[derive(Deserialize, Serialize)]
struct RawTorrent {
    #[serde(default)]
    announce: String,
    #[serde(rename = "announce-list", default)]
    announce_list: Vec<Vec<String>>,
    info: RawInfo,
}

impl RawInfo {
    /// SHA-1 of the re-bencoded info dictionary.
    fn info_hash(&self) -> Result<[u8; 20]> {
        let encoded = ser::to_bytes(self)?;

        let mut hasher = Sha1::new();
        hasher.update(&encoded);

        Ok(hasher.finish())
    }

    /// Split the concatenated digest blob into per-piece hashes.
    fn piece_hashes(&self) -> Result<Vec<[u8; 20]>> {
        if !self.pieces.len().is_multiple_of(SHA1_LEN) {
            return Err(anyhow!(
                "pieces field of {} bytes is not a whole number of SHA-1 digests",
                self.pieces.len()
            ));
        }

        let mut hashes = Vec::with_capacity(self.pieces.len() / SHA1_LEN);
        for digest in self.pieces.chunks_exact(SHA1_LEN) {
            let mut hash = [0; SHA1_LEN];
            hash.copy_from_slice(digest);
            hashes.push(hash);
        }

        Ok(hashes)
    }
}

impl Metainfo {
    /// Parse the raw bytes of a `.torrent` file.
    pub fn from_bytes(raw: &[u8]) -> Result<Metainfo> {
        let bencode: RawTorrent =
            de::from_bytes(raw).map_err(|e| anyhow!("could not decode torrent: {e}"))?;

        // Prefer announce-list, shuffling each tier as BEP 12 asks
        let trackers = if !bencode.announce_list.is_empty() {
            let mut tiers = bencode.announce_list;
            let mut rng = rand::thread_rng();
            for tier in &mut tiers {
                tier.shuffle(&mut rng);
            }
            tiers
        } else if !bencode.announce.is_empty() {
            vec![vec![bencode.announce]]
        } else {
            return Err(anyhow!("torrent has no announce or announce-list"));
        };

        let info = bencode.info;
        if info.piece_length == 0 {
            return Err(anyhow!("torrent has a zero piece length"));
        }
        if info.length == 0 {
            return Err(anyhow!("torrent has a zero total length"));
        }

        let piece_hashes = info.piece_hashes()?;
        let expected_pieces = info.length.div_ceil(info.piece_length as u64) as usize;
        if piece_hashes.len() != expected_pieces {
            return Err(anyhow!(
                "torrent carries {} piece hashes but its length implies {}",
                piece_hashes.len(),
                expected_pieces
            ));
        }

        Ok(Metainfo {
            trackers,
            info_hash: info.info_hash()?,
            piece_hashes,
            piece_length: info.piece_length,
            total_length: info.length,
            name: info.name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_torrent(announce: &str, piece_length: u32, length: u64, n_pieces: usize) -> Vec<u8> {
        let raw = RawTorrent {
            announce: announce.to_string(),
            announce_list: vec![],
            info: RawInfo {
                pieces: ByteBuf::from(vec![0x5A; n_pieces * SHA1_LEN]),
                piece_length,
                length,
                name: "payload.bin".to_string(),
            },
        };

        ser::to_bytes(&raw).unwrap()
    }

    #[test]
    fn parses_a_single_file_torrent() {
        let raw = encode_torrent("http://tracker.example/announce", 16384, 20000, 2);

        let meta = Metainfo::from_bytes(&raw).unwrap();

        assert_eq!(
            meta.trackers,
            vec![vec!["http://tracker.example/announce".to_string()]]
        );
        assert_eq!(meta.piece_length, 16384);
        assert_eq!(meta.total_length, 20000);
        assert_eq!(meta.name, "payload.bin");
        assert_eq!(meta.piece_hashes.len(), 2);
        assert_eq!(meta.piece_hashes[0], [0x5A; 20]);
    }

    #[test]
    fn info_hash_is_sha1_of_bencoded_info() {
        let raw = encode_torrent("http://tracker.example/announce", 16384, 16384, 1);
        let meta = Metainfo::from_bytes(&raw).unwrap();

        let info = RawInfo {
            pieces: ByteBuf::from(vec![0x5A; SHA1_LEN]),
            piece_length: 16384,
            length: 16384,
            name: "payload.bin".to_string(),
        };
        let mut hasher = Sha1::new();
        hasher.update(&ser::to_bytes(&info).unwrap());

        assert_eq!(meta.info_hash, hasher.finish());
    }

    #[test]
    fn rejects_ragged_pieces_blob() {
        let raw = RawTorrent {
            announce: "http://tracker.example/announce".to_string(),
            announce_list: vec![],
            info: RawInfo {
                pieces: ByteBuf::from(vec![0x5A; 30]),
                piece_length: 16384,
                length: 16384,
                name: "payload.bin".to_string(),
            },
        };

        assert!(Metainfo::from_bytes(&ser::to_bytes(&raw).unwrap()).is_err());
    }

    #[test]
    fn rejects_piece_count_mismatch() {
        // 20000 bytes at 16384 per piece needs two hashes, not three
        let raw = encode_torrent("http://tracker.example/announce", 16384, 20000, 3);

        assert!(Metainfo::from_bytes(&raw).is_err());
    }

    #[test]
    fn rejects_missing_announce() {
        let raw = RawTorrent {
            announce: String::new(),
            announce_list: vec![],
            info: RawInfo {
                pieces: ByteBuf::from(vec![0x5A; SHA1_LEN]),
                piece_length: 16384,
                length: 16384,
                name: "payload.bin".to_string(),
            },
        };

        assert!(Metainfo::from_bytes(&ser::to_bytes(&raw).unwrap()).is_err());
    }

    #[test]
    fn announce_list_wins_over_announce() {
        let raw = RawTorrent {
            announce: "http://fallback.example/announce".to_string(),
            announce_list: vec![vec!["http://primary.example/announce".to_string()]],
            info: RawInfo {
                pieces: ByteBuf::from(vec![0x5A; SHA1_LEN]),
                piece_length: 16384,
                length: 16384,
                name: "payload.bin".to_string(),
            },
        };

        let meta = Metainfo::from_bytes(&ser::to_bytes(&raw).unwrap()).unwrap();

        assert_eq!(
            meta.trackers,
            vec![vec!["http://primary.example/announce".to_string()]]
        );
    }
}
