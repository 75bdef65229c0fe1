//! # Leech
//!
//! A single-torrent, download-only BitTorrent client.
//!
//! ## Architecture
//!
//! The client is a pool of per-peer worker threads cooperating through
//! channels:
//!
//! - **Coordinator** ([`download`]): seeds a shared queue with one job per
//!   piece, spawns a worker per peer, and assembles verified pieces into the
//!   final buffer.
//! - **Workers** ([`worker`]): each drives the peer wire protocol over one
//!   TCP connection, pipelining block requests and verifying piece hashes.
//! - **Collaborators**: [`metainfo`] parses the `.torrent` file, [`tracker`]
//!   discovers peers over HTTP.
//!
//! Pieces may complete in any order and on any worker; failed pieces rotate
//! back through the queue until a peer serves them correctly.

pub mod bitfield;
pub mod download;
pub mod handshake;
pub mod message;
pub mod metainfo;
pub mod peer;
pub mod piece;
pub mod session;
pub mod tracker;
pub mod worker;
