//! # Download Coordinator
//!
//! Owns the shared job queue, the result channel, and the output buffer.
//! Startup seeds the queue with one job per piece and spawns one worker
//! thread per peer; session setup happens inside each worker so a dead peer
//! never stalls the others. The coordinator then sits on the result channel,
//! copying verified pieces into place until the count is reached.
//!
//! Workers never touch the output buffer. Pieces arrive in whatever order
//! the swarm produces them; the piece index alone decides where the bytes
//! land.

use std::net::SocketAddrV4;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Result};
use crossbeam_channel::{bounded, unbounded, RecvTimeoutError};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info};

use crate::metainfo::Metainfo;
use crate::piece::PieceJob;
use crate::worker::Worker;

/// Abort when no piece completes for this long. Covers both a swarm that
/// stopped serving and the case where every worker already exited.
const STALL_TIMEOUT: Duration = Duration::from_secs(60);

/// A fully described torrent, ready to download.
pub struct Torrent {
    /// Peers to pull from, one worker each
    pub peers: Vec<SocketAddrV4>,
    /// Our randomly generated peer id
    pub our_id: [u8; 20],
    /// SHA-1 of the bencoded info dictionary
    pub info_hash: [u8; 20],
    /// Per-piece SHA-1 digests
    pub piece_hashes: Vec<[u8; 20]>,
    /// Nominal piece size in bytes
    pub piece_length: u32,
    /// Total payload size in bytes
    pub total_length: u64,
    /// Suggested output filename
    pub name: String,
}

impl Torrent {
    /// Assemble a torrent from parsed metainfo, an identity, and a peer list.
    pub fn new(meta: Metainfo, our_id: [u8; 20], peers: Vec<SocketAddrV4>) -> Torrent {
        Torrent {
            peers,
            our_id,
            info_hash: meta.info_hash,
            piece_hashes: meta.piece_hashes,
            piece_length: meta.piece_length,
            total_length: meta.total_length,
            name: meta.name,
        }
    }

    /// Download the whole torrent and return its payload.
    ///
    /// Blocks until every piece is downloaded and verified, or until the
    /// download can provably no longer finish.
    pub fn download(&self) -> Result<Vec<u8>> {
        if self.peers.is_empty() {
            return Err(anyhow!("no peers to download from"));
        }

        let n_pieces = self.piece_hashes.len();
        info!("Downloading {:?} ({} pieces)", self.name, n_pieces);

        // The job queue can hold every piece at once, so requeueing a job
        // never blocks a worker
        let (job_tx, job_rx) = bounded::<PieceJob>(n_pieces);
        let (result_tx, result_rx) = unbounded();

        for (index, &hash) in self.piece_hashes.iter().enumerate() {
            let index = index as u32;
            let job = PieceJob::new(index, hash, self.piece_size(index));
            job_tx
                .send(job)
                .map_err(|_| anyhow!("could not seed the work queue"))?;
        }

        // One worker per peer; each connects on its own thread
        let done = Arc::new(AtomicBool::new(false));
        for &addr in &self.peers {
            let worker = Worker::new(
                addr,
                self.our_id,
                self.info_hash,
                job_tx.clone(),
                job_rx.clone(),
                result_tx.clone(),
                Arc::clone(&done),
            );

            thread::spawn(move || worker.run());
        }

        // Workers hold their own clones; dropping ours lets channel
        // disconnection mean "all workers gone"
        drop(job_tx);
        drop(result_tx);

        let progress = ProgressBar::new(self.total_length);
        progress.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} {bytes}/{total_bytes} [{bar:40.cyan/blue}] {percent}%")
                .unwrap()
                .progress_chars("#>-"),
        );

        // Assemble pieces as they complete
        let mut buf = vec![0; self.total_length as usize];
        let mut completed = 0;
        while completed < n_pieces {
            let result = match result_rx.recv_timeout(STALL_TIMEOUT) {
                Ok(result) => result,
                Err(RecvTimeoutError::Timeout) => {
                    done.store(true, Ordering::Relaxed);
                    return Err(anyhow!(
                        "download stalled with {} of {} pieces remaining",
                        n_pieces - completed,
                        n_pieces
                    ));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(anyhow!(
                        "every peer disconnected with {} of {} pieces remaining",
                        n_pieces - completed,
                        n_pieces
                    ));
                }
            };

            let begin = self.piece_offset(result.index) as usize;
            buf[begin..begin + result.bytes.len()].copy_from_slice(&result.bytes);

            completed += 1;
            progress.inc(result.bytes.len() as u64);
            debug!(
                "Assembled piece {} ({completed}/{n_pieces})",
                result.index
            );
        }

        // Completion is the shutdown signal; idle workers notice on their
        // next queue poll
        done.store(true, Ordering::Relaxed);
        progress.finish();

        Ok(buf)
    }

    /// Length of the piece at `index`; only the last piece may be short.
    fn piece_size(&self, index: u32) -> u32 {
        let begin = self.piece_offset(index);
        let end = (begin + self.piece_length as u64).min(self.total_length);

        (end - begin) as u32
    }

    /// Byte offset of the piece at `index` within the payload.
    fn piece_offset(&self, index: u32) -> u64 {
        index as u64 * self.piece_length as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_piece_torrent() -> Torrent {
        Torrent {
            peers: vec![],
            our_id: [1; 20],
            info_hash: [2; 20],
            piece_hashes: vec![[0; 20], [0; 20]],
            piece_length: 16384,
            total_length: 20000,
            name: "payload.bin".to_string(),
        }
    }

    #[test]
    fn last_piece_is_short() {
        let torrent = two_piece_torrent();

        assert_eq!(torrent.piece_size(0), 16384);
        assert_eq!(torrent.piece_size(1), 3616);
    }

    #[test]
    fn piece_offsets_are_uniform() {
        let torrent = two_piece_torrent();

        assert_eq!(torrent.piece_offset(0), 0);
        assert_eq!(torrent.piece_offset(1), 16384);
    }

    #[test]
    fn download_without_peers_fails_fast() {
        let torrent = two_piece_torrent();

        assert!(torrent.download().is_err());
    }
}
