//! # Peer Worker
//!
//! One worker per peer, each on its own thread. A worker owns its
//! [`PeerSession`] outright and loops on the shared job queue: pull a piece,
//! download it block by block, verify it, hand the bytes to the coordinator.
//! Whatever goes wrong, the piece it was holding goes back on the queue so
//! another worker can cover it.
//!
//! ## Block pipeline
//!
//! Blocks are requested ahead of arrival, up to [`MAX_BACKLOG`] outstanding
//! requests, so the connection stays busy instead of ping-ponging one block
//! per round trip. A CHOKE rewinds `requested` to what actually arrived and
//! clears the backlog; the lost requests are reissued once the peer unchokes
//! again.
//!
//! ## Failure policy
//!
//! - Peer never advertised the piece: requeue, try the next job.
//! - I/O or protocol error mid-download: requeue and exit, the session is
//!   considered broken.
//! - Hash mismatch: requeue and keep going, the peer may still serve other
//!   pieces correctly. After [`MAX_PIECE_ATTEMPTS`] failed verifications the
//!   job is dropped and the coordinator's stall watchdog surfaces the
//!   failure.

use std::net::SocketAddrV4;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use boring::sha::Sha1;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};

use crate::message;
use crate::piece::{PieceJob, PieceResult};
use crate::session::PeerSession;

/// Largest number of bytes a single request may ask for.
pub const MAX_BLOCK_SIZE: u32 = 16384;

/// Unfulfilled requests a worker keeps in flight per piece.
pub const MAX_BACKLOG: u32 = 5;

/// Time allowed for one piece attempt, from first request to last block.
pub const PIECE_DEADLINE: Duration = Duration::from_secs(30);

/// Verification failures after which a piece is declared poisoned.
pub const MAX_PIECE_ATTEMPTS: u32 = 5;

// How often an idle worker wakes up to check for shutdown.
const QUEUE_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Download state for one piece attempt.
#[derive(Debug)]
struct PieceProgress {
    /// Scratch buffer the blocks land in
    buf: Vec<u8>,
    /// Bytes received and written into `buf`
    downloaded: u32,
    /// Bytes covered by requests sent so far
    requested: u32,
    /// Requests in flight and not yet answered
    backlog: u32,
}

impl PieceProgress {
    fn new(length: u32) -> PieceProgress {
        PieceProgress {
            buf: vec![0; length as usize],
            downloaded: 0,
            requested: 0,
            backlog: 0,
        }
    }
}

/// Downloads pieces from a single peer until the torrent completes or the
/// connection gives out.
pub struct Worker {
    addr: SocketAddrV4,
    our_id: [u8; 20],
    info_hash: [u8; 20],
    jobs: Sender<PieceJob>,
    queue: Receiver<PieceJob>,
    results: Sender<PieceResult>,
    done: Arc<AtomicBool>,
}

impl Worker {
    pub fn new(
        addr: SocketAddrV4,
        our_id: [u8; 20],
        info_hash: [u8; 20],
        jobs: Sender<PieceJob>,
        queue: Receiver<PieceJob>,
        results: Sender<PieceResult>,
        done: Arc<AtomicBool>,
    ) -> Worker {
        Worker {
            addr,
            our_id,
            info_hash,
            jobs,
            queue,
            results,
            done,
        }
    }

    /// Run the worker to completion. Errors never escape; an unusable peer is
    /// logged and abandoned.
    pub fn run(self) {
        // A peer we cannot establish a session with is simply unavailable
        let mut session = match PeerSession::connect(self.addr, self.our_id, self.info_hash) {
            Ok(session) => session,
            Err(e) => {
                debug!("Skipping peer {}: {e:#}", self.addr);
                return;
            }
        };

        if session.send_unchoke().is_err() || session.send_interested().is_err() {
            debug!("Peer {} went away before the first request", self.addr);
            return;
        }

        loop {
            let mut job = match self.next_job() {
                Some(job) => job,
                None => return,
            };

            // Skip pieces this peer does not have
            if !session.has_piece(job.index) {
                self.requeue(job);
                continue;
            }

            let buf = match attempt_piece(&mut session, &job) {
                Ok(buf) => buf,
                Err(e) => {
                    // The session is broken; give the job back and exit
                    warn!("Dropping peer {}: {e:#}", session.addr());
                    self.requeue(job);
                    return;
                }
            };

            if !verify_piece(&job, &buf) {
                warn!(
                    "Piece {} from peer {} failed its hash check",
                    job.index,
                    session.addr()
                );
                job.attempts += 1;
                if job.attempts >= MAX_PIECE_ATTEMPTS {
                    error!(
                        "Piece {} failed verification {} times, giving up on it",
                        job.index, job.attempts
                    );
                } else {
                    self.requeue(job);
                }
                continue;
            }

            info!("Downloaded and verified piece {}", job.index);

            // Let the peer know, then hand the piece to the coordinator
            if session.send_have(job.index).is_err() {
                debug!("Could not send HAVE to peer {}", session.addr());
            }
            if self
                .results
                .send(PieceResult::new(job.index, buf))
                .is_err()
            {
                // Coordinator is gone, nothing left to do
                return;
            }
        }
    }

    /// Pull the next job, waking periodically to notice shutdown.
    fn next_job(&self) -> Option<PieceJob> {
        loop {
            if self.done.load(Ordering::Relaxed) {
                return None;
            }
            match self.queue.recv_timeout(QUEUE_POLL_INTERVAL) {
                Ok(job) => return Some(job),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }

    /// Return a job to the shared queue. Every abandoned job must pass
    /// through here, a lost job would leave the download incomplete forever.
    fn requeue(&self, job: PieceJob) {
        if self.jobs.send(job).is_err() {
            debug!("Work queue closed while requeueing");
        }
    }
}

/// Drive the block pipeline until the piece is fully downloaded.
fn attempt_piece(session: &mut PeerSession, job: &PieceJob) -> Result<Vec<u8>> {
    let mut progress = PieceProgress::new(job.length);
    let deadline = Instant::now() + PIECE_DEADLINE;

    // Bound every read within the attempt; the elapsed check below bounds
    // the attempt as a whole even if the peer trickles bytes
    session.set_read_timeout(Some(PIECE_DEADLINE))?;

    while progress.downloaded < job.length {
        if Instant::now() >= deadline {
            return Err(anyhow!("piece {} timed out", job.index));
        }

        // Keep the request pipeline full while the peer serves us
        if !session.is_choked() {
            while progress.backlog < MAX_BACKLOG && progress.requested < job.length {
                let block_size = MAX_BLOCK_SIZE.min(job.length - progress.requested);

                session.send_request(job.index, progress.requested, block_size)?;

                progress.requested += block_size;
                progress.backlog += 1;
            }
        }

        let msg = match session.read_message()? {
            Some(msg) => msg,
            None => continue, // keep-alive
        };

        match msg.id {
            message::CHOKE => {
                session.set_choked(true);
                // In-flight requests are lost; rewind so they are reissued
                // after the next unchoke
                progress.requested = progress.downloaded;
                progress.backlog = 0;
            }
            message::UNCHOKE => session.set_choked(false),
            message::HAVE => {
                let index = msg.parse_have()?;
                session.record_have(index);
            }
            message::PIECE => {
                let n = msg.parse_piece(job.index, &mut progress.buf)?;
                progress.downloaded += n as u32;
                progress.backlog = progress.backlog.saturating_sub(1);
            }
            _ => {}
        }
    }

    Ok(progress.buf)
}

/// Compare the piece bytes against the expected digest.
fn verify_piece(job: &PieceJob, buf: &[u8]) -> bool {
    let mut hasher = Sha1::new();
    hasher.update(buf);

    hasher.finish() == job.hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_accepts_matching_digest() {
        let payload = vec![0x42; 1024];
        let mut hasher = Sha1::new();
        hasher.update(&payload);

        let job = PieceJob::new(0, hasher.finish(), 1024);

        assert!(verify_piece(&job, &payload));
    }

    #[test]
    fn verify_rejects_corrupted_payload() {
        let payload = vec![0x42; 1024];
        let mut hasher = Sha1::new();
        hasher.update(&payload);
        let job = PieceJob::new(0, hasher.finish(), 1024);

        let mut corrupted = payload;
        corrupted[17] ^= 0xFF;

        assert!(!verify_piece(&job, &corrupted));
    }
}
