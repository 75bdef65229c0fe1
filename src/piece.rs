//! # Piece Jobs and Results
//!
//! A torrent is downloaded piece by piece. Each piece gets one [`PieceJob`]
//! on the shared work queue at startup; the job circulates among workers
//! until some worker downloads and verifies the piece, at which point a
//! [`PieceResult`] travels to the coordinator for assembly.

/// One piece waiting to be downloaded.
#[derive(Debug, Clone)]
pub struct PieceJob {
    /// Zero-based index of the piece within the torrent
    pub index: u32,
    /// Expected SHA-1 digest of the piece bytes
    pub hash: [u8; 20],
    /// Length of this piece in bytes (the last piece may be short)
    pub length: u32,
    /// How many times the piece has failed verification
    pub attempts: u32,
}

/// One downloaded, verified piece.
#[derive(Debug, Clone)]
pub struct PieceResult {
    /// Zero-based index of the piece within the torrent
    pub index: u32,
    /// The piece payload, exactly `length` bytes
    pub bytes: Vec<u8>,
}

impl PieceJob {
    pub fn new(index: u32, hash: [u8; 20], length: u32) -> PieceJob {
        PieceJob {
            index,
            hash,
            length,
            attempts: 0,
        }
    }
}

impl PieceResult {
    pub fn new(index: u32, bytes: Vec<u8>) -> PieceResult {
        PieceResult { index, bytes }
    }
}
