//! # Peer Session
//!
//! One TCP connection to one peer. Construction is a fixed three-step
//! sequence, each step under its own deadline:
//!
//! 1. Dial the peer (3 s connect timeout).
//! 2. Exchange handshakes and verify the info hash (3 s).
//! 3. Read the mandatory BITFIELD message (5 s) and keep it as the peer's
//!    piece snapshot.
//!
//! Any failure drops the socket and the peer. A live session starts choked;
//! the piece-download layer flips the flag as CHOKE/UNCHOKE messages arrive
//! and owns all further read deadlines.

use std::io::Write;
use std::net::{SocketAddr, SocketAddrV4, TcpStream};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use log::debug;

use crate::bitfield::Bitfield;
use crate::handshake::Handshake;
use crate::message::{self, Message};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(3);
const BITFIELD_TIMEOUT: Duration = Duration::from_secs(5);

/// An established connection to a remote peer.
pub struct PeerSession {
    conn: TcpStream,
    addr: SocketAddrV4,
    /// Whether the peer currently refuses to serve our requests
    choked: bool,
    /// The peer's advertised pieces, updated by HAVE messages
    bitfield: Bitfield,
    /// The peer's self-reported id, observed but not validated
    #[allow(dead_code)]
    peer_id: [u8; 20],
}

impl PeerSession {
    /// Dial a peer and run the connection preamble.
    pub fn connect(addr: SocketAddrV4, our_id: [u8; 20], info_hash: [u8; 20]) -> Result<PeerSession> {
        let conn = TcpStream::connect_timeout(&SocketAddr::V4(addr), CONNECT_TIMEOUT)
            .with_context(|| format!("could not connect to peer {addr}"))?;

        conn.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;
        conn.set_write_timeout(Some(HANDSHAKE_TIMEOUT))?;

        let peer_id = exchange_handshakes(&conn, our_id, info_hash)
            .with_context(|| format!("handshake with peer {addr} failed"))?;

        // The peer must open with its bitfield
        conn.set_read_timeout(Some(BITFIELD_TIMEOUT))?;
        let bitfield = read_initial_bitfield(&conn)
            .with_context(|| format!("could not read bitfield from peer {addr}"))?;

        debug!("Session established with peer {addr}");

        Ok(PeerSession {
            conn,
            addr,
            choked: true,
            bitfield,
            peer_id,
        })
    }

    pub fn addr(&self) -> SocketAddrV4 {
        self.addr
    }

    pub fn is_choked(&self) -> bool {
        self.choked
    }

    pub fn set_choked(&mut self, choked: bool) {
        self.choked = choked;
    }

    /// Whether the peer advertises the piece at `index`.
    pub fn has_piece(&self, index: u32) -> bool {
        self.bitfield.has(index)
    }

    /// Record a HAVE announcement in the peer's bitfield.
    pub fn record_have(&mut self, index: u32) {
        self.bitfield.set(index);
    }

    /// Bound how long a single read may block. `None` blocks forever.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.conn
            .set_read_timeout(timeout)
            .map_err(|_| anyhow!("could not set read timeout on peer {}", self.addr))
    }

    /// Block for the next framed message; `None` is a keep-alive.
    pub fn read_message(&mut self) -> Result<Option<Message>> {
        Message::read(&mut self.conn)
    }

    pub fn send_request(&mut self, index: u32, begin: u32, length: u32) -> Result<()> {
        debug!(
            "Send REQUEST for piece {index} [{begin}:{}] to peer {}",
            begin + length,
            self.addr
        );
        self.send(&Message::request(index, begin, length))
    }

    pub fn send_interested(&mut self) -> Result<()> {
        self.send(&Message::new(message::INTERESTED))
    }

    pub fn send_not_interested(&mut self) -> Result<()> {
        self.send(&Message::new(message::NOT_INTERESTED))
    }

    pub fn send_unchoke(&mut self) -> Result<()> {
        self.send(&Message::new(message::UNCHOKE))
    }

    pub fn send_choke(&mut self) -> Result<()> {
        self.send(&Message::new(message::CHOKE))
    }

    pub fn send_have(&mut self, index: u32) -> Result<()> {
        self.send(&Message::have(index))
    }

    fn send(&mut self, msg: &Message) -> Result<()> {
        self.conn
            .write_all(&msg.serialize())
            .map_err(|_| anyhow!("could not send message {} to peer {}", msg.id, self.addr))
    }
}

/// Send our handshake, read the peer's, and check it is for our torrent.
/// Returns the peer's self-reported id.
fn exchange_handshakes(
    mut conn: &TcpStream,
    our_id: [u8; 20],
    info_hash: [u8; 20],
) -> Result<[u8; 20]> {
    let ours = Handshake::new(info_hash, our_id);
    conn.write_all(&ours.serialize())?;

    let theirs = Handshake::read(&mut conn)?;
    if theirs.info_hash != info_hash {
        return Err(anyhow!("peer answered with a different info hash"));
    }

    Ok(theirs.peer_id)
}

/// Require the first framed message to be a BITFIELD and wrap its payload.
fn read_initial_bitfield(mut conn: &TcpStream) -> Result<Bitfield> {
    let msg = Message::read(&mut conn)?
        .ok_or_else(|| anyhow!("peer sent a keep-alive before its bitfield"))?;

    if msg.id != message::BITFIELD {
        return Err(anyhow!("expected BITFIELD, got message ID {}", msg.id));
    }

    Ok(Bitfield::new(msg.payload))
}
