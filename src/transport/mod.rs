pub use mem::{MemSocket, DEFAULT_QUEUE_CAPACITY};

pub mod mem;

use crate::error::{TransportError, TransportResult};
use crate::message::Message;
use crate::readiness::Readiness;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::os::fd::RawFd;

/// Messaging pattern of a socket, fixed at creation.
///
/// Configuration of the transport, opaque to the bridge: adapters and the
/// poll hook behave identically for every kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum SocketKind {
    Pair,
    Push,
    Pull,
    Req,
    Rep,
}

impl fmt::Display for SocketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SocketKind::Pair => "pair",
            SocketKind::Push => "push",
            SocketKind::Pull => "pull",
            SocketKind::Req => "req",
            SocketKind::Rep => "rep",
        };
        write!(f, "{name}")
    }
}

/// Contract of the collaborator socket the bridge adapts.
///
/// The socket is strictly non-blocking. Its readiness is a level-queryable
/// bitmask, while its pollable descriptor only *edges* when that bitmask may
/// have transitioned: consuming the one available edge and then asking the
/// OS to wait again is exactly the race the poll hook closes.
pub trait TransportSocket: 'static {
    /// Messaging pattern this socket was created with.
    fn kind(&self) -> SocketKind;

    /// Level query of the current readiness bitmask.
    ///
    /// Implementations may clear their pending descriptor signal here, the
    /// way the real transport folds signal handling into its events query.
    fn readiness(&mut self) -> TransportResult<Readiness>;

    /// Descriptor to hand to the host loop. Edge semantics only; never read
    /// from it directly.
    fn pollable_fd(&self) -> RawFd;

    /// Non-blocking receive of one message part.
    fn recv(&mut self) -> TransportResult<Message>;

    /// Non-blocking send of one message part. `WouldBlock` means the peer
    /// queue has no room right now.
    fn send(&mut self, msg: &Message) -> TransportResult<()>;

    // Lifecycle pass-throughs. Transports that are born connected (such as
    // the in-process pair) keep the defaults.

    fn bind(&mut self, _endpoint: &str) -> TransportResult<()> {
        Err(TransportError::Unsupported("bind"))
    }

    fn unbind(&mut self, _endpoint: &str) -> TransportResult<()> {
        Err(TransportError::Unsupported("unbind"))
    }

    fn connect(&mut self, _endpoint: &str) -> TransportResult<()> {
        Err(TransportError::Unsupported("connect"))
    }

    fn disconnect(&mut self, _endpoint: &str) -> TransportResult<()> {
        Err(TransportError::Unsupported("disconnect"))
    }
}
