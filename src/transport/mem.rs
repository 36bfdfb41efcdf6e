use crate::error::{TransportError, TransportResult};
use crate::message::Message;
use crate::readiness::Readiness;
use crate::transport::{SocketKind, TransportSocket};
use mio::unix::pipe;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Default per-direction queue depth of an in-process pair.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

struct Queue {
    items: VecDeque<Message>,
    capacity: usize,
}

impl Queue {
    fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    #[inline]
    fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }
}

struct Shared {
    a_to_b: Mutex<Queue>,
    b_to_a: Mutex<Queue>,
    a_alive: AtomicBool,
    b_alive: AtomicBool,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Side {
    A,
    B,
}

/// In-process transport endpoint with the readiness semantics of the real
/// thing: a bounded queue per direction, a level-queryable bitmask, and a
/// signal descriptor that edges only when the bitmask may have transitioned.
///
/// Arrivals that do not change the bitmask (a push into an already non-empty
/// queue) deliberately produce no edge; discovering them is the poll hook's
/// job. Endpoints are `Send`, so the peer may live on another thread.
pub struct MemSocket {
    kind: SocketKind,
    side: Side,
    shared: Arc<Shared>,
    /// Read side of this endpoint's signal pipe. Never read by callers;
    /// `readiness` drains it the way the real transport clears its
    /// descriptor inside the events query.
    signal_rx: pipe::Receiver,
    /// Write side of the peer's signal pipe.
    peer_tx: pipe::Sender,
}

impl MemSocket {
    /// Create a connected pair with the default queue capacity.
    pub fn pair(kind_a: SocketKind, kind_b: SocketKind) -> TransportResult<(Self, Self)> {
        Self::pair_with_capacity(kind_a, kind_b, DEFAULT_QUEUE_CAPACITY)
    }

    /// Create a connected pair with `capacity` messages of room per
    /// direction. A full direction makes `send` report `WouldBlock`.
    pub fn pair_with_capacity(
        kind_a: SocketKind,
        kind_b: SocketKind,
        capacity: usize,
    ) -> TransportResult<(Self, Self)> {
        let capacity = capacity.max(1);
        let (a_tx, a_rx) =
            pipe::new().map_err(|_| TransportError::Exhausted("signal descriptor"))?;
        let (b_tx, b_rx) =
            pipe::new().map_err(|_| TransportError::Exhausted("signal descriptor"))?;

        let shared = Arc::new(Shared {
            a_to_b: Mutex::new(Queue::new(capacity)),
            b_to_a: Mutex::new(Queue::new(capacity)),
            a_alive: AtomicBool::new(true),
            b_alive: AtomicBool::new(true),
        });

        let a = MemSocket {
            kind: kind_a,
            side: Side::A,
            shared: shared.clone(),
            signal_rx: a_rx,
            peer_tx: b_tx,
        };
        let b = MemSocket {
            kind: kind_b,
            side: Side::B,
            shared,
            signal_rx: b_rx,
            peer_tx: a_tx,
        };
        Ok((a, b))
    }

    #[inline]
    fn outbound(&self) -> &Mutex<Queue> {
        match self.side {
            Side::A => &self.shared.a_to_b,
            Side::B => &self.shared.b_to_a,
        }
    }

    #[inline]
    fn inbound(&self) -> &Mutex<Queue> {
        match self.side {
            Side::A => &self.shared.b_to_a,
            Side::B => &self.shared.a_to_b,
        }
    }

    #[inline]
    fn peer_alive(&self) -> bool {
        let flag = match self.side {
            Side::A => &self.shared.b_alive,
            Side::B => &self.shared.a_alive,
        };
        flag.load(Ordering::Acquire)
    }

    /// Edge the peer's signal descriptor. Errors are ignored: a full pipe
    /// already carries a pending edge, and a departed peer has nothing left
    /// to wake.
    fn signal_peer(&mut self) {
        let _ = self.peer_tx.write(&[1]);
    }

    fn drain_signal(&mut self) -> TransportResult<()> {
        let mut buf = [0u8; 64];
        loop {
            match self.signal_rx.read(&mut buf) {
                Ok(0) => return Ok(()),
                Ok(_) => continue,
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => return Ok(()),
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }
    }
}

impl TransportSocket for MemSocket {
    fn kind(&self) -> SocketKind {
        self.kind
    }

    fn readiness(&mut self) -> TransportResult<Readiness> {
        self.drain_signal()?;

        let mut ready = Readiness::empty();
        if !self.inbound().lock().items.is_empty() {
            ready |= Readiness::READABLE;
        }
        if self.peer_alive() && !self.outbound().lock().is_full() {
            ready |= Readiness::WRITABLE;
        }
        Ok(ready)
    }

    fn pollable_fd(&self) -> RawFd {
        self.signal_rx.as_raw_fd()
    }

    fn recv(&mut self) -> TransportResult<Message> {
        let (popped, freed_full_queue) = {
            let mut q = self.inbound().lock();
            let was_full = q.is_full();
            (q.items.pop_front(), was_full)
        };
        match popped {
            Some(msg) => {
                if freed_full_queue {
                    // The peer's can-write just flipped; that is a bitmask
                    // transition on its side.
                    self.signal_peer();
                }
                Ok(msg)
            }
            None if self.peer_alive() => Err(TransportError::WouldBlock),
            None => Err(TransportError::Disconnected),
        }
    }

    fn send(&mut self, msg: &Message) -> TransportResult<()> {
        if !self.peer_alive() {
            return Err(TransportError::Disconnected);
        }
        let was_empty = {
            let mut q = self.outbound().lock();
            if q.is_full() {
                return Err(TransportError::WouldBlock);
            }
            let was_empty = q.items.is_empty();
            q.items.push_back(msg.clone());
            was_empty
        };
        if was_empty {
            // The peer's can-read just flipped from false to true.
            self.signal_peer();
        }
        Ok(())
    }
}

impl Drop for MemSocket {
    fn drop(&mut self) {
        let flag = match self.side {
            Side::A => &self.shared.a_alive,
            Side::B => &self.shared.b_alive,
        };
        flag.store(false, Ordering::Release);
        // Wake the peer so it observes the disconnect.
        self.signal_peer();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(cap: usize) -> (MemSocket, MemSocket) {
        MemSocket::pair_with_capacity(SocketKind::Pair, SocketKind::Pair, cap).unwrap()
    }

    fn signal_pending(s: &mut MemSocket) -> bool {
        let mut buf = [0u8; 64];
        let mut seen = false;
        loop {
            match s.signal_rx.read(&mut buf) {
                Ok(n) if n > 0 => seen = true,
                _ => break,
            }
        }
        seen
    }

    #[test]
    fn edge_fires_only_on_bitmask_transition() {
        let (mut a, mut b) = pair(8);
        a.send(&Message::with_size(1)).unwrap();
        assert!(signal_pending(&mut b), "empty -> non-empty must edge");

        a.send(&Message::with_size(1)).unwrap();
        a.send(&Message::with_size(1)).unwrap();
        assert!(
            !signal_pending(&mut b),
            "arrivals without a transition must not edge"
        );
    }

    #[test]
    fn full_queue_blocks_and_draining_edges_the_sender() {
        let (mut a, mut b) = pair(1);
        a.send(&Message::with_size(1)).unwrap();
        assert_eq!(
            a.send(&Message::with_size(1)),
            Err(TransportError::WouldBlock)
        );
        assert!(!a.readiness().unwrap().writable());

        b.recv().unwrap();
        assert!(signal_pending(&mut a), "full -> non-full must edge the sender");
        assert!(a.readiness().unwrap().writable());
    }

    #[test]
    fn recv_reports_backpressure_then_disconnect() {
        let (mut a, b) = pair(4);
        assert_eq!(a.recv().unwrap_err(), TransportError::WouldBlock);
        drop(b);
        assert_eq!(a.recv().unwrap_err(), TransportError::Disconnected);
        assert_eq!(
            a.send(&Message::with_size(1)).unwrap_err(),
            TransportError::Disconnected
        );
    }

    #[test]
    fn readiness_is_level_queryable() {
        let (mut a, mut b) = pair(4);
        assert_eq!(b.readiness().unwrap(), Readiness::WRITABLE);
        a.send(&Message::new(&b"x"[..])).unwrap();
        let ready = b.readiness().unwrap();
        assert!(ready.readable() && ready.writable());
        // Still readable on a second query even though the signal was drained.
        assert!(b.readiness().unwrap().readable());
    }
}
