use crate::bridge::hook::{PollHook, PollTarget};
use crate::config::BridgeConfig;
use crate::error::{TransportError, TransportResult};
use crate::event_loop::{FdHandler, LoopHandle};
use crate::message::Message;
use crate::readiness::Readiness;
use crate::transport::{SocketKind, TransportSocket};
use anyhow::{Context, Result};
use mio::Token;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::os::fd::RawFd;
use std::rc::{Rc, Weak};
use tracing::{debug, trace, warn};
use uuid::fmt::Simple;
use uuid::Uuid;

/// Compact unique identifier of an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AdapterId {
    raw: Simple,
}

impl AdapterId {
    fn new() -> Self {
        Self {
            raw: Uuid::new_v4().simple(),
        }
    }

    #[inline]
    pub fn raw(&self) -> Simple {
        self.raw
    }
}

impl fmt::Display for AdapterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

type MessageFn = Box<dyn FnMut(Message)>;
type ReadyFn = Box<dyn FnMut()>;
type ErrorFn = Box<dyn FnMut(TransportError)>;

struct AdapterCore<S: TransportSocket> {
    id: AdapterId,
    kind: SocketKind,
    socket: RefCell<S>,
    /// Cached at creation so teardown never needs the socket borrow.
    fd: RawFd,
    loop_handle: LoopHandle,
    hook: Rc<PollHook>,
    token: Cell<Option<Token>>,
    /// Gate against re-entrant drains; the drain loop clears it on entry and
    /// restores it on every exit path.
    read_live: Cell<bool>,
    /// Set on a `WouldBlock` send, cleared once writability is observed and
    /// announced. Unarmed adapters ignore writable readiness entirely.
    write_armed: Cell<bool>,
    max_drain_batch: Cell<usize>,
    /// Verdict of the last pre-block poll, consumed after the wake.
    pending: Cell<Readiness>,
    on_message: RefCell<Option<MessageFn>>,
    on_ready_to_send: RefCell<Option<ReadyFn>>,
    on_error: RefCell<Option<ErrorFn>>,
    closed: Cell<bool>,
}

impl<S: TransportSocket> AdapterCore<S> {
    /// Pull queued messages off the socket, at most one batch worth.
    ///
    /// Each iteration re-queries readiness first: recv is only attempted
    /// while the bitmask says readable, so a spurious descriptor edge costs
    /// one query and nothing else. Anything left when the batch budget runs
    /// out is picked up by the next pre-block poll.
    fn drain_incoming(&self) {
        if self.closed.get() {
            return;
        }
        if !self.read_live.replace(false) {
            return;
        }

        let budget = self.max_drain_batch.get();
        let mut drained = 0;
        while drained < budget && !self.closed.get() {
            // Bind the query result first: a match on the borrow itself
            // would keep the socket borrowed while the error subscriber runs.
            let queried = self.socket.borrow_mut().readiness();
            let ready = match queried {
                Ok(ready) => ready,
                Err(err) => {
                    self.emit_error(err);
                    break;
                }
            };
            if !ready.readable() {
                break;
            }

            let received = self.socket.borrow_mut().recv();
            drained += 1;
            match received {
                Ok(msg) => {
                    if self.message_subscribed() {
                        self.emit_message(msg);
                    } else {
                        // Dequeued all the same; with nobody listening the
                        // message is dropped rather than left to pin the
                        // readable bit forever.
                        trace!(adapter = %self.id, "discarding message, no subscriber");
                    }
                }
                Err(TransportError::WouldBlock) => break,
                Err(err) => self.emit_error(err),
            }
        }

        self.read_live.set(true);
    }

    /// Announce writability once, if it was being waited for.
    fn check_ready_to_send(&self) {
        if self.closed.get() || !self.write_armed.get() {
            return;
        }
        // The socket borrow must be gone before the subscriber runs; the
        // whole point of the event is retrying a send from inside it.
        let queried = self.socket.borrow_mut().readiness();
        match queried {
            Ok(ready) if ready.writable() => {
                // Disarm before the callback so a send from inside it starts
                // from a clean slate.
                self.write_armed.set(false);
                self.emit_ready_to_send();
            }
            Ok(_) => {}
            Err(err) => self.emit_error(err),
        }
    }

    fn send(&self, msg: &Message) -> TransportResult<()> {
        if self.closed.get() {
            return Err(TransportError::Disconnected);
        }
        let sent = self.socket.borrow_mut().send(msg);
        match sent {
            Ok(()) => {
                self.write_armed.set(false);
                Ok(())
            }
            Err(TransportError::WouldBlock) => {
                // Start watching for writability; ready-to-send will fire
                // exactly once when the transport drains.
                self.write_armed.set(true);
                Err(TransportError::WouldBlock)
            }
            Err(err) => {
                self.emit_error(err.clone());
                Err(err)
            }
        }
    }

    #[inline]
    fn message_subscribed(&self) -> bool {
        self.on_message.borrow().is_some()
    }

    /// Callbacks run with their slot taken, so a callback may subscribe a
    /// replacement (or drop the adapter) without aliasing the borrow. The
    /// original is restored only if the slot is still empty afterwards.
    fn emit_message(&self, msg: Message) {
        let taken = self.on_message.borrow_mut().take();
        if let Some(mut cb) = taken {
            cb(msg);
            let mut slot = self.on_message.borrow_mut();
            if slot.is_none() {
                *slot = Some(cb);
            }
        }
    }

    fn emit_ready_to_send(&self) {
        let taken = self.on_ready_to_send.borrow_mut().take();
        if let Some(mut cb) = taken {
            cb();
            let mut slot = self.on_ready_to_send.borrow_mut();
            if slot.is_none() {
                *slot = Some(cb);
            }
        }
    }

    fn emit_error(&self, err: TransportError) {
        let taken = self.on_error.borrow_mut().take();
        match taken {
            Some(mut cb) => {
                cb(err);
                let mut slot = self.on_error.borrow_mut();
                if slot.is_none() {
                    *slot = Some(cb);
                }
            }
            None => warn!(adapter = %self.id, %err, "unhandled transport error"),
        }
    }

    /// Idempotent teardown: detach from the hook, drop the descriptor
    /// registration, and leave every later entry point a no-op.
    fn close(&self) {
        if self.closed.replace(true) {
            return;
        }
        self.hook.detach(self.id);
        if let Some(token) = self.token.take() {
            self.loop_handle.deregister_fd(token, self.fd);
        }
        debug!(adapter = %self.id, kind = %self.kind, "adapter closed");
    }
}

impl<S: TransportSocket> FdHandler for AdapterCore<S> {
    fn on_readable(&self) {
        self.drain_incoming();
    }

    fn on_writable(&self) {
        // check_ready_to_send ignores the event unless a send is waiting.
        self.check_ready_to_send();
    }
}

impl<S: TransportSocket> PollTarget for AdapterCore<S> {
    fn poll_now(&self) -> Readiness {
        if self.closed.get() {
            self.pending.set(Readiness::empty());
            return Readiness::empty();
        }
        let queried = self.socket.borrow_mut().readiness();
        let ready = match queried {
            Ok(ready) => ready,
            Err(err) => {
                // Pre-block context; surfacing waits for the next recv/send.
                debug!(adapter = %self.id, %err, "readiness query failed in pre-block poll");
                Readiness::empty()
            }
        };
        let pending = ready.masked_for(self.write_armed.get());
        self.pending.set(pending);
        pending
    }

    fn drain_if_pending(&self) {
        let pending = self.pending.replace(Readiness::empty());
        if pending.readable() {
            self.drain_incoming();
        }
        if pending.writable() {
            self.check_ready_to_send();
        }
    }
}

/// Event-driven adapter for one transport socket on the calling thread's
/// event loop.
///
/// Incoming messages surface through [`on_message`](Self::on_message);
/// backpressured sends surface through a single
/// [`on_ready_to_send`](Self::on_ready_to_send) once room returns. Dropping
/// the adapter tears everything down, including from inside one of its own
/// callbacks mid-drain.
///
/// The adapter is `!Send`; it lives and dies with its loop's thread.
pub struct SocketAdapter<S: TransportSocket> {
    core: Rc<AdapterCore<S>>,
}

impl<S: TransportSocket> SocketAdapter<S> {
    /// Wire `socket` into the loop behind `handle` with default settings.
    pub fn create(socket: S, handle: &LoopHandle) -> Result<Self> {
        Self::with_config(socket, handle, BridgeConfig::default())
    }

    pub fn with_config(socket: S, handle: &LoopHandle, config: BridgeConfig) -> Result<Self> {
        let hook = PollHook::instance(handle)?;
        let fd = socket.pollable_fd();
        let kind = socket.kind();
        let core = Rc::new(AdapterCore {
            id: AdapterId::new(),
            kind,
            socket: RefCell::new(socket),
            fd,
            loop_handle: handle.clone(),
            hook: hook.clone(),
            token: Cell::new(None),
            read_live: Cell::new(true),
            write_armed: Cell::new(false),
            max_drain_batch: Cell::new(config.drain_batch()),
            pending: Cell::new(Readiness::empty()),
            on_message: RefCell::new(None),
            on_ready_to_send: RefCell::new(None),
            on_error: RefCell::new(None),
            closed: Cell::new(false),
        });

        let weak = Rc::downgrade(&core);
        let fd_handler: Weak<dyn FdHandler> = weak;
        let token = handle
            .register_fd(fd, fd_handler)
            .context("failed to register the transport descriptor")?;
        core.token.set(Some(token));

        let weak = Rc::downgrade(&core);
        let target: Weak<dyn PollTarget> = weak;
        hook.attach(core.id, target);

        debug!(adapter = %core.id, kind = %kind, fd, "adapter created");
        Ok(Self { core })
    }

    #[inline]
    pub fn id(&self) -> AdapterId {
        self.core.id
    }

    #[inline]
    pub fn kind(&self) -> SocketKind {
        self.core.kind
    }

    /// Subscribe to incoming messages. Replaces any previous subscriber.
    /// Without one, drained messages are discarded.
    pub fn on_message(&self, callback: impl FnMut(Message) + 'static) {
        *self.core.on_message.borrow_mut() = Some(Box::new(callback));
    }

    /// Subscribe to the one-shot writability announcement that follows a
    /// `WouldBlock` send.
    pub fn on_ready_to_send(&self, callback: impl FnMut() + 'static) {
        *self.core.on_ready_to_send.borrow_mut() = Some(Box::new(callback));
    }

    /// Subscribe to transport errors observed during drains and sends.
    /// Without one, errors are logged and dropped.
    pub fn on_error(&self, callback: impl FnMut(TransportError) + 'static) {
        *self.core.on_error.borrow_mut() = Some(Box::new(callback));
    }

    /// Drop the message subscriber; subsequent drains discard.
    pub fn clear_on_message(&self) {
        *self.core.on_message.borrow_mut() = None;
    }

    /// Non-blocking send. On `WouldBlock` the adapter arms its write watch
    /// and `on_ready_to_send` fires once room returns.
    pub fn send(&self, msg: &Message) -> TransportResult<()> {
        self.core.send(msg)
    }

    /// Whether a backpressured send is waiting on writability.
    #[inline]
    pub fn is_write_armed(&self) -> bool {
        self.core.write_armed.get()
    }

    #[inline]
    pub fn max_drain_batch(&self) -> usize {
        self.core.max_drain_batch.get()
    }

    /// Cap the number of messages drained per dispatch cycle. Clamped to at
    /// least one so a drain always makes progress.
    pub fn set_max_drain_batch(&self, max: usize) {
        self.core.max_drain_batch.set(max.max(1));
    }

    // Transport lifecycle pass-throughs.

    pub fn bind(&self, endpoint: &str) -> TransportResult<()> {
        self.core.socket.borrow_mut().bind(endpoint)
    }

    pub fn unbind(&self, endpoint: &str) -> TransportResult<()> {
        self.core.socket.borrow_mut().unbind(endpoint)
    }

    pub fn connect(&self, endpoint: &str) -> TransportResult<()> {
        self.core.socket.borrow_mut().connect(endpoint)
    }

    pub fn disconnect(&self, endpoint: &str) -> TransportResult<()> {
        self.core.socket.borrow_mut().disconnect(endpoint)
    }

    /// Explicit teardown; equivalent to dropping the adapter.
    pub fn close(self) {}
}

impl<S: TransportSocket> Drop for SocketAdapter<S> {
    fn drop(&mut self) {
        self.core.close();
    }
}

impl<S: TransportSocket> fmt::Debug for SocketAdapter<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketAdapter")
            .field("id", &self.core.id)
            .field("kind", &self.core.kind)
            .field("write_armed", &self.core.write_armed.get())
            .field("closed", &self.core.closed.get())
            .finish()
    }
}
