use anyhow::{anyhow, Context, Result};
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Registry, Token};
use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::os::fd::RawFd;
use std::rc::{Rc, Weak};
use std::time::Duration;

/// Receiver of descriptor readiness delivered by the loop.
///
/// Delivery is raw: the loop reports what the OS observed and the handler
/// decides whether it currently cares (its own armed state), mirroring a
/// notifier that can be enabled and disabled without re-registration.
pub trait FdHandler {
    fn on_readable(&self);
    fn on_writable(&self);
}

/// Block/wake lifecycle observer.
///
/// `before_block` runs immediately before the loop's blocking wait,
/// `after_wake` immediately after it returns, whatever woke it.
pub trait LoopLifecycle {
    fn before_block(&self);
    fn after_wake(&self);
}

struct LoopInner {
    registry: Registry,
    sources: HashMap<Token, Weak<dyn FdHandler>>,
    lifecycle: Vec<Weak<dyn LoopLifecycle>>,
    deferred: Vec<Box<dyn FnOnce()>>,
    next_token: usize,
    stopped: bool,
}

/// Cloneable handle for registering work with a running [`EventLoop`].
///
/// Holds the loop weakly: once the loop is dropped every operation fails
/// (or, for teardown paths, quietly does nothing).
#[derive(Clone)]
pub struct LoopHandle {
    inner: Weak<RefCell<LoopInner>>,
}

impl LoopHandle {
    fn upgrade(&self) -> Result<Rc<RefCell<LoopInner>>> {
        self.inner
            .upgrade()
            .ok_or_else(|| anyhow!("event loop is gone"))
    }

    /// Register a descriptor for readable and writable readiness.
    pub fn register_fd(&self, fd: RawFd, handler: Weak<dyn FdHandler>) -> Result<Token> {
        let rc = self.upgrade()?;
        let mut inner = rc.borrow_mut();
        let token = Token(inner.next_token);
        inner.next_token += 1;
        inner
            .registry
            .register(
                &mut SourceFd(&fd),
                token,
                Interest::READABLE | Interest::WRITABLE,
            )
            .context("failed to register descriptor with the poller")?;
        inner.sources.insert(token, handler);
        Ok(token)
    }

    /// Remove a previously registered descriptor. Safe to call during
    /// teardown after the loop itself is gone.
    pub fn deregister_fd(&self, token: Token, fd: RawFd) {
        if let Some(rc) = self.inner.upgrade() {
            let mut inner = rc.borrow_mut();
            inner.sources.remove(&token);
            let _ = inner.registry.deregister(&mut SourceFd(&fd));
        }
    }

    /// Attach a block/wake lifecycle observer.
    pub fn add_lifecycle(&self, observer: Weak<dyn LoopLifecycle>) -> Result<()> {
        let rc = self.upgrade()?;
        rc.borrow_mut().lifecycle.push(observer);
        Ok(())
    }

    /// Schedule `callback` to run after the next wake, forcing that wake to
    /// happen immediately: a due zero-delay callback makes the blocking wait
    /// use a zero timeout.
    pub fn schedule_immediate(&self, callback: Box<dyn FnOnce()>) -> Result<()> {
        let rc = self.upgrade()?;
        rc.borrow_mut().deferred.push(callback);
        Ok(())
    }

    /// Make `run` return after the current dispatch cycle.
    pub fn quit(&self) {
        if let Some(rc) = self.inner.upgrade() {
            rc.borrow_mut().stopped = true;
        }
    }

    /// Whether the loop behind this handle still exists.
    #[inline]
    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }

    /// Whether two handles point at the same loop.
    #[inline]
    pub fn same_loop(&self, other: &LoopHandle) -> bool {
        Weak::ptr_eq(&self.inner, &other.inner)
    }
}

/// Minimal cooperative event loop over `mio::Poll`.
///
/// Exactly the surface the bridge needs from its host: descriptor readiness
/// callbacks, the before-block/after-wake hook pair, zero-delay deferred
/// callbacks, and a quit flag. Single-threaded; not a general-purpose
/// reactor.
pub struct EventLoop {
    poll: Poll,
    events: Events,
    inner: Rc<RefCell<LoopInner>>,
}

impl EventLoop {
    pub fn new() -> Result<Self> {
        let poll = Poll::new().context("failed to create poller")?;
        let registry = poll
            .registry()
            .try_clone()
            .context("failed to clone poller registry")?;
        Ok(Self {
            poll,
            events: Events::with_capacity(64),
            inner: Rc::new(RefCell::new(LoopInner {
                registry,
                sources: HashMap::new(),
                lifecycle: Vec::new(),
                deferred: Vec::new(),
                next_token: 0,
                stopped: false,
            })),
        })
    }

    pub fn handle(&self) -> LoopHandle {
        LoopHandle {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// One block/wake cycle: lifecycle hooks, the (possibly zero-timeout)
    /// wait, deferred callbacks, then descriptor readiness dispatch.
    pub fn dispatch(&mut self, timeout: Option<Duration>) -> Result<()> {
        let observers: Vec<Rc<dyn LoopLifecycle>> = {
            let mut inner = self.inner.borrow_mut();
            inner.lifecycle.retain(|w| w.strong_count() > 0);
            inner.lifecycle.iter().filter_map(Weak::upgrade).collect()
        };

        for observer in &observers {
            observer.before_block();
        }

        // A due zero-delay callback must keep the wait from blocking.
        let timeout = if self.inner.borrow().deferred.is_empty() {
            timeout
        } else {
            Some(Duration::ZERO)
        };

        loop {
            match self.poll.poll(&mut self.events, timeout) {
                Ok(()) => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err).context("poller wait failed"),
            }
        }

        for observer in &observers {
            observer.after_wake();
        }

        let due: Vec<Box<dyn FnOnce()>> = {
            let mut inner = self.inner.borrow_mut();
            std::mem::take(&mut inner.deferred)
        };
        for callback in due {
            callback();
        }

        for event in self.events.iter() {
            let handler = self
                .inner
                .borrow()
                .sources
                .get(&event.token())
                .and_then(Weak::upgrade);
            let Some(handler) = handler else { continue };
            if event.is_readable() {
                handler.on_readable();
            }
            if event.is_writable() {
                handler.on_writable();
            }
        }

        Ok(())
    }

    /// Dispatch until [`LoopHandle::quit`] is called.
    pub fn run(&mut self) -> Result<()> {
        while !self.inner.borrow().stopped {
            self.dispatch(None)?;
        }
        Ok(())
    }

    /// Dispatch with a timeout until `quit` is called or `max_cycles` is
    /// reached. Keeps demo and test runs bounded.
    pub fn run_for(&mut self, timeout: Duration, max_cycles: usize) -> Result<()> {
        for _ in 0..max_cycles {
            if self.inner.borrow().stopped {
                break;
            }
            self.dispatch(Some(timeout))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::time::Instant;

    struct Probe {
        blocks: Cell<usize>,
        wakes: Cell<usize>,
    }

    impl LoopLifecycle for Probe {
        fn before_block(&self) {
            self.blocks.set(self.blocks.get() + 1);
        }
        fn after_wake(&self) {
            self.wakes.set(self.wakes.get() + 1);
        }
    }

    #[test]
    fn lifecycle_hooks_bracket_every_wait() {
        let mut el = EventLoop::new().unwrap();
        let probe = Rc::new(Probe {
            blocks: Cell::new(0),
            wakes: Cell::new(0),
        });
        let probe_weak = Rc::downgrade(&probe);
        let weak: Weak<dyn LoopLifecycle> = probe_weak;
        el.handle().add_lifecycle(weak).unwrap();

        el.dispatch(Some(Duration::from_millis(1))).unwrap();
        el.dispatch(Some(Duration::from_millis(1))).unwrap();
        assert_eq!(probe.blocks.get(), 2);
        assert_eq!(probe.wakes.get(), 2);
    }

    #[test]
    fn deferred_callback_forces_an_immediate_wake() {
        let mut el = EventLoop::new().unwrap();
        let fired = Rc::new(Cell::new(false));
        let flag = fired.clone();
        el.handle()
            .schedule_immediate(Box::new(move || flag.set(true)))
            .unwrap();

        let start = Instant::now();
        el.dispatch(Some(Duration::from_secs(5))).unwrap();
        assert!(fired.get());
        assert!(
            start.elapsed() < Duration::from_secs(1),
            "a due zero-delay callback must not let the wait block"
        );
    }

    #[test]
    fn handle_outlives_loop_gracefully() {
        let el = EventLoop::new().unwrap();
        let handle = el.handle();
        drop(el);
        assert!(!handle.is_alive());
        assert!(handle.register_fd(0, Weak::<Probe2>::new()).is_err());
        handle.deregister_fd(Token(0), 0);
        handle.quit();
    }

    struct Probe2;
    impl FdHandler for Probe2 {
        fn on_readable(&self) {}
        fn on_writable(&self) {}
    }
}
