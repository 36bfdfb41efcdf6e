use crate::bridge::adapter::AdapterId;
use crate::event_loop::{LoopHandle, LoopLifecycle};
use crate::readiness::Readiness;
use anyhow::{bail, Result};
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

/// Adapter surface the hook drives around the block/wake cycle.
pub(crate) trait PollTarget {
    /// Zero-timeout pending check; records the verdict for the wake phase.
    fn poll_now(&self) -> Readiness;
    /// Drain whatever the last `poll_now` reported.
    fn drain_if_pending(&self);
}

struct Attachment {
    id: AdapterId,
    target: Weak<dyn PollTarget>,
}

thread_local! {
    static CURRENT: RefCell<Option<Rc<PollHook>>> = const { RefCell::new(None) };
}

/// Per-thread coordinator that closes the missed-wakeup race.
///
/// A transport socket's descriptor edges only when its readiness bitmask may
/// have transitioned. If a drain empties the queue and more work arrives
/// before the loop blocks, no new edge may come and the loop would sleep on
/// pending work. The hook re-polls every attached adapter right before the
/// loop blocks and, if anything is pending, forces an immediate wake through
/// a zero-delay deferred callback, then drains on that wake.
///
/// One instance per thread, created lazily on first adapter creation and
/// kept for the thread's lifetime. The type is deliberately `!Send`: a hook
/// can never migrate to or be shared with another thread.
pub struct PollHook {
    handle: LoopHandle,
    attached: RefCell<Vec<Attachment>>,
    wake_scheduled: Cell<bool>,
}

impl PollHook {
    /// The calling thread's hook, bound to `handle`'s loop.
    ///
    /// Created on first use. If the thread's hook is bound to a loop that no
    /// longer exists it is rebound; binding a second live loop on one thread
    /// is an error.
    pub fn instance(handle: &LoopHandle) -> Result<Rc<PollHook>> {
        CURRENT.with(|slot| {
            let mut slot = slot.borrow_mut();
            if let Some(hook) = slot.as_ref() {
                if hook.handle.same_loop(handle) {
                    return Ok(hook.clone());
                }
                if hook.handle.is_alive() {
                    bail!("this thread's poll hook is bound to a different live event loop");
                }
            }
            let hook = Rc::new(PollHook {
                handle: handle.clone(),
                attached: RefCell::new(Vec::new()),
                wake_scheduled: Cell::new(false),
            });
            let weak = Rc::downgrade(&hook);
            let lifecycle: Weak<dyn LoopLifecycle> = weak;
            handle.add_lifecycle(lifecycle)?;
            *slot = Some(hook.clone());
            Ok(hook)
        })
    }

    pub(crate) fn attach(&self, id: AdapterId, target: Weak<dyn PollTarget>) {
        self.attached.borrow_mut().push(Attachment { id, target });
    }

    /// Remove an adapter. Idempotent: detaching an unknown id is a no-op, so
    /// teardown paths can call it unconditionally.
    pub(crate) fn detach(&self, id: AdapterId) {
        self.attached.borrow_mut().retain(|a| a.id != id);
    }

    /// Number of currently attached adapters.
    pub fn attached_count(&self) -> usize {
        self.attached.borrow().len()
    }

    /// Upgrade the attachments in order, pruning the dead ones. The borrow
    /// is released before any adapter code runs, so targets may detach
    /// themselves mid-iteration.
    fn snapshot(&self) -> Vec<Rc<dyn PollTarget>> {
        let mut attached = self.attached.borrow_mut();
        attached.retain(|a| a.target.strong_count() > 0);
        attached
            .iter()
            .filter_map(|a| a.target.upgrade())
            .collect()
    }
}

impl LoopLifecycle for PollHook {
    fn before_block(&self) {
        let mut pending = false;
        for target in self.snapshot() {
            // Every target gets polled so each records its own verdict.
            if target.poll_now().any() {
                pending = true;
            }
        }

        if pending && !self.wake_scheduled.replace(true) {
            // The callback body is empty on purpose: being due is what keeps
            // the loop's wait from blocking. Draining happens in after_wake.
            let _ = self.handle.schedule_immediate(Box::new(|| {}));
        }
    }

    fn after_wake(&self) {
        if !self.wake_scheduled.replace(false) {
            // Woken by an ordinary descriptor edge; the per-adapter readable
            // and writable paths already cover that.
            return;
        }
        for target in self.snapshot() {
            target.drain_if_pending();
        }
    }
}
