use {
    super::error::Cancelled,
    crossbeam_channel::{Receiver, RecvTimeoutError, Sender},
    parking_lot::Mutex,
    std::{
        fmt,
        sync::{Arc, Weak},
        thread,
        time::{Duration, Instant},
    },
    tracing::{trace, warn},
};

/// Context carries a cancellation signal and an optional deadline
/// across threads.
///
/// Contexts form a tree: cancelling a context cancels every context
/// derived from it, while cancelling a child leaves its parent untouched.
/// Cloning a context yields another handle to the same node.
///
/// Workers and mappers observe cancellation either by polling
/// [`Context::is_done`] or by selecting on the receiver returned by
/// [`Context::done`], which becomes ready (disconnected) once the
/// context is cancelled and stays ready forever after.
#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

struct Inner {
    deadline: Option<Instant>,
    done: Receiver<()>,
    state: Mutex<State>,
}

struct State {
    // Dropping the only sender disconnects `done`.
    trigger: Option<Sender<()>>,
    reason: Option<Cancelled>,
    children: Vec<Weak<Inner>>,
}

impl Inner {
    fn new(deadline: Option<Instant>) -> Inner {
        let (trigger, done) = crossbeam_channel::bounded(0);
        Inner {
            deadline,
            done,
            state: Mutex::new(State {
                trigger: Some(trigger),
                reason: None,
                children: Vec::new(),
            }),
        }
    }

    fn cancel(&self, reason: Cancelled) {
        let children = {
            let mut state = self.state.lock();
            if state.reason.is_some() {
                return;
            }
            state.reason = Some(reason);
            state.trigger = None;
            std::mem::take(&mut state.children)
        };
        for child in children.iter().filter_map(Weak::upgrade) {
            child.cancel(reason);
        }
    }

    fn deadline_passed(&self) -> bool {
        self.deadline.map_or(false, |d| Instant::now() >= d)
    }
}

impl Context {
    /// An empty root context. It is never cancelled unless
    /// [`Context::cancel`] is called on it.
    pub fn background() -> Context {
        Context {
            inner: Arc::new(Inner::new(None)),
        }
    }

    /// Derive a context that is cancelled together with this one,
    /// and can also be cancelled on its own.
    pub fn child(&self) -> Context {
        self.derive(None)
    }

    /// Derive a context that is cancelled once `timeout` has elapsed.
    pub fn with_timeout(&self, timeout: Duration) -> Context {
        self.derive(Some(Instant::now() + timeout))
    }

    /// Derive a context that is cancelled at `deadline`. The deadline of
    /// the result never exceeds the deadline of this context.
    pub fn with_deadline(&self, deadline: Instant) -> Context {
        self.derive(Some(deadline))
    }

    fn derive(&self, deadline: Option<Instant>) -> Context {
        let deadline = match (self.inner.deadline, deadline) {
            (Some(parent), Some(own)) => Some(parent.min(own)),
            (parent, own) => parent.or(own),
        };
        let child = Context {
            inner: Arc::new(Inner::new(deadline)),
        };

        let inherited = {
            let mut state = self.inner.state.lock();
            if state.reason.is_none() {
                state.children.retain(|c| c.strong_count() > 0);
                state.children.push(Arc::downgrade(&child.inner));
            }
            state.reason
        };
        if let Some(reason) = inherited {
            child.inner.cancel(reason);
            return child;
        }

        if let Some(deadline) = deadline {
            child.arm_deadline(deadline);
        }
        child
    }

    fn arm_deadline(&self, deadline: Instant) {
        if Instant::now() >= deadline {
            self.inner.cancel(Cancelled::DeadlineExceeded);
            return;
        }
        // The timer only holds a weak reference, once every handle is
        // gone the trigger is dropped and the wait ends early.
        let done = self.inner.done.clone();
        let inner = Arc::downgrade(&self.inner);
        let spawned = thread::Builder::new()
            .name("workpool-deadline".to_string())
            .spawn(move || {
                if let Err(RecvTimeoutError::Timeout) = done.recv_deadline(deadline) {
                    if let Some(inner) = inner.upgrade() {
                        trace!("context deadline reached");
                        inner.cancel(Cancelled::DeadlineExceeded);
                    }
                }
            });
        if let Err(err) = spawned {
            // err() still observes the deadline lazily.
            warn!(%err, "failed to spawn deadline timer");
        }
    }

    /// Cancel this context and every context derived from it.
    /// Cancelling an already cancelled context does nothing.
    pub fn cancel(&self) {
        let reason = if self.inner.deadline_passed() {
            Cancelled::DeadlineExceeded
        } else {
            Cancelled::Canceled
        };
        self.inner.cancel(reason);
    }

    /// A receiver that becomes ready when the context is cancelled.
    /// No value is ever delivered, readiness is signalled by disconnection.
    pub fn done(&self) -> &Receiver<()> {
        &self.inner.done
    }

    /// Why the context was cancelled, or `None` while it is still live.
    pub fn err(&self) -> Option<Cancelled> {
        let reason = self.inner.state.lock().reason;
        if reason.is_none() && self.inner.deadline_passed() {
            self.inner.cancel(Cancelled::DeadlineExceeded);
            return self.inner.state.lock().reason;
        }
        reason
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }
}

impl Default for Context {
    fn default() -> Context {
        Context::background()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("deadline", &self.inner.deadline)
            .field("err", &self.inner.state.lock().reason)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_background_is_never_done() {
        let ctx = Context::background();
        assert_eq!(ctx.err(), None);
        assert!(ctx.deadline().is_none());
        assert!(ctx
            .done()
            .recv_timeout(Duration::from_millis(10))
            .is_err_and(|e| e.is_timeout()));
    }

    #[test]
    fn test_cancel_propagates_to_children() {
        let parent = Context::background();
        let child = parent.child();
        let grandchild = child.with_timeout(Duration::from_secs(60));

        parent.cancel();

        for ctx in [&parent, &child, &grandchild] {
            assert_eq!(ctx.err(), Some(Cancelled::Canceled));
            assert!(ctx.done().recv().is_err());
        }
    }

    #[test]
    fn test_cancel_child_leaves_parent_live() {
        let parent = Context::background();
        let child = parent.child();
        child.cancel();
        child.cancel();
        assert_eq!(child.err(), Some(Cancelled::Canceled));
        assert_eq!(parent.err(), None);
    }

    #[test]
    fn test_child_of_cancelled_parent_starts_cancelled() {
        let parent = Context::background();
        parent.cancel();
        let child = parent.with_timeout(Duration::from_secs(60));
        assert_eq!(child.err(), Some(Cancelled::Canceled));
    }

    #[test]
    fn test_timeout_fires_done() {
        let ctx = Context::background().with_timeout(Duration::from_millis(5));
        assert!(ctx.done().recv().is_err());
        assert_eq!(ctx.err(), Some(Cancelled::DeadlineExceeded));
        // A late cancel does not rewrite the reason.
        ctx.cancel();
        assert_eq!(ctx.err(), Some(Cancelled::DeadlineExceeded));
    }

    #[test]
    fn test_child_deadline_is_clamped_to_parent() {
        let parent = Context::background().with_timeout(Duration::from_millis(5));
        let child = parent.with_timeout(Duration::from_secs(60));
        assert_eq!(child.deadline(), parent.deadline());
        assert!(child.done().recv().is_err());
        assert_eq!(child.err(), Some(Cancelled::DeadlineExceeded));
    }

    #[test]
    fn test_past_deadline_is_cancelled_immediately() {
        let ctx = Context::background().with_deadline(Instant::now());
        assert_eq!(ctx.err(), Some(Cancelled::DeadlineExceeded));
    }
}
