//! Per-thread event loop that services watches.
//!
//! Pipes never invoke watch callbacks directly. A signal transition posts a
//! notification into the owning [`RunLoop`]'s inbox, and the callback runs
//! when that thread next calls [`RunLoop::run_until_idle`] or
//! [`RunLoop::run`]. Callbacks therefore always run on the thread that
//! registered them and may freely use `Rc`/`RefCell` state.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::trace;

use crate::error::{Result, SystemError};
use crate::pipe::{MessagePipeHandle, Watcher, WatcherRegistration};
use crate::signals::{Signals, SignalsState};

/// Outcome delivered to a watch callback.
///
/// `Ok` carries the signal state at the time of the transition. `Err` is
/// terminal: [`SystemError::FailedPrecondition`] when the watched signals can
/// never be satisfied again, [`SystemError::Cancelled`] when the watched
/// endpoint was closed. No further notifications follow an `Err`.
pub type WatchResult = std::result::Result<SignalsState, SystemError>;

/// Identifier of a registered watch, unique within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(u64);

static NEXT_WATCH_ID: AtomicU64 = AtomicU64::new(1);

type WatchCallback = Box<dyn FnMut(WatchResult)>;
type SendTask = Box<dyn FnOnce() + Send>;
type LocalTask = Box<dyn FnOnce()>;

enum Event {
    Notify { id: WatchId, result: WatchResult },
    Task(SendTask),
    Quit,
}

/// Cross-thread half of a run loop: a mutex-protected queue plus a condvar
/// the owning thread sleeps on.
pub(crate) struct Inbox {
    events: Mutex<VecDeque<Event>>,
    ready: Condvar,
}

impl Inbox {
    fn new() -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
        }
    }

    fn post(&self, event: Event) {
        self.events.lock().push_back(event);
        self.ready.notify_one();
    }

    pub(crate) fn notify(&self, id: WatchId, result: WatchResult) {
        self.post(Event::Notify { id, result });
    }

    fn pop(&self) -> Option<Event> {
        self.events.lock().pop_front()
    }

    /// Block until an event is queued or `deadline` passes.
    fn wait(&self, deadline: Option<Instant>) {
        let mut events = self.events.lock();
        match deadline {
            None => self.ready.wait_while(&mut events, |events| events.is_empty()),
            Some(deadline) => {
                self.ready
                    .wait_while_until(&mut events, |events| events.is_empty(), deadline);
            }
        }
    }
}

struct RunLoopInner {
    inbox: Arc<Inbox>,
    /// `None` while the callback is running.
    callbacks: RefCell<HashMap<WatchId, Option<WatchCallback>>>,
    local_tasks: RefCell<VecDeque<LocalTask>>,
    quit_requested: Cell<bool>,
}

/// Single-threaded event loop. Cloning yields another reference to the same
/// loop.
#[derive(Clone)]
pub struct RunLoop {
    inner: Rc<RunLoopInner>,
}

impl RunLoop {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RunLoopInner {
                inbox: Arc::new(Inbox::new()),
                callbacks: RefCell::new(HashMap::new()),
                local_tasks: RefCell::new(VecDeque::new()),
                quit_requested: Cell::new(false),
            }),
        }
    }

    /// A `Send + Sync` handle for posting work from other threads.
    pub fn handle(&self) -> RunLoopHandle {
        RunLoopHandle {
            inbox: self.inner.inbox.clone(),
        }
    }

    /// Watch `handle` for `signals`.
    ///
    /// The callback fires once each time the signals go from unsatisfied to
    /// satisfied, including immediately if they are satisfied now. Fails with
    /// [`SystemError::InvalidArgument`] for an empty signal mask.
    pub fn watch<F>(
        &self,
        handle: &MessagePipeHandle,
        signals: Signals,
        callback: F,
    ) -> Result<Watch>
    where
        F: FnMut(WatchResult) + 'static,
    {
        if signals.is_empty() {
            return Err(SystemError::InvalidArgument);
        }

        let id = WatchId(NEXT_WATCH_ID.fetch_add(1, Ordering::Relaxed));
        self.inner
            .callbacks
            .borrow_mut()
            .insert(id, Some(Box::new(callback)));

        let registration = handle.register_watcher(Watcher {
            id,
            signals,
            inbox: self.inner.inbox.clone(),
            satisfied: false,
        });
        trace!(watch = ?id, ?signals, "armed watch");

        Ok(Watch {
            id,
            registration,
            run_loop: Rc::downgrade(&self.inner),
            cancelled: false,
        })
    }

    /// Queue a task to run on this loop.
    pub fn post_task<F>(&self, task: F)
    where
        F: FnOnce() + 'static,
    {
        self.inner.local_tasks.borrow_mut().push_back(Box::new(task));
    }

    /// Run queued notifications and tasks until none are left. Returns the
    /// number of events processed.
    pub fn run_until_idle(&self) -> usize {
        let mut processed = 0;
        loop {
            let local = self.inner.local_tasks.borrow_mut().pop_front();
            if let Some(task) = local {
                task();
                processed += 1;
                continue;
            }
            match self.inner.inbox.pop() {
                Some(Event::Notify { id, result }) => {
                    self.dispatch(id, result);
                    processed += 1;
                }
                Some(Event::Task(task)) => {
                    task();
                    processed += 1;
                }
                Some(Event::Quit) => self.inner.quit_requested.set(true),
                None => return processed,
            }
        }
    }

    /// Run until [`RunLoop::quit`] or [`RunLoopHandle::quit`] is called.
    pub fn run(&self) {
        loop {
            self.run_until_idle();
            if self.inner.quit_requested.replace(false) {
                return;
            }
            self.inner.inbox.wait(None);
        }
    }

    /// Run until `condition` holds or `timeout` elapses. Returns whether the
    /// condition held.
    pub fn run_until<F>(&self, timeout: Duration, mut condition: F) -> bool
    where
        F: FnMut() -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            self.run_until_idle();
            if condition() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            self.inner.inbox.wait(Some(deadline));
        }
    }

    /// Make the current or next [`RunLoop::run`] return once idle.
    pub fn quit(&self) {
        self.inner.quit_requested.set(true);
    }

    /// Number of watches with a live callback.
    pub fn active_watch_count(&self) -> usize {
        self.inner.callbacks.borrow().len()
    }

    fn dispatch(&self, id: WatchId, result: WatchResult) {
        let callback = match self.inner.callbacks.borrow_mut().get_mut(&id) {
            Some(slot) => slot.take(),
            // Cancelled after the notification was queued.
            None => return,
        };
        let Some(mut callback) = callback else {
            return;
        };

        callback(result);

        // Whatever is not put back is dropped after the borrow is released,
        // since dropping a callback may cancel other watches.
        let leftover = {
            let mut callbacks = self.inner.callbacks.borrow_mut();
            match callbacks.get_mut(&id) {
                Some(slot) if result.is_ok() => {
                    *slot = Some(callback);
                    None
                }
                Some(_) => {
                    callbacks.remove(&id);
                    Some(callback)
                }
                None => Some(callback),
            }
        };
        drop(leftover);
    }
}

impl Default for RunLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RunLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunLoop")
            .field("watches", &self.active_watch_count())
            .finish()
    }
}

/// Thread-safe handle to a [`RunLoop`].
#[derive(Clone)]
pub struct RunLoopHandle {
    inbox: Arc<Inbox>,
}

impl RunLoopHandle {
    /// Queue a task to run on the loop's owning thread.
    pub fn post_task<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inbox.post(Event::Task(Box::new(task)));
    }

    /// Ask the loop to return from [`RunLoop::run`].
    pub fn quit(&self) {
        self.inbox.post(Event::Quit);
    }
}

impl fmt::Debug for RunLoopHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunLoopHandle").finish_non_exhaustive()
    }
}

/// A registered watch. Cancelled on drop.
pub struct Watch {
    id: WatchId,
    registration: WatcherRegistration,
    run_loop: Weak<RunLoopInner>,
    cancelled: bool,
}

impl Watch {
    pub fn id(&self) -> WatchId {
        self.id
    }

    /// Stop future notifications. Safe to call repeatedly and after the
    /// watched handle has been closed.
    pub fn cancel(&mut self) {
        if self.cancelled {
            return;
        }
        self.cancelled = true;
        self.registration.remove(self.id);
        if let Some(run_loop) = self.run_loop.upgrade() {
            let removed = run_loop.callbacks.borrow_mut().remove(&self.id);
            drop(removed);
        }
        trace!(watch = ?self.id, "cancelled watch");
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }
}

impl Drop for Watch {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for Watch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watch")
            .field("id", &self.id)
            .field("cancelled", &self.cancelled)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipe::create_message_pipe;

    fn recorder() -> (Rc<RefCell<Vec<WatchResult>>>, impl FnMut(WatchResult)) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |result| sink.borrow_mut().push(result))
    }

    #[test]
    fn empty_mask_is_invalid() {
        let run_loop = RunLoop::new();
        let (a, _b) = create_message_pipe();
        let err = run_loop.watch(&a, Signals::NONE, |_| {}).unwrap_err();
        assert_eq!(err, SystemError::InvalidArgument);
    }

    #[test]
    fn fires_on_readable_transition() {
        let run_loop = RunLoop::new();
        let (a, b) = create_message_pipe();
        let (seen, callback) = recorder();
        let _watch = run_loop.watch(&b, Signals::READABLE, callback).unwrap();

        run_loop.run_until_idle();
        assert!(seen.borrow().is_empty());

        a.write_message(b"1", Vec::new()).unwrap();
        a.write_message(b"2", Vec::new()).unwrap();
        run_loop.run_until_idle();
        assert_eq!(seen.borrow().len(), 1, "one notification per transition");

        b.read_message().unwrap();
        b.read_message().unwrap();
        a.write_message(b"3", Vec::new()).unwrap();
        run_loop.run_until_idle();
        assert_eq!(seen.borrow().len(), 2);
        assert!(seen.borrow()[1]
            .unwrap()
            .is_satisfied(Signals::READABLE));
    }

    #[test]
    fn fires_immediately_when_already_satisfied() {
        let run_loop = RunLoop::new();
        let (a, b) = create_message_pipe();
        a.write_message(b"queued", Vec::new()).unwrap();

        let (seen, callback) = recorder();
        let _watch = run_loop.watch(&b, Signals::READABLE, callback).unwrap();
        run_loop.run_until_idle();
        assert_eq!(seen.borrow().len(), 1);
    }

    #[test]
    fn peer_close_makes_readable_unsatisfiable() {
        let run_loop = RunLoop::new();
        let (a, b) = create_message_pipe();
        let (seen, callback) = recorder();
        let _watch = run_loop.watch(&b, Signals::READABLE, callback).unwrap();

        drop(a);
        run_loop.run_until_idle();
        assert_eq!(
            seen.borrow().as_slice(),
            &[Err(SystemError::FailedPrecondition)]
        );
        assert_eq!(run_loop.active_watch_count(), 0);
    }

    #[test]
    fn closing_watched_handle_cancels() {
        let run_loop = RunLoop::new();
        let (_a, b) = create_message_pipe();
        let (seen, callback) = recorder();
        let mut watch = run_loop.watch(&b, Signals::READABLE, callback).unwrap();

        drop(b);
        run_loop.run_until_idle();
        assert_eq!(seen.borrow().as_slice(), &[Err(SystemError::Cancelled)]);

        watch.cancel();
        watch.cancel();
        assert!(watch.is_cancelled());
    }

    #[test]
    fn cancelled_watch_never_fires() {
        let run_loop = RunLoop::new();
        let (a, b) = create_message_pipe();
        let (seen, callback) = recorder();
        let mut watch = run_loop.watch(&b, Signals::READABLE, callback).unwrap();

        a.write_message(b"x", Vec::new()).unwrap();
        watch.cancel();
        run_loop.run_until_idle();
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn callback_may_cancel_its_own_watch() {
        let run_loop = RunLoop::new();
        let (a, b) = create_message_pipe();
        let slot: Rc<RefCell<Option<Watch>>> = Rc::new(RefCell::new(None));
        let fired = Rc::new(Cell::new(0));

        let watch = {
            let slot = slot.clone();
            let fired = fired.clone();
            run_loop
                .watch(&b, Signals::READABLE, move |_| {
                    fired.set(fired.get() + 1);
                    slot.borrow_mut().take();
                })
                .unwrap()
        };
        *slot.borrow_mut() = Some(watch);

        a.write_message(b"x", Vec::new()).unwrap();
        run_loop.run_until_idle();
        b.read_message().unwrap();
        a.write_message(b"y", Vec::new()).unwrap();
        run_loop.run_until_idle();

        assert_eq!(fired.get(), 1);
        assert_eq!(run_loop.active_watch_count(), 0);
    }

    #[test]
    fn remote_tasks_run_on_owner() {
        let run_loop = RunLoop::new();
        let handle = run_loop.handle();
        let owner = std::thread::current().id();
        let (tx, rx) = std::sync::mpsc::channel();

        std::thread::spawn(move || {
            handle.post_task(move || {
                tx.send(std::thread::current().id()).unwrap();
            });
            handle.quit();
        })
        .join()
        .unwrap();

        run_loop.run();
        assert_eq!(rx.recv().unwrap(), owner);
    }

    #[test]
    fn blocked_run_wakes_on_remote_quit() {
        let run_loop = RunLoop::new();
        let handle = run_loop.handle();

        let quitter = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            handle.quit();
        });
        let started = Instant::now();
        run_loop.run();
        assert!(started.elapsed() >= Duration::from_millis(10));
        quitter.join().unwrap();
    }

    #[test]
    fn run_until_times_out() {
        let run_loop = RunLoop::new();
        let held = run_loop.run_until(Duration::from_millis(10), || false);
        assert!(!held);
    }
}
