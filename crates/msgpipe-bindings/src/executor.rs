//! Cross-thread task execution.
//!
//! Routers and connectors are bound to the thread running their
//! [`RunLoop`]. An [`Executor`] lets other threads hand work to that thread:
//! tasks go into a mutex-guarded queue and a zero-length message on a wake
//! pipe makes the owning thread drain it.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use msgpipe_system::{create_message_pipe, MessagePipeHandle, RunLoop, Signals, SystemError, Watch};
use parking_lot::Mutex;
use tracing::{debug, trace};

type Task = Box<dyn FnOnce() + Send>;

struct ExecutorShared {
    tasks: VecDeque<Task>,
    /// Write end of the wake pipe; `None` once the executor is gone.
    wake: Option<MessagePipeHandle>,
}

/// Sendable reference to an [`Executor`].
#[derive(Clone)]
pub struct ExecutorHandle {
    shared: Arc<Mutex<ExecutorShared>>,
}

impl ExecutorHandle {
    /// Queue `task` to run on the executor's thread. Returns false if the
    /// executor has been dropped; the task is then dropped unrun.
    pub fn execute<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let mut shared = self.shared.lock();
        let Some(wake) = shared.wake.as_ref() else {
            return false;
        };
        if let Err(err) = wake.write_message(&[], Vec::new()) {
            debug!(error = %err, "executor wake failed");
            return false;
        }
        shared.tasks.push_back(Box::new(task));
        true
    }

    /// Whether the executor still accepts tasks.
    pub fn is_alive(&self) -> bool {
        self.shared.lock().wake.is_some()
    }
}

impl fmt::Debug for ExecutorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorHandle")
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Runs tasks from any thread on the thread owning a [`RunLoop`].
pub struct Executor {
    shared: Arc<Mutex<ExecutorShared>>,
    _watch: Watch,
}

impl Executor {
    pub fn new(run_loop: &RunLoop) -> Result<Self, SystemError> {
        let (read, write) = create_message_pipe();
        let shared = Arc::new(Mutex::new(ExecutorShared {
            tasks: VecDeque::new(),
            wake: Some(write),
        }));

        let read = Rc::new(read);
        let reader = read.clone();
        let queue = shared.clone();
        let watch = run_loop.watch(&read, Signals::READABLE, move |result| {
            if result.is_err() {
                return;
            }
            while reader.read_message().is_ok() {}
            run_pending(&queue);
        })?;

        Ok(Self {
            shared,
            _watch: watch,
        })
    }

    pub fn handle(&self) -> ExecutorHandle {
        ExecutorHandle {
            shared: self.shared.clone(),
        }
    }

    pub fn pending_task_count(&self) -> usize {
        self.shared.lock().tasks.len()
    }
}

/// Run queued tasks without holding the lock, so tasks may queue more work.
fn run_pending(queue: &Mutex<ExecutorShared>) {
    let mut ran = 0usize;
    loop {
        let task = queue.lock().tasks.pop_front();
        match task {
            Some(task) => {
                task();
                ran += 1;
            }
            None => break,
        }
    }
    trace!(ran, "executor drained");
}

impl Drop for Executor {
    fn drop(&mut self) {
        let (wake, tasks) = {
            let mut shared = self.shared.lock();
            (shared.wake.take(), std::mem::take(&mut shared.tasks))
        };
        if !tasks.is_empty() {
            debug!(count = tasks.len(), "dropping unrun executor tasks");
        }
        drop(wake);
        drop(tasks);
    }
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("pending", &self.pending_task_count())
            .finish()
    }
}

/// Executors by owning thread.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: Arc<Mutex<HashMap<ThreadId, ExecutorHandle>>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handle` for `thread`, returning the previous entry.
    pub fn register(&self, thread: ThreadId, handle: ExecutorHandle) -> Option<ExecutorHandle> {
        self.executors.lock().insert(thread, handle)
    }

    pub fn register_current(&self, handle: ExecutorHandle) -> Option<ExecutorHandle> {
        self.register(thread::current().id(), handle)
    }

    pub fn unregister(&self, thread: ThreadId) -> Option<ExecutorHandle> {
        self.executors.lock().remove(&thread)
    }

    pub fn get(&self, thread: ThreadId) -> Option<ExecutorHandle> {
        self.executors.lock().get(&thread).cloned()
    }

    /// Run `task` on `thread`'s executor. False if none is registered or it
    /// is gone.
    pub fn execute_on<F>(&self, thread: ThreadId, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        match self.get(thread) {
            Some(handle) => handle.execute(task),
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.executors.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.lock().is_empty()
    }
}

impl fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("executors", &self.len())
            .finish()
    }
}
