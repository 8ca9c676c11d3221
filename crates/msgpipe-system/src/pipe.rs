use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::{Result, SystemError};
use crate::handle::UntypedHandle;
use crate::run_loop::{Inbox, WatchId, WatchResult};
use crate::signals::{Signals, SignalsState};

/// Default maximum message size: 16 MiB.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Maximum number of handles attached to a single message.
pub const MAX_HANDLES_PER_MESSAGE: usize = 64;

static NEXT_PIPE_ID: AtomicU64 = AtomicU64::new(1);

/// Options applied to both endpoints of a newly created pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipeOptions {
    /// Writes larger than this fail with [`SystemError::ResourceExhausted`].
    pub max_message_size: usize,
}

impl Default for PipeOptions {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

/// One complete message as read from a pipe.
#[derive(Debug, Default)]
pub struct RawMessage {
    pub bytes: Bytes,
    pub handles: Vec<UntypedHandle>,
}

pub(crate) struct Watcher {
    pub(crate) id: WatchId,
    pub(crate) signals: Signals,
    pub(crate) inbox: Arc<Inbox>,
    /// Whether the watched signals were satisfied at the last evaluation.
    /// Notifications only fire on the unsatisfied -> satisfied edge.
    pub(crate) satisfied: bool,
}

#[derive(Default)]
struct Endpoint {
    incoming: VecDeque<RawMessage>,
    closed: bool,
    watchers: Vec<Watcher>,
}

pub(crate) struct PipeShared {
    id: u64,
    options: PipeOptions,
    endpoints: [Endpoint; 2],
}

pub(crate) type SharedPipe = Arc<Mutex<PipeShared>>;

/// Notifications collected under the pipe lock and posted after release.
type PendingNotifications = Vec<(Arc<Inbox>, WatchId, WatchResult)>;

impl PipeShared {
    fn signals_state(&self, side: usize) -> SignalsState {
        let own = &self.endpoints[side];
        let peer_closed = self.endpoints[1 - side].closed;

        let mut satisfied = Signals::NONE;
        let mut satisfiable = Signals::PEER_CLOSED;

        if !own.incoming.is_empty() {
            satisfied |= Signals::READABLE;
            satisfiable |= Signals::READABLE;
        }
        if peer_closed {
            satisfied |= Signals::PEER_CLOSED;
        } else {
            satisfied |= Signals::WRITABLE;
            satisfiable |= Signals::READABLE | Signals::WRITABLE;
        }

        SignalsState {
            satisfied,
            satisfiable,
        }
    }

    /// Re-evaluate every watcher on `side` after a state change.
    fn evaluate(&mut self, side: usize, out: &mut PendingNotifications) {
        let state = self.signals_state(side);
        self.endpoints[side].watchers.retain_mut(|watcher| {
            if !state.is_satisfiable(watcher.signals) {
                out.push((
                    watcher.inbox.clone(),
                    watcher.id,
                    Err(SystemError::FailedPrecondition),
                ));
                return false;
            }
            let satisfied = state.is_satisfied(watcher.signals);
            if satisfied && !watcher.satisfied {
                out.push((watcher.inbox.clone(), watcher.id, Ok(state)));
            }
            watcher.satisfied = satisfied;
            true
        });
    }
}

fn post_all(notifications: PendingNotifications) {
    for (inbox, id, result) in notifications {
        inbox.notify(id, result);
    }
}

/// Create a connected pair of message pipe endpoints with default options.
pub fn create_message_pipe() -> (MessagePipeHandle, MessagePipeHandle) {
    create_message_pipe_with_options(PipeOptions::default())
}

/// Create a connected pair of message pipe endpoints.
pub fn create_message_pipe_with_options(
    options: PipeOptions,
) -> (MessagePipeHandle, MessagePipeHandle) {
    let id = NEXT_PIPE_ID.fetch_add(1, Ordering::Relaxed);
    let shared = Arc::new(Mutex::new(PipeShared {
        id,
        options,
        endpoints: [Endpoint::default(), Endpoint::default()],
    }));
    debug!(pipe = id, "created message pipe");
    (
        MessagePipeHandle {
            shared: shared.clone(),
            side: 0,
        },
        MessagePipeHandle { shared, side: 1 },
    )
}

/// One endpoint of a bidirectional message pipe.
///
/// Messages written here are read, whole and in order, from the peer
/// endpoint. Dropping the handle closes the endpoint; the peer then observes
/// [`Signals::PEER_CLOSED`].
pub struct MessagePipeHandle {
    shared: SharedPipe,
    side: usize,
}

impl MessagePipeHandle {
    /// Write one message. The handles are transferred on success and closed
    /// on failure.
    ///
    /// Fails with:
    /// - [`SystemError::InvalidArgument`] if a handle is invalid, is the peer
    ///   of this endpoint, or too many handles are attached;
    /// - [`SystemError::ResourceExhausted`] if the payload exceeds the pipe's
    ///   maximum message size;
    /// - [`SystemError::FailedPrecondition`] if the peer is closed.
    pub fn write_message(&self, bytes: &[u8], handles: Vec<UntypedHandle>) -> Result<()> {
        if handles.len() > MAX_HANDLES_PER_MESSAGE {
            return Err(SystemError::InvalidArgument);
        }
        for handle in &handles {
            match handle {
                UntypedHandle::Invalid => return Err(SystemError::InvalidArgument),
                UntypedHandle::MessagePipe(pipe) if Arc::ptr_eq(&pipe.shared, &self.shared) => {
                    return Err(SystemError::InvalidArgument);
                }
                UntypedHandle::MessagePipe(_) => {}
            }
        }

        let mut notifications = Vec::new();
        let rejected = {
            let mut shared = self.shared.lock();
            if bytes.len() > shared.options.max_message_size {
                Some((SystemError::ResourceExhausted, handles))
            } else if shared.endpoints[1 - self.side].closed {
                Some((SystemError::FailedPrecondition, handles))
            } else {
                trace!(
                    pipe = shared.id,
                    side = self.side,
                    size = bytes.len(),
                    handles = handles.len(),
                    "write message"
                );
                shared.endpoints[1 - self.side]
                    .incoming
                    .push_back(RawMessage {
                        bytes: Bytes::copy_from_slice(bytes),
                        handles,
                    });
                shared.evaluate(1 - self.side, &mut notifications);
                None
            }
        };
        post_all(notifications);

        match rejected {
            // Handles are dropped here, outside the pipe lock.
            Some((err, _handles)) => Err(err),
            None => Ok(()),
        }
    }

    /// Read the next message.
    ///
    /// Returns [`SystemError::ShouldWait`] if nothing is queued and the peer
    /// is open, [`SystemError::FailedPrecondition`] if nothing is queued and
    /// the peer is closed.
    pub fn read_message(&self) -> Result<RawMessage> {
        let mut notifications = Vec::new();
        let result = {
            let mut shared = self.shared.lock();
            match shared.endpoints[self.side].incoming.pop_front() {
                Some(message) => {
                    shared.evaluate(self.side, &mut notifications);
                    Ok(message)
                }
                None if shared.endpoints[1 - self.side].closed => {
                    Err(SystemError::FailedPrecondition)
                }
                None => Err(SystemError::ShouldWait),
            }
        };
        post_all(notifications);
        result
    }

    /// Current satisfied/satisfiable signals for this endpoint.
    pub fn query_signals_state(&self) -> SignalsState {
        self.shared.lock().signals_state(self.side)
    }

    /// Close the endpoint. Equivalent to dropping it.
    pub fn close(self) {
        drop(self);
    }

    /// Opaque pipe identifier shared by both endpoints, for diagnostics.
    pub fn pipe_id(&self) -> u64 {
        self.shared.lock().id
    }

    /// Whether `other` is the peer endpoint of this one.
    pub fn is_peer_of(&self, other: &MessagePipeHandle) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared) && self.side != other.side
    }

    pub(crate) fn register_watcher(&self, watcher: Watcher) -> WatcherRegistration {
        let mut notifications = Vec::new();
        {
            let mut shared = self.shared.lock();
            shared.endpoints[self.side].watchers.push(watcher);
            shared.evaluate(self.side, &mut notifications);
        }
        post_all(notifications);
        WatcherRegistration {
            shared: Arc::downgrade(&self.shared),
            side: self.side,
        }
    }
}

impl Drop for MessagePipeHandle {
    fn drop(&mut self) {
        let mut notifications = Vec::new();
        let (drained, pipe_id) = {
            let mut shared = self.shared.lock();
            let own = &mut shared.endpoints[self.side];
            own.closed = true;
            let drained: Vec<RawMessage> = own.incoming.drain(..).collect();
            for watcher in own.watchers.drain(..) {
                notifications.push((watcher.inbox, watcher.id, Err(SystemError::Cancelled)));
            }
            shared.evaluate(1 - self.side, &mut notifications);
            (drained, shared.id)
        };
        post_all(notifications);
        debug!(
            pipe = pipe_id,
            side = self.side,
            discarded = drained.len(),
            "closed message pipe endpoint"
        );
        // Handles inside undelivered messages close here, outside the lock.
        drop(drained);
    }
}

impl fmt::Debug for MessagePipeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessagePipeHandle")
            .field("pipe", &self.pipe_id())
            .field("side", &self.side)
            .finish()
    }
}

/// Back-reference from a watch to the endpoint it is registered on.
pub(crate) struct WatcherRegistration {
    shared: Weak<Mutex<PipeShared>>,
    side: usize,
}

impl WatcherRegistration {
    /// Remove the watcher. A no-op if the pipe or the watcher is already gone.
    pub(crate) fn remove(&self, id: WatchId) {
        if let Some(shared) = self.shared.upgrade() {
            let mut shared = shared.lock();
            shared.endpoints[self.side]
                .watchers
                .retain(|watcher| watcher.id != id);
        }
    }
}
