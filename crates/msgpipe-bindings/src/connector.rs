use std::cell::RefCell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use msgpipe_system::{
    MessagePipeHandle, RawMessage, RunLoop, Signals, SystemError, Watch, WatchResult,
};
use msgpipe_wire::{Message, ValidationError};
use tracing::{debug, error, trace, warn};

use crate::config::ConnectorConfig;
use crate::error::{ConnectionError, DispatchError};
use crate::receiver::{FaultDisposition, MessageReceiver};

type ErrorHandler = Box<dyn FnOnce(ConnectionError)>;
type FaultHandler = Box<dyn FnMut(&DispatchError) -> FaultDisposition>;

struct ConnectorState {
    handle: Option<MessagePipeHandle>,
    watch: Option<Watch>,
    receiver: Option<Box<dyn MessageReceiver>>,
    error_handler: Option<ErrorHandler>,
    fault_handler: Option<FaultHandler>,
    /// Set while the receiver is taken out for a dispatch.
    dispatching: bool,
    started: bool,
    paused: bool,
    closed: bool,
    encountered_error: bool,
}

struct ConnectorInner {
    run_loop: RunLoop,
    config: ConnectorConfig,
    state: RefCell<ConnectorState>,
}

/// Turns pipe readability into message delivery, and outgoing messages into
/// pipe writes.
///
/// A connector owns one pipe endpoint. After [`Connector::start`] every
/// READABLE notification drains the pipe, handing each message to the
/// incoming receiver. Any transport failure, malformed message or fatal
/// receiver fault closes the connector and notifies the error handler once.
///
/// Connectors are single-threaded: all callbacks run on the thread owning
/// the [`RunLoop`]. Cloning yields another reference to the same connector.
#[derive(Clone)]
pub struct Connector {
    inner: Rc<ConnectorInner>,
}

impl Connector {
    pub fn new(handle: MessagePipeHandle, run_loop: &RunLoop) -> Self {
        Self::with_config(handle, run_loop, ConnectorConfig::default())
    }

    pub fn with_config(
        handle: MessagePipeHandle,
        run_loop: &RunLoop,
        config: ConnectorConfig,
    ) -> Self {
        Self {
            inner: Rc::new(ConnectorInner {
                run_loop: run_loop.clone(),
                config,
                state: RefCell::new(ConnectorState {
                    handle: Some(handle),
                    watch: None,
                    receiver: None,
                    error_handler: None,
                    fault_handler: None,
                    dispatching: false,
                    started: false,
                    paused: false,
                    closed: false,
                    encountered_error: false,
                }),
            }),
        }
    }

    /// Begin watching for incoming messages. Idempotent.
    pub fn start(&self) {
        let mut state = self.inner.state.borrow_mut();
        if state.started || state.closed {
            return;
        }
        state.started = true;
        if !state.paused {
            self.arm(&mut state);
        }
    }

    fn arm(&self, state: &mut ConnectorState) {
        let Some(handle) = state.handle.as_ref() else {
            return;
        };
        let weak = Rc::downgrade(&self.inner);
        match self
            .inner
            .run_loop
            .watch(handle, Signals::READABLE, move |result| on_readable(&weak, result))
        {
            Ok(watch) => state.watch = Some(watch),
            Err(err) => error!(error = %err, "failed to watch message pipe"),
        }
    }

    pub fn set_incoming_message_receiver<R>(&self, receiver: R)
    where
        R: MessageReceiver + 'static,
    {
        self.inner.state.borrow_mut().receiver = Some(Box::new(receiver));
    }

    /// Remove the receiver. Later messages are discarded.
    pub fn clear_incoming_message_receiver(&self) {
        let receiver = self.inner.state.borrow_mut().receiver.take();
        drop(receiver);
    }

    /// Called once with the first error that closes the connector.
    pub fn set_error_handler<F>(&self, handler: F)
    where
        F: FnOnce(ConnectionError) + 'static,
    {
        self.inner.state.borrow_mut().error_handler = Some(Box::new(handler));
    }

    /// Decide what happens after a receiver fault. Without a fault handler
    /// the connector closes.
    pub fn set_fault_handler<F>(&self, handler: F)
    where
        F: FnMut(&DispatchError) -> FaultDisposition + 'static,
    {
        self.inner.state.borrow_mut().fault_handler = Some(Box::new(handler));
    }

    /// Write `message` to the pipe. Returns false if the connector is closed
    /// or the write failed; a failed write also closes the connector.
    pub fn accept(&self, message: Message) -> bool {
        let result = {
            let state = self.inner.state.borrow();
            if state.closed {
                return false;
            }
            let Some(handle) = state.handle.as_ref() else {
                return false;
            };
            if message.len() > self.inner.config.max_message_size {
                Err(SystemError::ResourceExhausted)
            } else {
                let (data, handles) = message.into_parts();
                trace!(size = data.len(), handles = handles.len(), "connector write");
                handle.write_message(&data, handles)
            }
        };

        match result {
            Ok(()) => true,
            Err(err) => {
                self.raise_error(ConnectionError::from_system(err));
                false
            }
        }
    }

    /// Stop delivering messages without closing. Messages stay queued in the
    /// pipe.
    pub fn pause_incoming_method_call_processing(&self) {
        let watch = {
            let mut state = self.inner.state.borrow_mut();
            state.paused = true;
            state.watch.take()
        };
        drop(watch);
    }

    /// Resume delivery, including anything queued while paused.
    pub fn resume_incoming_method_call_processing(&self) {
        let mut state = self.inner.state.borrow_mut();
        if !state.paused {
            return;
        }
        state.paused = false;
        if state.started && !state.closed {
            self.arm(&mut state);
        }
    }

    /// Close the pipe and notify the receiver. Idempotent.
    pub fn close(&self) {
        let (watch, handle, receiver) = {
            let mut state = self.inner.state.borrow_mut();
            if state.closed {
                return;
            }
            state.closed = true;
            (state.watch.take(), state.handle.take(), state.receiver.take())
        };
        drop(watch);
        drop(handle);
        debug!("connector closed");

        if let Some(mut receiver) = receiver {
            receiver.on_close();
        }
    }

    /// Stop watching and hand back the still-open endpoint. The connector is
    /// closed afterwards. Returns `None` if it was already closed.
    pub fn pass_handle(&self) -> Option<MessagePipeHandle> {
        let (watch, handle) = {
            let mut state = self.inner.state.borrow_mut();
            if state.closed {
                return None;
            }
            state.closed = true;
            (state.watch.take(), state.handle.take())
        };
        drop(watch);
        debug!("connector passed its handle");
        handle
    }

    /// Close the connector and report `err` to the error handler, unless the
    /// connector is already closed.
    pub fn raise_error(&self, err: ConnectionError) {
        let handler = {
            let mut state = self.inner.state.borrow_mut();
            if state.closed {
                return;
            }
            state.encountered_error = true;
            state.error_handler.take()
        };
        warn!(error = %err, code = err.code(), "connection error");
        self.close();

        if let Some(handler) = handler {
            if panic::catch_unwind(AssertUnwindSafe(|| handler(err))).is_err() {
                error!("connection error handler panicked");
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.borrow().closed
    }

    pub fn encountered_error(&self) -> bool {
        self.inner.state.borrow().encountered_error
    }

    pub fn is_paused(&self) -> bool {
        self.inner.state.borrow().paused
    }

    /// Pipe identifier of the endpoint, while it is still owned.
    pub fn pipe_id(&self) -> Option<u64> {
        self.inner.state.borrow().handle.as_ref().map(MessagePipeHandle::pipe_id)
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.inner.config
    }

    /// Read and dispatch until the pipe is drained.
    fn read_all(&self) {
        loop {
            let read = {
                let state = self.inner.state.borrow();
                if state.closed || state.paused || state.dispatching {
                    return;
                }
                match state.handle.as_ref() {
                    Some(handle) => handle.read_message(),
                    None => return,
                }
            };

            match read {
                Ok(raw) => self.dispatch(raw),
                Err(SystemError::ShouldWait) => return,
                Err(err) => {
                    self.raise_error(ConnectionError::from_system(err));
                    return;
                }
            }
        }
    }

    fn dispatch(&self, raw: RawMessage) {
        let max = self.inner.config.max_message_size;
        if raw.bytes.len() > max {
            self.raise_error(ConnectionError::Malformed(ValidationError::MessageTooLarge {
                size: raw.bytes.len(),
                max,
            }));
            return;
        }
        let message = Message::from_raw(raw);

        let receiver = {
            let mut state = self.inner.state.borrow_mut();
            let receiver = state.receiver.take();
            state.dispatching = receiver.is_some();
            receiver
        };
        let Some(mut receiver) = receiver else {
            trace!(size = message.len(), "no receiver, discarding message");
            return;
        };

        let result = receiver.accept(message);
        self.restore_receiver(receiver);

        match result {
            Ok(handled) => trace!(handled, "dispatched message"),
            Err(err) if err.is_protocol_violation() => self.raise_error(err.into()),
            Err(err) => match self.fault(&err) {
                FaultDisposition::Continue => warn!(error = %err, "receiver fault ignored"),
                FaultDisposition::Close => self.raise_error(err.into()),
            },
        }
    }

    /// Put the receiver back after a dispatch, unless it was replaced. If the
    /// connector closed meanwhile, the receiver gets its close notification
    /// here.
    fn restore_receiver(&self, mut receiver: Box<dyn MessageReceiver>) {
        let mut state = self.inner.state.borrow_mut();
        state.dispatching = false;
        if !state.closed {
            let replaced = match state.receiver {
                Some(_) => Some(receiver),
                None => {
                    state.receiver = Some(receiver);
                    None
                }
            };
            drop(state);
            drop(replaced);
            return;
        }
        drop(state);
        receiver.on_close();
    }

    fn fault(&self, err: &DispatchError) -> FaultDisposition {
        let handler = self.inner.state.borrow_mut().fault_handler.take();
        let Some(mut handler) = handler else {
            return FaultDisposition::Close;
        };
        let disposition = handler(err);
        let mut state = self.inner.state.borrow_mut();
        if state.fault_handler.is_none() {
            state.fault_handler = Some(handler);
        }
        disposition
    }
}

fn on_readable(weak: &Weak<ConnectorInner>, result: WatchResult) {
    let Some(inner) = weak.upgrade() else {
        return;
    };
    let connector = Connector { inner };
    match result {
        Ok(_) => connector.read_all(),
        // Our own close or pause cancelled the watch.
        Err(SystemError::Cancelled) => {}
        Err(err) => connector.raise_error(ConnectionError::from_system(err)),
    }
}

impl fmt::Debug for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("Connector")
            .field("started", &state.started)
            .field("paused", &state.paused)
            .field("closed", &state.closed)
            .field("encountered_error", &state.encountered_error)
            .finish()
    }
}
