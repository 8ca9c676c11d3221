use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use msgpipe_system::{MessagePipeHandle, RunLoop};
use msgpipe_wire::{Message, ServiceMessage, EXPECTS_RESPONSE};
use tracing::{debug, error, trace, warn};

use crate::config::RouterConfig;
use crate::connector::Connector;
use crate::control::{self, ControlMessageHandler, MessageKind};
use crate::error::{ConnectionError, DispatchError};
use crate::receiver::{
    FaultDisposition, MessageReceiver, MessageReceiverWithResponder, ResponseReceiver,
};
use crate::responder::Responder;

struct RouterState {
    next_request_id: u64,
    responders: HashMap<u64, Box<dyn ResponseReceiver>>,
    incoming: Option<Box<dyn MessageReceiverWithResponder>>,
    control: ControlMessageHandler,
    required_version: u32,
    peer_version: Option<u32>,
    closed: bool,
}

impl RouterState {
    /// Next id that is nonzero and not held by a pending request.
    fn allocate_request_id(&mut self) -> u64 {
        loop {
            let id = self.next_request_id;
            self.next_request_id = self.next_request_id.wrapping_add(1);
            if id != 0 && !self.responders.contains_key(&id) {
                return id;
            }
        }
    }
}

pub(crate) struct RouterInner {
    pub(crate) connector: Connector,
    state: RefCell<RouterState>,
}

/// Request/response correlation on top of a [`Connector`].
///
/// Outgoing requests get a fresh request id and a registered continuation;
/// the matching response invokes it exactly once. Incoming requests are
/// delivered with a [`Responder`] bound to their id. Control messages
/// (version query and requirement) are answered here and never reach the
/// application receiver.
///
/// Cloning yields another reference to the same router.
#[derive(Clone)]
pub struct Router {
    inner: Rc<RouterInner>,
}

impl Router {
    pub fn new(handle: MessagePipeHandle, run_loop: &RunLoop) -> Self {
        Self::with_config(handle, run_loop, RouterConfig::default())
    }

    pub fn with_config(
        handle: MessagePipeHandle,
        run_loop: &RunLoop,
        config: RouterConfig,
    ) -> Self {
        let connector = Connector::with_config(handle, run_loop, config.connector);
        let inner = Rc::new(RouterInner {
            connector,
            state: RefCell::new(RouterState {
                next_request_id: 1,
                responders: HashMap::new(),
                incoming: None,
                control: ControlMessageHandler::new(config.interface_version),
                required_version: 0,
                peer_version: None,
                closed: false,
            }),
        });
        inner.connector.set_incoming_message_receiver(RouterReceiver {
            router: Rc::downgrade(&inner),
        });
        Self { inner }
    }

    pub fn start(&self) {
        self.inner.connector.start();
    }

    pub fn set_incoming_message_receiver<R>(&self, receiver: R)
    where
        R: MessageReceiverWithResponder + 'static,
    {
        let previous = self
            .inner
            .state
            .borrow_mut()
            .incoming
            .replace(Box::new(receiver));
        drop(previous);
    }

    pub fn set_error_handler<F>(&self, handler: F)
    where
        F: FnOnce(ConnectionError) + 'static,
    {
        self.inner.connector.set_error_handler(handler);
    }

    pub fn set_fault_handler<F>(&self, handler: F)
    where
        F: FnMut(&DispatchError) -> FaultDisposition + 'static,
    {
        self.inner.connector.set_fault_handler(handler);
    }

    /// Send a one-way message. Requests must go through
    /// [`Router::accept_with_responder`].
    pub fn accept(&self, message: Message) -> bool {
        match message.header() {
            Ok(header) if header.expects_response() => {
                warn!(
                    message_type = header.message_type,
                    "request sent without a continuation"
                );
                false
            }
            Ok(_) => self.inner.connector.accept(message),
            Err(err) => {
                warn!(error = %err, "refusing to send message with invalid header");
                false
            }
        }
    }

    /// Send `message` as a request; `continuation` runs with the response.
    ///
    /// Returns false without sending if the message is a response, has no
    /// request-id slot, or the connection is closed.
    pub fn accept_with_responder<R>(&self, mut message: Message, continuation: R) -> bool
    where
        R: ResponseReceiver + 'static,
    {
        let header = match message.header() {
            Ok(header) => header,
            Err(err) => {
                warn!(error = %err, "refusing to send request with invalid header");
                return false;
            }
        };
        if header.is_response() || !header.has_request_id() {
            debug!(
                message_type = header.message_type,
                "message cannot carry a request"
            );
            return false;
        }
        if self.inner.connector.is_closed() {
            return false;
        }

        let request_id = self.inner.state.borrow_mut().allocate_request_id();
        if let Err(err) = message.stamp(EXPECTS_RESPONSE, request_id) {
            warn!(error = %err, "cannot stamp request");
            return false;
        }
        if !self.inner.connector.accept(message) {
            return false;
        }
        trace!(request_id, message_type = header.message_type, "request sent");
        self.inner
            .state
            .borrow_mut()
            .responders
            .insert(request_id, Box::new(continuation));
        true
    }

    /// Ask the peer for its interface version. `callback` receives it, or 0
    /// if the peer did not understand the query.
    pub fn query_version<F>(&self, callback: F) -> bool
    where
        F: FnOnce(u32) + 'static,
    {
        let message = match control::query_version_request() {
            Ok(message) => message,
            Err(err) => {
                error!(error = %err, "failed to build version query");
                return false;
            }
        };
        let router = Rc::downgrade(&self.inner);
        self.accept_with_responder(
            message,
            move |response: ServiceMessage| -> Result<(), DispatchError> {
                let version = control::parse_query_version_response(response)?;
                if let Some(inner) = router.upgrade() {
                    inner.state.borrow_mut().peer_version = Some(version);
                }
                debug!(version, "peer interface version");
                callback(version);
                Ok(())
            },
        )
    }

    /// Round-trip barrier for tests. `done` runs once the peer has
    /// dispatched everything sent before it, or once the connection closes.
    /// Returns false, without running `done`, if nothing could be sent.
    pub fn flush_for_testing<F>(&self, done: F) -> bool
    where
        F: FnOnce() + 'static,
    {
        let message = match control::flush_for_testing_request() {
            Ok(message) => message,
            Err(err) => {
                error!(error = %err, "failed to build flush request");
                return false;
            }
        };
        self.accept_with_responder(
            message,
            FlushContinuation {
                done: Box::new(done),
            },
        )
    }

    /// Require the peer to support at least `version`. Takes effect locally
    /// at once; a peer that cannot comply closes the connection.
    pub fn require_version(&self, version: u32) {
        {
            let mut state = self.inner.state.borrow_mut();
            if version <= state.required_version {
                return;
            }
            state.required_version = version;
        }
        match control::require_version_message(version) {
            Ok(message) => {
                self.inner.connector.accept(message);
            }
            Err(err) => error!(error = %err, "failed to build version requirement"),
        }
    }

    /// Close the connection. Pending continuations are abandoned.
    pub fn close(&self) {
        self.inner.connector.close();
    }

    /// Detach the pipe endpoint. Pending continuations are abandoned since
    /// their responses can no longer arrive here.
    pub fn pass_handle(&self) -> Option<MessagePipeHandle> {
        let handle = self.inner.connector.pass_handle();
        abandon(take_pending(&self.inner));
        handle
    }

    pub fn pause_incoming_method_call_processing(&self) {
        self.inner.connector.pause_incoming_method_call_processing();
    }

    pub fn resume_incoming_method_call_processing(&self) {
        self.inner.connector.resume_incoming_method_call_processing();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.connector.is_closed()
    }

    pub fn encountered_error(&self) -> bool {
        self.inner.connector.encountered_error()
    }

    pub fn pending_response_count(&self) -> usize {
        self.inner.state.borrow().responders.len()
    }

    pub fn required_version(&self) -> u32 {
        self.inner.state.borrow().required_version
    }

    /// Last version reported by the peer through [`Router::query_version`].
    pub fn peer_version(&self) -> Option<u32> {
        self.inner.state.borrow().peer_version
    }

    pub fn interface_version(&self) -> u32 {
        self.inner.state.borrow().control.interface_version()
    }

    pub fn connector(&self) -> &Connector {
        &self.inner.connector
    }

    /// Send `message` as a request and wait for the response.
    ///
    /// The response is only delivered while the owning [`RunLoop`] runs.
    #[cfg(feature = "async")]
    pub fn call(
        &self,
        message: Message,
    ) -> impl std::future::Future<Output = Result<ServiceMessage, crate::error::RouterError>> {
        use crate::error::RouterError;

        let (sender, receiver) = tokio::sync::oneshot::channel();
        let sent = self.accept_with_responder(message, CallContinuation { sender });
        async move {
            if !sent {
                return Err(RouterError::SendFailed);
            }
            receiver.await.map_err(|_| RouterError::ConnectionClosed)
        }
    }

    fn dispatch(&self, message: ServiceMessage) -> Result<bool, DispatchError> {
        let header = *message.header();
        if header.is_response() {
            let continuation = self
                .inner
                .state
                .borrow_mut()
                .responders
                .remove(&header.request_id);
            return match continuation {
                Some(continuation) => continuation.on_response(message).map(|()| true),
                None => {
                    debug!(request_id = header.request_id, "response for unknown request dropped");
                    Ok(false)
                }
            };
        }

        let control = self.inner.state.borrow().control;
        match MessageKind::of(&header) {
            MessageKind::QueryVersion => {
                let response = control.handle_run(message)?;
                Ok(self.inner.connector.accept(response))
            }
            MessageKind::RequireVersion => {
                control.handle_run_or_close_pipe(message)?;
                Ok(true)
            }
            MessageKind::Application => self.dispatch_application(message),
        }
    }

    fn dispatch_application(&self, message: ServiceMessage) -> Result<bool, DispatchError> {
        let incoming = self.inner.state.borrow_mut().incoming.take();
        let Some(mut incoming) = incoming else {
            debug!(
                message_type = message.message_type(),
                "no incoming receiver, discarding message"
            );
            return Ok(false);
        };

        let result = if message.header().expects_response() {
            let responder = Responder::new(Rc::downgrade(&self.inner), message.request_id());
            incoming.accept_with_responder(message, responder)
        } else {
            incoming.accept(message)
        };
        self.restore_incoming(incoming);
        result
    }

    fn restore_incoming(&self, mut incoming: Box<dyn MessageReceiverWithResponder>) {
        let mut state = self.inner.state.borrow_mut();
        if state.closed {
            drop(state);
            incoming.on_close();
            return;
        }
        let replaced = match state.incoming {
            Some(_) => Some(incoming),
            None => {
                state.incoming = Some(incoming);
                None
            }
        };
        drop(state);
        drop(replaced);
    }

    fn on_connection_closed(&self) {
        let incoming = {
            let mut state = self.inner.state.borrow_mut();
            state.closed = true;
            state.incoming.take()
        };
        let pending = take_pending(&self.inner);
        if !pending.is_empty() {
            debug!(count = pending.len(), "abandoning pending requests");
        }
        abandon(pending);
        if let Some(mut incoming) = incoming {
            incoming.on_close();
        }
    }
}

fn take_pending(inner: &RouterInner) -> Vec<(u64, Box<dyn ResponseReceiver>)> {
    let mut pending: Vec<_> = inner.state.borrow_mut().responders.drain().collect();
    pending.sort_unstable_by_key(|(id, _)| *id);
    pending
}

fn abandon(pending: Vec<(u64, Box<dyn ResponseReceiver>)>) {
    for (request_id, continuation) in pending {
        trace!(request_id, "request abandoned");
        continuation.on_abandoned();
    }
}

/// Installed on the connector; forwards to the router while it lives.
struct RouterReceiver {
    router: Weak<RouterInner>,
}

impl MessageReceiver for RouterReceiver {
    fn accept(&mut self, message: Message) -> Result<bool, DispatchError> {
        let Some(inner) = self.router.upgrade() else {
            return Ok(false);
        };
        let message = message.into_service_message()?;
        Router { inner }.dispatch(message)
    }

    fn on_close(&mut self) {
        if let Some(inner) = self.router.upgrade() {
            Router { inner }.on_connection_closed();
        }
    }
}

struct FlushContinuation {
    done: Box<dyn FnOnce()>,
}

impl ResponseReceiver for FlushContinuation {
    fn on_response(self: Box<Self>, _: ServiceMessage) -> Result<(), DispatchError> {
        (self.done)();
        Ok(())
    }

    fn on_abandoned(self: Box<Self>) {
        (self.done)();
    }
}

#[cfg(feature = "async")]
struct CallContinuation {
    sender: tokio::sync::oneshot::Sender<ServiceMessage>,
}

#[cfg(feature = "async")]
impl ResponseReceiver for CallContinuation {
    fn on_response(self: Box<Self>, response: ServiceMessage) -> Result<(), DispatchError> {
        // The caller may have stopped waiting.
        let _ = self.sender.send(response);
        Ok(())
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("Router")
            .field("connector", &self.inner.connector)
            .field("pending", &state.responders.len())
            .field("interface_version", &state.control.interface_version())
            .field("required_version", &state.required_version)
            .field("peer_version", &state.peer_version)
            .finish()
    }
}
