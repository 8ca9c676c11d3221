use msgpipe_wire::{Message, ServiceMessage};

use crate::error::DispatchError;
use crate::responder::Responder;

/// Receives whole messages from a [`Connector`](crate::Connector).
///
/// The returned flag reports whether the message was handled; it is logged
/// but never stops the read loop. An `Err` is a receiver fault.
pub trait MessageReceiver {
    fn accept(&mut self, message: Message) -> Result<bool, DispatchError>;

    /// Called once when the connection closes.
    fn on_close(&mut self) {}
}

impl<F> MessageReceiver for F
where
    F: FnMut(Message) -> Result<bool, DispatchError>,
{
    fn accept(&mut self, message: Message) -> Result<bool, DispatchError> {
        self(message)
    }
}

/// Receives application messages from a [`Router`](crate::Router).
pub trait MessageReceiverWithResponder {
    /// A one-way message.
    fn accept(&mut self, message: ServiceMessage) -> Result<bool, DispatchError>;

    /// A request. Exactly one response should be sent through `responder`;
    /// dropping it unused closes the connection.
    fn accept_with_responder(
        &mut self,
        message: ServiceMessage,
        responder: Responder,
    ) -> Result<bool, DispatchError>;

    /// Called once when the connection closes.
    fn on_close(&mut self) {}
}

/// Continuation for one outstanding request.
pub trait ResponseReceiver {
    /// The matching response arrived.
    fn on_response(self: Box<Self>, response: ServiceMessage) -> Result<(), DispatchError>;

    /// The connection closed before a response arrived.
    fn on_abandoned(self: Box<Self>) {}
}

impl<F> ResponseReceiver for F
where
    F: FnOnce(ServiceMessage) -> Result<(), DispatchError>,
{
    fn on_response(self: Box<Self>, response: ServiceMessage) -> Result<(), DispatchError> {
        (*self)(response)
    }
}

/// What to do after a receiver returned an error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FaultDisposition {
    /// Log the fault and keep reading.
    Continue,
    /// Close the connection and report the error.
    #[default]
    Close,
}
