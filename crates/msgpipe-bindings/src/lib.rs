//! Message routing over msgpipe pipes.
//!
//! This is the layer generated interface bindings talk to:
//! - [`Connector`] reads whole messages off a pipe and writes outgoing ones;
//! - [`Router`] correlates requests with responses and answers the interface
//!   control messages;
//! - [`Responder`] answers one incoming request;
//! - [`Executor`] runs work from other threads on a router's thread.

pub mod config;
pub mod connector;
pub mod control;
pub mod error;
pub mod executor;
pub mod receiver;
pub mod responder;
pub mod router;

pub use config::{ConnectorConfig, RouterConfig};
pub use connector::Connector;
pub use control::{ControlMessageHandler, MessageKind, RUN_MESSAGE_ID, RUN_OR_CLOSE_PIPE_MESSAGE_ID};
pub use error::{ConnectionError, DispatchError, ProtocolError, Result, RouterError};
pub use executor::{Executor, ExecutorHandle, ExecutorRegistry};
pub use receiver::{
    FaultDisposition, MessageReceiver, MessageReceiverWithResponder, ResponseReceiver,
};
pub use responder::Responder;
pub use router::Router;
