//! Message pipe primitives.
//!
//! This is the lowest layer of msgpipe. It provides:
//! - [`MessagePipeHandle`]: one end of a bidirectional, ordered,
//!   message-oriented pipe that can carry handles alongside bytes;
//! - [`Signals`] / [`SignalsState`]: readiness of an endpoint;
//! - [`RunLoop`] / [`Watch`]: edge-triggered notification of signal
//!   transitions, delivered on the thread that registered the watch.
//!
//! Everything else builds on top of these types.

pub mod error;
pub mod handle;
pub mod pipe;
pub mod run_loop;
pub mod signals;

pub use error::{Result, SystemError};
pub use handle::UntypedHandle;
pub use pipe::{
    create_message_pipe, create_message_pipe_with_options, MessagePipeHandle, PipeOptions,
    RawMessage, DEFAULT_MAX_MESSAGE_SIZE, MAX_HANDLES_PER_MESSAGE,
};
pub use run_loop::{RunLoop, RunLoopHandle, Watch, WatchId, WatchResult};
pub use signals::{Signals, SignalsState};
