//! Message pipes with typed request/response routing.
//!
//! # Crate Structure
//!
//! - [`system`]: in-process message pipes, signals and watch run loops
//! - [`wire`]: message header, struct encoding and the validating decoder
//! - [`bindings`]: connector, router, responder and cross-thread executor

/// Re-export pipe primitives.
pub mod system {
    pub use msgpipe_system::*;
}

/// Re-export wire format types.
pub mod wire {
    pub use msgpipe_wire::*;
}

/// Re-export routing types.
pub mod bindings {
    pub use msgpipe_bindings::*;
}
