use std::fmt;
use std::rc::Weak;

use msgpipe_wire::{Message, IS_RESPONSE};
use tracing::{debug, warn};

use crate::error::ConnectionError;
use crate::router::RouterInner;

/// One-shot handle for answering an incoming request.
///
/// Dropping a responder without calling [`Responder::accept`] closes the
/// connection, so the peer never waits on a response that cannot come.
pub struct Responder {
    router: Weak<RouterInner>,
    request_id: u64,
    used: bool,
}

impl Responder {
    pub(crate) fn new(router: Weak<RouterInner>, request_id: u64) -> Self {
        Self {
            router,
            request_id,
            used: false,
        }
    }

    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    /// Whether a response could still reach the peer.
    pub fn is_connection_valid(&self) -> bool {
        self.router
            .upgrade()
            .is_some_and(|router| !router.connector.is_closed())
    }

    /// Send `response`, stamped as the response to this request. Returns
    /// false if the message has no request-id slot or the connection is
    /// gone.
    pub fn accept(mut self, mut response: Message) -> bool {
        self.used = true;
        let Some(router) = self.router.upgrade() else {
            return false;
        };
        if let Err(err) = response.stamp(IS_RESPONSE, self.request_id) {
            warn!(request_id = self.request_id, error = %err, "cannot stamp response");
            return false;
        }
        router.connector.accept(response)
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        if self.used {
            return;
        }
        let Some(router) = self.router.upgrade() else {
            return;
        };
        debug!(request_id = self.request_id, "responder dropped unused");
        router.connector.raise_error(ConnectionError::ResponderDropped {
            request_id: self.request_id,
        });
    }
}

impl fmt::Debug for Responder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Responder")
            .field("request_id", &self.request_id)
            .field("used", &self.used)
            .finish()
    }
}
