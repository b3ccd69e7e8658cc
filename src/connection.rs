use crate::Error;
use std::{future::Future, pin::Pin};

/// a type-erased task for [`ConnectionContext::spawn`]
pub type BoxedTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// The enclosing connection, as the decoder sees it
///
/// One implementation per server integration: it lends the decoder the
/// request's scheduler, produces the interim `100 Continue` response, and
/// records bad-request state for the connection loop to act on.
pub trait ConnectionContext: Send + Sync + 'static {
    /// run `task` to completion on the request's scheduler
    fn spawn(&self, task: BoxedTask);

    /// Produce an interim `100 Continue` response if the request expects
    /// one and it has not been sent. Invoked at most once per body, and
    /// only when the first transport read did not complete synchronously.
    fn try_produce_continue(&self);

    /// the request failed in a way that maps to a client error; the
    /// connection loop responds and closes accordingly
    fn set_bad_request_state(&self, error: &Error);

    /// identifier tying log lines to this connection
    fn connection_id(&self) -> &str;
}
