//! Request processor contract.
//!
//! A processor turns one request string into one response string. Each
//! worker builds its own instance at startup and keeps it for every
//! connection it serves, so implementations are free to hold mutable state
//! without synchronization.

use std::sync::Arc;

/// Failure raised by a processor. The connection that sent the request is
/// closed without a response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ProcessError {
    message: String,
}

impl ProcessError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Turns a request into a response.
pub trait Processor {
    fn process(&mut self, request: &str) -> Result<String, ProcessError>;
}

impl<F> Processor for F
where
    F: FnMut(&str) -> Result<String, ProcessError>,
{
    fn process(&mut self, request: &str) -> Result<String, ProcessError> {
        self(request)
    }
}

/// Builds a fresh processor inside a worker thread.
///
/// The factory is shared by every worker; the processors it returns are not,
/// which is why `P` need not be `Send`.
pub type ProcessorFactory<P> = Arc<dyn Fn() -> P + Send + Sync>;
