//! Echo processor: the response is the request.
//!
//! Useful for throughput testing, since the response size tracks the
//! request size exactly.

use crate::processor::{ProcessError, Processor};
use tracing::trace;

#[derive(Debug, Default)]
pub struct Echo {
    handled: u64,
}

impl Processor for Echo {
    fn process(&mut self, request: &str) -> Result<String, ProcessError> {
        self.handled += 1;
        trace!(handled = self.handled, len = request.len(), "Echoing request");
        Ok(request.to_string())
    }
}
