//! Built-in request processors.
//!
//! The server is agnostic to what requests mean; these let the binary run
//! stand-alone and give the runtime something to exercise.
//!
//! - `echo`: returns the request text unchanged
//! - `ping`: minimal ping/pong for health checks and latency testing

pub mod echo;
pub mod ping;

use crate::config::ProcessorKind;
use crate::processor::{ProcessError, Processor, ProcessorFactory};
use std::sync::Arc;

/// Processor selected by configuration.
#[derive(Debug)]
pub enum Builtin {
    Echo(echo::Echo),
    Ping(ping::Ping),
}

impl Processor for Builtin {
    fn process(&mut self, request: &str) -> Result<String, ProcessError> {
        match self {
            Builtin::Echo(p) => p.process(request),
            Builtin::Ping(p) => p.process(request),
        }
    }
}

/// Factory producing one processor of the configured kind per worker.
pub fn factory(kind: ProcessorKind) -> ProcessorFactory<Builtin> {
    Arc::new(move || match kind {
        ProcessorKind::Echo => Builtin::Echo(echo::Echo::default()),
        ProcessorKind::Ping => Builtin::Ping(ping::Ping::default()),
    })
}
