//! Ping processor.
//!
//! - `PING` -> `PONG`
//! - `PING <message>` -> `PONG <message>`
//!
//! Anything else is an error, which closes the connection.

use crate::processor::{ProcessError, Processor};

#[derive(Debug, Default)]
pub struct Ping;

impl Processor for Ping {
    fn process(&mut self, request: &str) -> Result<String, ProcessError> {
        if request.eq_ignore_ascii_case("PING") {
            return Ok("PONG".to_string());
        }

        match request.get(..5) {
            Some(prefix) if prefix.eq_ignore_ascii_case("PING ") => {
                Ok(format!("PONG {}", &request[5..]))
            }
            _ => Err(ProcessError::new("unknown command")),
        }
    }
}
