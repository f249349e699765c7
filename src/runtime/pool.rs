//! Worker pool dispatching connections to long-lived worker threads.
//!
//! Connections are queued on a shared channel and picked up in arrival
//! order by whichever worker is idle. When every worker is busy the queue
//! simply grows; connections are never dropped for lack of a worker.

use crate::config::ConnectionSettings;
use crate::processor::{Processor, ProcessorFactory};
use crate::runtime::{Connection, ConnectionError, ConnectionHandler};
use std::io;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// The pool no longer accepts connections.
#[derive(Debug, thiserror::Error)]
#[error("worker pool is shut down")]
pub struct SubmitError(pub Connection);

/// Fixed-size pool of worker threads.
pub struct WorkerPool {
    sender: Option<Sender<Connection>>,
    workers: Vec<Worker>,
}

struct Worker {
    id: usize,
    handle: Option<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `size` workers. Each calls `factory` once on its own thread to
    /// build the processor it keeps for its whole life.
    pub fn new<P>(
        size: usize,
        factory: ProcessorFactory<P>,
        settings: ConnectionSettings,
    ) -> io::Result<Self>
    where
        P: Processor + 'static,
    {
        let (sender, receiver) = mpsc::channel();
        let receiver = Arc::new(Mutex::new(receiver));
        let mut workers = Vec::with_capacity(size);

        for id in 0..size {
            let receiver = Arc::clone(&receiver);
            let factory = Arc::clone(&factory);

            let handle = thread::Builder::new()
                .name(format!("worker-{id}"))
                .spawn(move || worker_loop(id, receiver, factory, settings))?;

            workers.push(Worker {
                id,
                handle: Some(handle),
            });
        }

        info!(workers = size, "Worker pool started");

        Ok(Self {
            sender: Some(sender),
            workers,
        })
    }

    /// Queue a connection for the next idle worker.
    ///
    /// Only reports whether the pool took the connection; how the connection
    /// is served is never reported back.
    pub fn submit(&self, conn: Connection) -> Result<(), SubmitError> {
        match &self.sender {
            Some(sender) => sender.send(conn).map_err(|e| SubmitError(e.0)),
            None => Err(SubmitError(conn)),
        }
    }

    /// Number of worker threads.
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Stop accepting connections. Queued connections are still served.
    pub fn close(&mut self) {
        self.sender.take();
    }

    /// Close the pool and wait for every worker to finish.
    pub fn shutdown(mut self) {
        self.close();

        for worker in &mut self.workers {
            if let Some(handle) = worker.handle.take() {
                if handle.join().is_err() {
                    error!(worker = worker.id, "Worker thread panicked");
                }
            }
        }

        info!("All workers stopped");
    }
}

fn worker_loop<P: Processor>(
    id: usize,
    receiver: Arc<Mutex<Receiver<Connection>>>,
    factory: ProcessorFactory<P>,
    settings: ConnectionSettings,
) {
    let mut processor = factory();
    let mut handler = ConnectionHandler::new(id, settings);
    debug!(worker = id, "Worker initialized with new processor");

    loop {
        // The lock is released before the connection is served.
        let next = receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .recv();

        let Ok(conn) = next else {
            break;
        };

        let peer = conn.peer;
        debug!(worker = id, peer = %peer, "Handling connection");

        let outcome = handler.handle(conn, &mut processor);

        match outcome {
            Ok(stats) => {
                debug!(
                    worker = id,
                    peer = %peer,
                    requests = stats.requests,
                    bytes_read = stats.bytes_read,
                    bytes_written = stats.bytes_written,
                    "Connection closed"
                );
            }
            Err(ConnectionError::ProcessorPanic) => {
                error!(worker = id, peer = %peer, "Processor panicked, rebuilding");
                processor = factory();
            }
            Err(e) if e.is_timeout() => {
                info!(worker = id, peer = %peer, error = %e, "Connection timed out");
            }
            Err(e) => {
                warn!(worker = id, peer = %peer, error = %e, "Connection error");
            }
        }
    }

    debug!(worker = id, "Worker exiting");
}
