//! TCP listener and accept loop.
//!
//! Binds the configured endpoint, accepts connections until the shutdown
//! future resolves, and hands every accepted socket to the worker pool.
//! The accept loop never touches a socket after handing it over.

use crate::config::Config;
use crate::processor::{Processor, ProcessorFactory};
use crate::runtime::{Connection, WorkerPool};
use socket2::{Domain, Protocol, Socket, Type};
use std::future::Future;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

/// Pause after a failed accept so a persistent error (e.g. EMFILE) does not
/// spin the loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(10);

/// Server startup and shutdown errors
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind { addr: String, source: io::Error },
    #[error("failed to start worker pool: {0}")]
    Workers(#[source] io::Error),
}

/// A bound, listening socket.
pub struct Listener {
    inner: TcpListener,
    local_addr: SocketAddr,
}

impl Listener {
    /// Bind the configured endpoint with address reuse and socket buffer hints.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(config: &Config) -> Result<Self, ServerError> {
        let endpoint = config.endpoint();
        let bind_err = |source: io::Error| ServerError::Bind {
            addr: endpoint.clone(),
            source,
        };

        let addr = (config.host.as_str(), config.port)
            .to_socket_addrs()
            .map_err(bind_err)?
            .next()
            .ok_or_else(|| {
                bind_err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "address resolved to nothing",
                ))
            })?;

        let listener = create_listener(addr, config).map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;
        let inner = TcpListener::from_std(listener).map_err(bind_err)?;

        info!(address = %local_addr, backlog = config.backlog, "Server listening");

        Ok(Self { inner, local_addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

fn create_listener(addr: SocketAddr, config: &Config) -> io::Result<std::net::TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;

    socket.set_reuse_address(true)?;
    // Accepted sockets inherit these from the listener.
    socket.set_recv_buffer_size(config.socket_buffer_size)?;
    socket.set_send_buffer_size(config.socket_buffer_size)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(config.backlog.min(i32::MAX as u32) as i32)?;

    Ok(socket.into())
}

/// Server instance
pub struct Server<P> {
    config: Config,
    factory: ProcessorFactory<P>,
}

impl<P: Processor + 'static> Server<P> {
    /// Create a new server instance
    pub fn new(config: Config, factory: ProcessorFactory<P>) -> Self {
        Server { config, factory }
    }

    /// Accept connections on `listener` until `shutdown` resolves.
    ///
    /// On shutdown the listening socket is closed first, then in-flight
    /// connections get up to the configured grace period to finish.
    pub async fn serve<F>(self, listener: Listener, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        let pool = WorkerPool::new(
            self.config.workers,
            self.factory,
            self.config.connection,
        )
        .map_err(ServerError::Workers)?;

        accept_loop(&listener.inner, &pool, shutdown).await;

        drop(listener);
        info!("Listening socket closed");

        drain(pool, self.config.shutdown_grace).await;
        Ok(())
    }
}

async fn accept_loop<F>(listener: &TcpListener, pool: &WorkerPool, shutdown: F)
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown signal received, no longer accepting connections");
                return;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        debug!(peer = %peer, "Accepted connection");
                        dispatch(stream, peer, pool);
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                }
            }
        }
    }
}

/// Convert to a blocking socket and pass ownership to the pool.
fn dispatch(stream: TcpStream, peer: SocketAddr, pool: &WorkerPool) {
    let stream = match stream.into_std().and_then(|s| {
        s.set_nonblocking(false)?;
        Ok(s)
    }) {
        Ok(s) => s,
        Err(e) => {
            warn!(peer = %peer, error = %e, "Failed to prepare connection");
            return;
        }
    };

    if let Err(e) = pool.submit(Connection::new(stream, peer)) {
        error!(peer = %peer, error = %e, "Dropping connection");
    }
}

async fn drain(mut pool: WorkerPool, grace: Duration) {
    pool.close();
    let workers = pool.size();

    let join = tokio::task::spawn_blocking(move || pool.shutdown());
    match tokio::time::timeout(grace, join).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "Worker shutdown task failed"),
        Err(_) => warn!(
            workers,
            grace = ?grace,
            "Connections still open after grace period, exiting anyway"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionSettings;
    use crate::processor::ProcessError;
    use crate::protocol::DELIMITER;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::sync::oneshot;
    use tokio::task::JoinHandle;
    use tokio_test::{assert_err, assert_ok};

    type Stub = fn(&str) -> Result<String, ProcessError>;

    const WAIT: Duration = Duration::from_secs(5);

    fn stub(request: &str) -> Result<String, ProcessError> {
        match request {
            "LIST" => Ok("file1,file2".to_string()),
            "BADCMD" => Err(ProcessError::new("unknown command")),
            other => Ok(other.to_string()),
        }
    }

    struct TestServer {
        addr: SocketAddr,
        shutdown: oneshot::Sender<()>,
        handle: JoinHandle<Result<(), ServerError>>,
    }

    fn start(workers: usize, connection: ConnectionSettings) -> TestServer {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 0,
            workers,
            connection,
            shutdown_grace: WAIT,
            ..Config::default()
        };
        let factory: ProcessorFactory<Stub> = Arc::new(|| stub as Stub);

        let listener = Listener::bind(&config).unwrap();
        let addr = listener.local_addr();
        let (shutdown, rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(Server::new(config, factory).serve(listener, async {
            let _ = rx.await;
        }));

        TestServer {
            addr,
            shutdown,
            handle,
        }
    }

    /// Read until a full response frame arrives or the server closes.
    async fn read_frame(stream: &mut TcpStream) -> Vec<u8> {
        let mut response = Vec::new();
        let mut buf = vec![0u8; 8192];
        while !response.ends_with(DELIMITER) {
            let n = tokio::time::timeout(WAIT, stream.read(&mut buf))
                .await
                .expect("timed out waiting for response")
                .unwrap_or(0);
            if n == 0 {
                break;
            }
            response.extend_from_slice(&buf[..n]);
        }
        response
    }

    #[tokio::test]
    async fn test_list_scenario_keeps_connection_open() {
        let server = start(2, ConnectionSettings::default());
        let mut client = TcpStream::connect(server.addr).await.unwrap();

        client.write_all(b"LIST\r\n\r\n").await.unwrap();
        assert_eq!(read_frame(&mut client).await, b"file1,file2\r\n\r\n");

        client.write_all(b"  second request \r\n\r\n").await.unwrap();
        assert_eq!(read_frame(&mut client).await, b"second request\r\n\r\n");
    }

    #[tokio::test]
    async fn test_processor_error_closes_without_response() {
        let server = start(2, ConnectionSettings::default());
        let mut client = TcpStream::connect(server.addr).await.unwrap();

        client.write_all(b"BADCMD\r\n\r\n").await.unwrap();
        assert!(read_frame(&mut client).await.is_empty());

        // The server keeps serving new connections.
        let mut other = TcpStream::connect(server.addr).await.unwrap();
        other.write_all(b"LIST\r\n\r\n").await.unwrap();
        assert_eq!(read_frame(&mut other).await, b"file1,file2\r\n\r\n");
    }

    #[tokio::test]
    async fn test_split_writes_reassemble() {
        let server = start(2, ConnectionSettings::default());
        let mut client = TcpStream::connect(server.addr).await.unwrap();

        for part in [&b"hello "[..], &b"world"[..], &b"\r\n"[..], &b"\r\n"[..]] {
            client.write_all(part).await.unwrap();
            client.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(read_frame(&mut client).await, b"hello world\r\n\r\n");
    }

    #[tokio::test]
    async fn test_concurrent_connections_are_independent() {
        let server = start(2, ConnectionSettings::default());
        let mut a = TcpStream::connect(server.addr).await.unwrap();
        let mut b = TcpStream::connect(server.addr).await.unwrap();

        a.write_all(b"from a\r\n\r\n").await.unwrap();
        b.write_all(b"from b\r\n\r\n").await.unwrap();

        assert_eq!(read_frame(&mut b).await, b"from b\r\n\r\n");
        assert_eq!(read_frame(&mut a).await, b"from a\r\n\r\n");
    }

    #[tokio::test]
    async fn test_idle_connection_times_out_alone() {
        let settings = ConnectionSettings {
            read_timeout: Duration::from_millis(200),
            ..ConnectionSettings::default()
        };
        let server = start(2, settings);

        let mut idle = TcpStream::connect(server.addr).await.unwrap();
        idle.write_all(b"LIS").await.unwrap();

        let mut active = TcpStream::connect(server.addr).await.unwrap();
        active.write_all(b"LIST\r\n\r\n").await.unwrap();
        assert_eq!(read_frame(&mut active).await, b"file1,file2\r\n\r\n");

        // No delimiter ever arrives, so the server hangs up.
        assert!(read_frame(&mut idle).await.is_empty());
    }

    #[tokio::test]
    async fn test_large_response_is_byte_exact() {
        let settings = ConnectionSettings {
            chunk_size: 1024,
            ..ConnectionSettings::default()
        };
        let server = start(1, settings);
        let mut client = TcpStream::connect(server.addr).await.unwrap();

        let payload: String = (0..50_000).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
        let request = format!("{payload}\r\n\r\n");
        client.write_all(request.as_bytes()).await.unwrap();

        let response = read_frame(&mut client).await;
        assert_eq!(response, request.as_bytes());
    }

    #[tokio::test]
    async fn test_oversized_frame_drops_connection() {
        let settings = ConnectionSettings {
            max_frame_size: Some(64),
            ..ConnectionSettings::default()
        };
        let server = start(1, settings);
        let mut client = TcpStream::connect(server.addr).await.unwrap();

        // The server may reset rather than close cleanly; either way no data.
        let _ = client.write_all(&[b'x'; 1000]).await;
        assert!(read_frame(&mut client).await.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_closes_listener() {
        let server = start(2, ConnectionSettings::default());

        let mut client = TcpStream::connect(server.addr).await.unwrap();
        client.write_all(b"LIST\r\n\r\n").await.unwrap();
        assert_eq!(read_frame(&mut client).await, b"file1,file2\r\n\r\n");
        drop(client);

        server.shutdown.send(()).unwrap();
        let result = tokio::time::timeout(WAIT, server.handle)
            .await
            .expect("server did not stop");
        assert_ok!(assert_ok!(result));

        assert_err!(TcpStream::connect(server.addr).await);
    }

    #[tokio::test]
    async fn test_bind_error_is_reported() {
        let first = start(1, ConnectionSettings::default());

        let mut config = Config {
            host: "127.0.0.1".to_string(),
            port: first.addr.port(),
            ..Config::default()
        };
        // Address reuse does not allow two listeners on one port.
        let err = Listener::bind(&config).err().unwrap();
        assert!(matches!(err, ServerError::Bind { .. }));

        config.host = "not a host name".to_string();
        assert!(Listener::bind(&config).is_err());
    }
}
