//! Server
//!
//! Accepts connections on TCP (and a local Unix socket where available) and
//! gives each one its own session thread.
//!
//! ```text
//!  accept loop ──► Session::new ──► thread "session-N" ──► Session::run
//!      │                                   │
//!      └── paused / over max_connections ──┴─► dropped
//! ```

use std::io;
use std::net::{SocketAddr, TcpListener};
#[cfg(unix)]
use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::engine::Engine;
use crate::error::{Result, TesseraError};
use super::session::Session;
use super::stream::Stream;

/// How long the accept loop sleeps when no listener had a connection
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Listening server
pub struct Server {
    engine: Arc<Engine>,
    tcp: TcpListener,
    #[cfg(unix)]
    local: Option<UnixListener>,
    local_socket_path: Option<PathBuf>,
    local_addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
}

impl Server {
    /// Bind every endpoint the engine's config names
    pub fn bind(engine: Arc<Engine>) -> Result<Self> {
        let config = engine.config();
        let tcp = TcpListener::bind(&config.listen_addr)?;
        tcp.set_nonblocking(true)?;
        let local_addr = tcp.local_addr()?;
        tracing::info!("Listening on {}", local_addr);

        let mut local_socket_path = config
            .local_socket_prefix
            .as_ref()
            .map(|prefix| PathBuf::from(format!("{}{}", prefix, local_addr.port())));

        #[cfg(unix)]
        let local = match &local_socket_path {
            Some(path) => match bind_local(path) {
                Ok(listener) => {
                    tracing::info!("Listening on {}", path.display());
                    Some(listener)
                }
                Err(e) => {
                    tracing::warn!("Local socket {} unavailable: {}", path.display(), e);
                    None
                }
            },
            None => None,
        };
        #[cfg(unix)]
        if local.is_none() {
            local_socket_path = None;
        }
        #[cfg(not(unix))]
        {
            local_socket_path = None;
        }

        Ok(Self {
            engine,
            tcp,
            #[cfg(unix)]
            local,
            local_socket_path,
            local_addr,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Path of the local socket, if one is listening
    pub fn local_socket_path(&self) -> Option<PathBuf> {
        self.local_socket_path.clone()
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Flag that stops [`Server::run`] once set
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Signal the accept loop to stop
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    /// Accept connections until shut down (blocking)
    pub fn run(&self) -> Result<()> {
        while !self.shutdown.load(Ordering::Acquire) {
            let mut accepted = false;

            match self.tcp.accept() {
                Ok((stream, _)) => {
                    accepted = true;
                    stream.set_nonblocking(false)?;
                    self.start_session(Stream::Tcp(stream));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => tracing::warn!("TCP accept failed: {}", e),
            }

            #[cfg(unix)]
            if let Some(listener) = &self.local {
                match listener.accept() {
                    Ok((stream, _)) => {
                        accepted = true;
                        stream.set_nonblocking(false)?;
                        self.start_session(Stream::Unix(stream));
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                    Err(e) => tracing::warn!("Local accept failed: {}", e),
                }
            }

            if !accepted {
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
        }

        tracing::info!("Accept loop stopped");
        self.engine.shutdown();
        Ok(())
    }

    /// Run the accept loop on a background thread
    pub fn spawn(self) -> Result<ServerHandle> {
        let local_addr = self.local_addr;
        let local_socket_path = self.local_socket_path();
        let shutdown = self.shutdown_flag();
        let engine = Arc::clone(&self.engine);

        let thread = thread::Builder::new()
            .name("accept".to_string())
            .spawn(move || {
                if let Err(e) = self.run() {
                    tracing::error!("Server error: {}", e);
                }
            })?;

        Ok(ServerHandle {
            local_addr,
            local_socket_path,
            shutdown,
            engine,
            thread: Some(thread),
        })
    }

    fn start_session(&self, stream: Stream) {
        let peer = stream.peer_label();

        if self.engine.is_paused() {
            tracing::debug!("Paused, dropping connection from {}", peer);
            stream.shutdown();
            return;
        }
        if self.engine.session_count() >= self.engine.config().max_connections {
            tracing::warn!("Connection limit reached, dropping {}", peer);
            stream.shutdown();
            return;
        }

        let id = self.engine.next_session_id();
        let session = match Session::new(id, &stream, Arc::clone(&self.engine)) {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!("Cannot set up session for {}: {}", peer, e);
                stream.shutdown();
                return;
            }
        };
        self.engine.register_session(&session);

        let registration = Registration {
            engine: Arc::clone(&self.engine),
            id,
        };
        let spawned = thread::Builder::new()
            .name(format!("session-{}", id))
            .spawn(move || {
                let _registration = registration;
                if let Err(e) = session.run(stream) {
                    tracing::warn!("Session {} ended with error: {}", session.id(), e);
                }
            });

        // a failed spawn drops the closure, and the registration with it
        if let Err(e) = spawned {
            tracing::error!("Cannot spawn session thread: {}", e);
        }
    }
}

/// Keeps a session registered for as long as its thread runs, panics included
struct Registration {
    engine: Arc<Engine>,
    id: u64,
}

impl Drop for Registration {
    fn drop(&mut self) {
        if thread::panicking() {
            tracing::error!("Session {} thread panicked", self.id);
        }
        self.engine.unregister_session(self.id);
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if let Some(path) = &self.local_socket_path {
            let _ = std::fs::remove_file(path);
        }
    }
}

#[cfg(unix)]
fn bind_local(path: &Path) -> Result<UnixListener> {
    // a stale socket file from a previous run blocks bind
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    let listener = UnixListener::bind(path)?;
    listener.set_nonblocking(true)?;
    Ok(listener)
}

/// A server running on its own thread
pub struct ServerHandle {
    local_addr: SocketAddr,
    local_socket_path: Option<PathBuf>,
    shutdown: Arc<AtomicBool>,
    engine: Arc<Engine>,
    thread: Option<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn local_socket_path(&self) -> Option<&PathBuf> {
        self.local_socket_path.as_ref()
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Stop accepting, close every session and wait for the accept thread
    pub fn shutdown(mut self) -> Result<()> {
        self.stop()
    }

    fn stop(&mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::Release);
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .map_err(|_| TesseraError::Network("accept thread panicked".to_string())),
            None => Ok(()),
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
