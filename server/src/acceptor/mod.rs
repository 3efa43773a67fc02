//! TCP acceptor: one task per client connection

use crate::registry::{ConnectionRegistry, Registration};
use crate::session::Connection;
use anyhow::{Context, Result};
use protocol::ProtocolError;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Pause after a failed accept
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Requests acceptor shutdown
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    /// Stop accepting, close the listener and every open connection
    pub fn quit(&self) {
        self.tx.send_replace(true);
    }
}

/// Listening server
pub struct Server {
    listener: TcpListener,
    registry: Arc<ConnectionRegistry>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl Server {
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind to {}", addr))?;
        let (tx, _) = watch::channel(false);

        Ok(Self {
            listener,
            registry: Arc::new(ConnectionRegistry::new()),
            shutdown: Arc::new(tx),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: Arc::clone(&self.shutdown),
        }
    }

    #[cfg(test)]
    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        Arc::clone(&self.registry)
    }

    /// Accept connections until shutdown is requested
    pub async fn run(self) -> Result<()> {
        let mut quit = self.shutdown.subscribe();
        info!("Listening for connections on {}", self.local_addr()?);

        loop {
            tokio::select! {
                _ = async { let _ = quit.wait_for(|quit| *quit).await; } => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        spawn_connection(&self.registry, stream, peer);
                        debug!("Active connections: {}", self.registry.active_connections());
                    }
                    Err(e) => {
                        warn!("Error accepting connection: {}", e);
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                },
            }
        }

        info!("Shutting down listener");
        drop(self.listener);

        let closed = self.registry.close_all();
        info!("Closed {} open connection(s)", closed);
        Ok(())
    }
}

fn spawn_connection(registry: &Arc<ConnectionRegistry>, stream: TcpStream, peer: SocketAddr) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Failed to set TCP_NODELAY for {}: {}", peer, e);
    }

    registry.spawn(peer, move |id, registration| {
        let span = info_span!("connection", conn_id = id, %peer);
        handle_connection(id, stream, registration).instrument(span)
    });
}

async fn handle_connection(id: u32, stream: TcpStream, _registration: Registration) {
    info!("Starting connection");
    let mut connection = Connection::new(id, stream);

    match connection.run().await {
        Ok(()) => info!(user = connection.username().unwrap_or(""), "Connection closed"),
        Err(ProtocolError::ConnectionClosed) => info!("Connection closed by client"),
        Err(e) => error!(
            user = connection.username().unwrap_or(""),
            schema = connection.schema().unwrap_or(""),
            "Connection terminated: {}",
            e
        ),
    }
}
