// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus TCP server

use std::{
    io,
    net::SocketAddr,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::oneshot,
    task::{JoinHandle, JoinSet},
};

use super::{dispatch, Service};
use crate::codec::tcp::TcpCodec;

/// Maximum number of pending connections.
const BACKLOG: i32 = 1024;

struct Bound {
    local_addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// A Modbus TCP server that can be bound and unbound repeatedly.
///
/// Every accepted connection is served by its own dispatch queue.
pub struct TcpServer<S> {
    service: Arc<S>,
    bound: Mutex<Option<Bound>>,
}

impl<S> std::fmt::Debug for TcpServer<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpServer")
            .field("local_addr", &self.local_addr())
            .finish_non_exhaustive()
    }
}

impl<S> TcpServer<S> {
    fn bound(&self) -> MutexGuard<'_, Option<Bound>> {
        self.bound.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The address the server is listening on, if bound.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.bound().as_ref().map(|bound| bound.local_addr)
    }

    /// Stop accepting connections and close all live connections.
    ///
    /// Completes immediately if the server is not bound.
    pub async fn unbind(&self) -> io::Result<()> {
        let Some(Bound {
            local_addr,
            shutdown,
            task,
        }) = self.bound().take()
        else {
            return Ok(());
        };
        let _ = shutdown.send(());
        if let Err(err) = task.await {
            if err.is_panic() {
                return Err(io::Error::new(io::ErrorKind::Other, err));
            }
        }
        log::info!("Unbound {local_addr}");
        Ok(())
    }
}

impl<S: Service> TcpServer<S> {
    #[must_use]
    pub fn new(service: S) -> Self {
        Self {
            service: Arc::new(service),
            bound: Mutex::new(None),
        }
    }

    /// Start listening and return the local address.
    ///
    /// Binding to port 0 picks an ephemeral port.
    pub async fn bind(&self, socket_addr: SocketAddr) -> io::Result<SocketAddr> {
        let mut bound = self.bound();
        if let Some(Bound { local_addr, .. }) = bound.as_ref() {
            return Err(io::Error::new(
                io::ErrorKind::AddrInUse,
                format!("already bound to {local_addr}"),
            ));
        }
        let listener = listener(socket_addr)?;
        let local_addr = listener.local_addr()?;
        let (shutdown, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&self.service),
            shutdown_rx,
        ));
        *bound = Some(Bound {
            local_addr,
            shutdown,
            task,
        });
        log::info!("Bound {local_addr}");
        Ok(local_addr)
    }
}

async fn accept_loop<S: Service>(
    listener: TcpListener,
    service: Arc<S>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    log::info!("Accepted connection from {peer}");
                    connections.spawn(process(stream, peer, Arc::clone(&service)));
                }
                Err(err) => {
                    log::error!("Failed to accept connection: {err}");
                }
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }
    connections.shutdown().await;
}

async fn process<S: Service>(stream: TcpStream, peer: SocketAddr, service: Arc<S>) {
    if let Err(err) = stream.set_nodelay(true) {
        log::warn!("Failed to disable Nagle's algorithm for {peer}: {err}");
    }
    match dispatch::serve(stream, TcpCodec, service).await {
        Ok(()) => log::info!("Connection from {peer} closed"),
        Err(err) => log::error!("Closing connection from {peer}: {err}"),
    }
}

/// Configure and open the listening TCP socket.
fn listener(socket_addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = Socket::new(
        Domain::for_address(socket_addr),
        Type::STREAM,
        Some(Protocol::TCP),
    )?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&socket_addr.into())?;
    socket.listen(BACKLOG)?;
    TcpListener::from_std(socket.into())
}
