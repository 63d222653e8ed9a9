// Copyright 2019 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Line framed control channel over TCP
//!
//! A `Channel` either listens for connections or dials one. Every connection is read
//! by its own task, which hands each frame to the [`ChannelHandler`]. Listeners greet
//! every new connection with `[MSG]TXT=Response`.

mod client;
pub mod frame;
mod handler;
mod shutdown;

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

pub use self::client::{Client, FrameReader};
pub use self::frame::{Frame, FrameKind};
pub use self::handler::{ChannelHandler, NoopHandler};
pub use self::shutdown::{Shutdown, ShutdownTrigger};

use crate::error::{Error, ErrorKind};

/// Text of the greeting a listener sends to each new connection
pub const GREETING: &str = "Response";

const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

struct Connection {
    local_addr: SocketAddr,
    clients: Arc<Mutex<Vec<Client>>>,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

pub struct Channel<H: ChannelHandler = NoopHandler> {
    handler: Arc<H>,
    connection: Mutex<Option<Connection>>,
    shutdown: Mutex<Shutdown>,
    trigger: ShutdownTrigger,
}

impl<H: ChannelHandler> Channel<H> {
    pub fn new(handler: H) -> Self {
        Self::with_shutdown(handler, Shutdown::new())
    }

    /// Use a shutdown signal created elsewhere, so triggers can be handed out before the channel exists
    pub fn with_shutdown(handler: H, shutdown: Shutdown) -> Self {
        let trigger = shutdown.trigger();

        Self {
            handler: Arc::new(handler),
            connection: Mutex::new(None),
            shutdown: Mutex::new(shutdown),
            trigger,
        }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Bind and start accepting connections, returns the bound address
    pub async fn listen(&self, host: &str, port: u16) -> Result<SocketAddr, Error> {
        let mut connection = self.connection.lock().await;
        if connection.is_some() {
            return Err(ErrorKind::AlreadyConnected.into());
        }

        let listener = TcpListener::bind((host, port))
            .await
            .map_err(|e| ErrorKind::NotStarted(format!("listen on {}:{}: {}", host, port, e)))?;
        let local_addr = listener.local_addr()?;

        let clients = Arc::new(Mutex::new(Vec::new()));
        let cancel = CancellationToken::new();
        let tasks = TaskTracker::new();

        *connection = Some(Connection {
            local_addr,
            clients: Arc::clone(&clients),
            cancel: cancel.clone(),
            tasks: tasks.clone(),
        });
        drop(connection);

        tracing::info!(%local_addr, "listening");
        self.handler.on_start().await;

        tasks.spawn(accept_loop(
            listener,
            Arc::clone(&self.handler),
            clients,
            cancel,
            tasks.clone(),
        ));

        Ok(local_addr)
    }

    /// Dial a listener; the channel then holds exactly one client
    pub async fn connect(&self, host: &str, port: u16) -> Result<Client, Error> {
        let mut connection = self.connection.lock().await;
        if connection.is_some() {
            return Err(ErrorKind::AlreadyConnected.into());
        }

        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|e| ErrorKind::NotStarted(format!("connect to {}:{}: {}", host, port, e)))?;
        let local_addr = stream.local_addr()?;
        let (client, reader) = Client::from_stream(stream)?;

        let cancel = CancellationToken::new();
        let tasks = TaskTracker::new();

        *connection = Some(Connection {
            local_addr,
            clients: Arc::new(Mutex::new(vec![client.clone()])),
            cancel: cancel.clone(),
            tasks: tasks.clone(),
        });
        drop(connection);

        tracing::info!(peer = %client.peer(), "connected");
        self.handler.on_start().await;

        tasks.spawn(read_loop(
            Arc::clone(&self.handler),
            client.clone(),
            reader,
            cancel,
        ));

        Ok(client)
    }

    pub async fn write_message(&self, client: &Client, frame: &Frame) -> Result<(), Error> {
        if !self.is_connected().await {
            return Err(ErrorKind::NotConnected.into());
        }

        client.write_message(frame).await
    }

    /// Stop accepting and reading, wait for every connection task to finish
    ///
    /// Each read loop closes its own client on the way out.
    pub async fn close(&self) -> Result<(), Error> {
        let connection = self
            .connection
            .lock()
            .await
            .take()
            .ok_or(ErrorKind::NotConnected)?;

        connection.cancel.cancel();
        connection.tasks.close();
        connection.tasks.wait().await;

        tracing::info!(local_addr = %connection.local_addr, "closed");
        self.handler.on_stop().await;

        Ok(())
    }

    /// Block until an exit command arrives on the shutdown signal, then close
    ///
    /// Fails right away with `NotConnected` if there is nothing to shut down.
    pub async fn wait_for_shutdown(&self) -> Result<(), Error> {
        if !self.is_connected().await {
            return Err(ErrorKind::NotConnected.into());
        }

        self.shutdown.lock().await.wait().await;
        self.close().await
    }

    pub async fn request_shutdown(&self) {
        self.trigger.request().await
    }

    pub fn shutdown_trigger(&self) -> ShutdownTrigger {
        self.trigger.clone()
    }

    pub async fn is_connected(&self) -> bool {
        self.connection.lock().await.is_some()
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.connection
            .lock()
            .await
            .as_ref()
            .map(|connection| connection.local_addr)
    }

    /// The first client, the only one when connected by dialing
    pub async fn client(&self) -> Option<Client> {
        self.clients().await.into_iter().next()
    }

    pub async fn clients(&self) -> Vec<Client> {
        let clients = match self.connection.lock().await.as_ref() {
            Some(connection) => Arc::clone(&connection.clients),
            None => return Vec::new(),
        };

        let clients = clients.lock().await;
        clients.clone()
    }
}

/// Where a listening channel gets its connections from
#[async_trait]
trait Incoming: Send + Sync + 'static {
    async fn next_stream(&self) -> io::Result<TcpStream>;
}

#[async_trait]
impl Incoming for TcpListener {
    async fn next_stream(&self) -> io::Result<TcpStream> {
        self.accept().await.map(|(stream, _)| stream)
    }
}

async fn accept_loop<H: ChannelHandler, I: Incoming>(
    listener: I,
    handler: Arc<H>,
    clients: Arc<Mutex<Vec<Client>>>,
    cancel: CancellationToken,
    tasks: TaskTracker,
) {
    loop {
        let stream = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.next_stream() => match accepted {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!("error accepting connection: {}", e);
                    // errors like EMFILE persist, don't spin on them
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    continue;
                }
            },
        };

        let (client, reader) = match Client::from_stream(stream) {
            Ok(split) => split,
            Err(e) => {
                tracing::warn!("dropping connection: {}", e);
                continue;
            }
        };

        tracing::debug!(client = client.id(), peer = %client.peer(), "accepted");
        clients.lock().await.push(client.clone());
        handler.on_client_start(&client).await;

        if let Err(e) = client.write_message(&Frame::text(GREETING)).await {
            tracing::warn!(peer = %client.peer(), "error greeting client: {}", e);
        }

        tasks.spawn(read_loop(
            Arc::clone(&handler),
            client,
            reader,
            cancel.clone(),
        ));
    }
}

async fn read_loop<H: ChannelHandler>(
    handler: Arc<H>,
    client: Client,
    mut reader: FrameReader,
    cancel: CancellationToken,
) {
    loop {
        let read = tokio::select! {
            _ = cancel.cancelled() => break,
            read = reader.read_message() => read,
        };

        match read {
            Ok(frame) => handler.on_message(&client, frame).await,
            Err(e) => match e.kind() {
                ErrorKind::MalformedFrame(line) => {
                    tracing::warn!(peer = %client.peer(), line = %line, "skipping malformed frame")
                }
                _ => {
                    tracing::debug!(peer = %client.peer(), "stopped reading: {}", e);
                    break;
                }
            },
        }
    }

    handler.on_client_stop(&client).await;
    client.close().await;
}
