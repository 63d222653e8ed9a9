// Copyright 2019 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::channel::frame::{read_frame, write_frame, Frame};
use crate::error::Error;

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// The writing side of one connection, cheap to clone
///
/// Handlers receive a `Client` with every event and can reply through it.
#[derive(Clone)]
pub struct Client {
    id: u64,
    peer: SocketAddr,
    writer: Arc<Mutex<BufWriter<OwnedWriteHalf>>>,
}

/// The reading side of one connection, owned by its read loop
pub struct FrameReader {
    reader: BufReader<OwnedReadHalf>,
}

impl Client {
    /// Split a connection into its shareable writer and its reader
    pub fn from_stream(stream: TcpStream) -> Result<(Client, FrameReader), Error> {
        let peer = stream.peer_addr()?;
        let (read, write) = stream.into_split();

        let client = Client {
            id: NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed),
            peer,
            writer: Arc::new(Mutex::new(BufWriter::new(write))),
        };
        let reader = FrameReader {
            reader: BufReader::new(read),
        };

        Ok((client, reader))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub async fn write_message(&self, frame: &Frame) -> Result<(), Error> {
        let mut writer = self.writer.lock().await;
        write_frame(&mut *writer, frame).await
    }

    /// Shut down the writing direction, the peer reads end of stream
    pub async fn close(&self) {
        let mut writer = self.writer.lock().await;
        writer
            .shutdown()
            .await
            .map_err(|e| tracing::debug!(client = self.id, "error closing connection: {}", e))
            .ok();
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .finish()
    }
}

impl PartialEq for Client {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl FrameReader {
    pub async fn read_message(&mut self) -> Result<Frame, Error> {
        read_frame(&mut self.reader).await
    }
}
