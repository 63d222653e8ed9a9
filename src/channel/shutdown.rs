// Copyright 2019 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use tokio::sync::mpsc;

use crate::channel::frame::Frame;

const SHUTDOWN_BUFFER: usize = 8;

/// Receiving end of the shutdown signal
#[derive(Debug)]
pub struct Shutdown {
    sender: mpsc::Sender<Frame>,
    receiver: mpsc::Receiver<Frame>,
}

/// Requests shutdown of the channel that owns the matching [`Shutdown`]
#[derive(Clone, Debug)]
pub struct ShutdownTrigger {
    sender: mpsc::Sender<Frame>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel(SHUTDOWN_BUFFER);
        Self { sender, receiver }
    }

    pub fn trigger(&self) -> ShutdownTrigger {
        ShutdownTrigger {
            sender: self.sender.clone(),
        }
    }

    /// Wait for an exit command; frames that are not exit commands are dropped
    pub async fn wait(&mut self) {
        // a sender is held by self, so recv only returns None if that changes
        while let Some(frame) = self.receiver.recv().await {
            if frame.is_exit() {
                return;
            }

            tracing::debug!(%frame, "ignoring non-exit frame on shutdown signal");
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownTrigger {
    /// Send the exit command
    pub async fn request(&self) {
        self.send(Frame::exit()).await
    }

    pub async fn send(&self, frame: Frame) {
        if self.sender.send(frame).await.is_err() {
            tracing::debug!("shutdown requested after the channel went away");
        }
    }
}
