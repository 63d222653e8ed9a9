// Copyright 2019 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use async_trait::async_trait;

use crate::channel::client::Client;
use crate::channel::frame::Frame;

/// Callbacks for the lifecycle of a channel and its connections
///
/// Every method defaults to doing nothing. Callbacks run on the task that observed
/// the event, so a slow handler holds up only that connection.
#[async_trait]
pub trait ChannelHandler: Send + Sync + 'static {
    /// The channel is listening or connected
    async fn on_start(&self) {}

    /// The channel has been closed
    async fn on_stop(&self) {}

    /// A frame arrived from `client`
    async fn on_message(&self, _client: &Client, _frame: Frame) {}

    /// A connection was established
    async fn on_client_start(&self, _client: &Client) {}

    /// A connection went away
    async fn on_client_stop(&self, _client: &Client) {}
}

/// Ignores everything
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopHandler;

impl ChannelHandler for NoopHandler {}
