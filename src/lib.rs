// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Common library functions for Kraken
//!
//! Processes are started detached under an alias, find their way into a flat file
//! registry through the wrapper, and are later found or terminated by that alias.

pub mod channel;
pub mod config;
mod error;
pub mod lock;
pub mod procs;
pub mod record;
pub mod registry;

pub use error::{Error, ErrorKind};
