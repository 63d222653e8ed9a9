// Copyright 2019 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! One line on the wire: `[<KIND>]<record>\n`

use std::fmt;
use std::str::FromStr;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, ErrorKind};
use crate::record::Record;

pub const KIND_MESSAGE: &str = "MSG";
pub const KIND_COMMAND: &str = "CMD";

/// Key of the directive in a command frame
pub const COMMAND: &str = "Command";
pub const COMMAND_EXIT: &str = "EXIT";
/// Key of the text in a plain message frame
pub const TEXT: &str = "TXT";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameKind {
    /// Application payload
    Message,
    /// Control directive
    Command,
}

impl FrameKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FrameKind::Message => KIND_MESSAGE,
            FrameKind::Command => KIND_COMMAND,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    kind: FrameKind,
    record: Record,
}

impl Frame {
    pub fn new(kind: FrameKind, record: Record) -> Self {
        Self { kind, record }
    }

    pub fn message(record: Record) -> Self {
        Self::new(FrameKind::Message, record)
    }

    /// `[MSG]TXT=<text>`
    pub fn text(text: impl Into<String>) -> Self {
        Self::message(Record::new().with(TEXT, text))
    }

    /// `[CMD]Command=EXIT`, the only directive there is
    pub fn exit() -> Self {
        Self::new(FrameKind::Command, Record::new().with(COMMAND, COMMAND_EXIT))
    }

    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    pub fn record(&self) -> &Record {
        &self.record
    }

    pub fn into_record(self) -> Record {
        self.record
    }

    pub fn get_text(&self) -> Option<&str> {
        self.record.get(TEXT)
    }

    pub fn is_exit(&self) -> bool {
        self.kind == FrameKind::Command && self.record.get(COMMAND) == Some(COMMAND_EXIT)
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]{}", self.kind.as_str(), self.record)
    }
}

impl FromStr for Frame {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self, Error> {
        let malformed = || Error::from(ErrorKind::MalformedFrame(line.to_string()));

        let rest = line.strip_prefix('[').ok_or_else(malformed)?;
        let (kind, record) = rest.split_once(']').ok_or_else(malformed)?;
        let kind = match kind {
            KIND_MESSAGE => FrameKind::Message,
            KIND_COMMAND => FrameKind::Command,
            _ => return Err(malformed()),
        };
        let record = record.parse::<Record>().map_err(|_| malformed())?;

        Ok(Self { kind, record })
    }
}

/// Write one frame and flush it
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<(), Error>
where
    W: AsyncWrite + Unpin,
{
    let line = format!("{}\n", frame);
    writer
        .write_all(line.as_bytes())
        .await
        .map_err(|e| ErrorKind::WriteClosed(e.to_string()))?;
    writer
        .flush()
        .await
        .map_err(|e| ErrorKind::WriteClosed(e.to_string()))?;

    Ok(())
}

/// Read the next frame; end of stream counts as the peer closing
pub async fn read_frame<R>(reader: &mut R) -> Result<Frame, Error>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let read = reader
        .read_line(&mut line)
        .await
        .map_err(|e| ErrorKind::ReadClosed(e.to_string()))?;

    if read == 0 {
        return Err(ErrorKind::ReadClosed("connection closed by peer".to_string()).into());
    }

    line.trim_end().parse()
}
