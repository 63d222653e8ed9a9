// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ErrorKind {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("io error")]
    IoError(#[from] io::Error),
    #[error("timed out waiting for lock: {0}")]
    LockTimeout(PathBuf),
    #[error("malformed record: {0:?}")]
    Parse(String),
    #[error("failed to start process: {0}")]
    Spawn(String),
    #[error("no pid registered for alias: {0}")]
    NotFound(String),
    #[error("process {pid} for alias {alias} could not be located")]
    ProcessNotFound { alias: String, pid: u32 },
    #[error("process already exists: {0}")]
    AlreadyExists(String),
    #[error("socket could not be started: {0}")]
    NotStarted(String),
    #[error("socket is not connected")]
    NotConnected,
    #[error("socket connection has been already established")]
    AlreadyConnected,
    #[error("socket closed for reading: {0}")]
    ReadClosed(String),
    #[error("socket closed for writing: {0}")]
    WriteClosed(String),
    #[error("malformed frame: {0:?}")]
    MalformedFrame(String),
    #[error("nix error")]
    NixError(#[from] nix::Error),
    #[error("an error occured: {0}")]
    ErrorMsg(String),
    #[error("an error occured: {0}")]
    ErrorStr(&'static str),
}

impl ErrorKind {
    /// Numeric code reported as the process exit status
    pub fn code(&self) -> i32 {
        match self {
            ErrorKind::AlreadyExists(_) => 2,
            ErrorKind::Parse(_) => 4,
            ErrorKind::Io { .. } | ErrorKind::IoError(_) => 5,
            ErrorKind::LockTimeout(_) => 9,
            ErrorKind::Spawn(_) => 15,
            ErrorKind::NixError(_) => 21,
            ErrorKind::NotFound(_) => 28,
            ErrorKind::ProcessNotFound { .. } => 29,
            ErrorKind::Config(_) => 30,
            ErrorKind::NotStarted(_) => 40,
            ErrorKind::NotConnected => 41,
            ErrorKind::AlreadyConnected => 42,
            ErrorKind::ReadClosed(_) => 43,
            ErrorKind::WriteClosed(_) => 44,
            ErrorKind::MalformedFrame(_) => 45,
            ErrorKind::ErrorMsg(_) | ErrorKind::ErrorStr(_) => 1,
        }
    }
}

#[derive(Error, Debug)]
#[error(transparent)]
pub struct Error(ErrorKind);

impl Error {
    fn from_kind(kind: ErrorKind) -> Self {
        Self(kind)
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.0
    }

    pub fn code(&self) -> i32 {
        self.0.code()
    }

    /// Attach the path that was being operated on to an io error
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::from_kind(ErrorKind::Io {
            path: path.into(),
            source,
        })
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::from_kind(ErrorKind::Config(msg.into()))
    }
}

impl<E> From<E> for Error
where
    E: Into<ErrorKind>,
{
    fn from(err: E) -> Self {
        Self::from_kind(err.into())
    }
}

impl From<&'static str> for Error {
    fn from(err: &'static str) -> Self {
        Self::from_kind(ErrorKind::ErrorStr(err))
    }
}

impl From<String> for Error {
    fn from(err: String) -> Self {
        Self::from_kind(ErrorKind::ErrorMsg(err))
    }
}
