// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::fmt::Debug;
use std::process::Stdio;
use std::str::FromStr;

use async_trait::async_trait;
use tokio::process::Command;

use crate::config::EnvConfig;
use crate::error::{Error, ErrorKind};
use crate::procs::ProcessIdent;

pub const OS_WIN: &str = "win";
pub const OS_UNIX: &str = "unix";

/// Target platform family, selects how a detached command line is built
///
/// The supervisor and wrapper rely on unix signals, so kraken itself only runs on unix hosts.
/// `Windows` builds the `cmd /C start` form for configurations shared with such a host; it
/// cannot be spawned from the unix host that prepares it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Platform {
    Windows,
    Unix,
}

impl Platform {
    pub fn strategy(self, output: &str) -> Box<dyn CommandStrategy> {
        match self {
            Platform::Windows => Box::new(Windows),
            Platform::Unix => Box::new(Unix::new(output)),
        }
    }
}

impl FromStr for Platform {
    type Err = Error;

    fn from_str(os: &str) -> Result<Self, Error> {
        match os {
            OS_WIN => Ok(Platform::Windows),
            OS_UNIX => Ok(Platform::Unix),
            other => Err(Error::config(format!("unrecognized platform: {:?}", other))),
        }
    }
}

/// A program and its arguments, ready to be spawned
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreparedCommand {
    pub program: String,
    pub args: Vec<String>,
}

/// Wraps a command line so that it runs detached from the launcher
pub trait CommandStrategy: Debug + Send + Sync {
    fn prepare(&self, words: Vec<String>) -> PreparedCommand;
}

/// `cmd /C start <words>`
#[derive(Clone, Copy, Debug)]
pub struct Windows;

impl CommandStrategy for Windows {
    fn prepare(&self, words: Vec<String>) -> PreparedCommand {
        let mut args = vec!["/C".to_string(), "start".to_string()];
        args.extend(words);

        PreparedCommand {
            program: "cmd".to_string(),
            args,
        }
    }
}

/// `nohup <words> &`, run through `sh` so the backgrounding actually happens
#[derive(Clone, Debug)]
pub struct Unix {
    output: String,
}

impl Unix {
    pub fn new(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
        }
    }
}

impl CommandStrategy for Unix {
    fn prepare(&self, words: Vec<String>) -> PreparedCommand {
        let script = format!(
            "nohup {} >>{} 2>&1 &",
            shell_words::join(&words),
            shell_words::quote(&self.output)
        );

        PreparedCommand {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script],
        }
    }
}

/// Something that can start a supervised process
#[async_trait]
pub trait Launch: Send + Sync {
    async fn start(&self, ident: &ProcessIdent) -> Result<(), Error>;
}

/// Launch programs
///
/// Rules:
/// - starts the wrapper detached, the wrapper then registers itself
/// - blocks until the launch command itself has exited, not the wrapper
#[derive(Debug)]
pub struct Launcher {
    strategy: Box<dyn CommandStrategy>,
    exe: Vec<String>,
}

impl Launcher {
    pub fn new(strategy: Box<dyn CommandStrategy>, exe: Vec<String>) -> Result<Self, Error> {
        if exe.is_empty() {
            return Err(Error::config("env.exe is empty"));
        }

        Ok(Self { strategy, exe })
    }

    pub fn from_config(env: &EnvConfig) -> Result<Self, Error> {
        let platform = env.os.parse::<Platform>()?;
        let exe = shell_words::split(&env.exe)
            .map_err(|e| Error::config(format!("env.exe could not be split: {}", e)))?;

        Self::new(platform.strategy(&env.output), exe)
    }

    /// The configured executable and its argument prefix, then `args`, wrapped for the platform
    pub fn prepare_command(&self, args: &[String]) -> PreparedCommand {
        let words = self.exe.iter().chain(args).cloned().collect();
        self.strategy.prepare(words)
    }
}

#[async_trait]
impl Launch for Launcher {
    async fn start(&self, ident: &ProcessIdent) -> Result<(), Error> {
        let command = self.prepare_command(&ident.to_args());
        tracing::debug!(alias = %ident.alias, program = %command.program, args = ?command.args, "launching");

        let status = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .status()
            .await
            .map_err(|e| ErrorKind::Spawn(format!("{}: {}", command.program, e)))?;

        if !status.success() {
            return Err(ErrorKind::Spawn(format!("{} exited with {}", command.program, status)).into());
        }

        Ok(())
    }
}
