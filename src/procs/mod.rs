// Copyright 2019 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

mod launcher;
mod supervisor;
mod wrapper;

pub use launcher::{CommandStrategy, Launch, Launcher, Platform, PreparedCommand, Unix, Windows};
pub use supervisor::Supervisor;
pub use wrapper::Wrapper;

use std::convert::TryFrom;

use crate::error::{Error, ErrorKind};
use crate::record::{Pattern, Record};

pub const ALIAS: &str = "alias";
pub const PROJECT: &str = "project";
pub const COMPONENT: &str = "component";
pub const PROCESS: &str = "process";
pub const PID: &str = "pid";

/// Names a supervised process; passed positionally to the wrapper and on to the worker
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessIdent {
    pub alias: String,
    pub project: String,
    pub component: String,
    pub process: String,
}

impl ProcessIdent {
    pub fn new(
        alias: impl Into<String>,
        project: impl Into<String>,
        component: impl Into<String>,
        process: impl Into<String>,
    ) -> Self {
        Self {
            alias: alias.into(),
            project: project.into(),
            component: component.into(),
            process: process.into(),
        }
    }

    /// The positional arguments, `alias project component process`
    pub fn to_args(&self) -> Vec<String> {
        vec![
            self.alias.clone(),
            self.project.clone(),
            self.component.clone(),
            self.process.clone(),
        ]
    }
}

/// Selects the registry entries of an alias
pub fn alias_pattern(alias: &str) -> Pattern {
    Pattern::field(ALIAS, alias)
}

/// The registry row of a running wrapper
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessRecord {
    pub ident: ProcessIdent,
    pub pid: u32,
}

impl ProcessRecord {
    pub fn new(ident: ProcessIdent, pid: u32) -> Self {
        Self { ident, pid }
    }

    pub fn to_record(&self) -> Record {
        Record::new()
            .with(ALIAS, self.ident.alias.as_str())
            .with(PROJECT, self.ident.project.as_str())
            .with(COMPONENT, self.ident.component.as_str())
            .with(PROCESS, self.ident.process.as_str())
            .with(PID, self.pid.to_string())
    }
}

/// Read the pid field; zero is never a valid target for a signal
pub fn parse_pid(record: &Record) -> Result<u32, Error> {
    record
        .get(PID)
        .and_then(|pid| pid.parse::<u32>().ok())
        .filter(|pid| *pid > 0)
        .ok_or_else(|| ErrorKind::Parse(record.to_string()).into())
}

impl TryFrom<&Record> for ProcessRecord {
    type Error = Error;

    fn try_from(record: &Record) -> Result<Self, Error> {
        let field = |key: &str| {
            record
                .get(key)
                .map(str::to_string)
                .ok_or_else(|| Error::from(ErrorKind::Parse(record.to_string())))
        };

        Ok(Self {
            ident: ProcessIdent {
                alias: field(ALIAS)?,
                project: field(PROJECT)?,
                component: field(COMPONENT)?,
                process: field(PROCESS)?,
            },
            pid: parse_pid(record)?,
        })
    }
}
