// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Schema-less string rows, the unit of both registry storage and wire messages.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, ErrorKind};

const PAIR_SEPARATOR: char = ',';
const KEY_SEPARATOR: char = '=';

/// A mapping of string keys to string values
///
/// Serialized as `k1=v1,k2=v2` on a single line. There is no escaping, so keys and values must
/// not contain `,` or `=`; this is not checked when writing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Record(BTreeMap<String, String>);

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder style insert
    pub fn with(mut self, key: impl Into<String>, val: impl Into<String>) -> Self {
        self.set(key, val);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, val: impl Into<String>) {
        self.0.insert(key.into(), val.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn exists(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// True if every key of the pattern is present here with the same value
    pub fn matches(&self, pattern: &Pattern) -> bool {
        pattern.matches(self)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, val)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "{}", PAIR_SEPARATOR)?;
            }
            write!(f, "{}{}{}", key, KEY_SEPARATOR, val)?;
        }
        Ok(())
    }
}

impl FromStr for Record {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self, Error> {
        let mut record = Record::new();
        if line.is_empty() {
            return Ok(record);
        }

        for pair in line.split(PAIR_SEPARATOR) {
            let (key, val) = pair
                .split_once(KEY_SEPARATOR)
                .ok_or_else(|| ErrorKind::Parse(line.to_string()))?;

            if key.is_empty() {
                return Err(ErrorKind::Parse(line.to_string()).into());
            }

            record.set(key, val);
        }

        Ok(record)
    }
}

/// A query over records, the "needle" of a lookup
///
/// A pattern matches a record when all of its pairs are present in the record; keys the record
/// has beyond those in the pattern are ignored. A set of patterns matches when any one does.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Pattern(Record);

impl Pattern {
    pub fn new(needle: Record) -> Self {
        Self(needle)
    }

    /// Pattern selecting records with `key == val`
    pub fn field(key: impl Into<String>, val: impl Into<String>) -> Self {
        Self(Record::new().with(key, val))
    }

    pub fn needle(&self) -> &Record {
        &self.0
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.0
            .iter()
            .all(|(key, val)| record.get(key) == Some(val))
    }

    /// True if any of the patterns matches the record
    pub fn any(patterns: &[Pattern], record: &Record) -> bool {
        patterns.iter().any(|pattern| pattern.matches(record))
    }
}

impl From<Record> for Pattern {
    fn from(needle: Record) -> Self {
        Self(needle)
    }
}
