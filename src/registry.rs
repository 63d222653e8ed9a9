// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The shared process registry
//!
//! A flat file of [`Record`]s, one per line, guarded by a [`FileLock`]. Every process on the host
//! that opens the same directory and name takes part in the same mutual exclusion. Access is only
//! possible through a [`Session`], which holds the lock for its whole lifetime.

use std::io;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};

use crate::error::Error;
use crate::lock::{FileLock, LockGuard};
use crate::record::{Pattern, Record};

pub const DATA_EXTENSION: &str = "data";
pub const LOCK_EXTENSION: &str = "lock";

/// Storage of records
///
/// Queries are full scans. Implementations only need to append, read everything and erase; the
/// rest, including removal by rewrite, is derived from those.
#[async_trait]
pub trait Store: Send + Sync {
    /// Append records, creating the store if it does not exist
    async fn add_several(&self, records: &[Record]) -> Result<(), Error>;

    /// Every stored record
    async fn get_all(&self) -> Result<Vec<Record>, Error>;

    /// Drop the whole store
    async fn erase(&self) -> Result<(), Error>;

    async fn add(&self, record: &Record) -> Result<(), Error> {
        self.add_several(std::slice::from_ref(record)).await
    }

    async fn get(&self, needle: &Pattern) -> Result<Vec<Record>, Error> {
        self.get_several(std::slice::from_ref(needle)).await
    }

    /// Records matching any of the needles
    async fn get_several(&self, needles: &[Pattern]) -> Result<Vec<Record>, Error> {
        let records = self.get_all().await?;
        Ok(records
            .into_iter()
            .filter(|record| Pattern::any(needles, record))
            .collect())
    }

    async fn exclude(&self, needle: &Pattern) -> Result<Vec<Record>, Error> {
        self.exclude_several(std::slice::from_ref(needle)).await
    }

    /// Records matching none of the needles
    async fn exclude_several(&self, needles: &[Pattern]) -> Result<Vec<Record>, Error> {
        let records = self.get_all().await?;
        Ok(records
            .into_iter()
            .filter(|record| !Pattern::any(needles, record))
            .collect())
    }

    async fn remove(&self, needle: &Pattern) -> Result<usize, Error> {
        self.remove_several(std::slice::from_ref(needle)).await
    }

    /// Delete every record matching any needle, returning how many were removed
    ///
    /// This rewrites the store. A crash between the erase and the rewrite loses the surviving
    /// records.
    async fn remove_several(&self, needles: &[Pattern]) -> Result<usize, Error> {
        let all = self.get_all().await?;
        let total = all.len();
        let keep: Vec<Record> = all
            .into_iter()
            .filter(|record| !Pattern::any(needles, record))
            .collect();
        let removed = total - keep.len();

        self.erase().await?;
        if !keep.is_empty() {
            self.add_several(&keep).await?;
        }

        Ok(removed)
    }

    async fn remove_all(&self) -> Result<(), Error> {
        self.erase().await
    }
}

/// A store kept in a single line oriented text file
#[derive(Clone, Debug)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Store for FileStore {
    async fn add_several(&self, records: &[Record]) -> Result<(), Error> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| Error::io(&self.path, e))?;

        let mut writer = BufWriter::new(file);
        for record in records {
            writer
                .write_all(format!("{}\n", record).as_bytes())
                .await
                .map_err(|e| Error::io(&self.path, e))?;
        }
        writer.flush().await.map_err(|e| Error::io(&self.path, e))?;

        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<Record>, Error> {
        let file = match fs::File::open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::io(&self.path, e)),
        };

        let mut lines = BufReader::new(file).lines();
        let mut records = Vec::new();
        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| Error::io(&self.path, e))?
        {
            if line.trim().is_empty() {
                continue;
            }
            records.push(line.trim_end().parse::<Record>()?);
        }

        Ok(records)
    }

    async fn erase(&self) -> Result<(), Error> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io(&self.path, e)),
        }
    }
}

/// The registry: a store plus the lock that serializes access to it
#[derive(Clone, Debug)]
pub struct Registry<S: Store = FileStore> {
    store: S,
    lock: FileLock,
}

impl Registry<FileStore> {
    /// Registry stored as `<dir>/<name>.data`, locked by `<dir>/<name>.lock`
    pub fn open(dir: impl AsRef<Path>, name: &str) -> Self {
        let dir = dir.as_ref();
        let store = FileStore::new(dir.join(format!("{}.{}", name, DATA_EXTENSION)));
        let lock = FileLock::new(dir.join(format!("{}.{}", name, LOCK_EXTENSION)));

        Self { store, lock }
    }
}

impl<S: Store> Registry<S> {
    pub fn new(store: S, lock: FileLock) -> Self {
        Self { store, lock }
    }

    pub fn with_lock_poll_interval(mut self, interval: Duration) -> Self {
        self.lock = self.lock.with_poll_interval(interval);
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.lock = self.lock.with_timeout(timeout);
        self
    }

    pub fn lock(&self) -> &FileLock {
        &self.lock
    }

    /// Take exclusive access to the store until the session is closed or dropped
    pub async fn session(&self) -> Result<Session<'_, S>, Error> {
        let guard = self.lock.acquire().await?;
        Ok(Session {
            store: &self.store,
            guard,
        })
    }
}

/// Exclusive access to a registry's store
///
/// Dereferences to the [`Store`]. Prefer [`Session::close`], which reports a failure to release
/// the lock; dropping the session releases it as well.
pub struct Session<'r, S: Store> {
    store: &'r S,
    guard: LockGuard,
}

impl<'r, S: Store> Session<'r, S> {
    pub async fn close(self) -> Result<(), Error> {
        self.guard.release().await
    }
}

impl<'r, S: Store> Deref for Session<'r, S> {
    type Target = S;

    fn deref(&self) -> &S {
        self.store
    }
}
