// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Cross-process advisory lock based on the existence of a sentinel file.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs::{self, OpenOptions};
use tokio::time::{sleep, Instant};

use crate::error::{Error, ErrorKind};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A lock held by whichever process managed to create the sentinel file
///
/// The file has no content and no owner; a holder that crashes leaves it behind and every later
/// `acquire` waits on it, forever unless a timeout is configured.
#[derive(Clone, Debug)]
pub struct FileLock {
    path: PathBuf,
    poll_interval: Duration,
    timeout: Option<Duration>,
}

impl FileLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: None,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_locked(&self) -> bool {
        self.path.exists()
    }

    /// Wait until the sentinel is absent, then create it
    pub async fn acquire(&self) -> Result<LockGuard, Error> {
        let deadline = self.timeout.map(|timeout| Instant::now() + timeout);

        loop {
            while fs::metadata(&self.path).await.is_ok() {
                if let Some(deadline) = deadline {
                    if Instant::now() >= deadline {
                        return Err(ErrorKind::LockTimeout(self.path.clone()).into());
                    }
                }
                sleep(self.poll_interval).await;
            }

            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.path)
                .await
            {
                Ok(_) => {
                    tracing::trace!(path = %self.path.display(), "lock acquired");
                    return Ok(LockGuard {
                        path: Some(self.path.clone()),
                    });
                }
                // someone else created it between the check and the create
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(Error::io(&self.path, e)),
            }
        }
    }
}

/// Releases the lock when dropped
#[derive(Debug)]
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard {
    path: Option<PathBuf>,
}

impl LockGuard {
    /// Remove the sentinel, reporting any failure
    pub async fn release(mut self) -> Result<(), Error> {
        match self.path.take() {
            Some(path) => {
                fs::remove_file(&path)
                    .await
                    .map_err(|e| Error::io(&path, e))?;
                tracing::trace!(path = %path.display(), "lock released");
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            std::fs::remove_file(&path)
                .map_err(|e| {
                    tracing::warn!(path = %path.display(), "error releasing lock: {}", e)
                })
                .ok();
        }
    }
}
