// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::time::{sleep, Instant};

use crate::config::Config;
use crate::error::{Error, ErrorKind};
use crate::procs::{alias_pattern, parse_pid, Launch, Launcher, ProcessIdent};
use crate::registry::{FileStore, Registry, Store};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(50);

/// Create, find and destroy processes by alias
///
/// Rules:
///   - an alias is registered by the launched wrapper itself, never by the supervisor
///   - the registry entry is accounting state; it is purged whenever a pid was found
///   - at most one live process per alias unless forced
pub struct Supervisor<L: Launch = Launcher, S: Store = FileStore> {
    launcher: L,
    registry: Registry<S>,
    timeout: Duration,
    interval: Duration,
}

impl Supervisor {
    pub fn from_config(config: &Config) -> Result<Self, Error> {
        let launcher = Launcher::from_config(&config.env)?;

        Ok(Supervisor::new(launcher, config.registry.open()).with_poll(
            Duration::from_millis(config.supervisor.timeout_ms),
            Duration::from_millis(config.supervisor.interval_ms),
        ))
    }
}

impl<L: Launch, S: Store> Supervisor<L, S> {
    pub fn new(launcher: L, registry: Registry<S>) -> Self {
        Self {
            launcher,
            registry,
            timeout: DEFAULT_TIMEOUT,
            interval: DEFAULT_INTERVAL,
        }
    }

    /// How long to wait for a launched process to register, and how often to look
    pub fn with_poll(mut self, timeout: Duration, interval: Duration) -> Self {
        self.timeout = timeout;
        self.interval = interval;
        self
    }

    pub fn registry(&self) -> &Registry<S> {
        &self.registry
    }

    /// Launch a process and wait for it to register
    ///
    /// Returns the registered pid, or `0` if nothing registered before the timeout.
    pub async fn create_process(&self, ident: &ProcessIdent, force: bool) -> Result<u32, Error> {
        if !force && self.exists_process(&ident.alias).await? {
            return Err(ErrorKind::AlreadyExists(ident.alias.clone()).into());
        }

        // leftovers from a process that did not unregister
        if let Err(e) = self.purge(&ident.alias).await {
            tracing::warn!(alias = %ident.alias, "could not clean stale registry entry: {}", e);
        }

        self.launcher.start(ident).await?;

        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some(pid) = self.pid_of(&ident.alias).await? {
                tracing::info!(alias = %ident.alias, pid, "process registered");
                return Ok(pid);
            }

            if Instant::now() >= deadline {
                tracing::warn!(alias = %ident.alias, timeout = ?self.timeout, "process did not register");
                return Ok(0);
            }

            sleep(self.interval).await;
        }
    }

    /// Signal the process registered under `alias` and drop its registry entry
    ///
    /// Without `force` the process gets `SIGTERM` and may clean up after itself, with `force` it
    /// gets `SIGKILL`.
    pub async fn destroy_process(&self, alias: &str, force: bool) -> Result<(), Error> {
        let (pid, entries) = self.lookup(alias).await?;
        let pid = match pid {
            Some(pid) => pid,
            None => {
                // rows without a usable pid can never be signalled, only cleared
                if entries > 0 {
                    self.purge(alias).await?;
                }
                return Err(ErrorKind::NotFound(alias.to_string()).into());
            }
        };

        if !is_alive(pid) {
            self.purge(alias).await?;
            return Err(ErrorKind::ProcessNotFound {
                alias: alias.to_string(),
                pid,
            }
            .into());
        }

        let signal = if force { Signal::SIGKILL } else { Signal::SIGTERM };
        tracing::info!(alias, pid, ?signal, "destroying process");
        let killed = kill(to_pid(pid), signal);

        self.purge(alias).await?;
        killed?;

        Ok(())
    }

    /// True if the alias has a pid registered and that pid is alive
    pub async fn exists_process(&self, alias: &str) -> Result<bool, Error> {
        Ok(self.pid_of(alias).await?.map_or(false, is_alive))
    }

    /// The pid registered for `alias`, the first valid one if there are several
    ///
    /// Entries whose pid is missing, zero or not a number count as no pid at all.
    pub async fn pid_of(&self, alias: &str) -> Result<Option<u32>, Error> {
        self.lookup(alias).await.map(|(pid, _)| pid)
    }

    /// The first valid pid for `alias` and the number of entries the alias has
    async fn lookup(&self, alias: &str) -> Result<(Option<u32>, usize), Error> {
        let session = self.registry.session().await?;
        let found = session.get(&alias_pattern(alias)).await;
        session.close().await?;

        let found = found?;
        let pid = found.iter().find_map(|record| match parse_pid(record) {
            Ok(pid) => Some(pid),
            Err(e) => {
                tracing::warn!(alias, "ignoring registry entry: {}", e);
                None
            }
        });

        Ok((pid, found.len()))
    }

    /// Remove every registry entry for `alias`
    pub async fn purge(&self, alias: &str) -> Result<usize, Error> {
        let session = self.registry.session().await?;
        let removed = session.remove(&alias_pattern(alias)).await;
        session.close().await?;

        let removed = removed?;
        if removed > 0 {
            tracing::debug!(alias, removed, "purged registry entries");
        }
        Ok(removed)
    }
}

fn to_pid(pid: u32) -> Pid {
    Pid::from_raw(pid as i32)
}

/// Probe with the null signal; a process we may not signal still exists
pub fn is_alive(pid: u32) -> bool {
    if pid == 0 || pid > i32::MAX as u32 {
        return false;
    }

    match kill(to_pid(pid), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::procs::ProcessRecord;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Stands in for the launcher and the wrapper: starts `sleep` and registers its pid
    struct FakeLauncher {
        registry: Registry,
        register: bool,
        children: Mutex<Vec<std::process::Child>>,
    }

    impl FakeLauncher {
        fn new(registry: Registry, register: bool) -> Self {
            Self {
                registry,
                register,
                children: Mutex::new(Vec::new()),
            }
        }

        fn launched(&self) -> usize {
            self.children.lock().unwrap().len()
        }
    }

    impl Drop for FakeLauncher {
        fn drop(&mut self) {
            for child in self.children.lock().unwrap().iter_mut() {
                child.kill().ok();
                child.wait().ok();
            }
        }
    }

    #[async_trait]
    impl Launch for FakeLauncher {
        async fn start(&self, ident: &ProcessIdent) -> Result<(), Error> {
            let child = std::process::Command::new("sleep")
                .arg("30")
                .spawn()
                .map_err(|e| ErrorKind::Spawn(e.to_string()))?;
            let pid = child.id();
            self.children.lock().unwrap().push(child);

            if self.register {
                let session = self.registry.session().await?;
                session
                    .add(&ProcessRecord::new(ident.clone(), pid).to_record())
                    .await?;
                session.close().await?;
            }
            Ok(())
        }
    }

    struct FailingLauncher;

    #[async_trait]
    impl Launch for FailingLauncher {
        async fn start(&self, _ident: &ProcessIdent) -> Result<(), Error> {
            Err(ErrorKind::Spawn("no such program".to_string()).into())
        }
    }

    fn registry(dir: &tempfile::TempDir) -> Registry {
        Registry::open(dir.path(), "kraken").with_lock_poll_interval(Duration::from_millis(5))
    }

    fn supervisor(dir: &tempfile::TempDir, register: bool) -> Supervisor<FakeLauncher> {
        Supervisor::new(FakeLauncher::new(registry(dir), register), registry(dir)).with_poll(
            Duration::from_millis(200),
            Duration::from_millis(10),
        )
    }

    fn ident(alias: &str) -> ProcessIdent {
        ProcessIdent::new(alias, "p", "c", "x")
    }

    #[tokio::test]
    async fn test_create_returns_registered_pid() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = supervisor(&dir, true);

        let pid = supervisor.create_process(&ident("a"), false).await.unwrap();
        assert_ne!(pid, 0);
        assert_eq!(supervisor.pid_of("a").await.unwrap(), Some(pid));
        assert!(supervisor.exists_process("a").await.unwrap());
    }

    #[tokio::test]
    async fn test_create_twice_conflicts_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = supervisor(&dir, true);

        supervisor.create_process(&ident("a"), false).await.unwrap();
        let err = supervisor
            .create_process(&ident("a"), false)
            .await
            .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::AlreadyExists(_)));
        assert_eq!(supervisor.launcher.launched(), 1);

        let pid = supervisor.create_process(&ident("a"), true).await.unwrap();
        assert_ne!(pid, 0);
        assert_eq!(supervisor.launcher.launched(), 2);

        // the stale entry of the first launch was purged before the second
        let session = supervisor.registry().session().await.unwrap();
        assert_eq!(session.get(&alias_pattern("a")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_create_times_out_with_zero() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = supervisor(&dir, false);

        let pid = supervisor.create_process(&ident("a"), false).await.unwrap();
        assert_eq!(pid, 0);
        assert!(!supervisor.exists_process("a").await.unwrap());
    }

    #[tokio::test]
    async fn test_create_replaces_dead_entry() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = supervisor(&dir, true);

        // pid far above any pid_max, never alive
        let session = supervisor.registry().session().await.unwrap();
        session
            .add(&ProcessRecord::new(ident("a"), 2_000_000_000).to_record())
            .await
            .unwrap();
        session.close().await.unwrap();

        let pid = supervisor.create_process(&ident("a"), false).await.unwrap();
        assert_ne!(pid, 2_000_000_000);
        assert_eq!(supervisor.pid_of("a").await.unwrap(), Some(pid));
    }

    #[tokio::test]
    async fn test_launcher_error_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = Supervisor::new(FailingLauncher, registry(&dir));

        let err = supervisor
            .create_process(&ident("a"), false)
            .await
            .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Spawn(_)));
    }

    #[tokio::test]
    async fn test_destroy_unknown_alias() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = supervisor(&dir, true);
        supervisor.create_process(&ident("a"), false).await.unwrap();
        let data = dir.path().join("kraken.data");
        let before = std::fs::read_to_string(&data).unwrap();

        let err = supervisor.destroy_process("b", false).await.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::NotFound(_)));
        assert_eq!(err.code(), 28);
        assert_eq!(std::fs::read_to_string(&data).unwrap(), before);
    }

    #[tokio::test]
    async fn test_destroy_signals_and_purges() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = supervisor(&dir, true);
        let pid = supervisor.create_process(&ident("a"), false).await.unwrap();
        supervisor.create_process(&ident("b"), false).await.unwrap();

        supervisor.destroy_process("a", false).await.unwrap();
        assert_eq!(supervisor.pid_of("a").await.unwrap(), None);
        assert!(!supervisor.exists_process("a").await.unwrap());
        assert!(supervisor.exists_process("b").await.unwrap());

        // reap the child the fake launched, it was terminated by the signal
        let mut children = supervisor.launcher.children.lock().unwrap();
        let child = children.iter_mut().find(|c| c.id() == pid).unwrap();
        let status = child.wait().unwrap();
        assert!(!status.success());
    }

    #[tokio::test]
    async fn test_destroy_dead_process_purges_and_fails() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = supervisor(&dir, true);

        let session = supervisor.registry().session().await.unwrap();
        session
            .add(&ProcessRecord::new(ident("a"), 2_000_000_000).to_record())
            .await
            .unwrap();
        session.close().await.unwrap();

        let err = supervisor.destroy_process("a", true).await.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::ProcessNotFound { .. }));
        assert_eq!(supervisor.pid_of("a").await.unwrap(), None);
    }

    fn write_data(dir: &tempfile::TempDir, contents: &str) {
        std::fs::write(dir.path().join("kraken.data"), contents).unwrap();
    }

    #[tokio::test]
    async fn test_unusable_pid_counts_as_unregistered() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = supervisor(&dir, true);
        write_data(&dir, "alias=a,pid=abc\nalias=b,pid=0\n");

        assert_eq!(supervisor.pid_of("a").await.unwrap(), None);
        assert!(!supervisor.exists_process("a").await.unwrap());
        assert!(!supervisor.exists_process("b").await.unwrap());

        // the bad entry is cleaned up and replaced by the new registration
        let pid = supervisor.create_process(&ident("a"), false).await.unwrap();
        assert_ne!(pid, 0);
        let session = supervisor.registry().session().await.unwrap();
        let entries = session.get(&alias_pattern("a")).await.unwrap();
        session.close().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(parse_pid(&entries[0]).unwrap(), pid);
    }

    #[tokio::test]
    async fn test_destroy_clears_unusable_pid() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = supervisor(&dir, true);
        write_data(&dir, "alias=a,pid=abc\nalias=b,pid=12\n");

        let err = supervisor.destroy_process("a", false).await.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::NotFound(_)));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("kraken.data")).unwrap(),
            "alias=b,pid=12\n"
        );
    }

    #[test]
    fn test_is_alive() {
        assert!(is_alive(std::process::id()));
        assert!(!is_alive(0));
        assert!(!is_alive(u32::MAX));
    }
}
