// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::io;
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};

use futures::future::join_all;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::signal::unix::{signal, SignalKind};

use crate::config::Config;
use crate::error::{Error, ErrorKind};
use crate::procs::{ProcessIdent, ProcessRecord};
use crate::record::{Pattern, Record};
use crate::registry::{FileStore, Registry, Store};

/// The detached process started by the launcher
///
/// Rules:
///   - runs the real worker with piped stdio and relays it line by line
///   - registers its own pid under the alias, so destroying the alias signals the wrapper
///   - unregisters when the worker exits, or stops the worker and unregisters on SIGINT/SIGTERM
pub struct Wrapper<S: Store = FileStore> {
    worker: Vec<String>,
    registry: Registry<S>,
}

impl Wrapper {
    pub fn from_config(config: &Config) -> Result<Self, Error> {
        let worker = shell_words::split(&config.worker()?.exe)
            .map_err(|e| Error::config(format!("worker.exe could not be split: {}", e)))?;

        Self::new(worker, config.registry.open())
    }
}

impl<S: Store> Wrapper<S> {
    pub fn new(worker: Vec<String>, registry: Registry<S>) -> Result<Self, Error> {
        if worker.is_empty() {
            return Err(Error::config("worker.exe is empty"));
        }

        Ok(Self { worker, registry })
    }

    /// Run the worker with this process' stdin forwarded to it
    pub async fn run(&self, ident: &ProcessIdent) -> Result<i32, Error> {
        self.run_with_input(ident, tokio::io::stdin()).await
    }

    /// Run the worker until it exits or this process is told to stop, returning the exit code
    pub async fn run_with_input<I>(&self, ident: &ProcessIdent, input: I) -> Result<i32, Error>
    where
        I: AsyncRead + Send + Unpin + 'static,
    {
        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut terminate = signal(SignalKind::terminate())?;

        let mut child = self.spawn(ident)?;

        let stdin = child.stdin.take().ok_or("worker stdin is not piped")?;
        let stdout = child.stdout.take().ok_or("worker stdout is not piped")?;
        let stderr = child.stderr.take().ok_or("worker stderr is not piped")?;

        let forward_input = tokio::spawn(pump(input, stdin));
        let outputs = vec![
            tokio::spawn(pump(stdout, tokio::io::stdout())),
            tokio::spawn(pump(stderr, tokio::io::stderr())),
        ];

        let record = ProcessRecord::new(ident.clone(), std::process::id()).to_record();
        if let Err(e) = self.register(&record).await {
            child.kill().await.ok();
            return Err(e);
        }
        tracing::info!(alias = %ident.alias, pid = std::process::id(), worker_pid = ?child.id(), "registered");

        let code = tokio::select! {
            status = child.wait() => {
                let status = status?;
                // let the worker's last lines through before going away
                join_all(outputs).await;
                tracing::info!(alias = %ident.alias, %status, "worker exited");
                exit_code(status)
            }
            _ = interrupt.recv() => {
                self.stop_worker(&mut child, ident, "SIGINT").await;
                0
            }
            _ = terminate.recv() => {
                self.stop_worker(&mut child, ident, "SIGTERM").await;
                0
            }
        };

        forward_input.abort();
        self.unregister(&record).await?;

        Ok(code)
    }

    fn spawn(&self, ident: &ProcessIdent) -> Result<Child, Error> {
        let (program, prefix) = self
            .worker
            .split_first()
            .ok_or_else(|| Error::config("worker.exe is empty"))?;

        Command::new(program)
            .args(prefix)
            .args(ident.to_args())
            .kill_on_drop(true)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ErrorKind::Spawn(format!("{}: {}", program, e)).into())
    }

    async fn stop_worker(&self, child: &mut Child, ident: &ProcessIdent, signal: &str) {
        tracing::info!(alias = %ident.alias, signal, "stopping worker");
        child
            .kill()
            .await
            .map_err(|e| tracing::warn!(alias = %ident.alias, "error stopping worker: {}", e))
            .ok();
    }

    async fn register(&self, record: &Record) -> Result<(), Error> {
        let session = self.registry.session().await?;
        let added = session.add(record).await;
        session.close().await?;
        added
    }

    async fn unregister(&self, record: &Record) -> Result<(), Error> {
        let session = self.registry.session().await?;
        let removed = session.remove(&Pattern::new(record.clone())).await;
        session.close().await?;
        removed.map(|_| ())
    }
}

/// Copy lines from one stream to another, flushing after each
async fn pump<R, W>(from: R, mut to: W) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut from = BufReader::new(from);
    let mut line = Vec::new();

    loop {
        line.clear();
        if from.read_until(b'\n', &mut line).await? == 0 {
            break;
        }

        to.write_all(&line).await?;
        to.flush().await?;
    }

    to.shutdown().await
}

fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn registry(dir: &tempfile::TempDir) -> Registry {
        Registry::open(dir.path(), "kraken").with_lock_poll_interval(Duration::from_millis(5))
    }

    fn sh(script: String) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script, "worker".to_string()]
    }

    fn ident() -> ProcessIdent {
        ProcessIdent::new("svc1", "proj", "comp", "run")
    }

    #[tokio::test]
    async fn test_worker_exit_code_and_unregister() {
        let dir = tempfile::tempdir().unwrap();
        let wrapper = Wrapper::new(sh("exit 3".to_string()), registry(&dir)).unwrap();

        let code = wrapper
            .run_with_input(&ident(), tokio::io::empty())
            .await
            .unwrap();
        assert_eq!(code, 3);

        let session = wrapper.registry.session().await.unwrap();
        assert!(session.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_worker_sees_args_and_registration() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("kraken.data");
        let args = dir.path().join("args");
        let snapshot = dir.path().join("snapshot");
        let script = format!(
            "echo \"$@\" > {}; sleep 0.5; cat {} > {}",
            args.display(),
            data.display(),
            snapshot.display()
        );
        let wrapper = Wrapper::new(sh(script), registry(&dir)).unwrap();

        let code = wrapper
            .run_with_input(&ident(), tokio::io::empty())
            .await
            .unwrap();
        assert_eq!(code, 0);

        assert_eq!(
            std::fs::read_to_string(&args).unwrap(),
            "svc1 proj comp run\n"
        );
        assert_eq!(
            std::fs::read_to_string(&snapshot).unwrap(),
            format!(
                "alias=svc1,component=comp,pid={},process=run,project=proj\n",
                std::process::id()
            )
        );
    }

    #[tokio::test]
    async fn test_input_is_forwarded() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let script = format!("cat > {}", out.display());
        let wrapper = Wrapper::new(sh(script), registry(&dir)).unwrap();

        let input: &'static [u8] = b"first\nsecond\n";
        let code = wrapper.run_with_input(&ident(), input).await.unwrap();
        assert_eq!(code, 0);
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "first\nsecond\n");
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let dir = tempfile::tempdir().unwrap();
        let wrapper = Wrapper::new(
            vec!["/nonexistent/kraken-worker".to_string()],
            registry(&dir),
        )
        .unwrap();

        let err = wrapper
            .run_with_input(&ident(), tokio::io::empty())
            .await
            .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Spawn(_)));
        assert!(!dir.path().join("kraken.data").exists());
    }

    #[tokio::test]
    async fn test_pump_is_byte_transparent() {
        let mut out = Vec::new();
        pump(&b"a\n\xffb\nno newline"[..], &mut out).await.unwrap();
        assert_eq!(out, b"a\n\xffb\nno newline".to_vec());
    }

    #[test]
    fn test_empty_worker_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Wrapper::new(Vec::new(), registry(&dir)).err().unwrap();
        assert_eq!(err.code(), 30);
    }
}
