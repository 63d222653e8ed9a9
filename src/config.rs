// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! JSON configuration, by default read from `kraken.json`

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::Error;
use crate::registry::Registry;

pub const DEFAULT_CONFIG_FILE: &str = "kraken.json";
pub const CONFIG_ENV: &str = "KRAKEN_CONFIG";

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub env: EnvConfig,
    #[serde(default)]
    pub worker: Option<WorkerConfig>,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// How processes are launched on this host
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnvConfig {
    /// `win` or `unix`
    pub os: String,
    /// The wrapper executable plus any leading arguments, e.g. `/usr/bin/kraken wrap`
    pub exe: String,
    /// Where the detached wrapper's output goes on unix
    #[serde(default = "default_output")]
    pub output: String,
}

/// The real program the wrapper runs
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerConfig {
    pub exe: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegistryConfig {
    pub dir: PathBuf,
    pub name: String,
    pub lock_poll_ms: u64,
    pub lock_timeout_ms: Option<u64>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data"),
            name: "kraken".to_string(),
            lock_poll_ms: 100,
            lock_timeout_ms: None,
        }
    }
}

impl RegistryConfig {
    pub fn open(&self) -> Registry {
        Registry::open(&self.dir, &self.name)
            .with_lock_poll_interval(Duration::from_millis(self.lock_poll_ms))
            .with_lock_timeout(self.lock_timeout_ms.map(Duration::from_millis))
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SupervisorConfig {
    pub timeout_ms: u64,
    pub interval_ms: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 1000,
            interval_ms: 50,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9080,
        }
    }
}

fn default_output() -> String {
    "/dev/null".to_string()
}

impl Config {
    pub fn from_json(json: &str) -> Result<Self, Error> {
        serde_json::from_str(json).map_err(|e| Error::config(format!("invalid config: {}", e)))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("could not read {}: {}", path.display(), e)))?;

        let config = Self::from_json(&json)?;
        tracing::debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    pub fn worker(&self) -> Result<&WorkerConfig, Error> {
        self.worker
            .as_ref()
            .ok_or_else(|| Error::config("worker.exe is not configured"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = Config::from_json(r#"{"env": {"os": "unix", "exe": "kraken wrap"}}"#).unwrap();

        assert_eq!(config.env.os, "unix");
        assert_eq!(config.env.output, "/dev/null");
        assert_eq!(config.registry.dir, PathBuf::from("data"));
        assert_eq!(config.registry.name, "kraken");
        assert_eq!(config.registry.lock_timeout_ms, None);
        assert_eq!(config.supervisor.timeout_ms, 1000);
        assert_eq!(config.supervisor.interval_ms, 50);
        assert_eq!(config.server.port, 9080);
        assert!(config.worker().is_err());
    }

    #[test]
    fn test_full_config() {
        let config = Config::from_json(
            r#"{
                "env": {"os": "win", "exe": "kraken.exe wrap", "output": "out.log"},
                "worker": {"exe": "php procrun"},
                "registry": {"dir": "/tmp/k", "name": "procs", "lock_poll_ms": 10, "lock_timeout_ms": 500},
                "supervisor": {"timeout_ms": 2000, "interval_ms": 20},
                "server": {"host": "0.0.0.0", "port": 7000}
            }"#,
        )
        .unwrap();

        assert_eq!(config.worker().unwrap().exe, "php procrun");
        assert_eq!(config.registry.lock_timeout_ms, Some(500));
        assert_eq!(config.server.host, "0.0.0.0");

        let registry = config.registry.open();
        assert_eq!(registry.lock().path(), Path::new("/tmp/k/procs.lock"));
    }

    #[test]
    fn test_missing_env_is_config_error() {
        let err = Config::from_json(r#"{"worker": {"exe": "x"}}"#).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Config(_)));
        assert_eq!(err.code(), 30);
    }

    #[test]
    fn test_invalid_json_is_config_error() {
        let invalid = [
            "{",
            r#"{"env": {"os": "unix", "exe": 7}}"#,
            r#"{"env": {"os": "unix", "exe": "k"}, "extra": 1}"#,
        ];
        for json in &invalid {
            let err = Config::from_json(json).unwrap_err();
            assert!(matches!(err.kind(), ErrorKind::Config(_)), "{}", json);
            assert_eq!(err.code(), 30);
        }
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Config(_)));
    }
}
