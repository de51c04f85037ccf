//! Server configuration: TOML file + CLI overrides.

use std::net::SocketAddr;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::cidr::Cidr;
use crate::executor::MAX_RESPONSE_BODY;
use crate::policy::{Policy, PolicyBuilder};
use crate::resolver::ResolverKind;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid listen address '{0}'")]
    Listen(String),

    #[error("invalid CIDR '{0}' in [policy] blocked_cidrs")]
    Cidr(String),

    #[error("{key} = {value} is out of range ({min}..={max})")]
    OutOfRange {
        key: &'static str,
        value: u64,
        min: u64,
        max: u64,
    },
}

/// Accepted `dns_timeout_ms` values.
pub const DNS_TIMEOUT_MS_RANGE: RangeInclusive<u64> = 3_000..=5_000;

/// Accepted `timeout_ms` values. The upper end is the hard replay bound.
pub const REPLAY_TIMEOUT_MS_RANGE: RangeInclusive<u64> = 1..=10_000;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub replay: ReplaySection,
    #[serde(default)]
    pub policy: PolicySection,
}

/// `[server]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_listen")]
    pub listen: String,
    /// JSON file of captured requests to seed the in-memory store.
    #[serde(default)]
    pub requests: Option<PathBuf>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            requests: None,
        }
    }
}

/// `[replay]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ReplaySection {
    #[serde(default = "default_dns_timeout_ms")]
    pub dns_timeout_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    #[serde(default)]
    pub resolver: ResolverKind,
}

impl Default for ReplaySection {
    fn default() -> Self {
        Self {
            dns_timeout_ms: default_dns_timeout_ms(),
            timeout_ms: default_timeout_ms(),
            max_body_bytes: default_max_body_bytes(),
            resolver: ResolverKind::default(),
        }
    }
}

/// `[policy]` section. Additions only; the built-in blocklist always applies.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PolicySection {
    #[serde(default)]
    pub blocked_cidrs: Vec<String>,
    #[serde(default)]
    pub blocked_hosts: Vec<String>,
}

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}
fn default_dns_timeout_ms() -> u64 {
    4_000
}
fn default_timeout_ms() -> u64 {
    10_000
}
fn default_max_body_bytes() -> usize {
    MAX_RESPONSE_BODY
}

/// Values given on the command line; each one wins over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub listen: Option<String>,
    pub requests: Option<PathBuf>,
    pub dns_timeout_ms: Option<u64>,
    pub replay_timeout_ms: Option<u64>,
}

/// Resolved configuration (CLI overrides applied, values parsed).
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    pub listen: SocketAddr,
    pub requests: Option<PathBuf>,
    pub dns_timeout: Duration,
    pub replay_timeout: Duration,
    pub max_body_bytes: usize,
    pub resolver: ResolverKind,
    pub blocked_cidrs: Vec<Cidr>,
    pub blocked_hosts: Vec<String>,
}

impl ReplayConfig {
    /// Load config from a TOML file, then apply CLI overrides.
    ///
    /// A missing file is not an error; defaults are used instead.
    pub fn load(config_path: Option<&Path>, overrides: Overrides) -> Result<Self, ConfigError> {
        let file = match config_path {
            Some(path) if path.exists() => {
                info!(path = %path.display(), "loading config file");
                let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                toml::from_str::<ConfigFile>(&content)?
            }
            Some(path) => {
                info!(path = %path.display(), "config file not found, using defaults");
                ConfigFile::default()
            }
            None => ConfigFile::default(),
        };
        Self::from_file(file, overrides)
    }

    pub fn from_file(file: ConfigFile, overrides: Overrides) -> Result<Self, ConfigError> {
        let listen_str = overrides.listen.unwrap_or(file.server.listen);
        let listen = listen_str
            .parse()
            .map_err(|_| ConfigError::Listen(listen_str.clone()))?;

        let blocked_cidrs = file
            .policy
            .blocked_cidrs
            .iter()
            .map(|s| s.parse::<Cidr>().map_err(|_| ConfigError::Cidr(s.clone())))
            .collect::<Result<Vec<_>, _>>()?;

        let dns_timeout_ms = in_range(
            "dns_timeout_ms",
            overrides.dns_timeout_ms.unwrap_or(file.replay.dns_timeout_ms),
            &DNS_TIMEOUT_MS_RANGE,
        )?;
        let replay_timeout_ms = in_range(
            "timeout_ms",
            overrides.replay_timeout_ms.unwrap_or(file.replay.timeout_ms),
            &REPLAY_TIMEOUT_MS_RANGE,
        )?;

        Ok(Self {
            listen,
            requests: overrides.requests.or(file.server.requests),
            dns_timeout: Duration::from_millis(dns_timeout_ms),
            replay_timeout: Duration::from_millis(replay_timeout_ms),
            max_body_bytes: file.replay.max_body_bytes,
            resolver: file.replay.resolver,
            blocked_cidrs,
            blocked_hosts: file.policy.blocked_hosts,
        })
    }

    /// The built-in blocklist plus the configured additions.
    pub fn policy(&self) -> Policy {
        let mut builder = PolicyBuilder::new();
        for cidr in &self.blocked_cidrs {
            builder = builder.block_cidr(*cidr);
        }
        for host in &self.blocked_hosts {
            builder = builder.block_host(host);
        }
        builder.build()
    }
}

fn in_range(
    key: &'static str,
    value: u64,
    range: &RangeInclusive<u64>,
) -> Result<u64, ConfigError> {
    if range.contains(&value) {
        Ok(value)
    } else {
        Err(ConfigError::OutOfRange {
            key,
            value,
            min: *range.start(),
            max: *range.end(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ReplayConfig::load(None, Overrides::default()).unwrap();
        assert_eq!(config.listen, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.dns_timeout, Duration::from_secs(4));
        assert_eq!(config.replay_timeout, Duration::from_secs(10));
        assert_eq!(config.max_body_bytes, 102_400);
        assert_eq!(config.resolver, ResolverKind::Hickory);
        assert!(config.requests.is_none());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = ReplayConfig::load(
            Some(Path::new("/nonexistent/replay-guard.toml")),
            Overrides::default(),
        )
        .unwrap();
        assert_eq!(config.replay_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_file_and_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[server]
listen = "0.0.0.0:9000"

[replay]
dns_timeout_ms = 3000
timeout_ms = 5000
resolver = "system"

[policy]
blocked_cidrs = ["198.51.100.0/24"]
blocked_hosts = ["*.corp.example"]
"#
        )
        .unwrap();

        let config = ReplayConfig::load(
            Some(file.path()),
            Overrides {
                replay_timeout_ms: Some(2_000),
                ..Overrides::default()
            },
        )
        .unwrap();
        assert_eq!(config.listen, "0.0.0.0:9000".parse().unwrap());
        assert_eq!(config.dns_timeout, Duration::from_secs(3));
        assert_eq!(config.replay_timeout, Duration::from_secs(2));
        assert_eq!(config.resolver, ResolverKind::System);

        let policy = config.policy();
        assert!(policy.check_ip("198.51.100.7".parse().unwrap()).is_err());
        assert!(policy.check_ip("10.0.0.1".parse().unwrap()).is_err());
        assert!(policy.check_hostname("db.corp.example").is_err());
        assert!(policy.check_hostname("example.com").is_ok());
    }

    #[test]
    fn test_bad_values_rejected() {
        let mut file = ConfigFile::default();
        file.policy.blocked_cidrs = vec!["10.0.0.0/33".into()];
        assert!(matches!(
            ReplayConfig::from_file(file, Overrides::default()),
            Err(ConfigError::Cidr(_))
        ));

        let overrides = Overrides {
            listen: Some("not-an-address".into()),
            ..Overrides::default()
        };
        assert!(matches!(
            ReplayConfig::from_file(ConfigFile::default(), overrides),
            Err(ConfigError::Listen(_))
        ));
    }

    #[test]
    fn test_timeouts_bounded() {
        let dns = |ms| Overrides {
            dns_timeout_ms: Some(ms),
            ..Overrides::default()
        };
        let replay = |ms| Overrides {
            replay_timeout_ms: Some(ms),
            ..Overrides::default()
        };

        for ms in [3_000, 5_000] {
            let config = ReplayConfig::from_file(ConfigFile::default(), dns(ms)).unwrap();
            assert_eq!(config.dns_timeout, Duration::from_millis(ms));
        }
        for ms in [0, 2_999, 5_001] {
            assert!(matches!(
                ReplayConfig::from_file(ConfigFile::default(), dns(ms)),
                Err(ConfigError::OutOfRange { key: "dns_timeout_ms", .. })
            ));
        }

        let config = ReplayConfig::from_file(ConfigFile::default(), replay(10_000)).unwrap();
        assert_eq!(config.replay_timeout, Duration::from_secs(10));
        for ms in [0, 10_001, 600_000] {
            assert!(matches!(
                ReplayConfig::from_file(ConfigFile::default(), replay(ms)),
                Err(ConfigError::OutOfRange { key: "timeout_ms", .. })
            ));
        }
    }

    #[test]
    fn test_file_timeouts_bounded() {
        let file: ConfigFile = toml::from_str("[replay]\ntimeout_ms = 600000").unwrap();
        let err = ReplayConfig::from_file(file, Overrides::default()).unwrap_err();
        assert_eq!(err.to_string(), "timeout_ms = 600000 is out of range (1..=10000)");
    }

    #[test]
    fn test_parse_error() {
        assert!(toml::from_str::<ConfigFile>("[replay]\ntimeout_ms = \"soon\"").is_err());
    }
}
