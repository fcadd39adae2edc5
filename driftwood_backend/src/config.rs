use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct DriftwoodConfig {
    pub api_port: u16,
    pub paths: DriftwoodPaths,
    pub federation: FederationConfig,
}

impl DriftwoodConfig {
    pub fn from_env() -> Result<Self> {
        let paths = match env::var("DRIFTWOOD_HOME") {
            Ok(raw) if !raw.trim().is_empty() => DriftwoodPaths::from_base_dir(raw.trim())?,
            _ => DriftwoodPaths::discover()?,
        };
        let api_port = env::var("DRIFTWOOD_API_PORT")
            .ok()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(8080);
        let federation = FederationConfig::from_env();
        Ok(Self {
            api_port,
            paths,
            federation,
        })
    }

    pub fn new(api_port: u16, paths: DriftwoodPaths, federation: FederationConfig) -> Self {
        Self {
            api_port,
            paths,
            federation,
        }
    }
}

/// Knobs for the inbox pipeline: actor fetching, signature checks and the
/// ledger sweeper.
#[derive(Debug, Clone)]
pub struct FederationConfig {
    pub user_agent: String,
    /// Hard deadline on every outbound actor fetch.
    pub fetch_timeout: Duration,
    pub sweep_interval: Duration,
    /// How long a ledger claim blocks other workers before it is considered
    /// abandoned.
    pub claim_lease: Duration,
    pub max_inbox_bytes: usize,
    /// Largest actor profile document accepted from a remote server.
    pub max_profile_bytes: usize,
    pub max_clock_skew: Duration,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("driftwood/{}", env!("CARGO_PKG_VERSION")),
            fetch_timeout: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(30),
            claim_lease: Duration::from_secs(300),
            max_inbox_bytes: 1024 * 1024,
            max_profile_bytes: 256 * 1024,
            max_clock_skew: Duration::from_secs(12 * 60 * 60),
        }
    }
}

impl FederationConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let user_agent = env::var("DRIFTWOOD_USER_AGENT")
            .ok()
            .filter(|raw| !raw.trim().is_empty())
            .unwrap_or(defaults.user_agent);
        let max_inbox_bytes = bytes_from_env("DRIFTWOOD_MAX_INBOX_BYTES").unwrap_or(defaults.max_inbox_bytes);
        let max_profile_bytes =
            bytes_from_env("DRIFTWOOD_MAX_PROFILE_BYTES").unwrap_or(defaults.max_profile_bytes);
        Self {
            user_agent,
            fetch_timeout: secs_from_env("DRIFTWOOD_FETCH_TIMEOUT_SECS")
                .unwrap_or(defaults.fetch_timeout),
            sweep_interval: secs_from_env("DRIFTWOOD_SWEEP_INTERVAL_SECS")
                .unwrap_or(defaults.sweep_interval),
            claim_lease: secs_from_env("DRIFTWOOD_CLAIM_LEASE_SECS")
                .unwrap_or(defaults.claim_lease),
            max_inbox_bytes,
            max_profile_bytes,
            max_clock_skew: secs_from_env("DRIFTWOOD_MAX_CLOCK_SKEW_SECS")
                .unwrap_or(defaults.max_clock_skew),
        }
    }
}

fn bytes_from_env(key: &str) -> Option<usize> {
    env::var(key)
        .ok()
        .and_then(|raw| raw.trim().parse::<usize>().ok())
        .filter(|bytes| *bytes > 0)
}

fn secs_from_env(key: &str) -> Option<Duration> {
    env::var(key)
        .ok()
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct DriftwoodPaths {
    pub base: PathBuf,
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub logs_dir: PathBuf,
}

impl DriftwoodPaths {
    pub fn discover() -> Result<Self> {
        let exe_path = std::env::current_exe()
            .map_err(|err| anyhow!("failed to resolve current executable: {err}"))?;
        let base = exe_path
            .parent()
            .ok_or_else(|| anyhow!("executable path missing parent"))?
            .to_path_buf();
        Self::from_base_dir(base)
    }

    pub fn from_base_dir<P: AsRef<Path>>(base: P) -> Result<Self> {
        let base = base.as_ref().to_path_buf();
        let data_dir = base.join("data");
        let db_path = data_dir.join("driftwood.db");
        let logs_dir = base.join("logs");

        Ok(Self {
            base,
            data_dir,
            db_path,
            logs_dir,
        })
    }
}
