//! Pool configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::jitter::JitterPolicy;
use crate::source::SourceTemplate;
use crate::{PoolError, Result};

/// Browser-like User-Agent sent to directory sources.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Free proxy directories scraped by default. `{}` marks the page number.
pub const DEFAULT_SOURCES: &[&str] = &[
    "https://www.kuaidaili.com/free/inha/",
    "https://www.kuaidaili.com/free/intr/",
    "http://www.ip3366.net/free/?stype=1",
    "http://www.ip3366.net/free/?stype=2",
    "http://www.89ip.cn/index_{}.html",
    "https://www.xicidaili.com/nn/",
    "https://www.xicidaili.com/nt/",
    "https://www.xicidaili.com/wt/",
    "https://ip.jiangxianli.com/?page={}",
    "https://www.kuaidaili.com/ops/proxylist/{}/",
];

/// Construction-time configuration of a proxy pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Refill when fewer endpoints than this are available.
    #[serde(default = "default_low_water_mark")]
    pub low_water_mark: usize,
    /// Maintenance tick in seconds.
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
    /// Per-probe timeout in seconds.
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
    /// Page fetched through a candidate to confirm liveness.
    #[serde(default = "default_probe_target")]
    pub probe_target: String,
    /// Directory source URL templates.
    #[serde(default = "default_sources")]
    pub sources: Vec<String>,
    /// Maximum simultaneous probes.
    #[serde(default = "default_validator_concurrency")]
    pub validator_concurrency: usize,
    /// Per-request timeout for directory sources in seconds.
    #[serde(default = "default_source_timeout")]
    pub source_timeout_secs: u64,
    /// Pages fetched from each paginated source.
    #[serde(default = "default_pages_per_source")]
    pub pages_per_source: u32,
    /// Pause between consecutive page requests to one source.
    #[serde(default)]
    pub source_jitter: JitterPolicy,
    /// Wait after a failed maintenance cycle in seconds.
    #[serde(default = "default_error_cooldown")]
    pub error_cooldown_secs: u64,
    /// Consecutive empty refills before a warning is logged.
    #[serde(default = "default_stall_warn_after")]
    pub stall_warn_after: u32,
    /// Forget endpoints checked out longer than this. Disabled when unset.
    #[serde(default)]
    pub lease_timeout_secs: Option<u64>,
    /// User-Agent for source requests.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_low_water_mark() -> usize {
    20
}

fn default_check_interval() -> u64 {
    300
}

fn default_probe_timeout() -> u64 {
    5
}

fn default_probe_target() -> String {
    "https://www.baidu.com".to_string()
}

fn default_sources() -> Vec<String> {
    DEFAULT_SOURCES.iter().map(|s| s.to_string()).collect()
}

fn default_validator_concurrency() -> usize {
    20
}

fn default_source_timeout() -> u64 {
    10
}

fn default_pages_per_source() -> u32 {
    3
}

fn default_error_cooldown() -> u64 {
    60
}

fn default_stall_warn_after() -> u32 {
    3
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            low_water_mark: default_low_water_mark(),
            check_interval_secs: default_check_interval(),
            probe_timeout_secs: default_probe_timeout(),
            probe_target: default_probe_target(),
            sources: default_sources(),
            validator_concurrency: default_validator_concurrency(),
            source_timeout_secs: default_source_timeout(),
            pages_per_source: default_pages_per_source(),
            source_jitter: JitterPolicy::default(),
            error_cooldown_secs: default_error_cooldown(),
            stall_warn_after: default_stall_warn_after(),
            lease_timeout_secs: None,
            user_agent: default_user_agent(),
        }
    }
}

impl PoolConfig {
    /// Loads a configuration file, TOML or JSON by extension.
    ///
    /// A missing file yields the defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            warn!("Config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content)
                .map_err(|e| PoolError::Config(format!("{}: {}", path.display(), e)))?,
            _ => toml::from_str(&content)
                .map_err(|e| PoolError::Config(format!("{}: {}", path.display(), e)))?,
        };

        config.validate()?;
        info!("Config loaded from {}", path.display());
        Ok(config)
    }

    /// Checks the configuration for values the pool cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.validator_concurrency == 0 {
            return Err(PoolError::Config("validator_concurrency must be > 0".into()));
        }
        if self.check_interval_secs == 0 {
            return Err(PoolError::Config("check_interval_secs must be > 0".into()));
        }
        if self.probe_timeout_secs == 0 {
            return Err(PoolError::Config("probe_timeout_secs must be > 0".into()));
        }
        if self.source_timeout_secs == 0 {
            return Err(PoolError::Config("source_timeout_secs must be > 0".into()));
        }
        if self.source_jitter.min_ms > self.source_jitter.max_ms {
            return Err(PoolError::Config(
                "source_jitter.min_ms must not exceed max_ms".into(),
            ));
        }
        if self.lease_timeout_secs == Some(0) {
            return Err(PoolError::Config("lease_timeout_secs must be > 0".into()));
        }

        let target = url::Url::parse(&self.probe_target)
            .map_err(|e| PoolError::Config(format!("probe_target: {}", e)))?;
        if !matches!(target.scheme(), "http" | "https") {
            return Err(PoolError::Config(format!(
                "probe_target must be http(s), got '{}'",
                target.scheme()
            )));
        }

        for source in &self.sources {
            SourceTemplate::parse(source)?;
        }

        Ok(())
    }

    /// Parsed source templates.
    pub fn source_templates(&self) -> Result<Vec<SourceTemplate>> {
        self.sources.iter().map(|s| SourceTemplate::parse(s)).collect()
    }

    /// Maintenance tick period.
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    /// Timeout for one liveness probe.
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    /// Timeout for one directory page request.
    pub fn source_timeout(&self) -> Duration {
        Duration::from_secs(self.source_timeout_secs)
    }

    /// Pause after a failed maintenance cycle.
    pub fn error_cooldown(&self) -> Duration {
        Duration::from_secs(self.error_cooldown_secs)
    }

    /// Checkout lease limit, if any.
    pub fn lease_timeout(&self) -> Option<Duration> {
        self.lease_timeout_secs.map(Duration::from_secs)
    }
}
