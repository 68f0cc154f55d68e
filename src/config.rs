use crate::{services::executor::ExecutorConfig, session_client::Credentials};
use anyhow::{Context, Result, bail};
use std::{env, path::PathBuf, str::FromStr, time::Duration};

/// Application configuration loaded and validated at startup
#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Data-model proxy endpoint
    pub bus: BusConfig,

    /// How requests to the proxy are authenticated
    pub auth: AuthConfig,

    pub readiness: ReadinessConfig,

    pub shell: ShellConfig,

    pub rollback: RollbackConfig,
}

#[derive(Clone, Debug)]
pub struct BusConfig {
    pub url: String,
    pub request_timeout: Duration,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AuthMode {
    None,
    Basic,
    Session,
}

impl FromStr for AuthMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(AuthMode::None),
            "basic" => Ok(AuthMode::Basic),
            "session" => Ok(AuthMode::Session),
            other => bail!("unknown auth mode '{other}': expected none, basic or session"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub mode: AuthMode,
    pub credentials: Credentials,
    /// Endpoint issuing session tokens; the bus endpoint if unset
    pub session_url: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ReadinessConfig {
    pub poll_interval: Duration,
    pub default_timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct ShellConfig {
    pub timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct RollbackConfig {
    pub journal: PathBuf,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn load() -> Result<Self> {
        Self::load_with(|key| env::var(key).ok())
    }

    /// Load configuration using `lookup` to resolve variables
    pub fn load_with<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            bus: BusConfig::load(&lookup)?,
            auth: AuthConfig::load(&lookup)?,
            readiness: ReadinessConfig::load(&lookup)?,
            shell: ShellConfig::load(&lookup)?,
            rollback: RollbackConfig::load(&lookup),
        })
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            poll_interval: self.readiness.poll_interval,
            default_wait_timeout: self.readiness.default_timeout,
            shell_timeout: self.shell.timeout,
            journal: Some(self.rollback.journal.clone()),
        }
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: &str) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(key)
        .unwrap_or_else(|| default.to_string())
        .parse::<T>()
        .context(format!("failed to parse {key}: invalid format"))
}

impl BusConfig {
    fn load<F: Fn(&str) -> Option<String>>(lookup: &F) -> Result<Self> {
        let url = lookup("BUS_URL").unwrap_or_else(|| "http://192.168.1.1:8080".to_string());
        let request_timeout =
            Duration::from_millis(parse_var(lookup, "BUS_REQUEST_TIMEOUT_MS", "10000")?);

        Ok(Self {
            url,
            request_timeout,
        })
    }
}

impl AuthConfig {
    fn load<F: Fn(&str) -> Option<String>>(lookup: &F) -> Result<Self> {
        let mode = lookup("BUS_AUTH")
            .unwrap_or_else(|| "session".to_string())
            .parse::<AuthMode>()
            .context("failed to parse BUS_AUTH")?;

        let credentials = Credentials {
            username: lookup("BUS_USERNAME").unwrap_or_else(|| "admin".to_string()),
            password: lookup("BUS_PASSWORD").unwrap_or_else(|| "admin".to_string()),
        };

        Ok(Self {
            mode,
            credentials,
            session_url: lookup("BUS_SESSION_URL"),
        })
    }
}

impl ReadinessConfig {
    fn load<F: Fn(&str) -> Option<String>>(lookup: &F) -> Result<Self> {
        let poll_interval =
            Duration::from_millis(parse_var(lookup, "READINESS_POLL_INTERVAL_MS", "1000")?);
        let default_timeout =
            Duration::from_secs(parse_var(lookup, "READINESS_TIMEOUT_SECS", "60")?);

        anyhow::ensure!(
            !poll_interval.is_zero(),
            "READINESS_POLL_INTERVAL_MS must be greater than 0"
        );

        Ok(Self {
            poll_interval,
            default_timeout,
        })
    }
}

impl ShellConfig {
    fn load<F: Fn(&str) -> Option<String>>(lookup: &F) -> Result<Self> {
        Ok(Self {
            timeout: Duration::from_secs(parse_var(lookup, "SHELL_TIMEOUT_SECS", "120")?),
        })
    }
}

impl RollbackConfig {
    fn load<F: Fn(&str) -> Option<String>>(lookup: &F) -> Self {
        let journal = lookup("ROLLBACK_JOURNAL")
            .unwrap_or_else(|| "/tmp/meshprov_rollback.json".to_string());

        Self {
            journal: PathBuf::from(journal),
        }
    }
}
