// Pool configuration
// Decision: One strategy per pool, chosen here; call sites never branch on mode
// Decision: Durations serialize as milliseconds, matching the env var units

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const WORKER_BINARY: &str = "docgate-worker";

// =============================================================================
// Mode
// =============================================================================

/// Scheduling strategy of a pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolMode {
    /// One in-process engine behind a lock.
    #[default]
    Direct,
    /// One worker process per instance.
    Isolated,
}

impl PoolMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PoolMode::Direct => "direct",
            PoolMode::Isolated => "isolated",
        }
    }
}

impl fmt::Display for PoolMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PoolMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct" | "single" => Ok(PoolMode::Direct),
            "isolated" | "multi" => Ok(PoolMode::Isolated),
            other => Err(Error::Config(format!("unknown pool mode {:?}", other))),
        }
    }
}

// =============================================================================
// Worker command
// =============================================================================

/// How to start a worker process. The pool appends `--instance-id` and
/// `--listen` itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerCommand {
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for WorkerCommand {
    /// The worker binary next to the current executable, else from `PATH`.
    fn default() -> Self {
        let sibling = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join(WORKER_BINARY)))
            .filter(|path| path.is_file());
        Self {
            program: sibling.unwrap_or_else(|| PathBuf::from(WORKER_BINARY)),
            args: Vec::new(),
        }
    }
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

// =============================================================================
// Pool configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub mode: PoolMode,

    /// Workers kept warm. Crashed workers are replaced up to this number.
    pub min_idle: usize,

    /// Released workers beyond this number are shut down.
    pub max_idle: usize,

    /// Upper bound on live workers, idle or checked out.
    pub max_instances: usize,

    /// Time allowed for a worker to print its handshake and accept a connection.
    #[serde(with = "duration_millis")]
    pub spawn_timeout: Duration,

    /// A call with no reply after this long kills the worker. Zero disables.
    #[serde(with = "duration_millis")]
    pub invoke_watchdog: Duration,

    /// Grace period for workers and holders during shutdown.
    #[serde(with = "duration_millis")]
    pub shutdown_grace: Duration,

    /// Ping idle workers before handing them out.
    pub health_check: bool,

    pub worker: WorkerCommand,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            mode: PoolMode::Direct,
            min_idle: 1,
            max_idle: 4,
            max_instances: 4,
            spawn_timeout: Duration::from_secs(10),
            invoke_watchdog: Duration::from_secs(120),
            shutdown_grace: Duration::from_secs(5),
            health_check: true,
            worker: WorkerCommand::default(),
        }
    }
}

impl PoolConfig {
    /// Single in-process instance.
    pub fn direct() -> Self {
        Self {
            mode: PoolMode::Direct,
            min_idle: 1,
            max_idle: 1,
            max_instances: 1,
            ..Default::default()
        }
    }

    /// Up to `max_instances` worker processes.
    pub fn isolated(max_instances: usize) -> Self {
        let max_instances = max_instances.max(1);
        Self {
            mode: PoolMode::Isolated,
            min_idle: 1,
            max_idle: max_instances,
            max_instances,
            ..Default::default()
        }
    }

    /// Create configuration from environment variables
    ///
    /// Unset variables keep their defaults; malformed values are an error.
    pub fn from_env() -> Result<Self> {
        let mode = env_parse::<PoolMode>("DOCGATE_POOL_MODE")?.unwrap_or_default();
        let mut config = match mode {
            PoolMode::Direct => Self::direct(),
            PoolMode::Isolated => {
                Self::isolated(env_parse("DOCGATE_MAX_INSTANCES")?.unwrap_or(4))
            }
        };

        if let Some(min_idle) = env_parse("DOCGATE_MIN_IDLE")? {
            config.min_idle = min_idle;
        }
        if let Some(max_idle) = env_parse("DOCGATE_MAX_IDLE")? {
            config.max_idle = max_idle;
        }
        if let Some(ms) = env_parse("DOCGATE_SPAWN_TIMEOUT_MS")? {
            config.spawn_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse("DOCGATE_INVOKE_WATCHDOG_MS")? {
            config.invoke_watchdog = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse("DOCGATE_SHUTDOWN_GRACE_MS")? {
            config.shutdown_grace = Duration::from_millis(ms);
        }
        if let Some(enabled) = env_parse("DOCGATE_HEALTH_CHECK")? {
            config.health_check = enabled;
        }
        if let Ok(path) = std::env::var("DOCGATE_WORKER_PATH") {
            config.worker.program = PathBuf::from(path);
        }
        if let Ok(args) = std::env::var("DOCGATE_WORKER_ARGS") {
            config.worker.args = args.split_whitespace().map(str::to_string).collect();
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_min_idle(mut self, min_idle: usize) -> Self {
        self.min_idle = min_idle;
        self
    }

    pub fn with_max_idle(mut self, max_idle: usize) -> Self {
        self.max_idle = max_idle;
        self
    }

    pub fn with_max_instances(mut self, max: usize) -> Self {
        self.max_instances = max.max(1);
        self
    }

    pub fn with_spawn_timeout(mut self, timeout: Duration) -> Self {
        self.spawn_timeout = timeout;
        self
    }

    pub fn with_invoke_watchdog(mut self, watchdog: Duration) -> Self {
        self.invoke_watchdog = watchdog;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn with_health_check(mut self, enabled: bool) -> Self {
        self.health_check = enabled;
        self
    }

    pub fn with_worker(mut self, worker: WorkerCommand) -> Self {
        self.worker = worker;
        self
    }

    /// The watchdog period, `None` when disabled.
    pub fn watchdog(&self) -> Option<Duration> {
        (!self.invoke_watchdog.is_zero()).then_some(self.invoke_watchdog)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_instances == 0 {
            return Err(Error::Config("max_instances must be at least 1".into()));
        }
        if self.mode == PoolMode::Direct && self.max_instances != 1 {
            return Err(Error::Config(
                "direct pools have exactly one instance".into(),
            ));
        }
        if self.min_idle > self.max_idle {
            return Err(Error::Config(format!(
                "min_idle ({}) exceeds max_idle ({})",
                self.min_idle, self.max_idle
            )));
        }
        if self.max_idle > self.max_instances {
            return Err(Error::Config(format!(
                "max_idle ({}) exceeds max_instances ({})",
                self.max_idle, self.max_instances
            )));
        }
        if self.spawn_timeout.is_zero() {
            return Err(Error::Config("spawn_timeout must be positive".into()));
        }
        Ok(())
    }
}

fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("{}={:?}: {}", name, value, e))),
        Err(_) => Ok(None),
    }
}

/// Serde support for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_config_is_single_instance() {
        let config = PoolConfig::direct();
        assert_eq!(config.mode, PoolMode::Direct);
        assert_eq!(config.max_instances, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_isolated_builder() {
        let config = PoolConfig::isolated(3)
            .with_min_idle(0)
            .with_invoke_watchdog(Duration::ZERO)
            .with_worker(WorkerCommand::new("/opt/docgate-worker").with_arg("--fault-injection"));
        assert_eq!(config.max_instances, 3);
        assert_eq!(config.watchdog(), None);
        assert_eq!(config.worker.args, vec!["--fault-injection"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_inconsistent_bounds() {
        assert!(PoolConfig::isolated(2).with_max_idle(3).validate().is_err());
        assert!(PoolConfig::isolated(2)
            .with_min_idle(2)
            .with_max_idle(1)
            .validate()
            .is_err());
        assert!(PoolConfig::direct().with_max_instances(2).validate().is_err());
    }

    #[test]
    fn test_pool_mode_parse() {
        assert_eq!("Isolated".parse::<PoolMode>().unwrap(), PoolMode::Isolated);
        assert_eq!("direct".parse::<PoolMode>().unwrap(), PoolMode::Direct);
        assert!(matches!("threads".parse::<PoolMode>(), Err(Error::Config(_))));
    }

    #[test]
    fn test_config_serializes_durations_as_millis() {
        let config = PoolConfig::isolated(2).with_spawn_timeout(Duration::from_millis(1500));
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["mode"], "isolated");
        assert_eq!(json["spawn_timeout"], 1500);
        let back: PoolConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back.spawn_timeout, Duration::from_millis(1500));
    }
}
