//! dynoscale.toml configuration parser.
//!
//! A [`ScalerConfig`] is built once at process start and handed to the
//! autoscaler behind an `Arc`. Fields missing from the file fall back to
//! [`ScalerConfig::default`], which consults the process environment
//! (`HEROKU_API_KEY` / `HEROKU_OAUTH_TOKEN` enable scaling, `HEROKU_APP`
//! names the target application).

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};

/// Environment variables whose presence enables scaling by default.
pub const API_KEY_VARS: [&str; 2] = ["HEROKU_API_KEY", "HEROKU_OAUTH_TOKEN"];

/// Environment variable naming the application to scale.
pub const APPLICATION_VAR: &str = "HEROKU_APP";

const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Ordered thresholds: worker count -> minimum pending jobs that justify it.
///
/// Keys and values are both strictly increasing and the table always has a
/// baseline entry for one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, u32>", into = "BTreeMap<String, u32>")]
pub struct JobWorkerRatio {
    entries: BTreeMap<u32, u32>,
}

impl JobWorkerRatio {
    /// Build a ratio table from `(workers, pending_threshold)` pairs.
    pub fn new(pairs: impl IntoIterator<Item = (u32, u32)>) -> ConfigResult<Self> {
        let mut entries = BTreeMap::new();
        for (workers, threshold) in pairs {
            if workers == 0 {
                return Err(ConfigError::InvalidRatio(
                    "worker counts must be positive".to_string(),
                ));
            }
            if entries.insert(workers, threshold).is_some() {
                return Err(ConfigError::InvalidRatio(format!(
                    "duplicate entry for {workers} workers"
                )));
            }
        }

        if !entries.contains_key(&1) {
            return Err(ConfigError::InvalidRatio(
                "missing baseline entry for 1 worker".to_string(),
            ));
        }

        let mut previous: Option<(u32, u32)> = None;
        for (&workers, &threshold) in &entries {
            if let Some((prev_workers, prev_threshold)) = previous
                && threshold <= prev_threshold
            {
                return Err(ConfigError::InvalidRatio(format!(
                    "threshold for {workers} workers ({threshold}) must exceed \
                     threshold for {prev_workers} workers ({prev_threshold})"
                )));
            }
            previous = Some((workers, threshold));
        }

        Ok(Self { entries })
    }

    /// Iterate `(workers, threshold)` in ascending worker order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (u32, u32)> + '_ {
        self.entries.iter().map(|(&w, &t)| (w, t))
    }

    /// Pending-job threshold for exactly `workers`, if configured.
    pub fn threshold(&self, workers: u32) -> Option<u32> {
        self.entries.get(&workers).copied()
    }

    /// Threshold of the one-worker baseline entry.
    pub fn baseline(&self) -> u32 {
        self.entries.get(&1).copied().unwrap_or_default()
    }

    /// Highest worker count the table can ever ask for.
    pub fn max_workers(&self) -> u32 {
        self.entries.keys().next_back().copied().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for JobWorkerRatio {
    fn default() -> Self {
        Self {
            entries: BTreeMap::from([(1, 1), (2, 25), (3, 50), (4, 75), (5, 100)]),
        }
    }
}

impl TryFrom<BTreeMap<String, u32>> for JobWorkerRatio {
    type Error = ConfigError;

    fn try_from(raw: BTreeMap<String, u32>) -> Result<Self, Self::Error> {
        let mut pairs = Vec::with_capacity(raw.len());
        for (key, threshold) in raw {
            let workers = key.trim().parse::<u32>().map_err(|_| {
                ConfigError::InvalidRatio(format!("worker count {key:?} is not an integer"))
            })?;
            pairs.push((workers, threshold));
        }
        Self::new(pairs)
    }
}

impl From<JobWorkerRatio> for BTreeMap<String, u32> {
    fn from(ratio: JobWorkerRatio) -> Self {
        ratio
            .entries
            .into_iter()
            .map(|(w, t)| (w.to_string(), t))
            .collect()
    }
}

/// How scale decisions triggered by job events are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DispatchMode {
    /// Decide inline on the caller's task.
    #[default]
    Sync,
    /// Queue decisions onto a single-concurrency background executor.
    Async {
        #[serde(default = "default_queue_capacity")]
        capacity: usize,
    },
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

/// Output format for the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Process-wide scaling configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalerConfig {
    /// Hard ceiling; a scale-up needing more is vetoed, not clamped.
    pub max_workers: u32,
    /// Floor and scale-down target.
    pub min_workers: u32,
    /// Global kill switch.
    pub enabled: bool,
    /// Application whose formation is scaled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application: Option<String>,
    /// Process type within the application's formation.
    pub process_type: String,
    /// Window during which an unchanged target is not re-sent.
    #[serde(with = "duration_str")]
    pub throttle_window: Duration,
    /// Upper bound on a single external scaling call.
    #[serde(with = "duration_str")]
    pub call_timeout: Duration,
    /// Delay before a completion-triggered scale-down is evaluated.
    #[serde(with = "duration_str")]
    pub scale_down_settle: Duration,
    pub job_worker_ratio: JobWorkerRatio,
    pub dispatch: DispatchMode,
    pub logging: LoggingConfig,
}

impl Default for ScalerConfig {
    fn default() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

impl ScalerConfig {
    /// Defaults resolved against an arbitrary variable lookup instead of the
    /// process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let enabled = API_KEY_VARS.iter().any(|var| lookup(var).is_some());
        let application = lookup(APPLICATION_VAR).filter(|app| !app.trim().is_empty());

        Self {
            max_workers: 1,
            min_workers: 0,
            enabled,
            application,
            process_type: "worker".to_string(),
            throttle_window: Duration::from_secs(30),
            call_timeout: Duration::from_secs(10),
            scale_down_settle: Duration::from_secs(5),
            job_worker_ratio: JobWorkerRatio::default(),
            dispatch: DispatchMode::Sync,
            logging: LoggingConfig::default(),
        }
    }

    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        debug!(
            path = %path.display(),
            enabled = config.enabled,
            max_workers = config.max_workers,
            min_workers = config.min_workers,
            "scaler config loaded"
        );
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: ScalerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check cross-field constraints the type system cannot express.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.min_workers > self.max_workers {
            return Err(ConfigError::Bounds {
                min: self.min_workers,
                max: self.max_workers,
            });
        }
        if self.enabled && self.target_application().is_none() {
            return Err(ConfigError::MissingApplication);
        }
        Ok(())
    }

    /// The configured application, ignoring blank values.
    pub fn target_application(&self) -> Option<&str> {
        self.application
            .as_deref()
            .map(str::trim)
            .filter(|app| !app.is_empty())
    }
}

/// Parse a duration string like "250ms", "30s", "5m", "1h" or bare seconds.
pub fn parse_duration(s: &str) -> ConfigResult<Duration> {
    let s = s.trim();
    let invalid = || ConfigError::InvalidDuration(s.to_string());

    let (digits, scale): (&str, fn(u64) -> Duration) = if let Some(ms) = s.strip_suffix("ms") {
        (ms, Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        (secs, Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        (mins, |m| Duration::from_secs(m.saturating_mul(60)))
    } else if let Some(hours) = s.strip_suffix('h') {
        (hours, |h| Duration::from_secs(h.saturating_mul(3600)))
    } else {
        (s, Duration::from_secs)
    };

    let value = digits.trim().parse::<u64>().map_err(|_| invalid())?;
    Ok(scale(value))
}

/// Render a duration in the shortest form [`parse_duration`] accepts.
pub fn format_duration(d: Duration) -> String {
    let millis = d.as_millis();
    if millis % 1000 != 0 {
        format!("{millis}ms")
    } else {
        let secs = d.as_secs();
        if secs != 0 && secs % 3600 == 0 {
            format!("{}h", secs / 3600)
        } else if secs != 0 && secs % 60 == 0 {
            format!("{}m", secs / 60)
        } else {
            format!("{secs}s")
        }
    }
}

mod duration_str {
    use std::fmt;
    use std::time::Duration;

    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        deserializer.deserialize_any(DurationVisitor)
    }

    struct DurationVisitor;

    impl Visitor<'_> for DurationVisitor {
        type Value = Duration;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a duration such as \"30s\" or a number of seconds")
        }

        fn visit_u64<E: de::Error>(self, secs: u64) -> Result<Duration, E> {
            Ok(Duration::from_secs(secs))
        }

        fn visit_i64<E: de::Error>(self, secs: i64) -> Result<Duration, E> {
            u64::try_from(secs)
                .map(Duration::from_secs)
                .map_err(|_| E::custom(format!("negative duration: {secs}")))
        }

        fn visit_str<E: de::Error>(self, text: &str) -> Result<Duration, E> {
            super::parse_duration(text).map_err(E::custom)
        }
    }
}
