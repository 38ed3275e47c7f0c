use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Runtime settings, read once at startup from `SILBO_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    /// WAL appends since the last rewrite before the compactor rewrites it.
    pub compact_threshold: u64,
    /// Upper bound on the check phase of a consistency-checked write.
    pub operation_timeout: Duration,
    pub shutdown_grace: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 3000,
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            compact_threshold: 1000,
            operation_timeout: Duration::from_millis(5000),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unparseable values keep the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            bind: lookup("SILBO_BIND").unwrap_or(defaults.bind),
            port: parsed(&lookup, "SILBO_PORT").unwrap_or(defaults.port),
            data_dir: lookup("SILBO_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            metrics_port: parsed(&lookup, "SILBO_METRICS_PORT"),
            compact_threshold: parsed(&lookup, "SILBO_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            operation_timeout: parsed(&lookup, "SILBO_OPERATION_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.operation_timeout),
            shutdown_grace: parsed(&lookup, "SILBO_SHUTDOWN_GRACE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.shutdown_grace),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("silbo.wal")
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("ignoring {key}={raw:?}: not a valid value, using default");
            None
        }
    }
}
