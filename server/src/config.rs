use std::time::Duration;

/// Service configuration, read from `MEDIAFABRIC_*` environment variables
/// with defaults suitable for a local substrate. Anything fancier (files,
/// reload) belongs to the supervision layer outside this repo.
#[derive(Debug, Clone)]
pub struct Config {
    pub registration_bind: String,
    pub query_bind: String,
    pub etcd_url: String,
    /// Host (and port) clients are told to open WebSockets against.
    pub advertised_host: String,
    pub heartbeat_ttl: Duration,
    pub collect_interval: Duration,
    pub collect_deadline: Duration,
    pub collect_lock_ttl: Duration,
    pub watch_poll_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            registration_bind: "0.0.0.0:8235".to_string(),
            query_bind: "0.0.0.0:8870".to_string(),
            etcd_url: "http://127.0.0.1:4001".to_string(),
            advertised_host: "127.0.0.1:8870".to_string(),
            heartbeat_ttl: Duration::from_secs(12),
            collect_interval: Duration::from_secs(10),
            collect_deadline: Duration::from_secs(9),
            collect_lock_ttl: Duration::from_secs(15),
            watch_poll_timeout: Duration::from_secs(20),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            registration_bind: var("MEDIAFABRIC_REGISTRATION_BIND", defaults.registration_bind),
            query_bind: var("MEDIAFABRIC_QUERY_BIND", defaults.query_bind),
            etcd_url: var("MEDIAFABRIC_ETCD_URL", defaults.etcd_url),
            advertised_host: var("MEDIAFABRIC_ADVERTISED_HOST", defaults.advertised_host),
            heartbeat_ttl: secs_var("MEDIAFABRIC_HEARTBEAT_TTL_SECS", defaults.heartbeat_ttl),
            collect_interval: secs_var("MEDIAFABRIC_COLLECT_INTERVAL_SECS", defaults.collect_interval),
            collect_deadline: secs_var("MEDIAFABRIC_COLLECT_DEADLINE_SECS", defaults.collect_deadline),
            collect_lock_ttl: secs_var("MEDIAFABRIC_COLLECT_LOCK_TTL_SECS", defaults.collect_lock_ttl),
            watch_poll_timeout: secs_var("MEDIAFABRIC_WATCH_TIMEOUT_SECS", defaults.watch_poll_timeout),
        }
    }
}

fn var(name: &str, default: String) -> String { std::env::var(name).unwrap_or(default) }

fn secs_var(name: &str, default: Duration) -> Duration {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).map(Duration::from_secs).unwrap_or(default)
}
