//! Environment-driven configuration for the core.
//!
//! The host process (out of this crate's scope) owns the actual file-based
//! config loader; what lives here is the small slice of tunables the core
//! itself reads directly, per the environment variables named in the
//! external-interfaces section of the design: temp directory, lock attempt
//! bound, allocator/shard hint, proxy settings and object-store endpoint
//! override, and the log-level selector consumed by whatever `tracing`
//! subscriber the host installs.

use std::env;
use std::path::PathBuf;

const ENV_TEMP_DIR: &str = "SAMYAMA_TEMP_DIR";
const ENV_MAX_LOCK_ATTEMPTS: &str = "SAMYAMA_MAX_LOCK_ATTEMPTS";
const ENV_ALLOCATOR_COUNT: &str = "SAMYAMA_ALLOCATOR_COUNT";
const ENV_HTTP_PROXY_HOST: &str = "SAMYAMA_HTTP_PROXY_HOST";
const ENV_HTTP_PROXY_PORT: &str = "SAMYAMA_HTTP_PROXY_PORT";
const ENV_HTTP_PROXY_SCHEME: &str = "SAMYAMA_HTTP_PROXY_SCHEME";
const ENV_OBJECT_STORE_ENDPOINT: &str = "SAMYAMA_OBJECT_STORE_ENDPOINT";
const ENV_LOG_LEVEL: &str = "SAMYAMA_LOG_LEVEL";

/// Proxy settings for the remote media HTTP stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpProxyConfig {
    pub host: String,
    pub port: u16,
    pub scheme: String,
}

/// Process-wide tunables, constructed once and threaded through explicitly
/// (never stashed in a `static`) so the core stays usable from tests without
/// process-level init/teardown ceremony.
#[derive(Debug, Clone)]
pub struct Config {
    pub temp_dir: PathBuf,
    pub max_lock_attempts: u32,
    pub allocator_count: usize,
    pub http_proxy: Option<HttpProxyConfig>,
    pub object_store_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Read configuration from the process environment, falling back to
    /// sensible defaults for anything unset.
    pub fn from_env() -> Self {
        let temp_dir = env::var(ENV_TEMP_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| env::temp_dir());

        let max_lock_attempts = env::var(ENV_MAX_LOCK_ATTEMPTS)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(crate::rwlock::MAX_ATTEMPTS);

        let allocator_count = env::var(ENV_ALLOCATOR_COUNT)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1);

        let http_proxy = env::var(ENV_HTTP_PROXY_HOST).ok().map(|host| HttpProxyConfig {
            host,
            port: env::var(ENV_HTTP_PROXY_PORT)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8080),
            scheme: env::var(ENV_HTTP_PROXY_SCHEME).unwrap_or_else(|_| "http".to_string()),
        });

        let object_store_endpoint = env::var(ENV_OBJECT_STORE_ENDPOINT).ok();
        let log_level = env::var(ENV_LOG_LEVEL).unwrap_or_else(|_| "info".to_string());

        Config {
            temp_dir,
            max_lock_attempts,
            allocator_count,
            http_proxy,
            object_store_endpoint,
            log_level,
        }
    }

    /// Install a `tracing` subscriber at the configured log level. Idempotent
    /// in the sense that a second call is a harmless no-op (the global
    /// default can only be set once per process).
    pub fn init_tracing(&self) {
        let filter = tracing_subscriber::EnvFilter::try_new(&self.log_level)
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            temp_dir: env::temp_dir(),
            max_lock_attempts: crate::rwlock::MAX_ATTEMPTS,
            allocator_count: 1,
            http_proxy: None,
            object_store_endpoint: None,
            log_level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable() {
        let cfg = Config::default();
        assert_eq!(cfg.allocator_count, 1);
        assert!(cfg.http_proxy.is_none());
    }
}
