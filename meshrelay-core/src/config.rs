//! Runtime-tunable constants for the router, outbox, delivery tracker, and
//! lifecycle controller.
//!
//! Every field has a sensible compiled default; a `[router]`/`[lifecycle]`
//! TOML file can override them, file beats compiled default. There is no
//! CLI layer here since this crate exposes a library surface, not a binary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::outbox;
use crate::peer::STALE_VISIBILITY_MS;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// Could not determine the user's config directory.
    #[error("could not determine config directory (no HOME or XDG_CONFIG_HOME)")]
    NoConfigDir,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    router: RouterFileConfig,
    lifecycle: LifecycleFileConfig,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct RouterFileConfig {
    resend_cooldown_secs: Option<u64>,
    outbox_ttl_hours: Option<u64>,
    outbox_capacity_per_peer: Option<usize>,
    relay_receipt_rate_per_sec: Option<u32>,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct LifecycleFileConfig {
    outbox_cleanup_secs: Option<u64>,
    tracker_cleanup_secs: Option<u64>,
    relay_health_secs: Option<u64>,
    periodic_flush_secs: Option<u64>,
    peer_prune_secs: Option<u64>,
}

/// Outbox/flush tunables the router consults on every send decision.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Minimum time between resend attempts for an unconfirmed message.
    pub resend_cooldown: Duration,
    /// How long a queued message may live before it expires.
    pub outbox_ttl: Duration,
    /// Maximum live messages retained per recipient.
    pub outbox_capacity_per_peer: usize,
    /// Outbound read-receipt rate limit on the relay transport
    /// (receipts/second), to avoid relay bans.
    pub relay_receipt_rate_per_sec: u32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            resend_cooldown: Duration::from_millis(outbox::RESEND_COOLDOWN_MS),
            outbox_ttl: Duration::from_millis(outbox::TTL_MS),
            outbox_capacity_per_peer: outbox::CAPACITY_PER_PEER,
            relay_receipt_rate_per_sec: 3,
        }
    }
}

/// Timer intervals the lifecycle controller schedules at startup.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// How often expired outbox entries are purged.
    pub outbox_cleanup: Duration,
    /// How often delivery records/suppression sets are garbage-collected.
    pub tracker_cleanup: Duration,
    /// How often the relay's SOCKS-proxied reachability is probed.
    pub relay_health: Duration,
    /// How often a safety-net `flush_all` runs regardless of connectivity
    /// events.
    pub periodic_flush: Duration,
    /// How often stale per-transport peer visibility is pruned.
    pub peer_prune: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            outbox_cleanup: Duration::from_secs(60),
            tracker_cleanup: Duration::from_secs(60),
            relay_health: Duration::from_secs(10),
            periodic_flush: Duration::from_secs(30),
            peer_prune: Duration::from_millis(STALE_VISIBILITY_MS).min(Duration::from_secs(60)),
        }
    }
}

/// Fully resolved configuration for a [`crate::core::Core`].
#[derive(Debug, Clone, Default)]
pub struct CoreConfig {
    /// Router/outbox tunables.
    pub router: RouterConfig,
    /// Lifecycle controller timer intervals.
    pub lifecycle: LifecycleConfig,
}

impl CoreConfig {
    /// Loads configuration by merging an optional TOML file over compiled
    /// defaults.
    ///
    /// If `explicit_path` is `Some`, the file must exist. If `None`, the
    /// default path (`~/.config/meshrelay/config.toml`) is tried and a
    /// missing file silently falls back to defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if an explicit path cannot be read, or the
    /// file (explicit or default) cannot be parsed as TOML.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = load_config_file(explicit_path)?;
        Ok(Self::resolve(&file))
    }

    fn resolve(file: &ConfigFile) -> Self {
        let defaults = Self::default();
        Self {
            router: RouterConfig {
                resend_cooldown: file
                    .router
                    .resend_cooldown_secs
                    .map_or(defaults.router.resend_cooldown, Duration::from_secs),
                outbox_ttl: file
                    .router
                    .outbox_ttl_hours
                    .map_or(defaults.router.outbox_ttl, |h| Duration::from_secs(h * 3_600)),
                outbox_capacity_per_peer: file
                    .router
                    .outbox_capacity_per_peer
                    .unwrap_or(defaults.router.outbox_capacity_per_peer),
                relay_receipt_rate_per_sec: file
                    .router
                    .relay_receipt_rate_per_sec
                    .unwrap_or(defaults.router.relay_receipt_rate_per_sec),
            },
            lifecycle: LifecycleConfig {
                outbox_cleanup: file
                    .lifecycle
                    .outbox_cleanup_secs
                    .map_or(defaults.lifecycle.outbox_cleanup, Duration::from_secs),
                tracker_cleanup: file
                    .lifecycle
                    .tracker_cleanup_secs
                    .map_or(defaults.lifecycle.tracker_cleanup, Duration::from_secs),
                relay_health: file
                    .lifecycle
                    .relay_health_secs
                    .map_or(defaults.lifecycle.relay_health, Duration::from_secs),
                periodic_flush: file
                    .lifecycle
                    .periodic_flush_secs
                    .map_or(defaults.lifecycle.periodic_flush, Duration::from_secs),
                peer_prune: file
                    .lifecycle
                    .peer_prune_secs
                    .map_or(defaults.lifecycle.peer_prune, Duration::from_secs),
            },
        }
    }
}

fn load_config_file(explicit_path: Option<&Path>) -> Result<ConfigFile, ConfigError> {
    if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    }

    let Some(config_dir) = dirs::config_dir() else {
        return Ok(ConfigFile::default());
    };
    let path = config_dir.join("meshrelay").join("config.toml");
    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
