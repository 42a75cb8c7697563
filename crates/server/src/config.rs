//! Command-line and environment configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::pending::clamp_speed;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DedupStoreKind {
    /// Process-local, forgotten on restart
    Memory,
    /// SQLite file under the data dir, survives restarts
    Sqlite,
}

#[derive(Parser, Debug)]
#[command(
    name = "donebell",
    version,
    about = "Deduplicated completion notifications for background agents"
)]
pub struct Args {
    /// Address for the HTTP/WebSocket listener
    #[arg(long, env = "DONEBELL_BIND", default_value = "127.0.0.1:4100")]
    pub bind: SocketAddr,

    /// Data directory (defaults to ~/.donebell)
    #[arg(long, env = "DONEBELL_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Minimum spacing between accepted completion signals per source
    #[arg(long, env = "DONEBELL_DEBOUNCE_SECS", default_value_t = 10)]
    pub debounce_secs: u64,

    /// How long identical content stays suppressed per source
    #[arg(long, env = "DONEBELL_DEDUP_TTL_SECS", default_value_t = 30)]
    pub dedup_ttl_secs: u64,

    /// Speech rate used when no pending command supplies one
    #[arg(long, env = "DONEBELL_DEFAULT_SPEED", default_value_t = 1.0)]
    pub default_speed: f32,

    /// Pub/sub channel the enrichment pipeline publishes results on
    #[arg(
        long,
        env = "DONEBELL_RESULT_CHANNEL",
        default_value = "donebell:enrichment_results"
    )]
    pub result_channel: String,

    /// Base URL of the enrichment pipeline's task API
    #[arg(long, env = "DONEBELL_ENRICHMENT_URL")]
    pub enrichment_url: Option<String>,

    /// Timeout for a single enrichment submission
    #[arg(long, env = "DONEBELL_ENRICHMENT_TIMEOUT_SECS", default_value_t = 10)]
    pub enrichment_timeout_secs: u64,

    /// Backing store for content dedup
    #[arg(long, env = "DONEBELL_DEDUP_STORE", value_enum, default_value_t = DedupStoreKind::Sqlite)]
    pub dedup_store: DedupStoreKind,
}

/// Validated runtime settings.
#[derive(Debug, Clone)]
pub struct NotifierConfig {
    pub bind: SocketAddr,
    pub debounce_window: Duration,
    pub dedup_ttl: Duration,
    pub default_speed: f32,
    pub result_channel: String,
    pub enrichment_url: Option<String>,
    pub enrichment_timeout: Duration,
    pub dedup_store: DedupStoreKind,
}

impl From<&Args> for NotifierConfig {
    fn from(args: &Args) -> Self {
        Self {
            bind: args.bind,
            debounce_window: Duration::from_secs(args.debounce_secs),
            dedup_ttl: Duration::from_secs(args.dedup_ttl_secs.max(1)),
            default_speed: clamp_speed(args.default_speed),
            result_channel: args.result_channel.clone(),
            enrichment_url: args
                .enrichment_url
                .as_deref()
                .map(str::trim)
                .filter(|url| !url.is_empty())
                .map(str::to_string),
            enrichment_timeout: Duration::from_secs(args.enrichment_timeout_secs.max(1)),
            dedup_store: args.dedup_store,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_keep_windows_independent() {
        let args = Args::try_parse_from(["donebell"]).unwrap();
        let config = NotifierConfig::from(&args);

        assert_eq!(config.debounce_window, Duration::from_secs(10));
        assert_eq!(config.dedup_ttl, Duration::from_secs(30));
        assert_eq!(config.default_speed, 1.0);
        assert_eq!(config.dedup_store, DedupStoreKind::Sqlite);
        assert!(config.enrichment_url.is_none());
    }

    #[test]
    fn flags_override_and_sanitize() {
        let args = Args::try_parse_from([
            "donebell",
            "--debounce-secs",
            "3",
            "--dedup-ttl-secs",
            "60",
            "--default-speed",
            "4.0",
            "--enrichment-url",
            "  ",
            "--dedup-store",
            "memory",
        ])
        .unwrap();
        let config = NotifierConfig::from(&args);

        assert_eq!(config.debounce_window, Duration::from_secs(3));
        assert_eq!(config.dedup_ttl, Duration::from_secs(60));
        assert_eq!(config.default_speed, 2.0);
        assert!(config.enrichment_url.is_none());
        assert_eq!(config.dedup_store, DedupStoreKind::Memory);
    }
}
