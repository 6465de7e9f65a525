//! tcapd: time-capsule sweep daemon
//!
//! Usage:
//!   tcapd [--config /etc/tcap/config.toml] [--events-file events.txt] [--once]
//!
//! Each sweep purges capsules past their self-destruct deadline, then
//! delivers every scheduled capsule whose conditions are met.

mod daemon;
mod metrics;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tcap_core::{GeoPoint, TcapConfig};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "tcapd", version, about = "Time-capsule sweep daemon")]
struct Cli {
    /// Path to tcap.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "TCAP_CONFIG",
        default_value = "/etc/tcap/config.toml"
    )]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long, env = "TCAP_LOG")]
    log: Option<String>,

    /// Log format; overrides the config file
    #[arg(long, env = "TCAP_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    /// File listing confirmed event ids, one per line (re-read every sweep)
    #[arg(long)]
    events_file: Option<PathBuf>,

    /// Fixed position of this host as "LAT,LON", for location conditions
    #[arg(long, value_parser = parse_position)]
    position: Option<GeoPoint>,

    /// Run a single sweep and exit
    #[arg(long)]
    once: bool,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = TcapConfig::load_or_default(&cli.config)
        .with_context(|| format!("loading config {}", cli.config.display()))?;

    let level = cli.log.as_deref().unwrap_or(&config.daemon.log_level);
    let format = cli.log_format.clone().unwrap_or(
        if config.daemon.log_format.eq_ignore_ascii_case("text") {
            LogFormat::Text
        } else {
            LogFormat::Json
        },
    );
    init_logging(level, &format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "tcapd starting"
    );

    let opts = daemon::Options {
        events_file: cli.events_file,
        position: cli.position,
        once: cli.once,
    };
    daemon::run(config, opts).await
}

fn parse_position(s: &str) -> Result<GeoPoint, String> {
    let (lat, lon) = s
        .split_once(',')
        .ok_or_else(|| format!("expected LAT,LON, got {s:?}"))?;
    let latitude: f64 = lat.trim().parse().map_err(|e| format!("latitude: {e}"))?;
    let longitude: f64 = lon.trim().parse().map_err(|e| format!("longitude: {e}"))?;
    if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
        return Err(format!("coordinates out of range: {s}"));
    }
    Ok(GeoPoint {
        latitude,
        longitude,
    })
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_position() {
        let p = parse_position("48.85, 2.35").unwrap();
        assert_eq!(p.latitude, 48.85);
        assert_eq!(p.longitude, 2.35);
        assert!(parse_position("48.85").is_err());
        assert!(parse_position("91,0").is_err());
        assert!(parse_position("x,y").is_err());
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::parse_from([
            "tcapd",
            "--config",
            "/tmp/tcap.toml",
            "--once",
            "--log-format",
            "text",
        ]);
        assert!(cli.once);
        assert_eq!(cli.config, PathBuf::from("/tmp/tcap.toml"));
        assert!(matches!(cli.log_format, Some(LogFormat::Text)));
    }
}
