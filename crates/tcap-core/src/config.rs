use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tcap_crypto::KdfParams;

use crate::error::{CapsuleError, CapsuleResult};

/// Top-level configuration (loaded from tcap.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TcapConfig {
    pub daemon: DaemonConfig,
    pub store: StoreConfig,
    pub crypto: CryptoConfig,
    pub identity: IdentityConfig,
}

impl TcapConfig {
    /// Read and parse a TOML config file.
    pub fn load(path: &Path) -> CapsuleResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&raw)
            .map_err(|e| CapsuleError::Config(format!("{}: {e}", path.display())))?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Like [`TcapConfig::load`], but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> CapsuleResult<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            Ok(Self::default())
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Log level (default: info)
    pub log_level: String,
    /// Log format: "json" or "text"
    pub log_format: String,
    /// Seconds between delivery / self-destruct sweeps
    pub sweep_interval_secs: u64,
    /// Prometheus metrics endpoint (default: 127.0.0.1:9101)
    pub metrics_addr: Option<String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            log_format: "json".into(),
            sweep_interval_secs: 60,
            metrics_addr: Some("127.0.0.1:9101".into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON capsule store
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("~/.local/share/tcap/capsules.json"),
        }
    }
}

/// Argon2id parameters for password conditions and identity backups
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Argon2id memory cost in KiB (default: 65536 = 64 MiB)
    pub argon2_mem_cost_kib: u32,
    /// Argon2id time cost (iterations, default: 3)
    pub argon2_time_cost: u32,
    /// Argon2id parallelism (default: 4)
    pub argon2_parallelism: u32,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        let params = KdfParams::default();
        Self {
            argon2_mem_cost_kib: params.mem_cost_kib,
            argon2_time_cost: params.time_cost,
            argon2_parallelism: params.parallelism,
        }
    }
}

impl CryptoConfig {
    pub fn kdf_params(&self) -> KdfParams {
        KdfParams {
            mem_cost_kib: self.argon2_mem_cost_kib,
            time_cost: self.argon2_time_cost,
            parallelism: self.argon2_parallelism,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Identity file holding the age secret key
    pub key_file: PathBuf,
    /// User id this identity acts as
    pub user_id: Option<String>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            key_file: PathBuf::from("~/.config/tcap/identity.txt"),
            user_id: None,
        }
    }
}

/// Expand a leading `~/` using `$HOME`.
pub fn expand_tilde(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match std::env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[daemon]
log_level = "debug"
log_format = "text"
sweep_interval_secs = 5
metrics_addr = "0.0.0.0:9200"

[store]
path = "/var/lib/tcap/capsules.json"

[crypto]
argon2_mem_cost_kib = 131072
argon2_time_cost = 4
argon2_parallelism = 8

[identity]
key_file = "/etc/tcap/alice.key"
user_id = "alice"
"#;
        let config: TcapConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(config.daemon.log_level, "debug");
        assert_eq!(config.daemon.sweep_interval_secs, 5);
        assert_eq!(config.daemon.metrics_addr.as_deref(), Some("0.0.0.0:9200"));
        assert_eq!(
            config.store.path,
            PathBuf::from("/var/lib/tcap/capsules.json")
        );
        assert_eq!(config.crypto.kdf_params().mem_cost_kib, 131072);
        assert_eq!(config.crypto.kdf_params().parallelism, 8);
        assert_eq!(config.identity.user_id.as_deref(), Some("alice"));
    }

    #[test]
    fn test_parse_defaults() {
        let config: TcapConfig = toml::from_str("").unwrap();

        assert_eq!(config.daemon.log_level, "info");
        assert_eq!(config.daemon.log_format, "json");
        assert_eq!(config.daemon.sweep_interval_secs, 60);
        assert_eq!(config.crypto.kdf_params(), KdfParams::default());
        assert!(config.identity.user_id.is_none());
    }

    #[test]
    fn test_parse_partial_config() {
        let toml_str = r#"
[daemon]
sweep_interval_secs = 10
"#;
        let config: TcapConfig = toml::from_str(toml_str).unwrap();

        // Overridden
        assert_eq!(config.daemon.sweep_interval_secs, 10);
        // Defaults
        assert_eq!(config.daemon.log_level, "info");
        assert_eq!(config.crypto.argon2_time_cost, 3);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[store]\npath = \"/tmp/capsules.json\"").unwrap();

        let config = TcapConfig::load(file.path()).unwrap();
        assert_eq!(config.store.path, PathBuf::from("/tmp/capsules.json"));
    }

    #[test]
    fn test_load_rejects_bad_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[daemon\nlog_level = ").unwrap();

        assert!(matches!(
            TcapConfig::load(file.path()),
            Err(CapsuleError::Config(_))
        ));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = TcapConfig::load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.daemon.sweep_interval_secs, 60);
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = TcapConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: TcapConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.store.path, parsed.store.path);
        assert_eq!(config.daemon.metrics_addr, parsed.daemon.metrics_addr);
    }

    #[test]
    fn test_expand_tilde() {
        let plain = Path::new("/abs/path");
        assert_eq!(expand_tilde(plain), PathBuf::from("/abs/path"));
        if let Some(home) = std::env::var_os("HOME") {
            assert_eq!(
                expand_tilde(Path::new("~/x.json")),
                PathBuf::from(home).join("x.json")
            );
        }
    }
}
