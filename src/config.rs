//! Configuration for beatchain.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (BEATCHAIN_*, PINATA_*)
//! 2. Config file (.beatchain/config.yaml)
//! 3. Defaults
//!
//! Config file discovery:
//! - BEATCHAIN_CONFIG names the file explicitly
//! - Otherwise searches current directory and parents for .beatchain/config.yaml
//! - Falls back to ~/.beatchain/config.yaml
//!
//! Credentials are only ever read from the environment.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::adapters::pinata::{DEFAULT_API_URL, DEFAULT_GATEWAY_URL};
use crate::adapters::PinataCredentials;
use crate::core::{AdmissionPolicy, RetryPolicy};
use crate::error::Error;

pub const DEFAULT_BIND: &str = "0.0.0.0:3000";
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

const CONFIG_DIR: &str = ".beatchain";
const CONFIG_FILE: &str = "config.yaml";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub ledger: LedgerSection,
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
    #[serde(default)]
    pub admission: Option<AdmissionPolicy>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerSection {
    pub bind: Option<String>,
    pub max_upload_bytes: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreSection {
    pub api_url: Option<String>,
    pub gateway_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LedgerSection {
    pub rpc_url: Option<String>,
    pub contract_address: Option<String>,
}

/// Content store settings
#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub api_url: String,
    pub gateway_url: String,
    pub credentials: Option<PinataCredentials>,
}

/// Ledger settings
#[derive(Debug, Clone, Default)]
pub struct LedgerSettings {
    pub rpc_url: Option<String>,
    pub contract_address: Option<String>,
}

/// Resolved configuration
#[derive(Debug, Clone)]
pub struct Settings {
    pub bind_address: String,
    pub max_upload_bytes: usize,
    pub store: StoreSettings,
    pub ledger: LedgerSettings,
    pub retry: RetryPolicy,
    pub admission: AdmissionPolicy,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self> {
        let config_file = match env_var(&|key: &str| std::env::var(key).ok(), "BEATCHAIN_CONFIG") {
            Some(path) => Some(PathBuf::from(path)),
            None => std::env::current_dir()
                .ok()
                .and_then(|cwd| find_config_file(&cwd))
                .or_else(home_config_file),
        };

        let file = match &config_file {
            Some(path) => load_config_file(path)?,
            None => ConfigFile::default(),
        };

        Ok(Self::resolve(file, config_file, &|key: &str| std::env::var(key).ok()))
    }

    /// Layer environment values over a parsed config file
    pub fn resolve(
        file: ConfigFile,
        config_file: Option<PathBuf>,
        env: &dyn Fn(&str) -> Option<String>,
    ) -> Self {
        let bind_address = env_var(env, "BEATCHAIN_BIND")
            .or(file.server.bind)
            .unwrap_or_else(|| DEFAULT_BIND.to_string());

        let store = StoreSettings {
            api_url: env_var(env, "PINATA_API_URL")
                .or(file.store.api_url)
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            gateway_url: env_var(env, "PINATA_GATEWAY_URL")
                .or(file.store.gateway_url)
                .unwrap_or_else(|| DEFAULT_GATEWAY_URL.to_string()),
            credentials: credentials_from_env(env),
        };

        let ledger = LedgerSettings {
            rpc_url: env_var(env, "BEATCHAIN_RPC_URL").or(file.ledger.rpc_url),
            contract_address: env_var(env, "BEATCHAIN_CONTRACT_ADDRESS")
                .or(file.ledger.contract_address),
        };

        Self {
            bind_address,
            max_upload_bytes: file
                .server
                .max_upload_bytes
                .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
            store,
            ledger,
            retry: file.retry.unwrap_or_default(),
            admission: file.admission.unwrap_or_default(),
            config_file,
        }
    }

    /// Pinata credentials, or a configuration error naming the missing keys
    pub fn pinata_credentials(&self) -> crate::Result<&PinataCredentials> {
        self.store.credentials.as_ref().ok_or_else(|| {
            Error::Configuration(
                "Pinata credentials are not set \
                 (PINATA_JWT or PINATA_API_KEY and PINATA_SECRET_API_KEY)"
                    .to_string(),
            )
        })
    }

    /// RPC URL and contract address, or a configuration error
    pub fn ledger_endpoint(&self) -> crate::Result<(&str, &str)> {
        match (&self.ledger.rpc_url, &self.ledger.contract_address) {
            (Some(rpc_url), Some(contract)) => Ok((rpc_url.as_str(), contract.as_str())),
            (None, _) => Err(Error::Configuration(
                "ledger RPC endpoint is not set (BEATCHAIN_RPC_URL)".to_string(),
            )),
            (_, None) => Err(Error::Configuration(
                "contract address is not set (BEATCHAIN_CONTRACT_ADDRESS)".to_string(),
            )),
        }
    }
}

/// Non-empty environment value
fn env_var(env: &dyn Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    env(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn credentials_from_env(env: &dyn Fn(&str) -> Option<String>) -> Option<PinataCredentials> {
    if let Some(jwt) = env_var(env, "PINATA_JWT") {
        return Some(PinataCredentials::Jwt(jwt));
    }

    match (
        env_var(env, "PINATA_API_KEY"),
        env_var(env, "PINATA_SECRET_API_KEY"),
    ) {
        (Some(api_key), Some(secret)) => Some(PinataCredentials::KeyPair { api_key, secret }),
        _ => None,
    }
}

/// Find config file by searching `start` and its parents
fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(CONFIG_DIR).join(CONFIG_FILE);
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

fn home_config_file() -> Option<PathBuf> {
    let path = dirs::home_dir()?.join(CONFIG_DIR).join(CONFIG_FILE);
    path.exists().then_some(path)
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::TempDir;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_file() {
        let settings = Settings::resolve(ConfigFile::default(), None, &env_of(&[]));

        assert_eq!(settings.bind_address, DEFAULT_BIND);
        assert_eq!(settings.max_upload_bytes, DEFAULT_MAX_UPLOAD_BYTES);
        assert_eq!(settings.store.api_url, DEFAULT_API_URL);
        assert_eq!(settings.retry, RetryPolicy::default());
        assert!(!settings.admission.allow_self_collaboration);
        assert!(settings.pinata_credentials().is_err());
        assert!(settings.ledger_endpoint().is_err());
    }

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let config_dir = temp.path().join(CONFIG_DIR);
        std::fs::create_dir_all(&config_dir).unwrap();

        let config_path = config_dir.join(CONFIG_FILE);
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(
            file,
            r#"
server:
  bind: 127.0.0.1:4000
  max_upload_bytes: 1024
ledger:
  rpc_url: http://localhost:8545
  contract_address: "0x5FbDB2315678afecb367f032d93F642f64180aa3"
retry:
  max_attempts: 5
admission:
  allow_self_collaboration: true
  expected_format:
    sample_rate: 44100
    channels: 2
"#
        )
        .unwrap();

        let config = load_config_file(&config_path).unwrap();
        let settings = Settings::resolve(config, Some(config_path), &env_of(&[]));

        assert_eq!(settings.bind_address, "127.0.0.1:4000");
        assert_eq!(settings.max_upload_bytes, 1024);
        assert_eq!(settings.retry.max_attempts, 5);
        assert_eq!(settings.retry.initial_delay_ms, 500);
        assert!(settings.admission.allow_self_collaboration);
        assert_eq!(
            settings.admission.expected_format.map(|f| f.sample_rate),
            Some(44_100)
        );
        assert_eq!(
            settings.ledger_endpoint().unwrap(),
            ("http://localhost:8545", "0x5FbDB2315678afecb367f032d93F642f64180aa3")
        );
    }

    #[test]
    fn test_env_overrides_file() {
        let file = ConfigFile {
            server: ServerSection {
                bind: Some("127.0.0.1:4000".to_string()),
                max_upload_bytes: None,
            },
            ledger: LedgerSection {
                rpc_url: Some("http://file:8545".to_string()),
                contract_address: None,
            },
            ..Default::default()
        };

        let env = env_of(&[
            ("BEATCHAIN_BIND", "0.0.0.0:8080"),
            ("BEATCHAIN_RPC_URL", "http://env:8545"),
            ("PINATA_GATEWAY_URL", "http://localhost:8080"),
            ("BEATCHAIN_CONTRACT_ADDRESS", "  "),
        ]);
        let settings = Settings::resolve(file, None, &env);

        assert_eq!(settings.bind_address, "0.0.0.0:8080");
        assert_eq!(settings.ledger.rpc_url.as_deref(), Some("http://env:8545"));
        assert_eq!(settings.store.gateway_url, "http://localhost:8080");
        // blank values count as unset
        assert!(settings.ledger.contract_address.is_none());
    }

    #[test]
    fn test_credentials_selection() {
        let jwt = Settings::resolve(
            ConfigFile::default(),
            None,
            &env_of(&[("PINATA_JWT", "token"), ("PINATA_API_KEY", "key")]),
        );
        assert_eq!(
            jwt.pinata_credentials().unwrap(),
            &PinataCredentials::Jwt("token".to_string())
        );

        let pair = Settings::resolve(
            ConfigFile::default(),
            None,
            &env_of(&[("PINATA_API_KEY", "key"), ("PINATA_SECRET_API_KEY", "secret")]),
        );
        assert!(matches!(
            pair.pinata_credentials().unwrap(),
            PinataCredentials::KeyPair { .. }
        ));

        let half = Settings::resolve(
            ConfigFile::default(),
            None,
            &env_of(&[("PINATA_API_KEY", "key")]),
        );
        let err = half.pinata_credentials().unwrap_err();
        assert!(err.to_string().contains("PINATA_SECRET_API_KEY"));
    }

    #[test]
    fn test_find_config_file_in_parent() {
        let temp = TempDir::new().unwrap();
        let config_dir = temp.path().join(CONFIG_DIR);
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(config_dir.join(CONFIG_FILE), "{}").unwrap();

        let nested = temp.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        assert_eq!(
            find_config_file(&nested),
            Some(config_dir.join(CONFIG_FILE))
        );
    }

    #[test]
    fn test_invalid_file_reports_path() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yaml");
        std::fs::write(&path, "server: [not, a, map]").unwrap();

        let err = load_config_file(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("config.yaml"));
    }
}
