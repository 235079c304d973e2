use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use secrecy::SecretString;
use serde::Deserialize;

use crate::error::CertError;
use crate::issuance::IssuanceSettings;
use crate::pfx_key::DEFAULT_KDF_ROUNDS;
use crate::store_key::{validate_key_size, DEFAULT_KEY_SIZE};

/// Generate RSA certificates signed by a common self-signed CA.
#[derive(Debug, Parser)]
#[command(name = "quickcert", version)]
pub struct Cli {
    /// Optional TOML configuration file; command line values take precedence
    #[arg(short = 'c', long, env = "QUICKCERT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Location of certificates output [default: .]
    #[arg(short = 'o', long)]
    pub output_dir: Option<PathBuf>,

    /// RSA key size used for all certificates (1024-8192) [default: 2048]
    #[arg(short = 'k', long)]
    pub key_size: Option<u32>,

    /// Number of KDF rounds for .pfx files [default: 50000]
    #[arg(long)]
    pub kdf_rounds: Option<u32>,

    /// Server certificate covering these domains or IP addresses (space or
    /// comma separated); the first one is the CN. Repeat for more certificates.
    #[arg(
        short = 'D',
        long = "domains",
        value_name = "NAME",
        num_args = 1..,
        action = ArgAction::Append
    )]
    pub domains: Vec<Vec<String>>,

    /// Client certificate with this name. Repeat for more certificates.
    #[arg(short = 'C', long = "client", value_name = "NAME")]
    pub clients: Vec<String>,

    /// Password for newly generated .pfx files [default: password]
    #[arg(short = 'P', long)]
    pub password: Option<String>,

    /// Serve certificates over HTTP
    #[arg(short = 'S', long = "server")]
    pub serve: bool,

    /// Port to serve on [default: 8080]
    #[arg(short = 'p', long)]
    pub port: Option<u16>,

    /// Address to bind when serving [default: 0.0.0.0]
    #[arg(long)]
    pub bind: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_key_size")]
    pub key_size: u32,
    #[serde(default = "default_kdf_rounds")]
    pub kdf_rounds: u32,
    #[serde(default = "default_password")]
    pub password: SecretString,
    /// Server name-groups, first name of each group is the CN
    #[serde(default)]
    pub domains: Vec<Vec<String>>,
    #[serde(default)]
    pub clients: Vec<String>,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_server_host")]
    pub host: String,
    #[serde(default = "default_server_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_server_host(),
            port: default_server_port(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            key_size: default_key_size(),
            kdf_rounds: default_kdf_rounds(),
            password: default_password(),
            domains: Vec::new(),
            clients: Vec::new(),
            server: ServerConfig::default(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_key_size() -> u32 {
    DEFAULT_KEY_SIZE
}

fn default_kdf_rounds() -> u32 {
    DEFAULT_KDF_ROUNDS
}

fn default_password() -> SecretString {
    SecretString::new("password".to_string())
}

fn default_server_host() -> String {
    "0.0.0.0".to_string()
}

fn default_server_port() -> u16 {
    8080
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let config_str = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: AppConfig =
            toml::from_str(&config_str).context("Failed to parse config file")?;

        Ok(config)
    }

    /// Build the effective configuration: file (if any), then command line
    /// overrides, then validation.
    pub fn resolve(cli: Cli) -> Result<Self> {
        let mut config = match &cli.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_cli(cli);
        config.normalize_names();
        config.validate()?;
        Ok(config)
    }

    fn apply_cli(&mut self, cli: Cli) {
        if let Some(output_dir) = cli.output_dir {
            self.output_dir = output_dir;
        }
        if let Some(key_size) = cli.key_size {
            self.key_size = key_size;
        }
        if let Some(kdf_rounds) = cli.kdf_rounds {
            self.kdf_rounds = kdf_rounds;
        }
        if let Some(password) = cli.password {
            self.password = SecretString::new(password);
        }
        self.domains.extend(cli.domains);
        self.clients.extend(cli.clients);
        self.server.enabled |= cli.serve;
        if let Some(port) = cli.port {
            self.server.port = port;
        }
        if let Some(host) = cli.bind {
            self.server.host = host;
        }
    }

    /// Split comma joined entries and trim every name, so the identity used
    /// for issuance is exactly what validation saw.
    fn normalize_names(&mut self) {
        for group in &mut self.domains {
            *group = group.iter().flat_map(|names| split_names(names)).collect();
        }
        for client in &mut self.clients {
            *client = client.trim().to_string();
        }
    }

    /// Reject settings that cannot produce valid artifacts. Runs before any
    /// file is touched.
    pub fn validate(&self) -> std::result::Result<(), CertError> {
        validate_key_size(self.key_size)?;
        if let Some(group) = self.domains.iter().find(|group| group.is_empty()) {
            return Err(CertError::InvalidConfiguration(format!(
                "empty server name group {:?}",
                group
            )));
        }
        if self.clients.iter().any(|client| client.is_empty()) {
            return Err(CertError::InvalidConfiguration(
                "client name must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn issuance_settings(&self) -> IssuanceSettings {
        IssuanceSettings {
            key_size: self.key_size,
            kdf_rounds: self.kdf_rounds,
            password: self.password.clone(),
        }
    }
}

fn split_names(group: &str) -> Vec<String> {
    group
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}
