use std::fs;
use std::net::SocketAddr;

use serde::Serialize;
use thiserror::Error;

use crate::crypto::{Decryptor, KeyLoadError};
use crate::limiter::RateLimitConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("RSA_PRIVATE_KEY or RSA_PRIVATE_KEY_FILE must be set")]
    MissingPrivateKey,
    #[error("failed to read {var} from {path}: {source}")]
    SecretFile {
        var: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid RSA private key: {0}")]
    PrivateKey(#[from] KeyLoadError),
    #[error("invalid {var} value '{value}': expected a positive integer")]
    InvalidNumber { var: &'static str, value: String },
    #[error("invalid bind address '{0}'")]
    InvalidBindAddress(String),
}

/// Everything the process needs before it may serve traffic.
#[derive(Debug)]
pub struct GatewayConfig {
    pub sqlite_path: String,
    pub server_host: String,
    pub server_port: u16,
    pub rate_limit: RateLimitConfig,
    pub decryptor: Decryptor,
}

/// Loggable view of [`GatewayConfig`]; the key material is left out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigSummary {
    pub sqlite_path: String,
    pub server_host: String,
    pub server_port: u16,
    pub decrypts_allowed_per_period: u32,
    pub period_in_seconds: u32,
    pub ciphertext_bytes: usize,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let pem = match read("RSA_PRIVATE_KEY_FILE") {
            Some(path) => fs::read_to_string(&path).map_err(|source| ConfigError::SecretFile {
                var: "RSA_PRIVATE_KEY_FILE",
                path,
                source,
            })?,
            None => read("RSA_PRIVATE_KEY").ok_or(ConfigError::MissingPrivateKey)?,
        };
        let decryptor = Decryptor::from_pem(&pem)?;

        let allowed = positive(&read, "DECRYPTS_PER_PERIOD", 100)?;
        let period_seconds = positive(&read, "PERIOD_IN_SECONDS", 600)?;
        let server_port = read("SERVER_PORT")
            .map(|value| {
                value
                    .parse::<u16>()
                    .map_err(|_| ConfigError::InvalidNumber {
                        var: "SERVER_PORT",
                        value,
                    })
            })
            .transpose()?
            .unwrap_or(80);

        Ok(Self {
            sqlite_path: read("SQLITE_FILEPATH").unwrap_or_else(|| "opsep.db".to_string()),
            server_host: read("SERVER_HOST").unwrap_or_else(|| "localhost".to_string()),
            server_port,
            rate_limit: RateLimitConfig {
                allowed,
                period_seconds,
            },
            decryptor,
        })
    }

    pub fn bind_address(&self) -> Result<SocketAddr, ConfigError> {
        let host = if self.server_host == "localhost" {
            "127.0.0.1"
        } else {
            self.server_host.as_str()
        };
        format!("{}:{}", host, self.server_port)
            .parse()
            .map_err(|_| ConfigError::InvalidBindAddress(self.server_host.clone()))
    }

    pub fn summary(&self) -> ConfigSummary {
        ConfigSummary {
            sqlite_path: self.sqlite_path.clone(),
            server_host: self.server_host.clone(),
            server_port: self.server_port,
            decrypts_allowed_per_period: self.rate_limit.allowed,
            period_in_seconds: self.rate_limit.period_seconds,
            ciphertext_bytes: self.decryptor.ciphertext_len(),
        }
    }
}

fn positive<R>(read: &R, var: &'static str, default: u32) -> Result<u32, ConfigError>
where
    R: Fn(&str) -> Option<String>,
{
    match read(var) {
        None => Ok(default),
        Some(value) => value
            .parse::<u32>()
            .ok()
            .filter(|parsed| *parsed > 0)
            .ok_or(ConfigError::InvalidNumber { var, value }),
    }
}
