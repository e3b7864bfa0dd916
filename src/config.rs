use std::path::PathBuf;

use anyhow::{bail, Result};

/// Server configuration read from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen port.
    pub port: u16,
    /// Bind host; the default binds all interfaces.
    pub host: String,
    /// PEM certificate path, enabling TLS when paired with `tls_key`.
    pub tls_cert: Option<PathBuf>,
    /// PEM private key path.
    pub tls_key: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables with defaults.
    pub fn from_env() -> Self {
        Config {
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            tls_cert: std::env::var("TLS_CERT_FILE").ok().map(PathBuf::from),
            tls_key: std::env::var("TLS_KEY_FILE").ok().map(PathBuf::from),
        }
    }

    /// Socket address string for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Certificate and key paths when TLS is enabled. Setting only one of
    /// the two variables is a configuration error, not a silent fallback.
    pub fn tls_paths(&self) -> Result<Option<(&PathBuf, &PathBuf)>> {
        match (&self.tls_cert, &self.tls_key) {
            (Some(cert), Some(key)) => Ok(Some((cert, key))),
            (None, None) => Ok(None),
            (Some(_), None) => bail!("TLS_CERT_FILE is set but TLS_KEY_FILE is not"),
            (None, Some(_)) => bail!("TLS_KEY_FILE is set but TLS_CERT_FILE is not"),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: 3000,
            host: "0.0.0.0".to_string(),
            tls_cert: None,
            tls_key: None,
        }
    }
}
